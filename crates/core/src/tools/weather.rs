use super::{GET_CURRENT_WEATHER, Tool, ToolError, parse_args, read_json, request_failed};
use crate::location::{Coordinates, Degrees};
use async_trait::async_trait;
use serde::Deserialize;
use serde_json::{Map, Value};
use std::sync::Arc;
use vertex_live::{FunctionDeclaration, Schema};

const PROVIDER: &str = "OpenWeatherMap";
const DEFAULT_BASE_URL: &str = "https://api.openweathermap.org/data/2.5";

/// Current conditions lookup.
#[cfg_attr(test, mockall::automock)]
#[async_trait]
pub trait WeatherProvider: Send + Sync {
    async fn by_coordinates(&self, coordinates: Coordinates) -> Result<Value, ToolError>;
    async fn by_city(&self, city: &str) -> Result<Value, ToolError>;
}

/// OpenWeatherMap's current weather API, metric units.
pub struct OpenWeatherMap {
    http: reqwest::Client,
    api_key: Option<String>,
    base_url: String,
}

impl OpenWeatherMap {
    pub fn new(http: reqwest::Client, api_key: Option<String>) -> Self {
        Self {
            http,
            api_key,
            base_url: DEFAULT_BASE_URL.to_string(),
        }
    }

    pub fn with_base_url(mut self, base_url: impl Into<String>) -> Self {
        self.base_url = base_url.into();
        self
    }

    async fn current(&self, query: &[(&str, String)]) -> Result<Value, ToolError> {
        let api_key = self
            .api_key
            .as_deref()
            .ok_or_else(|| ToolError::provider("OPENWEATHERMAP_API_KEY is not configured"))?;

        let response = self
            .http
            .get(format!("{}/weather", self.base_url))
            .query(query)
            .query(&[("units", "metric"), ("appid", api_key)])
            .send()
            .await
            .map_err(|e| request_failed(PROVIDER, e))?;

        read_json(PROVIDER, response).await
    }
}

#[async_trait]
impl WeatherProvider for OpenWeatherMap {
    async fn by_coordinates(&self, coordinates: Coordinates) -> Result<Value, ToolError> {
        self.current(&[
            ("lat", coordinates.latitude.to_string()),
            ("lon", coordinates.longitude.to_string()),
        ])
        .await
    }

    async fn by_city(&self, city: &str) -> Result<Value, ToolError> {
        self.current(&[("q", city.to_string())]).await
    }
}

#[derive(Deserialize, Debug, Default)]
struct WeatherArgs {
    latitude: Option<Degrees>,
    longitude: Option<Degrees>,
    city: Option<String>,
}

/// `getCurrentWeather`: explicit coordinates, then city, then the session's
/// own location.
pub struct CurrentWeatherTool {
    provider: Arc<dyn WeatherProvider>,
}

impl CurrentWeatherTool {
    pub fn new(provider: Arc<dyn WeatherProvider>) -> Self {
        Self { provider }
    }
}

#[async_trait]
impl Tool for CurrentWeatherTool {
    fn declaration(&self) -> FunctionDeclaration {
        FunctionDeclaration {
            name: GET_CURRENT_WEATHER.to_string(),
            description: "Get the current weather for a location. Omit all arguments to use the user's current location.".to_string(),
            parameters: Schema::object()
                .property("latitude", Schema::string("Latitude in decimal degrees."))
                .property("longitude", Schema::string("Longitude in decimal degrees."))
                .property("city", Schema::string("City name, e.g. Yogyakarta.")),
        }
    }

    async fn call(
        &self,
        args: &Map<String, Value>,
        location: Option<Coordinates>,
    ) -> Result<Value, ToolError> {
        let args: WeatherArgs = parse_args(GET_CURRENT_WEATHER, args)?;

        match (&args.latitude, &args.longitude) {
            (Some(lat), Some(lon)) => {
                let coordinates = Coordinates::parse(lat, lon)
                    .map_err(|e| ToolError::invalid(GET_CURRENT_WEATHER, e.to_string()))?;
                return self.provider.by_coordinates(coordinates).await;
            }
            (Some(_), None) | (None, Some(_)) => {
                return Err(ToolError::invalid(
                    GET_CURRENT_WEATHER,
                    "latitude and longitude must be given together",
                ));
            }
            (None, None) => {}
        }

        if let Some(city) = args.city.as_deref().map(str::trim).filter(|c| !c.is_empty()) {
            return self.provider.by_city(city).await;
        }

        match location {
            Some(coordinates) => self.provider.by_coordinates(coordinates).await,
            None => Err(ToolError::invalid(
                GET_CURRENT_WEATHER,
                "no coordinates or city given and the user's location is unknown",
            )),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::tools::test_server;
    use approx::assert_relative_eq;
    use axum::{Json, Router, extract::Query, routing::get};
    use serde_json::json;
    use std::collections::HashMap;

    fn args(value: Value) -> Map<String, Value> {
        value.as_object().cloned().unwrap()
    }

    #[tokio::test]
    async fn explicit_coordinates_win_over_session_location() {
        let mut provider = MockWeatherProvider::new();
        provider
            .expect_by_coordinates()
            .withf(|c| c.latitude == -7.7325 && c.longitude == 110.4024)
            .times(1)
            .returning(|_| Ok(json!({ "name": "Sleman" })));
        let tool = CurrentWeatherTool::new(Arc::new(provider));

        let session = Coordinates::new(1.0, 1.0).ok();
        let result = tool
            .call(&args(json!({ "latitude": "-7.7325", "longitude": 110.4024 })), session)
            .await
            .unwrap();
        assert_eq!(result["name"], "Sleman");
    }

    #[tokio::test]
    async fn city_is_used_when_no_coordinates() {
        let mut provider = MockWeatherProvider::new();
        provider
            .expect_by_city()
            .withf(|city| city.to_string() == "Bandung")
            .times(1)
            .returning(|_| Ok(json!({ "name": "Bandung" })));
        let tool = CurrentWeatherTool::new(Arc::new(provider));

        let result = tool.call(&args(json!({ "city": " Bandung " })), None).await.unwrap();
        assert_eq!(result["name"], "Bandung");
    }

    #[tokio::test]
    async fn falls_back_to_session_location_or_fails() {
        let mut provider = MockWeatherProvider::new();
        provider
            .expect_by_coordinates()
            .times(1)
            .returning(|_| Ok(json!({ "name": "Salatiga" })));
        let tool = CurrentWeatherTool::new(Arc::new(provider));

        let here = Coordinates::new(-7.3305, 110.5084).ok();
        assert!(tool.call(&Map::new(), here).await.is_ok());

        let err = tool.call(&Map::new(), None).await.unwrap_err();
        assert_eq!(err.kind(), "invalid_arguments");
    }

    #[tokio::test]
    async fn half_a_coordinate_pair_is_invalid() {
        let tool = CurrentWeatherTool::new(Arc::new(MockWeatherProvider::new()));
        let err = tool.call(&args(json!({ "latitude": "1.0" })), None).await.unwrap_err();
        assert!(matches!(err, ToolError::InvalidArguments { .. }));
    }

    #[tokio::test]
    async fn open_weather_map_sends_metric_coordinate_query() {
        let router = Router::new().route(
            "/weather",
            get(|Query(q): Query<HashMap<String, String>>| async move {
                Json(json!({
                    "lat": q["lat"].parse::<f64>().unwrap(),
                    "units": q["units"],
                    "appid": q["appid"],
                    "main": { "temp": 27.5 }
                }))
            }),
        );
        let base = test_server::spawn(router).await;
        let provider = OpenWeatherMap::new(reqwest::Client::new(), Some("k".into())).with_base_url(base);

        let body = provider
            .by_coordinates(Coordinates::new(-7.7325, 110.4024).unwrap())
            .await
            .unwrap();
        assert_relative_eq!(body["lat"].as_f64().unwrap(), -7.7325);
        assert_eq!(body["units"], "metric");
        assert_eq!(body["appid"], "k");
    }

    #[tokio::test]
    async fn open_weather_map_error_status_is_a_provider_error() {
        let router = Router::new().route(
            "/weather",
            get(|| async {
                (
                    axum::http::StatusCode::UNAUTHORIZED,
                    Json(json!({ "cod": 401, "message": "Invalid API key" })),
                )
            }),
        );
        let base = test_server::spawn(router).await;
        let provider = OpenWeatherMap::new(reqwest::Client::new(), Some("bad".into())).with_base_url(base);

        match provider.by_city("Jakarta").await {
            Err(ToolError::Provider { status, message }) => {
                assert_eq!(status, Some(401));
                assert!(message.contains("Invalid API key"));
            }
            other => panic!("expected provider error, got {other:?}"),
        }
    }

    #[tokio::test]
    async fn missing_key_fails_without_a_request() {
        let provider = OpenWeatherMap::new(reqwest::Client::new(), None).with_base_url("http://127.0.0.1:9");
        let err = provider.by_city("Jakarta").await.unwrap_err();
        assert!(err.to_string().contains("OPENWEATHERMAP_API_KEY"));
    }
}
