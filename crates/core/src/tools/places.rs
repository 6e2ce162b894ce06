use super::{GET_PLACE_RECOMMENDATION, Tool, ToolError, parse_args, read_json, request_failed};
use crate::location::Coordinates;
use async_trait::async_trait;
use serde::Deserialize;
use serde_json::{Map, Value, json};
use std::sync::Arc;
use vertex_live::{FunctionDeclaration, Schema};

const PROVIDER: &str = "Google Places";
const DEFAULT_BASE_URL: &str = "https://places.googleapis.com/v1";
const FIELD_MASK: &str =
    "places.displayName,places.formattedAddress,places.rating,places.priceLevel";
const BIAS_RADIUS_METERS: f64 = 5000.0;

#[cfg_attr(test, mockall::automock)]
#[async_trait]
pub trait PlacesProvider: Send + Sync {
    /// Free-text place search, optionally biased towards `near`.
    async fn search(&self, query: &str, near: Option<Coordinates>) -> Result<Value, ToolError>;
}

/// Places API (New) text search.
pub struct GooglePlaces {
    http: reqwest::Client,
    api_key: Option<String>,
    base_url: String,
}

impl GooglePlaces {
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
}

fn search_body(query: &str, near: Option<Coordinates>) -> Value {
    let mut body = json!({ "textQuery": query });
    if let Some(c) = near {
        body["locationBias"] = json!({
            "circle": {
                "center": { "latitude": c.latitude, "longitude": c.longitude },
                "radius": BIAS_RADIUS_METERS
            }
        });
    }
    body
}

#[async_trait]
impl PlacesProvider for GooglePlaces {
    async fn search(&self, query: &str, near: Option<Coordinates>) -> Result<Value, ToolError> {
        let api_key = self
            .api_key
            .as_deref()
            .ok_or_else(|| ToolError::provider("GOOGLE_PLACE_API_KEY is not configured"))?;

        let response = self
            .http
            .post(format!("{}/places:searchText", self.base_url))
            .header("X-Goog-Api-Key", api_key)
            .header("X-Goog-FieldMask", FIELD_MASK)
            .json(&search_body(query, near))
            .send()
            .await
            .map_err(|e| request_failed(PROVIDER, e))?;

        read_json(PROVIDER, response).await
    }
}

#[derive(Deserialize, Debug)]
struct PlaceArgs {
    query: String,
}

/// `getPlaceRecommendation`
pub struct PlaceRecommendationTool {
    provider: Arc<dyn PlacesProvider>,
}

impl PlaceRecommendationTool {
    pub fn new(provider: Arc<dyn PlacesProvider>) -> Self {
        Self { provider }
    }
}

#[async_trait]
impl Tool for PlaceRecommendationTool {
    fn declaration(&self) -> FunctionDeclaration {
        FunctionDeclaration {
            name: GET_PLACE_RECOMMENDATION.to_string(),
            description: "Recommend places such as restaurants, cafes or attractions matching a free-text query, near the user when their location is known.".to_string(),
            parameters: Schema::object()
                .property("query", Schema::string("What to look for, e.g. 'kopi enak di Jogja'."))
                .require(["query"]),
        }
    }

    async fn call(
        &self,
        args: &Map<String, Value>,
        location: Option<Coordinates>,
    ) -> Result<Value, ToolError> {
        let args: PlaceArgs = parse_args(GET_PLACE_RECOMMENDATION, args)?;
        let query = args.query.trim();
        if query.is_empty() {
            return Err(ToolError::invalid(GET_PLACE_RECOMMENDATION, "'query' is empty"));
        }
        self.provider.search(query, location).await
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::tools::test_server;
    use axum::{Json, Router, http::HeaderMap, routing::post};

    #[test]
    fn bias_is_added_only_when_location_is_known() {
        assert_eq!(search_body("kafe", None), json!({ "textQuery": "kafe" }));

        let near = Coordinates::new(-6.2, 106.8).unwrap();
        let body = search_body("kafe", Some(near));
        assert_eq!(body["locationBias"]["circle"]["center"]["latitude"], -6.2);
        assert_eq!(body["locationBias"]["circle"]["radius"], 5000.0);
    }

    #[tokio::test]
    async fn empty_query_is_rejected() {
        let tool = PlaceRecommendationTool::new(Arc::new(MockPlacesProvider::new()));
        let args = json!({ "query": "  " });
        let err = tool.call(args.as_object().unwrap(), None).await.unwrap_err();
        assert_eq!(err.kind(), "invalid_arguments");
    }

    #[tokio::test]
    async fn session_location_is_passed_through() {
        let mut provider = MockPlacesProvider::new();
        provider
            .expect_search()
            .withf(|q, near| q.to_string() == "restoran padang" && near.is_some())
            .times(1)
            .returning(|_, _| Ok(json!({ "places": [] })));
        let tool = PlaceRecommendationTool::new(Arc::new(provider));

        let args = json!({ "query": "restoran padang" });
        let here = Coordinates::new(-0.95, 100.35).ok();
        assert!(tool.call(args.as_object().unwrap(), here).await.is_ok());
    }

    #[tokio::test]
    async fn search_sends_key_and_field_mask_headers() {
        let router = Router::new().route(
            "/places:searchText",
            post(|headers: HeaderMap, Json(body): Json<Value>| async move {
                Json(json!({
                    "key": headers["x-goog-api-key"].to_str().unwrap(),
                    "mask": headers["x-goog-fieldmask"].to_str().unwrap(),
                    "query": body["textQuery"],
                }))
            }),
        );
        let base = test_server::spawn(router).await;
        let provider = GooglePlaces::new(reqwest::Client::new(), Some("pk".into())).with_base_url(base);

        let echoed = provider.search("mall", None).await.unwrap();
        assert_eq!(echoed["key"], "pk");
        assert_eq!(echoed["mask"], FIELD_MASK);
        assert_eq!(echoed["query"], "mall");
    }
}
