//! Tool Executor
//!
//! Capabilities the model may call mid-generation. Each [`Tool`] validates its
//! own arguments and talks to one external provider; the [`ToolExecutor`]
//! dispatches by name and turns every outcome, success or failure, into a
//! payload that can be handed back to the backend.

pub mod exchange;
pub mod places;
pub mod weather;

use crate::location::Coordinates;
use async_trait::async_trait;
use serde_json::{Map, Value, json};
use std::collections::HashMap;
use std::sync::Arc;
use std::time::Duration;
use tracing::{debug, warn};
use vertex_live::{FunctionDeclaration, FunctionResponse};

pub use exchange::{ExchangeRateHost, ExchangeRateProvider, ExchangeRateTool};
pub use places::{GooglePlaces, PlaceRecommendationTool, PlacesProvider};
pub use weather::{CurrentWeatherTool, OpenWeatherMap, WeatherProvider};

pub const GET_CURRENT_WEATHER: &str = "getCurrentWeather";
pub const GET_EXCHANGE_RATE: &str = "getExchangeRate";
pub const GET_PLACE_RECOMMENDATION: &str = "getPlaceRecommendation";

#[derive(Debug, thiserror::Error)]
pub enum ToolError {
    #[error("invalid arguments for {tool}: {reason}")]
    InvalidArguments { tool: String, reason: String },
    #[error("unknown capability '{0}'")]
    UnknownCapability(String),
    #[error("provider error: {message}")]
    Provider { status: Option<u16>, message: String },
    #[error("{tool} did not respond within {after:?}")]
    ProviderTimeout { tool: String, after: Duration },
}

impl ToolError {
    pub fn invalid(tool: &str, reason: impl Into<String>) -> Self {
        ToolError::InvalidArguments {
            tool: tool.to_string(),
            reason: reason.into(),
        }
    }

    pub fn provider(message: impl Into<String>) -> Self {
        ToolError::Provider {
            status: None,
            message: message.into(),
        }
    }

    /// Stable identifier used in function-result payloads.
    pub fn kind(&self) -> &'static str {
        match self {
            ToolError::InvalidArguments { .. } => "invalid_arguments",
            ToolError::UnknownCapability(_) => "unknown_capability",
            ToolError::Provider { .. } => "provider_error",
            ToolError::ProviderTimeout { .. } => "provider_timeout",
        }
    }
}

/// A capability exposed to the model.
#[async_trait]
pub trait Tool: Send + Sync {
    /// The schema advertised in the setup frame. Its `name` is the dispatch key.
    fn declaration(&self) -> FunctionDeclaration;

    /// Validates `args` and calls the provider.
    ///
    /// `location` is the session's current location, if known.
    async fn call(
        &self,
        args: &Map<String, Value>,
        location: Option<Coordinates>,
    ) -> Result<Value, ToolError>;
}

/// The outcome of one invocation.
#[derive(Debug)]
pub struct ToolResult {
    pub name: String,
    pub outcome: Result<Value, ToolError>,
}

impl ToolResult {
    /// The `response` object sent back to the backend.
    ///
    /// Objects pass through unchanged, any other value is wrapped as
    /// `{"content": value}`, and failures become `{"error": {kind, message}}`.
    pub fn payload(&self) -> Value {
        match &self.outcome {
            Ok(value @ Value::Object(_)) => value.clone(),
            Ok(other) => json!({ "content": other }),
            Err(e) => json!({ "error": { "kind": e.kind(), "message": e.to_string() } }),
        }
    }

    pub fn into_function_response(self, id: Option<String>) -> FunctionResponse {
        FunctionResponse {
            id,
            response: self.payload(),
            name: self.name,
        }
    }
}

/// Name-keyed dispatch table. Holds no per-session state.
pub struct ToolExecutor {
    tools: HashMap<String, Arc<dyn Tool>>,
    timeout: Option<Duration>,
}

impl ToolExecutor {
    /// An empty executor. With `timeout` set, a provider call that has not
    /// resolved in time yields [`ToolError::ProviderTimeout`].
    pub fn new(timeout: Option<Duration>) -> Self {
        Self {
            tools: HashMap::new(),
            timeout,
        }
    }

    pub fn with_tool(mut self, tool: Arc<dyn Tool>) -> Self {
        self.tools.insert(tool.declaration().name, tool);
        self
    }

    /// The three standard capabilities backed by the given providers.
    pub fn standard(
        weather: Arc<dyn WeatherProvider>,
        exchange: Arc<dyn ExchangeRateProvider>,
        places: Arc<dyn PlacesProvider>,
        timeout: Option<Duration>,
    ) -> Self {
        Self::new(timeout)
            .with_tool(Arc::new(CurrentWeatherTool::new(weather)))
            .with_tool(Arc::new(ExchangeRateTool::new(exchange)))
            .with_tool(Arc::new(PlaceRecommendationTool::new(places)))
    }

    /// Declarations for every registered tool, ordered by name.
    pub fn declarations(&self) -> Vec<FunctionDeclaration> {
        let mut declarations: Vec<_> = self.tools.values().map(|t| t.declaration()).collect();
        declarations.sort_by(|a, b| a.name.cmp(&b.name));
        declarations
    }

    /// Runs the named tool. Never fails at the call level: every error is
    /// carried in the returned [`ToolResult`].
    pub async fn invoke(
        &self,
        name: &str,
        args: &Map<String, Value>,
        location: Option<Coordinates>,
    ) -> ToolResult {
        let outcome = match self.tools.get(name) {
            None => Err(ToolError::UnknownCapability(name.to_string())),
            Some(tool) => {
                debug!(tool = name, ?args, "Invoking tool.");
                match self.timeout {
                    None => tool.call(args, location).await,
                    Some(after) => tokio::time::timeout(after, tool.call(args, location))
                        .await
                        .unwrap_or_else(|_| {
                            Err(ToolError::ProviderTimeout {
                                tool: name.to_string(),
                                after,
                            })
                        }),
                }
            }
        };

        if let Err(e) = &outcome {
            warn!(tool = name, kind = e.kind(), error = %e, "Tool call failed.");
        }

        ToolResult {
            name: name.to_string(),
            outcome,
        }
    }
}

/// Reads a provider response body as JSON, mapping non-2xx statuses and
/// unparseable bodies to [`ToolError::Provider`].
pub(crate) async fn read_json(
    provider: &str,
    response: reqwest::Response,
) -> Result<Value, ToolError> {
    let status = response.status();
    let body = response
        .text()
        .await
        .map_err(|e| ToolError::provider(format!("{provider}: failed to read response: {e}")))?;

    if !status.is_success() {
        return Err(ToolError::Provider {
            status: Some(status.as_u16()),
            message: format!("{provider} returned {status}: {body}"),
        });
    }

    serde_json::from_str(&body)
        .map_err(|e| ToolError::provider(format!("{provider}: invalid JSON response: {e}")))
}

/// Maps a transport-level reqwest failure.
pub(crate) fn request_failed(provider: &str, e: reqwest::Error) -> ToolError {
    ToolError::Provider {
        status: e.status().map(|s| s.as_u16()),
        message: format!("{provider}: request failed: {e}"),
    }
}

/// Deserializes the argument bag into a typed struct.
pub(crate) fn parse_args<T: serde::de::DeserializeOwned>(
    tool: &str,
    args: &Map<String, Value>,
) -> Result<T, ToolError> {
    serde_json::from_value(Value::Object(args.clone()))
        .map_err(|e| ToolError::invalid(tool, e.to_string()))
}
