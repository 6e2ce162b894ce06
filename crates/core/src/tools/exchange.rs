use super::{GET_EXCHANGE_RATE, Tool, ToolError, parse_args, read_json, request_failed};
use crate::location::Coordinates;
use async_trait::async_trait;
use serde::Deserialize;
use serde_json::{Map, Value, json};
use std::sync::Arc;
use vertex_live::{FunctionDeclaration, Schema};

const PROVIDER: &str = "exchangerate.host";
const DEFAULT_BASE_URL: &str = "https://api.exchangerate.host";

#[cfg_attr(test, mockall::automock)]
#[async_trait]
pub trait ExchangeRateProvider: Send + Sync {
    /// Units of `to` per one unit of `from`. Codes are upper-case ISO 4217.
    async fn rate(&self, from: &str, to: &str) -> Result<f64, ToolError>;
}

pub struct ExchangeRateHost {
    http: reqwest::Client,
    api_key: Option<String>,
    base_url: String,
}

impl ExchangeRateHost {
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

#[async_trait]
impl ExchangeRateProvider for ExchangeRateHost {
    async fn rate(&self, from: &str, to: &str) -> Result<f64, ToolError> {
        let api_key = self
            .api_key
            .as_deref()
            .ok_or_else(|| ToolError::provider("CURRENCY_API_KEY is not configured"))?;

        let response = self
            .http
            .get(format!("{}/convert", self.base_url))
            .query(&[
                ("access_key", api_key),
                ("from", from),
                ("to", to),
                ("amount", "1"),
            ])
            .send()
            .await
            .map_err(|e| request_failed(PROVIDER, e))?;

        let body = read_json(PROVIDER, response).await?;
        parse_rate(&body)
    }
}

/// Extracts the rate from a `convert` response.
///
/// The API reports failures with `success: false` and a 200 status. The rate
/// has lived under `info.quote`, `info.rate` and `result` across API versions.
pub fn parse_rate(body: &Value) -> Result<f64, ToolError> {
    if body.get("success").and_then(Value::as_bool) != Some(true) {
        let error = body.get("error");
        let kind = error
            .and_then(|e| e.get("type"))
            .and_then(Value::as_str)
            .unwrap_or("unknown");
        let info = error
            .and_then(|e| e.get("info"))
            .and_then(Value::as_str)
            .unwrap_or("no details");
        return Err(ToolError::provider(format!(
            "{PROVIDER} reported failure ({kind}): {info}"
        )));
    }

    let info = body.get("info");
    info.and_then(|i| i.get("quote"))
        .and_then(Value::as_f64)
        .or_else(|| info.and_then(|i| i.get("rate")).and_then(Value::as_f64))
        .or_else(|| body.get("result").and_then(Value::as_f64))
        .ok_or_else(|| ToolError::provider(format!("{PROVIDER}: response carries no rate")))
}

#[derive(Deserialize, Debug)]
struct ExchangeArgs {
    from: String,
    to: String,
}

fn currency_code(tool: &str, field: &str, raw: &str) -> Result<String, ToolError> {
    let code = raw.trim().to_ascii_uppercase();
    if code.len() == 3 && code.chars().all(|c| c.is_ascii_alphabetic()) {
        Ok(code)
    } else {
        Err(ToolError::invalid(
            tool,
            format!("'{field}' must be a three-letter currency code, got '{raw}'"),
        ))
    }
}

/// `getExchangeRate`: result payload is `{"rate": f64}`.
pub struct ExchangeRateTool {
    provider: Arc<dyn ExchangeRateProvider>,
}

impl ExchangeRateTool {
    pub fn new(provider: Arc<dyn ExchangeRateProvider>) -> Self {
        Self { provider }
    }
}

#[async_trait]
impl Tool for ExchangeRateTool {
    fn declaration(&self) -> FunctionDeclaration {
        FunctionDeclaration {
            name: GET_EXCHANGE_RATE.to_string(),
            description: "Get the current exchange rate between two currencies.".to_string(),
            parameters: Schema::object()
                .property("from", Schema::string("ISO 4217 code of the source currency, e.g. USD."))
                .property("to", Schema::string("ISO 4217 code of the target currency, e.g. IDR."))
                .require(["from", "to"]),
        }
    }

    async fn call(
        &self,
        args: &Map<String, Value>,
        _location: Option<Coordinates>,
    ) -> Result<Value, ToolError> {
        let args: ExchangeArgs = parse_args(GET_EXCHANGE_RATE, args)?;
        let from = currency_code(GET_EXCHANGE_RATE, "from", &args.from)?;
        let to = currency_code(GET_EXCHANGE_RATE, "to", &args.to)?;

        let rate = self.provider.rate(&from, &to).await?;
        Ok(json!({ "rate": rate }))
    }
}
