use buddy_core::Coordinates;
use std::net::SocketAddr;
use std::path::PathBuf;
use std::time::Duration;
use tracing::Level;

/// A custom error type for configuration loading failures.
#[derive(Debug, thiserror::Error)]
pub enum ConfigError {
    #[error("Missing environment variable: {0}")]
    MissingVar(String),
    #[error("Invalid value for environment variable {0}: {1}")]
    InvalidValue(String, String),
}

/// Holds all configuration loaded from the environment at startup.
#[derive(Clone, Debug)]
pub struct Config {
    pub bind_address: SocketAddr,
    pub log_level: Level,
    pub prompts_path: PathBuf,
    pub credentials_path: PathBuf,
    pub project_id: String,
    pub region: String,
    pub model: String,
    pub live_endpoint: String,
    pub tts_language: String,
    pub openweathermap_api_key: Option<String>,
    pub currency_api_key: Option<String>,
    pub google_place_api_key: Option<String>,
    pub tool_timeout: Option<Duration>,
    pub sweep_interval: Duration,
    pub default_location: Option<Coordinates>,
}

fn var_or(name: &str, default: &str) -> String {
    std::env::var(name).unwrap_or_else(|_| default.to_string())
}

/// An optional variable; empty values count as unset.
fn optional_var(name: &str) -> Option<String> {
    std::env::var(name).ok().filter(|v| !v.trim().is_empty())
}

fn parse_var<T>(name: &str, raw: &str) -> Result<T, ConfigError>
where
    T: std::str::FromStr,
    T::Err: std::fmt::Display,
{
    raw.trim()
        .parse::<T>()
        .map_err(|e| ConfigError::InvalidValue(name.to_string(), e.to_string()))
}

fn seconds(name: &str, raw: &str) -> Result<Duration, ConfigError> {
    let secs: u64 = parse_var(name, raw)?;
    if secs == 0 {
        return Err(ConfigError::InvalidValue(
            name.to_string(),
            "must be greater than zero".to_string(),
        ));
    }
    Ok(Duration::from_secs(secs))
}

impl Config {
    /// Loads configuration from environment variables.
    pub fn from_env() -> Result<Self, ConfigError> {
        // Only load from .env in non-test mode to avoid contamination
        if !cfg!(test) {
            dotenvy::dotenv().ok();
        }

        let bind_address_str = var_or("BIND_ADDRESS", "0.0.0.0:8081");
        let bind_address = bind_address_str
            .parse::<SocketAddr>()
            .map_err(|e| ConfigError::InvalidValue("BIND_ADDRESS".to_string(), e.to_string()))?;

        let log_level_str = var_or("RUST_LOG", "INFO");
        let log_level = log_level_str.parse::<Level>().map_err(|_| {
            ConfigError::InvalidValue(
                "RUST_LOG".to_string(),
                format!("'{}' is not a valid log level", log_level_str),
            )
        })?;

        let prompts_path = PathBuf::from(var_or("PROMPTS_PATH", "./prompts"));
        let credentials_path = PathBuf::from(var_or(
            "GOOGLE_APPLICATION_CREDENTIALS",
            "./credentials/key.json",
        ));

        let project_id = optional_var("GOOGLE_CLOUD_PROJECT")
            .ok_or_else(|| ConfigError::MissingVar("GOOGLE_CLOUD_PROJECT".to_string()))?;
        let region = var_or("GOOGLE_CLOUD_LOCATION", "us-central1");
        let model = var_or("LIVE_MODEL", "gemini-2.0-flash-exp");
        let live_endpoint = optional_var("LIVE_ENDPOINT")
            .unwrap_or_else(|| vertex_live::regional_endpoint(&region));

        let tts_language = var_or("TTS_LANGUAGE", "en-US");

        let tool_timeout = optional_var("TOOL_TIMEOUT_SECS")
            .map(|raw| seconds("TOOL_TIMEOUT_SECS", &raw))
            .transpose()?;
        let sweep_interval = seconds("SWEEP_INTERVAL_SECS", &var_or("SWEEP_INTERVAL_SECS", "30"))?;

        let default_location = match (
            optional_var("DEFAULT_LATITUDE"),
            optional_var("DEFAULT_LONGITUDE"),
        ) {
            (None, None) => None,
            (Some(lat), Some(lon)) => {
                let latitude: f64 = parse_var("DEFAULT_LATITUDE", &lat)?;
                let longitude: f64 = parse_var("DEFAULT_LONGITUDE", &lon)?;
                let coordinates = Coordinates::new(latitude, longitude).map_err(|e| {
                    ConfigError::InvalidValue("DEFAULT_LATITUDE".to_string(), e.to_string())
                })?;
                Some(coordinates)
            }
            (Some(_), None) => {
                return Err(ConfigError::MissingVar(
                    "DEFAULT_LONGITUDE must be set together with DEFAULT_LATITUDE".to_string(),
                ));
            }
            (None, Some(_)) => {
                return Err(ConfigError::MissingVar(
                    "DEFAULT_LATITUDE must be set together with DEFAULT_LONGITUDE".to_string(),
                ));
            }
        };

        Ok(Self {
            bind_address,
            log_level,
            prompts_path,
            credentials_path,
            project_id,
            region,
            model,
            live_endpoint,
            tts_language,
            openweathermap_api_key: optional_var("OPENWEATHERMAP_API_KEY"),
            currency_api_key: optional_var("CURRENCY_API_KEY"),
            google_place_api_key: optional_var("GOOGLE_PLACE_API_KEY"),
            tool_timeout,
            sweep_interval,
            default_location,
        })
    }

    /// Fully qualified publisher model name used in the setup frame.
    pub fn model_resource(&self) -> String {
        format!(
            "projects/{}/locations/{}/publishers/google/models/{}",
            self.project_id, self.region, self.model
        )
    }
}
