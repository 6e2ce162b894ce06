//! Per-session geolocation.

use serde::{Deserialize, Serialize};
use std::fmt;
use std::sync::Arc;
use tokio::sync::RwLock;

#[derive(Debug, thiserror::Error, PartialEq)]
pub enum LocationError {
    #[error("'{0}' is not a valid coordinate")]
    NotANumber(String),
    #[error("latitude {0} is outside -90..=90")]
    LatitudeOutOfRange(f64),
    #[error("longitude {0} is outside -180..=180")]
    LongitudeOutOfRange(f64),
}

/// A validated latitude/longitude pair, in degrees.
#[derive(Debug, Clone, Copy, PartialEq, Serialize)]
pub struct Coordinates {
    pub latitude: f64,
    pub longitude: f64,
}

impl Coordinates {
    pub fn new(latitude: f64, longitude: f64) -> Result<Self, LocationError> {
        if !(-90.0..=90.0).contains(&latitude) {
            return Err(LocationError::LatitudeOutOfRange(latitude));
        }
        if !(-180.0..=180.0).contains(&longitude) {
            return Err(LocationError::LongitudeOutOfRange(longitude));
        }
        Ok(Self {
            latitude,
            longitude,
        })
    }

    /// Builds coordinates from client-supplied values.
    pub fn parse(latitude: &Degrees, longitude: &Degrees) -> Result<Self, LocationError> {
        Self::new(latitude.to_f64()?, longitude.to_f64()?)
    }
}

impl fmt::Display for Coordinates {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}, {}", self.latitude, self.longitude)
    }
}

/// A coordinate as clients send it: browsers geolocation APIs give numbers,
/// but form fields and the model's own tool arguments arrive as strings.
#[derive(Deserialize, Debug, Clone, PartialEq)]
#[serde(untagged)]
pub enum Degrees {
    Number(f64),
    Text(String),
}

impl Degrees {
    pub fn to_f64(&self) -> Result<f64, LocationError> {
        match self {
            Degrees::Number(value) => Ok(*value),
            Degrees::Text(text) => text
                .trim()
                .parse::<f64>()
                .map_err(|_| LocationError::NotANumber(text.clone())),
        }
    }
}

/// The location shared by everything serving one session.
///
/// Starts out unset unless a default is configured. Writers take the lock
/// exclusively, readers always observe a whole pair.
#[derive(Debug, Clone, Default)]
pub struct LocationState {
    inner: Arc<RwLock<Option<Coordinates>>>,
}

impl LocationState {
    pub fn new(initial: Option<Coordinates>) -> Self {
        Self {
            inner: Arc::new(RwLock::new(initial)),
        }
    }

    pub async fn get(&self) -> Option<Coordinates> {
        *self.inner.read().await
    }

    pub async fn set(&self, coordinates: Coordinates) {
        *self.inner.write().await = Some(coordinates);
    }
}
