//! Defines the WebSocket message protocol between the browser client and the relay.

use buddy_core::{Coordinates, Degrees, LocationError};
use serde::{Deserialize, Serialize};
use serde_json::Value;

#[derive(Debug, thiserror::Error)]
pub enum ProtocolError {
    #[error("client frame is not valid JSON: {0}")]
    Malformed(#[from] serde_json::Error),
    #[error("'{kind}' message is missing '{field}'")]
    MissingField { kind: String, field: &'static str },
    #[error("unknown message type '{0}'")]
    UnknownType(String),
    #[error("message has neither 'type' nor 'text'")]
    Unclassified,
    #[error("invalid location: {0}")]
    InvalidLocation(#[from] LocationError),
}

impl ProtocolError {
    /// Whether the frame was a location update that could not be applied.
    pub fn is_location(&self) -> bool {
        match self {
            ProtocolError::InvalidLocation(_) => true,
            ProtocolError::MissingField { kind, .. } => kind == "location",
            _ => false,
        }
    }
}

/// A text frame from the client, after classification.
#[derive(Debug, Clone, PartialEq)]
pub enum ClientMessage {
    /// `{type: "location", latitude, longitude}`.
    Location(Coordinates),
    /// Free-form `{text: "..."}`, subject to the keyword gates.
    Prompt(String),
    /// `{type: "text", content}`.
    Text(String),
    /// `{type: "audio", content}`, base64 audio.
    Audio(String),
    /// `{type: "audio_end"}`.
    AudioEnd,
    /// `{type: "image", content}`, base64 JPEG.
    Image(String),
}

#[derive(Deserialize, Debug, Default)]
struct RawClientMessage {
    #[serde(default, rename = "type")]
    kind: Option<String>,
    #[serde(default)]
    text: Option<String>,
    #[serde(default)]
    content: Option<String>,
    #[serde(default)]
    latitude: Option<Value>,
    #[serde(default)]
    longitude: Option<Value>,
}

fn degrees(field: &'static str, value: Option<Value>) -> Result<Degrees, ProtocolError> {
    let value = value.ok_or(ProtocolError::MissingField {
        kind: "location".into(),
        field,
    })?;
    serde_json::from_value(value.clone())
        .map_err(|_| LocationError::NotANumber(value.to_string()).into())
}

impl ClientMessage {
    /// Classifies a text frame. Location updates are checked first, then
    /// free-form prompts, then the typed shapes.
    pub fn parse(raw: &str) -> Result<Self, ProtocolError> {
        let msg: RawClientMessage = serde_json::from_str(raw)?;
        let kind = msg.kind.as_deref();

        if kind == Some("location") {
            let latitude = degrees("latitude", msg.latitude)?;
            let longitude = degrees("longitude", msg.longitude)?;
            return Ok(ClientMessage::Location(Coordinates::parse(
                &latitude, &longitude,
            )?));
        }

        if let Some(text) = msg.text {
            return Ok(ClientMessage::Prompt(text));
        }

        let Some(kind) = kind else {
            return Err(ProtocolError::Unclassified);
        };

        let content = || {
            msg.content
                .clone()
                .filter(|c| !c.is_empty())
                .ok_or_else(|| ProtocolError::MissingField {
                    kind: kind.to_string(),
                    field: "content",
                })
        };

        match kind {
            "text" => Ok(ClientMessage::Text(content()?)),
            "audio" => Ok(ClientMessage::Audio(content()?)),
            "audio_end" => Ok(ClientMessage::AudioEnd),
            "image" => Ok(ClientMessage::Image(content()?)),
            other => Err(ProtocolError::UnknownType(other.to_string())),
        }
    }
}

#[derive(Serialize, Debug, Clone, Copy, PartialEq, Eq)]
#[serde(rename_all = "snake_case")]
pub enum Status {
    Connected,
    AudioReceived,
    LocationUpdated,
    LocationRequest,
    Streaming,
    Success,
    Fail,
    WeatherResult,
    WeatherFailed,
}

/// Messages sent from the relay to the client.
#[derive(Serialize, Debug, Clone, PartialEq)]
pub struct ServerMessage {
    pub status: Status,
    pub code: u16,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub message: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub partial: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub response: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub audio: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub data: Option<Value>,
}

impl ServerMessage {
    fn new(status: Status, code: u16) -> Self {
        Self {
            status,
            code,
            message: None,
            partial: None,
            response: None,
            audio: None,
            data: None,
        }
    }

    fn with_message(mut self, message: impl Into<String>) -> Self {
        self.message = Some(message.into());
        self
    }

    pub fn connected() -> Self {
        Self::new(Status::Connected, 200).with_message("AI Assistant Ready")
    }

    pub fn audio_received() -> Self {
        Self::new(Status::AudioReceived, 200)
    }

    pub fn location_updated() -> Self {
        Self::new(Status::LocationUpdated, 200).with_message("Location updated")
    }

    pub fn location_request() -> Self {
        Self::new(Status::LocationRequest, 200).with_message(
            "This question needs your location. Please enable GPS and allow location access.",
        )
    }

    pub fn streaming(partial: impl Into<String>) -> Self {
        Self {
            partial: Some(partial.into()),
            ..Self::new(Status::Streaming, 200)
        }
    }

    /// A completed turn. `audio` is absent when synthesis failed.
    pub fn success(response: impl Into<String>, audio: Option<String>) -> Self {
        Self {
            response: Some(response.into()),
            audio,
            ..Self::new(Status::Success, 200)
        }
    }

    pub fn fail(message: impl Into<String>) -> Self {
        Self::new(Status::Fail, 500).with_message(message)
    }

    /// A location update that was rejected; the stored location is unchanged.
    pub fn invalid_location(message: impl Into<String>) -> Self {
        Self::new(Status::Fail, 400).with_message(message)
    }

    pub fn weather_result(data: Value) -> Self {
        Self {
            data: Some(data),
            ..Self::new(Status::WeatherResult, 200)
        }
    }

    pub fn weather_failed(message: impl Into<String>) -> Self {
        Self::new(Status::WeatherFailed, 502).with_message(message)
    }
}
