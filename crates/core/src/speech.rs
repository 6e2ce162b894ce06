//! Text-to-speech for completed turns.

use crate::credentials::CredentialProvider;
use anyhow::{Context, Result, bail};
use async_trait::async_trait;
use serde::Deserialize;
use serde_json::json;
use std::sync::Arc;

const DEFAULT_ENDPOINT: &str = "https://texttospeech.googleapis.com/v1/text:synthesize";

/// Turns text into base64-encoded audio.
#[async_trait]
pub trait SpeechSynthesizer: Send + Sync {
    async fn synthesize(&self, text: &str, language_code: &str) -> Result<String>;
}

/// The voice used for a language, if a specific one is preferred.
pub fn voice_for(language_code: &str) -> Option<&'static str> {
    match language_code {
        "en-US" => Some("en-US-Wavenet-D"),
        "id-ID" => Some("id-ID-Wavenet-A"),
        _ => None,
    }
}

#[derive(Deserialize)]
#[serde(rename_all = "camelCase")]
struct SynthesizeResponse {
    audio_content: String,
}

/// Google Cloud Text-to-Speech, MP3 output.
pub struct GoogleTextToSpeech {
    http: reqwest::Client,
    credentials: Arc<dyn CredentialProvider>,
    endpoint: String,
}

impl GoogleTextToSpeech {
    pub fn new(http: reqwest::Client, credentials: Arc<dyn CredentialProvider>) -> Self {
        Self {
            http,
            credentials,
            endpoint: DEFAULT_ENDPOINT.to_string(),
        }
    }

    pub fn with_endpoint(mut self, endpoint: impl Into<String>) -> Self {
        self.endpoint = endpoint.into();
        self
    }
}

#[async_trait]
impl SpeechSynthesizer for GoogleTextToSpeech {
    async fn synthesize(&self, text: &str, language_code: &str) -> Result<String> {
        let token = self
            .credentials
            .bearer_token()
            .await
            .context("Failed to get credentials for speech synthesis")?;

        let mut voice = json!({ "languageCode": language_code });
        if let Some(name) = voice_for(language_code) {
            voice["name"] = json!(name);
        }

        let response = self
            .http
            .post(&self.endpoint)
            .bearer_auth(token)
            .json(&json!({
                "input": { "text": text },
                "voice": voice,
                "audioConfig": { "audioEncoding": "MP3" }
            }))
            .send()
            .await
            .context("Text-to-Speech request failed")?;

        let status = response.status();
        if !status.is_success() {
            let body = response.text().await.unwrap_or_default();
            bail!("Text-to-Speech returned {status}: {body}");
        }

        let body: SynthesizeResponse = response
            .json()
            .await
            .context("Text-to-Speech returned an unexpected body")?;
        Ok(body.audio_content)
    }
}
