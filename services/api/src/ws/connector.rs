//! Opens and authenticates the backend connection for one session.

use super::transport::{Frame, Transport, TransportError};
use async_trait::async_trait;
use buddy_core::{Coordinates, CredentialError, CredentialProvider, LocationState};
use futures_util::SinkExt;
use std::path::Path;
use std::sync::Arc;
use tokio_tungstenite::tungstenite;
use tracing::{info, instrument};
use vertex_live::{
    ClientMessage as BackendMessage, Content, FunctionDeclaration, GenerationConfig, Setup, Tool,
};

pub const SYSTEM_PROMPT_FILE: &str = "system_prompt.md";

#[derive(Debug, thiserror::Error)]
pub enum HandshakeError {
    #[error("could not obtain credentials: {0}")]
    Credentials(#[from] CredentialError),
    #[error("could not connect: {0}")]
    Connect(#[from] tungstenite::Error),
    #[error("could not send setup: {0}")]
    Setup(#[from] TransportError),
}

/// Something that can open a ready-to-use backend connection.
///
/// The returned transport has already carried the setup frame.
#[async_trait]
pub trait Upstream: Send + Sync {
    async fn open(&self, location: &LocationState) -> Result<Transport, HandshakeError>;
}

/// Reads the system instruction template from the prompts directory.
pub fn load_system_prompt(prompts_path: &Path) -> std::io::Result<String> {
    std::fs::read_to_string(prompts_path.join(SYSTEM_PROMPT_FILE))
}

/// Fills the `{latitude}` and `{longitude}` placeholders.
pub fn render_system_prompt(template: &str, location: Option<Coordinates>) -> String {
    let (latitude, longitude) = match location {
        Some(c) => (c.latitude.to_string(), c.longitude.to_string()),
        None => ("unknown".to_string(), "unknown".to_string()),
    };
    template
        .replace("{latitude}", &latitude)
        .replace("{longitude}", &longitude)
}

/// Builds the handshake frame.
pub fn setup_message(
    model: &str,
    declarations: Vec<FunctionDeclaration>,
    system_instruction: String,
) -> BackendMessage {
    let tools = if declarations.is_empty() {
        Vec::new()
    } else {
        vec![Tool {
            function_declarations: declarations,
        }]
    };
    BackendMessage::Setup(Setup {
        model: model.to_string(),
        generation_config: GenerationConfig::default(),
        tools,
        system_instruction: Some(Content::system(system_instruction)),
    })
}

/// The Vertex AI Live endpoint.
pub struct VertexConnector {
    endpoint: String,
    model: String,
    credentials: Arc<dyn CredentialProvider>,
    declarations: Vec<FunctionDeclaration>,
    prompt_template: String,
}

impl VertexConnector {
    /// # Arguments
    ///
    /// * `endpoint` - WebSocket URL of the BidiGenerateContent service.
    /// * `model` - Fully qualified model resource name.
    /// * `declarations` - Tool schemas advertised on every connection.
    /// * `prompt_template` - System instruction with location placeholders.
    pub fn new(
        endpoint: String,
        model: String,
        credentials: Arc<dyn CredentialProvider>,
        declarations: Vec<FunctionDeclaration>,
        prompt_template: String,
    ) -> Self {
        Self {
            endpoint,
            model,
            credentials,
            declarations,
            prompt_template,
        }
    }
}

#[async_trait]
impl Upstream for VertexConnector {
    #[instrument(name = "upstream_open", skip_all, fields(endpoint = %self.endpoint))]
    async fn open(&self, location: &LocationState) -> Result<Transport, HandshakeError> {
        let token = self.credentials.bearer_token().await?;
        let stream = vertex_live::connect(&self.endpoint, &token).await?;
        let mut transport = Transport::from_tungstenite(stream);

        let instruction = render_system_prompt(&self.prompt_template, location.get().await);
        let setup = setup_message(&self.model, self.declarations.clone(), instruction);
        let text = serde_json::to_string(&setup).map_err(TransportError::from)?;
        transport.sink.send(Frame::Text(text)).await?;

        info!(model = %self.model, tools = self.declarations.len(), "Setup sent to AI service.");
        Ok(transport)
    }
}
