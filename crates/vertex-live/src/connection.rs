use tokio_tungstenite::{
    MaybeTlsStream, WebSocketStream, connect_async,
    tungstenite::{self, client::IntoClientRequest, http::HeaderValue},
};
use tracing::info;

/// An open connection to the Live endpoint.
pub type LiveStream = WebSocketStream<MaybeTlsStream<tokio::net::TcpStream>>;

/// The regional BidiGenerateContent endpoint for a Vertex AI location.
pub fn regional_endpoint(location: &str) -> String {
    format!(
        "wss://{location}-aiplatform.googleapis.com/ws/google.cloud.aiplatform.v1beta1.LlmBidiService/BidiGenerateContent"
    )
}

/// Dials the endpoint, authenticating with a bearer token.
///
/// Certificate verification is left on; the returned stream has not yet
/// received a setup frame.
pub async fn connect(endpoint: &str, bearer_token: &str) -> Result<LiveStream, tungstenite::Error> {
    let mut request = endpoint.into_client_request()?;
    let authorization = HeaderValue::from_str(&format!("Bearer {bearer_token}"))
        .map_err(|e| tungstenite::Error::HttpFormat(e.into()))?;
    request.headers_mut().insert("Authorization", authorization);

    let (stream, response) = connect_async(request).await?;
    info!(status = %response.status(), "Connected to Vertex AI Live endpoint.");
    Ok(stream)
}
