//! Bearer credentials for Google Cloud APIs.

use async_trait::async_trait;
use gcp_auth::{CustomServiceAccount, TokenProvider};
use std::path::PathBuf;
use tokio::sync::OnceCell;
use tracing::info;

const CLOUD_PLATFORM_SCOPE: &str = "https://www.googleapis.com/auth/cloud-platform";

#[derive(Debug, thiserror::Error)]
pub enum CredentialError {
    #[error("failed to load service account key from {path}: {source}")]
    KeyFile {
        path: PathBuf,
        #[source]
        source: gcp_auth::Error,
    },
    #[error("failed to obtain access token: {0}")]
    Token(#[source] gcp_auth::Error),
}

/// Source of short-lived bearer tokens.
#[cfg_attr(test, mockall::automock)]
#[async_trait]
pub trait CredentialProvider: Send + Sync {
    async fn bearer_token(&self) -> Result<String, CredentialError>;
}

/// Tokens minted from a service-account key file.
///
/// The key file is read on first use, so a missing file surfaces as a failed
/// session rather than a failed startup. Tokens are cached and refreshed by
/// `gcp_auth`.
pub struct ServiceAccountCredentials {
    key_path: PathBuf,
    account: OnceCell<CustomServiceAccount>,
}

impl ServiceAccountCredentials {
    pub fn new(key_path: impl Into<PathBuf>) -> Self {
        Self {
            key_path: key_path.into(),
            account: OnceCell::new(),
        }
    }

    async fn account(&self) -> Result<&CustomServiceAccount, CredentialError> {
        self.account
            .get_or_try_init(|| async {
                let account = CustomServiceAccount::from_file(&self.key_path).map_err(|source| {
                    CredentialError::KeyFile {
                        path: self.key_path.clone(),
                        source,
                    }
                })?;
                info!(path = %self.key_path.display(), "Loaded service account credentials.");
                Ok(account)
            })
            .await
    }
}

#[async_trait]
impl CredentialProvider for ServiceAccountCredentials {
    async fn bearer_token(&self) -> Result<String, CredentialError> {
        let token = self
            .account()
            .await?
            .token(&[CLOUD_PLATFORM_SCOPE])
            .await
            .map_err(CredentialError::Token)?;
        Ok(token.as_str().to_string())
    }
}
