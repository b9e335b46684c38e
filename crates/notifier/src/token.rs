//! Bearer tokens for the FCM HTTP v1 API.
//!
//! Google OAuth access tokens live for about an hour. `FileAccessToken`
//! re-reads its file on every request so a separate refresher can rotate
//! the token without restarting the server.

use std::path::PathBuf;

use async_trait::async_trait;

use courier_common::transport::PushError;

#[async_trait]
pub trait AccessTokenProvider: Send + Sync {
    async fn access_token(&self) -> Result<String, PushError>;
}

/// A token fixed at start-up.
pub struct StaticAccessToken(String);

impl StaticAccessToken {
    pub fn new(token: impl Into<String>) -> Self {
        Self(token.into())
    }
}

#[async_trait]
impl AccessTokenProvider for StaticAccessToken {
    async fn access_token(&self) -> Result<String, PushError> {
        Ok(self.0.clone())
    }
}

/// A token kept current in a file by something outside this process.
pub struct FileAccessToken {
    path: PathBuf,
}

impl FileAccessToken {
    pub fn new(path: impl Into<PathBuf>) -> Self {
        Self { path: path.into() }
    }
}

#[async_trait]
impl AccessTokenProvider for FileAccessToken {
    async fn access_token(&self) -> Result<String, PushError> {
        let raw = tokio::fs::read_to_string(&self.path).await.map_err(|e| {
            PushError::Transport(format!(
                "Failed to read FCM token file {}: {}",
                self.path.display(),
                e
            ))
        })?;

        let token = raw.trim();
        if token.is_empty() {
            return Err(PushError::Transport(format!(
                "FCM token file {} is empty",
                self.path.display()
            )));
        }
        Ok(token.to_string())
    }
}
