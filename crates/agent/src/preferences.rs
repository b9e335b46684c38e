//! Persistent client preferences.
//!
//! The agent stores one thing here: whether the user declined the permission
//! prompt (never ask again) or deferred it (ask again after a deadline).

use std::collections::HashMap;
use std::path::PathBuf;

use async_trait::async_trait;
use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use thiserror::Error;
use tokio::sync::Mutex;

/// Key under which the prompt decision is stored.
pub const PROMPT_PREFERENCE_KEY: &str = "courier.notification_prompt";

#[derive(Debug, Error)]
pub enum PreferenceError {
    #[error("preference file error: {0}")]
    Io(#[from] std::io::Error),

    #[error("preference encoding error: {0}")]
    Encoding(#[from] serde_json::Error),
}

/// Key/value store that survives restarts.
#[async_trait]
pub trait PreferenceStore: Send + Sync {
    async fn get(&self, key: &str) -> Result<Option<String>, PreferenceError>;
    async fn set(&self, key: &str, value: &str) -> Result<(), PreferenceError>;
    async fn remove(&self, key: &str) -> Result<(), PreferenceError>;
}

/// The user's answer to the permission prompt.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(tag = "kind", rename_all = "snake_case")]
pub enum PromptPreference {
    /// Do not prompt again automatically.
    Denied,
    /// Prompt again once `after` has passed.
    RemindLater { after: DateTime<Utc> },
}

impl PromptPreference {
    /// Whether an automatic prompt must be held back at `now`.
    pub fn suppresses_prompt(&self, now: DateTime<Utc>) -> bool {
        match self {
            PromptPreference::Denied => true,
            PromptPreference::RemindLater { after } => now < *after,
        }
    }

    pub async fn load(store: &dyn PreferenceStore) -> Result<Option<Self>, PreferenceError> {
        match store.get(PROMPT_PREFERENCE_KEY).await? {
            Some(raw) => Ok(Some(serde_json::from_str(&raw)?)),
            None => Ok(None),
        }
    }

    pub async fn save(&self, store: &dyn PreferenceStore) -> Result<(), PreferenceError> {
        store
            .set(PROMPT_PREFERENCE_KEY, &serde_json::to_string(self)?)
            .await
    }

    pub async fn clear(store: &dyn PreferenceStore) -> Result<(), PreferenceError> {
        store.remove(PROMPT_PREFERENCE_KEY).await
    }
}

/// Process-local store.
#[derive(Default)]
pub struct InMemoryPreferenceStore {
    values: Mutex<HashMap<String, String>>,
}

impl InMemoryPreferenceStore {
    pub fn new() -> Self {
        Self::default()
    }
}

#[async_trait]
impl PreferenceStore for InMemoryPreferenceStore {
    async fn get(&self, key: &str) -> Result<Option<String>, PreferenceError> {
        Ok(self.values.lock().await.get(key).cloned())
    }

    async fn set(&self, key: &str, value: &str) -> Result<(), PreferenceError> {
        self.values
            .lock()
            .await
            .insert(key.to_string(), value.to_string());
        Ok(())
    }

    async fn remove(&self, key: &str) -> Result<(), PreferenceError> {
        self.values.lock().await.remove(key);
        Ok(())
    }
}

/// JSON object on disk. The whole file is rewritten on every change.
pub struct JsonFilePreferenceStore {
    path: PathBuf,
    lock: Mutex<()>,
}

impl JsonFilePreferenceStore {
    pub fn new(path: impl Into<PathBuf>) -> Self {
        Self {
            path: path.into(),
            lock: Mutex::new(()),
        }
    }

    async fn read_all(&self) -> Result<HashMap<String, String>, PreferenceError> {
        match tokio::fs::read(&self.path).await {
            Ok(bytes) if bytes.is_empty() => Ok(HashMap::new()),
            Ok(bytes) => Ok(serde_json::from_slice(&bytes)?),
            Err(e) if e.kind() == std::io::ErrorKind::NotFound => Ok(HashMap::new()),
            Err(e) => Err(e.into()),
        }
    }

    async fn write_all(&self, values: &HashMap<String, String>) -> Result<(), PreferenceError> {
        if let Some(parent) = self.path.parent()
            && !parent.as_os_str().is_empty()
        {
            tokio::fs::create_dir_all(parent).await?;
        }
        tokio::fs::write(&self.path, serde_json::to_vec_pretty(values)?).await?;
        Ok(())
    }
}

#[async_trait]
impl PreferenceStore for JsonFilePreferenceStore {
    async fn get(&self, key: &str) -> Result<Option<String>, PreferenceError> {
        let _guard = self.lock.lock().await;
        Ok(self.read_all().await?.remove(key))
    }

    async fn set(&self, key: &str, value: &str) -> Result<(), PreferenceError> {
        let _guard = self.lock.lock().await;
        let mut values = self.read_all().await?;
        values.insert(key.to_string(), value.to_string());
        self.write_all(&values).await
    }

    async fn remove(&self, key: &str) -> Result<(), PreferenceError> {
        let _guard = self.lock.lock().await;
        let mut values = self.read_all().await?;
        if values.remove(key).is_some() {
            self.write_all(&values).await?;
        }
        Ok(())
    }
}
