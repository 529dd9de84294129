//! Named remotes stored in project state

use crate::persistence::{load_json, update_json, StateStore};
use crate::protocol::{self, AuthMode};
use crate::remote::RemoteError;
use serde::{Deserialize, Serialize};
use std::collections::BTreeMap;
use std::sync::Arc;
use tracing::info;

/// Key of the remote registry in the state store
pub const REMOTES_KEY: &str = "remotes.json";

/// A remote execution server
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct RemoteConfig {
    pub name: String,
    pub url: String,
    pub auth: AuthMode,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub secret: Option<String>,
}

impl RemoteConfig {
    pub fn new(name: impl Into<String>, url: impl Into<String>, auth: AuthMode) -> Self {
        Self {
            name: name.into(),
            url: url.into(),
            auth,
            secret: None,
        }
    }

    pub fn with_secret(mut self, secret: impl Into<String>) -> Self {
        self.secret = Some(secret.into());
        self
    }

    /// Check the remote can be used
    pub fn validate(&self) -> Result<(), RemoteError> {
        let name_ok = !self.name.is_empty()
            && self
                .name
                .chars()
                .all(|c| c.is_ascii_alphanumeric() || c == '-' || c == '_' || c == '.');
        if !name_ok {
            return Err(RemoteError::Validation(format!(
                "invalid remote name '{}'",
                self.name
            )));
        }
        if !(self.url.starts_with("http://") || self.url.starts_with("https://")) {
            return Err(RemoteError::Validation(format!(
                "url must start with http:// or https://, got '{}'",
                self.url
            )));
        }
        if self.auth == AuthMode::Hmac {
            let secret = self.secret.as_deref().ok_or_else(|| {
                RemoteError::Validation("hmac auth requires a secret".to_string())
            })?;
            protocol::validate_secret(secret).map_err(|e| RemoteError::Validation(e.to_string()))?;
        }
        Ok(())
    }

    /// Base URL without a trailing slash
    pub fn base_url(&self) -> &str {
        self.url.trim_end_matches('/')
    }
}

/// Persistent map of remote name to [`RemoteConfig`]
#[derive(Clone)]
pub struct RemoteRegistry {
    store: Arc<dyn StateStore>,
}

impl RemoteRegistry {
    pub fn new(store: Arc<dyn StateStore>) -> Self {
        Self { store }
    }

    /// Register a new remote; names are unique
    pub fn add(&self, remote: RemoteConfig) -> Result<(), RemoteError> {
        remote.validate()?;

        let mut duplicate = false;
        update_json(
            self.store.as_ref(),
            REMOTES_KEY,
            |remotes: &mut BTreeMap<String, RemoteConfig>| {
                duplicate = remotes.contains_key(&remote.name);
                if !duplicate {
                    remotes.insert(remote.name.clone(), remote.clone());
                }
            },
        )?;

        if duplicate {
            return Err(RemoteError::Validation(format!(
                "remote '{}' already exists",
                remote.name
            )));
        }
        info!(remote = %remote.name, url = %remote.url, "Added remote");
        Ok(())
    }

    /// Remove a remote, returning its config
    pub fn remove(&self, name: &str) -> Result<RemoteConfig, RemoteError> {
        let mut removed = None;
        update_json(
            self.store.as_ref(),
            REMOTES_KEY,
            |remotes: &mut BTreeMap<String, RemoteConfig>| {
                removed = remotes.remove(name);
            },
        )?;

        let removed = removed.ok_or_else(|| RemoteError::UnknownRemote(name.to_string()))?;
        info!(remote = %name, "Removed remote");
        Ok(removed)
    }

    /// All remotes, sorted by name
    pub fn list(&self) -> Result<Vec<RemoteConfig>, RemoteError> {
        let remotes: BTreeMap<String, RemoteConfig> =
            load_json(self.store.as_ref(), REMOTES_KEY)?.unwrap_or_default();
        Ok(remotes.into_values().collect())
    }

    pub fn get(&self, name: &str) -> Result<RemoteConfig, RemoteError> {
        let remotes: BTreeMap<String, RemoteConfig> =
            load_json(self.store.as_ref(), REMOTES_KEY)?.unwrap_or_default();
        remotes
            .get(name)
            .cloned()
            .ok_or_else(|| RemoteError::UnknownRemote(name.to_string()))
    }
}
