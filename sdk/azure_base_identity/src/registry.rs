//! The credential registry: a shared map from credential name to the owning
//! agent and its most recently acquired token.
//!
//! Each entry has exactly one writer (the owning agent); readers take a
//! snapshot under a short read lock, so `fetch` on a warm credential is a
//! single map lookup with no agent round trip.

use std::collections::HashMap;
use std::sync::Arc;
use tokio::sync::RwLock;

use azure_base_core::error::{Error, Result, TokenServerErrorKind};
use azure_base_core::token::AccessTokenRecord;

use crate::agent::AgentHandle;

#[derive(Clone)]
struct RegistryEntry {
    handle: AgentHandle,
    token: Option<AccessTokenRecord>,
}

/// Shared, clone-cheap registry of credential agents.
#[derive(Clone, Default)]
pub struct CredentialRegistry {
    inner: Arc<RwLock<HashMap<String, RegistryEntry>>>,
}

impl CredentialRegistry {
    pub fn new() -> Self {
        Self::default()
    }

    /// Register an agent under a unique name. Fails when the name is taken.
    pub(crate) async fn register(&self, name: &str, handle: AgentHandle) -> Result<()> {
        let mut entries = self.inner.write().await;
        if entries.contains_key(name) {
            return Err(Error::invalid_value("name", name));
        }
        entries.insert(
            name.to_string(),
            RegistryEntry {
                handle,
                token: None,
            },
        );
        Ok(())
    }

    pub(crate) async fn deregister(&self, name: &str) {
        self.inner.write().await.remove(name);
    }

    /// Write a freshly acquired token. Only the owning agent calls this.
    pub(crate) async fn store_token(&self, name: &str, token: AccessTokenRecord) {
        if let Some(entry) = self.inner.write().await.get_mut(name) {
            entry.token = Some(token);
        }
    }

    pub(crate) async fn token(&self, name: &str) -> Option<AccessTokenRecord> {
        self.inner.read().await.get(name).and_then(|e| e.token.clone())
    }

    /// Look up an agent and the last token it published.
    pub async fn lookup(&self, name: &str) -> Option<(AgentHandle, Option<AccessTokenRecord>)> {
        self.inner
            .read()
            .await
            .get(name)
            .map(|entry| (entry.handle.clone(), entry.token.clone()))
    }

    /// The registered credential names, for diagnostics.
    pub async fn names(&self) -> Vec<String> {
        let mut names: Vec<String> = self.inner.read().await.keys().cloned().collect();
        names.sort();
        names
    }

    /// Fetch the current token for a named credential.
    ///
    /// Returns the registry value when one is present; otherwise performs a
    /// single round trip to the owning agent, which acquires a token and
    /// publishes it for subsequent callers. An acquisition failure is
    /// returned as-is and leaves the agent's refresh schedule untouched.
    pub async fn fetch(&self, name: &str) -> Result<AccessTokenRecord> {
        match self.lookup(name).await {
            None => Err(Error::token_server(
                TokenServerErrorKind::FetchFailed,
                name,
                "no credential agent registered under this name",
            )),
            Some((_, Some(token))) => Ok(token),
            Some((handle, None)) => handle.acquire().await,
        }
    }

    /// [`fetch`](Self::fetch), but panics on error.
    pub async fn must_fetch(&self, name: &str) -> AccessTokenRecord {
        match self.fetch(name).await {
            Ok(token) => token,
            Err(e) => panic!("credential fetch for `{name}` failed: {e}"),
        }
    }
}
