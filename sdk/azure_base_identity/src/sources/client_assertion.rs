//! The client-assertion token source: federation provider → OAuth2 exchange.

use std::sync::Arc;
use std::time::Duration;

use azure_base_core::cloud::Cloud;
use azure_base_core::error::{Error, Result};
use azure_base_core::token::AccessTokenRecord;

use crate::federation::{self, AssertionProvider, ProviderOptions};
use crate::oauth2::{self, TokenExchangeRequest};

/// Acquires tokens by fetching an external assertion from a federated-token
/// provider and exchanging it at the Azure AD token endpoint.
#[derive(Clone)]
pub struct ClientAssertionSource {
    tenant_id: String,
    client_id: String,
    scope: String,
    provider: String,
    provider_opts: ProviderOptions,
    cloud: Cloud,
    timeout: Option<Duration>,
    assertion_provider: Option<Arc<dyn AssertionProvider>>,
}

impl std::fmt::Debug for ClientAssertionSource {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("ClientAssertionSource")
            .field("tenant_id", &self.tenant_id)
            .field("client_id", &self.client_id)
            .field("scope", &self.scope)
            .field("provider", &self.provider)
            .field("cloud", &self.cloud)
            .finish()
    }
}

/// Builder for [`ClientAssertionSource`].
#[derive(Debug, Default)]
pub struct ClientAssertionSourceBuilder {
    tenant_id: Option<String>,
    client_id: Option<String>,
    scope: Option<String>,
    provider: Option<String>,
    provider_opts: ProviderOptions,
    cloud: Cloud,
    timeout: Option<Duration>,
    assertion_provider: Option<Arc<dyn AssertionProvider>>,
}

impl ClientAssertionSource {
    pub fn builder() -> ClientAssertionSourceBuilder {
        ClientAssertionSourceBuilder::default()
    }

    /// Fetch one token: assertion first, then the exchange. Errors from
    /// either step propagate unchanged.
    pub async fn fetch(&self, http: &reqwest::Client) -> Result<AccessTokenRecord> {
        let provider = match &self.assertion_provider {
            Some(provider) => Arc::clone(provider),
            None => federation::resolve(&self.provider, &self.provider_opts)?,
        };

        let assertion = provider.fetch_assertion().await?;

        let request = TokenExchangeRequest {
            tenant_id: self.tenant_id.clone(),
            client_id: self.client_id.clone(),
            assertion,
            scope: self.scope.clone(),
            cloud: self.cloud.clone(),
        };

        match self.timeout {
            Some(timeout) => oauth2::exchange_with_timeout(http, &request, timeout).await,
            None => oauth2::exchange(http, &request).await,
        }
    }
}

impl ClientAssertionSourceBuilder {
    /// **Required.** The Azure AD tenant to authenticate against.
    pub fn tenant_id(mut self, tenant_id: impl Into<String>) -> Self {
        self.tenant_id = Some(tenant_id.into());
        self
    }

    /// **Required.** The application (client) id.
    pub fn client_id(mut self, client_id: impl Into<String>) -> Self {
        self.client_id = Some(client_id.into());
        self
    }

    /// **Required.** The scope to request, e.g.
    /// `https://graph.microsoft.com/.default`.
    pub fn scope(mut self, scope: impl Into<String>) -> Self {
        self.scope = Some(scope.into());
        self
    }

    /// **Required.** The federated-token provider tag, e.g. `aws_cognito`.
    pub fn provider(mut self, provider: impl Into<String>) -> Self {
        self.provider = Some(provider.into());
        self
    }

    /// Options forwarded to the federated-token provider.
    pub fn provider_opts(mut self, opts: ProviderOptions) -> Self {
        self.provider_opts = opts;
        self
    }

    /// Cloud selector. Defaults to the public cloud.
    pub fn cloud(mut self, cloud: Cloud) -> Self {
        self.cloud = cloud;
        self
    }

    /// Per-call exchange timeout override.
    pub fn timeout(mut self, timeout: Duration) -> Self {
        self.timeout = Some(timeout);
        self
    }

    /// Replace the provider resolved from the tag. Intended for tests and
    /// for callers that already hold an assertion source.
    pub fn assertion_provider(mut self, provider: Arc<dyn AssertionProvider>) -> Self {
        self.assertion_provider = Some(provider);
        self
    }

    pub fn build(self) -> Result<ClientAssertionSource> {
        let tenant_id = require(self.tenant_id, "tenant_id")?;
        let client_id = require(self.client_id, "client_id")?;
        let scope = require(self.scope, "scope")?;
        let provider = require(self.provider, "provider")?;

        Ok(ClientAssertionSource {
            tenant_id,
            client_id,
            scope,
            provider,
            provider_opts: self.provider_opts,
            cloud: self.cloud,
            timeout: self.timeout,
            assertion_provider: self.assertion_provider,
        })
    }
}

fn require(value: Option<String>, key: &str) -> Result<String> {
    match value {
        Some(v) if !v.is_empty() => Ok(v),
        _ => Err(Error::missing_required(key)),
    }
}
