//! The workload-identity token source: read the projected service-account
//! token from disk and exchange it through the OAuth2 JWT-bearer grant.

use std::path::{Path, PathBuf};
use std::time::Duration;

use azure_base_core::cloud::Cloud;
use azure_base_core::error::{Error, ManagedIdentityErrorKind, Result};
use azure_base_core::token::AccessTokenRecord;

use crate::oauth2::{self, TokenExchangeRequest};

const TENANT_ID_ENV: &str = "AZURE_TENANT_ID";
const CLIENT_ID_ENV: &str = "AZURE_CLIENT_ID";
const TOKEN_FILE_ENV: &str = "AZURE_FEDERATED_TOKEN_FILE";
const AUTHORITY_HOST_ENV: &str = "AZURE_AUTHORITY_HOST";

/// Acquires tokens for an AKS workload identity.
///
/// Every optional setting falls back to the standard environment variable;
/// explicit non-empty configuration always wins. Environment variables and
/// the token file are read at fetch time, so rotated projections are picked
/// up on the next acquisition.
#[derive(Debug, Clone)]
pub struct WorkloadIdentitySource {
    scope: String,
    tenant_id: Option<String>,
    client_id: Option<String>,
    token_file_path: Option<PathBuf>,
    cloud: Option<Cloud>,
    timeout: Option<Duration>,
}

/// Builder for [`WorkloadIdentitySource`].
#[derive(Debug, Default)]
pub struct WorkloadIdentitySourceBuilder {
    scope: Option<String>,
    tenant_id: Option<String>,
    client_id: Option<String>,
    token_file_path: Option<PathBuf>,
    cloud: Option<Cloud>,
    timeout: Option<Duration>,
}

impl WorkloadIdentitySource {
    pub fn builder() -> WorkloadIdentitySourceBuilder {
        WorkloadIdentitySourceBuilder::default()
    }

    #[tracing::instrument(name = "workload_identity_fetch", skip(self, http), fields(scope = %self.scope))]
    pub async fn fetch(&self, http: &reqwest::Client) -> Result<AccessTokenRecord> {
        let tenant_id = resolve(self.tenant_id.as_deref(), TENANT_ID_ENV)
            .ok_or_else(|| Error::missing_required("tenant_id"))?;
        let client_id = resolve(self.client_id.as_deref(), CLIENT_ID_ENV)
            .ok_or_else(|| Error::missing_required("client_id"))?;
        let token_file = self
            .token_file_path
            .clone()
            .or_else(|| resolve(None, TOKEN_FILE_ENV).map(PathBuf::from))
            .ok_or_else(|| Error::missing_required("token_file_path"))?;
        let cloud = self.cloud.clone().unwrap_or_else(|| {
            resolve(None, AUTHORITY_HOST_ENV)
                .map(Cloud::Custom)
                .unwrap_or_default()
        });

        let assertion = read_projected_token(&token_file).await?;

        let request = TokenExchangeRequest {
            tenant_id,
            client_id,
            assertion,
            scope: self.scope.clone(),
            cloud,
        };

        match self.timeout {
            Some(timeout) => oauth2::exchange_with_timeout(http, &request, timeout).await,
            None => oauth2::exchange(http, &request).await,
        }
    }
}

impl WorkloadIdentitySourceBuilder {
    /// **Required.** The scope to request.
    pub fn scope(mut self, scope: impl Into<String>) -> Self {
        self.scope = Some(scope.into());
        self
    }

    /// Tenant id; falls back to `AZURE_TENANT_ID`.
    pub fn tenant_id(mut self, tenant_id: impl Into<String>) -> Self {
        self.tenant_id = Some(tenant_id.into());
        self
    }

    /// Client id; falls back to `AZURE_CLIENT_ID`.
    pub fn client_id(mut self, client_id: impl Into<String>) -> Self {
        self.client_id = Some(client_id.into());
        self
    }

    /// Projected token file; falls back to `AZURE_FEDERATED_TOKEN_FILE`.
    pub fn token_file_path(mut self, path: impl Into<PathBuf>) -> Self {
        self.token_file_path = Some(path.into());
        self
    }

    /// Cloud selector; falls back to `AZURE_AUTHORITY_HOST`, then public.
    pub fn cloud(mut self, cloud: Cloud) -> Self {
        self.cloud = Some(cloud);
        self
    }

    /// Per-call exchange timeout override.
    pub fn timeout(mut self, timeout: Duration) -> Self {
        self.timeout = Some(timeout);
        self
    }

    pub fn build(self) -> Result<WorkloadIdentitySource> {
        let scope = match self.scope {
            Some(scope) if !scope.is_empty() => scope,
            _ => return Err(Error::missing_required("scope")),
        };

        Ok(WorkloadIdentitySource {
            scope,
            tenant_id: self.tenant_id,
            client_id: self.client_id,
            token_file_path: self.token_file_path,
            cloud: self.cloud,
            timeout: self.timeout,
        })
    }
}

fn resolve(explicit: Option<&str>, env_name: &str) -> Option<String> {
    match explicit {
        Some(value) if !value.is_empty() => Some(value.to_string()),
        _ => std::env::var(env_name).ok().filter(|v| !v.is_empty()),
    }
}

async fn read_projected_token(path: &Path) -> Result<String> {
    let contents = match tokio::fs::read_to_string(path).await {
        Ok(contents) => contents,
        Err(e) if e.kind() == std::io::ErrorKind::NotFound => {
            return Err(Error::managed_identity(
                ManagedIdentityErrorKind::TokenFileNotFound,
                format!("{}: {e}", path.display()),
            ))
        }
        Err(e) => {
            return Err(Error::managed_identity(
                ManagedIdentityErrorKind::TokenFileReadError,
                format!("{}: {e}", path.display()),
            ))
        }
    };

    let trimmed = contents.trim();
    if trimmed.is_empty() {
        return Err(Error::managed_identity(
            ManagedIdentityErrorKind::TokenFileReadError,
            format!("{}: token file is empty", path.display()),
        ));
    }
    Ok(trimmed.to_string())
}
