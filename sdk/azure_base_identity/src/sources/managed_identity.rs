//! The managed-identity token source: IMDS on Azure compute, or the
//! App Service identity endpoint.

use serde::Deserialize;
use std::time::Duration;

use azure_base_core::error::{Error, ManagedIdentityErrorKind, Result};
use azure_base_core::token::{unix_now, AccessTokenRecord};

const IMDS_ENDPOINT: &str = "http://169.254.169.254/metadata/identity/oauth2/token";
const API_VERSION: &str = "2019-08-01";
const METADATA_HEADER: &str = "Metadata";
const IDENTITY_HEADER_NAME: &str = "X-IDENTITY-HEADER";

const IDENTITY_ENDPOINT_ENV: &str = "IDENTITY_ENDPOINT";
const IDENTITY_HEADER_ENV: &str = "IDENTITY_HEADER";
const FEDERATED_TOKEN_FILE_ENV: &str = "AZURE_FEDERATED_TOKEN_FILE";

/// Total attempts the IMDS provider makes for 429/503/transport failures.
const IMDS_MAX_ATTEMPTS: u32 = 5;

/// Default timeout for metadata endpoints.
pub const DEFAULT_TIMEOUT: Duration = Duration::from_secs(5);

const EXPIRY_FALLBACK_SECS: u64 = 3600;

/// Which identity endpoint serves this source.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub enum ManagedIdentityProvider {
    /// Detect from the environment at fetch time.
    #[default]
    Auto,
    Imds,
    AppService,
}

/// A concrete endpoint choice after environment detection.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
enum IdentityEndpoint {
    Imds,
    AppService,
}

/// Acquires tokens for an Azure managed identity.
#[derive(Debug, Clone)]
pub struct ManagedIdentitySource {
    resource: String,
    client_id: Option<String>,
    object_id: Option<String>,
    mi_res_id: Option<String>,
    provider: ManagedIdentityProvider,
    endpoint: Option<String>,
    timeout: Duration,
}

/// Builder for [`ManagedIdentitySource`].
#[derive(Debug, Default)]
pub struct ManagedIdentitySourceBuilder {
    resource: Option<String>,
    client_id: Option<String>,
    object_id: Option<String>,
    mi_res_id: Option<String>,
    provider: ManagedIdentityProvider,
    endpoint: Option<String>,
    timeout: Option<Duration>,
}

impl ManagedIdentitySource {
    pub fn builder() -> ManagedIdentitySourceBuilder {
        ManagedIdentitySourceBuilder::default()
    }

    /// Fetch one token from the detected or configured identity endpoint.
    ///
    /// Environment variables are read here, not at construction, so rotated
    /// App Service secrets are picked up on the next acquisition.
    #[tracing::instrument(name = "managed_identity_fetch", skip(self, http), fields(resource = %self.resource))]
    pub async fn fetch(&self, http: &reqwest::Client) -> Result<AccessTokenRecord> {
        match self.resolve_endpoint()? {
            IdentityEndpoint::AppService => self.fetch_app_service(http).await,
            IdentityEndpoint::Imds => self.fetch_imds(http).await,
        }
    }

    fn resolve_endpoint(&self) -> Result<IdentityEndpoint> {
        match self.provider {
            ManagedIdentityProvider::Imds => Ok(IdentityEndpoint::Imds),
            ManagedIdentityProvider::AppService => Ok(IdentityEndpoint::AppService),
            ManagedIdentityProvider::Auto => {
                let app_service = non_empty_env(IDENTITY_ENDPOINT_ENV).is_some()
                    && non_empty_env(IDENTITY_HEADER_ENV).is_some();
                if app_service {
                    return Ok(IdentityEndpoint::AppService);
                }
                if non_empty_env(FEDERATED_TOKEN_FILE_ENV).is_some() {
                    // A workload-identity environment is a different source
                    // type; refusing here beats silently crossing over.
                    return Err(Error::managed_identity(
                        ManagedIdentityErrorKind::ProviderError,
                        "workload-identity environment detected; use the WorkloadIdentity token source",
                    ));
                }
                Ok(IdentityEndpoint::Imds)
            }
        }
    }

    /// Exactly one identity selector is sent, in `client_id`, `object_id`,
    /// `mi_res_id` precedence.
    fn identity_param(&self) -> Option<(&'static str, &str)> {
        if let Some(id) = self.client_id.as_deref() {
            Some(("client_id", id))
        } else if let Some(id) = self.object_id.as_deref() {
            Some(("object_id", id))
        } else {
            self.mi_res_id.as_deref().map(|id| ("mi_res_id", id))
        }
    }

    async fn fetch_imds(&self, http: &reqwest::Client) -> Result<AccessTokenRecord> {
        let endpoint = self.endpoint.as_deref().unwrap_or(IMDS_ENDPOINT);

        let mut last_error: Option<Error> = None;
        for attempt in 0..IMDS_MAX_ATTEMPTS {
            if attempt > 0 {
                tracing::debug!(attempt, "retrying IMDS token request");
            }

            let mut request = http
                .get(endpoint)
                .query(&[("api-version", API_VERSION), ("resource", self.resource.as_str())])
                .header(METADATA_HEADER, "true")
                .timeout(self.timeout);
            if let Some((key, value)) = self.identity_param() {
                request = request.query(&[(key, value)]);
            }

            let response = match request.send().await {
                Ok(response) => response,
                Err(e) => {
                    last_error = Some(Error::ManagedIdentity {
                        kind: ManagedIdentityErrorKind::ImdsUnavailable,
                        provider: Some("imds".into()),
                        reason: e.to_string(),
                        status: None,
                    });
                    if attempt + 1 < IMDS_MAX_ATTEMPTS {
                        tokio::time::sleep(imds_backoff(attempt)).await;
                    }
                    continue;
                }
            };

            let status = response.status();
            if status.as_u16() == 429 || status.as_u16() == 503 {
                let delay = retry_after_seconds(&response)
                    .map(Duration::from_secs)
                    .unwrap_or_else(|| imds_backoff(attempt));
                last_error = Some(Error::ManagedIdentity {
                    kind: ManagedIdentityErrorKind::ProviderError,
                    provider: Some("imds".into()),
                    reason: format!("IMDS throttled with status {}", status.as_u16()),
                    status: Some(status.as_u16()),
                });
                if attempt + 1 < IMDS_MAX_ATTEMPTS {
                    tokio::time::sleep(delay).await;
                }
                continue;
            }

            let body = response.text().await.map_err(|e| {
                Error::network("azure_imds", endpoint, e.to_string())
            })?;

            if status.is_success() {
                return parse_identity_response(&body, "imds");
            }

            // Other 4xx/5xx fail fast.
            return Err(provider_error_from_body(&body, status.as_u16(), "imds"));
        }

        Err(last_error.unwrap_or_else(|| {
            Error::managed_identity(
                ManagedIdentityErrorKind::ImdsUnavailable,
                "IMDS retries exhausted",
            )
        }))
    }

    async fn fetch_app_service(&self, http: &reqwest::Client) -> Result<AccessTokenRecord> {
        let endpoint = match self.endpoint.clone().or_else(|| non_empty_env(IDENTITY_ENDPOINT_ENV)) {
            Some(endpoint) => endpoint,
            None => {
                return Err(Error::managed_identity(
                    ManagedIdentityErrorKind::EnvironmentNotDetected,
                    format!("{IDENTITY_ENDPOINT_ENV} is not set"),
                ))
            }
        };
        let secret = match non_empty_env(IDENTITY_HEADER_ENV) {
            Some(secret) => secret,
            None => {
                return Err(Error::managed_identity(
                    ManagedIdentityErrorKind::EnvironmentNotDetected,
                    format!("{IDENTITY_HEADER_ENV} is not set"),
                ))
            }
        };

        let mut request = http
            .get(endpoint.as_str())
            .query(&[("api-version", API_VERSION), ("resource", self.resource.as_str())])
            .header(IDENTITY_HEADER_NAME, secret)
            .timeout(self.timeout);
        if let Some(id) = self.client_id.as_deref() {
            request = request.query(&[("client_id", id)]);
        }

        let response = request.send().await.map_err(|e| {
            Error::network("azure_app_service_identity", &endpoint, e.to_string())
        })?;

        let status = response.status();
        let body = response.text().await.map_err(|e| {
            Error::network("azure_app_service_identity", &endpoint, e.to_string())
        })?;

        if status.is_success() {
            parse_identity_response(&body, "app_service")
        } else {
            Err(provider_error_from_body(&body, status.as_u16(), "app_service"))
        }
    }
}

impl ManagedIdentitySourceBuilder {
    /// **Required.** The resource to request a token for, e.g.
    /// `https://management.azure.com/`.
    pub fn resource(mut self, resource: impl Into<String>) -> Self {
        self.resource = Some(resource.into());
        self
    }

    /// User-assigned identity client id.
    pub fn client_id(mut self, client_id: impl Into<String>) -> Self {
        self.client_id = Some(client_id.into());
        self
    }

    /// User-assigned identity object id.
    pub fn object_id(mut self, object_id: impl Into<String>) -> Self {
        self.object_id = Some(object_id.into());
        self
    }

    /// User-assigned identity ARM resource id.
    pub fn mi_res_id(mut self, mi_res_id: impl Into<String>) -> Self {
        self.mi_res_id = Some(mi_res_id.into());
        self
    }

    /// Force a specific provider instead of environment detection.
    pub fn provider(mut self, provider: ManagedIdentityProvider) -> Self {
        self.provider = provider;
        self
    }

    /// Override the identity endpoint URL. Useful for proxies and tests.
    pub fn endpoint(mut self, endpoint: impl Into<String>) -> Self {
        self.endpoint = Some(endpoint.into());
        self
    }

    /// Per-call timeout. Defaults to 5 seconds.
    pub fn timeout(mut self, timeout: Duration) -> Self {
        self.timeout = Some(timeout);
        self
    }

    pub fn build(self) -> Result<ManagedIdentitySource> {
        let resource = match self.resource {
            Some(resource) if !resource.is_empty() => resource,
            _ => return Err(Error::missing_required("resource")),
        };

        Ok(ManagedIdentitySource {
            resource,
            client_id: self.client_id,
            object_id: self.object_id,
            mi_res_id: self.mi_res_id,
            provider: self.provider,
            endpoint: self.endpoint,
            timeout: self.timeout.unwrap_or(DEFAULT_TIMEOUT),
        })
    }
}

fn imds_backoff(attempt: u32) -> Duration {
    Duration::from_millis((500u64 << attempt.min(16)).min(5000))
}

fn retry_after_seconds(response: &reqwest::Response) -> Option<u64> {
    response
        .headers()
        .get("retry-after")?
        .to_str()
        .ok()?
        .trim()
        .parse()
        .ok()
}

fn non_empty_env(name: &str) -> Option<String> {
    std::env::var(name).ok().filter(|v| !v.is_empty())
}

#[derive(Deserialize)]
struct IdentityTokenResponse {
    access_token: Option<String>,
    expires_on: Option<serde_json::Value>,
    expires_in: Option<serde_json::Value>,
    token_type: Option<String>,
    resource: Option<String>,
}

#[derive(Deserialize, Default)]
struct IdentityErrorResponse {
    error: Option<String>,
    error_description: Option<String>,
}

fn provider_error_from_body(body: &str, status: u16, provider: &str) -> Error {
    let envelope: IdentityErrorResponse = serde_json::from_str(body).unwrap_or_default();
    let reason = match (envelope.error, envelope.error_description) {
        (Some(code), Some(description)) => format!("{code}: {description}"),
        (Some(code), None) => code,
        (None, Some(description)) => description,
        (None, None) => body.to_string(),
    };
    Error::ManagedIdentity {
        kind: ManagedIdentityErrorKind::ProviderError,
        provider: Some(provider.to_string()),
        reason,
        status: Some(status),
    }
}

/// Parse an IMDS/App Service token response into a record.
///
/// Expiry comes from `expires_on` (unix seconds, string or int) when
/// present, else `now + expires_in`; numeric parse failures fall back to
/// one hour.
fn parse_identity_response(body: &str, provider: &str) -> Result<AccessTokenRecord> {
    let parsed: IdentityTokenResponse =
        serde_json::from_str(body).map_err(|e| Error::ManagedIdentity {
            kind: ManagedIdentityErrorKind::InvalidResponse,
            provider: Some(provider.to_string()),
            reason: e.to_string(),
            status: None,
        })?;

    let access_token = parsed.access_token.filter(|t| !t.is_empty()).ok_or_else(|| {
        Error::ManagedIdentity {
            kind: ManagedIdentityErrorKind::InvalidResponse,
            provider: Some(provider.to_string()),
            reason: "response carried no access_token".into(),
            status: None,
        }
    })?;

    let now = unix_now();
    let expires_at = match (&parsed.expires_on, &parsed.expires_in) {
        (Some(value), _) => numeric_seconds(value).unwrap_or(now + EXPIRY_FALLBACK_SECS),
        (None, Some(value)) => now + numeric_seconds(value).unwrap_or(EXPIRY_FALLBACK_SECS),
        (None, None) => {
            return Err(Error::ManagedIdentity {
                kind: ManagedIdentityErrorKind::InvalidResponse,
                provider: Some(provider.to_string()),
                reason: "response carried neither expires_on nor expires_in".into(),
                status: None,
            })
        }
    };

    Ok(AccessTokenRecord::new(access_token, expires_at)?
        .with_token_type(parsed.token_type.unwrap_or_else(|| "Bearer".to_string()))
        .with_scope(parsed.resource))
}

fn numeric_seconds(value: &serde_json::Value) -> Option<u64> {
    match value {
        serde_json::Value::Number(n) => n.as_u64(),
        serde_json::Value::String(s) => s.trim().parse().ok(),
        _ => None,
    }
}
