//! The OAuth2 token exchanger: one client-credentials round trip against an
//! Azure AD tenant token endpoint, using an externally issued assertion
//! (JWT-bearer grant).

use serde::Deserialize;
use std::time::Duration;

use azure_base_core::cloud::Cloud;
use azure_base_core::error::{Error, Result, StsErrorKind};
use azure_base_core::token::{unix_now, AccessTokenRecord, ExpiresIn};

/// The client-assertion type for the JWT-bearer grant.
pub const CLIENT_ASSERTION_TYPE: &str =
    "urn:ietf:params:oauth:client-assertion-type:jwt-bearer";

/// Default timeout for an OAuth2 exchange.
pub const DEFAULT_TIMEOUT: Duration = Duration::from_secs(30);

/// Fallback relative lifetime when `expires_in` is not a usable number.
const EXPIRES_IN_FALLBACK_SECS: u64 = 3600;

/// One token-exchange request.
#[derive(Debug, Clone)]
pub struct TokenExchangeRequest {
    pub tenant_id: String,
    pub client_id: String,
    /// The externally issued assertion JWT. Treated as a secret; never
    /// logged.
    pub assertion: String,
    pub scope: String,
    pub cloud: Cloud,
}

#[derive(Deserialize)]
struct StsTokenResponse {
    access_token: String,
    expires_in: ExpiresIn,
    token_type: Option<String>,
    scope: Option<String>,
}

#[derive(Deserialize, Default)]
struct StsErrorResponse {
    error: Option<String>,
    error_description: Option<String>,
    error_codes: Option<Vec<i64>>,
}

/// Exchange an external assertion for an Azure AD access token.
#[tracing::instrument(
    name = "oauth2_exchange",
    skip(http, request),
    fields(tenant_id = %request.tenant_id, client_id = %request.client_id)
)]
pub async fn exchange(
    http: &reqwest::Client,
    request: &TokenExchangeRequest,
) -> Result<AccessTokenRecord> {
    exchange_with_timeout(http, request, DEFAULT_TIMEOUT).await
}

/// [`exchange`] with an explicit per-call timeout.
pub async fn exchange_with_timeout(
    http: &reqwest::Client,
    request: &TokenExchangeRequest,
    timeout: Duration,
) -> Result<AccessTokenRecord> {
    let endpoint = request.cloud.token_endpoint(&request.tenant_id);

    let form = [
        ("grant_type", "client_credentials"),
        ("client_id", request.client_id.as_str()),
        ("client_assertion_type", CLIENT_ASSERTION_TYPE),
        ("client_assertion", request.assertion.as_str()),
        ("scope", request.scope.as_str()),
    ];

    let response = http
        .post(endpoint.as_str())
        .form(&form)
        .timeout(timeout)
        .send()
        .await
        .map_err(|e| Error::network("azure_oauth2", &endpoint, e.to_string()))?;

    let status = response.status();
    let body = response
        .text()
        .await
        .map_err(|e| Error::network("azure_oauth2", &endpoint, e.to_string()))?;

    if status.is_success() {
        parse_token_response(&body, request.scope.clone())
    } else {
        tracing::debug!(status = status.as_u16(), "token exchange rejected");
        Err(map_sts_error(&body))
    }
}

fn parse_token_response(body: &str, requested_scope: String) -> Result<AccessTokenRecord> {
    let parsed: StsTokenResponse =
        serde_json::from_str(body).map_err(|_| Error::InvalidTokenFormat {
            token: body.to_string(),
        })?;

    let expires_in_secs = parsed
        .expires_in
        .as_seconds()
        .unwrap_or(EXPIRES_IN_FALLBACK_SECS);
    let expires_at = unix_now() + expires_in_secs;

    let record = AccessTokenRecord::new(parsed.access_token, expires_at)?
        .with_token_type(parsed.token_type.unwrap_or_else(|| "Bearer".to_string()))
        .with_scope(parsed.scope.or(Some(requested_scope)))
        .with_expires_in(parsed.expires_in);

    Ok(record)
}

/// AADSTS numeric codes take precedence over the `error` string.
const AADSTS_CODE_MAP: &[(i64, StsErrorKind)] = &[
    (70021, StsErrorKind::FederationTrustMismatch),
    (700016, StsErrorKind::InvalidTenantId),
    (50027, StsErrorKind::InvalidJwt),
    (700027, StsErrorKind::CertificateNotFound),
];

fn map_sts_error(body: &str) -> Error {
    let envelope: StsErrorResponse = serde_json::from_str(body).unwrap_or_default();

    let numeric_kind = envelope.error_codes.as_deref().and_then(|codes| {
        codes.iter().find_map(|code| {
            AADSTS_CODE_MAP
                .iter()
                .find(|(known, _)| known == code)
                .map(|(_, kind)| *kind)
        })
    });

    let kind = numeric_kind.unwrap_or_else(|| match envelope.error.as_deref() {
        Some("invalid_client") => StsErrorKind::InvalidClient,
        Some("invalid_scope") => StsErrorKind::InvalidScope,
        Some("invalid_request") => StsErrorKind::InvalidRequest,
        _ => StsErrorKind::AuthenticationFailed,
    });

    Error::Sts {
        kind,
        error_code: envelope.error,
        description: envelope
            .error_description
            .unwrap_or_else(|| "no error description returned".to_string()),
    }
}
