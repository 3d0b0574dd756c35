use thiserror::Error;

/// Result type alias for azure_base operations.
pub type Result<T> = std::result::Result<T, Error>;

/// What went wrong with a configuration value.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ConfigErrorKind {
    /// A required key was not provided.
    MissingRequired,
    /// A key was provided but its value is unusable.
    InvalidValue,
    /// An option key itself is not recognized.
    InvalidOption,
}

impl std::fmt::Display for ConfigErrorKind {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            Self::MissingRequired => write!(f, "missing required"),
            Self::InvalidValue => write!(f, "invalid value"),
            Self::InvalidOption => write!(f, "invalid option"),
        }
    }
}

/// What is wrong with a static credential value.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum CredentialErrorKind {
    InvalidKey,
    InvalidSignature,
    InvalidNamedKey,
}

impl std::fmt::Display for CredentialErrorKind {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            Self::InvalidKey => write!(f, "invalid key"),
            Self::InvalidSignature => write!(f, "invalid signature"),
            Self::InvalidNamedKey => write!(f, "invalid named key"),
        }
    }
}

/// Failure modes of the federated-token provider layer.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum FederationErrorKind {
    /// The external identity service rejected or failed the token fetch.
    TokenFetchFailed,
    /// The provider tag is not one we know how to drive.
    UnknownProvider,
}

impl std::fmt::Display for FederationErrorKind {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            Self::TokenFetchFailed => write!(f, "token fetch failed"),
            Self::UnknownProvider => write!(f, "unknown provider"),
        }
    }
}

/// Failure modes of the managed-identity and workload-identity providers.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ManagedIdentityErrorKind {
    ImdsUnavailable,
    IdentityNotFound,
    TokenFileNotFound,
    TokenFileReadError,
    EnvironmentNotDetected,
    ProviderError,
    InvalidResponse,
}

impl std::fmt::Display for ManagedIdentityErrorKind {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            Self::ImdsUnavailable => write!(f, "IMDS unavailable"),
            Self::IdentityNotFound => write!(f, "identity not found"),
            Self::TokenFileNotFound => write!(f, "token file not found"),
            Self::TokenFileReadError => write!(f, "token file read error"),
            Self::EnvironmentNotDetected => write!(f, "environment not detected"),
            Self::ProviderError => write!(f, "provider error"),
            Self::InvalidResponse => write!(f, "invalid response"),
        }
    }
}

/// Azure AD STS error classes, mapped from AADSTS codes and `error` strings.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum StsErrorKind {
    InvalidClient,
    InvalidScope,
    InvalidRequest,
    InvalidTenantId,
    InvalidJwt,
    FederationTrustMismatch,
    CertificateNotFound,
    AuthenticationFailed,
    Unknown,
}

impl std::fmt::Display for StsErrorKind {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            Self::InvalidClient => write!(f, "invalid client"),
            Self::InvalidScope => write!(f, "invalid scope"),
            Self::InvalidRequest => write!(f, "invalid request"),
            Self::InvalidTenantId => write!(f, "invalid tenant id"),
            Self::InvalidJwt => write!(f, "invalid JWT"),
            Self::FederationTrustMismatch => write!(f, "federation trust mismatch"),
            Self::CertificateNotFound => write!(f, "certificate not found"),
            Self::AuthenticationFailed => write!(f, "authentication failed"),
            Self::Unknown => write!(f, "unknown"),
        }
    }
}

/// Internal token-server failures surfaced to `fetch` callers.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum TokenServerErrorKind {
    FetchFailed,
    UnknownSourceType,
}

impl std::fmt::Display for TokenServerErrorKind {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            Self::FetchFailed => write!(f, "fetch failed"),
            Self::UnknownSourceType => write!(f, "unknown source type"),
        }
    }
}

/// A normalized HTTP error built from a final 4xx/5xx response.
///
/// The display string is stable and intended for logs and messages:
/// `HTTP 400 [InvalidRequest]: Bad`.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct HttpError {
    /// Response status code.
    pub status: u16,
    /// Service error code, when the body carried one.
    pub error_code: Option<String>,
    /// Human-readable message.
    pub message: String,
    /// Server-side correlation id (`x-ms-request-id`).
    pub request_id: Option<String>,
    /// The request URL, when known.
    pub url: Option<String>,
}

impl std::fmt::Display for HttpError {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match &self.error_code {
            Some(code) => write!(f, "HTTP {} [{}]: {}", self.status, code, self.message),
            None => write!(f, "HTTP {}: {}", self.status, self.message),
        }
    }
}

impl std::error::Error for HttpError {}

/// Errors produced anywhere in the azure_base crates.
#[derive(Error, Debug)]
pub enum Error {
    /// Caller misconfiguration detected before any network traffic.
    #[error("configuration error ({kind}): `{key}`")]
    Configuration {
        kind: ConfigErrorKind,
        key: String,
        /// The offending value, when it is safe to echo back.
        value: Option<String>,
    },

    /// A static credential value failed validation.
    #[error("credential error: {kind}")]
    Credential { kind: CredentialErrorKind },

    /// A token response could not be turned into a token record.
    #[error("invalid token format")]
    InvalidTokenFormat {
        /// The raw body that failed to parse. Not included in the display
        /// string; may contain a partial token.
        token: String,
    },

    /// The transport failed before a response was produced.
    #[error("network error calling {service} at {endpoint}: {reason}")]
    Network {
        service: String,
        endpoint: String,
        reason: String,
    },

    /// A final HTTP 4xx/5xx, normalized.
    #[error(transparent)]
    Http(#[from] HttpError),

    /// The federated-token provider layer failed.
    #[error("federation error ({kind}) from {provider}: {reason}")]
    Federation {
        kind: FederationErrorKind,
        provider: String,
        reason: String,
    },

    /// The managed-identity or workload-identity provider failed.
    #[error("managed identity error ({kind}): {reason}")]
    ManagedIdentity {
        kind: ManagedIdentityErrorKind,
        provider: Option<String>,
        reason: String,
        status: Option<u16>,
    },

    /// Azure AD rejected the token exchange.
    #[error("Azure AD STS error ({kind}): {description}")]
    Sts {
        kind: StsErrorKind,
        /// The raw `error` string from the STS envelope, when present.
        error_code: Option<String>,
        description: String,
    },

    /// The credential agent could not serve a `fetch`.
    #[error("token server error ({kind}) for `{name}`: {reason}")]
    TokenServer {
        kind: TokenServerErrorKind,
        name: String,
        reason: String,
    },

    /// Anything not covered by the taxonomy above.
    #[error("unknown error: {0}")]
    Unknown(String),
}

impl Error {
    /// A required configuration key is absent.
    pub fn missing_required(key: impl Into<String>) -> Self {
        Self::Configuration {
            kind: ConfigErrorKind::MissingRequired,
            key: key.into(),
            value: None,
        }
    }

    /// A configuration key carries an unusable value.
    pub fn invalid_value(key: impl Into<String>, value: impl Into<String>) -> Self {
        Self::Configuration {
            kind: ConfigErrorKind::InvalidValue,
            key: key.into(),
            value: Some(value.into()),
        }
    }

    /// A configuration option is not recognized.
    pub fn invalid_option(key: impl Into<String>, value: impl Into<String>) -> Self {
        Self::Configuration {
            kind: ConfigErrorKind::InvalidOption,
            key: key.into(),
            value: Some(value.into()),
        }
    }

    pub fn credential(kind: CredentialErrorKind) -> Self {
        Self::Credential { kind }
    }

    pub fn network(
        service: impl Into<String>,
        endpoint: impl Into<String>,
        reason: impl Into<String>,
    ) -> Self {
        Self::Network {
            service: service.into(),
            endpoint: endpoint.into(),
            reason: reason.into(),
        }
    }

    pub fn federation(
        kind: FederationErrorKind,
        provider: impl Into<String>,
        reason: impl Into<String>,
    ) -> Self {
        Self::Federation {
            kind,
            provider: provider.into(),
            reason: reason.into(),
        }
    }

    pub fn managed_identity(
        kind: ManagedIdentityErrorKind,
        reason: impl Into<String>,
    ) -> Self {
        Self::ManagedIdentity {
            kind,
            provider: None,
            reason: reason.into(),
            status: None,
        }
    }

    pub fn token_server(
        kind: TokenServerErrorKind,
        name: impl Into<String>,
        reason: impl Into<String>,
    ) -> Self {
        Self::TokenServer {
            kind,
            name: name.into(),
            reason: reason.into(),
        }
    }

    /// True for errors a caller could fix by changing configuration.
    pub fn is_configuration(&self) -> bool {
        matches!(self, Self::Configuration { .. } | Self::Credential { .. })
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn http_error_display_with_code() {
        let err = HttpError {
            status: 400,
            error_code: Some("InvalidRequest".into()),
            message: "Bad".into(),
            request_id: Some("req-9".into()),
            url: None,
        };
        assert_eq!(err.to_string(), "HTTP 400 [InvalidRequest]: Bad");
    }

    #[test]
    fn http_error_display_without_code() {
        let err = HttpError {
            status: 503,
            error_code: None,
            message: "Service Unavailable".into(),
            request_id: None,
            url: None,
        };
        assert_eq!(err.to_string(), "HTTP 503: Service Unavailable");
    }

    #[test]
    fn http_error_passes_through_error_enum() {
        let err: Error = HttpError {
            status: 429,
            error_code: Some("Throttled".into()),
            message: "Too Many Requests".into(),
            request_id: None,
            url: Some("https://example.net/x".into()),
        }
        .into();
        assert_eq!(err.to_string(), "HTTP 429 [Throttled]: Too Many Requests");
    }

    #[test]
    fn configuration_error_display() {
        let err = Error::missing_required("tenant_id");
        assert_eq!(
            err.to_string(),
            "configuration error (missing required): `tenant_id`"
        );
    }

    #[test]
    fn invalid_token_format_display_hides_token() {
        let err = Error::InvalidTokenFormat {
            token: "eyJhbGciOi...".into(),
        };
        assert_eq!(err.to_string(), "invalid token format");
    }

    #[test]
    fn federation_error_display() {
        let err = Error::federation(
            FederationErrorKind::TokenFetchFailed,
            "aws_cognito",
            "identity pool not found",
        );
        assert_eq!(
            err.to_string(),
            "federation error (token fetch failed) from aws_cognito: identity pool not found"
        );
    }

    #[test]
    fn sts_error_display() {
        let err = Error::Sts {
            kind: StsErrorKind::InvalidTenantId,
            error_code: Some("invalid_client".into()),
            description: "AADSTS700016".into(),
        };
        assert_eq!(
            err.to_string(),
            "Azure AD STS error (invalid tenant id): AADSTS700016"
        );
    }

    #[test]
    fn token_server_error_display() {
        let err = Error::token_server(TokenServerErrorKind::FetchFailed, "storage", "agent down");
        assert_eq!(
            err.to_string(),
            "token server error (fetch failed) for `storage`: agent down"
        );
    }

    #[test]
    fn is_configuration_covers_credential_errors() {
        assert!(Error::credential(CredentialErrorKind::InvalidKey).is_configuration());
        assert!(Error::missing_required("scope").is_configuration());
        assert!(!Error::Unknown("x".into()).is_configuration());
    }
}
