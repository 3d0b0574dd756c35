//! Bearer-token authentication.

use async_trait::async_trait;
use secrecy::{ExposeSecret, SecretString};

use azure_base_core::error::{Error, Result};
use azure_base_identity::CredentialRegistry;

use super::Policy;
use crate::request::Request;

/// Recorded in the request option bag when a credential lookup fails. The
/// `Authorization` header is left absent so the server answers with 401
/// instead of the pipeline failing outright.
#[derive(Debug)]
pub struct BearerTokenError(pub Error);

enum TokenSource {
    /// A fixed token supplied by the caller.
    Static(SecretString),
    /// A credential-agent name resolved through the registry on every
    /// request.
    Credential {
        registry: CredentialRegistry,
        name: String,
    },
}

/// Adds `Authorization: Bearer <token>` to each request.
///
/// A static token takes precedence over a registry credential when both are
/// configured.
pub struct BearerTokenPolicy {
    source: TokenSource,
}

impl std::fmt::Debug for BearerTokenPolicy {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match &self.source {
            TokenSource::Static(_) => write!(f, "BearerTokenPolicy(static ****)"),
            TokenSource::Credential { name, .. } => {
                write!(f, "BearerTokenPolicy(credential `{name}`)")
            }
        }
    }
}

impl BearerTokenPolicy {
    /// Use a fixed token string.
    pub fn static_token(token: impl Into<String>) -> Self {
        Self {
            source: TokenSource::Static(SecretString::from(token.into())),
        }
    }

    /// Resolve the token from a named credential agent on every request.
    pub fn credential(registry: CredentialRegistry, name: impl Into<String>) -> Self {
        Self {
            source: TokenSource::Credential {
                registry,
                name: name.into(),
            },
        }
    }
}

#[async_trait]
impl Policy for BearerTokenPolicy {
    async fn on_request(&self, request: &mut Request) -> Result<()> {
        match &self.source {
            TokenSource::Static(token) => {
                request.set_header(
                    "authorization",
                    format!("Bearer {}", token.expose_secret()),
                );
            }
            TokenSource::Credential { registry, name } => match registry.fetch(name).await {
                Ok(token) => {
                    request.set_header("authorization", format!("Bearer {}", token.secret()));
                }
                Err(error) => {
                    tracing::debug!(credential = %name, %error, "bearer token unavailable");
                    request.options_mut().insert(BearerTokenError(error));
                }
            },
        }
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::request::Request;

    #[tokio::test]
    async fn static_token_sets_authorization() {
        let policy = BearerTokenPolicy::static_token("tok-123");
        let mut request = Request::get("https://example.net/").unwrap();

        policy.on_request(&mut request).await.unwrap();
        assert_eq!(
            request.header_value("authorization"),
            Some("Bearer tok-123")
        );
    }

    #[tokio::test]
    async fn missing_credential_records_error_and_omits_header() {
        let registry = CredentialRegistry::new();
        let policy = BearerTokenPolicy::credential(registry, "absent");
        let mut request = Request::get("https://example.net/").unwrap();

        policy.on_request(&mut request).await.unwrap();
        assert!(request.header_value("authorization").is_none());
        assert!(request.options().get::<BearerTokenError>().is_some());
    }

    #[test]
    fn debug_never_shows_the_token() {
        let policy = BearerTokenPolicy::static_token("super-secret");
        assert!(!format!("{policy:?}").contains("super-secret"));
    }
}
