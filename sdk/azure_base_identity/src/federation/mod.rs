//! Federated-token providers: strategies that obtain the external assertion
//! later exchanged at the Azure AD token endpoint.

pub mod cognito;

use async_trait::async_trait;
use std::sync::Arc;

use azure_base_core::error::{Error, FederationErrorKind, Result};

pub use cognito::{parse_logins, CognitoAssertionProvider, CognitoAuthMode};

/// Options forwarded to a federated-token provider, as loosely typed
/// configuration data.
pub type ProviderOptions = serde_json::Map<String, serde_json::Value>;

/// The federation providers this crate can drive.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum FederationProviderKind {
    AwsCognito,
}

impl FederationProviderKind {
    /// Parse a provider tag. Unknown tags are an error, not a fallback.
    pub fn parse(tag: &str) -> Result<Self> {
        match tag {
            "aws_cognito" => Ok(Self::AwsCognito),
            other => Err(Error::federation(
                FederationErrorKind::UnknownProvider,
                other,
                "no federated-token provider registered under this tag",
            )),
        }
    }

    pub fn as_str(&self) -> &'static str {
        match self {
            Self::AwsCognito => "aws_cognito",
        }
    }
}

/// A strategy that produces one external assertion string.
///
/// Implementations are stateless from the caller's point of view; each
/// `fetch_assertion` call is an independent acquisition. Tests substitute
/// their own implementation to avoid real identity services.
#[async_trait]
pub trait AssertionProvider: Send + Sync + std::fmt::Debug {
    async fn fetch_assertion(&self) -> Result<String>;
}

/// Resolve a provider tag and options map into a ready provider.
///
/// The dispatcher extracts `identity_id` (defaulting to the empty string)
/// and hands the remaining options to the selected provider.
pub fn resolve(tag: &str, options: &ProviderOptions) -> Result<Arc<dyn AssertionProvider>> {
    match FederationProviderKind::parse(tag)? {
        FederationProviderKind::AwsCognito => {
            let identity_id = options
                .get("identity_id")
                .and_then(|v| v.as_str())
                .unwrap_or("")
                .to_string();
            Ok(Arc::new(CognitoAssertionProvider::from_options(
                identity_id,
                options,
            )?))
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn known_tag_parses() {
        assert_eq!(
            FederationProviderKind::parse("aws_cognito").unwrap(),
            FederationProviderKind::AwsCognito
        );
    }

    #[test]
    fn unknown_tag_is_typed_error() {
        let err = FederationProviderKind::parse("gcp_sts").unwrap_err();
        match err {
            Error::Federation { kind, provider, .. } => {
                assert_eq!(kind, FederationErrorKind::UnknownProvider);
                assert_eq!(provider, "gcp_sts");
            }
            other => panic!("expected Federation error, got {other:?}"),
        }
    }

    #[test]
    fn resolve_defaults_identity_id_to_empty() {
        let options = ProviderOptions::new();
        // Basic mode needs no logins, so resolution succeeds with no options.
        let provider = resolve("aws_cognito", &options).unwrap();
        assert!(format!("{provider:?}").contains("CognitoAssertionProvider"));
    }

    #[test]
    fn resolve_rejects_unknown_tag() {
        let options = ProviderOptions::new();
        assert!(resolve("okta", &options).is_err());
    }
}
