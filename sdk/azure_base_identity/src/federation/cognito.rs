//! AWS Cognito federated-token provider.
//!
//! Two auth modes: `basic` calls `GetOpenIdToken` for an identity id;
//! `enhanced` calls `GetOpenIdTokenForDeveloperIdentity` and requires a
//! `logins` map of developer-provider names to tokens. AWS credentials are
//! resolved by the AWS SDK's default chain.

use async_trait::async_trait;
use aws_config::BehaviorVersion;
use std::collections::HashMap;

use azure_base_core::error::{Error, FederationErrorKind, Result};

use super::{AssertionProvider, ProviderOptions};

const PROVIDER_TAG: &str = "aws_cognito";

/// How the provider authenticates against Cognito.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub enum CognitoAuthMode {
    #[default]
    Basic,
    Enhanced,
}

/// Parse a comma-separated `provider=token` logins string into a map.
///
/// Entries are trimmed, split on the first `=`, and both sides trimmed;
/// entries with no `=` are silently dropped. An empty input produces an
/// empty map.
pub fn parse_logins(input: &str) -> HashMap<String, String> {
    input
        .split(',')
        .filter_map(|entry| {
            let entry = entry.trim();
            let (provider, token) = entry.split_once('=')?;
            Some((provider.trim().to_string(), token.trim().to_string()))
        })
        .filter(|(provider, _)| !provider.is_empty())
        .collect()
}

/// Obtains OpenID tokens from an AWS Cognito identity pool.
#[derive(Debug, Clone)]
pub struct CognitoAssertionProvider {
    identity_id: String,
    mode: CognitoAuthMode,
    logins: Option<HashMap<String, String>>,
}

impl CognitoAssertionProvider {
    /// Build a provider from the options remaining after dispatch.
    ///
    /// Recognized options: `auth_type` (`"basic"` default, or `"enhanced"`)
    /// and, for enhanced mode, `logins` (a map, or a comma-separated
    /// `provider=token` string).
    pub fn from_options(identity_id: String, options: &ProviderOptions) -> Result<Self> {
        let mode = match options.get("auth_type").and_then(|v| v.as_str()) {
            None | Some("basic") => CognitoAuthMode::Basic,
            Some("enhanced") => CognitoAuthMode::Enhanced,
            Some(other) => return Err(Error::invalid_value("auth_type", other)),
        };

        let logins = match mode {
            CognitoAuthMode::Basic => None,
            CognitoAuthMode::Enhanced => Some(extract_logins(options)?),
        };

        Ok(Self {
            identity_id,
            mode,
            logins,
        })
    }

    pub fn mode(&self) -> CognitoAuthMode {
        self.mode
    }

    pub fn logins(&self) -> Option<&HashMap<String, String>> {
        self.logins.as_ref()
    }
}

fn extract_logins(options: &ProviderOptions) -> Result<HashMap<String, String>> {
    match options.get("logins") {
        None => Err(Error::missing_required("logins")),
        Some(serde_json::Value::String(s)) => Ok(parse_logins(s)),
        Some(serde_json::Value::Object(map)) => map
            .iter()
            .map(|(k, v)| {
                v.as_str()
                    .map(|token| (k.clone(), token.to_string()))
                    .ok_or_else(|| Error::invalid_value("logins", v.to_string()))
            })
            .collect(),
        Some(other) => Err(Error::invalid_value("logins", other.to_string())),
    }
}

#[async_trait]
impl AssertionProvider for CognitoAssertionProvider {
    #[tracing::instrument(name = "cognito_fetch_assertion", skip(self), fields(mode = ?self.mode))]
    async fn fetch_assertion(&self) -> Result<String> {
        let config = aws_config::load_defaults(BehaviorVersion::latest()).await;
        let client = aws_sdk_cognitoidentity::Client::new(&config);

        let token = match self.mode {
            CognitoAuthMode::Basic => client
                .get_open_id_token()
                .identity_id(&self.identity_id)
                .send()
                .await
                .map_err(|e| fetch_failed(e.to_string()))?
                .token()
                .map(str::to_string),
            CognitoAuthMode::Enhanced => client
                .get_open_id_token_for_developer_identity()
                .identity_id(&self.identity_id)
                .set_logins(self.logins.clone())
                .send()
                .await
                .map_err(|e| fetch_failed(e.to_string()))?
                .token()
                .map(str::to_string),
        };

        token.ok_or_else(|| fetch_failed("response carried no token"))
    }
}

fn fetch_failed(reason: impl Into<String>) -> Error {
    Error::federation(FederationErrorKind::TokenFetchFailed, PROVIDER_TAG, reason)
}
