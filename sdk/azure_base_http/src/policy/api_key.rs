//! API-key authentication.

use async_trait::async_trait;

use azure_base_core::credentials::ApiKeyCredential;
use azure_base_core::error::{CredentialErrorKind, Error, Result};

use super::Policy;
use crate::request::Request;

const DEFAULT_HEADER: &str = "api-key";

/// Recorded in the request option bag when the configured key is unusable;
/// the header is omitted.
#[derive(Debug)]
pub struct ApiKeyError(pub Error);

/// Sends an API key in a configurable header (default `api-key`), with an
/// optional value prefix.
#[derive(Debug)]
pub struct ApiKeyPolicy {
    key: Option<ApiKeyCredential>,
    header_name: String,
    prefix: Option<String>,
}

impl ApiKeyPolicy {
    /// Configure from a raw key string. An empty key is remembered as
    /// invalid and reported per request rather than failing construction.
    pub fn new(key: impl Into<String>) -> Self {
        Self {
            key: ApiKeyCredential::new(key).ok(),
            header_name: DEFAULT_HEADER.to_string(),
            prefix: None,
        }
    }

    pub fn from_credential(credential: ApiKeyCredential) -> Self {
        Self {
            key: Some(credential),
            header_name: DEFAULT_HEADER.to_string(),
            prefix: None,
        }
    }

    /// Send the key in this header instead of `api-key`.
    pub fn header_name(mut self, header_name: impl Into<String>) -> Self {
        self.header_name = header_name.into();
        self
    }

    /// Prepend `"<prefix> "` to the header value.
    pub fn prefix(mut self, prefix: impl Into<String>) -> Self {
        self.prefix = Some(prefix.into());
        self
    }
}

#[async_trait]
impl Policy for ApiKeyPolicy {
    async fn on_request(&self, request: &mut Request) -> Result<()> {
        match &self.key {
            Some(credential) => {
                let value = match &self.prefix {
                    Some(prefix) => format!("{prefix} {}", credential.key()),
                    None => credential.key().to_string(),
                };
                request.set_header(&self.header_name, value);
            }
            None => {
                request
                    .options_mut()
                    .insert(ApiKeyError(Error::credential(CredentialErrorKind::InvalidKey)));
            }
        }
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[tokio::test]
    async fn key_lands_in_default_header() {
        let policy = ApiKeyPolicy::new("k-1");
        let mut request = Request::get("https://example.net/").unwrap();

        policy.on_request(&mut request).await.unwrap();
        assert_eq!(request.header_value("api-key"), Some("k-1"));
    }

    #[tokio::test]
    async fn header_name_and_prefix_are_configurable() {
        let policy = ApiKeyPolicy::new("k-1")
            .header_name("Ocp-Apim-Subscription-Key")
            .prefix("SharedAccessKey");
        let mut request = Request::get("https://example.net/").unwrap();

        policy.on_request(&mut request).await.unwrap();
        assert_eq!(
            request.header_value("ocp-apim-subscription-key"),
            Some("SharedAccessKey k-1")
        );
    }

    #[tokio::test]
    async fn empty_key_records_error_and_omits_header() {
        let policy = ApiKeyPolicy::new("");
        let mut request = Request::get("https://example.net/").unwrap();

        policy.on_request(&mut request).await.unwrap();
        assert!(request.header_value("api-key").is_none());
        assert!(request.options().get::<ApiKeyError>().is_some());
    }
}
