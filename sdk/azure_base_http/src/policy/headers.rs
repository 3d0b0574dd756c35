//! Azure header conventions and client request-id propagation.

use async_trait::async_trait;
use chrono::Utc;

use azure_base_core::error::Result;

use super::Policy;
use crate::request::Request;

/// RFC 1123 as Azure services expect it, always GMT.
const RFC1123_FMT: &str = "%a, %d %b %Y %H:%M:%S GMT";

const CLIENT_REQUEST_ID: &str = "x-ms-client-request-id";

/// Sets `x-ms-client-request-id` to a lowercase UUIDv4, unless the policy
/// was configured with an explicit id.
#[derive(Debug, Default)]
pub struct RequestIdPolicy {
    request_id: Option<String>,
}

impl RequestIdPolicy {
    pub fn new() -> Self {
        Self::default()
    }

    /// Use a fixed request id instead of generating one.
    pub fn with_request_id(request_id: impl Into<String>) -> Self {
        Self {
            request_id: Some(request_id.into().to_lowercase()),
        }
    }
}

#[async_trait]
impl Policy for RequestIdPolicy {
    async fn on_request(&self, request: &mut Request) -> Result<()> {
        let id = match &self.request_id {
            Some(id) => id.clone(),
            None => uuid::Uuid::new_v4().to_string(),
        };
        request.set_header(CLIENT_REQUEST_ID, id);
        Ok(())
    }
}

/// Adds the standard Azure request headers: `x-ms-version`, `x-ms-date`
/// (RFC 1123 GMT), and `x-ms-return-client-request-id: true`.
#[derive(Debug, Default)]
pub struct AzureHeadersPolicy {
    api_version: Option<String>,
    include_date: bool,
}

impl AzureHeadersPolicy {
    pub fn new() -> Self {
        Self {
            api_version: None,
            include_date: true,
        }
    }

    /// Sets `x-ms-version` to this service API version.
    pub fn api_version(mut self, api_version: impl Into<String>) -> Self {
        self.api_version = Some(api_version.into());
        self
    }

    /// Skip the `x-ms-date` header.
    pub fn include_date(mut self, include_date: bool) -> Self {
        self.include_date = include_date;
        self
    }
}

#[async_trait]
impl Policy for AzureHeadersPolicy {
    async fn on_request(&self, request: &mut Request) -> Result<()> {
        if let Some(version) = &self.api_version {
            request.set_header("x-ms-version", version.clone());
        }
        if self.include_date {
            request.set_header("x-ms-date", Utc::now().format(RFC1123_FMT).to_string());
        }
        request.set_header("x-ms-return-client-request-id", "true");
        Ok(())
    }
}
