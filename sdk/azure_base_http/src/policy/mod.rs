//! The policy pipeline.
//!
//! Policies are inserted into a client in a fixed order. `on_request` hooks
//! run in that order before transmission, so a header added by one policy is
//! visible to every later one; `on_response` hooks run in the same order
//! after the final attempt completes. Policies communicate with the dispatch
//! loop through the request's typed option bag (retry configuration, error
//! mode, recorded auth failures).

mod api_key;
mod bearer;
mod error_handler;
mod headers;
mod retry;
mod sas;
mod shared_key;

pub use api_key::{ApiKeyError, ApiKeyPolicy};
pub use bearer::{BearerTokenError, BearerTokenPolicy};
pub use error_handler::{http_error_from_response, ErrorHandlerPolicy};
pub use headers::{AzureHeadersPolicy, RequestIdPolicy};
pub use retry::{RetryOptions, RetryPolicy};
pub use sas::SasTokenPolicy;
pub use shared_key::SharedKeyPolicy;

use async_trait::async_trait;

use azure_base_core::error::Result;

use crate::request::Request;
use crate::response::Response;

/// A request/response processor in the pipeline.
#[async_trait]
pub trait Policy: Send + Sync + std::fmt::Debug {
    /// Mutate the outgoing request before transmission.
    async fn on_request(&self, _request: &mut Request) -> Result<()> {
        Ok(())
    }

    /// Inspect or transform the normalized response after the final attempt.
    async fn on_response(&self, _request: &Request, _response: &mut Response) -> Result<()> {
        Ok(())
    }
}
