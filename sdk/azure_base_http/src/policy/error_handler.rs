//! Error normalization for final 4xx/5xx responses.

use async_trait::async_trait;
use serde_json::Value;

use azure_base_core::error::{HttpError, Result};

use super::Policy;
use crate::request::Request;
use crate::response::{Response, ResponseBody};

/// Converts a final `status >= 400` response into an [`HttpError`].
///
/// In `raise` mode the pipeline call fails with the error; otherwise the
/// response is returned with the error recorded in place of its body, for
/// callers that prefer result-style handling.
#[derive(Debug, Default)]
pub struct ErrorHandlerPolicy {
    raise: bool,
}

impl ErrorHandlerPolicy {
    /// Result mode: the error rides on the response.
    pub fn new() -> Self {
        Self::default()
    }

    /// Raise mode: the pipeline call fails with the `HttpError`.
    pub fn raising() -> Self {
        Self { raise: true }
    }
}

#[async_trait]
impl Policy for ErrorHandlerPolicy {
    async fn on_response(&self, _request: &Request, response: &mut Response) -> Result<()> {
        if response.status() < 400 {
            return Ok(());
        }

        let error = http_error_from_response(response);
        tracing::debug!(
            status = error.status,
            error_code = error.error_code.as_deref().unwrap_or(""),
            request_id = error.request_id.as_deref().unwrap_or(""),
            "request failed"
        );
        if self.raise {
            return Err(error.into());
        }
        response.set_error(error);
        Ok(())
    }
}

/// Build an [`HttpError`] from a response body, trying the nested Azure
/// error envelope first, then a flat envelope, then a plain-string body,
/// and finally a canned status message.
pub fn http_error_from_response(response: &Response) -> HttpError {
    let status = response.status();
    let (error_code, message) = match response.body() {
        ResponseBody::Json(Value::Object(object)) => {
            if let Some(Value::Object(nested)) = object.get("error") {
                (string_field(nested, "code"), string_field(nested, "message"))
            } else {
                (string_field(object, "code"), string_field(object, "message"))
            }
        }
        ResponseBody::Json(Value::String(text)) => (None, Some(text.clone())),
        ResponseBody::Text(text) if !text.is_empty() => (None, Some(text.clone())),
        _ => (None, None),
    };

    HttpError {
        status,
        error_code,
        message: message.unwrap_or_else(|| canned_status_message(status).to_string()),
        request_id: response.request_id().map(str::to_string),
        url: Some(response.url().to_string()),
    }
}

fn string_field(object: &serde_json::Map<String, Value>, key: &str) -> Option<String> {
    object.get(key).and_then(Value::as_str).map(str::to_string)
}

fn canned_status_message(status: u16) -> &'static str {
    match status {
        400 => "Bad Request",
        401 => "Unauthorized",
        403 => "Forbidden",
        404 => "Not Found",
        408 => "Request Timeout",
        409 => "Conflict",
        412 => "Precondition Failed",
        429 => "Too Many Requests",
        500 => "Internal Server Error",
        502 => "Bad Gateway",
        503 => "Service Unavailable",
        504 => "Gateway Timeout",
        _ => "HTTP Error",
    }
}
