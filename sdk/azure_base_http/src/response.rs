//! The normalized response produced by the pipeline.

use std::collections::BTreeMap;

use azure_base_core::error::{Error, HttpError, Result};

/// A response body, parsed according to the `content-type` header.
#[derive(Debug, Clone, PartialEq, Default)]
pub enum ResponseBody {
    #[default]
    Empty,
    Json(serde_json::Value),
    Text(String),
    Bytes(Vec<u8>),
}

/// A normalized response.
///
/// Header names are lowercased; repeated headers are joined with `", "`. The
/// two correlation ids are exposed directly: `x-ms-request-id` (assigned by
/// the server) and `x-ms-client-request-id` (echoed back).
#[derive(Debug)]
pub struct Response {
    status: u16,
    headers: BTreeMap<String, String>,
    body: ResponseBody,
    url: String,
    error: Option<HttpError>,
}

impl Response {
    pub(crate) fn new(
        status: u16,
        headers: BTreeMap<String, String>,
        body: ResponseBody,
        url: String,
    ) -> Self {
        Self {
            status,
            headers,
            body,
            url,
            error: None,
        }
    }

    /// Normalize a transport response, consuming its body.
    pub(crate) async fn from_reqwest(response: reqwest::Response) -> Result<Self> {
        let status = response.status().as_u16();
        let url = response.url().to_string();

        let mut headers: BTreeMap<String, String> = BTreeMap::new();
        for (name, value) in response.headers() {
            let name = name.as_str().to_ascii_lowercase();
            let value = String::from_utf8_lossy(value.as_bytes()).into_owned();
            headers
                .entry(name)
                .and_modify(|existing| {
                    existing.push_str(", ");
                    existing.push_str(&value);
                })
                .or_insert(value);
        }

        let content_type = headers
            .get("content-type")
            .map(String::as_str)
            .unwrap_or("")
            .to_string();

        let bytes = response
            .bytes()
            .await
            .map_err(|e| Error::network("http", &url, e.to_string()))?;

        let body = if bytes.is_empty() {
            ResponseBody::Empty
        } else if content_type.starts_with("application/json") {
            match serde_json::from_slice(&bytes) {
                Ok(value) => ResponseBody::Json(value),
                Err(_) => ResponseBody::Text(String::from_utf8_lossy(&bytes).into_owned()),
            }
        } else if content_type.starts_with("text/") {
            ResponseBody::Text(String::from_utf8_lossy(&bytes).into_owned())
        } else {
            ResponseBody::Bytes(bytes.to_vec())
        };

        Ok(Self::new(status, headers, body, url))
    }

    pub fn status(&self) -> u16 {
        self.status
    }

    pub fn is_success(&self) -> bool {
        (200..300).contains(&self.status)
    }

    pub fn headers(&self) -> &BTreeMap<String, String> {
        &self.headers
    }

    pub fn header(&self, name: impl AsRef<str>) -> Option<&str> {
        self.headers
            .get(&name.as_ref().to_ascii_lowercase())
            .map(String::as_str)
    }

    /// The server-assigned correlation id.
    pub fn request_id(&self) -> Option<&str> {
        self.header("x-ms-request-id")
    }

    /// The echoed client correlation id.
    pub fn client_request_id(&self) -> Option<&str> {
        self.header("x-ms-client-request-id")
    }

    pub fn body(&self) -> &ResponseBody {
        &self.body
    }

    pub fn url(&self) -> &str {
        &self.url
    }

    /// Deserialize a JSON body.
    pub fn json<T: serde::de::DeserializeOwned>(&self) -> Result<T> {
        match &self.body {
            ResponseBody::Json(value) => serde_json::from_value(value.clone())
                .map_err(|e| Error::Unknown(format!("response body mismatch: {e}"))),
            ResponseBody::Text(text) => serde_json::from_str(text)
                .map_err(|e| Error::Unknown(format!("response body mismatch: {e}"))),
            other => Err(Error::Unknown(format!(
                "expected a JSON body, got {other:?}"
            ))),
        }
    }

    /// The normalized error recorded by the error-handler policy, when the
    /// final status was 4xx/5xx and the policy runs in result mode.
    pub fn error(&self) -> Option<&HttpError> {
        self.error.as_ref()
    }

    /// Record a normalized error, replacing the raw body.
    pub(crate) fn set_error(&mut self, error: HttpError) {
        self.body = ResponseBody::Empty;
        self.error = Some(error);
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn response_with(headers: &[(&str, &str)], body: ResponseBody) -> Response {
        let headers = headers
            .iter()
            .map(|(k, v)| (k.to_string(), v.to_string()))
            .collect();
        Response::new(200, headers, body, "https://example.net/".into())
    }

    #[test]
    fn correlation_ids_are_exposed() {
        let response = response_with(
            &[
                ("x-ms-request-id", "req-9"),
                ("x-ms-client-request-id", "cli-1"),
            ],
            ResponseBody::Empty,
        );
        assert_eq!(response.request_id(), Some("req-9"));
        assert_eq!(response.client_request_id(), Some("cli-1"));
    }

    #[test]
    fn header_lookup_is_case_insensitive() {
        let response = response_with(&[("content-type", "application/json")], ResponseBody::Empty);
        assert_eq!(response.header("Content-Type"), Some("application/json"));
    }

    #[test]
    fn json_deserializes_typed_bodies() {
        #[derive(serde::Deserialize)]
        struct Payload {
            value: u32,
        }

        let response = response_with(&[], ResponseBody::Json(serde_json::json!({"value": 4})));
        let payload: Payload = response.json().unwrap();
        assert_eq!(payload.value, 4);
    }

    #[test]
    fn set_error_replaces_body() {
        let mut response = response_with(&[], ResponseBody::Text("raw".into()));
        response.set_error(HttpError {
            status: 400,
            error_code: Some("InvalidRequest".into()),
            message: "Bad".into(),
            request_id: None,
            url: None,
        });
        assert_eq!(response.body(), &ResponseBody::Empty);
        assert_eq!(
            response.error().unwrap().to_string(),
            "HTTP 400 [InvalidRequest]: Bad"
        );
    }
}
