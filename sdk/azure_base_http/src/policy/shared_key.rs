//! Azure Storage Shared Key authorization.
//!
//! Builds the canonical string-to-sign from the request, signs it with
//! HMAC-SHA256 under the base64-decoded account key, and adds
//! `Authorization: SharedKey <account>:<signature>`.
//!
//! Reference: <https://docs.microsoft.com/en-us/rest/api/storageservices/authorize-with-shared-key>

use async_trait::async_trait;
use base64::engine::general_purpose::STANDARD as BASE64;
use base64::Engine;
use hmac::{Hmac, Mac};
use sha2::Sha256;
use std::collections::BTreeMap;
use url::Url;

use azure_base_core::credentials::NamedKeyCredential;
use azure_base_core::error::{CredentialErrorKind, Error, Result};

use super::Policy;
use crate::request::Request;

/// The standard headers that participate in the string-to-sign, in wire
/// order after the verb.
const STANDARD_HEADERS: [&str; 11] = [
    "content-encoding",
    "content-language",
    "content-length",
    "content-md5",
    "content-type",
    "date",
    "if-modified-since",
    "if-match",
    "if-none-match",
    "if-unmodified-since",
    "range",
];

/// Signs each request with the account's Shared Key.
#[derive(Debug)]
pub struct SharedKeyPolicy {
    credential: NamedKeyCredential,
}

impl SharedKeyPolicy {
    pub fn new(account_name: impl Into<String>, account_key: impl Into<String>) -> Result<Self> {
        Ok(Self {
            credential: NamedKeyCredential::new(account_name, account_key)?,
        })
    }

    pub fn from_credential(credential: NamedKeyCredential) -> Self {
        Self { credential }
    }
}

#[async_trait]
impl Policy for SharedKeyPolicy {
    async fn on_request(&self, request: &mut Request) -> Result<()> {
        let string_to_sign = string_to_sign(request, self.credential.name());
        let signature = sign(&self.credential.key_bytes(), &string_to_sign)?;
        request.set_header(
            "authorization",
            format!("SharedKey {}:{signature}", self.credential.name()),
        );
        Ok(())
    }
}

fn sign(key: &[u8], string_to_sign: &str) -> Result<String> {
    let mut mac = Hmac::<Sha256>::new_from_slice(key)
        .map_err(|_| Error::credential(CredentialErrorKind::InvalidNamedKey))?;
    mac.update(string_to_sign.as_bytes());
    Ok(BASE64.encode(mac.finalize().into_bytes()))
}

/// The canonical string: verb, the standard headers in fixed order, the
/// canonicalized `x-ms-*` headers, and the canonicalized resource.
fn string_to_sign(request: &Request, account: &str) -> String {
    let mut lines = Vec::with_capacity(STANDARD_HEADERS.len() + 1);
    lines.push(request.method().as_str().to_string());
    for header in STANDARD_HEADERS {
        let value = match header {
            "content-length" => content_length_value(request),
            _ => request.header_value(header).unwrap_or("").to_string(),
        };
        lines.push(value);
    }

    format!(
        "{}\n{}{}",
        lines.join("\n"),
        canonicalized_headers(request),
        canonicalized_resource(account, &request.full_url())
    )
}

/// `Content-Length` is the empty string for a bodiless request, otherwise
/// the byte length in decimal; an explicit header always wins.
fn content_length_value(request: &Request) -> String {
    if let Some(explicit) = request.header_value("content-length") {
        return explicit.to_string();
    }
    request
        .body()
        .content_length()
        .map(|len| len.to_string())
        .unwrap_or_default()
}

/// All `x-ms-*` headers, sorted by name, one `name:trimmed-value` line each.
fn canonicalized_headers(request: &Request) -> String {
    // Request headers are already lowercased and BTreeMap-sorted.
    let mut result = String::new();
    for (name, value) in request.headers() {
        if !name.starts_with("x-ms-") {
            continue;
        }
        result.push_str(name);
        result.push(':');
        result.push_str(value.trim());
        result.push('\n');
    }
    result
}

/// `/<account><path>` followed by sorted lowercased `param:value` lines for
/// any query parameters. Repeated parameters contribute sorted
/// comma-joined values.
fn canonicalized_resource(account: &str, url: &Url) -> String {
    let mut resource = String::new();
    resource.push('/');
    resource.push_str(account);
    resource.push_str(url.path());

    let mut params: BTreeMap<String, Vec<String>> = BTreeMap::new();
    for (name, value) in url.query_pairs() {
        params
            .entry(name.to_lowercase())
            .or_default()
            .push(value.into_owned());
    }

    for (name, mut values) in params {
        values.sort_unstable();
        resource.push('\n');
        resource.push_str(&name);
        resource.push(':');
        resource.push_str(&values.join(","));
    }

    resource
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::request::{Body, Method, Request};

    const TEST_KEY_BYTES: &[u8] = b"0123456789abcdef";

    fn test_key() -> String {
        BASE64.encode(TEST_KEY_BYTES)
    }

    fn metadata_request() -> Request {
        Request::new(
            Method::Put,
            "https://account.blob.core.windows.net/account/container/blob?comp=metadata&x=1",
        )
        .unwrap()
        .header("x-ms-date", "Wed, 01 Jan 2020 00:00:00 GMT")
        .header("x-ms-version", "2020-04-08")
        .header("content-length", "11")
    }

    #[test]
    fn canonical_string_matches_the_documented_shape() {
        let request = metadata_request();
        let canonical = string_to_sign(&request, "account");

        let expected = "PUT\n\n\n11\n\n\n\n\n\n\n\n\n\
            x-ms-date:Wed, 01 Jan 2020 00:00:00 GMT\n\
            x-ms-version:2020-04-08\n\
            /account/account/container/blob\n\
            comp:metadata\n\
            x:1";
        assert_eq!(canonical, expected);
    }

    #[test]
    fn header_order_does_not_change_the_signature() {
        // Same headers, inserted in the opposite order.
        let forward = metadata_request();
        let backward = Request::new(
            Method::Put,
            "https://account.blob.core.windows.net/account/container/blob?comp=metadata&x=1",
        )
        .unwrap()
        .header("x-ms-version", "2020-04-08")
        .header("x-ms-date", "Wed, 01 Jan 2020 00:00:00 GMT")
        .header("content-length", "11");

        assert_eq!(
            string_to_sign(&forward, "account"),
            string_to_sign(&backward, "account")
        );
    }

    #[test]
    fn signature_is_hmac_sha256_of_the_canonical_string() {
        let request = metadata_request();
        let canonical = string_to_sign(&request, "account");
        let signature = sign(TEST_KEY_BYTES, &canonical).unwrap();

        let mut mac = Hmac::<Sha256>::new_from_slice(TEST_KEY_BYTES).unwrap();
        mac.update(canonical.as_bytes());
        assert_eq!(signature, BASE64.encode(mac.finalize().into_bytes()));
    }

    #[tokio::test]
    async fn authorization_header_carries_account_and_signature() {
        let policy = SharedKeyPolicy::new("account", test_key()).unwrap();
        let mut request = metadata_request();

        policy.on_request(&mut request).await.unwrap();

        let auth = request.header_value("authorization").unwrap();
        let expected_sig = sign(
            TEST_KEY_BYTES,
            &string_to_sign(&metadata_request(), "account"),
        )
        .unwrap();
        assert_eq!(auth, format!("SharedKey account:{expected_sig}"));
    }

    #[test]
    fn content_length_prefers_the_explicit_header() {
        let request = Request::put("https://a.net/x")
            .unwrap()
            .header("content-length", "99")
            .with_body(Body::Bytes(b"hi".to_vec()));
        assert_eq!(content_length_value(&request), "99");
    }

    #[test]
    fn content_length_from_body_or_empty() {
        let with_body = Request::put("https://a.net/x")
            .unwrap()
            .with_body(Body::Bytes(b"hello world".to_vec()));
        assert_eq!(content_length_value(&with_body), "11");

        let bodiless = Request::get("https://a.net/x").unwrap();
        assert_eq!(content_length_value(&bodiless), "");
    }

    #[test]
    fn resource_path_defaults_to_root() {
        let url = Url::parse("https://account.blob.core.windows.net").unwrap();
        assert_eq!(canonicalized_resource("account", &url), "/account/");
    }

    #[test]
    fn repeated_query_params_are_comma_joined_sorted() {
        let url = Url::parse("https://a.net/p?tag=b&tag=a&comp=list").unwrap();
        assert_eq!(
            canonicalized_resource("acct", &url),
            "/acct/p\ncomp:list\ntag:a,b"
        );
    }

    #[test]
    fn invalid_account_key_fails_construction() {
        assert!(SharedKeyPolicy::new("account", "!!not-base64!!").is_err());
    }
}
