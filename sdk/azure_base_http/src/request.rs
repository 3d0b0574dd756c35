//! The outbound request model consumed by the policy pipeline.

use std::any::{Any, TypeId};
use std::collections::{BTreeMap, HashMap};
use url::Url;

use azure_base_core::error::{Error, Result};

/// HTTP methods the pipeline supports.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Method {
    Get,
    Post,
    Put,
    Patch,
    Delete,
    Head,
    Options,
}

impl Method {
    pub fn as_str(&self) -> &'static str {
        match self {
            Self::Get => "GET",
            Self::Post => "POST",
            Self::Put => "PUT",
            Self::Patch => "PATCH",
            Self::Delete => "DELETE",
            Self::Head => "HEAD",
            Self::Options => "OPTIONS",
        }
    }
}

/// A request body.
#[derive(Debug, Clone, Default, PartialEq)]
pub enum Body {
    #[default]
    Empty,
    Bytes(Vec<u8>),
    Json(serde_json::Value),
    Form(BTreeMap<String, String>),
}

impl Body {
    /// The serialized byte length, or `None` for an empty body.
    pub fn content_length(&self) -> Option<u64> {
        match self {
            Self::Empty => None,
            Self::Bytes(bytes) => Some(bytes.len() as u64),
            Self::Json(value) => Some(value.to_string().len() as u64),
            Self::Form(fields) => {
                let mut serializer = url::form_urlencoded::Serializer::new(String::new());
                for (key, value) in fields {
                    serializer.append_pair(key, value);
                }
                Some(serializer.finish().len() as u64)
            }
        }
    }
}

/// A typed per-request option bag. Policies register configuration and
/// record failures here; the dispatch loop and later policies read it back.
#[derive(Default)]
pub struct Options {
    entries: HashMap<TypeId, Box<dyn Any + Send + Sync>>,
}

impl Options {
    pub fn insert<T: Any + Send + Sync>(&mut self, value: T) {
        self.entries.insert(TypeId::of::<T>(), Box::new(value));
    }

    pub fn get<T: Any + Send + Sync>(&self) -> Option<&T> {
        self.entries
            .get(&TypeId::of::<T>())
            .and_then(|boxed| boxed.downcast_ref())
    }

    pub fn remove<T: Any + Send + Sync>(&mut self) -> Option<T> {
        self.entries
            .remove(&TypeId::of::<T>())
            .and_then(|boxed| boxed.downcast().ok())
            .map(|boxed| *boxed)
    }

    pub fn contains<T: Any + Send + Sync>(&self) -> bool {
        self.entries.contains_key(&TypeId::of::<T>())
    }
}

impl std::fmt::Debug for Options {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("Options")
            .field("len", &self.entries.len())
            .finish()
    }
}

/// An outbound request.
///
/// Header names are stored lowercased; headers added by one policy are
/// visible to every later policy in the chain.
#[derive(Debug)]
pub struct Request {
    method: Method,
    url: Url,
    headers: BTreeMap<String, String>,
    query: Vec<(String, String)>,
    body: Body,
    options: Options,
}

impl Request {
    pub fn new(method: Method, url: impl AsRef<str>) -> Result<Self> {
        let url = Url::parse(url.as_ref())
            .map_err(|e| Error::invalid_value("url", format!("{}: {e}", url.as_ref())))?;
        Ok(Self {
            method,
            url,
            headers: BTreeMap::new(),
            query: Vec::new(),
            body: Body::Empty,
            options: Options::default(),
        })
    }

    pub fn get(url: impl AsRef<str>) -> Result<Self> {
        Self::new(Method::Get, url)
    }

    pub fn post(url: impl AsRef<str>) -> Result<Self> {
        Self::new(Method::Post, url)
    }

    pub fn put(url: impl AsRef<str>) -> Result<Self> {
        Self::new(Method::Put, url)
    }

    pub fn delete(url: impl AsRef<str>) -> Result<Self> {
        Self::new(Method::Delete, url)
    }

    pub(crate) fn from_url(method: Method, url: Url) -> Self {
        Self {
            method,
            url,
            headers: BTreeMap::new(),
            query: Vec::new(),
            body: Body::Empty,
            options: Options::default(),
        }
    }

    pub fn method(&self) -> Method {
        self.method
    }

    pub fn url(&self) -> &Url {
        &self.url
    }

    /// Set a header; the name is lowercased. Builder-style.
    pub fn header(mut self, name: impl AsRef<str>, value: impl Into<String>) -> Self {
        self.set_header(name, value);
        self
    }

    /// Set a header in place; the name is lowercased.
    pub fn set_header(&mut self, name: impl AsRef<str>, value: impl Into<String>) {
        self.headers
            .insert(name.as_ref().to_ascii_lowercase(), value.into());
    }

    /// Look up a header by case-insensitive name.
    pub fn header_value(&self, name: impl AsRef<str>) -> Option<&str> {
        self.headers
            .get(&name.as_ref().to_ascii_lowercase())
            .map(String::as_str)
    }

    pub fn headers(&self) -> &BTreeMap<String, String> {
        &self.headers
    }

    /// Add a query parameter. Builder-style.
    pub fn query(mut self, key: impl Into<String>, value: impl Into<String>) -> Self {
        self.add_query(key, value);
        self
    }

    pub fn add_query(&mut self, key: impl Into<String>, value: impl Into<String>) {
        self.query.push((key.into(), value.into()));
    }

    /// Append a pre-encoded fragment to the URL's query string, joining with
    /// `&` when a query already exists.
    pub fn append_raw_query(&mut self, raw: &str) {
        let merged = match self.url.query() {
            Some(existing) if !existing.is_empty() => format!("{existing}&{raw}"),
            _ => raw.to_string(),
        };
        self.url.set_query(Some(&merged));
    }

    pub fn body(&self) -> &Body {
        &self.body
    }

    pub fn with_body(mut self, body: Body) -> Self {
        self.body = body;
        self
    }

    pub fn with_json(self, value: serde_json::Value) -> Self {
        self.with_body(Body::Json(value))
    }

    pub fn options(&self) -> &Options {
        &self.options
    }

    pub fn options_mut(&mut self) -> &mut Options {
        &mut self.options
    }

    /// The URL with structured query parameters merged in. This is what the
    /// transport sends and what canonicalization signs.
    pub fn full_url(&self) -> Url {
        let mut url = self.url.clone();
        if !self.query.is_empty() {
            let mut pairs = url.query_pairs_mut();
            for (key, value) in &self.query {
                pairs.append_pair(key, value);
            }
        }
        url
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn header_names_are_lowercased() {
        let request = Request::get("https://example.net/x")
            .unwrap()
            .header("X-MS-Version", "2020-04-08");
        assert_eq!(request.header_value("x-ms-version"), Some("2020-04-08"));
        assert_eq!(request.header_value("X-Ms-Version"), Some("2020-04-08"));
        assert!(request.headers().contains_key("x-ms-version"));
    }

    #[test]
    fn later_header_overwrites_earlier() {
        let request = Request::get("https://example.net/")
            .unwrap()
            .header("accept", "a")
            .header("Accept", "b");
        assert_eq!(request.header_value("accept"), Some("b"));
    }

    #[test]
    fn invalid_url_is_configuration_error() {
        assert!(matches!(
            Request::get("not a url"),
            Err(Error::Configuration { .. })
        ));
    }

    #[test]
    fn full_url_merges_structured_query() {
        let request = Request::get("https://example.net/path?a=1")
            .unwrap()
            .query("b", "2");
        assert_eq!(request.full_url().query(), Some("a=1&b=2"));
    }

    #[test]
    fn append_raw_query_joins_with_ampersand() {
        let mut request = Request::get("https://example.net/path?a=1").unwrap();
        request.append_raw_query("sig=abc&sv=2020");
        assert_eq!(request.url().query(), Some("a=1&sig=abc&sv=2020"));

        let mut bare = Request::get("https://example.net/path").unwrap();
        bare.append_raw_query("sig=abc");
        assert_eq!(bare.url().query(), Some("sig=abc"));
    }

    #[test]
    fn body_content_length() {
        assert_eq!(Body::Empty.content_length(), None);
        assert_eq!(Body::Bytes(b"hello".to_vec()).content_length(), Some(5));
        assert_eq!(
            Body::Json(serde_json::json!({"a": 1})).content_length(),
            Some(7)
        );
    }

    #[test]
    fn options_bag_is_typed() {
        #[derive(Debug, PartialEq)]
        struct Marker(u32);

        let mut options = Options::default();
        assert!(options.get::<Marker>().is_none());
        options.insert(Marker(7));
        assert_eq!(options.get::<Marker>(), Some(&Marker(7)));
        assert_eq!(options.remove::<Marker>(), Some(Marker(7)));
        assert!(!options.contains::<Marker>());
    }
}
