//! The HTTP client: binds a base URL, default headers, timeouts, and an
//! ordered policy list around an injectable `reqwest` transport.

use bytes::Bytes;
use std::collections::BTreeMap;
use std::ops::ControlFlow;
use std::path::Path;
use std::sync::Arc;
use std::time::Duration;
use tokio::io::AsyncWriteExt;
use tokio::sync::mpsc;
use url::Url;
use uuid::Uuid;

use azure_base_core::error::{Error, Result};

use crate::policy::{self, Policy, RetryOptions};
use crate::request::{Body, Method, Request};
use crate::response::Response;

const DEFAULT_RECEIVE_TIMEOUT: Duration = Duration::from_secs(60);

const STREAM_CHANNEL_BUFFER: usize = 16;

/// The pipeline client.
#[derive(Debug, Clone)]
pub struct Client {
    http: reqwest::Client,
    base_url: Option<Url>,
    default_headers: BTreeMap<String, String>,
    policies: Vec<Arc<dyn Policy>>,
}

/// Builder for [`Client`].
#[derive(Default)]
pub struct ClientBuilder {
    base_url: Option<String>,
    receive_timeout: Option<Duration>,
    pool_idle_timeout: Option<Duration>,
    default_headers: BTreeMap<String, String>,
    policies: Vec<Arc<dyn Policy>>,
    http_client: Option<reqwest::Client>,
}

impl Client {
    pub fn builder() -> ClientBuilder {
        ClientBuilder::default()
    }

    /// Build a request against the bound base URL (or an absolute URL when
    /// no base is configured).
    pub fn new_request(&self, method: Method, path: &str) -> Result<Request> {
        let url = match &self.base_url {
            Some(base) => base
                .join(path)
                .map_err(|e| Error::invalid_value("path", format!("{path}: {e}")))?,
            None => Url::parse(path)
                .map_err(|e| Error::invalid_value("url", format!("{path}: {e}")))?,
        };
        Ok(Request::from_url(method, url))
    }

    /// Send a GET request to a path.
    pub async fn get(&self, path: &str) -> Result<Response> {
        self.request(self.new_request(Method::Get, path)?).await
    }

    /// Send a POST request with a JSON body to a path.
    pub async fn post_json<T: serde::Serialize>(&self, path: &str, body: &T) -> Result<Response> {
        let value = serde_json::to_value(body)
            .map_err(|e| Error::Unknown(format!("request serialization failed: {e}")))?;
        self.request(self.new_request(Method::Post, path)?.with_json(value))
            .await
    }

    /// Run a request through the pipeline.
    ///
    /// Request policies run in order, then the dispatch loop sends the
    /// request, retrying per any registered [`RetryOptions`]; response
    /// policies run on the final attempt's normalized response.
    pub async fn request(&self, mut request: Request) -> Result<Response> {
        self.prepare(&mut request).await?;

        let retry = request.options().get::<RetryOptions>().cloned();
        let mut attempt: u32 = 0;

        let mut response = loop {
            match self.send_once(&request).await {
                Ok(response) => {
                    if let Some(options) = retry.as_ref() {
                        if options.is_retryable_status(response.status())
                            && attempt < options.max_retries
                        {
                            let delay = retry_after_seconds(&response)
                                .map(Duration::from_secs)
                                .unwrap_or_else(|| options.backoff_delay(attempt));
                            tracing::debug!(
                                status = response.status(),
                                attempt,
                                delay_ms = delay.as_millis() as u64,
                                "retrying request"
                            );
                            tokio::time::sleep(delay).await;
                            attempt += 1;
                            continue;
                        }
                    }
                    break response;
                }
                Err(error) => {
                    let transient = matches!(error, Error::Network { .. });
                    if let (true, Some(options)) = (transient, retry.as_ref()) {
                        if attempt < options.max_retries {
                            let delay = options.backoff_delay(attempt);
                            tracing::debug!(
                                %error,
                                attempt,
                                delay_ms = delay.as_millis() as u64,
                                "retrying after transport error"
                            );
                            tokio::time::sleep(delay).await;
                            attempt += 1;
                            continue;
                        }
                    }
                    return Err(error);
                }
            }
        };

        for policy in &self.policies {
            policy.on_response(&request, &mut response).await?;
        }
        Ok(response)
    }

    /// Stream the response body into a file. The partial file is removed on
    /// any failure, so a file at `path` is always complete. Returns the
    /// byte count written.
    pub async fn download_to_file(
        &self,
        mut request: Request,
        path: impl AsRef<Path>,
    ) -> Result<u64> {
        let path = path.as_ref();
        let mut upstream = self.send_streaming(&mut request).await?;

        let mut file = tokio::fs::File::create(path)
            .await
            .map_err(|e| Error::Unknown(format!("cannot create {}: {e}", path.display())))?;

        let mut written: u64 = 0;
        loop {
            match upstream.chunk().await {
                Ok(Some(chunk)) => {
                    if let Err(e) = file.write_all(&chunk).await {
                        drop(file);
                        let _ = tokio::fs::remove_file(path).await;
                        return Err(Error::Unknown(format!(
                            "write to {} failed: {e}",
                            path.display()
                        )));
                    }
                    written += chunk.len() as u64;
                }
                Ok(None) => break,
                Err(e) => {
                    drop(file);
                    let _ = tokio::fs::remove_file(path).await;
                    return Err(Error::network("http", request.full_url(), e.to_string()));
                }
            }
        }

        file.flush()
            .await
            .map_err(|e| Error::Unknown(format!("flush of {} failed: {e}", path.display())))?;
        Ok(written)
    }

    /// Fold the response body through a reducer. Returning
    /// `ControlFlow::Break` halts the download and yields the final value.
    pub async fn request_reduce<A, F>(
        &self,
        mut request: Request,
        init: A,
        mut reduce: F,
    ) -> Result<A>
    where
        A: Send,
        F: FnMut(Bytes, A) -> ControlFlow<A, A> + Send,
    {
        let mut upstream = self.send_streaming(&mut request).await?;

        let mut acc = init;
        loop {
            let chunk = upstream
                .chunk()
                .await
                .map_err(|e| Error::network("http", request.full_url(), e.to_string()))?;
            match chunk {
                Some(data) => match reduce(data, acc) {
                    ControlFlow::Continue(next) => acc = next,
                    ControlFlow::Break(done) => return Ok(done),
                },
                None => return Ok(acc),
            }
        }
    }

    /// Stream the response body as channel events. Every event carries the
    /// stream's unique id; the final event is `Done` or `Error`.
    pub fn request_stream(&self, request: Request) -> StreamHandle {
        let id = Uuid::new_v4();
        let (tx, rx) = mpsc::channel(STREAM_CHANNEL_BUFFER);
        let client = self.clone();

        tokio::spawn(async move {
            let mut request = request;
            let mut upstream = match client.send_streaming(&mut request).await {
                Ok(upstream) => upstream,
                Err(error) => {
                    let _ = tx.send(StreamEvent::Error { id, error }).await;
                    return;
                }
            };

            loop {
                match upstream.chunk().await {
                    Ok(Some(data)) => {
                        // A dropped receiver ends the stream.
                        if tx.send(StreamEvent::Chunk { id, data }).await.is_err() {
                            return;
                        }
                    }
                    Ok(None) => {
                        let _ = tx.send(StreamEvent::Done { id }).await;
                        return;
                    }
                    Err(e) => {
                        let error =
                            Error::network("http", request.full_url(), e.to_string());
                        let _ = tx.send(StreamEvent::Error { id, error }).await;
                        return;
                    }
                }
            }
        });

        StreamHandle { id, events: rx }
    }

    /// Apply default headers and run the request-policy chain.
    async fn prepare(&self, request: &mut Request) -> Result<()> {
        for (name, value) in &self.default_headers {
            if request.header_value(name).is_none() {
                request.set_header(name, value.clone());
            }
        }
        for policy in &self.policies {
            policy.on_request(request).await?;
        }
        Ok(())
    }

    async fn send_once(&self, request: &Request) -> Result<Response> {
        let response = self.send_transport(request).await?;
        Response::from_reqwest(response).await
    }

    /// Prepare a request and send it, normalizing 4xx/5xx into an error
    /// before any body is streamed.
    async fn send_streaming(&self, request: &mut Request) -> Result<reqwest::Response> {
        self.prepare(request).await?;
        let response = self.send_transport(request).await?;
        if response.status().as_u16() >= 400 {
            let normalized = Response::from_reqwest(response).await?;
            return Err(policy::http_error_from_response(&normalized).into());
        }
        Ok(response)
    }

    async fn send_transport(&self, request: &Request) -> Result<reqwest::Response> {
        let url = request.full_url();

        let method = match request.method() {
            Method::Get => reqwest::Method::GET,
            Method::Post => reqwest::Method::POST,
            Method::Put => reqwest::Method::PUT,
            Method::Patch => reqwest::Method::PATCH,
            Method::Delete => reqwest::Method::DELETE,
            Method::Head => reqwest::Method::HEAD,
            Method::Options => reqwest::Method::OPTIONS,
        };

        let mut builder = self.http.request(method, url.clone());
        for (name, value) in request.headers() {
            builder = builder.header(name.as_str(), value.as_str());
        }
        builder = match request.body() {
            Body::Empty => builder,
            Body::Bytes(bytes) => builder.body(bytes.clone()),
            Body::Json(value) => builder.json(value),
            Body::Form(fields) => builder.form(fields),
        };

        builder
            .send()
            .await
            .map_err(|e| Error::network("http", url, e.to_string()))
    }
}

fn retry_after_seconds(response: &Response) -> Option<u64> {
    response.header("retry-after")?.trim().parse().ok()
}

/// A body stream delivered as channel events.
pub struct StreamHandle {
    /// The unique reference tagging every event of this stream.
    pub id: Uuid,
    pub events: mpsc::Receiver<StreamEvent>,
}

/// One event of a streamed response body.
#[derive(Debug)]
pub enum StreamEvent {
    Chunk { id: Uuid, data: Bytes },
    Done { id: Uuid },
    Error { id: Uuid, error: Error },
}

impl ClientBuilder {
    /// Bind a base URL; request paths are joined against it.
    pub fn base_url(mut self, base_url: impl Into<String>) -> Self {
        self.base_url = Some(base_url.into());
        self
    }

    /// Total receive timeout per attempt. Defaults to 60 seconds.
    pub fn receive_timeout(mut self, timeout: Duration) -> Self {
        self.receive_timeout = Some(timeout);
        self
    }

    /// Idle timeout for pooled connections.
    pub fn pool_timeout(mut self, timeout: Duration) -> Self {
        self.pool_idle_timeout = Some(timeout);
        self
    }

    /// A header applied to every request that does not already carry it.
    pub fn default_header(mut self, name: impl AsRef<str>, value: impl Into<String>) -> Self {
        self.default_headers
            .insert(name.as_ref().to_ascii_lowercase(), value.into());
        self
    }

    /// Append a policy. Policies run in insertion order.
    pub fn policy(mut self, policy: impl Policy + 'static) -> Self {
        self.policies.push(Arc::new(policy));
        self
    }

    /// Inject a transport. Tests point this at a local mock server client;
    /// builder timeouts are ignored in favor of the injected client's own.
    pub fn http_client(mut self, http_client: reqwest::Client) -> Self {
        self.http_client = Some(http_client);
        self
    }

    pub fn build(self) -> Result<Client> {
        let base_url = self
            .base_url
            .map(|raw| {
                Url::parse(&raw).map_err(|e| Error::invalid_value("base_url", format!("{raw}: {e}")))
            })
            .transpose()?;

        let http = match self.http_client {
            Some(http) => http,
            None => reqwest::Client::builder()
                .timeout(self.receive_timeout.unwrap_or(DEFAULT_RECEIVE_TIMEOUT))
                .pool_idle_timeout(self.pool_idle_timeout)
                .build()
                .map_err(|e| Error::Unknown(format!("transport construction failed: {e}")))?,
        };

        Ok(Client {
            http,
            base_url,
            default_headers: self.default_headers,
            policies: self.policies,
        })
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::policy::{
        AzureHeadersPolicy, BearerTokenPolicy, ErrorHandlerPolicy, RequestIdPolicy, RetryPolicy,
    };
    use crate::response::ResponseBody;
    use wiremock::matchers::{header, header_exists, method, path};
    use wiremock::{Mock, MockServer, ResponseTemplate};

    fn client_for(server: &MockServer) -> ClientBuilder {
        Client::builder().base_url(server.uri())
    }

    #[tokio::test]
    async fn policies_run_in_order_before_transmission() {
        let server = MockServer::start().await;

        Mock::given(method("GET"))
            .and(path("/op"))
            .and(header("authorization", "Bearer tok-1"))
            .and(header("x-ms-return-client-request-id", "true"))
            .and(header_exists("x-ms-client-request-id"))
            .and(header_exists("x-ms-date"))
            .respond_with(ResponseTemplate::new(200))
            .expect(1)
            .mount(&server)
            .await;

        let client = client_for(&server)
            .policy(BearerTokenPolicy::static_token("tok-1"))
            .policy(AzureHeadersPolicy::new())
            .policy(RequestIdPolicy::new())
            .build()
            .unwrap();

        let response = client.get("/op").await.unwrap();
        assert!(response.is_success());
    }

    #[tokio::test]
    async fn default_headers_do_not_override_request_headers() {
        let server = MockServer::start().await;

        Mock::given(method("GET"))
            .and(header("accept", "application/xml"))
            .respond_with(ResponseTemplate::new(200))
            .expect(1)
            .mount(&server)
            .await;

        let client = client_for(&server)
            .default_header("Accept", "application/json")
            .build()
            .unwrap();

        let request = client
            .new_request(Method::Get, "/op")
            .unwrap()
            .header("accept", "application/xml");
        client.request(request).await.unwrap();
    }

    #[tokio::test]
    async fn retry_policy_drives_the_dispatch_loop() {
        let server = MockServer::start().await;

        Mock::given(method("GET"))
            .respond_with(
                ResponseTemplate::new(503).insert_header("Retry-After", "0"),
            )
            .up_to_n_times(2)
            .expect(2)
            .mount(&server)
            .await;
        Mock::given(method("GET"))
            .respond_with(ResponseTemplate::new(200).set_body_json(serde_json::json!({"ok": true})))
            .expect(1)
            .mount(&server)
            .await;

        let client = client_for(&server)
            .policy(RetryPolicy::new().base_delay(Duration::from_millis(5)))
            .build()
            .unwrap();

        let response = client.get("/flaky").await.unwrap();
        assert_eq!(response.status(), 200);
        server.verify().await;
    }

    #[tokio::test]
    async fn retries_stop_at_the_budget() {
        let server = MockServer::start().await;

        Mock::given(method("GET"))
            .respond_with(ResponseTemplate::new(500))
            .expect(3)
            .mount(&server)
            .await;

        let client = client_for(&server)
            .policy(
                RetryPolicy::new()
                    .max_retries(2)
                    .base_delay(Duration::from_millis(5)),
            )
            .build()
            .unwrap();

        let response = client.get("/down").await.unwrap();
        assert_eq!(response.status(), 500);
        server.verify().await;
    }

    #[tokio::test]
    async fn non_retryable_statuses_are_not_retried() {
        let server = MockServer::start().await;

        Mock::given(method("GET"))
            .respond_with(ResponseTemplate::new(404))
            .expect(1)
            .mount(&server)
            .await;

        let client = client_for(&server)
            .policy(RetryPolicy::new().base_delay(Duration::from_millis(5)))
            .build()
            .unwrap();

        let response = client.get("/missing").await.unwrap();
        assert_eq!(response.status(), 404);
    }

    #[tokio::test]
    async fn transport_errors_surface_as_network_errors() {
        let client = Client::builder()
            .base_url("http://127.0.0.1:9")
            .build()
            .unwrap();

        let err = client.get("/x").await.unwrap_err();
        assert!(matches!(err, Error::Network { .. }));
    }

    #[tokio::test]
    async fn error_handler_raising_mode_normalizes_failures() {
        let server = MockServer::start().await;

        Mock::given(method("GET"))
            .respond_with(
                ResponseTemplate::new(400)
                    .insert_header("x-ms-request-id", "req-9")
                    .set_body_json(serde_json::json!({
                        "error": {"code": "InvalidRequest", "message": "Bad"}
                    })),
            )
            .mount(&server)
            .await;

        let client = client_for(&server)
            .policy(ErrorHandlerPolicy::raising())
            .build()
            .unwrap();

        let err = client.get("/bad").await.unwrap_err();
        assert_eq!(err.to_string(), "HTTP 400 [InvalidRequest]: Bad");
        match err {
            Error::Http(http) => {
                assert_eq!(http.status, 400);
                assert_eq!(http.request_id.as_deref(), Some("req-9"));
            }
            other => panic!("expected Http error, got {other:?}"),
        }
    }

    #[tokio::test]
    async fn error_handler_result_mode_rides_on_the_response() {
        let server = MockServer::start().await;

        Mock::given(method("GET"))
            .respond_with(ResponseTemplate::new(429))
            .mount(&server)
            .await;

        let client = client_for(&server)
            .policy(ErrorHandlerPolicy::new())
            .build()
            .unwrap();

        let response = client.get("/throttled").await.unwrap();
        assert_eq!(response.status(), 429);
        let error = response.error().unwrap();
        assert_eq!(error.message, "Too Many Requests");
    }

    #[tokio::test]
    async fn correlation_ids_are_normalized_onto_the_response() {
        let server = MockServer::start().await;

        Mock::given(method("GET"))
            .respond_with(
                ResponseTemplate::new(200)
                    .insert_header("x-ms-request-id", "srv-1")
                    .insert_header("x-ms-client-request-id", "cli-1"),
            )
            .mount(&server)
            .await;

        let client = client_for(&server).build().unwrap();
        let response = client.get("/op").await.unwrap();
        assert_eq!(response.request_id(), Some("srv-1"));
        assert_eq!(response.client_request_id(), Some("cli-1"));
    }

    #[tokio::test]
    async fn json_bodies_parse_by_content_type() {
        let server = MockServer::start().await;

        Mock::given(method("GET"))
            .respond_with(
                ResponseTemplate::new(200).set_body_json(serde_json::json!({"value": 3})),
            )
            .mount(&server)
            .await;

        let client = client_for(&server).build().unwrap();
        let response = client.get("/op").await.unwrap();
        assert_eq!(
            response.body(),
            &ResponseBody::Json(serde_json::json!({"value": 3}))
        );
    }

    #[tokio::test]
    async fn download_to_file_writes_complete_bodies() {
        let server = MockServer::start().await;
        let payload = vec![7u8; 64 * 1024];

        Mock::given(method("GET"))
            .respond_with(ResponseTemplate::new(200).set_body_bytes(payload.clone()))
            .mount(&server)
            .await;

        let client = client_for(&server).build().unwrap();
        let dir = tempfile::tempdir().unwrap();
        let target = dir.path().join("blob.bin");

        let request = client.new_request(Method::Get, "/blob").unwrap();
        let written = client.download_to_file(request, &target).await.unwrap();

        assert_eq!(written, payload.len() as u64);
        assert_eq!(std::fs::read(&target).unwrap(), payload);
    }

    #[tokio::test]
    async fn download_to_file_removes_nothing_on_http_error() {
        let server = MockServer::start().await;

        Mock::given(method("GET"))
            .respond_with(ResponseTemplate::new(404))
            .mount(&server)
            .await;

        let client = client_for(&server).build().unwrap();
        let dir = tempfile::tempdir().unwrap();
        let target = dir.path().join("missing.bin");

        let request = client.new_request(Method::Get, "/blob").unwrap();
        let err = client.download_to_file(request, &target).await.unwrap_err();

        assert!(matches!(err, Error::Http(_)));
        assert!(!target.exists());
    }

    #[tokio::test]
    async fn request_reduce_folds_chunks() {
        let server = MockServer::start().await;

        Mock::given(method("GET"))
            .respond_with(ResponseTemplate::new(200).set_body_string("hello world"))
            .mount(&server)
            .await;

        let client = client_for(&server).build().unwrap();
        let request = client.new_request(Method::Get, "/text").unwrap();

        let total = client
            .request_reduce(request, 0usize, |chunk, acc| {
                ControlFlow::Continue(acc + chunk.len())
            })
            .await
            .unwrap();
        assert_eq!(total, 11);
    }

    #[tokio::test]
    async fn request_reduce_halts_on_break() {
        let server = MockServer::start().await;

        Mock::given(method("GET"))
            .respond_with(ResponseTemplate::new(200).set_body_string("hello world"))
            .mount(&server)
            .await;

        let client = client_for(&server).build().unwrap();
        let request = client.new_request(Method::Get, "/text").unwrap();

        let halted = client
            .request_reduce(request, 0usize, |chunk, _| ControlFlow::Break(chunk.len()))
            .await
            .unwrap();
        assert_eq!(halted, 11);
    }

    #[tokio::test]
    async fn request_stream_delivers_tagged_events() {
        let server = MockServer::start().await;

        Mock::given(method("GET"))
            .respond_with(ResponseTemplate::new(200).set_body_string("streamed"))
            .mount(&server)
            .await;

        let client = client_for(&server).build().unwrap();
        let request = client.new_request(Method::Get, "/stream").unwrap();

        let mut handle = client.request_stream(request);
        let stream_id = handle.id;
        let mut collected = Vec::new();
        let mut done = false;

        while let Some(event) = handle.events.recv().await {
            match event {
                StreamEvent::Chunk { id, data } => {
                    assert_eq!(id, stream_id);
                    collected.extend_from_slice(&data);
                }
                StreamEvent::Done { id } => {
                    assert_eq!(id, stream_id);
                    done = true;
                }
                StreamEvent::Error { error, .. } => panic!("unexpected stream error: {error}"),
            }
        }

        assert!(done);
        assert_eq!(collected, b"streamed");
    }

    #[tokio::test]
    async fn request_stream_reports_http_errors_as_events() {
        let server = MockServer::start().await;

        Mock::given(method("GET"))
            .respond_with(ResponseTemplate::new(500))
            .mount(&server)
            .await;

        let client = client_for(&server).build().unwrap();
        let request = client.new_request(Method::Get, "/stream").unwrap();

        let mut handle = client.request_stream(request);
        match handle.events.recv().await {
            Some(StreamEvent::Error { id, error }) => {
                assert_eq!(id, handle.id);
                assert!(matches!(error, Error::Http(_)));
            }
            other => panic!("expected an error event, got {other:?}"),
        }
    }
}
