//! Long-lived credential agents.
//!
//! One agent owns each named credential: it holds the token-source
//! configuration, keeps the registry entry current, refreshes the token
//! ahead of expiry, and retries failed refreshes with capped backoff. All
//! state transitions happen inside the agent task's message/timer loop, so
//! callers never observe torn state.

use std::sync::Arc;
use std::time::Duration;
use tokio::sync::{mpsc, oneshot};
use tokio::time::Instant;
use tokio_util::sync::CancellationToken;

use azure_base_core::error::{Error, Result, TokenServerErrorKind};
use azure_base_core::token::{unix_now, AccessTokenRecord};

use crate::registry::CredentialRegistry;
use crate::sources::TokenSource;

/// Backoff floor applied after the retry budget is exhausted.
const EXHAUSTED_RETRY_DELAY: Duration = Duration::from_secs(30);

const MESSAGE_BUFFER: usize = 32;

/// Whether agent startup blocks on the first acquisition.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub enum Prefetch {
    /// `start` performs one acquisition before returning. A failure does
    /// not prevent startup; it schedules an immediate refresh instead.
    #[default]
    Sync,
    /// `start` returns immediately and queues the first acquisition.
    Async,
}

impl Prefetch {
    /// Parse a prefetch mode from configuration data.
    pub fn parse(value: &str) -> Result<Self> {
        match value {
            "sync" => Ok(Self::Sync),
            "async" => Ok(Self::Async),
            other => Err(Error::invalid_option("prefetch", other)),
        }
    }
}

/// Computes the delay before retry `attempt` (zero-based).
pub type RetryDelayFn = Arc<dyn Fn(u32) -> Duration + Send + Sync>;

fn default_retry_delay(attempt: u32) -> Duration {
    Duration::from_secs((1u64 << attempt.min(5)).min(30))
}

/// Configuration for one credential agent.
#[derive(Clone)]
pub struct CredentialAgentConfig {
    name: String,
    source: TokenSource,
    refresh_before: Duration,
    max_retries: u32,
    retry_delay: RetryDelayFn,
    prefetch: Prefetch,
    http_client: reqwest::Client,
}

impl std::fmt::Debug for CredentialAgentConfig {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("CredentialAgentConfig")
            .field("name", &self.name)
            .field("source", &self.source.kind())
            .field("refresh_before", &self.refresh_before)
            .field("max_retries", &self.max_retries)
            .field("prefetch", &self.prefetch)
            .finish()
    }
}

/// Builder for [`CredentialAgentConfig`].
#[derive(Default)]
pub struct CredentialAgentConfigBuilder {
    name: Option<String>,
    source: Option<TokenSource>,
    refresh_before: Option<Duration>,
    max_retries: Option<u32>,
    retry_delay: Option<RetryDelayFn>,
    prefetch: Prefetch,
    http_client: Option<reqwest::Client>,
}

impl CredentialAgentConfig {
    pub fn builder() -> CredentialAgentConfigBuilder {
        CredentialAgentConfigBuilder::default()
    }
}

impl CredentialAgentConfigBuilder {
    /// **Required.** Unique credential name.
    pub fn name(mut self, name: impl Into<String>) -> Self {
        self.name = Some(name.into());
        self
    }

    /// **Required.** The token-source configuration this agent owns.
    pub fn source(mut self, source: TokenSource) -> Self {
        self.source = Some(source);
        self
    }

    /// How long before expiry the proactive refresh fires. Default 300 s.
    pub fn refresh_before(mut self, refresh_before: Duration) -> Self {
        self.refresh_before = Some(refresh_before);
        self
    }

    /// Consecutive refresh failures before the 30 s backoff floor kicks in.
    /// Default 10.
    pub fn max_retries(mut self, max_retries: u32) -> Self {
        self.max_retries = Some(max_retries);
        self
    }

    /// Delay before retry `attempt`. Default `min(30, 2^attempt)` seconds.
    pub fn retry_delay(mut self, retry_delay: impl Fn(u32) -> Duration + Send + Sync + 'static) -> Self {
        self.retry_delay = Some(Arc::new(retry_delay));
        self
    }

    pub fn prefetch(mut self, prefetch: Prefetch) -> Self {
        self.prefetch = prefetch;
        self
    }

    /// The transport used for acquisitions. Defaults to a fresh client.
    pub fn http_client(mut self, http_client: reqwest::Client) -> Self {
        self.http_client = Some(http_client);
        self
    }

    pub fn build(self) -> Result<CredentialAgentConfig> {
        let name = match self.name {
            Some(name) if !name.is_empty() => name,
            _ => return Err(Error::missing_required("name")),
        };
        let source = self.source.ok_or_else(|| Error::missing_required("source"))?;

        Ok(CredentialAgentConfig {
            name,
            source,
            refresh_before: self.refresh_before.unwrap_or(Duration::from_secs(300)),
            max_retries: self.max_retries.unwrap_or(10),
            retry_delay: self
                .retry_delay
                .unwrap_or_else(|| Arc::new(default_retry_delay)),
            prefetch: self.prefetch,
            http_client: self.http_client.unwrap_or_default(),
        })
    }
}

enum AgentMessage {
    Acquire {
        reply: oneshot::Sender<Result<AccessTokenRecord>>,
    },
}

/// A handle to a running credential agent.
#[derive(Clone)]
pub struct AgentHandle {
    name: String,
    tx: mpsc::Sender<AgentMessage>,
    cancel: CancellationToken,
}

impl std::fmt::Debug for AgentHandle {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("AgentHandle").field("name", &self.name).finish()
    }
}

impl AgentHandle {
    pub fn name(&self) -> &str {
        &self.name
    }

    /// Stop the agent. Pending refresh timers are dropped and the registry
    /// entry is removed once the task exits.
    pub fn shutdown(&self) {
        self.cancel.cancel();
    }

    /// Ask the agent for a token, acquiring one if the registry is empty.
    ///
    /// The acquisition runs inside the agent task: a caller that gives up
    /// waiting does not cancel it, and later waiters observe the published
    /// token.
    pub(crate) async fn acquire(&self) -> Result<AccessTokenRecord> {
        let (reply_tx, reply_rx) = oneshot::channel();
        self.tx
            .send(AgentMessage::Acquire { reply: reply_tx })
            .await
            .map_err(|_| self.not_running())?;
        reply_rx.await.map_err(|_| self.not_running())?
    }

    fn not_running(&self) -> Error {
        Error::token_server(
            TokenServerErrorKind::FetchFailed,
            &self.name,
            "credential agent is not running",
        )
    }
}

/// Starts credential agents. The caller (a process supervisor, typically)
/// owns the returned handle and shuts the agent down when done.
pub struct CredentialAgent;

impl CredentialAgent {
    /// Register and start an agent.
    ///
    /// With `Prefetch::Sync` this performs the first acquisition before
    /// returning; an acquisition failure is logged and retried in the
    /// background rather than failing startup.
    pub async fn start(
        config: CredentialAgentConfig,
        registry: &CredentialRegistry,
    ) -> Result<AgentHandle> {
        let (tx, rx) = mpsc::channel(MESSAGE_BUFFER);
        let cancel = CancellationToken::new();
        let handle = AgentHandle {
            name: config.name.clone(),
            tx,
            cancel: cancel.clone(),
        };

        registry.register(&config.name, handle.clone()).await?;

        let state = AgentState {
            name: config.name,
            source: config.source,
            refresh_before: config.refresh_before,
            max_retries: config.max_retries,
            retry_delay: config.retry_delay,
            retry_count: 0,
            http: config.http_client,
            registry: registry.clone(),
        };

        let first_refresh = match config.prefetch {
            Prefetch::Sync => match state.source.fetch(&state.http).await {
                Ok(token) => {
                    let deadline = state.refresh_deadline(&token);
                    state.registry.store_token(&state.name, token).await;
                    deadline
                }
                Err(error) => {
                    tracing::warn!(
                        credential = %state.name,
                        %error,
                        "initial token acquisition failed; scheduling immediate refresh"
                    );
                    Instant::now()
                }
            },
            Prefetch::Async => Instant::now(),
        };

        tokio::spawn(run_agent(state, rx, cancel, first_refresh));
        Ok(handle)
    }
}

struct AgentState {
    name: String,
    source: TokenSource,
    refresh_before: Duration,
    max_retries: u32,
    retry_delay: RetryDelayFn,
    retry_count: u32,
    http: reqwest::Client,
    registry: CredentialRegistry,
}

impl AgentState {
    /// When the proactive refresh for `token` should fire. Bounded so a
    /// nonsense server expiry cannot overflow the timer arithmetic.
    fn refresh_deadline(&self, token: &AccessTokenRecord) -> Instant {
        const MAX_REFRESH_SECS: u64 = 60 * 60 * 24 * 365;
        let secs = token
            .expires_at()
            .saturating_sub(unix_now())
            .saturating_sub(self.refresh_before.as_secs())
            .min(MAX_REFRESH_SECS);
        Instant::now() + Duration::from_secs(secs)
    }

    /// Serve an on-demand acquisition. Coalesced: a token published while
    /// the request sat in the mailbox is returned directly.
    async fn acquire(&mut self) -> (Result<AccessTokenRecord>, Option<Instant>) {
        if let Some(token) = self.registry.token(&self.name).await {
            return (Ok(token), None);
        }
        match self.source.fetch(&self.http).await {
            Ok(token) => {
                let deadline = self.refresh_deadline(&token);
                self.registry.store_token(&self.name, token.clone()).await;
                self.retry_count = 0;
                (Ok(token), Some(deadline))
            }
            // On-demand failures have no state-transition side effects.
            Err(error) => (Err(error), None),
        }
    }

    /// Run one scheduled refresh and return the next deadline.
    async fn refresh(&mut self) -> Instant {
        match self.source.fetch(&self.http).await {
            Ok(token) => {
                let deadline = self.refresh_deadline(&token);
                self.registry.store_token(&self.name, token).await;
                self.retry_count = 0;
                tracing::debug!(credential = %self.name, "token refreshed");
                deadline
            }
            Err(error) if self.retry_count < self.max_retries => {
                let delay = (self.retry_delay)(self.retry_count);
                tracing::warn!(
                    credential = %self.name,
                    %error,
                    retry = self.retry_count,
                    delay_ms = delay.as_millis() as u64,
                    "token refresh failed; retrying"
                );
                self.retry_count += 1;
                Instant::now() + delay
            }
            Err(error) => {
                tracing::error!(
                    credential = %self.name,
                    %error,
                    max_retries = self.max_retries,
                    "token refresh failed after maximum retries; backing off"
                );
                self.retry_count = 0;
                Instant::now() + EXHAUSTED_RETRY_DELAY
            }
        }
    }
}

/// The agent task: a single loop over shutdown, mailbox, and the refresh
/// timer. Re-arming replaces the pending deadline wholesale, so a
/// superseded timer can never fire a stale refresh.
async fn run_agent(
    mut state: AgentState,
    mut rx: mpsc::Receiver<AgentMessage>,
    cancel: CancellationToken,
    first_refresh: Instant,
) {
    let mut next_refresh = first_refresh;

    loop {
        tokio::select! {
            _ = cancel.cancelled() => break,
            message = rx.recv() => match message {
                Some(AgentMessage::Acquire { reply }) => {
                    let (result, rearm) = state.acquire().await;
                    if let Some(deadline) = rearm {
                        next_refresh = deadline;
                    }
                    // The caller may have stopped waiting; that is fine.
                    let _ = reply.send(result);
                }
                None => break,
            },
            _ = tokio::time::sleep_until(next_refresh) => {
                next_refresh = state.refresh().await;
            }
        }
    }

    state.registry.deregister(&state.name).await;
    tracing::debug!(credential = %state.name, "credential agent stopped");
}
