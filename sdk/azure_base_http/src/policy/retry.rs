//! Transient-failure retry configuration.
//!
//! The policy registers [`RetryOptions`] on the request; the client's
//! dispatch loop consumes them, honoring `Retry-After` on throttled
//! responses and applying jittered exponential backoff otherwise. Transport
//! errors retry on the same schedule without a `Retry-After` hint.

use async_trait::async_trait;
use std::time::Duration;

use azure_base_core::error::Result;

use super::Policy;
use crate::request::Request;

/// Retry configuration consumed by the dispatch loop.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct RetryOptions {
    /// Retries after the initial attempt.
    pub max_retries: u32,
    pub base_delay: Duration,
    pub max_delay: Duration,
    pub retry_statuses: Vec<u16>,
}

impl Default for RetryOptions {
    fn default() -> Self {
        Self {
            max_retries: 3,
            base_delay: Duration::from_millis(1000),
            max_delay: Duration::from_millis(32_000),
            retry_statuses: vec![408, 429, 500, 502, 503, 504],
        }
    }
}

impl RetryOptions {
    pub fn is_retryable_status(&self, status: u16) -> bool {
        self.retry_statuses.contains(&status)
    }

    /// Exponential backoff with up to 20% additive jitter, capped at
    /// `max_delay`.
    pub fn backoff_delay(&self, attempt: u32) -> Duration {
        let base = self
            .base_delay
            .as_millis()
            .saturating_mul(1u128 << attempt.min(32)) as u64;
        let jitter = fastrand::u64(0..=base / 5);
        Duration::from_millis(base.saturating_add(jitter)).min(self.max_delay)
    }
}

/// Registers retry configuration for the dispatch loop.
#[derive(Debug, Default)]
pub struct RetryPolicy {
    options: RetryOptions,
}

impl RetryPolicy {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn with_options(options: RetryOptions) -> Self {
        Self { options }
    }

    pub fn max_retries(mut self, max_retries: u32) -> Self {
        self.options.max_retries = max_retries;
        self
    }

    pub fn base_delay(mut self, base_delay: Duration) -> Self {
        self.options.base_delay = base_delay;
        self
    }

    pub fn max_delay(mut self, max_delay: Duration) -> Self {
        self.options.max_delay = max_delay;
        self
    }

    pub fn retry_statuses(mut self, statuses: impl Into<Vec<u16>>) -> Self {
        self.options.retry_statuses = statuses.into();
        self
    }
}

#[async_trait]
impl Policy for RetryPolicy {
    async fn on_request(&self, request: &mut Request) -> Result<()> {
        request.options_mut().insert(self.options.clone());
        Ok(())
    }
}
