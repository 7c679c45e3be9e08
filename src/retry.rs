//! Timeout and exponential backoff for calls to external capabilities.
//!
//! Both the embedding and the generation gateways run every external call
//! through a [`RetryPolicy`]:
//!
//! - [`CallError::Transient`] (HTTP 429/5xx, network errors) and timeouts
//!   are retried;
//! - [`CallError::Permanent`] (other 4xx, malformed responses) fails
//!   immediately;
//! - backoff doubles from `base_delay` and is capped at `max_delay`.

use std::future::Future;
use std::time::Duration;

/// Failure of a single external call.
#[derive(Debug, Clone, PartialEq, Eq, thiserror::Error)]
pub enum CallError {
    #[error("{0}")]
    Transient(String),
    #[error("{0}")]
    Permanent(String),
}

impl CallError {
    pub fn is_transient(&self) -> bool {
        matches!(self, CallError::Transient(_))
    }

    /// Classify a non-success HTTP status.
    pub fn from_status(status: reqwest::StatusCode, body: &str) -> Self {
        let msg = format!("HTTP {}: {}", status, body);
        if status.as_u16() == 429 || status.is_server_error() {
            CallError::Transient(msg)
        } else {
            CallError::Permanent(msg)
        }
    }
}

impl From<reqwest::Error> for CallError {
    fn from(e: reqwest::Error) -> Self {
        if e.is_decode() {
            CallError::Permanent(e.to_string())
        } else {
            CallError::Transient(e.to_string())
        }
    }
}

#[derive(Debug, Clone)]
pub struct RetryPolicy {
    /// Total attempts, including the first one.
    pub max_attempts: u32,
    pub base_delay: Duration,
    pub max_delay: Duration,
    /// Per-attempt timeout.
    pub timeout: Duration,
}

impl RetryPolicy {
    pub fn new(max_attempts: u32, timeout: Duration) -> Self {
        Self {
            max_attempts: max_attempts.max(1),
            base_delay: Duration::from_secs(1),
            max_delay: Duration::from_secs(32),
            timeout,
        }
    }

    pub fn with_backoff(mut self, base_delay: Duration, max_delay: Duration) -> Self {
        self.base_delay = base_delay;
        self.max_delay = max_delay;
        self
    }

    /// Delay before retry number `retry` (1-based).
    pub fn delay_for(&self, retry: u32) -> Duration {
        let factor = 1u32 << retry.saturating_sub(1).min(16);
        self.base_delay.saturating_mul(factor).min(self.max_delay)
    }

    /// Run `op` until it succeeds, fails permanently, or attempts run out.
    ///
    /// `what` names the call in log lines and in the final error.
    pub async fn run<T, F, Fut>(&self, what: &str, mut op: F) -> Result<T, CallError>
    where
        F: FnMut() -> Fut,
        Fut: Future<Output = Result<T, CallError>>,
    {
        let mut last_err = String::new();

        for attempt in 0..self.max_attempts {
            if attempt > 0 {
                tokio::time::sleep(self.delay_for(attempt)).await;
            }

            match tokio::time::timeout(self.timeout, op()).await {
                Ok(Ok(value)) => return Ok(value),
                Ok(Err(CallError::Permanent(msg))) => {
                    return Err(CallError::Permanent(format!("{}: {}", what, msg)));
                }
                Ok(Err(CallError::Transient(msg))) => last_err = msg,
                Err(_) => last_err = format!("timed out after {:?}", self.timeout),
            }

            tracing::warn!(
                call = what,
                attempt = attempt + 1,
                max_attempts = self.max_attempts,
                error = %last_err,
                "transient failure"
            );
        }

        Err(CallError::Transient(format!(
            "{} failed after {} attempts: {}",
            what, self.max_attempts, last_err
        )))
    }
}
