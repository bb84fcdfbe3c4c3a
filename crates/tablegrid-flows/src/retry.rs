//! Retry policy for transport calls.
//!
//! A policy is a plain value: total attempts plus a backoff shape. Only
//! errors for which [`TransportError::is_transient`] holds are retried.

use std::future::Future;
use std::time::Duration;

use serde::{Deserialize, Serialize};
use tokio_retry::strategy::{jitter, FixedInterval};
use tokio_retry::RetryIf;
use tracing::warn;

use crate::error::{TransportError, TransportResult};

/// Default total attempts.
pub const DEFAULT_MAX_ATTEMPTS: usize = 3;

/// Default wait between attempts.
pub const DEFAULT_BACKOFF: Duration = Duration::from_secs(20);

/// Shape of the wait between attempts.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Eq)]
#[serde(rename_all = "snake_case")]
pub enum Backoff {
    /// Same wait every time.
    Fixed(#[serde(with = "humantime_serde")] Duration),
    /// Uniformly random wait in `[min, max)`.
    Jitter {
        #[serde(with = "humantime_serde")]
        min: Duration,
        #[serde(with = "humantime_serde")]
        max: Duration,
    },
}

impl Default for Backoff {
    fn default() -> Self {
        Backoff::Fixed(DEFAULT_BACKOFF)
    }
}

#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Eq)]
pub struct RetryPolicy {
    /// Total attempts, including the first one.
    #[serde(default = "default_max_attempts")]
    pub max_attempts: usize,
    #[serde(default)]
    pub backoff: Backoff,
}

fn default_max_attempts() -> usize {
    DEFAULT_MAX_ATTEMPTS
}

impl Default for RetryPolicy {
    fn default() -> Self {
        Self {
            max_attempts: DEFAULT_MAX_ATTEMPTS,
            backoff: Backoff::default(),
        }
    }
}

impl RetryPolicy {
    pub fn fixed(max_attempts: usize, wait: Duration) -> Self {
        Self {
            max_attempts,
            backoff: Backoff::Fixed(wait),
        }
    }

    /// Waits between attempts; yields `max_attempts - 1` delays.
    pub fn strategy(&self) -> Box<dyn Iterator<Item = Duration> + Send> {
        let retries = self.max_attempts.saturating_sub(1);
        match self.backoff {
            Backoff::Fixed(wait) => Box::new(FixedInterval::new(wait).take(retries)),
            Backoff::Jitter { min, max } => {
                let spread = max.saturating_sub(min);
                Box::new(
                    FixedInterval::new(spread)
                        .map(jitter)
                        .map(move |d| d + min)
                        .take(retries),
                )
            }
        }
    }

    /// Run `op` until it succeeds, fails with a non-transient error, or the
    /// attempts run out. The last error is returned on exhaustion.
    pub async fn run<T, F, Fut>(&self, what: &str, mut op: F) -> TransportResult<T>
    where
        F: FnMut() -> Fut,
        Fut: Future<Output = TransportResult<T>>,
    {
        let max_attempts = self.max_attempts.max(1);
        let mut attempt = 0usize;
        RetryIf::spawn(
            self.strategy(),
            || {
                attempt += 1;
                let current = attempt;
                let fut = op();
                async move {
                    let result = fut.await;
                    if let Err(err) = &result {
                        warn!(
                            what,
                            attempt = current,
                            max_attempts,
                            transient = err.is_transient(),
                            error = %err,
                            "transport call failed"
                        );
                    }
                    result
                }
            },
            TransportError::is_transient,
        )
        .await
    }
}
