use std::fmt::Display;
use std::future::Future;
use std::time::Duration;

use backoff::backoff::{Backoff, Constant};
use tracing::warn;

use crate::config::RetryConfig;

/// Fixed-interval retry: the same delay between every attempt.
#[derive(Debug, Clone, Copy)]
pub struct RetryPolicy {
    pub attempts: u32,
    pub delay: Duration,
}

impl RetryPolicy {
    pub fn none() -> Self {
        Self {
            attempts: 1,
            delay: Duration::ZERO,
        }
    }

    fn backoff(&self) -> LimitedConstant {
        let retries = self.attempts.max(1) - 1;
        LimitedConstant {
            inner: Constant::new(self.delay),
            retries,
            remaining: retries,
        }
    }
}

impl From<&RetryConfig> for RetryPolicy {
    fn from(config: &RetryConfig) -> Self {
        Self {
            attempts: config.attempts.max(1),
            delay: Duration::from_millis(config.delay_ms),
        }
    }
}

/// `Constant` never gives up on its own; this stops it after `retries`.
#[derive(Debug)]
struct LimitedConstant {
    inner: Constant,
    retries: u32,
    remaining: u32,
}

impl Backoff for LimitedConstant {
    fn reset(&mut self) {
        self.inner.reset();
        self.remaining = self.retries;
    }

    fn next_backoff(&mut self) -> Option<Duration> {
        if self.remaining == 0 {
            return None;
        }
        self.remaining -= 1;
        self.inner.next_backoff()
    }
}

/// Run `op` until it succeeds, `should_retry` rejects the error, or the
/// policy runs out of attempts. The last error is returned.
pub async fn retry_fixed<T, E, F, Fut, R>(
    policy: RetryPolicy,
    label: &str,
    should_retry: R,
    mut op: F,
) -> Result<T, E>
where
    F: FnMut() -> Fut,
    Fut: Future<Output = Result<T, E>>,
    R: Fn(&E) -> bool,
    E: Display,
{
    let should_retry = &should_retry;
    let attempts = policy.attempts.max(1);
    let mut attempt = 0;

    backoff::future::retry_notify(
        policy.backoff(),
        move || {
            let call = op();
            async move {
                call.await.map_err(|e| {
                    if should_retry(&e) {
                        backoff::Error::transient(e)
                    } else {
                        backoff::Error::permanent(e)
                    }
                })
            }
        },
        |e: E, delay: Duration| {
            attempt += 1;
            warn!(
                "{} failed (attempt {}/{}): {}; retrying in {:?}",
                label, attempt, attempts, e, delay
            );
        },
    )
    .await
}
