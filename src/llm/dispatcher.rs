//! Rate-limited call dispatch over a credential pool.
//!
//! The dispatcher is the only component that reacts to rate-limit signals:
//! it cools the offending credential down and retries the call with the next
//! usable entry. Rate limits therefore never escalate to the task runner or
//! its caller as long as at least one credential is configured. Every other
//! provider error propagates immediately; rotating on a real failure would
//! only mask it.

use std::future::Future;
use std::sync::Arc;

use tokio::time::{sleep_until, Duration, Instant};
use tracing::{debug, warn};

use crate::error::{DispatchError, ProviderError};

use super::keypool::{Credential, KeyPool};

/// Fixed cooldown applied to a credential after a rate-limit signal.
///
/// Short and bounded: the worst case for a fully-cooled pool is one cooldown
/// of waiting before the next attempt.
pub const DEFAULT_COOLDOWN: Duration = Duration::from_secs(30);

/// Executes outbound calls with automatic credential rotation.
///
/// Cheap to share across jobs; concurrent `execute` calls rotate over the
/// same pool and cool entries down independently.
#[derive(Debug, Clone)]
pub struct Dispatcher {
    pool: Arc<KeyPool>,
    cooldown: Duration,
}

impl Dispatcher {
    /// Create a dispatcher with the default cooldown.
    pub fn new(pool: Arc<KeyPool>) -> Self {
        Self::with_cooldown(pool, DEFAULT_COOLDOWN)
    }

    /// Create a dispatcher with a custom cooldown duration.
    pub fn with_cooldown(pool: Arc<KeyPool>, cooldown: Duration) -> Self {
        Self { pool, cooldown }
    }

    /// The pool this dispatcher rotates over.
    pub fn pool(&self) -> &Arc<KeyPool> {
        &self.pool
    }

    /// The cooldown applied after a rate-limit signal.
    pub fn cooldown(&self) -> Duration {
        self.cooldown
    }

    /// Run `call` with a usable credential, rotating on rate limits.
    ///
    /// - A rate-limit error cools the selected credential down and retries
    ///   with the next usable entry.
    /// - When every entry is cooling down, the calling task (and only it)
    ///   sleeps until the soonest cooldown expires, then retries.
    /// - Any other provider error propagates unchanged.
    /// - An empty pool fails with [`DispatchError::PoolExhausted`]; cooldowns
    ///   never cause that error.
    pub async fn execute<T, F, Fut>(&self, call: F) -> Result<T, DispatchError>
    where
        F: Fn(Arc<Credential>) -> Fut,
        Fut: Future<Output = Result<T, ProviderError>>,
    {
        if self.pool.is_empty() {
            return Err(DispatchError::PoolExhausted(
                self.pool.provider().to_string(),
            ));
        }

        loop {
            let Some(credential) = self.pool.next_usable() else {
                // Non-empty pool with nothing usable: everything is cooling
                // down, so the soonest-ready instant always exists.
                let resume_at = self
                    .pool
                    .soonest_ready()
                    .unwrap_or_else(|| Instant::now() + self.cooldown);
                debug!(
                    provider = self.pool.provider(),
                    wait_ms = resume_at.saturating_duration_since(Instant::now()).as_millis() as u64,
                    "all credentials cooling down; waiting"
                );
                sleep_until(resume_at).await;
                continue;
            };

            match call(Arc::clone(&credential)).await {
                Ok(value) => return Ok(value),
                Err(err) if err.is_rate_limited() => {
                    warn!(
                        provider = self.pool.provider(),
                        credential = credential.label(),
                        cooldown_secs = self.cooldown.as_secs(),
                        "credential rate limited; rotating"
                    );
                    credential.start_cooldown(self.cooldown);
                }
                Err(err) => return Err(DispatchError::Provider(err)),
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::sync::Mutex;

    fn pool_of(n: usize) -> Arc<KeyPool> {
        let credentials = (1..=n)
            .map(|i| Credential::new(format!("openai-{i}"), format!("sk-secret-{i:04}")))
            .collect();
        Arc::new(KeyPool::new("openai", credentials))
    }

    #[tokio::test]
    async fn test_execute_returns_first_success() {
        let dispatcher = Dispatcher::new(pool_of(3));
        let result: Result<String, _> = dispatcher
            .execute(|credential| async move { Ok(credential.label().to_string()) })
            .await;

        assert_eq!(result.expect("success"), "openai-1");
    }

    #[tokio::test]
    async fn test_rate_limit_rotates_to_next_credential() {
        let dispatcher = Dispatcher::new(pool_of(3));
        let attempts: Mutex<Vec<String>> = Mutex::new(Vec::new());

        let result = dispatcher
            .execute(|credential| {
                let label = credential.label().to_string();
                attempts.lock().expect("attempts lock").push(label.clone());
                async move {
                    if label == "openai-1" {
                        Err(ProviderError::RateLimited("burst limit".to_string()))
                    } else {
                        Ok(label)
                    }
                }
            })
            .await;

        assert_eq!(result.expect("rotated success"), "openai-2");
        assert_eq!(
            *attempts.lock().expect("attempts lock"),
            vec!["openai-1", "openai-2"]
        );
    }

    #[tokio::test]
    async fn test_non_rate_limit_error_propagates_without_rotation() {
        let dispatcher = Dispatcher::new(pool_of(3));
        let attempts = Mutex::new(0usize);

        let result: Result<String, _> = dispatcher
            .execute(|_credential| {
                *attempts.lock().expect("attempts lock") += 1;
                async {
                    Err(ProviderError::Api {
                        code: 500,
                        message: "internal error".to_string(),
                    })
                }
            })
            .await;

        assert!(matches!(
            result,
            Err(DispatchError::Provider(ProviderError::Api { code: 500, .. }))
        ));
        assert_eq!(*attempts.lock().expect("attempts lock"), 1);
        // The failing credential was not cooled down.
        assert!(dispatcher.pool().next_usable().is_some());
    }

    #[tokio::test]
    async fn test_empty_pool_is_exhausted() {
        let dispatcher = Dispatcher::new(Arc::new(KeyPool::new("openai", Vec::new())));
        let result: Result<(), _> = dispatcher.execute(|_credential| async { Ok(()) }).await;

        assert!(matches!(result, Err(DispatchError::PoolExhausted(_))));
    }

    #[tokio::test(start_paused = true)]
    async fn test_fully_cooled_pool_waits_for_soonest_entry() {
        let pool = pool_of(3);
        let dispatcher = Dispatcher::new(Arc::clone(&pool));

        // Cool everything down with staggered expirations.
        let entries: Vec<_> = (0..3).map(|_| pool.next_usable().expect("entry")).collect();
        entries[0].start_cooldown(Duration::from_secs(20));
        entries[1].start_cooldown(Duration::from_secs(10));
        entries[2].start_cooldown(Duration::from_secs(30));

        let started = Instant::now();
        let result = dispatcher
            .execute(|credential| async move { Ok(credential.label().to_string()) })
            .await;

        // Resumed no earlier than the soonest expiry, with the entry that
        // expired first.
        assert!(started.elapsed() >= Duration::from_secs(10));
        assert!(started.elapsed() < Duration::from_secs(20));
        assert_eq!(result.expect("resumed"), "openai-2");
    }

    #[tokio::test(start_paused = true)]
    async fn test_whole_pool_rate_limited_then_recovers() {
        let dispatcher = Dispatcher::with_cooldown(pool_of(2), Duration::from_secs(5));
        let attempts = Mutex::new(0usize);

        let result = dispatcher
            .execute(|credential| {
                let mut attempts = attempts.lock().expect("attempts lock");
                *attempts += 1;
                let attempt = *attempts;
                let label = credential.label().to_string();
                async move {
                    // Both credentials fail once; the third attempt (after the
                    // cooldown wait) succeeds.
                    if attempt <= 2 {
                        Err(ProviderError::RateLimited("quota".to_string()))
                    } else {
                        Ok(label)
                    }
                }
            })
            .await;

        assert!(result.is_ok());
        assert_eq!(*attempts.lock().expect("attempts lock"), 3);
    }
}
