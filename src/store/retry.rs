//! Retry with exponential backoff for store adapters
//!
//! The engine treats a failing store call as "unresolved" and moves on; the
//! retrying belongs to the adapter. [`RetryingStore`] wraps any adapter and
//! retries recoverable errors (`StoreUnavailable`) with exponential backoff.
//!
//! # Example
//!
//! ```rust,ignore
//! use livebind::store::{MemoryStore, RetryConfig, RetryingStore};
//!
//! let store = RetryingStore::new(MemoryStore::new(), RetryConfig::default());
//! ```

use std::future::Future;
use std::time::Duration;

use async_trait::async_trait;
use tracing::debug;

use crate::error::Result;

use super::adapter::{
    FieldAddress, FieldSample, NotificationSink, StoreAdapter, StoreSubscription,
};

/// Configuration for retry behavior
#[derive(Debug, Clone)]
pub struct RetryConfig {
    /// Maximum number of retry attempts (not counting initial attempt)
    pub max_retries: u32,
    /// Initial delay before first retry
    pub initial_delay: Duration,
    /// Maximum delay between retries
    pub max_delay: Duration,
    /// Multiplier for exponential backoff (e.g., 2.0 doubles delay each time)
    pub backoff_multiplier: f64,
    /// Optional jitter factor (0.0 to 1.0) to add randomness
    pub jitter: f64,
}

impl Default for RetryConfig {
    fn default() -> Self {
        Self {
            max_retries: 3,
            initial_delay: Duration::from_millis(100),
            max_delay: Duration::from_secs(10),
            backoff_multiplier: 2.0,
            jitter: 0.1,
        }
    }
}

impl RetryConfig {
    pub fn with_max_retries(mut self, retries: u32) -> Self {
        self.max_retries = retries;
        self
    }

    pub fn with_initial_delay(mut self, delay: Duration) -> Self {
        self.initial_delay = delay;
        self
    }

    pub fn with_max_delay(mut self, delay: Duration) -> Self {
        self.max_delay = delay;
        self
    }

    pub fn with_backoff_multiplier(mut self, multiplier: f64) -> Self {
        self.backoff_multiplier = multiplier;
        self
    }

    /// Set jitter factor (clamped to 0.0..=1.0)
    pub fn with_jitter(mut self, jitter: f64) -> Self {
        self.jitter = jitter.clamp(0.0, 1.0);
        self
    }
}

/// Retry policy that executes operations with exponential backoff
#[derive(Debug, Clone)]
pub struct RetryPolicy {
    config: RetryConfig,
}

impl RetryPolicy {
    pub fn new(config: RetryConfig) -> Self {
        Self { config }
    }

    pub fn with_defaults() -> Self {
        Self::new(RetryConfig::default())
    }

    pub fn config(&self) -> &RetryConfig {
        &self.config
    }

    /// Calculate delay for a given attempt (0-indexed)
    pub fn calculate_delay(&self, attempt: u32) -> Duration {
        let base_delay = self.config.initial_delay.as_millis() as f64
            * self.config.backoff_multiplier.powi(attempt as i32);

        let capped_delay = base_delay.min(self.config.max_delay.as_millis() as f64);

        let jittered_delay = if self.config.jitter > 0.0 {
            let jitter_range = capped_delay * self.config.jitter;
            let jitter_offset = rand::random::<f64>() * jitter_range * 2.0 - jitter_range;
            (capped_delay + jitter_offset).max(0.0)
        } else {
            capped_delay
        };

        Duration::from_millis(jittered_delay as u64)
    }

    /// Execute an operation, retrying while it fails with a recoverable error
    pub async fn execute<F, Fut, T>(&self, operation: F) -> Result<T>
    where
        F: Fn() -> Fut,
        Fut: Future<Output = Result<T>>,
    {
        let mut attempt = 0;
        loop {
            match operation().await {
                Ok(result) => return Ok(result),
                Err(e) if !e.is_recoverable() || attempt >= self.config.max_retries => {
                    return Err(e)
                }
                Err(e) => {
                    let delay = self.calculate_delay(attempt);
                    debug!(attempt, delay_ms = delay.as_millis() as u64, error = %e, "retrying store call");
                    tokio::time::sleep(delay).await;
                    attempt += 1;
                }
            }
        }
    }
}

/// Store decorator that retries recoverable failures
pub struct RetryingStore<S> {
    inner: S,
    policy: RetryPolicy,
}

impl<S: StoreAdapter> RetryingStore<S> {
    pub fn new(inner: S, config: RetryConfig) -> Self {
        Self {
            inner,
            policy: RetryPolicy::new(config),
        }
    }

    pub fn inner(&self) -> &S {
        &self.inner
    }
}

#[async_trait]
impl<S: StoreAdapter> StoreAdapter for RetryingStore<S> {
    async fn read(&self, address: &FieldAddress) -> Result<Option<FieldSample>> {
        self.policy.execute(|| self.inner.read(address)).await
    }

    async fn subscribe(
        &self,
        address: &FieldAddress,
        sink: NotificationSink,
    ) -> Result<Box<dyn StoreSubscription>> {
        self.policy
            .execute(|| self.inner.subscribe(address, sink.clone()))
            .await
    }
}

impl From<&crate::config::RetrySettings> for RetryConfig {
    fn from(settings: &crate::config::RetrySettings) -> Self {
        RetryConfig::default()
            .with_max_retries(settings.max_retries)
            .with_initial_delay(Duration::from_millis(settings.initial_delay_ms))
            .with_max_delay(Duration::from_millis(settings.max_delay_ms))
            .with_backoff_multiplier(settings.backoff_multiplier)
            .with_jitter(settings.jitter)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::store::MemoryStore;
    use serde_json::json;
    use std::sync::atomic::{AtomicU32, Ordering};
    use std::sync::Arc;

    use crate::error::BindError;

    /// Fail `n` times with a recoverable error, then succeed (test helper)
    fn flaky(remaining: &std::sync::atomic::AtomicU32) -> Result<()> {
        if remaining
            .fetch_update(Ordering::SeqCst, Ordering::SeqCst, |n| n.checked_sub(1))
            .is_ok()
        {
            return Err(BindError::store_unavailable("E1", "Status", "transient"));
        }
        Ok(())
    }

    fn fast_config() -> RetryConfig {
        RetryConfig::default()
            .with_initial_delay(Duration::from_millis(1))
            .with_jitter(0.0)
    }

    #[test]
    fn test_retry_config_default() {
        let config = RetryConfig::default();
        assert_eq!(config.max_retries, 3);
        assert_eq!(config.initial_delay, Duration::from_millis(100));
        assert_eq!(config.max_delay, Duration::from_secs(10));
        assert!((config.backoff_multiplier - 2.0).abs() < f64::EPSILON);
    }

    #[test]
    fn test_calculate_delay_respects_max_delay() {
        let config = RetryConfig::default()
            .with_initial_delay(Duration::from_millis(100))
            .with_max_delay(Duration::from_millis(500))
            .with_jitter(0.0);
        let policy = RetryPolicy::new(config);

        assert_eq!(policy.calculate_delay(0), Duration::from_millis(100));
        assert_eq!(policy.calculate_delay(1), Duration::from_millis(200));
        assert_eq!(policy.calculate_delay(2), Duration::from_millis(400));
        assert_eq!(policy.calculate_delay(3), Duration::from_millis(500));
    }

    #[test]
    fn test_jitter_is_clamped() {
        let config = RetryConfig::default().with_jitter(3.0);
        assert!((config.jitter - 1.0).abs() < f64::EPSILON);
    }

    #[tokio::test]
    async fn test_execute_retries_recoverable_errors() {
        let policy = RetryPolicy::new(fast_config().with_max_retries(3));
        let remaining = AtomicU32::new(2);
        let attempts = AtomicU32::new(0);

        let result = policy
            .execute(|| {
                attempts.fetch_add(1, Ordering::SeqCst);
                let outcome = flaky(&remaining);
                async move { outcome }
            })
            .await;

        assert!(result.is_ok());
        assert_eq!(attempts.load(Ordering::SeqCst), 3);
    }

    #[tokio::test]
    async fn test_execute_gives_up_after_max_retries() {
        let policy = RetryPolicy::new(fast_config().with_max_retries(1));
        let remaining = AtomicU32::new(10);
        let attempts = AtomicU32::new(0);

        let result = policy
            .execute(|| {
                attempts.fetch_add(1, Ordering::SeqCst);
                let outcome = flaky(&remaining);
                async move { outcome }
            })
            .await;

        assert!(matches!(result, Err(BindError::StoreUnavailable { .. })));
        assert_eq!(attempts.load(Ordering::SeqCst), 2);
    }

    #[tokio::test]
    async fn test_execute_does_not_retry_permanent_errors() {
        let policy = RetryPolicy::new(fast_config());
        let attempts = AtomicU32::new(0);

        let result: Result<()> = policy
            .execute(|| {
                attempts.fetch_add(1, Ordering::SeqCst);
                async { Err(BindError::RegistryShutDown) }
            })
            .await;

        assert!(result.is_err());
        assert_eq!(attempts.load(Ordering::SeqCst), 1);
    }

    #[tokio::test]
    async fn retrying_store_recovers_when_store_comes_back() {
        let memory = MemoryStore::new();
        memory.write("E1", "Status", json!("Online"));
        memory.set_available(false);

        let store = Arc::new(RetryingStore::new(
            memory.clone(),
            fast_config().with_max_retries(50),
        ));
        let reader = Arc::clone(&store);
        let read = tokio::spawn(async move {
            reader.read(&FieldAddress::new("E1", "Status")).await
        });

        tokio::time::sleep(Duration::from_millis(5)).await;
        memory.set_available(true);

        let sample = read.await.unwrap().unwrap().unwrap();
        assert_eq!(sample.value, json!("Online"));
    }
}
