use std::sync::atomic::{AtomicU32, AtomicU64, Ordering};
use std::time::{Duration, Instant};

use async_trait::async_trait;
use parking_lot::RwLock;
use rand::Rng;
use tracing::{info, warn};

use abrigo_core::completion::{CompletionProvider, CompletionRequest};
use abrigo_core::errors::CompletionError;

/// Retry and circuit breaker tuning for [`ReliableCompletion`].
#[derive(Clone, Debug)]
pub struct ReliableConfig {
    pub max_retries: u32,
    pub base_delay: Duration,
    pub max_delay: Duration,
    pub jitter_factor: f64,
    pub circuit_breaker_threshold: u32,
    pub circuit_breaker_cooldown: Duration,
}

impl Default for ReliableConfig {
    fn default() -> Self {
        Self {
            max_retries: 3,
            base_delay: Duration::from_secs(1),
            max_delay: Duration::from_secs(30),
            jitter_factor: 0.2,
            circuit_breaker_threshold: 5,
            circuit_breaker_cooldown: Duration::from_secs(60),
        }
    }
}

#[derive(Clone, Debug, PartialEq, Eq)]
enum CircuitState {
    Closed,
    Open { since: Instant },
    HalfOpen,
}

/// Wraps a [`CompletionProvider`] with retries and a circuit breaker.
///
/// - Retryable errors back off exponentially with jitter, honoring
///   `retry_after` hints from rate limits.
/// - Fatal errors return immediately.
/// - After `circuit_breaker_threshold` consecutive failed calls the circuit
///   opens and calls fail fast with `ProviderOverloaded` until the cooldown
///   elapses; the next call is a half-open trial.
pub struct ReliableCompletion<P> {
    inner: P,
    config: ReliableConfig,
    circuit_state: RwLock<CircuitState>,
    consecutive_failures: AtomicU32,
    total_retries: AtomicU64,
}

impl<P: CompletionProvider> ReliableCompletion<P> {
    pub fn new(inner: P, config: ReliableConfig) -> Self {
        Self {
            inner,
            config,
            circuit_state: RwLock::new(CircuitState::Closed),
            consecutive_failures: AtomicU32::new(0),
            total_retries: AtomicU64::new(0),
        }
    }

    pub fn with_defaults(inner: P) -> Self {
        Self::new(inner, ReliableConfig::default())
    }

    pub fn inner(&self) -> &P {
        &self.inner
    }

    fn check_circuit(&self) -> Result<(), CompletionError> {
        let state = self.circuit_state.read();
        match &*state {
            CircuitState::Closed | CircuitState::HalfOpen => Ok(()),
            CircuitState::Open { since } => {
                if since.elapsed() >= self.config.circuit_breaker_cooldown {
                    drop(state);
                    *self.circuit_state.write() = CircuitState::HalfOpen;
                    Ok(())
                } else {
                    Err(CompletionError::ProviderOverloaded)
                }
            }
        }
    }

    fn record_success(&self) {
        self.consecutive_failures.store(0, Ordering::Relaxed);
        let mut state = self.circuit_state.write();
        if *state != CircuitState::Closed {
            info!("circuit breaker closed after successful completion");
            *state = CircuitState::Closed;
        }
    }

    fn record_failure(&self) {
        let failures = self.consecutive_failures.fetch_add(1, Ordering::Relaxed) + 1;
        let mut state = self.circuit_state.write();
        let trip = match *state {
            CircuitState::HalfOpen => true,
            CircuitState::Closed => failures >= self.config.circuit_breaker_threshold,
            CircuitState::Open { .. } => false,
        };
        if trip {
            warn!(
                failures,
                cooldown_secs = self.config.circuit_breaker_cooldown.as_secs(),
                "circuit breaker opened"
            );
            *state = CircuitState::Open {
                since: Instant::now(),
            };
        }
    }

    fn retry_delay(&self, attempt: u32, suggested: Option<Duration>) -> Duration {
        if let Some(delay) = suggested {
            return delay.min(self.config.max_delay);
        }

        let exp_ms = self.config.base_delay.as_millis() as f64 * 2.0_f64.powi(attempt as i32);
        let capped = exp_ms.min(self.config.max_delay.as_millis() as f64);

        let jitter_range = capped * self.config.jitter_factor;
        let jitter = if jitter_range > 0.0 {
            rand::thread_rng().gen_range(-jitter_range..=jitter_range)
        } else {
            0.0
        };
        Duration::from_millis((capped + jitter).max(0.0) as u64)
    }

    pub fn total_retries(&self) -> u64 {
        self.total_retries.load(Ordering::Relaxed)
    }

    pub fn circuit_state_name(&self) -> &'static str {
        match &*self.circuit_state.read() {
            CircuitState::Closed => "closed",
            CircuitState::Open { .. } => "open",
            CircuitState::HalfOpen => "half_open",
        }
    }
}

#[async_trait]
impl<P: CompletionProvider> CompletionProvider for ReliableCompletion<P> {
    fn name(&self) -> &str {
        self.inner.name()
    }

    async fn complete(&self, request: &CompletionRequest) -> Result<String, CompletionError> {
        self.check_circuit()?;

        let mut attempt = 0;
        loop {
            match self.inner.complete(request).await {
                Ok(reply) => {
                    self.record_success();
                    return Ok(reply);
                }
                Err(e) if !e.is_retryable() || attempt >= self.config.max_retries => {
                    self.record_failure();
                    return Err(e);
                }
                Err(e) => {
                    let delay = self.retry_delay(attempt, e.suggested_delay());
                    self.total_retries.fetch_add(1, Ordering::Relaxed);
                    warn!(
                        attempt = attempt + 1,
                        max_retries = self.config.max_retries,
                        delay_ms = delay.as_millis() as u64,
                        error_kind = e.error_kind(),
                        "retrying completion"
                    );
                    tokio::time::sleep(delay).await;
                    attempt += 1;
                }
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::mock::{MockCompletion, MockReply};
    use abrigo_core::completion::ModelTier;
    use abrigo_core::messages::Turn;

    fn request() -> CompletionRequest {
        CompletionRequest::new("sys", vec![Turn::user("oi")], ModelTier::Standard)
    }

    fn server_error() -> MockReply {
        MockReply::Error(CompletionError::ServerError {
            status: 500,
            body: "internal".into(),
        })
    }

    fn fast_config() -> ReliableConfig {
        ReliableConfig {
            max_retries: 3,
            base_delay: Duration::from_millis(1),
            max_delay: Duration::from_millis(5),
            ..Default::default()
        }
    }

    #[tokio::test]
    async fn success_on_first_try() {
        let reliable = ReliableCompletion::with_defaults(MockCompletion::new(vec![MockReply::text("olá")]));
        assert_eq!(reliable.complete(&request()).await.unwrap(), "olá");
        assert_eq!(reliable.total_retries(), 0);
    }

    #[tokio::test]
    async fn retries_on_retryable_error() {
        let mock = MockCompletion::new(vec![server_error(), server_error(), MockReply::text("recovered")]);
        let reliable = ReliableCompletion::new(mock, fast_config());

        assert_eq!(reliable.complete(&request()).await.unwrap(), "recovered");
        assert_eq!(reliable.total_retries(), 2);
        assert_eq!(reliable.inner().call_count(), 3);
    }

    #[tokio::test]
    async fn fatal_error_not_retried() {
        let mock = MockCompletion::new(vec![
            MockReply::Error(CompletionError::AuthenticationFailed("bad key".into())),
            MockReply::text("unreachable"),
        ]);
        let reliable = ReliableCompletion::with_defaults(mock);

        let err = reliable.complete(&request()).await.unwrap_err();
        assert!(matches!(err, CompletionError::AuthenticationFailed(_)));
        assert_eq!(reliable.total_retries(), 0);
        assert_eq!(reliable.inner().call_count(), 1);
    }

    #[tokio::test]
    async fn timeout_not_retried() {
        let mock = MockCompletion::new(vec![MockReply::Error(CompletionError::Timeout(Duration::from_secs(1)))]);
        let reliable = ReliableCompletion::new(mock, fast_config());
        assert!(matches!(
            reliable.complete(&request()).await,
            Err(CompletionError::Timeout(_))
        ));
        assert_eq!(reliable.total_retries(), 0);
    }

    #[tokio::test]
    async fn max_retries_exhausted() {
        let mock = MockCompletion::new((0..4).map(|_| server_error()).collect());
        let reliable = ReliableCompletion::new(mock, fast_config());

        assert!(reliable.complete(&request()).await.is_err());
        assert_eq!(reliable.total_retries(), 3);
        assert_eq!(reliable.inner().call_count(), 4);
    }

    #[tokio::test]
    async fn circuit_breaker_trips_after_threshold() {
        let mock = MockCompletion::new(vec![
            server_error(),
            server_error(),
            server_error(),
            MockReply::text("unreachable"),
        ]);
        let config = ReliableConfig {
            max_retries: 0,
            circuit_breaker_threshold: 3,
            circuit_breaker_cooldown: Duration::from_secs(60),
            ..fast_config()
        };
        let reliable = ReliableCompletion::new(mock, config);

        for _ in 0..3 {
            let _ = reliable.complete(&request()).await;
        }
        assert_eq!(reliable.circuit_state_name(), "open");

        let err = reliable.complete(&request()).await.unwrap_err();
        assert!(matches!(err, CompletionError::ProviderOverloaded));
        assert_eq!(reliable.inner().call_count(), 3);
    }

    #[tokio::test]
    async fn circuit_breaker_recovers_after_cooldown() {
        let mock = MockCompletion::new(vec![
            server_error(),
            server_error(),
            server_error(),
            MockReply::text("recovered"),
        ]);
        let config = ReliableConfig {
            max_retries: 0,
            circuit_breaker_threshold: 3,
            circuit_breaker_cooldown: Duration::from_millis(30),
            ..fast_config()
        };
        let reliable = ReliableCompletion::new(mock, config);

        for _ in 0..3 {
            let _ = reliable.complete(&request()).await;
        }
        assert_eq!(reliable.circuit_state_name(), "open");

        tokio::time::sleep(Duration::from_millis(40)).await;

        assert_eq!(reliable.complete(&request()).await.unwrap(), "recovered");
        assert_eq!(reliable.circuit_state_name(), "closed");
    }

    #[tokio::test]
    async fn half_open_failure_reopens() {
        let mock = MockCompletion::new(vec![server_error(), server_error()]);
        let config = ReliableConfig {
            max_retries: 0,
            circuit_breaker_threshold: 1,
            circuit_breaker_cooldown: Duration::from_millis(20),
            ..fast_config()
        };
        let reliable = ReliableCompletion::new(mock, config);

        let _ = reliable.complete(&request()).await;
        assert_eq!(reliable.circuit_state_name(), "open");
        tokio::time::sleep(Duration::from_millis(30)).await;

        let _ = reliable.complete(&request()).await;
        assert_eq!(reliable.circuit_state_name(), "open");
    }

    #[test]
    fn retry_delay_respects_suggested_up_to_max() {
        let reliable = ReliableCompletion::with_defaults(MockCompletion::new(vec![]));
        assert_eq!(reliable.retry_delay(0, Some(Duration::from_secs(5))), Duration::from_secs(5));
        assert_eq!(reliable.retry_delay(0, Some(Duration::from_secs(600))), Duration::from_secs(30));
    }

    #[test]
    fn retry_delay_exponential_backoff() {
        let config = ReliableConfig {
            base_delay: Duration::from_millis(100),
            jitter_factor: 0.0,
            ..Default::default()
        };
        let reliable = ReliableCompletion::new(MockCompletion::new(vec![]), config);

        assert_eq!(reliable.retry_delay(0, None).as_millis(), 100);
        assert_eq!(reliable.retry_delay(1, None).as_millis(), 200);
        assert_eq!(reliable.retry_delay(2, None).as_millis(), 400);
        assert_eq!(reliable.retry_delay(20, None).as_millis(), 30_000);
    }

    #[test]
    fn retry_delay_jitter_stays_in_range() {
        let config = ReliableConfig {
            base_delay: Duration::from_millis(1000),
            jitter_factor: 0.2,
            ..Default::default()
        };
        let reliable = ReliableCompletion::new(MockCompletion::new(vec![]), config);
        for _ in 0..50 {
            let ms = reliable.retry_delay(0, None).as_millis();
            assert!((800..=1200).contains(&ms), "delay {ms} out of range");
        }
    }

    #[test]
    fn delegates_name() {
        let reliable = ReliableCompletion::with_defaults(MockCompletion::new(vec![]));
        assert_eq!(reliable.name(), "mock");
    }
}
