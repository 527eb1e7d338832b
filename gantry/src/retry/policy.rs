//! Backoff policy and the retry loop.

use crate::cancellation::CancellationToken;
use rand::Rng;
use serde::{Deserialize, Serialize};
use std::future::Future;
use std::time::Duration;
use tracing::debug;

/// Backoff strategy for retry delays.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum BackoffStrategy {
    /// delay = base * 2^(retry - 1)
    #[default]
    Exponential,
    /// delay = base * retry
    Linear,
    /// delay = base
    Constant,
}

/// Jitter strategy, so that jobs failing together do not retry together.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum JitterStrategy {
    /// No jitter
    None,
    /// Random from 0 to delay
    #[default]
    Full,
    /// Half fixed, half random
    Equal,
    /// min(max, random(base, prev * 3))
    Decorrelated,
}

fn default_max_attempts() -> u32 {
    3
}

fn default_base_delay_ms() -> u64 {
    1000
}

fn default_max_delay_ms() -> u64 {
    30_000
}

/// Configuration for retry behavior.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct RetryConfig {
    /// Maximum attempts, including the first one.
    #[serde(default = "default_max_attempts")]
    pub max_attempts: u32,
    /// Base delay between attempts in milliseconds.
    #[serde(default = "default_base_delay_ms")]
    pub base_delay_ms: u64,
    /// Maximum delay cap in milliseconds.
    #[serde(default = "default_max_delay_ms")]
    pub max_delay_ms: u64,
    /// Backoff strategy.
    #[serde(default)]
    pub backoff_strategy: BackoffStrategy,
    /// Jitter strategy.
    #[serde(default)]
    pub jitter_strategy: JitterStrategy,
}

impl Default for RetryConfig {
    fn default() -> Self {
        Self {
            max_attempts: default_max_attempts(),
            base_delay_ms: default_base_delay_ms(),
            max_delay_ms: default_max_delay_ms(),
            backoff_strategy: BackoffStrategy::Exponential,
            jitter_strategy: JitterStrategy::Full,
        }
    }
}

impl RetryConfig {
    /// Creates a new retry config.
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    /// A config that makes exactly one attempt.
    #[must_use]
    pub fn no_retry() -> Self {
        Self::default().with_max_attempts(1)
    }

    /// Sets the maximum attempts. Zero is treated as one.
    #[must_use]
    pub fn with_max_attempts(mut self, attempts: u32) -> Self {
        self.max_attempts = attempts.max(1);
        self
    }

    /// Sets the base delay.
    #[must_use]
    pub fn with_base_delay_ms(mut self, delay: u64) -> Self {
        self.base_delay_ms = delay;
        self
    }

    /// Sets the maximum delay.
    #[must_use]
    pub fn with_max_delay_ms(mut self, delay: u64) -> Self {
        self.max_delay_ms = delay;
        self
    }

    /// Sets the backoff strategy.
    #[must_use]
    pub fn with_backoff(mut self, strategy: BackoffStrategy) -> Self {
        self.backoff_strategy = strategy;
        self
    }

    /// Sets the jitter strategy.
    #[must_use]
    pub fn with_jitter(mut self, strategy: JitterStrategy) -> Self {
        self.jitter_strategy = strategy;
        self
    }
}

impl RetryConfig {
    /// Returns the un-jittered delay before retry number `retry` (1-based).
    ///
    /// Exponential backoff waits `base`, then `2 * base`, `4 * base` and so
    /// on. Every strategy is capped at `max_delay_ms`.
    #[must_use]
    pub fn backoff_ms(&self, retry: u32) -> u64 {
        let base = self.base_delay_ms;
        let retry = retry.max(1);
        let delay = match self.backoff_strategy {
            BackoffStrategy::Exponential => base.saturating_mul(2u64.saturating_pow(retry - 1)),
            BackoffStrategy::Linear => base.saturating_mul(u64::from(retry)),
            BackoffStrategy::Constant => base,
        };
        delay.min(self.max_delay_ms)
    }
}

/// Progress of one retried operation.
#[derive(Debug, Default)]
pub struct RetryState {
    /// Attempts made so far.
    pub attempts: u32,
    /// The last delay handed out, which decorrelated jitter grows from.
    last_delay_ms: Option<u64>,
}

impl RetryState {
    /// Creates a state with no attempts.
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    /// Returns true when no further attempt is allowed.
    #[must_use]
    pub fn is_exhausted(&self, config: &RetryConfig) -> bool {
        self.attempts >= config.max_attempts.max(1)
    }

    /// Returns the delay before the next attempt, jitter applied.
    #[must_use]
    pub fn next_delay(&mut self, config: &RetryConfig) -> Duration {
        let delay = config.backoff_ms(self.attempts);
        let base = config.base_delay_ms.min(config.max_delay_ms);
        let mut rng = rand::thread_rng();

        let jittered = match config.jitter_strategy {
            JitterStrategy::None => delay,
            JitterStrategy::Full if delay > 0 => rng.gen_range(0..=delay),
            JitterStrategy::Equal if delay > 1 => delay / 2 + rng.gen_range(0..=delay / 2),
            JitterStrategy::Full | JitterStrategy::Equal => delay,
            JitterStrategy::Decorrelated => {
                let upper = self
                    .last_delay_ms
                    .unwrap_or(base)
                    .saturating_mul(3)
                    .min(config.max_delay_ms);
                if upper > base {
                    rng.gen_range(base..=upper)
                } else {
                    base
                }
            }
        };

        self.last_delay_ms = Some(jittered);
        Duration::from_millis(jittered)
    }
}

/// Outcome of a retry decision.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum RetryDecision {
    /// Wait this long, then try again.
    Retry(Duration),
    /// The attempt budget is spent.
    GiveUp,
}

/// Decides whether another attempt is allowed after a transient failure.
#[must_use]
pub fn should_retry(state: &mut RetryState, config: &RetryConfig) -> RetryDecision {
    if state.is_exhausted(config) {
        RetryDecision::GiveUp
    } else {
        RetryDecision::Retry(state.next_delay(config))
    }
}

/// A successful value together with the attempts it took.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Retried<T> {
    /// The operation's value.
    pub value: T,
    /// Attempts made, including the successful one.
    pub attempts: u32,
}

/// Why a retried operation gave up.
#[derive(Debug, PartialEq, Eq)]
pub enum RetryError<E> {
    /// Every attempt failed transiently.
    Exhausted {
        /// Attempts made.
        attempts: u32,
        /// The last error.
        error: E,
    },
    /// An attempt failed with an error that is not retried.
    Permanent {
        /// Attempts made.
        attempts: u32,
        /// The error.
        error: E,
    },
    /// Cancellation was requested before the next attempt.
    Cancelled {
        /// Attempts made.
        attempts: u32,
    },
}

impl<E> RetryError<E> {
    /// Returns the number of attempts made.
    #[must_use]
    pub fn attempts(&self) -> u32 {
        match self {
            Self::Exhausted { attempts, .. }
            | Self::Permanent { attempts, .. }
            | Self::Cancelled { attempts } => *attempts,
        }
    }

    /// Returns the last error, unless the loop was cancelled.
    pub fn into_error(self) -> Option<E> {
        match self {
            Self::Exhausted { error, .. } | Self::Permanent { error, .. } => Some(error),
            Self::Cancelled { .. } => None,
        }
    }
}

/// Executes an operation with retry logic.
///
/// The operation receives the 1-based attempt number. Errors for which
/// `is_retryable` returns false end the loop immediately. The backoff sleep
/// is abandoned as soon as `token` is cancelled.
pub async fn with_retry<T, E, F, Fut, P>(
    config: &RetryConfig,
    key: &str,
    token: &CancellationToken,
    is_retryable: P,
    mut operation: F,
) -> Result<Retried<T>, RetryError<E>>
where
    F: FnMut(u32) -> Fut,
    Fut: Future<Output = Result<T, E>>,
    P: Fn(&E) -> bool,
    E: std::fmt::Display,
{
    let mut state = RetryState::new();

    loop {
        if token.is_cancelled() {
            return Err(RetryError::Cancelled {
                attempts: state.attempts,
            });
        }
        state.attempts += 1;

        match operation(state.attempts).await {
            Ok(value) => {
                return Ok(Retried {
                    value,
                    attempts: state.attempts,
                })
            }
            Err(error) if !is_retryable(&error) => {
                return Err(RetryError::Permanent {
                    attempts: state.attempts,
                    error,
                })
            }
            Err(error) => match should_retry(&mut state, config) {
                RetryDecision::Retry(delay) => {
                    debug!(
                        key = %key,
                        attempt = state.attempts,
                        delay_ms = u64::try_from(delay.as_millis()).unwrap_or(u64::MAX),
                        error = %error,
                        "Retrying after transient error"
                    );
                    tokio::select! {
                        () = tokio::time::sleep(delay) => {}
                        () = token.cancelled() => {}
                    }
                }
                RetryDecision::GiveUp => {
                    return Err(RetryError::Exhausted {
                        attempts: state.attempts,
                        error,
                    })
                }
            },
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::sync::atomic::{AtomicU32, Ordering};
    use std::sync::Arc;

    fn fast(attempts: u32) -> RetryConfig {
        RetryConfig::new()
            .with_max_attempts(attempts)
            .with_base_delay_ms(1)
            .with_jitter(JitterStrategy::None)
    }

    #[test]
    fn test_retry_config_default() {
        let config = RetryConfig::default();
        assert_eq!(config.max_attempts, 3);
        assert_eq!(config.base_delay_ms, 1000);
        assert_eq!(config.max_delay_ms, 30000);
        assert_eq!(config.backoff_strategy, BackoffStrategy::Exponential);
    }

    #[test]
    fn test_zero_attempts_means_one() {
        assert_eq!(RetryConfig::new().with_max_attempts(0).max_attempts, 1);
    }

    #[test]
    fn test_config_deserializes_with_defaults() {
        let config: RetryConfig = serde_json::from_str(r#"{"max_attempts": 5, "jitter_strategy": "none"}"#).unwrap();
        assert_eq!(config.max_attempts, 5);
        assert_eq!(config.base_delay_ms, 1000);
        assert_eq!(config.jitter_strategy, JitterStrategy::None);
    }

    #[test]
    fn test_exponential_delay_doubles() {
        let config = RetryConfig::new()
            .with_base_delay_ms(100)
            .with_jitter(JitterStrategy::None);
        let mut state = RetryState::new();

        state.attempts = 1;
        assert_eq!(state.next_delay(&config), Duration::from_millis(100));
        state.attempts = 2;
        assert_eq!(state.next_delay(&config), Duration::from_millis(200));
        state.attempts = 3;
        assert_eq!(state.next_delay(&config), Duration::from_millis(400));
    }

    #[test]
    fn test_linear_and_constant_delay() {
        let mut state = RetryState::new();
        state.attempts = 3;

        let linear = RetryConfig::new()
            .with_base_delay_ms(100)
            .with_backoff(BackoffStrategy::Linear)
            .with_jitter(JitterStrategy::None);
        assert_eq!(state.next_delay(&linear), Duration::from_millis(300));

        let constant = linear.with_backoff(BackoffStrategy::Constant);
        assert_eq!(state.next_delay(&constant), Duration::from_millis(100));
    }

    #[test]
    fn test_delay_capped_at_max() {
        let config = RetryConfig::new()
            .with_base_delay_ms(1000)
            .with_max_delay_ms(5000)
            .with_jitter(JitterStrategy::None);
        let mut state = RetryState::new();
        state.attempts = 11;

        assert_eq!(state.next_delay(&config), Duration::from_millis(5000));
    }

    #[test]
    fn test_full_jitter_bounded() {
        let config = RetryConfig::new()
            .with_base_delay_ms(100)
            .with_backoff(BackoffStrategy::Constant);
        let mut state = RetryState::new();
        state.attempts = 1;

        for _ in 0..20 {
            assert!(state.next_delay(&config) <= Duration::from_millis(100));
        }
    }

    #[test]
    fn test_decorrelated_jitter_stays_in_bounds() {
        let config = RetryConfig::new()
            .with_base_delay_ms(100)
            .with_max_delay_ms(1000)
            .with_jitter(JitterStrategy::Decorrelated);
        let mut state = RetryState::new();

        for attempt in 1..=20 {
            state.attempts = attempt;
            let delay = state.next_delay(&config);
            assert!(delay >= Duration::from_millis(100));
            assert!(delay <= Duration::from_millis(1000));
        }
    }

    #[test]
    fn test_should_retry_gives_up_at_budget() {
        let config = fast(2);
        let mut state = RetryState::new();

        state.attempts = 1;
        assert!(matches!(should_retry(&mut state, &config), RetryDecision::Retry(_)));
        state.attempts = 2;
        assert_eq!(should_retry(&mut state, &config), RetryDecision::GiveUp);
    }

    #[tokio::test]
    async fn test_success_first_try() {
        let token = CancellationToken::new();
        let result: Result<_, RetryError<String>> =
            with_retry(&fast(3), "op", &token, |_| true, |_| async { Ok(42) }).await;

        assert_eq!(result, Ok(Retried { value: 42, attempts: 1 }));
    }

    #[tokio::test]
    async fn test_success_after_transient_failures() {
        let token = CancellationToken::new();
        let result = with_retry(&fast(5), "op", &token, |_| true, |attempt| async move {
            if attempt < 3 {
                Err(format!("attempt {attempt}"))
            } else {
                Ok("done")
            }
        })
        .await;

        assert_eq!(result, Ok(Retried { value: "done", attempts: 3 }));
    }

    #[tokio::test]
    async fn test_exhausted_after_max_attempts() {
        let token = CancellationToken::new();
        let calls = Arc::new(AtomicU32::new(0));
        let counter = calls.clone();

        let result: Result<Retried<()>, _> = with_retry(&fast(3), "op", &token, |_| true, |_| {
            let counter = counter.clone();
            async move {
                counter.fetch_add(1, Ordering::SeqCst);
                Err("unavailable".to_string())
            }
        })
        .await;

        assert_eq!(
            result,
            Err(RetryError::Exhausted {
                attempts: 3,
                error: "unavailable".to_string()
            })
        );
        assert_eq!(calls.load(Ordering::SeqCst), 3);
    }

    #[tokio::test]
    async fn test_permanent_error_not_retried() {
        let token = CancellationToken::new();
        let result: Result<Retried<()>, _> = with_retry(
            &fast(5),
            "op",
            &token,
            |e: &String| e != "fatal",
            |_| async { Err("fatal".to_string()) },
        )
        .await;

        assert_eq!(result.unwrap_err().attempts(), 1);
    }

    #[tokio::test]
    async fn test_cancellation_stops_retries() {
        let token = CancellationToken::new();
        let config = RetryConfig::new()
            .with_max_attempts(10)
            .with_base_delay_ms(10_000)
            .with_jitter(JitterStrategy::None);

        let result: Result<Retried<()>, _> = with_retry(&config, "op", &token, |_| true, |_| {
            token.cancel("user abort");
            async { Err("flaky".to_string()) }
        })
        .await;

        assert_eq!(result, Err(RetryError::Cancelled { attempts: 1 }));
    }
}
