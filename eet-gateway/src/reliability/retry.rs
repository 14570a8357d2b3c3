//! Exponential backoff for optimistic transaction conflicts.

use std::time::Duration;

use thiserror::Error;

/// Configuration for retry behavior.
///
/// The delay between attempts grows exponentially up to `max_delay`.
///
/// # Examples
///
/// ```
/// use std::time::Duration;
///
/// use eet_gateway::reliability::RetryPolicy;
///
/// // Default policy: 8 attempts, 10ms initial delay, 200ms max delay
/// let policy = RetryPolicy::default();
/// assert_eq!(policy.max_attempts, 8);
///
/// let patient = RetryPolicy {
///     max_attempts: 16,
///     initial_delay: Duration::from_millis(5),
///     max_delay: Duration::from_secs(1),
///     backoff_multiplier: 2.0,
/// };
/// ```
#[derive(Debug, Clone, PartialEq)]
pub struct RetryPolicy {
    /// Maximum number of attempts, the first one included (default: 8)
    pub max_attempts: u32,
    /// Delay after the first conflict (default: 10ms)
    pub initial_delay: Duration,
    /// Upper bound for a single delay (default: 200ms)
    pub max_delay: Duration,
    /// Multiplier for exponential backoff (default: 2.0)
    pub backoff_multiplier: f64,
}

impl Default for RetryPolicy {
    fn default() -> Self {
        Self {
            max_attempts: 8,
            initial_delay: Duration::from_millis(10),
            max_delay: Duration::from_millis(200),
            backoff_multiplier: 2.0,
        }
    }
}

impl RetryPolicy {
    /// Creates a policy with custom maximum attempts.
    ///
    /// # Examples
    ///
    /// ```
    /// use eet_gateway::reliability::RetryPolicy;
    ///
    /// let policy = RetryPolicy::with_max_attempts(3);
    /// assert_eq!(policy.max_attempts, 3);
    /// ```
    #[must_use]
    pub fn with_max_attempts(max_attempts: u32) -> Self {
        Self { max_attempts, ..Self::default() }
    }

    /// Calculates delay after a failed attempt.
    ///
    /// delay = `initial_delay` * (multiplier ^ attempt), capped at `max_delay`.
    fn delay_for_attempt(&self, attempt: u32) -> Duration {
        let exponent = i32::try_from(attempt).unwrap_or(i32::MAX);
        #[allow(clippy::cast_precision_loss, reason = "acceptable for duration calculations")]
        let delay_ms = self.initial_delay.as_millis() as f64 * self.backoff_multiplier.powi(exponent);
        #[allow(
            clippy::cast_possible_truncation,
            clippy::cast_sign_loss,
            reason = "saturating float-to-int cast, capped below"
        )]
        let delay = Duration::from_millis(delay_ms as u64);
        delay.min(self.max_delay)
    }
}

/// Failure of a retried operation.
#[derive(Debug, Error)]
pub enum RetryError<E> {
    /// Every attempt failed with a retryable error.
    #[error("gave up after {attempts} attempts: {last}")]
    Exhausted {
        /// Attempts made.
        attempts: u32,
        /// Error of the final attempt.
        last: E,
    },

    /// An attempt failed with an error that is not retried.
    #[error("{0}")]
    Aborted(E),
}

/// Executes `operation` with exponential backoff between retryable failures.
///
/// At least one attempt is made even when `max_attempts` is zero.
///
/// # Examples
///
/// ```
/// use std::sync::{
///     Arc,
///     atomic::{AtomicU32, Ordering},
/// };
///
/// use eet_gateway::reliability::{RetryPolicy, retry_with_backoff};
///
/// # async fn example() -> Result<(), Box<dyn std::error::Error>> {
/// let policy = RetryPolicy::default();
/// let attempt = Arc::new(AtomicU32::new(0));
///
/// let result = retry_with_backoff(&policy, |e: &String| e == "conflict", || {
///     let attempt = Arc::clone(&attempt);
///     async move {
///         if attempt.fetch_add(1, Ordering::Relaxed) < 2 {
///             Err("conflict".to_owned())
///         } else {
///             Ok("committed")
///         }
///     }
/// })
/// .await?;
///
/// assert_eq!(result, "committed");
/// # Ok(())
/// # }
/// ```
pub async fn retry_with_backoff<F, Fut, T, E, R>(
    policy: &RetryPolicy,
    is_retryable: R,
    mut operation: F,
) -> Result<T, RetryError<E>>
where
    F: FnMut() -> Fut,
    Fut: Future<Output = Result<T, E>>,
    R: Fn(&E) -> bool,
    E: std::fmt::Display,
{
    let max_attempts = policy.max_attempts.max(1);
    let mut attempt = 0;

    loop {
        match operation().await {
            Ok(value) => {
                if attempt > 0 {
                    tracing::info!(attempt = attempt + 1, "operation succeeded after retry");
                }
                return Ok(value);
            }
            Err(error) if !is_retryable(&error) => return Err(RetryError::Aborted(error)),
            Err(error) => {
                tracing::warn!(
                    attempt = attempt + 1,
                    max_attempts,
                    error = %error,
                    "operation conflicted, retrying"
                );
                attempt += 1;
                if attempt >= max_attempts {
                    return Err(RetryError::Exhausted { attempts: attempt, last: error });
                }
                let delay = policy.delay_for_attempt(attempt - 1);
                tracing::debug!(delay_ms = delay.as_millis(), "sleeping before retry");
                tokio::time::sleep(delay).await;
            }
        }
    }
}
