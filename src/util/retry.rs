//! Retry with exponential backoff and jitter.

use std::time::Duration;

use crate::error::NormalizedError;

/// Retry policy configuration.
#[derive(Debug, Clone)]
pub struct RetryPolicy {
    /// Maximum number of attempts (including the first).
    pub max_attempts: u32,
    /// Initial backoff duration.
    pub initial_backoff: Duration,
    /// Maximum backoff duration.
    pub max_backoff: Duration,
    /// Backoff multiplier.
    pub multiplier: f64,
}

impl Default for RetryPolicy {
    fn default() -> Self {
        Self {
            max_attempts: 3,
            initial_backoff: Duration::from_millis(500),
            max_backoff: Duration::from_secs(30),
            multiplier: 2.0,
        }
    }
}

impl RetryPolicy {
    /// Whether another attempt is allowed after `attempt` (1-based) failed
    /// with `error`.
    pub fn should_retry(&self, attempt: u32, error: &NormalizedError) -> bool {
        error.retryable && attempt < self.max_attempts
    }

    /// Delay before the attempt following `attempt` (1-based).
    ///
    /// A backend-provided retry hint wins over the computed backoff, clamped
    /// to `max_backoff`.
    pub fn delay_for(&self, attempt: u32, error: &NormalizedError) -> Duration {
        if let Some(ms) = error.retry_after_ms {
            return Duration::from_millis(ms).min(self.max_backoff);
        }
        let exponent = attempt.saturating_sub(1).min(16) as i32;
        let base = (self.initial_backoff.as_secs_f64() * self.multiplier.powi(exponent))
            .min(self.max_backoff.as_secs_f64());
        // Jitter: 75%-125% of backoff
        let jitter_factor = 0.75 + (rand_factor() * 0.5);
        Duration::from_secs_f64((base * jitter_factor).min(self.max_backoff.as_secs_f64()))
    }
}

/// Simple pseudo-random factor [0, 1) without pulling in rand crate.
fn rand_factor() -> f64 {
    use std::collections::hash_map::DefaultHasher;
    use std::hash::{Hash, Hasher};

    let mut hasher = DefaultHasher::new();
    std::time::SystemTime::now()
        .duration_since(std::time::UNIX_EPOCH)
        .unwrap_or_default()
        .as_nanos()
        .hash(&mut hasher);
    std::thread::current().id().hash(&mut hasher);

    let hash = hasher.finish();
    (hash % 10000) as f64 / 10000.0
}
