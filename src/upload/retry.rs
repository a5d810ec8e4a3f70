//! Retry backoff strategies
//!
//! The strategy only decides how long to wait between attempts. The number
//! of attempts is fixed by `UploadPolicy::max_retries`.

use rand::Rng;
use std::time::Duration;

#[derive(Debug, Clone, PartialEq, Eq, Default)]
pub enum BackoffStrategy {
    /// Retry immediately
    #[default]
    None,
    /// Same delay after every failed attempt
    Fixed(Duration),
    /// `base * 2^(attempt-1)`, capped at `max`. With `jitter`, a uniformly
    /// random delay in `[0, capped]` is used instead.
    Exponential {
        base: Duration,
        max: Duration,
        jitter: bool,
    },
}

impl BackoffStrategy {
    /// Delay to wait after failed `attempt` (1-based)
    pub fn delay(&self, attempt: u32) -> Duration {
        match *self {
            BackoffStrategy::None => Duration::ZERO,
            BackoffStrategy::Fixed(delay) => delay,
            BackoffStrategy::Exponential { base, max, jitter } => {
                let factor = 2u32.saturating_pow(attempt.saturating_sub(1));
                let capped = base.saturating_mul(factor).min(max);
                if jitter {
                    let ceiling = u64::try_from(capped.as_millis()).unwrap_or(u64::MAX);
                    Duration::from_millis(rand::rng().random_range(0..=ceiling))
                } else {
                    capped
                }
            }
        }
    }
}
