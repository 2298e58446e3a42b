use crate::config::RateLimit;
use rand::rngs::StdRng;
use rand::{Rng, SeedableRng};
use std::sync::Mutex;
use std::time::Duration;
use tokio::time::sleep;
use tracing::trace;

/// Pauses the calling flow for a pseudo-random duration before each fetch.
///
/// The only state kept between calls is the random source.
pub struct RateLimiter {
    min_delay_ms: u64,
    max_delay_ms: u64,
    rng: Mutex<StdRng>,
}

impl RateLimiter {
    pub fn new(config: &RateLimit) -> Self {
        Self::with_rng(config, StdRng::from_os_rng())
    }

    /// Builds a limiter over a caller-supplied random source, e.g. a seeded one.
    pub fn with_rng(config: &RateLimit, rng: StdRng) -> Self {
        let (min, max) = if config.min_delay_ms <= config.max_delay_ms {
            (config.min_delay_ms, config.max_delay_ms)
        } else {
            (config.max_delay_ms, config.min_delay_ms)
        };
        Self {
            min_delay_ms: min,
            max_delay_ms: max,
            rng: Mutex::new(rng),
        }
    }

    /// A limiter that never waits.
    pub fn disabled() -> Self {
        Self::with_rng(
            &RateLimit {
                min_delay_ms: 0,
                max_delay_ms: 0,
            },
            StdRng::seed_from_u64(0),
        )
    }

    /// Draws the next delay without sleeping.
    pub fn next_delay(&self) -> Duration {
        if self.max_delay_ms == 0 {
            return Duration::ZERO;
        }
        let millis = match self.rng.lock() {
            Ok(mut rng) => rng.random_range(self.min_delay_ms..=self.max_delay_ms),
            Err(poisoned) => poisoned
                .into_inner()
                .random_range(self.min_delay_ms..=self.max_delay_ms),
        };
        Duration::from_millis(millis)
    }

    /// Blocks the calling flow for a random delay within the configured range.
    pub async fn throttle(&self) {
        let delay = self.next_delay();
        if delay.is_zero() {
            return;
        }
        trace!(delay_ms = delay.as_millis() as u64, "Throttling before next request");
        sleep(delay).await;
    }
}
