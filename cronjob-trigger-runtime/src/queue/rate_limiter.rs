use ahash::AHashMap;
use std::{hash::Hash, time::Duration};

/// Decides how long a failed item waits before it is retried
pub trait RateLimiter<T>: Send {
    /// Record another failure of `item` and return how long to wait before retrying it
    fn when(&mut self, item: &T) -> Duration;

    /// Stop tracking `item`, resetting its failure count
    fn forget(&mut self, item: &T);

    /// How many times `item` has failed since it was last forgotten
    fn num_requeues(&self, item: &T) -> u32;
}

/// Per-item exponential backoff: `base * 2^failures`, capped at `max`
#[derive(Debug)]
pub struct ItemExponentialBackoff<T> {
    base: Duration,
    max: Duration,
    failures: AHashMap<T, u32>,
}

impl<T> ItemExponentialBackoff<T> {
    /// Backoff starting at `base` and never exceeding `max`
    #[must_use]
    pub fn new(base: Duration, max: Duration) -> Self {
        Self {
            base,
            max,
            failures: AHashMap::new(),
        }
    }
}

impl<T> Default for ItemExponentialBackoff<T> {
    /// 5ms doubling up to 1000s
    fn default() -> Self {
        Self::new(Duration::from_millis(5), Duration::from_secs(1000))
    }
}

impl<T: Hash + Eq + Clone + Send> RateLimiter<T> for ItemExponentialBackoff<T> {
    fn when(&mut self, item: &T) -> Duration {
        let failures = self.failures.entry(item.clone()).or_insert(0);
        let exp = *failures;
        *failures = failures.saturating_add(1);
        2u32.checked_pow(exp)
            .and_then(|factor| self.base.checked_mul(factor))
            .map_or(self.max, |delay| delay.min(self.max))
    }

    fn forget(&mut self, item: &T) {
        self.failures.remove(item);
    }

    fn num_requeues(&self, item: &T) -> u32 {
        self.failures.get(item).copied().unwrap_or(0)
    }
}
