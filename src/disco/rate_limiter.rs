use std::collections::HashMap;
use std::time::Duration;

use crate::ingress::ResourceKey;

/// Per key exponential backoff: `base * 2^failures`, capped at `max`.
#[derive(Debug)]
pub struct ExponentialFailureRateLimiter {
    base: Duration,
    max: Duration,
    failures: HashMap<ResourceKey, u32>,
}

impl ExponentialFailureRateLimiter {
    pub fn new(base: Duration, max: Duration) -> Self {
        Self {
            base,
            max,
            failures: HashMap::new(),
        }
    }

    /// Records one more failure for `key` and returns how long it has to wait.
    pub fn when(&mut self, key: &ResourceKey) -> Duration {
        let failures = self.failures.entry(key.clone()).or_default();
        let exp = *failures;
        *failures = failures.saturating_add(1);

        self.backoff(exp)
    }

    pub fn backoff(&self, exp: u32) -> Duration {
        1u32.checked_shl(exp)
            .and_then(|factor| self.base.checked_mul(factor))
            .map(|delay| delay.min(self.max))
            .unwrap_or(self.max)
    }

    pub fn forget(&mut self, key: &ResourceKey) {
        self.failures.remove(key);
    }

    pub fn num_requeues(&self, key: &ResourceKey) -> u32 {
        self.failures.get(key).copied().unwrap_or(0)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn doubles_up_to_ceiling() {
        let mut limiter =
            ExponentialFailureRateLimiter::new(Duration::from_secs(30), Duration::from_secs(600));
        let key = ResourceKey::from("default/my-ingress");

        let delays = (0..8).map(|_| limiter.when(&key)).collect::<Vec<_>>();

        assert_eq!(
            delays,
            [30, 60, 120, 240, 480, 600, 600, 600].map(Duration::from_secs)
        );
        assert_eq!(limiter.num_requeues(&key), 8);
    }

    #[test]
    fn monotonic_and_bounded() {
        let limiter =
            ExponentialFailureRateLimiter::new(Duration::from_millis(5), Duration::from_secs(600));

        let mut last = Duration::ZERO;
        for exp in 0..100 {
            let delay = limiter.backoff(exp);

            assert!(delay >= last, "backoff decreased at {}", exp);
            assert!(delay <= Duration::from_secs(600));

            last = delay;
        }

        assert_eq!(last, Duration::from_secs(600));
    }

    #[test]
    fn forget_resets() {
        let mut limiter =
            ExponentialFailureRateLimiter::new(Duration::from_secs(1), Duration::from_secs(10));
        let key = ResourceKey::from("default/a");
        let other = ResourceKey::from("default/b");

        limiter.when(&key);
        limiter.when(&key);
        limiter.when(&other);

        limiter.forget(&key);

        assert_eq!(limiter.num_requeues(&key), 0);
        assert_eq!(limiter.when(&key), Duration::from_secs(1));
        assert_eq!(limiter.num_requeues(&other), 1);
    }
}
