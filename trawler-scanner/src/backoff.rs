use std::time::Duration;

/// Linear retry backoff: the delay before retry `k` is `base * k`,
/// stretched by `rate_limit_multiplier` when the server answered 429,
/// and capped at `max`.
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct Backoff {
    base: Duration,
    max: Option<Duration>,
    rate_limit_multiplier: u32,
}

impl Backoff {
    pub const fn new(base: Duration) -> Self {
        Self {
            base,
            max: None,
            rate_limit_multiplier: 2,
        }
    }

    pub fn with_max(mut self, max: Duration) -> Self {
        self.max = Some(max);
        self
    }

    pub fn with_rate_limit_multiplier(mut self, multiplier: u32) -> Self {
        self.rate_limit_multiplier = multiplier.max(1);
        self
    }

    pub fn base(&self) -> Duration {
        self.base
    }

    /// Delay before retry `retry` (1-based).
    pub fn delay(&self, retry: u32, rate_limited: bool) -> Duration {
        let mut delay = self.base.saturating_mul(retry.max(1));
        if rate_limited {
            delay = delay.saturating_mul(self.rate_limit_multiplier);
        }
        match self.max {
            Some(max) => delay.min(max),
            None => delay,
        }
    }
}

impl Default for Backoff {
    fn default() -> Self {
        Self::new(Duration::from_secs(2))
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_linear_growth() {
        let backoff = Backoff::new(Duration::from_millis(100));
        assert_eq!(backoff.delay(1, false).as_millis(), 100);
        assert_eq!(backoff.delay(2, false).as_millis(), 200);
        assert_eq!(backoff.delay(3, false).as_millis(), 300);
    }

    #[test]
    fn test_non_decreasing() {
        let backoff = Backoff::new(Duration::from_millis(250)).with_max(Duration::from_secs(1));
        let delays: Vec<Duration> = (1..=10).map(|k| backoff.delay(k, false)).collect();
        for pair in delays.windows(2) {
            assert!(pair[0] <= pair[1], "{:?} > {:?}", pair[0], pair[1]);
        }
    }

    #[test]
    fn test_rate_limited_is_longer() {
        let backoff = Backoff::new(Duration::from_millis(100)).with_rate_limit_multiplier(3);
        assert_eq!(backoff.delay(2, true).as_millis(), 600);
        assert!(backoff.delay(1, true) > backoff.delay(1, false));
    }

    #[test]
    fn test_max_cap() {
        let backoff = Backoff::new(Duration::from_millis(100)).with_max(Duration::from_millis(250));
        assert_eq!(backoff.delay(10, false).as_millis(), 250);
        assert_eq!(backoff.delay(10, true).as_millis(), 250);
    }
}
