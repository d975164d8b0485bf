use std::time::Duration;

/// Reconnect backoff shared by the store supervisor and the bus bridge.
///
/// Retry-forever with exponential backoff: the delay doubles per attempt from
/// `initial` until it reaches `max`, where it stays.
#[derive(Debug, Clone, Copy)]
pub struct RetryPolicy {
    pub initial: Duration,
    pub max: Duration,
}

impl RetryPolicy {
    pub fn delay(&self, attempt: u32) -> Duration {
        let factor = 2u64.saturating_pow(attempt);
        let delay = self.initial.saturating_mul(factor.min(u32::MAX as u64) as u32);
        delay.min(self.max)
    }
}

impl Default for RetryPolicy {
    fn default() -> Self {
        Self {
            initial: Duration::from_secs(1),
            max: Duration::from_secs(30),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn backoff_doubles_until_capped() {
        let policy = RetryPolicy::default();
        assert_eq!(policy.delay(0), Duration::from_secs(1));
        assert_eq!(policy.delay(1), Duration::from_secs(2));
        assert_eq!(policy.delay(2), Duration::from_secs(4));
        assert_eq!(policy.delay(4), Duration::from_secs(16));
        assert_eq!(policy.delay(5), Duration::from_secs(30));
        assert_eq!(policy.delay(40), Duration::from_secs(30));
    }

    #[test]
    fn large_attempt_counts_do_not_overflow() {
        let policy = RetryPolicy {
            initial: Duration::from_secs(3),
            max: Duration::from_secs(60),
        };
        assert_eq!(policy.delay(u32::MAX), Duration::from_secs(60));
    }
}
