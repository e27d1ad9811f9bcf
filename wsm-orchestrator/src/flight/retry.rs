use rand::Rng;
use std::time::{Duration, Instant};

/// How a step's retryable failures are retried before the flight gives up on it.
#[derive(Debug, Clone, PartialEq)]
pub enum RetryRule {
    None,
    Fixed {
        interval: Duration,
        max_count: u32,
    },
    ExponentialBackoff {
        initial: Duration,
        max_interval: Duration,
        max_operation_time: Duration,
    },
    /// Sleep a random multiple of `increment` in `[0, max_concurrency)`; spreads out
    /// callers that collide on the same row or remote object.
    RandomBackoff {
        increment: Duration,
        max_concurrency: u32,
        max_count: u32,
    },
}

impl RetryRule {
    /// Remote cloud calls: throttling and 5xx clear up within minutes.
    pub fn cloud() -> Self {
        Self::ExponentialBackoff {
            initial: Duration::from_secs(1),
            max_interval: Duration::from_secs(8),
            max_operation_time: Duration::from_secs(5 * 60),
        }
    }

    /// Project creation and deletion.
    pub fn cloud_long() -> Self {
        Self::ExponentialBackoff {
            initial: Duration::from_secs(1),
            max_interval: Duration::from_secs(60),
            max_operation_time: Duration::from_secs(20 * 60),
        }
    }

    pub fn broker() -> Self {
        Self::ExponentialBackoff {
            initial: Duration::from_secs(1),
            max_interval: Duration::from_secs(8),
            max_operation_time: Duration::from_secs(2 * 60),
        }
    }

    pub fn short_database() -> Self {
        Self::Fixed {
            interval: Duration::from_secs(1),
            max_count: 5,
        }
    }

    /// Row-level races between concurrent flights.
    pub fn row_contention() -> Self {
        Self::RandomBackoff {
            increment: Duration::from_millis(100),
            max_concurrency: 10,
            max_count: 10,
        }
    }

    pub fn start(&self) -> RetryState {
        RetryState {
            rule: self.clone(),
            attempts: 0,
            started: Instant::now(),
        }
    }
}

/// Per-attempt bookkeeping for one step execution.
#[derive(Debug)]
pub struct RetryState {
    rule: RetryRule,
    attempts: u32,
    started: Instant,
}

impl RetryState {
    pub fn attempts(&self) -> u32 {
        self.attempts
    }

    /// Delay before the next attempt, or `None` once the rule is exhausted.
    pub fn next_delay(&mut self) -> Option<Duration> {
        let delay = match &self.rule {
            RetryRule::None => None,
            RetryRule::Fixed {
                interval,
                max_count,
            } => (self.attempts < *max_count).then_some(*interval),
            RetryRule::ExponentialBackoff {
                initial,
                max_interval,
                max_operation_time,
            } => {
                let factor = 2u32.saturating_pow(self.attempts.min(16));
                let delay = initial.saturating_mul(factor).min(*max_interval);
                (self.started.elapsed() + delay <= *max_operation_time).then_some(delay)
            }
            RetryRule::RandomBackoff {
                increment,
                max_concurrency,
                max_count,
            } => (self.attempts < *max_count).then(|| {
                let slot = rand::rng().random_range(0..(*max_concurrency).max(1));
                increment.saturating_mul(slot)
            }),
        };

        if delay.is_some() {
            self.attempts += 1;
        }
        delay
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_none_never_retries() {
        let mut state = RetryRule::None.start();
        assert_eq!(state.next_delay(), None);
        assert_eq!(state.attempts(), 0);
    }

    #[test]
    fn test_fixed_stops_at_max_count() {
        let mut state = RetryRule::Fixed {
            interval: Duration::from_millis(5),
            max_count: 2,
        }
        .start();
        assert_eq!(state.next_delay(), Some(Duration::from_millis(5)));
        assert_eq!(state.next_delay(), Some(Duration::from_millis(5)));
        assert_eq!(state.next_delay(), None);
        assert_eq!(state.attempts(), 2);
    }

    #[test]
    fn test_exponential_doubles_and_caps() {
        let mut state = RetryRule::ExponentialBackoff {
            initial: Duration::from_secs(1),
            max_interval: Duration::from_secs(4),
            max_operation_time: Duration::from_secs(3600),
        }
        .start();
        let delays: Vec<_> = (0..4).filter_map(|_| state.next_delay()).collect();
        assert_eq!(
            delays,
            vec![
                Duration::from_secs(1),
                Duration::from_secs(2),
                Duration::from_secs(4),
                Duration::from_secs(4)
            ]
        );
    }

    #[test]
    fn test_exponential_respects_operation_time() {
        let mut state = RetryRule::ExponentialBackoff {
            initial: Duration::from_secs(10),
            max_interval: Duration::from_secs(10),
            max_operation_time: Duration::from_secs(5),
        }
        .start();
        assert_eq!(state.next_delay(), None);
    }

    #[test]
    fn test_random_backoff_bounded() {
        let rule = RetryRule::RandomBackoff {
            increment: Duration::from_millis(10),
            max_concurrency: 4,
            max_count: 3,
        };
        let mut state = rule.start();
        for _ in 0..3 {
            let delay = state.next_delay().expect("Expected a delay");
            assert!(delay < Duration::from_millis(40));
        }
        assert_eq!(state.next_delay(), None);
    }
}
