use crate::{config::RetryConfig, platform::Clock};

/// Delay strategy applied before every attempt after the first.
pub trait Backoff {
    fn wait(&mut self, attempt: u32);
}

pub struct FixedBackoff<C> {
    clock: C,
    delay_ms: u64,
}

impl<C: Clock> FixedBackoff<C> {
    pub fn new(clock: C, delay_ms: u64) -> Self {
        Self { clock, delay_ms }
    }
}

impl<C: Clock> Backoff for FixedBackoff<C> {
    fn wait(&mut self, _attempt: u32) {
        if self.delay_ms > 0 {
            self.clock.sleep_ms(self.delay_ms);
        }
    }
}

#[derive(Debug, Clone, Copy, Default)]
pub struct NoBackoff;

impl Backoff for NoBackoff {
    fn wait(&mut self, _attempt: u32) {}
}

/// Bounded retry. Both callbacks share a mutable context so the attempt and
/// the recovery step can drive the same resource.
pub struct RetryPolicy {
    max_attempts: u32,
    backoff: Box<dyn Backoff>,
}

impl RetryPolicy {
    pub fn new(max_attempts: u32, backoff: impl Backoff + 'static) -> Self {
        Self {
            max_attempts: max_attempts.max(1),
            backoff: Box::new(backoff),
        }
    }

    pub fn from_config<C: Clock + 'static>(config: &RetryConfig, clock: C) -> Self {
        Self::new(
            config.max_attempts,
            FixedBackoff::new(clock, config.delay_ms),
        )
    }

    pub fn max_attempts(&self) -> u32 {
        self.max_attempts
    }

    /// Runs `attempt` until it succeeds or `max_attempts` is reached. Before
    /// each retry the backoff runs, then `on_retry`; when `on_retry` returns
    /// false the operation is abandoned without further attempts.
    pub fn execute<Ctx: ?Sized>(
        &mut self,
        ctx: &mut Ctx,
        mut attempt: impl FnMut(&mut Ctx, u32) -> bool,
        mut on_retry: impl FnMut(&mut Ctx, u32) -> bool,
    ) -> bool {
        for index in 0..self.max_attempts {
            if index > 0 {
                self.backoff.wait(index);
                if !on_retry(ctx, index) {
                    return false;
                }
            }
            if attempt(ctx, index) {
                return true;
            }
        }
        false
    }
}

#[cfg(test)]
mod tests {
    use pretty_assertions::assert_eq;

    use super::*;
    use crate::testing::FakeClock;

    #[test]
    fn always_failing_attempt_retries_twice_of_three() {
        let mut policy = RetryPolicy::new(3, NoBackoff);
        let mut log = Vec::new();

        let ok = policy.execute(
            &mut log,
            |log, index| {
                log.push(format!("attempt {index}"));
                false
            },
            |log, index| {
                log.push(format!("retry {index}"));
                true
            },
        );

        assert!(!ok);
        assert_eq!(log, vec!["attempt 0", "retry 1", "attempt 1", "retry 2", "attempt 2"]);
    }

    #[test]
    fn first_success_skips_retry_hook() {
        let mut policy = RetryPolicy::new(3, NoBackoff);
        let mut retries = 0;

        let ok = policy.execute(
            &mut retries,
            |_, _| true,
            |retries, _| {
                *retries += 1;
                true
            },
        );

        assert!(ok);
        assert_eq!(retries, 0);
    }

    #[test]
    fn refused_retry_abandons_remaining_attempts() {
        let mut policy = RetryPolicy::new(5, NoBackoff);
        let mut attempts = 0;

        let ok = policy.execute(
            &mut attempts,
            |attempts, _| {
                *attempts += 1;
                false
            },
            |_, _| false,
        );

        assert!(!ok);
        assert_eq!(attempts, 1);
    }

    #[test]
    fn fixed_backoff_waits_between_attempts_only() {
        let clock = FakeClock::new();
        let mut policy = RetryPolicy::from_config(
            &RetryConfig {
                max_attempts: 3,
                delay_ms: 500,
            },
            clock.clone(),
        );

        let ok = policy.execute(&mut (), |_, index| index == 2, |_, _| true);

        assert!(ok);
        assert_eq!(clock.now(), 1_000);
    }
}
