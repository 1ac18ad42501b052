//! Fibonacci reconnect backoff.

use std::time::Duration;

/// Returns the `n`th Fibonacci number with `fibonacci(1) == fibonacci(2) == 1`.
///
/// `fibonacci(0)` is `0`. Saturates instead of overflowing.
#[must_use]
pub fn fibonacci(n: u32) -> u64 {
    let (mut a, mut b) = (0u64, 1u64);
    for _ in 0..n {
        let next = a.saturating_add(b);
        a = b;
        b = next;
    }
    a
}

/// Delay schedule for reconnect attempts.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct ReconnectPolicy {
    pub initial: Duration,
    pub max_attempts: u32,
}

impl ReconnectPolicy {
    #[must_use]
    pub fn new(initial: Duration, max_attempts: u32) -> Self {
        Self {
            initial,
            max_attempts,
        }
    }

    /// Delay before the given 1-based attempt, or `None` once the attempt
    /// exceeds the cap.
    #[must_use]
    pub fn delay_for(&self, attempt: u32) -> Option<Duration> {
        if attempt == 0 || attempt > self.max_attempts {
            return None;
        }
        let factor = u32::try_from(fibonacci(attempt)).unwrap_or(u32::MAX);
        Some(self.initial.saturating_mul(factor))
    }
}
