//! Time budget helpers for deadline-bound calls.

use std::time::{Duration, Instant};

use anyhow::{Result, anyhow};

/// Return the remaining time budget until the provided deadline.
pub fn remaining_budget(deadline: Instant) -> Result<Duration> {
    let remaining = deadline
        .checked_duration_since(Instant::now())
        .unwrap_or(Duration::from_secs(0));
    if remaining.is_zero() {
        return Err(anyhow!("execution deadline exceeded"));
    }
    Ok(remaining)
}

/// Clamp a per-call timeout to whatever remains of an optional deadline.
pub fn bounded_timeout(timeout: Duration, deadline: Option<Instant>) -> Result<Duration> {
    match deadline {
        Some(deadline) => Ok(remaining_budget(deadline)?.min(timeout)),
        None => Ok(timeout),
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn expired_deadline_is_an_error() {
        let past = Instant::now() - Duration::from_secs(1);
        assert!(remaining_budget(past).is_err());
    }

    #[test]
    fn bounded_timeout_takes_the_smaller_budget() {
        let far = Instant::now() + Duration::from_secs(3600);
        let timeout = bounded_timeout(Duration::from_secs(5), Some(far)).expect("budget");
        assert_eq!(timeout, Duration::from_secs(5));
        let unbounded = bounded_timeout(Duration::from_secs(5), None).expect("budget");
        assert_eq!(unbounded, Duration::from_secs(5));
    }
}
