//! Deadline arithmetic shared by every blocking wait
//!
//! Timeouts are caller-supplied and may be arbitrarily large (`Duration::MAX`
//! is a common way to say "forever"). A deadline that `Instant` cannot
//! represent is treated as no deadline at all.

use std::time::{Duration, Instant};

/// Point in time `timeout` from now; `None` when it lies beyond what `Instant` can hold
pub fn deadline_after(timeout: Duration) -> Option<Instant> {
    Instant::now().checked_add(timeout)
}

/// Time left before `deadline`; unbounded deadlines report `Duration::MAX`
pub fn remaining(deadline: Option<Instant>) -> Duration {
    match deadline {
        Some(deadline) => deadline.saturating_duration_since(Instant::now()),
        None => Duration::MAX,
    }
}

pub fn expired(deadline: Option<Instant>) -> bool {
    deadline.is_some_and(|deadline| Instant::now() >= deadline)
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_unrepresentable_deadline_is_unbounded() {
        let deadline = deadline_after(Duration::MAX);
        assert!(deadline.is_none());
        assert_eq!(remaining(deadline), Duration::MAX);
        assert!(!expired(deadline));
    }

    #[test]
    fn test_bounded_deadline() {
        let deadline = deadline_after(Duration::from_secs(60));
        assert!(deadline.is_some());
        assert!(remaining(deadline) <= Duration::from_secs(60));
        assert!(!expired(deadline));

        let passed = deadline_after(Duration::ZERO);
        assert!(expired(passed));
        assert_eq!(remaining(passed), Duration::ZERO);
    }
}
