//! Assumed-offline state of a remote repository
//!
//! A failed remote call flips the repository to assumed-offline for a
//! cooldown window. Once the window elapses the next call is let through; if
//! it succeeds the repository is back online.

use chrono::Utc;
use std::sync::atomic::{AtomicBool, AtomicI64, Ordering};

#[derive(Debug)]
pub struct OfflineState {
    key: String,
    period_millis: i64,
    assumed: AtomicBool,
    next_online_check_millis: AtomicI64,
}

impl OfflineState {
    pub fn new(key: impl Into<String>, period_secs: i64) -> Self {
        Self {
            key: key.into(),
            period_millis: period_secs.max(0).saturating_mul(1000),
            assumed: AtomicBool::new(false),
            next_online_check_millis: AtomicI64::new(0),
        }
    }

    /// Whether remote calls should currently be skipped
    pub fn is_assumed_offline(&self) -> bool {
        self.assumed.load(Ordering::Acquire)
            && Utc::now().timestamp_millis() < self.next_online_check_millis.load(Ordering::Acquire)
    }

    /// Flag set, whether or not the cooldown has elapsed
    pub fn is_flagged(&self) -> bool {
        self.assumed.load(Ordering::Acquire)
    }

    pub fn next_online_check_millis(&self) -> i64 {
        self.next_online_check_millis.load(Ordering::Acquire)
    }

    /// Record a failed remote call
    pub fn mark_failed(&self) {
        let next = Utc::now().timestamp_millis().saturating_add(self.period_millis);
        self.next_online_check_millis.store(next, Ordering::Release);
        if !self.assumed.swap(true, Ordering::AcqRel) {
            tracing::info!(
                "Remote repository {} assumed offline for {}s",
                self.key,
                self.period_millis / 1000
            );
        }
    }

    /// Record a successful remote call
    pub fn mark_online(&self) {
        if self.assumed.swap(false, Ordering::AcqRel) {
            tracing::info!("Remote repository {} is back online", self.key);
        }
    }

    /// Forget any failure
    pub fn reset(&self) {
        self.assumed.store(false, Ordering::Release);
        self.next_online_check_millis.store(0, Ordering::Release);
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_failure_and_recovery() {
        let state = OfflineState::new("central", 300);
        assert!(!state.is_assumed_offline());

        state.mark_failed();
        assert!(state.is_assumed_offline());
        assert!(state.next_online_check_millis() > Utc::now().timestamp_millis());

        state.mark_online();
        assert!(!state.is_assumed_offline());
        assert!(!state.is_flagged());
    }

    #[test]
    fn test_elapsed_cooldown_lets_calls_through() {
        let state = OfflineState::new("central", 0);
        state.mark_failed();
        // Zero cooldown: flagged but already due for a retry
        assert!(state.is_flagged());
        assert!(!state.is_assumed_offline());
    }
}
