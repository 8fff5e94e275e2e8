//! Lock-free run counters.

use std::sync::atomic::{AtomicU64, Ordering};

/// Counters accumulated across a run; cheap to share, snapshot on demand.
#[derive(Debug, Default)]
pub struct EngineMetrics {
    resources_enumerated: AtomicU64,
    resources_matched: AtomicU64,
    actions_succeeded: AtomicU64,
    actions_failed: AtomicU64,
    policies_failed: AtomicU64,
}

impl EngineMetrics {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn record_enumerated(&self, count: usize) {
        self.resources_enumerated
            .fetch_add(count as u64, Ordering::Relaxed);
    }

    pub fn record_matched(&self, count: usize) {
        self.resources_matched
            .fetch_add(count as u64, Ordering::Relaxed);
    }

    pub fn record_action_outcomes(&self, succeeded: usize, failed: usize) {
        self.actions_succeeded
            .fetch_add(succeeded as u64, Ordering::Relaxed);
        self.actions_failed.fetch_add(failed as u64, Ordering::Relaxed);
    }

    pub fn record_policy_failure(&self) {
        self.policies_failed.fetch_add(1, Ordering::Relaxed);
    }

    pub fn snapshot(&self) -> MetricsSnapshot {
        MetricsSnapshot {
            resources_enumerated: self.resources_enumerated.load(Ordering::Relaxed),
            resources_matched: self.resources_matched.load(Ordering::Relaxed),
            actions_succeeded: self.actions_succeeded.load(Ordering::Relaxed),
            actions_failed: self.actions_failed.load(Ordering::Relaxed),
            policies_failed: self.policies_failed.load(Ordering::Relaxed),
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub struct MetricsSnapshot {
    pub resources_enumerated: u64,
    pub resources_matched: u64,
    pub actions_succeeded: u64,
    pub actions_failed: u64,
    pub policies_failed: u64,
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_counters_accumulate() {
        let metrics = EngineMetrics::new();
        metrics.record_enumerated(10);
        metrics.record_enumerated(5);
        metrics.record_matched(3);
        metrics.record_action_outcomes(2, 1);
        metrics.record_policy_failure();

        let snap = metrics.snapshot();
        assert_eq!(snap.resources_enumerated, 15);
        assert_eq!(snap.resources_matched, 3);
        assert_eq!(snap.actions_succeeded, 2);
        assert_eq!(snap.actions_failed, 1);
        assert_eq!(snap.policies_failed, 1);
    }
}
