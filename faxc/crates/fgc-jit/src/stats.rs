//! Barrier Statistics
//!
//! Counters updated by the runtime routines and by emission. Metrics
//! tracked:
//! - Load and store stubs emitted
//! - Runtime routine invocations
//! - References healed, weak referents cleared
//! - Atomic retries and slow path escalations

use std::sync::atomic::{AtomicU64, Ordering};

/// Live counters, shared between threads
#[derive(Debug, Default)]
pub struct BarrierStats {
    load_stubs_emitted: AtomicU64,
    store_stubs_emitted: AtomicU64,
    load_slow_calls: AtomicU64,
    store_slow_calls: AtomicU64,
    references_healed: AtomicU64,
    weak_cleared: AtomicU64,
    atomic_retries: AtomicU64,
    slow_path_escalations: AtomicU64,
}

/// Point-in-time copy of `BarrierStats`
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, serde::Serialize)]
pub struct BarrierStatsSnapshot {
    pub load_stubs_emitted: u64,
    pub store_stubs_emitted: u64,
    pub load_slow_calls: u64,
    pub store_slow_calls: u64,
    pub references_healed: u64,
    pub weak_cleared: u64,
    pub atomic_retries: u64,
    pub slow_path_escalations: u64,
}

impl BarrierStats {
    pub fn new() -> Self {
        Self::default()
    }

    #[inline]
    pub fn record_load_stub(&self) {
        self.load_stubs_emitted.fetch_add(1, Ordering::Relaxed);
    }

    #[inline]
    pub fn record_store_stub(&self) {
        self.store_stubs_emitted.fetch_add(1, Ordering::Relaxed);
    }

    #[inline]
    pub fn record_load_slow_call(&self) {
        self.load_slow_calls.fetch_add(1, Ordering::Relaxed);
    }

    #[inline]
    pub fn record_store_slow_call(&self) {
        self.store_slow_calls.fetch_add(1, Ordering::Relaxed);
    }

    #[inline]
    pub fn record_healed(&self) {
        self.references_healed.fetch_add(1, Ordering::Relaxed);
    }

    #[inline]
    pub fn record_weak_cleared(&self) {
        self.weak_cleared.fetch_add(1, Ordering::Relaxed);
    }

    #[inline]
    pub fn record_atomic_retry(&self) {
        self.atomic_retries.fetch_add(1, Ordering::Relaxed);
    }

    #[inline]
    pub fn record_escalation(&self) {
        self.slow_path_escalations.fetch_add(1, Ordering::Relaxed);
    }

    pub fn snapshot(&self) -> BarrierStatsSnapshot {
        BarrierStatsSnapshot {
            load_stubs_emitted: self.load_stubs_emitted.load(Ordering::Relaxed),
            store_stubs_emitted: self.store_stubs_emitted.load(Ordering::Relaxed),
            load_slow_calls: self.load_slow_calls.load(Ordering::Relaxed),
            store_slow_calls: self.store_slow_calls.load(Ordering::Relaxed),
            references_healed: self.references_healed.load(Ordering::Relaxed),
            weak_cleared: self.weak_cleared.load(Ordering::Relaxed),
            atomic_retries: self.atomic_retries.load(Ordering::Relaxed),
            slow_path_escalations: self.slow_path_escalations.load(Ordering::Relaxed),
        }
    }

    pub fn reset(&self) {
        for counter in [
            &self.load_stubs_emitted,
            &self.store_stubs_emitted,
            &self.load_slow_calls,
            &self.store_slow_calls,
            &self.references_healed,
            &self.weak_cleared,
            &self.atomic_retries,
            &self.slow_path_escalations,
        ] {
            counter.store(0, Ordering::Relaxed);
        }
    }
}

impl BarrierStatsSnapshot {
    /// Runtime routine calls that escalated, as a percentage
    pub fn escalation_rate(&self) -> f64 {
        let calls = self.store_slow_calls;
        if calls == 0 {
            0.0
        } else {
            self.slow_path_escalations as f64 / calls as f64 * 100.0
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_snapshot_and_reset() {
        let stats = BarrierStats::new();
        stats.record_load_stub();
        stats.record_store_slow_call();
        stats.record_store_slow_call();
        stats.record_escalation();

        let snap = stats.snapshot();
        assert_eq!(snap.load_stubs_emitted, 1);
        assert_eq!(snap.store_slow_calls, 2);
        assert_eq!(snap.escalation_rate(), 50.0);

        stats.reset();
        assert_eq!(stats.snapshot(), BarrierStatsSnapshot::default());
    }
}
