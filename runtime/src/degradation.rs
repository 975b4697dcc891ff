//! Graceful-degradation counters: how often this instance has shed load
//! rather than failed outright (spec §4.4/§4.6 `QueueFull`/`PoolSaturated`),
//! surfaced to operators through the Service Manager rather than silently
//! swallowed at the call site that hit them.

use std::sync::atomic::{AtomicU64, Ordering};

use serde::Serialize;

#[derive(Debug, Default)]
pub struct DegradationCounters {
    queue_full: AtomicU64,
    pool_saturated: AtomicU64,
}

#[derive(Debug, Clone, Copy, Serialize)]
pub struct DegradationSnapshot {
    pub queue_full: u64,
    pub pool_saturated: u64,
}

impl DegradationCounters {
    pub fn record_queue_full(&self) {
        self.queue_full.fetch_add(1, Ordering::Relaxed);
    }

    pub fn record_pool_saturated(&self) {
        self.pool_saturated.fetch_add(1, Ordering::Relaxed);
    }

    pub fn snapshot(&self) -> DegradationSnapshot {
        DegradationSnapshot {
            queue_full: self.queue_full.load(Ordering::Relaxed),
            pool_saturated: self.pool_saturated.load(Ordering::Relaxed),
        }
    }
}
