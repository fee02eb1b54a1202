//! Connection and pool counters.
//!
//! Plain relaxed atomics: they feed reports and never gate decisions.

use std::sync::atomic::{AtomicU64, AtomicUsize, Ordering};

use serde::Serialize;

/// Per-server connection counters, updated by sessions.
#[derive(Debug, Default)]
pub struct ConnectionStats {
    n_current: AtomicUsize,
    n_connections: AtomicU64,
    n_current_ops: AtomicUsize,
    packets: AtomicU64,
}

/// Point-in-time copy of [`ConnectionStats`].
#[derive(Clone, Copy, Debug, Default, PartialEq, Eq, Serialize)]
pub struct ConnectionStatsSnapshot {
    pub current: usize,
    pub total: u64,
    pub current_ops: usize,
    pub packets: u64,
}

impl ConnectionStats {
    /// A brand new backend connection was established.
    pub fn connection_opened(&self) {
        self.n_current.fetch_add(1, Ordering::Relaxed);
        self.n_connections.fetch_add(1, Ordering::Relaxed);
    }

    /// A connection stopped being used by a session.
    pub fn connection_closed(&self) {
        saturating_dec(&self.n_current);
    }

    /// A pooled connection was handed to a session.
    pub(crate) fn connection_reused(&self) {
        self.n_current.fetch_add(1, Ordering::Relaxed);
    }

    pub fn operation_started(&self) {
        self.n_current_ops.fetch_add(1, Ordering::Relaxed);
    }

    pub fn operation_finished(&self) {
        saturating_dec(&self.n_current_ops);
    }

    pub fn add_packets(&self, n: u64) {
        self.packets.fetch_add(n, Ordering::Relaxed);
    }

    pub fn current(&self) -> usize {
        self.n_current.load(Ordering::Relaxed)
    }

    pub fn snapshot(&self) -> ConnectionStatsSnapshot {
        ConnectionStatsSnapshot {
            current: self.n_current.load(Ordering::Relaxed),
            total: self.n_connections.load(Ordering::Relaxed),
            current_ops: self.n_current_ops.load(Ordering::Relaxed),
            packets: self.packets.load(Ordering::Relaxed),
        }
    }
}

/// Per-server pool counters, updated by the shards.
#[derive(Debug, Default)]
pub struct PoolStats {
    n_persistent: AtomicUsize,
    n_from_pool: AtomicU64,
    persistmax: AtomicUsize,
}

/// Point-in-time copy of [`PoolStats`].
#[derive(Clone, Copy, Debug, Default, PartialEq, Eq, Serialize)]
pub struct PoolStatsSnapshot {
    /// Connections currently idle in the pool, across all shards.
    pub pooled: usize,
    /// Connections handed out from the pool over the server's lifetime.
    pub served_from_pool: u64,
    /// Largest shard size observed by a sweep.
    pub max_pooled: usize,
}

impl PoolStats {
    /// Count one more pooled connection if fewer than `limit` are pooled.
    /// Returns the new count, or `None` when the pool is full.
    pub(crate) fn try_reserve(&self, limit: usize) -> Option<usize> {
        self.n_persistent
            .fetch_update(Ordering::Relaxed, Ordering::Relaxed, |v| {
                (v < limit).then_some(v + 1)
            })
            .ok()
            .map(|prev| prev + 1)
    }

    pub(crate) fn pooled_taken(&self) {
        saturating_dec(&self.n_persistent);
        self.n_from_pool.fetch_add(1, Ordering::Relaxed);
    }

    pub(crate) fn pooled_removed(&self, n: usize) {
        if n > 0 {
            let _ = self
                .n_persistent
                .fetch_update(Ordering::Relaxed, Ordering::Relaxed, |v| {
                    Some(v.saturating_sub(n))
                });
        }
    }

    pub(crate) fn observe_size(&self, size: usize) {
        self.persistmax.fetch_max(size, Ordering::Relaxed);
    }

    pub fn pooled(&self) -> usize {
        self.n_persistent.load(Ordering::Relaxed)
    }

    pub fn snapshot(&self) -> PoolStatsSnapshot {
        PoolStatsSnapshot {
            pooled: self.n_persistent.load(Ordering::Relaxed),
            served_from_pool: self.n_from_pool.load(Ordering::Relaxed),
            max_pooled: self.persistmax.load(Ordering::Relaxed),
        }
    }
}

fn saturating_dec(counter: &AtomicUsize) {
    let _ = counter.fetch_update(Ordering::Relaxed, Ordering::Relaxed, |v| {
        Some(v.saturating_sub(1))
    });
}
