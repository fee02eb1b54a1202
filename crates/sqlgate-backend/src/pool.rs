//! Sharded persistent connection pool.
//!
//! Idle, already authenticated backend connections are kept per routing
//! worker. A backend connection is bound to the event loop of the worker that
//! opened it, so shard `i` is only ever touched by worker `i`:
//!
//! ```text
//! session on worker i
//!   → acquire(i, user, peer, protocol)
//!     → match in shard i → hand over (pooled -1, active +1)
//!     → no match         → None, session opens a fresh connection
//!   → release(i, conn)   → push to front of shard i (pooled +1)
//!
//! maintenance
//!   → broadcast_evict(max_idle) → every worker sweeps its own shard once
//! ```
//!
//! Each shard sits behind its own mutex only to make the pool `Sync`; with
//! the ownership rule above the lock is never contended.

use std::collections::VecDeque;
use std::fmt;
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::{Arc, Mutex, MutexGuard, PoisonError};
use std::time::{Duration, Instant};

use crate::stats::{ConnectionStats, PoolStats};
use crate::status::StatusState;
use crate::worker::{RoutingWorkers, WorkerId, current_worker_id};

/// Transport of an established backend connection.
pub trait ConnectionBackend: Send + fmt::Debug {
    /// Close the underlying transport.
    fn close(&mut self);
}

static NEXT_CONNECTION_ID: AtomicU64 = AtomicU64::new(1);

/// An established backend connection, either idle in a shard or in use by a
/// session.
#[derive(Debug)]
pub struct PooledConnection {
    id: u64,
    server: String,
    user: String,
    peer: String,
    protocol: String,
    created_at: Instant,
    idle_since: Instant,
    errored: bool,
    /// Shard holding the connection while it is idle.
    pooled_on: Option<WorkerId>,
    backend: Box<dyn ConnectionBackend>,
}

impl PooledConnection {
    pub fn new(
        server: &str,
        user: &str,
        peer: &str,
        protocol: &str,
        backend: Box<dyn ConnectionBackend>,
    ) -> Self {
        let now = Instant::now();
        Self {
            id: NEXT_CONNECTION_ID.fetch_add(1, Ordering::Relaxed),
            server: server.to_string(),
            user: user.to_string(),
            peer: peer.to_string(),
            protocol: protocol.to_string(),
            created_at: now,
            idle_since: now,
            errored: false,
            pooled_on: None,
            backend,
        }
    }

    pub fn id(&self) -> u64 {
        self.id
    }

    pub fn server(&self) -> &str {
        &self.server
    }

    pub fn user(&self) -> &str {
        &self.user
    }

    pub fn peer(&self) -> &str {
        &self.peer
    }

    pub fn protocol(&self) -> &str {
        &self.protocol
    }

    pub fn created_at(&self) -> Instant {
        self.created_at
    }

    pub fn idle_since(&self) -> Instant {
        self.idle_since
    }

    pub fn is_errored(&self) -> bool {
        self.errored
    }

    /// Flag the connection as failed; it will never be handed out again.
    pub fn mark_error(&mut self) {
        self.errored = true;
    }

    /// Shard the connection is idling in; `None` once handed to a session.
    pub fn pooled_on(&self) -> Option<WorkerId> {
        self.pooled_on
    }

    pub fn backend_mut(&mut self) -> &mut dyn ConnectionBackend {
        self.backend.as_mut()
    }

    /// Close the transport and drop the connection.
    pub fn close(mut self) {
        self.backend.close();
    }

    fn matches(&self, user: &str, peer: &str, protocol: &str) -> bool {
        !self.errored && self.user == user && self.peer == peer && self.protocol == protocol
    }
}

/// What a shard sweep removes.
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub struct EvictionPolicy {
    /// Remove connections idle for longer than this.
    pub max_idle: Duration,
    /// Keep at most this many connections in the shard.
    pub max_pooled: Option<usize>,
    /// Remove everything while the server is not running.
    pub require_running: bool,
    /// Remove everything.
    pub clean_all: bool,
}

impl EvictionPolicy {
    /// Remove only errored and stale connections.
    pub fn idle(max_idle: Duration) -> Self {
        Self {
            max_idle,
            max_pooled: None,
            require_running: false,
            clean_all: false,
        }
    }

    pub fn clean_all() -> Self {
        Self {
            clean_all: true,
            ..Self::idle(Duration::ZERO)
        }
    }
}

#[derive(Debug, Default)]
struct Shard {
    /// Most recently released first.
    idle: VecDeque<PooledConnection>,
}

/// Idle connections of one backend server, one shard per routing worker.
pub struct ConnectionPool {
    server: String,
    shards: Vec<Mutex<Shard>>,
    status: Arc<StatusState>,
    conn_stats: Arc<ConnectionStats>,
    stats: PoolStats,
}

impl ConnectionPool {
    pub fn new(
        server: &str,
        shard_count: usize,
        status: Arc<StatusState>,
        conn_stats: Arc<ConnectionStats>,
    ) -> Self {
        Self {
            server: server.to_string(),
            shards: (0..shard_count).map(|_| Mutex::default()).collect(),
            status,
            conn_stats,
            stats: PoolStats::default(),
        }
    }

    pub fn shard_count(&self) -> usize {
        self.shards.len()
    }

    pub fn stats(&self) -> &PoolStats {
        &self.stats
    }

    /// Connections currently idle across all shards.
    pub fn pooled(&self) -> usize {
        self.stats.pooled()
    }

    /// Connections idle in one shard.
    pub fn shard_len(&self, shard_id: WorkerId) -> usize {
        self.shard(shard_id).map(|s| s.idle.len()).unwrap_or(0)
    }

    /// Take an idle connection matching `user`, `peer` and `protocol` from
    /// shard `shard_id`.
    ///
    /// Returns `None` when nothing matches or the server is not running; the
    /// caller then opens a fresh connection.
    pub fn acquire(
        &self,
        shard_id: WorkerId,
        user: &str,
        peer: &str,
        protocol: &str,
    ) -> Option<PooledConnection> {
        if user.is_empty() || peer.is_empty() || !self.status.is_running() {
            return None;
        }

        let mut conn = {
            let mut shard = self.shard(shard_id)?;
            let pos = shard
                .idle
                .iter()
                .position(|c| c.matches(user, peer, protocol))?;
            shard.idle.remove(pos)?
        };

        conn.pooled_on = None;
        self.stats.pooled_taken();
        self.conn_stats.connection_reused();

        tracing::debug!(
            server = %self.server,
            shard = shard_id,
            connection = conn.id,
            user,
            peer,
            "reused pooled connection"
        );
        Some(conn)
    }

    /// Put `conn` at the front of shard `shard_id`.
    ///
    /// Gives the connection back if the shard does not exist.
    pub fn release(
        &self,
        shard_id: WorkerId,
        conn: PooledConnection,
    ) -> Result<(), PooledConnection> {
        self.release_bounded(shard_id, conn, usize::MAX)
    }

    /// Like [`release`](Self::release), but only while fewer than `limit`
    /// connections are pooled across all shards.
    ///
    /// The slot is counted before the push, so concurrent releases on other
    /// workers cannot take the pool past `limit`.
    pub fn release_bounded(
        &self,
        shard_id: WorkerId,
        mut conn: PooledConnection,
        limit: usize,
    ) -> Result<(), PooledConnection> {
        let Some(pooled) = self.stats.try_reserve(limit) else {
            return Err(conn);
        };
        let Some(mut shard) = self.shard(shard_id) else {
            self.stats.pooled_removed(1);
            return Err(conn);
        };

        conn.idle_since = Instant::now();
        conn.pooled_on = Some(shard_id);
        let id = conn.id;
        shard.idle.push_front(conn);
        drop(shard);

        self.conn_stats.connection_closed();

        tracing::debug!(
            server = %self.server,
            shard = shard_id,
            connection = id,
            pooled,
            "returned connection to pool"
        );
        Ok(())
    }

    /// Flag an idle connection as failed, e.g. after its socket hung up.
    pub fn mark_error(&self, shard_id: WorkerId, connection_id: u64) -> bool {
        let Some(mut shard) = self.shard(shard_id) else {
            return false;
        };
        match shard.idle.iter_mut().find(|c| c.id == connection_id) {
            Some(conn) => {
                conn.errored = true;
                true
            }
            None => false,
        }
    }

    /// Close every errored connection and every connection idle longer than
    /// `max_idle` in shard `shard_id`.
    pub fn evict_shard(&self, shard_id: WorkerId, max_idle: Duration) -> usize {
        self.evict_shard_with(shard_id, &EvictionPolicy::idle(max_idle))
    }

    /// Sweep shard `shard_id` according to `policy`. Returns how many
    /// connections were closed.
    pub fn evict_shard_with(&self, shard_id: WorkerId, policy: &EvictionPolicy) -> usize {
        self.evict_shard_at(shard_id, policy, Instant::now())
    }

    fn evict_shard_at(&self, shard_id: WorkerId, policy: &EvictionPolicy, now: Instant) -> usize {
        let server_down = policy.require_running && !self.status.is_running();

        let (evicted, kept) = {
            let Some(mut shard) = self.shard(shard_id) else {
                return 0;
            };
            let mut kept = VecDeque::with_capacity(shard.idle.len());
            let mut evicted = Vec::new();

            for conn in shard.idle.drain(..) {
                let over_limit = policy.max_pooled.is_some_and(|max| kept.len() >= max);
                let stale = now.saturating_duration_since(conn.idle_since) > policy.max_idle;
                if policy.clean_all || server_down || conn.errored || over_limit || stale {
                    evicted.push(conn);
                } else {
                    kept.push_back(conn);
                }
            }

            let kept_len = kept.len();
            shard.idle = kept;
            (evicted, kept_len)
        };

        self.stats.observe_size(kept);
        self.stats.pooled_removed(evicted.len());

        let count = evicted.len();
        for conn in evicted {
            conn.close();
        }

        if count > 0 {
            tracing::debug!(
                server = %self.server,
                shard = shard_id,
                evicted = count,
                remaining = kept,
                "evicted pooled connections"
            );
        }
        count
    }

    /// Have every routing worker sweep its own shard once and wait for all of
    /// them. Returns the total number of connections closed.
    pub fn broadcast_evict(self: &Arc<Self>, workers: &RoutingWorkers, max_idle: Duration) -> usize {
        self.broadcast_evict_with(workers, EvictionPolicy::idle(max_idle))
    }

    pub fn broadcast_evict_with(self: &Arc<Self>, workers: &RoutingWorkers, policy: EvictionPolicy) -> usize {
        let pool = Arc::clone(self);
        let evicted: usize = workers
            .broadcast(move |worker| pool.evict_shard_with(worker, &policy))
            .into_iter()
            .sum();

        tracing::info!(
            server = %self.server,
            evicted,
            pooled = self.pooled(),
            "pool sweep complete"
        );
        evicted
    }

    /// Async flavour of [`broadcast_evict_with`](Self::broadcast_evict_with)
    /// for callers running inside a tokio runtime.
    pub async fn broadcast_evict_async(
        self: &Arc<Self>,
        workers: &RoutingWorkers,
        policy: EvictionPolicy,
    ) -> usize {
        let pool = Arc::clone(self);
        let evicted: usize = workers
            .broadcast_async(move |worker| pool.evict_shard_with(worker, &policy))
            .await
            .into_iter()
            .sum();

        tracing::info!(
            server = %self.server,
            evicted,
            pooled = self.pooled(),
            "pool sweep complete"
        );
        evicted
    }

    fn shard(&self, shard_id: WorkerId) -> Option<MutexGuard<'_, Shard>> {
        if let Some(current) = current_worker_id() {
            debug_assert_eq!(
                current, shard_id,
                "shard {shard_id} touched from worker {current}"
            );
        }
        self.shards
            .get(shard_id)
            .map(|s| s.lock().unwrap_or_else(PoisonError::into_inner))
    }
}

impl fmt::Debug for ConnectionPool {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("ConnectionPool")
            .field("server", &self.server)
            .field("shards", &self.shards.len())
            .field("pooled", &self.pooled())
            .finish_non_exhaustive()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::status::StatusBits;
    use std::sync::atomic::AtomicBool;

    // ── Mock backend ─────────────────────────────────────────────────

    #[derive(Debug, Default)]
    struct MockBackend {
        closed: Arc<AtomicBool>,
    }

    impl ConnectionBackend for MockBackend {
        fn close(&mut self) {
            self.closed.store(true, Ordering::SeqCst);
        }
    }

    fn conn(user: &str, peer: &str, protocol: &str) -> PooledConnection {
        PooledConnection::new("db1", user, peer, protocol, Box::new(MockBackend::default()))
    }

    fn tracked_conn(user: &str) -> (PooledConnection, Arc<AtomicBool>) {
        let closed = Arc::new(AtomicBool::new(false));
        let backend = MockBackend {
            closed: Arc::clone(&closed),
        };
        (
            PooledConnection::new("db1", user, "10.0.0.1", "mysql", Box::new(backend)),
            closed,
        )
    }

    fn pool(shards: usize) -> (ConnectionPool, Arc<StatusState>, Arc<ConnectionStats>) {
        let status = Arc::new(StatusState::new(StatusBits::RUNNING));
        let stats = Arc::new(ConnectionStats::default());
        let pool = ConnectionPool::new("db1", shards, Arc::clone(&status), Arc::clone(&stats));
        (pool, status, stats)
    }

    // ── acquire / release ────────────────────────────────────────────

    #[test]
    fn acquire_from_empty_shard_misses() {
        let (pool, _, _) = pool(2);
        assert!(pool.acquire(0, "app", "10.0.0.1", "mysql").is_none());
    }

    #[test]
    fn release_then_acquire_reuses_connection() {
        let (pool, _, _) = pool(2);
        let c = conn("app", "10.0.0.1", "mysql");
        let id = c.id();
        pool.release(0, c).unwrap();
        assert_eq!(pool.pooled(), 1);

        let got = pool.acquire(0, "app", "10.0.0.1", "mysql").unwrap();
        assert_eq!(got.id(), id);
        assert_eq!(got.pooled_on(), None);
        assert_eq!(pool.pooled(), 0);
        assert_eq!(pool.stats().snapshot().served_from_pool, 1);
    }

    #[test]
    fn release_tags_connection_with_shard() {
        let (pool, _, _) = pool(2);
        let c = conn("app", "10.0.0.1", "mysql");
        let id = c.id();
        pool.release(1, c).unwrap();
        assert!(pool.mark_error(1, id));
        assert!(!pool.mark_error(0, id));
    }

    #[test]
    fn acquire_requires_every_field_to_match() {
        let (pool, _, _) = pool(1);
        pool.release(0, conn("app", "10.0.0.1", "mysql")).unwrap();

        assert!(pool.acquire(0, "other", "10.0.0.1", "mysql").is_none());
        assert!(pool.acquire(0, "app", "10.0.0.2", "mysql").is_none());
        assert!(pool.acquire(0, "app", "10.0.0.1", "postgres").is_none());
        assert!(pool.acquire(0, "", "10.0.0.1", "mysql").is_none());
        assert!(pool.acquire(0, "app", "", "mysql").is_none());
        assert_eq!(pool.pooled(), 1);
        assert!(pool.acquire(0, "app", "10.0.0.1", "mysql").is_some());
    }

    #[test]
    fn acquire_never_crosses_shards() {
        let (pool, _, _) = pool(2);
        pool.release(1, conn("app", "10.0.0.1", "mysql")).unwrap();
        assert!(pool.acquire(0, "app", "10.0.0.1", "mysql").is_none());
        assert!(pool.acquire(1, "app", "10.0.0.1", "mysql").is_some());
    }

    #[test]
    fn acquire_skips_errored_connections() {
        let (pool, _, _) = pool(1);
        let mut bad = conn("app", "10.0.0.1", "mysql");
        bad.mark_error();
        pool.release(0, bad).unwrap();
        let good = conn("app", "10.0.0.1", "mysql");
        let good_id = good.id();
        pool.release(0, good).unwrap();

        let first = pool.acquire(0, "app", "10.0.0.1", "mysql").unwrap();
        assert_eq!(first.id(), good_id);
        assert!(pool.acquire(0, "app", "10.0.0.1", "mysql").is_none());
    }

    #[test]
    fn acquire_is_most_recently_released_first() {
        let (pool, _, _) = pool(1);
        let a = conn("app", "10.0.0.1", "mysql");
        let b = conn("app", "10.0.0.1", "mysql");
        let b_id = b.id();
        pool.release(0, a).unwrap();
        pool.release(0, b).unwrap();
        assert_eq!(pool.acquire(0, "app", "10.0.0.1", "mysql").unwrap().id(), b_id);
    }

    #[test]
    fn acquire_misses_while_server_not_running() {
        let (pool, status, _) = pool(1);
        pool.release(0, conn("app", "10.0.0.1", "mysql")).unwrap();

        status.clear(StatusBits::RUNNING);
        assert!(pool.acquire(0, "app", "10.0.0.1", "mysql").is_none());

        status.set(StatusBits::RUNNING);
        assert!(pool.acquire(0, "app", "10.0.0.1", "mysql").is_some());
    }

    #[test]
    fn release_to_unknown_shard_gives_connection_back() {
        let (pool, _, _) = pool(1);
        let back = pool.release(3, conn("app", "10.0.0.1", "mysql")).unwrap_err();
        assert_eq!(back.user(), "app");
        assert_eq!(pool.pooled(), 0);
        assert!(pool.acquire(3, "app", "10.0.0.1", "mysql").is_none());
    }

    #[test]
    fn pooled_count_tracks_outstanding_releases() {
        let (pool, _, _) = pool(1);
        let mut outstanding = 0usize;
        for round in 0..20 {
            if round % 3 == 2 {
                if pool.acquire(0, "app", "10.0.0.1", "mysql").is_some() {
                    outstanding -= 1;
                }
            } else {
                pool.release(0, conn("app", "10.0.0.1", "mysql")).unwrap();
                outstanding += 1;
            }
            assert_eq!(pool.pooled(), outstanding);
            assert_eq!(pool.shard_len(0), outstanding);
        }
    }

    #[test]
    fn scenario_three_idle_one_acquired() {
        let (pool, _, stats) = pool(2);
        for _ in 0..3 {
            pool.release(0, conn("app", "10.0.0.1", "mysql")).unwrap();
        }
        let active_before = stats.current();

        assert!(pool.acquire(0, "app", "10.0.0.1", "mysql").is_some());
        assert_eq!(pool.pooled(), 2);
        assert_eq!(stats.current(), active_before + 1);
    }

    #[test]
    fn release_bounded_refuses_when_full() {
        let (pool, _, _) = pool(2);
        pool.release_bounded(0, conn("app", "10.0.0.1", "mysql"), 2).unwrap();
        pool.release_bounded(1, conn("app", "10.0.0.1", "mysql"), 2).unwrap();

        let back = pool
            .release_bounded(0, conn("app", "10.0.0.1", "mysql"), 2)
            .unwrap_err();
        assert_eq!(back.user(), "app");
        assert_eq!(pool.pooled(), 2);
        assert_eq!(pool.shard_len(0) + pool.shard_len(1), 2);
    }

    #[test]
    fn concurrent_bounded_releases_never_exceed_limit() {
        let (pool, _, _) = pool(8);
        let pool = Arc::new(pool);

        let handles: Vec<_> = (0..8)
            .map(|shard| {
                let pool = Arc::clone(&pool);
                std::thread::spawn(move || {
                    (0..50)
                        .filter(|_| {
                            pool.release_bounded(shard, conn("app", "10.0.0.1", "mysql"), 5)
                                .is_ok()
                        })
                        .count()
                })
            })
            .collect();
        let accepted: usize = handles.into_iter().map(|h| h.join().unwrap()).sum();

        assert_eq!(accepted, 5);
        assert_eq!(pool.pooled(), 5);
        assert_eq!((0..8).map(|s| pool.shard_len(s)).sum::<usize>(), 5);
    }

    #[test]
    fn release_bounded_to_unknown_shard_frees_slot() {
        let (pool, _, _) = pool(1);
        assert!(pool.release_bounded(4, conn("app", "10.0.0.1", "mysql"), 1).is_err());
        assert_eq!(pool.pooled(), 0);
        pool.release_bounded(0, conn("app", "10.0.0.1", "mysql"), 1).unwrap();
    }

    // ── eviction ─────────────────────────────────────────────────────

    #[test]
    fn evict_removes_errored_and_closes_them() {
        let (pool, _, _) = pool(1);
        let (mut bad, closed) = tracked_conn("app");
        bad.mark_error();
        pool.release(0, bad).unwrap();
        pool.release(0, conn("app", "10.0.0.1", "mysql")).unwrap();

        assert_eq!(pool.evict_shard(0, Duration::from_secs(60)), 1);
        assert!(closed.load(Ordering::SeqCst));
        assert_eq!(pool.pooled(), 1);
    }

    #[test]
    fn evict_removes_stale_connections() {
        let (pool, _, _) = pool(1);
        let (c, closed) = tracked_conn("app");
        pool.release(0, c).unwrap();

        let policy = EvictionPolicy::idle(Duration::from_secs(30));
        let later = Instant::now() + Duration::from_secs(31);
        assert_eq!(pool.evict_shard_at(0, &policy, Instant::now()), 0);
        assert_eq!(pool.evict_shard_at(0, &policy, later), 1);
        assert!(closed.load(Ordering::SeqCst));
        assert_eq!(pool.shard_len(0), 0);
    }

    #[test]
    fn evict_leaves_nothing_stale_or_errored() {
        let (pool, _, _) = pool(1);
        for i in 0..10 {
            let mut c = conn("app", "10.0.0.1", "mysql");
            if i % 4 == 0 {
                c.mark_error();
            }
            pool.release(0, c).unwrap();
        }
        let max_idle = Duration::from_secs(5);
        let now = Instant::now() + Duration::from_secs(2);
        pool.evict_shard_at(0, &EvictionPolicy::idle(max_idle), now);

        let shard = pool.shard(0).unwrap();
        assert_eq!(shard.idle.len(), 7);
        assert!(shard.idle.iter().all(|c| !c.is_errored()
            && now.saturating_duration_since(c.idle_since()) <= max_idle));
        drop(shard);
        assert_eq!(pool.pooled(), 7);
    }

    #[test]
    fn evict_only_touches_requested_shard() {
        let (pool, _, _) = pool(2);
        let mut a = conn("app", "10.0.0.1", "mysql");
        a.mark_error();
        let mut b = conn("app", "10.0.0.1", "mysql");
        b.mark_error();
        pool.release(0, a).unwrap();
        pool.release(1, b).unwrap();

        assert_eq!(pool.evict_shard(0, Duration::from_secs(60)), 1);
        assert_eq!(pool.shard_len(1), 1);
    }

    #[test]
    fn evict_trims_over_limit_keeping_most_recent() {
        let (pool, _, _) = pool(1);
        let mut ids = vec![];
        for _ in 0..5 {
            let c = conn("app", "10.0.0.1", "mysql");
            ids.push(c.id());
            pool.release(0, c).unwrap();
        }
        let policy = EvictionPolicy {
            max_pooled: Some(2),
            ..EvictionPolicy::idle(Duration::from_secs(60))
        };
        assert_eq!(pool.evict_shard_with(0, &policy), 3);

        let first = pool.acquire(0, "app", "10.0.0.1", "mysql").unwrap();
        assert_eq!(first.id(), ids[4]);
        assert_eq!(pool.stats().snapshot().max_pooled, 2);
    }

    #[test]
    fn evict_clears_shard_when_server_down() {
        let (pool, status, _) = pool(1);
        pool.release(0, conn("app", "10.0.0.1", "mysql")).unwrap();
        status.clear(StatusBits::RUNNING);

        let policy = EvictionPolicy {
            require_running: true,
            ..EvictionPolicy::idle(Duration::from_secs(60))
        };
        assert_eq!(pool.evict_shard_with(0, &policy), 1);
        assert_eq!(pool.pooled(), 0);
    }

    #[test]
    fn clean_all_empties_shard() {
        let (pool, _, _) = pool(1);
        for _ in 0..3 {
            pool.release(0, conn("app", "10.0.0.1", "mysql")).unwrap();
        }
        assert_eq!(pool.evict_shard_with(0, &EvictionPolicy::clean_all()), 3);
        assert_eq!(pool.pooled(), 0);
    }

    #[test]
    fn evict_unknown_shard_is_noop() {
        let (pool, _, _) = pool(1);
        assert_eq!(pool.evict_shard(9, Duration::ZERO), 0);
    }

    // ── broadcast ────────────────────────────────────────────────────

    #[test]
    fn broadcast_evict_sweeps_every_shard_on_its_worker() {
        let workers = RoutingWorkers::start(3).unwrap();
        let (pool, _, _) = pool(3);
        let pool = Arc::new(pool);

        for shard in 0..3 {
            let pool = Arc::clone(&pool);
            workers
                .call_on(shard, move |worker| {
                    let mut c = conn("app", "10.0.0.1", "mysql");
                    c.mark_error();
                    pool.release(worker, c).unwrap();
                    pool.release(worker, conn("app", "10.0.0.1", "mysql")).unwrap();
                })
                .unwrap();
        }
        assert_eq!(pool.pooled(), 6);

        assert_eq!(pool.broadcast_evict(&workers, Duration::from_secs(60)), 3);
        assert_eq!(pool.pooled(), 3);
        workers.shutdown();
    }

    #[tokio::test]
    async fn broadcast_evict_async_sweeps_from_runtime() {
        let workers = RoutingWorkers::start(2).unwrap();
        let (pool, status, _) = pool(2);
        let pool = Arc::new(pool);

        for shard in 0..2 {
            let pool = Arc::clone(&pool);
            assert!(workers.execute_on(shard, move |worker| {
                pool.release(worker, conn("app", "10.0.0.1", "mysql")).unwrap();
            }));
        }
        // Make sure both releases ran before sweeping.
        while pool.pooled() < 2 {
            tokio::task::yield_now().await;
        }

        status.clear(StatusBits::RUNNING);
        let policy = EvictionPolicy {
            require_running: true,
            ..EvictionPolicy::idle(Duration::from_secs(60))
        };
        assert_eq!(pool.broadcast_evict_async(&workers, policy).await, 2);
        assert_eq!(pool.pooled(), 0);
    }
}
