//! Backend server entity.
//!
//! A [`Server`] is created once per configured backend and shared (`Arc`) by
//! sessions, monitors and admin commands for the rest of its life. Sessions
//! acquire and release pooled connections through it, monitors flip status
//! bits and feed response time samples, admin commands update settings and
//! persist them.

use std::path::{Path, PathBuf};
use std::sync::atomic::{AtomicBool, AtomicI64, AtomicU8, AtomicU16, AtomicU64, AtomicUsize, Ordering};
use std::sync::{Arc, PoisonError, RwLock};
use std::time::Duration;

use sqlgate_core::schema::{
    CN_ADDRESS, CN_DISK_SPACE_THRESHOLD, CN_EXTRA_PORT, CN_MONITORPW, CN_MONITORUSER,
    CN_PERSISTMAXTIME, CN_PERSISTPOOLMAX, CN_PORT, CN_PROTOCOL, CN_PROXY_PROTOCOL, CN_RANK,
    CN_SOCKET, CN_TYPE,
};
use sqlgate_core::settings::format_duration;
use sqlgate_core::{DiskSpaceLimits, ProtocolModules, Rank, ServerSettings};
use tracing::{debug, error, info};

use crate::error::{ServerError, ServerResult};
use crate::params::ParameterStore;
use crate::persist;
use crate::pool::{ConnectionPool, EvictionPolicy, PooledConnection};
use crate::response_time::ResponseTimeEstimator;
use crate::snapshot::{ServerSnapshot, ServerStatistics};
use crate::stats::ConnectionStats;
use crate::status::{StatusBits, StatusState};
use crate::text::{BoundedText, MAX_ADDRESS_LEN, MAX_MONPW_LEN, MAX_MONUSER_LEN};
use crate::version::{ServerKind, Version, VersionInfo};
use crate::worker::{RoutingWorkers, WorkerId};

const MASKED_PASSWORD: &str = "*****";

pub struct Server {
    name: String,
    protocol: String,
    address: BoundedText,
    port: AtomicU16,
    extra_port: AtomicU16,
    monitor_user: BoundedText,
    monitor_password: BoundedText,
    persist_pool_max: AtomicUsize,
    persist_max_time_ms: AtomicU64,
    proxy_protocol: AtomicBool,
    rank: AtomicU8,

    status: Arc<StatusState>,
    pool: Arc<ConnectionPool>,
    conn_stats: Arc<ConnectionStats>,
    response_time: ResponseTimeEstimator,
    version: VersionInfo,
    params: ParameterStore,
    disk_space_limits: RwLock<DiskSpaceLimits>,
    /// Replication lag in seconds; negative when unknown.
    rlag: AtomicI64,
    /// Unix time of the last heartbeat; zero when unknown.
    node_ts: AtomicI64,
}

impl Server {
    /// Create a server from validated settings with one pool shard per
    /// routing worker.
    ///
    /// Fails if exactly one of the monitor credentials is given, if a text
    /// value exceeds its capacity, or if the disk space threshold is invalid.
    pub fn new(
        name: &str,
        settings: &ServerSettings,
        shard_count: usize,
        modules: Arc<dyn ProtocolModules>,
    ) -> ServerResult<Self> {
        match (&settings.monitor_user, &settings.monitor_password) {
            (Some(_), None) => {
                return Err(credential_error(name, CN_MONITORUSER, CN_MONITORPW));
            }
            (None, Some(_)) => {
                return Err(credential_error(name, CN_MONITORPW, CN_MONITORUSER));
            }
            _ => {}
        }

        let status = Arc::new(StatusState::new(StatusBits::RUNNING));
        let conn_stats = Arc::new(ConnectionStats::default());
        let pool = Arc::new(ConnectionPool::new(
            name,
            shard_count,
            Arc::clone(&status),
            Arc::clone(&conn_stats),
        ));

        let disk_space_limits = match &settings.disk_space_threshold {
            Some(raw) => raw.parse()?,
            None => DiskSpaceLimits::default(),
        };

        let server = Self {
            name: name.to_string(),
            protocol: settings.protocol.clone(),
            address: BoundedText::new(CN_ADDRESS, MAX_ADDRESS_LEN),
            port: AtomicU16::new(settings.port),
            extra_port: AtomicU16::new(settings.extra_port),
            monitor_user: BoundedText::new(CN_MONITORUSER, MAX_MONUSER_LEN),
            monitor_password: BoundedText::new(CN_MONITORPW, MAX_MONPW_LEN),
            persist_pool_max: AtomicUsize::new(settings.persist_pool_max),
            persist_max_time_ms: AtomicU64::new(duration_to_ms(settings.persist_max_time)),
            proxy_protocol: AtomicBool::new(settings.proxy_protocol),
            rank: AtomicU8::new(settings.rank as u8),
            status,
            pool,
            conn_stats,
            response_time: ResponseTimeEstimator::new(),
            version: VersionInfo::default(),
            params: ParameterStore::new(&settings.protocol, modules),
            disk_space_limits: RwLock::new(disk_space_limits),
            rlag: AtomicI64::new(-1),
            node_ts: AtomicI64::new(0),
        };

        server.address.set(&settings.address)?;
        if let (Some(user), Some(password)) = (&settings.monitor_user, &settings.monitor_password) {
            server.monitor_user.set(user)?;
            server.monitor_password.set(password)?;
        }
        server.params.load(&settings.parameters);
        server.store_typed_parameters(settings);

        info!(
            server = %server.name,
            address = %settings.address,
            port = settings.port,
            protocol = %server.protocol,
            shards = shard_count,
            "server created"
        );
        Ok(server)
    }

    /// Write the typed settings into the canonical parameters so that a
    /// server built from typed fields alone persists a complete section.
    /// Typed values win over raw ones.
    fn store_typed_parameters(&self, settings: &ServerSettings) {
        let params = &self.params;
        if params.get(CN_TYPE).is_none() {
            params.set_normal(CN_TYPE, "server");
        }
        // A socket path arrives as the address; keep it under its own key.
        if !settings.parameters.contains_key(CN_SOCKET) {
            params.set_normal(CN_ADDRESS, &settings.address);
        }
        params.set_normal(CN_PROTOCOL, &settings.protocol);
        params.set_normal(CN_PORT, &settings.port.to_string());
        if settings.extra_port != 0 {
            params.set_normal(CN_EXTRA_PORT, &settings.extra_port.to_string());
        }
        params.set_normal(CN_PERSISTPOOLMAX, &settings.persist_pool_max.to_string());
        params.set_normal(CN_PERSISTMAXTIME, &format_duration(settings.persist_max_time));
        params.set_normal(CN_PROXY_PROTOCOL, &settings.proxy_protocol.to_string());
        params.set_normal(CN_RANK, &settings.rank.to_string());
        if let (Some(user), Some(password)) = (&settings.monitor_user, &settings.monitor_password) {
            params.set_normal(CN_MONITORUSER, user);
            params.set_normal(CN_MONITORPW, password);
        }
        if let Some(threshold) = &settings.disk_space_threshold {
            params.set_normal(CN_DISK_SPACE_THRESHOLD, threshold);
        }
    }

    // ── Identity and settings ────────────────────────────────────────

    pub fn name(&self) -> &str {
        &self.name
    }

    pub fn protocol(&self) -> &str {
        &self.protocol
    }

    pub fn address(&self) -> String {
        self.address.get()
    }

    pub fn port(&self) -> u16 {
        self.port.load(Ordering::Relaxed)
    }

    pub fn extra_port(&self) -> u16 {
        self.extra_port.load(Ordering::Relaxed)
    }

    pub fn monitor_user(&self) -> String {
        self.monitor_user.get()
    }

    pub fn monitor_password(&self) -> String {
        self.monitor_password.get()
    }

    pub fn persist_pool_max(&self) -> usize {
        self.persist_pool_max.load(Ordering::Relaxed)
    }

    pub fn persist_max_time(&self) -> Duration {
        Duration::from_millis(self.persist_max_time_ms.load(Ordering::Relaxed))
    }

    pub fn proxy_protocol(&self) -> bool {
        self.proxy_protocol.load(Ordering::Relaxed)
    }

    pub fn rank(&self) -> Rank {
        match self.rank.load(Ordering::Relaxed) {
            2 => Rank::Secondary,
            _ => Rank::Primary,
        }
    }

    /// Change the address. Rejected, keeping the old one, if too long.
    pub fn update_address(&self, address: &str) -> ServerResult<()> {
        self.address.set(address)?;
        self.params.set_normal(CN_ADDRESS, address);
        Ok(())
    }

    pub fn update_port(&self, port: u16) {
        self.port.store(port, Ordering::Relaxed);
        self.params.set_normal(CN_PORT, &port.to_string());
    }

    pub fn update_extra_port(&self, port: u16) {
        self.extra_port.store(port, Ordering::Relaxed);
        self.params.set_normal(CN_EXTRA_PORT, &port.to_string());
    }

    pub fn set_monitor_user(&self, user: &str) -> ServerResult<()> {
        self.monitor_user.set(user)?;
        self.params.set_normal(CN_MONITORUSER, user);
        Ok(())
    }

    pub fn set_monitor_password(&self, password: &str) -> ServerResult<()> {
        self.monitor_password.set(password)?;
        self.params.set_normal(CN_MONITORPW, password);
        Ok(())
    }

    pub fn set_persist_pool_max(&self, max: usize) {
        self.persist_pool_max.store(max, Ordering::Relaxed);
        self.params.set_normal(CN_PERSISTPOOLMAX, &max.to_string());
    }

    pub fn set_persist_max_time(&self, max_idle: Duration) {
        self.persist_max_time_ms
            .store(duration_to_ms(max_idle), Ordering::Relaxed);
        self.params
            .set_normal(CN_PERSISTMAXTIME, &format_duration(max_idle));
    }

    pub fn set_proxy_protocol(&self, enabled: bool) {
        self.proxy_protocol.store(enabled, Ordering::Relaxed);
        self.params.set_normal(CN_PROXY_PROTOCOL, &enabled.to_string());
    }

    pub fn set_rank(&self, rank: Rank) {
        self.rank.store(rank as u8, Ordering::Relaxed);
        self.params.set_normal(CN_RANK, &rank.to_string());
    }

    // ── Status ───────────────────────────────────────────────────────

    pub fn status(&self) -> &StatusState {
        &self.status
    }

    pub fn set_status(&self, bits: StatusBits) {
        self.status.set(bits);
    }

    pub fn clear_status(&self, bits: StatusBits) {
        self.status.clear(bits);
    }

    pub fn status_string(&self) -> String {
        self.status.as_string()
    }

    // ── Connection pool ──────────────────────────────────────────────

    pub fn pool(&self) -> &Arc<ConnectionPool> {
        &self.pool
    }

    pub fn connection_stats(&self) -> &ConnectionStats {
        &self.conn_stats
    }

    /// Sweep policy derived from the current pool settings.
    pub fn eviction_policy(&self) -> EvictionPolicy {
        EvictionPolicy {
            max_idle: self.persist_max_time(),
            max_pooled: Some(self.persist_pool_max()),
            require_running: true,
            clean_all: false,
        }
    }

    /// Take a pooled connection for `user` connecting from `peer`, after
    /// sweeping stale entries from the shard. Must be called on worker
    /// `shard`.
    pub fn acquire_connection(
        &self,
        shard: WorkerId,
        user: &str,
        peer: &str,
        protocol: &str,
    ) -> Option<PooledConnection> {
        self.pool.evict_shard_with(shard, &self.eviction_policy());
        self.pool.acquire(shard, user, peer, protocol)
    }

    /// A session finished with `conn`. Keeps it for reuse if the pool admits
    /// it, otherwise closes it. Returns whether it was pooled. Must be called
    /// on worker `shard`.
    ///
    /// The server-wide limit holds even when workers release concurrently.
    pub fn release_connection(&self, shard: WorkerId, conn: PooledConnection) -> bool {
        let limit = self.persist_pool_max();
        let admissible = limit > 0
            && !conn.is_errored()
            && conn.server() == self.name
            && !conn.user().is_empty()
            && self.status.is_usable();

        let rejected = if admissible {
            self.pool.release_bounded(shard, conn, limit).err()
        } else {
            Some(conn)
        };

        match rejected {
            None => true,
            Some(conn) => {
                debug!(
                    server = %self.name,
                    shard,
                    connection = conn.id(),
                    pooled = self.pool.pooled(),
                    limit,
                    "closing connection instead of pooling it"
                );
                self.conn_stats.connection_closed();
                conn.close();
                false
            }
        }
    }

    /// Have every worker sweep its shard with the current pool settings.
    ///
    /// Blocks until every worker is done; from async code use
    /// [`broadcast_evict_async`](Self::broadcast_evict_async).
    pub fn broadcast_evict(&self, workers: &RoutingWorkers) -> usize {
        self.pool
            .broadcast_evict_with(workers, self.eviction_policy())
    }

    pub async fn broadcast_evict_async(&self, workers: &RoutingWorkers) -> usize {
        self.pool
            .broadcast_evict_async(workers, self.eviction_policy())
            .await
    }

    /// Close every pooled connection on every worker, e.g. before removal.
    pub fn close_all_pooled(&self, workers: &RoutingWorkers) -> usize {
        self.pool
            .broadcast_evict_with(workers, EvictionPolicy::clean_all())
    }

    pub async fn close_all_pooled_async(&self, workers: &RoutingWorkers) -> usize {
        self.pool
            .broadcast_evict_async(workers, EvictionPolicy::clean_all())
            .await
    }

    /// A session established a fresh backend connection.
    pub fn connection_opened(&self) {
        self.conn_stats.connection_opened();
    }

    /// A session destroyed a backend connection instead of pooling it.
    pub fn connection_closed(&self) {
        self.conn_stats.connection_closed();
    }

    pub fn add_packets(&self, n: u64) {
        self.conn_stats.add_packets(n);
    }

    // ── Monitor input ────────────────────────────────────────────────

    pub fn response_time(&self) -> &ResponseTimeEstimator {
        &self.response_time
    }

    pub fn add_response_time(&self, average: Duration, samples: u32) {
        self.response_time.add_sample(average, samples);
    }

    pub fn response_time_average(&self) -> Duration {
        self.response_time.read_average()
    }

    pub fn response_time_num_samples(&self) -> i64 {
        self.response_time.read_sample_count()
    }

    pub fn set_version(&self, number: u64, text: &str) -> ServerResult<()> {
        if self.version.set(number, text)? {
            info!(server = %self.name, version = text, "server version");
        }
        Ok(())
    }

    pub fn version(&self) -> Version {
        self.version.version()
    }

    pub fn version_string(&self) -> String {
        self.version.version_string()
    }

    pub fn server_kind(&self) -> ServerKind {
        self.version.kind()
    }

    /// Replace the disk space limits. Invalid input leaves the old limits.
    pub fn set_disk_space_threshold(&self, threshold: &str) -> ServerResult<()> {
        let limits: DiskSpaceLimits = threshold.parse()?;
        *self
            .disk_space_limits
            .write()
            .unwrap_or_else(PoisonError::into_inner) = limits;
        self.params.set_normal(CN_DISK_SPACE_THRESHOLD, threshold);
        Ok(())
    }

    pub fn disk_space_limits(&self) -> DiskSpaceLimits {
        self.disk_space_limits
            .read()
            .unwrap_or_else(PoisonError::into_inner)
            .clone()
    }

    pub fn set_replication_lag(&self, seconds: i64) {
        self.rlag.store(seconds, Ordering::Relaxed);
    }

    pub fn replication_lag(&self) -> Option<i64> {
        Some(self.rlag.load(Ordering::Relaxed)).filter(|lag| *lag >= 0)
    }

    pub fn set_heartbeat(&self, unix_time: i64) {
        self.node_ts.store(unix_time, Ordering::Relaxed);
    }

    pub fn last_heartbeat(&self) -> Option<i64> {
        Some(self.node_ts.load(Ordering::Relaxed)).filter(|ts| *ts > 0)
    }

    // ── Parameters and persistence ───────────────────────────────────

    pub fn parameters(&self) -> &ParameterStore {
        &self.params
    }

    /// Admin update of a raw parameter.
    pub fn set_parameter(&self, name: &str, value: &str) {
        self.params.set(name, value);
    }

    pub fn custom_parameter(&self, name: &str) -> Option<String> {
        self.params.get_custom(name)
    }

    pub fn is_custom_parameter(&self, name: &str) -> bool {
        self.params.is_custom(name)
    }

    /// The server section as it is persisted.
    pub fn config_string(&self) -> String {
        self.params.to_config_string(&self.name)
    }

    /// Write the server section to `<dir>/<name>.cnf`.
    pub fn persist(&self, dir: &Path) -> ServerResult<PathBuf> {
        match persist::write_config(dir, &self.name, &self.config_string()) {
            Ok(path) => {
                info!(server = %self.name, path = %path.display(), "server configuration persisted");
                Ok(path)
            }
            Err(e) => {
                error!(server = %self.name, error = %e, "failed to persist server configuration");
                Err(e)
            }
        }
    }

    // ── Reporting ────────────────────────────────────────────────────

    pub fn snapshot(&self) -> ServerSnapshot {
        let mut parameters = self.params.all();
        if let Some(pw) = parameters.get_mut(CN_MONITORPW) {
            *pw = MASKED_PASSWORD.to_string();
        }

        let conn = self.conn_stats.snapshot();
        let pool = self.pool.stats().snapshot();

        ServerSnapshot {
            id: self.name.clone(),
            parameters,
            state: self.status_string(),
            version_string: self.version_string(),
            replication_lag: self.replication_lag(),
            last_heartbeat: self.last_heartbeat(),
            statistics: ServerStatistics {
                connections: conn.current,
                total_connections: conn.total,
                persistent_connections: pool.pooled,
                max_persistent_connections: pool.max_pooled,
                reused_connections: pool.served_from_pool,
                active_operations: conn.current_ops,
                routed_packets: conn.packets,
                adaptive_avg_select_time: format!("{:.3?}", self.response_time_average()),
            },
        }
    }
}

impl std::fmt::Debug for Server {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("Server")
            .field("name", &self.name)
            .field("address", &self.address())
            .field("port", &self.port())
            .field("protocol", &self.protocol)
            .field("status", &self.status_string())
            .finish_non_exhaustive()
    }
}

fn credential_error(server: &str, defined: &'static str, missing: &'static str) -> ServerError {
    error!(server, defined, missing, "monitor credentials must be given together");
    ServerError::CredentialPair {
        server: server.to_string(),
        defined,
        missing,
    }
}

fn duration_to_ms(d: Duration) -> u64 {
    u64::try_from(d.as_millis()).unwrap_or(u64::MAX)
}
