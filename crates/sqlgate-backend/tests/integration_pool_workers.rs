//! Integration tests for backend servers driven by real routing workers.
//!
//! Every pool operation runs on the worker that owns the shard, the same way
//! sessions use the pool in the daemon.

use std::collections::BTreeMap;
use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::{Arc, Once};
use std::time::Duration;

use sqlgate_backend::{ConnectionBackend, PooledConnection, RoutingWorkers, Server, StatusBits};
use sqlgate_core::{ServerSettings, StaticModules};

// ── Tracing setup ────────────────────────────────────────────────

static TRACING_INIT: Once = Once::new();

/// Controlled by `RUST_LOG` (e.g. `RUST_LOG=sqlgate_backend=debug`).
fn init_tracing() {
    TRACING_INIT.call_once(|| {
        tracing_subscriber::fmt()
            .with_env_filter(tracing_subscriber::EnvFilter::from_default_env())
            .with_test_writer()
            .try_init()
            .ok();
    });
}

// ── Helpers ──────────────────────────────────────────────────────

#[derive(Debug)]
struct CountingBackend {
    closed: Arc<AtomicUsize>,
}

impl ConnectionBackend for CountingBackend {
    fn close(&mut self) {
        self.closed.fetch_add(1, Ordering::SeqCst);
    }
}

fn raw_section(pool_max: &str, max_time: &str) -> BTreeMap<String, String> {
    [
        ("type", "server"),
        ("address", "192.168.0.10"),
        ("port", "3306"),
        ("protocol", "mariadb"),
        ("persistpoolmax", pool_max),
        ("persistmaxtime", max_time),
        ("connection_keepalive", "300s"),
        ("priority", "2"),
    ]
    .into_iter()
    .map(|(k, v)| (k.to_string(), v.to_string()))
    .collect()
}

fn start(pool_max: &str, max_time: &str, workers: usize) -> (Arc<Server>, RoutingWorkers) {
    init_tracing();
    let settings = ServerSettings::from_parameters(raw_section(pool_max, max_time)).unwrap();
    let server = Server::new("db1", &settings, workers, Arc::new(StaticModules::builtin())).unwrap();
    let workers = RoutingWorkers::start(workers).unwrap();
    (Arc::new(server), workers)
}

/// Open a connection on worker `shard` and hand it straight back to the pool.
fn open_and_release(
    server: &Arc<Server>,
    workers: &RoutingWorkers,
    shard: usize,
    user: &str,
    closed: &Arc<AtomicUsize>,
) -> bool {
    let server = Arc::clone(server);
    let user = user.to_string();
    let closed = Arc::clone(closed);
    workers
        .call_on(shard, move |worker| {
            server.connection_opened();
            let conn = PooledConnection::new(
                server.name(),
                &user,
                "10.1.1.1",
                "mariadb",
                Box::new(CountingBackend { closed }),
            );
            server.release_connection(worker, conn)
        })
        .unwrap()
}

fn acquire_on(server: &Arc<Server>, workers: &RoutingWorkers, shard: usize, user: &str) -> bool {
    let server = Arc::clone(server);
    let user = user.to_string();
    workers
        .call_on(shard, move |worker| {
            server
                .acquire_connection(worker, &user, "10.1.1.1", "mariadb")
                .is_some()
        })
        .unwrap()
}

// ── Pooling across workers ───────────────────────────────────────

#[test]
fn connections_are_reused_only_on_their_own_worker() {
    let (server, workers) = start("10", "1h", 2);
    let closed = Arc::new(AtomicUsize::new(0));

    assert!(open_and_release(&server, &workers, 0, "app", &closed));
    assert_eq!(server.pool().shard_len(0), 1);

    assert!(!acquire_on(&server, &workers, 1, "app"));
    assert!(acquire_on(&server, &workers, 0, "app"));
    assert_eq!(server.pool().pooled(), 0);
    assert_eq!(server.pool().stats().snapshot().served_from_pool, 1);

    workers.shutdown();
}

#[test]
fn global_limit_applies_across_shards() {
    let (server, workers) = start("3", "1h", 2);
    let closed = Arc::new(AtomicUsize::new(0));

    assert!(open_and_release(&server, &workers, 0, "app", &closed));
    assert!(open_and_release(&server, &workers, 1, "app", &closed));
    assert!(open_and_release(&server, &workers, 0, "app", &closed));
    assert!(!open_and_release(&server, &workers, 1, "app", &closed));

    assert_eq!(server.pool().pooled(), 3);
    assert_eq!(closed.load(Ordering::SeqCst), 1);
    assert_eq!(server.connection_stats().current(), 0);

    workers.shutdown();
}

#[test]
fn broadcast_evict_removes_stale_connections_everywhere() {
    let (server, workers) = start("10", "1h", 3);
    let closed = Arc::new(AtomicUsize::new(0));

    for shard in 0..3 {
        assert!(open_and_release(&server, &workers, shard, "app", &closed));
    }
    assert_eq!(server.broadcast_evict(&workers), 0);
    assert_eq!(server.pool().pooled(), 3);

    server.set_persist_max_time(Duration::ZERO);
    std::thread::sleep(Duration::from_millis(5));
    assert_eq!(server.broadcast_evict(&workers), 3);
    assert_eq!(server.pool().pooled(), 0);
    assert_eq!(closed.load(Ordering::SeqCst), 3);

    workers.shutdown();
}

#[test]
fn server_going_down_empties_pool_on_next_sweep() {
    let (server, workers) = start("10", "1h", 2);
    let closed = Arc::new(AtomicUsize::new(0));

    assert!(open_and_release(&server, &workers, 0, "app", &closed));
    assert!(open_and_release(&server, &workers, 1, "app", &closed));

    server.clear_status(StatusBits::RUNNING);
    assert_eq!(server.status_string(), "Down");
    assert_eq!(server.broadcast_evict(&workers), 2);

    server.set_status(StatusBits::RUNNING);
    assert!(!acquire_on(&server, &workers, 0, "app"));

    workers.shutdown();
}

#[test]
fn close_all_pooled_ignores_age() {
    let (server, workers) = start("10", "1h", 2);
    let closed = Arc::new(AtomicUsize::new(0));

    assert!(open_and_release(&server, &workers, 0, "app", &closed));
    assert!(open_and_release(&server, &workers, 1, "report", &closed));

    assert_eq!(server.close_all_pooled(&workers), 2);
    assert_eq!(closed.load(Ordering::SeqCst), 2);

    workers.shutdown();
}

// ── Persistence ──────────────────────────────────────────────────

fn parse_section(content: &str) -> (String, BTreeMap<String, String>) {
    let mut lines = content.lines();
    let header = lines.next().unwrap();
    let name = header.trim_start_matches('[').trim_end_matches(']').to_string();
    let params = lines
        .filter(|l| !l.trim().is_empty())
        .map(|l| {
            let (k, v) = l.split_once('=').unwrap();
            (k.to_string(), v.to_string())
        })
        .collect();
    (name, params)
}

#[test]
fn persisted_section_recreates_equivalent_server() {
    let (server, workers) = start("10", "1h", 1);
    server.update_port(3310);
    server.set_monitor_user("monitor").unwrap();
    server.set_monitor_password("s3cret").unwrap();
    server.set_parameter("weight", "heavy");

    let dir = tempfile::tempdir().unwrap();
    let path = server.persist(dir.path()).unwrap();
    assert_eq!(path, dir.path().join("db1.cnf"));

    let (name, params) = parse_section(&std::fs::read_to_string(&path).unwrap());
    assert_eq!(name, "db1");
    assert_eq!(params["connection_keepalive"], "300s");
    assert_eq!(params["priority"], "2");
    assert_eq!(params["weight"], "heavy");

    let settings = ServerSettings::from_parameters(params).unwrap();
    let copy = Server::new(&name, &settings, 1, Arc::new(StaticModules::builtin())).unwrap();

    assert_eq!(copy.address(), server.address());
    assert_eq!(copy.port(), 3310);
    assert_eq!(copy.monitor_user(), "monitor");
    assert_eq!(copy.persist_pool_max(), 10);
    assert_eq!(copy.persist_max_time(), Duration::from_secs(3600));
    assert_eq!(copy.custom_parameter("weight").as_deref(), Some("heavy"));
    assert_eq!(copy.config_string(), server.config_string());

    workers.shutdown();
}
