//! sqlgate-backend — the backend server core of the gateway.
//!
//! One [`Server`] exists per configured database backend. It is shared by
//! every routing worker and holds everything the gateway knows about that
//! backend.
//!
//! # Architecture
//!
//! ```text
//!                    ┌──────────────────────────────────────────┐
//!  monitor ────────► │ Server                                   │
//!   status bits      │  StatusState        (atomic bitmask)     │
//!   response times   │  ResponseTimeEstimator (adaptive EMA)    │
//!   version, lag     │  VersionInfo                             │
//!                    │  ParameterStore     (canonical + custom) │
//!  admin ──────────► │  settings           (atomics, bounded)   │
//!   updates, persist │                                          │
//!                    │  ConnectionPool                          │
//!  sessions ───────► │   shard 0 │ shard 1 │ ... │ shard N-1    │
//!   acquire/release  └─────▲─────────▲───────────────▲──────────┘
//!                          │         │               │
//!                     worker 0   worker 1   ...  worker N-1
//!                          RoutingWorkers (one thread each)
//! ```
//!
//! Each pool shard belongs to exactly one routing worker and is only touched
//! from it; cross-worker maintenance goes through
//! [`RoutingWorkers::broadcast`].

pub mod error;
pub mod params;
pub mod persist;
pub mod pool;
pub mod response_time;
pub mod server;
pub mod snapshot;
pub mod stats;
pub mod status;
mod text;
pub mod version;
pub mod worker;

pub use error::{ServerError, ServerResult};
pub use params::{ParameterStore, generate_config_string};
pub use pool::{ConnectionBackend, ConnectionPool, EvictionPolicy, PooledConnection};
pub use response_time::ResponseTimeEstimator;
pub use server::Server;
pub use snapshot::{ServerSnapshot, ServerStatistics};
pub use stats::{ConnectionStats, PoolStats};
pub use status::{StatusBit, StatusBits, StatusState, status_from_string, status_to_string};
pub use text::{MAX_ADDRESS_LEN, MAX_MONPW_LEN, MAX_MONUSER_LEN, MAX_VERSION_LEN};
pub use version::{ServerKind, Version, VersionInfo};
pub use worker::{RoutingWorkers, WorkerId, current_worker_id};
