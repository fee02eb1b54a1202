//! sqlgate-core — types shared between the gateway daemon and the backend core.
//!
//! Holds the already-validated [`ServerSettings`] record handed to a backend
//! server at creation, the parameter schemas used to tell canonical from
//! custom parameters, and the daemon's [`GatewayConfig`].

pub mod config;
pub mod disk;
pub mod error;
pub mod schema;
pub mod settings;

pub use config::GatewayConfig;
pub use disk::DiskSpaceLimits;
pub use error::{ConfigError, ConfigResult};
pub use schema::{ParamKind, ParamSpec, ProtocolModules, StaticModules};
pub use settings::{Rank, ServerSettings};
