//! Parameter schemas.
//!
//! A backend server knows a fixed set of its own parameters; the protocol
//! module it speaks contributes more. Anything outside both sets is a custom
//! parameter and is kept verbatim.

use std::collections::HashMap;

pub const CN_TYPE: &str = "type";
pub const CN_ADDRESS: &str = "address";
pub const CN_SOCKET: &str = "socket";
pub const CN_PROTOCOL: &str = "protocol";
pub const CN_PORT: &str = "port";
pub const CN_EXTRA_PORT: &str = "extra_port";
pub const CN_AUTHENTICATOR: &str = "authenticator";
pub const CN_MONITORUSER: &str = "monitoruser";
pub const CN_MONITORPW: &str = "monitorpw";
pub const CN_PERSISTPOOLMAX: &str = "persistpoolmax";
pub const CN_PERSISTMAXTIME: &str = "persistmaxtime";
pub const CN_PROXY_PROTOCOL: &str = "proxy_protocol";
pub const CN_SSL: &str = "ssl";
pub const CN_SSL_CERT: &str = "ssl_cert";
pub const CN_SSL_KEY: &str = "ssl_key";
pub const CN_SSL_CA_CERT: &str = "ssl_ca_cert";
pub const CN_SSL_VERSION: &str = "ssl_version";
pub const CN_SSL_CERT_VERIFY_DEPTH: &str = "ssl_cert_verify_depth";
pub const CN_SSL_VERIFY_PEER_CERTIFICATE: &str = "ssl_verify_peer_certificate";
pub const CN_DISK_SPACE_THRESHOLD: &str = "disk_space_threshold";
pub const CN_RANK: &str = "rank";

/// Value kind of a schema parameter.
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum ParamKind {
    String,
    Count,
    Bool,
    Duration,
    Enum,
    Path,
}

/// One entry of a parameter schema.
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub struct ParamSpec {
    pub name: &'static str,
    pub kind: ParamKind,
    pub default: Option<&'static str>,
}

impl ParamSpec {
    pub const fn new(name: &'static str, kind: ParamKind, default: Option<&'static str>) -> Self {
        Self { name, kind, default }
    }
}

const SERVER_PARAMS: &[ParamSpec] = &[
    ParamSpec::new(CN_TYPE, ParamKind::String, Some("server")),
    ParamSpec::new(CN_ADDRESS, ParamKind::String, None),
    ParamSpec::new(CN_SOCKET, ParamKind::String, None),
    ParamSpec::new(CN_PROTOCOL, ParamKind::String, None),
    ParamSpec::new(CN_PORT, ParamKind::Count, Some("3306")),
    ParamSpec::new(CN_EXTRA_PORT, ParamKind::Count, Some("0")),
    ParamSpec::new(CN_AUTHENTICATOR, ParamKind::String, None),
    ParamSpec::new(CN_MONITORUSER, ParamKind::String, None),
    ParamSpec::new(CN_MONITORPW, ParamKind::String, None),
    ParamSpec::new(CN_PERSISTPOOLMAX, ParamKind::Count, Some("0")),
    ParamSpec::new(CN_PERSISTMAXTIME, ParamKind::Duration, Some("0")),
    ParamSpec::new(CN_PROXY_PROTOCOL, ParamKind::Bool, Some("false")),
    ParamSpec::new(CN_SSL, ParamKind::Enum, Some("false")),
    ParamSpec::new(CN_SSL_CERT, ParamKind::Path, None),
    ParamSpec::new(CN_SSL_KEY, ParamKind::Path, None),
    ParamSpec::new(CN_SSL_CA_CERT, ParamKind::Path, None),
    ParamSpec::new(CN_SSL_VERSION, ParamKind::Enum, Some("MAX")),
    ParamSpec::new(CN_SSL_CERT_VERIFY_DEPTH, ParamKind::Count, Some("9")),
    ParamSpec::new(CN_SSL_VERIFY_PEER_CERTIFICATE, ParamKind::Bool, Some("true")),
    ParamSpec::new(CN_DISK_SPACE_THRESHOLD, ParamKind::String, None),
    ParamSpec::new(CN_RANK, ParamKind::Enum, Some("primary")),
];

/// Parameters every backend server understands, in canonical output order.
pub fn server_params() -> &'static [ParamSpec] {
    SERVER_PARAMS
}

/// Source of protocol module parameter schemas.
///
/// Implemented by whatever owns the loaded protocol modules. An unknown
/// protocol has an empty schema.
pub trait ProtocolModules: Send + Sync {
    fn parameters(&self, protocol: &str) -> &[ParamSpec];
}

/// A fixed, in-memory module registry.
#[derive(Debug, Default, Clone)]
pub struct StaticModules {
    modules: HashMap<String, Vec<ParamSpec>>,
}

impl StaticModules {
    pub fn new() -> Self {
        Self::default()
    }

    /// Registry with the protocol modules shipped with the gateway.
    pub fn builtin() -> Self {
        let mut modules = Self::new();
        let mariadb = vec![ParamSpec::new("connection_keepalive", ParamKind::Duration, Some("300s"))];
        modules.register("mariadbbackend", mariadb.clone());
        modules.register("mariadb", mariadb.clone());
        modules.register("mysql", mariadb);
        modules.register(
            "postgres",
            vec![ParamSpec::new("database", ParamKind::String, Some("postgres"))],
        );
        modules
    }

    /// Add or replace a module schema. Module names are case-insensitive.
    pub fn register(&mut self, protocol: &str, params: Vec<ParamSpec>) {
        self.modules.insert(protocol.to_ascii_lowercase(), params);
    }
}

impl ProtocolModules for StaticModules {
    fn parameters(&self, protocol: &str) -> &[ParamSpec] {
        self.modules
            .get(&protocol.to_ascii_lowercase())
            .map(Vec::as_slice)
            .unwrap_or(&[])
    }
}
