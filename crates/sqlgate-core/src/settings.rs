//! Typed server settings.
//!
//! [`ServerSettings`] is the already-validated record a backend server is
//! created from. [`ServerSettings::from_parameters`] builds one from the raw
//! `name=value` pairs of a server section.

use std::collections::BTreeMap;
use std::fmt;
use std::str::FromStr;
use std::time::Duration;

use serde::{Deserialize, Serialize};

use crate::error::{ConfigError, ConfigResult};
use crate::schema::*;

/// Routing preference of a server. Lower ranks are preferred.
#[derive(Clone, Copy, Debug, PartialEq, Eq, PartialOrd, Ord, Hash, Default, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum Rank {
    #[default]
    Primary = 1,
    Secondary = 2,
}

impl fmt::Display for Rank {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Rank::Primary => write!(f, "primary"),
            Rank::Secondary => write!(f, "secondary"),
        }
    }
}

impl FromStr for Rank {
    type Err = ConfigError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.trim().to_ascii_lowercase().as_str() {
            "primary" => Ok(Rank::Primary),
            "secondary" => Ok(Rank::Secondary),
            _ => Err(ConfigError::InvalidValue {
                name: CN_RANK.to_string(),
                value: s.to_string(),
            }),
        }
    }
}

/// Settings for a single backend server.
#[derive(Clone, Debug, PartialEq)]
pub struct ServerSettings {
    /// Network address or, when `socket` was given, the socket path.
    pub address: String,
    pub port: u16,
    pub extra_port: u16,
    /// Name of the protocol module used to talk to the server.
    pub protocol: String,
    /// Maximum number of idle pooled connections (0 disables pooling).
    pub persist_pool_max: usize,
    /// Maximum time a pooled connection may sit idle.
    pub persist_max_time: Duration,
    pub proxy_protocol: bool,
    pub rank: Rank,
    pub monitor_user: Option<String>,
    pub monitor_password: Option<String>,
    pub disk_space_threshold: Option<String>,
    /// Every raw parameter of the server section, known or not.
    pub parameters: BTreeMap<String, String>,
}

impl Default for ServerSettings {
    fn default() -> Self {
        Self {
            address: String::new(),
            port: 3306,
            extra_port: 0,
            protocol: "mariadb".to_string(),
            persist_pool_max: 0,
            persist_max_time: Duration::ZERO,
            proxy_protocol: false,
            rank: Rank::Primary,
            monitor_user: None,
            monitor_password: None,
            disk_space_threshold: None,
            parameters: BTreeMap::new(),
        }
    }
}

impl ServerSettings {
    /// Build typed settings from the raw parameters of a server section.
    ///
    /// Unknown parameters are carried along in `parameters` untouched.
    pub fn from_parameters(parameters: BTreeMap<String, String>) -> ConfigResult<Self> {
        let get = |name: &str| parameters.get(name).map(|v| v.trim()).filter(|v| !v.is_empty());

        let protocol = get(CN_PROTOCOL)
            .ok_or_else(|| ConfigError::Missing(CN_PROTOCOL.to_string()))?
            .to_string();
        let address = get(CN_ADDRESS)
            .or_else(|| get(CN_SOCKET))
            .ok_or_else(|| ConfigError::Missing(CN_ADDRESS.to_string()))?
            .to_string();

        let port = parse_number(CN_PORT, get(CN_PORT), 3306)?;
        let extra_port = parse_number(CN_EXTRA_PORT, get(CN_EXTRA_PORT), 0)?;
        let persist_pool_max = parse_number(CN_PERSISTPOOLMAX, get(CN_PERSISTPOOLMAX), 0)?;

        let persist_max_time = match get(CN_PERSISTMAXTIME) {
            Some(v) => parse_duration(v).ok_or_else(|| invalid(CN_PERSISTMAXTIME, v))?,
            None => Duration::ZERO,
        };
        let proxy_protocol = match get(CN_PROXY_PROTOCOL) {
            Some(v) => parse_bool(v).ok_or_else(|| invalid(CN_PROXY_PROTOCOL, v))?,
            None => false,
        };
        let rank = match get(CN_RANK) {
            Some(v) => v.parse()?,
            None => Rank::default(),
        };

        Ok(Self {
            address,
            port,
            extra_port,
            protocol,
            persist_pool_max,
            persist_max_time,
            proxy_protocol,
            rank,
            monitor_user: get(CN_MONITORUSER).map(str::to_string),
            monitor_password: get(CN_MONITORPW).map(str::to_string),
            disk_space_threshold: get(CN_DISK_SPACE_THRESHOLD).map(str::to_string),
            parameters,
        })
    }
}

fn invalid(name: &str, value: &str) -> ConfigError {
    ConfigError::InvalidValue {
        name: name.to_string(),
        value: value.to_string(),
    }
}

fn parse_number<T: FromStr>(name: &str, value: Option<&str>, default: T) -> ConfigResult<T> {
    match value {
        Some(v) => v.parse().map_err(|_| invalid(name, v)),
        None => Ok(default),
    }
}

/// Parse a boolean in any of the spellings accepted in server sections.
pub fn parse_bool(s: &str) -> Option<bool> {
    match s.trim().to_ascii_lowercase().as_str() {
        "true" | "yes" | "on" | "1" => Some(true),
        "false" | "no" | "off" | "0" => Some(false),
        _ => None,
    }
}

/// Parse a duration string like "300", "5s", "500ms", "2m" or "1h".
///
/// A bare number is taken as seconds.
pub fn parse_duration(s: &str) -> Option<Duration> {
    let s = s.trim();
    if let Some(ms) = s.strip_suffix("ms") {
        ms.parse::<u64>().ok().map(Duration::from_millis)
    } else if let Some(secs) = s.strip_suffix('s') {
        secs.parse::<u64>().ok().map(Duration::from_secs)
    } else if let Some(mins) = s.strip_suffix('m') {
        mins.parse::<u64>().ok().map(|m| Duration::from_secs(m * 60))
    } else if let Some(hours) = s.strip_suffix('h') {
        hours.parse::<u64>().ok().map(|h| Duration::from_secs(h * 3600))
    } else {
        s.parse::<u64>().ok().map(Duration::from_secs)
    }
}

/// Render a duration so that [`parse_duration`] reads it back unchanged.
///
/// Whole seconds are written as "60s", anything finer as milliseconds.
pub fn format_duration(d: Duration) -> String {
    if d.subsec_millis() == 0 {
        format!("{}s", d.as_secs())
    } else {
        format!("{}ms", d.as_millis())
    }
}
