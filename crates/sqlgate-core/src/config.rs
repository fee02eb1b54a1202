//! sqlgate.toml configuration parser.

use serde::{Deserialize, Serialize};
use std::collections::BTreeMap;
use std::path::{Path, PathBuf};
use std::time::Duration;

use crate::error::{ConfigError, ConfigResult};
use crate::settings::{ServerSettings, parse_duration};

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct GatewayConfig {
    #[serde(default)]
    pub gateway: GatewaySection,
    /// Server sections keyed by server name. Values are kept raw so that
    /// parameters unknown to the gateway survive untouched.
    #[serde(default)]
    pub servers: BTreeMap<String, BTreeMap<String, toml::Value>>,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct GatewaySection {
    /// Number of routing worker threads.
    pub threads: usize,
    /// How often idle pooled connections are swept (e.g. "10s").
    pub maintenance_interval: String,
    /// Directory for runtime-persisted server sections.
    pub persist_dir: PathBuf,
}

impl Default for GatewaySection {
    fn default() -> Self {
        Self {
            threads: 4,
            maintenance_interval: "10s".to_string(),
            persist_dir: PathBuf::from("/var/lib/sqlgate/persisted"),
        }
    }
}

impl GatewayConfig {
    pub fn from_file(path: &Path) -> ConfigResult<Self> {
        let content = std::fs::read_to_string(path)?;
        Self::from_toml_str(&content)
    }

    pub fn from_toml_str(content: &str) -> ConfigResult<Self> {
        Ok(toml::from_str(content)?)
    }

    pub fn maintenance_interval(&self) -> ConfigResult<Duration> {
        let raw = &self.gateway.maintenance_interval;
        parse_duration(raw)
            .filter(|d| !d.is_zero())
            .ok_or_else(|| ConfigError::InvalidValue {
                name: "maintenance_interval".to_string(),
                value: raw.clone(),
            })
    }

    /// Typed settings for every configured server.
    pub fn server_settings(&self) -> ConfigResult<Vec<(String, ServerSettings)>> {
        self.servers
            .iter()
            .map(|(name, section)| {
                let raw = section
                    .iter()
                    .map(|(k, v)| (k.clone(), value_to_string(v)))
                    .collect();
                Ok((name.clone(), ServerSettings::from_parameters(raw)?))
            })
            .collect()
    }
}

fn value_to_string(value: &toml::Value) -> String {
    match value {
        toml::Value::String(s) => s.clone(),
        other => other.to_string(),
    }
}
