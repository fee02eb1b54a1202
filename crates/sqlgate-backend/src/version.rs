//! Backend server version information, as reported by monitors.

use std::fmt;
use std::sync::{PoisonError, RwLock};

use serde::Serialize;

use crate::error::{ServerError, ServerResult};
use crate::text::MAX_VERSION_LEN;

/// Server software family, inferred from the version string.
#[derive(Clone, Copy, Debug, Default, PartialEq, Eq, Serialize)]
#[serde(rename_all = "lowercase")]
pub enum ServerKind {
    #[default]
    MariaDB,
    MySQL,
    Clustrix,
}

impl ServerKind {
    fn infer(version: &str) -> Self {
        let lower = version.to_ascii_lowercase();
        if lower.contains("clustrix") {
            ServerKind::Clustrix
        } else if lower.contains("mariadb") {
            ServerKind::MariaDB
        } else {
            ServerKind::MySQL
        }
    }
}

impl fmt::Display for ServerKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            ServerKind::MariaDB => write!(f, "MariaDB"),
            ServerKind::MySQL => write!(f, "MySQL"),
            ServerKind::Clustrix => write!(f, "Clustrix"),
        }
    }
}

/// Numeric version, e.g. 100504 for 10.5.4.
#[derive(Clone, Copy, Debug, Default, PartialEq, Eq, PartialOrd, Ord, Serialize)]
pub struct Version {
    pub total: u64,
    pub major: u32,
    pub minor: u32,
    pub patch: u32,
}

impl Version {
    pub fn from_number(total: u64) -> Self {
        let major = total / 10_000;
        let minor = (total - major * 10_000) / 100;
        let patch = total - major * 10_000 - minor * 100;
        // minor and patch are below 100; only major can overflow.
        Self {
            total,
            major: u32::try_from(major).unwrap_or(u32::MAX),
            minor: minor as u32,
            patch: patch as u32,
        }
    }
}

#[derive(Debug, Default, Clone)]
struct Record {
    number: Version,
    text: String,
    kind: ServerKind,
}

#[derive(Debug, Default)]
pub struct VersionInfo {
    record: RwLock<Record>,
}

impl VersionInfo {
    /// Store a new version. Returns `true` if the version string changed.
    pub fn set(&self, number: u64, text: &str) -> ServerResult<bool> {
        if text.len() > MAX_VERSION_LEN {
            return Err(ServerError::TooLong {
                name: "version_string",
                max: MAX_VERSION_LEN,
            });
        }

        let mut record = self.record.write().unwrap_or_else(PoisonError::into_inner);
        let changed = record.text != text;
        *record = Record {
            number: Version::from_number(number),
            text: text.to_string(),
            kind: ServerKind::infer(text),
        };
        Ok(changed)
    }

    pub fn version(&self) -> Version {
        self.read().number
    }

    pub fn version_string(&self) -> String {
        self.read().text.clone()
    }

    pub fn kind(&self) -> ServerKind {
        self.read().kind
    }

    fn read(&self) -> std::sync::RwLockReadGuard<'_, Record> {
        self.record.read().unwrap_or_else(PoisonError::into_inner)
    }
}
