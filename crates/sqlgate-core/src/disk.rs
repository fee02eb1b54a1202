//! Disk space threshold parsing.
//!
//! A threshold is a comma separated list of `path:percentage` pairs, e.g.
//! `/data:80,/var/log:90`. Monitors compare these against the server's disk
//! usage.

use std::collections::BTreeMap;
use std::fmt;
use std::str::FromStr;

use crate::error::ConfigError;

/// Per-path maximum disk usage, as a percentage.
#[derive(Clone, Debug, Default, PartialEq, Eq)]
pub struct DiskSpaceLimits {
    limits: BTreeMap<String, u8>,
}

impl DiskSpaceLimits {
    pub fn is_empty(&self) -> bool {
        self.limits.is_empty()
    }

    pub fn len(&self) -> usize {
        self.limits.len()
    }

    /// Limit for a path, if one is configured.
    pub fn get(&self, path: &str) -> Option<u8> {
        self.limits.get(path).copied()
    }

    pub fn iter(&self) -> impl Iterator<Item = (&str, u8)> {
        self.limits.iter().map(|(p, v)| (p.as_str(), *v))
    }
}

impl FromStr for DiskSpaceLimits {
    type Err = ConfigError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        let invalid = || ConfigError::DiskSpaceThreshold(s.to_string());
        let mut limits = BTreeMap::new();

        for entry in s.split(',') {
            let (path, percent) = entry.trim().rsplit_once(':').ok_or_else(invalid)?;
            let path = path.trim();
            if path.is_empty() {
                return Err(invalid());
            }
            let percent: u8 = percent.trim().parse().map_err(|_| invalid())?;
            if percent > 100 {
                return Err(invalid());
            }
            limits.insert(path.to_string(), percent);
        }

        Ok(Self { limits })
    }
}

impl fmt::Display for DiskSpaceLimits {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let mut first = true;
        for (path, percent) in &self.limits {
            if !first {
                write!(f, ",")?;
            }
            write!(f, "{path}:{percent}")?;
            first = false;
        }
        Ok(())
    }
}
