//! Server parameter store.
//!
//! Every parameter a server was configured with lives in the canonical map.
//! Parameters that neither the server schema nor the protocol module schema
//! knows are custom: they are additionally kept in their own map, which
//! routers read concurrently (e.g. weighting parameters), so it sits behind
//! its own lock.

use std::collections::{BTreeMap, HashSet};
use std::fmt::Write;
use std::sync::{Arc, Mutex, PoisonError, RwLock};

use sqlgate_core::ParamSpec;
use sqlgate_core::ProtocolModules;
use sqlgate_core::schema::server_params;

pub struct ParameterStore {
    protocol: String,
    modules: Arc<dyn ProtocolModules>,
    /// Written only by construction and serialized admin updates.
    all: RwLock<BTreeMap<String, String>>,
    custom: Mutex<BTreeMap<String, String>>,
}

impl ParameterStore {
    pub fn new(protocol: &str, modules: Arc<dyn ProtocolModules>) -> Self {
        Self {
            protocol: protocol.to_string(),
            modules,
            all: RwLock::new(BTreeMap::new()),
            custom: Mutex::new(BTreeMap::new()),
        }
    }

    /// Load a full parameter set, classifying each entry.
    pub fn load<'a>(&self, params: impl IntoIterator<Item = (&'a String, &'a String)>) {
        for (name, value) in params {
            self.set(name, value);
        }
    }

    /// True if `name` is in neither the server schema nor the schema of the
    /// server's protocol module.
    pub fn is_custom(&self, name: &str) -> bool {
        let known = |specs: &[ParamSpec]| specs.iter().any(|p| p.name == name);
        !known(server_params()) && !known(self.modules.parameters(&self.protocol))
    }

    /// Set a parameter, routing it to the custom map when it is unknown.
    pub fn set(&self, name: &str, value: &str) {
        if self.is_custom(name) {
            self.set_custom(name, value);
        } else {
            self.set_normal(name, value);
        }
    }

    /// Set a known parameter in the canonical map only.
    pub fn set_normal(&self, name: &str, value: &str) {
        self.all
            .write()
            .unwrap_or_else(PoisonError::into_inner)
            .insert(name.to_string(), value.to_string());
    }

    /// Set a custom parameter. It goes into both maps.
    pub fn set_custom(&self, name: &str, value: &str) {
        self.set_normal(name, value);
        self.custom
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
            .insert(name.to_string(), value.to_string());
    }

    pub fn get_custom(&self, name: &str) -> Option<String> {
        self.custom
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
            .get(name)
            .cloned()
    }

    pub fn get(&self, name: &str) -> Option<String> {
        self.all
            .read()
            .unwrap_or_else(PoisonError::into_inner)
            .get(name)
            .cloned()
    }

    /// Copy of every parameter, custom ones included.
    pub fn all(&self) -> BTreeMap<String, String> {
        self.all.read().unwrap_or_else(PoisonError::into_inner).clone()
    }

    /// Copy of the custom parameters only.
    pub fn custom(&self) -> BTreeMap<String, String> {
        self.custom
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
            .clone()
    }

    /// Render the server section in its persisted form.
    ///
    /// Known parameters go through [`generate_config_string`] in schema
    /// order; custom parameters follow verbatim, one `name=value` per line.
    pub fn to_config_string(&self, section: &str) -> String {
        let mut config = {
            let all = self.all.read().unwrap_or_else(PoisonError::into_inner);
            generate_config_string(
                section,
                &all,
                &[server_params(), self.modules.parameters(&self.protocol)],
            )
        };

        let custom = self.custom.lock().unwrap_or_else(PoisonError::into_inner);
        for (name, value) in custom.iter() {
            let _ = writeln!(config, "{name}={value}");
        }
        config
    }
}

impl std::fmt::Debug for ParameterStore {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("ParameterStore")
            .field("protocol", &self.protocol)
            .field("all", &self.all())
            .finish_non_exhaustive()
    }
}

/// Generic section formatter: `[section]` followed by every schema parameter
/// that has a non-empty value. Parameters outside the schemas are skipped.
pub fn generate_config_string(
    section: &str,
    params: &BTreeMap<String, String>,
    schemas: &[&[ParamSpec]],
) -> String {
    let mut out = format!("[{section}]\n");
    let mut written = HashSet::new();

    for spec in schemas.iter().flat_map(|s| s.iter()) {
        if !written.insert(spec.name) {
            continue;
        }
        if let Some(value) = params.get(spec.name).filter(|v| !v.is_empty()) {
            let _ = writeln!(out, "{}={}", spec.name, value);
        }
    }
    out
}
