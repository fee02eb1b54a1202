//! Capacity-limited text fields.
//!
//! Address and monitor credentials are read by reporting and logging code
//! while monitors and admin commands rewrite them. Readers always get a
//! complete old or new value, never a mix. A write over capacity is rejected
//! and the old value stays in place.

use std::sync::{PoisonError, RwLock};

use crate::error::{ServerError, ServerResult};

pub const MAX_ADDRESS_LEN: usize = 1024;
pub const MAX_MONUSER_LEN: usize = 512;
pub const MAX_MONPW_LEN: usize = 512;
pub const MAX_VERSION_LEN: usize = 256;

#[derive(Debug)]
pub(crate) struct BoundedText {
    name: &'static str,
    max_len: usize,
    value: RwLock<String>,
}

impl BoundedText {
    pub(crate) fn new(name: &'static str, max_len: usize) -> Self {
        Self {
            name,
            max_len,
            value: RwLock::new(String::new()),
        }
    }

    pub(crate) fn set(&self, value: &str) -> ServerResult<()> {
        if value.len() > self.max_len {
            tracing::error!(
                param = self.name,
                max = self.max_len,
                len = value.len(),
                "rejected oversized value"
            );
            return Err(ServerError::TooLong {
                name: self.name,
                max: self.max_len,
            });
        }
        let mut current = self.value.write().unwrap_or_else(PoisonError::into_inner);
        current.clear();
        current.push_str(value);
        Ok(())
    }

    pub(crate) fn get(&self) -> String {
        self.value
            .read()
            .unwrap_or_else(PoisonError::into_inner)
            .clone()
    }
}
