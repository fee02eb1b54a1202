//! Error types for backend server operations.

use std::path::PathBuf;

use thiserror::Error;

/// Result type alias for backend server operations.
pub type ServerResult<T> = Result<T, ServerError>;

/// Errors raised by backend server construction, updates and persistence.
///
/// A pool miss is not an error: `acquire` returns `None` and the caller
/// opens a fresh connection.
#[derive(Debug, Error)]
pub enum ServerError {
    #[error("'{defined}' is defined for server '{server}', '{missing}' must also be defined")]
    CredentialPair {
        server: String,
        defined: &'static str,
        missing: &'static str,
    },

    #[error("the new value for {name} is too long, maximum length is {max} characters")]
    TooLong { name: &'static str, max: usize },

    #[error("invalid configuration: {0}")]
    Config(#[from] sqlgate_core::ConfigError),

    #[error("failed to {action} '{}': {source}", path.display())]
    Persistence {
        action: &'static str,
        path: PathBuf,
        #[source]
        source: std::io::Error,
    },
}

impl ServerError {
    /// Whether the error was caused by bad settings rather than I/O.
    pub fn is_configuration(&self) -> bool {
        !matches!(self, ServerError::Persistence { .. })
    }
}
