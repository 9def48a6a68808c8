//! Common error types.

use thiserror::Error;

/// Common result type for tierbuf operations.
pub type Result<T> = std::result::Result<T, Error>;

/// Errors shared across tierbuf components.
///
/// Expected outcomes of metadata operations (unknown name, full slot table)
/// are reported as NULL ids or empty strings, not as errors; these variants
/// cover argument validation and configuration problems only.
#[derive(Debug, Error)]
pub enum Error {
    #[error("name '{name}' exceeds the maximum name size of {max} bytes")]
    NameTooLong { name: String, max: usize },

    #[error("configuration error: {0}")]
    Configuration(String),
}

impl Error {
    /// Create a configuration error.
    pub fn configuration(msg: impl Into<String>) -> Self {
        Self::Configuration(msg.into())
    }
}
