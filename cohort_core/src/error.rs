//! Error types for the cohort_core library.

use crate::types::CohortId;
use crate::validator::Violation;
use std::io;

/// Result type alias using our Error type
pub type Result<T> = std::result::Result<T, Error>;

/// Core error type for cohort_core operations
#[derive(Debug, thiserror::Error)]
pub enum Error {
    /// IO error occurred
    #[error("IO error: {0}")]
    Io(#[from] io::Error),

    /// JSON serialization/deserialization error
    #[error("JSON error: {0}")]
    Json(#[from] serde_json::Error),

    /// TOML parsing error
    #[error("TOML error: {0}")]
    Toml(#[from] toml::de::Error),

    /// Configuration validation error
    #[error("Configuration error: {0}")]
    Config(String),

    /// Malformed input to an operation
    #[error("Invalid argument: {0}")]
    InvalidArgument(String),

    /// A service mutation referenced a cohort that does not exist
    #[error("Cohort {0} not found")]
    CohortNotFound(CohortId),

    /// The validator registry rejected an entity before it was saved
    #[error("Validation failed with {} violation(s): {}", .0.len(), summarize(.0))]
    Validation(Vec<Violation>),

    /// Persisted store could not be read or written
    #[error("Store error: {0}")]
    Store(String),
}

fn summarize(violations: &[Violation]) -> String {
    violations
        .iter()
        .map(|v| format!("{}: {}", v.field, v.message))
        .collect::<Vec<_>>()
        .join("; ")
}
