//! Error types for the dualwatch analysis core
//!
//! One taxonomy covers the whole chain: retrieval failures degrade to empty
//! results, generation failures are caught at stage level, malformed model
//! output is distinct from transport failure, and aggregation only fails on
//! unreadable input artifacts.

use thiserror::Error;

/// Main error type for the analysis system
#[derive(Error, Debug)]
pub enum AnalysisError {
    /// Vector index backend unreachable or query rejected
    #[error("Retrieval error: {0}")]
    Retrieval(String),

    /// External generation call failed (transport, status, or timeout)
    #[error("Generation error: {0}")]
    Generation(String),

    /// Generation succeeded but the response failed schema/JSON parsing
    #[error("Malformed generation response: {reason} | raw: {raw_prefix}")]
    MalformedResponse { reason: String, raw_prefix: String },

    /// Embedding call failed
    #[error("Embedding error: {0}")]
    Embedding(String),

    /// Ingestion input file missing or structurally invalid
    #[error("Input error: {0}")]
    Input(String),

    /// Aggregation input artifact missing or structurally invalid
    #[error("Aggregation input error: {0}")]
    AggregationInput(String),

    /// Configuration errors
    #[error("Configuration error: {0}")]
    Config(String),

    /// Timeout on an external call
    #[error("Operation timed out after {duration_ms}ms")]
    Timeout { duration_ms: u64 },

    /// HTTP client errors
    #[error("HTTP request failed: {0}")]
    Http(#[from] reqwest::Error),

    /// Serialization errors
    #[error("Serialization error: {0}")]
    Serialization(#[from] serde_json::Error),

    /// I/O errors
    #[error("I/O error: {0}")]
    Io(#[from] std::io::Error),

    /// Generic errors with context
    #[error("Error: {0}")]
    Generic(String),
}

/// Result type alias for analysis operations
pub type Result<T> = std::result::Result<T, AnalysisError>;

/// Convert anyhow errors to AnalysisError
impl From<anyhow::Error> for AnalysisError {
    fn from(err: anyhow::Error) -> Self {
        AnalysisError::Generic(err.to_string())
    }
}

impl AnalysisError {
    /// Build a malformed-response error with the raw text truncated for diagnostics
    pub fn malformed(reason: impl Into<String>, raw: &str) -> Self {
        let raw_prefix: String = raw.chars().take(500).collect();
        AnalysisError::MalformedResponse {
            reason: reason.into(),
            raw_prefix,
        }
    }
}
