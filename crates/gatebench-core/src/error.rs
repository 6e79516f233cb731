//! Error types for gatebench operations

use std::path::PathBuf;
use thiserror::Error;

/// Result type alias for gatebench operations
pub type Result<T> = std::result::Result<T, BenchError>;

/// Errors that can occur while configuring or running a benchmark
#[derive(Error, Debug)]
pub enum BenchError {
    // === Configuration ===
    /// Both load modes were requested
    #[error("Rate ({rate}/s) and concurrency ({concurrency}) are mutually exclusive; set only one")]
    ConflictingModes { rate: u32, concurrency: usize },

    /// Neither load mode was requested
    #[error("No load mode configured: set a rate > 0 or a concurrency > 0")]
    NoLoadMode,

    /// Configuration value out of range
    #[error("Invalid configuration: {0}")]
    InvalidConfig(String),

    /// Requested target is not configured
    #[error("Target '{name}' not found. Available targets: {available:?}")]
    UnknownTarget { name: String, available: Vec<String> },

    /// Configuration file could not be read
    #[error("Failed to read config file {path}: {source}")]
    ConfigRead {
        path: PathBuf,
        #[source]
        source: std::io::Error,
    },

    /// Configuration file is not valid TOML
    #[error("Failed to parse config file: {0}")]
    ConfigParse(#[from] toml::de::Error),

    // === Requests ===
    /// A request descriptor could not be produced
    #[error("Request generation failed: {0}")]
    RequestGeneration(String),

    /// HTTP client construction failed
    #[error("HTTP client error: {0}")]
    HttpClient(String),

    // === Results ===
    /// Result document could not be serialized
    #[error("Failed to serialize results: {0}")]
    Serialization(#[from] serde_json::Error),

    /// Result document could not be written
    #[error("Failed to write results to {path}: {source}")]
    ResultWrite {
        path: PathBuf,
        #[source]
        source: std::io::Error,
    },
}

impl BenchError {
    /// Whether this error must halt the whole benchmark run.
    ///
    /// Configuration problems abort before any target runs and a failed result write
    /// loses the run's only durable output. Everything else is recovered where it occurs.
    pub fn is_fatal(&self) -> bool {
        matches!(
            self,
            BenchError::ConflictingModes { .. }
                | BenchError::NoLoadMode
                | BenchError::InvalidConfig(_)
                | BenchError::UnknownTarget { .. }
                | BenchError::ConfigRead { .. }
                | BenchError::ConfigParse(_)
                | BenchError::HttpClient(_)
                | BenchError::Serialization(_)
                | BenchError::ResultWrite { .. }
        )
    }
}
