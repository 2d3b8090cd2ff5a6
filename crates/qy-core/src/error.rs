//! Error taxonomy for the query pipeline.

use thiserror::Error;

/// Result type alias for pipeline operations.
pub type Result<T> = std::result::Result<T, Error>;

#[derive(Error, Debug)]
pub enum Error {
    /// The request could not be turned into a query (service unreachable,
    /// reply not JSON, reply not an array). Never retried.
    #[error("Translation failed: {0}")]
    Translation(String),

    /// A repair call failed. Ends the retry loop immediately.
    #[error("Query repair failed: {0}")]
    Repair(String),

    /// The store rejected every attempt.
    #[error("Query failed after {attempts} attempts: {message}")]
    Execution { attempts: u32, message: String },

    /// The store could not be reached or is not connected.
    #[error("Connection error: {0}")]
    Connection(String),

    /// A single store-side failure, reported opaquely.
    #[error("{0}")]
    Store(String),

    /// Transport or protocol failure talking to the reasoning service.
    #[error("Reasoning service error: {0}")]
    Reasoning(String),

    #[error("Configuration error: {0}")]
    Config(String),

    #[error("IO error: {0}")]
    Io(#[from] std::io::Error),

    #[error("JSON error: {0}")]
    Json(#[from] serde_json::Error),
}

impl Error {
    /// Short machine-readable name, used in API error bodies.
    pub fn kind(&self) -> &'static str {
        match self {
            Self::Translation(_) => "translation",
            Self::Repair(_) => "repair",
            Self::Execution { .. } => "execution",
            Self::Connection(_) => "connection",
            Self::Store(_) => "store",
            Self::Reasoning(_) => "reasoning",
            Self::Config(_) => "config",
            Self::Io(_) => "io",
            Self::Json(_) => "json",
        }
    }
}
