//! Custom error types for the analysis service
//!
//! Every failure in the request pipeline maps to exactly one
//! `AnalysisError` variant, and every variant maps to one HTTP status.

use serde::Serialize;
use std::fmt;
use std::time::Duration;
use thiserror::Error;

/// A single failing field with a human-readable message.
#[derive(Clone, Debug, PartialEq, Serialize)]
pub struct FieldError {
    pub field: String,
    pub message: String,
}

impl FieldError {
    pub fn new(field: impl Into<String>, message: impl Into<String>) -> Self {
        Self {
            field: field.into(),
            message: message.into(),
        }
    }
}

impl fmt::Display for FieldError {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}: {}", self.field, self.message)
    }
}

fn join_fields(fields: &[FieldError]) -> String {
    fields
        .iter()
        .map(ToString::to_string)
        .collect::<Vec<_>>()
        .join("; ")
}

/// Top-level analysis pipeline errors
#[derive(Error, Debug)]
pub enum AnalysisError {
    #[error("Unauthorized")]
    Unauthorized,

    #[error("Invalid request: {}", join_fields(.0))]
    InvalidRequest(Vec<FieldError>),

    #[error("Analysis failed: {0}")]
    AnalysisFailed(#[from] OracleError),

    #[error("Malformed trade plan: {}", join_fields(.0))]
    MalformedTradePlan(Vec<FieldError>),

    #[error("The model's confidence of {confidence} is below the threshold of {threshold}.")]
    LowConfidence { confidence: f64, threshold: f64 },

    #[error("Persistence failure: {0}")]
    PersistenceFailure(#[from] StoreError),
}

/// Chart analysis oracle errors
#[derive(Error, Debug)]
pub enum OracleError {
    #[error("Oracle unavailable: {0}")]
    Unavailable(String),

    #[error("Oracle did not answer within {0:?}")]
    Timeout(Duration),

    #[error("Malformed oracle response: {0}")]
    MalformedResponse(String),
}

impl OracleError {
    /// Transport-level failure, as opposed to a bad reply.
    pub fn is_unavailable(&self) -> bool {
        matches!(self, OracleError::Unavailable(_) | OracleError::Timeout(_))
    }
}

impl From<async_openai::error::OpenAIError> for OracleError {
    fn from(err: async_openai::error::OpenAIError) -> Self {
        use async_openai::error::OpenAIError;
        match err {
            OpenAIError::JSONDeserialize(e) => OracleError::MalformedResponse(e.to_string()),
            other => OracleError::Unavailable(other.to_string()),
        }
    }
}

/// Persistence store errors
#[derive(Error, Debug)]
pub enum StoreError {
    #[error("Database error: {0}")]
    Database(#[from] rusqlite::Error),

    #[error("Serialization error: {0}")]
    Serialization(#[from] serde_json::Error),

    #[error("Integrity violation: {0}")]
    Integrity(String),

    #[error("Store lock poisoned")]
    LockPoisoned,

    #[error("Store task failed: {0}")]
    Task(#[from] tokio::task::JoinError),
}

/// Configuration loading errors
#[derive(Error, Debug)]
pub enum ConfigError {
    #[error("Failed to read {path}: {source}")]
    Io {
        path: String,
        #[source]
        source: std::io::Error,
    },

    #[error("Failed to parse config: {0}")]
    Parse(#[from] serde_yaml::Error),

    #[error("Invalid config value for {field}: {reason}")]
    Invalid { field: String, reason: String },
}
