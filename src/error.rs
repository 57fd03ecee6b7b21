//! Error types for Growth Flux

use chrono::{DateTime, Utc};
use thiserror::Error;

/// Errors that can occur during scoring
#[derive(Debug, Error)]
pub enum ScoreError {
    #[error("Invalid config profile: {0}")]
    InvalidConfig(String),

    #[error("Out-of-order observation: {timestamp} is earlier than last observation at {last_observed_at}")]
    OutOfOrderObservation {
        last_observed_at: DateTime<Utc>,
        timestamp: DateTime<Utc>,
    },

    #[error("Numerical instability: {0}")]
    NumericalInstability(String),

    #[error("Insufficient history: state is not reliable after {observed} observations")]
    InsufficientHistory { observed: u32 },

    #[error("Invalid observation: {0}")]
    InvalidObservation(String),

    #[error("Invalid prediction horizon: {0}")]
    InvalidHorizon(f64),

    #[error("Unknown tag: {0}")]
    UnknownTag(String),

    #[error("Invalid tag metadata: {0}")]
    InvalidTag(String),

    #[error("Weight out of range 1-10: {0}")]
    InvalidWeight(f64),

    #[error("Failed to parse input: {0}")]
    ParseError(String),

    #[error("Invalid JSON: {0}")]
    JsonError(#[from] serde_json::Error),

    #[error("Encoding error: {0}")]
    EncodingError(String),
}

impl ScoreError {
    /// Stable machine-readable code, used by the CLI and report payloads
    pub fn code(&self) -> &'static str {
        match self {
            ScoreError::InvalidConfig(_) => "invalid_config",
            ScoreError::OutOfOrderObservation { .. } => "out_of_order_observation",
            ScoreError::NumericalInstability(_) => "numerical_instability",
            ScoreError::InsufficientHistory { .. } => "insufficient_history",
            ScoreError::InvalidObservation(_) => "invalid_observation",
            ScoreError::InvalidHorizon(_) => "invalid_horizon",
            ScoreError::UnknownTag(_) => "unknown_tag",
            ScoreError::InvalidTag(_) => "invalid_tag",
            ScoreError::InvalidWeight(_) => "invalid_weight",
            ScoreError::ParseError(_) => "parse_error",
            ScoreError::JsonError(_) => "json_error",
            ScoreError::EncodingError(_) => "encoding_error",
        }
    }
}
