//! Error types for the pattern-mining core

use thiserror::Error;

/// Error type for song analysis and pattern mining
#[derive(Debug, Error)]
pub enum MineError {
    /// E001: Configuration validation failed
    #[error("E001: Configuration validation failed - {0}")]
    ConfigValidationFailed(String),

    /// E002: Invalid configuration parameter
    #[error("E002: Invalid configuration parameter - {0}")]
    InvalidConfigParameter(String),

    /// E003: Time signature that cannot describe a bar
    #[error("E003: Invalid time signature {numerator}/{denominator}")]
    InvalidTimeSignature { numerator: u8, denominator: u8 },

    /// E004: Internal inconsistency between stages (a programming error)
    #[error("E004: Contract violation - {0}")]
    ContractViolation(String),

    /// E005: The pattern registry task is gone
    #[error("E005: Pattern registry unavailable - {0}")]
    RegistryUnavailable(String),

    /// E006: A per-song analysis task failed
    #[error("E006: Processing pipeline error - {0}")]
    ProcessingPipelineError(String),

    /// E007: File I/O error
    #[error("E007: File I/O error - {0}")]
    Io(#[from] std::io::Error),

    /// E008: JSON serialization error
    #[error("E008: JSON serialization error - {0}")]
    Json(#[from] serde_json::Error),
}

impl From<anyhow::Error> for MineError {
    fn from(err: anyhow::Error) -> Self {
        MineError::ProcessingPipelineError(format!("Generic error: {}", err))
    }
}

/// Result type alias for pattern-mining operations
pub type Result<T> = std::result::Result<T, MineError>;
