//! Error types for detection and provisioning

use thiserror::Error;
use uuid::Uuid;

/// Faults raised by detectors, either at construction or on classify
#[derive(Debug, Error)]
pub enum DetectorError {
    /// The observation cannot be classified. State is left untouched.
    #[error("Invalid input: {0}")]
    InvalidInput(String),

    /// A construction parameter is out of range
    #[error("Invalid parameter: {name} - {reason}")]
    InvalidParameter { name: &'static str, reason: String },

    /// Tail mode not one of left, right or two
    #[error("Illegal tail: {0}")]
    IllegalTail(String),
}

impl DetectorError {
    pub(crate) fn invalid_parameter(name: &'static str, reason: impl Into<String>) -> Self {
        DetectorError::InvalidParameter {
            name,
            reason: reason.into(),
        }
    }
}

/// Failure to bind an untyped parameter map to a typed parameter set
#[derive(Debug, Error)]
pub enum ParamsError {
    #[error("No detector parameters supplied")]
    Missing,

    #[error("Malformed detector parameters: {0}")]
    Malformed(#[from] serde_json::Error),
}

/// Failure to provision a detector for a model identifier
#[derive(Debug, Error)]
pub enum ProvisionError {
    #[error("No detector model registered for {0}")]
    NotFound(Uuid),

    #[error(transparent)]
    Params(#[from] ParamsError),

    #[error(transparent)]
    Detector(#[from] DetectorError),
}

/// Unrecognized anomaly level text
#[derive(Debug, Error, PartialEq, Eq)]
#[error("Unknown anomaly level: {0}")]
pub struct LevelParseError(pub String);

/// Result type for detector operations
pub type Result<T> = std::result::Result<T, DetectorError>;
