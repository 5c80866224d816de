//! Online anomaly detection kernel for metric streams
//!
//! This crate provides:
//! - EWMA, PEWMA and CUSUM detectors behind one classification contract
//! - Observation, result and severity types
//! - Provisioning of detectors from untyped parameter maps
//! - Prometheus metrics and structured logging around classification

pub mod anomaly;
pub mod error;
pub mod models;
pub mod observability;
pub mod provision;

pub use anomaly::{
    AnomalyDetector, CusumDetector, CusumParams, CusumState, DetectorKind, EwmaDetector,
    EwmaParams, EwmaState, PewmaDetector, PewmaParams, PewmaState, Tail,
};
pub use error::{DetectorError, LevelParseError, ParamsError, ProvisionError};
pub use models::*;
pub use observability::{DetectorMetrics, InstrumentedDetector, StructuredLogger};
pub use provision::{build_detector, extract_params, DetectorFactory, ModelRegistry, ModelResource};
