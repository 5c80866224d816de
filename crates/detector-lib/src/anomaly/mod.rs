//! Online anomaly detectors
//!
//! This module provides three single-pass detectors sharing one contract:
//! - EWMA (fixed-weight recursive mean and variance)
//! - PEWMA (likelihood-weighted EWMA with a training phase)
//! - CUSUM (cumulative-sum control chart with tail modes and alarm reset)
//!
//! Each detector owns its state exclusively. Observations for a series must
//! be classified one at a time in arrival order; `classify` takes `&mut self`
//! so the compiler enforces a single writer per instance.

mod cusum;
mod ewma;
mod pewma;

pub use cusum::{CusumDetector, CusumParams, CusumState, Tail, SLACK_FACTOR, UNBIASING_CONSTANT};
pub use ewma::{EwmaDetector, EwmaParams, EwmaState};
pub use pewma::{PewmaDetector, PewmaParams, PewmaState, DEFAULT_TRAINING_LENGTH};

use std::fmt;

use serde::{Deserialize, Serialize};
use uuid::Uuid;

use crate::error::{DetectorError, Result};
use crate::models::{AnomalyLevel, AnomalyResult, Observation};

/// Algorithm behind a detector instance
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum DetectorKind {
    Ewma,
    Pewma,
    Cusum,
}

impl DetectorKind {
    pub fn as_str(&self) -> &'static str {
        match self {
            DetectorKind::Ewma => "ewma",
            DetectorKind::Pewma => "pewma",
            DetectorKind::Cusum => "cusum",
        }
    }
}

impl fmt::Display for DetectorKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// Classification contract shared by all detectors
pub trait AnomalyDetector: Send {
    /// Identifier reported as `detector_id` on every result
    fn id(&self) -> Uuid;

    /// Algorithm implemented by this detector
    fn kind(&self) -> DetectorKind;

    /// Classify the next observation of the series and advance the model
    ///
    /// On error no state is modified.
    fn classify(&mut self, observation: &Observation) -> Result<AnomalyResult>;
}

impl<D: AnomalyDetector + ?Sized> AnomalyDetector for Box<D> {
    fn id(&self) -> Uuid {
        (**self).id()
    }

    fn kind(&self) -> DetectorKind {
        (**self).kind()
    }

    fn classify(&mut self, observation: &Observation) -> Result<AnomalyResult> {
        (**self).classify(observation)
    }
}

/// Reject observations that cannot be classified
pub(crate) fn validate_observation(observation: &Observation) -> Result<()> {
    if observation.series_id.is_empty() {
        return Err(DetectorError::InvalidInput(
            "observation has no series id".to_string(),
        ));
    }
    if !observation.value.is_finite() {
        return Err(DetectorError::InvalidInput(format!(
            "non-finite value {} for series {}",
            observation.value, observation.series_id
        )));
    }
    Ok(())
}

/// Reject an observation whose update would overflow the detector state
///
/// Called with the candidate state before it is committed, so a rejected
/// value leaves the detector as it was.
pub(crate) fn check_state_overflow(observation: &Observation, state: &[f64]) -> Result<()> {
    if state.iter().all(|v| v.is_finite()) {
        Ok(())
    } else {
        Err(DetectorError::InvalidInput(format!(
            "value {} for series {} overflows the detector state",
            observation.value, observation.series_id
        )))
    }
}

pub(crate) fn check_finite(name: &'static str, value: f64) -> Result<()> {
    if value.is_finite() {
        Ok(())
    } else {
        Err(DetectorError::invalid_parameter(name, "must be finite"))
    }
}

pub(crate) fn check_unit_interval(name: &'static str, value: f64) -> Result<()> {
    if (0.0..=1.0).contains(&value) {
        Ok(())
    } else {
        Err(DetectorError::invalid_parameter(
            name,
            "must be in the range [0, 1]",
        ))
    }
}

/// Weak and strong sigma multipliers must be finite, non-negative and ordered
pub(crate) fn check_sigma_pair(
    weak_name: &'static str,
    weak: f64,
    strong_name: &'static str,
    strong: f64,
) -> Result<()> {
    for (name, value) in [(weak_name, weak), (strong_name, strong)] {
        if !value.is_finite() || value < 0.0 {
            return Err(DetectorError::invalid_parameter(
                name,
                "must be a finite, non-negative number of sigmas",
            ));
        }
    }
    if strong < weak {
        return Err(DetectorError::invalid_parameter(
            strong_name,
            format!("must be >= {weak_name}"),
        ));
    }
    Ok(())
}

/// Decision boundaries reported on a result
#[derive(Debug, Clone, Copy, Default, PartialEq)]
pub(crate) struct Thresholds {
    pub weak_upper: Option<f64>,
    pub weak_lower: Option<f64>,
    pub strong_upper: Option<f64>,
    pub strong_lower: Option<f64>,
}

impl Thresholds {
    /// Both sides of a center, `center ± delta`
    pub fn symmetric(center: f64, weak_delta: f64, strong_delta: f64) -> Self {
        Self {
            weak_upper: Some(center + weak_delta),
            weak_lower: Some(center - weak_delta),
            strong_upper: Some(center + strong_delta),
            strong_lower: Some(center - strong_delta),
        }
    }
}

/// Sigma-scaled bands around a mean, used by EWMA and PEWMA
#[derive(Debug, Clone, Copy)]
pub(crate) struct SigmaBands {
    mean: f64,
    std_dev: f64,
    weak_delta: f64,
    strong_delta: f64,
}

impl SigmaBands {
    pub fn new(mean: f64, std_dev: f64, weak_sigmas: f64, strong_sigmas: f64) -> Self {
        Self {
            mean,
            std_dev,
            weak_delta: weak_sigmas * std_dev,
            strong_delta: strong_sigmas * std_dev,
        }
    }

    pub fn distance(&self, value: f64) -> f64 {
        (value - self.mean).abs()
    }

    pub fn level(&self, value: f64) -> AnomalyLevel {
        let dist = self.distance(value);
        if dist > self.strong_delta {
            AnomalyLevel::Strong
        } else if dist > self.weak_delta {
            AnomalyLevel::Weak
        } else {
            AnomalyLevel::Normal
        }
    }

    /// Distance in sigmas, or the raw distance when the spread is zero
    pub fn score(&self, value: f64) -> f64 {
        let dist = self.distance(value);
        if self.std_dev > 0.0 {
            dist / self.std_dev
        } else {
            dist
        }
    }

    pub fn thresholds(&self) -> Thresholds {
        Thresholds::symmetric(self.mean, self.weak_delta, self.strong_delta)
    }
}

pub(crate) fn build_result(
    observation: &Observation,
    detector_id: Uuid,
    predicted: f64,
    thresholds: Thresholds,
    anomaly_score: f64,
    anomaly_level: AnomalyLevel,
) -> AnomalyResult {
    AnomalyResult {
        series_id: observation.series_id.clone(),
        detector_id,
        epoch_second: observation.epoch_second,
        observed: observation.value,
        predicted,
        weak_threshold_upper: thresholds.weak_upper,
        weak_threshold_lower: thresholds.weak_lower,
        strong_threshold_upper: thresholds.strong_upper,
        strong_threshold_lower: thresholds.strong_lower,
        anomaly_score,
        anomaly_level,
    }
}
