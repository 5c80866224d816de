//! EWMA anomaly detection
//!
//! Tracks a running mean and variance with a fixed smoothing weight and
//! flags values outside configurable sigma bands. There is no warm-up:
//! the detector classifies from the first point, with early estimates
//! still noisy.

use serde::{Deserialize, Serialize};
use tracing::trace;
use uuid::Uuid;

use super::{
    build_result, check_finite, check_sigma_pair, check_state_overflow, check_unit_interval,
    validate_observation, AnomalyDetector, DetectorKind, SigmaBands, Thresholds,
};
use crate::error::{DetectorError, Result};
use crate::models::{AnomalyLevel, AnomalyResult, Observation};

/// EWMA construction parameters
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(deny_unknown_fields)]
pub struct EwmaParams {
    /// Weight kept on history at each update, in [0, 1]
    pub alpha: f64,
    /// Weak anomaly threshold, in sigmas
    #[serde(alias = "weakSigmas")]
    pub weak_sigmas: f64,
    /// Strong anomaly threshold, in sigmas
    #[serde(alias = "strongSigmas")]
    pub strong_sigmas: f64,
    /// Initial mean estimate
    #[serde(default, alias = "initValue")]
    pub init_value: f64,
}

impl EwmaParams {
    pub fn validate(&self) -> Result<()> {
        check_unit_interval("alpha", self.alpha)?;
        check_sigma_pair(
            "weak_sigmas",
            self.weak_sigmas,
            "strong_sigmas",
            self.strong_sigmas,
        )?;
        check_finite("init_value", self.init_value)
    }
}

impl Default for EwmaParams {
    fn default() -> Self {
        Self {
            alpha: 0.15,
            weak_sigmas: 3.0,
            strong_sigmas: 4.0,
            init_value: 0.0,
        }
    }
}

/// Mutable EWMA estimates
#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
pub struct EwmaState {
    pub mean: f64,
    pub variance: f64,
}

impl EwmaState {
    /// Mean at `init_value`, zero variance
    pub fn seeded(init_value: f64) -> Self {
        Self {
            mean: init_value,
            variance: 0.0,
        }
    }

    pub fn std_dev(&self) -> f64 {
        self.variance.max(0.0).sqrt()
    }
}

/// Exponentially weighted moving average detector
#[derive(Debug, Clone)]
pub struct EwmaDetector {
    id: Uuid,
    params: EwmaParams,
    state: EwmaState,
}

impl EwmaDetector {
    pub fn new(id: Uuid, params: EwmaParams) -> Result<Self> {
        let state = EwmaState::seeded(params.init_value);
        Self::from_state(id, params, state)
    }

    /// Rebuild a detector from a checkpointed state
    pub fn from_state(id: Uuid, params: EwmaParams, state: EwmaState) -> Result<Self> {
        params.validate()?;
        check_finite("state.mean", state.mean)?;
        if !state.variance.is_finite() || state.variance < 0.0 {
            return Err(DetectorError::invalid_parameter(
                "state.variance",
                "must be finite and non-negative",
            ));
        }
        Ok(Self { id, params, state })
    }

    pub fn params(&self) -> &EwmaParams {
        &self.params
    }

    pub fn state(&self) -> &EwmaState {
        &self.state
    }

    /// Estimates after folding in `value`, not yet committed
    fn next_state(&self, value: f64) -> EwmaState {
        let alpha = self.params.alpha;
        let diff = value - self.state.mean;
        // alpha·m + (1-alpha)·x, written as an increment so a constant stream stays exact
        EwmaState {
            mean: self.state.mean + (1.0 - alpha) * diff,
            variance: alpha * self.state.variance + (1.0 - alpha) * diff * diff,
        }
    }
}

impl AnomalyDetector for EwmaDetector {
    fn id(&self) -> Uuid {
        self.id
    }

    fn kind(&self) -> DetectorKind {
        DetectorKind::Ewma
    }

    fn classify(&mut self, observation: &Observation) -> Result<AnomalyResult> {
        validate_observation(observation)?;

        let observed = observation.value;
        let mean = self.state.mean;
        let std_dev = self.state.std_dev();
        let bands = SigmaBands::new(
            mean,
            std_dev,
            self.params.weak_sigmas,
            self.params.strong_sigmas,
        );

        // Zero spread: bands collapse onto the mean, nothing to compare against
        let (level, thresholds) = if std_dev == 0.0 {
            (AnomalyLevel::Normal, Thresholds::symmetric(mean, 0.0, 0.0))
        } else {
            (bands.level(observed), bands.thresholds())
        };
        let score = bands.score(observed);

        let next = self.next_state(observed);
        check_state_overflow(observation, &[next.mean, next.variance])?;
        self.state = next;
        trace!(
            mean = self.state.mean,
            variance = self.state.variance,
            "EWMA estimates updated"
        );

        Ok(build_result(
            observation,
            self.id,
            mean,
            thresholds,
            score,
            level,
        ))
    }
}
