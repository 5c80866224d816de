//! PEWMA anomaly detection
//!
//! Probabilistic EWMA: the smoothing weight of each update depends on how
//! likely the observation is under the current model, so isolated outliers
//! move the estimates less than under plain EWMA.
//!
//! During the first `training_length` points the weights reproduce a plain
//! running average. Classification is not suppressed while training.
//!
//! See Carter & Streilein, "Probabilistic reasoning for streaming anomaly
//! detection" (IEEE SSP 2012).

use serde::{Deserialize, Serialize};
use tracing::trace;
use uuid::Uuid;

use super::{
    build_result, check_finite, check_sigma_pair, check_state_overflow, check_unit_interval,
    validate_observation, AnomalyDetector, DetectorKind, SigmaBands,
};
use crate::error::{DetectorError, Result};
use crate::models::{AnomalyResult, Observation};

/// Points used to train before likelihood weighting applies
pub const DEFAULT_TRAINING_LENGTH: u32 = 30;

/// 1 / sqrt(2π)
const STANDARD_NORMAL_PEAK: f64 = 0.398_942_280_401_432_7;

fn default_training_length() -> u32 {
    DEFAULT_TRAINING_LENGTH
}

/// PEWMA construction parameters
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(deny_unknown_fields)]
pub struct PewmaParams {
    /// Initial smoothing factor, in [0, 1]. Its complement weights history.
    #[serde(alias = "initialAlpha")]
    pub initial_alpha: f64,
    /// Outlier weighting strength
    pub beta: f64,
    #[serde(default = "default_training_length", alias = "trainingLength")]
    pub training_length: u32,
    /// Weak anomaly threshold, in sigmas
    #[serde(alias = "weakThreshold")]
    pub weak_threshold: f64,
    /// Strong anomaly threshold, in sigmas
    #[serde(alias = "strongThreshold")]
    pub strong_threshold: f64,
    /// Initial mean estimate
    #[serde(default, alias = "initValue")]
    pub init_value: f64,
}

impl PewmaParams {
    pub fn validate(&self) -> Result<()> {
        check_unit_interval("initial_alpha", self.initial_alpha)?;
        if !self.beta.is_finite() || self.beta < 0.0 {
            return Err(DetectorError::invalid_parameter(
                "beta",
                "must be finite and non-negative",
            ));
        }
        check_sigma_pair(
            "weak_threshold",
            self.weak_threshold,
            "strong_threshold",
            self.strong_threshold,
        )?;
        check_finite("init_value", self.init_value)
    }
}

impl Default for PewmaParams {
    fn default() -> Self {
        Self {
            initial_alpha: 0.5,
            beta: 1.0,
            training_length: DEFAULT_TRAINING_LENGTH,
            weak_threshold: 2.0,
            strong_threshold: 3.0,
            init_value: 0.0,
        }
    }
}

/// Mutable PEWMA moments and training progress
#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
pub struct PewmaState {
    /// First moment
    pub s1: f64,
    /// Second moment
    pub s2: f64,
    /// Starts at 1, stops advancing at the training length
    ///
    /// A training step weighs history by `1 - 1/training_count` read before
    /// the increment, so the first observation replaces the seed outright
    /// rather than being averaged with it.
    pub training_count: u32,
}

impl PewmaState {
    pub fn seeded(init_value: f64) -> Self {
        Self {
            s1: init_value,
            s2: init_value * init_value,
            training_count: 1,
        }
    }

    pub fn mean(&self) -> f64 {
        self.s1
    }

    /// Population standard deviation, clamped at zero against rounding
    pub fn std_dev(&self) -> f64 {
        (self.s2 - self.s1 * self.s1).max(0.0).sqrt()
    }
}

/// Probabilistic exponentially weighted moving average detector
#[derive(Debug, Clone)]
pub struct PewmaDetector {
    id: Uuid,
    params: PewmaParams,
    alpha0: f64,
    state: PewmaState,
}

impl PewmaDetector {
    pub fn new(id: Uuid, params: PewmaParams) -> Result<Self> {
        let state = PewmaState::seeded(params.init_value);
        Self::from_state(id, params, state)
    }

    /// Rebuild a detector from a checkpointed state
    pub fn from_state(id: Uuid, params: PewmaParams, state: PewmaState) -> Result<Self> {
        params.validate()?;
        check_finite("state.s1", state.s1)?;
        check_finite("state.s2", state.s2)?;
        if state.training_count == 0 {
            return Err(DetectorError::invalid_parameter(
                "state.training_count",
                "must be at least 1",
            ));
        }
        Ok(Self {
            id,
            alpha0: 1.0 - params.initial_alpha,
            params,
            state,
        })
    }

    pub fn params(&self) -> &PewmaParams {
        &self.params
    }

    pub fn state(&self) -> &PewmaState {
        &self.state
    }

    pub fn is_training(&self) -> bool {
        self.state.training_count < self.params.training_length
    }

    /// Moments and training progress after folding in `value`, not yet committed
    fn next_state(&self, value: f64, mean: f64, std_dev: f64) -> (PewmaState, f64) {
        let z = if std_dev != 0.0 {
            (value - mean) / std_dev
        } else {
            0.0
        };
        let likelihood = STANDARD_NORMAL_PEAK * (-0.5 * z * z).exp();

        let mut next = self.state;
        let alpha = if self.is_training() {
            next.training_count += 1;
            1.0 - 1.0 / f64::from(self.state.training_count)
        } else {
            (1.0 - self.params.beta * likelihood) * self.alpha0
        };

        next.s1 += (1.0 - alpha) * (value - next.s1);
        next.s2 += (1.0 - alpha) * (value * value - next.s2);
        (next, alpha)
    }
}

impl AnomalyDetector for PewmaDetector {
    fn id(&self) -> Uuid {
        self.id
    }

    fn kind(&self) -> DetectorKind {
        DetectorKind::Pewma
    }

    fn classify(&mut self, observation: &Observation) -> Result<AnomalyResult> {
        validate_observation(observation)?;

        let observed = observation.value;
        let mean = self.state.mean();
        let std_dev = self.state.std_dev();
        let bands = SigmaBands::new(
            mean,
            std_dev,
            self.params.weak_threshold,
            self.params.strong_threshold,
        );
        let level = bands.level(observed);
        let score = bands.score(observed);

        let (next, alpha) = self.next_state(observed, mean, std_dev);
        check_state_overflow(
            observation,
            &[next.s1, next.s2, next.s2 - next.s1 * next.s1],
        )?;
        self.state = next;
        trace!(
            alpha,
            s1 = self.state.s1,
            s2 = self.state.s2,
            training_count = self.state.training_count,
            "PEWMA moments updated"
        );

        Ok(build_result(
            observation,
            self.id,
            mean,
            bands.thresholds(),
            score,
            level,
        ))
    }
}
