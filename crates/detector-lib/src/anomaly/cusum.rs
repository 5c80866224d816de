//! CUSUM anomaly detection
//!
//! Cumulative-sum control chart keeping a process on a target value.
//! Volatility is estimated online from the average moving range of
//! successive observations, and one-sided sums accumulate deviations
//! beyond a slack band. A strong alarm resets both sums so the chart
//! restarts accumulating evidence after flagging a shift.
//!
//! See https://www.spcforexcel.com/knowledge/variable-control-charts/keeping-process-target-cusum-charts

use std::fmt;
use std::str::FromStr;

use serde::{Deserialize, Serialize};
use tracing::{debug, trace};
use uuid::Uuid;

use super::{
    build_result, check_finite, check_sigma_pair, check_state_overflow, validate_observation,
    AnomalyDetector, DetectorKind, Thresholds,
};
use crate::error::{DetectorError, Result};
use crate::models::{AnomalyLevel, AnomalyResult, Observation};

/// Slack, in sigmas, around the target before deviations accumulate
pub const SLACK_FACTOR: f64 = 0.5;

/// d2 control-chart constant for subgroups of two: sigma = mean moving range / d2
pub const UNBIASING_CONSTANT: f64 = 1.128;

/// Side(s) of the target treated as anomalous
///
/// Binds from a name (`"left"`, `"RIGHT_TAILED"`, ...) or a numeric code.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case", try_from = "TailRepr")]
pub enum Tail {
    Left,
    Right,
    Two,
}

/// Accepted encodings of a tail mode in parameter maps
#[derive(Deserialize)]
#[serde(untagged)]
enum TailRepr {
    Code(i64),
    Name(String),
}

impl TryFrom<TailRepr> for Tail {
    type Error = DetectorError;

    fn try_from(repr: TailRepr) -> Result<Self> {
        match repr {
            TailRepr::Code(code) => Tail::try_from(code),
            TailRepr::Name(name) => name.parse(),
        }
    }
}

impl Tail {
    pub fn as_str(&self) -> &'static str {
        match self {
            Tail::Left => "left",
            Tail::Right => "right",
            Tail::Two => "two",
        }
    }
}

impl fmt::Display for Tail {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

impl FromStr for Tail {
    type Err = DetectorError;

    fn from_str(s: &str) -> Result<Self> {
        match s.trim().to_ascii_lowercase().as_str() {
            "left" | "left_tailed" => Ok(Tail::Left),
            "right" | "right_tailed" => Ok(Tail::Right),
            "two" | "two_tailed" => Ok(Tail::Two),
            _ => Err(DetectorError::IllegalTail(s.to_string())),
        }
    }
}

/// Numeric tail codes: 0 left, 1 right, 2 two-tailed
impl TryFrom<i64> for Tail {
    type Error = DetectorError;

    fn try_from(code: i64) -> Result<Self> {
        match code {
            0 => Ok(Tail::Left),
            1 => Ok(Tail::Right),
            2 => Ok(Tail::Two),
            other => Err(DetectorError::IllegalTail(other.to_string())),
        }
    }
}

/// CUSUM construction parameters
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(deny_unknown_fields)]
pub struct CusumParams {
    pub tail: Tail,
    /// Points classified as unknown before the chart is trusted
    #[serde(alias = "warmUpPeriod")]
    pub warm_up_period: u32,
    /// Weak anomaly threshold, in sigmas
    #[serde(alias = "weakThresholdSigmas")]
    pub weak_threshold_sigmas: f64,
    /// Strong anomaly threshold, in sigmas
    #[serde(alias = "strongThresholdSigmas")]
    pub strong_threshold_sigmas: f64,
    #[serde(alias = "targetValue")]
    pub target_value: f64,
}

impl CusumParams {
    pub fn validate(&self) -> Result<()> {
        check_sigma_pair(
            "weak_threshold_sigmas",
            self.weak_threshold_sigmas,
            "strong_threshold_sigmas",
            self.strong_threshold_sigmas,
        )?;
        check_finite("target_value", self.target_value)
    }
}

impl Default for CusumParams {
    fn default() -> Self {
        Self {
            tail: Tail::Left,
            warm_up_period: 25,
            weak_threshold_sigmas: 3.0,
            strong_threshold_sigmas: 4.0,
            target_value: 0.0,
        }
    }
}

/// Mutable CUSUM chart state
#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
pub struct CusumState {
    /// Sum of absolute successive differences
    pub moving_range: f64,
    pub prev_value: f64,
    pub total_data_points: u64,
    /// Upper cumulative sum, never negative
    pub sum_high: f64,
    /// Lower cumulative sum, never positive
    pub sum_low: f64,
}

impl CusumState {
    /// Fresh chart whose first moving range is measured from `prev_value`
    pub fn seeded(prev_value: f64) -> Self {
        Self {
            moving_range: 0.0,
            prev_value,
            total_data_points: 0,
            sum_high: 0.0,
            sum_low: 0.0,
        }
    }

    fn average_moving_range(&self) -> f64 {
        if self.total_data_points > 1 {
            self.moving_range / (self.total_data_points - 1) as f64
        } else {
            self.moving_range
        }
    }

    fn reset_sums(&mut self) {
        self.sum_high = 0.0;
        self.sum_low = 0.0;
    }
}

/// Cumulative-sum control chart detector
#[derive(Debug, Clone)]
pub struct CusumDetector {
    id: Uuid,
    params: CusumParams,
    state: CusumState,
}

impl CusumDetector {
    /// New chart with the previous value seeded at the target
    pub fn new(id: Uuid, params: CusumParams) -> Result<Self> {
        let state = CusumState::seeded(params.target_value);
        Self::from_state(id, params, state)
    }

    /// Rebuild a detector from a checkpointed state
    pub fn from_state(id: Uuid, params: CusumParams, state: CusumState) -> Result<Self> {
        params.validate()?;
        check_finite("state.prev_value", state.prev_value)?;
        if !state.moving_range.is_finite() || state.moving_range < 0.0 {
            return Err(DetectorError::invalid_parameter(
                "state.moving_range",
                "must be finite and non-negative",
            ));
        }
        if !(state.sum_high.is_finite() && state.sum_high >= 0.0) {
            return Err(DetectorError::invalid_parameter(
                "state.sum_high",
                "must be finite and non-negative",
            ));
        }
        if !(state.sum_low.is_finite() && state.sum_low <= 0.0) {
            return Err(DetectorError::invalid_parameter(
                "state.sum_low",
                "must be finite and non-positive",
            ));
        }
        Ok(Self { id, params, state })
    }

    pub fn params(&self) -> &CusumParams {
        &self.params
    }

    pub fn state(&self) -> &CusumState {
        &self.state
    }

    pub fn is_warming_up(&self) -> bool {
        self.state.total_data_points <= u64::from(self.params.warm_up_period)
    }

    fn thresholds(&self, weak: f64, strong: f64) -> Thresholds {
        let mut thresholds = Thresholds::default();
        if matches!(self.params.tail, Tail::Left | Tail::Two) {
            thresholds.weak_lower = Some(-weak);
            thresholds.strong_lower = Some(-strong);
        }
        if matches!(self.params.tail, Tail::Right | Tail::Two) {
            thresholds.weak_upper = Some(weak);
            thresholds.strong_upper = Some(strong);
        }
        thresholds
    }

    /// Compare the sums against the thresholds of the configured tail
    fn evaluate(&self, weak: f64, strong: f64) -> AnomalyLevel {
        let (high, low) = (self.state.sum_high, self.state.sum_low);
        match self.params.tail {
            Tail::Left => {
                if low <= -strong {
                    AnomalyLevel::Strong
                } else if low <= -weak {
                    AnomalyLevel::Weak
                } else {
                    AnomalyLevel::Normal
                }
            }
            Tail::Right => {
                if high >= strong {
                    AnomalyLevel::Strong
                } else if high > weak {
                    AnomalyLevel::Weak
                } else {
                    AnomalyLevel::Normal
                }
            }
            // The lower sum is compared against the unsigned thresholds here,
            // unlike the left-tailed branch. Kept as-is; see DESIGN.md.
            Tail::Two => {
                if high >= strong || low <= strong {
                    AnomalyLevel::Strong
                } else if high > weak || low <= weak {
                    AnomalyLevel::Weak
                } else {
                    AnomalyLevel::Normal
                }
            }
        }
    }
}

impl AnomalyDetector for CusumDetector {
    fn id(&self) -> Uuid {
        self.id
    }

    fn kind(&self) -> DetectorKind {
        DetectorKind::Cusum
    }

    fn classify(&mut self, observation: &Observation) -> Result<AnomalyResult> {
        validate_observation(observation)?;

        let observed = observation.value;
        let target = self.params.target_value;

        let mut next = self.state;
        next.moving_range += (next.prev_value - observed).abs();
        let std_dev = next.average_moving_range() / UNBIASING_CONSTANT;
        let slack = SLACK_FACTOR * std_dev;
        let weak_threshold = self.params.weak_threshold_sigmas * std_dev;
        let strong_threshold = self.params.strong_threshold_sigmas * std_dev;

        next.sum_high = (next.sum_high + observed - (target + slack)).max(0.0);
        next.sum_low = (next.sum_low + observed - (target - slack)).min(0.0);
        next.prev_value = observed;
        next.total_data_points += 1;
        check_state_overflow(
            observation,
            &[next.moving_range, std_dev, next.sum_high, next.sum_low],
        )?;
        self.state = next;

        trace!(
            std_dev,
            sum_high = self.state.sum_high,
            sum_low = self.state.sum_low,
            total_data_points = self.state.total_data_points,
            "CUSUM chart updated"
        );

        let (level, thresholds) = if self.is_warming_up() {
            (AnomalyLevel::Unknown, Thresholds::default())
        } else if std_dev == 0.0 {
            // No volatility observed yet: the sums have no scale to be judged against
            (
                AnomalyLevel::Normal,
                self.thresholds(weak_threshold, strong_threshold),
            )
        } else {
            let level = self.evaluate(weak_threshold, strong_threshold);
            if level == AnomalyLevel::Strong {
                debug!(
                    series_id = %observation.series_id,
                    sum_high = self.state.sum_high,
                    sum_low = self.state.sum_low,
                    "CUSUM strong alarm, resetting cumulative sums"
                );
                self.state.reset_sums();
            }
            (level, self.thresholds(weak_threshold, strong_threshold))
        };

        Ok(build_result(
            observation,
            self.id,
            target,
            thresholds,
            (observed - target).abs(),
            level,
        ))
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn point(value: f64) -> Observation {
        Observation::new("queue.depth", 1_700_000_000, value)
    }

    fn detector(tail: Tail, warm_up_period: u32) -> CusumDetector {
        CusumDetector::new(
            Uuid::nil(),
            CusumParams {
                tail,
                warm_up_period,
                weak_threshold_sigmas: 3.0,
                strong_threshold_sigmas: 4.0,
                target_value: 0.0,
            },
        )
        .unwrap()
    }

    #[test]
    fn test_constant_stream_on_target() {
        let mut d = detector(Tail::Left, 25);
        let levels: Vec<AnomalyLevel> = (0..40)
            .map(|_| d.classify(&point(0.0)).unwrap().anomaly_level)
            .collect();

        assert!(levels[..25].iter().all(|l| *l == AnomalyLevel::Unknown));
        assert!(levels[25..].iter().all(|l| *l == AnomalyLevel::Normal));
        assert_eq!(d.state().sum_high, 0.0);
        assert_eq!(d.state().sum_low, 0.0);
    }

    #[test]
    fn test_recursion_order() {
        let mut d = detector(Tail::Right, 100);

        d.classify(&point(2.0)).unwrap();
        // |0 - 2| with a single point: average range is the raw range
        assert_eq!(d.state().moving_range, 2.0);
        assert_eq!(d.state().total_data_points, 1);
        let sd = 2.0 / UNBIASING_CONSTANT;
        assert!((d.state().sum_high - (2.0 - 0.5 * sd)).abs() < 1e-12);
        assert_eq!(d.state().sum_low, 0.0);

        d.classify(&point(-1.0)).unwrap();
        assert_eq!(d.state().moving_range, 5.0);
        assert_eq!(d.state().prev_value, -1.0);
        // counter was 1 when averaging, so the raw range is used again
        let sd = 5.0 / UNBIASING_CONSTANT;
        let high = (2.0 - 0.5 * (2.0 / UNBIASING_CONSTANT) - 1.0 - 0.5 * sd).max(0.0);
        assert!((d.state().sum_high - high).abs() < 1e-12);
        // -1 + slack is still above zero, so the lower sum stays clamped
        assert!(-1.0 + 0.5 * sd > 0.0);
        assert_eq!(d.state().sum_low, 0.0);

        d.classify(&point(1.0)).unwrap();
        assert_eq!(d.state().moving_range, 7.0);
        assert_eq!(d.state().total_data_points, 3);
    }

    #[test]
    fn test_anomaly_score_is_raw_distance() {
        let mut d = detector(Tail::Two, 10);
        let result = d.classify(&point(-7.5)).unwrap();
        assert_eq!(result.anomaly_score, 7.5);
        assert_eq!(result.predicted, 0.0);
        assert_eq!(result.anomaly_level, AnomalyLevel::Unknown);
        assert!(result.weak_threshold_lower.is_none());
    }

    #[test]
    fn test_right_tail_alarm_resets_sums() {
        let mut d = detector(Tail::Right, 4);
        for value in [1.0, -1.0, 1.0, -1.0] {
            d.classify(&point(value)).unwrap();
        }

        let mut strong_at = None;
        for i in 0..20 {
            let result = d.classify(&point(3.0)).unwrap();
            assert!(result.weak_threshold_lower.is_none());
            assert!(result.strong_threshold_upper.is_some());
            if result.anomaly_level == AnomalyLevel::Strong {
                strong_at = Some(i);
                break;
            }
        }
        assert!(strong_at.is_some(), "sustained shift must raise a strong alarm");
        assert_eq!(d.state().sum_high, 0.0);
        assert_eq!(d.state().sum_low, 0.0);
    }

    #[test]
    fn test_left_tail_detects_drop() {
        let mut d = detector(Tail::Left, 4);
        for value in [0.5, -0.5, 0.5, -0.5, 0.5, -0.5] {
            d.classify(&point(value)).unwrap();
        }

        let levels: Vec<AnomalyLevel> = (0..10)
            .map(|_| d.classify(&point(-2.0)).unwrap().anomaly_level)
            .collect();
        assert!(levels.contains(&AnomalyLevel::Strong));
        assert!(!levels.contains(&AnomalyLevel::Unknown));
    }

    #[test]
    fn test_left_tail_thresholds_are_negative() {
        let mut d = detector(Tail::Left, 0);
        let result = d.classify(&point(1.128)).unwrap();

        // sigma = 1.128 / 1.128 = 1
        assert!(result.weak_threshold_upper.is_none());
        assert!((result.weak_threshold_lower.unwrap() + 3.0).abs() < 1e-12);
        assert!((result.strong_threshold_lower.unwrap() + 4.0).abs() < 1e-12);
    }

    #[test]
    fn test_two_tail_compares_lower_sum_unsigned() {
        let mut d = detector(Tail::Two, 2);
        d.classify(&point(1.0)).unwrap();
        d.classify(&point(-1.0)).unwrap();

        // sum_low <= 0 <= strong threshold whenever volatility is non-zero
        let result = d.classify(&point(0.2)).unwrap();
        assert_eq!(result.anomaly_level, AnomalyLevel::Strong);
        assert!(result.weak_threshold_upper.is_some());
        assert!(result.weak_threshold_lower.is_some());
        assert_eq!(d.state().sum_high, 0.0);
        assert_eq!(d.state().sum_low, 0.0);
    }

    #[test]
    fn test_tail_parsing() {
        assert_eq!("LEFT".parse::<Tail>().unwrap(), Tail::Left);
        assert_eq!("two_tailed".parse::<Tail>().unwrap(), Tail::Two);
        assert_eq!(Tail::try_from(1).unwrap(), Tail::Right);
        assert!(matches!(
            Tail::try_from(3),
            Err(DetectorError::IllegalTail(_))
        ));
        assert!(matches!(
            "both".parse::<Tail>(),
            Err(DetectorError::IllegalTail(_))
        ));
        let tail: Tail = serde_json::from_str("\"right_tailed\"").unwrap();
        assert_eq!(tail, Tail::Right);
        let tail: Tail = serde_json::from_str("2").unwrap();
        assert_eq!(tail, Tail::Two);
        assert!(serde_json::from_str::<Tail>("-1").is_err());
    }

    #[test]
    fn test_invalid_input_leaves_state() {
        let mut d = detector(Tail::Left, 3);
        d.classify(&point(1.0)).unwrap();
        let before = *d.state();

        let bad = Observation::new("", 0, 1.0);
        assert!(matches!(
            d.classify(&bad),
            Err(DetectorError::InvalidInput(_))
        ));
        assert_eq!(*d.state(), before);
    }

    #[test]
    fn test_rejects_inconsistent_state() {
        let state = CusumState {
            sum_high: -1.0,
            ..CusumState::seeded(0.0)
        };
        assert!(CusumDetector::from_state(Uuid::nil(), CusumParams::default(), state).is_err());
    }

    #[test]
    fn test_large_finite_values_keep_state_finite() {
        let mut d = detector(Tail::Two, 0);
        d.classify(&point(1e200)).unwrap();
        d.classify(&point(1.0)).unwrap();
        let state = d.state();
        assert!(state.moving_range.is_finite());
        assert!(state.sum_high.is_finite());
        assert!(state.sum_low.is_finite());
    }

    #[test]
    fn test_overflowing_moving_range_is_rejected_without_side_effects() {
        let mut d = detector(Tail::Right, 2);
        d.classify(&point(1e308)).unwrap();
        let before = *d.state();

        // |1e308 - (-1e308)| overflows the moving range
        assert!(matches!(
            d.classify(&point(-1e308)),
            Err(DetectorError::InvalidInput(_))
        ));
        assert_eq!(*d.state(), before);
        assert!(d.classify(&point(5e307)).is_ok());
    }
}
