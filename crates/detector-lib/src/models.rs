//! Core data models for the detection kernel

use std::fmt;
use std::str::FromStr;

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use uuid::Uuid;

use crate::error::LevelParseError;

/// A single metric point delivered to the detector owning its series
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Observation {
    pub series_id: String,
    pub epoch_second: i64,
    pub value: f64,
}

impl Observation {
    pub fn new(series_id: impl Into<String>, epoch_second: i64, value: f64) -> Self {
        Self {
            series_id: series_id.into(),
            epoch_second,
            value,
        }
    }

    /// Observation timestamp as a UTC datetime, if representable
    pub fn timestamp(&self) -> Option<DateTime<Utc>> {
        DateTime::from_timestamp(self.epoch_second, 0)
    }
}

/// Severity assigned to an observation
///
/// Ordered `Unknown < Normal < Weak < Strong`. `Unknown` means the detector
/// is still warming up and has no verdict.
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
#[serde(rename_all = "SCREAMING_SNAKE_CASE")]
pub enum AnomalyLevel {
    Unknown,
    Normal,
    Weak,
    Strong,
}

impl AnomalyLevel {
    pub const ALL: [AnomalyLevel; 4] = [
        AnomalyLevel::Unknown,
        AnomalyLevel::Normal,
        AnomalyLevel::Weak,
        AnomalyLevel::Strong,
    ];

    /// Returns true for weak and strong anomalies
    pub fn is_anomalous(&self) -> bool {
        matches!(self, AnomalyLevel::Weak | AnomalyLevel::Strong)
    }

    pub fn as_str(&self) -> &'static str {
        match self {
            AnomalyLevel::Unknown => "UNKNOWN",
            AnomalyLevel::Normal => "NORMAL",
            AnomalyLevel::Weak => "WEAK",
            AnomalyLevel::Strong => "STRONG",
        }
    }
}

impl fmt::Display for AnomalyLevel {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

impl FromStr for AnomalyLevel {
    type Err = LevelParseError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.trim().to_ascii_uppercase().as_str() {
            "UNKNOWN" => Ok(AnomalyLevel::Unknown),
            "NORMAL" => Ok(AnomalyLevel::Normal),
            "WEAK" => Ok(AnomalyLevel::Weak),
            "STRONG" => Ok(AnomalyLevel::Strong),
            _ => Err(LevelParseError(s.to_string())),
        }
    }
}

/// Classification emitted for every observation
///
/// Threshold fields are `None` when the detector's tail mode does not
/// define that side.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct AnomalyResult {
    pub series_id: String,
    pub detector_id: Uuid,
    pub epoch_second: i64,
    pub observed: f64,
    pub predicted: f64,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub weak_threshold_upper: Option<f64>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub weak_threshold_lower: Option<f64>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub strong_threshold_upper: Option<f64>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub strong_threshold_lower: Option<f64>,
    pub anomaly_score: f64,
    pub anomaly_level: AnomalyLevel,
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_level_ordering() {
        assert!(AnomalyLevel::Unknown < AnomalyLevel::Normal);
        assert!(AnomalyLevel::Normal < AnomalyLevel::Weak);
        assert!(AnomalyLevel::Weak < AnomalyLevel::Strong);
        assert_eq!(
            AnomalyLevel::ALL.iter().max(),
            Some(&AnomalyLevel::Strong)
        );
    }

    #[test]
    fn test_level_parse() {
        assert_eq!("STRONG".parse(), Ok(AnomalyLevel::Strong));
        assert_eq!(" weak ".parse(), Ok(AnomalyLevel::Weak));
        assert_eq!("Normal".parse(), Ok(AnomalyLevel::Normal));
        assert_eq!(
            "severe".parse::<AnomalyLevel>(),
            Err(LevelParseError("severe".to_string()))
        );
    }

    #[test]
    fn test_level_serde_matches_display() {
        for level in AnomalyLevel::ALL {
            let json = serde_json::to_string(&level).unwrap();
            assert_eq!(json, format!("\"{}\"", level));
        }
    }

    #[test]
    fn test_result_omits_undefined_thresholds() {
        let result = AnomalyResult {
            series_id: "web.latency".into(),
            detector_id: Uuid::nil(),
            epoch_second: 1_700_000_000,
            observed: 3.0,
            predicted: 1.0,
            weak_threshold_upper: Some(2.0),
            weak_threshold_lower: None,
            strong_threshold_upper: Some(2.5),
            strong_threshold_lower: None,
            anomaly_score: 2.0,
            anomaly_level: AnomalyLevel::Strong,
        };

        let json = serde_json::to_value(&result).unwrap();
        assert!(json.get("weak_threshold_lower").is_none());
        assert_eq!(json["weak_threshold_upper"], 2.0);
        assert_eq!(json["anomaly_level"], "STRONG");
    }

    #[test]
    fn test_observation_timestamp() {
        let obs = Observation::new("cpu", 0, 1.0);
        assert_eq!(obs.timestamp().map(|t| t.timestamp()), Some(0));
    }
}
