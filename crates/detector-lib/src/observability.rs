//! Observability for detector instances
//!
//! Provides:
//! - Prometheus metrics (classifications per level, classify latency, provisioning)
//! - Structured logging of anomalies and faults with tracing
//! - An instrumented wrapper recording both around any detector

use std::sync::OnceLock;
use std::time::Instant;

use prometheus::{
    register_histogram, register_int_counter, register_int_counter_vec, register_int_gauge,
    Histogram, IntCounter, IntCounterVec, IntGauge,
};
use tracing::{info, warn};
use uuid::Uuid;

use crate::anomaly::{AnomalyDetector, DetectorKind};
use crate::error::{DetectorError, ProvisionError, Result};
use crate::models::{AnomalyLevel, AnomalyResult, Observation};

/// Histogram buckets for classify latency (in seconds)
const LATENCY_BUCKETS: &[f64] = &[
    0.000_001, 0.000_005, 0.000_01, 0.000_05, 0.000_1, 0.000_5, 0.001, 0.005, 0.01,
];

/// Global metrics instance (registered once)
static GLOBAL_METRICS: OnceLock<DetectorMetricsInner> = OnceLock::new();

struct DetectorMetricsInner {
    classifications: IntCounterVec,
    classify_latency_seconds: Histogram,
    invalid_inputs: IntCounter,
    detectors_provisioned: IntCounter,
    provisioning_failures: IntCounter,
    detectors_active: IntGauge,
}

impl DetectorMetricsInner {
    fn new() -> Self {
        Self {
            classifications: register_int_counter_vec!(
                "anomaly_detector_classifications_total",
                "Observations classified, by detector type and anomaly level",
                &["detector_type", "level"]
            )
            .expect("Failed to register classifications"),

            classify_latency_seconds: register_histogram!(
                "anomaly_detector_classify_latency_seconds",
                "Time spent classifying a single observation",
                LATENCY_BUCKETS.to_vec()
            )
            .expect("Failed to register classify_latency_seconds"),

            invalid_inputs: register_int_counter!(
                "anomaly_detector_invalid_inputs_total",
                "Observations rejected as invalid input"
            )
            .expect("Failed to register invalid_inputs"),

            detectors_provisioned: register_int_counter!(
                "anomaly_detector_provisioned_total",
                "Detector instances successfully provisioned"
            )
            .expect("Failed to register detectors_provisioned"),

            provisioning_failures: register_int_counter!(
                "anomaly_detector_provisioning_failures_total",
                "Detector lookups that yielded no detector"
            )
            .expect("Failed to register provisioning_failures"),

            detectors_active: register_int_gauge!(
                "anomaly_detector_active",
                "Detector instances currently owned by a series"
            )
            .expect("Failed to register detectors_active"),
        }
    }
}

/// Detector metrics for Prometheus exposition
///
/// Lightweight handle to the global metrics instance. Clones share the
/// same underlying metrics.
#[derive(Clone)]
pub struct DetectorMetrics {
    _private: (),
}

impl Default for DetectorMetrics {
    fn default() -> Self {
        Self::new()
    }
}

impl DetectorMetrics {
    pub fn new() -> Self {
        GLOBAL_METRICS.get_or_init(DetectorMetricsInner::new);
        Self { _private: () }
    }

    fn inner(&self) -> &DetectorMetricsInner {
        GLOBAL_METRICS.get_or_init(DetectorMetricsInner::new)
    }

    pub fn observe_classify_latency(&self, duration_secs: f64) {
        self.inner().classify_latency_seconds.observe(duration_secs);
    }

    pub fn inc_classification(&self, kind: DetectorKind, level: AnomalyLevel) {
        self.inner()
            .classifications
            .with_label_values(&[kind.as_str(), level.as_str()])
            .inc();
    }

    pub fn classification_count(&self, kind: DetectorKind, level: AnomalyLevel) -> u64 {
        self.inner()
            .classifications
            .with_label_values(&[kind.as_str(), level.as_str()])
            .get()
    }

    pub fn inc_invalid_inputs(&self) {
        self.inner().invalid_inputs.inc();
    }

    pub fn inc_detectors_provisioned(&self) {
        self.inner().detectors_provisioned.inc();
    }

    pub fn inc_provisioning_failures(&self) {
        self.inner().provisioning_failures.inc();
    }

    pub fn set_detectors_active(&self, count: i64) {
        self.inner().detectors_active.set(count);
    }
}

/// Structured logger for detector events
///
/// Emits tracing events with a stable `event` field so log pipelines can
/// key on them.
#[derive(Clone)]
pub struct StructuredLogger {
    component: String,
}

impl StructuredLogger {
    pub fn new(component: impl Into<String>) -> Self {
        Self {
            component: component.into(),
        }
    }

    /// Log a weak or strong classification
    pub fn log_anomaly(&self, kind: DetectorKind, result: &AnomalyResult) {
        match result.anomaly_level {
            AnomalyLevel::Strong => {
                warn!(
                    event = "anomaly_detected",
                    component = %self.component,
                    detector_type = %kind,
                    detector_id = %result.detector_id,
                    series_id = %result.series_id,
                    epoch_second = result.epoch_second,
                    observed = result.observed,
                    predicted = result.predicted,
                    anomaly_score = result.anomaly_score,
                    level = %result.anomaly_level,
                    "Strong anomaly detected"
                );
            }
            _ => {
                info!(
                    event = "anomaly_detected",
                    component = %self.component,
                    detector_type = %kind,
                    detector_id = %result.detector_id,
                    series_id = %result.series_id,
                    epoch_second = result.epoch_second,
                    observed = result.observed,
                    predicted = result.predicted,
                    anomaly_score = result.anomaly_score,
                    level = %result.anomaly_level,
                    "Anomaly detected"
                );
            }
        }
    }

    /// Log an observation rejected before classification
    pub fn log_invalid_input(&self, detector_id: Uuid, error: &DetectorError) {
        warn!(
            event = "invalid_input",
            component = %self.component,
            detector_id = %detector_id,
            error = %error,
            "Observation rejected"
        );
    }

    pub fn log_detector_provisioned(&self, detector_id: Uuid, kind: DetectorKind) {
        info!(
            event = "detector_provisioned",
            component = %self.component,
            detector_id = %detector_id,
            detector_type = %kind,
            "Detector provisioned"
        );
    }

    pub fn log_provisioning_failed(&self, detector_id: Uuid, error: &ProvisionError) {
        warn!(
            event = "provisioning_failed",
            component = %self.component,
            detector_id = %detector_id,
            error = %error,
            "No detector provisioned"
        );
    }
}

/// Records metrics and logs around another detector's classify calls
pub struct InstrumentedDetector<D> {
    inner: D,
    metrics: DetectorMetrics,
    logger: StructuredLogger,
}

impl<D: AnomalyDetector> InstrumentedDetector<D> {
    pub fn new(inner: D, metrics: DetectorMetrics, logger: StructuredLogger) -> Self {
        Self {
            inner,
            metrics,
            logger,
        }
    }

    pub fn inner(&self) -> &D {
        &self.inner
    }
}

impl<D: AnomalyDetector> AnomalyDetector for InstrumentedDetector<D> {
    fn id(&self) -> Uuid {
        self.inner.id()
    }

    fn kind(&self) -> DetectorKind {
        self.inner.kind()
    }

    fn classify(&mut self, observation: &Observation) -> Result<AnomalyResult> {
        let start = Instant::now();
        match self.inner.classify(observation) {
            Ok(result) => {
                self.metrics
                    .observe_classify_latency(start.elapsed().as_secs_f64());
                self.metrics
                    .inc_classification(self.inner.kind(), result.anomaly_level);
                if result.anomaly_level.is_anomalous() {
                    self.logger.log_anomaly(self.inner.kind(), &result);
                }
                Ok(result)
            }
            Err(e) => {
                self.metrics.inc_invalid_inputs();
                self.logger.log_invalid_input(self.inner.id(), &e);
                Err(e)
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::anomaly::{PewmaDetector, PewmaParams};

    #[test]
    fn test_detector_metrics_creation() {
        // Metrics live in the global Prometheus registry and are created once
        let metrics = DetectorMetrics::new();

        metrics.observe_classify_latency(0.000_002);
        metrics.inc_invalid_inputs();
        metrics.inc_detectors_provisioned();
        metrics.inc_provisioning_failures();
        metrics.set_detectors_active(3);
    }

    #[test]
    fn test_structured_logger_creation() {
        let logger = StructuredLogger::new("test-pipeline");
        assert_eq!(logger.component, "test-pipeline");
    }

    #[test]
    fn test_instrumented_detector_counts_levels() {
        let metrics = DetectorMetrics::new();
        let before = metrics.classification_count(DetectorKind::Pewma, AnomalyLevel::Strong);

        let pewma = PewmaDetector::new(Uuid::nil(), PewmaParams::default()).unwrap();
        let mut d =
            InstrumentedDetector::new(pewma, metrics.clone(), StructuredLogger::new("test"));
        let result = d.classify(&Observation::new("cpu", 0, 100.0)).unwrap();

        assert_eq!(result.anomaly_level, AnomalyLevel::Strong);
        assert!(metrics.classification_count(DetectorKind::Pewma, AnomalyLevel::Strong) > before);
        assert_eq!(d.kind(), DetectorKind::Pewma);
    }

    #[test]
    fn test_instrumented_detector_propagates_faults() {
        let pewma = PewmaDetector::new(Uuid::nil(), PewmaParams::default()).unwrap();
        let mut d = InstrumentedDetector::new(
            pewma,
            DetectorMetrics::new(),
            StructuredLogger::new("test"),
        );

        let err = d.classify(&Observation::new("cpu", 0, f64::NAN));
        assert!(matches!(err, Err(DetectorError::InvalidInput(_))));
        assert_eq!(d.inner().state().training_count, 1);
    }
}
