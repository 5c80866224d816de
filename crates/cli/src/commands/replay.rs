//! Replay command
//!
//! Routes each recorded observation to the detector watching its series,
//! provisioning detectors lazily from the catalog on first sight of a
//! series.

use std::collections::hash_map::Entry;
use std::collections::{BTreeMap, HashMap, HashSet};
use std::path::Path;

use anyhow::{Context, Result};
use colored::Colorize;
use detector_lib::{
    AnomalyDetector, AnomalyLevel, AnomalyResult, DetectorFactory, DetectorMetrics,
    InstrumentedDetector, Observation, StructuredLogger,
};
use prometheus::{Encoder, TextEncoder};
use serde::Serialize;
use tabled::Tabled;
use tracing::info;
use uuid::Uuid;

use crate::config::CatalogConfig;
use crate::output::{
    color_level, format_epoch, format_threshold, print_info, print_json, print_table,
    print_warning, OutputFormat,
};
use crate::source::read_observations;

type SeriesDetector = InstrumentedDetector<Box<dyn AnomalyDetector>>;

/// Replay settings taken from the command line
#[derive(Debug, Clone, Default)]
pub struct ReplayOptions {
    /// Route every series to this model instead of the catalog mapping
    pub detector: Option<Uuid>,
    pub anomalies_only: bool,
    pub show_metrics: bool,
}

/// Totals for one replay run
#[derive(Debug, Clone, Default, PartialEq, Serialize)]
pub struct ReplaySummary {
    pub observations: usize,
    pub series: usize,
    pub invalid: usize,
    pub unrouted: usize,
    pub levels: BTreeMap<AnomalyLevel, u64>,
}

#[derive(Debug, Serialize)]
struct ReplayReport<'a> {
    results: Vec<&'a AnomalyResult>,
    summary: &'a ReplaySummary,
}

/// Row for the results table
#[derive(Tabled, Serialize)]
struct ResultRow {
    #[tabled(rename = "Time")]
    time: String,
    #[tabled(rename = "Series")]
    series: String,
    #[tabled(rename = "Observed")]
    observed: String,
    #[tabled(rename = "Predicted")]
    predicted: String,
    #[tabled(rename = "Weak band")]
    weak_band: String,
    #[tabled(rename = "Strong band")]
    strong_band: String,
    #[tabled(rename = "Score")]
    score: String,
    #[tabled(rename = "Level")]
    level: String,
}

impl From<&AnomalyResult> for ResultRow {
    fn from(result: &AnomalyResult) -> Self {
        Self {
            time: format_epoch(result.epoch_second),
            series: result.series_id.clone(),
            observed: format!("{:.3}", result.observed),
            predicted: format!("{:.3}", result.predicted),
            weak_band: format!(
                "{} .. {}",
                format_threshold(result.weak_threshold_lower),
                format_threshold(result.weak_threshold_upper)
            ),
            strong_band: format!(
                "{} .. {}",
                format_threshold(result.strong_threshold_lower),
                format_threshold(result.strong_threshold_upper)
            ),
            score: format!("{:.3}", result.anomaly_score),
            level: color_level(result.anomaly_level),
        }
    }
}

/// Classifies observations against catalog detectors, one detector per series
pub struct Replayer<'a, F: DetectorFactory> {
    catalog: &'a CatalogConfig,
    factory: &'a F,
    override_detector: Option<Uuid>,
    detectors: HashMap<String, SeriesDetector>,
    unrouted: HashSet<String>,
    metrics: DetectorMetrics,
    logger: StructuredLogger,
    summary: ReplaySummary,
}

impl<'a, F: DetectorFactory> Replayer<'a, F> {
    pub fn new(catalog: &'a CatalogConfig, factory: &'a F, override_detector: Option<Uuid>) -> Self {
        let levels = AnomalyLevel::ALL.iter().map(|l| (*l, 0)).collect();
        Self {
            catalog,
            factory,
            override_detector,
            detectors: HashMap::new(),
            unrouted: HashSet::new(),
            metrics: DetectorMetrics::new(),
            logger: StructuredLogger::new("replay"),
            summary: ReplaySummary {
                levels,
                ..ReplaySummary::default()
            },
        }
    }

    /// Classify one observation
    ///
    /// Returns `Ok(None)` when the series has no detector or the value is
    /// rejected; provisioning failures abort the replay.
    pub fn process(&mut self, observation: &Observation) -> Result<Option<AnomalyResult>> {
        self.summary.observations += 1;
        let active = self.detectors.len() as i64 + 1;

        let detector = match self.detectors.entry(observation.series_id.clone()) {
            Entry::Occupied(entry) => entry.into_mut(),
            Entry::Vacant(entry) => {
                let uuid = self
                    .override_detector
                    .or_else(|| self.catalog.detector_for_series(&observation.series_id));
                let Some(uuid) = uuid else {
                    if self.unrouted.insert(observation.series_id.clone()) {
                        print_warning(&format!(
                            "No detector configured for series '{}'",
                            observation.series_id
                        ));
                    }
                    self.summary.unrouted += 1;
                    return Ok(None);
                };

                let inner = self.factory.try_create(uuid).with_context(|| {
                    format!(
                        "Failed to provision detector {} for series '{}'",
                        uuid, observation.series_id
                    )
                })?;
                self.metrics.set_detectors_active(active);
                entry.insert(InstrumentedDetector::new(
                    inner,
                    self.metrics.clone(),
                    self.logger.clone(),
                ))
            }
        };

        match detector.classify(observation) {
            Ok(result) => {
                *self.summary.levels.entry(result.anomaly_level).or_insert(0) += 1;
                Ok(Some(result))
            }
            Err(e) => {
                print_warning(&format!("Skipped observation: {}", e));
                self.summary.invalid += 1;
                Ok(None)
            }
        }
    }

    pub fn finish(mut self) -> ReplaySummary {
        self.summary.series = self.detectors.len();
        self.summary
    }
}

/// Replay a recorded observation file through the catalog detectors
pub fn replay(
    catalog: &CatalogConfig,
    input: &Path,
    options: &ReplayOptions,
    format: OutputFormat,
) -> Result<()> {
    let observations = read_observations(input)?;
    info!(
        event = "replay_start",
        input = %input.display(),
        observations = observations.len(),
        "Starting replay"
    );

    let registry = catalog.registry();
    let mut replayer = Replayer::new(catalog, &registry, options.detector);
    let mut results = Vec::with_capacity(observations.len());
    for observation in &observations {
        if let Some(result) = replayer.process(observation)? {
            results.push(result);
        }
    }
    let summary = replayer.finish();

    let shown: Vec<&AnomalyResult> = results
        .iter()
        .filter(|r| !options.anomalies_only || r.anomaly_level.is_anomalous())
        .collect();

    match format {
        OutputFormat::Json => print_json(&ReplayReport {
            results: shown,
            summary: &summary,
        })?,
        OutputFormat::Table => {
            let rows: Vec<ResultRow> = shown.into_iter().map(ResultRow::from).collect();
            print_table(&rows, format);
            print_summary(&summary);
        }
    }

    if options.show_metrics {
        println!();
        println!("{}", render_metrics()?);
    }
    Ok(())
}

fn print_summary(summary: &ReplaySummary) {
    println!();
    println!("{}", "Replay Summary".bold());
    println!("{}", "=".repeat(40));
    println!("Observations:   {}", summary.observations);
    println!("Series:         {}", summary.series);
    for (level, count) in &summary.levels {
        println!("{:<15} {}", format!("{}:", level), count);
    }
    if summary.invalid > 0 {
        println!("Invalid:        {}", summary.invalid.to_string().yellow());
    }
    if summary.unrouted > 0 {
        println!("Unrouted:       {}", summary.unrouted.to_string().yellow());
    }
    let anomalies: u64 = summary
        .levels
        .iter()
        .filter(|(level, _)| level.is_anomalous())
        .map(|(_, count)| count)
        .sum();
    if anomalies == 0 {
        print_info("No anomalies detected");
    }
}

/// Render the process metrics in Prometheus text format
fn render_metrics() -> Result<String> {
    let encoder = TextEncoder::new();
    let mut buffer = Vec::new();
    encoder.encode(&prometheus::gather(), &mut buffer)?;
    Ok(String::from_utf8(buffer)?)
}
