//! Random-walk simulation comparing EWMA and PEWMA forecasts

use std::collections::BTreeMap;

use anyhow::Result;
use colored::Colorize;
use detector_lib::{
    AnomalyDetector, AnomalyLevel, AnomalyResult, EwmaDetector, EwmaParams, PewmaDetector,
    PewmaParams,
};
use serde::Serialize;
use tabled::Tabled;
use tracing::info;
use uuid::Uuid;

use crate::output::{print_json, print_table, OutputFormat};
use crate::source::RandomWalk;

/// Running root-mean-square error of forecasts against observed values
#[derive(Debug, Clone, Copy, Default)]
pub struct RmseEvaluator {
    sum_squared_error: f64,
    count: u64,
}

impl RmseEvaluator {
    pub fn update(&mut self, observed: f64, predicted: f64) {
        let error = observed - predicted;
        self.sum_squared_error += error * error;
        self.count += 1;
    }

    pub fn rmse(&self) -> f64 {
        if self.count == 0 {
            0.0
        } else {
            (self.sum_squared_error / self.count as f64).sqrt()
        }
    }
}

/// Per-detector outcome of a simulation run
#[derive(Debug, Clone, Serialize)]
pub struct SimulationOutcome {
    pub detector: String,
    pub points: u64,
    pub levels: BTreeMap<AnomalyLevel, u64>,
    pub rmse: f64,
}

/// Row for the simulation table
#[derive(Tabled, Serialize)]
struct OutcomeRow {
    #[tabled(rename = "Detector")]
    detector: String,
    #[tabled(rename = "Points")]
    points: u64,
    #[tabled(rename = "Normal")]
    normal: u64,
    #[tabled(rename = "Weak")]
    weak: u64,
    #[tabled(rename = "Strong")]
    strong: u64,
    #[tabled(rename = "RMSE")]
    rmse: String,
}

impl From<&SimulationOutcome> for OutcomeRow {
    fn from(outcome: &SimulationOutcome) -> Self {
        let count = |level: AnomalyLevel| outcome.levels.get(&level).copied().unwrap_or(0);
        Self {
            detector: outcome.detector.clone(),
            points: outcome.points,
            normal: count(AnomalyLevel::Normal),
            weak: count(AnomalyLevel::Weak),
            strong: count(AnomalyLevel::Strong),
            rmse: format!("{:.4}", outcome.rmse),
        }
    }
}

struct Tally {
    levels: BTreeMap<AnomalyLevel, u64>,
    rmse: RmseEvaluator,
    points: u64,
}

impl Tally {
    fn new() -> Self {
        Self {
            levels: AnomalyLevel::ALL.iter().map(|l| (*l, 0)).collect(),
            rmse: RmseEvaluator::default(),
            points: 0,
        }
    }

    fn record(&mut self, result: &AnomalyResult) {
        *self.levels.entry(result.anomaly_level).or_insert(0) += 1;
        self.rmse.update(result.observed, result.predicted);
        self.points += 1;
    }

    fn into_outcome(self, detector: String) -> SimulationOutcome {
        SimulationOutcome {
            detector,
            points: self.points,
            levels: self.levels,
            rmse: self.rmse.rmse(),
        }
    }
}

/// Run `steps` random-walk points through default EWMA and PEWMA detectors
pub fn run_simulation(steps: usize, seed: u64, start_epoch: i64) -> Result<Vec<SimulationOutcome>> {
    let mut detectors: Vec<Box<dyn AnomalyDetector>> = vec![
        Box::new(EwmaDetector::new(Uuid::from_u128(1), EwmaParams::default())?),
        Box::new(PewmaDetector::new(Uuid::from_u128(2), PewmaParams::default())?),
    ];
    let mut tallies: Vec<Tally> = detectors.iter().map(|_| Tally::new()).collect();

    for observation in RandomWalk::new(seed, "random.walk", start_epoch).take(steps) {
        for (detector, tally) in detectors.iter_mut().zip(tallies.iter_mut()) {
            tally.record(&detector.classify(&observation)?);
        }
    }

    Ok(detectors
        .iter()
        .zip(tallies)
        .map(|(detector, tally)| tally.into_outcome(detector.kind().to_string()))
        .collect())
}

/// Simulate and print per-detector level counts and forecast error
pub fn simulate(steps: usize, seed: u64, format: OutputFormat) -> Result<()> {
    info!(event = "simulation_start", steps, seed, "Starting random walk simulation");

    let outcomes = run_simulation(steps, seed, chrono::Utc::now().timestamp())?;

    match format {
        OutputFormat::Json => print_json(&outcomes)?,
        OutputFormat::Table => {
            println!(
                "{} {} steps, seed {}",
                "Random walk:".bold(),
                steps,
                seed
            );
            let rows: Vec<OutcomeRow> = outcomes.iter().map(OutcomeRow::from).collect();
            print_table(&rows, format);
        }
    }
    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_rmse_evaluator() {
        let mut eval = RmseEvaluator::default();
        assert_eq!(eval.rmse(), 0.0);
        eval.update(3.0, 0.0);
        eval.update(-4.0, 0.0);
        assert!((eval.rmse() - (12.5f64).sqrt()).abs() < 1e-12);
    }

    #[test]
    fn test_simulation_is_reproducible() {
        let a = run_simulation(300, 11, 0).unwrap();
        let b = run_simulation(300, 11, 0).unwrap();

        assert_eq!(a.len(), 2);
        assert_eq!(a[0].detector, "ewma");
        assert_eq!(a[1].detector, "pewma");
        for (x, y) in a.iter().zip(&b) {
            assert_eq!(x.points, 300);
            assert_eq!(x.levels, y.levels);
            assert_eq!(x.rmse, y.rmse);
            assert_eq!(x.levels.values().sum::<u64>(), 300);
            // Neither detector has a warm-up verdict
            assert_eq!(x.levels[&AnomalyLevel::Unknown], 0);
        }
    }

    #[test]
    fn test_forecasts_track_the_walk() {
        let outcomes = run_simulation(1_000, 3, 0).unwrap();
        for outcome in outcomes {
            assert!(outcome.rmse.is_finite());
            // Steps are bounded by 1, so a tracking forecast stays close
            assert!(outcome.rmse < 10.0, "{} rmse {}", outcome.detector, outcome.rmse);
        }
    }
}
