//! Observation sources
//!
//! This module provides:
//! - JSON-lines reader for recorded observations
//! - Seeded random-walk generator for simulations

use std::fs::File;
use std::io::{self, BufRead, BufReader};
use std::path::Path;

use anyhow::{Context, Result};
use detector_lib::Observation;
use rand::rngs::StdRng;
use rand::{Rng, SeedableRng};

/// Read observations, one JSON object per line
///
/// Blank lines and lines starting with `#` are skipped. A path of `-`
/// reads from stdin. Epochs outside the calendar range are rejected.
pub fn read_observations(path: &Path) -> Result<Vec<Observation>> {
    let reader: Box<dyn BufRead> = if path == Path::new("-") {
        Box::new(BufReader::new(io::stdin()))
    } else {
        let file = File::open(path)
            .with_context(|| format!("Failed to open {}", path.display()))?;
        Box::new(BufReader::new(file))
    };
    parse_observations(reader)
}

fn parse_observations<R: BufRead>(reader: R) -> Result<Vec<Observation>> {
    let mut observations = Vec::new();
    for (index, line) in reader.lines().enumerate() {
        let line = line.context("Failed to read input")?;
        let trimmed = line.trim();
        if trimmed.is_empty() || trimmed.starts_with('#') {
            continue;
        }
        let observation: Observation = serde_json::from_str(trimmed)
            .with_context(|| format!("Malformed observation on line {}", index + 1))?;
        observation.timestamp().with_context(|| {
            format!(
                "Timestamp {} out of range on line {}",
                observation.epoch_second,
                index + 1
            )
        })?;
        observations.push(observation);
    }
    Ok(observations)
}

/// Random walk with uniform steps in `[-1, 1]`
pub struct RandomWalk {
    rng: StdRng,
    series_id: String,
    epoch_second: i64,
    step_secs: i64,
    value: f64,
}

impl RandomWalk {
    pub fn new(seed: u64, series_id: impl Into<String>, start_epoch: i64) -> Self {
        Self {
            rng: StdRng::seed_from_u64(seed),
            series_id: series_id.into(),
            epoch_second: start_epoch,
            step_secs: 60,
            value: 0.0,
        }
    }
}

impl Iterator for RandomWalk {
    type Item = Observation;

    fn next(&mut self) -> Option<Observation> {
        self.value += self.rng.gen_range(-1.0..=1.0);
        let observation = Observation::new(self.series_id.clone(), self.epoch_second, self.value);
        self.epoch_second += self.step_secs;
        Some(observation)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::io::Cursor;

    #[test]
    fn test_parse_observations_skips_blanks_and_comments() {
        let input = r#"
# recorded from staging
{"series_id": "cpu", "epoch_second": 1700000000, "value": 0.5}

{"series_id": "cpu", "epoch_second": 1700000060, "value": 0.75}
"#;
        let observations = parse_observations(Cursor::new(input)).unwrap();
        assert_eq!(observations.len(), 2);
        assert_eq!(observations[1].value, 0.75);
        assert_eq!(observations[1].epoch_second, 1_700_000_060);
    }

    #[test]
    fn test_parse_observations_reports_line() {
        let input = "{\"series_id\": \"cpu\", \"epoch_second\": 1, \"value\": 1.0}\nnot json\n";
        let err = parse_observations(Cursor::new(input)).unwrap_err();
        assert!(err.to_string().contains("line 2"));
    }

    #[test]
    fn test_parse_observations_rejects_unrepresentable_epoch() {
        let input = format!(
            "{{\"series_id\": \"cpu\", \"epoch_second\": 1, \"value\": 1.0}}\n\
             {{\"series_id\": \"cpu\", \"epoch_second\": {}, \"value\": 1.0}}\n",
            i64::MAX
        );
        let err = parse_observations(Cursor::new(input)).unwrap_err();
        assert!(err.to_string().contains("out of range on line 2"), "{err}");
    }

    #[test]
    fn test_random_walk_is_seeded() {
        let a: Vec<f64> = RandomWalk::new(7, "walk", 0).take(50).map(|o| o.value).collect();
        let b: Vec<f64> = RandomWalk::new(7, "walk", 0).take(50).map(|o| o.value).collect();
        let c: Vec<f64> = RandomWalk::new(8, "walk", 0).take(50).map(|o| o.value).collect();
        assert_eq!(a, b);
        assert_ne!(a, c);
    }

    #[test]
    fn test_random_walk_steps() {
        let walk: Vec<Observation> = RandomWalk::new(1, "walk", 100).take(3).collect();
        assert_eq!(walk[0].epoch_second, 100);
        assert_eq!(walk[2].epoch_second, 220);
        assert!(walk.windows(2).all(|w| (w[1].value - w[0].value).abs() <= 1.0));
    }
}
