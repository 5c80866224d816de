//! Detector catalog configuration
//!
//! The catalog is a TOML file listing detector models and the series each
//! one watches:
//!
//! ```toml
//! default_detector = "5159c1b8-94ca-424f-b25c-e9f5bcb2fc51"
//!
//! [[detectors]]
//! uuid = "5159c1b8-94ca-424f-b25c-e9f5bcb2fc51"
//! type = "cusum"
//! series = ["checkout.latency"]
//!
//! [detectors.params]
//! tail = "right"
//! warm_up_period = 25
//! weak_threshold_sigmas = 3.0
//! strong_threshold_sigmas = 4.0
//! target_value = 120.0
//! ```
//!
//! Scalar settings can be overridden with `AAD_`-prefixed environment
//! variables (e.g. `AAD_DEFAULT_DETECTOR`).

use std::collections::{HashMap, HashSet};
use std::path::{Path, PathBuf};

use anyhow::{bail, Context, Result};
use config::{Config, Environment, File, FileFormat};
use detector_lib::{DetectorKind, ModelRegistry, ModelResource};
use serde::{Deserialize, Serialize};
use serde_json::{Map, Value};
use tracing::debug;
use uuid::Uuid;

/// One detector model in the catalog
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct DetectorEntry {
    pub uuid: Uuid,
    #[serde(rename = "type")]
    pub detector_type: DetectorKind,
    /// Series routed to this detector
    #[serde(default)]
    pub series: Vec<String>,
    #[serde(default)]
    pub params: Option<Map<String, Value>>,
}

impl DetectorEntry {
    pub fn to_resource(&self) -> ModelResource {
        ModelResource {
            uuid: self.uuid,
            detector_type: self.detector_type,
            params: self.params.clone(),
        }
    }
}

/// Detector catalog
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct CatalogConfig {
    /// Detector used for series without an explicit mapping
    #[serde(default)]
    pub default_detector: Option<Uuid>,
    #[serde(default)]
    pub detectors: Vec<DetectorEntry>,
}

impl CatalogConfig {
    /// Load the catalog from `path`, or from the default location
    ///
    /// A missing default catalog yields an empty one; a missing explicit
    /// path is an error.
    pub fn load(path: Option<&Path>) -> Result<Self> {
        let (path, required) = match path {
            Some(p) => (p.to_path_buf(), true),
            None => (Self::default_path()?, false),
        };

        if required && !path.exists() {
            bail!("Catalog file not found: {}", path.display());
        }

        debug!(event = "catalog_load", path = %path.display(), "Loading detector catalog");

        let settings = Config::builder()
            .add_source(
                File::from(path.as_path())
                    .format(FileFormat::Toml)
                    .required(required),
            )
            .add_source(Environment::with_prefix("AAD"))
            .build()
            .with_context(|| format!("Failed to read catalog {}", path.display()))?;

        let catalog: CatalogConfig = settings
            .try_deserialize()
            .with_context(|| format!("Failed to parse catalog {}", path.display()))?;
        catalog.validate()?;
        Ok(catalog)
    }

    /// Get the default catalog path
    pub fn default_path() -> Result<PathBuf> {
        let home = dirs_next::home_dir().context("Could not determine home directory")?;
        Ok(home.join(".config").join("aad").join("detectors.toml"))
    }

    /// Reject duplicate model ids and series routed to more than one model
    pub fn validate(&self) -> Result<()> {
        let mut ids = HashSet::new();
        let mut routes: HashMap<&str, Uuid> = HashMap::new();

        for entry in &self.detectors {
            if !ids.insert(entry.uuid) {
                bail!("Detector {} is defined more than once", entry.uuid);
            }
            for series in &entry.series {
                if let Some(previous) = routes.insert(series.as_str(), entry.uuid) {
                    bail!(
                        "Series '{}' is routed to both {} and {}",
                        series,
                        previous,
                        entry.uuid
                    );
                }
            }
        }
        Ok(())
    }

    /// Build a model registry holding every catalog entry
    pub fn registry(&self) -> ModelRegistry {
        self.detectors.iter().map(DetectorEntry::to_resource).collect()
    }

    /// Detector model watching `series_id`
    pub fn detector_for_series(&self, series_id: &str) -> Option<Uuid> {
        self.detectors
            .iter()
            .find(|entry| entry.series.iter().any(|s| s == series_id))
            .map(|entry| entry.uuid)
            .or(self.default_detector)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use detector_lib::DetectorFactory;
    use std::io::Write;

    const CATALOG: &str = r#"
[[detectors]]
uuid = "00000000-0000-0000-0000-000000000001"
type = "ewma"
series = ["cpu.load", "mem.used"]

[detectors.params]
alpha = 0.2
weak_sigmas = 3
strong_sigmas = 4.0

[[detectors]]
uuid = "00000000-0000-0000-0000-000000000002"
type = "cusum"
series = ["checkout.latency"]

[detectors.params]
tail = "right"
warm_up_period = 25
weak_threshold_sigmas = 3.0
strong_threshold_sigmas = 4.0
target_value = 120.0
"#;

    fn write_catalog(contents: &str) -> tempfile::NamedTempFile {
        let mut file = tempfile::Builder::new()
            .suffix(".toml")
            .tempfile()
            .unwrap();
        file.write_all(contents.as_bytes()).unwrap();
        file
    }

    #[test]
    fn test_load_catalog() {
        let file = write_catalog(CATALOG);
        let catalog = CatalogConfig::load(Some(file.path())).unwrap();

        assert_eq!(catalog.detectors.len(), 2);
        assert_eq!(catalog.detectors[1].detector_type, DetectorKind::Cusum);
        assert_eq!(
            catalog.detector_for_series("mem.used"),
            Some(Uuid::from_u128(1))
        );
        assert_eq!(
            catalog.detector_for_series("checkout.latency"),
            Some(Uuid::from_u128(2))
        );
        assert_eq!(catalog.detector_for_series("disk.io"), None);
    }

    #[test]
    fn test_catalog_entries_provision() {
        let file = write_catalog(CATALOG);
        let registry = CatalogConfig::load(Some(file.path())).unwrap().registry();

        assert_eq!(registry.len(), 2);
        let detector = registry.try_create(Uuid::from_u128(2)).unwrap();
        assert_eq!(detector.kind(), DetectorKind::Cusum);
        assert!(registry.try_create(Uuid::from_u128(1)).is_ok());
    }

    #[test]
    fn test_default_detector_fallback() {
        let catalog = CatalogConfig {
            default_detector: Some(Uuid::from_u128(9)),
            detectors: vec![],
        };
        assert_eq!(
            catalog.detector_for_series("anything"),
            Some(Uuid::from_u128(9))
        );
    }

    #[test]
    fn test_missing_explicit_catalog_is_an_error() {
        let dir = tempfile::tempdir().unwrap();
        let missing = dir.path().join("nope.toml");
        assert!(CatalogConfig::load(Some(&missing)).is_err());
    }

    #[test]
    fn test_duplicate_routes_rejected() {
        let entry = |id: u128, series: &str| DetectorEntry {
            uuid: Uuid::from_u128(id),
            detector_type: DetectorKind::Ewma,
            series: vec![series.to_string()],
            params: None,
        };

        let catalog = CatalogConfig {
            default_detector: None,
            detectors: vec![entry(1, "cpu"), entry(2, "cpu")],
        };
        assert!(catalog.validate().is_err());

        let catalog = CatalogConfig {
            default_detector: None,
            detectors: vec![entry(1, "cpu"), entry(1, "mem")],
        };
        assert!(catalog.validate().is_err());
    }
}
