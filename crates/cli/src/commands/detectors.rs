//! Catalog listing command

use anyhow::Result;
use colored::Colorize;
use detector_lib::build_detector;
use serde::Serialize;
use tabled::Tabled;

use crate::config::{CatalogConfig, DetectorEntry};
use crate::output::{print_info, print_table, OutputFormat};

/// Row for the detector catalog table
#[derive(Debug, Tabled, Serialize)]
struct DetectorRow {
    #[tabled(rename = "UUID")]
    uuid: String,
    #[tabled(rename = "Type")]
    #[serde(rename = "type")]
    detector_type: String,
    #[tabled(rename = "Series")]
    series: String,
    #[tabled(rename = "Params")]
    params: String,
    #[tabled(rename = "Status")]
    status: String,
}

impl DetectorRow {
    fn from_entry(entry: &DetectorEntry) -> Self {
        let status = match build_detector(&entry.to_resource()) {
            Ok(_) => "ok".to_string(),
            Err(e) => e.to_string(),
        };

        Self {
            uuid: entry.uuid.to_string(),
            detector_type: entry.detector_type.to_string(),
            series: if entry.series.is_empty() {
                "-".to_string()
            } else {
                entry.series.join(", ")
            },
            params: entry
                .params
                .as_ref()
                .map(|p| serde_json::Value::Object(p.clone()).to_string())
                .unwrap_or_else(|| "-".to_string()),
            status,
        }
    }
}

/// List catalog detectors and whether each one can be built
pub fn list_detectors(catalog: &CatalogConfig, format: OutputFormat) -> Result<()> {
    let mut rows: Vec<DetectorRow> = catalog.detectors.iter().map(DetectorRow::from_entry).collect();

    if format == OutputFormat::Table {
        for row in &mut rows {
            row.status = if row.status == "ok" {
                row.status.green().to_string()
            } else {
                row.status.red().to_string()
            };
        }
    }

    print_table(&rows, format);

    if format == OutputFormat::Table {
        if let Some(default) = catalog.default_detector {
            print_info(&format!("Unmapped series use detector {}", default));
        }
    }
    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;
    use detector_lib::DetectorKind;
    use serde_json::json;
    use uuid::Uuid;

    #[test]
    fn test_row_reports_build_failure() {
        let entry = DetectorEntry {
            uuid: Uuid::nil(),
            detector_type: DetectorKind::Ewma,
            series: vec![],
            params: json!({ "alpha": 1.5, "weak_sigmas": 3.0, "strong_sigmas": 4.0 })
                .as_object()
                .cloned(),
        };
        let row = DetectorRow::from_entry(&entry);
        assert_eq!(row.series, "-");
        assert!(row.status.contains("alpha"));
    }

    #[test]
    fn test_row_without_params() {
        let entry = DetectorEntry {
            uuid: Uuid::nil(),
            detector_type: DetectorKind::Cusum,
            series: vec!["a".into(), "b".into()],
            params: None,
        };
        let row = DetectorRow::from_entry(&entry);
        assert_eq!(row.series, "a, b");
        assert_eq!(row.params, "-");
        assert_ne!(row.status, "ok");
    }
}
