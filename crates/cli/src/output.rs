//! Output formatting utilities

use clap::ValueEnum;
use colored::Colorize;
use detector_lib::AnomalyLevel;
use serde::Serialize;
use tabled::{settings::Style, Table, Tabled};

/// Output format for CLI commands
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, ValueEnum)]
pub enum OutputFormat {
    /// Table format (default)
    #[default]
    Table,
    /// JSON format
    Json,
}

/// Print a table from a list of items
pub fn print_table<T: Tabled + Serialize>(items: &[T], format: OutputFormat) {
    match format {
        OutputFormat::Table => {
            if items.is_empty() {
                println!("{}", "No items found".yellow());
                return;
            }
            let table = Table::new(items).with(Style::rounded()).to_string();
            println!("{}", table);
        }
        OutputFormat::Json => {
            if let Ok(json) = serde_json::to_string_pretty(&items) {
                println!("{}", json);
            }
        }
    }
}

/// Print any serializable value as pretty JSON
pub fn print_json<T: Serialize>(value: &T) -> anyhow::Result<()> {
    println!("{}", serde_json::to_string_pretty(value)?);
    Ok(())
}

/// Print a warning message
pub fn print_warning(message: &str) {
    eprintln!("{} {}", "⚠".yellow().bold(), message);
}

/// Print an info message
pub fn print_info(message: &str) {
    println!("{} {}", "ℹ".blue().bold(), message);
}

/// Format a timestamp given in epoch seconds
pub fn format_epoch(epoch_second: i64) -> String {
    chrono::DateTime::from_timestamp(epoch_second, 0)
        .map(|t| t.format("%Y-%m-%d %H:%M:%S").to_string())
        .unwrap_or_else(|| epoch_second.to_string())
}

/// Format an optional threshold, "-" when the side is not defined
pub fn format_threshold(value: Option<f64>) -> String {
    value.map_or_else(|| "-".to_string(), |v| format!("{:.3}", v))
}

/// Color an anomaly level
pub fn color_level(level: AnomalyLevel) -> String {
    let label = level.as_str();
    match level {
        AnomalyLevel::Unknown => label.dimmed().to_string(),
        AnomalyLevel::Normal => label.green().to_string(),
        AnomalyLevel::Weak => label.yellow().to_string(),
        AnomalyLevel::Strong => label.red().bold().to_string(),
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_format_threshold() {
        assert_eq!(format_threshold(None), "-");
        assert_eq!(format_threshold(Some(1.23456)), "1.235");
    }

    #[test]
    fn test_format_epoch() {
        assert_eq!(format_epoch(0), "1970-01-01 00:00:00");
        assert_eq!(format_epoch(1_700_000_000), "2023-11-14 22:13:20");
    }

    #[test]
    fn test_color_level_keeps_label() {
        for level in AnomalyLevel::ALL {
            assert!(color_level(level).contains(level.as_str()));
        }
    }
}
