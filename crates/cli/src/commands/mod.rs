//! CLI subcommands

pub mod detectors;
pub mod replay;
pub mod simulate;
