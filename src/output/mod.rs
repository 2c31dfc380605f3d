//! Output formatters for telemetry readings.
//!
//! This module provides a trait for formatting readings and implementations
//! for the supported output formats: a human readable line and InfluxDB line
//! protocol.

pub mod influxdb;
pub mod text;

use crate::monitor::Reading;
use std::time::SystemTime;

/// Trait for formatting readings into output lines.
pub trait OutputFormatter: Send + Sync {
    /// Format a reading received at `timestamp`, without a trailing newline.
    fn format(&self, reading: &Reading, timestamp: SystemTime) -> String;
}

/// Available output formats.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, clap::ValueEnum)]
pub enum Format {
    /// One human readable line per reading
    #[default]
    Text,
    /// InfluxDB line protocol
    Influxdb,
}
