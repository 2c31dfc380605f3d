//! `eddystone-tlm-listener` library.
//!
//! The binary (`src/main.rs`) is responsible for CLI parsing, logging setup and
//! process exit codes. Frame decoding lives in [`crate::decoder`], per-device
//! filtering in [`crate::monitor`], and the run loop in [`crate::app`] where it
//! can be tested deterministically with an injected scanner and output streams.

pub mod advertisement;
pub mod app;
pub mod decoder;
pub mod monitor;
pub mod output;
pub mod policy;
pub mod scanner;
pub mod telemetry;

#[cfg(test)]
mod test_utils;

// Re-export commonly used types at the crate root
pub use advertisement::{RawAdvertisement, ServiceData, is_tlm_service_id};
pub use decoder::{DecodeError, Layout, decode};
pub use monitor::{BeaconMonitor, DeviceState, MonitorConfig, MonitorEvent, MonitorStats, Reading};
pub use output::OutputFormatter;
pub use output::influxdb::InfluxDbFormatter;
pub use output::text::TextFormatter;
pub use policy::{EmitPolicy, parse_duration};
pub use scanner::{Backend, ScanError};
pub use telemetry::TelemetryFrame;
