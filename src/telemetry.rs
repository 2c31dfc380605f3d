//! Decoded telemetry record.

/// A telemetry frame decoded from an Eddystone-TLM style service data payload.
///
/// Values are converted to display units:
/// - Temperature in Celsius (signed 8.8 fixed point on the wire)
/// - Humidity in percent (raw value divided by 33 on the wire)
/// - Uptime in seconds (deciseconds on the wire)
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct TelemetryFrame {
    /// Frame type tag, `0x20` when the layout omits it
    pub frame_type: u8,
    /// Frame format version
    pub version: u8,
    /// Temperature in Celsius
    pub temperature_celsius: f64,
    /// Relative humidity in percent
    pub humidity_percent: f64,
    /// Number of advertisements sent since boot
    pub advertisement_count: u32,
    /// Time since boot in seconds
    pub uptime_seconds: f64,
}
