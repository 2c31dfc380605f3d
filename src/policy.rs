//! Emission policies for decoded telemetry.
//!
//! A policy decides whether a newly decoded frame is reported, based only on
//! the frame, the device's previous [`DeviceState`] and the current instant.
//! The state itself lives in [`crate::monitor::BeaconMonitor`].

use crate::monitor::DeviceState;
use crate::telemetry::TelemetryFrame;
use std::time::{Duration, Instant};

/// Default rate limiting window for single scans.
pub const DEFAULT_RATE_LIMIT: Duration = Duration::from_secs(2);

/// Default temperature change (Celsius) that triggers a report in continuous mode.
pub const DEFAULT_TEMPERATURE_DELTA: f64 = 0.1;

/// Default humidity change (percent) that triggers a report in continuous mode.
pub const DEFAULT_HUMIDITY_DELTA: f64 = 1.0;

/// When to report a decoded frame for a device.
///
/// The first sighting of a device is always reported.
#[derive(Debug, Clone, Copy, PartialEq)]
pub enum EmitPolicy {
    /// Report every frame
    Every,
    /// Report at most one frame per device per window
    RateLimited(Duration),
    /// Report only when temperature or humidity moved by more than the given deltas
    /// since the last reported frame
    OnChange { temperature: f64, humidity: f64 },
}

impl EmitPolicy {
    /// Rate limited policy with the 2 second default window.
    pub fn rate_limited() -> Self {
        EmitPolicy::RateLimited(DEFAULT_RATE_LIMIT)
    }

    /// Change triggered policy with the default deltas.
    pub fn on_change() -> Self {
        EmitPolicy::OnChange {
            temperature: DEFAULT_TEMPERATURE_DELTA,
            humidity: DEFAULT_HUMIDITY_DELTA,
        }
    }

    /// Check whether `frame` should be reported given the previously reported state.
    ///
    /// # Arguments
    /// * `frame` - The newly decoded frame
    /// * `previous` - State recorded at the last report for this device, if any
    /// * `now` - The instant the frame was received
    pub fn admits(
        &self,
        frame: &TelemetryFrame,
        previous: Option<&DeviceState>,
        now: Instant,
    ) -> bool {
        let Some(previous) = previous else {
            return true;
        };

        match *self {
            EmitPolicy::Every => true,
            EmitPolicy::RateLimited(window) => {
                now.saturating_duration_since(previous.last_seen) >= window
            }
            EmitPolicy::OnChange {
                temperature,
                humidity,
            } => {
                let last = &previous.last_frame;
                (last.temperature_celsius - frame.temperature_celsius).abs() > temperature
                    || (last.humidity_percent - frame.humidity_percent).abs() > humidity
            }
        }
    }
}

/// Parse a duration from a human-readable string.
///
/// Supports the following suffixes:
/// - `s` or no suffix: seconds
/// - `m`: minutes
/// - `h`: hours
/// - `ms`: milliseconds
///
/// # Examples
/// ```
/// use eddystone_tlm_listener::policy::parse_duration;
/// use std::time::Duration;
///
/// assert_eq!(parse_duration("2s").unwrap(), Duration::from_secs(2));
/// assert_eq!(parse_duration("1m").unwrap(), Duration::from_secs(60));
/// assert_eq!(parse_duration("500ms").unwrap(), Duration::from_millis(500));
/// ```
pub fn parse_duration(src: &str) -> Result<Duration, String> {
    let src = src.trim();

    if src.is_empty() {
        return Err("empty duration string".to_string());
    }

    // "ms" must be checked before "m" and "s"
    if let Some(num) = src.strip_suffix("ms") {
        let millis: u64 = num
            .trim()
            .parse()
            .map_err(|_| format!("invalid milliseconds: {num}"))?;
        return Ok(Duration::from_millis(millis));
    }

    let (num, unit_secs, unit) = if let Some(num) = src.strip_suffix('h') {
        (num, 3600, "hours")
    } else if let Some(num) = src.strip_suffix('m') {
        (num, 60, "minutes")
    } else if let Some(num) = src.strip_suffix('s') {
        (num, 1, "seconds")
    } else {
        (src, 1, "duration")
    };

    let value: u64 = num
        .trim()
        .parse()
        .map_err(|_| format!("invalid {unit}: {num}"))?;
    value
        .checked_mul(unit_secs)
        .map(Duration::from_secs)
        .ok_or_else(|| format!("duration out of range: {src}"))
}
