//! Human readable output formatter.

use crate::monitor::Reading;
use crate::output::OutputFormatter;
use std::time::SystemTime;
use time::OffsetDateTime;
use time::macros::format_description;

/// Formats a reading as a single line:
///
/// `nRF52840_DUMMY_01 (AA:BB:CC:DD:EE:FF) rssi=-60dBm T=23.44°C H=53.91% count=695 uptime=1386.7s version=1`
///
/// With timestamps enabled the line starts with the UTC time of the reading,
/// e.g. `[14:03:27] `.
#[derive(Debug, Default, Clone, Copy)]
pub struct TextFormatter {
    timestamps: bool,
}

impl TextFormatter {
    pub fn with_timestamps() -> Self {
        Self { timestamps: true }
    }

    fn clock(timestamp: SystemTime) -> Option<String> {
        OffsetDateTime::from(timestamp)
            .format(format_description!("[hour]:[minute]:[second]"))
            .ok()
    }
}

impl OutputFormatter for TextFormatter {
    fn format(&self, reading: &Reading, timestamp: SystemTime) -> String {
        let frame = &reading.frame;
        let line = format!(
            "{} ({}) rssi={}dBm T={:.2}°C H={:.2}% count={} uptime={:.1}s version={}",
            reading.name.as_deref().unwrap_or("Unknown"),
            reading.address,
            reading.rssi,
            frame.temperature_celsius,
            frame.humidity_percent,
            frame.advertisement_count,
            frame.uptime_seconds,
            frame.version,
        );

        match self.timestamps.then(|| Self::clock(timestamp)).flatten() {
            Some(clock) => format!("[{clock}] {line}"),
            None => line,
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::decoder::decode;
    use crate::test_utils::{TEST_ADDRESS, TEST_NAME, encode_long};
    use std::time::Duration;

    fn reading(name: Option<&str>) -> Reading {
        Reading {
            address: TEST_ADDRESS.to_string(),
            name: name.map(str::to_string),
            rssi: -60,
            frame: decode(&encode_long(0x20, 1, 1779, 0x1770, 695, 13_867)).unwrap(),
        }
    }

    #[test]
    fn test_text_format() {
        let formatter = TextFormatter::default();
        let line = formatter.format(&reading(Some(TEST_NAME)), SystemTime::UNIX_EPOCH);
        assert_eq!(
            line,
            "nRF52840_DUMMY_01 (AA:BB:CC:DD:EE:FF) rssi=-60dBm T=23.44°C H=53.91% count=695 uptime=1386.7s version=1"
        );
    }

    #[test]
    fn test_text_format_unnamed() {
        let formatter = TextFormatter::default();
        let line = formatter.format(&reading(None), SystemTime::UNIX_EPOCH);
        assert!(line.starts_with("Unknown (AA:BB:CC:DD:EE:FF)"));
    }

    #[test]
    fn test_text_format_with_timestamps() {
        // 01:02:03 UTC on the second day
        let timestamp = SystemTime::UNIX_EPOCH + Duration::from_secs(86_400 + 3_723);
        let formatter = TextFormatter::with_timestamps();
        let line = formatter.format(&reading(Some(TEST_NAME)), timestamp);
        assert!(line.starts_with("[01:02:03] nRF52840_DUMMY_01 (AA:BB:CC:DD:EE:FF) "));
        assert!(line.ends_with("version=1"));
    }
}
