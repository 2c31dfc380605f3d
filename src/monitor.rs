//! Beacon monitor: turns raw advertisements into telemetry events.
//!
//! [`BeaconMonitor::observe`] is called once per advertisement, in delivery
//! order. It filters by device name, picks the telemetry service data,
//! decodes it and applies the configured [`EmitPolicy`] against the
//! per-device [`DeviceState`] store. Nothing is buffered between calls, so a
//! scan can be stopped between any two advertisements.

use crate::advertisement::RawAdvertisement;
use crate::decoder::{DecodeError, decode};
use crate::policy::EmitPolicy;
use crate::telemetry::TelemetryFrame;
use std::collections::HashMap;
use std::time::{Duration, Instant};

/// Default name fragment of the sensors to follow.
pub const DEFAULT_TARGET_NAME: &str = "nRF52840_DUMMY";

/// Configuration for a [`BeaconMonitor`].
#[derive(Debug, Clone, PartialEq)]
pub struct MonitorConfig {
    /// Case-insensitive fragment the advertised name must contain
    pub target_name: String,
    /// When to report decoded frames
    pub policy: EmitPolicy,
}

impl Default for MonitorConfig {
    fn default() -> Self {
        Self {
            target_name: DEFAULT_TARGET_NAME.to_string(),
            policy: EmitPolicy::Every,
        }
    }
}

/// Last reported state of a device.
#[derive(Debug, Clone, PartialEq)]
pub struct DeviceState {
    /// Name from the last reported advertisement
    pub name: Option<String>,
    /// RSSI of the last reported advertisement
    pub rssi: i16,
    /// When the last frame was reported
    pub last_seen: Instant,
    /// The last reported frame
    pub last_frame: TelemetryFrame,
}

/// A decoded telemetry frame together with where it came from.
#[derive(Debug, Clone, PartialEq)]
pub struct Reading {
    pub address: String,
    pub name: Option<String>,
    pub rssi: i16,
    pub frame: TelemetryFrame,
}

/// Outcome of observing a matching advertisement.
#[derive(Debug, Clone, PartialEq)]
pub enum MonitorEvent {
    /// A frame was decoded and admitted by the policy
    Telemetry(Reading),
    /// Telemetry service data was present but could not be decoded
    DecodeFailed {
        address: String,
        raw_bytes: Vec<u8>,
        error: DecodeError,
    },
    /// The device matched by name but carried no telemetry service data
    NoServiceData { address: String },
}

/// Counters of what the monitor has seen.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct MonitorStats {
    /// Advertisements passed to [`BeaconMonitor::observe`]
    pub advertisements: u64,
    /// Advertisements rejected by the name filter
    pub ignored: u64,
    /// Matching advertisements without telemetry service data
    pub no_service_data: u64,
    /// Payloads that failed to decode
    pub decode_failures: u64,
    /// Frames reported as [`MonitorEvent::Telemetry`]
    pub telemetry: u64,
    /// Decoded frames held back by the policy
    pub suppressed: u64,
}

/// Per-device telemetry monitor.
#[derive(Debug)]
pub struct BeaconMonitor {
    config: MonitorConfig,
    target_name: String,
    devices: HashMap<String, DeviceState>,
    stats: MonitorStats,
}

impl BeaconMonitor {
    pub fn new(config: MonitorConfig) -> Self {
        let target_name = config.target_name.to_lowercase();
        Self {
            config,
            target_name,
            devices: HashMap::new(),
            stats: MonitorStats::default(),
        }
    }

    pub fn config(&self) -> &MonitorConfig {
        &self.config
    }

    /// Observe an advertisement received now.
    pub fn observe(&mut self, advertisement: RawAdvertisement) -> Option<MonitorEvent> {
        self.observe_at(advertisement, Instant::now())
    }

    /// Observe an advertisement received at `now`.
    ///
    /// Returns `None` when the advertisement is from another device or the
    /// frame is held back by the policy. Decode failures and missing service
    /// data are always reported and never touch the device state.
    pub fn observe_at(
        &mut self,
        advertisement: RawAdvertisement,
        now: Instant,
    ) -> Option<MonitorEvent> {
        self.stats.advertisements += 1;

        if !self.matches_name(advertisement.name.as_deref()) {
            self.stats.ignored += 1;
            return None;
        }

        let Some(payload) = advertisement.tlm_payload() else {
            self.stats.no_service_data += 1;
            return Some(MonitorEvent::NoServiceData {
                address: advertisement.address,
            });
        };

        let frame = match decode(payload) {
            Ok(frame) => frame,
            Err(error) => {
                self.stats.decode_failures += 1;
                let raw_bytes = payload.to_vec();
                return Some(MonitorEvent::DecodeFailed {
                    address: advertisement.address,
                    raw_bytes,
                    error,
                });
            }
        };

        let previous = self.devices.get(&advertisement.address);
        if !self.config.policy.admits(&frame, previous, now) {
            log::debug!(
                "suppressed {}: T={:.2}°C H={:.2}%",
                advertisement.address,
                frame.temperature_celsius,
                frame.humidity_percent
            );
            self.stats.suppressed += 1;
            return None;
        }

        let RawAdvertisement {
            address,
            name,
            rssi,
            ..
        } = advertisement;

        self.devices.insert(
            address.clone(),
            DeviceState {
                name: name.clone(),
                rssi,
                last_seen: now,
                last_frame: frame,
            },
        );
        self.stats.telemetry += 1;

        Some(MonitorEvent::Telemetry(Reading {
            address,
            name,
            rssi,
            frame,
        }))
    }

    fn matches_name(&self, name: Option<&str>) -> bool {
        // A device without a name only matches an empty target
        name.unwrap_or_default()
            .to_lowercase()
            .contains(&self.target_name)
    }

    /// State of a device, if it has reported a frame.
    pub fn device(&self, address: &str) -> Option<&DeviceState> {
        self.devices.get(address)
    }

    /// All devices that have reported a frame, sorted by address.
    pub fn devices(&self) -> Vec<(&str, &DeviceState)> {
        let mut devices: Vec<_> = self
            .devices
            .iter()
            .map(|(address, state)| (address.as_str(), state))
            .collect();
        devices.sort_by_key(|(address, _)| *address);
        devices
    }

    pub fn stats(&self) -> MonitorStats {
        self.stats
    }

    /// Forget devices that have not reported for longer than `max_idle`.
    ///
    /// Returns the number of devices removed. A forgotten device is treated
    /// as a first sighting the next time it reports.
    pub fn evict_idle(&mut self, now: Instant, max_idle: Duration) -> usize {
        let before = self.devices.len();
        self.devices
            .retain(|_, state| now.saturating_duration_since(state.last_seen) <= max_idle);
        before - self.devices.len()
    }
}

impl Default for BeaconMonitor {
    fn default() -> Self {
        Self::new(MonitorConfig::default())
    }
}
