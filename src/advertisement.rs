//! BLE advertisement records delivered by the scanner backends.

use std::fmt::Write;

/// Service identifier fragments accepted for telemetry frames.
///
/// `feaa` is the Eddystone service UUID. Some firmware builds advertise the
/// frame under `0x0020` instead, so both are accepted.
pub const TLM_SERVICE_ID_FRAGMENTS: [&str; 2] = ["feaa", "0020"];

/// Service data entries as `(service identifier, payload)` pairs, in delivery order.
pub type ServiceData = Vec<(String, Vec<u8>)>;

/// A single advertisement as seen by the radio.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct RawAdvertisement {
    /// Opaque device address, e.g. `AA:BB:CC:DD:EE:FF`
    pub address: String,
    /// Advertised local name, if any
    pub name: Option<String>,
    /// Received signal strength in dBm
    pub rssi: i16,
    /// Service data keyed by service identifier
    pub service_data: ServiceData,
}

impl RawAdvertisement {
    /// Payload of the first service data entry that carries a telemetry frame.
    pub fn tlm_payload(&self) -> Option<&[u8]> {
        self.service_data
            .iter()
            .find(|(id, _)| is_tlm_service_id(id))
            .map(|(_, data)| data.as_slice())
    }
}

/// Whether a service identifier belongs to the telemetry frame family.
///
/// Matching is a case-insensitive substring test, so both the 16-bit form
/// (`FEAA`) and the full UUID (`0000feaa-0000-1000-8000-00805f9b34fb`) match.
pub fn is_tlm_service_id(id: &str) -> bool {
    let id = id.to_ascii_lowercase();
    TLM_SERVICE_ID_FRAGMENTS
        .iter()
        .any(|fragment| id.contains(fragment))
}

/// Expand a 16-bit Bluetooth SIG UUID to its canonical 128-bit string form.
pub fn uuid16_to_string(uuid: u16) -> String {
    format!("0000{uuid:04x}-0000-1000-8000-00805f9b34fb")
}

/// Render bytes as lowercase hex, e.g. `063615e3`.
pub fn to_hex(data: &[u8]) -> String {
    data.iter().fold(String::with_capacity(data.len() * 2), |mut s, b| {
        let _ = write!(s, "{b:02x}");
        s
    })
}
