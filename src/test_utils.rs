use crate::advertisement::{RawAdvertisement, ServiceData, uuid16_to_string};

/// A stable device address for unit tests.
pub const TEST_ADDRESS: &str = "AA:BB:CC:DD:EE:FF";

/// Name advertised by the test sensor.
pub const TEST_NAME: &str = "nRF52840_DUMMY_01";

/// Build an advertisement with a fixed RSSI of -60 dBm.
pub fn advertisement(
    address: &str,
    name: Option<&str>,
    service_data: ServiceData,
) -> RawAdvertisement {
    RawAdvertisement {
        address: address.to_string(),
        name: name.map(str::to_string),
        rssi: -60,
        service_data,
    }
}

/// Build an advertisement from the test sensor carrying `payload` under the Eddystone UUID.
pub fn tlm_advertisement(address: &str, payload: Vec<u8>) -> RawAdvertisement {
    advertisement(
        address,
        Some(TEST_NAME),
        vec![(uuid16_to_string(0xFEAA), payload)],
    )
}

/// Encode a 14-byte long layout frame.
pub fn encode_long(
    frame_type: u8,
    version: u8,
    humidity_raw: u16,
    temperature_raw: u16,
    advertisement_count: u32,
    uptime_raw: u32,
) -> Vec<u8> {
    let mut data = Vec::with_capacity(14);
    data.push(frame_type);
    data.push(version);
    data.extend_from_slice(&humidity_raw.to_be_bytes());
    data.extend_from_slice(&temperature_raw.to_be_bytes());
    data.extend_from_slice(&advertisement_count.to_be_bytes());
    data.extend_from_slice(&uptime_raw.to_be_bytes());
    data
}

/// Long layout frame with only temperature (8.8 raw) and humidity (x33 raw) varying.
pub fn climate_frame(temperature_raw: u16, humidity_raw: u16) -> Vec<u8> {
    encode_long(0x20, 0x00, humidity_raw, temperature_raw, 1, 10)
}

/// Parse a hex string such as `063615e3` into bytes.
pub fn hex_bytes(src: &str) -> Vec<u8> {
    (0..src.len())
        .step_by(2)
        .map(|i| u8::from_str_radix(&src[i..i + 2], 16).unwrap())
        .collect()
}
