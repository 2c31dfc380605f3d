//! Raw HCI socket backend.
//!
//! This backend uses raw Linux HCI sockets to scan for BLE advertisements
//! without requiring the BlueZ daemon. It requires CAP_NET_RAW and
//! CAP_NET_ADMIN capabilities or root privileges.
//!
//! Scanning is active so that scan responses, which usually carry the device
//! name, are received too. Names are remembered per address and attached to
//! later reports that only carry service data. Scan responses that carry
//! nothing but the name are not forwarded.

use super::{ADVERTISEMENT_CHANNEL_BUFFER_SIZE, ScanError};
use crate::advertisement::{RawAdvertisement, uuid16_to_string};
use libc::{AF_BLUETOOTH, SOCK_CLOEXEC, SOCK_RAW, c_int, c_void, sockaddr, socklen_t};
use std::collections::HashMap;
use std::io;
use std::mem;
use std::os::fd::{AsRawFd, FromRawFd, OwnedFd};
use tokio::io::unix::AsyncFd;
use tokio::sync::mpsc;

// HCI protocol constants
const BTPROTO_HCI: c_int = 1;
const HCI_FILTER: c_int = 2;

// HCI packet types
const HCI_COMMAND_PKT: u8 = 0x01;
const HCI_EVENT_PKT: u8 = 0x04;

// HCI events
const EVT_LE_META_EVENT: u8 = 0x3E;

// LE Meta event sub-events
const EVT_LE_ADVERTISING_REPORT: u8 = 0x02;

// HCI commands
const OGF_LE_CTL: u16 = 0x08;
const OCF_LE_SET_SCAN_PARAMETERS: u16 = 0x000B;
const OCF_LE_SET_SCAN_ENABLE: u16 = 0x000C;

// Scan types
const LE_SCAN_ACTIVE: u8 = 0x01;

// Advertising report event types
const ADV_SCAN_RSP: u8 = 0x04;

// Reported by the controller when no RSSI was measured
const RSSI_NOT_AVAILABLE: i8 = 127;

// Own address type
const LE_PUBLIC_ADDRESS: u8 = 0x00;

// Filter policy
const FILTER_POLICY_ACCEPT_ALL: u8 = 0x00;

// AD types
const AD_TYPE_SHORT_NAME: u8 = 0x08;
const AD_TYPE_COMPLETE_NAME: u8 = 0x09;
const AD_TYPE_SERVICE_DATA_16: u8 = 0x16;
const AD_TYPE_SERVICE_DATA_128: u8 = 0x21;

/// HCI socket address structure
#[repr(C)]
struct SockaddrHci {
    hci_family: u16,
    hci_dev: u16,
    hci_channel: u16,
}

/// HCI filter structure for raw sockets
#[repr(C)]
struct HciFilter {
    type_mask: u32,
    event_mask: [u32; 2],
    opcode: u16,
}

impl HciFilter {
    fn new() -> Self {
        Self {
            type_mask: 0,
            event_mask: [0, 0],
            opcode: 0,
        }
    }

    fn set_ptype(&mut self, ptype: u8) {
        self.type_mask |= 1 << (ptype as u32);
    }

    fn set_event(&mut self, event: u8) {
        let bit = event as usize;
        self.event_mask[bit / 32] |= 1 << (bit % 32);
    }
}

/// Create an HCI command packet
fn hci_command_packet(ogf: u16, ocf: u16, params: &[u8]) -> Vec<u8> {
    let opcode = (ogf << 10) | ocf;
    let mut packet = Vec::with_capacity(4 + params.len());
    packet.push(HCI_COMMAND_PKT);
    packet.extend_from_slice(&opcode.to_le_bytes());
    packet.push(params.len() as u8);
    packet.extend_from_slice(params);
    packet
}

fn os_error(context: &str) -> ScanError {
    classify_os_error(context, io::Error::last_os_error())
}

/// No Bluetooth support in the kernel or no `hci0` means HCI cannot be used at all.
fn classify_os_error(context: &str, err: io::Error) -> ScanError {
    match err.raw_os_error() {
        Some(libc::EAFNOSUPPORT | libc::ENODEV) => {
            ScanError::BackendNotAvailable(format!("hci ({context}: {err})"))
        }
        _ => ScanError::Bluetooth(format!("{context}: {err}")),
    }
}

/// Open a raw, non-blocking HCI socket bound to `dev_id`
fn open_hci_socket(dev_id: u16) -> Result<OwnedFd, ScanError> {
    // SOCK_NONBLOCK is required for AsyncFd
    let fd = unsafe {
        libc::socket(
            AF_BLUETOOTH,
            SOCK_RAW | SOCK_CLOEXEC | libc::SOCK_NONBLOCK,
            BTPROTO_HCI,
        )
    };
    if fd < 0 {
        return Err(os_error("Failed to create HCI socket"));
    }
    let fd = unsafe { OwnedFd::from_raw_fd(fd) };

    let addr = SockaddrHci {
        hci_family: AF_BLUETOOTH as u16,
        hci_dev: dev_id,
        hci_channel: 0, // HCI_CHANNEL_RAW
    };
    let ret = unsafe {
        libc::bind(
            fd.as_raw_fd(),
            &addr as *const SockaddrHci as *const sockaddr,
            mem::size_of::<SockaddrHci>() as socklen_t,
        )
    };
    if ret < 0 {
        return Err(os_error("Failed to bind HCI socket"));
    }

    Ok(fd)
}

/// Only let LE meta events through to the reading socket
fn set_hci_filter(fd: &OwnedFd) -> Result<(), ScanError> {
    let mut filter = HciFilter::new();
    filter.set_ptype(HCI_EVENT_PKT);
    filter.set_event(EVT_LE_META_EVENT);

    let ret = unsafe {
        libc::setsockopt(
            fd.as_raw_fd(),
            0, // SOL_HCI
            HCI_FILTER,
            &filter as *const HciFilter as *const c_void,
            mem::size_of::<HciFilter>() as socklen_t,
        )
    };
    if ret < 0 {
        return Err(os_error("Failed to set HCI filter"));
    }

    Ok(())
}

fn send_hci_command(fd: &OwnedFd, ocf: u16, params: &[u8]) -> Result<(), ScanError> {
    let packet = hci_command_packet(OGF_LE_CTL, ocf, params);
    let ret = unsafe {
        libc::write(
            fd.as_raw_fd(),
            packet.as_ptr() as *const c_void,
            packet.len(),
        )
    };
    if ret < 0 {
        return Err(os_error("Failed to send HCI command"));
    }

    Ok(())
}

/// LE Set Scan Parameters: active scan, 10ms interval, 10ms window
fn scan_parameters() -> [u8; 7] {
    let interval: u16 = 0x0010; // 0.625ms units
    let window: u16 = 0x0010;
    let [i0, i1] = interval.to_le_bytes();
    let [w0, w1] = window.to_le_bytes();
    [
        LE_SCAN_ACTIVE,
        i0,
        i1,
        w0,
        w1,
        LE_PUBLIC_ADDRESS,
        FILTER_POLICY_ACCEPT_ALL,
    ]
}

/// LE Set Scan Enable, never filtering duplicates
fn set_scan_enable(fd: &OwnedFd, enable: bool) -> Result<(), ScanError> {
    send_hci_command(fd, OCF_LE_SET_SCAN_ENABLE, &[u8::from(enable), 0x00])
}

/// Format a little-endian HCI address as `AA:BB:CC:DD:EE:FF`.
fn format_address(le_bytes: &[u8]) -> String {
    le_bytes
        .iter()
        .rev()
        .map(|b| format!("{b:02X}"))
        .collect::<Vec<_>>()
        .join(":")
}

/// Format a little-endian 128-bit UUID in canonical form.
fn uuid128_to_string(le_bytes: &[u8]) -> String {
    let hex: String = le_bytes.iter().rev().map(|b| format!("{b:02x}")).collect();
    format!(
        "{}-{}-{}-{}-{}",
        &hex[0..8],
        &hex[8..12],
        &hex[12..16],
        &hex[16..20],
        &hex[20..32]
    )
}

/// A single LE advertising report.
#[derive(Debug, PartialEq)]
struct AdvertisingReport {
    event_type: u8,
    advertisement: RawAdvertisement,
}

/// Parse an LE advertising report event.
///
/// `data` is the full HCI event packet. Only the first report is read;
/// controllers deliver one report per event in practice. Reports without a
/// measured RSSI are dropped.
fn parse_advertising_report(data: &[u8]) -> Option<AdvertisingReport> {
    // Skip HCI header (packet type, event code, param len, subevent)
    let report = data.get(4..)?;

    // num_reports(1) + event_type(1) + addr_type(1) + address(6) + data_len(1)
    if report.len() < 10 || report[0] == 0 {
        return None;
    }

    let event_type = report[1];
    let address = format_address(&report[3..9]);
    let data_len = report[9] as usize;
    let ad_data = report.get(10..10 + data_len)?;
    let rssi = *report.get(10 + data_len)? as i8;
    if rssi == RSSI_NOT_AVAILABLE {
        return None;
    }

    let mut advertisement = RawAdvertisement {
        address,
        name: None,
        rssi: i16::from(rssi),
        service_data: Vec::new(),
    };

    let mut offset = 0;
    while offset + 2 <= ad_data.len() {
        let len = ad_data[offset] as usize;
        if len == 0 || offset + 1 + len > ad_data.len() {
            break;
        }

        let ad_type = ad_data[offset + 1];
        let value = &ad_data[offset + 2..offset + 1 + len];

        match ad_type {
            AD_TYPE_SHORT_NAME | AD_TYPE_COMPLETE_NAME => {
                advertisement.name = Some(String::from_utf8_lossy(value).into_owned());
            }
            AD_TYPE_SERVICE_DATA_16 if value.len() >= 2 => {
                let uuid = u16::from_le_bytes([value[0], value[1]]);
                advertisement
                    .service_data
                    .push((uuid16_to_string(uuid), value[2..].to_vec()));
            }
            AD_TYPE_SERVICE_DATA_128 if value.len() >= 16 => {
                advertisement
                    .service_data
                    .push((uuid128_to_string(&value[..16]), value[16..].to_vec()));
            }
            _ => {}
        }

        offset += 1 + len;
    }

    Some(AdvertisingReport {
        event_type,
        advertisement,
    })
}

/// Remembers device names from scan responses.
#[derive(Debug, Default)]
struct NameCache {
    names: HashMap<String, String>,
}

impl NameCache {
    /// Record the name carried by `report`, or fill it in from an earlier one.
    ///
    /// Returns `None` for scan responses without service data; their name is
    /// kept for the advertisements that follow.
    fn resolve(&mut self, report: AdvertisingReport) -> Option<RawAdvertisement> {
        let AdvertisingReport {
            event_type,
            mut advertisement,
        } = report;

        match &advertisement.name {
            Some(name) => {
                self.names.insert(advertisement.address.clone(), name.clone());
            }
            None => {
                advertisement.name = self.names.get(&advertisement.address).cloned();
            }
        }

        if event_type == ADV_SCAN_RSP && advertisement.service_data.is_empty() {
            return None;
        }
        Some(advertisement)
    }
}

/// Start scanning for advertisements using raw HCI sockets.
///
/// Opens a raw HCI socket on `hci0`, enables active LE scanning and sends
/// every advertising report through the returned channel. Scanning is
/// disabled again when the receiver is dropped.
///
/// # Requirements
/// - CAP_NET_RAW and CAP_NET_ADMIN capabilities or root privileges
/// - An available HCI device (typically hci0)
pub async fn start_scan() -> Result<mpsc::Receiver<RawAdvertisement>, ScanError> {
    let fd = open_hci_socket(0)?;
    set_hci_filter(&fd)?;

    // Commands go through a separate socket
    let cmd_fd = open_hci_socket(0)?;
    send_hci_command(&cmd_fd, OCF_LE_SET_SCAN_PARAMETERS, &scan_parameters())?;
    set_scan_enable(&cmd_fd, true)?;
    log::info!("HCI LE scan enabled on hci0");

    let (tx, rx) = mpsc::channel(ADVERTISEMENT_CHANNEL_BUFFER_SIZE);

    let async_fd = AsyncFd::new(fd)
        .map_err(|e| ScanError::Bluetooth(format!("Failed to create async fd: {e}")))?;

    tokio::spawn(async move {
        let mut buf = [0u8; 258]; // Max HCI event size
        let mut names = NameCache::default();

        'events: loop {
            let mut guard = match async_fd.readable().await {
                Ok(guard) => guard,
                Err(e) => {
                    log::warn!("HCI socket failed: {e}");
                    break;
                }
            };

            // Drain all available packets before waiting again
            loop {
                let n = match guard.try_io(|inner| {
                    let ret = unsafe {
                        libc::read(
                            inner.as_raw_fd(),
                            buf.as_mut_ptr() as *mut c_void,
                            buf.len(),
                        )
                    };
                    if ret < 0 {
                        Err(io::Error::last_os_error())
                    } else {
                        Ok(ret as usize)
                    }
                }) {
                    Ok(Ok(n)) if n > 0 => n,
                    Ok(Ok(_)) => break,  // EOF or empty read
                    Ok(Err(_)) => break, // Read error
                    Err(_) => break,     // WouldBlock - no more data
                };

                let is_report = n >= 4
                    && buf[0] == HCI_EVENT_PKT
                    && buf[1] == EVT_LE_META_EVENT
                    && buf[3] == EVT_LE_ADVERTISING_REPORT;
                if !is_report {
                    continue;
                }

                let report = parse_advertising_report(&buf[..n]);
                let Some(advertisement) = report.and_then(|r| names.resolve(r)) else {
                    continue;
                };
                if tx.send(advertisement).await.is_err() {
                    break 'events;
                }
            }
        }

        if let Err(e) = set_scan_enable(&cmd_fd, false) {
            log::warn!("failed to disable LE scan: {e}");
        }
        log::info!("HCI scanner stopped");
    });

    Ok(rx)
}
