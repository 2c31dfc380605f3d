//! BlueZ D-Bus backend.
//!
//! This backend uses the `bluer` crate to communicate with the BlueZ daemon
//! via D-Bus. It requires the `bluetoothd` daemon to be running.

use super::{ADVERTISEMENT_CHANNEL_BUFFER_SIZE, ScanError};
use crate::advertisement::{RawAdvertisement, ServiceData};
use bluer::{Adapter, AdapterEvent, Address, DiscoveryFilter, DiscoveryTransport, Session, Uuid};
use futures::StreamExt;
use std::collections::HashMap;
use tokio::sync::mpsc;

impl From<bluer::Error> for ScanError {
    fn from(err: bluer::Error) -> Self {
        ScanError::Bluetooth(err.to_string())
    }
}

/// Start LE discovery using the BlueZ D-Bus backend.
///
/// Every device addition or property change reported by BlueZ is turned into
/// a [`RawAdvertisement`] and sent through the returned channel. Discovery
/// runs until the receiver is dropped.
pub async fn start_scan() -> Result<mpsc::Receiver<RawAdvertisement>, ScanError> {
    let session = Session::new().await?;
    let adapter = session.default_adapter().await?;
    adapter.set_powered(true).await?;
    log::info!("using Bluetooth adapter {}", adapter.name());

    // Duplicate data is needed to see every new telemetry frame
    adapter
        .set_discovery_filter(DiscoveryFilter {
            transport: DiscoveryTransport::Le,
            duplicate_data: true,
            ..Default::default()
        })
        .await?;

    let events = adapter.discover_devices_with_changes().await?;
    let (tx, rx) = mpsc::channel(ADVERTISEMENT_CHANNEL_BUFFER_SIZE);

    // Spawn a task that owns all Bluetooth state and runs the event loop
    tokio::spawn(async move {
        // Keep the session alive by moving it into this task
        let _session = session;
        let mut events = Box::pin(events);

        while let Some(event) = events.next().await {
            let AdapterEvent::DeviceAdded(address) = event else {
                continue;
            };

            match read_advertisement(&adapter, address).await {
                Ok(Some(advertisement)) => {
                    if tx.send(advertisement).await.is_err() {
                        break;
                    }
                }
                Ok(None) => {}
                Err(e) => log::debug!("failed to read device {address}: {e}"),
            }
        }

        // Dropping the event stream ends discovery
        log::info!("bluer scanner stopped");
    });

    Ok(rx)
}

/// Read the current advertisement properties of a device.
///
/// Returns `None` for cached devices that are not currently in range (no RSSI).
async fn read_advertisement(
    adapter: &Adapter,
    address: Address,
) -> Result<Option<RawAdvertisement>, ScanError> {
    let device = adapter.device(address)?;

    let Some(rssi) = device.rssi().await? else {
        return Ok(None);
    };
    let name = device.name().await?;
    let service_data = device
        .service_data()
        .await?
        .map(sorted_service_data)
        .unwrap_or_default();

    Ok(Some(RawAdvertisement {
        address: address.to_string(),
        name,
        rssi,
        service_data,
    }))
}

/// BlueZ reports service data as a map; order it by UUID for stable selection.
fn sorted_service_data(data: HashMap<Uuid, Vec<u8>>) -> ServiceData {
    let mut entries: ServiceData = data
        .into_iter()
        .map(|(uuid, bytes)| (uuid.to_string(), bytes))
        .collect();
    entries.sort_by(|(a, _), (b, _)| a.cmp(b));
    entries
}
