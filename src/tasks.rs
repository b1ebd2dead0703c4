//! Device-list task.
//!
//! Every cycle the task refreshes the registry, reconciles the live pods
//! with the persisted device records and pushes the merged listing to a
//! channel. Newly seen pods are persisted; stored pods that are not
//! connected stay in the listing without an endpoint.

use std::future::Future;
use std::pin::Pin;
use std::sync::Arc;
use std::time::Duration;

use tokio::sync::{Mutex, mpsc};

use crate::error::{Error, Result};
use crate::manager::{DeviceManager, DeviceSnapshot};
use crate::scheduler::{IntervalHandle, set_async_interval};
use crate::transport::{Connector, Endpoint};

/// Capacity of the listing channel.
pub const LISTING_CAPACITY: usize = 16;

/// A persisted device record.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct StoredDevice {
    /// Store-assigned id.
    pub id: u64,
    /// Serial number.
    pub serial_number: String,
    /// Display name.
    pub name: String,
}

/// One row of the device listing.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct DeviceEntry {
    /// Store id.
    pub id: u64,
    /// Serial number.
    pub serial_number: String,
    /// Display name.
    pub name: String,
    /// Endpoint; `None` when the pod is not connected.
    pub endpoint: Option<Endpoint>,
    /// Firmware version; `None` when the pod is not connected.
    pub firmware_version: Option<String>,
    /// Indicator LED state.
    pub led_on: bool,
}

impl DeviceEntry {
    /// Returns true if the pod answered in the last cycle.
    #[must_use]
    pub const fn is_connected(&self) -> bool {
        self.endpoint.is_some()
    }
}

/// Persisted device records.
pub trait DeviceStore: Send + Sync {
    /// Returns every stored device.
    fn find_all(&self) -> Pin<Box<dyn Future<Output = Result<Vec<StoredDevice>>> + Send + '_>>;

    /// Stores a new device named after its serial number.
    fn add_device(
        &self,
        serial_number: &str,
    ) -> Pin<Box<dyn Future<Output = Result<StoredDevice>> + Send + '_>>;
}

/// In-memory [`DeviceStore`].
#[derive(Debug, Default)]
pub struct MemoryStore {
    devices: Mutex<Vec<StoredDevice>>,
}

impl MemoryStore {
    /// Creates an empty store.
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    /// Creates a store holding `devices`.
    #[must_use]
    pub fn with_devices(devices: Vec<StoredDevice>) -> Self {
        Self {
            devices: Mutex::new(devices),
        }
    }
}

impl DeviceStore for MemoryStore {
    fn find_all(&self) -> Pin<Box<dyn Future<Output = Result<Vec<StoredDevice>>> + Send + '_>> {
        Box::pin(async move { Ok(self.devices.lock().await.clone()) })
    }

    fn add_device(
        &self,
        serial_number: &str,
    ) -> Pin<Box<dyn Future<Output = Result<StoredDevice>> + Send + '_>> {
        let serial_number = serial_number.to_owned();
        Box::pin(async move {
            let mut devices = self.devices.lock().await;
            let id = devices.iter().map(|d| d.id).max().map_or(1, |max| max + 1);
            let device = StoredDevice {
                id,
                name: serial_number.clone(),
                serial_number,
            };
            devices.push(device.clone());
            Ok(device)
        })
    }
}

/// Merges live snapshots with the stored records.
///
/// Snapshots keep their order and come first; disconnected stored devices
/// follow in store order.
pub async fn reconcile<S>(snapshots: Vec<DeviceSnapshot>, store: &S) -> Result<Vec<DeviceEntry>>
where
    S: DeviceStore + ?Sized,
{
    let saved = store.find_all().await?;
    let mut entries = Vec::with_capacity(snapshots.len().max(saved.len()));

    for snapshot in snapshots {
        let record = match saved.iter().find(|d| d.serial_number == snapshot.serial_number) {
            Some(record) => record.clone(),
            None => {
                let record = store.add_device(&snapshot.serial_number).await?;
                tracing::info!(
                    serial_number = %record.serial_number,
                    id = record.id,
                    "stored new pod"
                );
                record
            }
        };
        entries.push(DeviceEntry {
            id: record.id,
            serial_number: snapshot.serial_number,
            name: record.name,
            endpoint: Some(snapshot.endpoint),
            firmware_version: Some(snapshot.firmware_version),
            led_on: snapshot.led_on,
        });
    }

    for record in saved {
        if entries.iter().any(|e| e.serial_number == record.serial_number) {
            continue;
        }
        entries.push(DeviceEntry {
            id: record.id,
            serial_number: record.serial_number,
            name: record.name,
            endpoint: None,
            firmware_version: None,
            led_on: false,
        });
    }

    Ok(entries)
}

/// Runs refresh and reconcile on the scheduler every `interval` and pushes
/// each listing to the returned receiver.
///
/// A failed cycle is logged and skipped. Cancel the handle to stop.
///
/// # Errors
///
/// [`Error::Configuration`] if `interval` is too short.
pub fn spawn_device_task<C, S>(
    manager: Arc<DeviceManager<C>>,
    store: Arc<S>,
    interval: Duration,
) -> Result<(IntervalHandle, mpsc::Receiver<Vec<DeviceEntry>>)>
where
    C: Connector,
    S: DeviceStore + 'static,
{
    let (tx, rx) = mpsc::channel(LISTING_CAPACITY);

    let handle = set_async_interval(interval, move || {
        let manager = Arc::clone(&manager);
        let store = Arc::clone(&store);
        let tx = tx.clone();
        async move {
            let snapshots = manager.refresh().await?;
            let listing = reconcile(snapshots, store.as_ref()).await?;
            tracing::debug!(devices = listing.len(), "device listing updated");
            tx.send(listing).await.map_err(|_| Error::ChannelClosed)
        }
    })?;

    Ok((handle, rx))
}
