//! # podlink
//!
//! Async host library for serial-attached measurement pods.
//!
//! Pods speak a line-based ASCII protocol: commands go out as
//! `CMD,arg,...\r\n`, responses come back as `!TAG,field,...;CRC\r\n` with a
//! CRC-16 over the payload. This crate frames and verifies that traffic,
//! serializes access to each pod and keeps a live device list.
//!
//! ## Features
//!
//! - Async/await based API using Tokio
//! - Three exchange patterns with per-pattern timeouts
//! - One FIFO queue per pod, parallel across pods
//! - Drift-free recurring scheduler with cooperative cancellation
//! - Notifications for pods appearing mid-session
//!
//! ## Quick Start
//!
//! ```no_run
//! use podlink::{DeviceManager, ManagerConfig, SerialConnector};
//!
//! #[tokio::main]
//! async fn main() -> Result<(), podlink::Error> {
//!     let manager = DeviceManager::new(SerialConnector::default(), ManagerConfig::default());
//!
//!     for pod in manager.refresh().await? {
//!         println!("{} on {} (fw {})", pod.serial_number, pod.endpoint, pod.firmware_version);
//!         let reading = manager.read_rp(&pod.endpoint, true).await?;
//!         println!("  {reading}");
//!     }
//!     Ok(())
//! }
//! ```
//!
//! ## Architecture
//!
//! - [`protocol`] - Checksums, response frames, commands and the parameter table
//! - [`transport`] - Transport/connector traits and the serial implementation
//! - [`client`] - [`PodClient`], one connection to one pod
//! - [`queue`] - [`DeviceQueue`], per-pod serialization
//! - [`manager`] - [`DeviceManager`], discovery and pod verbs
//! - [`scheduler`] - [`set_async_interval`]
//! - [`tasks`] - Device-list reconciliation and push
//! - [`event`] - Registry notifications
//! - [`config`] - [`ManagerConfig`]

pub mod client;
pub mod config;
pub mod error;
pub mod event;
pub mod manager;
pub mod protocol;
pub mod queue;
pub mod scheduler;
pub mod tasks;
pub mod transport;

#[cfg(test)]
mod testing;

// Re-exports for convenience
pub use client::{PodClient, Timeouts};
pub use config::ManagerConfig;
pub use error::{Error, FrameError, Result, ValidationError};
pub use event::{EventDispatcher, Notification, Subscription};
pub use manager::{DeviceManager, DeviceSnapshot};
pub use protocol::{Command, Frame, Param, ParamRef};
pub use queue::DeviceQueue;
pub use scheduler::{IntervalHandle, set_async_interval};
pub use tasks::{DeviceEntry, DeviceStore, MemoryStore, StoredDevice, reconcile, spawn_device_task};
pub use transport::{Connector, Endpoint, SerialConnector, SerialTransport, serial::list_ports};
