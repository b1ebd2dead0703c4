//! Transport layer for pod communication.
//!
//! [`Transport`] is one connection to one pod; [`Connector`] enumerates
//! candidate endpoints and hands out transports for them. The serial
//! implementation lives in [`serial`].

pub mod serial;

use std::fmt;
use std::future::Future;
use std::pin::Pin;

use bytes::Bytes;

use crate::error::Result;

/// OS-level path through which a pod is reachable (`COM4`, `/dev/ttyACM0`).
#[derive(Debug, Clone, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub struct Endpoint(String);

impl Endpoint {
    /// Creates an endpoint from a port path.
    #[must_use]
    pub fn new(path: impl Into<String>) -> Self {
        Self(path.into())
    }

    /// The port path.
    #[must_use]
    pub fn as_str(&self) -> &str {
        &self.0
    }
}

impl fmt::Display for Endpoint {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.0)
    }
}

impl From<&str> for Endpoint {
    fn from(value: &str) -> Self {
        Self::new(value)
    }
}

impl From<String> for Endpoint {
    fn from(value: String) -> Self {
        Self(value)
    }
}

/// An enumerated port with its USB identifiers, if any.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct PortInfo {
    /// Port path.
    pub endpoint: Endpoint,
    /// USB vendor id.
    pub vendor_id: Option<u16>,
    /// USB product id.
    pub product_id: Option<u16>,
}

/// USB vendor/product pair identifying pod hardware.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct UsbSignature {
    /// USB vendor id.
    pub vendor_id: u16,
    /// USB product id.
    pub product_id: u16,
}

impl UsbSignature {
    /// Returns true if the port reports exactly this vendor/product pair.
    #[must_use]
    pub fn matches(&self, port: &PortInfo) -> bool {
        port.vendor_id == Some(self.vendor_id) && port.product_id == Some(self.product_id)
    }
}

/// Trait for transport implementations.
pub trait Transport: Send {
    /// Opens the connection. Opening an open transport is a no-op.
    fn open(&mut self) -> Pin<Box<dyn Future<Output = Result<()>> + Send + '_>>;

    /// Closes the connection, releasing the endpoint.
    fn close(&mut self) -> Pin<Box<dyn Future<Output = Result<()>> + Send + '_>>;

    /// Writes raw bytes to the pod.
    fn send(&mut self, data: Bytes) -> Pin<Box<dyn Future<Output = Result<()>> + Send + '_>>;

    /// Waits for the next response line (terminator stripped).
    ///
    /// Must be cancel safe: dropping the future loses no buffered data.
    fn recv(&mut self) -> Pin<Box<dyn Future<Output = Result<Bytes>> + Send + '_>>;

    /// Returns true if open.
    fn is_open(&self) -> bool;
}

/// Enumerates endpoints and creates transports for them.
pub trait Connector: Send + Sync + 'static {
    /// Transport type produced for an endpoint.
    type Transport: Transport + 'static;

    /// Lists all ports on the host.
    fn list_ports(&self) -> Result<Vec<PortInfo>>;

    /// Creates a (closed) transport for `endpoint`.
    fn transport(&self, endpoint: &Endpoint) -> Self::Transport;
}

pub use serial::{SerialConnector, SerialTransport};
