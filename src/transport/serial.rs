//! Serial/USB transport implementation.
//!
//! This module provides serial port communication for pods connected via
//! USB CDC, plus enumeration of candidate ports.

use std::future::Future;
use std::io;
use std::pin::Pin;
use std::time::Duration;

use bytes::Bytes;
use tokio::io::{AsyncReadExt, AsyncWriteExt};
use tokio_serial::{SerialPortBuilderExt, SerialPortType, SerialStream};

use crate::error::{Error, Result};
use crate::protocol::FrameDecoder;
use crate::transport::{Connector, Endpoint, PortInfo, Transport};

/// Default baud rate for pods.
pub const DEFAULT_BAUD_RATE: u32 = 115_200;

/// Default delay between opening the port and the first write.
pub const DEFAULT_CONNECTION_DELAY: Duration = Duration::ZERO;

/// Configuration for serial transport.
#[derive(Debug, Clone)]
pub struct SerialConfig {
    /// Serial port path (e.g., "/dev/ttyACM0" or "COM3").
    pub port: String,
    /// Baud rate.
    pub baud_rate: u32,
    /// Delay after opening before sending commands.
    pub connection_delay: Duration,
}

impl SerialConfig {
    /// Creates a new serial configuration with default settings.
    #[must_use]
    pub fn new(port: impl Into<String>) -> Self {
        Self {
            port: port.into(),
            baud_rate: DEFAULT_BAUD_RATE,
            connection_delay: DEFAULT_CONNECTION_DELAY,
        }
    }

    /// Sets the baud rate.
    #[must_use]
    pub const fn baud_rate(mut self, rate: u32) -> Self {
        self.baud_rate = rate;
        self
    }

    /// Sets the connection delay.
    #[must_use]
    pub const fn connection_delay(mut self, delay: Duration) -> Self {
        self.connection_delay = delay;
        self
    }
}

/// Serial transport for one pod.
///
/// The port is only held between [`Transport::open`] and
/// [`Transport::close`] (or a read/write fault), so the OS can re-enumerate
/// it between exchanges.
pub struct SerialTransport {
    config: SerialConfig,
    stream: Option<SerialStream>,
    decoder: FrameDecoder,
}

impl SerialTransport {
    /// Creates a new serial transport with the given configuration.
    #[must_use]
    pub fn new(config: SerialConfig) -> Self {
        Self {
            config,
            stream: None,
            decoder: FrameDecoder::new(),
        }
    }

    /// Creates a new serial transport for the given port with default settings.
    #[must_use]
    pub fn with_port(port: impl Into<String>) -> Self {
        Self::new(SerialConfig::new(port))
    }

    /// Drops the port after a fault so the next exchange reopens it.
    fn fault(&mut self, e: io::Error) -> Error {
        tracing::warn!("serial fault on {}: {}", self.config.port, e);
        self.stream = None;
        self.decoder.clear();
        Error::Io(e)
    }
}

impl Transport for SerialTransport {
    fn open(&mut self) -> Pin<Box<dyn Future<Output = Result<()>> + Send + '_>> {
        Box::pin(async move {
            if self.stream.is_some() {
                return Ok(());
            }

            tracing::debug!("opening serial port: {}", self.config.port);

            let stream = tokio_serial::new(&self.config.port, self.config.baud_rate)
                .open_native_async()
                .map_err(Error::Serial)?;

            if !self.config.connection_delay.is_zero() {
                tokio::time::sleep(self.config.connection_delay).await;
            }

            self.stream = Some(stream);
            self.decoder.clear();
            Ok(())
        })
    }

    fn close(&mut self) -> Pin<Box<dyn Future<Output = Result<()>> + Send + '_>> {
        Box::pin(async move {
            if let Some(mut stream) = self.stream.take() {
                tracing::debug!("closing serial port: {}", self.config.port);
                if let Err(e) = stream.flush().await {
                    tracing::debug!("flush before close failed: {}", e);
                }
            }
            self.decoder.clear();
            Ok(())
        })
    }

    fn send(&mut self, data: Bytes) -> Pin<Box<dyn Future<Output = Result<()>> + Send + '_>> {
        Box::pin(async move {
            let stream = self.stream.as_mut().ok_or(Error::NotConnected)?;
            tracing::trace!("sending {} bytes: {:?}", data.len(), data);

            let mut written = stream.write_all(&data).await;
            if written.is_ok() {
                written = stream.flush().await;
            }
            written.map_err(|e| self.fault(e))
        })
    }

    fn recv(&mut self) -> Pin<Box<dyn Future<Output = Result<Bytes>> + Send + '_>> {
        Box::pin(async move {
            let mut buf = [0u8; 256];
            loop {
                if let Some(line) = self.decoder.decode()? {
                    tracing::trace!("received line: {:?}", line);
                    return Ok(line);
                }

                let stream = self.stream.as_mut().ok_or(Error::NotConnected)?;
                let read = stream.read(&mut buf).await;
                let n = match read {
                    Ok(0) => {
                        return Err(self.fault(io::Error::new(
                            io::ErrorKind::ConnectionReset,
                            "serial port closed",
                        )));
                    }
                    Ok(n) => n,
                    Err(e) => return Err(self.fault(e)),
                };

                tracing::trace!("received {} bytes", n);
                self.decoder.feed(&buf[..n]);
            }
        })
    }

    fn is_open(&self) -> bool {
        self.stream.is_some()
    }
}

/// Connector that enumerates host serial ports.
#[derive(Debug, Clone)]
pub struct SerialConnector {
    baud_rate: u32,
    connection_delay: Duration,
}

impl SerialConnector {
    /// Creates a connector opening ports at `baud_rate`.
    #[must_use]
    pub const fn new(baud_rate: u32) -> Self {
        Self {
            baud_rate,
            connection_delay: DEFAULT_CONNECTION_DELAY,
        }
    }

    /// Sets the connection delay applied to every transport.
    #[must_use]
    pub const fn connection_delay(mut self, delay: Duration) -> Self {
        self.connection_delay = delay;
        self
    }
}

impl Default for SerialConnector {
    fn default() -> Self {
        Self::new(DEFAULT_BAUD_RATE)
    }
}

impl Connector for SerialConnector {
    type Transport = SerialTransport;

    fn list_ports(&self) -> Result<Vec<PortInfo>> {
        list_ports()
    }

    fn transport(&self, endpoint: &Endpoint) -> SerialTransport {
        SerialTransport::new(
            SerialConfig::new(endpoint.as_str())
                .baud_rate(self.baud_rate)
                .connection_delay(self.connection_delay),
        )
    }
}

/// Lists available serial ports with their USB identifiers.
///
/// # Errors
///
/// Returns an error if the port list cannot be retrieved.
pub fn list_ports() -> Result<Vec<PortInfo>> {
    let ports = tokio_serial::available_ports().map_err(Error::Serial)?;
    Ok(ports
        .into_iter()
        .map(|p| {
            let (vendor_id, product_id) = match p.port_type {
                SerialPortType::UsbPort(usb) => (Some(usb.vid), Some(usb.pid)),
                _ => (None, None),
            };
            PortInfo {
                endpoint: Endpoint::new(p.port_name),
                vendor_id,
                product_id,
            }
        })
        .collect())
}
