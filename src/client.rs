//! Protocol client for a single pod.
//!
//! [`PodClient`] owns one transport to one pod and drives the three exchange
//! patterns the firmware uses:
//!
//! - **simple**: write a command, read exactly one frame (`!ACK` / `!NACK`).
//! - **data**: write a command, read one `!ACK` frame carrying a value in its
//!   fourth field.
//! - **long**: write a command, then collect frames tagged with an expected
//!   tag until `!STATUS,IDLE` arrives.
//!
//! Every exchange has its own timeout. A timed-out exchange always closes the
//! connection so the endpoint is released for the next discovery cycle.

use std::fmt::Display;
use std::time::Duration;

use tokio::time::error::Elapsed;

use crate::error::{Error, Result};
use crate::protocol::{ACK, Command, Frame, NACK, ParamRef, RP_TAG};
use crate::transport::serial::SerialConnector;
use crate::transport::{Connector, Endpoint, SerialTransport, Transport};

/// Default timeout of a simple exchange.
pub const SIMPLE_TIMEOUT: Duration = Duration::from_secs(5);

/// Default timeout of a data exchange.
pub const DATA_TIMEOUT: Duration = Duration::from_secs(10);

/// Default timeout of a long exchange, measured from the command write.
pub const LONG_TIMEOUT: Duration = Duration::from_secs(15);

/// Field of an `!ACK` frame that carries the value of a data exchange.
pub const DATA_FIELD: usize = 3;

/// Per-pattern exchange timeouts.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct Timeouts {
    /// Simple (acknowledge only) exchanges.
    pub simple: Duration,
    /// Data (get/set) exchanges.
    pub data: Duration,
    /// Long (measurement) exchanges.
    pub long: Duration,
}

impl Default for Timeouts {
    fn default() -> Self {
        Self {
            simple: SIMPLE_TIMEOUT,
            data: DATA_TIMEOUT,
            long: LONG_TIMEOUT,
        }
    }
}

/// Client for communicating with one pod.
///
/// All traffic to a pod must be funneled through a single client at a time;
/// the registry guarantees this with a per-device queue.
pub struct PodClient<T> {
    endpoint: Endpoint,
    transport: T,
    timeouts: Timeouts,
}

impl PodClient<SerialTransport> {
    /// Creates a new client for a serial port.
    ///
    /// # Arguments
    ///
    /// * `port` - Serial port path (e.g., "/dev/ttyACM0")
    ///
    /// # Returns
    ///
    /// A new client (not yet connected).
    #[must_use]
    pub fn serial(port: impl Into<String>) -> Self {
        let endpoint = Endpoint::new(port);
        let transport = SerialConnector::default().transport(&endpoint);
        Self::new(endpoint, transport)
    }
}

impl<T: Transport> PodClient<T> {
    /// Creates a new client with the given transport.
    #[must_use]
    pub fn new(endpoint: Endpoint, transport: T) -> Self {
        Self {
            endpoint,
            transport,
            timeouts: Timeouts::default(),
        }
    }

    /// Sets the exchange timeouts.
    #[must_use]
    pub const fn with_timeouts(mut self, timeouts: Timeouts) -> Self {
        self.timeouts = timeouts;
        self
    }

    /// The endpoint this client talks to.
    #[must_use]
    pub const fn endpoint(&self) -> &Endpoint {
        &self.endpoint
    }

    /// Returns true if the connection is open.
    #[must_use]
    pub fn is_open(&self) -> bool {
        self.transport.is_open()
    }

    /// Opens the connection. Exchanges open it on demand as well.
    pub async fn open(&mut self) -> Result<()> {
        if !self.transport.is_open() {
            tracing::debug!(endpoint = %self.endpoint, "opening connection");
        }
        self.transport.open().await
    }

    /// Closes the connection.
    pub async fn close(&mut self) -> Result<()> {
        if self.transport.is_open() {
            tracing::debug!(endpoint = %self.endpoint, "closing connection");
        }
        self.transport.close().await
    }

    /// Closes the connection, logging instead of returning a failure.
    pub(crate) async fn close_quietly(&mut self) {
        if let Err(e) = self.close().await {
            tracing::warn!(endpoint = %self.endpoint, "failed to close connection: {}", e);
        }
    }

    // ==================== Exchange Patterns ====================

    /// Sends a command and waits for a single acknowledging frame.
    ///
    /// A `!NACK` or a bad checksum fails the exchange and closes the
    /// connection regardless of `close_after`.
    pub async fn simple_call(&mut self, command: &Command, close_after: bool) -> Result<Frame> {
        let timeout = self.timeouts.simple;
        let outcome = tokio::time::timeout(timeout, self.simple_exchange(command)).await;
        self.finish(command, timeout, outcome, close_after, true)
            .await
    }

    /// Sends a command and returns the value field of its `!ACK` frame.
    ///
    /// With `close_after == false` the connection stays open on success and
    /// on protocol failure so the caller can chain further calls; it is still
    /// closed on timeout.
    pub async fn data_call(&mut self, command: &Command, close_after: bool) -> Result<String> {
        let timeout = self.timeouts.data;
        let outcome = tokio::time::timeout(timeout, self.data_exchange(command)).await;
        self.finish(command, timeout, outcome, close_after, close_after)
            .await
    }

    /// [`PodClient::data_call`] that leaves the connection open.
    pub async fn data_call_no_close(&mut self, command: &Command) -> Result<String> {
        self.data_call(command, false).await
    }

    /// Runs a multi-phase exchange, collecting the payload of every frame
    /// tagged `expected` until the pod reports idle.
    ///
    /// The connection is always closed afterwards.
    pub async fn long_call(&mut self, command: &Command, expected: &str) -> Result<Vec<String>> {
        let timeout = self.timeouts.long;
        let outcome = tokio::time::timeout(timeout, self.long_exchange(command, expected)).await;
        self.finish(command, timeout, outcome, true, true).await
    }

    async fn write(&mut self, command: &Command) -> Result<()> {
        self.open().await?;
        tracing::debug!(endpoint = %self.endpoint, %command, "sending command");
        self.transport.send(command.encode()).await
    }

    async fn next_frame(&mut self) -> Result<Frame> {
        let line = self.transport.recv().await?;
        let frame = Frame::parse(&line)?;
        tracing::trace!(
            endpoint = %self.endpoint,
            payload = frame.payload(),
            checksum = frame.checksum(),
            "frame"
        );
        Ok(frame)
    }

    async fn simple_exchange(&mut self, command: &Command) -> Result<Frame> {
        self.write(command).await?;
        let frame = self.next_frame().await?;
        frame.verify()?;
        if frame.tag() == NACK {
            return Err(rejected(command));
        }
        Ok(frame)
    }

    async fn data_exchange(&mut self, command: &Command) -> Result<String> {
        self.write(command).await?;
        let frame = self.next_frame().await?;
        frame.verify()?;
        if frame.tag() != ACK {
            return Err(rejected(command));
        }
        Ok(frame.require_field(DATA_FIELD)?.to_owned())
    }

    async fn long_exchange(&mut self, command: &Command, expected: &str) -> Result<Vec<String>> {
        self.write(command).await?;

        let mut collected = Vec::new();
        loop {
            let frame = self.next_frame().await?;
            frame.verify()?;

            if frame.is_idle() {
                tracing::debug!(
                    endpoint = %self.endpoint,
                    %command,
                    frames = collected.len(),
                    "long exchange complete"
                );
                return Ok(collected);
            }

            match frame.tag() {
                ACK => {}
                NACK => return Err(rejected(command)),
                tag if tag == expected => collected.push(frame.into_payload()),
                tag => tracing::debug!(endpoint = %self.endpoint, tag, "ignoring frame"),
            }
        }
    }

    /// Applies the close policy to the outcome of an exchange.
    async fn finish<R>(
        &mut self,
        command: &Command,
        timeout: Duration,
        outcome: std::result::Result<Result<R>, Elapsed>,
        close_on_success: bool,
        close_on_failure: bool,
    ) -> Result<R> {
        match outcome {
            Ok(Ok(value)) => {
                if close_on_success {
                    self.close().await?;
                }
                Ok(value)
            }
            Ok(Err(e)) => {
                tracing::debug!(endpoint = %self.endpoint, %command, "exchange failed: {}", e);
                if close_on_failure {
                    self.close_quietly().await;
                }
                Err(e)
            }
            Err(_) => {
                tracing::warn!(endpoint = %self.endpoint, %command, "pod timed out");
                self.close_quietly().await;
                Err(Error::Timeout {
                    command: command.to_string(),
                    timeout_ms: u64::try_from(timeout.as_millis()).unwrap_or(u64::MAX),
                })
            }
        }
    }

    // ==================== Pod Commands ====================

    /// Turns the indicator LED on.
    pub async fn led_on(&mut self, close_after: bool) -> Result<()> {
        self.simple_call(&Command::LedOn, close_after).await?;
        Ok(())
    }

    /// Turns the indicator LED off.
    pub async fn led_off(&mut self, close_after: bool) -> Result<()> {
        self.simple_call(&Command::LedOff, close_after).await?;
        Ok(())
    }

    /// Commits pending parameter changes to non-volatile memory.
    pub async fn save_params(&mut self) -> Result<()> {
        self.simple_call(&Command::SaveParams, true).await?;
        Ok(())
    }

    /// Reads a parameter.
    ///
    /// Unknown parameters fail before anything is written.
    pub async fn get_param(
        &mut self,
        param: impl Into<ParamRef>,
        close_after: bool,
    ) -> Result<String> {
        let param = param.into().resolve()?;
        self.data_call(&Command::Get(param), close_after).await
    }

    /// Sets a parameter. Call [`PodClient::save_params`] to make it permanent.
    ///
    /// The parameter name and value are validated before anything is
    /// written.
    pub async fn set_param(
        &mut self,
        param: impl Into<ParamRef>,
        value: impl Display,
        close_after: bool,
    ) -> Result<String> {
        let param = param.into().resolve()?;
        let value = value.to_string();
        param.validate(&value)?;
        self.data_call(&Command::Set(param, value), close_after)
            .await
    }

    /// Reads the pod serial number.
    pub async fn get_serial_number(&mut self, close_after: bool) -> Result<String> {
        self.data_call(&Command::GetSerialNumber, close_after).await
    }

    /// Writes the pod serial number.
    pub async fn set_serial_number(&mut self, serial_number: &str) -> Result<String> {
        crate::protocol::Param::SerNumber.validate(serial_number)?;
        self.data_call(&Command::SetSerialNumber(serial_number.to_owned()), true)
            .await
    }

    /// Reads the installed firmware version.
    pub async fn get_firmware_version(&mut self, close_after: bool) -> Result<String> {
        self.data_call(&Command::FirmwareVersion, close_after).await
    }

    /// Runs the primary (RP) measurement, with or without blank correction.
    pub async fn run_rp(&mut self, use_blanks: bool) -> Result<Vec<String>> {
        self.long_call(&Command::RunRp { use_blanks }, RP_TAG).await
    }

    /// Runs a pre-formatted measurement command (`RUN,<args>`) and collects
    /// the frames tagged `expected`.
    pub async fn run_command(&mut self, args: &str, expected: &str) -> Result<Vec<String>> {
        self.long_call(&Command::Run(args.to_owned()), expected).await
    }
}

fn rejected(command: &Command) -> Error {
    Error::Rejected {
        command: command.to_string(),
    }
}
