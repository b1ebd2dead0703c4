//! Simulated pods for unit tests.
//!
//! A [`SimPod`] answers commands the way pod firmware does, with per-command
//! overrides for scripted, silent or corrupted replies. [`SimConnector`]
//! exposes a set of simulated ports to the registry.

use std::collections::{HashMap, VecDeque};
use std::future::Future;
use std::io;
use std::pin::Pin;
use std::sync::{Arc, Mutex, MutexGuard};

use bytes::Bytes;
use tokio::time::Instant;

use crate::error::{Error, Result};
use crate::protocol::encode_frame;
use crate::transport::{Connector, Endpoint, PortInfo, Transport};

pub(crate) const POD_VID: u16 = 0x0483;
pub(crate) const POD_PID: u16 = 0x5740;

/// Scripted reply for one command.
#[derive(Debug, Clone)]
pub(crate) enum Reply {
    /// Raw lines, sent as-is.
    Lines(Vec<Bytes>),
    /// Never answer.
    Silent,
}

impl Reply {
    /// Well-formed frames for each payload.
    pub(crate) fn frames(payloads: &[&str]) -> Self {
        Self::Lines(payloads.iter().map(|p| encode_frame(p)).collect())
    }
}

#[derive(Debug, Default)]
struct SimState {
    serial: String,
    firmware: String,
    params: HashMap<String, String>,
    saved: HashMap<String, String>,
    overrides: HashMap<String, Reply>,
    claimed: bool,
    opens: usize,
    closes: usize,
    writes: Vec<(Instant, String)>,
}

/// Handle to a simulated pod; clones share state.
#[derive(Debug, Clone)]
pub(crate) struct SimPod {
    state: Arc<Mutex<SimState>>,
}

impl SimPod {
    pub(crate) fn new(serial: &str, firmware: &str) -> Self {
        let state = SimState {
            serial: serial.to_owned(),
            firmware: firmware.to_owned(),
            ..SimState::default()
        };
        Self {
            state: Arc::new(Mutex::new(state)),
        }
    }

    fn lock(&self) -> MutexGuard<'_, SimState> {
        self.state.lock().unwrap_or_else(std::sync::PoisonError::into_inner)
    }

    /// Overrides the reply to `command` (text without terminator).
    pub(crate) fn script(&self, command: &str, reply: Reply) -> &Self {
        self.lock().overrides.insert(command.to_owned(), reply);
        self
    }

    /// Restores the default reply to `command`.
    pub(crate) fn unscript(&self, command: &str) -> &Self {
        self.lock().overrides.remove(command);
        self
    }

    pub(crate) fn transport(&self) -> SimTransport {
        SimTransport {
            pod: Some(self.clone()),
            open: false,
            inbox: VecDeque::new(),
        }
    }

    pub(crate) fn is_claimed(&self) -> bool {
        self.lock().claimed
    }

    pub(crate) fn opens(&self) -> usize {
        self.lock().opens
    }

    pub(crate) fn closes(&self) -> usize {
        self.lock().closes
    }

    /// Commands received so far, in order.
    pub(crate) fn writes(&self) -> Vec<String> {
        self.lock().writes.iter().map(|(_, c)| c.clone()).collect()
    }

    pub(crate) fn timed_writes(&self) -> Vec<(Instant, String)> {
        self.lock().writes.clone()
    }

    pub(crate) fn param(&self, index: &str) -> Option<String> {
        self.lock().params.get(index).cloned()
    }

    pub(crate) fn saved_param(&self, index: &str) -> Option<String> {
        self.lock().saved.get(index).cloned()
    }

    /// Firmware behaviour for `command`.
    fn respond(&self, command: &str) -> Reply {
        let mut state = self.lock();
        state.writes.push((Instant::now(), command.to_owned()));
        if let Some(reply) = state.overrides.get(command) {
            return reply.clone();
        }

        let fields: Vec<&str> = command.split(',').collect();
        match fields.as_slice() {
            ["CAL", "1", "1"] => {
                state.saved = state.params.clone();
                Reply::frames(&[&format!("!ACK,{command}")])
            }
            ["CAL", ..] => Reply::frames(&[&format!("!ACK,{command}")]),
            ["GET", "SER_NUMBER"] => {
                Reply::frames(&[&format!("!ACK,GET,SER_NUMBER,{}", state.serial)])
            }
            ["SET", "SER_NUMBER", value] => {
                state.serial = (*value).to_owned();
                Reply::frames(&[&format!("!ACK,{command}")])
            }
            ["GET", index] => {
                let value = state.params.get(*index).cloned().unwrap_or_else(|| "0".into());
                Reply::frames(&[&format!("!ACK,GET,{index},{value}")])
            }
            ["SET", index, value] => {
                state.params.insert((*index).to_owned(), (*value).to_owned());
                Reply::frames(&[&format!("!ACK,{command}")])
            }
            ["FWVERSION"] => Reply::frames(&[&format!("!ACK,FWVERSION,0,{}", state.firmware)]),
            ["RUN_RP", blanks] => Reply::frames(&[
                "!ACK",
                &format!("!RP,{},7.012,1020,880,{blanks}", state.serial),
                "!STATUS,IDLE",
            ]),
            ["RUN", ..] => Reply::frames(&[
                "!ACK",
                &format!("!My_CMD,{},6.98", state.serial),
                "!STATUS,IDLE",
            ]),
            _ => Reply::frames(&["!NACK"]),
        }
    }
}

/// Transport bound to a [`SimPod`]. Only one transport may hold a pod open.
pub(crate) struct SimTransport {
    pod: Option<SimPod>,
    open: bool,
    inbox: VecDeque<Bytes>,
}

impl SimTransport {
    /// A transport whose port cannot be opened.
    pub(crate) fn unreachable() -> Self {
        Self {
            pod: None,
            open: false,
            inbox: VecDeque::new(),
        }
    }

    fn release(&mut self) {
        if self.open {
            self.open = false;
            self.inbox.clear();
            if let Some(pod) = &self.pod {
                let mut state = pod.lock();
                state.claimed = false;
                state.closes += 1;
            }
        }
    }
}

impl Transport for SimTransport {
    fn open(&mut self) -> Pin<Box<dyn Future<Output = Result<()>> + Send + '_>> {
        Box::pin(async move {
            if self.open {
                return Ok(());
            }
            let pod = self
                .pod
                .as_ref()
                .ok_or_else(|| Error::Io(io::Error::new(io::ErrorKind::NotFound, "no such port")))?;
            let mut state = pod.lock();
            if state.claimed {
                return Err(Error::Io(io::Error::other("port busy")));
            }
            state.claimed = true;
            state.opens += 1;
            drop(state);
            self.open = true;
            Ok(())
        })
    }

    fn close(&mut self) -> Pin<Box<dyn Future<Output = Result<()>> + Send + '_>> {
        Box::pin(async move {
            self.release();
            Ok(())
        })
    }

    fn send(&mut self, data: Bytes) -> Pin<Box<dyn Future<Output = Result<()>> + Send + '_>> {
        Box::pin(async move {
            if !self.open {
                return Err(Error::NotConnected);
            }
            let Some(pod) = &self.pod else {
                return Err(Error::NotConnected);
            };
            let text = String::from_utf8_lossy(&data);
            let command = text.trim_end_matches(['\r', '\n']);
            if let Reply::Lines(lines) = pod.respond(command) {
                self.inbox.extend(lines);
            }
            Ok(())
        })
    }

    fn recv(&mut self) -> Pin<Box<dyn Future<Output = Result<Bytes>> + Send + '_>> {
        Box::pin(async move {
            if !self.open {
                return Err(Error::NotConnected);
            }
            match self.inbox.pop_front() {
                Some(line) => {
                    let text = String::from_utf8_lossy(&line);
                    Ok(Bytes::from(text.trim_end().to_owned()))
                }
                None => std::future::pending().await,
            }
        })
    }

    fn is_open(&self) -> bool {
        self.open
    }
}

impl Drop for SimTransport {
    fn drop(&mut self) {
        self.release();
    }
}

#[derive(Debug, Default)]
struct ConnectorState {
    ports: Vec<(PortInfo, Option<SimPod>)>,
    list_error: bool,
}

/// Connector over a mutable set of simulated ports.
#[derive(Debug, Clone, Default)]
pub(crate) struct SimConnector {
    state: Arc<Mutex<ConnectorState>>,
}

impl SimConnector {
    fn lock(&self) -> MutexGuard<'_, ConnectorState> {
        self.state.lock().unwrap_or_else(std::sync::PoisonError::into_inner)
    }

    /// Attaches a pod at `path` with the pod USB signature.
    pub(crate) fn attach(&self, path: &str, pod: &SimPod) -> &Self {
        let info = PortInfo {
            endpoint: Endpoint::new(path),
            vendor_id: Some(POD_VID),
            product_id: Some(POD_PID),
        };
        self.lock().ports.push((info, Some(pod.clone())));
        self
    }

    /// Attaches a port with the pod signature that never opens.
    pub(crate) fn attach_dead(&self, path: &str) -> &Self {
        let info = PortInfo {
            endpoint: Endpoint::new(path),
            vendor_id: Some(POD_VID),
            product_id: Some(POD_PID),
        };
        self.lock().ports.push((info, None));
        self
    }

    /// Attaches some other USB serial device.
    pub(crate) fn attach_foreign(&self, path: &str) -> &Self {
        let info = PortInfo {
            endpoint: Endpoint::new(path),
            vendor_id: Some(0x1a86),
            product_id: Some(0x7523),
        };
        self.lock().ports.push((info, None));
        self
    }

    pub(crate) fn detach(&self, path: &str) {
        self.lock().ports.retain(|(info, _)| info.endpoint.as_str() != path);
    }

    pub(crate) fn fail_listing(&self, fail: bool) {
        self.lock().list_error = fail;
    }
}

impl Connector for SimConnector {
    type Transport = SimTransport;

    fn list_ports(&self) -> Result<Vec<PortInfo>> {
        let state = self.lock();
        if state.list_error {
            return Err(Error::Io(io::Error::other("enumeration failed")));
        }
        Ok(state.ports.iter().map(|(info, _)| info.clone()).collect())
    }

    fn transport(&self, endpoint: &Endpoint) -> SimTransport {
        self.lock()
            .ports
            .iter()
            .find(|(info, _)| &info.endpoint == endpoint)
            .and_then(|(_, pod)| pod.as_ref())
            .map_or_else(SimTransport::unreachable, SimPod::transport)
    }
}
