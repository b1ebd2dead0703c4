//! Device registry.
//!
//! [`DeviceManager`] discovers pods on the host, keeps one [`DeviceQueue`]
//! per endpoint so traffic to a pod is never interleaved, and exposes the
//! pod verbs (read, parameters, locate) on top of [`PodClient`].
//!
//! A process manages one set of serial ports, so the registry is meant to be
//! constructed once: [`init`] builds the process-wide serial instance and
//! [`instance`] hands it out. It lives until the process exits.

use std::collections::HashMap;
use std::future::Future;
use std::sync::{Arc, OnceLock};

use futures::future::{BoxFuture, join_all};
use tokio::sync::RwLock;

use crate::client::PodClient;
use crate::config::ManagerConfig;
use crate::error::{Error, Result};
use crate::event::{EventDispatcher, Notification, Subscription};
use crate::protocol::{Param, ParamRef};
use crate::queue::DeviceQueue;
use crate::transport::{Connector, Endpoint, SerialConnector, Transport};

/// Live view of one reachable pod, rebuilt on every discovery cycle.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct DeviceSnapshot {
    /// Serial number (stable identity).
    pub serial_number: String,
    /// Endpoint the pod was reached on.
    pub endpoint: Endpoint,
    /// Installed firmware version.
    pub firmware_version: String,
    /// Whether the pod answered this cycle.
    pub connected: bool,
    /// Indicator LED state as last set by the host.
    pub led_on: bool,
}

/// Registry of pods reachable through a [`Connector`].
pub struct DeviceManager<C: Connector> {
    config: ManagerConfig,
    connector: C,
    queues: RwLock<HashMap<Endpoint, DeviceQueue>>,
    known: RwLock<HashMap<String, Endpoint>>,
    active_session: RwLock<Option<String>>,
    dispatcher: EventDispatcher,
}

impl<C: Connector> DeviceManager<C> {
    /// Creates a registry. No queue exists until the first enumeration.
    #[must_use]
    pub fn new(connector: C, config: ManagerConfig) -> Self {
        Self {
            config,
            connector,
            queues: RwLock::new(HashMap::new()),
            known: RwLock::new(HashMap::new()),
            active_session: RwLock::new(None),
            dispatcher: EventDispatcher::default(),
        }
    }

    /// Registry configuration.
    #[must_use]
    pub const fn config(&self) -> &ManagerConfig {
        &self.config
    }

    /// Subscribes to registry notifications.
    #[must_use]
    pub fn subscribe(&self) -> Subscription {
        self.dispatcher.subscribe()
    }

    /// Sets or clears the measurement session running elsewhere in the
    /// application. While set, newly seen pods are not flashed; a
    /// [`Notification::CheckMissedReads`] is published instead.
    pub async fn set_active_session(&self, session: Option<String>) {
        *self.active_session.write().await = session;
    }

    /// Currently active measurement session.
    pub async fn active_session(&self) -> Option<String> {
        self.active_session.read().await.clone()
    }

    /// Endpoint a serial number was last reached on.
    pub async fn known_endpoint(&self, serial_number: &str) -> Option<Endpoint> {
        self.known.read().await.get(serial_number).cloned()
    }

    /// Lists endpoints whose USB identifiers match the pod signature,
    /// creating a queue for each one not seen before.
    ///
    /// An empty list is not an error.
    pub async fn list_endpoints(&self) -> Result<Vec<Endpoint>> {
        let signature = self.config.signature();
        let mut endpoints: Vec<Endpoint> = self
            .connector
            .list_ports()?
            .into_iter()
            .filter(|port| signature.matches(port))
            .map(|port| port.endpoint)
            .collect();
        endpoints.sort();
        endpoints.dedup();

        let mut queues = self.queues.write().await;
        for endpoint in &endpoints {
            if !queues.contains_key(endpoint) {
                tracing::debug!(%endpoint, "new endpoint");
                queues.insert(endpoint.clone(), DeviceQueue::new(endpoint.clone()));
            }
        }
        Ok(endpoints)
    }

    /// Runs one discovery cycle.
    ///
    /// Every endpoint is probed in parallel, each through its own queue.
    /// Endpoints that fail are logged and left out. Pods seen for the first
    /// time in this process get their post-connect action before this
    /// returns; known pods keep their entry even across missed cycles and
    /// only have their endpoint updated. The result is sorted by serial
    /// number.
    ///
    /// Must not be called concurrently with itself.
    ///
    /// # Errors
    ///
    /// [`Error::Cycle`] if the endpoints cannot be enumerated.
    pub async fn refresh(&self) -> Result<Vec<DeviceSnapshot>> {
        let endpoints = self.list_endpoints().await.map_err(|e| {
            tracing::error!("device enumeration failed: {}", e);
            Error::Cycle {
                message: e.to_string(),
            }
        })?;

        self.remove_stale(&endpoints).await;

        let (probed, probes): (Vec<Endpoint>, Vec<_>) = {
            let queues = self.queues.read().await;
            endpoints
                .iter()
                .filter_map(|endpoint| {
                    let queue = queues.get(endpoint)?;
                    Some((endpoint.clone(), queue.enqueue(probe(self.client(endpoint)))))
                })
                .unzip()
        };
        let results = join_all(probes).await;

        let mut snapshots = Vec::with_capacity(results.len());
        let mut fresh = Vec::new();
        {
            let mut known = self.known.write().await;
            for (endpoint, result) in probed.iter().zip(results) {
                match result {
                    Ok(snapshot) => {
                        let previous = known
                            .insert(snapshot.serial_number.clone(), snapshot.endpoint.clone());
                        match previous {
                            None => fresh.push(snapshot.clone()),
                            Some(old) if old != snapshot.endpoint => tracing::info!(
                                serial_number = %snapshot.serial_number,
                                from = %old,
                                to = %snapshot.endpoint,
                                "known pod moved"
                            ),
                            Some(_) => {}
                        }
                        snapshots.push(snapshot);
                    }
                    Err(e) if e.is_timeout() => {
                        tracing::warn!(%endpoint, "pod did not answer: {}", e);
                    }
                    Err(e) => {
                        tracing::warn!(%endpoint, "pod not reachable: {}", e);
                    }
                }
            }
        }

        self.post_connect(fresh).await;

        snapshots.sort_by(|a, b| a.serial_number.cmp(&b.serial_number));
        Ok(snapshots)
    }

    async fn remove_stale(&self, endpoints: &[Endpoint]) {
        let mut queues = self.queues.write().await;
        let stale: Vec<Endpoint> = queues
            .keys()
            .filter(|endpoint| !endpoints.contains(endpoint))
            .cloned()
            .collect();
        for endpoint in stale {
            queues.remove(&endpoint);
            tracing::info!(%endpoint, "endpoint removed");
            self.dispatcher
                .dispatch(Notification::DeviceRemoved { endpoint });
        }
    }

    /// Flashes newly seen pods, or reports them to the active session.
    async fn post_connect(&self, fresh: Vec<DeviceSnapshot>) {
        if fresh.is_empty() {
            return;
        }
        let session = self.active_session().await;

        let mut actions = Vec::new();
        {
            let queues = self.queues.read().await;
            for snapshot in fresh {
                tracing::info!(
                    serial_number = %snapshot.serial_number,
                    endpoint = %snapshot.endpoint,
                    firmware = %snapshot.firmware_version,
                    "pod connected"
                );
                self.dispatcher.dispatch(Notification::DeviceAdded {
                    serial_number: snapshot.serial_number.clone(),
                    endpoint: snapshot.endpoint.clone(),
                });

                if let Some(session) = &session {
                    self.dispatcher.dispatch(Notification::CheckMissedReads {
                        session: session.clone(),
                        serial_number: snapshot.serial_number,
                    });
                    continue;
                }

                let Some(queue) = queues.get(&snapshot.endpoint) else {
                    continue;
                };
                let mut client = self.client(&snapshot.endpoint);
                let action = queue.enqueue(async move {
                    // Flashing the LED charges the capacitor
                    client.run_rp(true).await.map(|_| ())
                });
                actions.push((snapshot.endpoint, action));
            }
        }

        for (endpoint, action) in actions {
            if let Err(e) = action.await {
                tracing::warn!(%endpoint, "post-connect flash failed: {}", e);
            }
        }
    }

    fn client(&self, endpoint: &Endpoint) -> PodClient<C::Transport> {
        PodClient::new(endpoint.clone(), self.connector.transport(endpoint))
            .with_timeouts(self.config.exchange_timeouts())
    }

    /// Runs `op` as one task on the endpoint's queue. The connection is
    /// closed afterwards whatever the outcome.
    async fn run<R, F>(&self, endpoint: &Endpoint, op: F) -> Result<R>
    where
        R: Send + 'static,
        F: for<'a> FnOnce(&'a mut PodClient<C::Transport>) -> BoxFuture<'a, Result<R>>
            + Send
            + 'static,
    {
        let task = {
            let queues = self.queues.read().await;
            let queue = queues.get(endpoint).ok_or_else(|| Error::UnknownEndpoint {
                endpoint: endpoint.to_string(),
            })?;
            let mut client = self.client(endpoint);
            queue.enqueue(async move {
                let result = op(&mut client).await;
                client.close_quietly().await;
                result
            })
        };
        task.await
    }

    // ==================== Pod Verbs ====================

    /// Runs the RP measurement and returns its first frame.
    pub async fn read_rp(&self, endpoint: &Endpoint, use_blanks: bool) -> Result<String> {
        let frames = self
            .run(endpoint, move |client| Box::pin(client.run_rp(use_blanks)))
            .await?;
        first_frame(frames, crate::protocol::RP_TAG)
    }

    /// Runs a pre-formatted `RUN` command and returns the first frame tagged
    /// `tag`.
    pub async fn read_command(&self, endpoint: &Endpoint, command: &str, tag: &str) -> Result<String> {
        let args = command.to_owned();
        let expected = tag.to_owned();
        let frames = self
            .run(endpoint, move |client| {
                Box::pin(async move { client.run_command(&args, &expected).await })
            })
            .await?;
        first_frame(frames, tag)
    }

    /// Reads a parameter.
    pub async fn get_parameter(&self, endpoint: &Endpoint, param: impl Into<ParamRef>) -> Result<String> {
        let param = param.into().resolve()?;
        self.run(endpoint, move |client| Box::pin(client.get_param(param, true)))
            .await
    }

    /// Sets a parameter without persisting it.
    pub async fn set_parameter(
        &self,
        endpoint: &Endpoint,
        param: impl Into<ParamRef>,
        value: impl ToString,
    ) -> Result<String> {
        let (param, value) = checked(param.into(), value.to_string())?;
        self.run(endpoint, move |client| {
            Box::pin(async move { client.set_param(param, value, true).await })
        })
        .await
    }

    /// Commits pending parameter changes.
    pub async fn save_parameters(&self, endpoint: &Endpoint) -> Result<()> {
        self.run(endpoint, |client| Box::pin(client.save_params()))
            .await
    }

    /// Sets a parameter and persists it in one queued task.
    pub async fn update_parameter(
        &self,
        endpoint: &Endpoint,
        param: impl Into<ParamRef>,
        value: impl ToString,
    ) -> Result<()> {
        self.update_parameters(endpoint, [(param.into(), value.to_string())])
            .await
    }

    /// Sets every parameter in order over one connection, then persists
    /// them together.
    ///
    /// All names and values are validated before anything is sent. If the
    /// connection drops midway nothing is persisted.
    pub async fn update_parameters<I, P, V>(&self, endpoint: &Endpoint, params: I) -> Result<()>
    where
        I: IntoIterator<Item = (P, V)>,
        P: Into<ParamRef>,
        V: ToString,
    {
        let params = params
            .into_iter()
            .map(|(param, value)| checked(param.into(), value.to_string()))
            .collect::<Result<Vec<_>>>()?;

        self.run(endpoint, move |client| {
            Box::pin(async move {
                for (param, value) in params {
                    client.set_param(param, value, false).await?;
                }
                client.save_params().await
            })
        })
        .await
    }

    /// Writes a new serial number.
    pub async fn set_serial_number(&self, endpoint: &Endpoint, serial_number: &str) -> Result<String> {
        Param::SerNumber.validate(serial_number)?;
        let serial_number = serial_number.to_owned();
        self.run(endpoint, move |client| {
            Box::pin(async move { client.set_serial_number(&serial_number).await })
        })
        .await
    }

    /// Blinks the indicator so a person can find the pod.
    pub async fn locate(&self, endpoint: &Endpoint) -> Result<()> {
        let blinks = self.config.locate_blinks;
        let period = self.config.locate_period();
        tracing::info!(%endpoint, blinks, "locating pod");
        self.run(endpoint, move |client| {
            Box::pin(async move {
                for _ in 0..blinks {
                    client.led_on(false).await?;
                    tokio::time::sleep(period).await;
                    client.led_off(false).await?;
                    tokio::time::sleep(period).await;
                }
                Ok(())
            })
        })
        .await
    }
}

/// Reads serial number and firmware version over one connection.
async fn probe<T: Transport>(mut client: PodClient<T>) -> Result<DeviceSnapshot> {
    let result = async {
        let serial_number = client.get_serial_number(false).await?;
        let firmware_version = client.get_firmware_version(true).await?;
        Ok(DeviceSnapshot {
            serial_number,
            endpoint: client.endpoint().clone(),
            firmware_version,
            connected: true,
            led_on: false,
        })
    }
    .await;
    if result.is_err() {
        client.close_quietly().await;
    }
    result
}

fn checked(param: ParamRef, value: String) -> Result<(Param, String)> {
    let param = param.resolve()?;
    param.validate(&value)?;
    Ok((param, value))
}

fn first_frame(frames: Vec<String>, tag: &str) -> Result<String> {
    frames
        .into_iter()
        .next()
        .ok_or_else(|| Error::protocol(format!("no {tag} frame received")))
}

static INSTANCE: OnceLock<Arc<DeviceManager<SerialConnector>>> = OnceLock::new();

/// Constructs the process-wide serial registry.
///
/// # Errors
///
/// [`Error::Configuration`] if `config` is invalid or the registry was
/// already constructed.
pub fn init(config: ManagerConfig) -> Result<Arc<DeviceManager<SerialConnector>>> {
    config.validate()?;
    let mut created = false;
    let manager = INSTANCE.get_or_init(|| {
        created = true;
        let connector = SerialConnector::new(config.baud_rate);
        Arc::new(DeviceManager::new(connector, config))
    });
    if !created {
        return Err(Error::configuration("device manager already initialized"));
    }
    Ok(Arc::clone(manager))
}

/// The process-wide registry, if [`init`] has run.
#[must_use]
pub fn instance() -> Option<Arc<DeviceManager<SerialConnector>>> {
    INSTANCE.get().cloned()
}

/// Runs `future` against the process-wide registry.
///
/// # Errors
///
/// [`Error::Configuration`] if [`init`] has not run.
pub async fn with_instance<F, Fut, R>(f: F) -> Result<R>
where
    F: FnOnce(Arc<DeviceManager<SerialConnector>>) -> Fut,
    Fut: Future<Output = Result<R>>,
{
    let manager = instance().ok_or_else(|| Error::configuration("device manager not initialized"))?;
    f(manager).await
}
