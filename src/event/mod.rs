//! Registry notifications.
//!
//! The device registry publishes [`Notification`]s on a broadcast channel
//! owned by an [`EventDispatcher`]. Consumers such as a test-session
//! supervisor hold a [`Subscription`] and react to the variants they care
//! about.

use std::sync::Arc;

use tokio::sync::broadcast;

use crate::transport::Endpoint;

/// Default capacity of the notification channel.
pub const DEFAULT_CAPACITY: usize = 64;

/// Notifications published by the device registry.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Notification {
    /// A pod was seen for the first time while a measurement session was
    /// active; readings scheduled during its absence should be checked.
    CheckMissedReads {
        /// Active session identifier.
        session: String,
        /// Serial number of the pod that (re)appeared.
        serial_number: String,
    },
    /// A pod was seen for the first time in this process run.
    DeviceAdded {
        /// Serial number.
        serial_number: String,
        /// Endpoint it was found on.
        endpoint: Endpoint,
    },
    /// An endpoint disappeared from enumeration.
    DeviceRemoved {
        /// Endpoint that vanished.
        endpoint: Endpoint,
    },
}

impl Notification {
    /// Serial number the notification refers to, if any.
    #[must_use]
    pub fn serial_number(&self) -> Option<&str> {
        match self {
            Self::CheckMissedReads { serial_number, .. } | Self::DeviceAdded { serial_number, .. } => {
                Some(serial_number)
            }
            Self::DeviceRemoved { .. } => None,
        }
    }
}

/// A subscription to notifications.
pub struct Subscription {
    receiver: broadcast::Receiver<Notification>,
}

impl Subscription {
    /// Receives the next notification.
    ///
    /// Skips over notifications lost to lag. Returns `None` once the
    /// dispatcher is gone.
    pub async fn recv(&mut self) -> Option<Notification> {
        loop {
            match self.receiver.recv().await {
                Ok(notification) => return Some(notification),
                Err(broadcast::error::RecvError::Lagged(skipped)) => {
                    tracing::warn!("notification subscriber lagged, {} dropped", skipped);
                }
                Err(broadcast::error::RecvError::Closed) => return None,
            }
        }
    }

    /// Returns the next notification if one is already queued.
    pub fn try_recv(&mut self) -> Option<Notification> {
        loop {
            match self.receiver.try_recv() {
                Ok(notification) => return Some(notification),
                Err(broadcast::error::TryRecvError::Lagged(_)) => {}
                Err(_) => return None,
            }
        }
    }
}

struct EventDispatcherInner {
    sender: broadcast::Sender<Notification>,
}

/// Dispatches notifications to subscribers.
#[derive(Clone)]
pub struct EventDispatcher {
    inner: Arc<EventDispatcherInner>,
}

impl EventDispatcher {
    /// Creates a new dispatcher.
    #[must_use]
    pub fn new(capacity: usize) -> Self {
        let (sender, _) = broadcast::channel(capacity);
        Self {
            inner: Arc::new(EventDispatcherInner { sender }),
        }
    }

    /// Dispatches a notification to all subscribers.
    pub fn dispatch(&self, notification: Notification) {
        tracing::debug!(?notification, "dispatching notification");
        // No receivers is fine
        let _ = self.inner.sender.send(notification);
    }

    /// Subscribes to notifications published from now on.
    #[must_use]
    pub fn subscribe(&self) -> Subscription {
        Subscription {
            receiver: self.inner.sender.subscribe(),
        }
    }
}

impl Default for EventDispatcher {
    fn default() -> Self {
        Self::new(DEFAULT_CAPACITY)
    }
}
