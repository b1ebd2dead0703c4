//! Per-device task queue.
//!
//! Every endpoint gets one [`DeviceQueue`]: a worker task that runs submitted
//! jobs strictly one after another, in submission order. Jobs on different
//! queues run concurrently.

use std::future::Future;
use std::pin::Pin;

use tokio::sync::{mpsc, oneshot};

use crate::error::{Error, Result};
use crate::transport::Endpoint;

type Job = Pin<Box<dyn Future<Output = ()> + Send>>;

/// FIFO queue with a concurrency of one, bound to an endpoint.
///
/// Dropping the queue lets already submitted jobs finish, then stops the
/// worker.
#[derive(Debug)]
pub struct DeviceQueue {
    endpoint: Endpoint,
    jobs: mpsc::UnboundedSender<Job>,
}

impl DeviceQueue {
    /// Creates the queue and spawns its worker on the current runtime.
    #[must_use]
    pub fn new(endpoint: Endpoint) -> Self {
        let (jobs, mut rx) = mpsc::unbounded_channel::<Job>();
        let name = endpoint.clone();
        tokio::spawn(async move {
            tracing::trace!(endpoint = %name, "queue worker started");
            while let Some(job) = rx.recv().await {
                job.await;
            }
            tracing::trace!(endpoint = %name, "queue worker stopped");
        });
        Self { endpoint, jobs }
    }

    /// Endpoint the queue serializes access to.
    #[must_use]
    pub const fn endpoint(&self) -> &Endpoint {
        &self.endpoint
    }

    /// Submits `task` and returns a future resolving to its result.
    ///
    /// The task is placed in the queue when this method is called, not when
    /// the returned future is first polled, so call order is run order. The
    /// task runs even if the returned future is dropped.
    pub fn enqueue<F, R>(&self, task: F) -> impl Future<Output = Result<R>> + Send + use<F, R>
    where
        F: Future<Output = Result<R>> + Send + 'static,
        R: Send + 'static,
    {
        let (tx, rx) = oneshot::channel();
        let job: Job = Box::pin(async move {
            let _ = tx.send(task.await);
        });
        let submitted = self.jobs.send(job).is_ok();

        async move {
            if !submitted {
                return Err(Error::ChannelClosed);
            }
            rx.await.map_err(|_| Error::ChannelClosed)?
        }
    }
}
