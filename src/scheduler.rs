//! Self-correcting recurring scheduler.
//!
//! [`set_async_interval`] runs an async handler every `interval`, measuring
//! each run and sleeping only for what is left of the interval. A run that
//! overshoots is followed immediately by the next one; runs never overlap
//! and missed runs are not queued up.

use std::any::Any;
use std::future::Future;
use std::panic::AssertUnwindSafe;
use std::time::Duration;

use futures::FutureExt;
use tokio::task::JoinHandle;
use tokio::time::Instant;
use tokio_util::sync::CancellationToken;

use crate::error::{Error, Result};

/// Shortest accepted interval.
pub const MIN_INTERVAL: Duration = Duration::from_millis(10);

/// Handle to a running interval.
///
/// Dropping the handle stops further runs without waiting for an in-flight
/// one; use [`IntervalHandle::cancel`] to wait.
#[derive(Debug)]
pub struct IntervalHandle {
    token: CancellationToken,
    task: Option<JoinHandle<()>>,
}

impl IntervalHandle {
    /// Returns true once cancellation was requested.
    #[must_use]
    pub fn is_stopped(&self) -> bool {
        self.token.is_cancelled()
    }

    /// Token observed by the loop; cancelling it stops the interval.
    #[must_use]
    pub fn token(&self) -> CancellationToken {
        self.token.clone()
    }

    /// Stops the interval and waits for an in-flight run to finish.
    ///
    /// Once this returns no run is executing and none will start.
    pub async fn cancel(mut self) {
        self.token.cancel();
        if let Some(task) = self.task.take() {
            if let Err(e) = task.await {
                tracing::error!("interval task ended abnormally: {}", e);
            }
        }
    }
}

impl Drop for IntervalHandle {
    fn drop(&mut self) {
        self.token.cancel();
    }
}

/// Runs `handler` every `interval` until cancelled.
///
/// The first run starts one `interval` after the call. Handler errors and
/// panics are logged and do not stop the interval.
///
/// # Errors
///
/// [`Error::Configuration`] if `interval` is shorter than [`MIN_INTERVAL`].
pub fn set_async_interval<F, Fut>(interval: Duration, mut handler: F) -> Result<IntervalHandle>
where
    F: FnMut() -> Fut + Send + 'static,
    Fut: Future<Output = Result<()>> + Send,
{
    if interval < MIN_INTERVAL {
        return Err(Error::configuration(format!(
            "interval must be at least {} ms, got {} ms",
            MIN_INTERVAL.as_millis(),
            interval.as_millis()
        )));
    }

    let token = CancellationToken::new();
    let stopped = token.clone();

    let task = tokio::spawn(async move {
        let mut delay = interval;
        loop {
            tokio::select! {
                biased;
                () = stopped.cancelled() => break,
                () = tokio::time::sleep(delay) => {}
            }

            let started = Instant::now();
            let run = AssertUnwindSafe(async { handler().await }).catch_unwind();
            match run.await {
                Ok(Ok(())) => {}
                Ok(Err(e)) => tracing::error!("interval handler failed: {}", e),
                Err(panic) => {
                    tracing::error!("interval handler panicked: {}", panic_message(&*panic));
                }
            }
            let elapsed = started.elapsed();

            if elapsed > interval {
                tracing::debug!(
                    elapsed_ms = elapsed.as_millis(),
                    interval_ms = interval.as_millis(),
                    "interval handler overran"
                );
            }
            delay = interval.saturating_sub(elapsed);
        }
        tracing::debug!("interval stopped");
    });

    Ok(IntervalHandle {
        token,
        task: Some(task),
    })
}

fn panic_message(payload: &(dyn Any + Send)) -> &str {
    payload
        .downcast_ref::<&str>()
        .copied()
        .or_else(|| payload.downcast_ref::<String>().map(String::as_str))
        .unwrap_or("non-string payload")
}

#[cfg(test)]
mod tests {
    use std::sync::atomic::{AtomicUsize, Ordering};
    use std::sync::{Arc, Mutex};

    use super::*;

    type Starts = Arc<Mutex<Vec<Instant>>>;

    fn recording(work: Duration) -> (Starts, impl FnMut() -> futures::future::BoxFuture<'static, Result<()>>) {
        let starts: Starts = Arc::default();
        let handler = {
            let starts = Arc::clone(&starts);
            move || {
                let starts = Arc::clone(&starts);
                let fut: futures::future::BoxFuture<'static, Result<()>> = Box::pin(async move {
                    starts.lock().unwrap().push(Instant::now());
                    tokio::time::sleep(work).await;
                    Ok(())
                });
                fut
            }
        };
        (starts, handler)
    }

    fn gaps(starts: &[Instant]) -> Vec<Duration> {
        starts.windows(2).map(|w| w[1] - w[0]).collect()
    }

    #[tokio::test]
    async fn test_rejects_short_interval() {
        let err = set_async_interval(Duration::from_millis(9), || async { Ok(()) }).unwrap_err();
        assert!(matches!(err, Error::Configuration { .. }));
        assert!(set_async_interval(MIN_INTERVAL, || async { Ok(()) }).is_ok());
    }

    #[tokio::test(start_paused = true)]
    async fn test_fast_handler_keeps_cadence() {
        let (starts, handler) = recording(Duration::from_millis(300));
        let origin = Instant::now();
        let handle = set_async_interval(Duration::from_secs(1), handler).unwrap();

        tokio::time::sleep(Duration::from_millis(4500)).await;
        handle.cancel().await;

        let starts = starts.lock().unwrap();
        assert_eq!(starts.len(), 4);
        assert_eq!(starts[0] - origin, Duration::from_secs(1));
        for gap in gaps(&starts) {
            assert_eq!(gap, Duration::from_secs(1));
        }
    }

    #[tokio::test(start_paused = true)]
    async fn test_slow_handler_compresses_without_backlog() {
        let (starts, handler) = recording(Duration::from_millis(2500));
        let handle = set_async_interval(Duration::from_secs(1), handler).unwrap();

        tokio::time::sleep(Duration::from_millis(8600)).await;
        handle.cancel().await;

        let starts = starts.lock().unwrap();
        // Runs start at 1s, 3.5s, 6s and 8.5s: back to back, never doubled up
        assert_eq!(starts.len(), 4);
        for gap in gaps(&starts) {
            assert_eq!(gap, Duration::from_millis(2500));
        }
    }

    #[tokio::test(start_paused = true)]
    async fn test_cancel_waits_for_in_flight_run() {
        let finished = Arc::new(AtomicUsize::new(0));
        let handle = {
            let finished = Arc::clone(&finished);
            set_async_interval(Duration::from_millis(100), move || {
                let finished = Arc::clone(&finished);
                async move {
                    tokio::time::sleep(Duration::from_millis(500)).await;
                    finished.fetch_add(1, Ordering::SeqCst);
                    Err(Error::NotConnected)
                }
            })
            .unwrap()
        };

        // Inside the first run
        tokio::time::sleep(Duration::from_millis(300)).await;
        let before = Instant::now();
        handle.cancel().await;

        assert_eq!(finished.load(Ordering::SeqCst), 1);
        assert_eq!(before.elapsed(), Duration::from_millis(300));

        tokio::time::sleep(Duration::from_secs(5)).await;
        assert_eq!(finished.load(Ordering::SeqCst), 1);
    }

    #[tokio::test(start_paused = true)]
    async fn test_handler_errors_do_not_stop_interval() {
        let runs = Arc::new(AtomicUsize::new(0));
        let handle = {
            let runs = Arc::clone(&runs);
            set_async_interval(Duration::from_millis(100), move || {
                let runs = Arc::clone(&runs);
                async move {
                    runs.fetch_add(1, Ordering::SeqCst);
                    Err(Error::Cycle {
                        message: "enumeration failed".into(),
                    })
                }
            })
            .unwrap()
        };

        tokio::time::sleep(Duration::from_millis(550)).await;
        assert!(!handle.is_stopped());
        handle.cancel().await;
        assert_eq!(runs.load(Ordering::SeqCst), 5);
    }

    #[tokio::test(start_paused = true)]
    async fn test_panicking_handler_keeps_interval_running() {
        let runs = Arc::new(AtomicUsize::new(0));
        let handle = {
            let runs = Arc::clone(&runs);
            set_async_interval(Duration::from_millis(100), move || {
                let run = runs.fetch_add(1, Ordering::SeqCst);
                async move {
                    assert_ne!(run, 0, "first run blows up");
                    Ok(())
                }
            })
            .unwrap()
        };

        tokio::time::sleep(Duration::from_millis(350)).await;
        assert!(!handle.is_stopped());
        handle.cancel().await;
        assert_eq!(runs.load(Ordering::SeqCst), 3);
    }

    #[tokio::test(start_paused = true)]
    async fn test_panic_in_handler_call_is_contained() {
        let runs = Arc::new(AtomicUsize::new(0));
        let handle = {
            let runs = Arc::clone(&runs);
            set_async_interval(Duration::from_millis(100), move || {
                let run = runs.fetch_add(1, Ordering::SeqCst);
                if run == 1 {
                    panic!("handler refused to build run {run}");
                }
                async { Ok(()) }
            })
            .unwrap()
        };

        tokio::time::sleep(Duration::from_millis(450)).await;
        handle.cancel().await;
        assert_eq!(runs.load(Ordering::SeqCst), 4);
    }

    #[test]
    fn test_panic_message_payloads() {
        let literal: Box<dyn Any + Send> = Box::new("boom");
        let owned: Box<dyn Any + Send> = Box::new(String::from("bang"));
        let other: Box<dyn Any + Send> = Box::new(7_u8);
        assert_eq!(panic_message(&*literal), "boom");
        assert_eq!(panic_message(&*owned), "bang");
        assert_eq!(panic_message(&*other), "non-string payload");
    }

    #[tokio::test(start_paused = true)]
    async fn test_drop_stops_interval() {
        let (starts, handler) = recording(Duration::ZERO);
        let handle = set_async_interval(Duration::from_millis(100), handler).unwrap();
        let token = handle.token();
        drop(handle);
        assert!(token.is_cancelled());

        tokio::time::sleep(Duration::from_secs(1)).await;
        assert!(starts.lock().unwrap().is_empty());
    }
}
