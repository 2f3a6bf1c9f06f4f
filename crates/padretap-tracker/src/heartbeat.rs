//! Heartbeat task for upstream keepalive.

use std::sync::Arc;
use std::time::Duration;

use futures::{Sink, SinkExt};
use tokio::sync::Mutex;
use tokio::task::JoinHandle;
use tracing::debug;

/// Spawn a task that sends `frame` on `sink` every `interval`.
///
/// The first heartbeat goes out one full interval after spawning. A failed
/// send ends the task quietly; the receive loop notices the dead connection
/// on its own.
pub fn spawn_heartbeat_task<S, T>(
    sink: Arc<Mutex<S>>,
    frame: T,
    interval: Duration,
) -> JoinHandle<()>
where
    S: Sink<T> + Unpin + Send + 'static,
    T: Clone + Send + 'static,
{
    tokio::spawn(async move {
        let mut timer = tokio::time::interval(interval);
        timer.tick().await; // Skip first immediate tick

        loop {
            timer.tick().await;
            if sink.lock().await.send(frame.clone()).await.is_err() {
                debug!("Heartbeat send failed, stopping heartbeat");
                return;
            }
        }
    })
}
