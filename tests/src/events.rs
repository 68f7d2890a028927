use std::sync::Arc;
use tokio::sync::{RwLock, mpsc};
use tokio::task::JoinHandle;
use trellis_foundation::ExecutionEvent;

/// Collects everything a run emits into an in-memory event log
///
/// Hand the sender to `WorkflowExecutor::with_event_sender` and read the
/// log back once the run is over. The channel closes when every sender is
/// gone, so drop the executor before calling [`EventLog::into_events`].
pub struct EventLog {
    seen: Arc<RwLock<Vec<ExecutionEvent>>>,
    drain: JoinHandle<()>,
}

impl EventLog {
    /// Open an event channel and start draining it into the log.
    pub fn channel(capacity: usize) -> (mpsc::Sender<ExecutionEvent>, EventLog) {
        let (tx, mut rx) = mpsc::channel(capacity);
        let seen = Arc::new(RwLock::new(Vec::new()));
        let sink = Arc::clone(&seen);
        let drain = tokio::spawn(async move {
            while let Some(event) = rx.recv().await {
                sink.write().await.push(event);
            }
        });
        (tx, EventLog { seen, drain })
    }

    /// Events seen so far, for mid-run peeks. Final assertions should use
    /// [`EventLog::into_events`], which waits for the channel to close.
    pub async fn snapshot(&self) -> Vec<ExecutionEvent> {
        self.seen.read().await.clone()
    }

    /// Wait for the channel to close and return the full log.
    pub async fn into_events(self) -> Vec<ExecutionEvent> {
        let _ = self.drain.await;
        self.seen.read().await.clone()
    }
}
