use std::future::Future;
use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::Arc;
use tokio::sync::Notify;
use tracing::Instrument;

/// Store writes that were started after the response went back to the caller.
///
/// Every write is tracked until it finishes; [`PendingWrites::drain`] waits
/// for all of them so teardown never abandons a write silently.
#[derive(Debug, Default)]
pub struct PendingWrites {
    in_flight: AtomicUsize,
    idle: Notify,
}

impl PendingWrites {
    pub fn new() -> Arc<Self> {
        Arc::new(Self::default())
    }

    /// Run `write` on its own task, inside the caller's tracing span
    pub fn spawn<F>(self: &Arc<Self>, write: F)
    where
        F: Future<Output = ()> + Send + 'static,
    {
        self.in_flight.fetch_add(1, Ordering::SeqCst);
        let tracker = Arc::clone(self);
        tokio::spawn(
            async move {
                write.await;
                if tracker.in_flight.fetch_sub(1, Ordering::SeqCst) == 1 {
                    tracker.idle.notify_waiters();
                }
            }
            .in_current_span(),
        );
    }

    pub fn in_flight(&self) -> usize {
        self.in_flight.load(Ordering::SeqCst)
    }

    /// Wait until no tracked write is outstanding
    pub async fn drain(&self) {
        loop {
            let notified = self.idle.notified();
            tokio::pin!(notified);
            notified.as_mut().enable();
            if self.in_flight() == 0 {
                return;
            }
            notified.await;
        }
    }
}
