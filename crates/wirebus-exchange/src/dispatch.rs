use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::mpsc::{self, Sender};
use std::sync::Arc;
use std::thread;

use tracing::debug;
use wirebus_frame::Envelope;

/// A registered message consumer.
///
/// Invoked by its dispatch worker one message at a time, so the callback is
/// never entered concurrently and may hold mutable state.
pub(crate) type Consumer = Box<dyn FnMut(Envelope) + Send + 'static>;

/// Per-consumer delivery queue plus one dedicated drain thread.
///
/// Messages enqueued for one consumer are delivered in FIFO order. A consumer
/// that blocks inside its callback delays only its own queue, never the
/// reader loop or other consumers.
pub(crate) struct DispatchWorker {
    queue: Sender<Envelope>,
    stopped: Arc<AtomicBool>,
}

impl DispatchWorker {
    /// Spawn the drain thread for `consumer`.
    pub(crate) fn spawn(id: &str, mut consumer: Consumer) -> std::io::Result<Self> {
        let (queue, pending) = mpsc::channel::<Envelope>();
        let stopped = Arc::new(AtomicBool::new(false));
        let flag = Arc::clone(&stopped);

        thread::Builder::new()
            .name(format!("wirebus-dispatch-{id}"))
            .spawn(move || {
                // recv keeps yielding queued messages after every sender is
                // gone, so check the stop flag per message: removal discards
                // anything still pending.
                while let Ok(envelope) = pending.recv() {
                    if flag.load(Ordering::Acquire) {
                        break;
                    }
                    consumer(envelope);
                }
                debug!("dispatch worker exiting");
            })?;

        Ok(Self { queue, stopped })
    }

    /// A handle for enqueueing messages to this worker.
    pub(crate) fn queue(&self) -> Sender<Envelope> {
        self.queue.clone()
    }
}

impl Drop for DispatchWorker {
    fn drop(&mut self) {
        self.stopped.store(true, Ordering::Release);
    }
}
