use std::collections::HashMap;
use std::io::{Read, Write};
use std::sync::{Arc, Mutex, MutexGuard, PoisonError};
use std::thread;

use tracing::{debug, error, warn};
use wirebus_frame::{
    Envelope, FrameConfig, FrameError, FrameReader, FrameWriter, DEFAULT_MAX_PAYLOAD,
};

use crate::dispatch::{Consumer, DispatchWorker};

/// Configuration for a message exchange.
#[derive(Debug, Clone)]
pub struct ExchangeConfig {
    /// Maximum payload size in bytes for inbound and outbound messages.
    /// Default: 16 MiB.
    pub max_payload_size: usize,
}

impl Default for ExchangeConfig {
    fn default() -> Self {
        Self {
            max_payload_size: DEFAULT_MAX_PAYLOAD,
        }
    }
}

/// Bidirectional message exchange over one duplex byte-stream pair.
///
/// The exchange fans every inbound message out to all registered consumers,
/// each on its own dispatch worker, and serializes outbound messages so that
/// concurrent [`send`](Exchange::send) calls never interleave on the wire.
///
/// One exchange per connection, owned by the session layer; `Clone` yields a
/// cheap handle to the same exchange. The inbound and outbound sides are
/// attached independently, in either order, and may be re-attached after a
/// stream closes (reconnect). Stream failure is detected reactively and
/// reported through the closed-callback passed at attach time; no method of
/// the public API returns an error.
#[derive(Clone, Default)]
pub struct Exchange {
    shared: Arc<Shared>,
}

#[derive(Default)]
struct Shared {
    config: ExchangeConfig,
    outbound: Mutex<Option<Outbound>>,
    consumers: Mutex<HashMap<String, DispatchWorker>>,
}

struct Outbound {
    writer: FrameWriter<Box<dyn Write + Send>>,
    on_closed: Box<dyn FnOnce() + Send>,
}

impl Exchange {
    /// Create an exchange with default configuration.
    pub fn new() -> Self {
        Self::with_config(ExchangeConfig::default())
    }

    /// Create an exchange with explicit configuration.
    pub fn with_config(config: ExchangeConfig) -> Self {
        Self {
            shared: Arc::new(Shared {
                config,
                outbound: Mutex::new(None),
                consumers: Mutex::new(HashMap::new()),
            }),
        }
    }

    /// Attach the inbound stream and start the reader loop.
    ///
    /// Spawns a dedicated reader thread immediately. The thread parses one
    /// envelope at a time and fans it out to every registered consumer. When
    /// the stream terminates — clean end-of-stream or failure alike —
    /// `on_closed` is invoked exactly once and the thread exits.
    pub fn attach_inbound<R>(&self, stream: R, on_closed: impl FnOnce() + Send + 'static)
    where
        R: Read + Send + 'static,
    {
        let shared = Arc::clone(&self.shared);
        let spawned = thread::Builder::new()
            .name("wirebus-inbound".into())
            .spawn(move || {
                raise_reader_priority();
                shared.run_reader_loop(stream);
                on_closed();
            });
        if let Err(err) = spawned {
            error!(error = %err, "failed to spawn inbound reader thread");
        }
    }

    /// Attach the outbound stream.
    ///
    /// Stores the stream for subsequent [`send`](Exchange::send) calls,
    /// fully replacing any previous attachment. `on_closed` is invoked
    /// exactly once if a later write fails.
    pub fn attach_outbound<W>(&self, stream: W, on_closed: impl FnOnce() + Send + 'static)
    where
        W: Write + Send + 'static,
    {
        let config = FrameConfig {
            max_payload_size: self.shared.config.max_payload_size,
        };
        let writer = FrameWriter::with_config(Box::new(stream) as Box<dyn Write + Send>, config);

        let mut guard = self.shared.outbound();
        let replaced = guard.replace(Outbound {
            writer,
            on_closed: Box::new(on_closed),
        });
        if replaced.is_some() {
            debug!("replacing outbound stream attachment");
        }
    }

    /// Register a message consumer under `id`.
    ///
    /// Every inbound message read after registration is delivered to the
    /// consumer, in stream order, on a dispatch worker dedicated to it.
    /// Registering an identity that is already registered replaces the
    /// previous consumer.
    pub fn register(&self, id: impl Into<String>, consumer: impl FnMut(Envelope) + Send + 'static) {
        let id = id.into();
        let worker = match DispatchWorker::spawn(&id, Box::new(consumer) as Consumer) {
            Ok(worker) => worker,
            Err(err) => {
                error!(consumer = %id, error = %err, "failed to spawn dispatch worker");
                return;
            }
        };
        if self.shared.consumers().insert(id.clone(), worker).is_some() {
            debug!(consumer = %id, "replaced existing consumer registration");
        }
    }

    /// Remove the consumer registered under `id` and stop its worker.
    ///
    /// Messages still queued for the consumer are discarded. Unregistering
    /// an unknown identity is a no-op.
    pub fn unregister(&self, id: &str) {
        if self.shared.consumers().remove(id).is_none() {
            warn!(consumer = %id, "failed to remove consumer: not registered");
        }
    }

    /// Send a message on the outbound stream, fire-and-forget.
    ///
    /// Concurrent callers are serialized; envelopes never interleave on the
    /// wire. If the write fails the outbound stream is detached and its
    /// closed-callback invoked; if no stream is attached the message is
    /// dropped. Neither case surfaces to the caller.
    pub fn send(&self, envelope: &Envelope) {
        let mut guard = self.shared.outbound();
        let Some(outbound) = guard.as_mut() else {
            error!("dropping outbound message: no stream attached");
            return;
        };

        if let Err(err) = outbound.writer.write_envelope(envelope) {
            if matches!(err, FrameError::PayloadTooLarge { .. }) {
                // Rejected during encoding, before any byte reached the
                // stream; the attachment stays live.
                error!(error = %err, "dropping outbound message: payload over cap");
                return;
            }
            error!(error = %err, "outbound stream failed, detaching");
            let outbound = guard.take();
            // Invoke the callback outside the critical section so it may
            // re-attach without deadlocking.
            drop(guard);
            if let Some(outbound) = outbound {
                (outbound.on_closed)();
            }
        }
    }

    /// Current exchange configuration.
    pub fn config(&self) -> &ExchangeConfig {
        &self.shared.config
    }
}

impl Shared {
    fn run_reader_loop<R: Read>(&self, stream: R) {
        let config = FrameConfig {
            max_payload_size: self.config.max_payload_size,
        };
        let mut reader = FrameReader::with_config(stream, config);
        loop {
            match reader.read_envelope() {
                Ok(Some(envelope)) => self.fan_out(envelope),
                Ok(None) => {
                    debug!("inbound stream reached end of stream");
                    break;
                }
                Err(err) => {
                    error!(error = %err, "inbound stream failed");
                    break;
                }
            }
        }
    }

    /// Enqueue one inbound message to every registered consumer.
    ///
    /// The queue snapshot is taken under the registry lock and the enqueue
    /// happens outside it, so registration changes during fan-out cannot
    /// half-deliver or duplicate a message. A consumer registered after the
    /// snapshot misses this message; one removed after the snapshot may
    /// still receive it.
    fn fan_out(&self, envelope: Envelope) {
        let queues: Vec<_> = self
            .consumers()
            .values()
            .map(DispatchWorker::queue)
            .collect();
        for queue in queues {
            // A send error means the worker was stopped after the snapshot.
            let _ = queue.send(envelope.clone());
        }
    }

    fn outbound(&self) -> MutexGuard<'_, Option<Outbound>> {
        self.outbound.lock().unwrap_or_else(PoisonError::into_inner)
    }

    fn consumers(&self) -> MutexGuard<'_, HashMap<String, DispatchWorker>> {
        self.consumers
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
    }
}

/// Raise the reader thread's scheduling priority, best effort.
///
/// Inbound delivery is the latency-sensitive path. EPERM is expected for
/// unprivileged processes and leaves the default priority in place.
///
/// Linux only: there, `setpriority` with `who = 0` renices just the calling
/// thread. Other Unixes apply it to the whole process, which is not what we
/// want for one reader thread.
#[cfg(target_os = "linux")]
fn raise_reader_priority() {
    const READER_NICENESS: libc::c_int = -10;
    // SAFETY: setpriority touches no memory.
    let rc = unsafe { libc::setpriority(libc::PRIO_PROCESS as _, 0, READER_NICENESS) };
    if rc != 0 {
        debug!("could not raise reader thread priority");
    }
}

#[cfg(not(target_os = "linux"))]
fn raise_reader_priority() {}
