use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;
use std::thread::JoinHandle;
use std::time::Duration;

use bytes::Bytes;
use parking_lot::{Condvar, Mutex};
use time::OffsetDateTime;
use tracing::{debug, error};

use crate::error::AcornResult;

/// One encoded write waiting for the next batch flush.
#[derive(Debug, Clone)]
pub struct PendingWrite {
    pub id: String,
    pub bytes: Bytes,
    pub timestamp: OffsetDateTime,
    pub version: u64,
    pub expires_at: Option<OffsetDateTime>,
}

#[derive(Debug, Clone)]
pub struct BatchOptions {
    pub batch_threshold: usize,
    pub flush_interval: Duration,
}

impl Default for BatchOptions {
    fn default() -> Self {
        BatchOptions {
            batch_threshold: 100,
            flush_interval: Duration::from_millis(200),
        }
    }
}

type BatchWriter = Arc<dyn Fn(Vec<PendingWrite>) -> AcornResult<()> + Send + Sync>;

struct BatchShared {
    pending: Mutex<Vec<PendingWrite>>,
    // Single-flight gate: one flush talks to the backend at a time.
    flush_gate: Mutex<()>,
    writer: BatchWriter,
    stop: Mutex<bool>,
    stop_signal: Condvar,
}

impl BatchShared {
    fn flush(&self) {
        let _gate = self.flush_gate.lock();
        let batch = std::mem::take(&mut *self.pending.lock());
        if batch.is_empty() {
            return;
        }
        debug!(writes = batch.len(), "flushing batched writes");
        if let Err(err) = (self.writer)(batch) {
            // Batched writes are fire-and-forget past this point; the error
            // is logged, not surfaced per write.
            error!(%err, "batch write failed");
        }
    }
}

/// Bounded pending-write buffer shared by the batching backends. Flushes on
/// threshold, on the timer tick, and synchronously on disposal.
pub struct BatchBuffer {
    shared: Arc<BatchShared>,
    options: BatchOptions,
    timer: Mutex<Option<JoinHandle<()>>>,
    disposed: AtomicBool,
}

impl BatchBuffer {
    pub fn start(
        options: BatchOptions,
        writer: impl Fn(Vec<PendingWrite>) -> AcornResult<()> + Send + Sync + 'static,
    ) -> Self {
        let shared = Arc::new(BatchShared {
            pending: Mutex::new(Vec::new()),
            flush_gate: Mutex::new(()),
            writer: Arc::new(writer),
            stop: Mutex::new(false),
            stop_signal: Condvar::new(),
        });

        let timer_shared = Arc::clone(&shared);
        let interval = options.flush_interval;
        let timer = std::thread::Builder::new()
            .name("acorn-batch-flush".into())
            .spawn(move || loop {
                {
                    let mut stop = timer_shared.stop.lock();
                    if *stop {
                        break;
                    }
                    timer_shared.stop_signal.wait_for(&mut stop, interval);
                    if *stop {
                        break;
                    }
                }
                timer_shared.flush();
            })
            .expect("spawning the batch flush timer");

        BatchBuffer {
            shared,
            options,
            timer: Mutex::new(Some(timer)),
            disposed: AtomicBool::new(false),
        }
    }

    pub fn push(&self, write: PendingWrite) {
        let crossed_threshold = {
            let mut pending = self.shared.pending.lock();
            pending.push(write);
            pending.len() >= self.options.batch_threshold
        };
        if crossed_threshold {
            self.shared.flush();
        }
    }

    pub fn pending_len(&self) -> usize {
        self.shared.pending.lock().len()
    }

    pub fn flush(&self) {
        self.shared.flush();
    }

    /// Stops the timer and flushes whatever is left. Safe to call twice.
    pub fn dispose(&self) {
        if self.disposed.swap(true, Ordering::SeqCst) {
            return;
        }
        {
            let mut stop = self.shared.stop.lock();
            *stop = true;
            self.shared.stop_signal.notify_all();
        }
        if let Some(timer) = self.timer.lock().take() {
            let _ = timer.join();
        }
        self.shared.flush();
    }
}

impl Drop for BatchBuffer {
    fn drop(&mut self) {
        self.dispose();
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn write(id: &str) -> PendingWrite {
        PendingWrite {
            id: id.to_string(),
            bytes: Bytes::from_static(b"{}"),
            timestamp: OffsetDateTime::now_utc(),
            version: 1,
            expires_at: None,
        }
    }

    fn collecting_buffer(options: BatchOptions) -> (BatchBuffer, Arc<Mutex<Vec<Vec<String>>>>) {
        let batches: Arc<Mutex<Vec<Vec<String>>>> = Arc::new(Mutex::new(Vec::new()));
        let sink = Arc::clone(&batches);
        let buffer = BatchBuffer::start(options, move |writes| {
            sink.lock().push(writes.into_iter().map(|w| w.id).collect());
            Ok(())
        });
        (buffer, batches)
    }

    #[test]
    fn crossing_the_threshold_flushes_immediately() {
        let (buffer, batches) = collecting_buffer(BatchOptions {
            batch_threshold: 3,
            flush_interval: Duration::from_secs(3600),
        });
        buffer.push(write("a"));
        buffer.push(write("b"));
        assert!(batches.lock().is_empty());
        buffer.push(write("c"));
        assert_eq!(batches.lock().as_slice(), &[vec!["a".to_string(), "b".into(), "c".into()]]);
        assert_eq!(buffer.pending_len(), 0);
    }

    #[test]
    fn timer_tick_flushes_partial_batches() {
        let (buffer, batches) = collecting_buffer(BatchOptions {
            batch_threshold: 100,
            flush_interval: Duration::from_millis(20),
        });
        buffer.push(write("a"));
        for _ in 0..50 {
            if !batches.lock().is_empty() {
                break;
            }
            std::thread::sleep(Duration::from_millis(10));
        }
        assert_eq!(batches.lock().len(), 1);
    }

    #[test]
    fn dispose_flushes_synchronously_and_is_idempotent() {
        let (buffer, batches) = collecting_buffer(BatchOptions {
            batch_threshold: 100,
            flush_interval: Duration::from_secs(3600),
        });
        buffer.push(write("a"));
        buffer.dispose();
        buffer.dispose();
        assert_eq!(batches.lock().len(), 1);
    }

    #[test]
    fn writer_errors_are_swallowed_after_logging() {
        let buffer = BatchBuffer::start(
            BatchOptions {
                batch_threshold: 1,
                flush_interval: Duration::from_secs(3600),
            },
            |_| Err(crate::error::AcornError::Transient("backend down".into())),
        );
        buffer.push(write("a"));
        assert_eq!(buffer.pending_len(), 0);
    }
}
