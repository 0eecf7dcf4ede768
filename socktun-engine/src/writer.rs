//! Queued packet writer
//!
//! A [`WriterWorker`] owns one [`PacketSink`] and a bounded queue drained by
//! a single consumer task. Producers never wait: when the queue is full the
//! packet is dropped and its buffer goes straight back to the pool. Packets
//! submitted through one worker are written in submission order.

use std::thread;

use sock_packet::{PacketBuf, PacketSink};
use tokio::sync::mpsc::{self, error::TrySendError};

use crate::shutdown::Shutdown;

/// Smallest queue a worker is created with
pub const MIN_QUEUE_CAPACITY: usize = 4;

/// Default queue size: four slots per available CPU, at least four
pub fn default_queue_capacity() -> usize {
    let cpus = thread::available_parallelism()
        .map(|n| n.get())
        .unwrap_or(1);
    (cpus * 4).max(MIN_QUEUE_CAPACITY)
}

/// Queue size for an optional explicit setting
pub fn effective_capacity(explicit: Option<usize>) -> usize {
    match explicit {
        Some(capacity) => capacity.max(MIN_QUEUE_CAPACITY),
        None => default_queue_capacity(),
    }
}

/// Handle to a running writer
///
/// The consumer stops when the worker is closed, when the scope it was
/// spawned under is triggered, or when every handle has been dropped.
/// Buffers still queued at that point are released, never written.
#[derive(Debug)]
pub struct WriterWorker {
    tx: mpsc::Sender<PacketBuf>,
    shutdown: Shutdown,
    capacity: usize,
}

impl WriterWorker {
    /// Start a worker draining into `sink`.
    ///
    /// Write failures are reported on `errors` with a non-blocking send; if
    /// the channel is full or absent the failure is only logged.
    pub fn spawn<S: PacketSink>(
        sink: S,
        scope: &Shutdown,
        capacity: Option<usize>,
        errors: Option<mpsc::Sender<sock_packet::Error>>,
    ) -> Self {
        let capacity = effective_capacity(capacity);
        let (tx, rx) = mpsc::channel(capacity);
        let shutdown = scope.child();

        tokio::spawn(drain(sink, rx, shutdown.clone(), errors));

        Self {
            tx,
            shutdown,
            capacity,
        }
    }

    /// Queue a packet without waiting.
    ///
    /// Returns `false` when the packet was dropped because the queue is full
    /// or the worker has stopped; the buffer is released either way.
    pub fn enqueue(&self, buf: PacketBuf) -> bool {
        match self.tx.try_send(buf) {
            Ok(()) => true,
            Err(TrySendError::Full(buf)) => {
                log::trace!("Writer queue full, dropping {} byte packet", buf.len());
                false
            }
            Err(TrySendError::Closed(_)) => false,
        }
    }

    /// Stop the consumer, abandoning any in-flight write.
    ///
    /// Does not wait for the consumer to exit; see [`closed`](Self::closed).
    pub fn close(&self) {
        self.shutdown.trigger();
    }

    pub fn is_closed(&self) -> bool {
        self.shutdown.is_triggered() || self.tx.is_closed()
    }

    /// Resolve once the consumer task has exited
    pub async fn closed(&self) {
        self.tx.closed().await
    }

    pub fn capacity(&self) -> usize {
        self.capacity
    }

    /// Packets waiting in the queue
    pub fn queued(&self) -> usize {
        self.capacity - self.tx.capacity()
    }
}

async fn drain<S: PacketSink>(
    mut sink: S,
    mut rx: mpsc::Receiver<PacketBuf>,
    shutdown: Shutdown,
    errors: Option<mpsc::Sender<sock_packet::Error>>,
) {
    loop {
        let buf = tokio::select! {
            biased;
            _ = shutdown.wait() => break,
            next = rx.recv() => match next {
                Some(buf) => buf,
                None => break,
            },
        };

        let result = tokio::select! {
            biased;
            _ = shutdown.wait() => break,
            result = sink.write_packet(&buf) => result,
        };

        if let Err(e) = result {
            log::debug!("Packet write failed: {}", e);
            if let Some(ref errors) = errors {
                let _ = errors.try_send(e);
            }
        }
    }
}
