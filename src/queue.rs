//! Bounded FIFO work queue with a start/stop lifecycle.
//!
//! The lifecycle exists so the supervisor can tear the worker pool down and
//! recreate it on restart without replacing the queue handle that the bus
//! message handler holds.

use std::sync::Arc;

use parking_lot::Mutex;
use thiserror::Error;
use tokio::sync::mpsc;
use tokio::sync::mpsc::error::TrySendError;

#[derive(Debug, Error, PartialEq, Eq)]
pub enum QueueError {
    #[error("queue is full")]
    Full,
    #[error("queue is stopped")]
    Stopped,
}

struct Slots<T> {
    tx: Option<mpsc::Sender<T>>,
    rx: Arc<tokio::sync::Mutex<mpsc::Receiver<T>>>,
}

/// Bounded multi-producer multi-consumer FIFO.
///
/// `enqueue` never blocks; consumers suspend on [`WorkQueue::dequeue`]. After
/// [`WorkQueue::stop`], enqueues are rejected and dequeues drain the remaining
/// items before observing closure. A subsequent [`WorkQueue::start`] installs
/// a fresh, empty queue.
pub struct WorkQueue<T> {
    capacity: usize,
    slots: Mutex<Slots<T>>,
}

impl<T: Send + 'static> WorkQueue<T> {
    /// Create a started queue with the given capacity (minimum one slot).
    pub fn new(capacity: usize) -> Self {
        let capacity = capacity.max(1);
        let (tx, rx) = mpsc::channel(capacity);
        Self {
            capacity,
            slots: Mutex::new(Slots {
                tx: Some(tx),
                rx: Arc::new(tokio::sync::Mutex::new(rx)),
            }),
        }
    }

    pub fn is_running(&self) -> bool {
        self.slots.lock().tx.is_some()
    }

    /// Install a fresh channel pair. No-op while the queue is running.
    pub fn start(&self) {
        let mut slots = self.slots.lock();
        if slots.tx.is_some() {
            return;
        }
        let (tx, rx) = mpsc::channel(self.capacity);
        slots.tx = Some(tx);
        slots.rx = Arc::new(tokio::sync::Mutex::new(rx));
    }

    /// Close the producer side. Consumers drain what is already queued, then
    /// observe closure.
    pub fn stop(&self) {
        self.slots.lock().tx.take();
    }

    pub fn enqueue(&self, item: T) -> Result<(), QueueError> {
        let tx = match self.slots.lock().tx.clone() {
            Some(tx) => tx,
            None => return Err(QueueError::Stopped),
        };
        tx.try_send(item).map_err(|err| match err {
            TrySendError::Full(_) => QueueError::Full,
            TrySendError::Closed(_) => QueueError::Stopped,
        })
    }

    /// Receive the next item, suspending while the queue is open and empty.
    /// Returns `None` once the queue is stopped and drained.
    pub async fn dequeue(&self) -> Option<T> {
        let rx = Arc::clone(&self.slots.lock().rx);
        let mut rx = rx.lock().await;
        rx.recv().await
    }
}
