//! Bounded relay queue between the pacer and the sender.
//!
//! Built on a bounded tokio mpsc channel. A full queue sheds the newest
//! batch instead of blocking the pacer.

use tokio::sync::mpsc;
use tracing::warn;

use crate::shutdown::CancellationToken;
use crate::types::EncodedBatch;

/// Create a relay queue holding at most `capacity` batches.
///
/// # Panics
///
/// Panics if `capacity` is zero. Configuration validation rejects that
/// before the queue is built.
pub fn relay_queue(capacity: usize) -> (RelayProducer, RelayConsumer) {
    let (tx, rx) = mpsc::channel(capacity);
    (RelayProducer { tx }, RelayConsumer { rx })
}

#[derive(Debug)]
pub struct RelayProducer {
    tx: mpsc::Sender<EncodedBatch>,
}

impl RelayProducer {
    /// Offer a batch without blocking. Returns `false` and drops the batch
    /// if the queue is full or the consumer is gone.
    pub fn try_enqueue(&self, batch: EncodedBatch) -> bool {
        match self.tx.try_send(batch) {
            Ok(()) => true,
            Err(mpsc::error::TrySendError::Full(_)) => false,
            Err(mpsc::error::TrySendError::Closed(dropped)) => {
                warn!("📦 Relay queue closed, batch {} discarded", dropped.sequence);
                false
            }
        }
    }

    pub fn capacity(&self) -> usize {
        self.tx.max_capacity()
    }

    pub fn len(&self) -> usize {
        self.tx.max_capacity() - self.tx.capacity()
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }
}

#[derive(Debug)]
pub struct RelayConsumer {
    rx: mpsc::Receiver<EncodedBatch>,
}

impl RelayConsumer {
    /// Wait for the next batch in FIFO order.
    ///
    /// Returns `None` once `token` is cancelled, even with batches still
    /// queued, or when the producer is gone and the queue is empty.
    pub async fn dequeue(&mut self, token: &CancellationToken) -> Option<EncodedBatch> {
        if token.is_cancelled() {
            return None;
        }
        tokio::select! {
            biased;
            _ = token.cancelled() => None,
            batch = self.rx.recv() => batch,
        }
    }

    /// Close the queue and discard whatever is still buffered. Returns the
    /// number of batches discarded.
    pub fn drain_remaining(&mut self) -> usize {
        self.rx.close();
        let mut discarded = 0;
        while self.rx.try_recv().is_ok() {
            discarded += 1;
        }
        discarded
    }
}
