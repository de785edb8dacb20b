use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::{Arc, Mutex, MutexGuard};

use anyhow::{anyhow, Error, Result};
use tracing::{debug, error};

use crate::coordinator::FlushCoordinator;
use crate::kafka::broker::OffsetCommitter;
use crate::kafka::rebalance_handler::RebalanceHandler;
use crate::kafka::types::Partition;
use crate::worker::BatchWorker;

/// Force-flushes the current batch when partitions are revoked, so offsets
/// for in-flight work are committed while this member still owns them.
///
/// Callbacks run inside the consumer's poll on the loop thread, so the lock
/// is never contended; it only exists because rdkafka contexts must be
/// `Send + Sync`. A flush failure cannot unwind through librdkafka, so it is
/// kept here until the loop collects it with `take_error`.
///
/// Once the loop has failed the handler is disarmed: the batch is dropped and
/// later revocations, including the one served when the consumer is dropped,
/// flush nothing.
pub struct BatchRebalanceHandler<W: BatchWorker> {
    coordinator: Arc<Mutex<FlushCoordinator<W>>>,
    pending_error: Mutex<Option<Error>>,
    disarmed: AtomicBool,
}

impl<W: BatchWorker> BatchRebalanceHandler<W> {
    pub fn new(coordinator: Arc<Mutex<FlushCoordinator<W>>>) -> Self {
        Self {
            coordinator,
            pending_error: Mutex::new(None),
            disarmed: AtomicBool::new(false),
        }
    }

    pub fn lock(&self) -> Result<MutexGuard<'_, FlushCoordinator<W>>> {
        self.coordinator
            .lock()
            .map_err(|_| anyhow!("Flush coordinator lock poisoned"))
    }

    /// The error raised by the last revoke callback, if any.
    pub fn take_error(&self) -> Option<Error> {
        match self.pending_error.lock() {
            Ok(mut slot) => slot.take(),
            Err(poisoned) => poisoned.into_inner().take(),
        }
    }

    /// Stop flushing on revocation and drop the current batch. Its offsets
    /// were never committed, so the messages are redelivered to whichever
    /// member takes the partitions over.
    pub fn disarm(&self) {
        self.disarmed.store(true, Ordering::SeqCst);
        let mut coordinator = match self.coordinator.lock() {
            Ok(coordinator) => coordinator,
            Err(poisoned) => poisoned.into_inner(),
        };
        coordinator.discard();
    }

    pub fn is_disarmed(&self) -> bool {
        self.disarmed.load(Ordering::SeqCst)
    }

    fn store_error(&self, e: Error) {
        let mut slot = match self.pending_error.lock() {
            Ok(slot) => slot,
            Err(poisoned) => poisoned.into_inner(),
        };
        // keep the first failure
        if slot.is_none() {
            *slot = Some(e);
        }
    }
}

impl<W: BatchWorker> RebalanceHandler for BatchRebalanceHandler<W> {
    // assignment leaves the batch alone

    fn on_partitions_revoked(&self, committer: &dyn OffsetCommitter, partitions: &[Partition]) {
        if self.is_disarmed() {
            debug!(
                "Consumer has failed, not flushing before revoking {} partitions",
                partitions.len()
            );
            return;
        }

        debug!("Forcing flush before revoking {} partitions", partitions.len());

        let result = self
            .lock()
            .and_then(|mut coordinator| coordinator.flush(committer, true));

        if let Err(e) = result {
            error!("Forced flush on partition revocation failed: {:#}", e);
            self.store_error(e);
        }
    }
}
