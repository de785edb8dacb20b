use std::thread;
use std::time::Duration;

use rdkafka::error::{KafkaError, RDKafkaErrorCode};
use thiserror::Error;
use tracing::warn;

use crate::kafka::broker::OffsetCommitter;
use crate::kafka::metrics_consts::COMMIT_RETRIES_TOTAL;
use crate::kafka::types::{CommittedOffset, Partition};

#[derive(Error, Debug)]
pub enum CommitError {
    #[error("offset commit still failing after {attempts} attempts: {source}")]
    RetriesExhausted {
        attempts: u32,
        #[source]
        source: KafkaError,
    },
    #[error("offset commit failed: {0}")]
    NonRetryable(#[source] KafkaError),
}

/// Bounded retry for synchronous offset commits.
///
/// Only coordinator hiccups are retried. Every other error, and a retryable
/// one that outlasts `max_retries`, is returned to the caller.
#[derive(Copy, Clone, Debug)]
pub struct CommitRetryPolicy {
    /// Retries after the first attempt
    max_retries: u32,
    /// Fixed delay before each retry
    delay: Duration,
}

impl CommitRetryPolicy {
    pub fn new(max_retries: u32, delay: Duration) -> Self {
        Self { max_retries, delay }
    }

    pub fn is_retryable(error: &KafkaError) -> bool {
        matches!(
            error.rdkafka_error_code(),
            Some(RDKafkaErrorCode::RequestTimedOut)
                | Some(RDKafkaErrorCode::NotCoordinator)
                | Some(RDKafkaErrorCode::WaitingForCoordinator)
        )
    }

    /// Commit `offsets`, sleeping `delay` between attempts.
    pub fn commit(
        &self,
        committer: &dyn OffsetCommitter,
        offsets: &[(Partition, i64)],
    ) -> Result<Vec<CommittedOffset>, CommitError> {
        let mut attempt: u32 = 0;
        loop {
            attempt += 1;
            match committer.commit_offsets(offsets) {
                Ok(committed) => return Ok(committed),
                Err(e) if Self::is_retryable(&e) => {
                    let retries_left = self.max_retries.saturating_sub(attempt - 1);
                    warn!("Commit failed: {} ({} retries)", e, retries_left);
                    if retries_left == 0 {
                        return Err(CommitError::RetriesExhausted {
                            attempts: attempt,
                            source: e,
                        });
                    }
                    metrics::counter!(COMMIT_RETRIES_TOTAL).increment(1);
                    thread::sleep(self.delay);
                }
                Err(e) => return Err(CommitError::NonRetryable(e)),
            }
        }
    }
}

impl Default for CommitRetryPolicy {
    fn default() -> Self {
        Self {
            max_retries: 3,
            delay: Duration::from_secs(1),
        }
    }
}
