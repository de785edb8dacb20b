use std::time::Duration;

use anyhow::{Context, Result};
use tracing::{debug, warn};

use crate::kafka::metrics_consts::COMMIT_LOG_RECORDS_TOTAL;
use crate::kafka::producer::RecordSink;
use crate::kafka::types::CommittedOffset;

/// Mirrors committed offsets onto a secondary topic, one record per
/// partition, for consumers that need to know what has been durably
/// processed by this group.
pub struct CommitLogPublisher {
    sink: Box<dyn RecordSink>,
    topic: String,
    group_id: String,
}

impl CommitLogPublisher {
    pub fn new(sink: Box<dyn RecordSink>, topic: String, group_id: String) -> Self {
        Self {
            sink,
            topic,
            group_id,
        }
    }

    /// `{topic}:{partition}:{group}` as UTF-8
    pub fn record_key(&self, offset: &CommittedOffset) -> Vec<u8> {
        format!(
            "{}:{}:{}",
            offset.topic(),
            offset.partition_number(),
            self.group_id
        )
        .into_bytes()
    }

    /// The decimal offset as UTF-8
    pub fn record_value(offset: &CommittedOffset) -> Vec<u8> {
        offset.offset().to_string().into_bytes()
    }

    /// Publish a record for every committed offset that names a real
    /// position. Returns how many records were enqueued.
    pub fn publish(&self, offsets: &[CommittedOffset]) -> Result<usize> {
        let mut published = 0;
        for item in offsets {
            if item.is_logical() {
                debug!(
                    "Skipped publishing logical offset ({}) to commit log for {}/{}",
                    item.offset(),
                    item.topic(),
                    item.partition_number()
                );
                metrics::counter!(COMMIT_LOG_RECORDS_TOTAL, "status" => "skipped_logical")
                    .increment(1);
                continue;
            } else if item.offset() < 0 {
                warn!(
                    "Found unexpected negative offset ({}) after commit for {}/{}",
                    item.offset(),
                    item.topic(),
                    item.partition_number()
                );
            }

            self.sink
                .send(
                    &self.topic,
                    Some(self.record_key(item).as_slice()),
                    &Self::record_value(item),
                    None,
                )
                .with_context(|| {
                    format!(
                        "Failed to publish commit log record for {} to {}",
                        item.partition(),
                        self.topic
                    )
                })?;
            metrics::counter!(COMMIT_LOG_RECORDS_TOTAL, "status" => "published").increment(1);
            published += 1;
        }

        Ok(published)
    }

    pub fn poll(&self) -> Result<()> {
        self.sink
            .poll()
            .with_context(|| format!("Commit log delivery to {} failed", self.topic))
    }

    pub fn flush(&self, timeout: Duration) -> Result<()> {
        self.sink
            .flush(timeout)
            .with_context(|| format!("Commit log delivery to {} failed", self.topic))
    }
}
