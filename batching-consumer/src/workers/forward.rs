use std::time::Duration;

use anyhow::{Context, Result};
use tracing::debug;

use crate::kafka::message::KafkaMessage;
use crate::kafka::metrics_consts::FORWARDED_RECORDS_TOTAL;
use crate::kafka::producer::RecordSink;
use crate::worker::BatchWorker;

/// A validated message waiting to be forwarded.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ForwardedRecord {
    pub key: Option<Vec<u8>>,
    pub payload: Vec<u8>,
}

/// Writes each batch of JSON messages to an output topic.
///
/// A batch counts as flushed once every record in it has been delivered.
pub struct ForwardWorker<S: RecordSink> {
    sink: S,
    output_topic: String,
    flush_timeout: Duration,
}

impl<S: RecordSink> ForwardWorker<S> {
    pub fn new(sink: S, output_topic: String, flush_timeout: Duration) -> Self {
        Self {
            sink,
            output_topic,
            flush_timeout,
        }
    }
}

impl<S: RecordSink> BatchWorker for ForwardWorker<S> {
    type Output = ForwardedRecord;

    fn process_message(&mut self, message: &KafkaMessage) -> Result<Option<ForwardedRecord>> {
        let payload = match message.payload.as_deref() {
            Some(payload) if !payload.is_empty() => payload,
            _ => {
                debug!(
                    "Skipping empty message at {}:{}",
                    message.get_topic_partition(),
                    message.get_offset()
                );
                return Ok(None);
            }
        };

        // re-serialized compactly, which also drops insignificant whitespace
        let value: serde_json::Value = serde_json::from_slice(payload).with_context(|| {
            format!(
                "Message at {}:{} is not valid JSON",
                message.get_topic_partition(),
                message.get_offset()
            )
        })?;

        Ok(Some(ForwardedRecord {
            key: message.key.clone(),
            payload: serde_json::to_vec(&value)?,
        }))
    }

    fn flush_batch(&mut self, batch: &[ForwardedRecord]) -> Result<()> {
        for record in batch {
            self.sink
                .send(
                    &self.output_topic,
                    record.key.as_deref(),
                    &record.payload,
                    None,
                )
                .with_context(|| format!("Failed to produce to {}", self.output_topic))?;
        }

        self.sink
            .flush(self.flush_timeout)
            .with_context(|| format!("Failed to deliver batch to {}", self.output_topic))?;

        metrics::counter!(FORWARDED_RECORDS_TOTAL).increment(batch.len() as u64);
        Ok(())
    }
}
