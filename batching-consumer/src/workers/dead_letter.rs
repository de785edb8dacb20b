use std::time::Duration;

use anyhow::{Context, Result};
use rdkafka::message::{Header, OwnedHeaders};
use tracing::warn;

use crate::kafka::message::KafkaMessage;
use crate::kafka::metrics_consts::DEAD_LETTER_TOTAL;
use crate::kafka::producer::RecordSink;
use crate::worker::BatchWorker;

pub const REASON_HEADER: &str = "dead-letter-reason";
pub const TOPIC_HEADER: &str = "dead-letter-topic";
pub const PARTITION_HEADER: &str = "dead-letter-partition";
pub const OFFSET_HEADER: &str = "dead-letter-offset";

/// Wraps a worker so that messages it fails to process are routed to a dead
/// letter topic instead of stopping the consumer.
///
/// The raw message is delivered before `process_message` returns, so once the
/// offset is committed with the rest of the batch the message is never lost.
/// Only processing errors are routed; flush errors from the inner worker are
/// still fatal.
pub struct DeadLetterWorker<W: BatchWorker, S: RecordSink> {
    inner: W,
    sink: S,
    topic: String,
    flush_timeout: Duration,
}

impl<W: BatchWorker, S: RecordSink> DeadLetterWorker<W, S> {
    pub fn new(inner: W, sink: S, topic: String, flush_timeout: Duration) -> Self {
        Self {
            inner,
            sink,
            topic,
            flush_timeout,
        }
    }

    pub fn inner(&self) -> &W {
        &self.inner
    }

    fn dead_letter(&self, message: &KafkaMessage, reason: &anyhow::Error) -> Result<()> {
        let reason = format!("{reason:#}");
        let partition = message.partition_number().to_string();
        let offset = message.get_offset().to_string();

        let headers = message
            .headers
            .clone()
            .unwrap_or_else(OwnedHeaders::new)
            .insert(Header {
                key: REASON_HEADER,
                value: Some(reason.as_str()),
            })
            .insert(Header {
                key: TOPIC_HEADER,
                value: Some(message.topic()),
            })
            .insert(Header {
                key: PARTITION_HEADER,
                value: Some(partition.as_str()),
            })
            .insert(Header {
                key: OFFSET_HEADER,
                value: Some(offset.as_str()),
            });

        self.sink
            .send(
                &self.topic,
                message.key.as_deref(),
                message.payload.as_deref().unwrap_or_default(),
                Some(headers),
            )
            .with_context(|| format!("Failed to produce to dead letter topic {}", self.topic))?;
        self.sink
            .flush(self.flush_timeout)
            .with_context(|| format!("Failed to deliver to dead letter topic {}", self.topic))?;

        Ok(())
    }
}

impl<W: BatchWorker, S: RecordSink> BatchWorker for DeadLetterWorker<W, S> {
    type Output = W::Output;

    fn process_message(&mut self, message: &KafkaMessage) -> Result<Option<W::Output>> {
        match self.inner.process_message(message) {
            Ok(result) => Ok(result),
            Err(e) => {
                warn!(
                    "Routing message at {}:{} to {}: {:#}",
                    message.get_topic_partition(),
                    message.get_offset(),
                    self.topic,
                    e
                );
                self.dead_letter(message, &e)?;
                metrics::counter!(DEAD_LETTER_TOTAL, "topic" => message.topic().to_string())
                    .increment(1);
                Ok(None)
            }
        }
    }

    fn flush_batch(&mut self, batch: &[W::Output]) -> Result<()> {
        self.inner.flush_batch(batch)
    }
}
