use anyhow::Result;

use crate::kafka::message::KafkaMessage;

/// User-provided work plugged into the `BatchingConsumer`.
///
/// The consumer owns the Kafka loop, batching and offset commits; a worker
/// only decides what processing a raw message and flushing a batch mean.
/// Any backing store becomes its own implementation of this trait.
pub trait BatchWorker: Send {
    type Output: Send;

    /// Called with each raw message, allowing the worker to do incremental
    /// (preferably local!) work. The returned value is put into the current
    /// batch; `None` means the message was handled but produced nothing to
    /// flush, e.g. it was filtered out.
    ///
    /// An error here is not caught by the consumer and ends the loop.
    fn process_message(&mut self, message: &KafkaMessage) -> Result<Option<Self::Output>>;

    /// Called with the processed results of a batch, in arrival order. The
    /// worker should write them durably to whatever store it maintains;
    /// offsets are committed only after this returns `Ok`.
    ///
    /// Not called for batches in which no message produced a result.
    fn flush_batch(&mut self, batch: &[Self::Output]) -> Result<()>;
}
