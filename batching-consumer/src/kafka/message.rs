use rdkafka::message::{BorrowedMessage, Message, OwnedHeaders};

use crate::kafka::types::Partition;

/// An owned copy of a raw Kafka message, handed to the worker as-is.
///
/// The consumer loop never inspects the payload; decoding is entirely up to
/// the worker.
#[derive(Debug, Clone)]
pub struct KafkaMessage {
    topic_partition: Partition,

    offset: i64,

    /// Optional message key as raw bytes
    pub key: Option<Vec<u8>>,

    pub payload: Option<Vec<u8>>,

    /// Creation or log-append time in epoch millis, when the broker reports one
    pub timestamp: Option<i64>,

    pub headers: Option<OwnedHeaders>,
}

impl KafkaMessage {
    pub fn new(
        topic_partition: Partition,
        offset: i64,
        key: Option<Vec<u8>>,
        payload: Option<Vec<u8>>,
        timestamp: Option<i64>,
        headers: Option<OwnedHeaders>,
    ) -> Self {
        Self {
            topic_partition,
            offset,
            key,
            payload,
            timestamp,
            headers,
        }
    }

    pub fn from_borrowed_message(msg: &BorrowedMessage<'_>) -> Self {
        Self {
            topic_partition: Partition::new(msg.topic().to_owned(), msg.partition()),
            offset: msg.offset(),
            key: msg.key().map(|k| k.to_vec()),
            payload: msg.payload().map(|p| p.to_vec()),
            timestamp: msg.timestamp().to_millis(),
            headers: msg.headers().map(|h| h.detach()),
        }
    }

    pub fn topic(&self) -> &str {
        self.topic_partition.topic()
    }

    pub fn partition_number(&self) -> i32 {
        self.topic_partition.partition_number()
    }

    pub fn get_topic_partition(&self) -> &Partition {
        &self.topic_partition
    }

    pub fn get_offset(&self) -> i64 {
        self.offset
    }
}
