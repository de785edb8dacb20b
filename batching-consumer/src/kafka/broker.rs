use std::time::Duration;

use rdkafka::consumer::{BaseConsumer, CommitMode, Consumer, ConsumerContext};
use rdkafka::error::{KafkaError, KafkaResult, RDKafkaErrorCode};
use rdkafka::{Offset, TopicPartitionList};

use crate::kafka::message::KafkaMessage;
use crate::kafka::types::{CommittedOffset, Partition};

/// Synchronous offset commits.
///
/// Handed to the flush coordinator both from the consumer loop and from
/// inside rebalance callbacks, where only a borrowed consumer is available.
pub trait OffsetCommitter {
    /// Commit `next_offset` (the offset of the next message to read) for each
    /// partition, blocking until the broker acknowledges the commit.
    fn commit_offsets(&self, offsets: &[(Partition, i64)]) -> KafkaResult<Vec<CommittedOffset>>;
}

/// The subset of a group consumer the batching loop drives.
///
/// Implementations must invoke rebalance callbacks synchronously from within
/// `poll_message`, on the calling thread.
pub trait BrokerConsumer: OffsetCommitter {
    fn poll_message(&self, timeout: Duration) -> Option<KafkaResult<KafkaMessage>>;

    /// Stop consuming after a clean shutdown. Further polls return nothing.
    fn close(&self);
}

impl<C: ConsumerContext> OffsetCommitter for BaseConsumer<C> {
    fn commit_offsets(&self, offsets: &[(Partition, i64)]) -> KafkaResult<Vec<CommittedOffset>> {
        let mut list = TopicPartitionList::new();
        for (partition, next_offset) in offsets {
            list.add_partition_offset(
                partition.topic(),
                partition.partition_number(),
                Offset::Offset(*next_offset),
            )?;
        }

        self.commit(&list, CommitMode::Sync)?;

        Ok(list
            .elements()
            .into_iter()
            .map(CommittedOffset::from)
            .collect())
    }
}

impl<C: ConsumerContext> BrokerConsumer for BaseConsumer<C> {
    fn poll_message(&self, timeout: Duration) -> Option<KafkaResult<KafkaMessage>> {
        self.poll(timeout)
            .map(|result| result.map(|msg| KafkaMessage::from_borrowed_message(&msg)))
    }

    /// Unsubscribes from every topic. The group itself is left when the
    /// consumer is dropped, which also serves a final revoke callback.
    fn close(&self) {
        self.unsubscribe();
    }
}

/// Errors returned from poll that the loop swallows: reaching the end of a
/// partition, and transient transport failures librdkafka reconnects from.
pub fn is_recoverable_poll_error(error: &KafkaError) -> bool {
    matches!(
        error.rdkafka_error_code(),
        Some(RDKafkaErrorCode::PartitionEOF) | Some(RDKafkaErrorCode::BrokerTransportFailure)
    )
}

/// Short label for metrics
pub fn error_label(error: &KafkaError) -> &'static str {
    match error.rdkafka_error_code() {
        Some(RDKafkaErrorCode::PartitionEOF) => "partition_eof",
        Some(RDKafkaErrorCode::BrokerTransportFailure) => "broker_transport",
        Some(RDKafkaErrorCode::AllBrokersDown) => "all_brokers_down",
        Some(RDKafkaErrorCode::Authentication) => "authentication",
        Some(RDKafkaErrorCode::OffsetOutOfRange) => "offset_out_of_range",
        Some(RDKafkaErrorCode::RequestTimedOut) => "request_timed_out",
        Some(_) => "consumer",
        None => "unexpected",
    }
}
