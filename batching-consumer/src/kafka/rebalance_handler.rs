use crate::kafka::broker::OffsetCommitter;
use crate::kafka::types::Partition;

/// Trait for handling Kafka consumer rebalance events
///
/// Both methods are called synchronously from within the consumer's poll,
/// on the thread that owns the consumer loop. They never race with message
/// handling, so an implementation may touch loop-owned state directly.
///
/// ```text
/// poll()
///     ├─► pre_rebalance(Revoke)   ─► on_partitions_revoked(consumer, partitions)
///     │                               (partitions still owned, commits allowed)
///     └─► post_rebalance(Assign)  ─► on_partitions_assigned(partitions)
/// ```
///
/// Revocation receives the consumer as an `OffsetCommitter` so that pending
/// work can be committed before ownership moves to another group member.
pub trait RebalanceHandler: Send + Sync {
    /// Called after partitions have been assigned.
    /// Default implementation does nothing.
    fn on_partitions_assigned(&self, _partitions: &[Partition]) {}

    /// Called before partitions are revoked, while they are still owned.
    fn on_partitions_revoked(&self, committer: &dyn OffsetCommitter, partitions: &[Partition]);
}
