use std::sync::Arc;

use crate::kafka::metrics_consts::{REBALANCE_EMPTY_SKIPPED, REBALANCE_TOTAL};
use crate::kafka::rebalance_handler::RebalanceHandler;
use crate::kafka::types::Partition;
use rdkafka::consumer::{BaseConsumer, ConsumerContext, Rebalance};
use rdkafka::{ClientContext, TopicPartitionList};
use tracing::{debug, error, info};

/// Consumer context that forwards rebalance callbacks to a `RebalanceHandler`.
///
/// librdkafka serves rebalance events from inside `poll`, so the handler runs
/// on the consumer loop's thread and can commit through the borrowed
/// consumer before revocation completes.
pub struct BatchingConsumerContext {
    rebalance_handler: Arc<dyn RebalanceHandler>,
}

impl BatchingConsumerContext {
    pub fn new(rebalance_handler: Arc<dyn RebalanceHandler>) -> Self {
        Self { rebalance_handler }
    }
}

fn to_partitions(list: &TopicPartitionList) -> Vec<Partition> {
    list.elements().into_iter().map(Partition::from).collect()
}

impl ClientContext for BatchingConsumerContext {}

impl ConsumerContext for BatchingConsumerContext {
    fn pre_rebalance(&self, base_consumer: &BaseConsumer<Self>, rebalance: &Rebalance) {
        match rebalance {
            Rebalance::Revoke(partitions) => {
                // cooperative-sticky sends these whenever group membership changes
                if partitions.count() == 0 {
                    debug!("Skipping empty revoke rebalance");
                    metrics::counter!(REBALANCE_EMPTY_SKIPPED, "event_type" => "revoke")
                        .increment(1);
                    return;
                }

                let partitions = to_partitions(partitions);
                info!("Partitions revoked: {:?}", partitions);
                metrics::counter!(REBALANCE_TOTAL, "event_type" => "revoke").increment(1);

                self.rebalance_handler
                    .on_partitions_revoked(base_consumer, &partitions);
            }
            Rebalance::Assign(partitions) => {
                debug!(
                    "Pre-rebalance assign event for {} partitions",
                    partitions.count()
                );
            }
            Rebalance::Error(e) => {
                error!("Rebalance error: {}", e);
            }
        }
    }

    fn post_rebalance(&self, _base_consumer: &BaseConsumer<Self>, rebalance: &Rebalance) {
        match rebalance {
            Rebalance::Assign(partitions) => {
                if partitions.count() == 0 {
                    debug!("Skipping empty assign rebalance");
                    metrics::counter!(REBALANCE_EMPTY_SKIPPED, "event_type" => "assign")
                        .increment(1);
                    return;
                }

                let partitions = to_partitions(partitions);
                info!("New partitions assigned: {:?}", partitions);
                metrics::counter!(REBALANCE_TOTAL, "event_type" => "assign").increment(1);

                self.rebalance_handler.on_partitions_assigned(&partitions);
            }
            Rebalance::Revoke(_) => {
                debug!("Post-rebalance revoke event");
            }
            Rebalance::Error(e) => {
                error!("Post-rebalance error: {}", e);
            }
        }
    }
}
