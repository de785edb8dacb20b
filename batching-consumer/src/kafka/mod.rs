// Kafka module - broker seams, rebalance routing and producers
pub mod broker;
pub mod config;
pub mod context;
pub mod message;
pub mod metrics_consts;
pub mod producer;
pub mod rebalance_handler;
pub mod types;

// Public API
pub use broker::{BrokerConsumer, OffsetCommitter};
pub use config::ConsumerConfigBuilder;
pub use message::KafkaMessage;
pub use rebalance_handler::RebalanceHandler;
pub use types::{CommittedOffset, Partition};
