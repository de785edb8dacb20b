use std::str::FromStr;
use std::time;

use envconfig::Envconfig;
use rdkafka::ClientConfig;
use thiserror::Error;

use crate::kafka::config::ConsumerConfigBuilder;

#[derive(Envconfig, Clone, Debug)]
pub struct Config {
    #[envconfig(from = "BIND_HOST", default = "0.0.0.0")]
    pub host: String,

    #[envconfig(from = "BIND_PORT", default = "8080")]
    pub port: u16,

    #[envconfig(nested = true)]
    pub kafka: KafkaConfig,

    #[envconfig(default = "batching-consumer")]
    pub kafka_consumer_group: String,

    // Comma separated
    #[envconfig(default = "events")]
    pub kafka_consumer_topics: String,

    // earliest, latest or error
    #[envconfig(default = "error")]
    pub kafka_consumer_offset_reset: String,

    #[envconfig(default = "50000")]
    pub kafka_queued_max_messages_kbytes: u32,

    #[envconfig(default = "10000")]
    pub kafka_queued_min_messages: u32,

    // Results per batch before a size-triggered flush
    #[envconfig(default = "100")]
    pub max_batch_size: usize,

    // Measured from the first message of a batch
    #[envconfig(default = "1000")]
    pub max_batch_time_ms: EnvMsDuration,

    #[envconfig(default = "1000")]
    pub poll_timeout_ms: EnvMsDuration,

    // Retries after the first commit attempt
    #[envconfig(default = "3")]
    pub commit_retry_limit: u32,

    #[envconfig(default = "1000")]
    pub commit_retry_delay_ms: EnvMsDuration,

    pub commit_log_topic: Option<String>,

    #[envconfig(default = "events_batched")]
    pub output_topic: String,

    pub dead_letter_topic: Option<String>,

    #[envconfig(default = "30000")]
    pub producer_flush_timeout_ms: EnvMsDuration,
}

#[derive(Envconfig, Clone, Debug)]
pub struct KafkaConfig {
    #[envconfig(default = "20")]
    pub kafka_producer_linger_ms: u32, // Maximum time between producer batches during low traffic

    #[envconfig(default = "400")]
    pub kafka_producer_queue_mib: u32, // Size of the in-memory producer queue in mebibytes

    #[envconfig(default = "20000")]
    pub kafka_message_timeout_ms: u32, // Time before we stop retrying producing a message: 20 seconds

    #[envconfig(default = "none")]
    pub kafka_compression_codec: String, // none, gzip, snappy, lz4, zstd

    #[envconfig(default = "false")]
    pub kafka_tls: bool,

    #[envconfig(default = "localhost:9092")]
    pub kafka_hosts: String,
}

#[derive(Error, Debug, PartialEq, Eq)]
pub enum ConfigError {
    #[error("MAX_BATCH_SIZE must be at least 1")]
    ZeroBatchSize,
    #[error("KAFKA_CONSUMER_TOPICS must name at least one topic")]
    NoTopics,
    #[error("KAFKA_CONSUMER_GROUP must not be empty")]
    EmptyGroup,
}

impl Config {
    pub fn init_with_defaults() -> Result<Self, envconfig::Error> {
        Config::init_from_env()
    }

    /// Produce a host:port address for binding a TcpListener.
    pub fn bind(&self) -> String {
        format!("{}:{}", self.host, self.port)
    }

    pub fn topics(&self) -> Vec<String> {
        self.kafka_consumer_topics
            .split(',')
            .map(str::trim)
            .filter(|topic| !topic.is_empty())
            .map(str::to_owned)
            .collect()
    }

    pub fn validate(&self) -> Result<(), ConfigError> {
        if self.max_batch_size == 0 {
            return Err(ConfigError::ZeroBatchSize);
        }
        if self.topics().is_empty() {
            return Err(ConfigError::NoTopics);
        }
        if self.kafka_consumer_group.trim().is_empty() {
            return Err(ConfigError::EmptyGroup);
        }
        Ok(())
    }

    /// rdkafka settings for the batching consumer
    pub fn consumer_client_config(&self) -> ClientConfig {
        ConsumerConfigBuilder::for_batching_consumer(
            &self.kafka.kafka_hosts,
            &self.kafka_consumer_group,
        )
        .with_tls(self.kafka.kafka_tls)
        .with_offset_reset(&self.kafka_consumer_offset_reset)
        .with_queued_max_messages_kbytes(self.kafka_queued_max_messages_kbytes)
        .with_queued_min_messages(self.kafka_queued_min_messages)
        .build()
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct EnvMsDuration(pub time::Duration);

#[derive(Debug, PartialEq, Eq)]
pub struct ParseEnvMsDurationError;

impl FromStr for EnvMsDuration {
    type Err = ParseEnvMsDurationError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        let ms = s.parse::<u64>().map_err(|_| ParseEnvMsDurationError)?;

        Ok(EnvMsDuration(time::Duration::from_millis(ms)))
    }
}
