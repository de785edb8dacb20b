use std::sync::{Arc, Mutex};
use std::time::Duration;

use rdkafka::error::{KafkaError, RDKafkaErrorCode};
use rdkafka::message::{Message, OwnedHeaders};
use rdkafka::producer::{BaseProducer, BaseRecord, DeliveryResult, Producer, ProducerContext};
use rdkafka::{ClientConfig, ClientContext};
use thiserror::Error;
use tracing::{debug, error, info};

use crate::config::KafkaConfig;

#[derive(Error, Debug)]
pub enum DeliveryError {
    #[error("failed to enqueue record for topic {topic}: {error}")]
    Enqueue { topic: String, error: KafkaError },
    #[error("record delivery failed: {0}")]
    Delivery(KafkaError),
    #[error("producer queue did not drain: {0}")]
    Flush(KafkaError),
}

/// Somewhere records can be produced to, with delivery failures surfaced on
/// the calling thread.
pub trait RecordSink: Send {
    /// Enqueue a record for delivery.
    fn send(
        &self,
        topic: &str,
        key: Option<&[u8]>,
        payload: &[u8],
        headers: Option<OwnedHeaders>,
    ) -> Result<(), DeliveryError>;

    /// Serve delivery reports without blocking, raising the first failure.
    fn poll(&self) -> Result<(), DeliveryError>;

    /// Wait for every enqueued record to be delivered, raising the first failure.
    fn flush(&self, timeout: Duration) -> Result<(), DeliveryError>;
}

impl<T: RecordSink + Sync + ?Sized> RecordSink for Arc<T> {
    fn send(
        &self,
        topic: &str,
        key: Option<&[u8]>,
        payload: &[u8],
        headers: Option<OwnedHeaders>,
    ) -> Result<(), DeliveryError> {
        (**self).send(topic, key, payload, headers)
    }

    fn poll(&self) -> Result<(), DeliveryError> {
        (**self).poll()
    }

    fn flush(&self, timeout: Duration) -> Result<(), DeliveryError> {
        (**self).flush(timeout)
    }
}

/// Producer context that remembers the first failed delivery so it can be
/// raised on the owning thread.
#[derive(Default)]
pub struct DeliveryTrackingContext {
    first_failure: Mutex<Option<KafkaError>>,
}

impl DeliveryTrackingContext {
    fn take_failure(&self) -> Option<KafkaError> {
        match self.first_failure.lock() {
            Ok(mut slot) => slot.take(),
            Err(poisoned) => poisoned.into_inner().take(),
        }
    }
}

impl ClientContext for DeliveryTrackingContext {}

impl ProducerContext for DeliveryTrackingContext {
    type DeliveryOpaque = ();

    fn delivery(&self, delivery_result: &DeliveryResult<'_>, _: Self::DeliveryOpaque) {
        if let Err((e, message)) = delivery_result {
            error!(
                "Failed to deliver record to {}/{}: {}",
                message.topic(),
                message.partition(),
                e
            );
            let mut slot = match self.first_failure.lock() {
                Ok(slot) => slot,
                Err(poisoned) => poisoned.into_inner(),
            };
            if slot.is_none() {
                *slot = Some(e.clone());
            }
        }
    }
}

/// A polled (non-threaded) producer for the consumer loop's own thread.
///
/// Delivery reports are only served from `poll` and `flush`; a failed delivery
/// is returned from the next of those calls.
pub struct DeliveryProducer {
    producer: BaseProducer<DeliveryTrackingContext>,
}

impl DeliveryProducer {
    pub fn from_config(config: &KafkaConfig) -> Result<Self, KafkaError> {
        let mut client_config = ClientConfig::new();
        client_config
            .set("bootstrap.servers", &config.kafka_hosts)
            .set("linger.ms", config.kafka_producer_linger_ms.to_string())
            .set(
                "message.timeout.ms",
                config.kafka_message_timeout_ms.to_string(),
            )
            .set(
                "compression.codec",
                config.kafka_compression_codec.to_owned(),
            )
            .set(
                "queue.buffering.max.kbytes",
                (config.kafka_producer_queue_mib * 1024).to_string(),
            );

        if config.kafka_tls {
            client_config
                .set("security.protocol", "ssl")
                .set("enable.ssl.certificate.verification", "false");
        };

        debug!("rdkafka producer configuration: {:?}", client_config);
        let producer: BaseProducer<DeliveryTrackingContext> =
            client_config.create_with_context(DeliveryTrackingContext::default())?;

        // "Ping" the Kafka brokers by requesting metadata
        match producer
            .client()
            .fetch_metadata(None, Duration::from_secs(15))
        {
            Ok(metadata) => {
                info!(
                    "Successfully connected to Kafka brokers. Found {} topics.",
                    metadata.topics().len()
                );
            }
            Err(error) => {
                error!("Failed to fetch metadata from Kafka brokers: {:?}", error);
                return Err(error);
            }
        }

        Ok(Self { producer })
    }

    fn check_failures(&self) -> Result<(), DeliveryError> {
        match self.producer.context().take_failure() {
            Some(e) => Err(DeliveryError::Delivery(e)),
            None => Ok(()),
        }
    }
}

impl RecordSink for DeliveryProducer {
    /// Enqueue a record. Blocks on a full local queue while serving delivery
    /// reports until space frees up.
    fn send(
        &self,
        topic: &str,
        key: Option<&[u8]>,
        payload: &[u8],
        headers: Option<OwnedHeaders>,
    ) -> Result<(), DeliveryError> {
        let mut record = BaseRecord::<[u8], [u8]>::to(topic).payload(payload);
        if let Some(key) = key {
            record = record.key(key);
        }
        if let Some(headers) = headers {
            record = record.headers(headers);
        }

        loop {
            match self.producer.send(record) {
                Ok(()) => return Ok(()),
                Err((KafkaError::MessageProduction(RDKafkaErrorCode::QueueFull), returned)) => {
                    debug!("Producer queue full, waiting for deliveries");
                    self.producer.poll(Duration::from_millis(100));
                    record = returned;
                }
                Err((error, _)) => {
                    return Err(DeliveryError::Enqueue {
                        topic: topic.to_string(),
                        error,
                    })
                }
            }
        }
    }

    /// Serve pending delivery reports without blocking.
    fn poll(&self) -> Result<(), DeliveryError> {
        self.producer.poll(Duration::ZERO);
        self.check_failures()
    }

    /// Wait for every enqueued record to be delivered.
    fn flush(&self, timeout: Duration) -> Result<(), DeliveryError> {
        self.producer.flush(timeout).map_err(DeliveryError::Flush)?;
        self.check_failures()
    }
}
