use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::{Arc, Mutex};
use std::time::Duration;

use anyhow::{Context, Result};
use rdkafka::consumer::{BaseConsumer, Consumer};
use rdkafka::ClientConfig;
use tracing::{debug, error, info};

use crate::coordinator::FlushCoordinator;
use crate::kafka::broker::{error_label, is_recoverable_poll_error, BrokerConsumer};
use crate::kafka::context::BatchingConsumerContext;
use crate::kafka::metrics_consts::KAFKA_ERRORS_TOTAL;
use crate::rebalance::BatchRebalanceHandler;
use crate::worker::BatchWorker;

/// Cooperative stop flag, checked by the loop once per iteration.
#[derive(Clone, Default, Debug)]
pub struct ShutdownSignal(Arc<AtomicBool>);

impl ShutdownSignal {
    pub fn signal(&self) {
        self.0.store(true, Ordering::SeqCst);
    }

    pub fn is_signalled(&self) -> bool {
        self.0.load(Ordering::SeqCst)
    }
}

/// Drives poll, process and flush on the calling thread until shutdown.
///
/// Each iteration first gives the coordinator a chance to flush, so a batch
/// ages out on wall-clock time even when nothing new arrives. Rebalance
/// callbacks run inside `poll_message` and reach the same coordinator
/// through the rebalance handler.
pub struct BatchingConsumer<B: BrokerConsumer, W: BatchWorker> {
    consumer: B,
    handler: Arc<BatchRebalanceHandler<W>>,
    poll_timeout: Duration,
    commit_log_flush_timeout: Duration,
    shutdown: ShutdownSignal,
}

impl<W: BatchWorker + 'static> BatchingConsumer<BaseConsumer<BatchingConsumerContext>, W> {
    /// Create an rdkafka consumer routed through a `BatchingConsumerContext`
    /// and subscribe it to `topics`.
    pub fn from_config(
        client_config: &ClientConfig,
        topics: &[String],
        coordinator: FlushCoordinator<W>,
        poll_timeout: Duration,
    ) -> Result<Self> {
        let handler = Arc::new(BatchRebalanceHandler::new(Arc::new(Mutex::new(
            coordinator,
        ))));
        let context = BatchingConsumerContext::new(handler.clone());

        let consumer: BaseConsumer<BatchingConsumerContext> = client_config
            .create_with_context(context)
            .context("Failed to create Kafka consumer")?;

        let topic_refs: Vec<&str> = topics.iter().map(String::as_str).collect();
        consumer
            .subscribe(&topic_refs)
            .with_context(|| format!("Failed to subscribe to topics {topics:?}"))?;
        info!("Subscribed to topics: {:?}", topics);

        Ok(Self::new(consumer, handler, poll_timeout))
    }
}

impl<B: BrokerConsumer, W: BatchWorker> BatchingConsumer<B, W> {
    /// `handler` must be the one `consumer` delivers its rebalance callbacks to.
    pub fn new(consumer: B, handler: Arc<BatchRebalanceHandler<W>>, poll_timeout: Duration) -> Self {
        Self {
            consumer,
            handler,
            poll_timeout,
            commit_log_flush_timeout: Duration::from_secs(30),
            shutdown: ShutdownSignal::default(),
        }
    }

    pub fn with_commit_log_flush_timeout(mut self, timeout: Duration) -> Self {
        self.commit_log_flush_timeout = timeout;
        self
    }

    pub fn with_shutdown_signal(mut self, shutdown: ShutdownSignal) -> Self {
        self.shutdown = shutdown;
        self
    }

    pub fn shutdown_signal(&self) -> ShutdownSignal {
        self.shutdown.clone()
    }

    pub fn handler(&self) -> &Arc<BatchRebalanceHandler<W>> {
        &self.handler
    }

    /// Run until the shutdown signal is observed or an error occurs.
    ///
    /// On shutdown the current batch is dropped without flushing; its
    /// offsets were never committed, so the messages are redelivered. The
    /// same happens on error, without closing the consumer.
    pub fn run(&self) -> Result<()> {
        info!("Starting batching consumer loop");

        while !self.shutdown.is_signalled() {
            self.run_once()?;
        }

        info!("Stopping batching consumer loop");
        self.handler.lock()?.discard();
        let flushed = self
            .handler
            .lock()?
            .flush_commit_log(self.commit_log_flush_timeout);
        if flushed.is_err() {
            self.handler.disarm();
        }
        flushed?;
        self.consumer.close();

        Ok(())
    }

    /// One loop iteration: maybe flush, serve commit log deliveries, then poll
    /// and process at most one message.
    ///
    /// Any error is final. The rebalance handler is disarmed before it is
    /// returned, so the failed batch is neither flushed nor committed by a
    /// later revocation, including the one served when the consumer is
    /// dropped.
    pub fn run_once(&self) -> Result<()> {
        let result = self.poll_and_process();
        if result.is_err() {
            info!("Dropping the current batch after a fatal error");
            self.handler.disarm();
        }
        result
    }

    fn poll_and_process(&self) -> Result<()> {
        {
            // released before polling, revoke callbacks take the lock
            let mut coordinator = self.handler.lock()?;
            coordinator.flush(&self.consumer, false)?;
            coordinator.poll_commit_log()?;
        }

        let polled = self.consumer.poll_message(self.poll_timeout);

        if let Some(e) = self.handler.take_error() {
            return Err(e.context("Partition revocation failed"));
        }

        match polled {
            None => Ok(()),
            Some(Err(e)) if is_recoverable_poll_error(&e) => {
                debug!("Ignoring recoverable Kafka error: {}", e);
                metrics::counter!(KAFKA_ERRORS_TOTAL, "level" => "recoverable", "error" => error_label(&e))
                    .increment(1);
                Ok(())
            }
            Some(Err(e)) => {
                error!("Fatal error polling Kafka: {}", e);
                metrics::counter!(KAFKA_ERRORS_TOTAL, "level" => "fatal", "error" => error_label(&e))
                    .increment(1);
                Err(anyhow::Error::new(e).context("Fatal error polling Kafka"))
            }
            Some(Ok(message)) => self.handler.lock()?.handle_message(&message),
        }
    }
}
