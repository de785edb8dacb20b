use std::sync::Arc;

use anyhow::{Context, Result};
use tokio::signal;
use tracing::{error, info};
use tracing_subscriber::{layer::SubscriberExt, util::SubscriberInitExt, EnvFilter, Layer};

use batching_consumer::commit::CommitRetryPolicy;
use batching_consumer::commit_log::CommitLogPublisher;
use batching_consumer::config::Config;
use batching_consumer::consumer::{BatchingConsumer, ShutdownSignal};
use batching_consumer::coordinator::FlushCoordinator;
use batching_consumer::kafka::producer::DeliveryProducer;
use batching_consumer::server::{self, serve, setup_metrics_recorder, Readiness};
use batching_consumer::time::SystemTime;
use batching_consumer::worker::BatchWorker;
use batching_consumer::workers::{DeadLetterWorker, ForwardWorker};

async fn shutdown(shutdown_signal: ShutdownSignal) -> Result<()> {
    let mut term = signal::unix::signal(signal::unix::SignalKind::terminate())
        .context("failed to register SIGTERM handler")?;

    let mut interrupt = signal::unix::signal(signal::unix::SignalKind::interrupt())
        .context("failed to register SIGINT handler")?;

    tokio::select! {
        _ = term.recv() => {},
        _ = interrupt.recv() => {},
    };

    info!("Shutdown signalled, stopping after the current iteration");
    shutdown_signal.signal();
    Ok(())
}

/// Build the consumer around `worker` and run it on a blocking thread until
/// shutdown or a fatal error.
async fn run_consumer<W: BatchWorker + 'static>(
    config: &Config,
    worker: W,
    shutdown: ShutdownSignal,
    readiness: Readiness,
) -> Result<()> {
    let mut coordinator = FlushCoordinator::new(
        worker,
        config.max_batch_size,
        config.max_batch_time_ms.0,
        Arc::new(SystemTime::default()),
    )
    .with_retry_policy(CommitRetryPolicy::new(
        config.commit_retry_limit,
        config.commit_retry_delay_ms.0,
    ));

    if let Some(topic) = &config.commit_log_topic {
        let producer = DeliveryProducer::from_config(&config.kafka)
            .context("Failed to create commit log producer")?;
        coordinator = coordinator.with_commit_log(CommitLogPublisher::new(
            Box::new(producer),
            topic.clone(),
            config.kafka_consumer_group.clone(),
        ));
        info!("Publishing committed offsets to {}", topic);
    }

    let consumer = BatchingConsumer::from_config(
        &config.consumer_client_config(),
        &config.topics(),
        coordinator,
        config.poll_timeout_ms.0,
    )?
    .with_commit_log_flush_timeout(config.producer_flush_timeout_ms.0)
    .with_shutdown_signal(shutdown);

    readiness.set_ready(true);
    let result = tokio::task::spawn_blocking(move || consumer.run())
        .await
        .context("Consumer thread panicked")?;
    readiness.set_ready(false);

    result
}

#[tokio::main]
async fn main() -> Result<()> {
    let log_layer = tracing_subscriber::fmt::layer().with_filter(
        EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new("info")),
    );
    tracing_subscriber::registry().with(log_layer).init();

    info!("Starting batching consumer");

    let config = Config::init_with_defaults()
        .context("Failed to load configuration from environment variables")?;
    config.validate().context("Invalid configuration")?;
    info!("Configuration loaded: {:?}", config);

    let readiness = Readiness::default();
    let router = server::router(readiness.clone(), setup_metrics_recorder()?);
    let bind = config.bind();
    let server_handle = tokio::spawn(async move {
        if let Err(e) = serve(router, &bind).await {
            error!("Metrics server failed: {:#}", e);
        }
    });
    info!("Started metrics server on {}", config.bind());

    let shutdown_signal = ShutdownSignal::default();
    let signal_handle = tokio::spawn(shutdown(shutdown_signal.clone()));

    let producer = Arc::new(
        DeliveryProducer::from_config(&config.kafka).context("Failed to create producer")?,
    );
    let forward = ForwardWorker::new(
        producer.clone(),
        config.output_topic.clone(),
        config.producer_flush_timeout_ms.0,
    );

    let result = match &config.dead_letter_topic {
        Some(topic) => {
            info!("Routing unprocessable messages to {}", topic);
            let worker = DeadLetterWorker::new(
                forward,
                producer.clone(),
                topic.clone(),
                config.producer_flush_timeout_ms.0,
            );
            run_consumer(&config, worker, shutdown_signal, readiness).await
        }
        None => run_consumer(&config, forward, shutdown_signal, readiness).await,
    };

    signal_handle.abort();
    server_handle.abort();

    match result {
        Ok(()) => {
            info!("Batching consumer stopped");
            Ok(())
        }
        Err(e) => {
            error!("Batching consumer failed: {:#}", e);
            Err(e)
        }
    }
}
