//! Batching Kafka consumer.
//!
//! Messages are handed to a [`worker::BatchWorker`] one at a time, their
//! results buffered in a [`batch::Batch`], and each batch is flushed through
//! the worker before its offsets are committed. A crash between flush and
//! commit causes reprocessing, never loss.
//!
//! ## Error logging (anyhow)
//!
//! Log `anyhow::Error` with `{e:#}` so the full cause chain is visible, and
//! build errors with `.context()` / `.with_context()` so the source is kept.

pub mod batch;
pub mod commit;
pub mod commit_log;
pub mod config;
pub mod consumer;
pub mod coordinator;
pub mod kafka;
pub mod rebalance;
pub mod server;
pub mod test_utils;
pub mod time;
pub mod worker;
pub mod workers;

pub use consumer::{BatchingConsumer, ShutdownSignal};
pub use coordinator::FlushCoordinator;
pub use worker::BatchWorker;
