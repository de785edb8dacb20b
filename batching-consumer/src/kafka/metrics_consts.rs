// ==== Batch processing metrics ====
/// Histogram for time spent in the worker's process call, per message (ms)
pub const PROCESS_MESSAGE_MS: &str = "batching_consumer_process_message_ms";

/// Histogram for the mean per-message processing time of a flushed batch (ms)
pub const PROCESS_MESSAGE_NORMALIZED_MS: &str = "batching_consumer_process_message_normalized_ms";

/// Histogram for the worker's flush duration (ms)
pub const BATCH_FLUSH_MS: &str = "batching_consumer_batch_flush_ms";

/// Histogram for the worker's flush duration divided by the number of results (ms)
pub const BATCH_FLUSH_NORMALIZED_MS: &str = "batching_consumer_batch_flush_normalized_ms";

/// Histogram for results handed to the worker per flush
pub const BATCH_RESULTS: &str = "batching_consumer_batch_results";

/// Counter for flushes, labelled by what triggered them
pub const FLUSHES_TOTAL: &str = "batching_consumer_flushes_total";

// ==== Offset commit metrics ====
/// Histogram for synchronous offset commit duration, retries included (ms)
pub const OFFSET_COMMIT_MS: &str = "batching_consumer_offset_commit_ms";

/// Counter for commit attempts that failed with a retryable error
pub const COMMIT_RETRIES_TOTAL: &str = "batching_consumer_commit_retries_total";

/// Counter for commit log records, labelled by status
pub const COMMIT_LOG_RECORDS_TOTAL: &str = "batching_consumer_commit_log_records_total";

// ==== Consumer metrics ====
/// Counter for errors returned from poll, labelled by level and error
pub const KAFKA_ERRORS_TOTAL: &str = "batching_consumer_kafka_errors_total";

/// Counter for rebalance callbacks, labelled by event type
pub const REBALANCE_TOTAL: &str = "batching_consumer_rebalance_total";

/// Counter for rebalance callbacks carrying no partitions
pub const REBALANCE_EMPTY_SKIPPED: &str = "batching_consumer_rebalance_empty_skipped_total";

// ==== Worker metrics ====
/// Counter for messages routed to the dead letter topic
pub const DEAD_LETTER_TOTAL: &str = "batching_consumer_dead_letter_total";

/// Counter for records produced by the forward worker
pub const FORWARDED_RECORDS_TOTAL: &str = "batching_consumer_forwarded_records_total";
