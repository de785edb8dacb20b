use std::sync::Arc;
use std::time::{Duration, Instant};

use anyhow::{Context, Result};
use tracing::{debug, info};

use crate::batch::Batch;
use crate::commit::CommitRetryPolicy;
use crate::commit_log::CommitLogPublisher;
use crate::kafka::broker::OffsetCommitter;
use crate::kafka::message::KafkaMessage;
use crate::kafka::metrics_consts::{
    BATCH_FLUSH_MS, BATCH_FLUSH_NORMALIZED_MS, BATCH_RESULTS, FLUSHES_TOTAL, OFFSET_COMMIT_MS,
    PROCESS_MESSAGE_MS, PROCESS_MESSAGE_NORMALIZED_MS,
};
use crate::time::TimeSource;
use crate::worker::BatchWorker;

/// Why a flush was started
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum FlushTrigger {
    Forced,
    Size,
    Time,
}

impl FlushTrigger {
    pub fn as_str(&self) -> &'static str {
        match self {
            FlushTrigger::Forced => "forced",
            FlushTrigger::Size => "size",
            FlushTrigger::Time => "time",
        }
    }
}

/// Owns the worker and the current batch, and runs each flush cycle:
/// worker flush, then offset commit, then commit log, then reset.
///
/// The worker's flush always returns before the commit is attempted. A
/// failure anywhere in the cycle leaves the batch untouched and is returned
/// to the caller.
pub struct FlushCoordinator<W: BatchWorker> {
    worker: W,
    batch: Batch<W::Output>,
    max_batch_size: usize,
    retry_policy: CommitRetryPolicy,
    commit_log: Option<CommitLogPublisher>,
    time_source: Arc<dyn TimeSource>,
}

impl<W: BatchWorker> FlushCoordinator<W> {
    pub fn new(
        worker: W,
        max_batch_size: usize,
        max_batch_time: Duration,
        time_source: Arc<dyn TimeSource>,
    ) -> Self {
        Self {
            worker,
            batch: Batch::new(max_batch_time),
            max_batch_size,
            retry_policy: CommitRetryPolicy::default(),
            commit_log: None,
            time_source,
        }
    }

    pub fn with_retry_policy(mut self, retry_policy: CommitRetryPolicy) -> Self {
        self.retry_policy = retry_policy;
        self
    }

    pub fn with_commit_log(mut self, commit_log: CommitLogPublisher) -> Self {
        self.commit_log = Some(commit_log);
        self
    }

    pub fn batch(&self) -> &Batch<W::Output> {
        &self.batch
    }

    pub fn worker(&self) -> &W {
        &self.worker
    }

    pub fn worker_mut(&mut self) -> &mut W {
        &mut self.worker
    }

    /// What would trigger a flush right now, if anything. An empty batch
    /// never flushes, even when forced.
    pub fn flush_trigger(&self, force: bool) -> Option<FlushTrigger> {
        if self.batch.is_empty() {
            return None;
        }

        if force {
            Some(FlushTrigger::Forced)
        } else if self.batch.result_count() >= self.max_batch_size {
            Some(FlushTrigger::Size)
        } else if self
            .batch
            .deadline()
            .is_some_and(|deadline| self.time_source.now() > deadline)
        {
            Some(FlushTrigger::Time)
        } else {
            None
        }
    }

    pub fn should_flush(&self, force: bool) -> bool {
        self.flush_trigger(force).is_some()
    }

    /// Hand one message to the worker and record the outcome in the batch.
    pub fn handle_message(&mut self, message: &KafkaMessage) -> Result<()> {
        let seen_at = self.time_source.now();
        let start = Instant::now();
        let result = self.worker.process_message(message).with_context(|| {
            format!(
                "Worker failed to process message at {}:{}",
                message.get_topic_partition(),
                message.get_offset()
            )
        })?;
        let duration = start.elapsed();

        self.batch.append(
            message.get_topic_partition(),
            message.get_offset(),
            result,
            seen_at,
        );
        self.batch.add_processing_time(duration);
        metrics::histogram!(PROCESS_MESSAGE_MS).record(duration.as_secs_f64() * 1000.0);

        Ok(())
    }

    /// Flush the batch if a trigger fires. Returns whether a flush happened.
    pub fn flush(&mut self, committer: &dyn OffsetCommitter, force: bool) -> Result<bool> {
        let Some(trigger) = self.flush_trigger(force) else {
            return Ok(false);
        };

        info!(
            "Flushing {} items (from {:?}): forced:{} size:{} time:{}",
            self.batch.result_count(),
            self.batch.offsets(),
            trigger == FlushTrigger::Forced,
            trigger == FlushTrigger::Size,
            trigger == FlushTrigger::Time,
        );
        metrics::counter!(FLUSHES_TOTAL, "trigger" => trigger.as_str()).increment(1);
        metrics::histogram!(PROCESS_MESSAGE_NORMALIZED_MS).record(
            self.batch.processing_time().as_secs_f64() * 1000.0
                / self.batch.messages_processed() as f64,
        );

        let result_count = self.batch.result_count();
        if result_count > 0 {
            let start = Instant::now();
            self.worker
                .flush_batch(self.batch.results())
                .context("Worker failed to flush batch")?;
            let duration = start.elapsed();
            let duration_ms = duration.as_secs_f64() * 1000.0;

            info!("Worker flush took {:?}", duration);
            metrics::histogram!(BATCH_FLUSH_MS).record(duration_ms);
            metrics::histogram!(BATCH_FLUSH_NORMALIZED_MS).record(duration_ms / result_count as f64);
            metrics::histogram!(BATCH_RESULTS).record(result_count as f64);
        }

        let positions = self.batch.commit_positions();
        let start = Instant::now();
        let committed = self
            .retry_policy
            .commit(committer, &positions)
            .context("Failed to commit offsets")?;
        let duration = start.elapsed();
        debug!("Offset commit took {:?}", duration);
        metrics::histogram!(OFFSET_COMMIT_MS).record(duration.as_secs_f64() * 1000.0);

        if let Some(commit_log) = &self.commit_log {
            commit_log.publish(&committed)?;
        }

        self.batch.reset();
        debug!("Reset batch");

        Ok(true)
    }

    /// Drop the current batch without flushing or committing. Its messages
    /// are redelivered after a restart since their offsets were never
    /// committed.
    pub fn discard(&mut self) {
        if !self.batch.is_empty() {
            info!(
                "Discarding {} unflushed messages",
                self.batch.messages_processed()
            );
        }
        self.batch.reset();
    }

    /// Serve commit log delivery reports, raising the first failure.
    pub fn poll_commit_log(&self) -> Result<()> {
        match &self.commit_log {
            Some(commit_log) => commit_log.poll(),
            None => Ok(()),
        }
    }

    pub fn flush_commit_log(&self, timeout: Duration) -> Result<()> {
        match &self.commit_log {
            Some(commit_log) => commit_log.flush(timeout),
            None => Ok(()),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::kafka::types::{CommittedOffset, Partition};
    use crate::test_utils::ManualTime;
    use anyhow::anyhow;
    use rdkafka::error::{KafkaError, KafkaResult, RDKafkaErrorCode};
    use std::sync::Mutex;

    #[derive(Default)]
    struct EchoWorker {
        flushed: Vec<Vec<i64>>,
        fail_flush: bool,
    }

    impl BatchWorker for EchoWorker {
        type Output = i64;

        fn process_message(&mut self, message: &KafkaMessage) -> Result<Option<i64>> {
            match message.payload.as_deref() {
                Some(b"skip") => Ok(None),
                Some(b"boom") => Err(anyhow!("cannot process")),
                _ => Ok(Some(message.get_offset())),
            }
        }

        fn flush_batch(&mut self, batch: &[i64]) -> Result<()> {
            if self.fail_flush {
                return Err(anyhow!("store unavailable"));
            }
            self.flushed.push(batch.to_vec());
            Ok(())
        }
    }

    #[derive(Default)]
    struct RecordingCommitter {
        commits: Mutex<Vec<Vec<(Partition, i64)>>>,
        fail_with: Option<RDKafkaErrorCode>,
    }

    impl OffsetCommitter for RecordingCommitter {
        fn commit_offsets(
            &self,
            offsets: &[(Partition, i64)],
        ) -> KafkaResult<Vec<CommittedOffset>> {
            self.commits.lock().unwrap().push(offsets.to_vec());
            if let Some(code) = self.fail_with {
                return Err(KafkaError::ConsumerCommit(code));
            }
            Ok(offsets
                .iter()
                .map(|(p, o)| CommittedOffset::new(p.clone(), *o))
                .collect())
        }
    }

    fn message(partition: i32, offset: i64, payload: &str) -> KafkaMessage {
        KafkaMessage::new(
            Partition::new("events".to_string(), partition),
            offset,
            None,
            Some(payload.as_bytes().to_vec()),
            None,
            None,
        )
    }

    fn coordinator(
        max_batch_size: usize,
        max_batch_time: Duration,
    ) -> (FlushCoordinator<EchoWorker>, Arc<ManualTime>) {
        let time = Arc::new(ManualTime::new());
        let coordinator = FlushCoordinator::new(
            EchoWorker::default(),
            max_batch_size,
            max_batch_time,
            time.clone(),
        )
        .with_retry_policy(CommitRetryPolicy::new(3, Duration::ZERO));
        (coordinator, time)
    }

    #[test]
    fn test_empty_batch_never_flushes() {
        let (mut coordinator, _) = coordinator(1, Duration::from_secs(1));
        let committer = RecordingCommitter::default();

        assert!(!coordinator.should_flush(false));
        assert!(!coordinator.should_flush(true));
        assert!(!coordinator.flush(&committer, true).unwrap());
        assert!(committer.commits.lock().unwrap().is_empty());
        assert!(coordinator.worker().flushed.is_empty());
    }

    #[test]
    fn test_size_trigger() {
        let (mut coordinator, _) = coordinator(2, Duration::from_secs(60));

        coordinator.handle_message(&message(0, 1, "a")).unwrap();
        assert_eq!(coordinator.flush_trigger(false), None);

        coordinator.handle_message(&message(0, 2, "b")).unwrap();
        assert_eq!(coordinator.flush_trigger(false), Some(FlushTrigger::Size));
    }

    #[test]
    fn test_time_trigger_needs_now_past_deadline() {
        let (mut coordinator, time) = coordinator(100, Duration::from_millis(1000));

        coordinator.handle_message(&message(0, 1, "a")).unwrap();
        time.advance(Duration::from_millis(1000));
        // strictly after the deadline
        assert_eq!(coordinator.flush_trigger(false), None);

        time.advance(Duration::from_millis(1));
        assert_eq!(coordinator.flush_trigger(false), Some(FlushTrigger::Time));
    }

    #[test]
    fn test_absent_results_do_not_count_towards_size() {
        let (mut coordinator, time) = coordinator(1, Duration::from_millis(100));

        coordinator.handle_message(&message(0, 1, "skip")).unwrap();

        assert_eq!(coordinator.batch().messages_processed(), 1);
        assert_eq!(coordinator.batch().result_count(), 0);
        assert_eq!(coordinator.flush_trigger(false), None);

        time.advance(Duration::from_millis(101));
        assert_eq!(coordinator.flush_trigger(false), Some(FlushTrigger::Time));
    }

    #[test]
    fn test_flush_writes_then_commits_next_offsets() {
        let (mut coordinator, _) = coordinator(3, Duration::from_secs(60));
        let committer = RecordingCommitter::default();

        coordinator.handle_message(&message(0, 10, "a")).unwrap();
        coordinator.handle_message(&message(1, 4, "b")).unwrap();
        coordinator.handle_message(&message(0, 11, "c")).unwrap();

        assert!(coordinator.flush(&committer, false).unwrap());

        assert_eq!(coordinator.worker().flushed, vec![vec![10, 4, 11]]);
        assert_eq!(
            *committer.commits.lock().unwrap(),
            vec![vec![
                (Partition::new("events".to_string(), 0), 12),
                (Partition::new("events".to_string(), 1), 5),
            ]]
        );
        assert!(coordinator.batch().is_empty());
    }

    #[test]
    fn test_forced_flush_without_results_commits_only() {
        let (mut coordinator, _) = coordinator(10, Duration::from_secs(60));
        let committer = RecordingCommitter::default();

        coordinator.handle_message(&message(0, 7, "skip")).unwrap();
        assert!(coordinator.flush(&committer, true).unwrap());

        assert!(coordinator.worker().flushed.is_empty());
        assert_eq!(committer.commits.lock().unwrap().len(), 1);
        assert!(coordinator.batch().is_empty());
    }

    #[test]
    fn test_worker_flush_failure_skips_commit_and_keeps_batch() {
        let (mut coordinator, _) = coordinator(1, Duration::from_secs(60));
        coordinator.worker_mut().fail_flush = true;
        let committer = RecordingCommitter::default();

        coordinator.handle_message(&message(0, 1, "a")).unwrap();

        assert!(coordinator.flush(&committer, false).is_err());
        assert!(committer.commits.lock().unwrap().is_empty());
        assert_eq!(coordinator.batch().messages_processed(), 1);
    }

    #[test]
    fn test_non_retryable_commit_failure_is_raised() {
        let (mut coordinator, _) = coordinator(1, Duration::from_secs(60));
        let committer = RecordingCommitter {
            fail_with: Some(RDKafkaErrorCode::UnknownMemberId),
            ..Default::default()
        };

        coordinator.handle_message(&message(0, 1, "a")).unwrap();

        assert!(coordinator.flush(&committer, false).is_err());
        assert_eq!(committer.commits.lock().unwrap().len(), 1);
        assert_eq!(coordinator.worker().flushed.len(), 1);
    }

    #[test]
    fn test_process_error_is_raised_and_not_appended() {
        let (mut coordinator, _) = coordinator(10, Duration::from_secs(60));

        assert!(coordinator.handle_message(&message(0, 1, "boom")).is_err());
        assert!(coordinator.batch().is_empty());
    }

    #[test]
    fn test_discard_drops_batch() {
        let (mut coordinator, _) = coordinator(10, Duration::from_secs(60));

        coordinator.handle_message(&message(0, 1, "a")).unwrap();
        coordinator.discard();

        assert!(coordinator.batch().is_empty());
        assert!(coordinator.worker().flushed.is_empty());
    }
}
