#![allow(dead_code)]

use std::collections::VecDeque;
use std::sync::{Arc, Mutex};
use std::time::Duration;

use anyhow::{anyhow, Result};
use rdkafka::error::{KafkaError, KafkaResult, RDKafkaErrorCode};

use batching_consumer::commit::CommitRetryPolicy;
use batching_consumer::commit_log::CommitLogPublisher;
use batching_consumer::consumer::{BatchingConsumer, ShutdownSignal};
use batching_consumer::coordinator::FlushCoordinator;
use batching_consumer::kafka::{
    BrokerConsumer, CommittedOffset, KafkaMessage, OffsetCommitter, Partition, RebalanceHandler,
};
use batching_consumer::rebalance::BatchRebalanceHandler;
use batching_consumer::test_utils::{ManualTime, RecordingSink};
use batching_consumer::worker::BatchWorker;

pub const TOPIC: &str = "events";
pub const GROUP: &str = "batching-test";

/// Everything observable that happens during a run, in order.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Call {
    Poll,
    Delivered(i32, i64),
    Process(i64),
    Flush(Vec<i64>),
    CommitAttempt(Vec<(Partition, i64)>),
    RevokeStart,
    RevokeEnd,
    Close,
}

pub type CallLog = Arc<Mutex<Vec<Call>>>;

/// What the fake broker does on each poll.
pub enum PollEvent {
    Message(KafkaMessage),
    Error(KafkaError),
    Revoke(Vec<Partition>),
    AdvanceTime(Duration),
    Nothing,
}

pub fn partition(n: i32) -> Partition {
    Partition::new(TOPIC.to_string(), n)
}

pub fn message(partition_number: i32, offset: i64, payload: &str) -> PollEvent {
    PollEvent::Message(KafkaMessage::new(
        partition(partition_number),
        offset,
        None,
        Some(payload.as_bytes().to_vec()),
        None,
        None,
    ))
}

pub fn retryable_commit_error() -> KafkaResult<()> {
    Err(KafkaError::ConsumerCommit(RDKafkaErrorCode::RequestTimedOut))
}

/// A scripted group consumer. Each poll plays the next event; once the script
/// runs out the shutdown signal is raised, so `run` returns on its own.
pub struct FakeBroker {
    events: Mutex<VecDeque<PollEvent>>,
    commit_responses: Mutex<VecDeque<KafkaResult<()>>>,
    calls: CallLog,
    handler: Arc<dyn RebalanceHandler>,
    time: Arc<ManualTime>,
    shutdown: ShutdownSignal,
}

impl FakeBroker {
    fn log(&self, call: Call) {
        self.calls.lock().unwrap().push(call);
    }
}

impl OffsetCommitter for FakeBroker {
    fn commit_offsets(&self, offsets: &[(Partition, i64)]) -> KafkaResult<Vec<CommittedOffset>> {
        self.log(Call::CommitAttempt(offsets.to_vec()));
        let response = self
            .commit_responses
            .lock()
            .unwrap()
            .pop_front()
            .unwrap_or(Ok(()));
        response?;
        Ok(offsets
            .iter()
            .map(|(p, o)| CommittedOffset::new(p.clone(), *o))
            .collect())
    }
}

impl BrokerConsumer for FakeBroker {
    fn poll_message(&self, _timeout: Duration) -> Option<KafkaResult<KafkaMessage>> {
        self.log(Call::Poll);
        let event = self.events.lock().unwrap().pop_front();
        match event {
            Some(PollEvent::Message(message)) => {
                self.log(Call::Delivered(
                    message.partition_number(),
                    message.get_offset(),
                ));
                Some(Ok(message))
            }
            Some(PollEvent::Error(e)) => Some(Err(e)),
            Some(PollEvent::Revoke(partitions)) => {
                self.log(Call::RevokeStart);
                self.handler.on_partitions_revoked(self, &partitions);
                self.log(Call::RevokeEnd);
                None
            }
            Some(PollEvent::AdvanceTime(by)) => {
                self.time.advance(by);
                None
            }
            Some(PollEvent::Nothing) => None,
            None => {
                self.shutdown.signal();
                None
            }
        }
    }

    fn close(&self) {
        self.log(Call::Close);
    }
}

/// Worker whose results are the offsets of the messages it saw. Payload
/// `skip` yields no result and `boom` fails. The first `failing_flushes`
/// flushes fail after being recorded.
pub struct RecordingWorker {
    calls: CallLog,
    failing_flushes: usize,
}

impl BatchWorker for RecordingWorker {
    type Output = i64;

    fn process_message(&mut self, message: &KafkaMessage) -> Result<Option<i64>> {
        self.calls
            .lock()
            .unwrap()
            .push(Call::Process(message.get_offset()));
        match message.payload.as_deref() {
            Some(b"skip") => Ok(None),
            Some(b"boom") => Err(anyhow!("cannot process offset {}", message.get_offset())),
            _ => Ok(Some(message.get_offset())),
        }
    }

    fn flush_batch(&mut self, batch: &[i64]) -> Result<()> {
        self.calls.lock().unwrap().push(Call::Flush(batch.to_vec()));
        if self.failing_flushes > 0 {
            self.failing_flushes -= 1;
            return Err(anyhow!("store down"));
        }
        Ok(())
    }
}

pub struct HarnessBuilder {
    max_batch_size: usize,
    max_batch_time: Duration,
    events: Vec<PollEvent>,
    commit_responses: Vec<KafkaResult<()>>,
    commit_log: Option<RecordingSink>,
    max_retries: u32,
    failing_flushes: usize,
}

impl HarnessBuilder {
    pub fn new(max_batch_size: usize, max_batch_time: Duration) -> Self {
        Self {
            max_batch_size,
            max_batch_time,
            events: vec![],
            commit_responses: vec![],
            commit_log: None,
            max_retries: 3,
            failing_flushes: 0,
        }
    }

    pub fn events(mut self, events: Vec<PollEvent>) -> Self {
        self.events = events;
        self
    }

    pub fn commit_responses(mut self, responses: Vec<KafkaResult<()>>) -> Self {
        self.commit_responses = responses;
        self
    }

    pub fn commit_log(mut self, sink: RecordingSink) -> Self {
        self.commit_log = Some(sink);
        self
    }

    pub fn max_retries(mut self, max_retries: u32) -> Self {
        self.max_retries = max_retries;
        self
    }

    pub fn failing_flushes(mut self, failing_flushes: usize) -> Self {
        self.failing_flushes = failing_flushes;
        self
    }

    pub fn build(self) -> Harness {
        let calls: CallLog = Arc::new(Mutex::new(vec![]));
        let time = Arc::new(ManualTime::new());
        let shutdown = ShutdownSignal::default();

        let mut coordinator = FlushCoordinator::new(
            RecordingWorker {
                calls: calls.clone(),
                failing_flushes: self.failing_flushes,
            },
            self.max_batch_size,
            self.max_batch_time,
            time.clone(),
        )
        .with_retry_policy(CommitRetryPolicy::new(self.max_retries, Duration::ZERO));
        if let Some(sink) = self.commit_log {
            coordinator = coordinator.with_commit_log(CommitLogPublisher::new(
                Box::new(sink),
                "commit-log".to_string(),
                GROUP.to_string(),
            ));
        }

        let handler = Arc::new(BatchRebalanceHandler::new(Arc::new(Mutex::new(
            coordinator,
        ))));
        let broker = FakeBroker {
            events: Mutex::new(self.events.into()),
            commit_responses: Mutex::new(self.commit_responses.into()),
            calls: calls.clone(),
            handler: handler.clone(),
            time: time.clone(),
            shutdown: shutdown.clone(),
        };

        let consumer = BatchingConsumer::new(broker, handler, Duration::from_millis(10))
            .with_shutdown_signal(shutdown);

        Harness {
            consumer,
            calls,
            time,
        }
    }
}

pub struct Harness {
    pub consumer: BatchingConsumer<FakeBroker, RecordingWorker>,
    pub calls: CallLog,
    pub time: Arc<ManualTime>,
}

impl Harness {
    pub fn calls(&self) -> Vec<Call> {
        self.calls.lock().unwrap().clone()
    }

    pub fn flushes(&self) -> Vec<Vec<i64>> {
        self.calls()
            .into_iter()
            .filter_map(|call| match call {
                Call::Flush(batch) => Some(batch),
                _ => None,
            })
            .collect()
    }

    pub fn commit_attempts(&self) -> Vec<Vec<(Partition, i64)>> {
        self.calls()
            .into_iter()
            .filter_map(|call| match call {
                Call::CommitAttempt(offsets) => Some(offsets),
                _ => None,
            })
            .collect()
    }

    pub fn position(&self, wanted: &Call) -> Option<usize> {
        self.calls().iter().position(|call| call == wanted)
    }

    pub fn messages_processed(&self) -> usize {
        self.consumer
            .handler()
            .lock()
            .unwrap()
            .batch()
            .messages_processed()
    }

    pub fn result_count(&self) -> usize {
        self.consumer
            .handler()
            .lock()
            .unwrap()
            .batch()
            .result_count()
    }
}
