//! Shared test helpers for the batching consumer crate.
//!
//! Used by unit tests and by the integration tests under `tests/`.

use std::sync::{Arc, Mutex, MutexGuard};
use std::time::{Duration, Instant};

use rdkafka::error::{KafkaError, RDKafkaErrorCode};
use rdkafka::message::{Headers, OwnedHeaders};

use crate::kafka::producer::{DeliveryError, RecordSink};
use crate::time::TimeSource;

/// A clock that only moves when told to.
pub struct ManualTime {
    now: Mutex<Instant>,
}

impl ManualTime {
    pub fn new() -> Self {
        Self {
            now: Mutex::new(Instant::now()),
        }
    }

    pub fn advance(&self, by: Duration) {
        let mut now = match self.now.lock() {
            Ok(now) => now,
            Err(poisoned) => poisoned.into_inner(),
        };
        *now += by;
    }
}

impl Default for ManualTime {
    fn default() -> Self {
        Self::new()
    }
}

impl TimeSource for ManualTime {
    fn now(&self) -> Instant {
        match self.now.lock() {
            Ok(now) => *now,
            Err(poisoned) => *poisoned.into_inner(),
        }
    }
}

/// A record captured by `RecordingSink`
#[derive(Debug, Clone)]
pub struct SentRecord {
    pub topic: String,
    pub key: Option<Vec<u8>>,
    pub payload: Vec<u8>,
    pub headers: Vec<(String, Vec<u8>)>,
}

impl SentRecord {
    pub fn header(&self, key: &str) -> Option<&[u8]> {
        self.headers
            .iter()
            .find(|(k, _)| k == key)
            .map(|(_, v)| v.as_slice())
    }
}

#[derive(Default)]
struct SinkState {
    enqueued: Vec<SentRecord>,
    delivered: Vec<SentRecord>,
    fail_deliveries: bool,
    flushes: usize,
}

/// In-memory `RecordSink`. Records move from enqueued to delivered on flush;
/// clones share state, so a test can keep one while the code under test owns
/// another.
#[derive(Clone, Default)]
pub struct RecordingSink {
    state: Arc<Mutex<SinkState>>,
}

impl RecordingSink {
    pub fn new() -> Self {
        Self::default()
    }

    fn state(&self) -> MutexGuard<'_, SinkState> {
        match self.state.lock() {
            Ok(state) => state,
            Err(poisoned) => poisoned.into_inner(),
        }
    }

    /// Make every following poll or flush with records outstanding report a
    /// failed delivery.
    pub fn fail_deliveries(&self) {
        self.state().fail_deliveries = true;
    }

    pub fn enqueued(&self) -> Vec<SentRecord> {
        self.state().enqueued.clone()
    }

    pub fn delivered(&self) -> Vec<SentRecord> {
        self.state().delivered.clone()
    }

    pub fn flushes(&self) -> usize {
        self.state().flushes
    }
}

impl RecordSink for RecordingSink {
    fn send(
        &self,
        topic: &str,
        key: Option<&[u8]>,
        payload: &[u8],
        headers: Option<OwnedHeaders>,
    ) -> Result<(), DeliveryError> {
        let headers = headers
            .map(|headers| {
                headers
                    .iter()
                    .map(|h| (h.key.to_string(), h.value.unwrap_or_default().to_vec()))
                    .collect()
            })
            .unwrap_or_default();

        self.state().enqueued.push(SentRecord {
            topic: topic.to_string(),
            key: key.map(|k| k.to_vec()),
            payload: payload.to_vec(),
            headers,
        });
        Ok(())
    }

    fn poll(&self) -> Result<(), DeliveryError> {
        let state = self.state();
        if state.fail_deliveries && !state.enqueued.is_empty() {
            return Err(DeliveryError::Delivery(KafkaError::MessageProduction(
                RDKafkaErrorCode::MessageTimedOut,
            )));
        }
        Ok(())
    }

    fn flush(&self, _timeout: Duration) -> Result<(), DeliveryError> {
        let mut state = self.state();
        state.flushes += 1;
        if state.fail_deliveries && !state.enqueued.is_empty() {
            return Err(DeliveryError::Delivery(KafkaError::MessageProduction(
                RDKafkaErrorCode::MessageTimedOut,
            )));
        }
        let enqueued = std::mem::take(&mut state.enqueued);
        state.delivered.extend(enqueued);
        Ok(())
    }
}
