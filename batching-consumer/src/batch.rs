use std::collections::BTreeMap;
use std::time::{Duration, Instant};

use crate::kafka::types::Partition;

/// Lowest and highest offsets seen for one partition in the current batch.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct OffsetRange {
    pub low: i64,
    pub high: i64,
}

/// In-memory accumulator of processed results awaiting flush and commit.
///
/// Owned exclusively by the consumer loop. Every field is cleared together
/// by `reset`, which swaps in a fresh batch.
#[derive(Debug)]
pub struct Batch<R> {
    results: Vec<R>,
    offsets: BTreeMap<Partition, OffsetRange>,
    deadline: Option<Instant>,
    messages_processed: usize,
    // time spent inside the worker for this batch, not time spent waiting on poll
    processing_time: Duration,
    max_batch_time: Duration,
}

impl<R> Batch<R> {
    pub fn new(max_batch_time: Duration) -> Self {
        Self {
            results: vec![],
            offsets: BTreeMap::new(),
            deadline: None,
            messages_processed: 0,
            processing_time: Duration::ZERO,
            max_batch_time,
        }
    }

    /// Record one message handed to the worker.
    ///
    /// `seen_at` is when the message was picked up; the first message since
    /// the last reset fixes the batch deadline at `seen_at + max_batch_time`.
    pub fn append(&mut self, partition: &Partition, offset: i64, result: Option<R>, seen_at: Instant) {
        if self.deadline.is_none() {
            self.deadline = Some(seen_at + self.max_batch_time);
        }

        self.messages_processed += 1;
        if let Some(result) = result {
            self.results.push(result);
        }

        match self.offsets.get_mut(partition) {
            Some(range) => {
                range.high = range.high.max(offset);
            }
            None => {
                self.offsets.insert(
                    partition.clone(),
                    OffsetRange {
                        low: offset,
                        high: offset,
                    },
                );
            }
        }
    }

    pub fn add_processing_time(&mut self, duration: Duration) {
        self.processing_time += duration;
    }

    pub fn reset(&mut self) {
        *self = Batch::new(self.max_batch_time);
    }

    pub fn is_empty(&self) -> bool {
        self.messages_processed == 0
    }

    pub fn messages_processed(&self) -> usize {
        self.messages_processed
    }

    pub fn results(&self) -> &[R] {
        &self.results
    }

    pub fn result_count(&self) -> usize {
        self.results.len()
    }

    pub fn offsets(&self) -> &BTreeMap<Partition, OffsetRange> {
        &self.offsets
    }

    pub fn deadline(&self) -> Option<Instant> {
        self.deadline
    }

    pub fn processing_time(&self) -> Duration {
        self.processing_time
    }

    /// `(partition, next offset to read)` for every partition in the batch
    pub fn commit_positions(&self) -> Vec<(Partition, i64)> {
        self.offsets
            .iter()
            .map(|(partition, range)| (partition.clone(), range.high + 1))
            .collect()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn partition(n: i32) -> Partition {
        Partition::new("events".to_string(), n)
    }

    #[test]
    fn test_new_batch_is_empty() {
        let batch: Batch<u32> = Batch::new(Duration::from_secs(1));

        assert!(batch.is_empty());
        assert_eq!(batch.messages_processed(), 0);
        assert_eq!(batch.result_count(), 0);
        assert!(batch.deadline().is_none());
        assert!(batch.offsets().is_empty());
        assert!(batch.commit_positions().is_empty());
    }

    #[test]
    fn test_deadline_is_fixed_by_first_message() {
        let mut batch = Batch::new(Duration::from_millis(500));
        let t0 = Instant::now();

        batch.append(&partition(0), 10, Some("a"), t0);
        batch.append(&partition(0), 11, Some("b"), t0 + Duration::from_millis(300));

        assert_eq!(batch.deadline(), Some(t0 + Duration::from_millis(500)));
    }

    #[test]
    fn test_absent_results_still_count_as_processed() {
        let mut batch = Batch::new(Duration::from_secs(1));
        let now = Instant::now();

        batch.append(&partition(0), 1, Some(1), now);
        batch.append(&partition(0), 2, None, now);
        batch.append(&partition(1), 7, None, now);

        assert!(!batch.is_empty());
        assert_eq!(batch.messages_processed(), 3);
        assert_eq!(batch.results(), &[1]);
        assert_eq!(batch.offsets().len(), 2);
    }

    #[test]
    fn test_offset_ranges_track_low_and_high() {
        let mut batch: Batch<()> = Batch::new(Duration::from_secs(1));
        let now = Instant::now();

        batch.append(&partition(0), 100, None, now);
        batch.append(&partition(0), 101, None, now);
        batch.append(&partition(0), 105, None, now);
        // high never moves backwards within a batch
        batch.append(&partition(0), 103, None, now);
        batch.append(&partition(2), 5, None, now);

        assert_eq!(
            batch.offsets().get(&partition(0)),
            Some(&OffsetRange {
                low: 100,
                high: 105
            })
        );
        assert_eq!(
            batch.offsets().get(&partition(2)),
            Some(&OffsetRange { low: 5, high: 5 })
        );
        assert_eq!(
            batch.commit_positions(),
            vec![(partition(0), 106), (partition(2), 6)]
        );
    }

    #[test]
    fn test_reset_clears_everything() {
        let mut batch = Batch::new(Duration::from_secs(1));
        let now = Instant::now();

        batch.append(&partition(0), 1, Some("x"), now);
        batch.add_processing_time(Duration::from_millis(4));
        batch.reset();

        assert!(batch.is_empty());
        assert_eq!(batch.result_count(), 0);
        assert!(batch.offsets().is_empty());
        assert!(batch.deadline().is_none());
        assert_eq!(batch.processing_time(), Duration::ZERO);

        // the deadline is armed again by the next message
        let later = now + Duration::from_secs(10);
        batch.append(&partition(0), 2, Some("y"), later);
        assert_eq!(batch.deadline(), Some(later + Duration::from_secs(1)));
    }
}
