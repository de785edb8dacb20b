use std::fmt;

use rdkafka::topic_partition_list::TopicPartitionListElem;
use rdkafka::Offset;

// Raw librdkafka values for the logical offsets. These never name a real
// position in a partition and are never published to the commit log.
pub const OFFSET_BEGINNING: i64 = -2;
pub const OFFSET_END: i64 = -1;
pub const OFFSET_STORED: i64 = -1000;
pub const OFFSET_INVALID: i64 = -1001;
const OFFSET_TAIL_BASE: i64 = -2000;

pub const LOGICAL_OFFSETS: [i64; 4] = [
    OFFSET_BEGINNING,
    OFFSET_END,
    OFFSET_STORED,
    OFFSET_INVALID,
];

#[derive(Debug, Clone, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub struct Partition {
    topic: String,
    partition_number: i32,
}

impl Partition {
    pub fn new(topic: String, partition_number: i32) -> Self {
        Self {
            topic,
            partition_number,
        }
    }

    pub fn topic(&self) -> &str {
        &self.topic
    }

    pub fn partition_number(&self) -> i32 {
        self.partition_number
    }
}

impl fmt::Display for Partition {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}/{}", self.topic, self.partition_number)
    }
}

impl From<TopicPartitionListElem<'_>> for Partition {
    fn from(elem: TopicPartitionListElem<'_>) -> Self {
        Self::new(elem.topic().to_string(), elem.partition())
    }
}

/// A partition offset as reported back by a successful commit.
///
/// The offset is kept in its raw form so callers can tell real positions
/// apart from the logical sentinels.
#[derive(Debug, Clone, PartialEq, Eq, Hash)]
pub struct CommittedOffset {
    partition: Partition,
    offset: i64,
}

impl CommittedOffset {
    pub fn new(partition: Partition, offset: i64) -> Self {
        Self { partition, offset }
    }

    pub fn partition(&self) -> &Partition {
        &self.partition
    }

    pub fn topic(&self) -> &str {
        self.partition.topic()
    }

    pub fn partition_number(&self) -> i32 {
        self.partition.partition_number()
    }

    pub fn offset(&self) -> i64 {
        self.offset
    }

    pub fn is_logical(&self) -> bool {
        LOGICAL_OFFSETS.contains(&self.offset)
    }
}

impl From<TopicPartitionListElem<'_>> for CommittedOffset {
    fn from(elem: TopicPartitionListElem<'_>) -> Self {
        let offset = raw_offset(elem.offset());
        Self::new(Partition::from(elem), offset)
    }
}

/// Maps an rdkafka offset back onto librdkafka's raw representation.
pub fn raw_offset(offset: Offset) -> i64 {
    match offset {
        Offset::Beginning => OFFSET_BEGINNING,
        Offset::End => OFFSET_END,
        Offset::Stored => OFFSET_STORED,
        Offset::Invalid => OFFSET_INVALID,
        Offset::Offset(n) => n,
        Offset::OffsetTail(n) => OFFSET_TAIL_BASE - n,
    }
}
