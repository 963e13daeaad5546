//! Durable work queue with consumer-group semantics
//!
//! Entries are appended to named streams and delivered to consumers through
//! groups. A delivered entry stays pending for its consumer until it is
//! acknowledged; pending entries idle for too long can be reclaimed by
//! another consumer. Delivery is at-least-once.

use std::cmp::Ordering;
use std::fmt;
use std::str::FromStr;
use std::time::Duration;

use async_trait::async_trait;
use serde::Serialize;
use serde::de::DeserializeOwned;

pub mod memory;
pub mod redis_stream;

pub use memory::MemoryQueue;
pub use redis_stream::RedisStreamQueue;

/// Field under which the JSON payload is stored
pub const PAYLOAD_FIELD: &str = "data";

#[derive(Debug, thiserror::Error)]
#[non_exhaustive]
pub enum QueueError {
    #[error("Redis error: {0}")]
    Redis(#[from] redis::RedisError),

    #[error("consumer group {group:?} does not exist on stream {stream:?}")]
    NoGroup { stream: String, group: String },

    #[error("invalid entry id {0:?}")]
    InvalidEntryId(String),

    #[error("could not encode payload: {0}")]
    Encode(String),

    #[error("could not decode entry {id}: {reason}")]
    Decode { id: String, reason: String },
}

/// Stream entry identifier, `<milliseconds>-<sequence>`.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Default)]
pub struct EntryId {
    pub ms: u64,
    pub seq: u64,
}

impl EntryId {
    pub const ZERO: EntryId = EntryId { ms: 0, seq: 0 };

    pub fn new(ms: u64, seq: u64) -> Self {
        Self { ms, seq }
    }
}

impl Ord for EntryId {
    fn cmp(&self, other: &Self) -> Ordering {
        (self.ms, self.seq).cmp(&(other.ms, other.seq))
    }
}

impl PartialOrd for EntryId {
    fn partial_cmp(&self, other: &Self) -> Option<Ordering> {
        Some(self.cmp(other))
    }
}

impl fmt::Display for EntryId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}-{}", self.ms, self.seq)
    }
}

impl FromStr for EntryId {
    type Err = QueueError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        let invalid = || QueueError::InvalidEntryId(s.to_string());
        let (ms, seq) = s.split_once('-').ok_or_else(invalid)?;
        Ok(Self {
            ms: ms.parse().map_err(|_| invalid())?,
            seq: seq.parse().map_err(|_| invalid())?,
        })
    }
}

/// Where a group read starts
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ReadCursor {
    /// Entries never delivered to any consumer of the group (`>`)
    New,
    /// This consumer's own delivered-but-unacknowledged entries (`0`)
    History,
}

impl ReadCursor {
    pub fn as_id(&self) -> &'static str {
        match self {
            ReadCursor::New => ">",
            ReadCursor::History => "0",
        }
    }
}

/// An entry as delivered to a consumer. `data` is the raw string stored
/// under [`PAYLOAD_FIELD`].
#[derive(Debug, Clone, PartialEq)]
pub struct QueueEntry {
    pub id: EntryId,
    pub data: Option<String>,
}

impl QueueEntry {
    /// Decode the payload into `T`.
    ///
    /// Payloads are JSON text. Producers that serialized an already
    /// serialized object leave a JSON string behind; exactly one such level
    /// is unwrapped before decoding.
    pub fn decode<T: DeserializeOwned>(&self) -> Result<T, QueueError> {
        let decode_err = |reason: String| QueueError::Decode {
            id: self.id.to_string(),
            reason,
        };

        let raw = self
            .data
            .as_deref()
            .ok_or_else(|| decode_err(format!("missing `{PAYLOAD_FIELD}` field")))?;

        let value: serde_json::Value =
            serde_json::from_str(raw).map_err(|e| decode_err(e.to_string()))?;

        let value = match value {
            serde_json::Value::String(inner) => {
                serde_json::from_str(&inner).map_err(|e| decode_err(e.to_string()))?
            }
            other => other,
        };

        serde_json::from_value(value).map_err(|e| decode_err(e.to_string()))
    }
}

/// Serialize a payload for [`WorkQueue::enqueue`]
pub fn encode<T: Serialize>(payload: &T) -> Result<String, QueueError> {
    serde_json::to_string(payload).map_err(|e| QueueError::Encode(e.to_string()))
}

#[async_trait]
pub trait WorkQueue: Send + Sync {
    /// Append a JSON payload, returning the new entry id
    async fn enqueue(&self, stream: &str, payload: &str) -> Result<EntryId, QueueError>;

    /// Create the group (and the stream) if missing. Creating an existing
    /// group succeeds.
    async fn ensure_group(&self, stream: &str, group: &str) -> Result<(), QueueError>;

    /// Read up to `count` entries for `consumer`. A `New` read waits up to
    /// `block` for entries to arrive; a zero duration does not wait.
    async fn read_group(
        &self,
        stream: &str,
        group: &str,
        consumer: &str,
        count: usize,
        block: Duration,
        cursor: ReadCursor,
    ) -> Result<Vec<QueueEntry>, QueueError>;

    /// Acknowledge an entry. Returns false when the entry was not pending in
    /// the group, which is not an error.
    async fn acknowledge(&self, stream: &str, group: &str, id: EntryId) -> Result<bool, QueueError>;

    /// Transfer up to `count` entries pending for at least `min_idle` to
    /// `consumer`, and return them
    async fn reclaim_stuck(
        &self,
        stream: &str,
        group: &str,
        consumer: &str,
        min_idle: Duration,
        count: usize,
    ) -> Result<Vec<QueueEntry>, QueueError>;

    async fn len(&self, stream: &str) -> Result<usize, QueueError>;

    /// Most recent entries, newest first
    async fn latest(&self, stream: &str, count: usize) -> Result<Vec<QueueEntry>, QueueError>;

    /// Remove the stream together with its groups
    async fn delete_stream(&self, stream: &str) -> Result<(), QueueError>;
}
