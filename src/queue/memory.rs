//! In-process queue with the same consumer-group semantics as Redis streams.
//! Used by tests and dry runs.

use std::collections::{BTreeMap, HashMap};
use std::time::Duration;

use async_trait::async_trait;
use chrono::Utc;
use tokio::sync::{Mutex, Notify};
use tokio::time::Instant;

use super::{EntryId, QueueEntry, QueueError, ReadCursor, WorkQueue};

#[derive(Debug)]
struct PendingEntry {
    consumer: String,
    delivered_at: Instant,
    delivery_count: u32,
}

#[derive(Debug, Default)]
struct Group {
    last_delivered: EntryId,
    pending: BTreeMap<EntryId, PendingEntry>,
}

#[derive(Debug, Default)]
struct Stream {
    entries: BTreeMap<EntryId, String>,
    last_id: EntryId,
    groups: HashMap<String, Group>,
}

impl Stream {
    fn next_id(&mut self) -> EntryId {
        let now_ms = Utc::now().timestamp_millis().max(0) as u64;
        let id = if now_ms > self.last_id.ms {
            EntryId::new(now_ms, 0)
        } else {
            EntryId::new(self.last_id.ms, self.last_id.seq + 1)
        };
        self.last_id = id;
        id
    }

    fn entry(&self, id: EntryId) -> QueueEntry {
        QueueEntry {
            id,
            data: self.entries.get(&id).cloned(),
        }
    }
}

#[derive(Debug, Default)]
pub struct MemoryQueue {
    streams: Mutex<HashMap<String, Stream>>,
    appended: Notify,
}

impl MemoryQueue {
    pub fn new() -> Self {
        Self::default()
    }

    /// Number of entries pending in a group, across all consumers
    pub async fn pending_count(&self, stream: &str, group: &str) -> usize {
        let streams = self.streams.lock().await;
        streams
            .get(stream)
            .and_then(|s| s.groups.get(group))
            .map(|g| g.pending.len())
            .unwrap_or(0)
    }

    /// How many times an entry has been handed to a consumer
    pub async fn delivery_count(&self, stream: &str, group: &str, id: EntryId) -> Option<u32> {
        let streams = self.streams.lock().await;
        streams
            .get(stream)
            .and_then(|s| s.groups.get(group))
            .and_then(|g| g.pending.get(&id))
            .map(|p| p.delivery_count)
    }

    async fn deliver(
        &self,
        stream: &str,
        group: &str,
        consumer: &str,
        count: usize,
        cursor: ReadCursor,
    ) -> Result<Vec<QueueEntry>, QueueError> {
        let mut streams = self.streams.lock().await;
        let no_group = || QueueError::NoGroup {
            stream: stream.to_string(),
            group: group.to_string(),
        };
        let state = streams.get_mut(stream).ok_or_else(no_group)?;
        let Stream {
            entries, groups, ..
        } = state;
        let group_state = groups.get_mut(group).ok_or_else(no_group)?;
        let now = Instant::now();

        let ids: Vec<EntryId> = match cursor {
            ReadCursor::New => entries
                .range(group_state.last_delivered..)
                .map(|(id, _)| *id)
                .filter(|id| *id > group_state.last_delivered)
                .take(count)
                .collect(),
            ReadCursor::History => group_state
                .pending
                .iter()
                .filter(|(_, p)| p.consumer == consumer)
                .map(|(id, _)| *id)
                .take(count)
                .collect(),
        };

        for id in &ids {
            match cursor {
                ReadCursor::New => {
                    group_state.last_delivered = *id;
                    group_state.pending.insert(
                        *id,
                        PendingEntry {
                            consumer: consumer.to_string(),
                            delivered_at: now,
                            delivery_count: 1,
                        },
                    );
                }
                ReadCursor::History => {
                    if let Some(pending) = group_state.pending.get_mut(id) {
                        pending.delivered_at = now;
                        pending.delivery_count += 1;
                    }
                }
            }
        }

        Ok(ids
            .into_iter()
            .map(|id| QueueEntry {
                id,
                data: entries.get(&id).cloned(),
            })
            .collect())
    }
}

#[async_trait]
impl WorkQueue for MemoryQueue {
    async fn enqueue(&self, stream: &str, payload: &str) -> Result<EntryId, QueueError> {
        let id = {
            let mut streams = self.streams.lock().await;
            let state = streams.entry(stream.to_string()).or_default();
            let id = state.next_id();
            state.entries.insert(id, payload.to_string());
            id
        };
        self.appended.notify_waiters();
        Ok(id)
    }

    async fn ensure_group(&self, stream: &str, group: &str) -> Result<(), QueueError> {
        let mut streams = self.streams.lock().await;
        streams
            .entry(stream.to_string())
            .or_default()
            .groups
            .entry(group.to_string())
            .or_default();
        Ok(())
    }

    async fn read_group(
        &self,
        stream: &str,
        group: &str,
        consumer: &str,
        count: usize,
        block: Duration,
        cursor: ReadCursor,
    ) -> Result<Vec<QueueEntry>, QueueError> {
        if cursor == ReadCursor::History || block.is_zero() {
            return self.deliver(stream, group, consumer, count, cursor).await;
        }

        let deadline = Instant::now() + block;
        loop {
            // Register interest before checking so an append between the
            // check and the wait is not missed
            let appended = self.appended.notified();
            tokio::pin!(appended);
            appended.as_mut().enable();

            let delivered = self.deliver(stream, group, consumer, count, cursor).await?;
            if !delivered.is_empty() {
                return Ok(delivered);
            }

            if tokio::time::timeout_at(deadline, appended).await.is_err() {
                return Ok(vec![]);
            }
        }
    }

    async fn acknowledge(&self, stream: &str, group: &str, id: EntryId) -> Result<bool, QueueError> {
        let mut streams = self.streams.lock().await;
        let removed = streams
            .get_mut(stream)
            .and_then(|s| s.groups.get_mut(group))
            .and_then(|g| g.pending.remove(&id))
            .is_some();
        Ok(removed)
    }

    async fn reclaim_stuck(
        &self,
        stream: &str,
        group: &str,
        consumer: &str,
        min_idle: Duration,
        count: usize,
    ) -> Result<Vec<QueueEntry>, QueueError> {
        let mut streams = self.streams.lock().await;
        let no_group = || QueueError::NoGroup {
            stream: stream.to_string(),
            group: group.to_string(),
        };
        let state = streams.get_mut(stream).ok_or_else(no_group)?;
        let now = Instant::now();

        let group_state = state.groups.get_mut(group).ok_or_else(no_group)?;
        let mut claimed = Vec::new();
        for (id, pending) in group_state.pending.iter_mut() {
            if claimed.len() >= count {
                break;
            }
            if now.duration_since(pending.delivered_at) >= min_idle {
                pending.consumer = consumer.to_string();
                pending.delivered_at = now;
                pending.delivery_count += 1;
                claimed.push(*id);
            }
        }

        // Entries deleted from the stream cannot be claimed; drop them from the PEL
        let (live, deleted): (Vec<EntryId>, Vec<EntryId>) = claimed
            .into_iter()
            .partition(|id| state.entries.contains_key(id));
        for id in deleted {
            group_state.pending.remove(&id);
        }

        Ok(live.into_iter().map(|id| state.entry(id)).collect())
    }

    async fn len(&self, stream: &str) -> Result<usize, QueueError> {
        let streams = self.streams.lock().await;
        Ok(streams.get(stream).map(|s| s.entries.len()).unwrap_or(0))
    }

    async fn latest(&self, stream: &str, count: usize) -> Result<Vec<QueueEntry>, QueueError> {
        let streams = self.streams.lock().await;
        Ok(streams
            .get(stream)
            .map(|s| {
                s.entries
                    .iter()
                    .rev()
                    .take(count)
                    .map(|(id, data)| QueueEntry {
                        id: *id,
                        data: Some(data.clone()),
                    })
                    .collect()
            })
            .unwrap_or_default())
    }

    async fn delete_stream(&self, stream: &str) -> Result<(), QueueError> {
        self.streams.lock().await.remove(stream);
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use std::sync::Arc;

    use super::*;

    const STREAM: &str = "papers:pending";
    const GROUP: &str = "agent_group";

    async fn queue_with(payloads: &[&str]) -> MemoryQueue {
        let queue = MemoryQueue::new();
        queue.ensure_group(STREAM, GROUP).await.unwrap();
        for payload in payloads {
            queue.enqueue(STREAM, payload).await.unwrap();
        }
        queue
    }

    async fn read_new(queue: &MemoryQueue, consumer: &str, count: usize) -> Vec<QueueEntry> {
        queue
            .read_group(STREAM, GROUP, consumer, count, Duration::ZERO, ReadCursor::New)
            .await
            .unwrap()
    }

    #[tokio::test]
    async fn test_ids_increase() {
        let queue = MemoryQueue::new();
        let a = queue.enqueue(STREAM, "1").await.unwrap();
        let b = queue.enqueue(STREAM, "2").await.unwrap();
        let c = queue.enqueue(STREAM, "3").await.unwrap();
        assert!(a < b && b < c);
        assert_eq!(queue.len(STREAM).await.unwrap(), 3);
    }

    #[tokio::test]
    async fn test_group_splits_delivery_between_consumers() {
        let queue = queue_with(&["1", "2", "3"]).await;

        let first = read_new(&queue, "w1", 2).await;
        let second = read_new(&queue, "w2", 2).await;
        let third = read_new(&queue, "w1", 2).await;

        assert_eq!(first.len(), 2);
        assert_eq!(second.len(), 1);
        assert!(third.is_empty());
        assert_eq!(second[0].data.as_deref(), Some("3"));
        assert_eq!(queue.pending_count(STREAM, GROUP).await, 3);
    }

    #[tokio::test]
    async fn test_ensure_group_is_idempotent() {
        let queue = queue_with(&["1"]).await;
        read_new(&queue, "w1", 1).await;
        queue.ensure_group(STREAM, GROUP).await.unwrap();
        // Re-creating must not rewind the group cursor
        assert!(read_new(&queue, "w1", 1).await.is_empty());
    }

    #[tokio::test]
    async fn test_read_without_group_fails() {
        let queue = MemoryQueue::new();
        queue.enqueue(STREAM, "1").await.unwrap();
        let result = queue
            .read_group(STREAM, "missing", "w1", 1, Duration::ZERO, ReadCursor::New)
            .await;
        assert!(matches!(result, Err(QueueError::NoGroup { .. })));
    }

    #[tokio::test]
    async fn test_history_returns_own_unacked_entries() {
        let queue = queue_with(&["1", "2"]).await;
        let delivered = read_new(&queue, "w1", 2).await;
        read_new(&queue, "w2", 1).await;

        queue
            .acknowledge(STREAM, GROUP, delivered[0].id)
            .await
            .unwrap();

        let history = queue
            .read_group(STREAM, GROUP, "w1", 10, Duration::ZERO, ReadCursor::History)
            .await
            .unwrap();
        assert_eq!(history.len(), 1);
        assert_eq!(history[0].id, delivered[1].id);

        let other = queue
            .read_group(STREAM, GROUP, "w2", 10, Duration::ZERO, ReadCursor::History)
            .await
            .unwrap();
        assert!(other.is_empty());
    }

    #[tokio::test]
    async fn test_acknowledge_is_idempotent() {
        let queue = queue_with(&["1"]).await;
        let delivered = read_new(&queue, "w1", 1).await;
        let id = delivered[0].id;

        assert!(queue.acknowledge(STREAM, GROUP, id).await.unwrap());
        assert!(!queue.acknowledge(STREAM, GROUP, id).await.unwrap());
        assert_eq!(queue.pending_count(STREAM, GROUP).await, 0);
    }

    #[tokio::test]
    async fn test_acknowledge_never_delivered_is_noop() {
        let queue = queue_with(&["1"]).await;
        let acked = queue
            .acknowledge(STREAM, GROUP, EntryId::new(42, 0))
            .await
            .unwrap();
        assert!(!acked);

        let acked = queue
            .acknowledge("no-such-stream", "no-such-group", EntryId::new(1, 0))
            .await
            .unwrap();
        assert!(!acked);

        // The undelivered entry is still readable
        assert_eq!(read_new(&queue, "w1", 1).await.len(), 1);
    }

    #[tokio::test(start_paused = true)]
    async fn test_reclaim_stuck_moves_idle_entries() {
        let queue = queue_with(&["1", "2"]).await;
        read_new(&queue, "dead", 2).await;

        let early = queue
            .reclaim_stuck(STREAM, GROUP, "w2", Duration::from_secs(60), 10)
            .await
            .unwrap();
        assert!(early.is_empty());

        tokio::time::advance(Duration::from_secs(61)).await;

        let claimed = queue
            .reclaim_stuck(STREAM, GROUP, "w2", Duration::from_secs(60), 1)
            .await
            .unwrap();
        assert_eq!(claimed.len(), 1);
        assert_eq!(claimed[0].data.as_deref(), Some("1"));
        assert_eq!(
            queue.delivery_count(STREAM, GROUP, claimed[0].id).await,
            Some(2)
        );

        let history = queue
            .read_group(STREAM, GROUP, "w2", 10, Duration::ZERO, ReadCursor::History)
            .await
            .unwrap();
        assert_eq!(history.len(), 1);
    }

    #[tokio::test]
    async fn test_blocking_read_wakes_on_enqueue() {
        let queue = Arc::new(queue_with(&[]).await);

        let reader = {
            let queue = Arc::clone(&queue);
            tokio::spawn(async move {
                queue
                    .read_group(STREAM, GROUP, "w1", 1, Duration::from_secs(5), ReadCursor::New)
                    .await
            })
        };

        tokio::time::sleep(Duration::from_millis(20)).await;
        queue.enqueue(STREAM, "late").await.unwrap();

        let delivered = reader.await.unwrap().unwrap();
        assert_eq!(delivered.len(), 1);
        assert_eq!(delivered[0].data.as_deref(), Some("late"));
    }

    #[tokio::test(start_paused = true)]
    async fn test_blocking_read_times_out_empty() {
        let queue = queue_with(&[]).await;
        let delivered = queue
            .read_group(STREAM, GROUP, "w1", 1, Duration::from_millis(100), ReadCursor::New)
            .await
            .unwrap();
        assert!(delivered.is_empty());
    }

    #[tokio::test]
    async fn test_latest_is_newest_first() {
        let queue = queue_with(&["1", "2", "3"]).await;
        let latest = queue.latest(STREAM, 2).await.unwrap();
        let data: Vec<_> = latest.iter().map(|e| e.data.as_deref().unwrap()).collect();
        assert_eq!(data, vec!["3", "2"]);
    }

    #[tokio::test]
    async fn test_delete_stream_drops_groups() {
        let queue = queue_with(&["1"]).await;
        queue.delete_stream(STREAM).await.unwrap();
        assert_eq!(queue.len(STREAM).await.unwrap(), 0);
        let result = queue
            .read_group(STREAM, GROUP, "w1", 1, Duration::ZERO, ReadCursor::New)
            .await;
        assert!(result.is_err());
    }
}
