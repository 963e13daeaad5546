//! Redis streams backend

use std::time::Duration;

use async_trait::async_trait;
use redis::streams::{
    StreamAutoClaimReply, StreamId, StreamRangeReply, StreamReadOptions, StreamReadReply,
};
use redis::{AsyncCommands, Client, RedisError, Value};

use super::{EntryId, PAYLOAD_FIELD, QueueEntry, QueueError, ReadCursor, WorkQueue};

/// Queue backed by Redis streams and consumer groups.
///
/// A multiplexed connection is opened per call; Redis clients are cheap to
/// hold and the connection setup is shared by the driver.
#[derive(Clone)]
pub struct RedisStreamQueue {
    client: Client,
}

impl RedisStreamQueue {
    pub fn new(client: Client) -> Self {
        Self { client }
    }

    fn to_entry(raw: &StreamId) -> Result<QueueEntry, QueueError> {
        Ok(QueueEntry {
            id: raw.id.parse()?,
            data: raw.get::<String>(PAYLOAD_FIELD),
        })
    }

    fn to_entries(raw: &[StreamId]) -> Result<Vec<QueueEntry>, QueueError> {
        raw.iter().map(Self::to_entry).collect()
    }

    /// Entries of `stream` in an XREADGROUP reply. A nil reply is a read
    /// that timed out.
    fn parse_read_reply(stream: &str, value: &Value) -> Result<Vec<QueueEntry>, QueueError> {
        let Some(reply) = redis::from_redis_value::<Option<StreamReadReply>>(value)? else {
            return Ok(vec![]);
        };

        let mut entries = Vec::new();
        for key in reply.keys.iter().filter(|k| k.key == stream) {
            entries.extend(Self::to_entries(&key.ids)?);
        }
        Ok(entries)
    }

    /// Entries claimed by XAUTOCLAIM
    fn parse_autoclaim_reply(value: &Value) -> Result<Vec<QueueEntry>, QueueError> {
        let reply: StreamAutoClaimReply = redis::from_redis_value(value)?;
        Self::to_entries(&reply.claimed)
    }
}

fn is_busy_group(err: &RedisError) -> bool {
    err.code() == Some("BUSYGROUP")
}

fn is_no_group(err: &RedisError) -> bool {
    err.code() == Some("NOGROUP")
}

/// NOGROUP becomes [`QueueError::NoGroup`] so callers can recreate the group
fn group_error(err: RedisError, stream: &str, group: &str) -> QueueError {
    if is_no_group(&err) {
        QueueError::NoGroup {
            stream: stream.to_string(),
            group: group.to_string(),
        }
    } else {
        QueueError::Redis(err)
    }
}

#[async_trait]
impl WorkQueue for RedisStreamQueue {
    async fn enqueue(&self, stream: &str, payload: &str) -> Result<EntryId, QueueError> {
        let mut conn = self.client.get_multiplexed_async_connection().await?;
        let id: String = conn.xadd(stream, "*", &[(PAYLOAD_FIELD, payload)]).await?;
        id.parse()
    }

    async fn ensure_group(&self, stream: &str, group: &str) -> Result<(), QueueError> {
        let mut conn = self.client.get_multiplexed_async_connection().await?;
        let created: Result<(), redis::RedisError> =
            conn.xgroup_create_mkstream(stream, group, "0").await;

        match created {
            Ok(()) => {
                tracing::info!(stream = %stream, group = %group, "Created consumer group");
                Ok(())
            }
            Err(e) if is_busy_group(&e) => Ok(()),
            Err(e) => Err(e.into()),
        }
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
        let mut conn = self.client.get_multiplexed_async_connection().await?;

        let mut options = StreamReadOptions::default().group(group, consumer).count(count);
        if cursor == ReadCursor::New && !block.is_zero() {
            options = options.block(block.as_millis() as usize);
        }

        let reply: Value = conn
            .xread_options(&[stream], &[cursor.as_id()], &options)
            .await
            .map_err(|e| group_error(e, stream, group))?;

        Self::parse_read_reply(stream, &reply)
    }

    async fn acknowledge(&self, stream: &str, group: &str, id: EntryId) -> Result<bool, QueueError> {
        let mut conn = self.client.get_multiplexed_async_connection().await?;
        let acked: usize = conn.xack(stream, group, &[id.to_string()]).await?;
        Ok(acked > 0)
    }

    async fn reclaim_stuck(
        &self,
        stream: &str,
        group: &str,
        consumer: &str,
        min_idle: Duration,
        count: usize,
    ) -> Result<Vec<QueueEntry>, QueueError> {
        let mut conn = self.client.get_multiplexed_async_connection().await?;
        let reply: Value = redis::cmd("XAUTOCLAIM")
            .arg(stream)
            .arg(group)
            .arg(consumer)
            .arg(min_idle.as_millis() as u64)
            .arg("0-0")
            .arg("COUNT")
            .arg(count)
            .query_async(&mut conn)
            .await
            .map_err(|e| group_error(e, stream, group))?;

        let claimed = Self::parse_autoclaim_reply(&reply)?;
        if !claimed.is_empty() {
            tracing::info!(
                stream = %stream,
                consumer = %consumer,
                claimed = claimed.len(),
                "Reclaimed stuck entries"
            );
        }
        Ok(claimed)
    }

    async fn len(&self, stream: &str) -> Result<usize, QueueError> {
        let mut conn = self.client.get_multiplexed_async_connection().await?;
        Ok(conn.xlen(stream).await?)
    }

    async fn latest(&self, stream: &str, count: usize) -> Result<Vec<QueueEntry>, QueueError> {
        let mut conn = self.client.get_multiplexed_async_connection().await?;
        let reply: StreamRangeReply = conn.xrevrange_count(stream, "+", "-", count).await?;
        Self::to_entries(&reply.ids)
    }

    async fn delete_stream(&self, stream: &str) -> Result<(), QueueError> {
        let mut conn = self.client.get_multiplexed_async_connection().await?;
        let _: () = conn.del(stream).await?;
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::model::RawDocument;
    use crate::queue::encode;
    use crate::service::fixtures;

    fn bulk(s: &str) -> Value {
        Value::BulkString(s.as_bytes().to_vec())
    }

    /// `[id, [field, value, ...]]` as Redis sends a stream entry
    fn raw_entry(id: &str, fields: &[(&str, &str)]) -> Value {
        let fields = fields
            .iter()
            .flat_map(|(k, v)| [bulk(k), bulk(v)])
            .collect();
        Value::Array(vec![bulk(id), Value::Array(fields)])
    }

    #[test]
    fn test_parses_group_read_reply() {
        let doc = fixtures::gcg_jailbreak();
        let plain = encode(&doc).unwrap();
        let double_encoded = encode(&plain).unwrap();

        let reply = Value::Array(vec![
            Value::Array(vec![
                bulk("papers:pending"),
                Value::Array(vec![
                    raw_entry("1700000000000-0", &[(PAYLOAD_FIELD, &plain)]),
                    raw_entry("1700000000000-1", &[(PAYLOAD_FIELD, &double_encoded)]),
                    raw_entry("1700000000001-0", &[("other", "x")]),
                ]),
            ]),
            Value::Array(vec![
                bulk("papers:analyzed"),
                Value::Array(vec![raw_entry("1700000000002-0", &[(PAYLOAD_FIELD, "{}")])]),
            ]),
        ]);

        let entries = RedisStreamQueue::parse_read_reply("papers:pending", &reply).unwrap();
        assert_eq!(entries.len(), 3);
        assert_eq!(entries[0].id, EntryId::new(1_700_000_000_000, 0));
        assert_eq!(entries[1].id, EntryId::new(1_700_000_000_000, 1));

        let first: RawDocument = entries[0].decode().unwrap();
        let second: RawDocument = entries[1].decode().unwrap();
        assert_eq!(first, doc);
        assert_eq!(second, doc);

        assert_eq!(entries[2].data, None);
        assert!(matches!(
            entries[2].decode::<RawDocument>(),
            Err(QueueError::Decode { .. })
        ));
    }

    #[test]
    fn test_timed_out_read_is_empty() {
        let entries = RedisStreamQueue::parse_read_reply("papers:pending", &Value::Nil).unwrap();
        assert!(entries.is_empty());
    }

    #[test]
    fn test_malformed_entry_id_is_rejected() {
        let reply = Value::Array(vec![Value::Array(vec![
            bulk("papers:pending"),
            Value::Array(vec![raw_entry("not-an-id", &[(PAYLOAD_FIELD, "{}")])]),
        ])]);
        assert!(matches!(
            RedisStreamQueue::parse_read_reply("papers:pending", &reply),
            Err(QueueError::InvalidEntryId(_))
        ));
    }

    #[test]
    fn test_parses_autoclaim_reply() {
        // Redis 7 replies with [next cursor, claimed entries, deleted ids]
        let reply = Value::Array(vec![
            bulk("0-0"),
            Value::Array(vec![
                raw_entry("1700000000000-0", &[(PAYLOAD_FIELD, r#"{"n":1}"#)]),
                raw_entry("1700000000000-3", &[(PAYLOAD_FIELD, r#"{"n":2}"#)]),
            ]),
            Value::Array(vec![]),
        ]);

        let claimed = RedisStreamQueue::parse_autoclaim_reply(&reply).unwrap();
        assert_eq!(claimed.len(), 2);
        assert_eq!(claimed[1].id, EntryId::new(1_700_000_000_000, 3));
        assert_eq!(claimed[1].data.as_deref(), Some(r#"{"n":2}"#));

        let nothing = Value::Array(vec![bulk("0-0"), Value::Array(vec![]), Value::Array(vec![])]);
        assert!(RedisStreamQueue::parse_autoclaim_reply(&nothing).unwrap().is_empty());
    }

    /// redis 0.27 does not export `make_extension_error`; parse a server
    /// error reply instead, which yields the same extension error.
    fn extension_error(line: &str) -> RedisError {
        redis::parse_redis_value(format!("-{line}\r\n").as_bytes())
            .unwrap()
            .extract_error()
            .unwrap_err()
    }

    #[test]
    fn test_group_error_codes() {
        let no_group = extension_error(
            "NOGROUP No such key 'papers:pending' or consumer group 'workers'",
        );
        assert!(is_no_group(&no_group));
        match group_error(no_group, "papers:pending", "workers") {
            QueueError::NoGroup { stream, group } => {
                assert_eq!(stream, "papers:pending");
                assert_eq!(group, "workers");
            }
            other => panic!("unexpected error {other:?}"),
        }

        let busy = extension_error("BUSYGROUP Consumer Group name already exists");
        assert!(is_busy_group(&busy));
        assert!(matches!(
            group_error(busy, "papers:pending", "workers"),
            QueueError::Redis(_)
        ));
    }

    async fn queue() -> RedisStreamQueue {
        let url = std::env::var("RADAR_TEST_REDIS_URL")
            .unwrap_or_else(|_| "redis://127.0.0.1:6379/15".to_string());
        RedisStreamQueue::new(Client::open(url).unwrap())
    }

    #[tokio::test]
    #[ignore = "requires a running Redis"]
    async fn test_group_round_trip_against_redis() {
        let queue = queue().await;
        let stream = format!("test:{}", uuid::Uuid::new_v4());
        queue.ensure_group(&stream, "g").await.unwrap();
        queue.ensure_group(&stream, "g").await.unwrap();

        let id = queue.enqueue(&stream, r#"{"n":1}"#).await.unwrap();
        let delivered = queue
            .read_group(&stream, "g", "c1", 10, Duration::from_millis(100), ReadCursor::New)
            .await
            .unwrap();
        assert_eq!(delivered.len(), 1);
        assert_eq!(delivered[0].id, id);
        assert_eq!(delivered[0].data.as_deref(), Some(r#"{"n":1}"#));

        let history = queue
            .read_group(&stream, "g", "c1", 10, Duration::ZERO, ReadCursor::History)
            .await
            .unwrap();
        assert_eq!(history.len(), 1);

        assert!(queue.acknowledge(&stream, "g", id).await.unwrap());
        assert!(!queue.acknowledge(&stream, "g", id).await.unwrap());
        assert_eq!(queue.latest(&stream, 5).await.unwrap().len(), 1);

        queue.delete_stream(&stream).await.unwrap();
    }
}
