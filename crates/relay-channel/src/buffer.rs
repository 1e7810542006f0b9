// TTL replay buffer and last-seen cursors.
//
// Buffered records expire passively. Cleanup is amortized: every write
// prunes one bounded page of the topic's keys, and reads lazily delete any
// expired record they walk over. There is no background sweep.
use crate::{keys, now_epoch_millis, ChannelResult, PRUNE_PAGE};
use bytes::Bytes;
use relay_common::ChannelAddress;
use relay_storage::{Storage, StorageError, Txn};
use relay_wire::Message;
use serde::{Deserialize, Serialize};
use std::sync::Arc;
use tracing::debug;

#[derive(Debug, Clone, Serialize, Deserialize)]
struct BufferedRecord {
    body: Message,
    /// Absolute expiry, epoch millis.
    exp: u64,
}

pub struct MessageBuffer {
    storage: Arc<dyn Storage>,
    address: ChannelAddress,
    ttl_ms: u64,
}

impl MessageBuffer {
    pub fn new(storage: Arc<dyn Storage>, address: ChannelAddress, ttl_ms: u64) -> Self {
        Self {
            storage,
            address,
            ttl_ms,
        }
    }

    /// Persist a message under its seq, then opportunistically prune one
    /// page of expired records for the topic.
    pub async fn buffer_message(&self, topic: &str, message: &Message) -> ChannelResult<()> {
        let key = keys::message(&self.address, topic, &message.seq);
        let record = BufferedRecord {
            body: message.clone(),
            exp: now_epoch_millis() + self.ttl_ms,
        };
        relay_storage::put_json(self.storage.as_ref(), &key, &record).await?;
        self.prune_expired(topic).await?;
        Ok(())
    }

    /// Buffered messages with seq strictly greater than `after_seq`, oldest
    /// first, up to `limit` live entries. Expired records encountered along
    /// the way are deleted and skipped.
    pub async fn messages_after(
        &self,
        topic: &str,
        after_seq: &str,
        limit: usize,
    ) -> ChannelResult<Vec<Message>> {
        let prefix = keys::message_prefix(&self.address, topic);
        let keys = self.storage.list(&prefix, None).await?;
        let now = now_epoch_millis();
        let mut collected = Vec::new();
        for key in keys {
            if collected.len() >= limit {
                break;
            }
            let seq = &key[prefix.len()..];
            if seq <= after_seq {
                continue;
            }
            let Some(record) =
                relay_storage::get_json::<BufferedRecord>(self.storage.as_ref(), &key).await?
            else {
                continue;
            };
            if record.exp <= now {
                self.storage.delete(&key).await?;
                continue;
            }
            collected.push(record.body);
        }
        Ok(collected)
    }

    /// Advance last-seen for a batch of clients in one transaction.
    ///
    /// A client's cursor is written only when it is strictly behind the new
    /// seq; overlapping in-flight broadcasts can therefore never regress it.
    pub async fn update_last_seen_bulk(
        &self,
        client_ids: &[String],
        topic: &str,
        seq: &str,
    ) -> ChannelResult<()> {
        let cursor_keys: Vec<String> = client_ids
            .iter()
            .map(|client| keys::last_seen(&self.address, topic, client))
            .collect();
        let seq = seq.to_string();
        self.storage
            .transaction(Box::new(move |txn| {
                for key in &cursor_keys {
                    advance_cursor(txn, key, &seq)?;
                }
                Ok(())
            }))
            .await?;
        Ok(())
    }

    pub async fn update_last_seen(
        &self,
        client_id: &str,
        topic: &str,
        seq: &str,
    ) -> ChannelResult<()> {
        let key = keys::last_seen(&self.address, topic, client_id);
        let seq = seq.to_string();
        self.storage
            .transaction(Box::new(move |txn| advance_cursor(txn, &key, &seq)))
            .await?;
        Ok(())
    }

    pub async fn last_seen(&self, client_id: &str, topic: &str) -> ChannelResult<Option<String>> {
        let key = keys::last_seen(&self.address, topic, client_id);
        Ok(self
            .storage
            .get(&key)
            .await?
            .map(|bytes| String::from_utf8_lossy(&bytes).into_owned()))
    }

    /// Delete expired records in one bounded page of the topic's keys.
    pub async fn prune_expired(&self, topic: &str) -> ChannelResult<()> {
        let prefix = keys::message_prefix(&self.address, topic);
        let page = self.storage.list(&prefix, Some(PRUNE_PAGE)).await?;
        let now = now_epoch_millis();
        let mut pruned = 0usize;
        for key in page {
            let Some(record) =
                relay_storage::get_json::<BufferedRecord>(self.storage.as_ref(), &key).await?
            else {
                continue;
            };
            if record.exp <= now {
                self.storage.delete(&key).await?;
                pruned += 1;
            }
        }
        if pruned > 0 {
            debug!(topic = %topic, pruned, "pruned expired buffered messages");
        }
        Ok(())
    }
}

// Seqs are fixed-width and time-sortable, so string comparison is enough.
fn advance_cursor(txn: &mut dyn Txn, key: &str, seq: &str) -> relay_storage::Result<()> {
    let current = txn
        .get(key)
        .map(|bytes| String::from_utf8_lossy(&bytes).into_owned());
    if current.as_deref().is_none_or(|existing| existing < seq) {
        txn.put(key, Bytes::from(seq.to_string().into_bytes()));
    }
    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::sequence::encode_sequence;

    fn message(topic: &str, seq: &str, payload: &str) -> Message {
        Message {
            id: format!("id-{seq}"),
            topic: topic.to_string(),
            sender_id: "u1".to_string(),
            seq: seq.to_string(),
            sent_at: 1,
            payload: payload.to_string(),
            client_msg_id: None,
            ingress_us: None,
            broadcast_us: None,
        }
    }

    fn buffer(ttl_ms: u64) -> MessageBuffer {
        MessageBuffer::new(
            Arc::new(relay_storage::MemoryStorage::new()),
            ChannelAddress::new("p", "r", "channel", "v1"),
            ttl_ms,
        )
    }

    #[tokio::test]
    async fn messages_after_is_chronological_and_exclusive() {
        let buffer = buffer(60_000);
        let seqs: Vec<String> = (1..=3).map(|n| encode_sequence(1_000 * n, n)).collect();
        // Insert out of order; the listing must come back sorted.
        for index in [2usize, 0, 1] {
            buffer
                .buffer_message("orders", &message("orders", &seqs[index], "x"))
                .await
                .expect("buffer");
        }

        let all = buffer.messages_after("orders", "", 10).await.expect("list");
        let got: Vec<&str> = all.iter().map(|m| m.seq.as_str()).collect();
        assert_eq!(got, vec![seqs[0].as_str(), seqs[1].as_str(), seqs[2].as_str()]);

        let after_first = buffer
            .messages_after("orders", &seqs[0], 10)
            .await
            .expect("list");
        assert_eq!(after_first.len(), 2);
        assert_eq!(after_first[0].seq, seqs[1]);

        let limited = buffer.messages_after("orders", "", 1).await.expect("list");
        assert_eq!(limited.len(), 1);
        assert_eq!(limited[0].seq, seqs[0]);
    }

    #[tokio::test]
    async fn expired_records_are_lazily_deleted_on_read() {
        let buffer = buffer(0);
        let seq = encode_sequence(1_000, 1);
        buffer
            .buffer_message("orders", &message("orders", &seq, "x"))
            .await
            .expect("buffer");

        // TTL of zero: the record is already expired.
        let live = buffer.messages_after("orders", "", 10).await.expect("list");
        assert!(live.is_empty());
        let key = keys::message(&buffer.address, "orders", &seq);
        assert_eq!(buffer.storage.get(&key).await.expect("get"), None);
    }

    #[tokio::test]
    async fn buffering_prunes_previously_expired_records() {
        let buffer = buffer(60_000);
        let stale_seq = encode_sequence(1_000, 1);
        let stale_key = keys::message(&buffer.address, "orders", &stale_seq);
        let stale = BufferedRecord {
            body: message("orders", &stale_seq, "old"),
            exp: 1,
        };
        relay_storage::put_json(buffer.storage.as_ref(), &stale_key, &stale)
            .await
            .expect("seed");

        buffer
            .buffer_message("orders", &message("orders", &encode_sequence(2_000, 1), "new"))
            .await
            .expect("buffer");
        assert_eq!(buffer.storage.get(&stale_key).await.expect("get"), None);
    }

    #[tokio::test]
    async fn last_seen_never_regresses() {
        let buffer = buffer(60_000);
        let newer = encode_sequence(2_000, 5);
        let older = encode_sequence(1_000, 5);

        let clients = vec!["u1".to_string(), "u2".to_string()];
        buffer
            .update_last_seen_bulk(&clients, "orders", &newer)
            .await
            .expect("bulk");
        buffer
            .update_last_seen_bulk(&clients, "orders", &older)
            .await
            .expect("bulk");
        assert_eq!(
            buffer.last_seen("u1", "orders").await.expect("get"),
            Some(newer.clone())
        );

        buffer
            .update_last_seen("u1", "orders", &older)
            .await
            .expect("single");
        assert_eq!(
            buffer.last_seen("u1", "orders").await.expect("get"),
            Some(newer)
        );
    }

    #[tokio::test]
    async fn last_seen_starts_absent() {
        let buffer = buffer(60_000);
        assert_eq!(buffer.last_seen("u1", "orders").await.expect("get"), None);
    }
}
