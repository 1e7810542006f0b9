// Subscriber sets, one per topic.
//
// A set is an insertion-ordered, deduplicated list of client ids stored as
// JSON. A client subscribing to the wildcard topic is tracked under the
// literal key `*`, never expanded into concrete topics.
use crate::{keys, ChannelError, ChannelResult, MAX_SUBSCRIBERS};
use bytes::Bytes;
use relay_common::ChannelAddress;
use relay_grant::WILDCARD_TOPIC;
use relay_storage::{Storage, StorageError, Txn};
use std::sync::Arc;
use tracing::warn;

pub struct SubscriptionManager {
    storage: Arc<dyn Storage>,
    address: ChannelAddress,
}

impl SubscriptionManager {
    pub fn new(storage: Arc<dyn Storage>, address: ChannelAddress) -> Self {
        Self { storage, address }
    }

    /// Add a client to a topic's subscriber set.
    ///
    /// Idempotent for an already-present client. The capacity check and the
    /// append happen in one transaction.
    pub async fn subscribe(&self, topic: &str, client_id: &str) -> ChannelResult<()> {
        let key = keys::subscribers(&self.address, topic);
        let client = client_id.to_string();
        let mut at_capacity = false;

        self.storage
            .transaction(Box::new(|txn| {
                let mut subscribers = read_set(txn, &key)?;
                if subscribers.iter().any(|existing| *existing == client) {
                    return Ok(());
                }
                if subscribers.len() >= MAX_SUBSCRIBERS {
                    at_capacity = true;
                    return Ok(());
                }
                subscribers.push(client);
                write_set(txn, &key, &subscribers)
            }))
            .await?;

        if at_capacity {
            return Err(ChannelError::CapacityExceeded {
                topic: topic.to_string(),
                limit: MAX_SUBSCRIBERS,
            });
        }
        Ok(())
    }

    pub async fn unsubscribe(&self, topic: &str, client_id: &str) -> ChannelResult<()> {
        let key = keys::subscribers(&self.address, topic);
        let client = client_id.to_string();
        self.storage
            .transaction(Box::new(|txn| {
                let mut subscribers = read_set(txn, &key)?;
                let before = subscribers.len();
                subscribers.retain(|existing| *existing != client);
                if subscribers.len() != before {
                    write_set(txn, &key, &subscribers)?;
                }
                Ok(())
            }))
            .await?;
        Ok(())
    }

    /// Whether the client is in the topic's set or the wildcard set.
    pub async fn is_subscribed(&self, topic: &str, client_id: &str) -> ChannelResult<bool> {
        if self.subscribers(topic).await?.iter().any(|id| id == client_id) {
            return Ok(true);
        }
        if topic == WILDCARD_TOPIC {
            return Ok(false);
        }
        Ok(self
            .subscribers(WILDCARD_TOPIC)
            .await?
            .iter()
            .any(|id| id == client_id))
    }

    pub async fn subscribers(&self, topic: &str) -> ChannelResult<Vec<String>> {
        let key = keys::subscribers(&self.address, topic);
        Ok(relay_storage::get_json(self.storage.as_ref(), &key)
            .await?
            .unwrap_or_default())
    }

    /// The topic's subscribers plus the wildcard set, deduplicated.
    ///
    /// This is the delivery audience of a publish: a client tracked under
    /// the literal `*` key is entitled to every concrete topic's messages.
    pub async fn subscribers_with_wildcard(&self, topic: &str) -> ChannelResult<Vec<String>> {
        let mut combined = self.subscribers(topic).await?;
        if topic != WILDCARD_TOPIC {
            for client in self.subscribers(WILDCARD_TOPIC).await? {
                if !combined.contains(&client) {
                    combined.push(client);
                }
            }
        }
        Ok(combined)
    }

    /// Disconnect cleanup: remove the client from every listed topic.
    /// Topics are independent keys, so each removal stands alone and a
    /// failure on one does not stop the rest.
    pub async fn bulk_unsubscribe(&self, client_id: &str, topics: &[String]) {
        for topic in topics {
            if let Err(err) = self.unsubscribe(topic, client_id).await {
                warn!(topic = %topic, client_id = %client_id, error = %err, "bulk unsubscribe failed");
            }
        }
    }
}

fn read_set(txn: &mut dyn Txn, key: &str) -> relay_storage::Result<Vec<String>> {
    match txn.get(key) {
        Some(bytes) => serde_json::from_slice(&bytes).map_err(StorageError::Deserialize),
        None => Ok(Vec::new()),
    }
}

fn write_set(txn: &mut dyn Txn, key: &str, subscribers: &[String]) -> relay_storage::Result<()> {
    let bytes = serde_json::to_vec(subscribers).map_err(StorageError::Serialize)?;
    txn.put(key, Bytes::from(bytes));
    Ok(())
}
