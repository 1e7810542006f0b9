// The per-shard composition root.
//
// One actor owns the sockets of one regional shard and wires the sequence,
// subscription, buffer, shard-registry and broadcast services over a single
// storage handle. Publishes are coordinated here: local delivery is the
// guarantee given to the sender, replication to sibling shards is
// best-effort.
use crate::broadcast::{BroadcastOutcome, MessageBroadcaster, Watermarks};
use crate::buffer::MessageBuffer;
use crate::connection::{Connection, Outbound};
use crate::peers::{ReplicaPublish, ShardPeer};
use crate::sequence::SequenceManager;
use crate::shards::ShardRegistry;
use crate::subscriptions::SubscriptionManager;
use crate::{now_epoch_millis, ChannelResult, BROADCAST_BATCH, DEFAULT_BUFFER_TTL_MS};
use metrics::counter;
use relay_common::ChannelAddress;
use relay_grant::GrantVerifier;
use relay_storage::Storage;
use relay_wire::{Message, UsageEnvelope, UsageEvent, UsageKind};
use std::collections::HashMap;
use std::sync::Arc;
use std::time::Instant;
use tokio::sync::{mpsc, RwLock};
use tracing::warn;
use uuid::Uuid;

#[derive(Debug, Clone, Copy)]
pub struct ActorConfig {
    pub buffer_ttl_ms: u64,
    pub watermarks: Watermarks,
    pub broadcast_batch: usize,
}

impl Default for ActorConfig {
    fn default() -> Self {
        Self {
            buffer_ttl_ms: DEFAULT_BUFFER_TTL_MS,
            watermarks: Watermarks::default(),
            broadcast_batch: BROADCAST_BATCH,
        }
    }
}

pub struct ChannelActor {
    address: ChannelAddress,
    verifier: GrantVerifier,
    sequences: SequenceManager,
    subscriptions: SubscriptionManager,
    buffer: MessageBuffer,
    shards: ShardRegistry,
    broadcaster: MessageBroadcaster,
    pub(crate) connections: RwLock<HashMap<Uuid, Connection>>,
    peers: Arc<dyn ShardPeer>,
    usage: Option<mpsc::Sender<UsageEnvelope>>,
}

impl ChannelActor {
    pub fn new(
        address: ChannelAddress,
        storage: Arc<dyn Storage>,
        verifier: GrantVerifier,
        peers: Arc<dyn ShardPeer>,
        usage: Option<mpsc::Sender<UsageEnvelope>>,
        config: ActorConfig,
    ) -> Self {
        Self {
            sequences: SequenceManager::new(storage.clone(), address.clone()),
            subscriptions: SubscriptionManager::new(storage.clone(), address.clone()),
            buffer: MessageBuffer::new(storage.clone(), address.clone(), config.buffer_ttl_ms),
            shards: ShardRegistry::new(storage, address.clone()),
            broadcaster: MessageBroadcaster::new(config.watermarks, config.broadcast_batch),
            connections: RwLock::new(HashMap::new()),
            address,
            verifier,
            peers,
            usage,
        }
    }

    pub fn address(&self) -> &ChannelAddress {
        &self.address
    }

    pub(crate) fn verifier(&self) -> &GrantVerifier {
        &self.verifier
    }

    pub fn subscriptions(&self) -> &SubscriptionManager {
        &self.subscriptions
    }

    pub fn buffer(&self) -> &MessageBuffer {
        &self.buffer
    }

    pub fn shards(&self) -> &ShardRegistry {
        &self.shards
    }

    pub fn sequences(&self) -> &SequenceManager {
        &self.sequences
    }

    /// Add a socket. The returned id keys all later packet handling.
    pub async fn register_connection(&self, sender: mpsc::Sender<Outbound>) -> Uuid {
        let conn = Connection::new(sender);
        let id = conn.id;
        self.connections.write().await.insert(id, conn);
        counter!("relay_connections_opened_total").increment(1);
        id
    }

    /// Socket lifecycle close: superset cleanup of every topic the grant
    /// names, then drop the record.
    pub async fn connection_closed(&self, conn_id: Uuid) {
        let removed = self.connections.write().await.remove(&conn_id);
        let Some(conn) = removed else {
            return;
        };
        if let Some(grant) = conn.grant() {
            let topics: Vec<String> = grant
                .topics
                .iter()
                .map(|entry| entry.topic.clone())
                .collect();
            self.subscriptions
                .bulk_unsubscribe(&grant.user_id, &topics)
                .await;
        }
        counter!("relay_connections_closed_total").increment(1);
    }

    /// Store the shard's own location. Called once at WebSocket upgrade.
    pub async fn set_location_hint(&self, hint: &str) -> ChannelResult<()> {
        self.shards.set_location_hint(hint).await
    }

    /// Membership push entry point, also reachable from sibling shards.
    pub async fn set_shards(&self, shard_keys: &[String]) -> ChannelResult<()> {
        self.shards.set_shards(shard_keys).await
    }

    /// Coordinate an authorized publish.
    ///
    /// Sequencing is the only fatal step: a message is not published until
    /// its seq is durably advanced. Buffering, last-seen advancement, usage
    /// accounting and remote forwarding are logged on failure, never
    /// surfaced to the sender.
    pub async fn accept_publish(
        &self,
        sender_id: &str,
        topic: &str,
        draft: Message,
        ingress: Instant,
    ) -> ChannelResult<Message> {
        let (seq, remotes, subscribers) = tokio::join!(
            self.sequences.generate_sequence(topic),
            self.shards.remote_shards(),
            self.subscriptions.subscribers_with_wildcard(topic),
        );
        let seq = seq?;
        let subscribers = subscribers?;
        let remotes = remotes.unwrap_or_else(|err| {
            warn!(topic = %topic, error = %err, "remote shard lookup failed");
            Vec::new()
        });

        let elapsed_us = ingress.elapsed().as_micros() as u64;
        let mut message = Message {
            id: Uuid::new_v4().to_string(),
            topic: topic.to_string(),
            sender_id: sender_id.to_string(),
            seq: seq.clone(),
            sent_at: now_epoch_millis().saturating_sub(elapsed_us / 1_000),
            payload: draft.payload,
            client_msg_id: draft.client_msg_id,
            ingress_us: Some(elapsed_us),
            broadcast_us: None,
        };
        message.broadcast_us = Some(ingress.elapsed().as_micros() as u64);

        let outcome = self
            .broadcaster
            .broadcast(&self.connections, &message, sender_id, &subscribers)
            .await?;
        self.record_publish(topic, &message, &subscribers, outcome)
            .await;

        let request = ReplicaPublish {
            message: message.clone(),
            sender_id: sender_id.to_string(),
            subscriber_ids: subscribers,
            project_id: self.address.project.clone(),
            channel: self.address.resource.clone(),
            topic: topic.to_string(),
            seq,
            ingress_ts: message.sent_at,
        };
        for shard_key in remotes {
            if let Err(err) = self.peers.publish(&shard_key, &request).await {
                warn!(shard = %shard_key, topic = %topic, error = %err, "remote broadcast failed");
            }
        }

        counter!("relay_publish_total").increment(1);
        Ok(message)
    }

    /// Apply a publish accepted by a sibling shard.
    ///
    /// The message is stored verbatim, identical seq and id, so every
    /// region's buffer stays comparable. Local fan-out uses this shard's
    /// own subscriber set; a fan-out failure never blocks buffering.
    pub async fn publish_replica(&self, request: ReplicaPublish) -> ChannelResult<()> {
        self.buffer
            .buffer_message(&request.topic, &request.message)
            .await?;

        let subscribers = self
            .subscriptions
            .subscribers_with_wildcard(&request.topic)
            .await?;
        if let Err(err) = self
            .broadcaster
            .broadcast(
                &self.connections,
                &request.message,
                &request.sender_id,
                &subscribers,
            )
            .await
        {
            warn!(topic = %request.topic, error = %err, "replica broadcast failed");
        }
        if let Err(err) = self
            .buffer
            .update_last_seen_bulk(&subscribers, &request.topic, &request.seq)
            .await
        {
            warn!(topic = %request.topic, error = %err, "replica last-seen update failed");
        }
        counter!("relay_replica_publish_total").increment(1);
        Ok(())
    }

    // Post-broadcast persistence: awaited, but failures only logged.
    async fn record_publish(
        &self,
        topic: &str,
        message: &Message,
        subscribers: &[String],
        outcome: BroadcastOutcome,
    ) {
        if let Err(err) = self.buffer.buffer_message(topic, message).await {
            warn!(topic = %topic, seq = %message.seq, error = %err, "buffering failed");
        }
        // Last-seen tracks "entitled to have seen", not delivery receipts:
        // every subscriber advances, reached or not.
        if let Err(err) = self
            .buffer
            .update_last_seen_bulk(subscribers, topic, &message.seq)
            .await
        {
            warn!(topic = %topic, seq = %message.seq, error = %err, "last-seen update failed");
        }
        if outcome.dropped_queue_full > 0 {
            warn!(
                topic = %topic,
                dropped = outcome.dropped_queue_full,
                "sends dropped on full outbound queues"
            );
        }
        self.emit_usage(UsageKind::Message, Some(topic), Some(&message.sender_id));
    }

    pub(crate) fn emit_usage(&self, event: UsageKind, topic: Option<&str>, client_id: Option<&str>) {
        let Some(queue) = &self.usage else {
            return;
        };
        let envelope = UsageEnvelope::new(UsageEvent {
            event,
            project_id: self.address.project.clone(),
            channel: self.address.resource.clone(),
            topic: topic.map(str::to_string),
            client_id: client_id.map(str::to_string),
            at_ms: now_epoch_millis(),
        });
        if queue.try_send(envelope).is_err() {
            warn!("usage queue full, event dropped");
        }
    }
}
