// Cross-shard transport boundary.
//
// The accepting shard forwards a fully-formed message to every sibling
// shard; siblings apply it verbatim. Delivery is best-effort: callers log
// failures and never surface them to the publishing client.
use crate::actor::ChannelActor;
use crate::{ChannelError, ChannelResult};
use relay_wire::Message;
use serde::{Deserialize, Serialize};
use std::collections::HashMap;
use std::sync::Arc;
use tokio::sync::RwLock;

/// Replica-publish request, as carried on the wire between shards.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct ReplicaPublish {
    pub message: Message,
    pub sender_id: String,
    pub subscriber_ids: Vec<String>,
    pub project_id: String,
    pub channel: String,
    pub topic: String,
    pub seq: String,
    #[serde(rename = "ingressTs")]
    pub ingress_ts: u64,
}

#[async_trait::async_trait]
pub trait ShardPeer: Send + Sync {
    /// Invoke a sibling shard's replica-publish entry point.
    async fn publish(&self, shard_key: &str, request: &ReplicaPublish) -> ChannelResult<()>;
}

/// In-process peer transport: shard keys resolve to actors in this process.
#[derive(Default)]
pub struct InProcessPeers {
    actors: RwLock<HashMap<String, Arc<ChannelActor>>>,
}

impl InProcessPeers {
    pub fn new() -> Self {
        Self::default()
    }

    pub async fn register(&self, shard_key: impl Into<String>, actor: Arc<ChannelActor>) {
        self.actors.write().await.insert(shard_key.into(), actor);
    }

    async fn actor(&self, shard_key: &str) -> ChannelResult<Arc<ChannelActor>> {
        self.actors
            .read()
            .await
            .get(shard_key)
            .cloned()
            .ok_or_else(|| ChannelError::Peer(format!("unknown shard {shard_key}")))
    }
}

#[async_trait::async_trait]
impl ShardPeer for InProcessPeers {
    async fn publish(&self, shard_key: &str, request: &ReplicaPublish) -> ChannelResult<()> {
        self.actor(shard_key).await?.publish_replica(request.clone()).await
    }
}
