// Process-wide state: one actor per channel shard hosted here.
use crate::config::RelayConfig;
use crate::peers::HttpShardPeer;
use crate::usage;
use anyhow::{Context, Result};
use relay_channel::{ChannelActor, ShardPeer};
use relay_common::ChannelAddress;
use relay_grant::GrantVerifier;
use relay_storage::MemoryStorage;
use relay_wire::UsageEnvelope;
use std::collections::HashMap;
use std::sync::Arc;
use tokio::sync::{mpsc, RwLock};

// Channels are versioned resources; this service hosts the current scheme.
const RESOURCE_TYPE: &str = "channel";
const RESOURCE_VERSION: &str = "v1";

pub struct AppState {
    config: RelayConfig,
    storage: Arc<MemoryStorage>,
    actors: RwLock<HashMap<String, Arc<ChannelActor>>>,
    peers: Arc<dyn ShardPeer>,
    usage: Option<mpsc::Sender<UsageEnvelope>>,
}

impl AppState {
    pub fn new(config: RelayConfig) -> Result<Arc<Self>> {
        // Fail fast on an unusable verification key.
        GrantVerifier::from_ed25519_pem(config.grant_public_key_pem.as_bytes())
            .context("parse grant public key")?;
        let peers: Arc<dyn ShardPeer> = Arc::new(HttpShardPeer::new(&config.peer_routes));
        let usage = config
            .usage_webhook_url
            .clone()
            .map(|url| usage::spawn_forwarder(url, config.usage_queue_size));
        Ok(Arc::new(Self {
            storage: Arc::new(MemoryStorage::new()),
            actors: RwLock::new(HashMap::new()),
            peers,
            usage,
            config,
        }))
    }

    pub fn config(&self) -> &RelayConfig {
        &self.config
    }

    /// The actor hosting (project, channel), created on first touch.
    pub async fn actor_for(&self, project: &str, channel: &str) -> Result<Arc<ChannelActor>> {
        let address = ChannelAddress::new(project, channel, RESOURCE_TYPE, RESOURCE_VERSION);
        let key = address.stringify();
        if let Some(actor) = self.actors.read().await.get(&key) {
            return Ok(actor.clone());
        }

        let mut guard = self.actors.write().await;
        if let Some(actor) = guard.get(&key) {
            return Ok(actor.clone());
        }
        let verifier =
            GrantVerifier::from_ed25519_pem(self.config.grant_public_key_pem.as_bytes())
                .context("parse grant public key")?;
        let actor = Arc::new(ChannelActor::new(
            address,
            self.storage.clone(),
            verifier,
            self.peers.clone(),
            self.usage.clone(),
            self.config.actor_config(),
        ));
        guard.insert(key, actor.clone());
        Ok(actor)
    }
}
