// Channel core: per-shard actor plus the services it composes.
//
// One `ChannelActor` owns the sockets of one regional shard of a logical
// channel. All durable state lives behind the `Storage` trait so an idle
// shard can be dropped from memory and rehydrated later.
use std::time::{SystemTime, UNIX_EPOCH};

pub mod actor;
pub mod broadcast;
pub mod buffer;
pub mod connection;
mod handler;
pub mod keys;
pub mod peers;
pub mod sequence;
pub mod shards;
pub mod subscriptions;

pub use actor::{ActorConfig, ChannelActor};
pub use broadcast::{BroadcastOutcome, MessageBroadcaster, Watermarks};
pub use buffer::MessageBuffer;
pub use connection::{Connection, Disposition, Outbound};
pub use peers::{InProcessPeers, ReplicaPublish, ShardPeer};
pub use sequence::SequenceManager;
pub use shards::ShardRegistry;
pub use subscriptions::SubscriptionManager;

/// Hard cap on distinct subscribers per topic.
pub const MAX_SUBSCRIBERS: usize = 5120;
/// Local fan-out batch size between event-loop yields.
pub const BROADCAST_BATCH: usize = 10;
/// Page of message keys examined by one opportunistic prune.
pub const PRUNE_PAGE: usize = 128;
/// Buffered messages replayed per catch-up request.
pub const CATCHUP_LIMIT: usize = 100;
/// Default replay-buffer retention.
pub const DEFAULT_BUFFER_TTL_MS: u64 = 60_000;

pub type ChannelResult<T> = std::result::Result<T, ChannelError>;

#[derive(thiserror::Error, Debug)]
pub enum ChannelError {
    #[error("storage: {0}")]
    Storage(#[from] relay_storage::StorageError),
    #[error("wire: {0}")]
    Wire(#[from] relay_wire::WireError),
    #[error("grant: {0}")]
    Grant(#[from] relay_grant::GrantError),
    #[error("address: {0}")]
    Address(#[from] relay_common::Error),
    #[error("subscriber capacity exceeded for topic {topic} (limit {limit})")]
    CapacityExceeded { topic: String, limit: usize },
    #[error("shard peer: {0}")]
    Peer(String),
}

pub(crate) fn now_epoch_millis() -> u64 {
    SystemTime::now()
        .duration_since(UNIX_EPOCH)
        .map(|elapsed| elapsed.as_millis() as u64)
        .unwrap_or(0)
}
