// JSON wire protocol: packets exchanged over the WebSocket, the Message
// record replicated between shards, and the usage-accounting envelope.
//
// Packets are discriminated by `packetType` and validated at the boundary
// before any business logic runs.
use bytes::Bytes;
use serde::{Deserialize, Serialize};

pub type WireResult<T> = std::result::Result<T, WireError>;

#[derive(thiserror::Error, Debug)]
pub enum WireError {
    #[error("malformed packet: {0}")]
    Malformed(#[from] serde_json::Error),
}

/// WebSocket close code for malformed or schema-invalid packets.
pub const CLOSE_PROTOCOL_ERROR: u16 = 4400;
/// WebSocket close code for authentication failures.
pub const CLOSE_UNAUTHORIZED: u16 = 4401;
/// WebSocket close code for local infrastructure failures.
pub const CLOSE_INTERNAL_ERROR: u16 = 4500;

/// Payload delivered in place of the real message to curiosity-scoped
/// subscribers.
pub const CURIOSITY_NOTICE: &str =
    "something was published on this topic, but your grant only lets you wonder what";

/// A published message.
///
/// Created once by the accepting shard and replicated verbatim to sibling
/// shards, so `id` and `seq` are identical everywhere. Clients submit a
/// partially-filled record inside a `publish` packet; the server-owned
/// fields default empty and are overwritten before fan-out.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct Message {
    #[serde(default)]
    pub id: String,
    pub topic: String,
    #[serde(default)]
    pub sender_id: String,
    #[serde(default)]
    pub seq: String,
    /// Server ingress time, epoch millis.
    #[serde(default)]
    pub sent_at: u64,
    pub payload: String,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub client_msg_id: Option<String>,
    /// Microseconds spent between packet ingress and sequencing.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub ingress_us: Option<u64>,
    /// Microseconds spent between packet ingress and local broadcast start.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub broadcast_us: Option<u64>,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum AckType {
    #[serde(rename = "subscribe-ack")]
    SubscribeAck,
    #[serde(rename = "publish-ok")]
    PublishOk,
    #[serde(rename = "publish-error")]
    PublishError,
}

/// Client/server packets, discriminated by `packetType`.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(tag = "packetType", rename_all = "lowercase")]
pub enum Packet {
    Connect {
        #[serde(rename = "grantJWT")]
        grant_jwt: String,
    },
    Subscribe {
        #[serde(
            rename = "requestId",
            default,
            skip_serializing_if = "Option::is_none"
        )]
        request_id: Option<String>,
        topic: String,
    },
    Unsubscribe {
        #[serde(
            rename = "requestId",
            default,
            skip_serializing_if = "Option::is_none"
        )]
        request_id: Option<String>,
        topic: String,
    },
    Publish {
        #[serde(
            rename = "requestId",
            default,
            skip_serializing_if = "Option::is_none"
        )]
        request_id: Option<String>,
        topic: String,
        payload: Message,
        #[serde(
            rename = "clientMsgId",
            default,
            skip_serializing_if = "Option::is_none"
        )]
        client_msg_id: Option<String>,
    },
    // Server to client only.
    Ack {
        #[serde(
            rename = "requestId",
            default,
            skip_serializing_if = "Option::is_none"
        )]
        request_id: Option<String>,
        #[serde(rename = "type")]
        ack: AckType,
    },
}

pub fn decode_packet(text: &str) -> WireResult<Packet> {
    Ok(serde_json::from_str(text)?)
}

pub fn encode_packet(packet: &Packet) -> WireResult<String> {
    Ok(serde_json::to_string(packet)?)
}

/// Serialize a message once; fan-out clones the cheap `Bytes` handle.
pub fn encode_message(message: &Message) -> WireResult<Bytes> {
    Ok(Bytes::from(serde_json::to_vec(message)?))
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum UsageKind {
    Connect,
    Subscribe,
    Message,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct UsageEvent {
    pub event: UsageKind,
    pub project_id: String,
    pub channel: String,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub topic: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub client_id: Option<String>,
    pub at_ms: u64,
}

/// Fire-and-forget envelope forwarded to the usage webhook.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct UsageEnvelope {
    #[serde(rename = "packetType")]
    pub packet_type: String,
    pub payload: UsageEvent,
}

impl UsageEnvelope {
    pub fn new(payload: UsageEvent) -> Self {
        Self {
            packet_type: "usage".to_string(),
            payload,
        }
    }
}
