// One WebSocket connection as seen by the channel actor.
//
// The grant is kept serialized on the connection record itself. That is the
// durable per-socket state: a rehydrated actor reads it back from the socket
// attachment, never from an in-process map.
use crate::ChannelResult;
use bytes::Bytes;
use relay_grant::Grant;
use tokio::sync::mpsc;
use uuid::Uuid;

/// Outbound queue depth per socket. Watermark backpressure operates on the
/// fill level of this queue.
pub const OUTBOUND_QUEUE: usize = 64;

/// Frame handed to the socket writer task.
#[derive(Debug, Clone, PartialEq)]
pub enum Outbound {
    Data(Bytes),
    Close { code: u16, reason: String },
}

/// What the socket task should do after a packet is handled.
#[derive(Debug, Clone, PartialEq)]
pub enum Disposition {
    Continue,
    Close { code: u16, reason: String },
}

#[derive(Debug, Clone)]
pub struct Connection {
    pub id: Uuid,
    sender: mpsc::Sender<Outbound>,
    grant_json: Option<String>,
}

impl Connection {
    pub fn new(sender: mpsc::Sender<Outbound>) -> Self {
        Self {
            id: Uuid::new_v4(),
            sender,
            grant_json: None,
        }
    }

    pub fn attach_grant(&mut self, grant: &Grant) -> ChannelResult<()> {
        let serialized = serde_json::to_string(grant).map_err(relay_wire::WireError::Malformed)?;
        self.grant_json = Some(serialized);
        Ok(())
    }

    pub fn has_grant(&self) -> bool {
        self.grant_json.is_some()
    }

    /// The attached grant, if present and still parseable.
    pub fn grant(&self) -> Option<Grant> {
        let json = self.grant_json.as_deref()?;
        serde_json::from_str(json).ok()
    }

    pub fn client_id(&self) -> Option<String> {
        self.grant().map(|grant| grant.user_id)
    }

    pub fn sender(&self) -> mpsc::Sender<Outbound> {
        self.sender.clone()
    }

    /// Queue without blocking; a full queue drops the frame.
    pub fn try_send(&self, frame: Outbound) -> bool {
        self.sender.try_send(frame).is_ok()
    }

    /// Outbound frames currently queued.
    pub fn queued(&self) -> usize {
        self.sender.max_capacity() - self.sender.capacity()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use relay_grant::{Scope, TopicGrant};

    fn test_grant() -> Grant {
        Grant {
            project_id: "p".to_string(),
            channel: "c".to_string(),
            topics: vec![TopicGrant {
                topic: "orders".to_string(),
                scope: Scope::Read,
            }],
            user_id: "user-7".to_string(),
            issued_at: 1,
            expires_at: u64::MAX,
        }
    }

    #[tokio::test]
    async fn grant_round_trips_through_serialized_attachment() {
        let (tx, _rx) = mpsc::channel(OUTBOUND_QUEUE);
        let mut conn = Connection::new(tx);
        assert!(!conn.has_grant());
        assert_eq!(conn.client_id(), None);

        conn.attach_grant(&test_grant()).expect("attach");
        assert!(conn.has_grant());
        assert_eq!(conn.client_id().as_deref(), Some("user-7"));
        assert_eq!(conn.grant().expect("grant"), test_grant());
    }

    #[tokio::test]
    async fn queued_tracks_outbound_fill() {
        let (tx, mut rx) = mpsc::channel(4);
        let conn = Connection::new(tx);
        assert_eq!(conn.queued(), 0);
        assert!(conn.try_send(Outbound::Data(Bytes::from_static(b"a"))));
        assert!(conn.try_send(Outbound::Data(Bytes::from_static(b"b"))));
        assert_eq!(conn.queued(), 2);
        rx.recv().await.expect("frame");
        assert_eq!(conn.queued(), 1);
    }

    #[tokio::test]
    async fn full_queue_drops_frames() {
        let (tx, _rx) = mpsc::channel(1);
        let conn = Connection::new(tx);
        assert!(conn.try_send(Outbound::Data(Bytes::from_static(b"a"))));
        assert!(!conn.try_send(Outbound::Data(Bytes::from_static(b"b"))));
    }
}
