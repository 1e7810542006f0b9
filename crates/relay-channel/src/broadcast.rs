// Local fan-out of one message to every eligible connected socket.
//
// The message is serialized once; sockets get cheap clones of the bytes.
// Fan-out runs in fixed-size batches with an explicit yield between them so
// a large subscriber set cannot monopolize the actor's event processing.
use crate::connection::{Connection, Outbound};
use crate::{ChannelResult, BROADCAST_BATCH};
use metrics::counter;
use relay_wire::{encode_message, Message, CURIOSITY_NOTICE};
use std::collections::{HashMap, HashSet};
use tokio::sync::RwLock;
use tokio::task::yield_now;
use tracing::debug;
use uuid::Uuid;

/// Outbound-queue fill levels steering per-socket send decisions.
#[derive(Debug, Clone, Copy)]
pub struct Watermarks {
    /// At or above this fill, yield once before sending.
    pub low: usize,
    /// At or above this fill, skip the send; the client catches up on
    /// reconnect.
    pub high: usize,
}

impl Default for Watermarks {
    fn default() -> Self {
        Self { low: 16, high: 48 }
    }
}

#[derive(Debug, Default, Clone, Copy, PartialEq, Eq)]
pub struct BroadcastOutcome {
    pub sent: usize,
    pub skipped_backpressure: usize,
    pub dropped_queue_full: usize,
}

pub struct MessageBroadcaster {
    watermarks: Watermarks,
    batch: usize,
}

impl Default for MessageBroadcaster {
    fn default() -> Self {
        Self::new(Watermarks::default(), BROADCAST_BATCH)
    }
}

struct Recipient {
    client_id: String,
    can_read: bool,
    curiosity: bool,
    conn: Connection,
}

impl MessageBroadcaster {
    pub fn new(watermarks: Watermarks, batch: usize) -> Self {
        Self { watermarks, batch }
    }

    /// Deliver `message` to every locally-connected, subscribed, authorized
    /// socket, at most once per client id.
    pub async fn broadcast(
        &self,
        connections: &RwLock<HashMap<Uuid, Connection>>,
        message: &Message,
        sender_id: &str,
        subscribers: &[String],
    ) -> ChannelResult<BroadcastOutcome> {
        let bytes = encode_message(message)?;
        // Curiosity-scoped sockets get a fixed notice, never the payload.
        let mut curiosity_body = message.clone();
        curiosity_body.payload = CURIOSITY_NOTICE.to_string();
        curiosity_body.client_msg_id = None;
        let curiosity_bytes = encode_message(&curiosity_body)?;

        // Snapshot eligibility under the read lock, send outside it.
        let recipients: Vec<Recipient> = {
            let guard = connections.read().await;
            guard
                .values()
                .filter_map(|conn| {
                    let grant = conn.grant()?;
                    let scope = grant.scope_for(&message.topic)?;
                    Some(Recipient {
                        client_id: grant.user_id,
                        can_read: scope.can_read(),
                        curiosity: scope == relay_grant::Scope::Curiosity,
                        conn: conn.clone(),
                    })
                })
                .collect()
        };

        let mut outcome = BroadcastOutcome::default();
        let mut delivered: HashSet<String> = HashSet::new();
        for batch in recipients.chunks(self.batch.max(1)) {
            for recipient in batch {
                if delivered.contains(&recipient.client_id) {
                    continue;
                }
                if recipient.curiosity {
                    // Marked delivered whether or not the frame lands, so a
                    // second socket of the same client is not retried.
                    recipient
                        .conn
                        .try_send(Outbound::Data(curiosity_bytes.clone()));
                    delivered.insert(recipient.client_id.clone());
                    continue;
                }
                if !recipient.can_read
                    || recipient.client_id == sender_id
                    || !subscribers.iter().any(|id| *id == recipient.client_id)
                {
                    continue;
                }

                let queued = recipient.conn.queued();
                if queued >= self.watermarks.high {
                    outcome.skipped_backpressure += 1;
                    continue;
                }
                if queued >= self.watermarks.low {
                    yield_now().await;
                }
                if recipient.conn.try_send(Outbound::Data(bytes.clone())) {
                    delivered.insert(recipient.client_id.clone());
                    outcome.sent += 1;
                } else {
                    outcome.dropped_queue_full += 1;
                }
            }
            yield_now().await;
        }

        counter!("relay_broadcast_sent_total").increment(outcome.sent as u64);
        counter!("relay_broadcast_backpressure_skips_total")
            .increment(outcome.skipped_backpressure as u64);
        debug!(
            topic = %message.topic,
            seq = %message.seq,
            sent = outcome.sent,
            skipped = outcome.skipped_backpressure,
            "local broadcast complete"
        );
        Ok(outcome)
    }
}
