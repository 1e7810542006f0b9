// Per-topic sequence identifiers.
//
// A seq is `{unix_ms:012x}-{tiebreak:016x}`: fixed-width hex, so string
// order equals time order. Only the shard that accepts a publish mints a
// seq; replicas receive the same value verbatim.
use crate::{keys, now_epoch_millis, ChannelError, ChannelResult};
use bytes::Bytes;
use rand::rngs::SmallRng;
use rand::{Rng, SeedableRng};
use relay_common::ChannelAddress;
use relay_storage::Storage;
use std::collections::HashMap;
use std::sync::Arc;
use tokio::sync::Mutex;
use tracing::warn;

const MS_WIDTH: usize = 12;
const TIEBREAK_WIDTH: usize = 16;
const MAX_TIEBREAK_STEP: u64 = 0xffff;

pub fn encode_sequence(unix_ms: u64, tiebreak: u64) -> String {
    format!("{unix_ms:0MS_WIDTH$x}-{tiebreak:0TIEBREAK_WIDTH$x}")
}

pub fn decode_sequence(seq: &str) -> Option<(u64, u64)> {
    let (ms, tiebreak) = seq.split_once('-')?;
    if ms.len() != MS_WIDTH || tiebreak.len() != TIEBREAK_WIDTH {
        return None;
    }
    Some((
        u64::from_str_radix(ms, 16).ok()?,
        u64::from_str_radix(tiebreak, 16).ok()?,
    ))
}

/// Embedded unix-millis timestamp of a seq.
pub fn decode_timestamp(seq: &str) -> Option<u64> {
    decode_sequence(seq).map(|(ms, _)| ms)
}

pub struct SequenceManager {
    storage: Arc<dyn Storage>,
    address: ChannelAddress,
    // Topic-scoped tie-break streams, seeded from the topic name so a
    // rehydrated actor draws a consistent stream for the same topic.
    rngs: Mutex<HashMap<String, SmallRng>>,
}

impl SequenceManager {
    pub fn new(storage: Arc<dyn Storage>, address: ChannelAddress) -> Self {
        Self {
            storage,
            address,
            rngs: Mutex::new(HashMap::new()),
        }
    }

    /// Mint the next seq for a topic and durably advance the cursor.
    ///
    /// The cursor write happens in the same transaction as the read, so a
    /// suspended-and-rehydrated actor can never mint a duplicate. Storage
    /// failure propagates: the publish must not proceed on a seq that was
    /// not durably advanced.
    pub async fn generate_sequence(&self, topic: &str) -> ChannelResult<String> {
        let mut rngs = self.rngs.lock().await;
        let rng = rngs
            .entry(topic.to_string())
            .or_insert_with(|| SmallRng::seed_from_u64(fnv1a64(topic.as_bytes())));
        let key = keys::sequence_cursor(&self.address, topic);
        let topic_owned = topic.to_string();
        let mut minted: Option<String> = None;

        self.storage
            .transaction(Box::new(|txn| {
                let now = now_epoch_millis();
                let last = txn
                    .get(&key)
                    .map(|bytes| String::from_utf8_lossy(&bytes).into_owned());
                let next = match last.as_deref().map(decode_sequence) {
                    Some(Some((last_ms, last_tiebreak))) => {
                        next_after(last_ms, last_tiebreak, now, rng)
                    }
                    Some(None) => {
                        warn!(topic = %topic_owned, cursor = ?last, "corrupt sequence cursor, minting fresh");
                        encode_sequence(now, rng.r#gen())
                    }
                    None => encode_sequence(now, rng.r#gen()),
                };
                txn.put(&key, Bytes::from(next.clone().into_bytes()));
                minted = Some(next);
                Ok(())
            }))
            .await?;

        minted.ok_or_else(|| {
            ChannelError::Storage(relay_storage::StorageError::Backend(
                "sequence transaction yielded no value".to_string(),
            ))
        })
    }

    /// Last issued seq for a topic, if any.
    pub async fn cursor(&self, topic: &str) -> ChannelResult<Option<String>> {
        let key = keys::sequence_cursor(&self.address, topic);
        Ok(self
            .storage
            .get(&key)
            .await?
            .map(|bytes| String::from_utf8_lossy(&bytes).into_owned()))
    }
}

// Basis is max(last_ms, now): monotonic even when wall clock regresses.
// Within the same millisecond the tie-break advances by a random positive
// step; tie-break exhaustion rolls over into the next millisecond.
fn next_after(last_ms: u64, last_tiebreak: u64, now: u64, rng: &mut SmallRng) -> String {
    let basis = last_ms.max(now);
    if basis == last_ms {
        match last_tiebreak.checked_add(rng.gen_range(1..=MAX_TIEBREAK_STEP)) {
            Some(tiebreak) => encode_sequence(basis, tiebreak),
            None => encode_sequence(basis + 1, rng.r#gen()),
        }
    } else {
        encode_sequence(basis, rng.r#gen())
    }
}

fn fnv1a64(bytes: &[u8]) -> u64 {
    let mut hash: u64 = 0xcbf2_9ce4_8422_2325;
    for byte in bytes {
        hash ^= u64::from(*byte);
        hash = hash.wrapping_mul(0x0000_0100_0000_01b3);
    }
    hash
}

#[cfg(test)]
mod tests {
    use super::*;
    use relay_storage::MemoryStorage;

    fn manager() -> SequenceManager {
        SequenceManager::new(
            Arc::new(MemoryStorage::new()),
            ChannelAddress::new("p", "r", "channel", "v1"),
        )
    }

    #[test]
    fn sequences_are_fixed_width_and_decodable() {
        let seq = encode_sequence(1_700_000_000_000, 42);
        assert_eq!(seq.len(), MS_WIDTH + 1 + TIEBREAK_WIDTH);
        assert_eq!(decode_sequence(&seq), Some((1_700_000_000_000, 42)));
        assert_eq!(decode_timestamp(&seq), Some(1_700_000_000_000));
        assert_eq!(decode_sequence("junk"), None);
        assert_eq!(decode_sequence("1-2"), None);
    }

    #[tokio::test]
    async fn back_to_back_sequences_strictly_increase() {
        let manager = manager();
        let mut previous = String::new();
        for _ in 0..200 {
            let seq = manager.generate_sequence("orders").await.expect("seq");
            assert!(seq > previous, "{seq} !> {previous}");
            previous = seq;
        }
    }

    #[tokio::test]
    async fn cursor_survives_between_mints() {
        let manager = manager();
        let first = manager.generate_sequence("orders").await.expect("seq");
        assert_eq!(
            manager.cursor("orders").await.expect("cursor"),
            Some(first.clone())
        );
        let second = manager.generate_sequence("orders").await.expect("seq");
        assert!(second > first);
    }

    #[tokio::test]
    async fn clock_regression_does_not_regress_sequences() {
        let storage = Arc::new(MemoryStorage::new());
        let address = ChannelAddress::new("p", "r", "channel", "v1");
        // Pre-plant a cursor from the far future.
        let future = now_epoch_millis() + 3_600_000;
        let planted = encode_sequence(future, 7);
        storage
            .put(
                &keys::sequence_cursor(&address, "orders"),
                Bytes::from(planted.clone().into_bytes()),
            )
            .await
            .expect("put");

        let manager = SequenceManager::new(storage, address);
        let seq = manager.generate_sequence("orders").await.expect("seq");
        assert!(seq > planted);
        assert_eq!(decode_timestamp(&seq), Some(future));
    }

    #[tokio::test]
    async fn corrupt_cursor_falls_back_to_fresh_mint() {
        let storage = Arc::new(MemoryStorage::new());
        let address = ChannelAddress::new("p", "r", "channel", "v1");
        storage
            .put(
                &keys::sequence_cursor(&address, "orders"),
                Bytes::from_static(b"not-a-seq"),
            )
            .await
            .expect("put");

        let manager = SequenceManager::new(storage, address);
        let seq = manager.generate_sequence("orders").await.expect("seq");
        assert!(decode_sequence(&seq).is_some());
    }

    #[tokio::test]
    async fn topics_have_independent_cursors() {
        let manager = manager();
        let orders = manager.generate_sequence("orders").await.expect("seq");
        let payments = manager.generate_sequence("payments").await.expect("seq");
        assert_eq!(
            manager.cursor("orders").await.expect("cursor"),
            Some(orders)
        );
        assert_eq!(
            manager.cursor("payments").await.expect("cursor"),
            Some(payments)
        );
    }
}
