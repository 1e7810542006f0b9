// Keyed storage with transaction semantics for multi-step mutations.
//
// Each channel shard is logically single-threaded, so the only atomicity the
// core needs is read-modify-write sequences surviving actor suspension
// between steps. Transactions here take the storage lock for the duration of
// a synchronous closure over the live key space.
use bytes::Bytes;
use serde::Serialize;
use serde::de::DeserializeOwned;
use std::collections::BTreeMap;
use tokio::sync::Mutex;

pub type Result<T> = std::result::Result<T, StorageError>;

#[derive(thiserror::Error, Debug)]
pub enum StorageError {
    #[error("serialize record: {0}")]
    Serialize(serde_json::Error),
    #[error("deserialize record: {0}")]
    Deserialize(serde_json::Error),
    #[error("storage backend: {0}")]
    Backend(String),
}

/// Mutable view of the key space inside a transaction.
pub trait Txn {
    fn get(&self, key: &str) -> Option<Bytes>;
    fn put(&mut self, key: &str, value: Bytes);
    fn delete(&mut self, key: &str) -> bool;
}

pub type TxnFn<'a> = Box<dyn FnOnce(&mut dyn Txn) -> Result<()> + Send + 'a>;

/// Keyed storage boundary consumed by the channel core.
///
/// `list` returns keys in lexicographic order; buffered-message keys embed a
/// time-sortable sequence, so lexicographic order is chronological order.
#[async_trait::async_trait]
pub trait Storage: Send + Sync {
    async fn get(&self, key: &str) -> Result<Option<Bytes>>;
    async fn put(&self, key: &str, value: Bytes) -> Result<()>;
    async fn delete(&self, key: &str) -> Result<bool>;
    async fn list(&self, prefix: &str, limit: Option<usize>) -> Result<Vec<String>>;
    async fn transaction(&self, f: TxnFn<'_>) -> Result<()>;
}

/// Read a JSON-encoded record.
pub async fn get_json<T: DeserializeOwned>(storage: &dyn Storage, key: &str) -> Result<Option<T>> {
    match storage.get(key).await? {
        Some(bytes) => serde_json::from_slice(&bytes)
            .map(Some)
            .map_err(StorageError::Deserialize),
        None => Ok(None),
    }
}

/// Write a JSON-encoded record.
pub async fn put_json<T: Serialize>(storage: &dyn Storage, key: &str, value: &T) -> Result<()> {
    let bytes = serde_json::to_vec(value).map_err(StorageError::Serialize)?;
    storage.put(key, Bytes::from(bytes)).await
}

/// In-memory sorted key/value store.
///
/// ```
/// use bytes::Bytes;
/// use relay_storage::{MemoryStorage, Storage};
///
/// let rt = tokio::runtime::Runtime::new().expect("rt");
/// rt.block_on(async {
///     let storage = MemoryStorage::new();
///     storage.put("k", Bytes::from_static(b"v")).await.expect("put");
///     assert_eq!(
///         storage.get("k").await.expect("get"),
///         Some(Bytes::from_static(b"v"))
///     );
/// });
/// ```
#[derive(Debug, Default)]
pub struct MemoryStorage {
    // BTreeMap keeps prefix listings sorted without a separate index.
    inner: Mutex<BTreeMap<String, Bytes>>,
}

impl MemoryStorage {
    pub fn new() -> Self {
        Self::default()
    }
}

struct MapTxn<'a> {
    map: &'a mut BTreeMap<String, Bytes>,
}

impl Txn for MapTxn<'_> {
    fn get(&self, key: &str) -> Option<Bytes> {
        self.map.get(key).cloned()
    }

    fn put(&mut self, key: &str, value: Bytes) {
        self.map.insert(key.to_string(), value);
    }

    fn delete(&mut self, key: &str) -> bool {
        self.map.remove(key).is_some()
    }
}

#[async_trait::async_trait]
impl Storage for MemoryStorage {
    async fn get(&self, key: &str) -> Result<Option<Bytes>> {
        Ok(self.inner.lock().await.get(key).cloned())
    }

    async fn put(&self, key: &str, value: Bytes) -> Result<()> {
        self.inner.lock().await.insert(key.to_string(), value);
        Ok(())
    }

    async fn delete(&self, key: &str) -> Result<bool> {
        Ok(self.inner.lock().await.remove(key).is_some())
    }

    async fn list(&self, prefix: &str, limit: Option<usize>) -> Result<Vec<String>> {
        let guard = self.inner.lock().await;
        let keys = guard
            .range(prefix.to_string()..)
            .take_while(|(key, _)| key.starts_with(prefix))
            .map(|(key, _)| key.clone());
        Ok(match limit {
            Some(limit) => keys.take(limit).collect(),
            None => keys.collect(),
        })
    }

    async fn transaction(&self, f: TxnFn<'_>) -> Result<()> {
        let mut guard = self.inner.lock().await;
        let mut txn = MapTxn { map: &mut guard };
        f(&mut txn)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[tokio::test]
    async fn put_get_delete_round_trip() {
        let storage = MemoryStorage::new();
        storage
            .put("k", Bytes::from_static(b"value"))
            .await
            .expect("put");
        assert_eq!(
            storage.get("k").await.expect("get"),
            Some(Bytes::from_static(b"value"))
        );
        assert!(storage.delete("k").await.expect("delete"));
        assert_eq!(storage.get("k").await.expect("get"), None);
        assert!(!storage.delete("k").await.expect("delete"));
    }

    #[tokio::test]
    async fn list_returns_sorted_prefix_matches() {
        let storage = MemoryStorage::new();
        for key in ["msg:t:003", "msg:t:001", "msg:u:001", "msg:t:002"] {
            storage.put(key, Bytes::new()).await.expect("put");
        }
        let keys = storage.list("msg:t:", None).await.expect("list");
        assert_eq!(keys, vec!["msg:t:001", "msg:t:002", "msg:t:003"]);
        let limited = storage.list("msg:t:", Some(2)).await.expect("list");
        assert_eq!(limited, vec!["msg:t:001", "msg:t:002"]);
    }

    #[tokio::test]
    async fn transaction_sees_and_applies_writes() {
        let storage = MemoryStorage::new();
        storage
            .put("count", Bytes::from_static(b"1"))
            .await
            .expect("put");
        storage
            .transaction(Box::new(|txn| {
                let current = txn.get("count").expect("present");
                assert_eq!(current, Bytes::from_static(b"1"));
                txn.put("count", Bytes::from_static(b"2"));
                txn.delete("missing");
                Ok(())
            }))
            .await
            .expect("txn");
        assert_eq!(
            storage.get("count").await.expect("get"),
            Some(Bytes::from_static(b"2"))
        );
    }

    #[tokio::test]
    async fn json_helpers_round_trip() {
        let storage = MemoryStorage::new();
        put_json(&storage, "list", &vec!["a".to_string(), "b".to_string()])
            .await
            .expect("put");
        let value: Option<Vec<String>> = get_json(&storage, "list").await.expect("get");
        assert_eq!(value, Some(vec!["a".to_string(), "b".to_string()]));
        let missing: Option<Vec<String>> = get_json(&storage, "nope").await.expect("get");
        assert!(missing.is_none());
    }
}
