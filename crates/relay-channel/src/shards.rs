// Shard membership for one logical channel.
//
// Membership is pushed by an external process; this registry only stores
// the known location-suffixed shard keys and this instance's own location.
use crate::{keys, ChannelResult};
use bytes::Bytes;
use relay_common::{address::append_location_hint, ChannelAddress};
use relay_storage::Storage;
use std::collections::BTreeSet;
use std::sync::Arc;
use tracing::debug;

pub struct ShardRegistry {
    storage: Arc<dyn Storage>,
    address: ChannelAddress,
}

impl ShardRegistry {
    pub fn new(storage: Arc<dyn Storage>, address: ChannelAddress) -> Self {
        Self { storage, address }
    }

    /// All known shard keys for this channel, self excluded at write time.
    pub async fn available_shards(&self) -> ChannelResult<Vec<String>> {
        let key = keys::shard_set(&self.address);
        Ok(relay_storage::get_json(self.storage.as_ref(), &key)
            .await?
            .unwrap_or_default())
    }

    /// Replace the membership set.
    ///
    /// Deduplicates, drops this instance's own key, and skips the write
    /// when the resulting set equals what is stored (order-independent),
    /// so frequent refreshes from the membership process stay cheap.
    pub async fn set_shards(&self, shard_keys: &[String]) -> ChannelResult<()> {
        let own = self.own_shard_key().await?;
        let incoming: BTreeSet<String> = shard_keys
            .iter()
            .filter(|key| own.as_deref() != Some(key.as_str()))
            .cloned()
            .collect();
        let current: BTreeSet<String> = self.available_shards().await?.into_iter().collect();
        if incoming == current {
            return Ok(());
        }
        let sorted: Vec<String> = incoming.into_iter().collect();
        let key = keys::shard_set(&self.address);
        relay_storage::put_json(self.storage.as_ref(), &key, &sorted).await?;
        debug!(shards = sorted.len(), "shard membership updated");
        Ok(())
    }

    /// Known shards minus self. Membership writes already exclude self, but
    /// a stored set written before the location hint existed may still
    /// contain it.
    pub async fn remote_shards(&self) -> ChannelResult<Vec<String>> {
        let own = self.own_shard_key().await?;
        Ok(self
            .available_shards()
            .await?
            .into_iter()
            .filter(|key| own.as_deref() != Some(key.as_str()))
            .collect())
    }

    pub async fn location_hint(&self) -> ChannelResult<Option<String>> {
        let key = keys::location(&self.address);
        Ok(self
            .storage
            .get(&key)
            .await?
            .map(|bytes| String::from_utf8_lossy(&bytes).into_owned()))
    }

    /// Record this instance's location. Called once, at upgrade time.
    pub async fn set_location_hint(&self, hint: &str) -> ChannelResult<()> {
        let key = keys::location(&self.address);
        self.storage
            .put(&key, Bytes::from(hint.to_string().into_bytes()))
            .await?;
        Ok(())
    }

    /// This instance's 5-segment key, once its location is known.
    pub async fn own_shard_key(&self) -> ChannelResult<Option<String>> {
        let base = ChannelAddress::new(
            self.address.project.clone(),
            self.address.resource.clone(),
            self.address.resource_type.clone(),
            self.address.version.clone(),
        )
        .stringify();
        Ok(self
            .location_hint()
            .await?
            .map(|hint| append_location_hint(&base, &hint)))
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use relay_storage::MemoryStorage;

    fn registry() -> ShardRegistry {
        ShardRegistry::new(
            Arc::new(MemoryStorage::new()),
            ChannelAddress::new("p", "r", "channel", "v1"),
        )
    }

    #[tokio::test]
    async fn membership_dedupes_and_drops_self() {
        let registry = registry();
        registry.set_location_hint("weur").await.expect("hint");
        assert_eq!(
            registry.own_shard_key().await.expect("own").as_deref(),
            Some("p:r:channel:v1:weur")
        );

        registry
            .set_shards(&[
                "p:r:channel:v1:enam".to_string(),
                "p:r:channel:v1:weur".to_string(),
                "p:r:channel:v1:enam".to_string(),
                "p:r:channel:v1:apac".to_string(),
            ])
            .await
            .expect("set");

        let shards = registry.available_shards().await.expect("list");
        assert_eq!(shards, vec!["p:r:channel:v1:apac", "p:r:channel:v1:enam"]);
        assert_eq!(registry.remote_shards().await.expect("remote"), shards);
    }

    #[tokio::test]
    async fn equal_set_is_a_noop_write() {
        let registry = registry();
        registry.set_location_hint("weur").await.expect("hint");
        registry
            .set_shards(&["p:r:channel:v1:enam".to_string(), "p:r:channel:v1:apac".to_string()])
            .await
            .expect("set");
        // Same members, different order: stored value must be unchanged.
        registry
            .set_shards(&["p:r:channel:v1:apac".to_string(), "p:r:channel:v1:enam".to_string()])
            .await
            .expect("set");
        assert_eq!(
            registry.available_shards().await.expect("list"),
            vec!["p:r:channel:v1:apac", "p:r:channel:v1:enam"]
        );
    }

    #[tokio::test]
    async fn remote_shards_filters_self_from_stale_sets() {
        let registry = registry();
        // Membership stored before the hint was known includes self.
        registry
            .set_shards(&["p:r:channel:v1:weur".to_string(), "p:r:channel:v1:enam".to_string()])
            .await
            .expect("set");
        registry.set_location_hint("weur").await.expect("hint");
        assert_eq!(
            registry.remote_shards().await.expect("remote"),
            vec!["p:r:channel:v1:enam"]
        );
    }

    #[tokio::test]
    async fn location_hint_starts_absent() {
        let registry = registry();
        assert_eq!(registry.location_hint().await.expect("hint"), None);
        assert_eq!(registry.own_shard_key().await.expect("own"), None);
    }
}
