// HTTP transport to sibling shards.
//
// A shard key's location hint selects the peer's base URL from the
// configured routes; the RPC bodies are the same JSON the local endpoints
// accept.
use relay_channel::{ChannelError, ChannelResult, ReplicaPublish, ShardPeer};
use relay_common::address::location_hint;
use std::collections::HashMap;

pub struct HttpShardPeer {
    client: reqwest::Client,
    routes: HashMap<String, String>,
}

impl HttpShardPeer {
    pub fn new(routes: &[(String, String)]) -> Self {
        Self {
            client: reqwest::Client::new(),
            routes: routes.iter().cloned().collect(),
        }
    }

    fn url_for(&self, shard_key: &str, path: &str) -> ChannelResult<String> {
        let hint = location_hint(shard_key)
            .ok_or_else(|| ChannelError::Peer(format!("shard key without location: {shard_key}")))?;
        let base = self
            .routes
            .get(hint)
            .ok_or_else(|| ChannelError::Peer(format!("no route for location {hint}")))?;
        Ok(format!("{}{path}", base.trim_end_matches('/')))
    }

    async fn post<T: serde::Serialize>(&self, url: &str, body: &T) -> ChannelResult<()> {
        let response = self
            .client
            .post(url)
            .json(body)
            .send()
            .await
            .map_err(|err| ChannelError::Peer(err.to_string()))?;
        if !response.status().is_success() {
            return Err(ChannelError::Peer(format!(
                "{url} responded {}",
                response.status()
            )));
        }
        Ok(())
    }
}

#[async_trait::async_trait]
impl ShardPeer for HttpShardPeer {
    async fn publish(&self, shard_key: &str, request: &ReplicaPublish) -> ChannelResult<()> {
        let url = self.url_for(shard_key, "/v1/shard/publish")?;
        self.post(&url, request).await
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn unknown_location_is_an_error() {
        let peer = HttpShardPeer::new(&[("weur".to_string(), "http://a:8000/".to_string())]);
        assert_eq!(
            peer.url_for("p:r:channel:v1:weur", "/v1/shard/publish")
                .expect("url"),
            "http://a:8000/v1/shard/publish"
        );
        assert!(peer.url_for("p:r:channel:v1:apac", "/v1/shard/publish").is_err());
        assert!(peer.url_for("p:r:channel:v1", "/v1/shard/publish").is_err());
    }
}
