use anyhow::{Context, Result};
use serde::Deserialize;
use std::fs;
use std::net::SocketAddr;

// Relay broker configuration sourced from environment variables.
#[derive(Debug, Clone)]
pub struct RelayConfig {
    // WebSocket + shard-RPC listener bind address.
    pub http_bind: SocketAddr,
    // Metrics HTTP listener bind address.
    pub metrics_bind: SocketAddr,
    // Ed25519 public key (PEM) grants are verified against.
    pub grant_public_key_pem: String,
    // Fallback location hint when the upgrade carries no header.
    pub location_hint: Option<String>,
    // Replay buffer retention.
    pub buffer_ttl_ms: u64,
    // Outbound-queue fill at which sends yield once first.
    pub backpressure_low: usize,
    // Outbound-queue fill at which sends are skipped.
    pub backpressure_high: usize,
    // Local fan-out batch size between event-loop yields.
    pub broadcast_batch: usize,
    // location-hint -> base URL routes to sibling shards.
    pub peer_routes: Vec<(String, String)>,
    // Usage events are POSTed here when set.
    pub usage_webhook_url: Option<String>,
    // Usage queue depth before events are dropped.
    pub usage_queue_size: usize,
}

const DEFAULT_BUFFER_TTL_MS: u64 = 60_000;
const DEFAULT_BACKPRESSURE_LOW: usize = 16;
const DEFAULT_BACKPRESSURE_HIGH: usize = 48;
const DEFAULT_BROADCAST_BATCH: usize = 10;
const DEFAULT_USAGE_QUEUE_SIZE: usize = 1024;

#[derive(Debug, Deserialize)]
struct RelayConfigOverride {
    http_bind: Option<String>,
    metrics_bind: Option<String>,
    grant_public_key_path: Option<String>,
    location_hint: Option<String>,
    buffer_ttl_ms: Option<u64>,
    backpressure_low: Option<usize>,
    backpressure_high: Option<usize>,
    broadcast_batch: Option<usize>,
    peers: Option<std::collections::BTreeMap<String, String>>,
    usage_webhook_url: Option<String>,
    usage_queue_size: Option<usize>,
}

impl RelayConfig {
    pub fn from_env() -> Result<Self> {
        // Environment variables provide defaults for local development.
        let http_bind = std::env::var("RELAY_HTTP_BIND")
            .unwrap_or_else(|_| "0.0.0.0:8000".to_string())
            .parse()
            .with_context(|| "parse RELAY_HTTP_BIND")?;
        let metrics_bind = std::env::var("RELAY_METRICS_BIND")
            .unwrap_or_else(|_| "0.0.0.0:8080".to_string())
            .parse()
            .with_context(|| "parse RELAY_METRICS_BIND")?;
        let grant_public_key_pem = match std::env::var("RELAY_GRANT_PUBKEY_PEM") {
            Ok(pem) => pem,
            Err(_) => {
                let path = std::env::var("RELAY_GRANT_PUBKEY_PATH")
                    .with_context(|| "set RELAY_GRANT_PUBKEY_PEM or RELAY_GRANT_PUBKEY_PATH")?;
                fs::read_to_string(&path)
                    .with_context(|| format!("read RELAY_GRANT_PUBKEY_PATH: {path}"))?
            }
        };
        let location_hint = std::env::var("RELAY_LOCATION").ok();
        let buffer_ttl_ms = std::env::var("RELAY_BUFFER_TTL_MS")
            .ok()
            .and_then(|value| value.parse::<u64>().ok())
            .filter(|value| *value > 0)
            .unwrap_or(DEFAULT_BUFFER_TTL_MS);
        let backpressure_low = std::env::var("RELAY_BACKPRESSURE_LOW")
            .ok()
            .and_then(|value| value.parse::<usize>().ok())
            .filter(|value| *value > 0)
            .unwrap_or(DEFAULT_BACKPRESSURE_LOW);
        let backpressure_high = std::env::var("RELAY_BACKPRESSURE_HIGH")
            .ok()
            .and_then(|value| value.parse::<usize>().ok())
            .filter(|value| *value > backpressure_low)
            .unwrap_or(DEFAULT_BACKPRESSURE_HIGH.max(backpressure_low + 1));
        let broadcast_batch = std::env::var("RELAY_BROADCAST_BATCH")
            .ok()
            .and_then(|value| value.parse::<usize>().ok())
            .filter(|value| *value > 0)
            .unwrap_or(DEFAULT_BROADCAST_BATCH);
        let peer_routes = std::env::var("RELAY_PEERS")
            .ok()
            .map(|value| parse_peer_routes(&value))
            .transpose()?
            .unwrap_or_default();
        let usage_webhook_url = std::env::var("RELAY_USAGE_WEBHOOK_URL").ok();
        let usage_queue_size = std::env::var("RELAY_USAGE_QUEUE")
            .ok()
            .and_then(|value| value.parse::<usize>().ok())
            .filter(|value| *value > 0)
            .unwrap_or(DEFAULT_USAGE_QUEUE_SIZE);
        Ok(Self {
            http_bind,
            metrics_bind,
            grant_public_key_pem,
            location_hint,
            buffer_ttl_ms,
            backpressure_low,
            backpressure_high,
            broadcast_batch,
            peer_routes,
            usage_webhook_url,
            usage_queue_size,
        })
    }

    pub fn from_env_or_yaml() -> Result<Self> {
        let mut config = Self::from_env()?;
        if let Ok(path) = std::env::var("RELAY_BROKER_CONFIG") {
            // YAML overrides allow ops-friendly config files.
            let contents = fs::read_to_string(&path)
                .with_context(|| format!("read RELAY_BROKER_CONFIG: {path}"))?;
            let override_cfg: RelayConfigOverride =
                serde_yaml::from_str(&contents).with_context(|| "parse relay config yaml")?;
            if let Some(value) = override_cfg.http_bind {
                config.http_bind = value.parse().with_context(|| "parse http_bind")?;
            }
            if let Some(value) = override_cfg.metrics_bind {
                config.metrics_bind = value.parse().with_context(|| "parse metrics_bind")?;
            }
            if let Some(path) = override_cfg.grant_public_key_path {
                config.grant_public_key_pem = fs::read_to_string(&path)
                    .with_context(|| format!("read grant_public_key_path: {path}"))?;
            }
            if let Some(value) = override_cfg.location_hint {
                config.location_hint = Some(value);
            }
            if let Some(value) = override_cfg.buffer_ttl_ms
                && value > 0
            {
                config.buffer_ttl_ms = value;
            }
            if let Some(value) = override_cfg.backpressure_low
                && value > 0
            {
                config.backpressure_low = value;
            }
            if let Some(value) = override_cfg.backpressure_high
                && value > config.backpressure_low
            {
                config.backpressure_high = value;
            }
            if let Some(value) = override_cfg.broadcast_batch
                && value > 0
            {
                config.broadcast_batch = value;
            }
            if let Some(peers) = override_cfg.peers {
                config.peer_routes = peers.into_iter().collect();
            }
            if let Some(value) = override_cfg.usage_webhook_url {
                config.usage_webhook_url = Some(value);
            }
            if let Some(value) = override_cfg.usage_queue_size
                && value > 0
            {
                config.usage_queue_size = value;
            }
        }
        Ok(config)
    }

    pub fn actor_config(&self) -> relay_channel::ActorConfig {
        relay_channel::ActorConfig {
            buffer_ttl_ms: self.buffer_ttl_ms,
            watermarks: relay_channel::Watermarks {
                low: self.backpressure_low,
                high: self.backpressure_high,
            },
            broadcast_batch: self.broadcast_batch,
        }
    }
}

// "weur=http://a:8000,enam=http://b:8000"
fn parse_peer_routes(value: &str) -> Result<Vec<(String, String)>> {
    let mut routes = Vec::new();
    for entry in value.split(',').filter(|entry| !entry.trim().is_empty()) {
        let (hint, url) = entry
            .split_once('=')
            .with_context(|| format!("parse RELAY_PEERS entry: {entry}"))?;
        routes.push((hint.trim().to_string(), url.trim().to_string()));
    }
    Ok(routes)
}
