// Shared data types and small helpers used across crates.
use serde::{Deserialize, Serialize};

pub mod address;

pub use address::{ChannelAddress, KEY_SEGMENTS, KEY_SEGMENTS_WITH_HINT};

pub type Result<T> = std::result::Result<T, Error>;

#[derive(thiserror::Error, Debug)]
pub enum Error {
    #[error("invalid distributed key: {0}")]
    InvalidKey(String),
    #[error("config error: {0}")]
    Config(String),
}

/// Client identifier carried by a grant's `userId` claim.
///
/// ```
/// use relay_common::ClientId;
///
/// let client = ClientId::new("user-7");
/// assert_eq!(client.as_str(), "user-7");
/// ```
#[derive(Debug, Clone, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub struct ClientId(String);

impl ClientId {
    pub fn new(value: impl Into<String>) -> Self {
        Self(value.into())
    }

    pub fn as_str(&self) -> &str {
        &self.0
    }
}

impl std::fmt::Display for ClientId {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(&self.0)
    }
}

/// Location hint identifying one regional replica of a channel.
#[derive(Debug, Clone, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub struct LocationHint(String);

impl LocationHint {
    pub fn new(value: impl Into<String>) -> Self {
        Self(value.into())
    }

    pub fn as_str(&self) -> &str {
        &self.0
    }
}

impl std::fmt::Display for LocationHint {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(&self.0)
    }
}
