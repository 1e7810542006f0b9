// Colon-joined distributed keys addressing one channel shard.
//
// A key has 4 segments (project:resource:resourceType:version) or 5 when a
// location hint is appended. The 5-segment form is the join key between the
// shard registry, per-shard storage, and actor instance selection.
use crate::{Error, Result};
use serde::{Deserialize, Serialize};
use std::fmt;
use std::str::FromStr;

pub const KEY_SEGMENTS: usize = 4;
pub const KEY_SEGMENTS_WITH_HINT: usize = 5;

const SEPARATOR: char = ':';

/// Parsed form of a distributed key.
///
/// ```
/// use relay_common::ChannelAddress;
///
/// let addr = ChannelAddress::new("proj", "room-1", "channel", "v1");
/// assert_eq!(addr.stringify(), "proj:room-1:channel:v1");
/// ```
#[derive(Debug, Clone, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub struct ChannelAddress {
    pub project: String,
    pub resource: String,
    pub resource_type: String,
    pub version: String,
    pub location_hint: Option<String>,
}

impl ChannelAddress {
    pub fn new(
        project: impl Into<String>,
        resource: impl Into<String>,
        resource_type: impl Into<String>,
        version: impl Into<String>,
    ) -> Self {
        Self {
            project: project.into(),
            resource: resource.into(),
            resource_type: resource_type.into(),
            version: version.into(),
            location_hint: None,
        }
    }

    pub fn with_location_hint(mut self, hint: impl Into<String>) -> Self {
        self.location_hint = Some(hint.into());
        self
    }

    // Render the 4- or 5-segment key form.
    pub fn stringify(&self) -> String {
        let base = format!(
            "{}{SEPARATOR}{}{SEPARATOR}{}{SEPARATOR}{}",
            self.project, self.resource, self.resource_type, self.version
        );
        match &self.location_hint {
            Some(hint) => format!("{base}{SEPARATOR}{hint}"),
            None => base,
        }
    }

    pub fn parse(key: &str) -> Result<Self> {
        let segments: Vec<&str> = key.split(SEPARATOR).collect();
        match segments.as_slice() {
            [project, resource, resource_type, version] => Ok(Self {
                project: (*project).to_string(),
                resource: (*resource).to_string(),
                resource_type: (*resource_type).to_string(),
                version: (*version).to_string(),
                location_hint: None,
            }),
            [project, resource, resource_type, version, hint] => Ok(Self {
                project: (*project).to_string(),
                resource: (*resource).to_string(),
                resource_type: (*resource_type).to_string(),
                version: (*version).to_string(),
                location_hint: Some((*hint).to_string()),
            }),
            _ => Err(Error::InvalidKey(key.to_string())),
        }
    }

    pub fn is_valid(key: &str) -> bool {
        let count = key.split(SEPARATOR).count();
        count == KEY_SEGMENTS || count == KEY_SEGMENTS_WITH_HINT
    }
}

impl fmt::Display for ChannelAddress {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.stringify())
    }
}

impl FromStr for ChannelAddress {
    type Err = Error;

    fn from_str(input: &str) -> Result<Self> {
        Self::parse(input)
    }
}

/// Append a location hint to a 4-segment key.
pub fn append_location_hint(key: &str, hint: &str) -> String {
    format!("{key}{SEPARATOR}{hint}")
}

/// Strip the location hint from a 5-segment key; 4-segment keys pass through.
pub fn remove_location_hint(key: &str) -> String {
    let segments: Vec<&str> = key.split(SEPARATOR).collect();
    if segments.len() == KEY_SEGMENTS_WITH_HINT {
        segments[..KEY_SEGMENTS].join(":")
    } else {
        key.to_string()
    }
}

/// The location hint of a 5-segment key, if present.
pub fn location_hint(key: &str) -> Option<&str> {
    let segments: Vec<&str> = key.split(SEPARATOR).collect();
    if segments.len() == KEY_SEGMENTS_WITH_HINT {
        Some(segments[KEY_SEGMENTS])
    } else {
        None
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn stringify_and_parse_round_trip() {
        let addr = ChannelAddress::new("proj", "room-1", "channel", "v1");
        let key = addr.stringify();
        assert_eq!(key, "proj:room-1:channel:v1");
        assert_eq!(ChannelAddress::parse(&key).expect("parse"), addr);
    }

    #[test]
    fn location_hint_round_trip() {
        let key = "proj:room-1:channel:v1";
        let hinted = append_location_hint(key, "weur");
        assert_eq!(hinted, "proj:room-1:channel:v1:weur");
        assert_eq!(location_hint(&hinted), Some("weur"));
        assert_eq!(remove_location_hint(&hinted), key);

        let parsed = ChannelAddress::parse(&hinted).expect("parse");
        assert_eq!(parsed.location_hint.as_deref(), Some("weur"));
        assert_eq!(parsed.stringify(), hinted);
    }

    #[test]
    fn parse_rejects_wrong_segment_count() {
        assert!(ChannelAddress::parse("a:b:c").is_err());
        assert!(ChannelAddress::parse("a:b:c:d:e:f").is_err());
        assert!(!ChannelAddress::is_valid("a:b"));
        assert!(ChannelAddress::is_valid("a:b:c:d"));
        assert!(ChannelAddress::is_valid("a:b:c:d:e"));
    }

    #[test]
    fn remove_hint_is_identity_without_hint() {
        assert_eq!(remove_location_hint("a:b:c:d"), "a:b:c:d");
    }
}
