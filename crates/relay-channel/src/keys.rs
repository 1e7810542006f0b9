// Storage key layout for one channel shard.
//
// All keys are rooted at the channel's 4-segment distributed key, so two
// shards of different channels sharing a storage backend never collide.
// Message keys end in the time-sortable seq, which makes a lexicographic
// prefix listing a chronological scan.
use relay_common::ChannelAddress;

pub fn subscribers(addr: &ChannelAddress, topic: &str) -> String {
    format!("sub:{}:{topic}", base(addr))
}

pub fn sequence_cursor(addr: &ChannelAddress, topic: &str) -> String {
    format!("seq:{}:{topic}", base(addr))
}

pub fn message(addr: &ChannelAddress, topic: &str, seq: &str) -> String {
    format!("{}{seq}", message_prefix(addr, topic))
}

pub fn message_prefix(addr: &ChannelAddress, topic: &str) -> String {
    format!("msg:{}:{topic}:", base(addr))
}

pub fn last_seen(addr: &ChannelAddress, topic: &str, client_id: &str) -> String {
    format!("seen:{}:{topic}:{client_id}", base(addr))
}

pub fn shard_set(addr: &ChannelAddress) -> String {
    format!("shards:{}", base(addr))
}

pub fn location(addr: &ChannelAddress) -> String {
    format!("loc:{}", base(addr))
}

fn base(addr: &ChannelAddress) -> String {
    ChannelAddress::new(
        addr.project.clone(),
        addr.resource.clone(),
        addr.resource_type.clone(),
        addr.version.clone(),
    )
    .stringify()
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn keys_are_rooted_at_the_hintless_address() {
        let addr = ChannelAddress::new("p", "r", "channel", "v1").with_location_hint("weur");
        assert_eq!(subscribers(&addr, "orders"), "sub:p:r:channel:v1:orders");
        assert_eq!(message(&addr, "orders", "00a-01"), "msg:p:r:channel:v1:orders:00a-01");
        assert_eq!(last_seen(&addr, "orders", "u1"), "seen:p:r:channel:v1:orders:u1");
        assert_eq!(shard_set(&addr), "shards:p:r:channel:v1");
    }

    #[test]
    fn message_keys_share_the_listing_prefix() {
        let addr = ChannelAddress::new("p", "r", "channel", "v1");
        let key = message(&addr, "orders", "0001");
        assert!(key.starts_with(&message_prefix(&addr, "orders")));
    }
}
