//! Inbound deduplication cache, per spec §3/§4.10: a TTL map keyed by
//! `msg_id`, falling back to `NID:SEQUENCE`, falling back to `NID`.

use std::collections::HashMap;

use etcs_types::EtcsMessage;

const TTL_MS: u64 = 5000;

#[derive(Debug, Default)]
pub struct DedupCache {
    last_seen_ms: HashMap<String, u64>,
}

fn dedup_key(msg: &EtcsMessage) -> String {
    if let Some(msg_id) = msg.field("msg_id") {
        return format!("id:{msg_id}");
    }
    if msg.sequence != 0 {
        return format!("{}:{}", msg.nid_message, msg.sequence);
    }
    msg.nid_message.to_string()
}

impl DedupCache {
    pub fn new() -> Self {
        Self::default()
    }

    fn evict_expired(&mut self, now_ms: u64) {
        self.last_seen_ms.retain(|_, &mut seen| now_ms.saturating_sub(seen) < TTL_MS);
    }

    /// Returns `true` if `msg` is a duplicate seen within the TTL window
    /// (and should be silently dropped before dispatch), else records it
    /// as seen and returns `false`.
    pub fn is_duplicate(&mut self, msg: &EtcsMessage, now_ms: u64) -> bool {
        self.evict_expired(now_ms);
        let key = dedup_key(msg);
        if let Some(&seen) = self.last_seen_ms.get(&key) {
            if now_ms.saturating_sub(seen) < TTL_MS {
                return true;
            }
        }
        self.last_seen_ms.insert(key, now_ms);
        false
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use etcs_types::{FieldValues, Source};

    fn msg(nid: u8, sequence: u32) -> EtcsMessage {
        EtcsMessage {
            nid_message: nid,
            sequence,
            origin: Source::Wire,
            t_train: None,
            t_train_ack: None,
            t_app_ms: 0,
            t_send_ms: 0,
            fields: FieldValues::new(),
            extra: std::collections::HashMap::new(),
        }
    }

    #[test]
    fn duplicate_within_ttl_is_dropped() {
        let mut cache = DedupCache::new();
        assert!(!cache.is_duplicate(&msg(136, 1), 1000));
        assert!(cache.is_duplicate(&msg(136, 1), 1500));
    }

    #[test]
    fn duplicate_after_ttl_is_accepted_again() {
        let mut cache = DedupCache::new();
        assert!(!cache.is_duplicate(&msg(136, 1), 1000));
        assert!(!cache.is_duplicate(&msg(136, 1), 7000));
    }

    #[test]
    fn different_sequence_is_not_a_duplicate() {
        let mut cache = DedupCache::new();
        assert!(!cache.is_duplicate(&msg(136, 1), 1000));
        assert!(!cache.is_duplicate(&msg(136, 2), 1000));
    }

    #[test]
    fn msg_id_field_takes_precedence_over_nid_sequence() {
        let mut cache = DedupCache::new();
        let mut a = msg(136, 1);
        a.fields.fields.insert("msg_id".to_string(), 42);
        let mut b = msg(136, 2);
        b.fields.fields.insert("msg_id".to_string(), 42);
        assert!(!cache.is_duplicate(&a, 1000));
        assert!(cache.is_duplicate(&b, 1000));
    }
}
