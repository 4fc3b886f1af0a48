//! Out-of-band metadata trailer appended after the Secure PDU before a
//! message crosses onto the durable-queue leg, per spec §4.9/§6.
//!
//! The bit-packed payload only carries fields a real ETCS wire message
//! declares in its template. The envelope fields `EtcsMessage` adds on
//! top (`origin`, `T_TRAIN`, `T_TRAIN_ack`, `t_app_ms`, `t_send_ms`) and
//! any `extra` diagnostic field a caller attached (ids, labels — numeric
//! or string, see `EtcsMessage::extra`) would otherwise be lost crossing
//! the bridge. They travel instead as a JSON blob behind a `~META` magic
//! marker and a big-endian length prefix, so a plain Secure-PDU consumer
//! on the queue can still ignore the trailer entirely. It is untrusted
//! diagnostic data, not covered by MAC or CRC — no state transition may
//! depend on it.

use std::collections::HashMap;

use etcs_types::{topics, EtcsMessage};
use serde_json::{Map, Value};

const EXTRA_KEY: &str = "extra";

pub fn append(pdu_bytes: &mut Vec<u8>, msg: &EtcsMessage) {
    let mut trailer = Map::new();
    trailer.insert("origin".to_string(), serde_json::to_value(msg.origin).unwrap());
    trailer.insert("T_TRAIN".to_string(), Value::from(msg.t_train));
    trailer.insert("T_TRAIN_ack".to_string(), Value::from(msg.t_train_ack));
    trailer.insert("t_app_ms".to_string(), Value::from(msg.t_app_ms));
    trailer.insert("t_send_ms".to_string(), Value::from(msg.t_send_ms));
    if !msg.extra.is_empty() {
        trailer.insert(EXTRA_KEY.to_string(), serde_json::to_value(&msg.extra).unwrap());
    }

    let json_bytes = serde_json::to_vec(&trailer).expect("trailer json never fails to serialize");

    pdu_bytes.extend_from_slice(topics::META_MAGIC);
    pdu_bytes.extend_from_slice(&(json_bytes.len() as u32).to_be_bytes());
    pdu_bytes.extend_from_slice(&json_bytes);
}

pub struct Trailer {
    pub t_train: Option<i64>,
    pub t_train_ack: Option<i64>,
    pub t_app_ms: Option<u64>,
    pub t_send_ms: Option<u64>,
    /// Diagnostic fields from the forwarded message's `extra` map —
    /// numeric or string, anything `serde_json::Value` can hold.
    pub extra: HashMap<String, Value>,
}

/// Splits the trailing `~META` block off the end of `bytes`, if present.
/// Returns the Secure-PDU portion and the decoded trailer (absent if the
/// magic isn't found, which just means no extra envelope data to graft
/// back on).
pub fn extract(bytes: &[u8]) -> (&[u8], Option<Trailer>) {
    let magic_len = topics::META_MAGIC.len();
    let Some(magic_pos) = find_magic(bytes) else {
        return (bytes, None);
    };

    let len_start = magic_pos + magic_len;
    let len_end = len_start + 4;
    if bytes.len() < len_end {
        return (bytes, None);
    }
    let json_len = u32::from_be_bytes(bytes[len_start..len_end].try_into().unwrap()) as usize;
    let json_start = len_end;
    let json_end = json_start + json_len;
    if bytes.len() < json_end {
        return (&bytes[..magic_pos], None);
    }

    let trailer = serde_json::from_slice::<Map<String, Value>>(&bytes[json_start..json_end]).ok().map(|obj| {
        let extra = obj
            .get(EXTRA_KEY)
            .and_then(Value::as_object)
            .map(|m| m.iter().map(|(k, v)| (k.clone(), v.clone())).collect())
            .unwrap_or_default();
        Trailer {
            t_train: obj.get("T_TRAIN").and_then(Value::as_i64),
            t_train_ack: obj.get("T_TRAIN_ack").and_then(Value::as_i64),
            t_app_ms: obj.get("t_app_ms").and_then(Value::as_u64),
            t_send_ms: obj.get("t_send_ms").and_then(Value::as_u64),
            extra,
        }
    });

    (&bytes[..magic_pos], trailer)
}

fn find_magic(bytes: &[u8]) -> Option<usize> {
    let magic = topics::META_MAGIC;
    if bytes.len() < magic.len() {
        return None;
    }
    (0..=bytes.len() - magic.len()).rev().find(|&i| &bytes[i..i + magic.len()] == magic)
}

#[cfg(test)]
mod tests {
    use super::*;
    use etcs_types::{FieldValues, Source};

    fn sample_message() -> EtcsMessage {
        EtcsMessage {
            nid_message: 136,
            sequence: 4,
            origin: Source::LocalObu,
            t_train: Some(111),
            t_train_ack: None,
            t_app_ms: 222,
            t_send_ms: 223,
            fields: FieldValues::new().with_field("D_LRBG", 3000),
            extra: HashMap::from([
                ("msg_id".to_string(), Value::from("X-42")),
                ("label".to_string(), Value::from("car")),
            ]),
        }
    }

    #[test]
    fn append_then_extract_recovers_envelope_fields() {
        let mut pdu = vec![1, 2, 3, 4, 5];
        let msg = sample_message();
        append(&mut pdu, &msg);

        let (stripped, trailer) = extract(&pdu);
        assert_eq!(stripped, &[1, 2, 3, 4, 5]);
        let trailer = trailer.expect("trailer should be present");
        assert_eq!(trailer.t_train, Some(111));
        assert_eq!(trailer.t_app_ms, Some(222));
        assert_eq!(trailer.extra.get("msg_id"), Some(&Value::from("X-42")));
        assert_eq!(trailer.extra.get("label"), Some(&Value::from("car")));
    }

    #[test]
    fn missing_trailer_returns_the_bytes_unchanged() {
        let bytes = vec![9, 9, 9];
        let (stripped, trailer) = extract(&bytes);
        assert_eq!(stripped, &[9, 9, 9]);
        assert!(trailer.is_none());
    }
}
