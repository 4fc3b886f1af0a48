use std::collections::HashMap;

use serde::{Deserialize, Serialize};
use serde_json::Value;

use crate::fields::FieldValues;
use crate::source::Source;

/// The in-process, JSON-shaped representation of one ETCS message: the
/// synthetic envelope fields of spec §3 plus whatever payload fields the
/// message's `NID_MESSAGE` carries, flattened alongside them.
///
/// This is what travels as JSON on the local pub/sub plane (before the
/// bridge bit-packs it into a Secure PDU for the durable-queue leg) and
/// what `handleETCSMessage` dispatches on.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct EtcsMessage {
    #[serde(rename = "NID_MESSAGE")]
    pub nid_message: u8,
    #[serde(rename = "SEQUENCE")]
    pub sequence: u32,
    pub origin: Source,
    #[serde(rename = "T_TRAIN", skip_serializing_if = "Option::is_none", default)]
    pub t_train: Option<i64>,
    #[serde(rename = "T_TRAIN_ack", skip_serializing_if = "Option::is_none", default)]
    pub t_train_ack: Option<i64>,
    pub t_app_ms: u64,
    pub t_send_ms: u64,
    #[serde(flatten)]
    pub fields: FieldValues,
    /// Caller-attached diagnostic fields that aren't part of the
    /// bit-packed payload (`fields` is `i64`-only, per the wire codec) —
    /// ids, labels, anything a producer wants to tag a message with. Kept
    /// under its own JSON key so it never collides with `fields`'
    /// flattened payload names; carried across the bridge in the `~META`
    /// trailer, never through the Secure PDU itself.
    #[serde(default, skip_serializing_if = "HashMap::is_empty")]
    pub extra: HashMap<String, Value>,
}

impl EtcsMessage {
    /// True iff this message arrived over the wire (the only inbound
    /// `origin` protocol handlers accept — see the loop-prevention
    /// invariant in spec §3/§9).
    pub fn from_wire(&self) -> bool {
        self.origin == Source::Wire
    }

    pub fn field(&self, name: &str) -> Option<i64> {
        self.fields.get(name)
    }

    /// The payload fields this message's `NID_MESSAGE`/`SEQUENCE` plus
    /// its own scalar/section/sub-packet fields, as the codec expects
    /// them for bit-packing. The envelope's `origin`/`T_TRAIN`/timestamp
    /// fields never go on the wire payload; they travel only in the
    /// bridge's metadata trailer or the local JSON plane.
    pub fn to_payload_values(&self) -> FieldValues {
        let mut fv = self.fields.clone();
        fv.fields.insert("NID_MESSAGE".to_string(), self.nid_message as i64);
        fv.fields.insert("SEQUENCE".to_string(), self.sequence as i64);
        fv
    }

    /// Reconstructs a logical message from a decoded wire payload. Used
    /// by the reverse bridge after `safety::unwrap` + codec decode, which
    /// is the only path allowed to set `origin = Source::Wire`.
    pub fn from_wire_payload(nid: u8, mut values: FieldValues, now_ms: u64) -> Self {
        let sequence = values.fields.remove("SEQUENCE").unwrap_or(0) as u32;
        values.fields.remove("NID_MESSAGE");
        Self {
            nid_message: nid,
            sequence,
            origin: Source::Wire,
            t_train: None,
            t_train_ack: None,
            t_app_ms: now_ms,
            t_send_ms: now_ms,
            fields: values,
            extra: HashMap::new(),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn envelope_round_trips_through_json() {
        let msg = EtcsMessage {
            nid_message: 136,
            sequence: 7,
            origin: Source::LocalObu,
            t_train: Some(1000),
            t_train_ack: None,
            t_app_ms: 42,
            t_send_ms: 43,
            fields: FieldValues::new().with_field("D_LRBG", 3000),
            extra: HashMap::new(),
        };
        let json = serde_json::to_string(&msg).unwrap();
        assert!(json.contains("\"NID_MESSAGE\":136"));
        assert!(json.contains("\"D_LRBG\":3000"));
        assert!(!json.contains("T_TRAIN_ack"));

        let back: EtcsMessage = serde_json::from_str(&json).unwrap();
        assert_eq!(back.nid_message, 136);
        assert_eq!(back.field("D_LRBG"), Some(3000));
    }

    #[test]
    fn from_wire_gates_on_source() {
        let mut msg = EtcsMessage {
            nid_message: 146,
            sequence: 1,
            origin: Source::LocalRbc,
            t_train: None,
            t_train_ack: None,
            t_app_ms: 0,
            t_send_ms: 0,
            fields: FieldValues::new(),
            extra: HashMap::new(),
        };
        assert!(!msg.from_wire());
        msg.origin = Source::Wire;
        assert!(msg.from_wire());
    }
}
