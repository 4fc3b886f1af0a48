use std::collections::HashMap;

use serde::{Deserialize, Serialize};

/// Values for one bit-packed record: scalar fields, the `N_ITER` repeated
/// section group (each entry one section's field set), and any nested
/// sub-packets keyed by name. Shared by the codec (as both its pack input
/// and unpack output) and by [`crate::EtcsMessage`], whose payload *is*
/// one of these.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct FieldValues {
    #[serde(flatten)]
    pub fields: HashMap<String, i64>,
    #[serde(default, skip_serializing_if = "Vec::is_empty")]
    pub sections: Vec<HashMap<String, i64>>,
    #[serde(default, skip_serializing_if = "HashMap::is_empty")]
    pub sub_packets: HashMap<String, FieldValues>,
}

impl FieldValues {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn with_field(mut self, name: impl Into<String>, value: i64) -> Self {
        self.fields.insert(name.into(), value);
        self
    }

    pub fn get(&self, name: &str) -> Option<i64> {
        self.fields.get(name).copied()
    }

    pub fn with_sub_packet(mut self, name: impl Into<String>, values: FieldValues) -> Self {
        self.sub_packets.insert(name.into(), values);
        self
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn flattens_scalars_and_nests_sub_packets() {
        let fv = FieldValues::new()
            .with_field("D_LRBG", 3000)
            .with_sub_packet("packet0", FieldValues::new().with_field("Q_SCALE", 1));
        let json = serde_json::to_value(&fv).unwrap();
        assert_eq!(json["D_LRBG"], 3000);
        assert_eq!(json["packet0"]["Q_SCALE"], 1);
    }
}
