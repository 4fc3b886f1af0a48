use serde::{Deserialize, Serialize};

/// Replaces the original `origin` string sentinel.
///
/// `handleETCSMessage` on either peer accepts only `Source::Wire` — the
/// bridge is the only place that constructs it, which is what keeps a
/// peer's own emitted messages from looping back into its own handler.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum Source {
    #[serde(rename = "amqp")]
    Wire,
    #[serde(rename = "obu")]
    LocalObu,
    #[serde(rename = "rbc")]
    LocalRbc,
    #[serde(rename = "system")]
    Internal,
}

impl Source {
    pub fn as_wire_str(&self) -> &'static str {
        match self {
            Source::Wire => "amqp",
            Source::LocalObu => "obu",
            Source::LocalRbc => "rbc",
            Source::Internal => "system",
        }
    }

    pub fn from_wire_str(s: &str) -> Option<Self> {
        match s {
            "amqp" => Some(Source::Wire),
            "obu" => Some(Source::LocalObu),
            "rbc" => Some(Source::LocalRbc),
            "system" => Some(Source::Internal),
            _ => None,
        }
    }
}
