use serde::{Deserialize, Serialize};

/// AU1 (OBU -> RBC), carried as plain JSON on the handshake topic — the
/// handshake runs before session keys exist, so it bypasses the safety
/// layer entirely (spec §2 data-flow note).
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Au1Wire {
    pub obu_id: String,
    pub rbc_id: String,
    pub obu_nonce_l: u32,
    pub obu_nonce_r: u32,
}

/// AU2 (RBC -> OBU).
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Au2Wire {
    pub obu_id: String,
    pub rbc_id: String,
    pub rbc_nonce_l: u32,
    pub rbc_nonce_r: u32,
}

/// `KEY_UPDATE`: the only tolerated plaintext leak of session keys,
/// published by the OBU so the bridge can initialize its safety layer.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub struct KeyUpdateWire {
    pub ks1: u64,
    pub ks2: u64,
    pub ks3: u64,
}
