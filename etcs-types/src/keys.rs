use serde::{Deserialize, Serialize};

/// Three session keys derived at handshake completion. Held in process
/// memory only for the lifetime of one session; cleared on reset or
/// termination by whoever owns the enclosing `SessionKeyStore`.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub struct SessionKeys {
    pub ks1: u64,
    pub ks2: u64,
    pub ks3: u64,
}

impl SessionKeys {
    pub fn new(ks1: u64, ks2: u64, ks3: u64) -> Self {
        Self { ks1, ks2, ks3 }
    }

    /// Expands a 64-bit key to 128 bits for AES-128 by self-concatenation,
    /// per spec §3.
    pub fn expand128(key: u64) -> [u8; 16] {
        let half = key.to_be_bytes();
        let mut out = [0u8; 16];
        out[..8].copy_from_slice(&half);
        out[8..].copy_from_slice(&half);
        out
    }

    /// Selects the 128-bit AES key for a given NID_MESSAGE, per spec §4.2:
    /// 132 (MA request) -> KS2, 136 (position report) -> KS3, else -> KS1.
    pub fn select_for_nid(&self, nid: u8) -> [u8; 16] {
        let k = match nid {
            132 => self.ks2,
            136 => self.ks3,
            _ => self.ks1,
        };
        Self::expand128(k)
    }
}
