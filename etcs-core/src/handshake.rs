//! Mutual handshake and session-key derivation, per spec §4.3.

use etcs_types::SessionKeys;
use rand::RngCore;

/// A party's 32-bit nonce pair, carried in AU1/AU2.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct NoncePair {
    pub l: u32,
    pub r: u32,
}

impl NoncePair {
    pub fn generate() -> Self {
        let mut rng = rand::thread_rng();
        Self { l: rng.next_u32(), r: rng.next_u32() }
    }
}

/// The pre-shared root key triple, provisioned out of band for the
/// demonstrator (not itself part of the wire protocol).
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct RootKeys {
    pub k1: u64,
    pub k2: u64,
    pub k3: u64,
}

fn splitmix64(mut x: u64) -> u64 {
    x = x.wrapping_add(0x9E3779B97F4A7C15);
    let mut z = x;
    z = (z ^ (z >> 30)).wrapping_mul(0xBF58476D1CE4E5B9);
    z = (z ^ (z >> 27)).wrapping_mul(0x94D049BB133111EB);
    z ^ (z >> 31)
}

/// Derives `KSn = root_key[n] ^ splitmix64(mix of all six nonce halves, n)`.
/// A fixed, symmetric, deterministic mix — both OBU and RBC compute the
/// same three keys from the same AU1/AU2 exchange (Open Question,
/// resolved; see DESIGN.md).
pub fn derive_session_keys(root: RootKeys, obu_nonce: NoncePair, rbc_nonce: NoncePair) -> SessionKeys {
    let base = (obu_nonce.l as u64)
        ^ ((obu_nonce.r as u64) << 32)
        ^ (rbc_nonce.l as u64).rotate_left(17)
        ^ ((rbc_nonce.r as u64) << 32).rotate_right(11);

    let ks1 = root.k1 ^ splitmix64(base ^ 1);
    let ks2 = root.k2 ^ splitmix64(base ^ 2);
    let ks3 = root.k3 ^ splitmix64(base ^ 3);
    SessionKeys::new(ks1, ks2, ks3)
}
