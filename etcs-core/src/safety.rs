//! Safety encapsulation: header + bit-packed payload + AES-128-CBC MAC +
//! CRC-16/CCITT-FALSE trailer, per spec §4.2/§6. Demonstrator-grade: the
//! MAC is the last block of a CBC encryption, not a true CMAC, and there
//! is no replay/anti-rollback counter — reproduced exactly as specified
//! for interoperability, not hardened.

use std::sync::Arc;

use aes::Aes128;
use cbc::cipher::block_padding::NoPadding;
use cbc::cipher::generic_array::GenericArray;
use cbc::cipher::{BlockEncryptMut, KeyIvInit};
use crc::{Crc, CRC_16_IBM_3740};
use etcs_types::{FieldValues, MessageTemplate, SecurePdu, SessionKeys, TemplateTable};
use thiserror::Error;
use tokio::sync::RwLock;

use crate::codec;

const CRC16: Crc<u16> = Crc::<u16>::new(&CRC_16_IBM_3740);

#[derive(Debug, Error, PartialEq, Eq)]
pub enum SafetyError {
    #[error("no session keys installed")]
    NoKeys,
    #[error("CRC mismatch")]
    CrcMismatch,
    #[error("MAC mismatch")]
    MacMismatch,
    #[error("PDU too short: {len} bytes")]
    TooShort { len: usize },
    #[error("codec error: {0}")]
    Codec(#[from] codec::CodecError),
}

/// Direction bit of the safety header: OBU->RBC is 1, RBC->OBU is 0.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Direction {
    ObuToRbc = 1,
    RbcToObu = 0,
}

/// Explicit capability handle for the current session's keys. Passed by
/// reference into `wrap`/`unwrap` rather than reached through a global,
/// per spec §9's "avoid a true global" design note.
#[derive(Debug, Clone, Default)]
pub struct SessionKeyStore(Arc<RwLock<Option<SessionKeys>>>);

impl SessionKeyStore {
    pub fn new() -> Self {
        Self::default()
    }

    pub async fn set(&self, keys: SessionKeys) {
        *self.0.write().await = Some(keys);
    }

    pub async fn clear(&self) {
        *self.0.write().await = None;
    }

    pub async fn get(&self) -> Option<SessionKeys> {
        *self.0.read().await
    }
}

fn header_byte(ety: u8, mti: u8, dir: Direction) -> u8 {
    (ety << 5) | (mti << 1) | (dir as u8 & 1)
}

type Aes128CbcEnc = cbc::Encryptor<Aes128>;

/// AES-128-CBC over the zero-padded payload with IV=0; the MAC is the
/// last 4 bytes of the final ciphertext block, per spec §3/§4.2. Payload
/// is padded to a whole number of 16-byte blocks before encryption so
/// multi-block payloads (e.g. a Movement Authority with several
/// sections) chain correctly rather than truncating at one block.
fn mac_over(key: &[u8; 16], payload: &[u8]) -> [u8; 4] {
    let padded_len = ((payload.len() + 15) / 16).max(1) * 16;
    let mut buf = vec![0u8; padded_len];
    buf[..payload.len()].copy_from_slice(payload);

    let iv = [0u8; 16];
    let buf_len = buf.len();
    let cipher = Aes128CbcEnc::new(GenericArray::from_slice(key), GenericArray::from_slice(&iv));
    let ciphertext = cipher
        .encrypt_padded_mut::<NoPadding>(&mut buf, buf_len)
        .expect("buffer is already zero-padded to a block multiple");

    let last_block = &ciphertext[ciphertext.len() - 16..];
    let mut mac = [0u8; 4];
    mac.copy_from_slice(&last_block[12..16]);
    mac
}

fn crc_over(header: u8, payload: &[u8], mac: &[u8; 4]) -> u16 {
    let mut digest = CRC16.digest();
    digest.update(&[header]);
    digest.update(payload);
    digest.update(mac);
    digest.finalize()
}

/// Bit-packs `values` per `template`, then wraps the result in a Secure
/// PDU keyed by `NID_MESSAGE`'s selected session key, per spec §4.2.
pub async fn wrap(
    template: &MessageTemplate,
    values: &FieldValues,
    dir: Direction,
    table: &TemplateTable,
    keys: &SessionKeyStore,
) -> Result<SecurePdu, SafetyError> {
    let keys = keys.get().await.ok_or(SafetyError::NoKeys)?;
    let payload = codec::pack(template, values, table)?;
    let nid = payload.first().copied().unwrap_or(0);
    let key = keys.select_for_nid(nid);

    let header = header_byte(0, 5, dir);
    let mac = mac_over(&key, &payload);
    let crc = crc_over(header, &payload, &mac);

    Ok(SecurePdu { header, payload, mac, crc })
}

/// Verifies CRC then MAC and returns the decoded payload fields. Neither
/// check is skippable: CRC failure and MAC failure are distinguished so
/// callers can tell transport corruption from a tampered/forged PDU.
pub async fn unwrap(
    bytes: &[u8],
    table: &TemplateTable,
    keys: &SessionKeyStore,
) -> Result<(u8, FieldValues), SafetyError> {
    if bytes.len() < 7 {
        return Err(SafetyError::TooShort { len: bytes.len() });
    }
    let pdu = SecurePdu::from_bytes(bytes).map_err(|_| SafetyError::TooShort { len: bytes.len() })?;

    let recomputed_crc = crc_over(pdu.header, &pdu.payload, &pdu.mac);
    if recomputed_crc != pdu.crc {
        return Err(SafetyError::CrcMismatch);
    }

    let nid = pdu.payload.first().copied().unwrap_or(0);
    let keys = keys.get().await.ok_or(SafetyError::NoKeys)?;
    let key = keys.select_for_nid(nid);
    let recomputed_mac = mac_over(&key, &pdu.payload);
    if recomputed_mac != pdu.mac {
        return Err(SafetyError::MacMismatch);
    }

    let template = table.by_nid(nid).ok_or(SafetyError::MacMismatch)?;
    let values = codec::unpack(template, &pdu.payload, table);
    Ok((nid, values))
}

#[cfg(test)]
mod tests {
    use super::*;

    #[tokio::test]
    async fn wrap_then_unwrap_round_trips_and_nid_matches_payload_first_byte() {
        let table = TemplateTable::standard();
        let keys = SessionKeyStore::new();
        keys.set(SessionKeys::new(11, 22, 33)).await;

        let template = table.by_nid(136).unwrap();
        let values = FieldValues::new().with_field("NID_MESSAGE", 136).with_field("SEQUENCE", 1);

        let pdu = wrap(template, &values, Direction::ObuToRbc, &table, &keys).await.unwrap();
        assert_eq!(pdu.payload[0], 136);

        let bytes = pdu.to_bytes();
        let (nid, decoded) = unwrap(&bytes, &table, &keys).await.unwrap();
        assert_eq!(nid, 136);
        assert_eq!(decoded.get("SEQUENCE"), Some(1));
    }

    #[tokio::test]
    async fn wrap_without_keys_fails() {
        let table = TemplateTable::standard();
        let keys = SessionKeyStore::new();
        let template = table.by_nid(136).unwrap();
        let values = FieldValues::new().with_field("NID_MESSAGE", 136).with_field("SEQUENCE", 1);
        assert_eq!(wrap(template, &values, Direction::ObuToRbc, &table, &keys).await, Err(SafetyError::NoKeys));
    }

    #[tokio::test]
    async fn a_single_bit_flip_breaks_unwrap() {
        let table = TemplateTable::standard();
        let keys = SessionKeyStore::new();
        keys.set(SessionKeys::new(11, 22, 33)).await;
        let template = table.by_nid(136).unwrap();
        let values = FieldValues::new().with_field("NID_MESSAGE", 136).with_field("SEQUENCE", 1);
        let pdu = wrap(template, &values, Direction::ObuToRbc, &table, &keys).await.unwrap();
        let mut bytes = pdu.to_bytes();
        let last = bytes.len() - 1;
        bytes[last] ^= 0x01;

        let result = unwrap(&bytes, &table, &keys).await;
        assert!(matches!(result, Err(SafetyError::CrcMismatch) | Err(SafetyError::MacMismatch)));
    }

    #[tokio::test]
    async fn key_selection_follows_the_nid_table() {
        let table = TemplateTable::standard();
        let keys = SessionKeyStore::new();
        keys.set(SessionKeys::new(11, 22, 33)).await;

        let ma_request = table.by_nid(132).unwrap();
        let values = FieldValues::new().with_field("NID_MESSAGE", 132).with_field("SEQUENCE", 1).with_field("Q_SCALE", 1).with_field("D_LRBG", 3000);
        let pdu = wrap(ma_request, &values, Direction::ObuToRbc, &table, &keys).await.unwrap();
        let expected_mac = mac_over(&SessionKeys::expand128(22), &pdu.payload);
        assert_eq!(pdu.mac, expected_mac);
    }
}
