use thiserror::Error;

/// The wire-level Secure PDU: `header(1) || payload(k) || mac(4) || crc(2)`,
/// per spec §3/§6. Construction of `mac`/`crc` is the safety layer's job
/// (`etcs-core::safety`); this type only owns the byte layout.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct SecurePdu {
    pub header: u8,
    pub payload: Vec<u8>,
    pub mac: [u8; 4],
    pub crc: u16,
}

#[derive(Debug, Error, PartialEq, Eq)]
pub enum PduError {
    #[error("PDU too short: {len} bytes, need at least 7")]
    TooShort { len: usize },
}

impl SecurePdu {
    pub fn to_bytes(&self) -> Vec<u8> {
        let mut out = Vec::with_capacity(1 + self.payload.len() + 4 + 2);
        out.push(self.header);
        out.extend_from_slice(&self.payload);
        out.extend_from_slice(&self.mac);
        out.extend_from_slice(&self.crc.to_be_bytes());
        out
    }

    /// Splits a raw byte sequence into its four fields without verifying
    /// the MAC or CRC — that verification is `etcs-core::safety::unwrap`'s
    /// job, which needs the session keys this type doesn't carry.
    pub fn from_bytes(bytes: &[u8]) -> Result<Self, PduError> {
        if bytes.len() < 7 {
            return Err(PduError::TooShort { len: bytes.len() });
        }
        let header = bytes[0];
        let payload_end = bytes.len() - 6;
        let payload = bytes[1..payload_end].to_vec();
        let mut mac = [0u8; 4];
        mac.copy_from_slice(&bytes[payload_end..payload_end + 4]);
        let crc = u16::from_be_bytes([bytes[payload_end + 4], bytes[payload_end + 5]]);
        Ok(Self { header, payload, mac, crc })
    }
}
