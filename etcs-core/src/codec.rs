//! Bit-level pack/unpack of [`MessageTemplate`]-described records, per the
//! rules of spec §4.1: fields are big-endian bit-fields written/read in
//! declaration order, repeated-section groups are driven by a field named
//! `N_ITER`, and sub-packets decode recursively from the same bit stream.

use etcs_types::{FieldValues, MessageTemplate, TemplateTable};
use thiserror::Error;
use tracing::warn;

#[derive(Debug, Error, PartialEq, Eq)]
pub enum CodecError {
    #[error("field {field} value {value} does not fit in {max_bits} bits")]
    OutOfRange { field: &'static str, value: i64, max_bits: u8 },
    #[error("need {needed} more bits, {available} available")]
    InsufficientBits { needed: usize, available: usize },
    #[error("expected NID_PACKET {expected}, found {found}")]
    PacketMismatch { expected: u8, found: u8 },
}

/// Appends bits MSB-first into a growable byte buffer.
#[derive(Debug, Default)]
pub struct BitWriter {
    bytes: Vec<u8>,
    bit_pos: usize,
}

impl BitWriter {
    pub fn new() -> Self {
        Self::default()
    }

    fn push_bit(&mut self, bit: bool) {
        let byte_idx = self.bit_pos / 8;
        if byte_idx == self.bytes.len() {
            self.bytes.push(0);
        }
        if bit {
            self.bytes[byte_idx] |= 1 << (7 - (self.bit_pos % 8));
        }
        self.bit_pos += 1;
    }

    pub fn write_bits(&mut self, field: &'static str, value: i64, bits: u8) -> Result<(), CodecError> {
        if value < 0 || (bits < 64 && value >= (1i64 << bits)) {
            return Err(CodecError::OutOfRange { field, value, max_bits: bits });
        }
        let value = value as u64;
        for i in (0..bits).rev() {
            self.push_bit((value >> i) & 1 == 1);
        }
        Ok(())
    }

    /// Pads with zero bits to the next byte boundary. A no-op if already
    /// aligned, which is the common case for well-formed templates — see
    /// the symmetric call in [`BitReader::align_to_byte`].
    pub fn align_to_byte(&mut self) {
        let rem = self.bit_pos % 8;
        if rem != 0 {
            for _ in 0..(8 - rem) {
                self.push_bit(false);
            }
        }
    }

    pub fn into_bytes(mut self) -> Vec<u8> {
        self.align_to_byte();
        self.bytes
    }
}

/// Reads bits MSB-first from a borrowed byte slice.
#[derive(Debug, Clone, Copy)]
pub struct BitReader<'a> {
    bytes: &'a [u8],
    bit_pos: usize,
}

impl<'a> BitReader<'a> {
    pub fn new(bytes: &'a [u8]) -> Self {
        Self { bytes, bit_pos: 0 }
    }

    pub fn remaining_bits(&self) -> usize {
        self.bytes.len() * 8 - self.bit_pos
    }

    pub fn read_bits(&mut self, bits: u8) -> Result<i64, CodecError> {
        if bits as usize > self.remaining_bits() {
            return Err(CodecError::InsufficientBits { needed: bits as usize, available: self.remaining_bits() });
        }
        let mut v: u64 = 0;
        for _ in 0..bits {
            let byte_idx = self.bit_pos / 8;
            let bit = (self.bytes[byte_idx] >> (7 - (self.bit_pos % 8))) & 1;
            v = (v << 1) | bit as u64;
            self.bit_pos += 1;
        }
        Ok(v as i64)
    }

    pub fn align_to_byte(&mut self) {
        let rem = self.bit_pos % 8;
        if rem != 0 {
            self.bit_pos += 8 - rem;
        }
    }

    /// Reads the next byte without consuming it. Returns `None` if fewer
    /// than 8 bits remain. Callers must align first for the result to be
    /// meaningful as a `NID_PACKET` lookahead.
    pub fn peek_byte(&self) -> Option<u8> {
        if self.remaining_bits() < 8 {
            return None;
        }
        let byte_idx = self.bit_pos / 8;
        Some(self.bytes[byte_idx])
    }
}

/// Bit-packs `values` per `template`, recursing into declared sub-packets
/// present in `values.sub_packets`. Byte-alignment is inserted before the
/// repeated-section block and before each sub-packet, symmetrically with
/// [`unpack`] — a no-op for templates whose preceding fields already sum
/// to a whole number of bytes, required for correctness otherwise.
pub fn pack(template: &MessageTemplate, values: &FieldValues, table: &TemplateTable) -> Result<Vec<u8>, CodecError> {
    let mut writer = BitWriter::new();
    pack_into(&mut writer, template, values, table)?;
    Ok(writer.into_bytes())
}

fn pack_into(
    writer: &mut BitWriter,
    template: &MessageTemplate,
    values: &FieldValues,
    table: &TemplateTable,
) -> Result<(), CodecError> {
    for f in template.header_fields() {
        let value = if f.name == "N_ITER" {
            values.sections.len() as i64
        } else {
            values
                .get(f.name)
                .or_else(|| template.defaults.get(f.name).copied())
                .unwrap_or(0)
        };
        writer.write_bits(f.name, value, f.bits)?;
    }

    let repeated: Vec<_> = template.repeated_fields().collect();
    if !repeated.is_empty() {
        writer.align_to_byte();
        for section in &values.sections {
            for f in &repeated {
                let value = section.get(f.name).copied().unwrap_or(0);
                writer.write_bits(f.name, value, f.bits)?;
            }
        }
    }

    for f in template.trailer_fields() {
        let value = values.get(f.name).or_else(|| template.defaults.get(f.name).copied()).unwrap_or(0);
        writer.write_bits(f.name, value, f.bits)?;
    }

    for name in &template.sub_packets {
        if let Some(sub_values) = values.sub_packets.get(*name) {
            writer.align_to_byte();
            let sub_template = table
                .by_name(name)
                .unwrap_or_else(|| panic!("no template registered for sub-packet {name}"));
            pack_into(writer, sub_template, sub_values, table)?;
        }
    }

    Ok(())
}

/// Unpacks `bytes` per `template`. Insufficient remaining bits stops
/// decoding and returns the partial result built so far, logged as a
/// warning, not an error — per spec §4.1's non-fatal decode-failure rule.
pub fn unpack(template: &MessageTemplate, bytes: &[u8], table: &TemplateTable) -> FieldValues {
    let mut reader = BitReader::new(bytes);
    unpack_from(&mut reader, template, table)
}

fn unpack_from(reader: &mut BitReader, template: &MessageTemplate, table: &TemplateTable) -> FieldValues {
    let mut out = FieldValues::new();
    let mut n_iter = 0i64;

    for f in template.header_fields() {
        match reader.read_bits(f.bits) {
            Ok(value) => {
                if f.name == "N_ITER" {
                    n_iter = value;
                }
                out.fields.insert(f.name.to_string(), value);
            }
            Err(e) => {
                warn!(template = template.name, field = f.name, error = %e, "insufficient bits, returning partial decode");
                return out;
            }
        }
    }

    let repeated: Vec<_> = template.repeated_fields().collect();
    if !repeated.is_empty() && n_iter > 0 {
        reader.align_to_byte();
        for _ in 0..n_iter {
            let mut section = std::collections::HashMap::new();
            let mut truncated = false;
            for f in &repeated {
                match reader.read_bits(f.bits) {
                    Ok(value) => {
                        section.insert(f.name.to_string(), value);
                    }
                    Err(e) => {
                        warn!(template = template.name, field = f.name, error = %e, "insufficient bits in section, returning partial decode");
                        truncated = true;
                        break;
                    }
                }
            }
            out.sections.push(section);
            if truncated {
                return out;
            }
        }
    }

    for f in template.trailer_fields() {
        match reader.read_bits(f.bits) {
            Ok(value) => {
                out.fields.insert(f.name.to_string(), value);
            }
            Err(e) => {
                warn!(template = template.name, field = f.name, error = %e, "insufficient bits in trailer, returning partial decode");
                return out;
            }
        }
    }

    for name in &template.sub_packets {
        reader.align_to_byte();
        let Some(sub_template) = table.by_name(name) else {
            warn!(sub_packet = *name, "no template registered, skipping");
            continue;
        };
        let expected = sub_template.nid_packet.unwrap_or(0);
        match reader.peek_byte() {
            None => {
                warn!(sub_packet = *name, "insufficient bits for NID_PACKET lookahead, stopping");
                break;
            }
            Some(found) if found == expected => {
                let sub_values = unpack_from(reader, sub_template, table);
                out.sub_packets.insert((*name).to_string(), sub_values);
            }
            Some(found) => {
                warn!(sub_packet = *name, expected, found, "NID_PACKET mismatch, skipping sub-packet");
            }
        }
    }

    out
}

#[cfg(test)]
mod tests {
    use super::*;
    use etcs_types::FieldValues;

    fn position_report_values() -> FieldValues {
        FieldValues::new()
            .with_field("NID_MESSAGE", 136)
            .with_field("SEQUENCE", 7)
            .with_sub_packet(
                "packet0",
                FieldValues::new().with_field("NID_PACKET", 0).with_field("Q_SCALE", 1).with_field("D_LRBG", 3000).with_field("Q_DIRLRBG", 1),
            )
    }

    #[test]
    fn pack_then_unpack_round_trips_scalars_and_sub_packet() {
        let table = TemplateTable::standard();
        let template = table.by_nid(136).unwrap();
        let values = position_report_values();

        let bytes = pack(template, &values, &table).unwrap();
        let decoded = unpack(template, &bytes, &table);

        assert_eq!(decoded.get("NID_MESSAGE"), Some(136));
        assert_eq!(decoded.get("SEQUENCE"), Some(7));
        let packet0 = decoded.sub_packets.get("packet0").unwrap();
        assert_eq!(packet0.get("D_LRBG"), Some(3000));
    }

    #[test]
    fn pack_then_unpack_round_trips_repeated_sections() {
        let table = TemplateTable::standard();
        let packet15 = table.by_name("packet15").unwrap();
        let mut values = FieldValues::new().with_field("NID_PACKET", 15).with_field("Q_DIR", 1).with_field("L_ENDSECTION", 500);
        values.sections = vec![
            std::collections::HashMap::from([
                ("L_SECTION".to_string(), 100),
                ("Q_SECTIONTIMER".to_string(), 0),
                ("T_SECTIONTIMER".to_string(), 0),
                ("D_SECTIONTIMERSTOPLOC".to_string(), 0),
            ]),
            std::collections::HashMap::from([
                ("L_SECTION".to_string(), 200),
                ("Q_SECTIONTIMER".to_string(), 1),
                ("T_SECTIONTIMER".to_string(), 5),
                ("D_SECTIONTIMERSTOPLOC".to_string(), 10),
            ]),
        ];

        let bytes = pack(packet15, &values, &table).unwrap();
        let decoded = unpack(packet15, &bytes, &table);

        assert_eq!(decoded.get("N_ITER"), Some(2));
        assert_eq!(decoded.sections.len(), 2);
        assert_eq!(decoded.sections[0].get("L_SECTION"), Some(&100));
        assert_eq!(decoded.sections[1].get("T_SECTIONTIMER"), Some(&5));
        assert_eq!(decoded.get("L_ENDSECTION"), Some(500));
    }

    #[test]
    fn out_of_range_field_is_rejected() {
        let table = TemplateTable::standard();
        let template = table.by_nid(32).unwrap();
        let values = FieldValues::new().with_field("NID_MESSAGE", 32).with_field("SEQUENCE", 7).with_field("M_VERSION", 999);
        assert_eq!(pack(template, &values, &table), Err(CodecError::OutOfRange { field: "M_VERSION", value: 999, max_bits: 8 }));
    }

    #[test]
    fn insufficient_bits_yields_partial_result_not_an_error() {
        let table = TemplateTable::standard();
        let template = table.by_nid(32).unwrap();
        let decoded = unpack(template, &[32], &table);
        assert_eq!(decoded.get("NID_MESSAGE"), Some(32));
        assert_eq!(decoded.get("SEQUENCE"), None);
    }

    #[test]
    fn nid_packet_mismatch_skips_the_sub_packet() {
        let table = TemplateTable::standard();
        let template = table.by_nid(136).unwrap();
        let values = FieldValues::new().with_field("NID_MESSAGE", 136).with_field("SEQUENCE", 1);
        let bytes = pack(template, &values, &table).unwrap();
        let decoded = unpack(template, &bytes, &table);
        assert!(decoded.sub_packets.get("packet0").is_none());
    }
}
