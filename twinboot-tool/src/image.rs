// SPDX-License-Identifier: MIT
// Copyright (c) 2026 ADNT Sarl <info@adnt.io>

//! Offline image handling: signatures, row padding and metadata blobs.

use std::str::FromStr;

use anyhow::{bail, Context, Result};
use crc::{Crc, CRC_32_ISO_HDLC};

use twinboot_common::layout::{SlotId, RP2040_LAYOUT, ROW_SIZE, SIGNATURE_SIZE, SLOT_COUNT};
use twinboot_common::metadata::{MetadataRow, SlotEntry};

const CRC32: Crc<u32> = Crc::<u32>::new(&CRC_32_ISO_HDLC);

/// Image body followed by its little-endian CRC-32.
pub fn sign(body: &[u8]) -> Vec<u8> {
    let mut signed = Vec::with_capacity(body.len() + SIGNATURE_SIZE as usize);
    signed.extend_from_slice(body);
    signed.extend_from_slice(&CRC32.checksum(body).to_le_bytes());
    signed
}

/// Body of a signed image, if its trailing CRC matches.
pub fn verify_signed(signed: &[u8]) -> Option<&[u8]> {
    let split = signed.len().checked_sub(SIGNATURE_SIZE as usize)?;
    let (body, sig) = signed.split_at(split);
    let stored = u32::from_le_bytes(sig.try_into().ok()?);
    (!body.is_empty() && stored == CRC32.checksum(body)).then_some(body)
}

/// Cut `data` into whole rows, padding the last one with erased bytes.
pub fn rows(data: &[u8]) -> impl Iterator<Item = Vec<u8>> + '_ {
    data.chunks(ROW_SIZE).map(|chunk| {
        let mut row = vec![0xFF; ROW_SIZE];
        row[..chunk.len()].copy_from_slice(chunk);
        row
    })
}

/// `ADDR:LEN` slot argument, decimal or `0x` hex.
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub struct SlotArg(pub SlotEntry);

impl FromStr for SlotArg {
    type Err = anyhow::Error;

    fn from_str(s: &str) -> Result<Self> {
        let (addr, len) = s
            .split_once(':')
            .with_context(|| format!("expected ADDR:LEN, got '{}'", s))?;
        Ok(SlotArg(SlotEntry::new(parse_u32(addr)?, parse_u32(len)?)))
    }
}

/// Parse a decimal or `0x`-prefixed hexadecimal number.
pub fn parse_u32(s: &str) -> Result<u32> {
    let s = s.trim();
    let parsed = match s.strip_prefix("0x").or_else(|| s.strip_prefix("0X")) {
        Some(hex) => u32::from_str_radix(&hex.replace('_', ""), 16),
        None => s.replace('_', "").parse(),
    };
    parsed.with_context(|| format!("invalid number '{}'", s))
}

/// MD, MDC and a clear copy flag row, laid out contiguously from the
/// metadata address.
pub fn metadata_blob(slots: [Option<SlotEntry>; SLOT_COUNT]) -> Result<Vec<u8>> {
    for (id, entry) in SlotId::ALL.iter().zip(slots.iter()) {
        let Some(entry) = entry else { continue };
        let Some(part) = RP2040_LAYOUT.partition(*id) else {
            bail!("no partition for slot {}", id.name());
        };
        if !part.contains_range(entry.start, entry.signed_length()) {
            bail!(
                "{} slot 0x{:08x}+0x{:x} does not fit its partition 0x{:08x}..0x{:08x}",
                id.name(),
                entry.start,
                entry.signed_length(),
                part.start,
                part.end
            );
        }
    }

    let row = MetadataRow::new(slots.map(|s| s.unwrap_or(SlotEntry::EMPTY))).encode();
    let mut blob = Vec::with_capacity(3 * ROW_SIZE);
    blob.extend_from_slice(&row);
    blob.extend_from_slice(&row);
    blob.extend_from_slice(&[0u8; ROW_SIZE]);
    Ok(blob)
}

#[cfg(test)]
mod tests {
    use super::*;
    use twinboot_common::layout::{COPY_FLAG_ADDR, METADATA_ADDR, PRIMARY_ADDR};
    use twinboot_common::metadata::checksum_valid;

    #[test]
    fn test_sign_appends_crc() {
        let signed = sign(b"123456789");
        // CRC-32/ISO-HDLC check value.
        assert_eq!(&signed[9..], &0xCBF4_3926u32.to_le_bytes());
        assert_eq!(verify_signed(&signed), Some(&b"123456789"[..]));
    }

    #[test]
    fn test_verify_signed_rejects_damage() {
        let mut signed = sign(&[1, 2, 3, 4, 5]);
        signed[2] ^= 0xFF;
        assert_eq!(verify_signed(&signed), None);
        assert_eq!(verify_signed(&[0, 0]), None);
    }

    #[test]
    fn test_rows_pads_last_row_with_erased_bytes() {
        let data = vec![0x11; ROW_SIZE + 3];
        let rows: Vec<_> = rows(&data).collect();
        assert_eq!(rows.len(), 2);
        assert_eq!(&rows[1][..3], &[0x11; 3]);
        assert!(rows[1][3..].iter().all(|&b| b == 0xFF));
    }

    #[test]
    fn test_slot_arg_parses_hex_and_decimal() {
        let arg: SlotArg = "0x10010000:0x1b000".parse().unwrap();
        assert_eq!(arg.0, SlotEntry::new(0x1001_0000, 0x1_B000));
        let arg: SlotArg = "268500992:4096".parse().unwrap();
        assert_eq!(arg.0, SlotEntry::new(0x1001_0000, 4096));
        assert!("0x10010000".parse::<SlotArg>().is_err());
        assert!("zz:1".parse::<SlotArg>().is_err());
    }

    #[test]
    fn test_metadata_blob_layout() {
        let primary = SlotEntry::new(PRIMARY_ADDR, 0x1_B000);
        let blob = metadata_blob([None, Some(primary), None, None]).unwrap();

        assert_eq!(blob.len(), 3 * ROW_SIZE);
        let (md, rest) = blob.split_at(ROW_SIZE);
        let (mdc, flag) = rest.split_at(ROW_SIZE);
        assert_eq!(md, mdc);
        assert!(checksum_valid(md.try_into().unwrap()));
        assert!(flag.iter().all(|&b| b == 0));
        assert_eq!(COPY_FLAG_ADDR - METADATA_ADDR, 2 * ROW_SIZE as u32);

        let row = MetadataRow::decode(md.try_into().unwrap()).unwrap();
        assert_eq!(row.slot(SlotId::PRIMARY), Some(primary));
        assert_eq!(row.slot(SlotId::STAGED), Some(SlotEntry::EMPTY));
    }

    #[test]
    fn test_metadata_blob_rejects_oversized_slot() {
        let too_big = SlotEntry::new(PRIMARY_ADDR, 448 * 1024);
        assert!(metadata_blob([None, Some(too_big), None, None]).is_err());
    }
}
