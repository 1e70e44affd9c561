// SPDX-License-Identifier: MIT
// Copyright (c) 2026 ADNT Sarl <info@adnt.io>

//! Image integrity check: CRC-32 over a slot's declared region, compared with
//! the signature stored right after it.

use core::fmt;

use crc::{Crc, CRC_32_ISO_HDLC};

use crate::layout::{PartitionTable, SlotId, SIGNATURE_SIZE};
use crate::metadata::{MetadataRow, SlotEntry};
use crate::nvm::{is_row_aligned, Nvm, NvmError};

pub(crate) const CRC32: Crc<u32> = Crc::<u32>::new(&CRC_32_ISO_HDLC);

const READ_CHUNK: usize = 256;

/// Why a slot did not validate. Every variant is terminal for that slot.
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
#[cfg_attr(feature = "defmt", derive(defmt::Format))]
pub enum ValidationError {
    /// Empty, misaligned, or running past the end of flash.
    LengthMismatch,
    ChecksumMismatch,
    Io(NvmError),
}

impl fmt::Display for ValidationError {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            ValidationError::LengthMismatch => f.write_str("length mismatch"),
            ValidationError::ChecksumMismatch => f.write_str("checksum mismatch"),
            ValidationError::Io(e) => write!(f, "read failed: {}", e),
        }
    }
}

impl From<NvmError> for ValidationError {
    fn from(e: NvmError) -> Self {
        ValidationError::Io(e)
    }
}

/// Compute CRC-32 (ISO HDLC) over `len` bytes of flash at `addr`.
pub fn image_crc32<N: Nvm>(nvm: &mut N, addr: u32, len: u32) -> Result<u32, NvmError> {
    let mut digest = CRC32.digest();
    let mut remaining = len as usize;
    let mut at = addr;
    let mut chunk = [0u8; READ_CHUNK];

    while remaining > 0 {
        let n = remaining.min(chunk.len());
        nvm.read(at, &mut chunk[..n])?;
        digest.update(&chunk[..n]);
        at += n as u32;
        remaining -= n;
    }

    Ok(digest.finalize())
}

/// Validate the image described by `entry`.
pub fn validate_entry<N: Nvm>(
    nvm: &mut N,
    table: &PartitionTable<'_>,
    entry: SlotEntry,
) -> Result<(), ValidationError> {
    if entry.length == 0 || !is_row_aligned(entry.start) {
        return Err(ValidationError::LengthMismatch);
    }
    let total = entry
        .length
        .checked_add(SIGNATURE_SIZE)
        .ok_or(ValidationError::LengthMismatch)?;
    if !table.flash.contains_range(entry.start, total) {
        return Err(ValidationError::LengthMismatch);
    }

    let actual = image_crc32(nvm, entry.start, entry.length)?;

    let mut stored = [0u8; SIGNATURE_SIZE as usize];
    nvm.read(entry.start + entry.length, &mut stored)?;
    if u32::from_le_bytes(stored) != actual {
        return Err(ValidationError::ChecksumMismatch);
    }

    Ok(())
}

/// Validate a slot as declared by reconciled metadata.
pub fn validate<N: Nvm>(
    nvm: &mut N,
    table: &PartitionTable<'_>,
    metadata: &MetadataRow,
    slot: SlotId,
) -> Result<(), ValidationError> {
    let entry = metadata.slot(slot).ok_or(ValidationError::LengthMismatch)?;
    validate_entry(nvm, table, entry)
}
