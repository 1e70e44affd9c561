// SPDX-License-Identifier: MIT
// Copyright (c) 2026 ADNT Sarl <info@adnt.io>

//! Slot metadata: on-flash row format, the MD/MDC store and the copy flag.
//!
//! Row layout (little endian):
//!
//! | offset          | content                                  |
//! |-----------------|------------------------------------------|
//! | `8 * i`         | slot `i` start address (u32)             |
//! | `8 * i + 4`     | slot `i` length, signature excluded (u32) |
//! | ...             | zero                                     |
//! | `ROW_SIZE - 4`  | CRC-32 of bytes `[0, ROW_SIZE - 4)`      |
//!
//! The primary row (MD) is always written before its mirror (MDC). Only
//! [`MetadataStore`] writes either of them, so a reset can leave at most one
//! of the two stale, and [`MetadataStore::reconcile`] repairs it on the next
//! boot.

use core::fmt;

use serde::{Deserialize, Serialize};

use crate::copy::{copy_region, CopyError, CopyReport, Unguarded};
use crate::layout::{PartitionTable, SlotId, ROW_SIZE, SIGNATURE_SIZE, SLOT_COUNT};
use crate::nvm::{Nvm, NvmError};
use crate::validate::CRC32;

const CHECKSUM_OFFSET: usize = ROW_SIZE - 4;

/// Value written to the copy flag byte to mark a staged copy pending.
pub const COPY_FLAG_PENDING: u8 = 0xA5;

/// Verified region of one slot.
#[derive(Clone, Copy, Debug, Default, PartialEq, Eq, Serialize, Deserialize)]
#[cfg_attr(feature = "defmt", derive(defmt::Format))]
pub struct SlotEntry {
    pub start: u32,
    /// Bytes covered by the CRC; the signature follows at `start + length`.
    pub length: u32,
}

impl SlotEntry {
    pub const EMPTY: SlotEntry = SlotEntry {
        start: 0,
        length: 0,
    };

    pub const fn new(start: u32, length: u32) -> Self {
        Self { start, length }
    }

    pub const fn is_empty(&self) -> bool {
        self.length == 0
    }

    /// Image plus trailing signature, in bytes.
    pub const fn signed_length(&self) -> u32 {
        self.length.saturating_add(SIGNATURE_SIZE)
    }
}

/// Decoded metadata row.
#[derive(Clone, Copy, Debug, Default, PartialEq, Eq)]
pub struct MetadataRow {
    slots: [SlotEntry; SLOT_COUNT],
}

impl MetadataRow {
    pub const fn new(slots: [SlotEntry; SLOT_COUNT]) -> Self {
        Self { slots }
    }

    pub fn slots(&self) -> &[SlotEntry; SLOT_COUNT] {
        &self.slots
    }

    pub fn slot(&self, id: SlotId) -> Option<SlotEntry> {
        self.slots.get(id.index()).copied()
    }

    /// Replace one slot entry. Returns `None` for an unknown slot.
    pub fn with_slot(mut self, id: SlotId, entry: SlotEntry) -> Option<Self> {
        *self.slots.get_mut(id.index())? = entry;
        Some(self)
    }

    /// Encode into a full row, checksum included.
    pub fn encode(&self) -> [u8; ROW_SIZE] {
        let mut row = [0u8; ROW_SIZE];
        for (i, entry) in self.slots.iter().enumerate() {
            let at = i * 8;
            row[at..at + 4].copy_from_slice(&entry.start.to_le_bytes());
            row[at + 4..at + 8].copy_from_slice(&entry.length.to_le_bytes());
        }
        let crc = row_checksum(&row);
        row[CHECKSUM_OFFSET..].copy_from_slice(&crc.to_le_bytes());
        row
    }

    /// Decode a row. Returns `None` if its checksum does not match.
    pub fn decode(row: &[u8; ROW_SIZE]) -> Option<Self> {
        if !checksum_valid(row) {
            return None;
        }
        let mut slots = [SlotEntry::EMPTY; SLOT_COUNT];
        for (i, entry) in slots.iter_mut().enumerate() {
            let at = i * 8;
            entry.start = read_u32(row, at);
            entry.length = read_u32(row, at + 4);
        }
        Some(Self { slots })
    }
}

fn read_u32(row: &[u8; ROW_SIZE], at: usize) -> u32 {
    let mut word = [0u8; 4];
    word.copy_from_slice(&row[at..at + 4]);
    u32::from_le_bytes(word)
}

/// CRC-32 over every byte of the row except the checksum field.
pub fn row_checksum(row: &[u8; ROW_SIZE]) -> u32 {
    CRC32.checksum(&row[..CHECKSUM_OFFSET])
}

pub fn checksum_valid(row: &[u8; ROW_SIZE]) -> bool {
    read_u32(row, CHECKSUM_OFFSET) == row_checksum(row)
}

#[derive(Clone, Copy, Debug, PartialEq, Eq)]
#[cfg_attr(feature = "defmt", derive(defmt::Format))]
pub enum MetadataError {
    /// Neither MD nor MDC has a valid checksum.
    Corrupt,
    UnknownSlot,
    Io(NvmError),
    Copy(CopyError),
}

impl fmt::Display for MetadataError {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            MetadataError::Corrupt => f.write_str("both metadata copies are corrupt"),
            MetadataError::UnknownSlot => f.write_str("unknown slot"),
            MetadataError::Io(e) => write!(f, "metadata I/O error: {}", e),
            MetadataError::Copy(e) => write!(f, "metadata repair failed: {}", e),
        }
    }
}

impl From<NvmError> for MetadataError {
    fn from(e: NvmError) -> Self {
        MetadataError::Io(e)
    }
}

impl From<CopyError> for MetadataError {
    fn from(e: CopyError) -> Self {
        MetadataError::Copy(e)
    }
}

/// What reconciliation had to do.
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
#[cfg_attr(feature = "defmt", derive(defmt::Format))]
pub enum Repair {
    InSync,
    /// MDC was rewritten from MD.
    MirrorRepaired,
    /// MD was rewritten from MDC.
    PrimaryRepaired,
}

/// MD/MDC row pair.
pub struct MetadataStore {
    primary: u32,
    mirror: u32,
}

impl MetadataStore {
    pub const fn new(table: &PartitionTable<'_>) -> Self {
        Self {
            primary: table.metadata_addr,
            mirror: table.mirror_addr(),
        }
    }

    pub const fn primary_addr(&self) -> u32 {
        self.primary
    }

    pub const fn mirror_addr(&self) -> u32 {
        self.mirror
    }

    /// Bring MD and MDC back to identical, valid rows.
    ///
    /// Must run before any slot lookup is trusted.
    pub fn reconcile<N: Nvm>(&self, nvm: &mut N) -> Result<(MetadataRow, Repair), MetadataError> {
        let mut row = [0u8; ROW_SIZE];

        nvm.read(self.primary, &mut row)?;
        if let Some(md) = MetadataRow::decode(&row) {
            let report = self.sync_rows(nvm, self.mirror, self.primary)?;
            let repair = if report.rows_written > 0 {
                Repair::MirrorRepaired
            } else {
                Repair::InSync
            };
            return Ok((md, repair));
        }

        nvm.read(self.mirror, &mut row)?;
        if let Some(mdc) = MetadataRow::decode(&row) {
            self.sync_rows(nvm, self.primary, self.mirror)?;
            return Ok((mdc, Repair::PrimaryRepaired));
        }

        Err(MetadataError::Corrupt)
    }

    /// Read MD without repairing anything.
    pub fn load<N: Nvm>(&self, nvm: &mut N) -> Result<MetadataRow, MetadataError> {
        let mut row = [0u8; ROW_SIZE];
        nvm.read(self.primary, &mut row)?;
        MetadataRow::decode(&row).ok_or(MetadataError::Corrupt)
    }

    /// Replace one slot entry, writing MD first and MDC second.
    pub fn update_slot<N: Nvm>(
        &self,
        nvm: &mut N,
        id: SlotId,
        entry: SlotEntry,
    ) -> Result<MetadataRow, MetadataError> {
        let (current, _) = self.reconcile(nvm)?;
        let updated = current
            .with_slot(id, entry)
            .ok_or(MetadataError::UnknownSlot)?;
        self.commit(nvm, &updated)?;
        Ok(updated)
    }

    fn commit<N: Nvm>(&self, nvm: &mut N, row: &MetadataRow) -> Result<(), MetadataError> {
        let encoded = row.encode();
        if !nvm.compare(self.primary, &encoded)? {
            nvm.write_row(self.primary, &encoded)?;
        }
        self.sync_rows(nvm, self.mirror, self.primary)?;
        Ok(())
    }

    fn sync_rows<N: Nvm>(&self, nvm: &mut N, dest: u32, src: u32) -> Result<CopyReport, CopyError> {
        copy_region(nvm, &Unguarded, dest, src, ROW_SIZE as u32)
    }
}

#[derive(Clone, Copy, Debug, PartialEq, Eq)]
#[cfg_attr(feature = "defmt", derive(defmt::Format))]
pub enum FlagState {
    Clear,
    Pending,
}

/// Single persisted byte marking a staged copy awaiting its metadata commit.
pub struct CopyFlag {
    addr: u32,
}

impl CopyFlag {
    pub const fn new(table: &PartitionTable<'_>) -> Self {
        Self {
            addr: table.copy_flag_addr,
        }
    }

    pub fn read<N: Nvm>(&self, nvm: &mut N) -> Result<FlagState, NvmError> {
        let mut byte = [0u8; 1];
        nvm.read(self.addr, &mut byte)?;
        Ok(if byte[0] == 0 {
            FlagState::Clear
        } else {
            FlagState::Pending
        })
    }

    pub fn set<N: Nvm>(&self, nvm: &mut N) -> Result<(), NvmError> {
        let mut row = [0u8; ROW_SIZE];
        row[0] = COPY_FLAG_PENDING;
        self.write_if_changed(nvm, &row)
    }

    pub fn clear<N: Nvm>(&self, nvm: &mut N) -> Result<(), NvmError> {
        self.write_if_changed(nvm, &[0u8; ROW_SIZE])
    }

    fn write_if_changed<N: Nvm>(&self, nvm: &mut N, row: &[u8; ROW_SIZE]) -> Result<(), NvmError> {
        if nvm.compare(self.addr, row)? {
            return Ok(());
        }
        nvm.write_row(self.addr, row)
    }
}
