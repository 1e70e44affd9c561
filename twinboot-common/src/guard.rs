// SPDX-License-Identifier: MIT
// Copyright (c) 2026 ADNT Sarl <info@adnt.io>

//! Region guard: decides whether an NVM access may proceed.
//!
//! A request is checked against an ordered list of [`Rule`]s and the first
//! denial wins. Writes use [`WRITE_RULES`]; reads use [`READ_RULES`], which
//! leave out the rules that only protect content from being modified.

use core::fmt;

use crate::copy::WriteGate;
use crate::layout::{PartitionTable, SlotId, Window, ROW_SIZE, SIGNATURE_SIZE};
use crate::metadata::MetadataRow;
use crate::nvm::{is_row_aligned, Nvm, NvmError};
use crate::validate::validate;

/// Policy violation. The access is simply not performed.
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
#[cfg_attr(feature = "defmt", derive(defmt::Format))]
pub enum GuardError {
    Length,
    Address,
}

impl fmt::Display for GuardError {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            GuardError::Length => f.write_str("length is not a whole number of rows"),
            GuardError::Address => f.write_str("address not permitted"),
        }
    }
}

/// A guarded access failed, either by policy or in the NVM driver.
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
#[cfg_attr(feature = "defmt", derive(defmt::Format))]
pub enum AccessError {
    Denied(GuardError),
    Io(NvmError),
}

impl fmt::Display for AccessError {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            AccessError::Denied(e) => write!(f, "denied: {}", e),
            AccessError::Io(e) => write!(f, "I/O error: {}", e),
        }
    }
}

impl From<GuardError> for AccessError {
    fn from(e: GuardError) -> Self {
        AccessError::Denied(e)
    }
}

impl From<NvmError> for AccessError {
    fn from(e: NvmError) -> Self {
        AccessError::Io(e)
    }
}

/// Guard rules in evaluation order.
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
#[cfg_attr(feature = "defmt", derive(defmt::Format))]
pub enum Rule {
    /// Length must be a nonzero whole number of rows.
    RowLength,
    /// Address must be row aligned and the range must not wrap.
    RowAlignment,
    /// Range must sit inside application flash or the EEPROM window.
    NvmWindow,
    /// Metadata rows and the copy flag are owned by the metadata store.
    ProtectedRows,
    /// The running image cannot overwrite itself.
    RunningImage,
    /// Golden images stay untouched while they still validate.
    GoldenImage,
}

pub const WRITE_RULES: [Rule; 6] = [
    Rule::RowLength,
    Rule::RowAlignment,
    Rule::NvmWindow,
    Rule::ProtectedRows,
    Rule::RunningImage,
    Rule::GoldenImage,
];

pub const READ_RULES: [Rule; 3] = [Rule::RowLength, Rule::RowAlignment, Rule::NvmWindow];

/// What a guarded read does with the flash contents.
pub enum ReadMode<'b> {
    Copy(&'b mut [u8]),
    Compare(&'b [u8]),
}

#[derive(Clone, Copy, Debug, PartialEq, Eq)]
#[cfg_attr(feature = "defmt", derive(defmt::Format))]
pub enum ReadOutcome {
    Copied,
    Equal,
    NotEqual,
}

#[derive(Clone, Copy, Debug)]
struct Request {
    addr: u32,
    len: u32,
}

/// Access policy for the image currently executing.
pub struct RegionGuard<'a> {
    table: &'a PartitionTable<'a>,
    metadata: &'a MetadataRow,
    running: SlotId,
}

impl<'a> RegionGuard<'a> {
    pub fn new(table: &'a PartitionTable<'a>, metadata: &'a MetadataRow, running: SlotId) -> Self {
        Self {
            table,
            metadata,
            running,
        }
    }

    pub fn running(&self) -> SlotId {
        self.running
    }

    /// Check a write (or, with `is_erase`, an erase) of `[addr, addr + len)`.
    ///
    /// An erase with `len == 0` covers one row. `nvm` is only read, to find
    /// out whether an intersected golden image still validates.
    pub fn check_write<N: Nvm>(
        &self,
        nvm: &mut N,
        addr: u32,
        len: u32,
        is_erase: bool,
    ) -> Result<(), GuardError> {
        let len = if is_erase && len == 0 {
            ROW_SIZE as u32
        } else {
            len
        };
        let req = Request { addr, len };
        let mut healthy =
            |slot: SlotId| validate(&mut *nvm, self.table, self.metadata, slot).is_ok();

        WRITE_RULES
            .iter()
            .try_for_each(|rule| self.apply(*rule, req, &mut healthy))
    }

    /// Check a read of `[addr, addr + len)`. Reading the running image is allowed.
    pub fn check_read(&self, addr: u32, len: u32) -> Result<(), GuardError> {
        let req = Request { addr, len };
        READ_RULES
            .iter()
            .try_for_each(|rule| self.apply(*rule, req, &mut |_: SlotId| true))
    }

    fn apply(
        &self,
        rule: Rule,
        req: Request,
        healthy: &mut dyn FnMut(SlotId) -> bool,
    ) -> Result<(), GuardError> {
        match rule {
            Rule::RowLength if req.len == 0 || req.len % ROW_SIZE as u32 != 0 => {
                Err(GuardError::Length)
            }
            Rule::RowLength => Ok(()),
            _ if self.denies(rule, req, healthy) => Err(GuardError::Address),
            _ => Ok(()),
        }
    }

    fn denies(&self, rule: Rule, req: Request, healthy: &mut dyn FnMut(SlotId) -> bool) -> bool {
        match rule {
            Rule::RowLength => false,
            Rule::RowAlignment => {
                !is_row_aligned(req.addr) || req.addr.checked_add(req.len).is_none()
            }
            Rule::NvmWindow => {
                !self.table.application.contains_range(req.addr, req.len)
                    && !self.table.eeprom.contains_range(req.addr, req.len)
            }
            Rule::ProtectedRows => self
                .table
                .protected_rows()
                .iter()
                .any(|row| row.intersects(req.addr, req.len)),
            Rule::RunningImage => self.slot_intersects(self.running, req),
            Rule::GoldenImage => self
                .table
                .golden
                .iter()
                .any(|&slot| self.slot_intersects(slot, req) && healthy(slot)),
        }
    }

    fn slot_intersects(&self, slot: SlotId, req: Request) -> bool {
        let Some(entry) = self.metadata.slot(slot) else {
            return false;
        };
        let span = entry.length.saturating_add(SIGNATURE_SIZE);
        let window = Window {
            start: entry.start,
            end: entry.start.saturating_add(span),
        };
        window.intersects(req.addr, req.len)
    }

    /// Read through the guard, copying out or comparing.
    pub fn read<N: Nvm>(
        &self,
        nvm: &mut N,
        addr: u32,
        mode: ReadMode<'_>,
    ) -> Result<ReadOutcome, AccessError> {
        match mode {
            ReadMode::Copy(buf) => {
                self.check_read(addr, buf.len() as u32)?;
                nvm.read(addr, buf)?;
                Ok(ReadOutcome::Copied)
            }
            ReadMode::Compare(expected) => {
                self.check_read(addr, expected.len() as u32)?;
                if nvm.compare(addr, expected)? {
                    Ok(ReadOutcome::Equal)
                } else {
                    Ok(ReadOutcome::NotEqual)
                }
            }
        }
    }

    /// Write one row through the guard.
    pub fn write_row<N: Nvm>(
        &self,
        nvm: &mut N,
        addr: u32,
        row: &[u8; ROW_SIZE],
    ) -> Result<(), AccessError> {
        self.check_write(nvm, addr, ROW_SIZE as u32, false)?;
        nvm.write_row(addr, row)?;
        Ok(())
    }

    /// Erase one row through the guard by programming it with zeros.
    pub fn erase_row<N: Nvm>(&self, nvm: &mut N, addr: u32) -> Result<(), AccessError> {
        self.check_write(nvm, addr, 0, true)?;
        nvm.write_row(addr, &[0u8; ROW_SIZE])?;
        Ok(())
    }
}

impl WriteGate for RegionGuard<'_> {
    fn permit<N: Nvm>(&self, nvm: &mut N, addr: u32, len: u32) -> Result<(), GuardError> {
        self.check_write(nvm, addr, len, false)
    }
}
