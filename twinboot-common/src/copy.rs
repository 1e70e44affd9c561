// SPDX-License-Identifier: MIT
// Copyright (c) 2026 ADNT Sarl <info@adnt.io>

//! Staged copy engine: row-by-row copy with compare-before-write.
//!
//! Rows that already match the source are skipped, so a copy interrupted by
//! a reset can be restarted from the first row and only the remaining rows
//! are programmed.

use core::fmt;

use crate::guard::{AccessError, GuardError};
use crate::layout::ROW_SIZE;
use crate::nvm::{Nvm, NvmError};

/// Decides whether a row write may go ahead.
pub trait WriteGate {
    fn permit<N: Nvm>(&self, nvm: &mut N, addr: u32, len: u32) -> Result<(), GuardError>;
}

/// Gate for rows owned by the metadata store, which are never reachable
/// through the region guard.
pub struct Unguarded;

impl WriteGate for Unguarded {
    fn permit<N: Nvm>(&self, _nvm: &mut N, _addr: u32, _len: u32) -> Result<(), GuardError> {
        Ok(())
    }
}

#[derive(Clone, Copy, Debug, Default, PartialEq, Eq)]
#[cfg_attr(feature = "defmt", derive(defmt::Format))]
pub struct CopyReport {
    pub rows_written: u32,
    pub rows_skipped: u32,
}

/// First address at which a copy stopped, and why.
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
#[cfg_attr(feature = "defmt", derive(defmt::Format))]
pub struct CopyError {
    pub address: u32,
    pub cause: AccessError,
}

impl CopyError {
    fn io(address: u32, e: NvmError) -> Self {
        Self {
            address,
            cause: AccessError::Io(e),
        }
    }

    fn denied(address: u32, e: GuardError) -> Self {
        Self {
            address,
            cause: AccessError::Denied(e),
        }
    }
}

impl fmt::Display for CopyError {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "copy stopped at 0x{:08x}: {}", self.address, self.cause)
    }
}

/// Copy `total_len` bytes from `src` to `dest`, one row at a time.
///
/// A trailing partial row is copied as a whole row. Overlapping ranges are
/// refused.
pub fn copy_region<N: Nvm, G: WriteGate>(
    nvm: &mut N,
    gate: &G,
    dest: u32,
    src: u32,
    total_len: u32,
) -> Result<CopyReport, CopyError> {
    let rows = total_len.div_ceil(ROW_SIZE as u32);
    let span = rows
        .checked_mul(ROW_SIZE as u32)
        .ok_or(CopyError::denied(dest, GuardError::Length))?;
    let (src_end, dest_end) = match (src.checked_add(span), dest.checked_add(span)) {
        (Some(s), Some(d)) => (s, d),
        _ => return Err(CopyError::denied(dest, GuardError::Address)),
    };
    if span > 0 && src < dest_end && dest < src_end {
        return Err(CopyError::denied(dest, GuardError::Address));
    }

    let mut report = CopyReport::default();
    let mut scratch = [0u8; ROW_SIZE];

    for row in 0..rows {
        let offset = row * ROW_SIZE as u32;
        let (from, to) = (src + offset, dest + offset);

        nvm.read(from, &mut scratch)
            .map_err(|e| CopyError::io(from, e))?;

        if nvm.compare(to, &scratch).map_err(|e| CopyError::io(to, e))? {
            report.rows_skipped += 1;
            continue;
        }

        gate.permit(nvm, to, ROW_SIZE as u32)
            .map_err(|e| CopyError::denied(to, e))?;
        nvm.write_row(to, &scratch)
            .map_err(|e| CopyError::io(to, e))?;
        report.rows_written += 1;
    }

    Ok(report)
}
