// SPDX-License-Identifier: MIT
// Copyright (c) 2026 ADNT Sarl <info@adnt.io>

//! Row-granular non-volatile memory primitive.

use core::fmt;

use crate::layout::ROW_SIZE;

const COMPARE_CHUNK: usize = 256;

/// Failure reported by the physical NVM driver.
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
#[cfg_attr(feature = "defmt", derive(defmt::Format))]
pub enum NvmError {
    /// Address outside the device.
    OutOfBounds,
    /// Row write at an address that is not row aligned.
    Unaligned,
    /// Erase or program did not complete.
    WriteFailed,
}

impl fmt::Display for NvmError {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            NvmError::OutOfBounds => f.write_str("address out of bounds"),
            NvmError::Unaligned => f.write_str("row address not aligned"),
            NvmError::WriteFailed => f.write_str("row write failed"),
        }
    }
}

/// Whole-row flash access.
///
/// `write_row` must leave the row either fully old or fully new on success;
/// a reset in the middle of it is the hazard the rest of the crate is built
/// to survive.
pub trait Nvm {
    /// Read `buf.len()` bytes starting at `addr`.
    fn read(&mut self, addr: u32, buf: &mut [u8]) -> Result<(), NvmError>;

    /// Erase and program the row at `addr` (row aligned).
    fn write_row(&mut self, addr: u32, row: &[u8; ROW_SIZE]) -> Result<(), NvmError>;

    /// Compare flash at `addr` against `expected` without copying it out.
    fn compare(&mut self, addr: u32, expected: &[u8]) -> Result<bool, NvmError> {
        let mut chunk = [0u8; COMPARE_CHUNK];
        let mut offset = 0u32;
        for want in expected.chunks(COMPARE_CHUNK) {
            let got = &mut chunk[..want.len()];
            let at = addr.checked_add(offset).ok_or(NvmError::OutOfBounds)?;
            self.read(at, got)?;
            if got != want {
                return Ok(false);
            }
            offset += want.len() as u32;
        }
        Ok(true)
    }
}

impl<T: Nvm + ?Sized> Nvm for &mut T {
    fn read(&mut self, addr: u32, buf: &mut [u8]) -> Result<(), NvmError> {
        (**self).read(addr, buf)
    }

    fn write_row(&mut self, addr: u32, row: &[u8; ROW_SIZE]) -> Result<(), NvmError> {
        (**self).write_row(addr, row)
    }

    fn compare(&mut self, addr: u32, expected: &[u8]) -> Result<bool, NvmError> {
        (**self).compare(addr, expected)
    }
}

pub const fn is_row_aligned(addr: u32) -> bool {
    addr % ROW_SIZE as u32 == 0
}
