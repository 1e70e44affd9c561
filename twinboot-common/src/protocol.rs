// SPDX-License-Identifier: MIT
// Copyright (c) 2026 ADNT Sarl <info@adnt.io>

//! Update-service protocol between the launcher and the host tool.
//!
//! Messages are postcard-encoded and COBS-framed. This module provides types
//! that work in both `no_std` (embedded) and `std` (host) environments.
//! Use the `std` feature for host tools.

use serde::{Deserialize, Serialize};

use crate::layout::{ROW_SIZE, SLOT_COUNT};
use crate::metadata::SlotEntry;

/// One row of payload.
#[cfg(not(feature = "std"))]
pub type RowData = heapless::Vec<u8, ROW_SIZE>;
#[cfg(feature = "std")]
pub type RowData = alloc::vec::Vec<u8>;

/// Upper bound of an encoded frame: a full row plus tag, address, length
/// prefix and COBS overhead.
pub const MAX_FRAME_SIZE: usize = ROW_SIZE + ROW_SIZE / 254 + 32;

#[derive(Serialize, Deserialize, Debug)]
#[allow(clippy::large_enum_variant)] // no_std, no allocator for Box
pub enum Command {
    GetStatus,
    /// Program one row. Subject to the region guard.
    WriteRow { address: u32, data: RowData },
    /// Zero one row. Subject to the region guard.
    EraseRow { address: u32 },
    ReadRow { address: u32 },
    /// Compare one row against `data` without reading it back.
    VerifyRow { address: u32, data: RowData },
    /// Record a signed image already written at `address` as the staged slot.
    StageImage { address: u32, length: u32 },
    /// Mark the staged image for installation on the next boot.
    RequestCopy,
    Reboot,
}

#[derive(Serialize, Deserialize, Debug)]
#[allow(clippy::large_enum_variant)]
pub enum Response {
    Ack(AckStatus),
    Status {
        slots: [SlotEntry; SLOT_COUNT],
        copy_pending: bool,
        halt: HaltReason,
    },
    Row(RowData),
    Compare(bool),
}

#[derive(Serialize, Deserialize, Debug, Clone, Copy, PartialEq, Eq)]
#[cfg_attr(feature = "defmt", derive(defmt::Format))]
pub enum AckStatus {
    Ok,
    AddressError,
    LengthError,
    FlashError,
    ValidationFailed,
    MetadataCorrupt,
    BadCommand,
}

/// Why the launcher is serving updates instead of running an application.
#[derive(Serialize, Deserialize, Debug, Clone, Copy, PartialEq, Eq)]
#[cfg_attr(feature = "defmt", derive(defmt::Format))]
pub enum HaltReason {
    /// An application asked for the update service.
    Requested,
    MetadataCorrupt,
    NoValidApplication,
    FlashError,
}

/// Frame cut out of the byte stream by [`FrameAccumulator`].
#[derive(Debug, PartialEq, Eq)]
pub enum Frame<'a> {
    /// COBS-encoded frame, delimiter excluded.
    Complete(&'a mut [u8]),
    /// A frame longer than the buffer was dropped.
    Oversized,
}

/// Splits a byte stream into zero-delimited frames of at most `N` bytes.
pub struct FrameAccumulator<const N: usize> {
    buf: [u8; N],
    pos: usize,
    discarding: bool,
}

impl<const N: usize> FrameAccumulator<N> {
    pub const fn new() -> Self {
        Self {
            buf: [0u8; N],
            pos: 0,
            discarding: false,
        }
    }

    /// Consume `input` up to and including the next delimiter. Bytes after
    /// the delimiter are left in `input` for the next call.
    pub fn feed(&mut self, input: &mut &[u8]) -> Option<Frame<'_>> {
        while let Some((&byte, rest)) = input.split_first() {
            *input = rest;

            if byte == 0x00 {
                let len = core::mem::take(&mut self.pos);
                if core::mem::take(&mut self.discarding) {
                    return Some(Frame::Oversized);
                }
                if len > 0 {
                    return Some(Frame::Complete(&mut self.buf[..len]));
                }
            } else if self.pos < N {
                self.buf[self.pos] = byte;
                self.pos += 1;
            } else {
                self.discarding = true;
                self.pos = 0;
            }
        }
        None
    }
}

impl<const N: usize> Default for FrameAccumulator<N> {
    fn default() -> Self {
        Self::new()
    }
}
