// SPDX-License-Identifier: MIT
// Copyright (c) 2026 ADNT Sarl <info@adnt.io>

//! In-memory flash and fixtures shared by the integration tests.

#![allow(dead_code)]

use core::convert::Infallible;

use crc::{Crc, CRC_32_ISO_HDLC};
use embedded_hal::delay::DelayNs;
use embedded_hal::digital::{ErrorType, InputPin};
use twinboot_common::layout::{PartitionTable, SlotId, Window, ROW_SIZE};
use twinboot_common::metadata::{MetadataRow, SlotEntry};
use twinboot_common::nvm::{Nvm, NvmError};

const CRC32: Crc<u32> = Crc::<u32>::new(&CRC_32_ISO_HDLC);

pub const FLASH_BASE: u32 = 0x1000_0000;
pub const FLASH_SIZE: u32 = 0xB_0000;

pub const APP1_ADDR: u32 = 0x1000_6000;
pub const APP2_ADDR: u32 = 0x1004_0000;
pub const STAGED_ADDR: u32 = 0x1006_0000;
pub const METADATA_ADDR: u32 = 0x1009_0000;
pub const MIRROR_ADDR: u32 = METADATA_ADDR + ROW_SIZE as u32;
pub const COPY_FLAG_ADDR: u32 = 0x1009_2000;
pub const EEPROM_ADDR: u32 = 0x100A_0000;

pub const TEST_LAYOUT: PartitionTable<'static> = PartitionTable {
    flash: Window::new(FLASH_BASE, FLASH_SIZE),
    launcher: Window::new(FLASH_BASE, 0x6000),
    application: Window {
        start: APP1_ADDR,
        end: EEPROM_ADDR,
    },
    eeprom: Window::new(EEPROM_ADDR, 0x4000),
    partitions: [
        Window::new(FLASH_BASE, 0x6000),
        Window::new(APP1_ADDR, 0x3_A000),
        Window::new(APP2_ADDR, 0x2_0000),
        Window::new(STAGED_ADDR, 0x3_0000),
    ],
    metadata_addr: METADATA_ADDR,
    copy_flag_addr: COPY_FLAG_ADDR,
    golden: &[],
    copy_destination: SlotId::PRIMARY,
};

pub const GOLDEN_LAYOUT: PartitionTable<'static> = PartitionTable {
    golden: &[SlotId::SECONDARY],
    ..TEST_LAYOUT
};

/// Flash backed by a `Vec`, erased to 0xFF, with write logging and a
/// simulated power cut after a given number of row writes.
pub struct MemFlash {
    base: u32,
    data: Vec<u8>,
    pub writes: Vec<u32>,
    writes_left: Option<usize>,
}

impl MemFlash {
    pub fn new() -> Self {
        Self {
            base: FLASH_BASE,
            data: vec![0xFF; FLASH_SIZE as usize],
            writes: Vec::new(),
            writes_left: None,
        }
    }

    /// Let `n` more row writes succeed, then fail every write after that.
    pub fn cut_power_after(&mut self, n: usize) {
        self.writes_left = Some(n);
    }

    pub fn restore_power(&mut self) {
        self.writes_left = None;
    }

    pub fn write_count(&self) -> usize {
        self.writes.len()
    }

    pub fn bytes(&self, addr: u32, len: usize) -> &[u8] {
        let at = (addr - self.base) as usize;
        &self.data[at..at + len]
    }

    /// Program bytes directly, bypassing logging and row rules.
    pub fn poke(&mut self, addr: u32, bytes: &[u8]) {
        let at = (addr - self.base) as usize;
        self.data[at..at + bytes.len()].copy_from_slice(bytes);
    }

    fn offset(&self, addr: u32, len: usize) -> Result<usize, NvmError> {
        let at = addr.checked_sub(self.base).ok_or(NvmError::OutOfBounds)? as usize;
        if at + len > self.data.len() {
            return Err(NvmError::OutOfBounds);
        }
        Ok(at)
    }
}

impl Nvm for MemFlash {
    fn read(&mut self, addr: u32, buf: &mut [u8]) -> Result<(), NvmError> {
        let at = self.offset(addr, buf.len())?;
        buf.copy_from_slice(&self.data[at..at + buf.len()]);
        Ok(())
    }

    fn write_row(&mut self, addr: u32, row: &[u8; ROW_SIZE]) -> Result<(), NvmError> {
        if addr % ROW_SIZE as u32 != 0 {
            return Err(NvmError::Unaligned);
        }
        let at = self.offset(addr, ROW_SIZE)?;
        if let Some(left) = self.writes_left.as_mut() {
            if *left == 0 {
                return Err(NvmError::WriteFailed);
            }
            *left -= 1;
        }
        self.data[at..at + ROW_SIZE].copy_from_slice(row);
        self.writes.push(addr);
        Ok(())
    }
}

/// Deterministic image body of `len` bytes.
pub fn image(len: usize, seed: u8) -> Vec<u8> {
    (0..len)
        .map(|i| (i as u8).wrapping_mul(31).wrapping_add(seed) ^ (i >> 8) as u8)
        .collect()
}

pub fn crc32(data: &[u8]) -> u32 {
    CRC32.checksum(data)
}

/// Place `body` at `addr` followed by its CRC-32 signature.
pub fn install_image(flash: &mut MemFlash, addr: u32, body: &[u8]) -> SlotEntry {
    flash.poke(addr, body);
    flash.poke(addr + body.len() as u32, &crc32(body).to_le_bytes());
    SlotEntry::new(addr, body.len() as u32)
}

/// Write the same metadata row to MD and MDC.
pub fn write_metadata(flash: &mut MemFlash, row: &MetadataRow) {
    let encoded = row.encode();
    flash.poke(METADATA_ADDR, &encoded);
    flash.poke(MIRROR_ADDR, &encoded);
}

pub fn clear_copy_flag(flash: &mut MemFlash) {
    flash.poke(COPY_FLAG_ADDR, &[0u8; ROW_SIZE]);
}

pub fn set_copy_flag(flash: &mut MemFlash) {
    flash.poke(COPY_FLAG_ADDR, &[0xA5]);
}

pub fn launcher_entry() -> SlotEntry {
    SlotEntry::new(FLASH_BASE, 0x5000)
}

/// Button that reads pressed (low) for the first `pressed_reads` samples.
pub struct Button {
    pressed_reads: usize,
    pub reads: usize,
}

impl Button {
    pub fn held() -> Self {
        Self::released_after(usize::MAX)
    }

    pub fn released() -> Self {
        Self::released_after(0)
    }

    pub fn released_after(pressed_reads: usize) -> Self {
        Self {
            pressed_reads,
            reads: 0,
        }
    }

    fn sample(&mut self) -> bool {
        self.reads += 1;
        self.reads <= self.pressed_reads
    }
}

impl ErrorType for Button {
    type Error = Infallible;
}

impl InputPin for Button {
    fn is_high(&mut self) -> Result<bool, Infallible> {
        Ok(!self.sample())
    }

    fn is_low(&mut self) -> Result<bool, Infallible> {
        Ok(self.sample())
    }
}

/// Delay that only accumulates elapsed time.
#[derive(Default)]
pub struct Clock {
    pub elapsed_ns: u64,
}

impl DelayNs for Clock {
    fn delay_ns(&mut self, ns: u32) {
        self.elapsed_ns += u64::from(ns);
    }
}
