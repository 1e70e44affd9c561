// SPDX-License-Identifier: MIT
// Copyright (c) 2026 ADNT Sarl <info@adnt.io>

//! Flash partition table and layout constants.
//!
//! Every component that needs an address (region guard, metadata store,
//! launcher) receives a [`PartitionTable`] instead of reading linker symbols.
//! [`RP2040_LAYOUT`] is the table the launcher binary is built with.

use serde::{Deserialize, Serialize};

// --- Flash geometry ---

pub const FLASH_BASE: u32 = 0x1000_0000;
pub const FLASH_SIZE: u32 = 2 * 1024 * 1024;

pub const FLASH_SECTOR_SIZE: u32 = 4096;
pub const FLASH_PAGE_SIZE: u32 = 256;

/// Erase and program unit of the NVM, in bytes.
///
/// A row is one erase sector; `Nvm::write_row` erases and programs it as a
/// whole, so compare and write always see the same row boundaries.
pub const ROW_SIZE: usize = FLASH_SECTOR_SIZE as usize;

/// Size of the CRC-32 signature stored right after each image.
pub const SIGNATURE_SIZE: u32 = 4;

/// Number of slots described by the metadata row.
pub const SLOT_COUNT: usize = 4;

// --- RAM handoff ---

pub const RAM_START: u32 = 0x2000_0000;
pub const RAM_END: u32 = 0x2004_2000;

/// Applications write [`RAM_UPDATE_MAGIC`] here before a soft reset to keep
/// the launcher in its update service.
pub const RAM_UPDATE_FLAG_ADDR: u32 = 0x2004_1FF0;
pub const RAM_UPDATE_MAGIC: u32 = 0x0FDA_7E00;

const _: () = assert!(FLASH_SECTOR_SIZE % FLASH_PAGE_SIZE == 0);
const _: () = assert!(SLOT_COUNT * 8 + 4 <= ROW_SIZE);

/// Stable index of a slot in the metadata row.
#[derive(Clone, Copy, Debug, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
#[cfg_attr(feature = "defmt", derive(defmt::Format))]
pub struct SlotId(pub u8);

impl SlotId {
    pub const LAUNCHER: SlotId = SlotId(0);
    pub const PRIMARY: SlotId = SlotId(1);
    pub const SECONDARY: SlotId = SlotId(2);
    /// Mutable pair describing an image waiting to be copied in.
    pub const STAGED: SlotId = SlotId(3);

    pub const ALL: [SlotId; SLOT_COUNT] = [
        SlotId::LAUNCHER,
        SlotId::PRIMARY,
        SlotId::SECONDARY,
        SlotId::STAGED,
    ];

    pub const fn index(self) -> usize {
        self.0 as usize
    }

    pub fn name(self) -> &'static str {
        match self {
            SlotId::LAUNCHER => "launcher",
            SlotId::PRIMARY => "primary",
            SlotId::SECONDARY => "secondary",
            SlotId::STAGED => "staged",
            _ => "unknown",
        }
    }
}

/// Half-open address range `[start, end)`.
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
#[cfg_attr(feature = "defmt", derive(defmt::Format))]
pub struct Window {
    pub start: u32,
    pub end: u32,
}

impl Window {
    pub const fn new(start: u32, size: u32) -> Self {
        Self {
            start,
            end: start + size,
        }
    }

    pub const fn size(&self) -> u32 {
        self.end - self.start
    }

    pub const fn contains(&self, addr: u32) -> bool {
        addr >= self.start && addr < self.end
    }

    /// True if `[addr, addr + len)` lies entirely inside this window.
    pub fn contains_range(&self, addr: u32, len: u32) -> bool {
        match addr.checked_add(len) {
            Some(end) => addr >= self.start && end <= self.end,
            None => false,
        }
    }

    /// True if `[addr, addr + len)` shares at least one byte with this window.
    pub fn intersects(&self, addr: u32, len: u32) -> bool {
        let end = addr.saturating_add(len);
        len > 0 && addr < self.end && end > self.start
    }
}

/// Static description of the device flash.
///
/// `partitions[i]` is the capacity reserved for slot `i`; the metadata row
/// records what currently occupies it.
#[derive(Clone, Copy, Debug)]
pub struct PartitionTable<'a> {
    pub flash: Window,
    /// Reserved for the launcher itself, never writable.
    pub launcher: Window,
    /// Application flash above the launcher.
    pub application: Window,
    /// Emulated-EEPROM window.
    pub eeprom: Window,
    pub partitions: [Window; SLOT_COUNT],
    /// Primary metadata row (MD). The mirror (MDC) is the following row.
    pub metadata_addr: u32,
    pub copy_flag_addr: u32,
    /// Slots that may only be overwritten once they fail validation.
    pub golden: &'a [SlotId],
    /// Slot that receives the staged image.
    pub copy_destination: SlotId,
}

impl PartitionTable<'_> {
    pub const fn mirror_addr(&self) -> u32 {
        self.metadata_addr + ROW_SIZE as u32
    }

    /// Rows that only the metadata store may write: MD, MDC and the copy flag.
    pub const fn protected_rows(&self) -> [Window; 3] {
        [
            Window::new(self.metadata_addr, ROW_SIZE as u32),
            Window::new(self.mirror_addr(), ROW_SIZE as u32),
            Window::new(self.copy_flag_addr, ROW_SIZE as u32),
        ]
    }

    pub fn partition(&self, slot: SlotId) -> Option<Window> {
        self.partitions.get(slot.index()).copied()
    }

    pub fn is_golden(&self, slot: SlotId) -> bool {
        self.golden.contains(&slot)
    }
}

// --- RP2040 layout (2 MiB flash) ---

pub const LAUNCHER_ADDR: u32 = FLASH_BASE;
pub const LAUNCHER_SIZE: u32 = 64 * 1024;
pub const PRIMARY_ADDR: u32 = 0x1001_0000;
pub const PRIMARY_SIZE: u32 = 448 * 1024;
pub const SECONDARY_ADDR: u32 = 0x1008_0000;
pub const SECONDARY_SIZE: u32 = 256 * 1024;
pub const STAGED_ADDR: u32 = 0x100C_0000;
pub const STAGED_SIZE: u32 = 448 * 1024;
pub const METADATA_ADDR: u32 = 0x1013_0000;
pub const COPY_FLAG_ADDR: u32 = 0x1013_2000;
pub const EEPROM_ADDR: u32 = 0x1014_0000;
pub const EEPROM_SIZE: u32 = 64 * 1024;

const _: () = assert!(LAUNCHER_ADDR + LAUNCHER_SIZE == PRIMARY_ADDR);
const _: () = assert!(PRIMARY_ADDR + PRIMARY_SIZE == SECONDARY_ADDR);
const _: () = assert!(SECONDARY_ADDR + SECONDARY_SIZE == STAGED_ADDR);
const _: () = assert!(STAGED_ADDR + STAGED_SIZE == METADATA_ADDR);
const _: () = assert!(METADATA_ADDR + 2 * ROW_SIZE as u32 == COPY_FLAG_ADDR);
const _: () = assert!(EEPROM_ADDR + EEPROM_SIZE <= FLASH_BASE + FLASH_SIZE);

pub const RP2040_LAYOUT: PartitionTable<'static> = PartitionTable {
    flash: Window::new(FLASH_BASE, FLASH_SIZE),
    launcher: Window::new(LAUNCHER_ADDR, LAUNCHER_SIZE),
    application: Window {
        start: PRIMARY_ADDR,
        end: EEPROM_ADDR,
    },
    eeprom: Window::new(EEPROM_ADDR, EEPROM_SIZE),
    partitions: [
        Window::new(LAUNCHER_ADDR, LAUNCHER_SIZE),
        Window::new(PRIMARY_ADDR, PRIMARY_SIZE),
        Window::new(SECONDARY_ADDR, SECONDARY_SIZE),
        Window::new(STAGED_ADDR, STAGED_SIZE),
    ],
    metadata_addr: METADATA_ADDR,
    copy_flag_addr: COPY_FLAG_ADDR,
    golden: &[SlotId::SECONDARY],
    copy_destination: SlotId::PRIMARY,
};
