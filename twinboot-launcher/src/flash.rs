// SPDX-License-Identifier: MIT
// Copyright (c) 2026 ADNT Sarl <info@adnt.io>

//! Row access to the QSPI flash through the RP2040 boot ROM.
//!
//! Erase and program need XIP torn down, so the sequence
//!   1. connect_internal_flash()
//!   2. flash_exit_xip()
//!   3. flash_range_erase() / flash_range_program()
//!   4. flash_flush_cache()
//!   5. flash_enter_cmd_xip()
//!
//! runs from RAM (`#[link_section = ".data"]`) with interrupts masked, using
//! ROM function pointers resolved once by [`init`]. Reads go through the XIP
//! window.

use twinboot_common::layout::{FLASH_BASE, FLASH_SECTOR_SIZE, FLASH_SIZE, ROW_SIZE};
use twinboot_common::nvm::{is_row_aligned, Nvm, NvmError};

/// 4 KiB sector erase opcode.
const SECTOR_ERASE_CMD: u8 = 0x20;

type RomFnVoid = unsafe extern "C" fn();
type RomFnErase = unsafe extern "C" fn(u32, usize, u32, u8);
type RomFnProgram = unsafe extern "C" fn(u32, *const u8, usize);

static mut ROM_CONNECT_INTERNAL_FLASH: RomFnVoid = dummy_void;
static mut ROM_FLASH_EXIT_XIP: RomFnVoid = dummy_void;
static mut ROM_FLASH_RANGE_ERASE: RomFnErase = dummy_erase;
static mut ROM_FLASH_RANGE_PROGRAM: RomFnProgram = dummy_program;
static mut ROM_FLASH_FLUSH_CACHE: RomFnVoid = dummy_void;
static mut ROM_FLASH_ENTER_CMD_XIP: RomFnVoid = dummy_void;

unsafe extern "C" fn dummy_void() {}
unsafe extern "C" fn dummy_erase(_: u32, _: usize, _: u32, _: u8) {}
unsafe extern "C" fn dummy_program(_: u32, _: *const u8, _: usize) {}

/// ROM table lookup. The table pointer (0x14) and lookup routine (0x18) are
/// stored as 16-bit halfwords.
unsafe fn rom_func_lookup(tag: &[u8; 2]) -> usize {
    let fn_table = *(0x14 as *const u16) as *const u16;
    let lookup = core::mem::transmute::<usize, unsafe extern "C" fn(*const u16, u32) -> usize>(
        *(0x18 as *const u16) as usize,
    );
    lookup(fn_table, u16::from_le_bytes(*tag) as u32)
}

/// Resolve the ROM flash routines. Call once, while XIP is still active.
pub fn init() {
    unsafe {
        ROM_CONNECT_INTERNAL_FLASH = core::mem::transmute::<usize, RomFnVoid>(rom_func_lookup(b"IF"));
        ROM_FLASH_EXIT_XIP = core::mem::transmute::<usize, RomFnVoid>(rom_func_lookup(b"EX"));
        ROM_FLASH_RANGE_ERASE = core::mem::transmute::<usize, RomFnErase>(rom_func_lookup(b"RE"));
        ROM_FLASH_RANGE_PROGRAM =
            core::mem::transmute::<usize, RomFnProgram>(rom_func_lookup(b"RP"));
        ROM_FLASH_FLUSH_CACHE = core::mem::transmute::<usize, RomFnVoid>(rom_func_lookup(b"FC"));
        ROM_FLASH_ENTER_CMD_XIP = core::mem::transmute::<usize, RomFnVoid>(rom_func_lookup(b"CX"));
    }
}

/// Erase one sector and program it with `data`, from RAM.
///
/// # Safety
/// [`init`] must have run, `offset` must be sector aligned and `data` must
/// point to `FLASH_SECTOR_SIZE` bytes outside flash.
#[link_section = ".data"]
#[inline(never)]
unsafe fn erase_and_program(offset: u32, data: *const u8) {
    cortex_m::interrupt::disable();
    ROM_CONNECT_INTERNAL_FLASH();
    ROM_FLASH_EXIT_XIP();
    ROM_FLASH_RANGE_ERASE(offset, FLASH_SECTOR_SIZE as usize, FLASH_SECTOR_SIZE, SECTOR_ERASE_CMD);
    ROM_FLASH_RANGE_PROGRAM(offset, data, FLASH_SECTOR_SIZE as usize);
    ROM_FLASH_FLUSH_CACHE();
    ROM_FLASH_ENTER_CMD_XIP();
    cortex_m::interrupt::enable();
}

/// The on-chip QSPI flash as a row device.
pub struct RomFlash {
    _private: (),
}

impl RomFlash {
    /// # Safety
    /// [`init`] must have run.
    pub unsafe fn new() -> Self {
        Self { _private: () }
    }

    fn check_range(addr: u32, len: usize) -> Result<(), NvmError> {
        let end = addr
            .checked_add(len as u32)
            .ok_or(NvmError::OutOfBounds)?;
        if addr < FLASH_BASE || end > FLASH_BASE + FLASH_SIZE {
            return Err(NvmError::OutOfBounds);
        }
        Ok(())
    }
}

impl Nvm for RomFlash {
    fn read(&mut self, addr: u32, buf: &mut [u8]) -> Result<(), NvmError> {
        Self::check_range(addr, buf.len())?;
        for (i, byte) in buf.iter_mut().enumerate() {
            *byte = unsafe { ((addr + i as u32) as *const u8).read_volatile() };
        }
        Ok(())
    }

    fn write_row(&mut self, addr: u32, row: &[u8; ROW_SIZE]) -> Result<(), NvmError> {
        if !is_row_aligned(addr) {
            return Err(NvmError::Unaligned);
        }
        Self::check_range(addr, ROW_SIZE)?;

        // The ROM cannot program from XIP-mapped memory.
        let mut staging = [0u8; ROW_SIZE];
        staging.copy_from_slice(row);
        unsafe { erase_and_program(addr - FLASH_BASE, staging.as_ptr()) };

        if self.compare(addr, row)? {
            Ok(())
        } else {
            Err(NvmError::WriteFailed)
        }
    }
}
