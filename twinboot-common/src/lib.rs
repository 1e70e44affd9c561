// SPDX-License-Identifier: MIT
// Copyright (c) 2026 ADNT Sarl <info@adnt.io>

//! Common types and boot logic for the twinboot launcher.
//!
//! This crate supports both `no_std` (embedded) and `std` (host) environments:
//! - Default: `no_std` mode for embedded targets
//! - `std` feature: Enables `std` support for host tools
//! - `embedded` feature: Enables RP2040 board helpers (rp2040-hal)
//! - `defmt` feature: Derives `defmt::Format` on public types

#![cfg_attr(not(feature = "std"), no_std)]

#[cfg(feature = "std")]
extern crate alloc;

pub mod copy;
pub mod guard;
pub mod launcher;
pub mod layout;
pub mod metadata;
pub mod nvm;
pub mod protocol;
pub mod validate;

// Re-export commonly used types
pub use copy::{copy_region, CopyError, CopyReport, Unguarded, WriteGate};
pub use guard::{AccessError, GuardError, ReadMode, ReadOutcome, RegionGuard};
pub use launcher::{BootDecision, LaunchError, Launcher, OverrideWindow, Selection, Stage};
pub use layout::{PartitionTable, SlotId, Window, RP2040_LAYOUT, ROW_SIZE, SIGNATURE_SIZE};
pub use metadata::{CopyFlag, FlagState, MetadataRow, MetadataStore, Repair, SlotEntry};
pub use nvm::{Nvm, NvmError};
pub use protocol::{AckStatus, Command, HaltReason, Response};
pub use validate::{validate, validate_entry, ValidationError};

// Embedded-specific exports (only with embedded feature)
#[cfg(feature = "embedded")]
use embedded_hal::delay::DelayNs;
#[cfg(feature = "embedded")]
use embedded_hal::digital::OutputPin;
#[cfg(feature = "embedded")]
use rp2040_hal as hal;

#[cfg(feature = "embedded")]
pub type LedPin =
    hal::gpio::Pin<hal::gpio::bank0::Gpio25, hal::gpio::FunctionSioOutput, hal::gpio::PullDown>;

/// Blink an LED a specified number of times.
#[cfg(feature = "embedded")]
pub fn blink(led: &mut impl OutputPin, timer: &mut impl DelayNs, count: u32, period_ms: u32) {
    for _ in 0..count {
        led.set_high().ok();
        timer.delay_ms(period_ms);
        led.set_low().ok();
        timer.delay_ms(period_ms);
    }
}
