// SPDX-License-Identifier: MIT
// Copyright (c) 2026 ADNT Sarl <info@adnt.io>

//! Update service over USB CDC.
//!
//! Entered when the launcher halts or an application asks for it. Every
//! flash access goes through the region guard with the launcher as the
//! running image; metadata and the copy flag only change through the
//! metadata store.
//!
//! - GetStatus: slot table, copy flag and halt reason
//! - WriteRow / EraseRow: guarded row writes
//! - ReadRow / VerifyRow: guarded reads
//! - StageImage: validate an uploaded image and record it as the staged slot
//! - RequestCopy: arm the copy flag for the next boot
//! - Reboot: restart the device

use embedded_hal::digital::OutputPin;
use rp2040_hal as hal;
use twinboot_common::guard::{AccessError, GuardError, ReadMode, ReadOutcome, RegionGuard};
use twinboot_common::layout::{SlotId, RP2040_LAYOUT, ROW_SIZE, SIGNATURE_SIZE, SLOT_COUNT};
use twinboot_common::metadata::{
    CopyFlag, FlagState, MetadataError, MetadataRow, MetadataStore, SlotEntry,
};
use twinboot_common::protocol::{AckStatus, Command, HaltReason, Response, RowData};
use twinboot_common::validate::{validate, validate_entry};
use usb_device::class_prelude::UsbBusAllocator;

use crate::flash::RomFlash;
use crate::peripherals::{self, Peripherals};
use crate::usb_transport::UsbTransport;

/// Blinks shown before the service starts, per halt reason.
fn error_pattern(reason: HaltReason) -> (u32, u32) {
    match reason {
        HaltReason::Requested => (10, 50),
        HaltReason::MetadataCorrupt => (5, 400),
        HaltReason::NoValidApplication => (3, 400),
        HaltReason::FlashError => (8, 200),
    }
}

/// Show the halt pattern, bring up USB and serve commands until reboot.
pub fn enter_update_mode(p: &mut Peripherals, reason: HaltReason) -> ! {
    defmt::println!("Update service: {}", reason);

    let (count, period_ms) = error_pattern(reason);
    twinboot_common::blink(&mut p.led_pin, &mut p.timer, count, period_ms);

    let Some(mut usb) = p.usb.take() else {
        defmt::panic!("USB peripherals already taken");
    };
    let usb_bus = peripherals::store_usb_bus(UsbBusAllocator::new(hal::usb::UsbBus::new(
        usb.regs,
        usb.dpram,
        usb.clock,
        true,
        &mut usb.resets,
    )));
    let mut transport = UsbTransport::new(usb_bus);

    defmt::println!("USB CDC initialized, serving updates");
    p.led_pin.set_high().ok();

    let mut service = Service {
        flash: unsafe { RomFlash::new() },
        store: MetadataStore::new(&RP2040_LAYOUT),
        flag: CopyFlag::new(&RP2040_LAYOUT),
        halt: reason,
    };

    loop {
        transport.poll();

        match transport.try_receive() {
            Some(Ok(cmd)) => service.handle(&mut transport, cmd),
            Some(Err(())) => transport.send(&Response::Ack(AckStatus::BadCommand)),
            None => {}
        }
    }
}

struct Service {
    flash: RomFlash,
    store: MetadataStore,
    flag: CopyFlag,
    halt: HaltReason,
}

impl Service {
    fn handle(&mut self, transport: &mut UsbTransport, cmd: Command) {
        let response = match cmd {
            Command::GetStatus => self.status(),
            Command::WriteRow { address, data } => {
                Response::Ack(self.write_row(address, &data))
            }
            Command::EraseRow { address } => Response::Ack(self.erase_row(address)),
            Command::ReadRow { address } => self.read_row(address),
            Command::VerifyRow { address, data } => self.verify_row(address, &data),
            Command::StageImage { address, length } => {
                Response::Ack(self.stage_image(address, length))
            }
            Command::RequestCopy => Response::Ack(self.request_copy()),
            Command::Reboot => reboot(transport),
        };
        transport.send(&response);
    }

    /// Reconciled metadata, repaired if needed.
    fn metadata(&mut self) -> Result<MetadataRow, AckStatus> {
        self.store
            .reconcile(&mut self.flash)
            .map(|(row, _)| row)
            .map_err(metadata_status)
    }

    /// Metadata the guard works against. With corrupt metadata only the
    /// launcher itself is known to be occupied.
    fn guard_metadata(&mut self) -> MetadataRow {
        self.metadata().unwrap_or_else(|_| {
            let launcher = RP2040_LAYOUT.launcher;
            let mut slots = [SlotEntry::EMPTY; SLOT_COUNT];
            slots[SlotId::LAUNCHER.index()] =
                SlotEntry::new(launcher.start, launcher.size() - SIGNATURE_SIZE);
            MetadataRow::new(slots)
        })
    }

    fn status(&mut self) -> Response {
        let slots = self
            .metadata()
            .map(|row| *row.slots())
            .unwrap_or([SlotEntry::EMPTY; SLOT_COUNT]);
        let copy_pending = matches!(self.flag.read(&mut self.flash), Ok(FlagState::Pending));
        Response::Status {
            slots,
            copy_pending,
            halt: self.halt,
        }
    }

    fn write_row(&mut self, address: u32, data: &[u8]) -> AckStatus {
        let Ok(row) = <&[u8; ROW_SIZE]>::try_from(data) else {
            return AckStatus::LengthError;
        };
        let metadata = self.guard_metadata();
        let guard = RegionGuard::new(&RP2040_LAYOUT, &metadata, SlotId::LAUNCHER);
        access_status(guard.write_row(&mut self.flash, address, row))
    }

    fn erase_row(&mut self, address: u32) -> AckStatus {
        let metadata = self.guard_metadata();
        let guard = RegionGuard::new(&RP2040_LAYOUT, &metadata, SlotId::LAUNCHER);
        access_status(guard.erase_row(&mut self.flash, address))
    }

    fn read_row(&mut self, address: u32) -> Response {
        let metadata = self.guard_metadata();
        let guard = RegionGuard::new(&RP2040_LAYOUT, &metadata, SlotId::LAUNCHER);
        let mut buf = [0u8; ROW_SIZE];

        if let Err(e) = guard.read(&mut self.flash, address, ReadMode::Copy(&mut buf)) {
            return Response::Ack(access_status(Err(e)));
        }
        match RowData::from_slice(&buf) {
            Ok(data) => Response::Row(data),
            Err(_) => Response::Ack(AckStatus::LengthError),
        }
    }

    fn verify_row(&mut self, address: u32, data: &[u8]) -> Response {
        let metadata = self.guard_metadata();
        let guard = RegionGuard::new(&RP2040_LAYOUT, &metadata, SlotId::LAUNCHER);

        match guard.read(&mut self.flash, address, ReadMode::Compare(data)) {
            Ok(outcome) => Response::Compare(outcome == ReadOutcome::Equal),
            Err(e) => Response::Ack(access_status(Err(e))),
        }
    }

    fn stage_image(&mut self, address: u32, length: u32) -> AckStatus {
        let entry = SlotEntry::new(address, length);
        let fits = RP2040_LAYOUT
            .partition(SlotId::STAGED)
            .is_some_and(|part| part.contains_range(address, entry.signed_length()));
        if !fits {
            return AckStatus::AddressError;
        }

        if let Err(e) = validate_entry(&mut self.flash, &RP2040_LAYOUT, entry) {
            defmt::println!("StageImage: image at 0x{:08x} rejected: {}", address, e);
            return AckStatus::ValidationFailed;
        }

        match self.store.update_slot(&mut self.flash, SlotId::STAGED, entry) {
            Ok(_) => {
                defmt::println!("StageImage: staged {} bytes at 0x{:08x}", length, address);
                AckStatus::Ok
            }
            Err(e) => metadata_status(e),
        }
    }

    fn request_copy(&mut self) -> AckStatus {
        let metadata = match self.metadata() {
            Ok(row) => row,
            Err(status) => return status,
        };
        if let Err(e) = validate(&mut self.flash, &RP2040_LAYOUT, &metadata, SlotId::STAGED) {
            defmt::println!("RequestCopy: staged image invalid: {}", e);
            return AckStatus::ValidationFailed;
        }

        match self.flag.set(&mut self.flash) {
            Ok(()) => {
                defmt::println!("RequestCopy: copy armed for next boot");
                AckStatus::Ok
            }
            Err(_) => AckStatus::FlashError,
        }
    }
}

fn access_status(result: Result<(), AccessError>) -> AckStatus {
    match result {
        Ok(()) => AckStatus::Ok,
        Err(AccessError::Denied(GuardError::Length)) => AckStatus::LengthError,
        Err(AccessError::Denied(GuardError::Address)) => AckStatus::AddressError,
        Err(AccessError::Io(_)) => AckStatus::FlashError,
    }
}

fn metadata_status(e: MetadataError) -> AckStatus {
    match e {
        MetadataError::Corrupt => AckStatus::MetadataCorrupt,
        MetadataError::UnknownSlot => AckStatus::BadCommand,
        MetadataError::Io(_) | MetadataError::Copy(_) => AckStatus::FlashError,
    }
}

/// Acknowledge, give the host time to read it, then reset.
fn reboot(transport: &mut UsbTransport) -> ! {
    transport.send(&Response::Ack(AckStatus::Ok));
    cortex_m::asm::delay(12_000_000);
    cortex_m::peripheral::SCB::sys_reset();
}
