// SPDX-License-Identifier: MIT
// Copyright (c) 2026 ADNT Sarl <info@adnt.io>

//! Boot path: run the launcher decision, then hand over to the chosen slot.

use embedded_hal::delay::DelayNs;
use twinboot_common::launcher::{
    BootDecision, LaunchError, Launcher, OverrideWindow, Selection, UpgradeOutcome,
};
use twinboot_common::layout::{
    RAM_END, RAM_START, RAM_UPDATE_FLAG_ADDR, RAM_UPDATE_MAGIC, RP2040_LAYOUT,
};
use twinboot_common::metadata::{Repair, SlotEntry};
use twinboot_common::protocol::HaltReason;

use crate::flash::RomFlash;
use crate::peripherals::Peripherals;
use crate::update;

const OVERRIDE_WINDOW: OverrideWindow = OverrideWindow {
    window_ms: 2000,
    poll_ms: 20,
};

const VREG_AND_CHIP_RESET_BASE: u32 = 0x4006_4000;
const CHIP_RESET: *mut u32 = (VREG_AND_CHIP_RESET_BASE + 0x08) as *mut u32;
/// Write-one-to-clear "restarted by the debugger/PSM" flag.
const CHIP_RESET_PSM_RESTART_FLAG: u32 = 1 << 24;

struct VectorTable {
    initial_sp: u32,
    reset_vector: u32,
}

impl VectorTable {
    unsafe fn read_from(addr: u32) -> Self {
        Self {
            initial_sp: (addr as *const u32).read_volatile(),
            reset_vector: (addr as *const u32).offset(1).read_volatile(),
        }
    }

    /// Stack in RAM, Thumb reset handler inside the image.
    fn is_plausible(&self, entry: &SlotEntry) -> bool {
        let handler = self.reset_vector & !1;
        (RAM_START..=RAM_END).contains(&self.initial_sp)
            && self.reset_vector & 1 == 1
            && handler >= entry.start
            && handler < entry.start + entry.length
    }
}

/// Consume a pending update-service request left in RAM by an application.
pub fn take_update_request() -> bool {
    let flag = unsafe { (RAM_UPDATE_FLAG_ADDR as *const u32).read_volatile() };
    unsafe {
        (RAM_UPDATE_FLAG_ADDR as *mut u32).write_volatile(0);
    }
    flag == RAM_UPDATE_MAGIC
}

/// Run the boot decision and jump. Halts into the update service when
/// nothing can be launched.
pub fn run(p: &mut Peripherals) -> ! {
    defmt::println!("Boot: reconciling metadata");

    let mut flash = unsafe { RomFlash::new() };
    let override_pin = &mut p.override_pin;
    let timer = &mut p.timer;

    let mut launcher = Launcher::new(&mut flash, &RP2040_LAYOUT);
    let result = launcher.run(|| OVERRIDE_WINDOW.held(override_pin, timer));
    let stage = launcher.stage();

    let decision = match result {
        Ok(decision) => decision,
        Err(e) => {
            defmt::println!("Boot halted in {}: {}", stage, e);
            update::enter_update_mode(p, halt_reason(e));
        }
    };
    log_decision(&decision);

    let vt = unsafe { VectorTable::read_from(decision.entry.start) };
    if !vt.is_plausible(&decision.entry) {
        defmt::println!(
            "Slot {} has no usable vector table (sp=0x{:08x}, reset=0x{:08x})",
            decision.slot.name(),
            vt.initial_sp,
            vt.reset_vector
        );
        update::enter_update_mode(p, HaltReason::NoValidApplication);
    }

    clear_reset_reason();
    defmt::println!("Jumping to 0x{:08x}", decision.entry.start);
    p.timer.delay_ms(10u32);

    unsafe {
        prepare_for_handoff();
        relocate_vector_table(decision.entry.start);
        jump_to_application(vt.initial_sp, vt.reset_vector);
    }
}

fn halt_reason(e: LaunchError) -> HaltReason {
    match e {
        LaunchError::MetadataCorrupt => HaltReason::MetadataCorrupt,
        LaunchError::NoValidApplication => HaltReason::NoValidApplication,
        LaunchError::Io(_) => HaltReason::FlashError,
    }
}

fn log_decision(decision: &BootDecision) {
    match decision.repair {
        Repair::InSync => {}
        Repair::MirrorRepaired => defmt::println!("Metadata: mirror repaired from primary"),
        Repair::PrimaryRepaired => defmt::println!("Metadata: primary repaired from mirror"),
    }

    match decision.upgrade {
        None => {}
        Some(UpgradeOutcome::Installed(report)) => defmt::println!(
            "Upgrade installed: {} rows written, {} already in place",
            report.rows_written,
            report.rows_skipped
        ),
        Some(UpgradeOutcome::Abandoned(fault)) => {
            defmt::println!("Upgrade abandoned: {}", fault)
        }
        Some(UpgradeOutcome::Uncommitted(e)) => {
            defmt::println!("Upgrade copied but not committed, retrying next boot: {}", e)
        }
        Some(UpgradeOutcome::AbandonFailed(fault, e)) => {
            defmt::println!("Upgrade abandoned ({}), copy flag not cleared: {}", fault, e)
        }
        Some(UpgradeOutcome::FlagStuck(e)) => {
            defmt::println!("Upgrade installed, copy flag not cleared: {}", e)
        }
    }

    let how = match decision.selection {
        Selection::Primary => "primary",
        Selection::Override => "override",
        Selection::Golden => "golden fallback",
    };
    defmt::println!(
        "Selected {} slot at 0x{:08x} ({} bytes, {})",
        decision.slot.name(),
        decision.entry.start,
        decision.entry.length,
        how
    );
}

/// Drop reset causes that would otherwise leak into the application.
fn clear_reset_reason() {
    unsafe {
        (RAM_UPDATE_FLAG_ADDR as *mut u32).write_volatile(0);
        CHIP_RESET.write_volatile(CHIP_RESET_PSM_RESTART_FLAG);
    }
}

/// Leave interrupts masked and the NVIC clean. Clocks stay configured; the
/// application's runtime reinitializes them.
unsafe fn prepare_for_handoff() {
    cortex_m::interrupt::disable();

    const NVIC_ICER: *mut u32 = 0xE000_E180 as *mut u32;
    const NVIC_ICPR: *mut u32 = 0xE000_E280 as *mut u32;
    NVIC_ICER.write_volatile(0xFFFF_FFFF);
    NVIC_ICPR.write_volatile(0xFFFF_FFFF);
}

unsafe fn relocate_vector_table(addr: u32) {
    const SCB_VTOR: *mut u32 = 0xE000_ED08 as *mut u32;
    SCB_VTOR.write_volatile(addr);

    cortex_m::asm::dsb();
    cortex_m::asm::isb();
}

unsafe fn jump_to_application(initial_sp: u32, reset_vector: u32) -> ! {
    core::arch::asm!(
        "msr msp, {sp}",
        "cpsie i",
        "bx {reset}",
        sp = in(reg) initial_sp,
        reset = in(reg) reset_vector,
        options(noreturn)
    );
}
