// SPDX-License-Identifier: MIT
// Copyright (c) 2026 ADNT Sarl <info@adnt.io>

//! Twinboot launcher for RP2040: metadata repair, staged upgrades, primary /
//! override / golden slot selection, and a USB CDC update service.

#![no_std]
#![no_main]

mod boot;
mod flash;
mod peripherals;
mod update;
mod usb_transport;

use defmt_rtt as _;
use panic_probe as _;
use twinboot_common::protocol::HaltReason;

defmt::timestamp!("{=u64:us}", { 0 });

use cortex_m_rt::entry;

#[unsafe(link_section = ".boot2")]
#[used]
pub static BOOT2: [u8; 256] = rp2040_boot2::BOOT_LOADER_GENERIC_03H;

#[entry]
fn main() -> ! {
    defmt::println!("Launcher init");

    let mut p = peripherals::init();

    twinboot_common::blink(&mut p.led_pin, &mut p.timer, 1, 100);
    flash::init();

    if boot::take_update_request() {
        update::enter_update_mode(&mut p, HaltReason::Requested);
    }

    boot::run(&mut p)
}
