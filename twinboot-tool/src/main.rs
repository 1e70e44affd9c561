// SPDX-License-Identifier: MIT
// Copyright (c) 2026 ADNT Sarl <info@adnt.io>

//! Host tool for the twinboot launcher.
//!
//! Usage:
//!   twinboot-tool pack app.bin app.signed
//!   twinboot-tool metadata meta.bin --launcher 0x10000000:0x8000 --primary 0x10010000:0x1b000
//!   twinboot-tool --port /dev/ttyACM0 status
//!   twinboot-tool --port /dev/ttyACM0 upload app.bin
//!   twinboot-tool --port /dev/ttyACM0 commit
//!   twinboot-tool --port /dev/ttyACM0 reboot

mod cli;
mod commands;
mod image;
mod transport;

use anyhow::Result;
use clap::Parser;

fn main() -> Result<()> {
    let args = cli::Cli::parse();
    cli::run(args)
}
