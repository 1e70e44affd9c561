// SPDX-License-Identifier: MIT
// Copyright (c) 2026 ADNT Sarl <info@adnt.io>

//! Command-line interface definitions.

use std::path::PathBuf;

use anyhow::{Context, Result};
use clap::{Parser, Subcommand};

use twinboot_common::layout::STAGED_ADDR;

use crate::commands;
use crate::image::{parse_u32, SlotArg};
use crate::transport::Transport;

/// Command-line arguments.
#[derive(Parser)]
#[command(name = "twinboot-tool")]
#[command(about = "Image packing, metadata provisioning and upload for the twinboot launcher")]
pub struct Cli {
    /// Serial port of the update service (e.g., /dev/ttyACM0)
    #[arg(short, long, global = true)]
    pub port: Option<String>,

    #[command(subcommand)]
    pub command: Commands,
}

/// Available subcommands.
#[derive(Subcommand)]
pub enum Commands {
    /// Append the CRC-32 signature to a raw image
    Pack {
        #[arg(value_name = "IN")]
        input: PathBuf,
        #[arg(value_name = "OUT")]
        output: PathBuf,
    },

    /// Write an initial MD + MDC + copy flag blob for provisioning
    Metadata {
        #[arg(value_name = "OUT")]
        output: PathBuf,

        /// Launcher slot as ADDR:LEN
        #[arg(long)]
        launcher: Option<SlotArg>,

        /// Primary application slot as ADDR:LEN
        #[arg(long)]
        primary: Option<SlotArg>,

        /// Secondary (golden) application slot as ADDR:LEN
        #[arg(long)]
        secondary: Option<SlotArg>,

        /// Staged upgrade slot as ADDR:LEN
        #[arg(long)]
        staged: Option<SlotArg>,
    },

    /// Show the slot table, copy flag and halt reason
    Status,

    /// Write an image into the staged partition and record it as staged
    Upload {
        /// Raw image, or an already signed one with --signed
        #[arg(value_name = "FILE")]
        file: PathBuf,

        /// Start address inside the staged partition
        #[arg(short, long, value_parser = parse_u32, default_value_t = STAGED_ADDR)]
        address: u32,

        /// FILE already carries its signature
        #[arg(long)]
        signed: bool,
    },

    /// Arm the copy flag so the next boot installs the staged image
    Commit,

    /// Reboot the device
    Reboot,
}

/// Execute the parsed CLI command.
pub fn run(cli: Cli) -> Result<()> {
    match cli.command {
        Commands::Pack { input, output } => commands::pack(&input, &output),
        Commands::Metadata {
            output,
            launcher,
            primary,
            secondary,
            staged,
        } => {
            let slots = [launcher, primary, secondary, staged].map(|s| s.map(|arg| arg.0));
            commands::metadata(&output, slots)
        }
        device => {
            let port = cli.port.context("--port is required for device commands")?;
            let mut transport = Transport::new(&port)?;
            match device {
                Commands::Status => commands::status(&mut transport),
                Commands::Upload {
                    file,
                    address,
                    signed,
                } => commands::upload(&mut transport, &file, address, signed),
                Commands::Commit => commands::commit(&mut transport),
                Commands::Reboot => commands::reboot(&mut transport),
                Commands::Pack { .. } | Commands::Metadata { .. } => unreachable!(),
            }
        }
    }
}
