// SPDX-License-Identifier: MIT
// Copyright (c) 2026 ADNT Sarl <info@adnt.io>

//! Command implementations for offline and device operations.

use std::fs;
use std::io::Write;
use std::path::Path;

use anyhow::{bail, Context, Result};
use indicatif::{ProgressBar, ProgressStyle};

use twinboot_common::layout::{SlotId, RP2040_LAYOUT, ROW_SIZE, SIGNATURE_SIZE, SLOT_COUNT};
use twinboot_common::metadata::SlotEntry;
use twinboot_common::protocol::{AckStatus, Command, HaltReason, Response};

use crate::image;
use crate::transport::Transport;

/// Timeout for commands that checksum a whole image on the device.
const VALIDATE_TIMEOUT_MS: u64 = 30_000;

/// Sign a raw image.
pub fn pack(input: &Path, output: &Path) -> Result<()> {
    let body = fs::read(input).with_context(|| format!("Failed to read {}", input.display()))?;
    if body.is_empty() {
        bail!("{} is empty", input.display());
    }

    let signed = image::sign(&body);
    fs::write(output, &signed)
        .with_context(|| format!("Failed to write {}", output.display()))?;

    println!(
        "Signed {} ({} bytes + {} byte signature) -> {}",
        input.display(),
        body.len(),
        signed.len() - body.len(),
        output.display()
    );
    Ok(())
}

/// Write the provisioning blob for the metadata rows.
pub fn metadata(output: &Path, slots: [Option<SlotEntry>; SLOT_COUNT]) -> Result<()> {
    let blob = image::metadata_blob(slots)?;
    fs::write(output, &blob).with_context(|| format!("Failed to write {}", output.display()))?;

    println!(
        "Metadata blob: {} bytes, flash at 0x{:08x}",
        blob.len(),
        RP2040_LAYOUT.metadata_addr
    );
    for (id, entry) in SlotId::ALL.iter().zip(slots.iter()) {
        if let Some(entry) = entry {
            println!(
                "  {:<9} 0x{:08x} {} bytes",
                id.name(),
                entry.start,
                entry.length
            );
        }
    }
    Ok(())
}

/// Get and display the launcher status.
pub fn status(transport: &mut Transport) -> Result<()> {
    let response = transport.send_recv(&Command::GetStatus)?;

    match response {
        Response::Status {
            slots,
            copy_pending,
            halt,
        } => {
            println!("Launcher Status:");
            println!("  Halted:       {}", halt_description(halt));
            println!("  Copy pending: {}", if copy_pending { "yes" } else { "no" });
            println!("  Slots:");
            for (id, entry) in SlotId::ALL.iter().zip(slots.iter()) {
                if entry.is_empty() {
                    println!("    {:<9} empty", id.name());
                } else {
                    println!(
                        "    {:<9} 0x{:08x} {} bytes",
                        id.name(),
                        entry.start,
                        entry.length
                    );
                }
            }
        }
        Response::Ack(status) => bail!("GetStatus failed: {:?}", status),
        _ => bail!("Unexpected response: {:?}", response),
    }

    Ok(())
}

/// Upload an image into the staged partition and record it as staged.
pub fn upload(transport: &mut Transport, file: &Path, address: u32, signed: bool) -> Result<()> {
    let raw = fs::read(file).with_context(|| format!("Failed to read {}", file.display()))?;
    let signed_image = if signed {
        if image::verify_signed(&raw).is_none() {
            bail!("{} does not carry a valid signature", file.display());
        }
        raw
    } else {
        if raw.is_empty() {
            bail!("{} is empty", file.display());
        }
        image::sign(&raw)
    };
    let entry = SlotEntry::new(address, (signed_image.len() - SIGNATURE_SIZE as usize) as u32);

    let Some(part) = RP2040_LAYOUT.partition(SlotId::STAGED) else {
        bail!("No staged partition in this layout");
    };
    if address % ROW_SIZE as u32 != 0 {
        bail!("Address 0x{:08x} is not row aligned", address);
    }
    if !part.contains_range(address, entry.signed_length()) {
        bail!(
            "Image ({} bytes) does not fit the staged partition 0x{:08x}..0x{:08x} from 0x{:08x}",
            signed_image.len(),
            part.start,
            part.end,
            address
        );
    }

    println!(
        "Image:   {} ({} bytes + signature)",
        file.display(),
        entry.length
    );
    println!("Target:  staged slot at 0x{:08x}", address);
    println!();

    let rows: Vec<Vec<u8>> = image::rows(&signed_image).collect();
    let pb = ProgressBar::new(rows.len() as u64);
    pb.set_style(
        ProgressStyle::default_bar()
            .template("{spinner:.green} [{elapsed_precise}] [{bar:40.cyan/blue}] {pos}/{len} rows ({eta})")?
            .progress_chars("#>-"),
    );

    let mut skipped = 0usize;
    for (index, row) in rows.into_iter().enumerate() {
        let row_addr = address + (index * ROW_SIZE) as u32;

        let response = transport.send_recv(&Command::VerifyRow {
            address: row_addr,
            data: row.clone(),
        })?;
        match response {
            Response::Compare(true) => {
                skipped += 1;
                pb.inc(1);
                continue;
            }
            Response::Compare(false) => {}
            Response::Ack(status) => {
                pb.abandon();
                bail!("VerifyRow failed at 0x{:08x}: {}", row_addr, ack_description(status));
            }
            _ => {
                pb.abandon();
                bail!("Unexpected response at 0x{:08x}: {:?}", row_addr, response);
            }
        }

        let response = transport.send_recv(&Command::WriteRow {
            address: row_addr,
            data: row,
        })?;
        match response {
            Response::Ack(AckStatus::Ok) => {}
            Response::Ack(status) => {
                pb.abandon();
                bail!("WriteRow failed at 0x{:08x}: {}", row_addr, ack_description(status));
            }
            _ => {
                pb.abandon();
                bail!("Unexpected response at 0x{:08x}: {:?}", row_addr, response);
            }
        }
        pb.inc(1);
    }

    pb.finish_with_message("Upload complete");
    if skipped > 0 {
        println!("{} rows already up to date", skipped);
    }
    println!();

    print!("Staging... ");
    std::io::stdout().flush()?;

    let response = transport.send_recv_timeout(
        &Command::StageImage {
            address,
            length: entry.length,
        },
        VALIDATE_TIMEOUT_MS,
    )?;
    match response {
        Response::Ack(AckStatus::Ok) => println!("OK"),
        Response::Ack(status) => bail!("StageImage failed: {}", ack_description(status)),
        _ => bail!("Unexpected response: {:?}", response),
    }

    println!();
    println!("Image staged.");
    println!(
        "Use 'twinboot-tool --port {} commit' to install it on the next boot.",
        transport.port_name()
    );

    Ok(())
}

/// Arm the copy flag for the staged image.
pub fn commit(transport: &mut Transport) -> Result<()> {
    println!("Requesting install of the staged image...");

    let response = transport.send_recv_timeout(&Command::RequestCopy, VALIDATE_TIMEOUT_MS)?;

    match response {
        Response::Ack(AckStatus::Ok) => {
            println!("Copy armed. The staged image is installed on the next boot.");
            println!(
                "Use 'twinboot-tool --port {} reboot' to restart the device.",
                transport.port_name()
            );
        }
        Response::Ack(status) => bail!("RequestCopy failed: {}", ack_description(status)),
        _ => bail!("Unexpected response: {:?}", response),
    }

    Ok(())
}

pub fn reboot(transport: &mut Transport) -> Result<()> {
    println!("Rebooting device...");

    let response = transport.send_recv(&Command::Reboot)?;

    match response {
        Response::Ack(AckStatus::Ok) => println!("Device is rebooting."),
        Response::Ack(status) => bail!("Reboot failed: {:?}", status),
        _ => bail!("Unexpected response: {:?}", response),
    }

    Ok(())
}

fn ack_description(status: AckStatus) -> &'static str {
    match status {
        AckStatus::Ok => "ok",
        AckStatus::AddressError => "address refused by the region guard",
        AckStatus::LengthError => "bad length",
        AckStatus::FlashError => "flash error",
        AckStatus::ValidationFailed => "image failed validation",
        AckStatus::MetadataCorrupt => "metadata corrupt, reprovision it",
        AckStatus::BadCommand => "bad command",
    }
}

fn halt_description(halt: HaltReason) -> &'static str {
    match halt {
        HaltReason::Requested => "requested by application",
        HaltReason::MetadataCorrupt => "metadata corrupt",
        HaltReason::NoValidApplication => "no valid application",
        HaltReason::FlashError => "flash error",
    }
}
