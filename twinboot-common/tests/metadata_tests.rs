// SPDX-License-Identifier: MIT
// Copyright (c) 2026 ADNT Sarl <info@adnt.io>

//! Tests for the metadata row format, MD/MDC reconciliation and the copy flag.

mod support;

use support::*;
use twinboot_common::layout::{SlotId, ROW_SIZE};
use twinboot_common::metadata::{
    checksum_valid, CopyFlag, FlagState, MetadataError, MetadataRow, MetadataStore, Repair,
    SlotEntry,
};

fn sample_row() -> MetadataRow {
    MetadataRow::new([
        launcher_entry(),
        SlotEntry::new(APP1_ADDR, 0x1_B000),
        SlotEntry::new(APP2_ADDR, 0x4000),
        SlotEntry::EMPTY,
    ])
}

fn store() -> MetadataStore {
    MetadataStore::new(&TEST_LAYOUT)
}

fn read_row(flash: &MemFlash, addr: u32) -> [u8; ROW_SIZE] {
    let mut row = [0u8; ROW_SIZE];
    row.copy_from_slice(flash.bytes(addr, ROW_SIZE));
    row
}

// =============================================================================
// Row format
// =============================================================================

#[test]
fn test_encode_places_slots_little_endian() {
    let row = sample_row().encode();

    assert_eq!(&row[8..12], &APP1_ADDR.to_le_bytes());
    assert_eq!(&row[12..16], &0x1_B000u32.to_le_bytes());
    assert_eq!(&row[16..20], &APP2_ADDR.to_le_bytes());
    assert!(row[32..ROW_SIZE - 4].iter().all(|&b| b == 0));
}

#[test]
fn test_checksum_covers_row_except_itself() {
    let row = sample_row().encode();
    let expected = crc32(&row[..ROW_SIZE - 4]);
    assert_eq!(&row[ROW_SIZE - 4..], &expected.to_le_bytes());
    assert!(checksum_valid(&row));
}

#[test]
fn test_decode_returns_encoded_slots() {
    let row = sample_row();
    assert_eq!(MetadataRow::decode(&row.encode()), Some(row));
}

#[test]
fn test_decode_rejects_any_flipped_byte() {
    let encoded = sample_row().encode();
    for at in [0, 9, 100, ROW_SIZE - 5, ROW_SIZE - 1] {
        let mut damaged = encoded;
        damaged[at] ^= 0x01;
        assert_eq!(MetadataRow::decode(&damaged), None, "byte {} flipped", at);
    }
}

#[test]
fn test_decode_rejects_erased_rows() {
    assert_eq!(MetadataRow::decode(&[0xFF; ROW_SIZE]), None);
    assert_eq!(MetadataRow::decode(&[0x00; ROW_SIZE]), None);
}

#[test]
fn test_with_slot_unknown_slot_is_none() {
    assert!(sample_row().with_slot(SlotId(9), SlotEntry::EMPTY).is_none());
}

// =============================================================================
// Reconciliation
// =============================================================================

#[test]
fn test_reconcile_in_sync_writes_nothing() {
    let mut flash = MemFlash::new();
    write_metadata(&mut flash, &sample_row());

    let (row, repair) = store().reconcile(&mut flash).unwrap();

    assert_eq!(row, sample_row());
    assert_eq!(repair, Repair::InSync);
    assert_eq!(flash.write_count(), 0);
}

#[test]
fn test_reconcile_repairs_stale_mirror_from_primary() {
    let mut flash = MemFlash::new();
    let stale = sample_row()
        .with_slot(SlotId::PRIMARY, SlotEntry::new(APP1_ADDR, 0x1000))
        .unwrap();
    flash.poke(METADATA_ADDR, &sample_row().encode());
    flash.poke(MIRROR_ADDR, &stale.encode());

    let (row, repair) = store().reconcile(&mut flash).unwrap();

    assert_eq!(row, sample_row());
    assert_eq!(repair, Repair::MirrorRepaired);
    assert_eq!(read_row(&flash, MIRROR_ADDR), sample_row().encode());
    assert_eq!(flash.writes, vec![MIRROR_ADDR]);
}

#[test]
fn test_reconcile_repairs_corrupt_mirror() {
    let mut flash = MemFlash::new();
    flash.poke(METADATA_ADDR, &sample_row().encode());

    let (_, repair) = store().reconcile(&mut flash).unwrap();

    assert_eq!(repair, Repair::MirrorRepaired);
    assert!(checksum_valid(&read_row(&flash, MIRROR_ADDR)));
}

#[test]
fn test_reconcile_repairs_primary_from_mirror() {
    let mut flash = MemFlash::new();
    let mut torn = sample_row().encode();
    torn[8] ^= 0xFF;
    flash.poke(METADATA_ADDR, &torn);
    flash.poke(MIRROR_ADDR, &sample_row().encode());

    let (row, repair) = store().reconcile(&mut flash).unwrap();

    assert_eq!(row, sample_row());
    assert_eq!(repair, Repair::PrimaryRepaired);
    assert_eq!(read_row(&flash, METADATA_ADDR), sample_row().encode());
    assert_eq!(flash.writes, vec![METADATA_ADDR]);
}

#[test]
fn test_reconcile_both_corrupt_is_fatal_and_writes_nothing() {
    let mut flash = MemFlash::new();

    let result = store().reconcile(&mut flash);

    assert_eq!(result, Err(MetadataError::Corrupt));
    assert_eq!(flash.write_count(), 0);
}

#[test]
fn test_reconcile_converges_whenever_one_copy_is_valid() {
    let good = sample_row().encode();
    let other = sample_row()
        .with_slot(SlotId::STAGED, SlotEntry::new(STAGED_ADDR, 0x2000))
        .unwrap()
        .encode();
    let mut torn = good;
    torn[ROW_SIZE - 1] ^= 0x80;

    let erased = [0xFFu8; ROW_SIZE];
    let states = [
        (good, good),
        (good, other),
        (good, torn),
        (good, erased),
        (torn, other),
    ];

    for (md, mdc) in states {
        let mut flash = MemFlash::new();
        flash.poke(METADATA_ADDR, &md);
        flash.poke(MIRROR_ADDR, &mdc);

        store().reconcile(&mut flash).unwrap();

        let md = read_row(&flash, METADATA_ADDR);
        let mdc = read_row(&flash, MIRROR_ADDR);
        assert!(checksum_valid(&md));
        assert_eq!(md, mdc);
    }
}

#[test]
fn test_reconcile_io_failure_is_reported() {
    let mut flash = MemFlash::new();
    flash.poke(METADATA_ADDR, &sample_row().encode());
    flash.cut_power_after(0);

    let result = store().reconcile(&mut flash);
    assert!(matches!(result, Err(MetadataError::Copy(e)) if e.address == MIRROR_ADDR));
}

// =============================================================================
// Slot updates
// =============================================================================

#[test]
fn test_update_slot_writes_primary_then_mirror() {
    let mut flash = MemFlash::new();
    write_metadata(&mut flash, &sample_row());
    let entry = SlotEntry::new(STAGED_ADDR, 0x8000);

    let updated = store()
        .update_slot(&mut flash, SlotId::STAGED, entry)
        .unwrap();

    assert_eq!(updated.slot(SlotId::STAGED), Some(entry));
    assert_eq!(flash.writes, vec![METADATA_ADDR, MIRROR_ADDR]);
    assert_eq!(store().load(&mut flash).unwrap(), updated);
    assert_eq!(read_row(&flash, MIRROR_ADDR), updated.encode());
}

#[test]
fn test_update_slot_unchanged_writes_nothing() {
    let mut flash = MemFlash::new();
    write_metadata(&mut flash, &sample_row());

    store()
        .update_slot(&mut flash, SlotId::PRIMARY, SlotEntry::new(APP1_ADDR, 0x1_B000))
        .unwrap();

    assert_eq!(flash.write_count(), 0);
}

#[test]
fn test_update_slot_interrupted_after_primary_is_completed_on_next_boot() {
    let mut flash = MemFlash::new();
    write_metadata(&mut flash, &sample_row());
    let entry = SlotEntry::new(STAGED_ADDR, 0x8000);

    flash.cut_power_after(1);
    assert!(store().update_slot(&mut flash, SlotId::STAGED, entry).is_err());

    flash.restore_power();
    let (row, repair) = store().reconcile(&mut flash).unwrap();

    assert_eq!(repair, Repair::MirrorRepaired);
    assert_eq!(row.slot(SlotId::STAGED), Some(entry));
    assert_eq!(read_row(&flash, METADATA_ADDR), read_row(&flash, MIRROR_ADDR));
}

#[test]
fn test_update_slot_interrupted_before_primary_keeps_old_metadata() {
    let mut flash = MemFlash::new();
    write_metadata(&mut flash, &sample_row());

    flash.cut_power_after(0);
    let result = store().update_slot(&mut flash, SlotId::STAGED, SlotEntry::new(STAGED_ADDR, 4));
    assert!(matches!(result, Err(MetadataError::Io(_))));

    flash.restore_power();
    let (row, repair) = store().reconcile(&mut flash).unwrap();
    assert_eq!(row, sample_row());
    assert_eq!(repair, Repair::InSync);
}

#[test]
fn test_update_slot_with_corrupt_metadata_fails() {
    let mut flash = MemFlash::new();
    let result = store().update_slot(&mut flash, SlotId::STAGED, SlotEntry::EMPTY);
    assert_eq!(result, Err(MetadataError::Corrupt));
}

// =============================================================================
// Copy flag
// =============================================================================

#[test]
fn test_copy_flag_zero_row_is_clear() {
    let mut flash = MemFlash::new();
    clear_copy_flag(&mut flash);
    let flag = CopyFlag::new(&TEST_LAYOUT);
    assert_eq!(flag.read(&mut flash).unwrap(), FlagState::Clear);
}

#[test]
fn test_copy_flag_any_nonzero_byte_is_pending() {
    let mut flash = MemFlash::new();
    let flag = CopyFlag::new(&TEST_LAYOUT);
    for value in [0x01, 0xA5, 0xFF] {
        flash.poke(COPY_FLAG_ADDR, &[value]);
        assert_eq!(flag.read(&mut flash).unwrap(), FlagState::Pending);
    }
}

#[test]
fn test_copy_flag_set_then_clear() {
    let mut flash = MemFlash::new();
    clear_copy_flag(&mut flash);
    let flag = CopyFlag::new(&TEST_LAYOUT);

    flag.set(&mut flash).unwrap();
    assert_eq!(flag.read(&mut flash).unwrap(), FlagState::Pending);

    flag.clear(&mut flash).unwrap();
    assert_eq!(flag.read(&mut flash).unwrap(), FlagState::Clear);
    assert_eq!(flash.writes, vec![COPY_FLAG_ADDR, COPY_FLAG_ADDR]);
}

#[test]
fn test_copy_flag_repeated_set_writes_once() {
    let mut flash = MemFlash::new();
    let flag = CopyFlag::new(&TEST_LAYOUT);

    flag.set(&mut flash).unwrap();
    flag.set(&mut flash).unwrap();

    assert_eq!(flash.write_count(), 1);
}
