// SPDX-License-Identifier: MIT
// Copyright (c) 2026 ADNT Sarl <info@adnt.io>

//! Unit tests for the RP2040 partition table and layout constants.

use twinboot_common::layout::{
    SlotId, COPY_FLAG_ADDR, EEPROM_ADDR, EEPROM_SIZE, FLASH_BASE, FLASH_SECTOR_SIZE, FLASH_SIZE,
    LAUNCHER_SIZE, METADATA_ADDR, PRIMARY_ADDR, RAM_END, RAM_START, RAM_UPDATE_FLAG_ADDR,
    RAM_UPDATE_MAGIC, ROW_SIZE, RP2040_LAYOUT, SECONDARY_ADDR, STAGED_ADDR,
};

#[test]
fn test_flash_base_address() {
    assert_eq!(FLASH_BASE, 0x1000_0000);
    assert_eq!(FLASH_SIZE, 2 * 1024 * 1024);
}

#[test]
fn test_row_is_one_erase_sector() {
    assert_eq!(ROW_SIZE as u32, FLASH_SECTOR_SIZE);
    assert_eq!(ROW_SIZE, 4096);
}

#[test]
fn test_launcher_fits_before_primary() {
    assert_eq!(FLASH_BASE + LAUNCHER_SIZE, PRIMARY_ADDR);
    assert_eq!(RP2040_LAYOUT.application.start, PRIMARY_ADDR);
}

#[test]
fn test_partitions_do_not_overlap() {
    let parts = RP2040_LAYOUT.partitions;
    for (i, a) in parts.iter().enumerate() {
        for b in &parts[i + 1..] {
            assert!(!a.intersects(b.start, b.size()), "{:?} overlaps {:?}", a, b);
        }
    }
}

#[test]
fn test_partitions_are_row_aligned() {
    for part in RP2040_LAYOUT.partitions {
        assert_eq!(part.start % ROW_SIZE as u32, 0);
        assert_eq!(part.size() % ROW_SIZE as u32, 0);
    }
}

#[test]
fn test_slot_partition_addresses() {
    assert_eq!(RP2040_LAYOUT.partition(SlotId::PRIMARY).unwrap().start, PRIMARY_ADDR);
    assert_eq!(RP2040_LAYOUT.partition(SlotId::SECONDARY).unwrap().start, SECONDARY_ADDR);
    assert_eq!(RP2040_LAYOUT.partition(SlotId::STAGED).unwrap().start, STAGED_ADDR);
    assert_eq!(RP2040_LAYOUT.partition(SlotId(7)), None);
}

#[test]
fn test_metadata_rows_follow_partitions() {
    let staged = RP2040_LAYOUT.partition(SlotId::STAGED).unwrap();
    assert!(METADATA_ADDR >= staged.end);
    assert_eq!(RP2040_LAYOUT.mirror_addr(), METADATA_ADDR + ROW_SIZE as u32);
    assert_eq!(COPY_FLAG_ADDR, METADATA_ADDR + 2 * ROW_SIZE as u32);
}

#[test]
fn test_protected_rows_inside_application_window() {
    for row in RP2040_LAYOUT.protected_rows() {
        assert!(RP2040_LAYOUT.application.contains_range(row.start, row.size()));
    }
}

#[test]
fn test_eeprom_window_at_top_of_application() {
    assert_eq!(RP2040_LAYOUT.application.end, EEPROM_ADDR);
    assert!(EEPROM_ADDR + EEPROM_SIZE <= FLASH_BASE + FLASH_SIZE);
}

#[test]
fn test_secondary_is_golden() {
    assert!(RP2040_LAYOUT.is_golden(SlotId::SECONDARY));
    assert!(!RP2040_LAYOUT.is_golden(SlotId::PRIMARY));
    assert_eq!(RP2040_LAYOUT.copy_destination, SlotId::PRIMARY);
}

#[test]
fn test_ram_update_flag_in_ram() {
    assert!(RAM_UPDATE_FLAG_ADDR >= RAM_START && RAM_UPDATE_FLAG_ADDR + 4 <= RAM_END);
    assert_eq!(RAM_UPDATE_MAGIC, 0x0FDA_7E00);
}

#[test]
fn test_slot_names() {
    assert_eq!(SlotId::LAUNCHER.name(), "launcher");
    assert_eq!(SlotId::PRIMARY.name(), "primary");
    assert_eq!(SlotId::SECONDARY.name(), "secondary");
    assert_eq!(SlotId::STAGED.name(), "staged");
}
