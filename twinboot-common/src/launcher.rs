// SPDX-License-Identifier: MIT
// Copyright (c) 2026 ADNT Sarl <info@adnt.io>

//! Boot decision procedure, without hardware dependencies.
//!
//! [`Launcher::run`] reconciles metadata, completes a pending staged copy and
//! picks the slot to execute. It returns the decision instead of jumping so
//! that the whole sequence can be exercised against an in-memory flash; the
//! boot binary performs the jump.

use core::fmt;

use embedded_hal::delay::DelayNs;
use embedded_hal::digital::InputPin;

use crate::copy::{copy_region, CopyError, CopyReport};
use crate::guard::RegionGuard;
use crate::layout::{PartitionTable, SlotId};
use crate::metadata::{
    CopyFlag, FlagState, MetadataError, MetadataRow, MetadataStore, Repair, SlotEntry,
};
use crate::nvm::{Nvm, NvmError};
use crate::validate::{validate, validate_entry, ValidationError};

/// Progress through one boot.
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
#[cfg_attr(feature = "defmt", derive(defmt::Format))]
pub enum Stage {
    Boot,
    HandleMetadata,
    Copying,
    UpdateMetadata,
    SelectApp,
    Launched,
}

/// Terminal failures: nothing can be launched.
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
#[cfg_attr(feature = "defmt", derive(defmt::Format))]
pub enum LaunchError {
    MetadataCorrupt,
    NoValidApplication,
    Io(NvmError),
}

impl fmt::Display for LaunchError {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            LaunchError::MetadataCorrupt => f.write_str("metadata corrupt"),
            LaunchError::NoValidApplication => f.write_str("no valid application"),
            LaunchError::Io(e) => write!(f, "flash error: {}", e),
        }
    }
}

impl From<NvmError> for LaunchError {
    fn from(e: NvmError) -> Self {
        LaunchError::Io(e)
    }
}

impl From<MetadataError> for LaunchError {
    fn from(e: MetadataError) -> Self {
        match e {
            MetadataError::Corrupt | MetadataError::UnknownSlot => LaunchError::MetadataCorrupt,
            MetadataError::Io(e) => LaunchError::Io(e),
            MetadataError::Copy(e) => match e.cause {
                crate::guard::AccessError::Io(e) => LaunchError::Io(e),
                crate::guard::AccessError::Denied(_) => LaunchError::MetadataCorrupt,
            },
        }
    }
}

/// Why a pending upgrade was not installed.
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
#[cfg_attr(feature = "defmt", derive(defmt::Format))]
pub enum UpgradeFault {
    /// The staged image does not validate.
    StagedInvalid(ValidationError),
    /// The staged image is larger than the destination partition.
    DoesNotFit,
    Copy(CopyError),
}

/// Result of handling a PENDING copy flag.
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
#[cfg_attr(feature = "defmt", derive(defmt::Format))]
pub enum UpgradeOutcome {
    /// Copied, committed, flag cleared.
    Installed(CopyReport),
    /// Given up; the flag was cleared and a new request is needed.
    Abandoned(UpgradeFault),
    /// Copied but the metadata commit failed; the flag stays pending.
    Uncommitted(MetadataError),
    /// Installed, but clearing the flag failed.
    FlagStuck(NvmError),
    /// Given up, but clearing the flag failed. The flag stays pending and the
    /// same checks fail again next boot without touching the destination.
    AbandonFailed(UpgradeFault, NvmError),
}

/// How the launched slot was chosen.
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
#[cfg_attr(feature = "defmt", derive(defmt::Format))]
pub enum Selection {
    Primary,
    /// User override held through the whole window.
    Override,
    /// Primary failed validation; a golden image took over.
    Golden,
}

/// Selection strategies in priority order.
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum SelectStrategy {
    OverrideSecondary,
    Primary,
    GoldenFallback,
}

pub const SELECT_STRATEGIES: [SelectStrategy; 3] = [
    SelectStrategy::OverrideSecondary,
    SelectStrategy::Primary,
    SelectStrategy::GoldenFallback,
];

/// Outcome of one boot: the slot to jump to, and what happened on the way.
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
#[cfg_attr(feature = "defmt", derive(defmt::Format))]
pub struct BootDecision {
    pub slot: SlotId,
    pub entry: SlotEntry,
    pub selection: Selection,
    pub repair: Repair,
    pub upgrade: Option<UpgradeOutcome>,
}

/// Boot-time user override, such as a button held while powering up.
pub struct OverrideWindow {
    pub window_ms: u32,
    pub poll_ms: u32,
}

impl OverrideWindow {
    /// True only if `pin` reads low (pull-up button pressed) at every poll
    /// across the whole window. A read error counts as released.
    pub fn held<P: InputPin, D: DelayNs>(&self, pin: &mut P, delay: &mut D) -> bool {
        let poll_ms = self.poll_ms.max(1);
        let polls = (self.window_ms / poll_ms).max(1);

        for _ in 0..polls {
            if !pin.is_low().unwrap_or(false) {
                return false;
            }
            delay.delay_ms(poll_ms);
        }
        pin.is_low().unwrap_or(false)
    }
}

/// Per-boot decision procedure over one NVM.
pub struct Launcher<'a, N: Nvm> {
    nvm: &'a mut N,
    table: &'a PartitionTable<'a>,
    store: MetadataStore,
    flag: CopyFlag,
    stage: Stage,
}

impl<'a, N: Nvm> Launcher<'a, N> {
    pub fn new(nvm: &'a mut N, table: &'a PartitionTable<'a>) -> Self {
        Self {
            nvm,
            table,
            store: MetadataStore::new(table),
            flag: CopyFlag::new(table),
            stage: Stage::Boot,
        }
    }

    /// Stage reached so far; after an error, the stage that failed.
    pub fn stage(&self) -> Stage {
        self.stage
    }

    /// Run the whole boot decision.
    ///
    /// `override_held` is only called when the primary validates, so the
    /// sampling window is not spent on a boot that cannot use it.
    pub fn run<F: FnOnce() -> bool>(
        &mut self,
        override_held: F,
    ) -> Result<BootDecision, LaunchError> {
        self.stage = Stage::HandleMetadata;
        let (mut metadata, repair) = self.store.reconcile(&mut *self.nvm)?;

        let upgrade = match self.flag.read(&mut *self.nvm)? {
            FlagState::Pending => Some(self.apply_pending_copy(&mut metadata)),
            FlagState::Clear => None,
        };

        self.stage = Stage::SelectApp;
        let (slot, selection) = self.select(&metadata, override_held)?;
        let entry = metadata
            .slot(slot)
            .ok_or(LaunchError::NoValidApplication)?;

        self.stage = Stage::Launched;
        Ok(BootDecision {
            slot,
            entry,
            selection,
            repair,
            upgrade,
        })
    }

    /// Copy the staged image into its destination, commit the destination
    /// entry, then clear the flag.
    fn apply_pending_copy(&mut self, metadata: &mut MetadataRow) -> UpgradeOutcome {
        self.stage = Stage::Copying;
        let destination = self.table.copy_destination;

        let (staged, dest_entry) = match (
            metadata.slot(SlotId::STAGED),
            metadata.slot(destination),
        ) {
            (Some(s), Some(d)) => (s, d),
            _ => return self.abandon(UpgradeFault::DoesNotFit),
        };

        if let Err(e) = validate_entry(&mut *self.nvm, self.table, staged) {
            return self.abandon(UpgradeFault::StagedInvalid(e));
        }

        let Some(partition) = self.table.partition(destination) else {
            return self.abandon(UpgradeFault::DoesNotFit);
        };
        // A slot that was never populated has no address yet.
        let dest_start = if dest_entry.is_empty() && dest_entry.start == 0 {
            partition.start
        } else {
            dest_entry.start
        };
        if !partition.contains_range(dest_start, staged.signed_length()) {
            return self.abandon(UpgradeFault::DoesNotFit);
        }

        let copied = {
            let guard = RegionGuard::new(self.table, &*metadata, SlotId::LAUNCHER);
            copy_region(
                &mut *self.nvm,
                &guard,
                dest_start,
                staged.start,
                staged.signed_length(),
            )
        };
        let report = match copied {
            Ok(report) => report,
            Err(e) => return self.abandon(UpgradeFault::Copy(e)),
        };

        self.stage = Stage::UpdateMetadata;
        let installed = SlotEntry::new(dest_start, staged.length);
        match self.store.update_slot(&mut *self.nvm, destination, installed) {
            Ok(updated) => *metadata = updated,
            Err(e) => return UpgradeOutcome::Uncommitted(e),
        }

        match self.flag.clear(&mut *self.nvm) {
            Ok(()) => UpgradeOutcome::Installed(report),
            Err(e) => UpgradeOutcome::FlagStuck(e),
        }
    }

    fn abandon(&mut self, fault: UpgradeFault) -> UpgradeOutcome {
        match self.flag.clear(&mut *self.nvm) {
            Ok(()) => UpgradeOutcome::Abandoned(fault),
            Err(e) => UpgradeOutcome::AbandonFailed(fault, e),
        }
    }

    fn select<F: FnOnce() -> bool>(
        &mut self,
        metadata: &MetadataRow,
        override_held: F,
    ) -> Result<(SlotId, Selection), LaunchError> {
        let table = self.table;
        let nvm = &mut *self.nvm;
        let mut slot_valid = |slot: SlotId| validate(&mut *nvm, table, metadata, slot).is_ok();

        let primary_ok = slot_valid(SlotId::PRIMARY);
        let mut override_held = Some(override_held);

        SELECT_STRATEGIES
            .iter()
            .find_map(|strategy| match strategy {
                SelectStrategy::OverrideSecondary if primary_ok => {
                    let held = override_held.take().is_some_and(|f| f());
                    (held && slot_valid(SlotId::SECONDARY))
                        .then_some((SlotId::SECONDARY, Selection::Override))
                }
                SelectStrategy::Primary if primary_ok => {
                    Some((SlotId::PRIMARY, Selection::Primary))
                }
                SelectStrategy::GoldenFallback if !primary_ok => table
                    .golden
                    .iter()
                    .copied()
                    .filter(|&slot| slot != SlotId::PRIMARY)
                    .find(|&slot| slot_valid(slot))
                    .map(|slot| (slot, Selection::Golden)),
                _ => None,
            })
            .ok_or(LaunchError::NoValidApplication)
    }
}
