//! Toggling cells between regular and lab representation.
//!
//! Enabling or disabling a lab discards whatever the cell held before; the
//! prior regular assignment is not migrated into batch 1.

use super::error::GridError;
use super::grid::{LabBatch, LabMode, LabModeIndex, SlotAssignment, SlotCell, TimetableGrid};
use super::{cell_key, Day, Slot, SlotField};
use serde::Deserialize;

pub fn enable_lab(
    grid: &mut TimetableGrid,
    labs: &mut LabModeIndex,
    day: Day,
    slot: Slot,
    batch_count: usize,
) -> Result<(), GridError> {
    if batch_count == 0 {
        return Err(GridError::InvalidBatchCount { count: batch_count });
    }
    let lab_id = grid.owner().lab_id(day, slot);
    let batches = (1..=batch_count as u32)
        .map(|n| LabBatch::blank(n, lab_id.clone()))
        .collect();
    grid.replace_cell(day, slot, SlotCell::Lab(batches));
    labs.set(
        day,
        slot,
        LabMode {
            enabled: true,
            batch_count,
        },
    );
    Ok(())
}

pub fn disable_lab(grid: &mut TimetableGrid, labs: &mut LabModeIndex, day: Day, slot: Slot) {
    grid.replace_cell(day, slot, SlotCell::Regular(SlotAssignment::default()));
    labs.set(
        day,
        slot,
        LabMode {
            enabled: false,
            batch_count: 0,
        },
    );
}

/// Changes the number of batches of an existing lab cell. Surviving batches
/// keep their data by position and every batch is renumbered from 1.
pub fn resize_batches(
    grid: &mut TimetableGrid,
    labs: &mut LabModeIndex,
    day: Day,
    slot: Slot,
    new_count: usize,
) -> Result<(), GridError> {
    if new_count == 0 {
        return Err(GridError::InvalidBatchCount { count: new_count });
    }
    let fallback_id = grid.owner().lab_id(day, slot);
    let SlotCell::Lab(batches) = grid.cell_mut(day, slot) else {
        return Err(GridError::NotLabCell {
            key: cell_key(day, slot),
        });
    };
    let lab_id = batches
        .first()
        .map(|b| b.lab_id.clone())
        .unwrap_or(fallback_id);
    batches.resize_with(new_count, || LabBatch::blank(0, lab_id.clone()));
    for (i, b) in batches.iter_mut().enumerate() {
        b.batch_number = i as u32 + 1;
    }
    labs.set(
        day,
        slot,
        LabMode {
            enabled: true,
            batch_count: new_count,
        },
    );
    Ok(())
}

pub fn set_batch_field(
    grid: &mut TimetableGrid,
    day: Day,
    slot: Slot,
    batch_index: usize,
    field: SlotField,
    value: impl Into<String>,
) -> Result<(), GridError> {
    let kind = grid.owner().kind;
    if !kind.carries(field) {
        return Err(GridError::FieldNotCarried {
            kind: kind.as_str(),
            field: field.json_key(),
        });
    }
    let key = cell_key(day, slot);
    let SlotCell::Lab(batches) = grid.cell_mut(day, slot) else {
        return Err(GridError::NotLabCell { key });
    };
    let len = batches.len();
    let batch = batches.get_mut(batch_index).ok_or(GridError::BatchOutOfRange {
        key,
        batch_index,
        len,
    })?;
    batch.assignment.set(field, value);
    Ok(())
}

/// How the slot following a lab start is treated.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum LabSpanPolicy {
    /// The following slot is only shown as "continued"; it stays editable.
    #[default]
    Display,
    /// A lab owns two consecutive slots; overlapping or truncated labs are rejected.
    Enforced,
}

impl LabSpanPolicy {
    pub fn parse(s: &str) -> Option<Self> {
        match s {
            "display" => Some(Self::Display),
            "enforced" => Some(Self::Enforced),
            _ => None,
        }
    }

    pub fn as_str(self) -> &'static str {
        match self {
            Self::Display => "display",
            Self::Enforced => "enforced",
        }
    }
}

/// True when the previous slot of the same day starts an enabled lab.
pub fn is_continuation(labs: &LabModeIndex, day: Day, slot: Slot) -> bool {
    slot.prev().is_some_and(|p| labs.is_enabled(day, p))
}

/// Under [`LabSpanPolicy::Enforced`], checks that a lab starting at (day, slot)
/// has a free, blank following slot and does not sit inside another lab.
pub fn check_lab_span(
    policy: LabSpanPolicy,
    grid: &TimetableGrid,
    labs: &LabModeIndex,
    day: Day,
    slot: Slot,
) -> Result<(), GridError> {
    if policy == LabSpanPolicy::Display {
        return Ok(());
    }
    let conflict = |reason: &str| GridError::LabSpanConflict {
        key: cell_key(day, slot),
        reason: reason.to_string(),
    };
    if is_continuation(labs, day, slot) {
        return Err(conflict("slot continues the previous lab"));
    }
    let Some(next) = slot.next() else {
        return Err(conflict("a lab needs the following slot and this is the last slot"));
    };
    if labs.is_enabled(day, next) {
        return Err(conflict("the following slot already starts a lab"));
    }
    if !grid.cell(day, next).is_blank() {
        return Err(conflict("the following slot holds data; clear it first"));
    }
    Ok(())
}

/// Under [`LabSpanPolicy::Enforced`], a slot covered by the previous lab takes no
/// data of its own. Clearing it is always allowed.
pub fn check_slot_editable(
    policy: LabSpanPolicy,
    labs: &LabModeIndex,
    day: Day,
    slot: Slot,
    value: &str,
) -> Result<(), GridError> {
    if policy == LabSpanPolicy::Enforced
        && is_continuation(labs, day, slot)
        && !value.is_empty()
    {
        return Err(GridError::LabSpanConflict {
            key: cell_key(day, slot),
            reason: "slot continues the previous lab".to_string(),
        });
    }
    Ok(())
}

/// Keys of continued slots that still hold data, which [`LabSpanPolicy::Enforced`]
/// does not allow. Grids loaded from storage or imported can contain them.
pub fn span_conflicts(grid: &TimetableGrid, labs: &LabModeIndex) -> Vec<String> {
    grid.iter()
        .filter(|(day, slot, cell)| is_continuation(labs, *day, *slot) && !cell.is_blank())
        .map(|(day, slot, _)| cell_key(day, slot))
        .collect()
}
