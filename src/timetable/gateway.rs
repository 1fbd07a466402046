//! Maps a [`Timetable`] to flat storage rows and back.
//!
//! Rows are one per (day, slot) for regular cells and one per non-blank batch
//! for lab cells. Batches of one lab share a `lab_id`; reading groups on it.

use super::error::{GatewayError, GridError};
use super::fallback::{with_fallback, SchemaCapability, StorageMode, LAB_COLUMNS};
use super::grid::{LabBatch, LabMode, SlotAssignment, SlotCell, Timetable};
use super::import::ImportRow;
use super::{Day, Owner, OwnerKind, Slot};
use crate::store::{Record, StoreError, TableStore};
use rusqlite::types::Value;
use tracing::{debug, info, warn};

pub const REVISIONS_TABLE: &str = "timetable_revisions";

/// Stored batch numbers above this are appended instead of padded up to.
const MAX_STORED_BATCH: i64 = 32;

#[derive(Debug)]
pub struct LoadOutcome {
    pub timetable: Timetable,
    pub mode: StorageMode,
    pub revision: i64,
    /// Stored rows whose coordinates fall outside the grid.
    pub ignored_rows: usize,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct SaveOutcome {
    pub rows_written: usize,
    pub mode: StorageMode,
    pub revision: i64,
}

fn base_columns(kind: OwnerKind) -> Vec<&'static str> {
    let mut cols = vec!["day_index", "slot_index"];
    cols.extend(kind.fields().iter().map(|f| f.column()));
    cols
}

fn rich_columns(kind: OwnerKind) -> Vec<&'static str> {
    let mut cols = base_columns(kind);
    cols.extend(LAB_COLUMNS);
    cols
}

fn owner_value(owner: &Owner) -> Value {
    Value::Text(owner.id.clone())
}

fn base_record(owner: &Owner, day: Day, slot: Slot, a: &SlotAssignment) -> Record {
    let mut rec = Record::new()
        .with(owner.kind.owner_column(), owner.id.clone())
        .with("day_index", day.index() as i64)
        .with("slot_index", slot.index() as i64);
    for f in owner.kind.fields() {
        rec.set(f.column(), a.get(*f).to_string());
    }
    rec
}

/// Storage rows for a timetable, rich shape. Blank regular cells and blank
/// batches produce nothing. Lab ids are regenerated in canonical form.
pub fn flatten(timetable: &Timetable) -> Result<Vec<Record>, GridError> {
    timetable.labs.check_consistent(&timetable.grid)?;
    let owner = timetable.owner();
    let mut rows = Vec::new();
    for (day, slot, cell) in timetable.grid.iter() {
        match cell {
            SlotCell::Regular(a) if a.is_blank() => {}
            SlotCell::Regular(a) => rows.push(
                base_record(owner, day, slot, a)
                    .with("is_lab", false)
                    .with("batch_number", Value::Null)
                    .with("lab_id", Value::Null),
            ),
            SlotCell::Lab(batches) => {
                let lab_id = owner.lab_id(day, slot);
                for (i, b) in batches.iter().enumerate() {
                    if b.assignment.is_blank() {
                        continue;
                    }
                    rows.push(
                        base_record(owner, day, slot, &b.assignment)
                            .with("is_lab", true)
                            .with("batch_number", (i + 1) as i64)
                            .with("lab_id", lab_id.clone()),
                    );
                }
            }
        }
    }
    Ok(rows)
}

/// Rebuilds a timetable from stored rows. Regular rows are applied first (last
/// write wins), then each lab group lands on its first row's coordinates.
pub fn reconstruct(owner: &Owner, rows: &[Record]) -> (Timetable, usize) {
    let mut timetable = Timetable::empty(owner.clone());
    let mut ignored = 0;
    let mut groups: Vec<(String, Vec<(Day, Slot, &Record)>)> = Vec::new();

    for row in rows {
        let coords = row
            .int("day_index")
            .zip(row.int("slot_index"))
            .and_then(|(d, s)| Day::new(d).ok().zip(Slot::new(s).ok()));
        let Some((day, slot)) = coords else {
            warn!(owner = %owner.key(), "ignoring stored row outside the grid");
            ignored += 1;
            continue;
        };
        let lab_id = row.text("lab_id");
        if row.flag("is_lab") && !lab_id.is_empty() {
            match groups.iter_mut().find(|(id, _)| *id == lab_id) {
                Some((_, members)) => members.push((day, slot, row)),
                None => groups.push((lab_id, vec![(day, slot, row)])),
            }
            continue;
        }
        timetable
            .grid
            .replace_cell(day, slot, SlotCell::Regular(assignment_from(owner.kind, row)));
    }

    for (lab_id, mut members) in groups {
        members.sort_by_key(|(_, _, r)| r.int("batch_number").unwrap_or(i64::MAX));
        let (day, slot, _) = members[0];
        let mut batches: Vec<LabBatch> = Vec::with_capacity(members.len());
        for (_, _, r) in &members {
            // Blank batches are not stored; put them back so batch n sits at position n.
            let wanted = r
                .int("batch_number")
                .filter(|n| (1..=MAX_STORED_BATCH).contains(n))
                .map_or(0, |n| n as usize);
            while batches.len() + 1 < wanted {
                batches.push(LabBatch::blank(0, lab_id.clone()));
            }
            batches.push(LabBatch {
                batch_number: 0,
                lab_id: lab_id.clone(),
                assignment: assignment_from(owner.kind, r),
            });
        }
        for (i, b) in batches.iter_mut().enumerate() {
            b.batch_number = i as u32 + 1;
        }
        timetable.labs.set(
            day,
            slot,
            LabMode {
                enabled: true,
                batch_count: batches.len(),
            },
        );
        timetable.grid.replace_cell(day, slot, SlotCell::Lab(batches));
    }
    (timetable, ignored)
}

fn assignment_from(kind: OwnerKind, row: &Record) -> SlotAssignment {
    let mut a = SlotAssignment::default();
    for f in kind.fields() {
        a.set(*f, row.text(f.column()));
    }
    a
}

pub fn load_grid(
    store: &dyn TableStore,
    owner: &Owner,
    capability: &mut SchemaCapability,
) -> Result<LoadOutcome, GatewayError> {
    let table = owner.kind.table();
    let column = owner.kind.owner_column();
    let id = owner_value(owner);

    let (rows, mode) = with_fallback(
        capability,
        || {
            store.select(
                table,
                &rich_columns(owner.kind),
                (column, &id),
                &["day_index", "slot_index", "batch_number"],
            )
        },
        || {
            let rows = store.select(
                table,
                &base_columns(owner.kind),
                (column, &id),
                &["day_index", "slot_index"],
            )?;
            Ok(rows.into_iter().map(tag_basic).collect())
        },
    )?;

    let (timetable, ignored_rows) = reconstruct(owner, &rows);
    let revision = current_revision(store, owner)?;
    debug!(
        owner = %owner.key(),
        rows = rows.len(),
        labs = timetable.labs.enabled().count(),
        mode = mode.as_str(),
        revision,
        "loaded timetable"
    );
    Ok(LoadOutcome {
        timetable,
        mode,
        revision,
        ignored_rows,
    })
}

fn tag_basic(row: Record) -> Record {
    row.with("is_lab", false)
        .with("batch_number", Value::Null)
        .with("lab_id", Value::Null)
}

/// Replaces every stored row of the owner with the flattened timetable. When
/// `expected_revision` is given it must match the stored revision.
pub fn save_grid(
    store: &dyn TableStore,
    timetable: &Timetable,
    capability: &mut SchemaCapability,
    expected_revision: Option<i64>,
) -> Result<SaveOutcome, GatewayError> {
    let owner = timetable.owner();
    let rows = flatten(timetable)?;
    let current = current_revision(store, owner)?;
    if let Some(expected) = expected_revision {
        if expected != current {
            return Err(GatewayError::Conflict {
                expected,
                actual: current,
            });
        }
    }

    let (rows_written, mode) = replace_rows(store, owner, &rows, capability)?;
    let revision = bump_revision(store, owner, current)?;
    info!(owner = %owner.key(), rows_written, mode = mode.as_str(), revision, "saved timetable");
    Ok(SaveOutcome {
        rows_written,
        mode,
        revision,
    })
}

/// Replaces the owner's stored rows with imported ones. Imported rows are never labs.
pub fn import_rows(
    store: &dyn TableStore,
    owner: &Owner,
    rows: &[ImportRow],
    capability: &mut SchemaCapability,
) -> Result<SaveOutcome, GatewayError> {
    let records: Vec<Record> = rows
        .iter()
        .map(|r| {
            let a = SlotAssignment {
                course: r.course.clone(),
                professor: r.professor.clone(),
                room: r.room.clone(),
                ..SlotAssignment::default()
            };
            tag_basic(base_record(owner, r.day, r.slot, &a))
        })
        .collect();

    let current = current_revision(store, owner)?;
    let (rows_written, mode) = replace_rows(store, owner, &records, capability)?;
    let revision = bump_revision(store, owner, current)?;
    info!(owner = %owner.key(), rows_written, mode = mode.as_str(), "imported timetable rows");
    Ok(SaveOutcome {
        rows_written,
        mode,
        revision,
    })
}

fn replace_rows(
    store: &dyn TableStore,
    owner: &Owner,
    rows: &[Record],
    capability: &mut SchemaCapability,
) -> Result<(usize, StorageMode), StoreError> {
    let table = owner.kind.table();
    let column = owner.kind.owner_column();
    let id = owner_value(owner);
    with_fallback(
        capability,
        || store.replace(table, (column, &id), rows),
        || {
            let basic: Vec<Record> = rows.iter().map(|r| r.without(&LAB_COLUMNS)).collect();
            store.replace(table, (column, &id), &basic)
        },
    )
}

pub fn current_revision(store: &dyn TableStore, owner: &Owner) -> Result<i64, StoreError> {
    let key = Value::Text(owner.key());
    let rows = store.select(REVISIONS_TABLE, &["revision"], ("owner_key", &key), &[])?;
    Ok(rows.first().and_then(|r| r.int("revision")).unwrap_or(0))
}

fn bump_revision(store: &dyn TableStore, owner: &Owner, current: i64) -> Result<i64, StoreError> {
    let key = Value::Text(owner.key());
    let next = current + 1;
    let row = Record::new()
        .with("owner_key", owner.key())
        .with("revision", next);
    store.replace(REVISIONS_TABLE, ("owner_key", &key), &[row])?;
    Ok(next)
}
