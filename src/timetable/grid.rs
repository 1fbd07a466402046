use super::error::GridError;
use super::{cell_key, Day, Owner, Slot, SlotField, DAY_COUNT, SLOT_COUNT};
use serde::Serialize;
use serde_json::{json, Map, Value};
use std::collections::BTreeMap;

/// Descriptive payload of one scheduled slot. Blank in every field means
/// nothing is scheduled.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct SlotAssignment {
    pub course: String,
    pub professor: String,
    pub room: String,
    pub class_name: String,
}

impl SlotAssignment {
    pub fn is_blank(&self) -> bool {
        self.course.is_empty()
            && self.professor.is_empty()
            && self.room.is_empty()
            && self.class_name.is_empty()
    }

    pub fn get(&self, field: SlotField) -> &str {
        match field {
            SlotField::Course => &self.course,
            SlotField::Professor => &self.professor,
            SlotField::Room => &self.room,
            SlotField::ClassName => &self.class_name,
        }
    }

    pub fn set(&mut self, field: SlotField, value: impl Into<String>) {
        let v = value.into();
        match field {
            SlotField::Course => self.course = v,
            SlotField::Professor => self.professor = v,
            SlotField::Room => self.room = v,
            SlotField::ClassName => self.class_name = v,
        }
    }

    fn to_json(&self, fields: &[SlotField]) -> Map<String, Value> {
        let mut obj = Map::new();
        for f in fields {
            obj.insert(f.json_key().to_string(), Value::String(self.get(*f).to_string()));
        }
        obj
    }
}

/// One parallel sub-group of a lab session.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct LabBatch {
    /// 1-based.
    pub batch_number: u32,
    pub lab_id: String,
    pub assignment: SlotAssignment,
}

impl LabBatch {
    pub fn blank(batch_number: u32, lab_id: impl Into<String>) -> Self {
        LabBatch {
            batch_number,
            lab_id: lab_id.into(),
            assignment: SlotAssignment::default(),
        }
    }
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub enum SlotCell {
    Regular(SlotAssignment),
    Lab(Vec<LabBatch>),
}

impl Default for SlotCell {
    fn default() -> Self {
        SlotCell::Regular(SlotAssignment::default())
    }
}

impl SlotCell {
    /// True when nothing in the cell would be persisted.
    pub fn is_blank(&self) -> bool {
        match self {
            SlotCell::Regular(a) => a.is_blank(),
            SlotCell::Lab(batches) => batches.iter().all(|b| b.assignment.is_blank()),
        }
    }
}

/// In-memory 6x6 week for one owner. Every cell is always initialised.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct TimetableGrid {
    owner: Owner,
    cells: [[SlotCell; SLOT_COUNT]; DAY_COUNT],
}

impl TimetableGrid {
    pub fn init_empty(owner: Owner) -> Self {
        TimetableGrid {
            owner,
            cells: std::array::from_fn(|_| std::array::from_fn(|_| SlotCell::default())),
        }
    }

    pub fn owner(&self) -> &Owner {
        &self.owner
    }

    pub fn cell(&self, day: Day, slot: Slot) -> &SlotCell {
        &self.cells[day.index()][slot.index()]
    }

    pub(crate) fn replace_cell(&mut self, day: Day, slot: Slot, cell: SlotCell) {
        self.cells[day.index()][slot.index()] = cell;
    }

    pub(crate) fn cell_mut(&mut self, day: Day, slot: Slot) -> &mut SlotCell {
        &mut self.cells[day.index()][slot.index()]
    }

    /// Updates one field of a regular cell. Lab cells are edited per batch.
    pub fn set_field(
        &mut self,
        day: Day,
        slot: Slot,
        field: SlotField,
        value: impl Into<String>,
    ) -> Result<(), GridError> {
        let kind = self.owner.kind;
        if !kind.carries(field) {
            return Err(GridError::FieldNotCarried {
                kind: kind.as_str(),
                field: field.json_key(),
            });
        }
        match self.cell_mut(day, slot) {
            SlotCell::Regular(a) => {
                a.set(field, value);
                Ok(())
            }
            SlotCell::Lab(_) => Err(GridError::LabCellField {
                key: cell_key(day, slot),
            }),
        }
    }

    pub fn iter(&self) -> impl Iterator<Item = (Day, Slot, &SlotCell)> + '_ {
        Day::all().flat_map(move |d| Slot::all().map(move |s| (d, s, self.cell(d, s))))
    }

    pub fn has_data(&self) -> bool {
        self.iter().any(|(_, _, c)| !c.is_blank())
    }

    pub fn cell_json(&self, day: Day, slot: Slot) -> Value {
        let fields = self.owner.kind.fields();
        match self.cell(day, slot) {
            SlotCell::Regular(a) => {
                let mut obj = a.to_json(fields);
                obj.insert("kind".into(), json!("regular"));
                Value::Object(obj)
            }
            SlotCell::Lab(batches) => {
                let lab_id = batches.first().map(|b| b.lab_id.clone()).unwrap_or_default();
                let batches_json: Vec<Value> = batches
                    .iter()
                    .map(|b| {
                        let mut obj = b.assignment.to_json(fields);
                        obj.insert("batchNumber".into(), json!(b.batch_number));
                        Value::Object(obj)
                    })
                    .collect();
                json!({ "kind": "lab", "labId": lab_id, "batches": batches_json })
            }
        }
    }
}

#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct LabMode {
    pub enabled: bool,
    pub batch_count: usize,
}

/// Cached per-cell lab state. Derived from the grid; persisted rows remain
/// the source of truth across reloads.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct LabModeIndex {
    entries: BTreeMap<(Day, Slot), LabMode>,
}

impl LabModeIndex {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn derive(grid: &TimetableGrid) -> Self {
        let mut idx = Self::new();
        for (d, s, cell) in grid.iter() {
            if let SlotCell::Lab(batches) = cell {
                idx.set(
                    d,
                    s,
                    LabMode {
                        enabled: true,
                        batch_count: batches.len(),
                    },
                );
            }
        }
        idx
    }

    pub fn get(&self, day: Day, slot: Slot) -> LabMode {
        self.entries.get(&(day, slot)).copied().unwrap_or_default()
    }

    pub fn is_enabled(&self, day: Day, slot: Slot) -> bool {
        self.get(day, slot).enabled
    }

    pub fn set(&mut self, day: Day, slot: Slot, mode: LabMode) {
        self.entries.insert((day, slot), mode);
    }

    pub fn enabled(&self) -> impl Iterator<Item = (Day, Slot, LabMode)> + '_ {
        self.entries
            .iter()
            .filter(|(_, m)| m.enabled)
            .map(|((d, s), m)| (*d, *s, *m))
    }

    /// Checks that a key is enabled with count N exactly where the grid holds N batches.
    pub fn check_consistent(&self, grid: &TimetableGrid) -> Result<(), GridError> {
        for (d, s, cell) in grid.iter() {
            let mode = self.get(d, s);
            let ok = match cell {
                SlotCell::Lab(batches) => mode.enabled && mode.batch_count == batches.len(),
                SlotCell::Regular(_) => !mode.enabled,
            };
            if !ok {
                return Err(GridError::LabIndexMismatch { key: cell_key(d, s) });
            }
        }
        Ok(())
    }

    pub fn to_json(&self) -> Value {
        let mut obj = Map::new();
        for ((d, s), mode) in &self.entries {
            obj.insert(cell_key(*d, *s), json!(mode));
        }
        Value::Object(obj)
    }
}

/// A grid together with its lab index; the unit the editor and gateway pass around.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Timetable {
    pub grid: TimetableGrid,
    pub labs: LabModeIndex,
}

impl Timetable {
    pub fn empty(owner: Owner) -> Self {
        Timetable {
            grid: TimetableGrid::init_empty(owner),
            labs: LabModeIndex::new(),
        }
    }

    pub fn owner(&self) -> &Owner {
        self.grid.owner()
    }
}
