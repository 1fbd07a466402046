//! Weekly timetable model shared by class and faculty schedules.
//!
//! A week is a fixed 6 day x 6 slot grid. Each cell is either a single regular
//! assignment or a set of parallel lab batches (see [`grid::SlotCell`]).

pub mod error;
pub mod fallback;
pub mod gateway;
pub mod grid;
pub mod import;
pub mod lab;
pub mod view;

use error::GridError;
use serde::Serialize;

pub const DAY_COUNT: usize = 6;
pub const SLOT_COUNT: usize = 6;

pub const DAY_NAMES: [&str; DAY_COUNT] = [
    "Monday",
    "Tuesday",
    "Wednesday",
    "Thursday",
    "Friday",
    "Saturday",
];

pub const SLOT_LABELS: [&str; SLOT_COUNT] = [
    "09:10-10:10",
    "10:10-11:10",
    "11:10-12:10",
    "12:10-01:10",
    "02:20-03:20",
    "03:20-04:20",
];

/// Day of the week as a 0-based index (Monday = 0).
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash)]
pub struct Day(u8);

impl Day {
    pub fn new(index: i64) -> Result<Self, GridError> {
        if (0..DAY_COUNT as i64).contains(&index) {
            Ok(Day(index as u8))
        } else {
            Err(GridError::DayOutOfRange { day: index })
        }
    }

    /// Case-insensitive lookup against [`DAY_NAMES`].
    pub fn from_name(name: &str) -> Option<Self> {
        let t = name.trim();
        DAY_NAMES
            .iter()
            .position(|d| d.eq_ignore_ascii_case(t))
            .map(|i| Day(i as u8))
    }

    pub fn index(self) -> usize {
        self.0 as usize
    }

    pub fn name(self) -> &'static str {
        DAY_NAMES[self.index()]
    }

    pub fn all() -> impl Iterator<Item = Day> {
        (0..DAY_COUNT as u8).map(Day)
    }
}

/// Time slot within a day as a 0-based index.
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash)]
pub struct Slot(u8);

impl Slot {
    pub fn new(index: i64) -> Result<Self, GridError> {
        if (0..SLOT_COUNT as i64).contains(&index) {
            Ok(Slot(index as u8))
        } else {
            Err(GridError::SlotOutOfRange { slot: index })
        }
    }

    /// Parses a 1-based slot number as written in import files.
    pub fn from_number(raw: &str) -> Option<Self> {
        let n = raw.trim().parse::<i64>().ok()?;
        Slot::new(n - 1).ok()
    }

    pub fn index(self) -> usize {
        self.0 as usize
    }

    pub fn label(self) -> &'static str {
        SLOT_LABELS[self.index()]
    }

    pub fn next(self) -> Option<Slot> {
        Slot::new(self.0 as i64 + 1).ok()
    }

    pub fn prev(self) -> Option<Slot> {
        self.0.checked_sub(1).map(Slot)
    }

    pub fn all() -> impl Iterator<Item = Slot> {
        (0..SLOT_COUNT as u8).map(Slot)
    }
}

/// Composite `"day-slot"` key used for the lab index and for wire payloads.
pub fn cell_key(day: Day, slot: Slot) -> String {
    format!("{}-{}", day.index(), slot.index())
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize)]
#[serde(rename_all = "lowercase")]
pub enum OwnerKind {
    Class,
    Faculty,
}

impl OwnerKind {
    pub fn parse(s: &str) -> Option<Self> {
        match s {
            "class" => Some(Self::Class),
            "faculty" => Some(Self::Faculty),
            _ => None,
        }
    }

    pub fn as_str(self) -> &'static str {
        match self {
            Self::Class => "class",
            Self::Faculty => "faculty",
        }
    }

    /// Row table holding this kind's timetable slots.
    pub fn table(self) -> &'static str {
        match self {
            Self::Class => "class_timetables",
            Self::Faculty => "faculty_timetables",
        }
    }

    pub fn owner_column(self) -> &'static str {
        match self {
            Self::Class => "class_id",
            Self::Faculty => "faculty_id",
        }
    }

    /// Entity table the owner id refers to.
    pub fn owner_table(self) -> &'static str {
        match self {
            Self::Class => "classes",
            Self::Faculty => "faculty",
        }
    }

    /// Descriptive fields a slot carries for this kind, in column order.
    pub fn fields(self) -> &'static [SlotField] {
        match self {
            Self::Class => &[SlotField::Course, SlotField::Professor, SlotField::Room],
            Self::Faculty => &[SlotField::Course, SlotField::Room, SlotField::ClassName],
        }
    }

    pub fn carries(self, field: SlotField) -> bool {
        self.fields().contains(&field)
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum SlotField {
    Course,
    Professor,
    Room,
    ClassName,
}

impl SlotField {
    pub fn parse(s: &str) -> Option<Self> {
        match s {
            "course" => Some(Self::Course),
            "professor" => Some(Self::Professor),
            "room" => Some(Self::Room),
            "className" | "class_name" => Some(Self::ClassName),
            _ => None,
        }
    }

    pub fn column(self) -> &'static str {
        match self {
            Self::Course => "course",
            Self::Professor => "professor",
            Self::Room => "room",
            Self::ClassName => "class_name",
        }
    }

    /// Wire name used in IPC payloads.
    pub fn json_key(self) -> &'static str {
        match self {
            Self::ClassName => "className",
            other => other.column(),
        }
    }
}

/// The class or faculty member a timetable belongs to.
#[derive(Debug, Clone, PartialEq, Eq, Hash)]
pub struct Owner {
    pub kind: OwnerKind,
    pub id: String,
}

impl Owner {
    pub fn new(kind: OwnerKind, id: impl Into<String>) -> Self {
        Owner {
            kind,
            id: id.into(),
        }
    }

    /// Session / revision key, unique across both kinds.
    pub fn key(&self) -> String {
        format!("{}:{}", self.kind.as_str(), self.id)
    }

    pub fn lab_id(&self, day: Day, slot: Slot) -> String {
        format!("lab-{}-{}-{}", self.id, day.index(), slot.index())
    }
}

#[cfg(test)]
impl Owner {
    pub fn class(id: impl Into<String>) -> Self {
        Owner::new(OwnerKind::Class, id)
    }

    pub fn faculty(id: impl Into<String>) -> Self {
        Owner::new(OwnerKind::Faculty, id)
    }
}
