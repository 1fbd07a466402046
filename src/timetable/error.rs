//! Error types for the timetable subsystem.

use crate::store::StoreError;
use thiserror::Error;

/// Contract violations when addressing the grid. These indicate a caller bug
/// and are raised instead of being ignored.
#[derive(Debug, Error, Clone, PartialEq, Eq)]
pub enum GridError {
    #[error("day index {day} is out of range (0-5)")]
    DayOutOfRange { day: i64 },

    #[error("slot index {slot} is out of range (0-5)")]
    SlotOutOfRange { slot: i64 },

    #[error("batch index {batch_index} is out of range for cell {key} ({len} batches)")]
    BatchOutOfRange {
        key: String,
        batch_index: usize,
        len: usize,
    },

    #[error("cell {key} is not a lab cell")]
    NotLabCell { key: String },

    #[error("cell {key} is a lab cell; edit its batches instead")]
    LabCellField { key: String },

    #[error("batch count must be at least 1, got {count}")]
    InvalidBatchCount { count: usize },

    #[error("lab index disagrees with grid at cell {key}")]
    LabIndexMismatch { key: String },

    #[error("lab span conflict at cell {key}: {reason}")]
    LabSpanConflict { key: String, reason: String },

    #[error("{kind} timetables do not carry the {field} field")]
    FieldNotCarried {
        kind: &'static str,
        field: &'static str,
    },
}

/// User-correctable problems with an uploaded timetable file.
#[derive(Debug, Error, Clone, PartialEq, Eq)]
pub enum ImportError {
    #[error("unsupported file format: {file_name} (use .csv, .xlsx or .xls)")]
    UnsupportedFormat { file_name: String },

    #[error("the file contains no data")]
    EmptyFile,

    #[error("header must be: {expected}")]
    InvalidHeader {
        expected: String,
        found: Vec<String>,
    },

    #[error("the file contains only a header")]
    NoDataRows,

    #[error("no valid rows; check the day names and slot numbers ({skipped} skipped)")]
    NoValidRows { skipped: usize },

    #[error("could not read file: {message}")]
    Unreadable { message: String },
}

impl ImportError {
    pub fn code(&self) -> &'static str {
        match self {
            Self::UnsupportedFormat { .. } => "import_unsupported_format",
            Self::EmptyFile => "import_empty_file",
            Self::InvalidHeader { .. } => "import_invalid_header",
            Self::NoDataRows => "import_no_data_rows",
            Self::NoValidRows { .. } => "import_no_valid_rows",
            Self::Unreadable { .. } => "import_unreadable",
        }
    }
}

/// Failures of a load or save round-trip.
#[derive(Debug, Error)]
pub enum GatewayError {
    #[error(transparent)]
    Store(#[from] StoreError),

    #[error(transparent)]
    Grid(#[from] GridError),

    #[error("timetable changed since it was opened (expected revision {expected}, found {actual})")]
    Conflict { expected: i64, actual: i64 },
}
