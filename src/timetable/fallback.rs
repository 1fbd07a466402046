//! Detects whether a timetable table has the lab columns and degrades to the
//! basic row shape when it does not.

use crate::store::{StoreError, TableStore};
use serde::Serialize;
use tracing::{debug, warn};

pub const LAB_COLUMNS: [&str; 3] = ["is_lab", "batch_number", "lab_id"];

/// What is known about a table's support for lab columns.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "lowercase")]
pub enum SchemaCapability {
    Rich,
    Basic,
    Unknown,
}

/// Row shape an operation actually used.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "lowercase")]
pub enum StorageMode {
    Rich,
    Basic,
}

impl StorageMode {
    pub fn as_str(self) -> &'static str {
        match self {
            Self::Rich => "rich",
            Self::Basic => "basic",
        }
    }
}

/// Asks the store for the table's columns. A store that cannot answer yields
/// `Unknown`, which defers to the error-message check.
pub fn probe(store: &dyn TableStore, table: &str) -> SchemaCapability {
    match store.columns(table) {
        Ok(cols) if cols.is_empty() => SchemaCapability::Unknown,
        Ok(cols) => {
            let has_all = LAB_COLUMNS.iter().all(|c| cols.iter().any(|n| n == c));
            let cap = if has_all {
                SchemaCapability::Rich
            } else {
                SchemaCapability::Basic
            };
            debug!(table, ?cap, "probed timetable schema");
            cap
        }
        Err(e) => {
            debug!(table, error = %e, "schema probe unavailable");
            SchemaCapability::Unknown
        }
    }
}

/// Message check kept for stores whose metadata is unreliable: the error must
/// talk about a column and name one of the lab columns.
pub fn is_missing_column(err: &StoreError) -> bool {
    let msg = err.message.to_ascii_lowercase();
    msg.contains("column") && LAB_COLUMNS.iter().any(|c| msg.contains(c))
}

/// Runs `rich` unless the table is known to be basic. A missing-column failure
/// downgrades `capability` and retries once with `basic`; anything else propagates.
pub fn with_fallback<T>(
    capability: &mut SchemaCapability,
    rich: impl FnOnce() -> Result<T, StoreError>,
    basic: impl FnOnce() -> Result<T, StoreError>,
) -> Result<(T, StorageMode), StoreError> {
    if *capability == SchemaCapability::Basic {
        return basic().map(|v| (v, StorageMode::Basic));
    }
    match rich() {
        Ok(v) => {
            *capability = SchemaCapability::Rich;
            Ok((v, StorageMode::Rich))
        }
        Err(e) if is_missing_column(&e) => {
            warn!(error = %e, "lab columns missing, falling back to basic mode");
            *capability = SchemaCapability::Basic;
            basic().map(|v| (v, StorageMode::Basic))
        }
        Err(e) => Err(e),
    }
}
