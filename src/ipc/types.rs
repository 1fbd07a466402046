use std::collections::HashMap;
use std::path::PathBuf;

use crate::timetable::fallback::{SchemaCapability, StorageMode};
use crate::timetable::grid::Timetable;
use crate::timetable::OwnerKind;
use rusqlite::Connection;
use serde::Deserialize;

#[derive(Debug, Deserialize, Clone)]
pub struct Request {
    pub id: String,
    pub method: String,
    #[serde(default)]
    pub params: serde_json::Value,
}

/// The timetable being edited for one owner, plus what was last persisted.
#[derive(Debug)]
pub struct EditorSession {
    pub timetable: Timetable,
    /// Revision the edits are based on.
    pub revision: i64,
    pub mode: StorageMode,
    pub dirty: bool,
}

#[derive(Default)]
pub struct AppState {
    pub workspace: Option<PathBuf>,
    pub db: Option<Connection>,
    /// Keyed by `Owner::key()`.
    pub sessions: HashMap<String, EditorSession>,
    /// Probed once per workspace and timetable table.
    pub capabilities: HashMap<OwnerKind, SchemaCapability>,
}

impl AppState {
    pub fn new() -> Self {
        Self::default()
    }

    /// Drops everything tied to the current workspace.
    pub fn reset_workspace(&mut self) {
        self.workspace = None;
        self.db = None;
        self.sessions.clear();
        self.capabilities.clear();
    }
}
