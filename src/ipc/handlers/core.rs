use crate::db;
use crate::ipc::error::{err, ok};
use crate::ipc::handlers::setup::load_timetable_settings;
use crate::ipc::types::{AppState, Request};
use crate::timetable::OwnerKind;
use rusqlite::Connection;
use serde_json::json;
use std::path::PathBuf;
use tracing::{info, warn};

fn handle_health(state: &mut AppState, req: &Request) -> serde_json::Value {
    ok(
        &req.id,
        json!({
            "version": env!("CARGO_PKG_VERSION"),
            "workspacePath": state.workspace.as_ref().map(|p| p.to_string_lossy().to_string())
        }),
    )
}

fn handle_workspace_select(state: &mut AppState, req: &Request) -> serde_json::Value {
    let p = req
        .params
        .get("path")
        .and_then(|v| v.as_str())
        .map(PathBuf::from);
    let Some(path) = p else {
        return err(&req.id, "bad_params", "missing params.path", None);
    };

    let conn = match db::open_db(&path) {
        Ok(conn) => conn,
        Err(e) => return err(&req.id, "db_open_failed", format!("{e:?}"), None),
    };
    // The previous workspace stays selected until the new one is fully ready.
    let migrated = match auto_migrate(&conn) {
        Ok(m) => m,
        Err(e) => return err(&req.id, "db_migrate_failed", e.to_string(), None),
    };

    state.reset_workspace();
    info!(workspace = %path.display(), "workspace opened");
    state.workspace = Some(path.clone());
    state.db = Some(conn);
    ok(
        &req.id,
        json!({ "workspacePath": path.to_string_lossy(), "migratedTables": migrated }),
    )
}

/// Adds lab columns when `autoMigrateLabColumns` is on. Returns the tables changed.
fn auto_migrate(conn: &Connection) -> anyhow::Result<Vec<&'static str>> {
    let mut migrated = Vec::new();
    match load_timetable_settings(conn) {
        Ok(settings) if settings.auto_migrate_lab_columns => {
            for kind in [OwnerKind::Class, OwnerKind::Faculty] {
                if !db::ensure_timetable_lab_columns(conn, kind.table())?.is_empty() {
                    migrated.push(kind.table());
                }
            }
        }
        Ok(_) => {}
        // Unreadable settings must not prevent the workspace from opening.
        Err(e) => warn!(error = %e, "could not read timetable settings"),
    }
    Ok(migrated)
}

pub fn try_handle(state: &mut AppState, req: &Request) -> Option<serde_json::Value> {
    match req.method.as_str() {
        "health" => Some(handle_health(state, req)),
        "workspace.select" => Some(handle_workspace_select(state, req)),
        _ => None,
    }
}
