use crate::blob::{self, BlobStore, FsBlobStore};
use crate::db;
use crate::ipc::error::{gateway_err, ok, HandlerErr};
use crate::ipc::handlers::setup::{load_timetable_settings, TimetableSettings};
use crate::ipc::types::{AppState, EditorSession, Request};
use crate::store::{SqliteStore, TableStore};
use crate::timetable::error::{GridError, ImportError};
use crate::timetable::fallback::{self, SchemaCapability, StorageMode, LAB_COLUMNS};
use crate::timetable::grid::{LabModeIndex, Timetable};
use crate::timetable::{gateway, import, lab, view};
use crate::timetable::{Day, Owner, OwnerKind, Slot, SlotField};
use rusqlite::{Connection, OptionalExtension};
use serde_json::{json, Value};
use std::collections::hash_map::Entry;
use std::collections::HashMap;
use std::path::Path;
use tracing::{info, warn};

fn get_required_str(params: &Value, key: &str) -> Result<String, HandlerErr> {
    params
        .get(key)
        .and_then(|v| v.as_str())
        .map(|s| s.to_string())
        .ok_or_else(|| HandlerErr::new("bad_params", format!("missing {}", key)))
}

fn get_required_i64(params: &Value, key: &str) -> Result<i64, HandlerErr> {
    params
        .get(key)
        .and_then(|v| v.as_i64())
        .ok_or_else(|| HandlerErr::new("bad_params", format!("{} must be an integer", key)))
}

fn parse_owner(params: &Value) -> Result<Owner, HandlerErr> {
    let kind_raw = get_required_str(params, "ownerKind")?;
    let Some(kind) = OwnerKind::parse(&kind_raw) else {
        return Err(HandlerErr::new(
            "bad_params",
            "ownerKind must be one of: class, faculty",
        ));
    };
    let id = get_required_str(params, "ownerId")?;
    if id.trim().is_empty() {
        return Err(HandlerErr::new("bad_params", "ownerId must not be empty"));
    }
    Ok(Owner::new(kind, id.trim()))
}

fn parse_kind(params: &Value) -> Result<OwnerKind, HandlerErr> {
    let raw = get_required_str(params, "ownerKind")?;
    OwnerKind::parse(&raw)
        .ok_or_else(|| HandlerErr::new("bad_params", "ownerKind must be one of: class, faculty"))
}

fn parse_cell(params: &Value) -> Result<(Day, Slot), HandlerErr> {
    let day = Day::new(get_required_i64(params, "day")?)?;
    let slot = Slot::new(get_required_i64(params, "slot")?)?;
    Ok((day, slot))
}

fn parse_field(params: &Value) -> Result<SlotField, HandlerErr> {
    let raw = get_required_str(params, "field")?;
    SlotField::parse(&raw).ok_or_else(|| {
        HandlerErr::new(
            "bad_params",
            "field must be one of: course, professor, room, className",
        )
    })
}

fn parse_value(params: &Value) -> Result<String, HandlerErr> {
    match params.get("value") {
        None | Some(Value::Null) => Ok(String::new()),
        Some(Value::String(s)) => Ok(s.clone()),
        Some(_) => Err(HandlerErr::new("bad_params", "value must be a string")),
    }
}

fn parse_batch_count(
    params: &Value,
    settings: &TimetableSettings,
    required: bool,
) -> Result<usize, HandlerErr> {
    let n = match params.get("batchCount") {
        None | Some(Value::Null) if !required => return Ok(settings.default_batch_count),
        _ => get_required_i64(params, "batchCount")?,
    };
    if n < 1 {
        return Err(GridError::InvalidBatchCount {
            count: n.max(0) as usize,
        }
        .into());
    }
    let n = n as usize;
    if n > settings.max_batch_count {
        return Err(HandlerErr::new(
            "bad_params",
            format!("batchCount must be <= {}", settings.max_batch_count),
        ));
    }
    Ok(n)
}

fn settings(conn: &Connection) -> Result<TimetableSettings, HandlerErr> {
    load_timetable_settings(conn).map_err(|e| HandlerErr::new("db_query_failed", e.to_string()))
}

fn owner_exists(conn: &Connection, owner: &Owner) -> Result<bool, HandlerErr> {
    let sql = format!("SELECT 1 FROM {} WHERE id = ?", owner.kind.owner_table());
    conn.query_row(&sql, [&owner.id], |r| r.get::<_, i64>(0))
        .optional()
        .map(|v| v.is_some())
        .map_err(|e| HandlerErr::new("db_query_failed", e.to_string()))
}

fn require_owner(conn: &Connection, owner: &Owner) -> Result<(), HandlerErr> {
    if owner_exists(conn, owner)? {
        Ok(())
    } else {
        Err(HandlerErr::new(
            "not_found",
            format!("{} not found", owner.kind.as_str()),
        ))
    }
}

/// Cached capability for the owner kind's table, probed on first use.
fn capability<'a>(
    caps: &'a mut HashMap<OwnerKind, SchemaCapability>,
    conn: &Connection,
    kind: OwnerKind,
) -> &'a mut SchemaCapability {
    caps.entry(kind)
        .or_insert_with(|| fallback::probe(&SqliteStore::new(conn), kind.table()))
}

fn notice(mode: StorageMode, verb: &str) -> Option<String> {
    match mode {
        StorageMode::Rich => None,
        StorageMode::Basic => Some(format!("{} in basic mode", verb)),
    }
}

fn load_session(
    conn: &Connection,
    caps: &mut HashMap<OwnerKind, SchemaCapability>,
    owner: &Owner,
) -> Result<EditorSession, HandlerErr> {
    require_owner(conn, owner)?;
    let store = SqliteStore::new(conn);
    let cap = capability(caps, conn, owner.kind);
    let out = gateway::load_grid(&store, owner, cap)
        .map_err(|e| gateway_err(e, "db_query_failed"))?;
    if out.ignored_rows > 0 {
        warn!(owner = %owner.key(), rows = out.ignored_rows, "stored rows outside the grid were ignored");
    }
    Ok(EditorSession {
        timetable: out.timetable,
        revision: out.revision,
        mode: out.mode,
        dirty: false,
    })
}

fn ensure_session<'a>(
    conn: &Connection,
    sessions: &'a mut HashMap<String, EditorSession>,
    caps: &mut HashMap<OwnerKind, SchemaCapability>,
    owner: &Owner,
) -> Result<&'a mut EditorSession, HandlerErr> {
    match sessions.entry(owner.key()) {
        Entry::Occupied(e) => Ok(e.into_mut()),
        Entry::Vacant(e) => {
            let session = load_session(conn, caps, owner)?;
            Ok(e.insert(session))
        }
    }
}

/// Under the enforced lab span, also lists continued slots that still hold data.
fn session_view(session: &EditorSession, policy: lab::LabSpanPolicy) -> Value {
    let tt = &session.timetable;
    let mut v = view::render(tt, session.revision, session.mode);
    v["dirty"] = json!(session.dirty);
    let conflicts = match policy {
        lab::LabSpanPolicy::Enforced => lab::span_conflicts(&tt.grid, &tt.labs),
        lab::LabSpanPolicy::Display => Vec::new(),
    };
    v["spanConflicts"] = json!(conflicts);
    v
}

fn timetable_open(state: &mut AppState, params: &Value) -> Result<Value, HandlerErr> {
    let Some(conn) = state.db.as_ref() else {
        return Err(HandlerErr::new("no_workspace", "select a workspace first"));
    };
    let owner = parse_owner(params)?;
    let policy = settings(conn)?.lab_span_policy;
    let session = load_session(conn, &mut state.capabilities, &owner)?;
    let mut v = session_view(&session, policy);
    v["notice"] = json!(notice(session.mode, "loaded"));
    state.sessions.insert(owner.key(), session);
    Ok(v)
}

/// Runs `edit` against the owner's session (loading it if needed) and returns the new view.
fn edit_session(
    state: &mut AppState,
    params: &Value,
    edit: impl FnOnce(&mut Timetable, &TimetableSettings) -> Result<(), HandlerErr>,
) -> Result<Value, HandlerErr> {
    let Some(conn) = state.db.as_ref() else {
        return Err(HandlerErr::new("no_workspace", "select a workspace first"));
    };
    let owner = parse_owner(params)?;
    let settings = settings(conn)?;
    let session = ensure_session(conn, &mut state.sessions, &mut state.capabilities, &owner)?;
    edit(&mut session.timetable, &settings)?;
    session.dirty = true;
    Ok(session_view(session, settings.lab_span_policy))
}

fn timetable_get(state: &mut AppState, params: &Value) -> Result<Value, HandlerErr> {
    let Some(conn) = state.db.as_ref() else {
        return Err(HandlerErr::new("no_workspace", "select a workspace first"));
    };
    let owner = parse_owner(params)?;
    let policy = settings(conn)?.lab_span_policy;
    let session = ensure_session(conn, &mut state.sessions, &mut state.capabilities, &owner)?;
    Ok(session_view(session, policy))
}

fn timetable_set_field(state: &mut AppState, params: &Value) -> Result<Value, HandlerErr> {
    let (day, slot) = parse_cell(params)?;
    let field = parse_field(params)?;
    let value = parse_value(params)?;
    edit_session(state, params, |tt, settings| {
        lab::check_slot_editable(settings.lab_span_policy, &tt.labs, day, slot, &value)?;
        tt.grid.set_field(day, slot, field, value)?;
        Ok(())
    })
}

fn timetable_enable_lab(state: &mut AppState, params: &Value) -> Result<Value, HandlerErr> {
    let (day, slot) = parse_cell(params)?;
    edit_session(state, params, |tt, settings| {
        let count = parse_batch_count(params, settings, false)?;
        lab::check_lab_span(settings.lab_span_policy, &tt.grid, &tt.labs, day, slot)?;
        lab::enable_lab(&mut tt.grid, &mut tt.labs, day, slot, count)?;
        Ok(())
    })
}

fn timetable_disable_lab(state: &mut AppState, params: &Value) -> Result<Value, HandlerErr> {
    let (day, slot) = parse_cell(params)?;
    edit_session(state, params, |tt, _| {
        lab::disable_lab(&mut tt.grid, &mut tt.labs, day, slot);
        Ok(())
    })
}

fn timetable_resize_batches(state: &mut AppState, params: &Value) -> Result<Value, HandlerErr> {
    let (day, slot) = parse_cell(params)?;
    edit_session(state, params, |tt, settings| {
        let count = parse_batch_count(params, settings, true)?;
        lab::resize_batches(&mut tt.grid, &mut tt.labs, day, slot, count)?;
        Ok(())
    })
}

fn timetable_set_batch_field(state: &mut AppState, params: &Value) -> Result<Value, HandlerErr> {
    let (day, slot) = parse_cell(params)?;
    let batch_index = get_required_i64(params, "batchIndex")?;
    let Ok(batch_index) = usize::try_from(batch_index) else {
        return Err(HandlerErr::new(
            "bad_params",
            "batchIndex must be a non-negative integer",
        ));
    };
    let field = parse_field(params)?;
    let value = parse_value(params)?;
    edit_session(state, params, |tt, _| {
        lab::set_batch_field(&mut tt.grid, day, slot, batch_index, field, value)?;
        Ok(())
    })
}

fn timetable_clear(state: &mut AppState, params: &Value) -> Result<Value, HandlerErr> {
    edit_session(state, params, |tt, _| {
        *tt = Timetable::empty(tt.owner().clone());
        Ok(())
    })
}

fn timetable_save(state: &mut AppState, params: &Value) -> Result<Value, HandlerErr> {
    let Some(conn) = state.db.as_ref() else {
        return Err(HandlerErr::new("no_workspace", "select a workspace first"));
    };
    let owner = parse_owner(params)?;
    let expected = match params.get("expectedRevision") {
        None | Some(Value::Null) => None,
        Some(_) => Some(get_required_i64(params, "expectedRevision")?),
    };
    let session = ensure_session(conn, &mut state.sessions, &mut state.capabilities, &owner)?;
    let cap = capability(&mut state.capabilities, conn, owner.kind);

    // Dropping the transaction on error rolls the delete back.
    let tx = conn
        .unchecked_transaction()
        .map_err(|e| HandlerErr::new("db_tx_failed", e.to_string()))?;
    let out = gateway::save_grid(&SqliteStore::new(&tx), &session.timetable, cap, expected)
        .map_err(|e| gateway_err(e, "db_insert_failed"))?;
    tx.commit()
        .map_err(|e| HandlerErr::new("db_commit_failed", e.to_string()))?;

    session.revision = out.revision;
    session.mode = out.mode;
    session.dirty = false;
    Ok(json!({
        "rowsWritten": out.rows_written,
        "revision": out.revision,
        "mode": out.mode,
        "notice": notice(out.mode, "saved"),
    }))
}

fn read_input_file(params: &Value) -> Result<(String, Vec<u8>), HandlerErr> {
    let path = get_required_str(params, "path")?;
    let file_name = Path::new(&path)
        .file_name()
        .and_then(|n| n.to_str())
        .unwrap_or_default()
        .to_string();
    let bytes = std::fs::read(&path).map_err(|e| {
        HandlerErr::from(ImportError::Unreadable {
            message: format!("{}: {}", path, e),
        })
    })?;
    Ok((file_name, bytes))
}

fn timetable_import(state: &mut AppState, params: &Value) -> Result<Value, HandlerErr> {
    let Some(conn) = state.db.as_ref() else {
        return Err(HandlerErr::new("no_workspace", "select a workspace first"));
    };
    let owner = parse_owner(params)?;
    if owner.kind != OwnerKind::Class {
        return Err(HandlerErr::new(
            "bad_params",
            "row import is for class timetables; use timetable.importGrid for faculty",
        ));
    }
    require_owner(conn, &owner)?;
    let (file_name, bytes) = read_input_file(params)?;
    let parsed = import::parse_class_timetable(&file_name, &bytes)?;

    let cap = capability(&mut state.capabilities, conn, owner.kind);
    let tx = conn
        .unchecked_transaction()
        .map_err(|e| HandlerErr::new("db_tx_failed", e.to_string()))?;
    let out = gateway::import_rows(&SqliteStore::new(&tx), &owner, &parsed.rows, cap)
        .map_err(|e| gateway_err(e, "db_insert_failed"))?;
    tx.commit()
        .map_err(|e| HandlerErr::new("db_commit_failed", e.to_string()))?;
    info!(owner = %owner.key(), imported = out.rows_written, skipped = parsed.skipped.len(), "imported class timetable");

    // Storage is now the source of truth; rebuild the session from it.
    let session = load_session(conn, &mut state.capabilities, &owner)?;
    let view = session_view(&session, settings(conn)?.lab_span_policy);
    state.sessions.insert(owner.key(), session);
    Ok(json!({
        "imported": out.rows_written,
        "skipped": parsed.skipped,
        "revision": out.revision,
        "mode": out.mode,
        "notice": notice(out.mode, "imported"),
        "timetable": view,
    }))
}

fn timetable_import_grid(state: &mut AppState, params: &Value) -> Result<Value, HandlerErr> {
    let Some(conn) = state.db.as_ref() else {
        return Err(HandlerErr::new("no_workspace", "select a workspace first"));
    };
    let owner = parse_owner(params)?;
    if owner.kind != OwnerKind::Faculty {
        return Err(HandlerErr::new(
            "bad_params",
            "grid import is for faculty timetables; use timetable.import for classes",
        ));
    }
    let (file_name, bytes) = read_input_file(params)?;
    let grid = import::parse_faculty_grid(owner.clone(), &file_name, &bytes)?;
    let filled = grid.iter().filter(|(_, _, c)| !c.is_blank()).count();

    let policy = settings(conn)?.lab_span_policy;
    let session = ensure_session(conn, &mut state.sessions, &mut state.capabilities, &owner)?;
    session.timetable = Timetable {
        labs: LabModeIndex::derive(&grid),
        grid,
    };
    session.dirty = true;
    let mut v = session_view(session, policy);
    v["filledSlots"] = json!(filled);
    Ok(v)
}

fn timetable_sample_csv(_state: &mut AppState, params: &Value) -> Result<Value, HandlerErr> {
    let csv = import::sample_class_csv();
    let out_path = params.get("outPath").and_then(|v| v.as_str());
    if let Some(p) = out_path {
        std::fs::write(p, &csv).map_err(|e| HandlerErr::new("io_failed", e.to_string()))?;
    }
    Ok(json!({
        "fileName": "sample_timetable.csv",
        "csv": csv,
        "path": out_path,
    }))
}

fn timetable_upload_file(state: &mut AppState, params: &Value) -> Result<Value, HandlerErr> {
    let (Some(conn), Some(workspace)) = (state.db.as_ref(), state.workspace.as_ref()) else {
        return Err(HandlerErr::new("no_workspace", "select a workspace first"));
    };
    let owner = parse_owner(params)?;
    require_owner(conn, &owner)?;
    let path = get_required_str(params, "path")?;
    let file_name = Path::new(&path)
        .file_name()
        .and_then(|n| n.to_str())
        .unwrap_or("timetable")
        .to_string();
    let bytes = std::fs::read(&path).map_err(|e| HandlerErr::new("io_failed", e.to_string()))?;

    let settings = settings(conn)?;
    let store = FsBlobStore::new(workspace, settings.public_url_base);
    let blob_path = blob::upload_path(&owner, &file_name, chrono::Utc::now().timestamp_millis());
    let info = store
        .upload(&blob_path, &bytes, true)
        .map_err(|e| HandlerErr::new("blob_failed", e.to_string()))?;
    let url = store.public_url(&info.path);

    let sql = format!(
        "UPDATE {} SET timetable_url = ?, timetable_path = ? WHERE id = ?",
        owner.kind.owner_table()
    );
    conn.execute(&sql, (&url, &info.path, &owner.id))
        .map_err(|e| HandlerErr::new("db_update_failed", e.to_string()))?;
    info!(owner = %owner.key(), path = %info.path, size = info.size, "uploaded timetable file");

    Ok(json!({
        "path": info.path,
        "url": url,
        "size": info.size,
        "sha256": info.sha256,
    }))
}

fn timetable_remove_file(state: &mut AppState, params: &Value) -> Result<Value, HandlerErr> {
    let (Some(conn), Some(workspace)) = (state.db.as_ref(), state.workspace.as_ref()) else {
        return Err(HandlerErr::new("no_workspace", "select a workspace first"));
    };
    let owner = parse_owner(params)?;
    require_owner(conn, &owner)?;
    let table = owner.kind.owner_table();

    let (url, stored_path): (Option<String>, Option<String>) = conn
        .query_row(
            &format!("SELECT timetable_url, timetable_path FROM {} WHERE id = ?", table),
            [&owner.id],
            |r| Ok((r.get(0)?, r.get(1)?)),
        )
        .map_err(|e| HandlerErr::new("db_query_failed", e.to_string()))?;
    let Some(url) = url else {
        return Ok(json!({ "removed": false }));
    };

    conn.execute(
        &format!(
            "UPDATE {} SET timetable_url = NULL, timetable_path = NULL WHERE id = ?",
            table
        ),
        [&owner.id],
    )
    .map_err(|e| HandlerErr::new("db_update_failed", e.to_string()))?;

    // Links made before timetable_path existed only carry the url.
    let path = stored_path.or_else(|| blob::path_from_public_url(&url));
    if let Some(path) = path {
        let store = FsBlobStore::new(workspace, "");
        if let Err(e) = store.remove(&path) {
            // The url is already cleared; a leftover file is harmless.
            warn!(path = %path, error = %e, "could not remove timetable file");
        }
    }
    Ok(json!({ "removed": true }))
}

fn timetable_schema(state: &mut AppState, params: &Value) -> Result<Value, HandlerErr> {
    let Some(conn) = state.db.as_ref() else {
        return Err(HandlerErr::new("no_workspace", "select a workspace first"));
    };
    let kind = parse_kind(params)?;
    let store = SqliteStore::new(conn);
    let probed = fallback::probe(&store, kind.table());
    if probed != SchemaCapability::Unknown {
        state.capabilities.insert(kind, probed);
    }
    let columns = store
        .columns(kind.table())
        .map_err(|e| HandlerErr::new("db_query_failed", e.message))?;
    let missing: Vec<&str> = LAB_COLUMNS
        .iter()
        .copied()
        .filter(|c| !columns.iter().any(|n| n == c))
        .collect();
    Ok(json!({
        "table": kind.table(),
        "capability": probed,
        "missingColumns": missing,
    }))
}

fn timetable_migrate_schema(state: &mut AppState, params: &Value) -> Result<Value, HandlerErr> {
    let Some(conn) = state.db.as_ref() else {
        return Err(HandlerErr::new("no_workspace", "select a workspace first"));
    };
    let kind = parse_kind(params)?;
    let added = db::ensure_timetable_lab_columns(conn, kind.table())
        .map_err(|e| HandlerErr::new("db_migrate_failed", e.to_string()))?;
    state.capabilities.insert(kind, SchemaCapability::Rich);
    Ok(json!({ "table": kind.table(), "addedColumns": added }))
}

fn respond(
    state: &mut AppState,
    req: &Request,
    f: fn(&mut AppState, &Value) -> Result<Value, HandlerErr>,
) -> serde_json::Value {
    match f(state, &req.params) {
        Ok(result) => ok(&req.id, result),
        Err(error) => error.response(&req.id),
    }
}

pub fn try_handle(state: &mut AppState, req: &Request) -> Option<serde_json::Value> {
    let f: fn(&mut AppState, &Value) -> Result<Value, HandlerErr> = match req.method.as_str() {
        "timetable.open" => timetable_open,
        "timetable.get" => timetable_get,
        "timetable.setField" => timetable_set_field,
        "timetable.enableLab" => timetable_enable_lab,
        "timetable.disableLab" => timetable_disable_lab,
        "timetable.resizeBatches" => timetable_resize_batches,
        "timetable.setBatchField" => timetable_set_batch_field,
        "timetable.clear" => timetable_clear,
        "timetable.save" => timetable_save,
        "timetable.import" => timetable_import,
        "timetable.importGrid" => timetable_import_grid,
        "timetable.sampleCsv" => timetable_sample_csv,
        "timetable.uploadFile" => timetable_upload_file,
        "timetable.removeFile" => timetable_remove_file,
        "timetable.schema" => timetable_schema,
        "timetable.migrateSchema" => timetable_migrate_schema,
        _ => return None,
    };
    Some(respond(state, req, f))
}
