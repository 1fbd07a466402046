//! Class and faculty records, the owners timetables hang off.

use crate::ipc::error::{err, ok};
use crate::ipc::types::{AppState, Request};
use crate::timetable::{Owner, OwnerKind};
use rusqlite::OptionalExtension;
use serde_json::json;
use uuid::Uuid;

fn list_key(kind: OwnerKind) -> &'static str {
    match kind {
        OwnerKind::Class => "classes",
        OwnerKind::Faculty => "faculty",
    }
}

fn id_key(kind: OwnerKind) -> &'static str {
    match kind {
        OwnerKind::Class => "classId",
        OwnerKind::Faculty => "facultyId",
    }
}

fn handle_list(state: &mut AppState, req: &Request, kind: OwnerKind) -> serde_json::Value {
    let Some(conn) = state.db.as_ref() else {
        return ok(&req.id, json!({ list_key(kind): [] }));
    };

    // Row count lets the UI show which owners already have a timetable.
    let sql = format!(
        "SELECT o.id, o.name, o.timetable_url,
           (SELECT COUNT(*) FROM {table} t WHERE t.{col} = o.id) AS slot_rows
         FROM {owners} o
         ORDER BY o.name",
        table = kind.table(),
        col = kind.owner_column(),
        owners = kind.owner_table(),
    );
    let mut stmt = match conn.prepare(&sql) {
        Ok(s) => s,
        Err(e) => return err(&req.id, "db_query_failed", e.to_string(), None),
    };

    let rows = stmt
        .query_map([], |row| {
            let id: String = row.get(0)?;
            let name: String = row.get(1)?;
            let url: Option<String> = row.get(2)?;
            let slot_rows: i64 = row.get(3)?;
            Ok(json!({
                "id": id,
                "name": name,
                "timetableUrl": url,
                "timetableRows": slot_rows
            }))
        })
        .and_then(|it| it.collect::<Result<Vec<_>, _>>());

    match rows {
        Ok(list) => ok(&req.id, json!({ list_key(kind): list })),
        Err(e) => err(&req.id, "db_query_failed", e.to_string(), None),
    }
}

fn handle_create(state: &mut AppState, req: &Request, kind: OwnerKind) -> serde_json::Value {
    let Some(conn) = state.db.as_ref() else {
        return err(&req.id, "no_workspace", "select a workspace first", None);
    };

    let name = match req.params.get("name").and_then(|v| v.as_str()) {
        Some(v) => v.trim().to_string(),
        None => return err(&req.id, "bad_params", "missing name", None),
    };
    if name.is_empty() {
        return err(&req.id, "bad_params", "name must not be empty", None);
    }

    let id = Uuid::new_v4().to_string();
    let sql = format!("INSERT INTO {}(id, name) VALUES(?, ?)", kind.owner_table());
    if let Err(e) = conn.execute(&sql, (&id, &name)) {
        return err(
            &req.id,
            "db_insert_failed",
            e.to_string(),
            Some(json!({ "table": kind.owner_table() })),
        );
    }

    ok(&req.id, json!({ id_key(kind): id, "name": name }))
}

fn handle_delete(state: &mut AppState, req: &Request, kind: OwnerKind) -> serde_json::Value {
    let Some(conn) = state.db.as_ref() else {
        return err(&req.id, "no_workspace", "select a workspace first", None);
    };

    let id = match req.params.get(id_key(kind)).and_then(|v| v.as_str()) {
        Some(v) => v.to_string(),
        None => {
            return err(
                &req.id,
                "bad_params",
                format!("missing {}", id_key(kind)),
                None,
            )
        }
    };

    let exists: Option<i64> = match conn
        .query_row(
            &format!("SELECT 1 FROM {} WHERE id = ?", kind.owner_table()),
            [&id],
            |r| r.get(0),
        )
        .optional()
    {
        Ok(v) => v,
        Err(e) => return err(&req.id, "db_query_failed", e.to_string(), None),
    };
    if exists.is_none() {
        return err(&req.id, "not_found", format!("{} not found", kind.as_str()), None);
    }

    let tx = match conn.unchecked_transaction() {
        Ok(t) => t,
        Err(e) => return err(&req.id, "db_tx_failed", e.to_string(), None),
    };

    // Explicitly delete in dependency order (no ON DELETE CASCADE).
    let owner = Owner::new(kind, id.clone());
    let steps = [
        (
            kind.table(),
            format!("DELETE FROM {} WHERE {} = ?", kind.table(), kind.owner_column()),
            id.clone(),
        ),
        (
            "timetable_revisions",
            "DELETE FROM timetable_revisions WHERE owner_key = ?".to_string(),
            owner.key(),
        ),
        (
            kind.owner_table(),
            format!("DELETE FROM {} WHERE id = ?", kind.owner_table()),
            id.clone(),
        ),
    ];
    for (table, sql, arg) in &steps {
        if let Err(e) = tx.execute(sql, [arg]) {
            let _ = tx.rollback();
            return err(
                &req.id,
                "db_delete_failed",
                e.to_string(),
                Some(json!({ "table": table })),
            );
        }
    }
    if let Err(e) = tx.commit() {
        return err(&req.id, "db_commit_failed", e.to_string(), None);
    }

    state.sessions.remove(&owner.key());
    ok(&req.id, json!({ "ok": true }))
}

pub fn try_handle(state: &mut AppState, req: &Request) -> Option<serde_json::Value> {
    match req.method.as_str() {
        "classes.list" => Some(handle_list(state, req, OwnerKind::Class)),
        "classes.create" => Some(handle_create(state, req, OwnerKind::Class)),
        "classes.delete" => Some(handle_delete(state, req, OwnerKind::Class)),
        "faculty.list" => Some(handle_list(state, req, OwnerKind::Faculty)),
        "faculty.create" => Some(handle_create(state, req, OwnerKind::Faculty)),
        "faculty.delete" => Some(handle_delete(state, req, OwnerKind::Faculty)),
        _ => None,
    }
}
