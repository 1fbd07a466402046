use rusqlite::{Connection, OptionalExtension};
use serde_json::Value;
use std::path::Path;
use tracing::info;

pub const DB_FILE_NAME: &str = "timetabled.sqlite3";

pub fn open_db(workspace: &Path) -> anyhow::Result<Connection> {
    std::fs::create_dir_all(workspace)?;
    let db_path = workspace.join(DB_FILE_NAME);
    let conn = Connection::open(db_path)?;
    conn.execute("PRAGMA foreign_keys = ON", [])?;

    conn.execute(
        "CREATE TABLE IF NOT EXISTS classes(
            id TEXT PRIMARY KEY,
            name TEXT NOT NULL,
            timetable_url TEXT,
            timetable_path TEXT
        )",
        [],
    )?;
    conn.execute(
        "CREATE TABLE IF NOT EXISTS faculty(
            id TEXT PRIMARY KEY,
            name TEXT NOT NULL,
            timetable_url TEXT,
            timetable_path TEXT
        )",
        [],
    )?;
    // Older workspaces lack the upload columns; timetable_path came after timetable_url.
    for table in ["classes", "faculty"] {
        ensure_text_column(&conn, table, "timetable_url")?;
        ensure_text_column(&conn, table, "timetable_path")?;
    }

    // An existing table keeps whatever shape it has; lab columns are only
    // added on request (see ensure_timetable_lab_columns).
    conn.execute(
        "CREATE TABLE IF NOT EXISTS class_timetables(
            class_id TEXT NOT NULL,
            day_index INTEGER NOT NULL,
            slot_index INTEGER NOT NULL,
            course TEXT NOT NULL DEFAULT '',
            professor TEXT NOT NULL DEFAULT '',
            room TEXT NOT NULL DEFAULT '',
            is_lab INTEGER NOT NULL DEFAULT 0,
            batch_number INTEGER,
            lab_id TEXT,
            FOREIGN KEY(class_id) REFERENCES classes(id)
        )",
        [],
    )?;
    conn.execute(
        "CREATE INDEX IF NOT EXISTS idx_class_timetables_class ON class_timetables(class_id)",
        [],
    )?;

    conn.execute(
        "CREATE TABLE IF NOT EXISTS faculty_timetables(
            faculty_id TEXT NOT NULL,
            day_index INTEGER NOT NULL,
            slot_index INTEGER NOT NULL,
            course TEXT NOT NULL DEFAULT '',
            room TEXT NOT NULL DEFAULT '',
            class_name TEXT NOT NULL DEFAULT '',
            is_lab INTEGER NOT NULL DEFAULT 0,
            batch_number INTEGER,
            lab_id TEXT,
            FOREIGN KEY(faculty_id) REFERENCES faculty(id)
        )",
        [],
    )?;
    conn.execute(
        "CREATE INDEX IF NOT EXISTS idx_faculty_timetables_faculty ON faculty_timetables(faculty_id)",
        [],
    )?;

    conn.execute(
        "CREATE TABLE IF NOT EXISTS timetable_revisions(
            owner_key TEXT PRIMARY KEY,
            revision INTEGER NOT NULL
        )",
        [],
    )?;

    conn.execute(
        "CREATE TABLE IF NOT EXISTS settings(
            key TEXT PRIMARY KEY,
            value_json TEXT NOT NULL
        )",
        [],
    )?;

    Ok(conn)
}

fn ensure_text_column(conn: &Connection, table: &str, column: &str) -> anyhow::Result<()> {
    if table_has_column(conn, table, column)? {
        return Ok(());
    }
    conn.execute(
        &format!("ALTER TABLE {} ADD COLUMN {} TEXT", table, column),
        [],
    )?;
    Ok(())
}

/// Adds the lab columns to a basic timetable table. Returns the columns added.
pub fn ensure_timetable_lab_columns(conn: &Connection, table: &str) -> anyhow::Result<Vec<&'static str>> {
    let mut added = Vec::new();
    if !table_has_column(conn, table, "is_lab")? {
        conn.execute(
            &format!("ALTER TABLE {} ADD COLUMN is_lab INTEGER NOT NULL DEFAULT 0", table),
            [],
        )?;
        added.push("is_lab");
    }
    if !table_has_column(conn, table, "batch_number")? {
        conn.execute(
            &format!("ALTER TABLE {} ADD COLUMN batch_number INTEGER", table),
            [],
        )?;
        added.push("batch_number");
    }
    if !table_has_column(conn, table, "lab_id")? {
        conn.execute(&format!("ALTER TABLE {} ADD COLUMN lab_id TEXT", table), [])?;
        added.push("lab_id");
    }
    if !added.is_empty() {
        info!(table, ?added, "added lab columns");
    }
    Ok(added)
}

fn table_has_column(conn: &Connection, table: &str, column: &str) -> anyhow::Result<bool> {
    let sql = format!("PRAGMA table_info({})", table);
    let mut stmt = conn.prepare(&sql)?;
    let mut rows = stmt.query([])?;
    while let Some(row) = rows.next()? {
        let name: String = row.get(1)?;
        if name == column {
            return Ok(true);
        }
    }
    Ok(false)
}

pub fn settings_get_json(conn: &Connection, key: &str) -> anyhow::Result<Option<Value>> {
    let raw: Option<String> = conn
        .query_row(
            "SELECT value_json FROM settings WHERE key = ?",
            [key],
            |r| r.get(0),
        )
        .optional()?;
    match raw {
        Some(s) => Ok(Some(serde_json::from_str(&s)?)),
        None => Ok(None),
    }
}

pub fn settings_set_json(conn: &Connection, key: &str, value: &Value) -> anyhow::Result<()> {
    conn.execute(
        "INSERT INTO settings(key, value_json) VALUES(?, ?)
         ON CONFLICT(key) DO UPDATE SET value_json = excluded.value_json",
        (key, serde_json::to_string(value)?),
    )?;
    Ok(())
}
