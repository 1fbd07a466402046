use rusqlite::Connection;
use serde_json::json;
use std::io::{BufRead, BufReader, Write};
use std::path::PathBuf;
use std::process::{Child, ChildStdin, ChildStdout, Command, Stdio};
use std::time::{SystemTime, UNIX_EPOCH};

fn temp_dir(prefix: &str) -> PathBuf {
    let p = std::env::temp_dir().join(format!(
        "{}-{}",
        prefix,
        SystemTime::now()
            .duration_since(UNIX_EPOCH)
            .expect("clock")
            .as_nanos()
    ));
    std::fs::create_dir_all(&p).expect("create temp dir");
    p
}

fn spawn_sidecar() -> (Child, ChildStdin, BufReader<ChildStdout>) {
    let exe = env!("CARGO_BIN_EXE_timetabled");
    let mut child = Command::new(exe)
        .stdin(Stdio::piped())
        .stdout(Stdio::piped())
        .stderr(Stdio::null())
        .spawn()
        .expect("spawn timetabled");
    let stdin = child.stdin.take().expect("child stdin");
    let stdout = child.stdout.take().expect("child stdout");
    (child, stdin, BufReader::new(stdout))
}

fn request(
    stdin: &mut ChildStdin,
    reader: &mut BufReader<ChildStdout>,
    id: &str,
    method: &str,
    params: serde_json::Value,
) -> serde_json::Value {
    let payload = json!({
        "id": id,
        "method": method,
        "params": params,
    });
    writeln!(stdin, "{}", payload).expect("write request");
    stdin.flush().expect("flush request");

    let mut line = String::new();
    reader.read_line(&mut line).expect("read response line");
    assert!(!line.trim().is_empty(), "empty response for {}", method);
    let value: serde_json::Value = serde_json::from_str(line.trim()).expect("parse response json");
    assert_eq!(value.get("id").and_then(|v| v.as_str()), Some(id));
    value
}

fn request_ok(
    stdin: &mut ChildStdin,
    reader: &mut BufReader<ChildStdout>,
    id: &str,
    method: &str,
    params: serde_json::Value,
) -> serde_json::Value {
    let value = request(stdin, reader, id, method, params);
    assert!(
        value.get("ok").and_then(|v| v.as_bool()).unwrap_or(false),
        "{} failed: {}",
        method,
        value
    );
    value.get("result").cloned().unwrap_or_else(|| json!({}))
}

/// A workspace whose class timetable table predates lab support.
fn basic_workspace(prefix: &str) -> PathBuf {
    let workspace = temp_dir(prefix);
    let conn = Connection::open(workspace.join("timetabled.sqlite3")).expect("open sqlite");
    conn.execute_batch(
        "CREATE TABLE classes(id TEXT PRIMARY KEY, name TEXT NOT NULL);
         CREATE TABLE class_timetables(
           class_id TEXT NOT NULL,
           day_index INTEGER NOT NULL,
           slot_index INTEGER NOT NULL,
           course TEXT,
           professor TEXT,
           room TEXT
         );
         INSERT INTO classes(id, name) VALUES('c-old', 'IT-1A');
         INSERT INTO class_timetables VALUES('c-old', 0, 0, 'IT101', '(ARP)', '101');",
    )
    .expect("seed basic schema");
    workspace
}

fn stored_rows(workspace: &std::path::Path) -> i64 {
    let conn = Connection::open(workspace.join("timetabled.sqlite3")).expect("open sqlite");
    conn.query_row(
        "SELECT COUNT(*) FROM class_timetables WHERE class_id = 'c-old'",
        [],
        |r| r.get(0),
    )
    .expect("count rows")
}

#[test]
fn basic_table_loads_and_saves_without_lab_columns() {
    let workspace = basic_workspace("timetabled-basic");
    let (mut child, mut stdin, mut reader) = spawn_sidecar();
    let selected = request_ok(
        &mut stdin,
        &mut reader,
        "ws",
        "workspace.select",
        json!({ "path": workspace.to_string_lossy() }),
    );
    assert_eq!(selected["migratedTables"].as_array().map(|a| a.len()), Some(0));

    let class_schema = request_ok(
        &mut stdin,
        &mut reader,
        "sc",
        "timetable.schema",
        json!({ "ownerKind": "class" }),
    );
    assert_eq!(class_schema["capability"], "basic");
    assert_eq!(class_schema["missingColumns"], json!(["is_lab", "batch_number", "lab_id"]));
    let faculty_schema = request_ok(
        &mut stdin,
        &mut reader,
        "sf",
        "timetable.schema",
        json!({ "ownerKind": "faculty" }),
    );
    assert_eq!(faculty_schema["capability"], "rich");

    let owner = json!({ "ownerKind": "class", "ownerId": "c-old" });
    let opened = request_ok(&mut stdin, &mut reader, "open", "timetable.open", owner.clone());
    assert_eq!(opened["mode"], "basic");
    assert_eq!(opened["notice"], "loaded in basic mode");
    assert_eq!(opened["cells"][0][0]["course"], "IT101");

    let mut lab = owner.clone();
    lab["day"] = json!(1);
    lab["slot"] = json!(2);
    let _ = request_ok(&mut stdin, &mut reader, "lab", "timetable.enableLab", lab.clone());
    for (i, course) in ["Lab A", "Lab B"].iter().enumerate() {
        let mut p = lab.clone();
        p["batchIndex"] = json!(i);
        p["field"] = json!("course");
        p["value"] = json!(course);
        let _ = request_ok(&mut stdin, &mut reader, &format!("b{}", i), "timetable.setBatchField", p);
    }

    let saved = request_ok(&mut stdin, &mut reader, "save", "timetable.save", owner.clone());
    assert_eq!(saved["mode"], "basic");
    assert_eq!(saved["notice"], "saved in basic mode");
    assert_eq!(saved["rowsWritten"], 3);
    assert_eq!(stored_rows(&workspace), 3);

    // Batches come back as plain slot data; one of them wins the cell.
    let reopened = request_ok(&mut stdin, &mut reader, "reopen", "timetable.open", owner.clone());
    assert_eq!(reopened["cells"][1][2]["kind"], "regular");
    let course = reopened["cells"][1][2]["course"].as_str().unwrap_or_default().to_string();
    assert!(course == "Lab A" || course == "Lab B", "{}", course);
    assert_eq!(reopened["cells"][0][0]["room"], "101");

    let migrated = request_ok(
        &mut stdin,
        &mut reader,
        "mig",
        "timetable.migrateSchema",
        json!({ "ownerKind": "class" }),
    );
    assert_eq!(migrated["addedColumns"], json!(["is_lab", "batch_number", "lab_id"]));
    let again = request_ok(
        &mut stdin,
        &mut reader,
        "mig2",
        "timetable.migrateSchema",
        json!({ "ownerKind": "class" }),
    );
    assert_eq!(again["addedColumns"], json!([]));

    let _ = request_ok(&mut stdin, &mut reader, "lab2", "timetable.enableLab", lab.clone());
    let mut p = lab.clone();
    p["batchIndex"] = json!(0);
    p["field"] = json!("room");
    p["value"] = json!("107");
    let _ = request_ok(&mut stdin, &mut reader, "b-room", "timetable.setBatchField", p);
    let rich = request_ok(&mut stdin, &mut reader, "save2", "timetable.save", owner.clone());
    assert_eq!(rich["mode"], "rich");
    assert!(rich["notice"].is_null());

    let view = request_ok(&mut stdin, &mut reader, "open2", "timetable.open", owner);
    assert_eq!(view["mode"], "rich");
    assert_eq!(view["cells"][1][2]["kind"], "lab");
    assert_eq!(view["cells"][1][2]["batches"][0]["room"], "107");

    drop(stdin);
    let _ = child.wait();
    let _ = std::fs::remove_dir_all(workspace);
}

#[test]
fn auto_migrate_setting_upgrades_on_next_select() {
    let workspace = basic_workspace("timetabled-automigrate");
    let (mut child, mut stdin, mut reader) = spawn_sidecar();
    let ws = json!({ "path": workspace.to_string_lossy() });
    let _ = request_ok(&mut stdin, &mut reader, "ws1", "workspace.select", ws.clone());
    let _ = request_ok(
        &mut stdin,
        &mut reader,
        "set",
        "setup.update",
        json!({ "section": "timetable", "patch": { "autoMigrateLabColumns": true } }),
    );

    let selected = request_ok(&mut stdin, &mut reader, "ws2", "workspace.select", ws);
    assert_eq!(selected["migratedTables"], json!(["class_timetables"]));
    let schema = request_ok(
        &mut stdin,
        &mut reader,
        "sc",
        "timetable.schema",
        json!({ "ownerKind": "class" }),
    );
    assert_eq!(schema["capability"], "rich");

    // Pre-existing rows read back as regular slots.
    let opened = request_ok(
        &mut stdin,
        &mut reader,
        "open",
        "timetable.open",
        json!({ "ownerKind": "class", "ownerId": "c-old" }),
    );
    assert_eq!(opened["mode"], "rich");
    assert_eq!(opened["cells"][0][0]["kind"], "regular");
    assert_eq!(opened["cells"][0][0]["course"], "IT101");

    drop(stdin);
    let _ = child.wait();
    let _ = std::fs::remove_dir_all(workspace);
}

#[test]
fn failed_auto_migration_keeps_previous_workspace() {
    let previous = temp_dir("timetabled-previous");
    let locked = basic_workspace("timetabled-locked");
    let (mut child, mut stdin, mut reader) = spawn_sidecar();
    let prev_ws = json!({ "path": previous.to_string_lossy() });
    let locked_ws = json!({ "path": locked.to_string_lossy() });

    let _ = request_ok(&mut stdin, &mut reader, "lk1", "workspace.select", locked_ws.clone());
    let _ = request_ok(
        &mut stdin,
        &mut reader,
        "set",
        "setup.update",
        json!({ "section": "timetable", "patch": { "autoMigrateLabColumns": true } }),
    );
    let _ = request_ok(&mut stdin, &mut reader, "prev", "workspace.select", prev_ws);
    let _ = request_ok(&mut stdin, &mut reader, "mk", "classes.create", json!({ "name": "IT-9" }));

    // Another writer holds the database, so adding the lab columns fails.
    let lock = Connection::open(locked.join("timetabled.sqlite3")).expect("open sqlite");
    lock.execute_batch("BEGIN IMMEDIATE").expect("take write lock");
    let failed = request(&mut stdin, &mut reader, "lk2", "workspace.select", locked_ws);
    assert_eq!(failed["ok"], false, "{}", failed);
    assert_eq!(failed["error"]["code"], "db_migrate_failed");
    lock.execute_batch("ROLLBACK").expect("release write lock");

    let health = request_ok(&mut stdin, &mut reader, "h", "health", json!({}));
    assert_eq!(health["workspacePath"], json!(previous.to_string_lossy()));
    let classes = request_ok(&mut stdin, &mut reader, "list", "classes.list", json!({}));
    assert_eq!(classes["classes"][0]["name"], "IT-9");

    drop(stdin);
    let _ = child.wait();
    let _ = std::fs::remove_dir_all(previous);
    let _ = std::fs::remove_dir_all(locked);
}
