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

fn error_code(value: &serde_json::Value) -> &str {
    assert_eq!(value.get("ok").and_then(|v| v.as_bool()), Some(false), "{}", value);
    value
        .get("error")
        .and_then(|e| e.get("code"))
        .and_then(|v| v.as_str())
        .unwrap_or("")
}

#[test]
fn router_dispatch_smoke_covers_handler_families() {
    let workspace = temp_dir("timetabled-router-smoke");
    let sample_out = workspace.join("sample.csv");

    let (mut child, mut stdin, mut reader) = spawn_sidecar();

    let health = request_ok(&mut stdin, &mut reader, "1", "health", json!({}));
    assert!(health.get("version").and_then(|v| v.as_str()).is_some());
    assert!(health.get("workspacePath").map(|v| v.is_null()).unwrap_or(false));

    let before = request(&mut stdin, &mut reader, "2", "timetable.get", json!({
        "ownerKind": "class", "ownerId": "x"
    }));
    assert_eq!(error_code(&before), "no_workspace");

    let _ = request_ok(
        &mut stdin,
        &mut reader,
        "3",
        "workspace.select",
        json!({ "path": workspace.to_string_lossy() }),
    );
    let created = request_ok(
        &mut stdin,
        &mut reader,
        "4",
        "classes.create",
        json!({ "name": "IT-2A" }),
    );
    let class_id = created["classId"].as_str().expect("classId").to_string();
    let faculty = request_ok(
        &mut stdin,
        &mut reader,
        "5",
        "faculty.create",
        json!({ "name": "Dr. Patel" }),
    );
    assert!(faculty["facultyId"].as_str().is_some());

    let classes = request_ok(&mut stdin, &mut reader, "6", "classes.list", json!({}));
    assert_eq!(classes["classes"][0]["name"], "IT-2A");
    assert_eq!(classes["classes"][0]["timetableRows"], 0);
    let list = request_ok(&mut stdin, &mut reader, "7", "faculty.list", json!({}));
    assert_eq!(list["faculty"].as_array().map(|a| a.len()), Some(1));

    let view = request_ok(
        &mut stdin,
        &mut reader,
        "8",
        "timetable.open",
        json!({ "ownerKind": "class", "ownerId": class_id }),
    );
    assert_eq!(view["days"].as_array().map(|a| a.len()), Some(6));
    assert_eq!(view["slots"].as_array().map(|a| a.len()), Some(6));
    assert_eq!(view["hasData"], false);
    assert_eq!(view["revision"], 0);
    assert_eq!(view["mode"], "rich");
    assert!(view["notice"].is_null());

    let missing = request(
        &mut stdin,
        &mut reader,
        "9",
        "timetable.open",
        json!({ "ownerKind": "class", "ownerId": "nope" }),
    );
    assert_eq!(error_code(&missing), "not_found");

    let bad_kind = request(
        &mut stdin,
        &mut reader,
        "10",
        "timetable.open",
        json!({ "ownerKind": "student", "ownerId": class_id }),
    );
    assert_eq!(error_code(&bad_kind), "bad_params");

    let schema = request_ok(
        &mut stdin,
        &mut reader,
        "11",
        "timetable.schema",
        json!({ "ownerKind": "faculty" }),
    );
    assert_eq!(schema["capability"], "rich");
    assert_eq!(schema["missingColumns"].as_array().map(|a| a.len()), Some(0));

    let sample = request_ok(
        &mut stdin,
        &mut reader,
        "12",
        "timetable.sampleCsv",
        json!({ "outPath": sample_out.to_string_lossy() }),
    );
    assert_eq!(sample["fileName"], "sample_timetable.csv");
    let written = std::fs::read_to_string(&sample_out).expect("sample written");
    assert!(written.starts_with("day,slot,course,professor,room\n"));

    let setup = request_ok(&mut stdin, &mut reader, "13", "setup.get", json!({}));
    assert_eq!(setup["timetable"]["defaultBatchCount"], 2);

    let unknown = request(&mut stdin, &mut reader, "14", "grades.open", json!({}));
    assert_eq!(error_code(&unknown), "not_implemented");

    let _ = request_ok(
        &mut stdin,
        &mut reader,
        "15",
        "classes.delete",
        json!({ "classId": class_id }),
    );
    let gone = request(
        &mut stdin,
        &mut reader,
        "16",
        "timetable.get",
        json!({ "ownerKind": "class", "ownerId": class_id }),
    );
    assert_eq!(error_code(&gone), "not_found");

    drop(stdin);
    let _ = child.wait();
    let _ = std::fs::remove_dir_all(workspace);
}

#[test]
fn malformed_line_gets_bad_json_without_id() {
    let (mut child, mut stdin, mut reader) = spawn_sidecar();
    writeln!(stdin, "{{not json").expect("write");
    stdin.flush().expect("flush");
    let mut line = String::new();
    reader.read_line(&mut line).expect("read");
    let value: serde_json::Value = serde_json::from_str(line.trim()).expect("json");
    assert_eq!(value["ok"], false);
    assert_eq!(value["error"]["code"], "bad_json");
    assert!(value.get("id").is_none());

    // The sidecar keeps serving after a bad line.
    let _ = request_ok(&mut stdin, &mut reader, "1", "health", json!({}));
    drop(stdin);
    let _ = child.wait();
}
