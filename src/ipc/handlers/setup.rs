use crate::db;
use crate::ipc::error::{err, ok};
use crate::ipc::types::{AppState, Request};
use crate::timetable::lab::LabSpanPolicy;
use serde::Deserialize;
use serde_json::{json, Map, Value};

#[derive(Clone, Copy)]
enum SetupSection {
    Timetable,
}

impl SetupSection {
    const ALL: [SetupSection; 1] = [SetupSection::Timetable];

    fn parse(s: &str) -> Option<Self> {
        match s {
            "timetable" => Some(Self::Timetable),
            _ => None,
        }
    }

    fn name(self) -> &'static str {
        match self {
            Self::Timetable => "timetable",
        }
    }

    fn key(self) -> &'static str {
        match self {
            Self::Timetable => "setup.timetable",
        }
    }
}

fn default_section(section: SetupSection) -> Value {
    match section {
        SetupSection::Timetable => json!({
            "defaultBatchCount": 2,
            "maxBatchCount": 4,
            "labSpanPolicy": "display",
            "autoMigrateLabColumns": false,
            "publicUrlBase": ""
        }),
    }
}

/// Typed view of the `timetable` section.
#[derive(Debug, Clone, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct TimetableSettings {
    pub default_batch_count: usize,
    pub max_batch_count: usize,
    pub lab_span_policy: LabSpanPolicy,
    pub auto_migrate_lab_columns: bool,
    pub public_url_base: String,
}

fn as_object_mut(value: &mut Value) -> Result<&mut Map<String, Value>, String> {
    value
        .as_object_mut()
        .ok_or_else(|| "internal setup object must be a JSON object".to_string())
}

fn parse_bool(v: &Value, key: &str) -> Result<bool, String> {
    v.as_bool()
        .ok_or_else(|| format!("{} must be boolean", key))
}

fn parse_i64_range(v: &Value, key: &str, min: i64, max: i64) -> Result<i64, String> {
    let n = v
        .as_i64()
        .ok_or_else(|| format!("{} must be integer", key))?;
    if !(min..=max).contains(&n) {
        return Err(format!("{} must be in {}..={}", key, min, max));
    }
    Ok(n)
}

fn parse_string_max(v: &Value, key: &str, max_len: usize) -> Result<String, String> {
    let s = v.as_str().ok_or_else(|| format!("{} must be string", key))?;
    let s = s.trim();
    if s.len() > max_len {
        return Err(format!("{} length must be <= {}", key, max_len));
    }
    Ok(s.to_string())
}

fn merge_section_patch(
    section: SetupSection,
    current: &mut Value,
    patch: &Map<String, Value>,
) -> Result<(), String> {
    let obj = as_object_mut(current)?;
    for (k, v) in patch {
        match section {
            SetupSection::Timetable => match k.as_str() {
                "defaultBatchCount" | "maxBatchCount" => {
                    obj.insert(k.clone(), Value::from(parse_i64_range(v, k, 1, 8)?));
                }
                "labSpanPolicy" => {
                    let p = parse_string_max(v, k, 16)?.to_ascii_lowercase();
                    let Some(policy) = LabSpanPolicy::parse(&p) else {
                        return Err("labSpanPolicy must be one of: display, enforced".into());
                    };
                    obj.insert(k.clone(), Value::String(policy.as_str().to_string()));
                }
                "autoMigrateLabColumns" => {
                    obj.insert(k.clone(), Value::Bool(parse_bool(v, k)?));
                }
                "publicUrlBase" => {
                    obj.insert(k.clone(), Value::String(parse_string_max(v, k, 200)?));
                }
                _ => return Err(format!("unknown timetable field: {}", k)),
            },
        }
    }
    match section {
        SetupSection::Timetable => {
            let default_n = obj.get("defaultBatchCount").and_then(Value::as_i64);
            let max_n = obj.get("maxBatchCount").and_then(Value::as_i64);
            if let (Some(d), Some(m)) = (default_n, max_n) {
                if d > m {
                    return Err("defaultBatchCount must not exceed maxBatchCount".into());
                }
            }
        }
    }
    Ok(())
}

fn load_section(conn: &rusqlite::Connection, section: SetupSection) -> anyhow::Result<Value> {
    let mut current = default_section(section);
    if let Some(saved) = db::settings_get_json(conn, section.key())? {
        if let Some(saved_obj) = saved.as_object() {
            // Malformed historical values must not block setup.
            let _ = merge_section_patch(section, &mut current, saved_obj);
        }
    }
    Ok(current)
}

pub fn load_timetable_settings(conn: &rusqlite::Connection) -> anyhow::Result<TimetableSettings> {
    let value = load_section(conn, SetupSection::Timetable)?;
    Ok(serde_json::from_value(value)?)
}

fn handle_setup_get(state: &mut AppState, req: &Request) -> serde_json::Value {
    let Some(conn) = state.db.as_ref() else {
        return err(&req.id, "no_workspace", "select a workspace first", None);
    };
    let mut out = Map::new();
    for section in SetupSection::ALL {
        match load_section(conn, section) {
            Ok(v) => {
                out.insert(section.name().to_string(), v);
            }
            Err(e) => return err(&req.id, "db_query_failed", e.to_string(), None),
        }
    }
    ok(&req.id, Value::Object(out))
}

fn handle_setup_update(state: &mut AppState, req: &Request) -> serde_json::Value {
    let Some(conn) = state.db.as_ref() else {
        return err(&req.id, "no_workspace", "select a workspace first", None);
    };
    let Some(section_raw) = req.params.get("section").and_then(|v| v.as_str()) else {
        return err(&req.id, "bad_params", "missing section", None);
    };
    let Some(section) = SetupSection::parse(section_raw) else {
        return err(&req.id, "bad_params", "unknown section", None);
    };
    let Some(patch_obj) = req.params.get("patch").and_then(|v| v.as_object()) else {
        return err(&req.id, "bad_params", "patch must be an object", None);
    };

    let mut current = match load_section(conn, section) {
        Ok(v) => v,
        Err(e) => return err(&req.id, "db_query_failed", e.to_string(), None),
    };
    if let Err(msg) = merge_section_patch(section, &mut current, patch_obj) {
        return err(&req.id, "bad_params", msg, None);
    }
    if let Err(e) = db::settings_set_json(conn, section.key(), &current) {
        return err(&req.id, "db_update_failed", e.to_string(), None);
    }
    ok(&req.id, json!({ "ok": true }))
}

pub fn try_handle(state: &mut AppState, req: &Request) -> Option<serde_json::Value> {
    match req.method.as_str() {
        "setup.get" => Some(handle_setup_get(state, req)),
        "setup.update" => Some(handle_setup_update(state, req)),
        _ => None,
    }
}
