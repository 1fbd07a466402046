use crate::timetable::error::{GatewayError, GridError, ImportError};
use serde_json::{json, Value};

pub fn ok(id: &str, result: Value) -> Value {
    json!({
        "id": id,
        "ok": true,
        "result": result
    })
}

pub fn err(id: &str, code: &str, message: impl Into<String>, details: Option<Value>) -> Value {
    let mut error = json!({
        "code": code,
        "message": message.into(),
    });
    if let Some(d) = details {
        error["details"] = d;
    }
    json!({
        "id": id,
        "ok": false,
        "error": error,
    })
}

/// Failure of a handler step, rendered with [`err`] once the request id is known.
pub struct HandlerErr {
    code: &'static str,
    message: String,
    details: Option<Value>,
}

impl HandlerErr {
    pub fn new(code: &'static str, message: impl Into<String>) -> Self {
        HandlerErr {
            code,
            message: message.into(),
            details: None,
        }
    }

    pub fn response(self, id: &str) -> Value {
        err(id, self.code, self.message, self.details)
    }
}

impl From<GridError> for HandlerErr {
    fn from(e: GridError) -> Self {
        HandlerErr::new("grid_contract", e.to_string())
    }
}

impl From<ImportError> for HandlerErr {
    fn from(e: ImportError) -> Self {
        let details = match &e {
            ImportError::InvalidHeader { expected, found } => {
                Some(json!({ "expected": expected, "found": found }))
            }
            ImportError::NoValidRows { skipped } => Some(json!({ "skipped": skipped })),
            _ => None,
        };
        HandlerErr {
            code: e.code(),
            message: e.to_string(),
            details,
        }
    }
}

/// `store_code` names the failed store operation for store errors.
pub fn gateway_err(e: GatewayError, store_code: &'static str) -> HandlerErr {
    match e {
        GatewayError::Store(s) => HandlerErr::new(store_code, s.message),
        GatewayError::Grid(g) => g.into(),
        GatewayError::Conflict { expected, actual } => HandlerErr {
            code: "conflict",
            message: format!(
                "timetable changed since it was opened (expected revision {}, found {})",
                expected, actual
            ),
            details: Some(json!({ "expectedRevision": expected, "actualRevision": actual })),
        },
    }
}
