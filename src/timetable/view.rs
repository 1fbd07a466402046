//! Render-ready JSON projection of a timetable.

use super::fallback::StorageMode;
use super::grid::Timetable;
use super::lab::is_continuation;
use super::{Day, Slot, SLOT_LABELS};
use serde_json::{json, Value};

/// `cells[day][slot]`; a slot right after an enabled lab carries `continued: true`.
pub fn render(timetable: &Timetable, revision: i64, mode: StorageMode) -> Value {
    let owner = timetable.owner();
    let cells: Vec<Value> = Day::all()
        .map(|d| {
            Value::Array(
                Slot::all()
                    .map(|s| {
                        let mut cell = timetable.grid.cell_json(d, s);
                        cell["continued"] = json!(is_continuation(&timetable.labs, d, s));
                        cell
                    })
                    .collect(),
            )
        })
        .collect();
    let slots: Vec<Value> = Slot::all()
        .map(|s| json!({ "index": s.index(), "label": s.label() }))
        .collect();

    json!({
        "owner": { "kind": owner.kind, "id": owner.id },
        "days": Day::all().map(Day::name).collect::<Vec<_>>(),
        "slots": slots,
        "slotLabels": SLOT_LABELS,
        "cells": cells,
        "labs": timetable.labs.to_json(),
        "hasData": timetable.grid.has_data(),
        "revision": revision,
        "mode": mode,
    })
}
