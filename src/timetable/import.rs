//! Bulk import of timetable files.
//!
//! Class timetables use a 5-column table (`day,slot,course,professor,room`), one
//! row per slot. Faculty timetables use a day-by-slot layout whose cells hold
//! `course|room|class_name`.

use super::error::ImportError;
use super::grid::{SlotAssignment, SlotCell, TimetableGrid};
use super::{Day, Owner, Slot, SLOT_COUNT};
use calamine::{open_workbook_auto_from_rs, Reader};
use serde::Serialize;
use std::io::Cursor;
use tracing::{debug, warn};

pub const CLASS_IMPORT_HEADER: [&str; 5] = ["day", "slot", "course", "professor", "room"];

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ImportFormat {
    Csv,
    Spreadsheet,
}

impl ImportFormat {
    pub fn from_file_name(file_name: &str) -> Result<Self, ImportError> {
        let lower = file_name.to_ascii_lowercase();
        if lower.ends_with(".csv") {
            Ok(Self::Csv)
        } else if lower.ends_with(".xlsx") || lower.ends_with(".xls") {
            Ok(Self::Spreadsheet)
        } else {
            Err(ImportError::UnsupportedFormat {
                file_name: file_name.to_string(),
            })
        }
    }
}

/// A row of the table paired with its 1-based position in the file.
type NumberedRow = (usize, Vec<String>);

/// Reads every row of the file, empty ones included, with cells trimmed.
pub fn read_rows(file_name: &str, bytes: &[u8]) -> Result<Vec<Vec<String>>, ImportError> {
    match ImportFormat::from_file_name(file_name)? {
        ImportFormat::Csv => {
            let text = std::str::from_utf8(bytes).map_err(|e| ImportError::Unreadable {
                message: e.to_string(),
            })?;
            Ok(parse_csv(text))
        }
        ImportFormat::Spreadsheet => read_spreadsheet(bytes),
    }
}

/// Splits CSV text into records. A quoted cell may span lines; `\r\n` reads as `\n`.
fn parse_csv(text: &str) -> Vec<Vec<String>> {
    let text = text.strip_prefix('\u{feff}').unwrap_or(text);
    let mut rows = Vec::new();
    let mut row = Vec::new();
    let mut current = String::new();
    let mut in_quotes = false;
    let mut chars = text.chars().peekable();

    while let Some(c) = chars.next() {
        match c {
            '"' if in_quotes && chars.peek() == Some(&'"') => {
                current.push('"');
                chars.next();
            }
            '"' => in_quotes = !in_quotes,
            ',' if !in_quotes => row.push(take_cell(&mut current)),
            '\r' if chars.peek() == Some(&'\n') => {}
            '\n' if !in_quotes => {
                row.push(take_cell(&mut current));
                rows.push(std::mem::take(&mut row));
            }
            _ => current.push(c),
        }
    }
    row.push(take_cell(&mut current));
    rows.push(row);
    rows
}

fn take_cell(current: &mut String) -> String {
    std::mem::take(current).trim().to_string()
}

/// First worksheet as text rows, padded so cell positions match the sheet.
fn read_spreadsheet(bytes: &[u8]) -> Result<Vec<Vec<String>>, ImportError> {
    let unreadable = |e: calamine::Error| ImportError::Unreadable {
        message: e.to_string(),
    };
    let mut workbook = open_workbook_auto_from_rs(Cursor::new(bytes.to_vec())).map_err(unreadable)?;
    let range = match workbook.worksheet_range_at(0) {
        Some(r) => r.map_err(unreadable)?,
        None => return Ok(Vec::new()),
    };
    let Some((start_row, start_col)) = range.start() else {
        return Ok(Vec::new());
    };

    let mut rows: Vec<Vec<String>> = vec![Vec::new(); start_row as usize];
    for r in range.rows() {
        let mut cells = vec![String::new(); start_col as usize];
        cells.extend(r.iter().map(|c| c.to_string().trim().to_string()));
        rows.push(cells);
    }
    Ok(rows)
}

fn is_empty_row(row: &[String]) -> bool {
    row.iter().all(|c| c.is_empty())
}

/// One slot produced by a class import. Imported slots are never labs.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ImportRow {
    pub day: Day,
    pub slot: Slot,
    pub course: String,
    pub professor: String,
    pub room: String,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "camelCase")]
pub enum SkipReason {
    MissingDayOrSlot,
    InvalidDayOrSlot,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct SkippedRow {
    pub line: usize,
    pub day: String,
    pub slot: String,
    pub reason: SkipReason,
}

#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct ClassImport {
    pub rows: Vec<ImportRow>,
    pub skipped: Vec<SkippedRow>,
}

pub fn parse_class_timetable(file_name: &str, bytes: &[u8]) -> Result<ClassImport, ImportError> {
    let rows = read_rows(file_name, bytes)?;
    class_rows_from_table(rows)
}

/// Validates the header and turns data rows into import rows. Rows with an
/// unknown day or slot are skipped, not fatal.
pub fn class_rows_from_table(rows: Vec<Vec<String>>) -> Result<ClassImport, ImportError> {
    let mut rows: Vec<NumberedRow> = rows
        .into_iter()
        .enumerate()
        .map(|(i, r)| (i + 1, r))
        .filter(|(_, r)| !is_empty_row(r))
        .collect();
    if rows.is_empty() {
        return Err(ImportError::EmptyFile);
    }

    let (_, header) = rows.remove(0);
    let normalized: Vec<String> = header.iter().map(|h| h.trim().to_lowercase()).collect();
    let valid = CLASS_IMPORT_HEADER
        .iter()
        .enumerate()
        .all(|(i, col)| normalized.get(i).map(String::as_str) == Some(*col));
    if !valid {
        return Err(ImportError::InvalidHeader {
            expected: CLASS_IMPORT_HEADER.join(","),
            found: normalized,
        });
    }
    if rows.is_empty() {
        return Err(ImportError::NoDataRows);
    }

    let mut out = ClassImport::default();
    for (line, r) in rows {
        let cell = |i: usize| r.get(i).map(|c| c.trim().to_string()).unwrap_or_default();
        let day_raw = cell(0);
        let slot_raw = cell(1);
        if day_raw.is_empty() || slot_raw.is_empty() {
            debug!(line, "skipping row without day or slot");
            out.skipped.push(SkippedRow {
                line,
                day: day_raw,
                slot: slot_raw,
                reason: SkipReason::MissingDayOrSlot,
            });
            continue;
        }
        let (Some(day), Some(slot)) = (Day::from_name(&day_raw), Slot::from_number(&slot_raw)) else {
            warn!(line, day = %day_raw, slot = %slot_raw, "invalid day/slot in import row");
            out.skipped.push(SkippedRow {
                line,
                day: day_raw,
                slot: slot_raw,
                reason: SkipReason::InvalidDayOrSlot,
            });
            continue;
        };
        out.rows.push(ImportRow {
            day,
            slot,
            course: cell(2),
            professor: cell(3),
            room: cell(4),
        });
    }

    if out.rows.is_empty() {
        return Err(ImportError::NoValidRows {
            skipped: out.skipped.len(),
        });
    }
    Ok(out)
}

/// Parses a faculty day-by-slot sheet into a fresh grid. Row 0 and column 0
/// are labels; row `r` is slot `r`, column `c` is day `c` (both 1-based here).
pub fn parse_faculty_grid(
    owner: Owner,
    file_name: &str,
    bytes: &[u8],
) -> Result<TimetableGrid, ImportError> {
    let rows = read_rows(file_name, bytes)?;
    if rows.iter().all(|r| is_empty_row(r)) {
        return Err(ImportError::EmptyFile);
    }

    let mut grid = TimetableGrid::init_empty(owner);
    for (slot, row) in Slot::all().zip(rows.iter().skip(1)) {
        for (day, value) in Day::all().zip(row.iter().skip(1)) {
            if value.is_empty() {
                continue;
            }
            let mut parts = value.split('|').map(str::trim);
            let assignment = SlotAssignment {
                course: parts.next().unwrap_or_default().to_string(),
                room: parts.next().unwrap_or_default().to_string(),
                class_name: parts.next().unwrap_or_default().to_string(),
                ..SlotAssignment::default()
            };
            grid.replace_cell(day, slot, SlotCell::Regular(assignment));
        }
    }
    if rows.len() > SLOT_COUNT + 1 {
        debug!(rows = rows.len(), "ignoring rows beyond the last slot");
    }
    Ok(grid)
}

/// Downloadable example for the class import format.
pub fn sample_class_csv() -> String {
    let rows: [[&str; 5]; 8] = [
        ["Monday", "1", "IT261", "(ARP)", "125"],
        ["Monday", "2", "MA262", "(VPN)", "125"],
        ["Monday", "3", "", "", ""],
        ["Monday", "4", "IT265", "(CUR)", "125"],
        ["Monday", "5", "LAB", "(Tutor)", "107"],
        ["Monday", "6", "LAB", "(Tutor)", "107"],
        ["Tuesday", "1", "MA262", "(HSJ)", "109"],
        ["Tuesday", "2", "IT261", "(ARP)", "125"],
    ];
    std::iter::once(CLASS_IMPORT_HEADER.join(","))
        .chain(rows.iter().map(|r| r.join(",")))
        .collect::<Vec<_>>()
        .join("\n")
}

#[cfg(test)]
mod tests {
    use super::*;

    fn parse_csv_import(text: &str) -> Result<ClassImport, ImportError> {
        parse_class_timetable("timetable.csv", text.as_bytes())
    }

    #[test]
    fn well_formed_csv_yields_rows() {
        let out = parse_csv_import(
            "day,slot,course,professor,room\nMonday,1,IT261,ARP,125\nTuesday,2,MA262,HSJ,109\n",
        )
        .unwrap();
        assert_eq!(out.rows.len(), 2);
        assert_eq!(
            out.rows[0],
            ImportRow {
                day: Day::new(0).unwrap(),
                slot: Slot::new(0).unwrap(),
                course: "IT261".into(),
                professor: "ARP".into(),
                room: "125".into(),
            }
        );
        assert_eq!(out.rows[1].day.index(), 1);
        assert_eq!(out.rows[1].slot.index(), 1);
        assert_eq!(out.rows[1].course, "MA262");
        assert!(out.skipped.is_empty());
    }

    #[test]
    fn wrong_header_names_are_rejected() {
        let e = parse_csv_import("date,period,subject,teacher,hall\nMonday,1,IT261,ARP,125\n")
            .unwrap_err();
        assert!(matches!(e, ImportError::InvalidHeader { .. }));
    }

    #[test]
    fn header_is_case_and_space_insensitive_and_allows_extra_columns() {
        let out = parse_csv_import(" Day , SLOT,Course,Professor,Room,notes\nfriday,6,X,Y,Z,extra\n")
            .unwrap();
        assert_eq!(out.rows[0].day.name(), "Friday");
        assert_eq!(out.rows[0].slot.index(), 5);
    }

    #[test]
    fn invalid_day_is_skipped_then_no_valid_rows() {
        let e = parse_csv_import("day,slot,course,professor,room\nFunday,1,X,Y,Z\n").unwrap_err();
        assert_eq!(e, ImportError::NoValidRows { skipped: 1 });
    }

    #[test]
    fn invalid_rows_are_reported_but_not_fatal() {
        let out = parse_csv_import(
            "day,slot,course,professor,room\nFunday,1,X,Y,Z\nMonday,7,A,B,C\n,3,A,B,C\nMonday,2,IT,P,1\n",
        )
        .unwrap();
        assert_eq!(out.rows.len(), 1);
        assert_eq!(out.skipped.len(), 3);
        assert_eq!(out.skipped[0].line, 2);
        assert_eq!(out.skipped[0].reason, SkipReason::InvalidDayOrSlot);
        assert_eq!(out.skipped[2].reason, SkipReason::MissingDayOrSlot);
    }

    #[test]
    fn empty_and_header_only_files() {
        assert_eq!(parse_csv_import("\n\n ,, \n").unwrap_err(), ImportError::EmptyFile);
        assert_eq!(
            parse_csv_import("day,slot,course,professor,room\r\n\r\n").unwrap_err(),
            ImportError::NoDataRows
        );
    }

    #[test]
    fn unsupported_extension() {
        let e = parse_class_timetable("timetable.pdf", b"whatever").unwrap_err();
        assert!(matches!(e, ImportError::UnsupportedFormat { .. }));
    }

    #[test]
    fn short_rows_default_missing_fields() {
        let out = parse_csv_import("day,slot,course,professor,room\nMonday,3,IT261\n").unwrap();
        assert_eq!(out.rows[0].professor, "");
        assert_eq!(out.rows[0].room, "");
    }

    #[test]
    fn quoted_cells_and_bom() {
        let rows = parse_csv("\u{feff}day,slot\r\n\"Monday\",\"1\",\"Lab, \"\"A\"\"\"\r\n");
        assert_eq!(rows[0], vec!["day", "slot"]);
        assert_eq!(rows[1], vec!["Monday", "1", "Lab, \"A\""]);
    }

    #[test]
    fn quoted_cell_may_span_lines() {
        let rows = parse_csv("day,slot,course\r\nMonday,1,\"IT261\r\n(theory)\"\nTuesday,2,MA262\n");
        assert_eq!(rows.len(), 4);
        assert_eq!(rows[1], vec!["Monday", "1", "IT261\n(theory)"]);
        assert_eq!(rows[2], vec!["Tuesday", "2", "MA262"]);
        assert_eq!(rows[3], vec![""]);

        let out = parse_csv_import(
            "day,slot,course,professor,room\nMonday,1,\"IT261\nLab\",ARP,125\nTuesday,2,MA262,HSJ,109\n",
        )
        .unwrap();
        assert_eq!(out.rows.len(), 2);
        assert_eq!(out.rows[0].course, "IT261\nLab");
        assert_eq!(out.rows[1].room, "109");
    }

    #[test]
    fn faculty_grid_reads_pipe_cells() {
        let csv = "slot,Monday,Tuesday\n1,IT261|125|IT-2A,\n2,,MA262 | 109\n";
        let grid = parse_faculty_grid(Owner::faculty("f1"), "faculty.csv", csv.as_bytes()).unwrap();
        let mon = Day::new(0).unwrap();
        let tue = Day::new(1).unwrap();
        let SlotCell::Regular(a) = grid.cell(mon, Slot::new(0).unwrap()) else {
            panic!("expected regular");
        };
        assert_eq!((a.course.as_str(), a.room.as_str(), a.class_name.as_str()), ("IT261", "125", "IT-2A"));
        let SlotCell::Regular(b) = grid.cell(tue, Slot::new(1).unwrap()) else {
            panic!("expected regular");
        };
        assert_eq!((b.course.as_str(), b.room.as_str(), b.class_name.as_str()), ("MA262", "109", ""));
        assert!(grid.cell(tue, Slot::new(0).unwrap()).is_blank());
    }

    #[test]
    fn sample_csv_round_trips_through_parser() {
        let out = parse_csv_import(&sample_class_csv()).unwrap();
        assert_eq!(out.rows.len(), 8);
        assert_eq!(out.rows[6].day.name(), "Tuesday");
    }
}
