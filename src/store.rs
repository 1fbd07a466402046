//! Generic row store consumed by the timetable gateway, plus its SQLite implementation.

use rusqlite::types::Value;
use rusqlite::{params_from_iter, Connection};
use thiserror::Error;

/// A failure reported by the backing store, carrying its human-readable message.
#[derive(Debug, Error, Clone, PartialEq, Eq)]
#[error("{message}")]
pub struct StoreError {
    pub message: String,
}

impl StoreError {
    pub fn new(message: impl Into<String>) -> Self {
        StoreError {
            message: message.into(),
        }
    }
}

impl From<rusqlite::Error> for StoreError {
    fn from(err: rusqlite::Error) -> Self {
        StoreError::new(err.to_string())
    }
}

/// One row as an ordered column -> value list.
#[derive(Debug, Clone, Default, PartialEq)]
pub struct Record {
    values: Vec<(String, Value)>,
}

impl Record {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn with(mut self, column: &str, value: impl Into<Value>) -> Self {
        self.set(column, value);
        self
    }

    pub fn set(&mut self, column: &str, value: impl Into<Value>) {
        let value = value.into();
        match self.values.iter_mut().find(|(c, _)| c == column) {
            Some(slot) => slot.1 = value,
            None => self.values.push((column.to_string(), value)),
        }
    }

    pub fn get(&self, column: &str) -> Option<&Value> {
        self.values.iter().find(|(c, _)| c == column).map(|(_, v)| v)
    }

    /// Text value; NULL and missing columns read as empty.
    pub fn text(&self, column: &str) -> String {
        match self.get(column) {
            Some(Value::Text(s)) => s.clone(),
            Some(Value::Integer(i)) => i.to_string(),
            Some(Value::Real(f)) => f.to_string(),
            _ => String::new(),
        }
    }

    pub fn int(&self, column: &str) -> Option<i64> {
        match self.get(column) {
            Some(Value::Integer(i)) => Some(*i),
            Some(Value::Real(f)) => Some(*f as i64),
            Some(Value::Text(s)) => s.trim().parse().ok(),
            _ => None,
        }
    }

    pub fn flag(&self, column: &str) -> bool {
        match self.get(column) {
            Some(Value::Integer(i)) => *i != 0,
            Some(Value::Text(s)) => s.eq_ignore_ascii_case("true") || s == "1",
            _ => false,
        }
    }

    pub fn columns(&self) -> impl Iterator<Item = &str> {
        self.values.iter().map(|(c, _)| c.as_str())
    }

    /// Copy of this record without the given columns.
    pub fn without(&self, columns: &[&str]) -> Record {
        Record {
            values: self
                .values
                .iter()
                .filter(|(c, _)| !columns.contains(&c.as_str()))
                .cloned()
                .collect(),
        }
    }
}

/// Equality filter on one column.
pub type Filter<'a> = (&'a str, &'a Value);

pub trait TableStore {
    fn select(
        &self,
        table: &str,
        columns: &[&str],
        filter: Filter<'_>,
        order_by: &[&str],
    ) -> Result<Vec<Record>, StoreError>;

    /// Inserts all rows or none of them.
    fn insert(&self, table: &str, rows: &[Record]) -> Result<usize, StoreError>;

    fn delete(&self, table: &str, filter: Filter<'_>) -> Result<usize, StoreError>;

    /// Column names of `table`, used to probe schema capabilities.
    fn columns(&self, table: &str) -> Result<Vec<String>, StoreError>;

    /// Deletes the filtered rows, then inserts `rows`. Stores that support
    /// transactions should make the pair atomic.
    fn replace(&self, table: &str, filter: Filter<'_>, rows: &[Record]) -> Result<usize, StoreError> {
        self.delete(table, filter)?;
        self.insert(table, rows)
    }
}

pub struct SqliteStore<'c> {
    conn: &'c Connection,
}

impl<'c> SqliteStore<'c> {
    pub fn new(conn: &'c Connection) -> Self {
        SqliteStore { conn }
    }
}

fn insert_rows(conn: &Connection, table: &str, rows: &[Record]) -> Result<usize, StoreError> {
    for row in rows {
        let cols: Vec<&str> = row.columns().collect();
        let placeholders = vec!["?"; cols.len()].join(",");
        let sql = format!(
            "INSERT INTO {}({}) VALUES({})",
            table,
            cols.join(", "),
            placeholders
        );
        let mut stmt = conn.prepare_cached(&sql)?;
        stmt.execute(params_from_iter(row.values.iter().map(|(_, v)| v)))?;
    }
    Ok(rows.len())
}

/// Runs `f` in its own transaction unless the caller already holds one.
fn atomically<T>(
    conn: &Connection,
    f: impl FnOnce(&Connection) -> Result<T, StoreError>,
) -> Result<T, StoreError> {
    if !conn.is_autocommit() {
        return f(conn);
    }
    // Dropping the transaction on error rolls the work back.
    let tx = conn.unchecked_transaction()?;
    let out = f(&tx)?;
    tx.commit()?;
    Ok(out)
}

fn delete_rows(conn: &Connection, table: &str, filter: Filter<'_>) -> Result<usize, StoreError> {
    let sql = format!("DELETE FROM {} WHERE {} = ?", table, filter.0);
    Ok(conn.execute(&sql, [filter.1])?)
}

impl TableStore for SqliteStore<'_> {
    fn select(
        &self,
        table: &str,
        columns: &[&str],
        filter: Filter<'_>,
        order_by: &[&str],
    ) -> Result<Vec<Record>, StoreError> {
        let mut sql = format!(
            "SELECT {} FROM {} WHERE {} = ?",
            columns.join(", "),
            table,
            filter.0
        );
        if !order_by.is_empty() {
            sql.push_str(" ORDER BY ");
            sql.push_str(&order_by.join(", "));
        }
        let mut stmt = self.conn.prepare(&sql)?;
        let rows = stmt
            .query_map([filter.1], |row| {
                let mut rec = Record::new();
                for (i, col) in columns.iter().enumerate() {
                    rec.set(col, row.get::<_, Value>(i)?);
                }
                Ok(rec)
            })?
            .collect::<Result<Vec<_>, _>>()?;
        Ok(rows)
    }

    fn insert(&self, table: &str, rows: &[Record]) -> Result<usize, StoreError> {
        if rows.is_empty() {
            return Ok(0);
        }
        atomically(self.conn, |c| insert_rows(c, table, rows))
    }

    fn delete(&self, table: &str, filter: Filter<'_>) -> Result<usize, StoreError> {
        delete_rows(self.conn, table, filter)
    }

    fn columns(&self, table: &str) -> Result<Vec<String>, StoreError> {
        let sql = format!("PRAGMA table_info({})", table);
        let mut stmt = self.conn.prepare(&sql)?;
        let names = stmt
            .query_map([], |row| row.get::<_, String>(1))?
            .collect::<Result<Vec<_>, _>>()?;
        Ok(names)
    }

    fn replace(&self, table: &str, filter: Filter<'_>, rows: &[Record]) -> Result<usize, StoreError> {
        atomically(self.conn, |c| {
            delete_rows(c, table, filter)?;
            insert_rows(c, table, rows)
        })
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn conn() -> Connection {
        let conn = Connection::open_in_memory().expect("open");
        conn.execute(
            "CREATE TABLE t(owner TEXT NOT NULL, n INTEGER NOT NULL, label TEXT)",
            [],
        )
        .expect("create");
        conn
    }

    #[test]
    fn select_filters_and_orders() {
        let conn = conn();
        let store = SqliteStore::new(&conn);
        let row = |owner: &str, n: i64, label: &str| {
            Record::new()
                .with("owner", owner.to_string())
                .with("n", n)
                .with("label", label.to_string())
        };
        let rows = vec![row("a", 2, "two"), row("a", 1, "one"), row("b", 3, "three")];
        assert_eq!(store.insert("t", &rows).unwrap(), 3);

        let owner = Value::Text("a".into());
        let got = store
            .select("t", &["n", "label"], ("owner", &owner), &["n"])
            .unwrap();
        assert_eq!(got.len(), 2);
        assert_eq!(got[0].int("n"), Some(1));
        assert_eq!(got[1].text("label"), "two");
    }

    #[test]
    fn failed_replace_keeps_old_rows() {
        let conn = conn();
        let store = SqliteStore::new(&conn);
        store
            .insert(
                "t",
                &[Record::new().with("owner", "a".to_string()).with("n", 1)],
            )
            .unwrap();

        let owner = Value::Text("a".into());
        let bad = vec![Record::new().with("owner", "a".to_string()).with("missing", 1)];
        let e = store.replace("t", ("owner", &owner), &bad).unwrap_err();
        assert!(e.message.contains("column"), "{}", e.message);

        let got = store.select("t", &["n"], ("owner", &owner), &[]).unwrap();
        assert_eq!(got.len(), 1);
    }

    #[test]
    fn unknown_select_column_reports_column_error() {
        let conn = conn();
        let store = SqliteStore::new(&conn);
        let owner = Value::Text("a".into());
        let e = store
            .select("t", &["n", "is_lab"], ("owner", &owner), &[])
            .unwrap_err();
        assert!(e.message.contains("no such column"), "{}", e.message);
    }

    #[test]
    fn columns_lists_table_info() {
        let conn = conn();
        let store = SqliteStore::new(&conn);
        assert_eq!(store.columns("t").unwrap(), vec!["owner", "n", "label"]);
    }

    #[test]
    fn record_without_strips_columns() {
        let r = Record::new().with("a", 1).with("b", 2).with("c", Value::Null);
        let stripped = r.without(&["b", "c"]);
        assert_eq!(stripped.columns().collect::<Vec<_>>(), vec!["a"]);
    }
}
