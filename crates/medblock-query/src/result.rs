//! Uniform query results

use rusqlite::types::ValueRef;
use rusqlite::{Connection, Params};
use serde::{Deserialize, Serialize};

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(untagged)]
pub enum SqlValue {
    Null,
    Integer(i64),
    Real(f64),
    Text(String),
    Blob(Vec<u8>),
}

impl SqlValue {
    pub fn as_i64(&self) -> Option<i64> {
        match self {
            SqlValue::Integer(v) => Some(*v),
            _ => None,
        }
    }

    pub fn as_str(&self) -> Option<&str> {
        match self {
            SqlValue::Text(v) => Some(v),
            _ => None,
        }
    }

    pub fn is_null(&self) -> bool {
        matches!(self, SqlValue::Null)
    }
}

impl From<ValueRef<'_>> for SqlValue {
    fn from(value: ValueRef<'_>) -> Self {
        match value {
            ValueRef::Null => SqlValue::Null,
            ValueRef::Integer(v) => SqlValue::Integer(v),
            ValueRef::Real(v) => SqlValue::Real(v),
            ValueRef::Text(v) => SqlValue::Text(String::from_utf8_lossy(v).into_owned()),
            ValueRef::Blob(v) => SqlValue::Blob(v.to_vec()),
        }
    }
}

impl std::fmt::Display for SqlValue {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            SqlValue::Null => write!(f, "NULL"),
            SqlValue::Integer(v) => write!(f, "{v}"),
            SqlValue::Real(v) => write!(f, "{v}"),
            SqlValue::Text(v) => write!(f, "{v}"),
            SqlValue::Blob(v) => write!(f, "<{} bytes>", v.len()),
        }
    }
}

/// Result of any statement: column names plus rows in column order.
///
/// Statements that produce no result set have no columns. Use
/// [`QueryResult::is_statement`] to tell that apart from a select that
/// matched zero rows.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct QueryResult {
    pub columns: Vec<String>,
    pub rows: Vec<Vec<SqlValue>>,
    /// Rows changed by an insert/update/delete
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub rows_affected: Option<usize>,
}

impl QueryResult {
    /// Run one statement on `conn` and collect whatever it returns.
    pub fn collect<P: Params>(conn: &Connection, sql: &str, params: P) -> rusqlite::Result<Self> {
        let mut stmt = conn.prepare(sql)?;
        let columns: Vec<String> = stmt
            .column_names()
            .into_iter()
            .map(str::to_string)
            .collect();

        if columns.is_empty() {
            let changed = stmt.execute(params)?;
            return Ok(Self {
                columns,
                rows: Vec::new(),
                rows_affected: Some(changed),
            });
        }

        let width = columns.len();
        let mut rows = Vec::new();
        let mut cursor = stmt.query(params)?;
        while let Some(row) = cursor.next()? {
            let mut values = Vec::with_capacity(width);
            for index in 0..width {
                values.push(SqlValue::from(row.get_ref(index)?));
            }
            rows.push(values);
        }

        Ok(Self {
            columns,
            rows,
            rows_affected: None,
        })
    }

    /// True when the statement produced no result set at all.
    pub fn is_statement(&self) -> bool {
        self.columns.is_empty()
    }

    pub fn is_empty(&self) -> bool {
        self.rows.is_empty()
    }

    pub fn column_index(&self, name: &str) -> Option<usize> {
        self.columns.iter().position(|c| c.eq_ignore_ascii_case(name))
    }

    /// Value of column `name` in row `row`.
    pub fn value(&self, row: usize, name: &str) -> Option<&SqlValue> {
        let index = self.column_index(name)?;
        self.rows.get(row)?.get(index)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn conn() -> Connection {
        let conn = Connection::open_in_memory().unwrap();
        conn.execute_batch(
            "CREATE TABLE t (id INTEGER PRIMARY KEY, name TEXT, score REAL, data BLOB);
             INSERT INTO t (name, score, data) VALUES ('a', 1.5, x'0102'), (NULL, NULL, NULL);",
        )
        .unwrap();
        conn
    }

    #[test]
    fn test_select_shape() {
        let result = QueryResult::collect(&conn(), "SELECT * FROM t ORDER BY id", []).unwrap();

        assert_eq!(result.columns, vec!["id", "name", "score", "data"]);
        assert_eq!(result.rows.len(), 2);
        assert_eq!(result.rows[0][1], SqlValue::Text("a".into()));
        assert_eq!(result.rows[0][2], SqlValue::Real(1.5));
        assert_eq!(result.rows[0][3], SqlValue::Blob(vec![1, 2]));
        assert!(result.rows[1][1].is_null());
        assert_eq!(result.value(1, "ID"), Some(&SqlValue::Integer(2)));
        assert!(!result.is_statement());
    }

    #[test]
    fn test_zero_rows_is_not_a_statement() {
        let result =
            QueryResult::collect(&conn(), "SELECT name FROM t WHERE id = 99", []).unwrap();
        assert!(result.is_empty());
        assert!(!result.is_statement());
        assert_eq!(result.columns, vec!["name"]);
    }

    #[test]
    fn test_statement_without_columns() {
        let conn = conn();
        let result = QueryResult::collect(&conn, "UPDATE t SET score = ?1", [2.0]).unwrap();

        assert!(result.is_statement());
        assert_eq!(result.rows_affected, Some(2));
    }
}
