//! Statement classification
//!
//! ```text
//! select                   -> Read
//! insert | update | delete -> Mutating
//! drop | truncate          -> Destructive (never executed)
//! delete + Reject policy   -> Destructive
//! ```

use rusqlite::{Batch, Connection};
use serde::{Deserialize, Serialize};

use crate::error::QueryError;
use crate::Result;

const DESTRUCTIVE_MESSAGE: &str = "Destructive operations are not allowed";

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum StatementClass {
    /// Returns rows, leaves the store untouched
    Read,
    /// Changes rows; triggers persistence and notification
    Mutating,
    /// Destroys schema or bulk data; always rejected
    Destructive,
}

impl StatementClass {
    pub fn is_mutating(&self) -> bool {
        matches!(self, StatementClass::Mutating)
    }

    pub fn as_str(&self) -> &'static str {
        match self {
            StatementClass::Read => "read",
            StatementClass::Mutating => "mutating",
            StatementClass::Destructive => "destructive",
        }
    }
}

impl std::fmt::Display for StatementClass {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "{}", self.as_str())
    }
}

/// How `delete` statements are treated.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum DeletePolicy {
    /// `delete` is an ordinary mutating statement
    #[default]
    Allow,
    /// `delete` is rejected like `drop`
    Reject,
}

/// SQL text that passed classification and is allowed to run.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Statement {
    sql: String,
    keyword: String,
    class: StatementClass,
}

impl Statement {
    /// Classify `sql`, rejecting empty, unsupported and destructive text.
    pub fn parse(sql: &str, policy: DeletePolicy) -> Result<Self> {
        let keyword = leading_keyword(sql).ok_or(QueryError::EmptyQuery)?;

        let class = match keyword.as_str() {
            "select" => StatementClass::Read,
            "insert" | "update" => StatementClass::Mutating,
            "delete" => match policy {
                DeletePolicy::Allow => StatementClass::Mutating,
                DeletePolicy::Reject => StatementClass::Destructive,
            },
            "drop" | "truncate" => StatementClass::Destructive,
            _ => return Err(QueryError::Unsupported(keyword)),
        };

        if class == StatementClass::Destructive {
            tracing::warn!(keyword = %keyword, "Rejected destructive statement");
            return Err(QueryError::PolicyViolation(DESTRUCTIVE_MESSAGE.to_string()));
        }

        Ok(Self {
            sql: sql.to_string(),
            keyword,
            class,
        })
    }

    pub fn sql(&self) -> &str {
        &self.sql
    }

    pub fn keyword(&self) -> &str {
        &self.keyword
    }

    pub fn class(&self) -> StatementClass {
        self.class
    }
}

/// Whether `sql` holds more than one statement once compiled on `conn`.
///
/// Text whose first statement does not compile counts as one statement;
/// executing it reports the actual error.
pub fn has_multiple_statements(conn: &Connection, sql: &str) -> bool {
    let mut batch = Batch::new(conn, sql);
    match batch.next() {
        Ok(Some(_)) => {}
        Ok(None) | Err(_) => return false,
    }
    // A second statement that fails to compile is still a second statement
    !matches!(batch.next(), Ok(None))
}

/// First word of the statement, lower-cased.
fn leading_keyword(sql: &str) -> Option<String> {
    let trimmed = sql.trim_start();
    let end = trimmed
        .find(|c: char| !c.is_ascii_alphabetic())
        .unwrap_or(trimmed.len());

    let keyword = &trimmed[..end];
    if keyword.is_empty() {
        if trimmed.is_empty() {
            None
        } else {
            Some(trimmed.chars().take(16).collect::<String>().to_lowercase())
        }
    } else {
        Some(keyword.to_lowercase())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn class_of(sql: &str) -> StatementClass {
        Statement::parse(sql, DeletePolicy::Allow).unwrap().class()
    }

    #[test]
    fn test_classification() {
        assert_eq!(class_of("SELECT * FROM patients"), StatementClass::Read);
        assert_eq!(class_of("  select count(*) from patients"), StatementClass::Read);
        assert_eq!(
            class_of("Insert into patients (name) values ('x')"),
            StatementClass::Mutating
        );
        assert_eq!(class_of("UPDATE patients SET age = 3"), StatementClass::Mutating);
        assert_eq!(class_of("delete from patients where id = 1"), StatementClass::Mutating);
        assert_eq!(class_of("select\n*\nfrom patients"), StatementClass::Read);
    }

    #[test]
    fn test_destructive_rejected() {
        for sql in ["drop table patients", "  TRUNCATE patients", "Drop\tindex x"] {
            let err = Statement::parse(sql, DeletePolicy::Allow).unwrap_err();
            assert!(matches!(err, QueryError::PolicyViolation(_)), "{sql}");
            assert_eq!(err.to_string(), "Destructive operations are not allowed");
        }
    }

    #[test]
    fn test_strict_delete_policy() {
        let err = Statement::parse("DELETE FROM patients", DeletePolicy::Reject).unwrap_err();
        assert!(matches!(err, QueryError::PolicyViolation(_)));
    }

    #[test]
    fn test_empty_and_unsupported() {
        assert!(matches!(
            Statement::parse("   \n", DeletePolicy::Allow),
            Err(QueryError::EmptyQuery)
        ));
        assert!(matches!(
            Statement::parse("pragma table_info(patients)", DeletePolicy::Allow),
            Err(QueryError::Unsupported(k)) if k == "pragma"
        ));
        // prefix of a keyword is not the keyword
        assert!(Statement::parse("selection", DeletePolicy::Allow).is_err());
    }

    #[test]
    fn test_statement_count() {
        let conn = Connection::open_in_memory().unwrap();
        conn.execute_batch("CREATE TABLE patients (id INTEGER PRIMARY KEY)")
            .unwrap();

        assert!(!has_multiple_statements(&conn, "SELECT 1"));
        assert!(!has_multiple_statements(&conn, "SELECT 1;  \n"));
        assert!(!has_multiple_statements(&conn, "SELECT * FROM nowhere"));
        assert!(has_multiple_statements(&conn, "select 1; drop table patients"));
        assert!(has_multiple_statements(&conn, "SELECT 1; not even sql"));
    }
}
