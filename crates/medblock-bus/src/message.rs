//! Notification messages

use chrono::Utc;
use serde::{Deserialize, Serialize};
use uuid::Uuid;

use crate::error::BusError;

/// Identity of one running view (tab, window, console process).
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(transparent)]
pub struct ViewId(Uuid);

impl ViewId {
    pub fn new() -> Self {
        Self(Uuid::new_v4())
    }
}

impl Default for ViewId {
    fn default() -> Self {
        Self::new()
    }
}

impl std::fmt::Display for ViewId {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "{}", self.0)
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "SCREAMING_SNAKE_CASE")]
pub enum ChangeKind {
    /// A patient was registered through the repository
    PatientAdded,
    /// A mutating statement ran through the query console
    SqlExecuted,
    /// The store changed for any other reason (reload, import)
    StoreChanged,
}

impl ChangeKind {
    pub fn as_str(&self) -> &'static str {
        match self {
            ChangeKind::PatientAdded => "PATIENT_ADDED",
            ChangeKind::SqlExecuted => "SQL_EXECUTED",
            ChangeKind::StoreChanged => "STORE_CHANGED",
        }
    }
}

impl std::fmt::Display for ChangeKind {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "{}", self.as_str())
    }
}

impl std::str::FromStr for ChangeKind {
    type Err = BusError;

    fn from_str(s: &str) -> std::result::Result<Self, Self::Err> {
        match s.to_uppercase().as_str() {
            "PATIENT_ADDED" => Ok(ChangeKind::PatientAdded),
            "SQL_EXECUTED" => Ok(ChangeKind::SqlExecuted),
            "STORE_CHANGED" => Ok(ChangeKind::StoreChanged),
            _ => Err(BusError::UnknownKind(s.to_string())),
        }
    }
}

/// "The store changed" signal carried on both the topic and the local channel.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Notification {
    pub id: Uuid,
    pub origin: ViewId,
    #[serde(rename = "type")]
    pub kind: ChangeKind,
    /// Unix epoch milliseconds
    pub timestamp: i64,
}

impl Notification {
    pub fn new(origin: ViewId, kind: ChangeKind) -> Self {
        Self {
            id: Uuid::new_v4(),
            origin,
            kind,
            timestamp: Utc::now().timestamp_millis(),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_wire_format() {
        let message = Notification::new(ViewId::new(), ChangeKind::PatientAdded);
        let json = serde_json::to_string(&message).unwrap();

        assert!(json.contains(r#""type":"PATIENT_ADDED""#));
        assert_eq!(serde_json::from_str::<Notification>(&json).unwrap(), message);
    }

    #[test]
    fn test_parse_kind() {
        assert_eq!(
            "sql_executed".parse::<ChangeKind>().unwrap(),
            ChangeKind::SqlExecuted
        );
        assert!("PATIENT_REMOVED".parse::<ChangeKind>().is_err());
    }
}
