//! Execution log
//!
//! One record per distinct SQL text. Running the same text again replaces
//! the earlier record.

use chrono::Utc;
use parking_lot::RwLock;
use serde::{Deserialize, Serialize};
use std::collections::HashMap;
use std::sync::Arc;

use crate::Result;

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct QueryRecord {
    pub sql: String,
    /// Unix epoch milliseconds
    pub timestamp: i64,
}

pub struct QueryLog {
    records: Arc<RwLock<HashMap<String, QueryRecord>>>,
}

impl QueryLog {
    pub fn new() -> Self {
        Self {
            records: Arc::new(RwLock::new(HashMap::new())),
        }
    }

    /// Restore a log saved with [`QueryLog::to_json`].
    pub fn from_slice(json: &[u8]) -> Result<Self> {
        let records: Vec<QueryRecord> = serde_json::from_slice(json)?;
        let log = Self::new();
        {
            let mut map = log.records.write();
            for record in records {
                map.insert(record.sql.clone(), record);
            }
        }
        Ok(log)
    }

    pub fn to_json(&self) -> Result<String> {
        Ok(serde_json::to_string(&self.entries())?)
    }

    pub fn record(&self, sql: &str) -> QueryRecord {
        let record = QueryRecord {
            sql: sql.to_string(),
            timestamp: Utc::now().timestamp_millis(),
        };
        self.records
            .write()
            .insert(record.sql.clone(), record.clone());
        record
    }

    pub fn get(&self, sql: &str) -> Option<QueryRecord> {
        self.records.read().get(sql).cloned()
    }

    /// All records, newest first.
    pub fn entries(&self) -> Vec<QueryRecord> {
        let mut entries: Vec<QueryRecord> = self.records.read().values().cloned().collect();
        entries.sort_by(|a, b| b.timestamp.cmp(&a.timestamp).then_with(|| a.sql.cmp(&b.sql)));
        entries
    }

    /// The `limit` most recent records.
    pub fn recent(&self, limit: usize) -> Vec<QueryRecord> {
        let mut entries = self.entries();
        entries.truncate(limit);
        entries
    }

    pub fn len(&self) -> usize {
        self.records.read().len()
    }

    pub fn is_empty(&self) -> bool {
        self.records.read().is_empty()
    }

    /// Take in `other`'s records. For text present in both, the later
    /// record wins.
    pub fn merge(&self, other: &QueryLog) {
        let incoming: Vec<QueryRecord> = other.records.read().values().cloned().collect();
        let mut records = self.records.write();
        for record in incoming {
            match records.get(&record.sql) {
                Some(existing) if existing.timestamp >= record.timestamp => {}
                _ => {
                    records.insert(record.sql.clone(), record);
                }
            }
        }
    }
}

impl Default for QueryLog {
    fn default() -> Self {
        Self::new()
    }
}

impl Clone for QueryLog {
    fn clone(&self) -> Self {
        Self {
            records: Arc::clone(&self.records),
        }
    }
}
