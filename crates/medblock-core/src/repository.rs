//! Patient repository
//!
//! Typed operations over the query gateway. Writes go through the gateway so
//! they are persisted and announced like any console mutation.

use chrono::{DateTime, Local};
use rusqlite::types::Value;
use std::collections::BTreeMap;
use std::sync::Arc;

use medblock_bus::ChangeKind;
use medblock_query::{QueryResult, SqlValue};

use crate::error::CoreError;
use crate::gateway::QueryGateway;
use crate::patient::{format_created_at, NewPatient, Patient};
use crate::Result;

const INSERT_PATIENT_SQL: &str =
    "INSERT INTO patients (name, age, gender, dateOfBirth, address, createdAt)
     VALUES (?1, ?2, ?3, ?4, ?5, ?6)
     RETURNING *";
const SELECT_PATIENTS_SQL: &str = "SELECT * FROM patients ORDER BY id";
const COUNT_PATIENTS_SQL: &str = "SELECT COUNT(*) AS count FROM patients";
const SELECT_MACHINE_DATES_SQL: &str =
    "SELECT id, createdAt FROM patients WHERE createdAt GLOB '*-*-*T*:*'";
const UPDATE_CREATED_AT_SQL: &str = "UPDATE patients SET createdAt = ?1 WHERE id = ?2";

/// Merge patient lists by id. A later source wins over an earlier one for the
/// same id; records without an id are dropped. Output is ordered by id.
pub fn reconcile_by_id<I>(sources: I) -> Vec<Patient>
where
    I: IntoIterator<Item = Vec<Patient>>,
{
    let mut merged: BTreeMap<i64, Patient> = BTreeMap::new();
    for source in sources {
        for patient in source {
            if let Some(id) = patient.id {
                merged.insert(id, patient);
            }
        }
    }
    merged.into_values().collect()
}

fn count_from(result: &QueryResult) -> Result<i64> {
    result
        .value(0, "count")
        .and_then(SqlValue::as_i64)
        .ok_or_else(|| CoreError::Validation("count query returned no count".to_string()))
}

pub struct PatientRepository {
    gateway: Arc<QueryGateway>,
}

impl PatientRepository {
    pub fn new(gateway: Arc<QueryGateway>) -> Self {
        Self { gateway }
    }

    /// Register a patient. The returned record carries its assigned id and
    /// creation timestamp.
    pub async fn add_patient(&self, candidate: NewPatient) -> Result<Patient> {
        let patient = candidate.into_patient(format_created_at(Local::now()))?;

        let params = vec![
            Value::Text(patient.name.clone()),
            Value::Integer(patient.age),
            Value::Text(patient.gender.as_str().to_string()),
            Value::Text(patient.date_of_birth.clone()),
            Value::Text(patient.address.clone()),
            Value::Text(patient.created_at.clone()),
        ];

        let result = self
            .gateway
            .execute_with(INSERT_PATIENT_SQL, params, ChangeKind::PatientAdded)
            .await?;

        let stored = Patient::from_result(&result)?
            .into_iter()
            .next()
            .ok_or_else(|| CoreError::Validation("insert returned no row".to_string()))?;

        tracing::info!(patient_id = ?stored.id, "Patient added");

        Ok(stored)
    }

    /// Every patient, ordered by id.
    pub async fn get_all_patients(&self) -> Result<Vec<Patient>> {
        let result = self.gateway.execute(SELECT_PATIENTS_SQL).await?;
        Ok(reconcile_by_id([Patient::from_result(&result)?]))
    }

    pub async fn get_patient_count(&self) -> Result<i64> {
        let result = self.gateway.execute(COUNT_PATIENTS_SQL).await?;
        count_from(&result)
    }

    /// Raw console access.
    pub async fn execute_query(&self, sql: &str) -> Result<QueryResult> {
        self.gateway.execute(sql).await
    }

    /// Rewrite `createdAt` values stored as RFC 3339 timestamps into the
    /// display format. Returns the number of rows rewritten.
    pub async fn migrate_created_at(&self) -> Result<usize> {
        let candidates = self.gateway.execute(SELECT_MACHINE_DATES_SQL).await?;

        let mut updates = Vec::new();
        for row in 0..candidates.rows.len() {
            let id = candidates.value(row, "id").and_then(SqlValue::as_i64);
            let value = candidates.value(row, "createdAt").and_then(SqlValue::as_str);

            let (Some(id), Some(value)) = (id, value) else {
                continue;
            };
            let Ok(parsed) = DateTime::parse_from_rfc3339(value) else {
                tracing::warn!(patient_id = id, created_at = %value, "Skipping unparseable date");
                continue;
            };

            let display = format_created_at(parsed.with_timezone(&Local));
            updates.push((
                UPDATE_CREATED_AT_SQL.to_string(),
                vec![Value::Text(display), Value::Integer(id)],
            ));
        }

        if updates.is_empty() {
            tracing::info!("No dates to migrate");
            return Ok(0);
        }

        let count = updates.len();
        self.gateway
            .execute_many(updates, ChangeKind::StoreChanged)
            .await?;

        tracing::info!(count, "Migrated createdAt values to display format");
        Ok(count)
    }
}

impl Clone for PatientRepository {
    fn clone(&self) -> Self {
        Self {
            gateway: Arc::clone(&self.gateway),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::engine::EngineAdapter;
    use crate::patient::{parse_created_at, Gender};
    use crate::persistence::{ImageWriter, WriteThrough};
    use medblock_bus::{ChannelHub, NotificationBus, ViewId};
    use medblock_query::{DeletePolicy, QueryLog};
    use medblock_storage::MemoryBlobStore;

    fn repository(store: &MemoryBlobStore) -> PatientRepository {
        let writer = ImageWriter::new(Arc::new(store.clone()), "database_binary");
        let bus = NotificationBus::new(&ChannelHub::new(), "patients", ViewId::new()).unwrap();
        let gateway = QueryGateway::new(
            Arc::new(EngineAdapter::new(writer.clone(), true)),
            WriteThrough::new(writer, Arc::new(bus)),
            QueryLog::new(),
            "query_log",
            DeletePolicy::Allow,
        );
        PatientRepository::new(Arc::new(gateway))
    }

    fn patient(id: i64, name: &str) -> Patient {
        Patient {
            id: Some(id),
            name: name.to_string(),
            age: 30,
            gender: Gender::Other,
            date_of_birth: "1995-01-01".to_string(),
            address: "Somewhere".to_string(),
            created_at: "Jan 1, 2025, 09:00:00 AM".to_string(),
        }
    }

    #[test]
    fn test_reconcile_later_source_wins() {
        let mut unsaved = patient(0, "Unsaved");
        unsaved.id = None;

        let merged = reconcile_by_id([
            vec![patient(2, "Old Two"), patient(1, "One"), unsaved],
            vec![patient(2, "New Two"), patient(3, "Three")],
        ]);

        let names: Vec<&str> = merged.iter().map(|p| p.name.as_str()).collect();
        assert_eq!(names, vec!["One", "New Two", "Three"]);
    }

    #[test]
    fn test_count_requires_count_column() {
        let empty = QueryResult {
            columns: vec!["count".to_string()],
            ..QueryResult::default()
        };
        assert!(count_from(&empty).unwrap_err().is_validation());

        let counted = QueryResult {
            columns: vec!["count".to_string()],
            rows: vec![vec![SqlValue::Integer(7)]],
            rows_affected: None,
        };
        assert_eq!(count_from(&counted).unwrap(), 7);
    }

    #[tokio::test]
    async fn test_ada_lovelace_scenario() {
        let repo = repository(&MemoryBlobStore::new());
        let before = repo.get_patient_count().await.unwrap();

        let added = repo
            .add_patient(NewPatient::new(
                "Ada Lovelace",
                36,
                Gender::Female,
                "1815-12-10",
                "London",
            ))
            .await
            .unwrap();
        assert!(added.id.is_some());

        assert_eq!(repo.get_patient_count().await.unwrap(), before + 1);

        let result = repo
            .execute_query("select * from patients where name = 'Ada Lovelace'")
            .await
            .unwrap();
        assert_eq!(result.rows.len(), 1);
        assert!(!result.value(0, "id").unwrap().is_null());

        let created_at = result.value(0, "createdAt").and_then(SqlValue::as_str).unwrap();
        assert!(parse_created_at(created_at).is_some());
        assert!(!created_at.contains('T'));
        assert!(created_at.ends_with("AM") || created_at.ends_with("PM"));
    }

    #[tokio::test]
    async fn test_count_matches_list() {
        let repo = repository(&MemoryBlobStore::new());
        repo.add_patient(NewPatient::new("Ada", 36, Gender::Female, "", "London"))
            .await
            .unwrap();

        let all = repo.get_all_patients().await.unwrap();
        assert_eq!(all.len() as i64, repo.get_patient_count().await.unwrap());
        assert_eq!(all.len(), 4);
        assert!(all.windows(2).all(|w| w[0].id < w[1].id));
    }

    #[tokio::test]
    async fn test_invalid_candidate_touches_nothing() {
        let repo = repository(&MemoryBlobStore::new());
        let err = repo
            .add_patient(NewPatient::new("", 36, Gender::Female, "", "London"))
            .await
            .unwrap_err();

        assert!(err.is_validation());
        assert_eq!(repo.get_patient_count().await.unwrap(), 3);
    }

    #[tokio::test]
    async fn test_migrate_machine_dates() {
        let repo = repository(&MemoryBlobStore::new());
        repo.execute_query(
            "INSERT INTO patients (name, age, gender, dateOfBirth, address, createdAt)
             VALUES ('Legacy', 50, 'male', '1975-01-01', 'Old Town', '2024-03-01T10:00:00.000Z')",
        )
        .await
        .unwrap();

        // Both formats read without trouble
        let all = repo.get_all_patients().await.unwrap();
        assert!(all.iter().all(|p| p.created_at_time().is_some()));

        assert_eq!(repo.migrate_created_at().await.unwrap(), 1);
        assert_eq!(repo.migrate_created_at().await.unwrap(), 0);

        let legacy = repo
            .get_all_patients()
            .await
            .unwrap()
            .into_iter()
            .find(|p| p.name == "Legacy")
            .unwrap();
        assert!(!legacy.created_at.contains('T'));
        assert!(legacy.created_at_time().is_some());
    }
}
