//! Patient records

use chrono::{DateTime, Local, NaiveDate, NaiveDateTime};
use serde::{Deserialize, Serialize};

use crate::error::CoreError;
use crate::Result;
use medblock_query::{QueryResult, SqlValue};

/// Display format of `createdAt`, e.g. `Oct 19, 2026, 03:04:05 PM`.
const CREATED_AT_FORMAT: &str = "%b %-d, %Y, %I:%M:%S %p";
const CREATED_AT_PARSE_FORMAT: &str = "%b %d, %Y, %I:%M:%S %p";
const DATE_OF_BIRTH_FORMAT: &str = "%Y-%m-%d";

#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum Gender {
    Male,
    Female,
    #[default]
    Other,
}

impl Gender {
    pub fn as_str(&self) -> &'static str {
        match self {
            Gender::Male => "male",
            Gender::Female => "female",
            Gender::Other => "other",
        }
    }
}

impl std::fmt::Display for Gender {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "{}", self.as_str())
    }
}

impl std::str::FromStr for Gender {
    type Err = String;

    fn from_str(s: &str) -> std::result::Result<Self, Self::Err> {
        match s.trim().to_lowercase().as_str() {
            "male" => Ok(Gender::Male),
            "female" => Ok(Gender::Female),
            "other" => Ok(Gender::Other),
            _ => Err(format!("Unknown gender: {}", s)),
        }
    }
}

/// Age as submitted by a form: a number or its text.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(untagged)]
pub enum Age {
    Years(i64),
    Text(String),
}

impl Age {
    pub fn years(&self) -> Result<i64> {
        let years = match self {
            Age::Years(years) => *years,
            Age::Text(text) => text
                .trim()
                .parse::<i64>()
                .map_err(|_| CoreError::Validation(format!("age '{}' is not a number", text)))?,
        };

        if years <= 0 {
            return Err(CoreError::Validation(format!(
                "age must be positive, got {}",
                years
            )));
        }
        Ok(years)
    }
}

impl From<i64> for Age {
    fn from(years: i64) -> Self {
        Age::Years(years)
    }
}

impl From<i32> for Age {
    fn from(years: i32) -> Self {
        Age::Years(i64::from(years))
    }
}

impl From<&str> for Age {
    fn from(text: &str) -> Self {
        Age::Text(text.to_string())
    }
}

/// Registration candidate, before the store assigns `id` and `createdAt`.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct NewPatient {
    pub name: String,
    pub age: Age,
    #[serde(default)]
    pub gender: Gender,
    #[serde(default)]
    pub date_of_birth: String,
    pub address: String,
}

impl NewPatient {
    pub fn new(
        name: impl Into<String>,
        age: impl Into<Age>,
        gender: Gender,
        date_of_birth: impl Into<String>,
        address: impl Into<String>,
    ) -> Self {
        Self {
            name: name.into(),
            age: age.into(),
            gender,
            date_of_birth: date_of_birth.into(),
            address: address.into(),
        }
    }

    /// Coerce and check the fields, stamping `created_at`.
    pub(crate) fn into_patient(self, created_at: String) -> Result<Patient> {
        let name = self.name.trim().to_string();
        if name.is_empty() {
            return Err(CoreError::Validation("name cannot be empty".to_string()));
        }

        let address = self.address.trim().to_string();
        if address.is_empty() {
            return Err(CoreError::Validation("address cannot be empty".to_string()));
        }

        let date_of_birth = self.date_of_birth.trim().to_string();
        if !date_of_birth.is_empty()
            && NaiveDate::parse_from_str(&date_of_birth, DATE_OF_BIRTH_FORMAT).is_err()
        {
            return Err(CoreError::Validation(format!(
                "date of birth '{}' is not YYYY-MM-DD",
                date_of_birth
            )));
        }

        Ok(Patient {
            id: None,
            name,
            age: self.age.years()?,
            gender: self.gender,
            date_of_birth,
            address,
            created_at,
        })
    }
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct Patient {
    /// Assigned by the engine on insert
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub id: Option<i64>,
    pub name: String,
    pub age: i64,
    pub gender: Gender,
    pub date_of_birth: String,
    pub address: String,
    /// Display string, never rewritten after creation
    pub created_at: String,
}

impl Patient {
    /// Map every row of a `patients` result set by column name.
    pub fn from_result(result: &QueryResult) -> Result<Vec<Patient>> {
        (0..result.rows.len())
            .map(|row| Self::from_row(result, row))
            .collect()
    }

    fn from_row(result: &QueryResult, row: usize) -> Result<Patient> {
        let column = |name: &str| {
            result
                .value(row, name)
                .ok_or_else(|| CoreError::Validation(format!("result has no '{}' column", name)))
        };
        let text = |name: &str| -> Result<String> {
            Ok(match column(name)? {
                SqlValue::Null => String::new(),
                other => other.to_string(),
            })
        };

        let id = column("id")?.as_i64();

        let age = match column("age")? {
            SqlValue::Integer(v) => *v,
            SqlValue::Real(v) => {
                if v.fract() != 0.0 {
                    tracing::warn!(patient_id = ?id, age = v, "Truncating fractional age");
                }
                *v as i64
            }
            other => match other.to_string().trim().parse() {
                Ok(v) => v,
                Err(_) => {
                    tracing::warn!(patient_id = ?id, age = %other, "Unreadable age, reading as 0");
                    0
                }
            },
        };

        let gender_text = text("gender")?;
        let gender = gender_text.parse().unwrap_or_else(|_| {
            tracing::warn!(patient_id = ?id, gender = %gender_text, "Unknown gender, reading as other");
            Gender::Other
        });

        Ok(Patient {
            id,
            name: text("name")?,
            age,
            gender,
            date_of_birth: text("dateOfBirth")?,
            address: text("address")?,
            created_at: text("createdAt")?,
        })
    }

    /// `created_at` as a timestamp; accepts the display format and RFC 3339.
    pub fn created_at_time(&self) -> Option<NaiveDateTime> {
        parse_created_at(&self.created_at)
    }
}

pub fn format_created_at(at: DateTime<Local>) -> String {
    at.format(CREATED_AT_FORMAT).to_string()
}

/// Parse either `createdAt` format. Records written before the display format
/// was introduced hold RFC 3339 strings.
pub fn parse_created_at(value: &str) -> Option<NaiveDateTime> {
    let value = value.trim();
    NaiveDateTime::parse_from_str(value, CREATED_AT_PARSE_FORMAT)
        .ok()
        .or_else(|| {
            DateTime::parse_from_rfc3339(value)
                .ok()
                .map(|dt| dt.with_timezone(&Local).naive_local())
        })
}

/// Rows inserted when a fresh schema is created.
pub fn sample_patients() -> Vec<NewPatient> {
    vec![
        NewPatient::new(
            "John Smith",
            45,
            Gender::Male,
            "1980-05-15",
            "123 Main St, New York, NY",
        ),
        NewPatient::new(
            "Sarah Johnson",
            32,
            Gender::Female,
            "1993-08-21",
            "456 Park Ave, Boston, MA",
        ),
        NewPatient::new(
            "Michael Chen",
            28,
            Gender::Male,
            "1997-11-03",
            "789 Oak Dr, San Francisco, CA",
        ),
    ]
}
