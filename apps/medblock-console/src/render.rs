use chrono::{Local, TimeZone};
use medblock_core::{Patient, QueryRecord, QueryResult};

pub const NO_RESULT_SET: &str = "Statement executed (no result set)";

/// Lay out a result as a plain text table.
pub fn render_result(result: &QueryResult) -> String {
    if result.is_statement() {
        return match result.rows_affected {
            Some(n) => format!("{} ({} row(s) affected)", NO_RESULT_SET, n),
            None => NO_RESULT_SET.to_string(),
        };
    }

    let cells: Vec<Vec<String>> = result
        .rows
        .iter()
        .map(|row| row.iter().map(ToString::to_string).collect())
        .collect();

    let mut widths: Vec<usize> = result.columns.iter().map(|c| c.chars().count()).collect();
    for row in &cells {
        for (width, cell) in widths.iter_mut().zip(row) {
            *width = (*width).max(cell.chars().count());
        }
    }

    let line = |values: &[String]| {
        values
            .iter()
            .zip(&widths)
            .map(|(value, width)| format!("{:<width$}", value, width = *width))
            .collect::<Vec<_>>()
            .join(" | ")
            .trim_end()
            .to_string()
    };

    let mut out = Vec::with_capacity(cells.len() + 3);
    out.push(line(&result.columns));
    out.push(
        widths
            .iter()
            .map(|w| "-".repeat(*w))
            .collect::<Vec<_>>()
            .join("-+-"),
    );
    out.extend(cells.iter().map(|row| line(row)));
    out.push(format!("({} row(s))", cells.len()));
    out.join("\n")
}

pub fn render_patients(patients: &[Patient]) -> String {
    if patients.is_empty() {
        return "No patients registered".to_string();
    }

    patients
        .iter()
        .map(|p| {
            format!(
                "#{} {} ({} y, {}) born {} at {}, registered {}",
                p.id.map(|id| id.to_string()).unwrap_or_else(|| "?".into()),
                p.name,
                p.age,
                p.gender,
                if p.date_of_birth.is_empty() { "-" } else { p.date_of_birth.as_str() },
                p.address,
                p.created_at
            )
        })
        .collect::<Vec<_>>()
        .join("\n")
}

/// Logged statements, newest first, with the local time they last ran.
pub fn render_log(records: &[QueryRecord]) -> String {
    if records.is_empty() {
        return "No statements logged".to_string();
    }

    records
        .iter()
        .map(|record| {
            let when = Local
                .timestamp_millis_opt(record.timestamp)
                .single()
                .map(|t| t.format("%Y-%m-%d %H:%M:%S").to_string())
                .unwrap_or_else(|| "?".into());
            format!("{}  {}", when, record.sql)
        })
        .collect::<Vec<_>>()
        .join("\n")
}
