//! Rendering of batch outcomes and statement spans

use clap::ValueEnum;
use comfy_table::{ContentArrangement, Table, presets::UTF8_FULL};
use serde::Serialize;
use serde_json::json;
use sqlbatch_core::Value;
use sqlbatch_query::{BatchOutcome, BatchStatus, ResultRecord, StatementSpan};

/// Maximum characters of statement text shown in table headings
const HEADING_PREVIEW_CHARS: usize = 60;

/// Output format
#[derive(Debug, Clone, Copy, PartialEq, Eq, ValueEnum)]
pub enum OutputFormat {
    Table,
    Json,
}

#[derive(Serialize)]
struct RecordView<'a> {
    statement: &'a str,
    column_names: &'a [String],
    column_type_names: &'a [String],
    rows: Vec<Vec<serde_json::Value>>,
    rows_count: usize,
    rows_affected: i64,
    latency_ms: f64,
    error: Option<&'a str>,
}

#[derive(Serialize)]
struct OutcomeView<'a> {
    status: BatchStatus,
    error: Option<String>,
    success_count: usize,
    failure_count: usize,
    total_ms: f64,
    records: Vec<RecordView<'a>>,
}

/// Cell as JSON; integers stay integers, exact numerics stay strings
fn value_to_json(value: &Value) -> serde_json::Value {
    match value {
        Value::Null => serde_json::Value::Null,
        Value::Bool(b) => json!(b),
        Value::Int64(i) => json!(i),
        Value::UInt64(u) => json!(u),
        Value::Float32(f) if f.is_finite() => json!(f),
        Value::Float64(f) if f.is_finite() => json!(f),
        Value::Json(j) => j.clone(),
        Value::Array(items) => serde_json::Value::Array(items.iter().map(value_to_json).collect()),
        other => json!(other.to_text()),
    }
}

fn record_view(record: &ResultRecord) -> RecordView<'_> {
    RecordView {
        statement: &record.statement,
        column_names: &record.column_names,
        column_type_names: &record.column_type_names,
        rows: record
            .rows
            .iter()
            .map(|row| row.values.iter().map(value_to_json).collect())
            .collect(),
        rows_count: record.rows_count,
        rows_affected: record.rows_affected,
        latency_ms: record.latency.as_secs_f64() * 1000.0,
        error: record.error.as_deref(),
    }
}

pub fn outcome_json(outcome: &BatchOutcome) -> serde_json::Result<String> {
    let view = OutcomeView {
        status: outcome.status,
        error: outcome.error.as_ref().map(ToString::to_string),
        success_count: outcome.success_count,
        failure_count: outcome.failure_count,
        total_ms: outcome.total_execution_time.as_secs_f64() * 1000.0,
        records: outcome.records.iter().map(record_view).collect(),
    };
    serde_json::to_string_pretty(&view)
}

fn preview(text: &str, max_chars: usize) -> String {
    let flat = text.split_whitespace().collect::<Vec<_>>().join(" ");
    match flat.char_indices().nth(max_chars) {
        Some((end, _)) => format!("{}...", &flat[..end]),
        None => flat,
    }
}

fn record_table(record: &ResultRecord) -> Table {
    let mut table = Table::new();
    table
        .load_preset(UTF8_FULL)
        .set_content_arrangement(ContentArrangement::Dynamic)
        .set_header(
            record
                .column_names
                .iter()
                .zip(&record.column_type_names)
                .map(|(name, ty)| format!("{name}\n{ty}")),
        );
    for row in &record.rows {
        table.add_row(row.values.iter().map(|value| {
            if value.is_null() {
                "NULL".to_string()
            } else {
                value.to_text()
            }
        }));
    }
    table
}

pub fn outcome_text(outcome: &BatchOutcome) -> String {
    let mut out = String::new();
    for (index, record) in outcome.records.iter().enumerate() {
        out.push_str(&format!(
            "[{}] {} ({:.1} ms)\n",
            index + 1,
            preview(&record.statement, HEADING_PREVIEW_CHARS),
            record.latency.as_secs_f64() * 1000.0
        ));
        match &record.error {
            Some(error) => out.push_str(&format!("error: {error}\n")),
            None => out.push_str(&format!("{}\n", record_table(record))),
        }
        out.push('\n');
    }

    out.push_str(&format!(
        "{} statement(s) succeeded, {} failed in {:.1} ms",
        outcome.success_count,
        outcome.failure_count,
        outcome.total_execution_time.as_secs_f64() * 1000.0
    ));
    if outcome.has_failures() {
        out.push_str("\nfailed:");
        for record in outcome.failed_records() {
            out.push_str(&format!(
                "\n  {}: {}",
                preview(&record.statement, HEADING_PREVIEW_CHARS),
                record.error.as_deref().unwrap_or_default()
            ));
        }
    }
    if let Some(error) = &outcome.error {
        out.push_str(&format!("\nbatch aborted: {error}"));
    }
    out
}

pub fn spans_json(spans: &[StatementSpan]) -> serde_json::Result<String> {
    serde_json::to_string_pretty(spans)
}

pub fn spans_text(spans: &[StatementSpan]) -> String {
    let mut table = Table::new();
    table
        .load_preset(UTF8_FULL)
        .set_content_arrangement(ContentArrangement::Dynamic)
        .set_header(vec!["#", "start", "end", "bytes", "delimiter", "statement"]);
    for (index, span) in spans.iter().enumerate() {
        table.add_row(vec![
            (index + 1).to_string(),
            format!("{}:{}", span.start.line, span.start.column),
            format!("{}:{}", span.end.line, span.end.column),
            format!("{}..{}", span.range.start, span.range.end),
            span.delimiter.clone().unwrap_or_else(|| ";".to_string()),
            preview(&span.text, HEADING_PREVIEW_CHARS),
        ]);
    }
    table.to_string()
}

#[cfg(test)]
mod tests {
    use super::*;
    use pretty_assertions::assert_eq;
    use sqlbatch_core::ProvisionalResult;
    use std::time::Duration;

    #[test]
    fn test_value_to_json_keeps_integers() {
        assert_eq!(value_to_json(&Value::Int64(i64::MAX)), json!(i64::MAX));
        assert_eq!(value_to_json(&Value::UInt64(u64::MAX)), json!(u64::MAX));
        assert_eq!(value_to_json(&Value::Decimal("1.50".into())), json!("1.50"));
        assert_eq!(value_to_json(&Value::Float64(f64::NAN)), json!("NaN"));
        assert_eq!(value_to_json(&Value::Bytes(vec![0xde, 0xad])), json!("\\xdead"));
    }

    #[test]
    fn test_preview_flattens_whitespace() {
        assert_eq!(preview("  SELECT\n    1;", 60), "SELECT 1;");
        assert_eq!(preview("SELECT 12345", 6), "SELECT...");
    }

    #[test]
    fn test_record_table_shows_affected_rows() {
        let record = sqlbatch_query::normalize(
            ProvisionalResult::affected(3),
            "DELETE FROM t;",
            Duration::ZERO,
        );
        let rendered = record_table(&record).to_string();
        assert!(rendered.contains("Affected Rows"));
        assert!(rendered.contains('3'));
    }

    #[test]
    fn test_outcome_text_lists_failed_statements() {
        let outcome = BatchOutcome {
            records: vec![
                sqlbatch_query::normalize(
                    ProvisionalResult::affected(1),
                    "INSERT INTO t VALUES (1);",
                    Duration::ZERO,
                ),
                ResultRecord::failed("INSERT INTO missing VALUES (2);", Duration::ZERO, "no such table"),
            ],
            status: BatchStatus::Completed,
            error: None,
            success_count: 1,
            failure_count: 1,
            total_execution_time: Duration::from_millis(3),
            was_transactional: false,
            transaction_rolled_back: false,
        };
        let rendered = outcome_text(&outcome);
        assert!(rendered.contains("1 statement(s) succeeded, 1 failed"));
        assert!(rendered.ends_with("failed:\n  INSERT INTO missing VALUES (2);: no such table"));
        assert!(!rendered.contains("batch aborted"));
    }

    #[test]
    fn test_record_view_json() {
        let record = sqlbatch_query::normalize(
            ProvisionalResult::affected(1),
            "INSERT INTO t VALUES (1);",
            Duration::from_millis(2),
        );
        let view = serde_json::to_value(record_view(&record)).unwrap();
        assert_eq!(view["rows"], json!([[1]]));
        assert_eq!(view["rows_count"], json!(1));
        assert_eq!(view["column_names"], json!(["Affected Rows"]));
        assert_eq!(view["error"], serde_json::Value::Null);
    }
}
