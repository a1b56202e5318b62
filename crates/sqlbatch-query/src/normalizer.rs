//! Result normalization
//!
//! Converts engine-native [`ProvisionalResult`]s into uniform
//! [`ResultRecord`]s. Whether a result carries rows is decided only by the
//! presence of a row descriptor, so `RETURNING` mutations and procedure
//! result sets come out as row sets without any keyword inspection.

use std::time::Duration;

use serde::Serialize;
use sqlbatch_core::{ProvisionalResult, Row, Value};

/// Column name of the canonical mutation record
pub const AFFECTED_ROWS_COLUMN: &str = "Affected Rows";

/// Type label of the canonical mutation record
pub const AFFECTED_ROWS_TYPE: &str = "INT";

/// Engine-agnostic outcome of one statement (or one result set of it)
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct ResultRecord {
    pub column_names: Vec<String>,
    /// Driver type labels, one per column
    pub column_type_names: Vec<String>,
    pub rows: Vec<Row>,
    /// Number of entries in `rows`; 1 for the synthesized mutation record
    pub rows_count: usize,
    pub rows_affected: i64,
    /// Source text of the statement exactly as split
    pub statement: String,
    /// Wall-clock time of the driver call
    pub latency: Duration,
    pub error: Option<String>,
}

impl ResultRecord {
    /// Record for a statement the server rejected
    pub fn failed(statement: impl Into<String>, latency: Duration, error: impl Into<String>) -> Self {
        Self {
            column_names: Vec::new(),
            column_type_names: Vec::new(),
            rows: Vec::new(),
            rows_count: 0,
            rows_affected: 0,
            statement: statement.into(),
            latency,
            error: Some(error.into()),
        }
    }

    pub fn is_error(&self) -> bool {
        self.error.is_some()
    }
}

/// Build the record for one provisional result.
pub fn normalize(provisional: ProvisionalResult, statement: &str, elapsed: Duration) -> ResultRecord {
    let Some(columns) = provisional.row_descriptor else {
        let affected = i64::try_from(provisional.affected_rows).unwrap_or(i64::MAX);
        return ResultRecord {
            column_names: vec![AFFECTED_ROWS_COLUMN.to_string()],
            column_type_names: vec![AFFECTED_ROWS_TYPE.to_string()],
            rows: vec![Row::new(vec![Value::Int64(affected)])],
            rows_count: 1,
            rows_affected: affected,
            statement: statement.to_string(),
            latency: elapsed,
            error: None,
        };
    };

    let width = columns.len();
    let rows: Vec<Row> = provisional
        .rows
        .into_iter()
        .enumerate()
        .map(|(index, mut row)| {
            if row.values.len() != width {
                tracing::warn!(
                    row = index,
                    cells = row.values.len(),
                    columns = width,
                    "row width does not match column count"
                );
                row.values.resize(width, Value::Null);
            }
            row
        })
        .collect();

    let (column_names, column_type_names) = columns
        .into_iter()
        .map(|column| (column.name, column.data_type))
        .unzip();

    ResultRecord {
        column_names,
        column_type_names,
        rows_count: rows.len(),
        rows,
        rows_affected: i64::try_from(provisional.affected_rows).unwrap_or(i64::MAX),
        statement: statement.to_string(),
        latency: elapsed,
        error: None,
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use pretty_assertions::assert_eq;
    use sqlbatch_core::ColumnMeta;

    fn columns(names: &[(&str, &str)]) -> Vec<ColumnMeta> {
        names
            .iter()
            .enumerate()
            .map(|(i, (name, ty))| ColumnMeta::new(*name, *ty, i))
            .collect()
    }

    #[test]
    fn test_mutation_becomes_affected_rows_record() {
        let record = normalize(
            ProvisionalResult::affected(2),
            "INSERT INTO tbl VALUES(1),(2);",
            Duration::from_millis(3),
        );
        assert_eq!(record.column_names, vec!["Affected Rows"]);
        assert_eq!(record.column_type_names, vec!["INT"]);
        assert_eq!(record.rows, vec![Row::new(vec![Value::Int64(2)])]);
        assert_eq!(record.rows_affected, 2);
        assert_eq!(record.rows_count, 1);
        assert_eq!(record.latency, Duration::from_millis(3));
        assert!(!record.is_error());
    }

    #[test]
    fn test_ddl_reports_zero() {
        let record = normalize(ProvisionalResult::affected(0), "ALTER TABLE t ADD c INT;", Duration::ZERO);
        assert_eq!(record.rows, vec![Row::new(vec![Value::Int64(0)])]);
    }

    #[test]
    fn test_huge_count_saturates() {
        let record = normalize(ProvisionalResult::affected(u64::MAX), "DELETE FROM t;", Duration::ZERO);
        assert_eq!(record.rows_affected, i64::MAX);
    }

    #[test]
    fn test_empty_row_set_stays_row_set() {
        let provisional = ProvisionalResult::rows(columns(&[("id", "INT4")]), vec![]);
        let record = normalize(provisional, "SELECT id FROM t WHERE false;", Duration::ZERO);
        assert_eq!(record.column_names, vec!["id"]);
        assert_eq!(record.column_type_names, vec!["INT4"]);
        assert!(record.rows.is_empty());
        assert_eq!(record.rows_count, 0);
    }

    #[test]
    fn test_rows_copied_through() {
        let provisional = ProvisionalResult::rows(
            columns(&[("id", "INT4"), ("name", "TEXT")]),
            vec![Row::new(vec![Value::Int64(1), Value::String("a".into())])],
        );
        let record = normalize(provisional, " SELECT id, name FROM t;", Duration::ZERO);
        assert_eq!(record.statement, " SELECT id, name FROM t;");
        assert_eq!(record.rows[0].values, vec![Value::Int64(1), Value::String("a".into())]);
        assert_eq!(record.rows_count, 1);
    }

    #[test]
    fn test_row_width_forced_to_column_count() {
        let provisional = ProvisionalResult::rows(
            columns(&[("a", "INT"), ("b", "INT")]),
            vec![
                Row::new(vec![Value::Int64(1)]),
                Row::new(vec![Value::Int64(1), Value::Int64(2), Value::Int64(3)]),
            ],
        );
        let record = normalize(provisional, "SELECT a, b FROM t;", Duration::ZERO);
        assert_eq!(record.rows[0].values, vec![Value::Int64(1), Value::Null]);
        assert_eq!(record.rows[1].values, vec![Value::Int64(1), Value::Int64(2)]);
        assert!(record.rows.iter().all(|r| r.len() == record.column_names.len()));
    }

    #[test]
    fn test_failed_record() {
        let record = ResultRecord::failed("SELECT nope;", Duration::from_millis(1), "syntax error");
        assert!(record.column_names.is_empty());
        assert!(record.rows.is_empty());
        assert_eq!(record.rows_count, 0);
        assert_eq!(record.error.as_deref(), Some("syntax error"));
    }
}
