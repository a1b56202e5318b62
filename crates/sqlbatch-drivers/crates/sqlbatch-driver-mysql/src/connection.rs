//! MySQL connection implementation

use async_trait::async_trait;
use mysql_async::{
    Column, Conn, Opts, Row as MySqlRow,
    consts::{ColumnFlags, ColumnType},
    prelude::*,
};
use std::sync::Arc;
use std::sync::atomic::{AtomicBool, Ordering};
use tokio::sync::Mutex;
use sqlbatch_core::{
    ColumnMeta, Connection, Dialect, ProvisionalResult, QueryCancelHandle, Result, Row,
    SqlbatchError, Value, ValueKind,
};

/// Character set number MySQL reports for binary strings
const BINARY_CHARSET: u16 = 63;

/// Server error codes after which the batch cannot continue.
const ER_SERVER_SHUTDOWN: u16 = 1053;
const ER_QUERY_INTERRUPTED: u16 = 1317;
const ER_CONNECTION_KILLED: u16 = 1927;

/// Number of probe statements tried while waiting for a killed statement
const SETTLE_ATTEMPTS: usize = 3;

/// Cancel handle for MySQL statements.
///
/// MySQL has no out-of-band cancel message, so cancellation opens a short-lived
/// side connection and issues `KILL QUERY` for the session running the statement.
pub struct MySqlCancelHandle {
    opts: Opts,
    connection_id: u32,
}

#[async_trait]
impl QueryCancelHandle for MySqlCancelHandle {
    async fn cancel(&self) {
        let connection_id = self.connection_id;
        tracing::debug!(connection_id, "sending KILL QUERY to MySQL server");
        let outcome = async {
            let mut side = Conn::new(self.opts.clone()).await?;
            side.query_drop(format!("KILL QUERY {}", connection_id)).await?;
            side.disconnect().await
        }
        .await;
        if let Err(e) = outcome {
            tracing::warn!(error = %e, connection_id, "failed to cancel MySQL query");
        }
    }
}

/// MySQL connection wrapper
pub struct MySqlConnection {
    conn: Mutex<Conn>,
    opts: Opts,
    connection_id: u32,
    closed: AtomicBool,
}

impl MySqlConnection {
    /// Connect to a MySQL-family server on the caller's Tokio runtime
    pub async fn connect(opts: Opts) -> Result<Self> {
        let conn = Conn::new(opts.clone())
            .await
            .map_err(|e| SqlbatchError::Connection(format!("Failed to connect to MySQL: {}", e)))?;
        let connection_id = conn.id();

        tracing::info!(connection_id, "MySQL connection established");
        Ok(Self {
            conn: Mutex::new(conn),
            opts,
            connection_id,
            closed: AtomicBool::new(false),
        })
    }

    fn classify(&self, error: mysql_async::Error) -> SqlbatchError {
        let classified = classify_error(error);
        if matches!(classified, SqlbatchError::Connection(_)) {
            self.closed.store(true, Ordering::SeqCst);
        }
        classified
    }

    async fn simple(&self, sql: &str) -> Result<()> {
        let mut conn = self.conn.lock().await;
        conn.query_drop(sql).await.map_err(|e| self.classify(e))
    }
}

/// Map a driver error onto the statement/connection-fatal split.
fn classify_error(error: mysql_async::Error) -> SqlbatchError {
    match error {
        mysql_async::Error::Server(server) => match server.code {
            ER_QUERY_INTERRUPTED => SqlbatchError::Cancelled,
            ER_SERVER_SHUTDOWN | ER_CONNECTION_KILLED => {
                SqlbatchError::Connection(server.message)
            }
            code => SqlbatchError::statement(server.message, Some(code.to_string())),
        },
        other => SqlbatchError::Connection(other.to_string()),
    }
}

/// Type label reported for a column, e.g. `INT`, `UNSIGNED BIGINT`, `VARCHAR`
pub(crate) fn type_label(column_type: ColumnType, flags: ColumnFlags, charset: u16) -> String {
    let binary = charset == BINARY_CHARSET;
    let base = match column_type {
        ColumnType::MYSQL_TYPE_TINY => "TINYINT",
        ColumnType::MYSQL_TYPE_SHORT => "SMALLINT",
        ColumnType::MYSQL_TYPE_INT24 => "MEDIUMINT",
        ColumnType::MYSQL_TYPE_LONG => "INT",
        ColumnType::MYSQL_TYPE_LONGLONG => "BIGINT",
        ColumnType::MYSQL_TYPE_FLOAT => "FLOAT",
        ColumnType::MYSQL_TYPE_DOUBLE => "DOUBLE",
        ColumnType::MYSQL_TYPE_DECIMAL | ColumnType::MYSQL_TYPE_NEWDECIMAL => "DECIMAL",
        ColumnType::MYSQL_TYPE_DATE | ColumnType::MYSQL_TYPE_NEWDATE => "DATE",
        ColumnType::MYSQL_TYPE_TIME | ColumnType::MYSQL_TYPE_TIME2 => "TIME",
        ColumnType::MYSQL_TYPE_DATETIME | ColumnType::MYSQL_TYPE_DATETIME2 => "DATETIME",
        ColumnType::MYSQL_TYPE_TIMESTAMP | ColumnType::MYSQL_TYPE_TIMESTAMP2 => "TIMESTAMP",
        ColumnType::MYSQL_TYPE_YEAR => "YEAR",
        ColumnType::MYSQL_TYPE_JSON => "JSON",
        ColumnType::MYSQL_TYPE_BIT => "BIT",
        ColumnType::MYSQL_TYPE_NULL => "NULL",
        ColumnType::MYSQL_TYPE_GEOMETRY => "GEOMETRY",
        ColumnType::MYSQL_TYPE_ENUM => "ENUM",
        ColumnType::MYSQL_TYPE_SET => "SET",
        ColumnType::MYSQL_TYPE_STRING if flags.contains(ColumnFlags::ENUM_FLAG) => "ENUM",
        ColumnType::MYSQL_TYPE_STRING if flags.contains(ColumnFlags::SET_FLAG) => "SET",
        ColumnType::MYSQL_TYPE_STRING => if binary { "BINARY" } else { "CHAR" },
        ColumnType::MYSQL_TYPE_VAR_STRING | ColumnType::MYSQL_TYPE_VARCHAR => {
            if binary { "VARBINARY" } else { "VARCHAR" }
        }
        ColumnType::MYSQL_TYPE_TINY_BLOB
        | ColumnType::MYSQL_TYPE_MEDIUM_BLOB
        | ColumnType::MYSQL_TYPE_LONG_BLOB
        | ColumnType::MYSQL_TYPE_BLOB => if binary { "BLOB" } else { "TEXT" },
        _ => "UNKNOWN",
    };

    let is_integer = matches!(
        column_type,
        ColumnType::MYSQL_TYPE_TINY
            | ColumnType::MYSQL_TYPE_SHORT
            | ColumnType::MYSQL_TYPE_INT24
            | ColumnType::MYSQL_TYPE_LONG
            | ColumnType::MYSQL_TYPE_LONGLONG
    );
    if is_integer && flags.contains(ColumnFlags::UNSIGNED_FLAG) {
        format!("UNSIGNED {}", base)
    } else {
        base.to_string()
    }
}

/// Value variant used to decode a text-protocol cell of this column
pub(crate) fn value_kind(column_type: ColumnType, flags: ColumnFlags, charset: u16) -> ValueKind {
    match column_type {
        ColumnType::MYSQL_TYPE_TINY
        | ColumnType::MYSQL_TYPE_SHORT
        | ColumnType::MYSQL_TYPE_LONG
        | ColumnType::MYSQL_TYPE_LONGLONG
        | ColumnType::MYSQL_TYPE_INT24
        | ColumnType::MYSQL_TYPE_YEAR => {
            if flags.contains(ColumnFlags::UNSIGNED_FLAG) {
                ValueKind::UInt64
            } else {
                ValueKind::Int64
            }
        }
        ColumnType::MYSQL_TYPE_FLOAT => ValueKind::Float32,
        ColumnType::MYSQL_TYPE_DOUBLE => ValueKind::Float64,
        ColumnType::MYSQL_TYPE_DECIMAL | ColumnType::MYSQL_TYPE_NEWDECIMAL => ValueKind::Decimal,
        ColumnType::MYSQL_TYPE_DATE | ColumnType::MYSQL_TYPE_NEWDATE => ValueKind::Date,
        ColumnType::MYSQL_TYPE_TIME | ColumnType::MYSQL_TYPE_TIME2 => ValueKind::Time,
        ColumnType::MYSQL_TYPE_DATETIME
        | ColumnType::MYSQL_TYPE_DATETIME2
        | ColumnType::MYSQL_TYPE_TIMESTAMP
        | ColumnType::MYSQL_TYPE_TIMESTAMP2 => ValueKind::DateTime,
        ColumnType::MYSQL_TYPE_JSON => ValueKind::Json,
        ColumnType::MYSQL_TYPE_BIT | ColumnType::MYSQL_TYPE_GEOMETRY => ValueKind::Bytes,
        _ if charset == BINARY_CHARSET => ValueKind::Bytes,
        _ => ValueKind::String,
    }
}

/// Convert mysql_async Value to our Value type, using column metadata
/// to interpret byte strings from the text protocol.
fn mysql_value_to_value(val: mysql_async::Value, kind: ValueKind) -> Value {
    match val {
        mysql_async::Value::NULL => Value::Null,
        mysql_async::Value::Bytes(bytes) => {
            if kind == ValueKind::Bytes {
                return Value::Bytes(bytes);
            }
            match String::from_utf8(bytes) {
                // Zero dates and out-of-range TIME values stay textual
                Ok(s) => Value::from_text(&s, kind).unwrap_or(Value::String(s)),
                Err(e) => Value::Bytes(e.into_bytes()),
            }
        }
        mysql_async::Value::Int(i) => Value::Int64(i),
        mysql_async::Value::UInt(u) => match i64::try_from(u) {
            Ok(signed) => Value::Int64(signed),
            Err(_) => Value::UInt64(u),
        },
        mysql_async::Value::Float(f) => Value::Float32(f),
        mysql_async::Value::Double(d) => Value::Float64(d),
        mysql_async::Value::Date(year, month, day, hour, min, sec, micro) => {
            let date = chrono::NaiveDate::from_ymd_opt(year as i32, month as u32, day as u32);
            match (kind, date) {
                (ValueKind::Date, Some(date)) => Value::Date(date),
                (_, Some(date)) => date
                    .and_hms_micro_opt(hour as u32, min as u32, sec as u32, micro)
                    .map(Value::DateTime)
                    .unwrap_or(Value::Null),
                (_, None) => Value::String(format!(
                    "{:04}-{:02}-{:02} {:02}:{:02}:{:02}",
                    year, month, day, hour, min, sec
                )),
            }
        }
        mysql_async::Value::Time(negative, days, hours, mins, secs, micros) => {
            let total_hours = days * 24 + hours as u32;
            let sign = if negative { "-" } else { "" };
            Value::String(format!(
                "{}{:02}:{:02}:{:02}.{:06}",
                sign, total_hours, mins, secs, micros
            ))
        }
    }
}

fn decode_rows(columns: &[Column], mysql_rows: Vec<MySqlRow>) -> (Vec<ColumnMeta>, Vec<Row>) {
    let kinds: Vec<ValueKind> = columns
        .iter()
        .map(|col| value_kind(col.column_type(), col.flags(), col.character_set()))
        .collect();

    let metas = columns
        .iter()
        .enumerate()
        .map(|(idx, col)| {
            ColumnMeta::new(
                col.name_str(),
                type_label(col.column_type(), col.flags(), col.character_set()),
                idx,
            )
        })
        .collect();

    let rows = mysql_rows
        .into_iter()
        .map(|mut mysql_row| {
            let values = kinds
                .iter()
                .enumerate()
                .map(|(idx, kind)| {
                    let raw: mysql_async::Value =
                        mysql_row.take(idx).unwrap_or(mysql_async::Value::NULL);
                    mysql_value_to_value(raw, *kind)
                })
                .collect();
            Row::new(values)
        })
        .collect();

    (metas, rows)
}

#[async_trait]
impl Connection for MySqlConnection {
    fn driver_name(&self) -> &str {
        "mysql"
    }

    fn dialect(&self) -> Dialect {
        Dialect::MySql
    }

    #[tracing::instrument(skip(self, sql), fields(sql_preview = %sql.chars().take(100).collect::<String>(), connection_id = self.connection_id))]
    async fn execute(&self, sql: &str) -> Result<Vec<ProvisionalResult>> {
        let mut conn = self.conn.lock().await;
        let mut result = conn.query_iter(sql).await.map_err(|e| self.classify(e))?;

        let mut outputs = Vec::new();
        while !result.is_empty() {
            let columns = result.columns_ref().to_vec();
            if columns.is_empty() {
                let affected = result.affected_rows();
                // Consuming the empty set advances to the next one
                let _: Vec<MySqlRow> = result.collect().await.map_err(|e| self.classify(e))?;
                outputs.push(ProvisionalResult::affected(affected));
                continue;
            }

            let mysql_rows: Vec<MySqlRow> = result.collect().await.map_err(|e| self.classify(e))?;
            let (metas, rows) = decode_rows(&columns, mysql_rows);
            outputs.push(ProvisionalResult::rows(metas, rows));
        }
        drop(result);

        // A CALL ends with a status packet after its result sets; only the
        // result sets are reported.
        if outputs.iter().any(ProvisionalResult::has_row_descriptor) {
            outputs.retain(ProvisionalResult::has_row_descriptor);
        }

        // An empty response still is a completed statement
        if outputs.is_empty() {
            outputs.push(ProvisionalResult::affected(conn.affected_rows()));
        }

        tracing::debug!(result_sets = outputs.len(), "statement executed");
        Ok(outputs)
    }

    async fn begin(&self) -> Result<()> {
        tracing::debug!("beginning MySQL transaction");
        self.simple("START TRANSACTION").await
    }

    async fn commit(&self) -> Result<()> {
        tracing::debug!("committing MySQL transaction");
        self.simple("COMMIT").await
    }

    async fn rollback(&self) -> Result<()> {
        tracing::debug!("rolling back MySQL transaction");
        self.simple("ROLLBACK").await
    }

    fn is_closed(&self) -> bool {
        self.closed.load(Ordering::SeqCst)
    }

    fn cancel_handle(&self) -> Option<Arc<dyn QueryCancelHandle>> {
        Some(Arc::new(MySqlCancelHandle {
            opts: self.opts.clone(),
            connection_id: self.connection_id,
        }))
    }

    /// The next command on the session first discards whatever the abandoned
    /// statement left unread, including its "query interrupted" error. A kill
    /// that arrives after the statement finished interrupts the probe
    /// instead, which is retried.
    async fn settle_after_cancel(&self) -> Result<()> {
        let mut last = Ok(());
        for attempt in 1..=SETTLE_ATTEMPTS {
            match self.simple("DO 1").await {
                Ok(()) => {
                    tracing::debug!(
                        attempt,
                        connection_id = self.connection_id,
                        "MySQL session settled after cancel"
                    );
                    return Ok(());
                }
                Err(SqlbatchError::Cancelled) => last = Err(SqlbatchError::Cancelled),
                Err(err) => return Err(err),
            }
        }
        last
    }
}
