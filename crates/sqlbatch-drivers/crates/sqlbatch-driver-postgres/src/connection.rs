//! PostgreSQL connection implementation

use async_trait::async_trait;
use std::sync::Arc;
use std::sync::atomic::{AtomicBool, Ordering};
use tokio::sync::Mutex;
use tokio_postgres::{
    CancelToken, Client, NoTls, Row as PgRow, SimpleQueryMessage,
    types::{FromSql, Kind, Type},
};
use sqlbatch_core::{
    ColumnMeta, Connection, Dialect, ProvisionalResult, QueryCancelHandle, Result, Row,
    SqlbatchError, Value, ValueKind,
};

/// Number of probe statements tried while waiting for a cancelled statement
const SETTLE_ATTEMPTS: usize = 3;

/// Cancel handle for PostgreSQL statements.
///
/// This wraps the tokio-postgres `CancelToken` and sends the protocol cancel
/// request over its own short-lived socket.
pub struct PostgresCancelHandle {
    cancel_token: CancelToken,
}

#[async_trait]
impl QueryCancelHandle for PostgresCancelHandle {
    async fn cancel(&self) {
        tracing::debug!("sending cancel request to PostgreSQL server");
        if let Err(e) = self.cancel_token.cancel_query(NoTls).await {
            tracing::warn!(error = %e, "failed to cancel PostgreSQL query");
        } else {
            tracing::debug!("PostgreSQL cancel request sent successfully");
        }
    }
}

fn format_postgres_error(error: &tokio_postgres::Error) -> String {
    let Some(db_error) = error.as_db_error() else {
        return error.to_string();
    };

    let mut message = db_error.message().to_string();

    if let Some(detail) = db_error.detail() {
        if !detail.trim().is_empty() {
            message.push_str(&format!(" (detail: {})", detail));
        }
    }

    if let Some(hint) = db_error.hint() {
        if !hint.trim().is_empty() {
            message.push_str(&format!(" (hint: {})", hint));
        }
    }

    if let Some(column) = db_error.column() {
        if !column.trim().is_empty() {
            message.push_str(&format!(" (column: {})", column));
        }
    }

    match db_error.code().code() {
        "23505" => format!("duplicate value violates unique constraint: {}", message),
        "23503" => format!("foreign key violation: {}", message),
        "23502" => format!("null value violates not-null constraint: {}", message),
        _ => message,
    }
}

/// Whether a SQLSTATE means the session can no longer be used.
///
/// Class 08 is connection exceptions; 57P01..57P03 are admin/crash shutdown
/// and "cannot connect now".
pub(crate) fn is_fatal_sqlstate(code: &str) -> bool {
    code.starts_with("08") || matches!(code, "57P01" | "57P02" | "57P03")
}

/// Map a driver error onto the statement/connection-fatal split.
fn classify_error(error: tokio_postgres::Error) -> SqlbatchError {
    if let Some(db_error) = error.as_db_error() {
        let code = db_error.code().code();
        if code == "57014" {
            return SqlbatchError::Cancelled;
        }
        if is_fatal_sqlstate(code) {
            return SqlbatchError::Connection(format_postgres_error(&error));
        }
        return SqlbatchError::statement(format_postgres_error(&error), Some(code.to_string()));
    }

    if error.is_closed() {
        return SqlbatchError::Connection("PostgreSQL connection closed".into());
    }
    SqlbatchError::Connection(error.to_string())
}

#[derive(Debug)]
pub(crate) struct PgNumericString(pub(crate) String);

/// Label of an enum value; enums are sent as their UTF-8 label.
#[derive(Debug)]
struct PgEnumLabel(String);

impl PgNumericString {
    pub(crate) fn parse(
        raw: &[u8],
    ) -> std::result::Result<String, Box<dyn std::error::Error + Sync + Send>> {
        if raw.len() < 8 {
            return Err("invalid NUMERIC payload: too short".into());
        }

        let ndigits = i16::from_be_bytes([raw[0], raw[1]]) as usize;
        let weight = i16::from_be_bytes([raw[2], raw[3]]);
        let sign = u16::from_be_bytes([raw[4], raw[5]]);
        let dscale = i16::from_be_bytes([raw[6], raw[7]]) as usize;
        let expected_len = 8 + ndigits * 2;

        if raw.len() < expected_len {
            return Err("invalid NUMERIC payload: truncated digits".into());
        }

        match sign {
            0xC000 => return Ok("NaN".to_string()),
            0xD000 => return Ok("Infinity".to_string()),
            0xF000 => return Ok("-Infinity".to_string()),
            _ => {}
        }

        let mut digits = Vec::with_capacity(ndigits);
        for index in 0..ndigits {
            let offset = 8 + index * 2;
            let group = u16::from_be_bytes([raw[offset], raw[offset + 1]]);
            if group > 9999 {
                return Err("invalid NUMERIC payload: group out of range".into());
            }
            digits.push(group);
        }

        let integer_group_count = if weight >= 0 {
            (weight as usize) + 1
        } else {
            0
        };

        let mut integer_text = String::new();
        if integer_group_count == 0 {
            integer_text.push('0');
        } else {
            for group_index in 0..integer_group_count {
                let group = digits.get(group_index).copied().unwrap_or(0);
                if group_index == 0 {
                    integer_text.push_str(&group.to_string());
                } else {
                    integer_text.push_str(&format!("{group:04}"));
                }
            }
        }

        // Groups between the decimal point and the first stored digit group
        // are implicit zeros when the weight is below -1.
        let mut fraction_text = String::new();
        if dscale > 0 {
            if weight < -1 {
                let leading = (-(weight as i32) - 1) as usize;
                fraction_text.push_str(&"0000".repeat(leading));
            }
            let start = integer_group_count.min(digits.len());
            for group in digits.iter().skip(start) {
                fraction_text.push_str(&format!("{group:04}"));
            }

            if fraction_text.len() < dscale {
                fraction_text.push_str(&"0".repeat(dscale - fraction_text.len()));
            } else {
                fraction_text.truncate(dscale);
            }
        }

        let is_zero = integer_text == "0" && fraction_text.bytes().all(|b| b == b'0');

        let mut output = String::new();
        if sign == 0x4000 && !is_zero {
            output.push('-');
        }
        output.push_str(&integer_text);
        if !fraction_text.is_empty() {
            output.push('.');
            output.push_str(&fraction_text);
        }

        Ok(output)
    }
}

impl<'a> FromSql<'a> for PgNumericString {
    fn from_sql(
        _: &Type,
        raw: &'a [u8],
    ) -> std::result::Result<Self, Box<dyn std::error::Error + Sync + Send>> {
        Ok(Self(Self::parse(raw)?))
    }

    fn accepts(ty: &Type) -> bool {
        *ty == Type::NUMERIC
    }
}

impl<'a> FromSql<'a> for PgEnumLabel {
    fn from_sql(
        _: &Type,
        raw: &'a [u8],
    ) -> std::result::Result<Self, Box<dyn std::error::Error + Sync + Send>> {
        Ok(Self(std::str::from_utf8(raw)?.to_string()))
    }

    fn accepts(ty: &Type) -> bool {
        matches!(ty.kind(), Kind::Enum(_))
    }
}

/// PostgreSQL connection wrapper
pub struct PostgresConnection {
    client: Mutex<Client>,
    cancel_token: CancelToken,
    closed: Arc<AtomicBool>,
}

impl PostgresConnection {
    /// Connect to a PostgreSQL database.
    ///
    /// The connection task is spawned on the caller's Tokio runtime.
    pub async fn connect(config: tokio_postgres::Config) -> Result<Self> {
        let (client, connection) = config
            .connect(NoTls)
            .await
            .map_err(|e| SqlbatchError::Connection(format!("Failed to connect to PostgreSQL: {}", e)))?;

        let cancel_token = client.cancel_token();
        let closed = Arc::new(AtomicBool::new(false));
        let closed_flag = Arc::clone(&closed);
        tokio::spawn(async move {
            if let Err(e) = connection.await {
                tracing::error!(error = %e, "PostgreSQL connection error");
            }
            closed_flag.store(true, Ordering::SeqCst);
        });

        Ok(Self {
            client: Mutex::new(client),
            cancel_token,
            closed,
        })
    }

    async fn simple(&self, sql: &str) -> Result<()> {
        let client = self.client.lock().await;
        client.batch_execute(sql).await.map_err(classify_error)
    }
}

#[async_trait]
impl Connection for PostgresConnection {
    fn driver_name(&self) -> &str {
        "postgresql"
    }

    fn dialect(&self) -> Dialect {
        Dialect::PostgreSql
    }

    #[tracing::instrument(skip(self, sql), fields(sql_preview = %sql.chars().take(100).collect::<String>()))]
    async fn execute(&self, sql: &str) -> Result<Vec<ProvisionalResult>> {
        let client = self.client.lock().await;

        // Describing the statement tells us whether it produces rows
        let statement = client.prepare(sql).await.map_err(classify_error)?;

        if statement.columns().is_empty() {
            let rows_affected = client
                .execute(&statement, &[])
                .await
                .map_err(classify_error)?;
            tracing::debug!(affected_rows = rows_affected, "statement executed");
            return Ok(vec![ProvisionalResult::affected(rows_affected)]);
        }

        // Column metadata comes from the description so empty result sets still carry columns
        let columns: Vec<ColumnMeta> = statement
            .columns()
            .iter()
            .enumerate()
            .map(|(idx, col)| ColumnMeta::new(col.name(), type_label(col.type_()), idx))
            .collect();

        if !statement.columns().iter().all(|col| decodes_binary(col.type_())) {
            let types: Vec<Type> = statement.columns().iter().map(|col| col.type_().clone()).collect();
            let rows = query_text(&client, sql, &types).await?;
            tracing::debug!(row_count = rows.len(), "query executed in text format");
            return Ok(vec![ProvisionalResult::rows(columns, rows)]);
        }

        let pg_rows = client
            .query(&statement, &[])
            .await
            .map_err(classify_error)?;

        let mut rows = Vec::with_capacity(pg_rows.len());
        for pg_row in &pg_rows {
            let mut values = Vec::with_capacity(columns.len());
            for idx in 0..columns.len() {
                values.push(postgres_to_value(pg_row, idx)?);
            }
            rows.push(Row::new(values));
        }

        tracing::debug!(row_count = rows.len(), "query executed");
        Ok(vec![ProvisionalResult::rows(columns, rows)])
    }

    async fn begin(&self) -> Result<()> {
        tracing::debug!("beginning PostgreSQL transaction");
        self.simple("BEGIN").await
    }

    async fn commit(&self) -> Result<()> {
        tracing::debug!("committing PostgreSQL transaction");
        self.simple("COMMIT").await
    }

    async fn rollback(&self) -> Result<()> {
        tracing::debug!("rolling back PostgreSQL transaction");
        self.simple("ROLLBACK").await
    }

    fn is_closed(&self) -> bool {
        self.closed.load(Ordering::SeqCst)
    }

    fn cancel_handle(&self) -> Option<Arc<dyn QueryCancelHandle>> {
        Some(Arc::new(PostgresCancelHandle {
            cancel_token: self.cancel_token.clone(),
        }))
    }

    /// Requests are answered in order, so a probe statement completes only
    /// after the abandoned one. A cancel that arrives late hits the probe
    /// instead, which is retried. A statement error (e.g. the probe running
    /// inside the now-aborted transaction) still means the session answered.
    async fn settle_after_cancel(&self) -> Result<()> {
        let client = self.client.lock().await;
        let mut last = Ok(());
        for attempt in 1..=SETTLE_ATTEMPTS {
            match client.simple_query("SELECT 1").await.map_err(classify_error) {
                Err(SqlbatchError::Cancelled) => last = Err(SqlbatchError::Cancelled),
                Err(err) if err.is_connection_fatal() => return Err(err),
                _ => {
                    tracing::debug!(attempt, "PostgreSQL session settled after cancel");
                    return Ok(());
                }
            }
        }
        last
    }
}

/// Type label reported for a column, e.g. `INT4`, `TEXT`, `TIMESTAMPTZ`
pub(crate) fn type_label(ty: &Type) -> String {
    ty.name().to_uppercase()
}

/// Types read through the binary protocol; see [`postgres_to_value`].
const BINARY_TYPES: &[&str] = &[
    "bool", "char", "int2", "int4", "int8", "oid", "float4", "float8", "numeric", "text",
    "varchar", "bpchar", "name", "unknown", "bytea", "uuid", "json", "jsonb", "date", "time",
    "timestamp", "timestamptz", "_bool", "_int2", "_int4", "_int8", "_float4", "_float8",
    "_numeric", "_text", "_varchar", "_bpchar", "_name", "_bytea", "_uuid", "_json", "_jsonb",
    "_date", "_time", "_timestamp", "_timestamptz",
];

/// Whether every value of `ty` has a binary decoder.
///
/// Statements returning any other type (interval, money, inet, timetz,
/// geometric types, domains, ...) are fetched in the server's text format.
pub(crate) fn decodes_binary(ty: &Type) -> bool {
    matches!(ty.kind(), Kind::Enum(_)) || BINARY_TYPES.contains(&ty.name())
}

fn get<'a, T, F>(row: &'a PgRow, idx: usize, wrap: F) -> Result<Value>
where
    T: FromSql<'a>,
    F: FnOnce(T) -> Value,
{
    row.try_get::<_, Option<T>>(idx)
        .map(|value| value.map(wrap).unwrap_or(Value::Null))
        .map_err(|e| {
            SqlbatchError::statement(
                format!("cannot decode column {}: {}", row.columns()[idx].name(), e),
                None,
            )
        })
}

fn array<'a, T, F>(row: &'a PgRow, idx: usize, wrap: F) -> Result<Value>
where
    T: FromSql<'a>,
    F: Fn(T) -> Value,
{
    get::<Vec<Option<T>>, _>(row, idx, |arr| {
        Value::Array(
            arr.into_iter()
                .map(|v| v.map(&wrap).unwrap_or(Value::Null))
                .collect(),
        )
    })
}

/// Convert PostgreSQL row value to our Value type
fn postgres_to_value(row: &PgRow, idx: usize) -> Result<Value> {
    let col = &row.columns()[idx];

    match col.type_().name() {
        "bool" => get::<bool, _>(row, idx, Value::Bool),
        "char" => get::<i8, _>(row, idx, |v| Value::String(char::from(v as u8).to_string())),
        "int2" => get::<i16, _>(row, idx, |v| Value::Int64(v.into())),
        "int4" => get::<i32, _>(row, idx, |v| Value::Int64(v.into())),
        "int8" => get::<i64, _>(row, idx, Value::Int64),
        "oid" => get::<u32, _>(row, idx, |v| Value::Int64(v.into())),
        "float4" => get::<f32, _>(row, idx, Value::Float32),
        "float8" => get::<f64, _>(row, idx, Value::Float64),
        "numeric" => get::<PgNumericString, _>(row, idx, |v| Value::Decimal(v.0)),
        "text" | "varchar" | "bpchar" | "name" | "unknown" => {
            get::<String, _>(row, idx, Value::String)
        }
        "bytea" => get::<Vec<u8>, _>(row, idx, Value::Bytes),
        "uuid" => get::<uuid::Uuid, _>(row, idx, Value::Uuid),
        "json" | "jsonb" => get::<serde_json::Value, _>(row, idx, Value::Json),
        "date" => get::<chrono::NaiveDate, _>(row, idx, Value::Date),
        "time" => get::<chrono::NaiveTime, _>(row, idx, Value::Time),
        "timestamp" => get::<chrono::NaiveDateTime, _>(row, idx, Value::DateTime),
        "timestamptz" => get::<chrono::DateTime<chrono::Utc>, _>(row, idx, Value::DateTimeUtc),
        // Array types - PostgreSQL prefixes array type names with underscore
        "_bool" => array::<bool, _>(row, idx, Value::Bool),
        "_int2" => array::<i16, _>(row, idx, |v| Value::Int64(v.into())),
        "_int4" => array::<i32, _>(row, idx, |v| Value::Int64(v.into())),
        "_int8" => array::<i64, _>(row, idx, Value::Int64),
        "_float4" => array::<f32, _>(row, idx, Value::Float32),
        "_float8" => array::<f64, _>(row, idx, Value::Float64),
        "_numeric" => array::<PgNumericString, _>(row, idx, |v| Value::Decimal(v.0)),
        "_text" | "_varchar" | "_bpchar" | "_name" => array::<String, _>(row, idx, Value::String),
        "_bytea" => array::<Vec<u8>, _>(row, idx, Value::Bytes),
        "_uuid" => array::<uuid::Uuid, _>(row, idx, Value::Uuid),
        "_json" | "_jsonb" => array::<serde_json::Value, _>(row, idx, Value::Json),
        "_date" => array::<chrono::NaiveDate, _>(row, idx, Value::Date),
        "_time" => array::<chrono::NaiveTime, _>(row, idx, Value::Time),
        "_timestamp" => array::<chrono::NaiveDateTime, _>(row, idx, Value::DateTime),
        "_timestamptz" => {
            array::<chrono::DateTime<chrono::Utc>, _>(row, idx, Value::DateTimeUtc)
        }
        _ => get::<PgEnumLabel, _>(row, idx, |label| Value::String(label.0)),
    }
}

/// Run a row-returning statement with the simple query protocol, which
/// returns every cell in the server's text format.
async fn query_text(client: &Client, sql: &str, types: &[Type]) -> Result<Vec<Row>> {
    let messages = client.simple_query(sql).await.map_err(classify_error)?;

    let mut rows = Vec::new();
    for message in messages {
        let SimpleQueryMessage::Row(text_row) = message else {
            continue;
        };
        let mut values = Vec::with_capacity(types.len());
        for (idx, ty) in types.iter().enumerate() {
            let cell = text_row.try_get(idx).map_err(|e| {
                SqlbatchError::statement(format!("cannot read column {}: {}", idx, e), None)
            })?;
            values.push(cell.map(|text| text_to_value(ty, text)).unwrap_or(Value::Null));
        }
        rows.push(Row::new(values));
    }
    Ok(rows)
}

/// Decode one cell of the text format.
///
/// Types without a typed variant keep the server's text, which is the
/// canonical form PostgreSQL itself parses back.
pub(crate) fn text_to_value(ty: &Type, text: &str) -> Value {
    let verbatim = || Value::String(text.to_string());

    if let Kind::Array(element) = ty.kind() {
        // box arrays use ';' between elements
        if element.name() == "box" {
            return verbatim();
        }
        return match parse_text_array(text) {
            Some(items) => Value::Array(
                items
                    .into_iter()
                    .map(|item| item.map(|t| text_to_value(element, &t)).unwrap_or(Value::Null))
                    .collect(),
            ),
            None => verbatim(),
        };
    }

    let kind = match ty.name() {
        "bool" => ValueKind::Bool,
        "int2" | "int4" | "int8" | "oid" => ValueKind::Int64,
        "float4" => ValueKind::Float32,
        "float8" => ValueKind::Float64,
        "bytea" => ValueKind::Bytes,
        "json" | "jsonb" => ValueKind::Json,
        "date" => ValueKind::Date,
        "time" => ValueKind::Time,
        "timestamp" => ValueKind::DateTime,
        "numeric" => return Value::Decimal(text.to_string()),
        "uuid" => return uuid::Uuid::parse_str(text).map(Value::Uuid).unwrap_or_else(|_| verbatim()),
        "timestamptz" => {
            return chrono::DateTime::parse_from_str(text, "%Y-%m-%d %H:%M:%S%.f%#z")
                .map(|ts| Value::DateTimeUtc(ts.with_timezone(&chrono::Utc)))
                .unwrap_or_else(|_| verbatim());
        }
        _ => return verbatim(),
    };
    Value::from_text(text, kind).unwrap_or_else(verbatim)
}

/// Split a one-dimensional array literal such as `{1,NULL,"a,b"}`.
///
/// Returns `None` for multi-dimensional arrays, explicit bounds or anything
/// malformed.
fn parse_text_array(text: &str) -> Option<Vec<Option<String>>> {
    let inner = text.strip_prefix('{')?.strip_suffix('}')?;
    if inner.is_empty() {
        return Some(Vec::new());
    }

    let mut items = Vec::new();
    let mut chars = inner.chars().peekable();
    loop {
        if chars.peek() == Some(&'"') {
            chars.next();
            let mut item = String::new();
            loop {
                match chars.next()? {
                    '\\' => item.push(chars.next()?),
                    '"' => break,
                    c => item.push(c),
                }
            }
            items.push(Some(item));
        } else {
            let mut item = String::new();
            while let Some(&c) = chars.peek() {
                match c {
                    ',' => break,
                    '{' | '}' | '"' => return None,
                    _ => {
                        item.push(c);
                        chars.next();
                    }
                }
            }
            items.push((item != "NULL").then_some(item));
        }

        match chars.next() {
            None => return Some(items),
            Some(',') => {}
            Some(_) => return None,
        }
    }
}
