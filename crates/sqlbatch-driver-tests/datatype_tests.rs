//! Native type decoding through the batch executor
//!
//! Each value must arrive in the variant matching its column's native type:
//! integers stay integers, exact numerics keep their scale, NULL stays NULL.

use crate::fixtures::{TestDriver, test_connection};
use anyhow::Result;
use pretty_assertions::assert_eq;
use rstest::rstest;
use sqlbatch_core::Value;
use sqlbatch_query::{BatchExecutor, BatchStatus, ResultRecord};

async fn single_row(driver: TestDriver, sql: &str) -> Result<Option<ResultRecord>> {
    let Some(conn) = test_connection(driver).await? else {
        return Ok(None);
    };
    let outcome = BatchExecutor::with_defaults().run(sql, None, &conn).await;
    assert_eq!(outcome.status, BatchStatus::Completed, "{:?}", outcome.error);
    let record = outcome
        .records
        .into_iter()
        .next()
        .ok_or_else(|| anyhow::anyhow!("no record for {sql}"))?;
    assert_eq!(record.error, None);
    assert_eq!(record.rows.len(), 1);
    Ok(Some(record))
}

#[rstest]
#[case::postgres(TestDriver::Postgres)]
#[tokio::test]
async fn test_postgres_scalar_types(#[case] driver: TestDriver) -> Result<()> {
    let sql = "SELECT 1::int8 AS a, 'a'::text AS b, NULL::int4 AS c, 1.50::numeric AS d, true AS e;";
    let Some(record) = single_row(driver, sql).await? else {
        return Ok(());
    };

    assert_eq!(record.column_names, vec!["a", "b", "c", "d", "e"]);
    assert_eq!(record.column_type_names, vec!["INT8", "TEXT", "INT4", "NUMERIC", "BOOL"]);
    assert_eq!(
        record.rows[0].values,
        vec![
            Value::Int64(1),
            Value::String("a".into()),
            Value::Null,
            Value::Decimal("1.50".into()),
            Value::Bool(true),
        ]
    );
    Ok(())
}

#[rstest]
#[case::postgres(TestDriver::Postgres)]
#[tokio::test]
async fn test_postgres_structured_types(#[case] driver: TestDriver) -> Result<()> {
    let sql = r#"SELECT '\x0102'::bytea AS b,
        'a0eebc99-9c0b-4ef8-bb6d-6bb9bd380a11'::uuid AS u,
        '{"k": 1}'::jsonb AS j,
        DATE '2024-01-02' AS d,
        ARRAY[1, 2, 3] AS arr;"#;
    let Some(record) = single_row(driver, sql).await? else {
        return Ok(());
    };

    let values = &record.rows[0].values;
    assert_eq!(values[0], Value::Bytes(vec![1, 2]));
    assert_eq!(
        values[1],
        Value::Uuid(uuid::Uuid::parse_str("a0eebc99-9c0b-4ef8-bb6d-6bb9bd380a11")?)
    );
    assert!(matches!(values[2], Value::Json(_)), "{:?}", values[2]);
    assert_eq!(values[2].to_text(), r#"{"k":1}"#);
    assert!(matches!(values[3], Value::Date(_)));
    assert_eq!(values[3].to_text(), "2024-01-02");
    assert_eq!(
        values[4],
        Value::Array(vec![Value::Int64(1), Value::Int64(2), Value::Int64(3)])
    );
    Ok(())
}

#[rstest]
#[case::postgres(TestDriver::Postgres)]
#[tokio::test]
async fn test_postgres_types_without_binary_decoder(#[case] driver: TestDriver) -> Result<()> {
    let sql = "SELECT INTERVAL '1 day' AS i, '1.00'::money AS m, 7::int4 AS n, ARRAY[1.5, 2.5]::float8[] AS f;";
    let Some(record) = single_row(driver, sql).await? else {
        return Ok(());
    };

    assert_eq!(record.column_type_names, vec!["INTERVAL", "MONEY", "INT4", "_FLOAT8"]);
    let values = &record.rows[0].values;
    assert_eq!(values[0], Value::String("1 day".into()));
    assert!(
        matches!(&values[1], Value::String(money) if money.contains("1.00")),
        "{:?}",
        values[1]
    );
    assert_eq!(values[2], Value::Int64(7));
    assert_eq!(
        values[3],
        Value::Array(vec![Value::Float64(1.5), Value::Float64(2.5)])
    );
    Ok(())
}

#[rstest]
#[case::postgres(TestDriver::Postgres)]
#[tokio::test]
async fn test_postgres_binary_arrays_and_char(#[case] driver: TestDriver) -> Result<()> {
    let sql = r#"SELECT ARRAY[1.5, NULL]::float8[] AS f, ARRAY[true, false] AS b, 'x'::"char" AS c;"#;
    let Some(record) = single_row(driver, sql).await? else {
        return Ok(());
    };

    assert_eq!(
        record.rows[0].values,
        vec![
            Value::Array(vec![Value::Float64(1.5), Value::Null]),
            Value::Array(vec![Value::Bool(true), Value::Bool(false)]),
            Value::String("x".into()),
        ]
    );
    Ok(())
}

#[rstest]
#[case::postgres(TestDriver::Postgres)]
#[tokio::test]
async fn test_postgres_large_numeric_keeps_digits(#[case] driver: TestDriver) -> Result<()> {
    let sql = "SELECT 12345678901234567890.000100::numeric AS n, (-0.5)::numeric AS m;";
    let Some(record) = single_row(driver, sql).await? else {
        return Ok(());
    };

    assert_eq!(
        record.rows[0].values,
        vec![
            Value::Decimal("12345678901234567890.000100".into()),
            Value::Decimal("-0.5".into()),
        ]
    );
    Ok(())
}

#[rstest]
#[case::mysql(TestDriver::Mysql)]
#[tokio::test]
async fn test_mysql_scalar_types(#[case] driver: TestDriver) -> Result<()> {
    let sql = "SELECT 7 AS a, 'x' AS b, NULL AS c, CAST(1.50 AS DECIMAL(5,2)) AS d, 2.5e0 AS e;";
    let Some(record) = single_row(driver, sql).await? else {
        return Ok(());
    };

    assert_eq!(record.column_names, vec!["a", "b", "c", "d", "e"]);
    assert_eq!(record.column_type_names[3], "DECIMAL");
    assert_eq!(
        record.rows[0].values,
        vec![
            Value::Int64(7),
            Value::String("x".into()),
            Value::Null,
            Value::Decimal("1.50".into()),
            Value::Float64(2.5),
        ]
    );
    Ok(())
}

#[rstest]
#[case::mysql(TestDriver::Mysql)]
#[tokio::test]
async fn test_mysql_unsigned_bigint(#[case] driver: TestDriver) -> Result<()> {
    let sql = "SELECT CAST(18446744073709551615 AS UNSIGNED) AS big, CAST(5 AS UNSIGNED) AS small;";
    let Some(record) = single_row(driver, sql).await? else {
        return Ok(());
    };

    assert_eq!(record.column_type_names, vec!["UNSIGNED BIGINT", "UNSIGNED BIGINT"]);
    assert_eq!(
        record.rows[0].values,
        vec![Value::UInt64(u64::MAX), Value::Int64(5)]
    );
    Ok(())
}

#[rstest]
#[case::mysql(TestDriver::Mysql)]
#[tokio::test]
async fn test_mysql_temporal_and_binary(#[case] driver: TestDriver) -> Result<()> {
    let sql = "SELECT DATE '2024-01-02' AS d, TIMESTAMP '2024-01-02 03:04:05' AS ts, UNHEX('0102') AS b;";
    let Some(record) = single_row(driver, sql).await? else {
        return Ok(());
    };

    let values = &record.rows[0].values;
    assert!(matches!(values[0], Value::Date(_)));
    assert_eq!(values[0].to_text(), "2024-01-02");
    assert!(matches!(values[1], Value::DateTime(_)));
    assert_eq!(values[2], Value::Bytes(vec![1, 2]));
    Ok(())
}
