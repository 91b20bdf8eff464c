// ABOUTME: Conversions between mysql_async binary-protocol values and backend-neutral Values
// ABOUTME: Column metadata decides how string-encoded results (DECIMAL, JSON, BLOB) are read

use anyhow::{bail, Context, Result};
use chrono::{Datelike, NaiveDate, Timelike};
use mysql_async::consts::ColumnType as MyType;
use mysql_async::{Column, Row, Value as MyValue};
use rust_decimal::Decimal;

use crate::value::Value;

/// `character_set` id reported for binary strings and blobs.
const BINARY_CHARSET: u16 = 63;

fn is_integer_type(ty: MyType) -> bool {
    matches!(
        ty,
        MyType::MYSQL_TYPE_TINY
            | MyType::MYSQL_TYPE_SHORT
            | MyType::MYSQL_TYPE_INT24
            | MyType::MYSQL_TYPE_LONG
            | MyType::MYSQL_TYPE_LONGLONG
            | MyType::MYSQL_TYPE_YEAR
    )
}

fn is_text(column: &Column) -> bool {
    column.character_set() != BINARY_CHARSET
}

/// Convert one result value using its column metadata.
pub fn value_from_mysql(value: MyValue, column: &Column) -> Result<Value> {
    let ty = column.column_type();
    Ok(match value {
        MyValue::NULL => Value::Null,
        MyValue::Int(i) if ty == MyType::MYSQL_TYPE_TINY && column.column_length() == 1 => {
            Value::Bool(i != 0)
        }
        MyValue::Int(i) => Value::Int(i),
        MyValue::UInt(u) => match i64::try_from(u) {
            Ok(i) => Value::Int(i),
            Err(_) => Value::Decimal(Decimal::from(u)),
        },
        MyValue::Float(f) => Value::Float(f64::from(f)),
        MyValue::Double(d) => Value::Float(d),
        MyValue::Date(year, month, day, hour, minute, second, micros) => {
            let date = NaiveDate::from_ymd_opt(year.into(), month.into(), day.into())
                .with_context(|| {
                    format!("Invalid date {:04}-{:02}-{:02} in {}", year, month, day, column.name_str())
                })?;
            if ty == MyType::MYSQL_TYPE_DATE {
                Value::Date(date)
            } else {
                let ts = date
                    .and_hms_micro_opt(hour.into(), minute.into(), second.into(), micros)
                    .with_context(|| format!("Invalid datetime in {}", column.name_str()))?;
                Value::Timestamp(ts)
            }
        }
        MyValue::Time(negative, days, hours, minutes, seconds, micros) => {
            let sign = if negative { "-" } else { "" };
            let total_hours = days * 24 + u32::from(hours);
            Value::Text(format!(
                "{sign}{total_hours:02}:{minutes:02}:{seconds:02}.{micros:06}"
            ))
        }
        MyValue::Bytes(bytes) => bytes_from_mysql(bytes, column)?,
    })
}

fn bytes_from_mysql(bytes: Vec<u8>, column: &Column) -> Result<Value> {
    let ty = column.column_type();
    let name = column.name_str();

    if ty == MyType::MYSQL_TYPE_JSON {
        let json = serde_json::from_slice(&bytes)
            .with_context(|| format!("Invalid JSON in column {}", name))?;
        return Ok(Value::Json(json));
    }
    if matches!(ty, MyType::MYSQL_TYPE_NEWDECIMAL | MyType::MYSQL_TYPE_DECIMAL) {
        let text = String::from_utf8(bytes).context("DECIMAL value is not UTF-8")?;
        let decimal = text
            .parse::<Decimal>()
            .with_context(|| format!("Invalid DECIMAL '{}' in column {}", text, name))?;
        return Ok(Value::Decimal(decimal));
    }
    if ty == MyType::MYSQL_TYPE_BIT || !is_text(column) {
        return Ok(Value::Bytes(bytes));
    }

    let text = String::from_utf8(bytes)
        .with_context(|| format!("Column {} holds text that is not UTF-8", name))?;
    if is_integer_type(ty) {
        if let Ok(i) = text.parse::<i64>() {
            return Ok(Value::Int(i));
        }
    }
    Ok(Value::Text(text))
}

/// Read every column of a row.
pub fn row_to_values(row: Row) -> Result<Vec<Value>> {
    let columns = row.columns();
    row.unwrap()
        .into_iter()
        .zip(columns.iter())
        .map(|(value, column)| value_from_mysql(value, column))
        .collect()
}

/// Convert a [`Value`] to a statement parameter.
///
/// MySQL coerces string parameters into the target column type, so decimals,
/// JSON and UUIDs travel as their text form.
pub fn to_mysql(value: &Value) -> MyValue {
    match value {
        Value::Null => MyValue::NULL,
        Value::Bool(v) => MyValue::Int(i64::from(*v)),
        Value::Int(v) => MyValue::Int(*v),
        Value::Float(v) => MyValue::Double(*v),
        Value::Decimal(v) => MyValue::Bytes(v.to_string().into_bytes()),
        Value::Text(v) => MyValue::Bytes(v.as_bytes().to_vec()),
        Value::Bytes(v) => MyValue::Bytes(v.clone()),
        Value::Date(d) => MyValue::Date(d.year() as u16, d.month() as u8, d.day() as u8, 0, 0, 0, 0),
        Value::Timestamp(ts) => datetime(ts),
        Value::TimestampTz(ts) => datetime(&ts.naive_utc()),
        Value::Json(v) => MyValue::Bytes(v.to_string().into_bytes()),
        Value::Uuid(v) => MyValue::Bytes(v.to_string().into_bytes()),
    }
}

fn datetime(ts: &chrono::NaiveDateTime) -> MyValue {
    MyValue::Date(
        ts.year() as u16,
        ts.month() as u8,
        ts.day() as u8,
        ts.hour() as u8,
        ts.minute() as u8,
        ts.second() as u8,
        (ts.nanosecond() / 1_000).min(999_999),
    )
}

/// Flatten rows into positional parameters, checking each row's width.
pub fn to_params(rows: &[Vec<Value>], width: usize) -> Result<Vec<MyValue>> {
    let mut params = Vec::with_capacity(rows.len() * width);
    for row in rows {
        if row.len() != width {
            bail!("Row has {} values but {} columns were expected", row.len(), width);
        }
        params.extend(row.iter().map(to_mysql));
    }
    Ok(params)
}

#[cfg(test)]
mod tests {
    use super::*;
    use chrono::{TimeZone, Utc};

    fn column(ty: MyType) -> Column {
        Column::new(ty).with_name(b"c")
    }

    #[test]
    fn test_scalar_values() {
        assert_eq!(
            value_from_mysql(MyValue::Int(7), &column(MyType::MYSQL_TYPE_LONGLONG)).unwrap(),
            Value::Int(7)
        );
        assert_eq!(
            value_from_mysql(MyValue::UInt(u64::MAX), &column(MyType::MYSQL_TYPE_LONGLONG))
                .unwrap(),
            Value::Decimal(Decimal::from(u64::MAX))
        );
        assert_eq!(
            value_from_mysql(MyValue::NULL, &column(MyType::MYSQL_TYPE_VARCHAR)).unwrap(),
            Value::Null
        );
    }

    #[test]
    fn test_temporal_values_follow_column_type() {
        let date = value_from_mysql(
            MyValue::Date(2024, 2, 29, 0, 0, 0, 0),
            &column(MyType::MYSQL_TYPE_DATE),
        )
        .unwrap();
        assert_eq!(date, Value::Date(NaiveDate::from_ymd_opt(2024, 2, 29).unwrap()));

        let ts = value_from_mysql(
            MyValue::Date(2024, 2, 29, 13, 5, 9, 250),
            &column(MyType::MYSQL_TYPE_DATETIME),
        )
        .unwrap();
        assert_eq!(ts.to_string(), "2024-02-29 13:05:09.000250");

        assert!(value_from_mysql(
            MyValue::Date(2024, 2, 30, 0, 0, 0, 0),
            &column(MyType::MYSQL_TYPE_DATE)
        )
        .is_err());
    }

    #[test]
    fn test_string_encoded_values() {
        let decimal = value_from_mysql(
            MyValue::Bytes(b"12.50".to_vec()),
            &column(MyType::MYSQL_TYPE_NEWDECIMAL),
        )
        .unwrap();
        assert_eq!(decimal, Value::Decimal("12.50".parse().unwrap()));

        let json = value_from_mysql(
            MyValue::Bytes(br#"{"a":[1,2]}"#.to_vec()),
            &column(MyType::MYSQL_TYPE_JSON),
        )
        .unwrap();
        assert_eq!(json, Value::Json(serde_json::json!({"a": [1, 2]})));

        let blob = value_from_mysql(
            MyValue::Bytes(vec![0xff, 0x00]),
            &column(MyType::MYSQL_TYPE_BLOB).with_character_set(BINARY_CHARSET),
        )
        .unwrap();
        assert_eq!(blob, Value::Bytes(vec![0xff, 0x00]));
    }

    #[test]
    fn test_to_mysql_parameters() {
        let zoned = Utc.with_ymd_and_hms(2024, 3, 1, 9, 30, 0).unwrap();
        assert_eq!(
            to_mysql(&Value::TimestampTz(zoned)),
            MyValue::Date(2024, 3, 1, 9, 30, 0, 0)
        );
        assert_eq!(to_mysql(&Value::Bool(true)), MyValue::Int(1));
        assert_eq!(
            to_mysql(&Value::Decimal("1.5".parse().unwrap())),
            MyValue::Bytes(b"1.5".to_vec())
        );
    }

    #[test]
    fn test_to_params_checks_row_width() {
        let rows = vec![vec![Value::Int(1), Value::Null], vec![Value::Int(2)]];
        let err = to_params(&rows, 2).unwrap_err();
        assert!(err.to_string().contains("1 values"));
        assert_eq!(to_params(&rows[..1], 2).unwrap().len(), 2);
    }
}
