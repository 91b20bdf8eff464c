// ABOUTME: Conversions between tokio-postgres rows/parameters and backend-neutral Values
// ABOUTME: Parameters are converted to the type PostgreSQL inferred for the prepared statement

use anyhow::{anyhow, bail, Context, Result};
use chrono::{DateTime, NaiveDate, NaiveDateTime, Utc};
use rust_decimal::prelude::{FromPrimitive, ToPrimitive};
use rust_decimal::Decimal;
use tokio_postgres::types::{ToSql, Type};
use tokio_postgres::Row;

use crate::value::Value;

/// Boxed statement parameter, as the writer collects them per row.
pub type SqlParam = Box<dyn ToSql + Sync + Send>;

fn get<'a, T>(row: &'a Row, idx: usize) -> Result<Option<T>>
where
    T: tokio_postgres::types::FromSql<'a>,
{
    row.try_get::<_, Option<T>>(idx)
        .with_context(|| format!("Failed to decode column {}", row.columns()[idx].name()))
}

/// Read column `idx` of a row as a [`Value`], driven by the column's type.
///
/// Types without a native mapping are read as text; a column that cannot be
/// read as text either is an error rather than a silent NULL.
pub fn value_from_row(row: &Row, idx: usize) -> Result<Value> {
    let ty = row.columns()[idx].type_().clone();
    let value = match ty {
        Type::BOOL => get::<bool>(row, idx)?.map(Value::Bool),
        Type::INT2 => get::<i16>(row, idx)?.map(|v| Value::Int(v.into())),
        Type::INT4 => get::<i32>(row, idx)?.map(|v| Value::Int(v.into())),
        Type::INT8 => get::<i64>(row, idx)?.map(Value::Int),
        Type::OID => get::<u32>(row, idx)?.map(|v| Value::Int(v.into())),
        Type::FLOAT4 => get::<f32>(row, idx)?.map(|v| Value::Float(v.into())),
        Type::FLOAT8 => get::<f64>(row, idx)?.map(Value::Float),
        Type::NUMERIC => get::<Decimal>(row, idx)?.map(Value::Decimal),
        Type::DATE => get::<NaiveDate>(row, idx)?.map(Value::Date),
        Type::TIMESTAMP => get::<NaiveDateTime>(row, idx)?.map(Value::Timestamp),
        Type::TIMESTAMPTZ => get::<DateTime<Utc>>(row, idx)?.map(Value::TimestampTz),
        Type::JSON | Type::JSONB => get::<serde_json::Value>(row, idx)?.map(Value::Json),
        Type::BYTEA => get::<Vec<u8>>(row, idx)?.map(Value::Bytes),
        Type::UUID => get::<uuid::Uuid>(row, idx)?.map(Value::Uuid),
        _ => get::<String>(row, idx)
            .with_context(|| format!("Unsupported PostgreSQL column type {}", ty))?
            .map(Value::Text),
    };
    Ok(value.unwrap_or(Value::Null))
}

/// Read every column of a row.
pub fn row_to_values(row: &Row) -> Result<Vec<Value>> {
    (0..row.len()).map(|idx| value_from_row(row, idx)).collect()
}

fn as_bool(value: &Value) -> Result<Option<bool>> {
    Ok(match value {
        Value::Null => None,
        Value::Bool(v) => Some(*v),
        Value::Int(v) => Some(*v != 0),
        Value::Text(v) => match v.trim().to_ascii_lowercase().as_str() {
            "t" | "true" | "1" | "y" | "yes" => Some(true),
            "f" | "false" | "0" | "n" | "no" => Some(false),
            _ => bail!("Cannot convert '{}' to boolean", v),
        },
        other => bail!("Cannot convert {} to boolean", other),
    })
}

fn as_i64(value: &Value) -> Result<Option<i64>> {
    Ok(match value {
        Value::Null => None,
        Value::Int(v) => Some(*v),
        Value::Bool(v) => Some(i64::from(*v)),
        Value::Float(v) if v.fract() == 0.0 => Some(*v as i64),
        Value::Decimal(v) if v.fract().is_zero() => v.to_i64(),
        Value::Text(v) => Some(
            v.trim()
                .parse()
                .with_context(|| format!("Cannot convert '{}' to integer", v))?,
        ),
        other => bail!("Cannot convert {} to integer", other),
    })
}

fn as_f64(value: &Value) -> Result<Option<f64>> {
    Ok(match value {
        Value::Null => None,
        Value::Text(v) => Some(
            v.trim()
                .parse()
                .with_context(|| format!("Cannot convert '{}' to float", v))?,
        ),
        other => Some(
            other
                .as_f64()
                .ok_or_else(|| anyhow!("Cannot convert {} to float", other))?,
        ),
    })
}

fn as_decimal(value: &Value) -> Result<Option<Decimal>> {
    Ok(match value {
        Value::Null => None,
        Value::Decimal(v) => Some(*v),
        Value::Int(v) => Some(Decimal::from(*v)),
        Value::Float(v) => {
            Some(Decimal::from_f64(*v).ok_or_else(|| anyhow!("Cannot convert {} to numeric", v))?)
        }
        Value::Text(v) => Some(
            v.trim()
                .parse()
                .with_context(|| format!("Cannot convert '{}' to numeric", v))?,
        ),
        other => bail!("Cannot convert {} to numeric", other),
    })
}

fn as_text(value: &Value) -> Result<Option<String>> {
    Ok(match value {
        Value::Null => None,
        Value::Text(v) => Some(v.clone()),
        Value::Bytes(v) => Some(
            String::from_utf8(v.clone()).context("Cannot convert non UTF-8 bytes to text")?,
        ),
        other => Some(other.to_string()),
    })
}

fn as_utc(value: &Value) -> Result<Option<DateTime<Utc>>> {
    match value {
        Value::Null => Ok(None),
        other => other
            .as_utc()
            .map(Some)
            .ok_or_else(|| anyhow!("Cannot convert {} to timestamp", other)),
    }
}

fn as_json(value: &Value) -> Result<Option<serde_json::Value>> {
    Ok(match value {
        Value::Null => None,
        Value::Json(v) => Some(v.clone()),
        Value::Text(v) => Some(
            serde_json::from_str(v).unwrap_or_else(|_| serde_json::Value::String(v.clone())),
        ),
        other => Some(serde_json::to_value(other).context("Cannot convert value to JSON")?),
    })
}

fn as_bytes(value: &Value) -> Result<Option<Vec<u8>>> {
    Ok(match value {
        Value::Null => None,
        Value::Bytes(v) => Some(v.clone()),
        Value::Text(v) => Some(v.as_bytes().to_vec()),
        other => bail!("Cannot convert {} to bytes", other),
    })
}

fn as_uuid(value: &Value) -> Result<Option<uuid::Uuid>> {
    Ok(match value {
        Value::Null => None,
        Value::Uuid(v) => Some(*v),
        Value::Text(v) => Some(
            v.trim()
                .parse()
                .with_context(|| format!("Cannot convert '{}' to uuid", v))?,
        ),
        other => bail!("Cannot convert {} to uuid", other),
    })
}

/// Convert a [`Value`] to a parameter of the given PostgreSQL type.
///
/// NULL becomes a typed `None` so it is accepted by any parameter slot.
pub fn to_sql_param(value: &Value, ty: &Type) -> Result<SqlParam> {
    let param: SqlParam = match *ty {
        Type::BOOL => Box::new(as_bool(value)?),
        Type::INT2 => Box::new(
            as_i64(value)?
                .map(i16::try_from)
                .transpose()
                .context("Value out of range for smallint")?,
        ),
        Type::INT4 => Box::new(
            as_i64(value)?
                .map(i32::try_from)
                .transpose()
                .context("Value out of range for integer")?,
        ),
        Type::INT8 => Box::new(as_i64(value)?),
        Type::FLOAT4 => Box::new(as_f64(value)?.map(|v| v as f32)),
        Type::FLOAT8 => Box::new(as_f64(value)?),
        Type::NUMERIC => Box::new(as_decimal(value)?),
        Type::DATE => Box::new(match value {
            Value::Date(v) => Some(*v),
            other => as_utc(other)?.map(|ts| ts.date_naive()),
        }),
        Type::TIMESTAMP => Box::new(match value {
            Value::Timestamp(v) => Some(*v),
            other => as_utc(other)?.map(|ts| ts.naive_utc()),
        }),
        Type::TIMESTAMPTZ => Box::new(as_utc(value)?),
        Type::JSON | Type::JSONB => Box::new(as_json(value)?),
        Type::BYTEA => Box::new(as_bytes(value)?),
        Type::UUID => Box::new(as_uuid(value)?),
        _ => Box::new(as_text(value)?),
    };
    Ok(param)
}

/// Convert a row of values to the parameter types of a prepared statement.
pub fn to_sql_params(values: &[Value], types: &[Type]) -> Result<Vec<SqlParam>> {
    if values.len() != types.len() {
        bail!(
            "Statement expects {} parameters but {} values were given",
            types.len(),
            values.len()
        );
    }
    values
        .iter()
        .zip(types)
        .map(|(value, ty)| to_sql_param(value, ty))
        .collect()
}
