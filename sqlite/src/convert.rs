//! Conversion between native column values and SQLite storage classes.
//!
//! SQLite has no array or timestamp types, so values are stored as:
//!
//! | Native type   | Storage class                                     |
//! |---------------|---------------------------------------------------|
//! | `Bool`        | `INTEGER` 0 or 1                                  |
//! | `Int4/Int8`   | `INTEGER`                                         |
//! | `Float4/8`    | `REAL`                                            |
//! | `Text`        | `TEXT`                                            |
//! | `Bytea`       | `BLOB`                                            |
//! | `Timestamptz` | `TEXT`, RFC 3339 in UTC with nanoseconds          |
//! | arrays        | `TEXT` holding a JSON array of the elements       |
//!
//! Inside JSON arrays, bytes are base64 strings and timestamps RFC 3339
//! strings. Floats are written in their shortest exact form and parsed back
//! bit for bit; NaN and the infinities, which JSON cannot hold, are the
//! strings `"NaN"`, `"inf"` and `"-inf"`. A singular NaN is stored as the
//! text `NaN`, since SQLite turns a NaN REAL into NULL.
//!
//! On decode, timestamps are also accepted in SQLite's own
//! `YYYY-MM-DD HH:MM:SS` format and as integer Unix seconds.

use base64::Engine as _;
use base64::engine::general_purpose::STANDARD as BASE64;
use chrono::{DateTime, NaiveDateTime, SecondsFormat, Utc};
use protorow_core::{NativeType, NativeValue, Scalar, ScalarType, Transcoder};
use rusqlite::ToSql;
use rusqlite::types::{ToSqlOutput, Value, ValueRef};
use serde_json::Value as Json;

use crate::error::{Result, SqliteError};

/// Binds a [`Transcoder`] as a statement parameter.
#[derive(Debug, Clone, Copy)]
pub struct SqlArg<'a>(pub &'a Transcoder);

impl ToSql for SqlArg<'_> {
    fn to_sql(&self) -> rusqlite::Result<ToSqlOutput<'_>> {
        let out = match self.0.get() {
            NativeValue::Null => ToSqlOutput::Owned(Value::Null),
            NativeValue::Scalar(Scalar::Text(s)) => {
                ToSqlOutput::Borrowed(ValueRef::Text(s.as_bytes()))
            }
            NativeValue::Scalar(Scalar::Bytea(b)) => {
                ToSqlOutput::Borrowed(ValueRef::Blob(b.as_slice()))
            }
            NativeValue::Scalar(s) => ToSqlOutput::Owned(scalar_to_value(s)),
            NativeValue::Array(elems) => {
                let json = array_to_json(elems)
                    .map_err(|e| rusqlite::Error::ToSqlConversionFailure(Box::new(e)))?;
                ToSqlOutput::Owned(Value::Text(json))
            }
        };
        Ok(out)
    }
}

fn scalar_to_value(scalar: &Scalar) -> Value {
    match scalar {
        Scalar::Bool(v) => Value::Integer(i64::from(*v)),
        Scalar::Int4(v) => Value::Integer(i64::from(*v)),
        Scalar::Int8(v) => Value::Integer(*v),
        Scalar::Float4(v) => float_to_value(f64::from(*v)),
        Scalar::Float8(v) => float_to_value(*v),
        Scalar::Text(v) => Value::Text(v.clone()),
        Scalar::Bytea(v) => Value::Blob(v.clone()),
        Scalar::Timestamptz(v) => Value::Text(format_timestamp(v)),
    }
}

fn float_to_value(v: f64) -> Value {
    if v.is_nan() {
        Value::Text(NAN.to_string())
    } else {
        Value::Real(v)
    }
}

const NAN: &str = "NaN";
const INFINITY: &str = "inf";
const NEG_INFINITY: &str = "-inf";

fn non_finite_name(v: f64) -> &'static str {
    if v.is_nan() {
        NAN
    } else if v > 0.0 {
        INFINITY
    } else {
        NEG_INFINITY
    }
}

fn parse_non_finite(s: &str) -> Option<f64> {
    match s {
        NAN => Some(f64::NAN),
        INFINITY => Some(f64::INFINITY),
        NEG_INFINITY => Some(f64::NEG_INFINITY),
        _ => None,
    }
}

/// Formats a timestamp the way it is stored.
pub fn format_timestamp(ts: &DateTime<Utc>) -> String {
    ts.to_rfc3339_opts(SecondsFormat::AutoSi, true)
}

/// Parses a stored timestamp.
///
/// # Errors
///
/// Returns [`SqliteError::ConversionError`] if `s` is neither RFC 3339 nor
/// `YYYY-MM-DD HH:MM:SS[.f]`.
pub fn parse_timestamp(s: &str) -> Result<DateTime<Utc>> {
    if let Ok(ts) = DateTime::parse_from_rfc3339(s) {
        return Ok(ts.with_timezone(&Utc));
    }
    NaiveDateTime::parse_from_str(s, "%Y-%m-%d %H:%M:%S%.f")
        .map(|naive| naive.and_utc())
        .map_err(|e| SqliteError::ConversionError(format!("invalid timestamp {s:?}: {e}")))
}

/// Encodes array elements as JSON text.
pub fn array_to_json(elems: &[Scalar]) -> Result<String> {
    let values: Vec<Json> = elems.iter().map(scalar_to_json).collect();
    Ok(serde_json::to_string(&values)?)
}

fn scalar_to_json(scalar: &Scalar) -> Json {
    match scalar {
        Scalar::Bool(v) => Json::Bool(*v),
        Scalar::Int4(v) => Json::from(*v),
        Scalar::Int8(v) => Json::from(*v),
        Scalar::Float4(v) => float_to_json(f64::from(*v)),
        Scalar::Float8(v) => float_to_json(*v),
        Scalar::Text(v) => Json::String(v.clone()),
        Scalar::Bytea(v) => Json::String(BASE64.encode(v)),
        Scalar::Timestamptz(v) => Json::String(format_timestamp(v)),
    }
}

fn float_to_json(v: f64) -> Json {
    match serde_json::Number::from_f64(v) {
        Some(n) => Json::Number(n),
        None => Json::String(non_finite_name(v).to_string()),
    }
}

/// Decodes a stored value into a native value of type `ty`.
///
/// # Errors
///
/// Returns [`SqliteError::ConversionError`] when the storage class does not
/// fit `ty` or an integer is out of range, and [`SqliteError::JsonError`]
/// for malformed array text.
pub fn decode(value: ValueRef<'_>, ty: NativeType) -> Result<NativeValue> {
    match (value, ty) {
        (ValueRef::Null, _) => Ok(NativeValue::Null),
        (value, NativeType::Scalar(t)) => decode_scalar(value, t).map(NativeValue::Scalar),
        (ValueRef::Text(text), NativeType::Array(t)) => {
            let elems: Vec<Json> = serde_json::from_slice(text)?;
            elems
                .into_iter()
                .map(|elem| decode_json(elem, t))
                .collect::<Result<Vec<_>>>()
                .map(NativeValue::Array)
        }
        (value, ty) => Err(mismatch(value, ty)),
    }
}

/// Decodes a stored value into `dest`, keeping its declared type.
pub fn decode_into(value: ValueRef<'_>, dest: &mut Transcoder) -> Result<()> {
    let native = decode(value, dest.native_type())?;
    dest.set(native)?;
    Ok(())
}

fn decode_scalar(value: ValueRef<'_>, ty: ScalarType) -> Result<Scalar> {
    let scalar = match (value, ty) {
        (ValueRef::Integer(i), ScalarType::Bool) => Scalar::Bool(i != 0),
        (ValueRef::Integer(i), ScalarType::Int4) => Scalar::Int4(narrow(i)?),
        (ValueRef::Integer(i), ScalarType::Int8) => Scalar::Int8(i),
        (ValueRef::Real(f), ScalarType::Float4) => Scalar::Float4(f as f32),
        (ValueRef::Integer(i), ScalarType::Float4) => Scalar::Float4(i as f32),
        (ValueRef::Real(f), ScalarType::Float8) => Scalar::Float8(f),
        (ValueRef::Integer(i), ScalarType::Float8) => Scalar::Float8(i as f64),
        (ValueRef::Text(t), ScalarType::Float4 | ScalarType::Float8) => {
            let text = utf8(t)?;
            let v = parse_non_finite(text).ok_or_else(|| {
                SqliteError::ConversionError(format!("cannot decode text {text:?} as {ty:?}"))
            })?;
            float_scalar(v, ty)
        }
        (ValueRef::Text(t), ScalarType::Text) => Scalar::Text(utf8(t)?.to_string()),
        (ValueRef::Blob(b) | ValueRef::Text(b), ScalarType::Bytea) => Scalar::Bytea(b.to_vec()),
        (ValueRef::Text(t), ScalarType::Timestamptz) => {
            Scalar::Timestamptz(parse_timestamp(utf8(t)?)?)
        }
        (ValueRef::Integer(i), ScalarType::Timestamptz) => {
            Scalar::Timestamptz(DateTime::from_timestamp(i, 0).ok_or_else(|| {
                SqliteError::ConversionError(format!("timestamp {i} is out of range"))
            })?)
        }
        (value, ty) => return Err(mismatch(value, NativeType::Scalar(ty))),
    };
    Ok(scalar)
}

fn decode_json(elem: Json, ty: ScalarType) -> Result<Scalar> {
    let scalar = match (&elem, ty) {
        (Json::Bool(v), ScalarType::Bool) => Scalar::Bool(*v),
        (Json::Number(n), ScalarType::Int4) => match n.as_i64() {
            Some(i) => Scalar::Int4(narrow(i)?),
            None => return Err(json_mismatch(&elem, ty)),
        },
        (Json::Number(n), ScalarType::Int8) => match n.as_i64() {
            Some(i) => Scalar::Int8(i),
            None => return Err(json_mismatch(&elem, ty)),
        },
        (Json::Number(n), ScalarType::Float4) => match n.as_f64() {
            Some(f) => Scalar::Float4(f as f32),
            None => return Err(json_mismatch(&elem, ty)),
        },
        (Json::Number(n), ScalarType::Float8) => match n.as_f64() {
            Some(f) => Scalar::Float8(f),
            None => return Err(json_mismatch(&elem, ty)),
        },
        (Json::String(s), ScalarType::Float4 | ScalarType::Float8) => match parse_non_finite(s) {
            Some(v) => float_scalar(v, ty),
            None => return Err(json_mismatch(&elem, ty)),
        },
        (Json::String(s), ScalarType::Text) => Scalar::Text(s.clone()),
        (Json::String(s), ScalarType::Bytea) => Scalar::Bytea(
            BASE64
                .decode(s)
                .map_err(|e| SqliteError::ConversionError(format!("invalid base64 {s:?}: {e}")))?,
        ),
        (Json::String(s), ScalarType::Timestamptz) => Scalar::Timestamptz(parse_timestamp(s)?),
        _ => return Err(json_mismatch(&elem, ty)),
    };
    Ok(scalar)
}

fn float_scalar(v: f64, ty: ScalarType) -> Scalar {
    if ty == ScalarType::Float4 {
        Scalar::Float4(v as f32)
    } else {
        Scalar::Float8(v)
    }
}

fn narrow(i: i64) -> Result<i32> {
    i32::try_from(i)
        .map_err(|_| SqliteError::ConversionError(format!("{i} does not fit a 32-bit integer")))
}

fn utf8(bytes: &[u8]) -> Result<&str> {
    std::str::from_utf8(bytes).map_err(|e| SqliteError::ConversionError(e.to_string()))
}

fn mismatch(value: ValueRef<'_>, ty: NativeType) -> SqliteError {
    SqliteError::ConversionError(format!(
        "cannot decode SQLite {} as {ty:?}",
        value.data_type()
    ))
}

fn json_mismatch(elem: &Json, ty: ScalarType) -> SqliteError {
    SqliteError::ConversionError(format!("cannot decode array element {elem} as {ty:?}"))
}
