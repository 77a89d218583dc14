//! Row-mapping decoding and positional parameter binding
//!
//! Every decoded value is a JSON primitive so results serialize losslessly:
//! integers stay integers, DECIMAL becomes a string, and date/time columns
//! use ISO 8601 text. A value formats the same way whether it arrived over
//! the text protocol or as a prepared-statement result.

use chrono::{DateTime, NaiveDate, NaiveDateTime, SecondsFormat, Utc};
use rust_decimal::Decimal;
use serde_json::{Map, Number, Value};
use sqlx::mysql::types::MySqlTime;
use sqlx::mysql::{MySql, MySqlArguments, MySqlRow};
use sqlx::query::Query;
use sqlx::{Column, Row as _, TypeInfo, ValueRef};
use tracing::warn;

/// One result row: column name to value, in column order
pub type Row = Map<String, Value>;

/// Convert a driver row into a row-mapping.
///
/// Duplicate column names get a `_2`, `_3`, ... suffix so keys stay unique.
pub fn row_to_map(row: &MySqlRow) -> Row {
    let mut map = Map::with_capacity(row.columns().len());
    for (index, column) in row.columns().iter().enumerate() {
        let key = unique_key(&map, column.name());
        let value = decode_cell(row, index, column.type_info().name());
        map.insert(key, value);
    }
    map
}

fn unique_key(map: &Row, name: &str) -> String {
    if !map.contains_key(name) {
        return name.to_string();
    }
    (2..)
        .map(|n| format!("{}_{}", name, n))
        .find(|candidate| !map.contains_key(candidate))
        .unwrap_or_else(|| name.to_string())
}

fn decode_cell(row: &MySqlRow, index: usize, type_name: &str) -> Value {
    match row.try_get_raw(index) {
        Ok(raw) if raw.is_null() => return Value::Null,
        Ok(_) => {}
        Err(_) => return Value::Null,
    }

    decode_typed(row, index, type_name).unwrap_or_else(|| decode_bytes(row, index))
}

/// Decode by declared column type; `None` falls back to raw bytes.
///
/// Temporal columns never fall back: their binary encoding is not text.
fn decode_typed(row: &MySqlRow, index: usize, type_name: &str) -> Option<Value> {
    let type_name = type_name.to_ascii_uppercase();

    if type_name.ends_with(" UNSIGNED") {
        return row
            .try_get_unchecked::<u64, _>(index)
            .ok()
            .map(Value::from);
    }

    match type_name.as_str() {
        "BOOLEAN" => row.try_get_unchecked::<bool, _>(index).ok().map(Value::Bool),
        "TINYINT" | "SMALLINT" | "MEDIUMINT" | "INT" | "BIGINT" => row
            .try_get_unchecked::<i64, _>(index)
            .ok()
            .map(Value::from),
        "YEAR" => row
            .try_get_unchecked::<u16, _>(index)
            .ok()
            .map(Value::from),
        "FLOAT" => row.try_get_unchecked::<f32, _>(index).ok().map(f32_value),
        "DOUBLE" => row
            .try_get_unchecked::<f64, _>(index)
            .ok()
            .map(float_value),
        "DECIMAL" => row
            .try_get_unchecked::<Decimal, _>(index)
            .ok()
            .map(|v| Value::String(v.to_string())),
        "DATE" => Some(match row.try_get_unchecked::<NaiveDate, _>(index) {
            Ok(v) => Value::String(v.format("%Y-%m-%d").to_string()),
            Err(_) => decode_raw_temporal(row, index, RawDateTime::date),
        }),
        "DATETIME" => Some(match row.try_get_unchecked::<NaiveDateTime, _>(index) {
            Ok(v) => Value::String(v.format("%Y-%m-%dT%H:%M:%S%.f").to_string()),
            Err(_) => decode_raw_temporal(row, index, RawDateTime::date_time),
        }),
        "TIMESTAMP" => Some(match row.try_get_unchecked::<DateTime<Utc>, _>(index) {
            Ok(v) => Value::String(v.to_rfc3339_opts(SecondsFormat::AutoSi, true)),
            Err(_) => decode_raw_temporal(row, index, |raw| format!("{}Z", raw.date_time())),
        }),
        "TIME" => Some(match row.try_get_unchecked::<MySqlTime, _>(index) {
            Ok(v) => Value::String(format_time(&v)),
            Err(e) => {
                warn!("Undecodable TIME in column {}: {}", index, e);
                Value::Null
            }
        }),
        "JSON" => row.try_get_unchecked::<Value, _>(index).ok(),
        _ => None,
    }
}

/// `[-]HH:MM:SS[.fff]`; hours run past 24 for intervals
fn format_time(time: &MySqlTime) -> String {
    format!(
        "{}{:02}:{:02}:{:02}{}",
        if time.is_negative() { "-" } else { "" },
        time.hours(),
        time.minutes(),
        time.seconds(),
        fraction(time.microseconds())
    )
}

/// Fractional seconds the way chrono's `%.f` prints them at microsecond precision
fn fraction(micros: u32) -> String {
    match micros {
        0 => String::new(),
        m if m % 1_000 == 0 => format!(".{:03}", m / 1_000),
        m => format!(".{:06}", m),
    }
}

/// Format a DATE/DATETIME/TIMESTAMP that chrono rejects, e.g. `0000-00-00`
fn decode_raw_temporal(
    row: &MySqlRow,
    index: usize,
    format: impl Fn(&RawDateTime) -> String,
) -> Value {
    match row
        .try_get_unchecked::<&[u8], _>(index)
        .ok()
        .and_then(RawDateTime::parse)
    {
        Some(raw) => Value::String(format(&raw)),
        None => {
            warn!("Undecodable date/time in column {}", index);
            Value::Null
        }
    }
}

/// Calendar fields as sent by the server, without range checks
#[derive(Debug, Default, PartialEq, Eq)]
struct RawDateTime {
    year: u16,
    month: u8,
    day: u8,
    hour: u8,
    minute: u8,
    second: u8,
    micros: u32,
}

impl RawDateTime {
    /// Binary values start with their length byte (0, 4, 7 or 11), text values with a digit
    fn parse(bytes: &[u8]) -> Option<Self> {
        match bytes.first()? {
            b'0'..=b'9' => Self::parse_text(std::str::from_utf8(bytes).ok()?),
            _ => Self::parse_binary(bytes),
        }
    }

    fn parse_binary(bytes: &[u8]) -> Option<Self> {
        let (&len, body) = bytes.split_first()?;
        if !matches!(len, 0 | 4 | 7 | 11) {
            return None;
        }
        let body = body.get(..usize::from(len))?;

        let mut raw = Self::default();
        if len >= 4 {
            raw.year = u16::from_le_bytes([body[0], body[1]]);
            raw.month = body[2];
            raw.day = body[3];
        }
        if len >= 7 {
            raw.hour = body[4];
            raw.minute = body[5];
            raw.second = body[6];
        }
        if len == 11 {
            raw.micros = u32::from_le_bytes([body[7], body[8], body[9], body[10]]);
        }
        Some(raw)
    }

    fn parse_text(text: &str) -> Option<Self> {
        let (date, time) = text
            .split_once(|c: char| c == ' ' || c == 'T')
            .unwrap_or((text, ""));

        let mut date_parts = date.splitn(3, '-');
        let mut raw = Self {
            year: date_parts.next()?.parse().ok()?,
            month: date_parts.next()?.parse().ok()?,
            day: date_parts.next()?.parse().ok()?,
            ..Self::default()
        };

        if !time.is_empty() {
            let (hms, frac) = time.split_once('.').unwrap_or((time, ""));
            let mut time_parts = hms.splitn(3, ':');
            raw.hour = time_parts.next()?.parse().ok()?;
            raw.minute = time_parts.next()?.parse().ok()?;
            raw.second = time_parts.next()?.parse().ok()?;
            if !frac.is_empty() {
                let digits: String = frac.chars().chain(std::iter::repeat('0')).take(6).collect();
                raw.micros = digits.parse().ok()?;
            }
        }
        Some(raw)
    }

    fn date(&self) -> String {
        format!("{:04}-{:02}-{:02}", self.year, self.month, self.day)
    }

    fn date_time(&self) -> String {
        format!(
            "{}T{:02}:{:02}:{:02}{}",
            self.date(),
            self.hour,
            self.minute,
            self.second,
            fraction(self.micros)
        )
    }
}

/// FLOAT columns keep the digits MySQL shows rather than the widened f64 noise
fn f32_value(v: f32) -> Value {
    v.to_string()
        .parse::<f64>()
        .map(float_value)
        .unwrap_or(Value::Null)
}

fn float_value(v: f64) -> Value {
    Number::from_f64(v).map(Value::Number).unwrap_or(Value::Null)
}

fn decode_bytes(row: &MySqlRow, index: usize) -> Value {
    match row.try_get_unchecked::<Vec<u8>, _>(index) {
        Ok(bytes) => bytes_to_value(bytes),
        Err(_) => Value::Null,
    }
}

/// Text when the bytes are valid UTF-8, lowercase hex otherwise
pub fn bytes_to_value(bytes: Vec<u8>) -> Value {
    match String::from_utf8(bytes) {
        Ok(text) => Value::String(text),
        Err(e) => Value::String(hex::encode(e.into_bytes())),
    }
}

/// Bind JSON parameters positionally to `?` placeholders.
///
/// Values are sent as prepared-statement arguments and never spliced into
/// the query text. Arrays and objects are bound as their JSON text.
pub fn bind_params<'q>(
    mut query: Query<'q, MySql, MySqlArguments>,
    params: &'q [Value],
) -> Query<'q, MySql, MySqlArguments> {
    for param in params {
        query = match param {
            Value::Null => query.bind(None::<String>),
            Value::Bool(b) => query.bind(*b),
            Value::Number(n) => {
                if let Some(i) = n.as_i64() {
                    query.bind(i)
                } else if let Some(u) = n.as_u64() {
                    query.bind(u)
                } else {
                    query.bind(n.as_f64().unwrap_or_default())
                }
            }
            Value::String(s) => query.bind(s.as_str()),
            other => query.bind(other.to_string()),
        };
    }
    query
}
