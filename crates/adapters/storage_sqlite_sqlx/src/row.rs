//! Column decoding helpers shared by the row wrappers.

use std::str::FromStr;

use chrono::{DateTime, Utc};

use homegate_domain::time::Timestamp;

pub(crate) fn decode_err(err: impl std::error::Error + Send + Sync + 'static) -> sqlx::Error {
    sqlx::Error::Decode(Box::new(err))
}

/// Parse a text column into an id or a kind.
pub(crate) fn parse<T>(value: &str) -> Result<T, sqlx::Error>
where
    T: FromStr,
    T::Err: std::error::Error + Send + Sync + 'static,
{
    T::from_str(value).map_err(decode_err)
}

pub(crate) fn parse_opt<T>(value: Option<&str>) -> Result<Option<T>, sqlx::Error>
where
    T: FromStr,
    T::Err: std::error::Error + Send + Sync + 'static,
{
    value.map(parse).transpose()
}

pub(crate) fn parse_timestamp(value: &str) -> Result<Timestamp, sqlx::Error> {
    DateTime::parse_from_rfc3339(value)
        .map(|ts| ts.with_timezone(&Utc))
        .map_err(decode_err)
}

pub(crate) fn format_timestamp(value: Timestamp) -> String {
    value.to_rfc3339()
}

/// Column a typed value is stored in, or a decode error naming the column.
pub(crate) fn required<T>(value: Option<T>, column: &str) -> Result<T, sqlx::Error> {
    value.ok_or_else(|| sqlx::Error::ColumnDecode {
        index: column.to_string(),
        source: format!("{column} must not be null").into(),
    })
}
