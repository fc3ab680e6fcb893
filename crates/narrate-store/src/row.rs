//! Column decoding helpers.

use std::path::PathBuf;
use std::str::FromStr;

use rusqlite::types::Type;
use rusqlite::Row;

/// Decode a TEXT column through `FromStr` (status enums).
pub(crate) fn parse_col<T>(row: &Row<'_>, idx: usize) -> rusqlite::Result<T>
where
    T: FromStr,
    T::Err: std::error::Error + Send + Sync + 'static,
{
    let raw: String = row.get(idx)?;
    raw.parse()
        .map_err(|e| rusqlite::Error::FromSqlConversionFailure(idx, Type::Text, Box::new(e)))
}

/// Decode a JSON TEXT column.
pub(crate) fn json_col<T: serde::de::DeserializeOwned>(
    row: &Row<'_>,
    idx: usize,
) -> rusqlite::Result<T> {
    let raw: String = row.get(idx)?;
    serde_json::from_str(&raw)
        .map_err(|e| rusqlite::Error::FromSqlConversionFailure(idx, Type::Text, Box::new(e)))
}

pub(crate) fn path_col(row: &Row<'_>, idx: usize) -> rusqlite::Result<PathBuf> {
    let raw: String = row.get(idx)?;
    Ok(PathBuf::from(raw))
}

pub(crate) fn opt_path_col(row: &Row<'_>, idx: usize) -> rusqlite::Result<Option<PathBuf>> {
    let raw: Option<String> = row.get(idx)?;
    Ok(raw.map(PathBuf::from))
}

pub(crate) fn path_text(path: &std::path::Path) -> String {
    path.to_string_lossy().into_owned()
}
