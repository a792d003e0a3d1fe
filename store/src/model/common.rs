use sqlx::Row;
use sqlx::any::AnyRow;

/// Shared helpers for turning a raw `AnyRow` into a typed struct, mirroring
/// the teacher's hand-written `try_from_row` constructors rather than a
/// derive macro — the core does this for every entity, so the helpers live
/// in one place instead of being re-derived per table.
pub(crate) fn bool_col(row: &AnyRow, name: &str) -> Result<bool, sqlx::Error> {
    Ok(row.try_get::<i64, _>(name)? != 0)
}

pub(crate) fn json_col<T: serde::de::DeserializeOwned>(
    row: &AnyRow,
    name: &str,
) -> Result<Option<T>, sqlx::Error> {
    let raw: Option<String> = row.try_get(name)?;
    raw.map(|s| serde_json::from_str(&s))
        .transpose()
        .map_err(|e| sqlx::Error::ColumnDecode {
            index: name.to_string(),
            source: Box::new(e),
        })
}

pub(crate) fn to_json<T: serde::Serialize>(value: &T) -> Result<String, serde_json::Error> {
    serde_json::to_string(value)
}
