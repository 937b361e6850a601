use crate::error::AppError;
use crate::market::now_unix_ms;
use sqlx::{Row, SqlitePool};

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct StoredEntry {
    pub key: String,
    pub value_json: String,
    pub updated_at_ms: i64,
}

fn map_entry_row(row: &sqlx::sqlite::SqliteRow) -> Result<StoredEntry, AppError> {
    Ok(StoredEntry {
        key: row.try_get("key")?,
        value_json: row.try_get("value_json")?,
        updated_at_ms: row.try_get("updated_at_ms")?,
    })
}

fn validate_key(key: &str) -> Result<&str, AppError> {
    let trimmed = key.trim();
    if trimmed.is_empty() {
        return Err(AppError::InvalidArgument(
            "storage key must be non-empty".to_string(),
        ));
    }
    Ok(trimmed)
}

pub async fn list_entries(pool: &SqlitePool) -> Result<Vec<StoredEntry>, AppError> {
    let rows = sqlx::query("SELECT key, value_json, updated_at_ms FROM kv_store ORDER BY key ASC")
        .fetch_all(pool)
        .await?;

    let mut entries = Vec::with_capacity(rows.len());
    for row in rows {
        entries.push(map_entry_row(&row)?);
    }

    Ok(entries)
}

pub async fn upsert_entry(
    pool: &SqlitePool,
    key: &str,
    value_json: &str,
) -> Result<StoredEntry, AppError> {
    let key = validate_key(key)?;
    let updated_at_ms = now_unix_ms();

    sqlx::query(
        "INSERT INTO kv_store (key, value_json, updated_at_ms) VALUES (?, ?, ?) \
         ON CONFLICT(key) DO UPDATE SET value_json=excluded.value_json, updated_at_ms=excluded.updated_at_ms",
    )
    .bind(key)
    .bind(value_json)
    .bind(updated_at_ms)
    .execute(pool)
    .await?;

    Ok(StoredEntry {
        key: key.to_string(),
        value_json: value_json.to_string(),
        updated_at_ms,
    })
}
