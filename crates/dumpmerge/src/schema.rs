//! Live-schema introspection and conflict-key queries.

use std::collections::HashSet;

use crate::error::{Error, Result};
use crate::executor::DatabaseExecutor;
use crate::transform::NULL_MARKER;

/// Guards names that get interpolated into statements. Only plain
/// identifiers pass: leading letter or underscore, then letters, digits,
/// and underscores.
pub(crate) fn ensure_identifier(kind: &str, name: &str) -> Result<()> {
    let mut chars = name.chars();
    let valid = match chars.next() {
        Some(first) => {
            (first.is_ascii_alphabetic() || first == '_')
                && chars.all(|c| c.is_ascii_alphanumeric() || c == '_')
        }
        None => false,
    };
    if valid {
        Ok(())
    } else {
        Err(Error::Config(format!(
            "{kind} '{name}' is not a plain identifier"
        )))
    }
}

/// Returns the live table's column names in schema order.
///
/// # Errors
///
/// Returns [`Error::SchemaMismatch`] when the table does not exist.
pub async fn table_columns(executor: &dyn DatabaseExecutor, table: &str) -> Result<Vec<String>> {
    ensure_identifier("table name", table)?;
    let sql = format!(
        "SELECT column_name FROM information_schema.columns \
         WHERE table_schema = 'public' AND table_name = '{table}' \
         ORDER BY ordinal_position"
    );
    let rows = executor.query_rows(&sql).await?;
    let columns: Vec<String> = rows
        .into_iter()
        .filter_map(|row| row.into_iter().next().flatten())
        .collect();
    if columns.is_empty() {
        return Err(Error::SchemaMismatch(format!(
            "table {table} does not exist in the live schema"
        )));
    }
    Ok(columns)
}

/// Returns the live table's current row count.
///
/// # Errors
///
/// Returns an error when the count query fails or yields nothing.
pub async fn table_count(executor: &dyn DatabaseExecutor, table: &str) -> Result<u64> {
    ensure_identifier("table name", table)?;
    let rows = executor
        .query_rows(&format!("SELECT COUNT(*)::text FROM {table}"))
        .await?;
    rows.first()
        .and_then(|row| row.first())
        .and_then(|cell| cell.as_deref())
        .and_then(|cell| cell.parse().ok())
        .ok_or_else(|| Error::Database(format!("count query for {table} returned nothing")))
}

/// Key tuples already present in a live table for the configured
/// conflict key columns.
///
/// Fetched once at the start of a table's load, read-only from then on,
/// and discarded when the load finishes.
#[derive(Debug, Clone)]
pub struct ConflictKeySet {
    columns: Vec<String>,
    values: HashSet<Vec<String>>,
}

impl ConflictKeySet {
    /// Fetches the distinct key tuples currently in `table`.
    ///
    /// Values are read as text; NULL becomes the bulk-copy null marker so
    /// tuples remain comparable to staged row fields.
    ///
    /// # Errors
    ///
    /// Returns an error on unsafe identifiers or a failed query.
    pub async fn fetch(
        executor: &dyn DatabaseExecutor,
        table: &str,
        columns: &[String],
    ) -> Result<Self> {
        ensure_identifier("table name", table)?;
        for column in columns {
            ensure_identifier("conflict key", column)?;
        }
        let select = columns
            .iter()
            .map(|c| format!("{c}::text"))
            .collect::<Vec<_>>()
            .join(", ");
        let rows = executor
            .query_rows(&format!("SELECT DISTINCT {select} FROM {table}"))
            .await?;
        let values = rows
            .into_iter()
            .map(|row| {
                row.into_iter()
                    .map(|cell| cell.unwrap_or_else(|| NULL_MARKER.to_string()))
                    .collect()
            })
            .collect();
        Ok(Self {
            columns: columns.to_vec(),
            values,
        })
    }

    /// The key columns this set was fetched for.
    #[must_use]
    pub fn columns(&self) -> &[String] {
        &self.columns
    }

    /// Number of distinct key tuples in the live table.
    #[must_use]
    pub fn len(&self) -> usize {
        self.values.len()
    }

    /// Whether the live table holds no key values at all.
    #[must_use]
    pub fn is_empty(&self) -> bool {
        self.values.is_empty()
    }
}
