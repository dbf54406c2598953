//! Conflict-safe staged merge into live tables.
//!
//! Rows never go straight into a live table. Each load stages them into
//! an ephemeral structurally-identical table, filters out rows whose
//! conflict-key values already exist, then merges what is left with an
//! insert-or-skip rule. A key collision always resolves in favor of the
//! row already in the database; incoming rows are dropped, never applied
//! as updates.
//!
//! The staging table is exclusively owned by one load and is dropped on
//! every exit path, success or failure, before the next table begins.

use tracing::{debug, info, warn};
use uuid::Uuid;

use crate::error::{Error, Result};
use crate::executor::DatabaseExecutor;
use crate::schema::{ensure_identifier, ConflictKeySet};

/// Outcome of one table's staged merge.
#[derive(Debug, Clone, Copy, Default)]
pub struct LoadResult {
    /// Rows actually merged into the live table.
    pub inserted: u64,
    /// Staged rows dropped by the conflict filter or the merge itself.
    pub skipped: u64,
}

/// Runs the staged-merge protocol against a database executor.
pub struct Loader<'a> {
    executor: &'a dyn DatabaseExecutor,
}

impl<'a> Loader<'a> {
    /// Creates a loader over the given executor.
    #[must_use]
    pub fn new(executor: &'a dyn DatabaseExecutor) -> Self {
        Self { executor }
    }

    /// Merges pre-formatted rows into `table` without disturbing existing
    /// records.
    ///
    /// `target_columns` must align positionally with the fields of every
    /// row. `conflict_keys` names the columns whose pre-existing values
    /// block an incoming row; when empty, only primary-key and unique
    /// collisions are skipped.
    ///
    /// # Errors
    ///
    /// Returns [`Error::Loading`] when staging or merging fails. The
    /// staging table is dropped even in that case.
    pub async fn load(
        &self,
        table: &str,
        target_columns: &[String],
        conflict_keys: &[String],
        rows: &[String],
    ) -> Result<LoadResult> {
        ensure_identifier("table name", table)?;
        for column in target_columns {
            ensure_identifier("column", column)?;
        }
        for key in conflict_keys {
            if !target_columns.contains(key) {
                return Err(Error::SchemaMismatch(format!(
                    "conflict key {key} is not among the target columns of {table}"
                )));
            }
        }
        if rows.is_empty() {
            debug!("{}: nothing to load", table);
            return Ok(LoadResult::default());
        }

        let staging = staging_name(table);
        self.executor
            .execute(&format!("CREATE TABLE {staging} (LIKE {table} INCLUDING ALL)"))
            .await
            .map_err(|e| Error::Loading(format!("creating staging table for {table} failed: {e}")))?;

        let result = self
            .stage_and_merge(table, &staging, target_columns, conflict_keys, rows)
            .await;

        // The staging area must not outlive this load, success or failure.
        if let Err(e) = self
            .executor
            .execute(&format!("DROP TABLE IF EXISTS {staging}"))
            .await
        {
            warn!("Could not drop staging table {}: {}", staging, e);
        }

        result
    }

    async fn stage_and_merge(
        &self,
        table: &str,
        staging: &str,
        target_columns: &[String],
        conflict_keys: &[String],
        rows: &[String],
    ) -> Result<LoadResult> {
        let mut data = rows.join("\n");
        data.push('\n');
        let staged = self
            .executor
            .copy_in(staging, target_columns, &data)
            .await
            .map_err(|e| Error::Loading(format!("staging copy for {table} failed: {e}")))?;
        debug!("{}: staged {} row(s) into {}", table, staged, staging);

        if !conflict_keys.is_empty() {
            let existing = ConflictKeySet::fetch(self.executor, table, conflict_keys).await?;
            if existing.is_empty() {
                debug!("{}: no existing values for {:?}", table, conflict_keys);
            } else {
                let clauses = conflict_keys
                    .iter()
                    .map(|k| format!("t.{k} = s.{k}"))
                    .collect::<Vec<_>>()
                    .join(" AND ");
                let filtered = self
                    .executor
                    .execute(&format!(
                        "DELETE FROM {staging} AS s \
                         WHERE EXISTS (SELECT 1 FROM {table} AS t WHERE {clauses})"
                    ))
                    .await
                    .map_err(|e| {
                        Error::Loading(format!("conflict filter for {table} failed: {e}"))
                    })?;
                if filtered > 0 {
                    info!(
                        "{}: {} staged row(s) collide with {} existing key value(s)",
                        table,
                        filtered,
                        existing.len()
                    );
                }
            }
        }

        let columns = target_columns.join(", ");
        let conflict_clause = if conflict_keys.is_empty() {
            "ON CONFLICT DO NOTHING".to_string()
        } else {
            format!("ON CONFLICT ({}) DO NOTHING", conflict_keys.join(", "))
        };
        let inserted = self
            .executor
            .execute(&format!(
                "INSERT INTO {table} ({columns}) SELECT {columns} FROM {staging} {conflict_clause}"
            ))
            .await
            .map_err(|e| Error::Loading(format!("merge into {table} failed: {e}")))?;

        let skipped = staged.saturating_sub(inserted);
        info!(
            "{}: merged {} row(s), skipped {} already present",
            table, inserted, skipped
        );
        Ok(LoadResult { inserted, skipped })
    }
}

/// Staging tables are per-load; the random suffix keeps reruns and
/// leftovers from colliding.
fn staging_name(table: &str) -> String {
    let suffix = Uuid::new_v4().simple().to_string();
    format!("_dumpmerge_{}_{}", table, &suffix[..8])
}
