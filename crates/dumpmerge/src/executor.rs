//! The live-database collaborator seam.
//!
//! Everything the import needs from the database reduces to a narrow
//! "run this statement" capability: execute a statement, fetch rows as
//! text, and bulk-copy pre-formatted delimited rows. The loader and the
//! schema glue are written against this trait; the Postgres
//! implementation lives behind the default-on `postgres` feature.

use async_trait::async_trait;

use crate::error::Result;

/// Trait for the live-database collaborator.
///
/// Implementations are expected to run statements against a single
/// session, synchronously from the caller's point of view: the core
/// awaits each call and never overlaps two of them.
#[async_trait]
pub trait DatabaseExecutor: Send + Sync {
    /// Executes a statement, returning the number of affected rows.
    async fn execute(&self, sql: &str) -> Result<u64>;

    /// Runs a query, returning every cell as text (`None` for NULL).
    /// Callers cast non-text columns to text in the statement itself.
    async fn query_rows(&self, sql: &str) -> Result<Vec<Vec<Option<String>>>>;

    /// Bulk-copies pre-formatted, tab-delimited rows into `table`,
    /// returning the number of rows written.
    async fn copy_in(&self, table: &str, columns: &[String], data: &str) -> Result<u64>;
}

/// Postgres implementation over a connection pool.
#[cfg(feature = "postgres")]
pub struct PgExecutor {
    pool: sqlx::PgPool,
}

#[cfg(feature = "postgres")]
impl PgExecutor {
    /// Connects to the live database.
    ///
    /// The pool is capped at one connection: session-scoped settings
    /// (like the replication role used to suppress triggers) must apply
    /// to the same session that stages and merges.
    ///
    /// # Errors
    ///
    /// Returns an error if the connection cannot be established.
    pub async fn connect(url: &str) -> Result<Self> {
        let pool = sqlx::postgres::PgPoolOptions::new()
            .max_connections(1)
            .connect(url)
            .await?;
        Ok(Self { pool })
    }
}

#[cfg(feature = "postgres")]
#[async_trait]
impl DatabaseExecutor for PgExecutor {
    async fn execute(&self, sql: &str) -> Result<u64> {
        Ok(sqlx::query(sql).execute(&self.pool).await?.rows_affected())
    }

    async fn query_rows(&self, sql: &str) -> Result<Vec<Vec<Option<String>>>> {
        use sqlx::Row;
        let rows = sqlx::query(sql).fetch_all(&self.pool).await?;
        rows.iter()
            .map(|row| {
                (0..row.columns().len())
                    .map(|i| row.try_get::<Option<String>, _>(i).map_err(crate::error::Error::from))
                    .collect()
            })
            .collect()
    }

    async fn copy_in(&self, table: &str, columns: &[String], data: &str) -> Result<u64> {
        use sqlx::postgres::PgPoolCopyExt;
        let statement = format!("COPY {} ({}) FROM STDIN", table, columns.join(", "));
        let mut sink = self.pool.copy_in_raw(&statement).await?;
        sink.send(data.as_bytes()).await?;
        Ok(sink.finish().await?)
    }
}
