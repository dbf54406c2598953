//! Import pipeline orchestration.
//!
//! One table at a time, in the configured order: extract the table's
//! bulk-copy block, reshape every row, stage and merge. A failure in one
//! table never stops the run — the table is marked failed and the next
//! one is attempted — so the summary at the end always covers every
//! configured table.

use indicatif::{ProgressBar, ProgressStyle};
use tracing::{debug, error, info, warn};

use crate::config::{MigrationConfig, TableSpec};
use crate::dump::{DumpBlock, DumpFile};
use crate::error::{Error, Result};
use crate::executor::DatabaseExecutor;
use crate::loader::Loader;
use crate::schema;
use crate::transform::{RowDiagnostic, Transformer};

/// Per-table outcome classification.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum TableStatus {
    /// The table was staged and merged (possibly with skipped rows).
    Completed,
    /// The dump has no bulk-copy block for this table.
    MissingFromDump,
    /// Staging or merging failed; see the report's error text.
    Failed,
}

/// What happened to one configured table.
#[derive(Debug, Clone)]
pub struct TableReport {
    /// Table name.
    pub table: String,
    /// Outcome classification.
    pub status: TableStatus,
    /// Rows found in the table's dump block.
    pub dump_rows: u64,
    /// Rows merged into the live table.
    pub inserted: u64,
    /// Rows skipped in favor of existing data.
    pub skipped: u64,
    /// Rows rejected by the strict transform mode.
    pub row_diagnostics: Vec<RowDiagnostic>,
    /// Collaborator diagnostic text when the table failed.
    pub error: Option<String>,
    /// Live row count after the run, when it could be read.
    pub live_count: Option<u64>,
}

impl TableReport {
    fn new(table: &str) -> Self {
        Self {
            table: table.to_string(),
            status: TableStatus::Failed,
            dump_rows: 0,
            inserted: 0,
            skipped: 0,
            row_diagnostics: Vec::new(),
            error: None,
            live_count: None,
        }
    }
}

/// Run-wide statistics.
#[derive(Debug, Default)]
pub struct MigrationStats {
    /// Tables staged and merged.
    pub tables_completed: u64,
    /// Tables that failed at staging or merge.
    pub tables_failed: u64,
    /// Tables with no block in the dump.
    pub tables_missing: u64,
    /// Rows extracted from the dump across all tables.
    pub rows_extracted: u64,
    /// Rows merged across all tables.
    pub rows_inserted: u64,
    /// Rows skipped in favor of existing data.
    pub rows_skipped: u64,
    /// Wall-clock duration in seconds.
    pub duration_secs: f64,
    /// Per-table reports, in run order.
    pub reports: Vec<TableReport>,
}

impl MigrationStats {
    /// Merge throughput (rows per second).
    #[must_use]
    pub fn throughput(&self) -> f64 {
        if self.duration_secs > 0.0 {
            self.rows_inserted as f64 / self.duration_secs
        } else {
            0.0
        }
    }
}

/// Import pipeline.
pub struct Pipeline {
    config: MigrationConfig,
    executor: Box<dyn DatabaseExecutor>,
    dump: DumpFile,
}

impl Pipeline {
    /// Creates a pipeline over an already-connected executor.
    ///
    /// # Errors
    ///
    /// Returns an error if the dump artifact cannot be opened or indexed.
    pub fn new(config: MigrationConfig, executor: Box<dyn DatabaseExecutor>) -> Result<Self> {
        let dump = DumpFile::open(&config.source.dump_path)?;
        Ok(Self {
            config,
            executor,
            dump,
        })
    }

    /// Runs the import.
    ///
    /// Never aborts mid-run for a single table's failure; the returned
    /// stats always cover every configured table.
    ///
    /// # Errors
    ///
    /// Returns an error only for run-level problems surfaced before any
    /// table is attempted.
    pub async fn run(&self) -> Result<MigrationStats> {
        let start = std::time::Instant::now();
        let mut stats = MigrationStats::default();

        info!("Starting import of {} table(s)", self.config.tables.len());
        if self.config.options.dry_run {
            info!("Dry run mode - not writing to destination");
        }

        let total_rows: u64 = self
            .config
            .tables
            .iter()
            .filter_map(|t| self.dump.block(&t.name))
            .map(|b| b.rows.len() as u64)
            .sum();
        let progress = create_progress_bar(total_rows);

        for spec in &self.config.tables {
            let report = self.import_table(spec).await;
            progress.inc(report.dump_rows);

            match report.status {
                TableStatus::Completed => stats.tables_completed += 1,
                TableStatus::MissingFromDump => stats.tables_missing += 1,
                TableStatus::Failed => stats.tables_failed += 1,
            }
            stats.rows_extracted += report.dump_rows;
            stats.rows_inserted += report.inserted;
            stats.rows_skipped += report.skipped;
            stats.reports.push(report);
        }

        progress.finish_with_message("Import complete");

        if !self.config.options.dry_run {
            for report in &mut stats.reports {
                if report.status == TableStatus::Completed {
                    report.live_count = schema::table_count(self.executor.as_ref(), &report.table)
                        .await
                        .ok();
                }
            }
        }

        stats.duration_secs = start.elapsed().as_secs_f64();
        info!(
            "Import complete: {} extracted, {} merged, {} skipped in {:.2}s ({:.0} rows/sec)",
            stats.rows_extracted,
            stats.rows_inserted,
            stats.rows_skipped,
            stats.duration_secs,
            stats.throughput()
        );
        Ok(stats)
    }

    /// Imports one table, folding any error into the report.
    async fn import_table(&self, spec: &TableSpec) -> TableReport {
        let mut report = TableReport::new(&spec.name);

        let Some(block) = self.dump.block(&spec.name) else {
            warn!("{}: no bulk-copy block in dump, skipping", spec.name);
            report.status = TableStatus::MissingFromDump;
            return report;
        };
        report.dump_rows = block.rows.len() as u64;
        info!("{}: {} row(s) in dump", spec.name, block.rows.len());

        if let Err(e) = self.transform_and_load(spec, block, &mut report).await {
            error!("{}: {}", spec.name, e);
            report.status = TableStatus::Failed;
            report.error = Some(e.to_string());
        }
        report
    }

    async fn transform_and_load(
        &self,
        spec: &TableSpec,
        block: &DumpBlock,
        report: &mut TableReport,
    ) -> Result<()> {
        let executor = self.executor.as_ref();

        let live_columns = schema::table_columns(executor, &spec.name).await?;
        let target_count = spec.target_column_count.unwrap_or(live_columns.len());
        if target_count > live_columns.len() {
            return Err(Error::SchemaMismatch(format!(
                "{} has {} live column(s) but the spec expects {target_count}",
                spec.name,
                live_columns.len()
            )));
        }
        let target_columns = live_columns[..target_count].to_vec();

        let mode = self.config.options.mode;
        let transformer = if spec.has_positional_config() || !self.config.options.map_by_names {
            Transformer::from_spec(spec, target_count, mode)
        } else if let Some(dump_columns) = &block.columns {
            debug!("{}: deriving column mapping from dump headers", spec.name);
            Transformer::from_names(dump_columns, &target_columns, spec.normalizers.clone(), mode)
        } else {
            Transformer::from_spec(spec, target_count, mode)
        };

        let outcome = transformer.transform_block(&block.rows);
        if !outcome.diagnostics.is_empty() {
            warn!(
                "{}: {} row(s) rejected by strict transform",
                spec.name,
                outcome.diagnostics.len()
            );
        }
        report.row_diagnostics = outcome.diagnostics;

        if self.config.options.dry_run {
            report.status = TableStatus::Completed;
            return Ok(());
        }

        if self.config.options.disable_triggers {
            executor
                .execute("SET session_replication_role = replica")
                .await?;
        }
        let load = Loader::new(executor)
            .load(&spec.name, &target_columns, &spec.conflict_keys, &outcome.rows)
            .await;
        if self.config.options.disable_triggers {
            // Restore even when the load failed.
            if let Err(e) = executor
                .execute("SET session_replication_role = DEFAULT")
                .await
            {
                warn!("{}: could not restore replication role: {}", spec.name, e);
            }
        }
        let load = load?;

        report.inserted = load.inserted;
        report.skipped = load.skipped;
        report.status = TableStatus::Completed;
        Ok(())
    }
}

fn create_progress_bar(total: u64) -> ProgressBar {
    let pb = if total > 0 {
        ProgressBar::new(total)
    } else {
        ProgressBar::new_spinner()
    };

    pb.set_style(
        ProgressStyle::default_bar()
            .template(
                "{spinner:.green} [{elapsed_precise}] [{bar:40.cyan/blue}] {pos}/{len} ({eta})",
            )
            .unwrap_or_else(|_| ProgressStyle::default_bar())
            .progress_chars("#>-"),
    );

    pb
}
