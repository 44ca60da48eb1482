//! Sequential, checkpointed import of product batch files.
//!
//! A run moves through [`ImportState`]:
//!
//! ```text
//! Idle -> Preparing -> Importing(i) -> Importing(i + 1) ... -> Completed
//!                          |  ^
//!                          v  |
//!                      Retrying(i, k) -- attempts exhausted --> Aborted
//! ```
//!
//! The checkpoint is written only after a batch has been committed, so an
//! interrupted run loses at most the batch in flight.

use std::fmt;
use std::fs;
use std::path::Path;
use std::thread;
use std::time::Instant;
use tracing::{error, info, warn};

use crate::batch::{self, Manifest};
use crate::catalog::{Table, TableCounts};
use crate::checkpoint::{Checkpoint, CheckpointStore};
use crate::config::AppConfig;
use crate::error::{Error, Result};
use crate::extract::table_file;
use crate::loader::{self, filtered_file};
use crate::progress::ProgressReporter;
use crate::sql::is_insert_for;
use crate::storage::SqlExecutor;

#[derive(Debug, Clone, PartialEq, Eq)]
pub enum ImportState {
    Idle,
    Preparing,
    Importing { batch: usize },
    Retrying { batch: usize, attempt: u32 },
    Completed,
    Aborted { reason: AbortReason },
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub enum AbortReason {
    PrepareOnly,
    RetriesExhausted { batch: usize },
    Failed { message: String },
}

impl fmt::Display for ImportState {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            ImportState::Idle => write!(f, "idle"),
            ImportState::Preparing => write!(f, "preparing"),
            ImportState::Importing { batch } => write!(f, "importing batch {}", batch),
            ImportState::Retrying { batch, attempt } => {
                write!(f, "retrying batch {} (attempt {})", batch, attempt)
            }
            ImportState::Completed => write!(f, "completed"),
            ImportState::Aborted { reason: AbortReason::PrepareOnly } => {
                write!(f, "stopped after preparing batches")
            }
            ImportState::Aborted { reason: AbortReason::RetriesExhausted { batch } } => {
                write!(f, "aborted at batch {}", batch)
            }
            ImportState::Aborted { reason: AbortReason::Failed { message } } => {
                write!(f, "aborted: {}", message)
            }
        }
    }
}

/// Explicit batch bounds from the command line.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct RangeOverrides {
    pub start: Option<usize>,
    pub end: Option<usize>,
}

#[derive(Debug, Clone, Copy, Default)]
pub struct ResumeOptions {
    pub range: RangeOverrides,
    pub prepare_only: bool,
}

/// Inclusive batch range a run will import.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct ImportPlan {
    pub start: usize,
    pub end: usize,
    pub total_batches: usize,
    pub batch_size: usize,
}

impl ImportPlan {
    pub fn batch_count(&self) -> usize {
        self.end - self.start + 1
    }

    pub fn estimated_records(&self) -> usize {
        self.batch_count() * self.batch_size
    }
}

#[derive(Debug, Clone, PartialEq)]
pub struct BatchReport {
    pub batch: usize,
    pub total_batches: usize,
    pub attempts: u32,
    pub duration_secs: f64,
    pub imported_so_far: i64,
    pub remaining_batches: usize,
}

impl BatchReport {
    /// Minutes left if every remaining batch takes as long as this one.
    pub fn eta_minutes(&self) -> f64 {
        self.remaining_batches as f64 * self.duration_secs / 60.0
    }
}

#[derive(Debug, Clone, PartialEq)]
pub enum ResumeOutcome {
    Prepared(Manifest),
    NothingToImport(Manifest),
    Completed {
        plan: ImportPlan,
        counts: TableCounts,
    },
}

/// Decide which batches to import.
///
/// Explicit bounds win. Otherwise the run resumes after the checkpointed
/// batch, or at `product_count / batch_size` when that is further along or
/// no checkpoint exists. `end` is clamped to the last batch. Returns `None`
/// when the range is empty.
pub fn plan_range(
    overrides: RangeOverrides,
    checkpoint: Option<&Checkpoint>,
    product_count: i64,
    batch_size: usize,
    total_batches: usize,
) -> Option<ImportPlan> {
    if total_batches == 0 {
        return None;
    }
    let last = total_batches - 1;

    let from_count = usize::try_from(product_count.max(0)).unwrap_or(0) / batch_size.max(1);
    let resume_at = match checkpoint {
        Some(checkpoint) => from_count.max(checkpoint.last_completed_batch + 1),
        None => from_count,
    };

    let start = overrides.start.unwrap_or(resume_at);
    let end = overrides.end.map_or(last, |end| end.min(last));
    if start > end {
        return None;
    }

    Some(ImportPlan {
        start,
        end,
        total_batches,
        batch_size,
    })
}

/// INSERT statements for products, from the filtered file when one exists,
/// otherwise by filtering `products.sql` against live subcategories.
pub fn collect_product_statements(
    executor: &mut dyn SqlExecutor,
    ordered_dir: &Path,
) -> Result<Vec<String>> {
    let filtered = filtered_file(ordered_dir, Table::Products);
    if filtered.exists() {
        info!("Using existing filtered products file...");
        return Ok(fs::read_to_string(&filtered)?
            .lines()
            .map(str::trim)
            .filter(|line| is_insert_for(line, Table::Products))
            .map(str::to_string)
            .collect());
    }

    let source = table_file(ordered_dir, Table::Products);
    if !source.exists() {
        return Err(Error::NotFound(source));
    }
    info!("Filtering products from the extracted file...");
    let (statements, _) = loader::filter_table(executor, ordered_dir, Table::Products)?;
    Ok(statements)
}

pub struct ResumableImporter<'a> {
    executor: &'a mut dyn SqlExecutor,
    config: &'a AppConfig,
    reporter: &'a dyn ProgressReporter,
    checkpoints: CheckpointStore,
    state: ImportState,
}

impl<'a> ResumableImporter<'a> {
    pub fn new(
        executor: &'a mut dyn SqlExecutor,
        config: &'a AppConfig,
        reporter: &'a dyn ProgressReporter,
    ) -> Self {
        Self {
            executor,
            config,
            reporter,
            checkpoints: CheckpointStore::new(&config.resume_dir),
            state: ImportState::Idle,
        }
    }

    pub fn state(&self) -> &ImportState {
        &self.state
    }

    fn transition(&mut self, state: ImportState) {
        self.reporter.on_state_change(&state);
        self.state = state;
    }

    /// Gather product statements and write any missing batch files.
    pub fn prepare(&mut self) -> Result<Manifest> {
        self.transition(ImportState::Preparing);
        let statements = collect_product_statements(&mut *self.executor, &self.config.ordered_dir)?;
        let (manifest, written) =
            batch::write_batches(&self.config.resume_dir, &statements, self.config.batch_size)?;
        self.reporter.on_batches_prepared(&manifest, written);
        Ok(manifest)
    }

    pub fn plan(&mut self, manifest: &Manifest, overrides: RangeOverrides) -> Result<Option<ImportPlan>> {
        let product_count = self.executor.count_rows(Table::Products)?;
        info!("Current product count: {}", product_count);
        let checkpoint = self.checkpoints.load()?;
        Ok(plan_range(
            overrides,
            checkpoint.as_ref(),
            product_count,
            manifest.batch_size,
            manifest.total_batches,
        ))
    }

    /// Import every batch in `plan`, checkpointing after each one.
    pub fn import(&mut self, plan: &ImportPlan) -> Result<()> {
        info!(
            "Import plan: batches {}..={} ({} batches, {} records per batch, ~{} records)",
            plan.start,
            plan.end,
            plan.batch_count(),
            plan.batch_size,
            plan.estimated_records()
        );
        self.reporter.on_plan(plan);

        let start_delay = self.config.start_delay();
        if !start_delay.is_zero() {
            info!(
                "Press Ctrl+C at any time to pause; the next run resumes after the last completed batch. Starting in {}s...",
                start_delay.as_secs()
            );
            thread::sleep(start_delay);
        }

        for index in plan.start..=plan.end {
            let started = Instant::now();
            self.transition(ImportState::Importing { batch: index });
            info!("Importing product batch {} of {}...", index + 1, plan.total_batches);

            let sql = batch::read_batch(&self.config.resume_dir, index)?;
            let attempts = self.import_with_retry(index, &sql)?;

            self.checkpoints.save(index)?;
            let imported_so_far = self.executor.count_rows(Table::Products)?;
            let report = BatchReport {
                batch: index,
                total_batches: plan.total_batches,
                attempts,
                duration_secs: started.elapsed().as_secs_f64(),
                imported_so_far,
                remaining_batches: plan.end - index,
            };
            info!(
                "Batch {} completed in {:.1}s; products imported so far: {}; estimated time remaining: {:.1} minutes",
                index + 1,
                report.duration_secs,
                report.imported_so_far,
                report.eta_minutes()
            );
            self.reporter.on_batch_complete(&report);

            if index < plan.end {
                thread::sleep(self.config.batch_delay());
            }
        }

        Ok(())
    }

    /// Returns the number of attempts the batch needed.
    ///
    /// The batch statement timeout holds only while the batch runs; the
    /// session goes back to the command timeout afterwards.
    fn import_with_retry(&mut self, index: usize, sql: &str) -> Result<u32> {
        let max_attempts = self.config.max_attempts.max(1);
        let mut attempt = 1;
        loop {
            let result = self
                .executor
                .set_statement_timeout(self.config.statement_timeout())
                .and_then(|_| self.executor.execute_script(sql));

            match result {
                Ok(()) => {
                    self.executor.set_statement_timeout(self.config.command_timeout())?;
                    return Ok(attempt);
                }
                Err(err) if attempt >= max_attempts => {
                    error!("Failed to import batch {}: {}", index + 1, err);
                    if let Err(reset) = self.executor.set_statement_timeout(self.config.command_timeout()) {
                        warn!("Could not restore the command timeout: {}", reset);
                    }
                    self.transition(ImportState::Aborted {
                        reason: AbortReason::RetriesExhausted { batch: index },
                    });
                    return Err(Error::BatchExhausted {
                        batch: index,
                        attempts: attempt,
                        source: Box::new(err),
                    });
                }
                Err(err) => {
                    warn!("Batch {} failed on attempt {}: {}", index + 1, attempt, err);
                    attempt += 1;
                    self.transition(ImportState::Retrying { batch: index, attempt });
                    let backoff = self.config.retry_backoff();
                    info!("Waiting {} seconds before retry...", backoff.as_secs());
                    thread::sleep(backoff);
                }
            }
        }
    }

    /// Prepare batches, then import the planned range and report final counts.
    /// Any failure leaves the importer in `Aborted`.
    pub fn run(&mut self, options: ResumeOptions) -> Result<ResumeOutcome> {
        let result = self.run_stages(options);
        if let Err(err) = &result {
            if !matches!(self.state, ImportState::Aborted { .. }) {
                self.transition(ImportState::Aborted {
                    reason: AbortReason::Failed {
                        message: err.to_string(),
                    },
                });
            }
        }
        result
    }

    fn run_stages(&mut self, options: ResumeOptions) -> Result<ResumeOutcome> {
        let counts = self.executor.table_counts()?;
        info!("Current database state: {:?}", counts.counts);

        let manifest = self.prepare()?;
        if options.prepare_only {
            info!("Batch files prepared. Use --start and --end to import specific batches.");
            self.transition(ImportState::Aborted {
                reason: AbortReason::PrepareOnly,
            });
            return Ok(ResumeOutcome::Prepared(manifest));
        }

        let Some(plan) = self.plan(&manifest, options.range)? else {
            info!("No batches to import (start batch > end batch)");
            self.transition(ImportState::Completed);
            return Ok(ResumeOutcome::NothingToImport(manifest));
        };

        self.import(&plan)?;
        self.transition(ImportState::Completed);
        let counts = self.executor.table_counts()?;
        Ok(ResumeOutcome::Completed { plan, counts })
    }
}
