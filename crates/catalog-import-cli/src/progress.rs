use catalog_import_core::batch::Manifest;
use catalog_import_core::extract::ExtractStats;
use catalog_import_core::loader::FilterStats;
use catalog_import_core::resume::{BatchReport, ImportPlan, ImportState};
use catalog_import_core::{ProgressReporter, Table};
use colored::*;
use indicatif::{ProgressBar, ProgressStyle};
use std::path::Path;
use std::sync::Mutex;
use std::time::Duration;

/// CLI progress reporter using indicatif progress bars.
///
/// - Extract phase: spinner (row total unknown until the dump is read)
/// - Batch import: progress bar over the planned batch range
pub struct CliReporter {
    bar: Mutex<Option<ProgressBar>>,
}

impl CliReporter {
    pub fn new() -> Self {
        Self {
            bar: Mutex::new(None),
        }
    }

    fn set_bar(&self, pb: ProgressBar) {
        let mut guard = self.bar.lock().unwrap();
        if let Some(old) = guard.take() {
            old.finish_and_clear();
        }
        *guard = Some(pb);
    }

    fn finish_bar(&self) {
        let mut guard = self.bar.lock().unwrap();
        if let Some(pb) = guard.take() {
            pb.finish_and_clear();
        }
    }

    fn with_bar(&self, f: impl FnOnce(&ProgressBar)) {
        let guard = self.bar.lock().unwrap();
        if let Some(pb) = guard.as_ref() {
            f(pb);
        }
    }

    /// Print above an active bar without tearing it.
    fn line(&self, message: String) {
        let guard = self.bar.lock().unwrap();
        match guard.as_ref() {
            Some(pb) => pb.println(message),
            None => eprintln!("{}", message),
        }
    }
}

impl ProgressReporter for CliReporter {
    fn on_extract_start(&self, input: &Path) {
        let pb = ProgressBar::new_spinner();
        pb.set_style(
            ProgressStyle::with_template("{spinner:.cyan} {msg}")
                .unwrap()
                .tick_chars("⠋⠙⠹⠸⠼⠴⠦⠧⠇⠏"),
        );
        pb.set_message(format!("Extracting {}...", input.display()));
        pb.enable_steady_tick(Duration::from_millis(80));
        self.set_bar(pb);
    }

    fn on_extract_complete(&self, stats: &ExtractStats, duration_secs: f64) {
        self.finish_bar();
        eprintln!(
            "  {} Extract complete: {} rows in {:.2}s",
            "✓".green(),
            stats.total_rows(),
            duration_secs
        );
        for (table, rows) in &stats.rows {
            eprintln!("      {:<14} {}", table.name(), rows);
        }
        if stats.mismatched_rows > 0 {
            eprintln!(
                "  {} {} rows skipped: column count did not match the COPY header",
                "!".yellow(),
                stats.mismatched_rows
            );
        }
    }

    fn on_table_loaded(&self, table: Table, stats: &FilterStats) {
        let skipped = if stats.skipped > 0 {
            format!(", {} skipped", stats.skipped).yellow().to_string()
        } else {
            String::new()
        };
        eprintln!(
            "  {} {} loaded: {} rows{}",
            "✓".green(),
            table,
            stats.kept,
            skipped
        );
    }

    fn on_batches_prepared(&self, manifest: &Manifest, files_written: usize) {
        eprintln!(
            "  {} {} products in {} batches of {} ({} new batch files)",
            "✓".green(),
            manifest.total_products,
            manifest.total_batches,
            manifest.batch_size,
            files_written
        );
    }

    fn on_plan(&self, plan: &ImportPlan) {
        let pb = ProgressBar::new(plan.batch_count() as u64);
        pb.set_style(
            ProgressStyle::with_template(
                "  {spinner:.cyan} Importing [{bar:30.cyan/dim}] {pos}/{len} batches ({eta} remaining) {msg}",
            )
            .unwrap()
            .progress_chars("━╸─")
            .tick_chars("⠋⠙⠹⠸⠼⠴⠦⠧⠇⠏"),
        );
        pb.enable_steady_tick(Duration::from_millis(80));
        self.set_bar(pb);
    }

    fn on_state_change(&self, state: &ImportState) {
        match state {
            ImportState::Importing { batch } => {
                self.with_bar(|pb| pb.set_message(format!("batch {}", batch)));
            }
            ImportState::Retrying { batch, attempt } => {
                self.line(format!(
                    "  {} Retrying batch {} (attempt {})",
                    "↻".yellow(),
                    batch,
                    attempt
                ));
            }
            ImportState::Completed | ImportState::Aborted { .. } => self.finish_bar(),
            ImportState::Idle | ImportState::Preparing => {}
        }
    }

    fn on_batch_complete(&self, report: &BatchReport) {
        self.with_bar(|pb| {
            pb.inc(1);
            pb.set_message(format!("{} products", report.imported_so_far));
        });
        if report.attempts > 1 {
            self.line(format!(
                "  {} Batch {} succeeded after {} attempts",
                "✓".green(),
                report.batch,
                report.attempts
            ));
        }
    }
}
