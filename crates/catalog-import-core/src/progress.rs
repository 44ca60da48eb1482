use std::path::Path;

use crate::batch::Manifest;
use crate::catalog::Table;
use crate::extract::ExtractStats;
use crate::loader::FilterStats;
use crate::resume::{BatchReport, ImportPlan, ImportState};

/// Trait for reporting pipeline progress.
///
/// The CLI implements it with indicatif bars; tests use [`SilentReporter`].
/// All methods have default no-op implementations.
pub trait ProgressReporter: Send + Sync {
    fn on_extract_start(&self, _input: &Path) {}
    fn on_extract_complete(&self, _stats: &ExtractStats, _duration_secs: f64) {}
    fn on_table_loaded(&self, _table: Table, _stats: &FilterStats) {}
    fn on_batches_prepared(&self, _manifest: &Manifest, _files_written: usize) {}
    fn on_plan(&self, _plan: &ImportPlan) {}
    fn on_state_change(&self, _state: &ImportState) {}
    fn on_batch_complete(&self, _report: &BatchReport) {}
}

/// No-op progress reporter for silent operation.
pub struct SilentReporter;

impl ProgressReporter for SilentReporter {}
