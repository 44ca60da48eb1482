use std::fs;
use std::path::{Path, PathBuf};
use std::time::{Duration, Instant};
use tracing::{debug, info};

use crate::catalog::{Table, TableCounts};
use crate::config::AppConfig;
use crate::demo;
use crate::error::{Error, Result};
use crate::extract::{self, ExtractStats};
use crate::loader::{self, FilterStats};
use crate::progress::ProgressReporter;
use crate::resume::{ResumableImporter, ResumeOptions, ResumeOutcome};
use crate::storage::SqlExecutor;

pub struct ImportEngine {
    config: AppConfig,
}

#[derive(Debug)]
pub struct OrderedImportResult {
    pub extract: ExtractStats,
    pub tables: Vec<(Table, FilterStats)>,
    pub products: FilterStats,
    pub outcome: Option<ResumeOutcome>,
    pub extract_duration: Duration,
    pub load_duration: Duration,
    pub product_duration: Duration,
}

impl ImportEngine {
    pub fn new(config: AppConfig) -> Self {
        Self { config }
    }

    /// Engine for a dry run with its working directories under `scratch`.
    /// Tables already extracted into the configured directory are copied in,
    /// so a dry resume can batch them without touching the real batch state.
    pub fn dry_run(config: &AppConfig, scratch: &Path) -> Result<Self> {
        let dry = config.for_dry_run(scratch);
        fs::create_dir_all(&dry.ordered_dir)?;
        for table in Table::ALL {
            let source = extract::table_file(&config.ordered_dir, table);
            if source.exists() {
                fs::copy(&source, extract::table_file(&dry.ordered_dir, table))?;
            }
        }
        debug!("Dry-run working directory: {}", scratch.display());
        Ok(Self::new(dry))
    }

    pub fn config(&self) -> &AppConfig {
        &self.config
    }

    /// Split the dump into per-table INSERT files.
    pub fn extract(&self, reporter: &dyn ProgressReporter) -> Result<ExtractStats> {
        extract::extract_dump(&self.config.input_file, &self.config.ordered_dir, reporter)
    }

    /// Run the whole pipeline from an empty catalog:
    /// 1. Wipe all tables and any previous batch state
    /// 2. Extract the dump into per-table files
    /// 3. Load parent tables in dependency order, filtering on live parent keys
    /// 4. Filter products, then batch and import them with checkpoints
    pub fn ordered_import(
        &self,
        executor: &mut dyn SqlExecutor,
        reporter: &dyn ProgressReporter,
        include_products: bool,
    ) -> Result<OrderedImportResult> {
        loader::wipe(executor, &self.config.resume_dir)?;

        info!("Extracting data...");
        let extract_start = Instant::now();
        let extract = self.extract(reporter)?;
        let extract_duration = extract_start.elapsed();

        info!("Importing data in dependency order...");
        let load_start = Instant::now();
        let tables = loader::load_parent_tables(executor, &self.config.ordered_dir, reporter)?;
        let load_duration = load_start.elapsed();
        debug!("Parent tables loaded in {:.2}s", load_duration.as_secs_f64());

        let product_start = Instant::now();
        let (_, products) = loader::filter_table(executor, &self.config.ordered_dir, Table::Products)?;
        let outcome = if include_products {
            let mut importer = ResumableImporter::new(executor, &self.config, reporter);
            Some(importer.run(ResumeOptions::default())?)
        } else {
            info!("Skipping product import; run resume-import to load products.");
            None
        };
        let product_duration = product_start.elapsed();

        Ok(OrderedImportResult {
            extract,
            tables,
            products,
            outcome,
            extract_duration,
            load_duration,
            product_duration,
        })
    }

    /// Batch and import products, resuming from the last checkpoint.
    pub fn resume_import(
        &self,
        executor: &mut dyn SqlExecutor,
        reporter: &dyn ProgressReporter,
        options: ResumeOptions,
    ) -> Result<ResumeOutcome> {
        let mut importer = ResumableImporter::new(executor, &self.config, reporter);
        importer.run(options)
    }

    pub fn status(&self, executor: &mut dyn SqlExecutor) -> Result<TableCounts> {
        executor.table_counts()
    }

    /// Execute a migration script, the configured one when `file` is `None`.
    pub fn migrate(&self, executor: &mut dyn SqlExecutor, file: Option<&Path>) -> Result<()> {
        let path = file.unwrap_or(&self.config.migration_file);
        if !path.exists() {
            return Err(Error::NotFound(path.to_path_buf()));
        }
        info!("Running migration {}...", path.display());
        executor.execute(&fs::read_to_string(path)?)?;
        info!("Migration completed successfully");
        Ok(())
    }

    /// Backup file names in the backup directory, most recent first.
    pub fn available_backups(&self) -> Result<Vec<String>> {
        if !self.config.backup_dir.exists() {
            return Ok(Vec::new());
        }
        let mut files: Vec<String> = fs::read_dir(&self.config.backup_dir)?
            .filter_map(|entry| entry.ok())
            .map(|entry| entry.file_name().to_string_lossy().into_owned())
            .filter(|name| name.ends_with(".sql"))
            .collect();
        files.sort();
        files.reverse();
        Ok(files)
    }

    pub fn backup_path(&self, name: &str) -> PathBuf {
        let direct = PathBuf::from(name);
        if direct.exists() {
            direct
        } else {
            self.config.backup_dir.join(name)
        }
    }

    /// Restore a plain SQL backup into the target store.
    pub fn restore(&self, executor: &mut dyn SqlExecutor, name: &str) -> Result<()> {
        let path = self.backup_path(name);
        if !path.exists() {
            return Err(Error::NotFound(path));
        }
        info!("Restoring from backup: {}", path.display());
        executor.execute("CREATE EXTENSION IF NOT EXISTS pg_trgm;")?;
        executor.execute(&fs::read_to_string(&path)?)?;
        info!("Restore completed successfully.");
        Ok(())
    }

    pub fn demo_import(&self, executor: &mut dyn SqlExecutor, count: Option<usize>) -> Result<TableCounts> {
        demo::demo_import(
            executor,
            &self.config.demo_dir,
            count.unwrap_or(self.config.demo_product_count),
            self.config.demo_subcategory_limit,
            &mut rand::thread_rng(),
        )
    }
}
