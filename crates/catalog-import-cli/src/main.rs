mod commands;
mod logging;
mod progress;

use std::io::{self, Write};
use std::process;

use anyhow::{bail, Context};
use catalog_import_core::config::{self, database_url, mask_database_url};
use catalog_import_core::{
    AppConfig, Error, ImportEngine, MemoryStore, PgSession, RangeOverrides, ResumeOptions,
    ResumeOutcome, SqlExecutor, TableCounts,
};
use clap::{CommandFactory, Parser};
use colored::*;
use commands::{Cli, Commands};
use progress::CliReporter;
use tracing::{error, info, warn};

fn main() {
    dotenv::from_filename(".env.local").ok();
    dotenv::dotenv().ok();

    let args = Cli::parse();
    let Some(command) = args.command else {
        let _ = Cli::command().print_long_help();
        return;
    };

    let _guard = logging::init_logger();

    let config = match config::load_configuration() {
        Ok(config) => config,
        Err(err) => {
            error!("Error loading configuration: {}", err);
            process::exit(1);
        }
    };

    if let Err(err) = run(command, config, args.dry_run) {
        error!("Error: {:#}", err);
        let exhausted = err.chain().find_map(|cause| match cause.downcast_ref::<Error>() {
            Some(Error::BatchExhausted { batch, .. }) => Some(*batch),
            _ => None,
        });
        if let Some(batch) = exhausted {
            eprintln!(
                "To resume from this point later, run: {}",
                format!("catalog-import resume-import --start {}", batch).cyan()
            );
        }
        process::exit(1);
    }
}

fn run(command: Commands, config: AppConfig, dry_run: bool) -> anyhow::Result<()> {
    // Held until the command finishes; dropping it removes the dry-run files.
    let scratch = if dry_run { Some(tempfile::tempdir()?) } else { None };
    let engine = match &scratch {
        Some(dir) => {
            warn!(
                "Dry run: statements go to an in-memory store and working files to {}",
                dir.path().display()
            );
            ImportEngine::dry_run(&config, dir.path()).context("preparing the dry-run directory")?
        }
        None => ImportEngine::new(config),
    };
    let reporter = CliReporter::new();

    match command {
        Commands::PrintConfig => {
            println!("Configuration: {:#?}", engine.config());
            match database_url() {
                Ok(url) => println!("Database: {}", mask_database_url(&url)),
                Err(err) => println!("Database: {}", err),
            }
        }
        Commands::Extract => {
            let stats = engine
                .extract(&reporter)
                .with_context(|| format!("extracting {}", engine.config().input_file.display()))?;
            info!(
                "{} rows written to {}",
                format!("{}", stats.total_rows()).green(),
                engine.config().ordered_dir.display()
            );
        }
        Commands::OrderedImport { skip_products, yes } => {
            if !dry_run
                && !yes
                && !prompt_confirm("This deletes every catalog row before importing. Continue?", Some(false))?
            {
                info!("Ordered import cancelled.");
                return Ok(());
            }
            let mut executor = open_executor(engine.config(), dry_run)?;
            let result = engine
                .ordered_import(executor.as_mut(), &reporter, !skip_products)
                .context("ordered import failed")?;

            println!();
            info!(
                "Extract: {}, Load: {}, Products: {}",
                format!("{:.2}s", result.extract_duration.as_secs_f64()).green(),
                format!("{:.2}s", result.load_duration.as_secs_f64()).green(),
                format!("{:.2}s", result.product_duration.as_secs_f64()).green(),
            );
            for (table, stats) in &result.tables {
                info!(
                    "{}: {} kept, {} skipped",
                    table,
                    format!("{}", stats.kept).cyan(),
                    format!("{}", stats.skipped).red(),
                );
            }
            info!(
                "products: {} kept, {} skipped",
                format!("{}", result.products.kept).cyan(),
                format!("{}", result.products.skipped).red(),
            );
            match result.outcome {
                Some(outcome) => report_outcome(&outcome),
                None => print_counts(&engine.status(executor.as_mut())?),
            }
        }
        Commands::ResumeImport {
            start,
            end,
            prepare_only,
        } => {
            let mut executor = open_executor(engine.config(), dry_run)?;
            let options = ResumeOptions {
                range: RangeOverrides { start, end },
                prepare_only,
            };
            let outcome = engine
                .resume_import(executor.as_mut(), &reporter, options)
                .context("resumable import failed")?;
            report_outcome(&outcome);
        }
        Commands::Status => {
            let mut executor = open_executor(engine.config(), dry_run)?;
            let counts = engine.status(executor.as_mut()).context("reading table counts")?;
            print_counts(&counts);
        }
        Commands::Migrate { file } => {
            let mut executor = open_executor(engine.config(), dry_run)?;
            engine
                .migrate(executor.as_mut(), file.as_deref())
                .context("migration failed")?;
        }
        Commands::Restore { file } => {
            if !engine.backup_path(&file).exists() {
                list_backups(&engine)?;
                bail!("backup file {} not found", file);
            }
            let mut executor = open_executor(engine.config(), dry_run)?;
            engine
                .restore(executor.as_mut(), &file)
                .with_context(|| format!("restoring {}", file))?;
            print_counts(&engine.status(executor.as_mut())?);
        }
        Commands::DemoImport { count } => {
            let mut executor = open_executor(engine.config(), dry_run)?;
            let counts = engine
                .demo_import(executor.as_mut(), count)
                .context("demo import failed")?;
            info!("Demo data import completed successfully!");
            print_counts(&counts);
        }
    }

    Ok(())
}

fn open_executor(config: &AppConfig, dry_run: bool) -> anyhow::Result<Box<dyn SqlExecutor>> {
    if dry_run {
        return Ok(Box::new(MemoryStore::new()));
    }
    let url = database_url()?;
    info!("Connecting to {}", mask_database_url(&url));
    let session = PgSession::connect(&url, config).context("connecting to the database")?;
    Ok(Box::new(session))
}

fn report_outcome(outcome: &ResumeOutcome) {
    match outcome {
        ResumeOutcome::Prepared(manifest) => {
            info!(
                "Prepared {} batch files for {} products. Use --start and --end to import specific batches.",
                format!("{}", manifest.total_batches).cyan(),
                manifest.total_products
            );
        }
        ResumeOutcome::NothingToImport(manifest) => {
            info!(
                "Nothing to import: all {} batches are already behind the checkpoint or outside the requested range.",
                manifest.total_batches
            );
        }
        ResumeOutcome::Completed { plan, counts } => {
            info!(
                "Imported batches {}..={} of {}",
                plan.start,
                plan.end,
                format!("{}", plan.total_batches).green()
            );
            print_counts(counts);
        }
    }
}

fn print_counts(counts: &TableCounts) {
    info!("Final counts:");
    for (table, count) in &counts.counts {
        info!("  {:<14} {}", table.name(), format!("{}", count).cyan());
    }
}

fn list_backups(engine: &ImportEngine) -> anyhow::Result<()> {
    let backups = engine.available_backups()?;
    if backups.is_empty() {
        warn!(
            "No backups found in {}",
            engine.config().backup_dir.display()
        );
        return Ok(());
    }
    info!("Available backups:");
    for name in backups {
        let path = engine.config().backup_dir.join(&name);
        info!("  {} ({})", name.cyan(), path.display());
    }
    Ok(())
}

fn prompt_confirm(prompt: &str, default: Option<bool>) -> io::Result<bool> {
    let mut input = String::new();

    loop {
        input.clear();

        match default {
            Some(true) => print!("{} (Y/n): ", prompt),
            Some(false) | None => print!("{} (y/N): ", prompt),
        }
        io::stdout().flush()?;

        io::stdin().read_line(&mut input)?;

        match input.trim().to_uppercase().as_str() {
            "Y" => return Ok(true),
            "N" => return Ok(false),
            "" => match default {
                Some(default) => return Ok(default),
                None => continue,
            },
            _ => continue,
        }
    }
}
