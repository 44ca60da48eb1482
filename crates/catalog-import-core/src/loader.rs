use std::collections::BTreeSet;
use std::fs::{self, File};
use std::io::{BufRead, BufReader, BufWriter, Write};
use std::path::{Path, PathBuf};
use tracing::{info, trace};

use crate::batch;
use crate::catalog::Table;
use crate::error::{Error, Result};
use crate::extract::table_file;
use crate::progress::ProgressReporter;
use crate::sql::{is_insert_for, InsertRow};
use crate::storage::{wipe_statement, SqlExecutor};

#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct FilterStats {
    pub kept: usize,
    pub skipped: usize,
}

pub fn filtered_file(dir: &Path, table: Table) -> PathBuf {
    dir.join(format!("{}_filtered.sql", table.name()))
}

/// Delete every catalog row and forget any batch state that described them.
pub fn wipe(executor: &mut dyn SqlExecutor, resume_dir: &Path) -> Result<()> {
    info!("Wiping all existing data...");
    executor.execute_script(&wipe_statement())?;
    batch::clear_batch_dir(resume_dir)?;
    info!("Successfully wiped existing data.");
    Ok(())
}

/// Stream `reader`, passing through non-INSERT lines and keeping INSERTs for
/// `table` whose foreign key value is in `valid_keys`.
///
/// Rows are parsed and compared on the foreign key column itself. A row whose
/// key is NULL, missing or unparsable is skipped.
pub fn filter_statements<R, F>(
    reader: R,
    table: Table,
    valid_keys: &BTreeSet<String>,
    mut emit: F,
) -> Result<FilterStats>
where
    R: BufRead,
    F: FnMut(&str, bool) -> Result<()>,
{
    let fk = table
        .foreign_key()
        .ok_or_else(|| Error::Other(format!("{} has no parent table to validate against", table)))?;
    let mut stats = FilterStats::default();

    for line in reader.lines() {
        let line = line?;
        if !is_insert_for(&line, table) {
            emit(&line, false)?;
            continue;
        }

        let keep = match InsertRow::parse(&line) {
            Ok(row) => row
                .value(fk.column)
                .and_then(|v| v.as_key())
                .map_or(false, |key| valid_keys.contains(key)),
            Err(err) => {
                trace!("Unparsable {} row skipped: {}", table, err);
                false
            }
        };

        if keep {
            emit(&line, true)?;
            stats.kept += 1;
            if table == Table::Products && stats.kept % 10_000 == 0 {
                info!("Processed {} valid products...", stats.kept);
            }
        } else {
            stats.skipped += 1;
        }
    }

    Ok(stats)
}

/// Filter `<table>.sql` against the live keys of its parent table and write
/// `<table>_filtered.sql`. Returns the kept INSERT statements with the counts.
pub fn filter_table(
    executor: &mut dyn SqlExecutor,
    dir: &Path,
    table: Table,
) -> Result<(Vec<String>, FilterStats)> {
    let fk = table
        .foreign_key()
        .ok_or_else(|| Error::Other(format!("{} has no parent table to validate against", table)))?;

    let input = table_file(dir, table);
    if !input.exists() {
        return Err(Error::NotFound(input));
    }

    info!("Validating and filtering {}...", table);
    let valid_keys = executor.fetch_keys(fk.parent, fk.parent_column)?;
    info!("Found {} valid {} {} values.", valid_keys.len(), fk.parent, fk.parent_column);

    let output = filtered_file(dir, table);
    let mut writer = BufWriter::new(File::create(&output)?);
    let mut statements = Vec::new();
    let reader = BufReader::new(File::open(&input)?);
    let stats = filter_statements(reader, table, &valid_keys, |line, is_row| {
        writeln!(writer, "{}", line)?;
        if is_row {
            statements.push(line.to_string());
        }
        Ok(())
    })?;
    writer.flush()?;

    info!(
        "Filtered {} file created. Valid: {}, Skipped: {}",
        table, stats.kept, stats.skipped
    );
    Ok((statements, stats))
}

/// Load one extracted table. Tables with a parent are filtered first.
pub fn load_table(
    executor: &mut dyn SqlExecutor,
    dir: &Path,
    table: Table,
    reporter: &dyn ProgressReporter,
) -> Result<FilterStats> {
    let (statements, stats) = if table.foreign_key().is_some() {
        filter_table(executor, dir, table)?
    } else {
        let input = table_file(dir, table);
        if !input.exists() {
            return Err(Error::NotFound(input));
        }
        let statements: Vec<String> = fs::read_to_string(&input)?
            .lines()
            .filter(|line| is_insert_for(line, table))
            .map(str::to_string)
            .collect();
        let stats = FilterStats {
            kept: statements.len(),
            skipped: 0,
        };
        (statements, stats)
    };

    if statements.is_empty() {
        info!("No {} rows to import.", table);
    } else {
        info!("Importing {}...", table);
        executor.execute_script(&statements.join("\n"))?;
        info!("Successfully imported {} ({} rows).", table, stats.kept);
    }

    reporter.on_table_loaded(table, &stats);
    Ok(stats)
}

/// Load every table except products, parents first. The first failure aborts.
pub fn load_parent_tables(
    executor: &mut dyn SqlExecutor,
    dir: &Path,
    reporter: &dyn ProgressReporter,
) -> Result<Vec<(Table, FilterStats)>> {
    let mut loaded = Vec::new();
    for table in Table::ALL.into_iter().filter(|t| *t != Table::Products) {
        let stats = load_table(executor, dir, table, reporter)?;
        loaded.push((table, stats));
    }
    Ok(loaded)
}
