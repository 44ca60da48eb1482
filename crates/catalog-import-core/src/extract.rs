use lazy_static::lazy_static;
use regex::Regex;
use std::collections::BTreeMap;
use std::fs::{self, File};
use std::io::{BufRead, BufReader, BufWriter, Write};
use std::path::{Path, PathBuf};
use std::time::Instant;
use tracing::{debug, info, warn};

use crate::catalog::Table;
use crate::error::{Error, Result};
use crate::progress::ProgressReporter;
use crate::sql::{InsertRow, SqlValue};

lazy_static! {
    static ref COPY_HEADER: Regex = Regex::new(r"^COPY\s+(?:public\.)?(\w+)\s+\((.*?)\)\s+FROM").unwrap();
}

const COPY_TERMINATOR: &str = "\\.";

#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct ExtractStats {
    pub rows: BTreeMap<Table, usize>,
    /// Data rows whose field count did not match the COPY column list.
    pub mismatched_rows: usize,
    /// COPY blocks for tables outside the catalog.
    pub ignored_blocks: usize,
    pub malformed_headers: usize,
}

impl ExtractStats {
    pub fn rows_for(&self, table: Table) -> usize {
        self.rows.get(&table).copied().unwrap_or(0)
    }

    pub fn total_rows(&self) -> usize {
        self.rows.values().sum()
    }
}

/// Path of the extracted statements for `table` inside `dir`.
pub fn table_file(dir: &Path, table: Table) -> PathBuf {
    dir.join(format!("{}.sql", table.name()))
}

/// Lines outside COPY blocks that the target store cannot run.
fn is_unsupported(line: &str) -> bool {
    line.contains("EXTENSION") || line.contains("pg_trgm") || line.trim_start().starts_with("--")
}

/// Walk a PostgreSQL dump and hand every catalog row in a COPY block to `emit`.
pub fn parse_dump<R, F>(reader: R, mut emit: F) -> Result<ExtractStats>
where
    R: BufRead,
    F: FnMut(InsertRow) -> Result<()>,
{
    let mut stats = ExtractStats::default();
    let mut in_copy = false;
    let mut current: Option<(Table, Vec<String>)> = None;

    for line in reader.lines() {
        let line = line?;

        if !in_copy {
            if is_unsupported(&line) {
                continue;
            }
            if line.starts_with("COPY ") {
                in_copy = true;
                current = match COPY_HEADER.captures(&line) {
                    Some(caps) => match Table::from_name(&caps[1]) {
                        Some(table) => {
                            let columns = caps[2]
                                .split(',')
                                .map(|c| c.trim().to_string())
                                .collect();
                            info!("Processing COPY block for table: {}", table);
                            Some((table, columns))
                        }
                        None => {
                            debug!("Ignoring COPY block for table: {}", &caps[1]);
                            stats.ignored_blocks += 1;
                            None
                        }
                    },
                    None => {
                        warn!("Malformed COPY header, ignoring block: {}", line);
                        stats.malformed_headers += 1;
                        None
                    }
                };
            }
            continue;
        }

        if line == COPY_TERMINATOR {
            in_copy = false;
            current = None;
            continue;
        }

        let Some((table, columns)) = current.as_ref() else {
            continue;
        };
        if line.trim().is_empty() {
            continue;
        }

        let fields: Vec<&str> = line.split('\t').collect();
        if fields.len() != columns.len() {
            stats.mismatched_rows += 1;
            continue;
        }

        let row = InsertRow {
            table: *table,
            columns: columns.clone(),
            values: fields.into_iter().map(SqlValue::from_copy_field).collect(),
        };
        emit(row)?;
        *stats.rows.entry(*table).or_insert(0) += 1;
    }

    Ok(stats)
}

/// Split `input` into one INSERT file per catalog table under `output_dir`.
pub fn extract_dump(
    input: &Path,
    output_dir: &Path,
    reporter: &dyn ProgressReporter,
) -> Result<ExtractStats> {
    if !input.exists() {
        return Err(Error::NotFound(input.to_path_buf()));
    }
    fs::create_dir_all(output_dir)?;

    info!("Extracting data by table from {}", input.display());
    reporter.on_extract_start(input);
    let start = Instant::now();

    let mut writers: BTreeMap<Table, BufWriter<File>> = BTreeMap::new();
    for table in Table::ALL {
        let mut writer = BufWriter::new(File::create(table_file(output_dir, table))?);
        writeln!(writer, "-- {} data\n", table)?;
        writers.insert(table, writer);
    }

    let reader = BufReader::with_capacity(256 * 1024, File::open(input)?);
    let stats = parse_dump(reader, |row| {
        if let Some(writer) = writers.get_mut(&row.table) {
            writeln!(writer, "{}", row.to_statement())?;
        }
        Ok(())
    })?;

    for (_, mut writer) in writers {
        writer.flush()?;
    }

    if stats.mismatched_rows > 0 {
        warn!("{} rows dropped for column count mismatch", stats.mismatched_rows);
    }
    info!("Extraction completed: {} rows", stats.total_rows());
    reporter.on_extract_complete(&stats, start.elapsed().as_secs_f64());

    Ok(stats)
}
