use serde::{Deserialize, Serialize};
use std::fs;
use std::ops::Range;
use std::path::{Path, PathBuf};
use tracing::{debug, info};

use crate::checkpoint::CHECKPOINT_FILE;
use crate::error::{Error, Result};

pub const MANIFEST_FILE: &str = "manifest.json";
const BATCH_PREFIX: &str = "products_batch_";

/// Summary of a batching run, kept for operators only.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct Manifest {
    pub total_products: usize,
    pub total_batches: usize,
    pub batch_size: usize,
    pub created_at: String,
}

pub fn batch_file(dir: &Path, index: usize) -> PathBuf {
    dir.join(format!("{}{}.sql", BATCH_PREFIX, index))
}

pub fn batch_count(total: usize, batch_size: usize) -> usize {
    total.div_ceil(batch_size.max(1))
}

/// Statement indices covered by batch `index`.
pub fn batch_range(index: usize, batch_size: usize, total: usize) -> Range<usize> {
    let start = (index * batch_size).min(total);
    let end = ((index + 1) * batch_size).min(total);
    start..end
}

/// Write `statements` as fixed-size batch files plus a manifest.
///
/// Batch files that already exist are left alone, so re-running after a
/// partial import never rewrites a batch underneath it. Returns the manifest
/// and the number of files actually written.
pub fn write_batches(dir: &Path, statements: &[String], batch_size: usize) -> Result<(Manifest, usize)> {
    if batch_size == 0 {
        return Err(Error::Other("batch size must be at least 1".to_string()));
    }
    fs::create_dir_all(dir)?;

    let total_batches = batch_count(statements.len(), batch_size);
    info!(
        "Will import {} products in {} batches of {} records each.",
        statements.len(),
        total_batches,
        batch_size
    );

    let mut written = 0;
    for index in 0..total_batches {
        let path = batch_file(dir, index);
        if path.exists() {
            debug!("Batch file {} exists, keeping it", path.display());
            continue;
        }
        let slice = &statements[batch_range(index, batch_size, statements.len())];
        let mut contents = slice.join("\n");
        contents.push('\n');
        fs::write(&path, contents)?;
        written += 1;

        if (index + 1) % 10 == 0 || index + 1 == total_batches {
            info!("Created batch files: {} / {}", index + 1, total_batches);
        }
    }

    let manifest = Manifest {
        total_products: statements.len(),
        total_batches,
        batch_size,
        created_at: chrono::Utc::now().to_rfc3339(),
    };
    fs::write(dir.join(MANIFEST_FILE), serde_json::to_string_pretty(&manifest)?)?;
    info!("Created batch manifest file");

    Ok((manifest, written))
}

pub fn read_batch(dir: &Path, index: usize) -> Result<String> {
    let path = batch_file(dir, index);
    if !path.exists() {
        return Err(Error::NotFound(path));
    }
    Ok(fs::read_to_string(path)?)
}

pub fn load_manifest(dir: &Path) -> Result<Option<Manifest>> {
    let path = dir.join(MANIFEST_FILE);
    if !path.exists() {
        return Ok(None);
    }
    Ok(Some(serde_json::from_str(&fs::read_to_string(path)?)?))
}

/// Remove batch files, manifest and checkpoint from `dir`.
pub fn clear_batch_dir(dir: &Path) -> Result<()> {
    if !dir.exists() {
        return Ok(());
    }
    let mut removed = 0;
    for entry in fs::read_dir(dir)? {
        let path = entry?.path();
        let Some(name) = path.file_name().and_then(|n| n.to_str()) else {
            continue;
        };
        let is_batch = name.starts_with(BATCH_PREFIX) && name.ends_with(".sql");
        if is_batch || name == MANIFEST_FILE || name == CHECKPOINT_FILE {
            fs::remove_file(&path)?;
            removed += 1;
        }
    }
    debug!("Removed {} files from {}", removed, dir.display());
    Ok(())
}
