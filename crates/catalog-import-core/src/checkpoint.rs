use serde::{Deserialize, Serialize};
use std::fs;
use std::path::{Path, PathBuf};
use tracing::info;

use crate::error::Result;

pub const CHECKPOINT_FILE: &str = "checkpoint.json";

/// Last batch that was fully imported.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct Checkpoint {
    pub last_completed_batch: usize,
    pub timestamp: String,
}

#[derive(Debug, Clone)]
pub struct CheckpointStore {
    path: PathBuf,
}

impl CheckpointStore {
    pub fn new(dir: &Path) -> Self {
        Self {
            path: dir.join(CHECKPOINT_FILE),
        }
    }

    pub fn path(&self) -> &Path {
        &self.path
    }

    pub fn load(&self) -> Result<Option<Checkpoint>> {
        if !self.path.exists() {
            return Ok(None);
        }
        let checkpoint: Checkpoint = serde_json::from_str(&fs::read_to_string(&self.path)?)?;
        info!(
            "Found checkpoint: last completed batch was {} at {}",
            checkpoint.last_completed_batch, checkpoint.timestamp
        );
        Ok(Some(checkpoint))
    }

    /// Record `batch` as completed. The file is replaced in one rename so an
    /// interrupted write never leaves a truncated checkpoint behind.
    pub fn save(&self, batch: usize) -> Result<Checkpoint> {
        let checkpoint = Checkpoint {
            last_completed_batch: batch,
            timestamp: chrono::Utc::now().to_rfc3339(),
        };
        if let Some(parent) = self.path.parent() {
            fs::create_dir_all(parent)?;
        }
        let tmp = self.path.with_extension("json.tmp");
        fs::write(&tmp, serde_json::to_string(&checkpoint)?)?;
        fs::rename(&tmp, &self.path)?;
        info!("Checkpoint saved: completed batch {}", batch);
        Ok(checkpoint)
    }

    pub fn clear(&self) -> Result<()> {
        if self.path.exists() {
            fs::remove_file(&self.path)?;
        }
        Ok(())
    }
}
