pub mod batch;
pub mod catalog;
pub mod checkpoint;
pub mod config;
pub mod demo;
pub mod engine;
pub mod error;
pub mod extract;
pub mod loader;
pub mod progress;
pub mod resume;
pub mod sql;
pub mod storage;

pub use catalog::{Table, TableCounts};
pub use config::AppConfig;
pub use engine::{ImportEngine, OrderedImportResult};
pub use error::Error;
pub use progress::{ProgressReporter, SilentReporter};
pub use resume::{AbortReason, ImportPlan, ImportState, RangeOverrides, ResumeOptions, ResumeOutcome};
pub use storage::{MemoryStore, PgSession, SqlExecutor};
