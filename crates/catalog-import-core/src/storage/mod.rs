pub mod memory;
pub mod pg;

pub use memory::MemoryStore;
pub use pg::PgSession;

use std::collections::BTreeSet;
use std::time::Duration;

use crate::catalog::{Table, TableCounts};
use crate::error::Result;

/// Operations the pipeline needs from the target store.
///
/// Column arguments are `'static` so only names fixed in [`crate::catalog`]
/// ever reach a query.
pub trait SqlExecutor {
    /// Run a multi-statement script as a single transaction.
    fn execute_script(&mut self, sql: &str) -> Result<()>;

    /// Run statements outside of an explicit transaction.
    fn execute(&mut self, sql: &str) -> Result<()>;

    /// All non-null values of `column` in `table`, as text.
    fn fetch_keys(&mut self, table: Table, column: &'static str) -> Result<BTreeSet<String>>;

    /// Up to `limit` non-null values of `column` in `table`, as text.
    fn sample_keys(&mut self, table: Table, column: &'static str, limit: usize) -> Result<Vec<String>>;

    fn count_rows(&mut self, table: Table) -> Result<i64>;

    fn set_statement_timeout(&mut self, timeout: Duration) -> Result<()>;

    fn table_counts(&mut self) -> Result<TableCounts> {
        let mut counts = Vec::with_capacity(Table::ALL.len());
        for table in Table::ALL {
            counts.push((table, self.count_rows(table)?));
        }
        Ok(TableCounts { counts })
    }
}

impl<T: SqlExecutor + ?Sized> SqlExecutor for &mut T {
    fn execute_script(&mut self, sql: &str) -> Result<()> {
        (**self).execute_script(sql)
    }

    fn execute(&mut self, sql: &str) -> Result<()> {
        (**self).execute(sql)
    }

    fn fetch_keys(&mut self, table: Table, column: &'static str) -> Result<BTreeSet<String>> {
        (**self).fetch_keys(table, column)
    }

    fn sample_keys(&mut self, table: Table, column: &'static str, limit: usize) -> Result<Vec<String>> {
        (**self).sample_keys(table, column, limit)
    }

    fn count_rows(&mut self, table: Table) -> Result<i64> {
        (**self).count_rows(table)
    }

    fn set_statement_timeout(&mut self, timeout: Duration) -> Result<()> {
        (**self).set_statement_timeout(timeout)
    }
}

/// Delete every catalog row, children first, in one script.
pub fn wipe_statement() -> String {
    Table::wipe_order()
        .map(|table| format!("DELETE FROM {};", table.name()))
        .collect::<Vec<_>>()
        .join("\n")
}
