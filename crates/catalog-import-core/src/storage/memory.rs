use std::collections::{BTreeMap, BTreeSet};
use std::time::Duration;
use tracing::{debug, trace};

use super::SqlExecutor;
use crate::catalog::Table;
use crate::error::{Error, Result};
use crate::sql::InsertRow;

/// In-memory catalog used for dry runs and tests.
///
/// Understands the one-line statements the pipeline produces: INSERTs with
/// `ON CONFLICT DO NOTHING` semantics on the primary key, `DELETE FROM <table>`
/// and transaction or session statements, which are accepted and ignored.
/// Foreign keys are enforced, and a script that violates one leaves the store
/// untouched.
#[derive(Debug, Clone, Default)]
pub struct MemoryStore {
    tables: BTreeMap<Table, BTreeMap<String, InsertRow>>,
    /// Non-key columns referenced by a child foreign key: value -> row count.
    index: BTreeMap<(Table, &'static str), BTreeMap<String, usize>>,
    statement_timeout: Option<Duration>,
    scripts_executed: usize,
}

/// Inverse of one applied change. Replayed newest first on rollback.
#[derive(Debug)]
enum Undo {
    Inserted { table: Table, key: String },
    Deleted { table: Table, rows: BTreeMap<String, InsertRow> },
}

/// Columns of `table` that a child references and that are not its primary key.
fn referenced_columns(table: Table) -> impl Iterator<Item = &'static str> {
    Table::ALL
        .into_iter()
        .filter_map(|child| child.foreign_key())
        .filter(move |fk| fk.parent == table && fk.parent_column != table.primary_key())
        .map(|fk| fk.parent_column)
}

impl MemoryStore {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn rows(&self, table: Table) -> impl Iterator<Item = &InsertRow> {
        self.tables.get(&table).into_iter().flat_map(|rows| rows.values())
    }

    pub fn statement_timeout(&self) -> Option<Duration> {
        self.statement_timeout
    }

    pub fn scripts_executed(&self) -> usize {
        self.scripts_executed
    }

    fn len(&self, table: Table) -> usize {
        self.tables.get(&table).map_or(0, BTreeMap::len)
    }

    fn index_row(&mut self, row: &InsertRow) {
        for column in referenced_columns(row.table) {
            if let Some(value) = row.value(column).and_then(|v| v.as_key()) {
                *self
                    .index
                    .entry((row.table, column))
                    .or_default()
                    .entry(value.to_string())
                    .or_insert(0) += 1;
            }
        }
    }

    fn unindex_row(&mut self, row: &InsertRow) {
        for column in referenced_columns(row.table) {
            let Some(value) = row.value(column).and_then(|v| v.as_key()) else {
                continue;
            };
            if let Some(values) = self.index.get_mut(&(row.table, column)) {
                if let Some(count) = values.get_mut(value) {
                    *count -= 1;
                    if *count == 0 {
                        values.remove(value);
                    }
                }
            }
        }
    }

    fn has_parent_row(&self, parent: Table, column: &'static str, value: &str) -> bool {
        if column == parent.primary_key() {
            return self
                .tables
                .get(&parent)
                .map_or(false, |rows| rows.contains_key(value));
        }
        self.index
            .get(&(parent, column))
            .map_or(false, |values| values.contains_key(value))
    }

    fn insert(&mut self, row: InsertRow, undo: &mut Vec<Undo>) -> Result<()> {
        let key = row
            .value(row.table.primary_key())
            .and_then(|v| v.as_key())
            .map(str::to_string)
            .ok_or_else(|| {
                Error::Rejected(format!("{}: missing {}", row.table, row.table.primary_key()))
            })?;

        if let Some(fk) = row.table.foreign_key() {
            if let Some(value) = row.value(fk.column).and_then(|v| v.as_key()) {
                if !self.has_parent_row(fk.parent, fk.parent_column, value) {
                    return Err(Error::Rejected(format!(
                        "{}.{} = '{}' has no matching {}.{}",
                        row.table, fk.column, value, fk.parent, fk.parent_column
                    )));
                }
            }
        }

        let table = row.table;
        if self.tables.get(&table).map_or(false, |rows| rows.contains_key(&key)) {
            trace!("{} '{}' already present, skipped", table, key);
            return Ok(());
        }
        self.index_row(&row);
        self.tables.entry(table).or_default().insert(key.clone(), row);
        undo.push(Undo::Inserted { table, key });
        Ok(())
    }

    fn delete_all(&mut self, table: Table, undo: &mut Vec<Undo>) -> Result<()> {
        for child in Table::ALL.into_iter().filter(|t| t.parent() == Some(table)) {
            if self.len(child) > 0 {
                return Err(Error::Rejected(format!(
                    "cannot delete from {}: {} still references it",
                    table, child
                )));
            }
        }
        if let Some(rows) = self.tables.remove(&table) {
            for row in rows.values() {
                self.unindex_row(row);
            }
            undo.push(Undo::Deleted { table, rows });
        }
        Ok(())
    }

    fn rollback(&mut self, undo: Vec<Undo>) {
        for change in undo.into_iter().rev() {
            match change {
                Undo::Inserted { table, key } => {
                    if let Some(row) = self.tables.get_mut(&table).and_then(|rows| rows.remove(&key)) {
                        self.unindex_row(&row);
                    }
                }
                Undo::Deleted { table, rows } => {
                    for row in rows.values() {
                        self.index_row(row);
                    }
                    self.tables.insert(table, rows);
                }
            }
        }
    }

    fn apply(&mut self, sql: &str, undo: &mut Vec<Undo>) -> Result<()> {
        for line in sql.lines() {
            let statement = line.trim();
            if statement.is_empty() || statement.starts_with("--") {
                continue;
            }
            if statement.starts_with("INSERT INTO ") {
                self.insert(InsertRow::parse(statement)?, undo)?;
                continue;
            }
            if let Some(rest) = statement.strip_prefix("DELETE FROM ") {
                let name = rest.trim_end_matches(';').trim();
                let table = Table::from_name(name)
                    .ok_or_else(|| Error::Rejected(format!("unknown table {}", name)))?;
                self.delete_all(table, undo)?;
                continue;
            }
            debug!("Ignoring statement in memory store: {}", statement);
        }
        Ok(())
    }
}

impl SqlExecutor for MemoryStore {
    fn execute_script(&mut self, sql: &str) -> Result<()> {
        let mut undo = Vec::new();
        match self.apply(sql, &mut undo) {
            Ok(()) => {
                self.scripts_executed += 1;
                Ok(())
            }
            Err(err) => {
                self.rollback(undo);
                Err(err)
            }
        }
    }

    fn execute(&mut self, sql: &str) -> Result<()> {
        self.scripts_executed += 1;
        self.apply(sql, &mut Vec::new())
    }

    fn fetch_keys(&mut self, table: Table, column: &'static str) -> Result<BTreeSet<String>> {
        Ok(self
            .rows(table)
            .filter_map(|row| row.value(column).and_then(|v| v.as_key()))
            .map(str::to_string)
            .collect())
    }

    fn sample_keys(&mut self, table: Table, column: &'static str, limit: usize) -> Result<Vec<String>> {
        Ok(self
            .rows(table)
            .filter_map(|row| row.value(column).and_then(|v| v.as_key()))
            .take(limit)
            .map(str::to_string)
            .collect())
    }

    fn count_rows(&mut self, table: Table) -> Result<i64> {
        Ok(self.len(table) as i64)
    }

    fn set_statement_timeout(&mut self, timeout: Duration) -> Result<()> {
        self.statement_timeout = Some(timeout);
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::storage::wipe_statement;

    const COLLECTION: &str =
        "INSERT INTO collections (id, slug, name) VALUES (1, 'home', 'Home') ON CONFLICT DO NOTHING;";
    const CATEGORY: &str = "INSERT INTO categories (id, slug, name, collection_id) \
                            VALUES (10, 'chairs', 'Chairs', 1) ON CONFLICT DO NOTHING;";
    const ORPHAN: &str = "INSERT INTO categories (id, slug, name, collection_id) \
                          VALUES (11, 'lost', 'Lost', 99) ON CONFLICT DO NOTHING;";

    #[test]
    fn test_insert_ignores_conflicts() {
        let mut store = MemoryStore::new();
        store.execute_script(COLLECTION).unwrap();
        store.execute_script(COLLECTION).unwrap();
        assert_eq!(store.count_rows(Table::Collections).unwrap(), 1);
    }

    #[test]
    fn test_foreign_key_violation_rolls_back_script() {
        let mut store = MemoryStore::new();
        store.execute_script(COLLECTION).unwrap();
        let script = format!("{}\n{}", CATEGORY, ORPHAN);
        let err = store.execute_script(&script).unwrap_err();
        assert!(matches!(err, Error::Rejected(_)));
        assert_eq!(store.count_rows(Table::Categories).unwrap(), 0);
    }

    #[test]
    fn test_fetch_keys_by_non_primary_column() {
        let mut store = MemoryStore::new();
        store
            .execute_script(&format!("{}\n{}", COLLECTION, CATEGORY))
            .unwrap();
        let slugs = store.fetch_keys(Table::Categories, "slug").unwrap();
        assert_eq!(slugs.into_iter().collect::<Vec<_>>(), vec!["chairs".to_string()]);
        let ids = store.fetch_keys(Table::Collections, "id").unwrap();
        assert!(ids.contains("1"));
    }

    #[test]
    fn test_delete_requires_children_first() {
        let mut store = MemoryStore::new();
        store
            .execute_script(&format!("{}\n{}", COLLECTION, CATEGORY))
            .unwrap();
        assert!(store.execute_script("DELETE FROM collections;").is_err());

        store.execute_script(&wipe_statement()).unwrap();
        let counts = store.table_counts().unwrap();
        assert!(counts.counts.iter().all(|(_, count)| *count == 0));
    }

    const SUBCOLLECTION: &str = "INSERT INTO subcollections (id, slug, name, category_slug) \
                                 VALUES (100, 'office', 'Office', 'chairs') ON CONFLICT DO NOTHING;";

    #[test]
    fn test_failed_script_restores_deleted_rows_and_slug_lookups() {
        let mut store = MemoryStore::new();
        store
            .execute_script(&format!("{}\n{}", COLLECTION, CATEGORY))
            .unwrap();

        let script = format!("DELETE FROM categories;\n{}\n{}", CATEGORY, ORPHAN);
        assert!(store.execute_script(&script).is_err());
        assert_eq!(store.count_rows(Table::Categories).unwrap(), 1);
        assert_eq!(store.scripts_executed(), 1);

        // categories.slug is not the primary key; the lookup must survive the rollback.
        store.execute_script(SUBCOLLECTION).unwrap();
        assert_eq!(store.count_rows(Table::Subcollections).unwrap(), 1);
    }

    #[test]
    fn test_slug_lookup_follows_deletes() {
        let mut store = MemoryStore::new();
        store
            .execute_script(&format!("{}\n{}", COLLECTION, CATEGORY))
            .unwrap();
        store.execute_script("DELETE FROM categories;").unwrap();

        let err = store.execute_script(SUBCOLLECTION).unwrap_err();
        assert!(matches!(err, Error::Rejected(_)));

        // A rolled-back insert must not leave its slug behind either.
        let script = format!("{}\n{}", CATEGORY, ORPHAN);
        assert!(store.execute_script(&script).is_err());
        assert!(store.execute_script(SUBCOLLECTION).is_err());
    }

    #[test]
    fn test_product_batches_check_the_slug_index() {
        let mut store = MemoryStore::new();
        store
            .execute_script(&format!(
                "{}\n{}\n{}\nINSERT INTO subcategories (id, slug, name, subcollection_id) \
                 VALUES (1000, 'desk-chairs', 'Desk Chairs', 100) ON CONFLICT DO NOTHING;",
                COLLECTION, CATEGORY, SUBCOLLECTION
            ))
            .unwrap();

        for batch in 0..50 {
            let script: Vec<String> = (0..200)
                .map(|i| {
                    format!(
                        "INSERT INTO products (slug, name, subcategory_slug) \
                         VALUES ('p-{}-{}', 'P', 'desk-chairs') ON CONFLICT DO NOTHING;",
                        batch, i
                    )
                })
                .collect();
            store.execute_script(&script.join("\n")).unwrap();
        }
        assert_eq!(store.count_rows(Table::Products).unwrap(), 10_000);
        assert_eq!(store.index.get(&(Table::Subcategories, "slug")).map(BTreeMap::len), Some(1));
    }
}
