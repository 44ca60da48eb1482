use rand::seq::SliceRandom;
use rand::Rng;
use std::fs;
use std::path::{Path, PathBuf};
use tracing::info;

use crate::catalog::{Table, TableCounts};
use crate::error::{Error, Result};
use crate::sql::{InsertRow, SqlValue};
use crate::storage::SqlExecutor;

pub const DEMO_FILE: &str = "demo_products.sql";

const DEMO_COLUMNS: [&str; 5] = ["slug", "name", "description", "price", "subcategory_slug"];

/// Build `count` products spread randomly over `subcategories`.
/// Prices fall in [5.00, 200.00).
pub fn generate_demo_rows<R: Rng>(count: usize, subcategories: &[String], rng: &mut R) -> Vec<InsertRow> {
    let columns: Vec<String> = DEMO_COLUMNS.iter().map(|c| c.to_string()).collect();
    let mut rows = Vec::with_capacity(count);

    for i in 1..=count {
        let Some(subcategory) = subcategories.choose(rng) else {
            break;
        };
        let cents: u32 = rng.gen_range(500..20_000);
        rows.push(InsertRow {
            table: Table::Products,
            columns: columns.clone(),
            values: vec![
                SqlValue::Text(format!("demo-product-{}", i)),
                SqlValue::Text(format!("Demo Product {}", i)),
                SqlValue::Text(format!(
                    "This is demo product {} in the {} subcategory.",
                    i, subcategory
                )),
                SqlValue::Number(format!("{}.{:02}", cents / 100, cents % 100)),
                SqlValue::Text(subcategory.clone()),
            ],
        });

        if i % 1000 == 0 {
            info!("Generated {} products...", i);
        }
    }
    rows
}

pub fn write_demo_file(dir: &Path, rows: &[InsertRow]) -> Result<PathBuf> {
    fs::create_dir_all(dir)?;
    let path = dir.join(DEMO_FILE);
    let mut contents = String::new();
    for row in rows {
        contents.push_str(&row.to_statement());
        contents.push('\n');
    }
    fs::write(&path, contents)?;
    Ok(path)
}

/// Replace all products with `count` generated ones that reference existing subcategories.
pub fn demo_import<R: Rng>(
    executor: &mut dyn SqlExecutor,
    dir: &Path,
    count: usize,
    subcategory_limit: usize,
    rng: &mut R,
) -> Result<TableCounts> {
    info!("Cleaning out products table...");
    executor.execute_script("DELETE FROM products;")?;

    let subcategories = executor.sample_keys(Table::Subcategories, "slug", subcategory_limit)?;
    if subcategories.is_empty() {
        return Err(Error::Other(
            "No subcategories found! Cannot generate products.".to_string(),
        ));
    }
    info!("Found {} valid subcategory slugs to use.", subcategories.len());

    info!("Generating {} demo products...", count);
    let rows = generate_demo_rows(count, &subcategories, rng);
    let path = write_demo_file(dir, &rows)?;

    info!("Importing demo products from {}...", path.display());
    executor.execute_script(&fs::read_to_string(&path)?)?;

    executor.table_counts()
}
