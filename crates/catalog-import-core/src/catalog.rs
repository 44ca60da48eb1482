use std::fmt;

/// Catalog tables, declared parent before child.
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash)]
pub enum Table {
    Collections,
    Categories,
    Subcollections,
    Subcategories,
    Products,
}

/// Reference from a child column to the key column of its parent table.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct ForeignKey {
    pub column: &'static str,
    pub parent: Table,
    pub parent_column: &'static str,
}

impl Table {
    /// Import order: parents first, products last.
    pub const ALL: [Table; 5] = [
        Table::Collections,
        Table::Categories,
        Table::Subcollections,
        Table::Subcategories,
        Table::Products,
    ];

    pub fn name(self) -> &'static str {
        match self {
            Table::Collections => "collections",
            Table::Categories => "categories",
            Table::Subcollections => "subcollections",
            Table::Subcategories => "subcategories",
            Table::Products => "products",
        }
    }

    pub fn from_name(name: &str) -> Option<Table> {
        Table::ALL.into_iter().find(|table| table.name() == name)
    }

    pub fn primary_key(self) -> &'static str {
        match self {
            Table::Products => "slug",
            _ => "id",
        }
    }

    pub fn foreign_key(self) -> Option<ForeignKey> {
        match self {
            Table::Collections => None,
            Table::Categories => Some(ForeignKey {
                column: "collection_id",
                parent: Table::Collections,
                parent_column: "id",
            }),
            Table::Subcollections => Some(ForeignKey {
                column: "category_slug",
                parent: Table::Categories,
                parent_column: "slug",
            }),
            Table::Subcategories => Some(ForeignKey {
                column: "subcollection_id",
                parent: Table::Subcollections,
                parent_column: "id",
            }),
            Table::Products => Some(ForeignKey {
                column: "subcategory_slug",
                parent: Table::Subcategories,
                parent_column: "slug",
            }),
        }
    }

    pub fn parent(self) -> Option<Table> {
        self.foreign_key().map(|fk| fk.parent)
    }

    /// Children before parents, the order rows must be deleted in.
    pub fn wipe_order() -> impl Iterator<Item = Table> {
        Table::ALL.into_iter().rev()
    }
}

impl fmt::Display for Table {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.name())
    }
}

/// Row counts for all five tables, in import order.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct TableCounts {
    pub counts: Vec<(Table, i64)>,
}

impl TableCounts {
    pub fn get(&self, table: Table) -> i64 {
        self.counts
            .iter()
            .find(|(t, _)| *t == table)
            .map(|(_, count)| *count)
            .unwrap_or(0)
    }
}
