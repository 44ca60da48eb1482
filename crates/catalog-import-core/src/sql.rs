//! SQL literal rendering and the one-line INSERT form shared by every stage.
//!
//! Rows travel between stages as files of single-line statements:
//!
//! ```text
//! INSERT INTO products (slug, name, price) VALUES ('mug', 'Mug', 9.99) ON CONFLICT DO NOTHING;
//! ```
//!
//! [`InsertRow::parse`] reads that form back into columns and values so
//! foreign keys are compared by column rather than by searching the text.

use lazy_static::lazy_static;
use regex::Regex;
use std::fmt::Write as _;

use crate::catalog::Table;
use crate::error::{Error, Result};

lazy_static! {
    static ref NUMERIC: Regex = Regex::new(r"^-?\d+(\.\d+)?$").unwrap();
}

pub const NULL_MARKER: &str = "\\N";

#[derive(Debug, Clone, PartialEq, Eq)]
pub enum SqlValue {
    Null,
    Number(String),
    Text(String),
}

impl SqlValue {
    /// Classify a decoded field: integer or decimal text stays unquoted, anything else is text.
    pub fn from_field(value: String) -> SqlValue {
        if NUMERIC.is_match(&value) {
            SqlValue::Number(value)
        } else {
            SqlValue::Text(value)
        }
    }

    /// Convert one raw field of a COPY data row.
    pub fn from_copy_field(raw: &str) -> SqlValue {
        if raw == NULL_MARKER {
            return SqlValue::Null;
        }
        SqlValue::from_field(decode_copy_escapes(raw))
    }

    /// Text form used when comparing against key sets.
    pub fn as_key(&self) -> Option<&str> {
        match self {
            SqlValue::Null => None,
            SqlValue::Number(value) | SqlValue::Text(value) => Some(value),
        }
    }

    pub fn render(&self, out: &mut String) {
        match self {
            SqlValue::Null => out.push_str("NULL"),
            SqlValue::Number(value) => out.push_str(value),
            SqlValue::Text(value) if needs_escape_string(value) => {
                out.push_str("E'");
                for ch in value.chars() {
                    match ch {
                        '\\' => out.push_str("\\\\"),
                        '\'' => out.push_str("''"),
                        '\n' => out.push_str("\\n"),
                        '\r' => out.push_str("\\r"),
                        '\t' => out.push_str("\\t"),
                        other => out.push(other),
                    }
                }
                out.push('\'');
            }
            SqlValue::Text(value) => {
                out.push('\'');
                out.push_str(&value.replace('\'', "''"));
                out.push('\'');
            }
        }
    }
}

fn needs_escape_string(value: &str) -> bool {
    value.contains(['\n', '\r', '\t', '\\'])
}

/// Decode the backslash escapes of PostgreSQL's COPY text format.
pub fn decode_copy_escapes(raw: &str) -> String {
    if !raw.contains('\\') {
        return raw.to_string();
    }

    let mut out = String::with_capacity(raw.len());
    let mut chars = raw.chars();
    while let Some(ch) = chars.next() {
        if ch != '\\' {
            out.push(ch);
            continue;
        }
        match chars.next() {
            Some('n') => out.push('\n'),
            Some('r') => out.push('\r'),
            Some('t') => out.push('\t'),
            Some('b') => out.push('\u{8}'),
            Some('f') => out.push('\u{c}'),
            Some('v') => out.push('\u{b}'),
            Some(other) => out.push(other),
            None => out.push('\\'),
        }
    }
    out
}

/// One row destined for a catalog table.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct InsertRow {
    pub table: Table,
    pub columns: Vec<String>,
    pub values: Vec<SqlValue>,
}

impl InsertRow {
    pub fn value(&self, column: &str) -> Option<&SqlValue> {
        self.columns
            .iter()
            .position(|c| c == column)
            .and_then(|index| self.values.get(index))
    }

    pub fn to_statement(&self) -> String {
        let mut out = String::with_capacity(64 + self.values.len() * 16);
        let _ = write!(
            out,
            "INSERT INTO {} ({}) VALUES (",
            self.table.name(),
            self.columns.join(", ")
        );
        for (index, value) in self.values.iter().enumerate() {
            if index > 0 {
                out.push_str(", ");
            }
            value.render(&mut out);
        }
        out.push_str(") ON CONFLICT DO NOTHING;");
        out
    }

    /// Parse a statement produced by [`InsertRow::to_statement`].
    /// The `ON CONFLICT DO NOTHING` suffix is optional.
    pub fn parse(line: &str) -> Result<InsertRow> {
        let malformed = |why: &str| Error::Malformed(format!("{}: {}", why, truncate(line)));

        let rest = line
            .trim()
            .strip_prefix("INSERT INTO ")
            .ok_or_else(|| malformed("expected INSERT INTO"))?;
        let (table_name, rest) = rest
            .split_once(" (")
            .ok_or_else(|| malformed("expected column list"))?;
        let table = Table::from_name(table_name.trim())
            .ok_or_else(|| malformed("unknown table"))?;
        let (column_list, rest) = rest
            .split_once(") VALUES (")
            .ok_or_else(|| malformed("expected VALUES"))?;
        let columns: Vec<String> = column_list
            .split(',')
            .map(|c| c.trim().to_string())
            .collect();

        let mut cursor = Cursor { rest };
        let mut values = Vec::with_capacity(columns.len());
        loop {
            cursor.skip_spaces();
            values.push(cursor.value().ok_or_else(|| malformed("bad value"))?);
            cursor.skip_spaces();
            if cursor.eat(",") {
                continue;
            }
            if cursor.eat(")") {
                break;
            }
            return Err(malformed("expected , or )"));
        }

        let tail = cursor.rest.trim();
        let tail = tail.strip_suffix(';').unwrap_or(tail).trim();
        if !(tail.is_empty() || tail == "ON CONFLICT DO NOTHING") {
            return Err(malformed("unexpected trailing text"));
        }
        if values.len() != columns.len() {
            return Err(malformed("column and value counts differ"));
        }

        Ok(InsertRow {
            table,
            columns,
            values,
        })
    }
}

/// True when `line` is an INSERT aimed at `table`.
pub fn is_insert_for(line: &str, table: Table) -> bool {
    line.strip_prefix("INSERT INTO ")
        .and_then(|rest| rest.strip_prefix(table.name()))
        .map_or(false, |rest| rest.starts_with(' '))
}

fn truncate(line: &str) -> &str {
    match line.char_indices().nth(80) {
        Some((index, _)) => &line[..index],
        None => line,
    }
}

struct Cursor<'a> {
    rest: &'a str,
}

impl<'a> Cursor<'a> {
    fn skip_spaces(&mut self) {
        self.rest = self.rest.trim_start_matches(' ');
    }

    fn eat(&mut self, token: &str) -> bool {
        match self.rest.strip_prefix(token) {
            Some(rest) => {
                self.rest = rest;
                true
            }
            None => false,
        }
    }

    fn value(&mut self) -> Option<SqlValue> {
        if self.eat("NULL") {
            return Some(SqlValue::Null);
        }
        if self.eat("E'") {
            return self.quoted(true).map(SqlValue::Text);
        }
        if self.eat("'") {
            return self.quoted(false).map(SqlValue::Text);
        }

        let end = self
            .rest
            .find(|c: char| !(c.is_ascii_digit() || c == '-' || c == '.'))
            .unwrap_or(self.rest.len());
        let (number, rest) = self.rest.split_at(end);
        if !NUMERIC.is_match(number) {
            return None;
        }
        self.rest = rest;
        Some(SqlValue::Number(number.to_string()))
    }

    /// Read a quoted literal body; the opening quote has been consumed.
    fn quoted(&mut self, escapes: bool) -> Option<String> {
        let mut out = String::new();
        let mut chars = self.rest.char_indices();
        while let Some((index, ch)) = chars.next() {
            match ch {
                '\'' => {
                    if self.rest[index + 1..].starts_with('\'') {
                        out.push('\'');
                        chars.next();
                    } else {
                        self.rest = &self.rest[index + 1..];
                        return Some(out);
                    }
                }
                '\\' if escapes => match chars.next().map(|(_, c)| c) {
                    Some('n') => out.push('\n'),
                    Some('r') => out.push('\r'),
                    Some('t') => out.push('\t'),
                    Some(other) => out.push(other),
                    None => return None,
                },
                other => out.push(other),
            }
        }
        None
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn product(values: Vec<SqlValue>) -> InsertRow {
        InsertRow {
            table: Table::Products,
            columns: vec![
                "slug".to_string(),
                "name".to_string(),
                "price".to_string(),
                "subcategory_slug".to_string(),
            ],
            values,
        }
    }

    #[test]
    fn test_from_copy_field_classification() {
        assert_eq!(SqlValue::from_copy_field("\\N"), SqlValue::Null);
        assert_eq!(SqlValue::from_copy_field("42"), SqlValue::Number("42".into()));
        assert_eq!(SqlValue::from_copy_field("-3.50"), SqlValue::Number("-3.50".into()));
        assert_eq!(SqlValue::from_copy_field("3."), SqlValue::Text("3.".into()));
        assert_eq!(SqlValue::from_copy_field("1e5"), SqlValue::Text("1e5".into()));
        assert_eq!(SqlValue::from_copy_field("a\\tb"), SqlValue::Text("a\tb".into()));
    }

    #[test]
    fn test_statement_quotes_and_escapes() {
        let row = product(vec![
            SqlValue::Text("o-reilly-mug".into()),
            SqlValue::Text("O'Reilly Mug".into()),
            SqlValue::Number("12.50".into()),
            SqlValue::Null,
        ]);
        assert_eq!(
            row.to_statement(),
            "INSERT INTO products (slug, name, price, subcategory_slug) \
             VALUES ('o-reilly-mug', 'O''Reilly Mug', 12.50, NULL) ON CONFLICT DO NOTHING;"
        );
    }

    #[test]
    fn test_multiline_text_stays_on_one_line() {
        let row = product(vec![
            SqlValue::Text("lamp".into()),
            SqlValue::Text("Line one\nLine 'two'\\end".into()),
            SqlValue::Number("1".into()),
            SqlValue::Text("lamps".into()),
        ]);
        let statement = row.to_statement();
        assert!(!statement.contains('\n'));
        assert!(statement.contains("E'Line one\\nLine ''two''\\\\end'"));
        assert_eq!(InsertRow::parse(&statement).unwrap(), row);
    }

    #[test]
    fn test_parse_reads_values_by_column() {
        let line = "INSERT INTO products (slug, name, price, subcategory_slug) \
                    VALUES ('desk', 'Desk, oak (large)', 199.99, 'desks') ON CONFLICT DO NOTHING;";
        let row = InsertRow::parse(line).unwrap();
        assert_eq!(row.table, Table::Products);
        assert_eq!(row.value("name"), Some(&SqlValue::Text("Desk, oak (large)".into())));
        assert_eq!(row.value("price"), Some(&SqlValue::Number("199.99".into())));
        assert_eq!(row.value("subcategory_slug").and_then(SqlValue::as_key), Some("desks"));
        assert_eq!(row.value("missing"), None);
    }

    #[test]
    fn test_parse_rejects_garbage() {
        assert!(InsertRow::parse("-- products data").is_err());
        assert!(InsertRow::parse("INSERT INTO users (id) VALUES (1);").is_err());
        assert!(InsertRow::parse("INSERT INTO products (slug, name) VALUES ('a');").is_err());
        assert!(InsertRow::parse("INSERT INTO products (slug) VALUES ('unterminated);").is_err());
        assert!(InsertRow::parse("INSERT INTO products (slug) VALUES (abc);").is_err());
    }

    #[test]
    fn test_is_insert_for() {
        let line = "INSERT INTO subcategories (id) VALUES (1) ON CONFLICT DO NOTHING;";
        assert!(is_insert_for(line, Table::Subcategories));
        assert!(!is_insert_for(line, Table::Categories));
        assert!(!is_insert_for("INSERT INTO subcategories_old (id) VALUES (1);", Table::Subcategories));
    }
}
