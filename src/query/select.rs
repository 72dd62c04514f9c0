//! Explicit column selections.
//!
//! A [`Select`] is the value every layer of the lazy loading policy passes around:
//! a per-call `select`, the selection active in an ambient [`Scope`](crate::Scope),
//! an association's configured `select`, a type's standing default selection, or
//! the eager column list injected by the [`ColumnResolver`](crate::ColumnResolver).
//! Absence of a `Select` means "unconstrained" and renders as `SELECT *`.

use crate::query::fetch::Ident;
use sea_query::{Expr, SelectStatement};
use std::fmt;

/// A column reference, optionally qualified by its table
#[derive(Debug, Clone, PartialEq, Eq, Hash)]
pub struct ColumnName {
    pub table: Option<String>,
    pub column: String,
}

impl ColumnName {
    /// Unqualified column reference
    pub fn new(column: impl Into<String>) -> Self {
        Self {
            table: None,
            column: column.into(),
        }
    }

    /// Table-qualified column reference (`"table"."column"`)
    pub fn qualified(table: impl Into<String>, column: impl Into<String>) -> Self {
        Self {
            table: Some(table.into()),
            column: column.into(),
        }
    }

    /// Parse `column` or `table.column`, tolerating double quotes around either part
    pub fn parse(text: &str) -> Self {
        let strip = |s: &str| s.trim().trim_matches('"').to_string();
        match text.trim().split_once('.') {
            Some((table, column)) => Self::qualified(strip(table), strip(column)),
            None => Self::new(strip(text)),
        }
    }

    pub(crate) fn apply_column(&self, stmt: &mut SelectStatement) {
        match &self.table {
            Some(table) => stmt.column((Ident::new(table), Ident::new(&self.column))),
            None => stmt.column(Ident::new(&self.column)),
        };
    }

    pub(crate) fn to_expr(&self) -> Expr {
        match &self.table {
            Some(table) => Expr::col((Ident::new(table), Ident::new(&self.column))),
            None => Expr::col(Ident::new(&self.column)),
        }
    }
}

impl fmt::Display for ColumnName {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match &self.table {
            Some(table) => write!(f, "{table}.{}", self.column),
            None => f.write_str(&self.column),
        }
    }
}

/// One entry of a selection list
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum SelectItem {
    /// A column, optionally projected under an alias
    Column {
        column: ColumnName,
        alias: Option<String>,
    },
    /// `*` (no table) or `table.*`
    Wildcard(Option<String>),
    /// A verbatim selection fragment such as `"title, permalink"`
    Raw(String),
}

impl SelectItem {
    fn parse_one(text: &str) -> Option<Self> {
        let text = text.trim();
        if text.is_empty() {
            return None;
        }
        if text == "*" {
            return Some(SelectItem::Wildcard(None));
        }
        if let Some(table) = text.strip_suffix(".*") {
            return Some(SelectItem::Wildcard(Some(table.trim_matches('"').to_string())));
        }
        let lower = text.to_ascii_lowercase();
        if let Some(pos) = lower.find(" as ") {
            let (column, alias) = (&text[..pos], &text[pos + 4..]);
            return Some(SelectItem::Column {
                column: ColumnName::parse(column),
                alias: Some(alias.trim().trim_matches('"').to_string()),
            });
        }
        Some(SelectItem::Column {
            column: ColumnName::parse(text),
            alias: None,
        })
    }
}

/// An explicit selection: ordered items plus a `DISTINCT` flag
#[derive(Debug, Clone, PartialEq, Eq, Default)]
pub struct Select {
    pub distinct: bool,
    pub items: Vec<SelectItem>,
}

impl Select {
    /// Unqualified column list, e.g. `Select::columns(["title", "permalink"])`
    pub fn columns<I, S>(columns: I) -> Self
    where
        I: IntoIterator<Item = S>,
        S: Into<String>,
    {
        Self {
            distinct: false,
            items: columns
                .into_iter()
                .map(|c| SelectItem::Column {
                    column: ColumnName::new(c),
                    alias: None,
                })
                .collect(),
        }
    }

    /// Column list qualified by `table`
    pub fn qualified<I, S>(table: &str, columns: I) -> Self
    where
        I: IntoIterator<Item = S>,
        S: Into<String>,
    {
        Self {
            distinct: false,
            items: columns
                .into_iter()
                .map(|c| SelectItem::Column {
                    column: ColumnName::qualified(table, c),
                    alias: None,
                })
                .collect(),
        }
    }

    /// Verbatim selection fragment, passed through to storage untouched
    pub fn raw(fragment: impl Into<String>) -> Self {
        Self {
            distinct: false,
            items: vec![SelectItem::Raw(fragment.into())],
        }
    }

    /// The literal "all columns" marker `*`
    pub fn wildcard() -> Self {
        Self {
            distinct: false,
            items: vec![SelectItem::Wildcard(None)],
        }
    }

    /// `table.*`
    pub fn table_wildcard(table: impl Into<String>) -> Self {
        Self {
            distinct: false,
            items: vec![SelectItem::Wildcard(Some(table.into()))],
        }
    }

    /// Set the `DISTINCT` flag
    #[must_use]
    pub fn distinct(mut self, distinct: bool) -> Self {
        self.distinct = distinct;
        self
    }

    /// Append an aliased column
    #[must_use]
    pub fn with_aliased(mut self, column: ColumnName, alias: impl Into<String>) -> Self {
        self.items.push(SelectItem::Column {
            column,
            alias: Some(alias.into()),
        });
        self
    }

    pub fn is_empty(&self) -> bool {
        self.items.is_empty()
    }

    /// Items with raw fragments split into parsed entries
    ///
    /// Storage engines that cannot hand a fragment to a SQL parser (the in-memory
    /// store, the join decoder) work on this expanded form.
    pub fn expanded_items(&self) -> Vec<SelectItem> {
        let mut out = Vec::with_capacity(self.items.len());
        for item in &self.items {
            match item {
                SelectItem::Raw(fragment) => {
                    out.extend(fragment.split(',').filter_map(SelectItem::parse_one));
                }
                other => out.push(other.clone()),
            }
        }
        out
    }

    /// Rendered names of the selected items, in order (`posts.id`, `title`, `t0_r0`, `*`)
    pub fn column_names(&self) -> Vec<String> {
        self.expanded_items()
            .into_iter()
            .map(|item| match item {
                SelectItem::Column { column, alias: Some(alias) } => format!("{column} AS {alias}"),
                SelectItem::Column { column, alias: None } => column.to_string(),
                SelectItem::Wildcard(Some(table)) => format!("{table}.*"),
                SelectItem::Wildcard(None) => "*".to_string(),
                SelectItem::Raw(raw) => raw,
            })
            .collect()
    }

    pub(crate) fn apply(&self, stmt: &mut SelectStatement) {
        if self.distinct {
            stmt.distinct();
        }
        for item in &self.items {
            match item {
                SelectItem::Column { column, alias: None } => column.apply_column(stmt),
                SelectItem::Column {
                    column,
                    alias: Some(alias),
                } => {
                    stmt.expr_as(column.to_expr(), Ident::new(alias));
                }
                SelectItem::Wildcard(None) => {
                    stmt.column(sea_query::Asterisk);
                }
                SelectItem::Wildcard(Some(table)) => {
                    stmt.expr(Expr::cust(format!("\"{table}\".*")));
                }
                SelectItem::Raw(raw) => {
                    stmt.expr(Expr::cust(raw.clone()));
                }
            }
        }
    }
}

impl fmt::Display for Select {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        if self.distinct {
            f.write_str("DISTINCT ")?;
        }
        f.write_str(&self.column_names().join(", "))
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_column_name_parse() {
        assert_eq!(ColumnName::parse("title"), ColumnName::new("title"));
        assert_eq!(
            ColumnName::parse("\"tags\".\"name\""),
            ColumnName::qualified("tags", "name")
        );
        assert_eq!(ColumnName::parse(" tags.name "), ColumnName::qualified("tags", "name"));
    }

    #[test]
    fn test_raw_fragment_expands_into_columns() {
        let select = Select::raw("title, permalink");
        assert_eq!(select.column_names(), vec!["title", "permalink"]);
        assert_eq!(select.items.len(), 1, "Raw fragment stays a single item until expanded");
    }

    #[test]
    fn test_raw_fragment_with_wildcards_and_aliases() {
        let select = Select::raw("tags.*, t0.post_id AS parent_record_id");
        let items = select.expanded_items();
        assert_eq!(items[0], SelectItem::Wildcard(Some("tags".to_string())));
        assert_eq!(
            items[1],
            SelectItem::Column {
                column: ColumnName::qualified("t0", "post_id"),
                alias: Some("parent_record_id".to_string()),
            }
        );
    }

    #[test]
    fn test_display_includes_distinct() {
        let select = Select::table_wildcard("categories").distinct(true);
        assert_eq!(select.to_string(), "DISTINCT categories.*");
    }
}
