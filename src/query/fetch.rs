//! The structured query handed to a [`LifeExecutor`](crate::LifeExecutor).
//!
//! Every path of the lazy loading layer ends in a `FetchQuery`. It carries the
//! resolved selection verbatim so storage sees exactly what the policy decided,
//! and renders to SQL through SeaQuery for logging and SQL-backed executors.

use crate::query::select::{ColumnName, Select};
use sea_query::{
    Condition, Expr, ExprTrait, Iden, JoinType, Order, PostgresQueryBuilder, SelectStatement, Value,
};

/// Owned identifier for SeaQuery statements
#[derive(Debug, Clone)]
pub(crate) struct Ident(String);

impl Ident {
    pub(crate) fn new(name: &str) -> Self {
        Self(name.to_string())
    }
}

impl Iden for Ident {
    fn unquoted(&self) -> &str {
        &self.0
    }
}

/// Kind of join
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum JoinKind {
    Inner,
    Left,
}

/// `JOIN table ON left = right [AND on...]`
#[derive(Debug, Clone, PartialEq)]
pub struct Join {
    pub kind: JoinKind,
    pub table: String,
    pub left: ColumnName,
    pub right: ColumnName,
    /// Extra ON terms restricting which rows of `table` join
    pub on: Vec<Filter>,
}

impl Join {
    pub fn inner(table: impl Into<String>, left: ColumnName, right: ColumnName) -> Self {
        Self {
            kind: JoinKind::Inner,
            table: table.into(),
            left,
            right,
            on: Vec::new(),
        }
    }

    pub fn left(table: impl Into<String>, left: ColumnName, right: ColumnName) -> Self {
        Self {
            kind: JoinKind::Left,
            table: table.into(),
            left,
            right,
            on: Vec::new(),
        }
    }

    #[must_use]
    pub fn on<I: IntoIterator<Item = Filter>>(mut self, filters: I) -> Self {
        self.on.extend(filters);
        self
    }

    fn to_condition(&self) -> Condition {
        self.on.iter().fold(
            Condition::all().add(self.left.to_expr().eq(self.right.to_expr())),
            |cond, filter| cond.add(filter.to_expr()),
        )
    }
}

/// Row filter
#[derive(Debug, Clone, PartialEq)]
pub enum Filter {
    /// `column = value`
    Eq(ColumnName, Value),
    /// `column IN (values)`
    In(ColumnName, Vec<Value>),
}

impl Filter {
    pub fn eq(column: ColumnName, value: impl Into<Value>) -> Self {
        Filter::Eq(column, value.into())
    }

    pub fn is_in(column: ColumnName, values: Vec<Value>) -> Self {
        Filter::In(column, values)
    }

    pub fn column(&self) -> &ColumnName {
        match self {
            Filter::Eq(column, _) | Filter::In(column, _) => column,
        }
    }

    fn to_expr(&self) -> Expr {
        match self {
            Filter::Eq(column, value) => column.to_expr().eq(value.clone()),
            Filter::In(column, values) => column.to_expr().is_in(values.clone()),
        }
    }
}

/// Sort direction
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Direction {
    Asc,
    Desc,
}

/// `ORDER BY column direction`
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct OrderBy {
    pub column: ColumnName,
    pub direction: Direction,
}

impl OrderBy {
    pub fn asc(column: ColumnName) -> Self {
        Self {
            column,
            direction: Direction::Asc,
        }
    }

    pub fn desc(column: ColumnName) -> Self {
        Self {
            column,
            direction: Direction::Desc,
        }
    }
}

/// A single-table (optionally joined) fetch
///
/// # Example
///
/// ```
/// use lifeguard_lazy::{ColumnName, FetchQuery, Filter, Select};
///
/// let query = FetchQuery::new("posts")
///     .select(Select::qualified("posts", ["id", "body"]))
///     .filter(Filter::eq(ColumnName::qualified("posts", "id"), 1))
///     .limit(1);
/// assert!(query.to_sql().contains(r#""posts"."body""#));
/// ```
#[derive(Debug, Clone, PartialEq)]
pub struct FetchQuery {
    pub table: String,
    /// `None` renders as `SELECT *`
    pub select: Option<Select>,
    pub joins: Vec<Join>,
    pub filters: Vec<Filter>,
    pub order: Vec<OrderBy>,
    pub limit: Option<u64>,
    pub offset: Option<u64>,
}

impl FetchQuery {
    pub fn new(table: impl Into<String>) -> Self {
        Self {
            table: table.into(),
            select: None,
            joins: Vec::new(),
            filters: Vec::new(),
            order: Vec::new(),
            limit: None,
            offset: None,
        }
    }

    #[must_use]
    pub fn select(mut self, select: Select) -> Self {
        self.select = Some(select);
        self
    }

    #[must_use]
    pub fn maybe_select(mut self, select: Option<Select>) -> Self {
        self.select = select;
        self
    }

    #[must_use]
    pub fn join(mut self, join: Join) -> Self {
        self.joins.push(join);
        self
    }

    #[must_use]
    pub fn filter(mut self, filter: Filter) -> Self {
        self.filters.push(filter);
        self
    }

    #[must_use]
    pub fn filters<I: IntoIterator<Item = Filter>>(mut self, filters: I) -> Self {
        self.filters.extend(filters);
        self
    }

    #[must_use]
    pub fn order_by<I: IntoIterator<Item = OrderBy>>(mut self, order: I) -> Self {
        self.order.extend(order);
        self
    }

    #[must_use]
    pub fn limit(mut self, limit: u64) -> Self {
        self.limit = Some(limit);
        self
    }

    #[must_use]
    pub fn maybe_limit(mut self, limit: Option<u64>) -> Self {
        self.limit = limit;
        self
    }

    #[must_use]
    pub fn maybe_offset(mut self, offset: Option<u64>) -> Self {
        self.offset = offset;
        self
    }

    /// Rendered names of the selection (`["*"]` when unconstrained)
    pub fn selected_names(&self) -> Vec<String> {
        match &self.select {
            Some(select) => select.column_names(),
            None => vec!["*".to_string()],
        }
    }

    /// Build the SeaQuery statement for this fetch
    pub fn to_statement(&self) -> SelectStatement {
        let mut stmt = SelectStatement::default();
        match &self.select {
            Some(select) if !select.is_empty() => select.apply(&mut stmt),
            _ => {
                stmt.column(sea_query::Asterisk);
            }
        }
        stmt.from(Ident::new(&self.table));

        for join in &self.joins {
            let join_type = match join.kind {
                JoinKind::Inner => JoinType::InnerJoin,
                JoinKind::Left => JoinType::LeftJoin,
            };
            stmt.join(join_type, Ident::new(&join.table), join.to_condition());
        }

        for filter in &self.filters {
            stmt.and_where(filter.to_expr());
        }

        for order in &self.order {
            let direction = match order.direction {
                Direction::Asc => Order::Asc,
                Direction::Desc => Order::Desc,
            };
            stmt.order_by_expr(order.column.to_expr(), direction);
        }

        if let Some(limit) = self.limit {
            stmt.limit(limit);
        }
        if let Some(offset) = self.offset {
            stmt.offset(offset);
        }
        stmt
    }

    /// Render as PostgreSQL (placeholders for bound values)
    pub fn to_sql(&self) -> String {
        let (sql, _values) = self.to_statement().build(PostgresQueryBuilder);
        sql
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_unconstrained_fetch_renders_wildcard() {
        let sql = FetchQuery::new("accounts").limit(1).to_sql();
        assert!(sql.starts_with("SELECT *"), "Unconstrained fetch should be SELECT *: {sql}");
        assert!(sql.contains(r#"FROM "accounts""#), "SQL should name the table: {sql}");
        assert!(sql.to_uppercase().contains("LIMIT"), "SQL should keep the limit: {sql}");
    }

    #[test]
    fn test_qualified_selection_renders_in_order() {
        let sql = FetchQuery::new("posts")
            .select(Select::qualified("posts", ["id", "author_id", "title", "permalink"]))
            .to_sql();
        let id = sql.find(r#""posts"."id""#).expect("id column rendered");
        let permalink = sql.find(r#""posts"."permalink""#).expect("permalink column rendered");
        assert!(id < permalink, "Column order must be preserved: {sql}");
        assert!(!sql.contains("body"), "Unselected columns must not appear: {sql}");
    }

    #[test]
    fn test_filters_and_joins_render() {
        let sql = FetchQuery::new("tags")
            .select(Select::qualified("tags", ["id", "name"]))
            .join(Join::inner(
                "posts_tags",
                ColumnName::qualified("tags", "id"),
                ColumnName::qualified("posts_tags", "tag_id"),
            ))
            .filter(Filter::eq(ColumnName::qualified("posts_tags", "post_id"), 1))
            .to_sql();
        assert!(sql.contains("INNER JOIN"), "Join should render: {sql}");
        assert!(sql.contains("WHERE"), "Filter should render: {sql}");
        assert!(sql.contains('$'), "Filter values should be bound: {sql}");
    }

    #[test]
    fn test_join_on_terms_render_in_the_join_clause() {
        let sql = FetchQuery::new("posts")
            .join(
                Join::left(
                    "comments",
                    ColumnName::qualified("comments", "post_id"),
                    ColumnName::qualified("posts", "id"),
                )
                .on([Filter::eq(ColumnName::qualified("comments", "approved"), true)]),
            )
            .to_sql();
        let join = sql.find("LEFT JOIN").expect("join rendered");
        let term = sql.find(r#""comments"."approved""#).expect("ON term rendered");
        assert!(term > join, "ON term belongs to the join: {sql}");
        assert!(!sql.contains("WHERE"), "ON terms are not WHERE filters: {sql}");
    }

    #[test]
    fn test_selected_names() {
        assert_eq!(FetchQuery::new("accounts").selected_names(), vec!["*"]);
        let query = FetchQuery::new("posts").select(Select::columns(["title"]));
        assert_eq!(query.selected_names(), vec!["title"]);
    }
}
