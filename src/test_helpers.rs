//! In-memory storage engine.
//!
//! [`MemoryStore`] executes [`FetchQuery`] values against tables held in memory
//! and records every query it receives, so tests can assert on the exact
//! selection each path emitted. It understands inner and left joins on column
//! equality with extra ON terms, `Eq`/`In` filters, ordering, limit/offset,
//! `DISTINCT`, aliases, wildcards and raw comma-separated column lists.
//! Selecting or filtering on a column the table does not have fails with
//! [`LifeError::QueryError`], the way a SQL engine rejects an unknown column.

use crate::executor::{LifeError, LifeExecutor};
use crate::model::{value_key, Row};
use crate::query::{ColumnName, Direction, FetchQuery, Filter, JoinKind, SelectItem};
use indexmap::{IndexMap, IndexSet};
use parking_lot::Mutex;
use sea_query::Value;
use std::cmp::Ordering;

#[derive(Debug, Default, Clone)]
struct Table {
    columns: Vec<String>,
    rows: Vec<Row>,
}

#[derive(Debug, Default)]
struct StoreState {
    tables: IndexMap<String, Table>,
    log: Vec<FetchQuery>,
}

/// In-memory [`LifeExecutor`] with a query log
#[derive(Debug, Default)]
pub struct MemoryStore {
    state: Mutex<StoreState>,
}

/// One candidate result row: each participating table's row, `None` for a left-join miss
type Combo = Vec<(String, Option<Row>)>;

impl MemoryStore {
    pub fn new() -> Self {
        Self::default()
    }

    /// Create (or reset) a table with a fixed column list
    pub fn create_table<I, S>(&self, table: &str, columns: I)
    where
        I: IntoIterator<Item = S>,
        S: Into<String>,
    {
        let columns = columns.into_iter().map(Into::into).collect();
        self.state.lock().tables.insert(
            table.to_string(),
            Table {
                columns,
                rows: Vec::new(),
            },
        );
    }

    /// Insert a row; columns the table does not know yet are added to it
    pub fn insert<I, S>(&self, table: &str, values: I)
    where
        I: IntoIterator<Item = (S, Value)>,
        S: Into<String>,
    {
        let mut state = self.state.lock();
        let entry = state.tables.entry(table.to_string()).or_default();
        let mut row = Row::new();
        for (column, value) in values {
            let column = column.into();
            if !entry.columns.contains(&column) {
                entry.columns.push(column.clone());
            }
            row.insert(column, value);
        }
        entry.rows.push(row);
    }

    /// Delete rows whose `column` equals `value`, returning how many went
    pub fn delete(&self, table: &str, column: &str, value: impl Into<Value>) -> usize {
        let key = value_key(&value.into());
        let mut state = self.state.lock();
        let Some(entry) = state.tables.get_mut(table) else {
            return 0;
        };
        let before = entry.rows.len();
        entry
            .rows
            .retain(|row| row.get(column).map(value_key) != Some(key.clone()));
        before - entry.rows.len()
    }

    /// Every query executed so far, oldest first
    pub fn queries(&self) -> Vec<FetchQuery> {
        self.state.lock().log.clone()
    }

    pub fn query_count(&self) -> usize {
        self.state.lock().log.len()
    }

    pub fn last_query(&self) -> Option<FetchQuery> {
        self.state.lock().log.last().cloned()
    }

    /// Rendered selection of every logged query
    pub fn selections(&self) -> Vec<Vec<String>> {
        self.state
            .lock()
            .log
            .iter()
            .map(FetchQuery::selected_names)
            .collect()
    }

    pub fn clear_log(&self) {
        self.state.lock().log.clear();
    }

    fn execute(state: &StoreState, query: &FetchQuery) -> Result<Vec<Row>, LifeError> {
        let base = state
            .tables
            .get(&query.table)
            .ok_or_else(|| LifeError::QueryError(format!("no such table: {}", query.table)))?;

        let mut combos: Vec<Combo> = base
            .rows
            .iter()
            .map(|row| vec![(query.table.clone(), Some(row.clone()))])
            .collect();
        let mut participating = vec![query.table.clone()];

        for join in &query.joins {
            let joined = state
                .tables
                .get(&join.table)
                .ok_or_else(|| LifeError::QueryError(format!("no such table: {}", join.table)))?;
            participating.push(join.table.clone());
            let (inner_col, outer_col) = if join.right.table.as_deref() == Some(join.table.as_str()) {
                (&join.right, &join.left)
            } else {
                (&join.left, &join.right)
            };
            Self::check_column(state, &participating, inner_col)?;
            Self::check_column(state, &participating, outer_col)?;
            for filter in &join.on {
                Self::check_column(state, &participating, filter.column())?;
            }

            let mut next = Vec::new();
            for combo in combos {
                let outer = value_key(&Self::lookup(state, &combo, outer_col));
                let mut matched = false;
                for row in &joined.rows {
                    if outer.is_none() || row.get(&inner_col.column).and_then(value_key) != outer {
                        continue;
                    }
                    let mut extended = combo.clone();
                    extended.push((join.table.clone(), Some(row.clone())));
                    if join.on.iter().all(|filter| Self::matches(state, &extended, filter)) {
                        matched = true;
                        next.push(extended);
                    }
                }
                if !matched && join.kind == JoinKind::Left {
                    let mut extended = combo;
                    extended.push((join.table.clone(), None));
                    next.push(extended);
                }
            }
            combos = next;
        }

        for filter in &query.filters {
            Self::check_column(state, &participating, filter.column())?;
        }
        combos.retain(|combo| query.filters.iter().all(|filter| Self::matches(state, combo, filter)));

        for order in &query.order {
            Self::check_column(state, &participating, &order.column)?;
        }
        if !query.order.is_empty() {
            combos.sort_by(|a, b| {
                for order in &query.order {
                    let ordering = compare_values(
                        &Self::lookup(state, a, &order.column),
                        &Self::lookup(state, b, &order.column),
                    );
                    let ordering = match order.direction {
                        Direction::Asc => ordering,
                        Direction::Desc => ordering.reverse(),
                    };
                    if ordering != Ordering::Equal {
                        return ordering;
                    }
                }
                Ordering::Equal
            });
        }

        let items = match &query.select {
            Some(select) if !select.is_empty() => select.expanded_items(),
            _ => vec![SelectItem::Wildcard(None)],
        };
        let mut rows = Vec::with_capacity(combos.len());
        for combo in &combos {
            rows.push(Self::project(state, &participating, combo, &items)?);
        }

        if query.select.as_ref().is_some_and(|s| s.distinct) {
            let mut seen = IndexSet::new();
            rows.retain(|row| {
                let signature: Vec<(String, Option<String>)> = row
                    .iter()
                    .map(|(name, value)| (name.clone(), value_key(value)))
                    .collect();
                seen.insert(signature)
            });
        }

        let offset = usize::try_from(query.offset.unwrap_or(0)).unwrap_or(usize::MAX);
        let rows = rows.into_iter().skip(offset);
        Ok(match query.limit {
            Some(limit) => rows
                .take(usize::try_from(limit).unwrap_or(usize::MAX))
                .collect(),
            None => rows.collect(),
        })
    }

    fn project(
        state: &StoreState,
        participating: &[String],
        combo: &Combo,
        items: &[SelectItem],
    ) -> Result<Row, LifeError> {
        let mut out = Row::new();
        for item in items {
            match item {
                SelectItem::Column { column, alias } => {
                    Self::check_column(state, participating, column)?;
                    let name = alias.clone().unwrap_or_else(|| column.column.clone());
                    out.insert(name, Self::lookup(state, combo, column));
                }
                SelectItem::Wildcard(table) => {
                    let tables: Vec<&String> = match table {
                        Some(t) if participating.contains(t) => vec![t],
                        Some(t) => {
                            return Err(LifeError::QueryError(format!(
                                "missing FROM-clause entry for table {t}"
                            )))
                        }
                        None => participating.iter().collect(),
                    };
                    for t in tables {
                        let columns = state.tables.get(t).map(|tbl| tbl.columns.clone()).unwrap_or_default();
                        for c in columns {
                            if out.contains_key(&c) {
                                continue;
                            }
                            let value = Self::lookup(state, combo, &ColumnName::qualified(t.clone(), c.clone()));
                            out.insert(c, value);
                        }
                    }
                }
                SelectItem::Raw(raw) => {
                    return Err(LifeError::QueryError(format!("unparsed selection fragment: {raw}")))
                }
            }
        }
        Ok(out)
    }

    /// SQL truth of `filter` on `combo`; NULL never matches
    fn matches(state: &StoreState, combo: &Combo, filter: &Filter) -> bool {
        let actual = value_key(&Self::lookup(state, combo, filter.column()));
        if actual.is_none() {
            return false;
        }
        match filter {
            Filter::Eq(_, value) => actual == value_key(value),
            Filter::In(_, values) => values.iter().any(|v| value_key(v) == actual),
        }
    }

    /// Reject columns no participating table has
    fn check_column(state: &StoreState, participating: &[String], column: &ColumnName) -> Result<(), LifeError> {
        let known = |table: &str, name: &str| {
            state
                .tables
                .get(table)
                .is_some_and(|t| t.columns.iter().any(|c| c == name))
        };
        let found = match &column.table {
            Some(table) => participating.contains(table) && known(table, &column.column),
            None => participating.iter().any(|t| known(t, &column.column)),
        };
        if found {
            Ok(())
        } else {
            Err(LifeError::QueryError(format!("column {column} does not exist")))
        }
    }

    /// Value of `column` in `combo`; NULL for left-join misses and unset cells
    fn lookup(state: &StoreState, combo: &Combo, column: &ColumnName) -> Value {
        combo
            .iter()
            .find(|(table, _)| match &column.table {
                Some(t) => t == table,
                None => state
                    .tables
                    .get(table)
                    .is_some_and(|tbl| tbl.columns.contains(&column.column)),
            })
            .and_then(|(_, row)| row.as_ref())
            .and_then(|row| row.get(&column.column).cloned())
            .unwrap_or(Value::String(None))
    }
}

impl LifeExecutor for MemoryStore {
    fn query_all(&self, query: &FetchQuery) -> Result<Vec<Row>, LifeError> {
        let mut state = self.state.lock();
        state.log.push(query.clone());
        Self::execute(&state, query)
    }
}

/// NULLs first, integers and floats numerically, everything else by key text
fn compare_values(a: &Value, b: &Value) -> Ordering {
    match (value_key(a), value_key(b)) {
        (None, None) => Ordering::Equal,
        (None, Some(_)) => Ordering::Less,
        (Some(_), None) => Ordering::Greater,
        (Some(a), Some(b)) => {
            let numeric = |k: &str| {
                k.strip_prefix("i:")
                    .or_else(|| k.strip_prefix("f:"))
                    .and_then(|n| n.parse::<f64>().ok())
            };
            match (numeric(&a), numeric(&b)) {
                (Some(x), Some(y)) => x.partial_cmp(&y).unwrap_or(Ordering::Equal),
                _ => a.cmp(&b),
            }
        }
    }
}
