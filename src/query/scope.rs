//! Per-call find options and the explicit ambient scope.
//!
//! An ambient scope is an explicit accumulator passed to every find that should
//! honor it, instead of state threaded implicitly through nested calls. A
//! frame applies to one entity, so a scope opened for `Comment` shapes
//! `post.comments.find(..)` without touching finds on `Post`.

use crate::query::fetch::{Filter, OrderBy};
use crate::query::select::Select;

/// One frame of ambient scope for one entity
#[derive(Debug, Clone, PartialEq)]
pub struct Scope {
    pub entity: String,
    pub select: Option<Select>,
    pub conditions: Vec<Filter>,
}

impl Scope {
    pub fn new(entity: impl Into<String>) -> Self {
        Self {
            entity: entity.into(),
            select: None,
            conditions: Vec::new(),
        }
    }

    #[must_use]
    pub fn select(mut self, select: Select) -> Self {
        self.select = Some(select);
        self
    }

    #[must_use]
    pub fn filter(mut self, filter: Filter) -> Self {
        self.conditions.push(filter);
        self
    }
}

/// Stack of active scope frames
///
/// # Example
///
/// ```
/// use lifeguard_lazy::{Scope, ScopeStack, Select};
///
/// let mut stack = ScopeStack::new();
/// stack.with_scope(Scope::new("Post").select(Select::raw("title, permalink")), |inner| {
///     assert!(inner.select_for("Post").is_some());
///     assert!(inner.select_for("Comment").is_none());
/// });
/// assert!(stack.select_for("Post").is_none());
/// ```
#[derive(Debug, Clone, Default)]
pub struct ScopeStack {
    frames: Vec<Scope>,
}

impl ScopeStack {
    pub fn new() -> Self {
        Self::default()
    }

    /// Run `f` with `scope` pushed on top of the stack
    pub fn with_scope<R>(&mut self, scope: Scope, f: impl FnOnce(&mut ScopeStack) -> R) -> R {
        self.frames.push(scope);
        let result = f(self);
        self.frames.pop();
        result
    }

    /// Innermost explicit selection in scope for `entity`
    pub fn select_for(&self, entity: &str) -> Option<&Select> {
        self.frames
            .iter()
            .rev()
            .filter(|frame| frame.entity == entity)
            .find_map(|frame| frame.select.as_ref())
    }

    /// Conditions of every frame for `entity`, outermost first
    pub fn conditions_for(&self, entity: &str) -> Vec<Filter> {
        self.frames
            .iter()
            .filter(|frame| frame.entity == entity)
            .flat_map(|frame| frame.conditions.iter().cloned())
            .collect()
    }

    pub fn depth(&self) -> usize {
        self.frames.len()
    }
}

/// How `include`d associations are loaded
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub enum EagerStrategy {
    /// Join when conditions or ordering reference another table, preload otherwise
    #[default]
    Auto,
    /// One extra query per association
    Preload,
    /// A single multi-table join
    Join,
}

/// Options of a single find call
#[derive(Debug, Clone, Default, PartialEq)]
pub struct FindOptions {
    pub select: Option<Select>,
    pub conditions: Vec<Filter>,
    pub order: Vec<OrderBy>,
    pub limit: Option<u64>,
    pub offset: Option<u64>,
    pub include: Vec<String>,
    pub eager: EagerStrategy,
}

impl FindOptions {
    pub fn all() -> Self {
        Self::default()
    }

    pub fn first() -> Self {
        Self {
            limit: Some(1),
            ..Self::default()
        }
    }

    #[must_use]
    pub fn select(mut self, select: Select) -> Self {
        self.select = Some(select);
        self
    }

    #[must_use]
    pub fn filter(mut self, filter: Filter) -> Self {
        self.conditions.push(filter);
        self
    }

    #[must_use]
    pub fn order_by(mut self, order: OrderBy) -> Self {
        self.order.push(order);
        self
    }

    #[must_use]
    pub fn limit(mut self, limit: u64) -> Self {
        self.limit = Some(limit);
        self
    }

    #[must_use]
    pub fn offset(mut self, offset: u64) -> Self {
        self.offset = Some(offset);
        self
    }

    #[must_use]
    pub fn include(mut self, association: impl Into<String>) -> Self {
        self.include.push(association.into());
        self
    }

    #[must_use]
    pub fn eager(mut self, strategy: EagerStrategy) -> Self {
        self.eager = strategy;
        self
    }

    /// Whether any condition or ordering column is qualified by a table other than `table`
    pub fn references_other_tables(&self, table: &str) -> bool {
        let foreign = |t: &Option<String>| t.as_deref().is_some_and(|t| t != table);
        self.conditions.iter().any(|f| foreign(&f.column().table))
            || self.order.iter().any(|o| foreign(&o.column.table))
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::query::select::ColumnName;

    #[test]
    fn test_innermost_frame_wins() {
        let mut stack = ScopeStack::new();
        stack.with_scope(Scope::new("Post").select(Select::columns(["title"])), |outer| {
            outer.with_scope(Scope::new("Post").select(Select::columns(["permalink"])), |inner| {
                assert_eq!(inner.select_for("Post"), Some(&Select::columns(["permalink"])));
                assert_eq!(inner.depth(), 2);
            });
            assert_eq!(outer.select_for("Post"), Some(&Select::columns(["title"])));
        });
        assert_eq!(stack.depth(), 0, "Frames are popped when the closure returns");
    }

    #[test]
    fn test_frame_without_select_does_not_hide_outer_select() {
        let mut stack = ScopeStack::new();
        stack.with_scope(Scope::new("Comment").select(Select::columns(["name"])), |outer| {
            let filter = Filter::eq(ColumnName::new("post_id"), 1);
            outer.with_scope(Scope::new("Comment").filter(filter), |inner| {
                assert_eq!(inner.select_for("Comment"), Some(&Select::columns(["name"])));
                assert_eq!(inner.conditions_for("Comment").len(), 1);
            });
        });
    }

    #[test]
    fn test_references_other_tables() {
        let options = FindOptions::first().filter(Filter::eq(ColumnName::qualified("comments", "name"), "x"));
        assert!(options.references_other_tables("posts"));
        assert!(!options.references_other_tables("comments"));
        assert!(!FindOptions::first()
            .filter(Filter::eq(ColumnName::new("title"), "x"))
            .references_other_tables("posts"));
    }
}
