//! Association metadata.
//!
//! An [`AssociationDef`] is the metadata object every association path reads:
//! its kind, target, key columns, join table, through/source hops and its own
//! configured `select`, `distinct`, `conditions` and `order`. Unset keys follow
//! the usual naming conventions and are resolved against the owner and target
//! descriptors.

use crate::query::{Filter, OrderBy, Select};
use crate::schema::EntityDef;

/// Shape of an association
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum AssociationKind {
    /// Owner holds the foreign key (`post.author`)
    BelongsTo,
    /// Target holds the foreign key, at most one target
    HasOne,
    /// Target holds the foreign key
    HasMany,
    /// Owner and target linked through a join table
    HasAndBelongsToMany,
    /// Reached through another association of the owner
    HasManyThrough,
}

impl AssociationKind {
    pub fn is_collection(self) -> bool {
        matches!(
            self,
            AssociationKind::HasMany
                | AssociationKind::HasAndBelongsToMany
                | AssociationKind::HasManyThrough
        )
    }

    pub fn label(self) -> &'static str {
        match self {
            AssociationKind::BelongsTo => "belongs_to",
            AssociationKind::HasOne => "has_one",
            AssociationKind::HasMany => "has_many",
            AssociationKind::HasAndBelongsToMany => "has_and_belongs_to_many",
            AssociationKind::HasManyThrough => "has_many_through",
        }
    }
}

/// Metadata of one association
///
/// # Example
///
/// ```
/// use lifeguard_lazy::{AssociationDef, AssociationKind, Select};
///
/// let tags = AssociationDef::has_and_belongs_to_many("tags", "Tag")
///     .select(Select::raw("tags.id, tags.name"));
/// assert_eq!(tags.kind(), AssociationKind::HasAndBelongsToMany);
/// assert!(tags.configured_select().is_some());
/// ```
#[derive(Debug, Clone, PartialEq)]
pub struct AssociationDef {
    name: String,
    kind: AssociationKind,
    target: String,
    foreign_key: Option<String>,
    primary_key: Option<String>,
    association_foreign_key: Option<String>,
    join_table: Option<String>,
    through: Option<String>,
    source: Option<String>,
    select: Option<Select>,
    distinct: bool,
    conditions: Vec<Filter>,
    order: Vec<OrderBy>,
}

impl AssociationDef {
    fn with_kind(name: impl Into<String>, kind: AssociationKind, target: impl Into<String>) -> Self {
        Self {
            name: name.into(),
            kind,
            target: target.into(),
            foreign_key: None,
            primary_key: None,
            association_foreign_key: None,
            join_table: None,
            through: None,
            source: None,
            select: None,
            distinct: false,
            conditions: Vec::new(),
            order: Vec::new(),
        }
    }

    pub fn belongs_to(name: impl Into<String>, target: impl Into<String>) -> Self {
        Self::with_kind(name, AssociationKind::BelongsTo, target)
    }

    pub fn has_one(name: impl Into<String>, target: impl Into<String>) -> Self {
        Self::with_kind(name, AssociationKind::HasOne, target)
    }

    pub fn has_many(name: impl Into<String>, target: impl Into<String>) -> Self {
        Self::with_kind(name, AssociationKind::HasMany, target)
    }

    pub fn has_and_belongs_to_many(name: impl Into<String>, target: impl Into<String>) -> Self {
        Self::with_kind(name, AssociationKind::HasAndBelongsToMany, target)
    }

    /// `has_many :name, through: :through`
    pub fn has_many_through(
        name: impl Into<String>,
        target: impl Into<String>,
        through: impl Into<String>,
    ) -> Self {
        let mut def = Self::with_kind(name, AssociationKind::HasManyThrough, target);
        def.through = Some(through.into());
        def
    }

    #[must_use]
    pub fn foreign_key(mut self, column: impl Into<String>) -> Self {
        self.foreign_key = Some(column.into());
        self
    }

    #[must_use]
    pub fn primary_key(mut self, column: impl Into<String>) -> Self {
        self.primary_key = Some(column.into());
        self
    }

    #[must_use]
    pub fn association_foreign_key(mut self, column: impl Into<String>) -> Self {
        self.association_foreign_key = Some(column.into());
        self
    }

    #[must_use]
    pub fn join_table(mut self, table: impl Into<String>) -> Self {
        self.join_table = Some(table.into());
        self
    }

    /// Association on the join records reached through `through`
    #[must_use]
    pub fn source(mut self, association: impl Into<String>) -> Self {
        self.source = Some(association.into());
        self
    }

    #[must_use]
    pub fn select(mut self, select: Select) -> Self {
        self.select = Some(select);
        self
    }

    #[must_use]
    pub fn distinct(mut self, distinct: bool) -> Self {
        self.distinct = distinct;
        self
    }

    #[must_use]
    pub fn condition(mut self, filter: Filter) -> Self {
        self.conditions.push(filter);
        self
    }

    #[must_use]
    pub fn order(mut self, order: OrderBy) -> Self {
        self.order.push(order);
        self
    }

    pub fn name(&self) -> &str {
        &self.name
    }

    pub fn kind(&self) -> AssociationKind {
        self.kind
    }

    pub fn target(&self) -> &str {
        &self.target
    }

    pub fn configured_select(&self) -> Option<&Select> {
        self.select.as_ref()
    }

    pub fn is_distinct(&self) -> bool {
        self.distinct
    }

    pub fn conditions(&self) -> &[Filter] {
        &self.conditions
    }

    pub fn ordering(&self) -> &[OrderBy] {
        &self.order
    }

    pub fn through(&self) -> Option<&str> {
        self.through.as_deref()
    }

    /// Foreign key column
    ///
    /// For `belongs_to` it lives on the owner (`<name>_id`), otherwise on the
    /// target or join table (`<owner>_id`).
    pub fn foreign_key_column(&self, owner: &EntityDef) -> String {
        match (&self.foreign_key, self.kind) {
            (Some(column), _) => column.clone(),
            (None, AssociationKind::BelongsTo) => format!("{}_id", self.name),
            (None, _) => format!("{}_id", owner.snake_name()),
        }
    }

    /// Key column the foreign key points at on the referenced side
    ///
    /// The target's key for `belongs_to`, the owner's key for everything else.
    pub fn referenced_key_column<'a>(&'a self, owner: &'a EntityDef, target: &'a EntityDef) -> &'a str {
        match (&self.primary_key, self.kind) {
            (Some(column), _) => column.as_str(),
            (None, AssociationKind::BelongsTo) => target.primary_key_column(),
            (None, _) => owner.primary_key_column(),
        }
    }

    /// Join table name: both table names, sorted, joined with `_`
    pub fn join_table_name(&self, owner: &EntityDef, target: &EntityDef) -> String {
        match &self.join_table {
            Some(table) => table.clone(),
            None => {
                let mut tables = [owner.table(), target.table()];
                tables.sort_unstable();
                tables.join("_")
            }
        }
    }

    /// Join table column pointing at the target
    pub fn association_foreign_key_column(&self, target: &EntityDef) -> String {
        self.association_foreign_key
            .clone()
            .unwrap_or_else(|| format!("{}_id", target.snake_name()))
    }

    /// Name of the association followed on the join records of a through hop
    pub fn source_name(&self, target: &EntityDef) -> String {
        self.source.clone().unwrap_or_else(|| target.snake_name())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn post() -> EntityDef {
        EntityDef::new("Post", "posts").columns(["id", "author_id", "title"])
    }

    fn tag() -> EntityDef {
        EntityDef::new("Tag", "tags").columns(["id", "name"])
    }

    #[test]
    fn test_foreign_key_conventions() {
        let author = AssociationDef::belongs_to("author", "User");
        assert_eq!(author.foreign_key_column(&post()), "author_id");

        let comments = AssociationDef::has_many("comments", "Comment");
        assert_eq!(comments.foreign_key_column(&post()), "post_id");

        let explicit = AssociationDef::has_many("replies", "Comment").foreign_key("parent_id");
        assert_eq!(explicit.foreign_key_column(&post()), "parent_id");
    }

    #[test]
    fn test_referenced_key_sides() {
        let (post, user) = (post(), EntityDef::new("User", "users").primary_key("uid"));
        let author = AssociationDef::belongs_to("author", "User");
        assert_eq!(author.referenced_key_column(&post, &user), "uid");

        let comments = AssociationDef::has_many("comments", "Comment");
        assert_eq!(comments.referenced_key_column(&post, &user), "id");
    }

    #[test]
    fn test_join_table_conventions() {
        let tags = AssociationDef::has_and_belongs_to_many("tags", "Tag");
        assert_eq!(tags.join_table_name(&post(), &tag()), "posts_tags");
        assert_eq!(tags.join_table_name(&tag(), &post()), "posts_tags", "Order of tables is alphabetical");
        assert_eq!(tags.foreign_key_column(&post()), "post_id");
        assert_eq!(tags.association_foreign_key_column(&tag()), "tag_id");
    }

    #[test]
    fn test_through_source_defaults_to_target_name() {
        let categories = AssociationDef::has_many_through("categories", "Category", "categorizations");
        let category = EntityDef::new("Category", "categories");
        assert_eq!(categories.through(), Some("categorizations"));
        assert_eq!(categories.source_name(&category), "category");
        assert!(categories.kind().is_collection());
        assert!(!AssociationKind::BelongsTo.is_collection());
    }
}
