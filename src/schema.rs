//! Entity descriptors and the catalog that owns them.
//!
//! An [`EntityDef`] is the runtime descriptor of a mapped type: its table, its
//! schema columns in natural order, its primary key, an optional standing
//! default selection, its associations and its lazy attribute set. Descriptors
//! are built with consuming builder methods and registered in a [`Catalog`]
//! during setup, after which they are shared as `Arc<EntityDef>`.
//!
//! Single-table inheritance: a subtype built with [`EntityDef::subtype_of`]
//! shares its parent's table, columns and primary key, and inherits the parent's
//! default selection, associations and lazy attributes.

use crate::executor::LifeError;
use crate::lazy::registry::{EagerColumnCache, LazyAttributeSet};
use crate::model::{Record, Row};
use crate::query::{ColumnName, Filter, Select};
use crate::relation::def::AssociationDef;
use convert_case::{Case, Casing};
use indexmap::{IndexMap, IndexSet};
use sea_query::Value;
use std::sync::Arc;

/// Descriptor of one mapped entity type
pub struct EntityDef {
    name: String,
    table: String,
    columns: Vec<String>,
    primary_key: String,
    default_select: Option<Select>,
    inheritance_column: Option<String>,
    parent: Option<Arc<EntityDef>>,
    associations: IndexMap<String, AssociationDef>,
    lazy: LazyAttributeSet,
    eager_cache: EagerColumnCache,
}

impl EntityDef {
    pub fn new(name: impl Into<String>, table: impl Into<String>) -> Self {
        Self {
            name: name.into(),
            table: table.into(),
            columns: Vec::new(),
            primary_key: "id".to_string(),
            default_select: None,
            inheritance_column: None,
            parent: None,
            associations: IndexMap::new(),
            lazy: LazyAttributeSet::new(),
            eager_cache: EagerColumnCache::default(),
        }
    }

    /// Single-table inheritance subtype of `parent`
    pub fn subtype_of(name: impl Into<String>, parent: &Arc<EntityDef>) -> Self {
        Self {
            name: name.into(),
            table: parent.table.clone(),
            columns: parent.columns.clone(),
            primary_key: parent.primary_key.clone(),
            default_select: None,
            inheritance_column: parent.inheritance_column.clone(),
            parent: Some(Arc::clone(parent)),
            associations: IndexMap::new(),
            lazy: LazyAttributeSet::new(),
            eager_cache: EagerColumnCache::default(),
        }
    }

    #[must_use]
    pub fn columns<I, S>(mut self, columns: I) -> Self
    where
        I: IntoIterator<Item = S>,
        S: Into<String>,
    {
        self.columns = columns.into_iter().map(Into::into).collect();
        self
    }

    #[must_use]
    pub fn primary_key(mut self, column: impl Into<String>) -> Self {
        self.primary_key = column.into();
        self
    }

    /// Standing "always select this" rule for finds on this type
    #[must_use]
    pub fn default_select(mut self, select: Select) -> Self {
        self.default_select = Some(select);
        self
    }

    #[must_use]
    pub fn inheritance_column(mut self, column: impl Into<String>) -> Self {
        self.inheritance_column = Some(column.into());
        self
    }

    #[must_use]
    pub fn association(mut self, association: AssociationDef) -> Self {
        self.associations
            .insert(association.name().to_string(), association);
        self
    }

    /// Lazy attributes declared while building the descriptor
    #[must_use]
    pub fn lazy<I, S>(self, names: I) -> Self
    where
        I: IntoIterator<Item = S>,
        S: Into<String>,
    {
        self.declare_lazy(names);
        self
    }

    pub fn into_shared(self) -> Arc<EntityDef> {
        Arc::new(self)
    }

    pub fn name(&self) -> &str {
        &self.name
    }

    pub fn table(&self) -> &str {
        &self.table
    }

    /// Schema columns in natural order
    pub fn column_names(&self) -> &[String] {
        &self.columns
    }

    pub fn has_column(&self, column: &str) -> bool {
        self.columns.iter().any(|c| c == column)
    }

    pub fn primary_key_column(&self) -> &str {
        &self.primary_key
    }

    /// Standing default selection, own or inherited
    pub fn default_selection(&self) -> Option<&Select> {
        self.default_select
            .as_ref()
            .or_else(|| self.parent.as_ref().and_then(|p| p.default_selection()))
    }

    /// Column holding the STI type name (`type` by convention when present)
    pub fn inheritance_column_name(&self) -> Option<&str> {
        match &self.inheritance_column {
            Some(column) => Some(column.as_str()),
            None if self.has_column("type") => Some("type"),
            None => None,
        }
    }

    pub fn parent(&self) -> Option<&Arc<EntityDef>> {
        self.parent.as_ref()
    }

    /// Topmost ancestor's name (or own name)
    pub fn base_name(&self) -> &str {
        match &self.parent {
            Some(parent) => parent.base_name(),
            None => &self.name,
        }
    }

    /// `SpecialPost` -> `special_post`, from the base type under STI
    pub fn snake_name(&self) -> String {
        self.base_name().to_case(Case::Snake)
    }

    pub fn is_a(&self, name: &str) -> bool {
        self.name == name || self.parent.as_ref().is_some_and(|p| p.is_a(name))
    }

    /// Association by name, own first then inherited
    pub fn find_association(&self, name: &str) -> Option<&AssociationDef> {
        self.associations
            .get(name)
            .or_else(|| self.parent.as_ref().and_then(|p| p.find_association(name)))
    }

    /// # Errors
    ///
    /// Returns `LifeError::UnknownAssociation` when no such association exists.
    pub fn association_def(&self, name: &str) -> Result<&AssociationDef, LifeError> {
        self.find_association(name)
            .ok_or_else(|| LifeError::UnknownAssociation {
                entity: self.name.clone(),
                association: name.to_string(),
            })
    }

    /// Declare lazy attributes on this type, returning the newly added names
    pub fn declare_lazy<I, S>(&self, names: I) -> Vec<String>
    where
        I: IntoIterator<Item = S>,
        S: Into<String>,
    {
        let added = self.lazy.declare(names);
        if !added.is_empty() {
            log::trace!("{} declared lazy attributes {:?}", self.name, added);
        }
        added
    }

    /// Whether `attribute` is lazy here or on any ancestor
    pub fn is_lazy(&self, attribute: &str) -> bool {
        self.lazy.contains(attribute) || self.parent.as_ref().is_some_and(|p| p.is_lazy(attribute))
    }

    /// Effective lazy set, ancestors first
    pub fn lazy_attributes(&self) -> IndexSet<String> {
        let mut names = self
            .parent
            .as_ref()
            .map(|p| p.lazy_attributes())
            .unwrap_or_default();
        names.extend(self.lazy.names());
        names
    }

    pub fn has_lazy_attributes(&self) -> bool {
        !self.lazy.is_empty() || self.parent.as_ref().is_some_and(|p| p.has_lazy_attributes())
    }

    pub(crate) fn eager_cache(&self) -> &EagerColumnCache {
        &self.eager_cache
    }
}

impl std::fmt::Debug for EntityDef {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("EntityDef")
            .field("name", &self.name)
            .field("table", &self.table)
            .field("columns", &self.columns)
            .field("primary_key", &self.primary_key)
            .field("default_select", &self.default_select)
            .field("parent", &self.parent.as_ref().map(|p| p.name()))
            .field("associations", &self.associations.keys().collect::<Vec<_>>())
            .field("lazy", &self.lazy.names())
            .finish()
    }
}

/// Registry of entity descriptors by name
#[derive(Debug, Default)]
pub struct Catalog {
    entities: IndexMap<String, Arc<EntityDef>>,
}

impl Catalog {
    pub fn new() -> Self {
        Self::default()
    }

    /// Register a descriptor, replacing any previous one with the same name
    pub fn register(&mut self, entity: EntityDef) -> Arc<EntityDef> {
        let shared = entity.into_shared();
        self.entities
            .insert(shared.name().to_string(), Arc::clone(&shared));
        shared
    }

    /// # Errors
    ///
    /// Returns `LifeError::UnknownEntity` when `name` is not registered.
    pub fn entity(&self, name: &str) -> Result<Arc<EntityDef>, LifeError> {
        self.entities
            .get(name)
            .cloned()
            .ok_or_else(|| LifeError::UnknownEntity(name.to_string()))
    }

    pub fn entities(&self) -> impl Iterator<Item = &Arc<EntityDef>> {
        self.entities.values()
    }

    /// Declare lazy attributes on a registered type
    ///
    /// # Errors
    ///
    /// Returns `LifeError::UnknownEntity` when `entity` is not registered.
    pub fn declare_lazy<I, S>(&self, entity: &str, names: I) -> Result<Vec<String>, LifeError>
    where
        I: IntoIterator<Item = S>,
        S: Into<String>,
    {
        Ok(self.entity(entity)?.declare_lazy(names))
    }

    /// Names of `entity` and every registered descendant, in registration order
    pub fn descendant_names(&self, entity: &EntityDef) -> Vec<String> {
        self.entities
            .values()
            .filter(|candidate| candidate.is_a(entity.name()))
            .map(|candidate| candidate.name().to_string())
            .collect()
    }

    /// `type IN (..)` restriction for STI subtypes; `None` for base types
    pub fn inheritance_filter(&self, entity: &EntityDef) -> Option<Filter> {
        entity.parent()?;
        let column = entity.inheritance_column_name()?;
        let names = self
            .descendant_names(entity)
            .into_iter()
            .map(Value::from)
            .collect();
        Some(Filter::is_in(ColumnName::qualified(entity.table(), column), names))
    }

    /// Build a record from a row, choosing the STI subtype named by the row
    ///
    /// A row whose inheritance column names a registered descendant of `entity`
    /// becomes a record of that descendant; anything else stays `entity`.
    pub fn materialize(&self, entity: &Arc<EntityDef>, row: Row) -> Record {
        let subtype = entity
            .inheritance_column_name()
            .and_then(|column| match row.get(column) {
                Some(Value::String(Some(type_name))) => self.entities.get(type_name.as_str()),
                _ => None,
            })
            .filter(|candidate| candidate.is_a(entity.name()));

        match subtype {
            Some(subtype) => Record::new(Arc::clone(subtype), row),
            None => Record::new(Arc::clone(entity), row),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn catalog() -> Catalog {
        let mut catalog = Catalog::new();
        let post = catalog.register(
            EntityDef::new("Post", "posts")
                .columns(["id", "author_id", "title", "body", "type"])
                .lazy(["body"]),
        );
        catalog.register(EntityDef::subtype_of("SpecialPost", &post).lazy(["title"]));
        catalog.register(EntityDef::new("Comment", "comments").columns(["id", "post_id", "name"]));
        catalog
    }

    #[test]
    fn test_subtype_inherits_table_and_lazy_set() {
        let catalog = catalog();
        let special = catalog.entity("SpecialPost").expect("registered");
        assert_eq!(special.table(), "posts");
        assert_eq!(special.primary_key_column(), "id");
        assert!(special.is_lazy("body"), "Ancestor declarations apply to subtypes");
        assert!(special.is_lazy("title"));
        assert!(!catalog.entity("Post").expect("registered").is_lazy("title"), "Subtype declarations stay on the subtype");
        assert_eq!(
            special.lazy_attributes().into_iter().collect::<Vec<_>>(),
            vec!["body", "title"]
        );
    }

    #[test]
    fn test_snake_name_uses_base_type() {
        let catalog = catalog();
        assert_eq!(catalog.entity("SpecialPost").expect("registered").snake_name(), "post");
        assert_eq!(catalog.entity("Comment").expect("registered").snake_name(), "comment");
    }

    #[test]
    fn test_unknown_entity() {
        let err = catalog().entity("Ghost").unwrap_err();
        assert!(matches!(err, LifeError::UnknownEntity(ref name) if name == "Ghost"));
    }

    #[test]
    fn test_materialize_picks_sti_subtype() {
        let catalog = catalog();
        let post = catalog.entity("Post").expect("registered");

        let mut row = Row::new();
        row.insert("id".to_string(), Value::from(1));
        row.insert("type".to_string(), Value::from("SpecialPost"));
        assert_eq!(catalog.materialize(&post, row).entity_name(), "SpecialPost");

        let mut row = Row::new();
        row.insert("id".to_string(), Value::from(2));
        row.insert("type".to_string(), Value::String(None));
        assert_eq!(catalog.materialize(&post, row).entity_name(), "Post");

        let mut row = Row::new();
        row.insert("id".to_string(), Value::from(3));
        row.insert("type".to_string(), Value::from("Comment"));
        assert_eq!(
            catalog.materialize(&post, row).entity_name(),
            "Post",
            "Only descendants of the queried type are materialized as subtypes"
        );
    }

    #[test]
    fn test_descendant_names() {
        let catalog = catalog();
        let post = catalog.entity("Post").expect("registered");
        let special = catalog.entity("SpecialPost").expect("registered");
        assert_eq!(catalog.descendant_names(&post), vec!["Post", "SpecialPost"]);
        assert_eq!(catalog.descendant_names(&special), vec!["SpecialPost"]);
    }

    #[test]
    fn test_inheritance_column_defaults_to_type() {
        let catalog = catalog();
        assert_eq!(catalog.entity("Post").expect("registered").inheritance_column_name(), Some("type"));
        assert_eq!(catalog.entity("Comment").expect("registered").inheritance_column_name(), None);
    }
}
