//! Collection association finds.
//!
//! `post.comments.find(..)`, `post.tags.find(..)` and `post.categories.find(..)`
//! all go through one [`AssociationFinder`]. The base implementation builds the
//! query for each shape; three decorators stack on top of it, each acting only
//! on its own shape:
//!
//! | decorator | shape | fallback when nothing applies |
//! |---|---|---|
//! | [`LazyCollectionFinder`] | has_many | unconstrained |
//! | [`LazyJoinTableFinder`] | has_and_belongs_to_many | `*` |
//! | [`LazyThroughFinder`] | has_many :through | (`DISTINCT`) `target.*` |

use crate::executor::LifeError;
use crate::finder::QueryContext;
use crate::lazy::resolver::{ColumnResolver, QueryPath, SelectionLayers};
use crate::model::Record;
use crate::query::{ColumnName, FetchQuery, Filter, FindOptions, Join, ScopeStack, Select};
use crate::relation::def::{AssociationDef, AssociationKind};
use crate::relation::{expect_kind, key_value};
use crate::schema::{Catalog, EntityDef};
use std::sync::Arc;

/// Find within a collection association of one owner
pub trait AssociationFinder {
    /// # Errors
    ///
    /// Returns `LifeError` if the association shape is unsupported, the owner's
    /// key was not loaded, or the query fails.
    fn find(
        &self,
        ctx: &QueryContext<'_>,
        owner: &Record,
        association: &AssociationDef,
        options: &FindOptions,
        scope: &ScopeStack,
    ) -> Result<Vec<Record>, LifeError>;
}

/// The intermediate hop of a has_many :through association
#[derive(Debug, Clone)]
pub struct ThroughChain {
    /// Owner association leading to the join records
    pub through: AssociationDef,
    pub through_entity: Arc<EntityDef>,
    /// Association on the join records leading to the target
    pub source: AssociationDef,
    /// Column on the through table holding the owner's key
    pub owner_foreign_key: String,
    /// Owner column that foreign key refers to
    pub owner_key: String,
    /// Through table joined to the target table
    pub join: Join,
}

impl ThroughChain {
    /// Resolve the hops of `association`, failing loudly on shapes it cannot follow
    ///
    /// # Errors
    ///
    /// Returns `LifeError::Association` for unsupported through or source shapes.
    pub fn resolve(
        catalog: &Catalog,
        owner: &EntityDef,
        association: &AssociationDef,
        target: &EntityDef,
    ) -> Result<Self, LifeError> {
        expect_kind(owner, association, &[AssociationKind::HasManyThrough], QueryPath::Through.label())?;
        let through_name = association.through().ok_or_else(|| {
            LifeError::Association(format!("{}.{} names no through association", owner.name(), association.name()))
        })?;
        let through = owner.association_def(through_name)?.clone();
        expect_kind(
            owner,
            &through,
            &[AssociationKind::HasMany, AssociationKind::HasOne],
            QueryPath::Through.label(),
        )?;
        let through_entity = catalog.entity(through.target())?;
        let source = through_entity
            .association_def(&association.source_name(target))?
            .clone();

        let through_table = through_entity.table();
        let join = match source.kind() {
            AssociationKind::BelongsTo => Join::inner(
                through_table,
                ColumnName::qualified(through_table, source.foreign_key_column(&through_entity)),
                ColumnName::qualified(
                    target.table(),
                    source.referenced_key_column(&through_entity, target),
                ),
            ),
            AssociationKind::HasMany | AssociationKind::HasOne => Join::inner(
                through_table,
                ColumnName::qualified(
                    through_table,
                    source.referenced_key_column(&through_entity, target),
                ),
                ColumnName::qualified(target.table(), source.foreign_key_column(&through_entity)),
            ),
            other => {
                return Err(LifeError::Association(format!(
                    "{}.{} goes through {}.{}, a {} association, which cannot be a through source",
                    owner.name(),
                    association.name(),
                    through_entity.name(),
                    source.name(),
                    other.label()
                )))
            }
        };

        Ok(Self {
            owner_foreign_key: through.foreign_key_column(owner),
            owner_key: through
                .referenced_key_column(owner, &through_entity)
                .to_string(),
            through,
            through_entity,
            source,
            join,
        })
    }

    /// The two hops of a batch load of `association`
    ///
    /// The association's own selection restricts the source hop. Its conditions
    /// and order go to the hop whose table they name: the through table's to the
    /// first hop, everything else to the source hop.
    pub fn preload_hops(&self, association: &AssociationDef) -> (AssociationDef, AssociationDef) {
        let through_table = self.through_entity.table();
        let on_through = |column: &ColumnName| column.table.as_deref() == Some(through_table);
        let mut through = self.through.clone();
        let mut source = self.source.clone();
        if let Some(select) = association.configured_select() {
            source = source.select(select.clone());
        }
        for filter in association.conditions() {
            if on_through(filter.column()) {
                through = through.condition(filter.clone());
            } else {
                source = source.condition(filter.clone());
            }
        }
        for order in association.ordering() {
            if on_through(&order.column) {
                through = through.order(order.clone());
            } else {
                source = source.order(order.clone());
            }
        }
        (through, source)
    }
}

/// Collection finds without lazy loading awareness
///
/// Selection: per-call, else the ambient scope's, else the association's, else
/// the target default, else the shape's own default (`SELECT *` for has_many,
/// `*` for the join table shape, `target.*` for through).
#[derive(Debug, Default, Clone, Copy)]
pub struct BaseAssociationFinder;

impl BaseAssociationFinder {
    fn explicit_select(
        options: &FindOptions,
        scope: &ScopeStack,
        association: &AssociationDef,
        target: &EntityDef,
    ) -> Option<Select> {
        options
            .select
            .as_ref()
            .or_else(|| scope.select_for(target.name()))
            .or_else(|| association.configured_select())
            .or_else(|| target.default_selection())
            .cloned()
    }

    fn finish(
        ctx: &QueryContext<'_>,
        query: FetchQuery,
        association: &AssociationDef,
        target: &EntityDef,
        options: &FindOptions,
        scope: &ScopeStack,
    ) -> FetchQuery {
        let order = if options.order.is_empty() {
            association.ordering().to_vec()
        } else {
            options.order.clone()
        };
        query
            .filters(ctx.inheritance_filter(target))
            .filters(association.conditions().iter().cloned())
            .filters(scope.conditions_for(target.name()))
            .filters(options.conditions.iter().cloned())
            .order_by(order)
            .maybe_limit(options.limit)
            .maybe_offset(options.offset)
    }

    /// Build the query for `owner`'s `association`
    ///
    /// # Errors
    ///
    /// See [`AssociationFinder::find`].
    pub fn build_query(
        ctx: &QueryContext<'_>,
        owner: &Record,
        association: &AssociationDef,
        target: &EntityDef,
        options: &FindOptions,
        scope: &ScopeStack,
    ) -> Result<FetchQuery, LifeError> {
        let owner_entity = owner.entity();
        let explicit = Self::explicit_select(options, scope, association, target);

        let query = match association.kind() {
            AssociationKind::HasMany => {
                let fk = association.foreign_key_column(owner_entity);
                let key = key_value(owner, association.referenced_key_column(owner_entity, target))?;
                FetchQuery::new(target.table())
                    .maybe_select(explicit)
                    .filter(Filter::eq(ColumnName::qualified(target.table(), fk), key))
            }
            AssociationKind::HasAndBelongsToMany => {
                let join_table = association.join_table_name(owner_entity, target);
                let fk = association.foreign_key_column(owner_entity);
                let afk = association.association_foreign_key_column(target);
                let key = key_value(owner, owner_entity.primary_key_column())?;
                FetchQuery::new(target.table())
                    .select(explicit.unwrap_or_else(Select::wildcard))
                    .join(Join::inner(
                        join_table.as_str(),
                        ColumnName::qualified(join_table.as_str(), afk),
                        ColumnName::qualified(target.table(), target.primary_key_column()),
                    ))
                    .filter(Filter::eq(ColumnName::qualified(join_table, fk), key))
            }
            AssociationKind::HasManyThrough => {
                let chain = ThroughChain::resolve(ctx.catalog, owner_entity, association, target)?;
                let key = key_value(owner, &chain.owner_key)?;
                let select = explicit.unwrap_or_else(|| {
                    Select::table_wildcard(target.table()).distinct(association.is_distinct())
                });
                FetchQuery::new(target.table())
                    .select(select)
                    .join(chain.join)
                    .filter(Filter::eq(
                        ColumnName::qualified(chain.through_entity.table(), chain.owner_foreign_key),
                        key,
                    ))
            }
            AssociationKind::BelongsTo | AssociationKind::HasOne => {
                return Err(LifeError::Association(format!(
                    "{}.{} is {}, which has no collection find",
                    owner_entity.name(),
                    association.name(),
                    association.kind().label()
                )))
            }
        };
        Ok(Self::finish(ctx, query, association, target, options, scope))
    }
}

impl AssociationFinder for BaseAssociationFinder {
    fn find(
        &self,
        ctx: &QueryContext<'_>,
        owner: &Record,
        association: &AssociationDef,
        options: &FindOptions,
        scope: &ScopeStack,
    ) -> Result<Vec<Record>, LifeError> {
        let target = ctx.catalog.entity(association.target())?;
        let query = Self::build_query(ctx, owner, association, &target, options, scope)?;
        let path = match association.kind() {
            AssociationKind::HasAndBelongsToMany => QueryPath::JoinTable,
            AssociationKind::HasManyThrough => QueryPath::Through,
            _ => QueryPath::Collection,
        };
        ctx.fetch_records(path, &target, &query)
    }
}

fn layers<'a>(
    options: &'a FindOptions,
    scope: &'a ScopeStack,
    association: &'a AssociationDef,
    target: &'a EntityDef,
) -> SelectionLayers<'a> {
    SelectionLayers::new()
        .per_call(options.select.as_ref())
        .ambient(scope.select_for(target.name()))
        .association(association.configured_select())
        .type_default(target.default_selection())
}

/// Eager injection for has_many finds
///
/// Precedence: per-call > ambient > association > target default > eager > `*`.
#[derive(Debug, Clone)]
pub struct LazyCollectionFinder<A> {
    inner: A,
    resolver: ColumnResolver,
}

impl<A: AssociationFinder> LazyCollectionFinder<A> {
    pub fn new(inner: A, resolver: ColumnResolver) -> Self {
        Self { inner, resolver }
    }
}

impl<A: AssociationFinder> AssociationFinder for LazyCollectionFinder<A> {
    fn find(
        &self,
        ctx: &QueryContext<'_>,
        owner: &Record,
        association: &AssociationDef,
        options: &FindOptions,
        scope: &ScopeStack,
    ) -> Result<Vec<Record>, LifeError> {
        if association.kind() != AssociationKind::HasMany {
            return self.inner.find(ctx, owner, association, options, scope);
        }
        let target = ctx.catalog.entity(association.target())?;
        let resolved = self.resolver.resolve(
            QueryPath::Collection,
            &target,
            layers(options, scope, association, &target),
        );
        match resolved.into_override() {
            Some(select) => {
                let options = options.clone().select(select);
                self.inner.find(ctx, owner, association, &options, scope)
            }
            None => self.inner.find(ctx, owner, association, options, scope),
        }
    }
}

/// Eager injection for has_and_belongs_to_many finds
///
/// The join query needs a concrete selection, so the last resort is `*`.
#[derive(Debug, Clone)]
pub struct LazyJoinTableFinder<A> {
    inner: A,
    resolver: ColumnResolver,
}

impl<A: AssociationFinder> LazyJoinTableFinder<A> {
    pub fn new(inner: A, resolver: ColumnResolver) -> Self {
        Self { inner, resolver }
    }
}

impl<A: AssociationFinder> AssociationFinder for LazyJoinTableFinder<A> {
    fn find(
        &self,
        ctx: &QueryContext<'_>,
        owner: &Record,
        association: &AssociationDef,
        options: &FindOptions,
        scope: &ScopeStack,
    ) -> Result<Vec<Record>, LifeError> {
        if association.kind() != AssociationKind::HasAndBelongsToMany {
            return self.inner.find(ctx, owner, association, options, scope);
        }
        let target = ctx.catalog.entity(association.target())?;
        let resolved = self.resolver.resolve_or(
            QueryPath::JoinTable,
            &target,
            layers(options, scope, association, &target),
            Select::wildcard(),
        );
        match resolved.into_override() {
            Some(select) => {
                let options = options.clone().select(select);
                self.inner.find(ctx, owner, association, &options, scope)
            }
            None => self.inner.find(ctx, owner, association, options, scope),
        }
    }
}

/// Eager injection for has_many :through finds
///
/// A `distinct` association prefixes the injected (or fallback `target.*`)
/// selection with `DISTINCT`; explicit selections are used as given.
#[derive(Debug, Clone)]
pub struct LazyThroughFinder<A> {
    inner: A,
    resolver: ColumnResolver,
}

impl<A: AssociationFinder> LazyThroughFinder<A> {
    pub fn new(inner: A, resolver: ColumnResolver) -> Self {
        Self { inner, resolver }
    }
}

impl<A: AssociationFinder> AssociationFinder for LazyThroughFinder<A> {
    fn find(
        &self,
        ctx: &QueryContext<'_>,
        owner: &Record,
        association: &AssociationDef,
        options: &FindOptions,
        scope: &ScopeStack,
    ) -> Result<Vec<Record>, LifeError> {
        if association.kind() != AssociationKind::HasManyThrough {
            return self.inner.find(ctx, owner, association, options, scope);
        }
        let target = ctx.catalog.entity(association.target())?;
        let resolved = self.resolver.resolve_or(
            QueryPath::Through,
            &target,
            layers(options, scope, association, &target),
            Select::table_wildcard(target.table()),
        );
        match resolved.into_override() {
            Some(select) => {
                let options = options
                    .clone()
                    .select(select.distinct(association.is_distinct()));
                self.inner.find(ctx, owner, association, &options, scope)
            }
            None => self.inner.find(ctx, owner, association, options, scope),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::model::Row;
    use crate::query::Scope;
    use crate::test_helpers::MemoryStore;
    use pretty_assertions::assert_eq;
    use sea_query::Value;

    fn setup() -> (Catalog, MemoryStore) {
        let mut catalog = Catalog::new();
        catalog.register(
            EntityDef::new("Post", "posts")
                .columns(["id", "title", "body"])
                .lazy(["body"])
                .association(AssociationDef::has_many("comments", "Comment"))
                .association(AssociationDef::has_and_belongs_to_many("tags", "Tag"))
                .association(AssociationDef::has_many("categorizations", "Categorization"))
                .association(
                    AssociationDef::has_many_through("categories", "Category", "categorizations")
                        .distinct(true),
                ),
        );
        catalog.register(
            EntityDef::new("Comment", "comments")
                .columns(["id", "post_id", "name", "body"])
                .lazy(["body"]),
        );
        catalog.register(EntityDef::new("Tag", "tags").columns(["id", "name", "description"]).lazy(["description"]));
        catalog.register(
            EntityDef::new("Categorization", "categorizations")
                .columns(["id", "post_id", "category_id"])
                .association(AssociationDef::belongs_to("category", "Category")),
        );
        catalog.register(
            EntityDef::new("Category", "categories")
                .columns(["id", "name", "description"])
                .lazy(["description"]),
        );

        let store = MemoryStore::new();
        store.insert("comments", [("id", Value::from(1)), ("post_id", Value::from(1)), ("name", "a".into()), ("body", "x".into())]);
        store.insert("comments", [("id", Value::from(2)), ("post_id", Value::from(2)), ("name", "b".into()), ("body", "y".into())]);
        store.insert("tags", [("id", Value::from(1)), ("name", "rust".into()), ("description", "d".into())]);
        store.insert("tags", [("id", Value::from(2)), ("name", "orm".into()), ("description", "d".into())]);
        store.insert("posts_tags", [("post_id", Value::from(1)), ("tag_id", Value::from(2))]);
        store.insert("categories", [("id", Value::from(5)), ("name", "news".into()), ("description", "d".into())]);
        store.insert("categorizations", [("id", Value::from(1)), ("post_id", Value::from(1)), ("category_id", Value::from(5))]);
        store.insert("categorizations", [("id", Value::from(2)), ("post_id", Value::from(1)), ("category_id", Value::from(5))]);
        (catalog, store)
    }

    fn post(catalog: &Catalog) -> Record {
        let mut row = Row::new();
        row.insert("id".to_string(), Value::from(1));
        Record::new(catalog.entity("Post").expect("registered"), row)
    }

    fn lazy_stack() -> impl AssociationFinder {
        let resolver = ColumnResolver::default();
        LazyThroughFinder::new(
            LazyJoinTableFinder::new(LazyCollectionFinder::new(BaseAssociationFinder, resolver), resolver),
            resolver,
        )
    }

    fn find(catalog: &Catalog, store: &MemoryStore, name: &str, options: &FindOptions) -> Vec<Record> {
        let ctx = QueryContext::new(catalog, store);
        let owner = post(catalog);
        let association = owner.entity().association_def(name).expect("defined").clone();
        lazy_stack()
            .find(&ctx, &owner, &association, options, &ScopeStack::new())
            .expect("find runs")
    }

    #[test]
    fn test_has_many_injects_and_scopes_by_owner() {
        let (catalog, store) = setup();
        let comments = find(&catalog, &store, "comments", &FindOptions::all());
        assert_eq!(comments.len(), 1);
        assert_eq!(store.selections(), vec![vec!["comments.id", "comments.post_id", "comments.name"]]);
    }

    #[test]
    fn test_has_many_per_call_select_wins() {
        let (catalog, store) = setup();
        find(&catalog, &store, "comments", &FindOptions::all().select(Select::columns(["name"])));
        assert_eq!(store.selections(), vec![vec!["name"]]);
    }

    #[test]
    fn test_has_many_honors_ambient_scope() {
        let (catalog, store) = setup();
        let ctx = QueryContext::new(&catalog, &store);
        let owner = post(&catalog);
        let association = owner.entity().association_def("comments").expect("defined").clone();
        let mut scope = ScopeStack::new();
        scope.with_scope(Scope::new("Comment").select(Select::columns(["id", "body"])), |scope| {
            lazy_stack()
                .find(&ctx, &owner, &association, &FindOptions::all(), scope)
                .expect("find runs");
        });
        assert_eq!(store.selections(), vec![vec!["id", "body"]]);
    }

    #[test]
    fn test_join_table_injects_target_columns() {
        let (catalog, store) = setup();
        let tags = find(&catalog, &store, "tags", &FindOptions::all());
        assert_eq!(tags.len(), 1);
        assert_eq!(tags[0].get("name"), Some(&Value::from("orm")));
        assert_eq!(store.selections(), vec![vec!["tags.id", "tags.name"]]);
    }

    #[test]
    fn test_join_table_base_falls_back_to_wildcard() {
        let (catalog, store) = setup();
        let ctx = QueryContext::new(&catalog, &store);
        let owner = post(&catalog);
        let association = owner.entity().association_def("tags").expect("defined").clone();
        BaseAssociationFinder
            .find(&ctx, &owner, &association, &FindOptions::all(), &ScopeStack::new())
            .expect("find runs");
        assert_eq!(store.selections(), vec![vec!["*"]]);
    }

    #[test]
    fn test_through_injects_distinct_eager_columns() {
        let (catalog, store) = setup();
        let categories = find(&catalog, &store, "categories", &FindOptions::all());
        assert_eq!(categories.len(), 1, "DISTINCT collapses the duplicate categorization");
        let query = store.last_query().expect("logged");
        let select = query.select.expect("selection sent");
        assert!(select.distinct);
        assert_eq!(select.column_names(), vec!["categories.id", "categories.name"]);
    }

    #[test]
    fn test_through_per_call_select_is_not_made_distinct() {
        let (catalog, store) = setup();
        let categories = find(&catalog, &store, "categories", &FindOptions::all().select(Select::raw("categories.name")));
        assert_eq!(categories.len(), 2);
        assert!(!store.last_query().expect("logged").select.expect("selection sent").distinct);
    }

    #[test]
    fn test_through_with_unsupported_source_fails_loudly() {
        let (catalog, store) = setup();
        let ctx = QueryContext::new(&catalog, &store);
        let owner = post(&catalog);
        let association = AssociationDef::has_many_through("ghosts", "Category", "missing");
        let err = lazy_stack()
            .find(&ctx, &owner, &association, &FindOptions::all(), &ScopeStack::new())
            .unwrap_err();
        assert!(matches!(err, LifeError::UnknownAssociation { .. }), "Got {err:?}");
    }
}
