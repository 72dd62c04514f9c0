//! Batch eager loading ("preload").
//!
//! Loading `posts.includes(:comments)` this way runs one extra query per
//! association: all targets of all owners, keyed by the owners' keys, then
//! distributed back. has_and_belongs_to_many rows carry the owner key under a
//! bookkeeping alias that is stripped before the records are handed out.
//! has_many :through runs as two hops, each an ordinary preload.

use crate::executor::LifeError;
use crate::finder::QueryContext;
use crate::lazy::resolver::{ColumnResolver, QueryPath, SelectionLayers};
use crate::model::{value_key, Loaded, Record};
use crate::query::{ColumnName, FetchQuery, Filter, Join, Select};
use crate::relation::collection::ThroughChain;
use crate::relation::def::{AssociationDef, AssociationKind};
use crate::relation::key_value;
use crate::schema::EntityDef;
use indexmap::{IndexMap, IndexSet};
use sea_query::Value;
use std::sync::Arc;

/// Batch query for the targets of many owners at once
pub trait Preloader {
    /// Targets of `association` for the owners whose keys are `keys`
    ///
    /// # Errors
    ///
    /// Returns `LifeError` for has_many :through (preloaded hop by hop) or
    /// when the query fails.
    fn find_associated(
        &self,
        ctx: &QueryContext<'_>,
        owner: &EntityDef,
        association: &AssociationDef,
        keys: &[Value],
    ) -> Result<Vec<Record>, LifeError>;

    /// Output name carrying the owner key on join table rows
    fn owner_key_alias(&self) -> &str;
}

#[derive(Debug, Clone)]
pub struct BasePreloader {
    owner_key_alias: String,
}

impl BasePreloader {
    pub fn new(owner_key_alias: impl Into<String>) -> Self {
        Self {
            owner_key_alias: owner_key_alias.into(),
        }
    }
}

impl Default for BasePreloader {
    fn default() -> Self {
        Self::new(crate::config::DEFAULT_OWNER_KEY_ALIAS)
    }
}

impl Preloader for BasePreloader {
    fn find_associated(
        &self,
        ctx: &QueryContext<'_>,
        owner: &EntityDef,
        association: &AssociationDef,
        keys: &[Value],
    ) -> Result<Vec<Record>, LifeError> {
        let target = ctx.catalog.entity(association.target())?;
        let select = association
            .configured_select()
            .or_else(|| target.default_selection())
            .cloned();
        let keys = keys.to_vec();

        let query = match association.kind() {
            AssociationKind::BelongsTo => {
                let referenced = association.referenced_key_column(owner, &target);
                FetchQuery::new(target.table())
                    .maybe_select(select)
                    .filter(Filter::is_in(ColumnName::qualified(target.table(), referenced), keys))
            }
            AssociationKind::HasOne | AssociationKind::HasMany => FetchQuery::new(target.table())
                .maybe_select(select)
                .filter(Filter::is_in(
                    ColumnName::qualified(target.table(), association.foreign_key_column(owner)),
                    keys,
                )),
            AssociationKind::HasAndBelongsToMany => {
                let join_table = association.join_table_name(owner, &target);
                let fk = association.foreign_key_column(owner);
                let select = select
                    .unwrap_or_else(|| Select::table_wildcard(target.table()))
                    .with_aliased(
                        ColumnName::qualified(join_table.as_str(), fk.as_str()),
                        self.owner_key_alias.as_str(),
                    );
                FetchQuery::new(target.table())
                    .select(select)
                    .join(Join::inner(
                        join_table.as_str(),
                        ColumnName::qualified(
                            join_table.as_str(),
                            association.association_foreign_key_column(&target),
                        ),
                        ColumnName::qualified(target.table(), target.primary_key_column()),
                    ))
                    .filter(Filter::is_in(ColumnName::qualified(join_table, fk), keys))
            }
            AssociationKind::HasManyThrough => {
                return Err(LifeError::Association(format!(
                    "{}.{} is preloaded through its intermediate associations",
                    owner.name(),
                    association.name()
                )))
            }
        };
        let query = query
            .filters(ctx.inheritance_filter(&target))
            .filters(association.conditions().iter().cloned())
            .order_by(association.ordering().iter().cloned());

        ctx.fetch_records(QueryPath::Preload, &target, &query)
    }

    fn owner_key_alias(&self) -> &str {
        &self.owner_key_alias
    }
}

/// Injects the target's eager columns into preload queries
///
/// Precedence: association select > target default > eager columns > `*`.
#[derive(Debug, Clone)]
pub struct LazyPreloader<P> {
    inner: P,
    resolver: ColumnResolver,
}

impl<P: Preloader> LazyPreloader<P> {
    pub fn new(inner: P, resolver: ColumnResolver) -> Self {
        Self { inner, resolver }
    }
}

impl<P: Preloader> Preloader for LazyPreloader<P> {
    fn find_associated(
        &self,
        ctx: &QueryContext<'_>,
        owner: &EntityDef,
        association: &AssociationDef,
        keys: &[Value],
    ) -> Result<Vec<Record>, LifeError> {
        let target = ctx.catalog.entity(association.target())?;
        let layers = SelectionLayers::new()
            .association(association.configured_select())
            .type_default(target.default_selection());
        match self
            .resolver
            .resolve(QueryPath::Preload, &target, layers)
            .into_override()
        {
            Some(select) => {
                let association = association.clone().select(select);
                self.inner.find_associated(ctx, owner, &association, keys)
            }
            None => self.inner.find_associated(ctx, owner, association, keys),
        }
    }

    fn owner_key_alias(&self) -> &str {
        self.inner.owner_key_alias()
    }
}

/// Preload association `name` into every record of `records`
///
/// Records are assumed to share a type (or STI family). Owners without targets
/// get an empty collection or `None`.
///
/// # Errors
///
/// Returns `LifeError` when the association is unknown, an owner is missing a
/// key column, or a query fails.
pub fn preload_association(
    ctx: &QueryContext<'_>,
    preloader: &dyn Preloader,
    records: &mut [Record],
    name: &str,
) -> Result<(), LifeError> {
    let Some(first) = records.first() else {
        return Ok(());
    };
    let association = first.entity().association_def(name)?.clone();
    preload_with(ctx, preloader, records, &association)
}

fn preload_with(
    ctx: &QueryContext<'_>,
    preloader: &dyn Preloader,
    records: &mut [Record],
    association: &AssociationDef,
) -> Result<(), LifeError> {
    let Some(first) = records.first() else {
        return Ok(());
    };
    let owner = Arc::clone(first.entity());
    let target = ctx.catalog.entity(association.target())?;
    log::debug!(
        "Preloading {}.{} for {} records",
        owner.name(),
        association.name(),
        records.len()
    );

    match association.kind() {
        AssociationKind::BelongsTo => {
            let fk = association.foreign_key_column(&owner);
            let referenced = association.referenced_key_column(&owner, &target);
            let keys = owner_keys(records, &fk)?;
            let found = fetch(ctx, preloader, &owner, association, &keys)?;
            let by_key = group(found, |record| record.get(referenced).and_then(value_key));
            for record in records.iter_mut() {
                let owner_fk = key_value(record, &fk)?;
                let loaded = value_key(&owner_fk)
                    .and_then(|key| by_key.get(&key))
                    .and_then(|group| group.first())
                    .map(|record| Box::new(record.clone()));
                record.set_association(association.name(), Loaded::One(loaded));
            }
        }
        AssociationKind::HasOne | AssociationKind::HasMany | AssociationKind::HasAndBelongsToMany => {
            let referenced = match association.kind() {
                AssociationKind::HasAndBelongsToMany => owner.primary_key_column(),
                _ => association.referenced_key_column(&owner, &target),
            }
            .to_string();
            let keys = owner_keys(records, &referenced)?;
            let found = fetch(ctx, preloader, &owner, association, &keys)?;
            let by_key = if association.kind() == AssociationKind::HasAndBelongsToMany {
                let alias = preloader.owner_key_alias();
                let tagged = found
                    .into_iter()
                    .map(|mut record| {
                        let owner_key = record.take_attribute(alias);
                        (owner_key, record)
                    })
                    .collect::<Vec<_>>();
                let mut by_key: IndexMap<String, Vec<Record>> = IndexMap::new();
                for (owner_key, record) in tagged {
                    if let Some(key) = owner_key.as_ref().and_then(value_key) {
                        by_key.entry(key).or_default().push(record);
                    }
                }
                by_key
            } else {
                let fk = association.foreign_key_column(&owner);
                group(found, |record| record.get(&fk).and_then(value_key))
            };
            for record in records.iter_mut() {
                let group = value_key(&key_value(record, &referenced)?)
                    .and_then(|key| by_key.get(&key))
                    .cloned()
                    .unwrap_or_default();
                let loaded = if association.kind() == AssociationKind::HasOne {
                    Loaded::One(group.into_iter().next().map(Box::new))
                } else {
                    Loaded::Many(group)
                };
                record.set_association(association.name(), loaded);
            }
        }
        AssociationKind::HasManyThrough => {
            let chain = ThroughChain::resolve(ctx.catalog, &owner, association, &target)?;
            let (through_hop, source_hop) = chain.preload_hops(association);
            let keys = owner_keys(records, &chain.owner_key)?;
            let mut through = fetch(ctx, preloader, &owner, &through_hop, &keys)?;
            preload_with(ctx, preloader, &mut through, &source_hop)?;

            let mut by_key: IndexMap<String, Vec<Record>> = IndexMap::new();
            for join_record in &through {
                let Some(key) = join_record.get(&chain.owner_foreign_key).and_then(value_key) else {
                    continue;
                };
                let reached = match join_record.association(source_hop.name()) {
                    Some(Loaded::One(Some(record))) => vec![record.as_ref().clone()],
                    Some(Loaded::Many(records)) => records.clone(),
                    _ => Vec::new(),
                };
                by_key.entry(key).or_default().extend(reached);
            }
            for record in records.iter_mut() {
                let mut group = value_key(&key_value(record, &chain.owner_key)?)
                    .and_then(|key| by_key.get(&key))
                    .cloned()
                    .unwrap_or_default();
                if association.is_distinct() {
                    let pk = target.primary_key_column();
                    let mut seen = IndexSet::new();
                    group.retain(|record| seen.insert(record.get(pk).and_then(value_key)));
                }
                record.set_association(association.name(), Loaded::Many(group));
            }
        }
    }
    Ok(())
}

/// Distinct non-null values of `column` across `records`
fn owner_keys(records: &[Record], column: &str) -> Result<Vec<Value>, LifeError> {
    let mut seen = IndexSet::new();
    let mut keys = Vec::new();
    for record in records {
        let value = key_value(record, column)?;
        if let Some(key) = value_key(&value) {
            if seen.insert(key) {
                keys.push(value);
            }
        }
    }
    Ok(keys)
}

fn fetch(
    ctx: &QueryContext<'_>,
    preloader: &dyn Preloader,
    owner: &EntityDef,
    association: &AssociationDef,
    keys: &[Value],
) -> Result<Vec<Record>, LifeError> {
    if keys.is_empty() {
        return Ok(Vec::new());
    }
    preloader.find_associated(ctx, owner, association, keys)
}

fn group(
    records: Vec<Record>,
    key: impl Fn(&Record) -> Option<String>,
) -> IndexMap<String, Vec<Record>> {
    let mut grouped: IndexMap<String, Vec<Record>> = IndexMap::new();
    for record in records {
        if let Some(k) = key(&record) {
            grouped.entry(k).or_default().push(record);
        }
    }
    grouped
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::model::Row;
    use crate::schema::Catalog;
    use crate::test_helpers::MemoryStore;
    use pretty_assertions::assert_eq;

    fn setup() -> (Catalog, MemoryStore) {
        let mut catalog = Catalog::new();
        catalog.register(
            EntityDef::new("Post", "posts")
                .columns(["id", "author_id", "title", "body"])
                .lazy(["body"])
                .association(AssociationDef::belongs_to("author", "User").foreign_key("author_id"))
                .association(AssociationDef::has_many("comments", "Comment"))
                .association(AssociationDef::has_and_belongs_to_many("tags", "Tag"))
                .association(AssociationDef::has_many("categorizations", "Categorization"))
                .association(
                    AssociationDef::has_many_through("categories", "Category", "categorizations")
                        .distinct(true),
                ),
        );
        catalog.register(EntityDef::new("User", "users").columns(["id", "name", "bio"]).lazy(["bio"]));
        catalog.register(
            EntityDef::new("Comment", "comments")
                .columns(["id", "post_id", "body"])
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
        store.insert("users", [("id", Value::from(1)), ("name", "Ann".into()), ("bio", "..".into())]);
        store.insert("comments", [("id", Value::from(1)), ("post_id", Value::from(1)), ("body", "a".into())]);
        store.insert("comments", [("id", Value::from(2)), ("post_id", Value::from(1)), ("body", "b".into())]);
        store.insert("tags", [("id", Value::from(1)), ("name", "rust".into()), ("description", "d".into())]);
        store.insert("posts_tags", [("post_id", Value::from(1)), ("tag_id", Value::from(1))]);
        store.insert("posts_tags", [("post_id", Value::from(2)), ("tag_id", Value::from(1))]);
        store.insert("categories", [("id", Value::from(5)), ("name", "news".into()), ("description", "d".into())]);
        store.insert("categorizations", [("id", Value::from(1)), ("post_id", Value::from(1)), ("category_id", Value::from(5))]);
        store.insert("categorizations", [("id", Value::from(2)), ("post_id", Value::from(1)), ("category_id", Value::from(5))]);
        (catalog, store)
    }

    fn posts(catalog: &Catalog) -> Vec<Record> {
        let entity = catalog.entity("Post").expect("registered");
        [(1, Value::from(1)), (2, Value::Int(None))]
            .into_iter()
            .map(|(id, author)| {
                let mut row = Row::new();
                row.insert("id".to_string(), Value::from(id));
                row.insert("author_id".to_string(), author);
                Record::new(Arc::clone(&entity), row)
            })
            .collect()
    }

    fn preloader() -> LazyPreloader<BasePreloader> {
        LazyPreloader::new(BasePreloader::default(), ColumnResolver::default())
    }

    #[test]
    fn test_preload_belongs_to_skips_null_keys() {
        let (catalog, store) = setup();
        let ctx = QueryContext::new(&catalog, &store);
        let mut records = posts(&catalog);

        preload_association(&ctx, &preloader(), &mut records, "author").expect("preload runs");

        assert_eq!(store.selections(), vec![vec!["users.id", "users.name"]]);
        let query = store.last_query().expect("logged");
        assert_eq!(
            query.filters,
            vec![Filter::is_in(ColumnName::qualified("users", "id"), vec![Value::from(1)])]
        );
        let author = records[0].association("author").and_then(Loaded::as_one).expect("loaded");
        assert_eq!(author.get("name"), Some(&Value::from("Ann")));
        assert_eq!(records[1].association("author"), Some(&Loaded::One(None)));
    }

    #[test]
    fn test_preload_has_many_distributes_and_defaults_to_empty() {
        let (catalog, store) = setup();
        let ctx = QueryContext::new(&catalog, &store);
        let mut records = posts(&catalog);

        preload_association(&ctx, &preloader(), &mut records, "comments").expect("preload runs");

        assert_eq!(store.selections(), vec![vec!["comments.id", "comments.post_id"]]);
        assert_eq!(records[0].association("comments").map(Loaded::len), Some(2));
        assert_eq!(records[1].association("comments"), Some(&Loaded::Many(Vec::new())));
    }

    #[test]
    fn test_preload_join_table_strips_owner_key_alias() {
        let (catalog, store) = setup();
        let ctx = QueryContext::new(&catalog, &store);
        let mut records = posts(&catalog);

        preload_association(&ctx, &preloader(), &mut records, "tags").expect("preload runs");

        assert_eq!(
            store.selections(),
            vec![vec!["tags.id", "tags.name", "posts_tags.post_id AS parent_record_id"]]
        );
        for record in &records {
            let tags = record.association("tags").expect("loaded").as_many();
            assert_eq!(tags.len(), 1);
            assert_eq!(tags[0].attribute_names(), vec!["id", "name"]);
        }
    }

    #[test]
    fn test_preload_through_runs_two_hops() {
        let (catalog, store) = setup();
        let ctx = QueryContext::new(&catalog, &store);
        let mut records = posts(&catalog);

        preload_association(&ctx, &preloader(), &mut records, "categories").expect("preload runs");

        let tables: Vec<String> = store.queries().into_iter().map(|q| q.table).collect();
        assert_eq!(tables, vec!["categorizations", "categories"]);
        assert_eq!(store.selections()[1], vec!["categories.id", "categories.name"]);
        let categories = records[0].association("categories").expect("loaded").as_many();
        assert_eq!(categories.len(), 1, "distinct association collapses duplicates");
        assert!(records[1].association("categories").expect("loaded").is_empty());
    }

    #[test]
    fn test_empty_owner_list_issues_no_query() {
        let (catalog, store) = setup();
        let ctx = QueryContext::new(&catalog, &store);
        preload_association(&ctx, &preloader(), &mut [], "comments").expect("preload runs");
        assert_eq!(store.query_count(), 0);
    }
}
