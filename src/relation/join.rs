//! Single-query eager loading ("join").
//!
//! The base table and every included association are LEFT JOINed into one
//! query. Each participating table is a [`JoinSegment`] with prefix `t<n>`
//! (`t0` for the base) and its columns are projected as `t<n>_r<i>`, primary
//! key first, so rows can be split back into records afterwards.

use crate::executor::LifeError;
use crate::lazy::resolver::{pk_first, ColumnResolver, QueryPath, SelectionLayers, SelectionSource};
use crate::model::{value_key, Loaded, Record, Row};
use crate::query::{ColumnName, Join, Select, SelectItem};
use crate::relation::collection::ThroughChain;
use crate::relation::def::{AssociationDef, AssociationKind};
use crate::schema::{Catalog, EntityDef};
use indexmap::{IndexMap, IndexSet};
use std::sync::Arc;

/// Chooses the aliased columns of one join segment
pub trait JoinColumns {
    /// `(column, alias)` pairs for `entity`, aliases `{prefix}_r{i}`
    ///
    /// `per_call` is the caller's explicit selection; it is only passed for the
    /// base segment.
    fn column_aliases(
        &self,
        entity: &EntityDef,
        prefix: &str,
        per_call: Option<&Select>,
    ) -> Vec<(String, String)>;
}

fn aliased(prefix: &str, columns: Vec<String>) -> Vec<(String, String)> {
    columns
        .into_iter()
        .enumerate()
        .map(|(i, column)| (column, format!("{prefix}_r{i}")))
        .collect()
}

/// Every column of the segment, primary key first
#[derive(Debug, Default, Clone, Copy)]
pub struct BaseJoinColumns;

impl JoinColumns for BaseJoinColumns {
    fn column_aliases(
        &self,
        entity: &EntityDef,
        prefix: &str,
        _per_call: Option<&Select>,
    ) -> Vec<(String, String)> {
        aliased(
            prefix,
            pk_first(entity.primary_key_column(), entity.column_names().to_vec()),
        )
    }
}

/// Per-call plain columns, else the eager columns, primary key first
#[derive(Debug, Clone)]
pub struct LazyJoinColumns<J> {
    inner: J,
    resolver: ColumnResolver,
}

impl<J: JoinColumns> LazyJoinColumns<J> {
    pub fn new(inner: J, resolver: ColumnResolver) -> Self {
        Self { inner, resolver }
    }
}

impl<J: JoinColumns> JoinColumns for LazyJoinColumns<J> {
    fn column_aliases(
        &self,
        entity: &EntityDef,
        prefix: &str,
        per_call: Option<&Select>,
    ) -> Vec<(String, String)> {
        if !self.resolver.is_enabled() {
            return self.inner.column_aliases(entity, prefix, per_call);
        }
        let resolved = self.resolver.resolve(
            QueryPath::Join,
            entity,
            SelectionLayers::new().per_call(per_call),
        );
        let columns = match (resolved.source, per_call) {
            (SelectionSource::PerCall, Some(select)) => plain_columns(entity, select),
            _ => Vec::new(),
        };
        if columns.is_empty() {
            aliased(prefix, self.resolver.join_columns(entity))
        } else {
            aliased(prefix, pk_first(entity.primary_key_column(), columns))
        }
    }
}

/// Unaliased columns of `entity` named by `select`; wildcards and expressions are skipped
fn plain_columns(entity: &EntityDef, select: &Select) -> Vec<String> {
    let mut columns = IndexSet::new();
    for item in select.expanded_items() {
        if let SelectItem::Column { column, alias: None } = item {
            let own_table = column.table.as_deref().map_or(true, |t| t == entity.table());
            if own_table && entity.has_column(&column.column) {
                columns.insert(column.column);
            }
        }
    }
    columns.into_iter().collect()
}

/// One table of a join query
#[derive(Debug, Clone)]
pub struct JoinSegment {
    pub entity: Arc<EntityDef>,
    pub prefix: String,
    /// Included association this segment loads; `None` for the base
    pub association: Option<AssociationDef>,
    /// `(column, alias)` pairs, primary key first
    pub columns: Vec<(String, String)>,
}

impl JoinSegment {
    fn primary_key_alias(&self) -> Option<&str> {
        let pk = self.entity.primary_key_column();
        self.columns
            .iter()
            .find(|(column, _)| column == pk)
            .map(|(_, alias)| alias.as_str())
    }

    /// The segment's part of a result row, keyed by column name
    fn extract(&self, row: &Row) -> Row {
        self.columns
            .iter()
            .filter_map(|(column, alias)| row.get(alias).map(|v| (column.clone(), v.clone())))
            .collect()
    }
}

/// The table tree of one join query: base segment plus one per included association
#[derive(Debug, Clone)]
pub struct JoinDependency {
    segments: Vec<JoinSegment>,
    joins: Vec<Join>,
}

impl JoinDependency {
    /// Plan the join of `base` with the associations named by `includes`
    ///
    /// # Errors
    ///
    /// Returns `LifeError` for unknown associations or when a table would be
    /// joined twice (preload such associations instead).
    pub fn build(
        catalog: &Catalog,
        columns: &dyn JoinColumns,
        base: &Arc<EntityDef>,
        includes: &[String],
        per_call: Option<&Select>,
    ) -> Result<Self, LifeError> {
        let mut segments = vec![JoinSegment {
            entity: Arc::clone(base),
            prefix: "t0".to_string(),
            association: None,
            columns: columns.column_aliases(base, "t0", per_call),
        }];
        let mut joins = Vec::new();
        let mut tables = IndexSet::new();
        tables.insert(base.table().to_string());

        for name in includes {
            let association = base.association_def(name)?.clone();
            let target = catalog.entity(association.target())?;
            let added = Self::association_joins(catalog, base, &association, &target)?;
            for join in &added {
                if !tables.insert(join.table.clone()) {
                    return Err(LifeError::Association(format!(
                        "including {}.{} joins table {} twice; preload it instead",
                        base.name(),
                        association.name(),
                        join.table
                    )));
                }
            }
            joins.extend(added);

            let prefix = format!("t{}", segments.len());
            segments.push(JoinSegment {
                columns: columns.column_aliases(&target, &prefix, None),
                entity: target,
                prefix,
                association: Some(association),
            });
        }
        log::debug!(
            "Join plan for {}: {}",
            base.name(),
            segments
                .iter()
                .map(|s| format!("{}={}", s.prefix, s.entity.table()))
                .collect::<Vec<_>>()
                .join(", ")
        );
        Ok(Self { segments, joins })
    }

    /// LEFT JOINs reaching `target`; the association's conditions and the
    /// target's STI restriction go on the join that brings the target in
    fn association_joins(
        catalog: &Catalog,
        owner: &EntityDef,
        association: &AssociationDef,
        target: &EntityDef,
    ) -> Result<Vec<Join>, LifeError> {
        let mut joins = match association.kind() {
            AssociationKind::BelongsTo => vec![Join::left(
                target.table(),
                ColumnName::qualified(
                    target.table(),
                    association.referenced_key_column(owner, target),
                ),
                ColumnName::qualified(owner.table(), association.foreign_key_column(owner)),
            )],
            AssociationKind::HasOne | AssociationKind::HasMany => vec![Join::left(
                target.table(),
                ColumnName::qualified(target.table(), association.foreign_key_column(owner)),
                ColumnName::qualified(
                    owner.table(),
                    association.referenced_key_column(owner, target),
                ),
            )],
            AssociationKind::HasAndBelongsToMany => {
                let join_table = association.join_table_name(owner, target);
                vec![
                    Join::left(
                        join_table.as_str(),
                        ColumnName::qualified(join_table.as_str(), association.foreign_key_column(owner)),
                        ColumnName::qualified(owner.table(), owner.primary_key_column()),
                    ),
                    Join::left(
                        target.table(),
                        ColumnName::qualified(target.table(), target.primary_key_column()),
                        ColumnName::qualified(
                            join_table.as_str(),
                            association.association_foreign_key_column(target),
                        ),
                    ),
                ]
            }
            AssociationKind::HasManyThrough => {
                let chain = ThroughChain::resolve(catalog, owner, association, target)?;
                let through_table = chain.through_entity.table();
                vec![
                    Join::left(
                        through_table,
                        ColumnName::qualified(through_table, chain.owner_foreign_key.as_str()),
                        ColumnName::qualified(owner.table(), chain.owner_key.as_str()),
                    ),
                    Join::left(target.table(), chain.join.left, chain.join.right),
                ]
            }
        };
        if let Some(last) = joins.pop() {
            let restricted = last.on(
                catalog
                    .inheritance_filter(target)
                    .into_iter()
                    .chain(association.conditions().iter().cloned()),
            );
            joins.push(restricted);
        }
        Ok(joins)
    }

    pub fn segments(&self) -> &[JoinSegment] {
        &self.segments
    }

    /// Aliased, table-qualified selection of every segment
    pub fn select(&self) -> Select {
        self.segments
            .iter()
            .flat_map(|segment| {
                segment.columns.iter().map(move |(column, alias)| {
                    (ColumnName::qualified(segment.entity.table(), column.as_str()), alias)
                })
            })
            .fold(Select::default(), |select, (column, alias)| {
                select.with_aliased(column, alias.as_str())
            })
    }

    pub fn joins(&self) -> &[Join] {
        &self.joins
    }

    /// Split joined rows back into base records with their included associations
    ///
    /// Base and child records are deduplicated by primary key; a NULL child key
    /// means the owner has no such child.
    ///
    /// # Errors
    ///
    /// Returns `LifeError::QueryError` when a row lacks the base primary key.
    pub fn instantiate(&self, catalog: &Catalog, rows: Vec<Row>) -> Result<Vec<Record>, LifeError> {
        let Some((base, children)) = self.segments.split_first() else {
            return Ok(Vec::new());
        };
        let base_pk = base.primary_key_alias().ok_or_else(|| {
            LifeError::QueryError(format!("join of {} lacks its primary key", base.entity.name()))
        })?;

        let mut records: Vec<Record> = Vec::new();
        let mut index: IndexMap<String, usize> = IndexMap::new();
        let mut seen_children: IndexSet<(usize, usize, String)> = IndexSet::new();

        for row in rows {
            let Some(key) = row.get(base_pk).and_then(value_key) else {
                return Err(LifeError::QueryError(format!(
                    "joined row without {} primary key",
                    base.entity.name()
                )));
            };
            let position = match index.get(&key) {
                Some(&position) => position,
                None => {
                    let mut record = catalog.materialize(&base.entity, base.extract(&row));
                    for child in children {
                        if let Some(association) = &child.association {
                            let empty = if association.kind().is_collection() {
                                Loaded::Many(Vec::new())
                            } else {
                                Loaded::One(None)
                            };
                            record.set_association(association.name(), empty);
                        }
                    }
                    records.push(record);
                    index.insert(key, records.len() - 1);
                    records.len() - 1
                }
            };

            for (segment, child) in children.iter().enumerate() {
                let Some(association) = &child.association else {
                    continue;
                };
                let Some(child_key) = child
                    .primary_key_alias()
                    .and_then(|alias| row.get(alias))
                    .and_then(value_key)
                else {
                    continue;
                };
                if !seen_children.insert((position, segment, child_key)) {
                    continue;
                }
                let loaded = catalog.materialize(&child.entity, child.extract(&row));
                if let Some(slot) = records[position].association_mut(association.name()) {
                    match slot {
                        Loaded::Many(many) => many.push(loaded),
                        Loaded::One(one) => *one = Some(Box::new(loaded)),
                    }
                }
            }
        }
        Ok(records)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::query::{FetchQuery, Filter};
    use crate::test_helpers::MemoryStore;
    use crate::executor::LifeExecutor;
    use pretty_assertions::assert_eq;
    use sea_query::Value;

    fn catalog() -> Catalog {
        let mut catalog = Catalog::new();
        catalog.register(
            EntityDef::new("Post", "posts")
                .columns(["id", "author_id", "title", "body"])
                .lazy(["body"])
                .association(AssociationDef::belongs_to("author", "User").foreign_key("author_id"))
                .association(AssociationDef::has_many("comments", "Comment"))
                .association(AssociationDef::has_and_belongs_to_many("tags", "Tag")),
        );
        catalog.register(EntityDef::new("User", "users").columns(["id", "name", "bio"]).lazy(["bio"]));
        catalog.register(EntityDef::new("Comment", "comments").columns(["id", "post_id", "body"]));
        catalog.register(EntityDef::new("Tag", "tags").columns(["id", "name"]));
        catalog
    }

    fn lazy_columns() -> LazyJoinColumns<BaseJoinColumns> {
        LazyJoinColumns::new(BaseJoinColumns, ColumnResolver::default())
    }

    #[test]
    fn test_aliases_use_eager_columns_primary_key_first() {
        let catalog = catalog();
        let post = catalog.entity("Post").expect("registered");
        let aliases = lazy_columns().column_aliases(&post, "t0", None);
        assert_eq!(
            aliases,
            vec![
                ("id".to_string(), "t0_r0".to_string()),
                ("author_id".to_string(), "t0_r1".to_string()),
                ("title".to_string(), "t0_r2".to_string()),
            ]
        );
    }

    #[test]
    fn test_per_call_plain_columns_win_and_keep_primary_key() {
        let catalog = catalog();
        let post = catalog.entity("Post").expect("registered");
        let select = Select::raw("title, body");
        let aliases = lazy_columns().column_aliases(&post, "t0", Some(&select));
        let columns: Vec<&str> = aliases.iter().map(|(c, _)| c.as_str()).collect();
        assert_eq!(columns, vec!["id", "title", "body"]);
    }

    #[test]
    fn test_base_columns_include_lazy_attributes() {
        let catalog = catalog();
        let post = catalog.entity("Post").expect("registered");
        let aliases = BaseJoinColumns.column_aliases(&post, "t1", None);
        assert_eq!(aliases.last(), Some(&("body".to_string(), "t1_r3".to_string())));
    }

    #[test]
    fn test_build_and_instantiate() {
        let catalog = catalog();
        let post = catalog.entity("Post").expect("registered");
        let store = MemoryStore::new();
        store.insert("posts", [("id", Value::from(1)), ("author_id", Value::from(9)), ("title", "A".into()), ("body", "..".into())]);
        store.insert("posts", [("id", Value::from(2)), ("author_id", Value::Int(None)), ("title", "B".into()), ("body", "..".into())]);
        store.insert("users", [("id", Value::from(9)), ("name", "Ann".into()), ("bio", "..".into())]);
        store.insert("comments", [("id", Value::from(1)), ("post_id", Value::from(1)), ("body", "x".into())]);
        store.insert("comments", [("id", Value::from(2)), ("post_id", Value::from(1)), ("body", "y".into())]);

        let includes = vec!["author".to_string(), "comments".to_string()];
        let dependency = JoinDependency::build(&catalog, &lazy_columns(), &post, &includes, None)
            .expect("plan builds");
        let query = dependency
            .joins()
            .iter()
            .cloned()
            .fold(FetchQuery::new("posts").select(dependency.select()), FetchQuery::join);
        assert_eq!(
            query.selected_names(),
            vec![
                "posts.id AS t0_r0",
                "posts.author_id AS t0_r1",
                "posts.title AS t0_r2",
                "users.id AS t1_r0",
                "users.name AS t1_r1",
                "comments.id AS t2_r0",
                "comments.post_id AS t2_r1",
                "comments.body AS t2_r2",
            ]
        );

        let rows = store.query_all(&query).expect("query runs");
        let records = dependency.instantiate(&catalog, rows).expect("rows decode");
        assert_eq!(records.len(), 2);
        assert!(!records[0].has_attribute("body"));
        let author = records[0].association("author").and_then(Loaded::as_one).expect("author");
        assert_eq!(author.get("name"), Some(&Value::from("Ann")));
        assert_eq!(records[0].association("comments").map(Loaded::len), Some(2));
        assert_eq!(records[1].association("author"), Some(&Loaded::One(None)));
        assert_eq!(records[1].association("comments"), Some(&Loaded::Many(Vec::new())));
    }

    #[test]
    fn test_target_restrictions_go_on_the_target_join() {
        let mut catalog = Catalog::new();
        let post = catalog.register(
            EntityDef::new("Post", "posts")
                .columns(["id", "type", "author_id", "title"])
                .association(AssociationDef::has_many("comments", "Comment")),
        );
        catalog.register(EntityDef::subtype_of("SpecialPost", &post));
        catalog.register(
            EntityDef::new("Author", "authors")
                .columns(["id", "name"])
                .association(AssociationDef::has_many("special_posts", "SpecialPost"))
                .association(
                    AssociationDef::has_many("first_posts", "Post")
                        .condition(Filter::eq(ColumnName::qualified("posts", "title"), "First")),
                ),
        );
        let author = catalog.entity("Author").expect("registered");

        let plan = |name: &str| {
            JoinDependency::build(&catalog, &BaseJoinColumns, &author, &[name.to_string()], None)
                .expect("plan builds")
        };
        assert_eq!(
            plan("special_posts").joins()[0].on,
            vec![Filter::is_in(
                ColumnName::qualified("posts", "type"),
                vec![Value::from("SpecialPost")]
            )]
        );
        assert_eq!(
            plan("first_posts").joins()[0].on,
            vec![Filter::eq(ColumnName::qualified("posts", "title"), "First")]
        );
    }

    #[test]
    fn test_same_table_twice_is_rejected() {
        let mut catalog = catalog();
        catalog.register(
            EntityDef::new("Reply", "replies")
                .columns(["id", "post_id"])
                .association(AssociationDef::belongs_to("post", "Post"))
                .association(AssociationDef::belongs_to("original", "Post").foreign_key("post_id")),
        );
        let reply = catalog.entity("Reply").expect("registered");
        let includes = vec!["post".to_string(), "original".to_string()];
        let err = JoinDependency::build(&catalog, &BaseJoinColumns, &reply, &includes, None).unwrap_err();
        assert!(matches!(err, LifeError::Association(ref m) if m.contains("twice")), "Got {err:?}");
    }
}
