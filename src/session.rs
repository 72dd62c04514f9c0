//! Entry point tying the catalog, the executor and the query paths together.
//!
//! A [`LifeSession`] owns one implementation of every interception trait.
//! [`LifeSession::new`] wires the lazy decorators around the base operations;
//! [`LifeSession::without_lazy_loading`] wires the bases alone, which is what
//! the ORM did before lazy attributes existed.

use crate::config::LazyConfig;
use crate::executor::{LifeError, LifeExecutor};
use crate::finder::{BaseFinder, Finder, LazyFinder, QueryContext};
use crate::lazy::fetcher::LazyAttributeFetcher;
use crate::lazy::resolver::{ColumnResolver, QueryPath};
use crate::model::{display_value, AttributeLoader, Loaded, Record};
use crate::query::{ColumnName, EagerStrategy, FetchQuery, Filter, FindOptions, ScopeStack};
use crate::relation::collection::{
    AssociationFinder, BaseAssociationFinder, LazyCollectionFinder, LazyJoinTableFinder,
    LazyThroughFinder,
};
use crate::relation::join::{BaseJoinColumns, JoinColumns, JoinDependency, LazyJoinColumns};
use crate::relation::preload::{preload_association, BasePreloader, LazyPreloader, Preloader};
use crate::relation::singular::{BaseTargetFinder, LazyTargetFinder, TargetFinder};
use crate::schema::{Catalog, EntityDef};
use sea_query::Value;
use std::sync::Arc;

pub struct LifeSession<'a> {
    catalog: &'a Catalog,
    executor: &'a dyn LifeExecutor,
    config: LazyConfig,
    resolver: ColumnResolver,
    finder: Box<dyn Finder>,
    target_finder: Box<dyn TargetFinder>,
    association_finder: Box<dyn AssociationFinder>,
    preloader: Box<dyn Preloader>,
    join_columns: Box<dyn JoinColumns>,
}

impl<'a> LifeSession<'a> {
    /// Session with lazy loading wired into every query path
    pub fn new(catalog: &'a Catalog, executor: &'a dyn LifeExecutor, config: LazyConfig) -> Self {
        let resolver = ColumnResolver::new(&config);
        let preloader = BasePreloader::new(config.owner_key_alias.clone());
        Self {
            catalog,
            executor,
            resolver,
            finder: Box::new(LazyFinder::new(BaseFinder, resolver)),
            target_finder: Box::new(LazyTargetFinder::new(BaseTargetFinder, resolver)),
            association_finder: Box::new(LazyThroughFinder::new(
                LazyJoinTableFinder::new(
                    LazyCollectionFinder::new(BaseAssociationFinder, resolver),
                    resolver,
                ),
                resolver,
            )),
            preloader: Box::new(LazyPreloader::new(preloader, resolver)),
            join_columns: Box::new(LazyJoinColumns::new(BaseJoinColumns, resolver)),
            config,
        }
    }

    /// Session configured from `config/lazy.toml` and `LIFEGUARD_LAZY__*`
    ///
    /// # Errors
    ///
    /// Returns `LifeError::Config` if the configuration cannot be read.
    pub fn from_env(catalog: &'a Catalog, executor: &'a dyn LifeExecutor) -> Result<Self, LifeError> {
        Ok(Self::new(catalog, executor, LazyConfig::load()?))
    }

    /// Session running the bare base operations
    pub fn without_lazy_loading(catalog: &'a Catalog, executor: &'a dyn LifeExecutor) -> Self {
        let config = LazyConfig::disabled();
        Self {
            catalog,
            executor,
            resolver: ColumnResolver::disabled(),
            finder: Box::new(BaseFinder),
            target_finder: Box::new(BaseTargetFinder),
            association_finder: Box::new(BaseAssociationFinder),
            preloader: Box::new(BasePreloader::new(config.owner_key_alias.clone())),
            join_columns: Box::new(BaseJoinColumns),
            config,
        }
    }

    pub fn catalog(&self) -> &'a Catalog {
        self.catalog
    }

    pub fn config(&self) -> &LazyConfig {
        &self.config
    }

    pub fn resolver(&self) -> &ColumnResolver {
        &self.resolver
    }

    fn context(&self) -> QueryContext<'a> {
        QueryContext::new(self.catalog, self.executor)
    }

    /// Find records of `entity`
    ///
    /// # Errors
    ///
    /// Returns `LifeError` for unknown entities or associations, or when a
    /// query fails.
    pub fn find(&self, entity: &str, options: &FindOptions) -> Result<Vec<Record>, LifeError> {
        self.find_in_scope(entity, options, &ScopeStack::new())
    }

    /// Find records of `entity` under the ambient scopes of `scope`
    ///
    /// # Errors
    ///
    /// See [`find`](Self::find).
    pub fn find_in_scope(
        &self,
        entity: &str,
        options: &FindOptions,
        scope: &ScopeStack,
    ) -> Result<Vec<Record>, LifeError> {
        let entity = self.catalog.entity(entity)?;
        if options.include.is_empty() {
            return self.finder.find(&self.context(), &entity, options, scope);
        }

        let strategy = match options.eager {
            EagerStrategy::Auto if options.references_other_tables(entity.table()) => EagerStrategy::Join,
            EagerStrategy::Auto => EagerStrategy::Preload,
            explicit => explicit,
        };
        log::debug!(
            "Eager loading {:?} of {} by {strategy:?}",
            options.include,
            entity.name()
        );
        match strategy {
            EagerStrategy::Join => self.find_with_join(&entity, options, scope),
            _ => {
                let ctx = self.context();
                let mut records = self.finder.find(&ctx, &entity, options, scope)?;
                for name in &options.include {
                    preload_association(&ctx, self.preloader.as_ref(), &mut records, name)?;
                }
                Ok(records)
            }
        }
    }

    fn find_with_join(
        &self,
        entity: &Arc<EntityDef>,
        options: &FindOptions,
        scope: &ScopeStack,
    ) -> Result<Vec<Record>, LifeError> {
        let ctx = self.context();
        let dependency = JoinDependency::build(
            self.catalog,
            self.join_columns.as_ref(),
            entity,
            &options.include,
            options.select.as_ref(),
        )?;
        let query = dependency
            .joins()
            .iter()
            .cloned()
            .fold(
                FetchQuery::new(entity.table()).select(dependency.select()),
                FetchQuery::join,
            )
            .filters(ctx.inheritance_filter(entity))
            .filters(scope.conditions_for(entity.name()))
            .filters(options.conditions.iter().cloned())
            .order_by(options.order.iter().cloned());

        let rows = ctx.run(QueryPath::Join, &query)?;
        let records = dependency.instantiate(self.catalog, rows)?;
        let offset = usize::try_from(options.offset.unwrap_or(0)).unwrap_or(usize::MAX);
        let limit = options
            .limit
            .map_or(usize::MAX, |limit| usize::try_from(limit).unwrap_or(usize::MAX));
        Ok(records.into_iter().skip(offset).take(limit).collect())
    }

    /// First record matching `options`, if any
    ///
    /// # Errors
    ///
    /// See [`find`](Self::find).
    pub fn first(&self, entity: &str, options: &FindOptions) -> Result<Option<Record>, LifeError> {
        let options = options.clone().limit(1);
        Ok(self.find(entity, &options)?.into_iter().next())
    }

    /// The record of `entity` whose primary key is `id`
    ///
    /// # Errors
    ///
    /// Returns `LifeError::RecordNotFound` when no such record exists.
    pub fn find_by_id(&self, entity: &str, id: impl Into<Value>) -> Result<Record, LifeError> {
        let def = self.catalog.entity(entity)?;
        let id = id.into();
        let options = FindOptions::first().filter(Filter::eq(
            ColumnName::qualified(def.table(), def.primary_key_column()),
            id.clone(),
        ));
        self.find(entity, &options)?
            .into_iter()
            .next()
            .ok_or_else(|| LifeError::RecordNotFound {
                entity: def.name().to_string(),
                key: display_value(&id),
            })
    }

    /// Read an attribute, fetching it on demand when it is lazy and absent
    ///
    /// # Errors
    ///
    /// See [`Record::read_attribute`].
    pub fn read_attribute(&self, record: &mut Record, attribute: &str) -> Result<Value, LifeError> {
        LazyAttributeFetcher::new(self.executor).fetch_attribute(record, attribute)
    }

    /// Load (once) and return association `name` of `record`
    ///
    /// # Errors
    ///
    /// Returns `LifeError` for unknown associations, missing key columns or
    /// failing queries.
    pub fn load_association<'r>(&self, record: &'r mut Record, name: &str) -> Result<&'r Loaded, LifeError> {
        if !record.is_association_loaded(name) {
            let association = record.entity().association_def(name)?.clone();
            let ctx = self.context();
            let loaded = if association.kind().is_collection() {
                Loaded::Many(self.association_finder.find(
                    &ctx,
                    record,
                    &association,
                    &FindOptions::all(),
                    &ScopeStack::new(),
                )?)
            } else {
                Loaded::One(
                    self.target_finder
                        .load_target(&ctx, record, &association)?
                        .map(Box::new),
                )
            };
            record.set_association(name, loaded);
        }
        record.association(name).ok_or_else(|| {
            LifeError::Other(format!("association {name} vanished after load"))
        })
    }

    /// Find within collection association `name` of `owner`
    ///
    /// # Errors
    ///
    /// Returns `LifeError::Association` for singular associations; otherwise
    /// see [`find`](Self::find).
    pub fn association_find(
        &self,
        owner: &Record,
        name: &str,
        options: &FindOptions,
    ) -> Result<Vec<Record>, LifeError> {
        self.association_find_in_scope(owner, name, options, &ScopeStack::new())
    }

    /// [`association_find`](Self::association_find) under ambient scopes
    ///
    /// # Errors
    ///
    /// See [`association_find`](Self::association_find).
    pub fn association_find_in_scope(
        &self,
        owner: &Record,
        name: &str,
        options: &FindOptions,
        scope: &ScopeStack,
    ) -> Result<Vec<Record>, LifeError> {
        let association = owner.entity().association_def(name)?;
        self.association_finder
            .find(&self.context(), owner, association, options, scope)
    }

    /// Batch load association `name` into every record of `records`
    ///
    /// # Errors
    ///
    /// See [`preload_association`].
    pub fn preload(&self, records: &mut [Record], name: &str) -> Result<(), LifeError> {
        preload_association(&self.context(), self.preloader.as_ref(), records, name)
    }
}

impl AttributeLoader for LifeSession<'_> {
    fn load_attribute(&self, record: &Record, attribute: &str) -> Result<Value, LifeError> {
        LazyAttributeFetcher::new(self.executor).load_attribute(record, attribute)
    }
}

impl std::fmt::Debug for LifeSession<'_> {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("LifeSession")
            .field("config", &self.config)
            .field("resolver", &self.resolver)
            .finish_non_exhaustive()
    }
}
