//! Direct find.
//!
//! [`BaseFinder`] is the plain "load by criteria" operation. [`LazyFinder`]
//! wraps any [`Finder`] and, when no explicit selection applies at any level,
//! hands it the eager column list of the target type. Everything else in the
//! options (conditions, ordering, limit, offset, includes) passes through
//! untouched.

use crate::executor::{run_query, LifeError, LifeExecutor};
use crate::lazy::resolver::{ColumnResolver, QueryPath, SelectionLayers};
use crate::model::{Record, Row};
use crate::query::{FetchQuery, Filter, FindOptions, ScopeStack};
use crate::schema::{Catalog, EntityDef};
use std::sync::Arc;

/// What every query path needs to run a query and materialize records
#[derive(Clone, Copy)]
pub struct QueryContext<'a> {
    pub catalog: &'a Catalog,
    pub executor: &'a dyn LifeExecutor,
}

impl<'a> QueryContext<'a> {
    pub fn new(catalog: &'a Catalog, executor: &'a dyn LifeExecutor) -> Self {
        Self { catalog, executor }
    }

    pub fn run(&self, path: QueryPath, query: &FetchQuery) -> Result<Vec<Row>, LifeError> {
        run_query(self.executor, path.label(), query)
    }

    /// Run `query` and materialize each row as `entity` (or its STI subtype)
    pub fn fetch_records(
        &self,
        path: QueryPath,
        entity: &Arc<EntityDef>,
        query: &FetchQuery,
    ) -> Result<Vec<Record>, LifeError> {
        Ok(self
            .run(path, query)?
            .into_iter()
            .map(|row| self.catalog.materialize(entity, row))
            .collect())
    }

    /// `type IN (..)` restriction for STI subtypes; `None` for base types
    pub fn inheritance_filter(&self, entity: &EntityDef) -> Option<Filter> {
        self.catalog.inheritance_filter(entity)
    }
}

/// Type-level "load by criteria"
pub trait Finder {
    /// # Errors
    ///
    /// Returns `LifeError` if the query fails.
    fn find(
        &self,
        ctx: &QueryContext<'_>,
        entity: &Arc<EntityDef>,
        options: &FindOptions,
        scope: &ScopeStack,
    ) -> Result<Vec<Record>, LifeError>;
}

/// Find without any lazy loading awareness
///
/// Selection: per-call, else the ambient scope's, else the type default, else `*`.
#[derive(Debug, Default, Clone, Copy)]
pub struct BaseFinder;

impl BaseFinder {
    pub fn build_query(
        ctx: &QueryContext<'_>,
        entity: &EntityDef,
        options: &FindOptions,
        scope: &ScopeStack,
    ) -> FetchQuery {
        let select = options
            .select
            .as_ref()
            .or_else(|| scope.select_for(entity.name()))
            .or_else(|| entity.default_selection())
            .cloned();
        FetchQuery::new(entity.table())
            .maybe_select(select)
            .filters(ctx.inheritance_filter(entity))
            .filters(scope.conditions_for(entity.name()))
            .filters(options.conditions.iter().cloned())
            .order_by(options.order.iter().cloned())
            .maybe_limit(options.limit)
            .maybe_offset(options.offset)
    }
}

impl Finder for BaseFinder {
    fn find(
        &self,
        ctx: &QueryContext<'_>,
        entity: &Arc<EntityDef>,
        options: &FindOptions,
        scope: &ScopeStack,
    ) -> Result<Vec<Record>, LifeError> {
        let query = Self::build_query(ctx, entity, options, scope);
        ctx.fetch_records(QueryPath::Find, entity, &query)
    }
}

/// Injects eager columns into finds that select nothing explicitly
///
/// Precedence: per-call > ambient scope > type default > eager columns > `*`.
#[derive(Debug, Clone)]
pub struct LazyFinder<F> {
    inner: F,
    resolver: ColumnResolver,
}

impl<F: Finder> LazyFinder<F> {
    pub fn new(inner: F, resolver: ColumnResolver) -> Self {
        Self { inner, resolver }
    }
}

impl<F: Finder> Finder for LazyFinder<F> {
    fn find(
        &self,
        ctx: &QueryContext<'_>,
        entity: &Arc<EntityDef>,
        options: &FindOptions,
        scope: &ScopeStack,
    ) -> Result<Vec<Record>, LifeError> {
        let layers = SelectionLayers::new()
            .per_call(options.select.as_ref())
            .ambient(scope.select_for(entity.name()))
            .type_default(entity.default_selection());
        match self.resolver.resolve(QueryPath::Find, entity, layers).into_override() {
            Some(select) => {
                let options = options.clone().select(select);
                self.inner.find(ctx, entity, &options, scope)
            }
            None => self.inner.find(ctx, entity, options, scope),
        }
    }
}
