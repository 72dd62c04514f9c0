//! Column resolver and selection precedence.
//!
//! Every query path builds a [`SelectionLayers`] from whatever explicit
//! selections it can see and asks [`ColumnResolver::resolve`] for the
//! selection to send. The first explicit layer wins, in this order:
//!
//! 1. per-call selection
//! 2. ambient scope selection
//! 3. association-configured selection
//! 4. the target type's standing default selection
//!
//! With no explicit layer, a type with lazy attributes gets its eager columns
//! injected; a type without any stays unconstrained (`SELECT *`). Paths whose
//! underlying construction needs a concrete selection pass a fallback instead
//! of accepting "unconstrained".

use crate::config::LazyConfig;
use crate::query::Select;
use crate::schema::EntityDef;
use std::fmt;
use std::sync::Arc;

#[cfg(feature = "metrics")]
use crate::metrics::METRICS;

/// Query path a selection is resolved for
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum QueryPath {
    Find,
    Singular,
    Collection,
    JoinTable,
    Through,
    Preload,
    Join,
}

impl QueryPath {
    pub fn label(self) -> &'static str {
        match self {
            QueryPath::Find => "find",
            QueryPath::Singular => "singular",
            QueryPath::Collection => "collection",
            QueryPath::JoinTable => "join_table",
            QueryPath::Through => "through",
            QueryPath::Preload => "preload",
            QueryPath::Join => "join",
        }
    }
}

impl fmt::Display for QueryPath {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.label())
    }
}

/// Where a resolved selection came from
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum SelectionSource {
    PerCall,
    Ambient,
    Association,
    TypeDefault,
    /// Eager columns injected because the type has lazy attributes
    Eager,
    /// A path-specific "all columns" fallback
    Fallback,
    /// Nothing applied; storage sees `SELECT *`
    Unconstrained,
}

/// Explicit selections visible to one query construction
#[derive(Debug, Clone, Copy, Default)]
pub struct SelectionLayers<'a> {
    pub per_call: Option<&'a Select>,
    pub ambient: Option<&'a Select>,
    pub association: Option<&'a Select>,
    pub type_default: Option<&'a Select>,
}

impl<'a> SelectionLayers<'a> {
    pub fn new() -> Self {
        Self::default()
    }

    #[must_use]
    pub fn per_call(mut self, select: Option<&'a Select>) -> Self {
        self.per_call = select;
        self
    }

    #[must_use]
    pub fn ambient(mut self, select: Option<&'a Select>) -> Self {
        self.ambient = select;
        self
    }

    #[must_use]
    pub fn association(mut self, select: Option<&'a Select>) -> Self {
        self.association = select;
        self
    }

    #[must_use]
    pub fn type_default(mut self, select: Option<&'a Select>) -> Self {
        self.type_default = select;
        self
    }

    /// Highest-precedence explicit layer, if any
    pub fn first_explicit(&self) -> Option<(SelectionSource, &'a Select)> {
        [
            (SelectionSource::PerCall, self.per_call),
            (SelectionSource::Ambient, self.ambient),
            (SelectionSource::Association, self.association),
            (SelectionSource::TypeDefault, self.type_default),
        ]
        .into_iter()
        .find_map(|(source, select)| select.map(|s| (source, s)))
    }
}

/// Outcome of precedence resolution for one query
#[derive(Debug, Clone, PartialEq)]
pub struct ResolvedSelection {
    pub source: SelectionSource,
    /// `None` only for [`SelectionSource::Unconstrained`]
    pub select: Option<Select>,
}

impl ResolvedSelection {
    pub fn unconstrained() -> Self {
        Self {
            source: SelectionSource::Unconstrained,
            select: None,
        }
    }

    pub fn is_injected(&self) -> bool {
        self.source == SelectionSource::Eager
    }

    /// The selection a decorator must impose on the wrapped operation
    ///
    /// `None` when an explicit layer already decided (the wrapped operation
    /// honors those itself) or when nothing applies.
    pub fn into_override(self) -> Option<Select> {
        match self.source {
            SelectionSource::Eager | SelectionSource::Fallback => self.select,
            _ => None,
        }
    }
}

/// Eager column derivation plus the precedence rule shared by every path
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct ColumnResolver {
    enabled: bool,
}

impl Default for ColumnResolver {
    fn default() -> Self {
        Self { enabled: true }
    }
}

impl ColumnResolver {
    pub fn new(config: &LazyConfig) -> Self {
        Self {
            enabled: config.enabled,
        }
    }

    /// Resolver that never injects anything
    pub fn disabled() -> Self {
        Self { enabled: false }
    }

    pub fn is_enabled(&self) -> bool {
        self.enabled
    }

    /// Schema columns minus lazy attributes, in schema order
    ///
    /// `None` when the type has no lazy attributes (or resolution is disabled):
    /// such a type's queries must not be altered at all.
    pub fn eager_columns(&self, entity: &EntityDef) -> Option<Arc<[String]>> {
        if !self.enabled || !entity.has_lazy_attributes() {
            return None;
        }
        entity.eager_cache().get_or_compute(|| {
            let lazy = entity.lazy_attributes();
            let eager: Vec<String> = entity
                .column_names()
                .iter()
                .filter(|column| !lazy.contains(column.as_str()))
                .cloned()
                .collect();
            Some(Arc::from(eager))
        })
    }

    /// Eager columns as `table.column`
    pub fn qualified_eager_columns(&self, entity: &EntityDef) -> Option<Vec<String>> {
        self.eager_columns(entity).map(|columns| {
            columns
                .iter()
                .map(|column| format!("{}.{column}", entity.table()))
                .collect()
        })
    }

    /// Eager columns as a table-qualified selection
    pub fn eager_select(&self, entity: &EntityDef) -> Option<Select> {
        self.eager_columns(entity)
            .map(|columns| Select::qualified(entity.table(), columns.iter().cloned()))
    }

    /// Columns aliased for `entity`'s segment of a join: primary key first
    ///
    /// Uses eager columns when the type has lazy attributes, all columns otherwise.
    pub fn join_columns(&self, entity: &EntityDef) -> Vec<String> {
        let columns: Vec<String> = match self.eager_columns(entity) {
            Some(eager) => eager.to_vec(),
            None => entity.column_names().to_vec(),
        };
        pk_first(entity.primary_key_column(), columns)
    }

    /// Apply the precedence rule; no explicit layer and no lazy attributes means unconstrained
    pub fn resolve(
        &self,
        path: QueryPath,
        entity: &EntityDef,
        layers: SelectionLayers<'_>,
    ) -> ResolvedSelection {
        let resolved = match layers.first_explicit() {
            Some((source, select)) => ResolvedSelection {
                source,
                select: Some(select.clone()),
            },
            None => match self.eager_select(entity) {
                Some(select) => ResolvedSelection {
                    source: SelectionSource::Eager,
                    select: Some(select),
                },
                None => ResolvedSelection::unconstrained(),
            },
        };
        self.trace(path, entity, &resolved);
        resolved
    }

    /// Like [`resolve`](Self::resolve), but `fallback` replaces "unconstrained"
    pub fn resolve_or(
        &self,
        path: QueryPath,
        entity: &EntityDef,
        layers: SelectionLayers<'_>,
        fallback: Select,
    ) -> ResolvedSelection {
        let resolved = match layers.first_explicit() {
            Some((source, select)) => ResolvedSelection {
                source,
                select: Some(select.clone()),
            },
            None => match self.eager_select(entity) {
                Some(select) => ResolvedSelection {
                    source: SelectionSource::Eager,
                    select: Some(select),
                },
                None => ResolvedSelection {
                    source: SelectionSource::Fallback,
                    select: Some(fallback),
                },
            },
        };
        self.trace(path, entity, &resolved);
        resolved
    }

    fn trace(&self, path: QueryPath, entity: &EntityDef, resolved: &ResolvedSelection) {
        log::debug!(
            "{path} on {}: selection from {:?}: {}",
            entity.name(),
            resolved.source,
            resolved
                .select
                .as_ref()
                .map_or_else(|| "*".to_string(), ToString::to_string)
        );
        #[cfg(feature = "metrics")]
        if resolved.is_injected() {
            METRICS.record_injection(path.label());
        }
    }
}

pub(crate) fn pk_first(primary_key: &str, columns: Vec<String>) -> Vec<String> {
    let mut ordered = Vec::with_capacity(columns.len() + 1);
    ordered.push(primary_key.to_string());
    ordered.extend(columns.into_iter().filter(|c| c != primary_key));
    ordered
}
