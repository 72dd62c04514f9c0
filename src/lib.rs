//! # Lifeguard Lazy
//!
//! Column-level lazy loading for Lifeguard entities. Columns declared lazy are
//! left out of every query that does not ask for them explicitly and fetched
//! one by one on first read.
//!
//! See [README on GitHub](https://github.com/microscaler/lifeguard) for the wider ORM.

pub mod config;
pub mod executor;
pub mod finder;
pub mod lazy;
pub mod metrics;
pub mod model;
pub mod query;
pub mod relation;
pub mod schema;
pub mod session;
#[cfg(any(test, feature = "test-utils"))]
pub mod test_helpers;

pub use config::LazyConfig;
pub use executor::{LifeError, LifeExecutor};
pub use finder::{BaseFinder, Finder, LazyFinder, QueryContext};
pub use lazy::{
    ColumnResolver, LazyAttributeFetcher, LazyAttributeSet, QueryPath, ResolvedSelection,
    SelectionLayers, SelectionSource,
};
pub use model::{AttributeLoader, Loaded, Record, Row};
pub use query::{
    ColumnName, EagerStrategy, FetchQuery, Filter, FindOptions, Join, OrderBy, Scope, ScopeStack,
    Select, SelectItem,
};
pub use relation::preload::preload_association;
pub use relation::{
    AssociationDef, AssociationFinder, AssociationKind, BaseAssociationFinder, BaseJoinColumns,
    BasePreloader, BaseTargetFinder, JoinColumns, JoinDependency, JoinSegment,
    LazyCollectionFinder, LazyJoinColumns, LazyJoinTableFinder, LazyPreloader, LazyTargetFinder,
    LazyThroughFinder, Preloader, TargetFinder,
};
pub use schema::{Catalog, EntityDef};
pub use session::LifeSession;
#[cfg(any(test, feature = "test-utils"))]
pub use test_helpers::MemoryStore;
