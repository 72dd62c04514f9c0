//! `LifeExecutor` Module
//!
//! Provides the `LifeExecutor` trait that abstracts query execution for the lazy
//! loading layer, and the `LifeError` type every operation in this crate returns.
//!
//! The executor receives a structured [`FetchQuery`] rather than a SQL string so
//! that storage backends (and the in-memory store used by the tests) see the exact
//! selection that was resolved. SQL-backed executors render it with
//! [`FetchQuery::to_sql`].

use crate::model::Row;
use crate::query::FetchQuery;
use std::fmt;
use std::time::Instant;

#[cfg(feature = "metrics")]
use crate::metrics::METRICS;
#[cfg(feature = "tracing")]
use crate::metrics::tracing_helpers;

/// `LifeExecutor` error type
#[derive(Debug)]
pub enum LifeError {
    /// Query execution error (storage rejected the query, e.g. unknown column)
    QueryError(String),
    /// Row parsing/conversion error
    ParseError(String),
    /// A keyed lookup returned no row
    RecordNotFound {
        entity: String,
        key: String,
    },
    /// Attribute was neither loaded nor declared lazy
    MissingAttribute {
        entity: String,
        attribute: String,
    },
    /// No entity with this name is registered in the catalog
    UnknownEntity(String),
    /// Entity has no association with this name
    UnknownAssociation {
        entity: String,
        association: String,
    },
    /// Association metadata or query shape did not match what the path expects
    Association(String),
    /// Configuration could not be loaded
    Config(config::ConfigError),
    /// Other execution errors
    Other(String),
}

impl fmt::Display for LifeError {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            LifeError::QueryError(s) => {
                write!(f, "Query error: {s}")
            }
            LifeError::ParseError(s) => {
                write!(f, "Parse error: {s}")
            }
            LifeError::RecordNotFound { entity, key } => {
                write!(f, "Record not found: {entity} with key {key}")
            }
            LifeError::MissingAttribute { entity, attribute } => {
                write!(f, "Missing attribute: {entity}.{attribute} was not loaded")
            }
            LifeError::UnknownEntity(name) => {
                write!(f, "Unknown entity: {name}")
            }
            LifeError::UnknownAssociation { entity, association } => {
                write!(f, "Unknown association: {entity} has no association named '{association}'")
            }
            LifeError::Association(s) => {
                write!(f, "Association error: {s}")
            }
            LifeError::Config(e) => {
                write!(f, "Configuration error: {e}")
            }
            LifeError::Other(s) => {
                write!(f, "Execution error: {s}")
            }
        }
    }
}

impl std::error::Error for LifeError {
    fn source(&self) -> Option<&(dyn std::error::Error + 'static)> {
        match self {
            LifeError::Config(e) => Some(e),
            _ => None,
        }
    }
}

impl From<config::ConfigError> for LifeError {
    fn from(err: config::ConfigError) -> Self {
        LifeError::Config(err)
    }
}

/// Trait for executing fetch queries
///
/// This trait abstracts the storage engine, allowing different implementations
/// (a pooled SQL connection, the in-memory `MemoryStore` behind the
/// `test-utils` feature, a recording wrapper) to be used interchangeably.
///
/// Implementations must return rows whose keys are exactly the output names of
/// the query's selection: the alias when one is given, else the column name.
///
/// # Examples
///
/// ```no_run
/// use lifeguard_lazy::{FetchQuery, LifeExecutor, LifeError, MemoryStore, Select};
///
/// # fn main() -> Result<(), LifeError> {
/// let store = MemoryStore::new();
/// let query = FetchQuery::new("posts").select(Select::qualified("posts", ["id", "title"]));
/// let rows = store.query_all(&query)?;
/// # Ok(())
/// # }
/// ```
pub trait LifeExecutor {
    /// Execute a query and return all rows
    ///
    /// # Errors
    ///
    /// Returns `LifeError` if the query execution fails.
    fn query_all(&self, query: &FetchQuery) -> Result<Vec<Row>, LifeError>;

    /// Execute a query and return the first row, if any
    ///
    /// # Errors
    ///
    /// Returns `LifeError` if the query execution fails.
    fn query_first(&self, query: &FetchQuery) -> Result<Option<Row>, LifeError> {
        Ok(self.query_all(query)?.into_iter().next())
    }
}

impl<T: LifeExecutor + ?Sized> LifeExecutor for &T {
    fn query_all(&self, query: &FetchQuery) -> Result<Vec<Row>, LifeError> {
        (**self).query_all(query)
    }

    fn query_first(&self, query: &FetchQuery) -> Result<Option<Row>, LifeError> {
        (**self).query_first(query)
    }
}

/// Execute `query` on behalf of `path`, with logging, a span and metrics
pub(crate) fn run_query(
    executor: &dyn LifeExecutor,
    path: &'static str,
    query: &FetchQuery,
) -> Result<Vec<Row>, LifeError> {
    instrumented(path, query, || executor.query_all(query), Vec::len)
}

/// [`run_query`] for keyed lookups that want one row at most
pub(crate) fn run_query_first(
    executor: &dyn LifeExecutor,
    path: &'static str,
    query: &FetchQuery,
) -> Result<Option<Row>, LifeError> {
    instrumented(
        path,
        query,
        || executor.query_first(query),
        |row: &Option<Row>| usize::from(row.is_some()),
    )
}

fn instrumented<T>(
    path: &'static str,
    query: &FetchQuery,
    execute: impl FnOnce() -> Result<T, LifeError>,
    row_count: impl Fn(&T) -> usize,
) -> Result<T, LifeError> {
    #[cfg(feature = "tracing")]
    let _span = tracing_helpers::execute_query_span(&query.table, path).entered();

    log::debug!("[{path}] {}", query.to_sql());
    let start = Instant::now();
    let result = execute();
    let duration = start.elapsed();

    #[cfg(feature = "metrics")]
    {
        METRICS.record_query(duration);
        if result.is_err() {
            METRICS.record_query_error();
        }
    }
    match &result {
        Ok(rows) => log::trace!("[{path}] {} row(s) in {duration:?}", row_count(rows)),
        Err(e) => log::debug!("[{path}] failed after {duration:?}: {e}"),
    }
    result
}
