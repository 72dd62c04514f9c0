//! On-demand attribute fetch.
//!
//! Reading an absent lazy attribute issues `SELECT table.pk, table.attr FROM
//! table WHERE table.pk = <key> LIMIT 1` straight against the executor. No
//! ambient scope, eager-load directive or interceptor takes part in this
//! lookup, so a surrounding find's joins or selection can never leak into it.

use crate::executor::{run_query_first, LifeError, LifeExecutor};
use crate::model::{display_value, AttributeLoader, Record};
use crate::query::{ColumnName, FetchQuery, Filter, Select};
use crate::schema::EntityDef;
use sea_query::Value;

#[cfg(feature = "metrics")]
use crate::metrics::METRICS;
#[cfg(feature = "tracing")]
use crate::metrics::tracing_helpers;

/// Single-attribute loader backed by an executor
pub struct LazyAttributeFetcher<'a> {
    executor: &'a dyn LifeExecutor,
}

impl<'a> LazyAttributeFetcher<'a> {
    pub fn new(executor: &'a dyn LifeExecutor) -> Self {
        Self { executor }
    }

    /// The keyed lookup for one attribute
    pub fn fetch_query(entity: &EntityDef, attribute: &str, key: Value) -> FetchQuery {
        let pk = entity.primary_key_column();
        FetchQuery::new(entity.table())
            .select(Select::qualified(entity.table(), [pk, attribute]))
            .filter(Filter::eq(ColumnName::qualified(entity.table(), pk), key))
            .limit(1)
    }

    /// Read `attribute`, fetching and memoizing it when absent
    ///
    /// # Errors
    ///
    /// See [`Record::read_attribute`].
    pub fn fetch_attribute(&self, record: &mut Record, attribute: &str) -> Result<Value, LifeError> {
        record.read_attribute(attribute, self).cloned()
    }
}

impl AttributeLoader for LazyAttributeFetcher<'_> {
    fn load_attribute(&self, record: &Record, attribute: &str) -> Result<Value, LifeError> {
        let entity = record.entity();
        #[cfg(feature = "tracing")]
        let _span = tracing_helpers::attribute_fetch_span(entity.name(), attribute).entered();

        let key = record.primary_key_value()?.clone();
        let query = Self::fetch_query(entity, attribute, key.clone());
        log::debug!("fetching lazy attribute {}.{attribute}", entity.name());
        #[cfg(feature = "metrics")]
        METRICS.record_attribute_fetch(entity.name());

        let row = run_query_first(self.executor, "fetch", &query)?.ok_or_else(|| {
            LifeError::RecordNotFound {
                entity: entity.name().to_string(),
                key: display_value(&key),
            }
        })?;

        row.get(attribute).cloned().ok_or_else(|| {
            LifeError::ParseError(format!(
                "lookup of {}.{attribute} returned a row without that column",
                entity.name()
            ))
        })
    }
}
