//! Metrics and tracing hooks for the lazy loading layer.
//!
//! Counters are registered on the global opentelemetry meter provider; wiring up
//! an exporter is left to the host application.

#[cfg(feature = "metrics")]
use once_cell::sync::Lazy;
#[cfg(feature = "metrics")]
use opentelemetry::{
    global,
    metrics::{Counter, Histogram},
    KeyValue,
};

#[cfg(feature = "metrics")]
pub static METRICS: Lazy<LazyMetrics> = Lazy::new(LazyMetrics::init);

#[cfg(feature = "metrics")]
pub struct LazyMetrics {
    pub queries_total: Counter<u64>,
    pub query_errors_total: Counter<u64>,
    pub query_duration: Histogram<f64>,
    pub selection_injections_total: Counter<u64>,
    pub attribute_fetches_total: Counter<u64>,
}

#[cfg(feature = "metrics")]
impl LazyMetrics {
    pub fn init() -> Self {
        let meter = global::meter("lifeguard_lazy");

        let queries_total = meter
            .u64_counter("lifeguard_lazy_queries_total")
            .with_description("Total queries issued through the lazy loading layer")
            .build();

        let query_errors_total = meter
            .u64_counter("lifeguard_lazy_query_errors_total")
            .with_description("Queries rejected by the storage engine")
            .build();

        let query_duration = meter
            .f64_histogram("lifeguard_lazy_query_duration_seconds")
            .with_description("Duration of queries")
            .build();

        let selection_injections_total = meter
            .u64_counter("lifeguard_lazy_selection_injections_total")
            .with_description("Queries whose selection was narrowed to eager columns")
            .build();

        let attribute_fetches_total = meter
            .u64_counter("lifeguard_lazy_attribute_fetches_total")
            .with_description("On-demand single attribute fetches")
            .build();

        Self {
            queries_total,
            query_errors_total,
            query_duration,
            selection_injections_total,
            attribute_fetches_total,
        }
    }

    pub fn record_query(&self, elapsed: std::time::Duration) {
        self.queries_total.add(1, &[]);
        self.query_duration.record(elapsed.as_secs_f64(), &[]);
    }

    pub fn record_query_error(&self) {
        self.query_errors_total.add(1, &[]);
    }

    pub fn record_injection(&self, path: &'static str) {
        self.selection_injections_total
            .add(1, &[KeyValue::new("path", path)]);
    }

    pub fn record_attribute_fetch(&self, entity: &str) {
        self.attribute_fetches_total
            .add(1, &[KeyValue::new("entity", entity.to_string())]);
    }
}

/// Span constructors entered by the execution paths
#[cfg(feature = "tracing")]
pub mod tracing_helpers {
    use tracing::{span, Level, Span};

    pub fn execute_query_span(table: &str, path: &'static str) -> Span {
        span!(Level::DEBUG, "lifeguard.lazy.query", table = table, path = path)
    }

    pub fn attribute_fetch_span(entity: &str, attribute: &str) -> Span {
        span!(
            Level::DEBUG,
            "lifeguard.lazy.fetch",
            entity = entity,
            attribute = attribute
        )
    }
}
