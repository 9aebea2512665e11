//! Distributor read-path instruments.

use opentelemetry::global;
use opentelemetry::metrics::{Counter, Histogram};
use opentelemetry::KeyValue;
use std::sync::OnceLock;

/// Sink for read-path metrics. Injected into the distributor so tests can
/// observe what was recorded.
pub trait QueryRecorder: Send + Sync {
    /// One call issued to an ingester.
    fn record_ingester_query(&self, addr: &str);

    /// An ingester call failed for a reason other than the query's own
    /// cancellation.
    fn record_ingester_query_failure(&self, addr: &str);

    fn record_query(&self, metrics: QueryMetrics);
}

#[derive(Debug, Clone, Copy, PartialEq)]
pub struct QueryMetrics {
    /// "query", "query_exemplars" or "query_stream"
    pub operation: &'static str,
    pub outcome: &'static str,
    pub error_class: Option<&'static str>,
    pub duration_seconds: f64,
    pub series_returned: u64,
    pub replicas_queried: u64,
}

struct DistributorInstruments {
    query_duration_seconds: Histogram<f64>,
    query_series_returned: Histogram<u64>,
    query_replicas: Histogram<u64>,
    ingester_queries: Counter<u64>,
    ingester_query_failures: Counter<u64>,
}

fn instruments() -> &'static DistributorInstruments {
    static INSTRUMENTS: OnceLock<DistributorInstruments> = OnceLock::new();
    INSTRUMENTS.get_or_init(|| {
        let meter = global::meter("ringquery.distributor");
        DistributorInstruments {
            query_duration_seconds: meter
                .f64_histogram("ringquery.distributor.query.duration")
                .with_description("Read-path latency from replica selection to merged result")
                .with_unit("s")
                .init(),
            query_series_returned: meter
                .u64_histogram("ringquery.distributor.query.series_returned")
                .with_description("Series in the merged result")
                .init(),
            query_replicas: meter
                .u64_histogram("ringquery.distributor.query.replicas")
                .with_description("Replicas selected for a query")
                .init(),
            ingester_queries: meter
                .u64_counter("ringquery.distributor.ingester.queries")
                .with_description("Calls issued to ingesters")
                .init(),
            ingester_query_failures: meter
                .u64_counter("ringquery.distributor.ingester.query_failures")
                .with_description("Failed calls to ingesters, excluding caller cancellation")
                .init(),
        }
    })
}

/// [`QueryRecorder`] backed by the global OpenTelemetry meter provider
#[derive(Debug, Default, Clone, Copy)]
pub struct OtelQueryRecorder;

impl QueryRecorder for OtelQueryRecorder {
    fn record_ingester_query(&self, addr: &str) {
        instruments()
            .ingester_queries
            .add(1, &[KeyValue::new("ingester", addr.to_string())]);
    }

    fn record_ingester_query_failure(&self, addr: &str) {
        instruments()
            .ingester_query_failures
            .add(1, &[KeyValue::new("ingester", addr.to_string())]);
    }

    fn record_query(&self, metrics: QueryMetrics) {
        let i = instruments();
        let mut attrs = vec![
            KeyValue::new("operation", metrics.operation),
            KeyValue::new("outcome", metrics.outcome),
        ];
        if let Some(error_class) = metrics.error_class {
            attrs.push(KeyValue::new("error.class", error_class));
        }

        i.query_duration_seconds.record(metrics.duration_seconds, &attrs);
        i.query_series_returned.record(metrics.series_returned, &attrs);
        i.query_replicas.record(metrics.replicas_queried, &attrs);
    }
}
