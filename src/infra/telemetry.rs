use std::sync::Once;

use metrics::{Unit, describe_counter, describe_gauge, describe_histogram};
use tracing::Subscriber;
use tracing_error::ErrorLayer;
use tracing_subscriber::{
    EnvFilter, fmt,
    layer::{Layer, SubscriberExt},
    registry::LookupSpan,
    util::SubscriberInitExt,
};

use crate::config::{LogFormat, LoggingSettings};

use super::error::InfraError;

static METRIC_DESCRIPTIONS: Once = Once::new();

enum MetricKind {
    Counter,
    Gauge,
    Histogram,
}

const METRICS: &[(MetricKind, &str, Unit, &str)] = &[
    (
        MetricKind::Counter,
        "query_cache_hit_total",
        Unit::Count,
        "Reads served from the cache.",
    ),
    (
        MetricKind::Counter,
        "query_cache_miss_total",
        Unit::Count,
        "Reads that executed against the engine, including warmup calls.",
    ),
    (
        MetricKind::Counter,
        "query_cache_write_total",
        Unit::Count,
        "Results written to the store.",
    ),
    (
        MetricKind::Counter,
        "query_cache_bypass_total",
        Unit::Count,
        "Reads that skipped the cache because caching is disabled.",
    ),
    (
        MetricKind::Counter,
        "query_cache_store_error_total",
        Unit::Count,
        "Store failures during reads or writes.",
    ),
    (
        MetricKind::Counter,
        "query_cache_evict_total",
        Unit::Count,
        "In-memory store evictions due to capacity.",
    ),
    (
        MetricKind::Counter,
        "query_cache_flush_total",
        Unit::Count,
        "Tags flushed by invalidation.",
    ),
    (
        MetricKind::Gauge,
        "query_cache_event_queue_len",
        Unit::Count,
        "Pending mutation events.",
    ),
    (
        MetricKind::Counter,
        "query_cache_event_dropped_total",
        Unit::Count,
        "Mutation events widened to an entity flush because the queue was full.",
    ),
    (
        MetricKind::Histogram,
        "query_cache_engine_ms",
        Unit::Milliseconds,
        "Engine execution latency on cache misses.",
    ),
    (
        MetricKind::Histogram,
        "query_cache_consume_ms",
        Unit::Milliseconds,
        "Latency of one invalidation batch.",
    ),
];

/// Install a global tracing subscriber using the provided logging settings.
///
/// `RUST_LOG` directives override the configured level.
pub fn init(logging: &LoggingSettings) -> Result<(), InfraError> {
    describe_metrics();

    let env_filter = EnvFilter::builder()
        .with_default_directive(logging.level.into())
        .from_env_lossy();

    tracing_subscriber::registry()
        .with(env_filter)
        .with(ErrorLayer::default())
        .with(fmt_layer(logging.format))
        .try_init()
        .map_err(|err| {
            InfraError::telemetry(format!("failed to install tracing subscriber: {err}"))
        })
}

fn fmt_layer<S>(format: LogFormat) -> Box<dyn Layer<S> + Send + Sync>
where
    S: Subscriber + for<'a> LookupSpan<'a> + 'static,
{
    match format {
        LogFormat::Json => fmt::layer()
            .json()
            .with_current_span(true)
            .with_span_list(true)
            .with_target(true)
            .boxed(),
        LogFormat::Compact => fmt::layer().compact().with_target(true).boxed(),
    }
}

/// Register descriptions for every metric the cache emits. Runs once per
/// process; call it after installing a recorder.
pub fn describe_metrics() {
    METRIC_DESCRIPTIONS.call_once(|| {
        for (kind, name, unit, description) in METRICS {
            let (name, unit, description) = (*name, *unit, *description);
            match kind {
                MetricKind::Counter => {
                    describe_counter!(name, unit, description);
                }
                MetricKind::Gauge => {
                    describe_gauge!(name, unit, description);
                }
                MetricKind::Histogram => {
                    describe_histogram!(name, unit, description);
                }
            }
        }
    });
}

#[cfg(test)]
mod tests {
    use std::collections::HashSet;

    use super::*;

    #[test]
    fn metric_names_are_unique_and_prefixed() {
        let mut seen = HashSet::new();
        for (_, name, _, _) in METRICS {
            assert!(name.starts_with("query_cache_"), "{name}");
            assert!(seen.insert(*name), "duplicate metric {name}");
        }
        assert_eq!(seen.len(), 11);
    }
}
