//! Process-wide tracing subscriber and metric descriptions.
//!
//! `init` runs once from `main` before anything logs. Metric descriptions are
//! registered with whatever recorder is installed; a missing recorder makes
//! every `metrics` macro in the cache a no-op.

use std::sync::Once;

use metrics::{Unit, describe_counter, describe_histogram};
use tracing_error::ErrorLayer;
use tracing_subscriber::{
    EnvFilter, fmt,
    layer::{Layer, SubscriberExt},
    util::SubscriberInitExt,
};

use crate::config::{LogFormat, LoggingSettings};

use super::error::InfraError;

static METRIC_DESCRIPTIONS: Once = Once::new();

/// Install a global tracing subscriber using the provided logging settings.
pub fn init(logging: &LoggingSettings) -> Result<(), InfraError> {
    describe_metrics();

    let env_filter = EnvFilter::builder()
        .with_default_directive(logging.level.into())
        .from_env_lossy();

    let fmt_layer = match logging.format {
        LogFormat::Json => fmt::layer()
            .json()
            .with_current_span(true)
            .with_span_list(true)
            .with_target(true)
            .boxed(),
        LogFormat::Compact => fmt::layer().compact().with_target(true).boxed(),
    };

    tracing_subscriber::registry()
        .with(env_filter)
        .with(ErrorLayer::default())
        .with(fmt_layer)
        .try_init()
        .map_err(|err| {
            InfraError::telemetry(format!("failed to install tracing subscriber: {err}"))
        })
}

pub fn describe_metrics() {
    METRIC_DESCRIPTIONS.call_once(|| {
        describe_counter!(
            "cachegate_purge_total",
            Unit::Count,
            "Purge requests by outcome (purged, failed, vetoed, empty, unavailable)."
        );
        describe_counter!(
            "cachegate_flush_all_total",
            Unit::Count,
            "Full-site flushes by outcome."
        );
        describe_counter!(
            "cachegate_decision_total",
            Unit::Count,
            "Cache verdicts emitted for responses, by verdict."
        );
        describe_histogram!(
            "cachegate_driver_op_ms",
            Unit::Milliseconds,
            "Cache driver operation latency in milliseconds."
        );
    });
}
