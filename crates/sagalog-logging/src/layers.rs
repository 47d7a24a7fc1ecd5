//! Formatting layers
//!
//! Builders for the `tracing-subscriber` fmt layers the subscriber uses,
//! so console and file output are configured the same way.

use tracing::Subscriber;
use tracing_subscriber::fmt::format::{Format, Json, JsonFields};
use tracing_subscriber::fmt::{self, MakeWriter};
use tracing_subscriber::registry::LookupSpan;

use crate::config::JsonlConfig;

/// JSONL layer type produced by [`jsonl_layer`]
pub type JsonlLayer<S, W> = fmt::Layer<S, JsonFields, Format<Json>, W>;

/// Create a JSONL formatting layer writing to `writer`
///
/// This configures tracing-subscriber's JSON formatter with settings
/// suited to log aggregation systems.
pub fn jsonl_layer<S, W>(writer: W, config: &JsonlConfig) -> JsonlLayer<S, W>
where
    S: Subscriber + for<'lookup> LookupSpan<'lookup>,
    W: for<'writer> MakeWriter<'writer> + 'static,
{
    fmt::layer()
        .json()
        .with_current_span(config.include_current_span)
        .with_span_list(config.include_spans)
        .flatten_event(config.flatten_events)
        .with_file(config.include_location)
        .with_line_number(config.include_location)
        .with_thread_ids(config.include_thread_info)
        .with_thread_names(config.include_thread_info)
        .with_writer(writer)
}

/// Human-readable console layer
pub fn pretty_layer<S>(ansi: bool) -> fmt::Layer<S>
where
    S: Subscriber + for<'lookup> LookupSpan<'lookup>,
{
    fmt::layer().with_ansi(ansi).with_target(true)
}
