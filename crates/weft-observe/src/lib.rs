//! Observability setup for Weft: tracing subscriber and optional
//! OpenTelemetry export.

pub mod tracing_setup;
