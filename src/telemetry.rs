//! Logging and trace export
//!
//! Console output always goes through a `tracing-subscriber` fmt layer
//! (plain or JSON). When an OTLP endpoint is configured, spans are also
//! exported to it:
//!
//! ```text
//! readfence → OTLP (gRPC) → OTel Collector → Tempo / Jaeger
//! ```

use opentelemetry::KeyValue;
use opentelemetry_otlp::WithExportConfig;
use opentelemetry_sdk::{runtime, trace as sdktrace, Resource};
use tracing_subscriber::{layer::SubscriberExt, util::SubscriberInitExt, EnvFilter};

use crate::config::TelemetryConfig;

/// Filter used when neither `RUST_LOG` nor the config sets one
const DEFAULT_LOG_FILTER: &str = "info,readfence=debug";

/// Install the global subscriber.
///
/// Must run inside a tokio runtime when `otlp_endpoint` is set, since the
/// batch exporter spawns onto it.
pub fn init_tracing(
    service_name: &str,
    config: &TelemetryConfig,
) -> Result<(), Box<dyn std::error::Error + Send + Sync>> {
    let filter = EnvFilter::try_from_default_env().unwrap_or_else(|_| {
        EnvFilter::new(config.log_filter.as_deref().unwrap_or(DEFAULT_LOG_FILTER))
    });

    let otel_layer = match config.otlp_endpoint.as_deref() {
        Some(endpoint) => {
            let exporter = opentelemetry_otlp::new_exporter()
                .tonic()
                .with_endpoint(endpoint);

            let tracer = opentelemetry_otlp::new_pipeline()
                .tracing()
                .with_exporter(exporter)
                .with_trace_config(sdktrace::Config::default().with_resource(Resource::new(vec![
                    KeyValue::new("service.name", service_name.to_string()),
                    KeyValue::new("service.version", env!("CARGO_PKG_VERSION")),
                ])))
                .install_batch(runtime::Tokio)?;

            Some(tracing_opentelemetry::layer().with_tracer(tracer))
        }
        None => None,
    };

    let registry = tracing_subscriber::registry().with(filter).with(otel_layer);

    if config.json_logs {
        registry
            .with(tracing_subscriber::fmt::layer().json().with_target(true))
            .try_init()?;
    } else {
        registry
            .with(tracing_subscriber::fmt::layer().with_target(true))
            .try_init()?;
    }

    tracing::debug!(
        service = service_name,
        otlp = config.otlp_endpoint.as_deref().unwrap_or("disabled"),
        json = config.json_logs,
        "tracing initialized"
    );

    Ok(())
}

/// Flush pending spans. A no-op when no exporter was installed.
pub fn shutdown_tracing() {
    opentelemetry::global::shutdown_tracer_provider();
}
