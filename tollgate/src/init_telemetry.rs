use anyhow::Result;
use init_tracing_opentelemetry::tracing_subscriber_ext::build_logger_text;
use opentelemetry::trace::TracerProvider;
use opentelemetry_sdk::trace::TraceError;
use opentelemetry_sdk::trace::Tracer;
use tracing::{info, warn, Subscriber};
use tracing_opentelemetry::OpenTelemetryLayer;
use tracing_subscriber::{layer::SubscriberExt, registry::LookupSpan, Layer};
use tracing_subscriber::{registry, EnvFilter};

use crate::settings::config::Settings;

/// Log level used when neither `RUST_LOG` nor `OTEL_LOG_LEVEL` is set.
const DEFAULT_LOG_LEVEL: &str = "warn,tollgate=info,tollgate_core=info,tollgate::audit=warn";

pub fn build_otel_layer<S>() -> Result<OpenTelemetryLayer<S, Tracer>, TraceError>
where
    S: Subscriber + for<'a> LookupSpan<'a>,
{
    use init_tracing_opentelemetry::{init_propagator, otlp, resource::DetectResource};
    use opentelemetry::global;

    let otel_rsrc = DetectResource::default()
        .with_fallback_service_name(env!("CARGO_PKG_NAME"))
        .with_fallback_service_version(env!("CARGO_PKG_VERSION"))
        .build();
    let tracerprovider = otlp::traces::init_tracerprovider(otel_rsrc, otlp::traces::identity)
        .map_err(|e| TraceError::Other(Box::new(e)))?;
    init_propagator()?;
    let layer = tracing_opentelemetry::layer()
        .with_error_records_to_exceptions(true)
        .with_tracer(tracerprovider.tracer(""));
    global::set_tracer_provider(tracerprovider);
    Ok(layer)
}

pub fn build_reduced_logger_text<S>(debug: bool) -> Box<dyn Layer<S> + Send + Sync + 'static>
where
    S: Subscriber + for<'a> LookupSpan<'a>,
{
    if debug || cfg!(debug_assertions) {
        Box::new(
            tracing_subscriber::fmt::layer()
                .with_line_number(false)
                .with_thread_names(false)
                .with_timer(tracing_subscriber::fmt::time::SystemTime)
                .with_target(true)
                .with_span_events(tracing_subscriber::fmt::format::FmtSpan::NONE)
                .event_format(tracing_subscriber::fmt::format().compact()),
        )
    } else {
        Box::new(
            tracing_subscriber::fmt::layer()
                .with_timer(tracing_subscriber::fmt::time::SystemTime)
                .with_target(true),
        )
    }
}

/// Directives for the log filter. `otel::tracing` has to stay at trace so
/// spans reach the exporter.
fn log_directives(base: Option<String>) -> String {
    format!(
        "{},otel::tracing=trace,otel=debug,axum_tracing_opentelemetry=error",
        base.unwrap_or_else(|| DEFAULT_LOG_LEVEL.to_string())
    )
}

pub fn build_loglevel_filter_layer() -> EnvFilter {
    let base = std::env::var("RUST_LOG")
        .or_else(|_| std::env::var("OTEL_LOG_LEVEL"))
        .ok();
    EnvFilter::try_new(log_directives(base)).unwrap_or_else(|e| {
        eprintln!("Invalid log filter, falling back to defaults: {e}");
        EnvFilter::new(log_directives(None))
    })
}

pub fn init_telemetry_and_tracing(settings: &Settings) -> Result<()> {
    // Temporary subscriber so setup itself is logged
    let subscriber = registry()
        .with(build_loglevel_filter_layer())
        .with(build_logger_text());
    let _guard = tracing::subscriber::set_default(subscriber);
    info!("init logging & tracing");

    let tracing_enabled = settings.telemetry_enabled("traces");
    let metrics_enabled = settings.telemetry_enabled("metrics");

    if tracing_enabled {
        let subscriber = tracing_subscriber::registry()
            .with(build_otel_layer()?)
            .with(build_loglevel_filter_layer())
            .with(build_reduced_logger_text(settings.debug));
        tracing::subscriber::set_global_default(subscriber)?;
    } else {
        let subscriber = registry()
            .with(build_loglevel_filter_layer())
            .with(build_reduced_logger_text(settings.debug));
        tracing::subscriber::set_global_default(subscriber)?;
    }

    if metrics_enabled {
        match crate::metrics::init_metrics() {
            Ok(_) => info!("OpenTelemetry metrics initialized successfully"),
            Err(e) => warn!("Failed to initialize metrics: {}", e),
        }
    }

    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_log_directives_default() {
        let directives = log_directives(None);
        assert!(directives.starts_with(DEFAULT_LOG_LEVEL));
        assert!(EnvFilter::try_new(directives).is_ok());
    }

    #[test]
    fn test_log_directives_from_env_value() {
        let directives = log_directives(Some("debug".to_string()));
        assert!(directives.starts_with("debug,"));
    }
}
