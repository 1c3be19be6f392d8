use crate::config::Environment;
use tracing::Subscriber;
use tracing_subscriber::{
    EnvFilter, Layer, layer::SubscriberExt, registry::LookupSpan, util::SubscriberInitExt,
};

/// Filter from `RUST_LOG`, or `info` when it is unset or invalid.
pub(crate) fn env_filter() -> EnvFilter {
    EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new("info"))
}

/// Pretty output for development, JSON lines for production.
pub(crate) fn fmt_layer<S>(environment: Environment) -> Box<dyn Layer<S> + Send + Sync>
where
    S: Subscriber + for<'a> LookupSpan<'a>,
{
    match environment {
        Environment::Production => tracing_subscriber::fmt::layer()
            .json()
            .with_level(true)
            .with_thread_names(true)
            .boxed(),
        Environment::Development => tracing_subscriber::fmt::layer()
            .pretty()
            .with_ansi(true)
            .with_thread_names(true)
            .boxed(),
    }
}

/// Initialize the global tracing subscriber.
///
/// Uses RUST_LOG for filtering (defaults to "info"). The OpenTelemetry layer is
/// always installed; it stays inert unless a tracer provider was registered
/// (see [`crate::TelemetryGuard`]).
pub fn setup_logging(environment: Environment) {
    tracing_subscriber::registry()
        .with(env_filter())
        .with(tracing_opentelemetry::layer())
        .with(fmt_layer(environment))
        .init();
}
