pub mod config;
pub mod logging;
pub mod retry;
pub mod telemetry;

pub use config::{Environment, var_or};
pub use logging::setup_logging;
pub use retry::{RetryPolicy, retry_with_backoff};
pub use telemetry::TelemetryGuard;
