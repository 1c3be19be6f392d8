use anyhow::Context;
use common::{TelemetryGuard, retry_with_backoff};
use receiver::{
    StreamConfig, StreamHandle, StreamMetrics, frame::unix_time_ms, logging::setup_logging,
};
use signal_hook::{
    consts::{SIGINT, SIGTERM},
    flag,
};
use std::sync::Arc;
use std::sync::atomic::{AtomicBool, Ordering};
use std::time::Duration;

const WAIT_SLICE: Duration = Duration::from_millis(500);
const STALE_AFTER_MS: u64 = 2_000;
const REPORT_INTERVAL: u64 = 150;

fn main() -> anyhow::Result<()> {
    let config = StreamConfig::from_env()?;

    // OTLP exporters need a Tokio runtime alive for the whole process.
    let (_telemetry, _runtime) = if let Some(endpoint) = config.otel_endpoint.as_ref() {
        let rt = tokio::runtime::Runtime::new().context("Failed to create Tokio runtime")?;
        let guard =
            rt.block_on(async { TelemetryGuard::init("receiver", endpoint, config.environment) })?;
        (Some(guard), Some(rt))
    } else {
        setup_logging(&config);
        (None, None)
    };

    tracing::info!("Receiver starting with config: {:?}", config);

    let shutdown = Arc::new(AtomicBool::new(false));
    flag::register(SIGTERM, Arc::clone(&shutdown))?;
    flag::register(SIGINT, Arc::clone(&shutdown))?;
    tracing::info!("Signal handlers registered (SIGTERM, SIGINT)");

    let stream = retry_with_backoff(
        || StreamHandle::open_with_config(&config),
        config.open_retries,
        200,
        "Stream open",
    )
    .with_context(|| format!("Failed to open MJPEG stream at {}", config.url))?;

    let _metrics = StreamMetrics::register(&stream);
    let cache = Arc::clone(stream.cache());
    let mut seen = 0u64;
    let mut received = 0u64;
    let mut stale_warned = false;

    while !shutdown.load(Ordering::Relaxed) && stream.is_running() {
        match cache.wait_for_frame(seen, WAIT_SLICE) {
            Some(frame) => {
                seen = cache.sequence();
                received += 1;
                stale_warned = false;

                if received.is_multiple_of(REPORT_INTERVAL) {
                    let stats = stream.stats();
                    tracing::info!(
                        "Latest frame {}x{} ({} ms old) [Published: {}] [Dropped: {}] [Decode errors: {}]",
                        frame.width,
                        frame.height,
                        frame.age_ms(unix_time_ms()),
                        stats.frames_published,
                        stats.frames_dropped,
                        stats.decode_errors
                    );
                }
            }
            None => {
                let age = stream
                    .copy_latest_frame()
                    .map(|frame| frame.age_ms(unix_time_ms()));
                match age {
                    Some(age) if age > STALE_AFTER_MS && !stale_warned => {
                        tracing::warn!("No new frame for {} ms, serving the last one", age);
                        stale_warned = true;
                    }
                    None if !stale_warned => {
                        tracing::warn!("Still waiting for the first frame");
                        stale_warned = true;
                    }
                    _ => {}
                }
            }
        }
    }

    let stopped_by_peer = !stream.is_running();
    let stats = stream.stats();
    stream.close();

    if stopped_by_peer && !shutdown.load(Ordering::Relaxed) {
        anyhow::bail!(
            "Stream ended after {} frames ({} dropped)",
            stats.frames_published,
            stats.frames_dropped
        );
    }

    tracing::info!("Receiver stopped gracefully");
    Ok(())
}
