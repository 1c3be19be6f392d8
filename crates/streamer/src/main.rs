mod config;
mod mjpeg;
mod pattern;

use anyhow::Context;
use axum::{Router, routing::get};
use config::StreamerConfig;
use mjpeg::AppState;
use pattern::TestPattern;

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    let config = StreamerConfig::from_env()?;
    common::setup_logging(config.environment);

    tracing::info!("Streamer starting with config: {:?}", config);

    let state = AppState::new();
    let pattern = TestPattern::new(config.size).context("Failed to initialize JPEG encoder")?;

    let generator_state = state.clone();
    let (framing, fps) = (config.framing, config.fps);
    tokio::spawn(async move {
        if let Err(e) = mjpeg::generate(generator_state, pattern, framing, fps).await {
            tracing::error!("Frame generator stopped: {}", e);
        }
    });

    let app = Router::new()
        .route("/", get(mjpeg::index))
        .route("/stream", get(mjpeg::stream_handler))
        .with_state(state);

    let addr = format!("0.0.0.0:{}", config.port);
    let listener = tokio::net::TcpListener::bind(&addr)
        .await
        .with_context(|| format!("Failed to bind {addr}"))?;
    tracing::info!(
        "Serving {} framing at http://{}/stream",
        config.framing,
        addr
    );

    axum::serve(listener, app)
        .with_graceful_shutdown(async {
            if let Err(e) = tokio::signal::ctrl_c().await {
                tracing::error!("Failed to listen for shutdown signal: {}", e);
            }
        })
        .await?;

    tracing::info!("Streamer stopped gracefully");
    Ok(())
}
