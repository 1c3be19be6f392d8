use crate::connection::StreamConnection;
use crate::errors::StreamError;
use crate::frame::DecodedFrame;
use crate::frame_cache::{FrameCache, PublishOutcome};
use crate::pacing::FramePacing;
use crate::resize::FrameResizer;
use std::io::Read;
use std::sync::Arc;
use std::sync::atomic::{AtomicBool, AtomicU64, Ordering};
use std::time::Instant;

const STATUS_INTERVAL: u64 = 30;

/// Counters shared between the producer thread and the stream handle.
#[derive(Debug, Default)]
pub struct StreamStats {
    frames_published: AtomicU64,
    swaps_skipped: AtomicU64,
    frames_dropped: AtomicU64,
    decode_errors: AtomicU64,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub struct StatsSnapshot {
    /// Frames that became visible to consumers.
    pub frames_published: u64,
    /// Decoded frames held back because the front slot was borrowed.
    pub swaps_skipped: u64,
    /// Parts lost to framing, decode or resize errors.
    pub frames_dropped: u64,
    pub decode_errors: u64,
}

impl StreamStats {
    pub fn snapshot(&self) -> StatsSnapshot {
        StatsSnapshot {
            frames_published: self.frames_published.load(Ordering::Relaxed),
            swaps_skipped: self.swaps_skipped.load(Ordering::Relaxed),
            frames_dropped: self.frames_dropped.load(Ordering::Relaxed),
            decode_errors: self.decode_errors.load(Ordering::Relaxed),
        }
    }

    /// Count a successful publish; returns the number of frames decoded and
    /// handed to the cache so far, visible or not.
    fn record_publish(&self, outcome: PublishOutcome) -> u64 {
        let counter = match outcome {
            PublishOutcome::Swapped => &self.frames_published,
            PublishOutcome::SwapSkipped => &self.swaps_skipped,
        };
        counter.fetch_add(1, Ordering::Relaxed);
        self.frames_published.load(Ordering::Relaxed) + self.swaps_skipped.load(Ordering::Relaxed)
    }

    fn record_dropped(&self, error: &StreamError) {
        self.frames_dropped.fetch_add(1, Ordering::Relaxed);
        if matches!(error, StreamError::Decode(_)) {
            self.decode_errors.fetch_add(1, Ordering::Relaxed);
        }
    }
}

/// Brings decoded frames to the cache at the resolution consumers asked for.
pub struct FramePublisher {
    cache: Arc<FrameCache>,
    resizer: FrameResizer,
}

impl FramePublisher {
    pub fn new(cache: Arc<FrameCache>, resizer: FrameResizer) -> Self {
        Self { cache, resizer }
    }

    pub fn publish(&mut self, frame: DecodedFrame) -> Result<PublishOutcome, StreamError> {
        let frame = match self.cache.target_resolution() {
            Some((width, height)) if (width, height) != (frame.width, frame.height) => {
                self.resizer.resize(&frame, width, height)?
            }
            _ => frame,
        };
        Ok(self.cache.publish(frame))
    }
}

/// Everything the producer thread owns besides the connection itself.
pub struct ProducerContext {
    pub label: String,
    pub running: Arc<AtomicBool>,
    pub stats: Arc<StreamStats>,
    pub pacing: FramePacing,
    pub publisher: FramePublisher,
}

/// Fill, demultiplex, decode and publish until stopped or the stream fails.
///
/// Per-frame errors are counted and skipped; the last good frame stays
/// visible. A fatal error clears `running` and wakes cache waiters.
pub fn run<R: Read>(mut connection: StreamConnection<R>, mut ctx: ProducerContext) {
    tracing::info!(stream = %ctx.label, "Starting stream producer ({:?} poll interval)", ctx.pacing.frame_duration());

    let mut frame_number = 0u64;

    while ctx.running.load(Ordering::Acquire) {
        let started = Instant::now();
        let span = tracing::info_span!(
            "receive_frame",
            stream = %ctx.label,
            frame_number
        );
        let _enter = span.enter();
        frame_number += 1;

        let result = connection
            .next_frame()
            .and_then(|frame| ctx.publisher.publish(frame));

        match result {
            Ok(outcome) => {
                let handled = ctx.stats.record_publish(outcome);
                if handled.is_multiple_of(STATUS_INTERVAL) {
                    let stats = ctx.stats.snapshot();
                    tracing::debug!(
                        "Status: [Frames: {}] [Dropped: {}] [Decode errors: {}] [Swaps skipped: {}]",
                        stats.frames_published,
                        stats.frames_dropped,
                        stats.decode_errors,
                        stats.swaps_skipped
                    );
                }
            }
            Err(e) if e.is_fatal() => {
                if ctx.running.load(Ordering::Acquire) {
                    tracing::warn!(stream = %ctx.label, "Stream stopped: {}", e);
                } else {
                    tracing::debug!(stream = %ctx.label, "Receive interrupted by shutdown: {}", e);
                }
                break;
            }
            Err(e) => {
                ctx.stats.record_dropped(&e);
                tracing::warn!("Frame #{} skipped: {}", frame_number, e);
            }
        }

        drop(_enter);
        ctx.pacing.wait(started);
    }

    ctx.running.store(false, Ordering::Release);
    ctx.publisher.cache.close();

    let stats = ctx.stats.snapshot();
    tracing::info!(
        stream = %ctx.label,
        "Shutdown: {} frames published, {} dropped ({} decode errors).",
        stats.frames_published,
        stats.frames_dropped,
        stats.decode_errors
    );
}
