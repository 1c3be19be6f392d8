use crate::producer::{StatsSnapshot, StreamStats};
use crate::stream::StreamHandle;
use opentelemetry::KeyValue;
use opentelemetry::global;
use opentelemetry::metrics::ObservableCounter;
use std::sync::Arc;

/// OpenTelemetry counters mirroring a stream's [`StatsSnapshot`].
///
/// Values are read from the shared counters at each export; nothing is
/// recorded on the producer's hot path. Without an installed meter provider
/// the instruments are no-ops.
pub struct StreamMetrics {
    _published: ObservableCounter<u64>,
    _dropped: ObservableCounter<u64>,
    _decode_errors: ObservableCounter<u64>,
}

impl StreamMetrics {
    pub fn register(handle: &StreamHandle) -> Self {
        let stats = handle.shared_stats();
        let attributes = [KeyValue::new("stream.url", handle.url().to_string())];

        Self {
            _published: observe(
                "stream.frames.published",
                "Frames made available to consumers",
                &stats,
                &attributes,
                |s| s.frames_published,
            ),
            _dropped: observe(
                "stream.frames.dropped",
                "Parts lost to framing, decode or resize errors",
                &stats,
                &attributes,
                |s| s.frames_dropped,
            ),
            _decode_errors: observe(
                "stream.decode.errors",
                "Payloads that failed JPEG decoding",
                &stats,
                &attributes,
                |s| s.decode_errors,
            ),
        }
    }
}

fn observe(
    name: &'static str,
    description: &'static str,
    stats: &Arc<StreamStats>,
    attributes: &[KeyValue],
    read: fn(&StatsSnapshot) -> u64,
) -> ObservableCounter<u64> {
    let stats = Arc::clone(stats);
    let attributes = attributes.to_vec();

    global::meter("receiver")
        .u64_observable_counter(name)
        .with_description(description)
        .with_callback(move |observer| observer.observe(read(&stats.snapshot()), &attributes))
        .build()
}
