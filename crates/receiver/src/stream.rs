//! Public stream API: open, read the latest frame, close.

use crate::config::StreamConfig;
use crate::connection::{self, StreamConnection};
use crate::errors::StreamError;
use crate::frame::DecodedFrame;
use crate::frame_cache::FrameCache;
use crate::pacing::FramePacing;
use crate::producer::{self, FramePublisher, ProducerContext, StatsSnapshot, StreamStats};
use crate::resize::FrameResizer;
use crate::url::StreamUrl;
use std::io::Read;
use std::net::{Shutdown, TcpStream};
use std::sync::Arc;
use std::sync::atomic::{AtomicBool, Ordering};
use std::thread::{self, JoinHandle};
use std::time::Duration;

/// One running MJPEG stream with its own producer thread.
///
/// Dropping the handle stops the producer and joins it.
pub struct StreamHandle {
    label: String,
    cache: Arc<FrameCache>,
    stats: Arc<StreamStats>,
    running: Arc<AtomicBool>,
    socket: Option<TcpStream>,
    worker: Option<JoinHandle<()>>,
}

impl StreamHandle {
    /// Connect to `url` and start receiving.
    ///
    /// Connection and protocol failures are returned here; no thread is
    /// started unless the stream was accepted.
    pub fn open(url: &str, poll_interval: Duration) -> Result<Self, StreamError> {
        let config = StreamConfig::new(StreamUrl::parse(url)?).with_poll_interval(poll_interval);
        Self::open_with_config(&config)
    }

    pub fn open_with_config(config: &StreamConfig) -> Result<Self, StreamError> {
        let (connection, control) = connection::open(config)?;
        let mut handle = Self::spawn(connection, config)?;
        handle.socket = Some(control);
        Ok(handle)
    }

    /// Start a producer over an already accepted connection.
    ///
    /// Without a socket to shut down, closing waits for the source's current
    /// read to return.
    pub fn spawn<R: Read + Send + 'static>(
        connection: StreamConnection<R>,
        config: &StreamConfig,
    ) -> Result<Self, StreamError> {
        let label = config.url.to_string();
        let cache = Arc::new(FrameCache::new());
        if let Some((width, height)) = config.target_resolution {
            cache.set_target_resolution(width, height);
        }
        let stats = Arc::new(StreamStats::default());
        let running = Arc::new(AtomicBool::new(true));

        let ctx = ProducerContext {
            label: label.clone(),
            running: Arc::clone(&running),
            stats: Arc::clone(&stats),
            pacing: FramePacing::new(config.poll_interval),
            publisher: FramePublisher::new(
                Arc::clone(&cache),
                FrameResizer::new(config.resize_filter),
            ),
        };

        let worker = thread::Builder::new()
            .name("mjpeg-producer".to_string())
            .spawn(move || producer::run(connection, ctx))?;

        Ok(Self {
            label,
            cache,
            stats,
            running,
            socket: None,
            worker: Some(worker),
        })
    }

    /// Resize published frames to `width`x`height`; a zero dimension turns
    /// resizing off. Applies from the next published frame.
    pub fn set_target_resolution(&self, width: u32, height: u32) {
        self.cache.set_target_resolution(width, height);
    }

    /// Copy of the most recent frame, or `None` if nothing decoded yet.
    pub fn copy_latest_frame(&self) -> Option<DecodedFrame> {
        self.cache.copy_latest()
    }

    pub fn cache(&self) -> &Arc<FrameCache> {
        &self.cache
    }

    pub fn stats(&self) -> StatsSnapshot {
        self.stats.snapshot()
    }

    pub(crate) fn shared_stats(&self) -> Arc<StreamStats> {
        Arc::clone(&self.stats)
    }

    /// Whether the producer is still receiving.
    pub fn is_running(&self) -> bool {
        self.running.load(Ordering::Acquire)
    }

    pub fn url(&self) -> &str {
        &self.label
    }

    /// Stop the producer and wait for it to exit.
    pub fn close(mut self) {
        self.shutdown();
    }

    fn shutdown(&mut self) {
        let Some(worker) = self.worker.take() else {
            return;
        };

        self.running.store(false, Ordering::Release);
        self.cache.close();
        if let Some(socket) = &self.socket
            && let Err(e) = socket.shutdown(Shutdown::Read)
        {
            tracing::debug!("Socket read shutdown failed: {}", e);
        }

        if worker.join().is_err() {
            tracing::error!(stream = %self.label, "Producer thread panicked");
        }
        self.socket = None;
        tracing::info!(stream = %self.label, "Stream closed");
    }
}

impl Drop for StreamHandle {
    fn drop(&mut self) {
        self.shutdown();
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::decoder::MjpegDecoder;
    use crate::frame::PixelLayout;
    use image::{ImageEncoder, codecs::jpeg::JpegEncoder};
    use std::io::{self, Cursor};

    fn jpeg(width: u32, height: u32) -> Vec<u8> {
        let pixels = vec![40u8; (width * height * 3) as usize];
        let mut out = Vec::new();
        JpegEncoder::new_with_quality(&mut out, 90)
            .write_image(&pixels, width, height, image::ExtendedColorType::Rgb8)
            .unwrap();
        out
    }

    fn accepted<R: Read>(source: R) -> StreamConnection<R> {
        let decoder = Box::new(MjpegDecoder::new(PixelLayout::Rgba).unwrap());
        StreamConnection::handshake(source, 4096, decoder).unwrap()
    }

    fn config() -> StreamConfig {
        StreamConfig::new(StreamUrl::parse("http://127.0.0.1:8000/stream").unwrap())
            .with_poll_interval(Duration::from_millis(1))
    }

    fn single_frame_stream(width: u32, height: u32) -> Vec<u8> {
        let payload = jpeg(width, height);
        let mut bytes = format!(
            "HTTP/1.1 200 OK\r\nContent-Type: multipart/x-mixed-replace; boundary=frame\r\n\r\n\
             --frame\r\nContent-Length: {}\r\n\r\n",
            payload.len()
        )
        .into_bytes();
        bytes.extend(payload);
        bytes.extend_from_slice(b"\r\n");
        bytes
    }

    /// Delivers a prefix, then blocks until the sender is dropped.
    struct Gate {
        prefix: Cursor<Vec<u8>>,
        release: std::sync::mpsc::Receiver<()>,
    }

    impl Read for Gate {
        fn read(&mut self, buf: &mut [u8]) -> io::Result<usize> {
            let n = self.prefix.read(buf)?;
            if n > 0 {
                return Ok(n);
            }
            let _ = self.release.recv();
            Ok(0)
        }
    }

    #[test]
    fn test_spawned_stream_serves_frame_then_stops_at_eof() {
        let handle =
            StreamHandle::spawn(accepted(Cursor::new(single_frame_stream(20, 10))), &config())
                .unwrap();

        let frame = handle
            .cache()
            .wait_for_frame(0, Duration::from_secs(5))
            .expect("frame should be published");
        assert_eq!((frame.width, frame.height), (20, 10));

        for _ in 0..500 {
            if !handle.is_running() {
                break;
            }
            thread::sleep(Duration::from_millis(10));
        }
        assert!(!handle.is_running(), "producer should stop at end of stream");
        assert_eq!(handle.copy_latest_frame().map(|f| f.width), Some(20));
        assert_eq!(handle.stats().frames_published, 1);
        assert_eq!(handle.url(), "http://127.0.0.1:8000/stream");
    }

    #[test]
    fn test_metrics_register_without_provider() {
        let handle =
            StreamHandle::spawn(accepted(Cursor::new(single_frame_stream(8, 8))), &config())
                .unwrap();
        let _metrics = crate::metrics::StreamMetrics::register(&handle);
        assert!(handle.cache().wait_for_frame(0, Duration::from_secs(5)).is_some());
    }

    #[test]
    fn test_target_resolution_from_config() {
        let config = config().with_target_resolution(10, 5);
        let handle =
            StreamHandle::spawn(accepted(Cursor::new(single_frame_stream(40, 20))), &config)
                .unwrap();

        let frame = handle
            .cache()
            .wait_for_frame(0, Duration::from_secs(5))
            .unwrap();
        assert_eq!((frame.width, frame.height), (10, 5));
    }

    #[test]
    fn test_close_joins_producer() {
        let (release, gate) = std::sync::mpsc::channel();
        let source = Gate {
            prefix: Cursor::new(single_frame_stream(8, 8)),
            release: gate,
        };
        let handle = StreamHandle::spawn(accepted(source), &config()).unwrap();
        let cache = Arc::clone(handle.cache());
        assert!(cache.wait_for_frame(0, Duration::from_secs(5)).is_some());
        assert!(handle.is_running(), "producer is parked in a blocking read");

        drop(release);
        handle.close();

        assert!(cache.is_closed());
        assert_eq!(cache.copy_latest().map(|f| f.width), Some(8));
    }
}
