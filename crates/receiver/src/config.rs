use crate::buffer::DEFAULT_CAPACITY;
use crate::frame::PixelLayout;
use crate::pacing::DEFAULT_POLL_INTERVAL;
use crate::resize::ResizeFilter;
use crate::url::StreamUrl;
use anyhow::Context;
use common::var_or;
use std::env;
use std::path::PathBuf;
use std::time::Duration;

pub use common::Environment;

const DEFAULT_CONNECT_TIMEOUT: Duration = Duration::from_millis(5000);
const DEFAULT_OPEN_RETRIES: u32 = 5;

#[derive(Debug, Clone)]
pub struct StreamConfig {
    pub environment: Environment,
    pub url: StreamUrl,
    pub poll_interval: Duration,
    pub target_resolution: Option<(u32, u32)>,
    pub buffer_capacity: usize,
    pub connect_timeout: Duration,
    pub read_timeout: Option<Duration>,
    pub pixel_layout: PixelLayout,
    pub resize_filter: ResizeFilter,
    pub diagnostics_dir: Option<PathBuf>,
    pub otel_endpoint: Option<String>,
    pub open_retries: u32,
}

impl StreamConfig {
    /// Defaults for everything except the URL.
    pub fn new(url: StreamUrl) -> Self {
        Self {
            environment: Environment::default(),
            url,
            poll_interval: DEFAULT_POLL_INTERVAL,
            target_resolution: None,
            buffer_capacity: DEFAULT_CAPACITY,
            connect_timeout: DEFAULT_CONNECT_TIMEOUT,
            read_timeout: None,
            pixel_layout: PixelLayout::default(),
            resize_filter: ResizeFilter::default(),
            diagnostics_dir: None,
            otel_endpoint: None,
            open_retries: DEFAULT_OPEN_RETRIES,
        }
    }

    pub fn from_env() -> anyhow::Result<Self> {
        let raw_url = env::var("STREAM_URL").context("STREAM_URL must be set")?;
        let url = StreamUrl::parse(&raw_url)?;

        let target_resolution = match (
            optional_var::<u32>("TARGET_WIDTH"),
            optional_var::<u32>("TARGET_HEIGHT"),
        ) {
            (Some(w), Some(h)) if w > 0 && h > 0 => Some((w, h)),
            _ => None,
        };

        Ok(Self {
            environment: Environment::from_env(),
            url,
            poll_interval: Duration::from_millis(var_or(
                "POLL_INTERVAL_MS",
                DEFAULT_POLL_INTERVAL.as_millis() as u64,
            )),
            target_resolution,
            buffer_capacity: var_or("RECV_BUFFER_SIZE", DEFAULT_CAPACITY),
            connect_timeout: Duration::from_millis(var_or(
                "CONNECT_TIMEOUT_MS",
                DEFAULT_CONNECT_TIMEOUT.as_millis() as u64,
            )),
            read_timeout: optional_var::<u64>("READ_TIMEOUT_MS")
                .filter(|&ms| ms > 0)
                .map(Duration::from_millis),
            pixel_layout: var_or("PIXEL_LAYOUT", PixelLayout::default()),
            resize_filter: var_or("RESIZE_FILTER", ResizeFilter::default()),
            diagnostics_dir: env::var_os("DECODE_DUMP_DIR").map(PathBuf::from),
            otel_endpoint: env::var("OTEL_EXPORTER_OTLP_ENDPOINT").ok(),
            open_retries: var_or("OPEN_RETRIES", DEFAULT_OPEN_RETRIES),
        })
    }

    pub fn with_poll_interval(mut self, interval: Duration) -> Self {
        self.poll_interval = interval;
        self
    }

    pub fn with_target_resolution(mut self, width: u32, height: u32) -> Self {
        self.target_resolution = (width > 0 && height > 0).then_some((width, height));
        self
    }

    pub fn with_buffer_capacity(mut self, capacity: usize) -> Self {
        self.buffer_capacity = capacity;
        self
    }

    pub fn with_timeouts(mut self, connect: Duration, read: Option<Duration>) -> Self {
        self.connect_timeout = connect;
        self.read_timeout = read;
        self
    }

    pub fn with_pixel_layout(mut self, layout: PixelLayout) -> Self {
        self.pixel_layout = layout;
        self
    }

    pub fn with_resize_filter(mut self, filter: ResizeFilter) -> Self {
        self.resize_filter = filter;
        self
    }

    pub fn with_diagnostics_dir(mut self, dir: impl Into<PathBuf>) -> Self {
        self.diagnostics_dir = Some(dir.into());
        self
    }
}

fn optional_var<T: std::str::FromStr>(name: &str) -> Option<T> {
    env::var(name).ok().and_then(|s| s.trim().parse().ok())
}
