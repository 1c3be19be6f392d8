pub mod buffer;
pub mod config;
pub mod connection;
pub mod decoder;
pub mod demux;
pub mod errors;
pub mod frame;
pub mod frame_cache;
pub mod http;
pub mod logging;
pub mod metrics;
pub mod pacing;
pub mod producer;
pub mod resize;
pub mod stream;
pub mod transport;
pub mod url;

pub use config::StreamConfig;
pub use decoder::{FrameDecoder, MjpegDecoder};
pub use errors::{ProtocolError, StreamError};
pub use frame::{DecodedFrame, PixelLayout};
pub use frame_cache::{BorrowedFrame, FrameCache, PublishOutcome};
pub use metrics::StreamMetrics;
pub use producer::StatsSnapshot;
pub use resize::{FrameResizer, ResizeFilter};
pub use stream::StreamHandle;
pub use url::StreamUrl;
