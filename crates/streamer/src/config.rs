use common::var_or;
use std::fmt;
use std::str::FromStr;

pub use common::Environment;

/// How each frame is laid out on the wire.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub enum Framing {
    /// Part headers carry `Content-Length`.
    #[default]
    ContentLength,
    /// No `Content-Length`; clients must scan for the next delimiter.
    BoundaryOnly,
    /// The delimiter goes out in its own transfer chunk, so clients see a
    /// chunk-size line right after every delimiter.
    SplitChunks,
}

impl FromStr for Framing {
    type Err = String;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.trim().to_ascii_lowercase().as_str() {
            "content-length" => Ok(Framing::ContentLength),
            "boundary-only" => Ok(Framing::BoundaryOnly),
            "split-chunks" => Ok(Framing::SplitChunks),
            other => Err(format!(
                "unknown framing '{other}', expected content-length, boundary-only or split-chunks"
            )),
        }
    }
}

impl fmt::Display for Framing {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(match self {
            Framing::ContentLength => "content-length",
            Framing::BoundaryOnly => "boundary-only",
            Framing::SplitChunks => "split-chunks",
        })
    }
}

#[derive(Debug, Clone)]
pub struct StreamerConfig {
    pub environment: Environment,
    pub port: u16,
    pub fps: u32,
    pub framing: Framing,
    /// Width and height of the generated square frames.
    pub size: u32,
}

impl StreamerConfig {
    pub fn from_env() -> anyhow::Result<Self> {
        let fps = var_or("STREAMER_FPS", 30u32);
        let size = var_or("STREAMER_SIZE", 128u32);
        anyhow::ensure!(fps > 0, "STREAMER_FPS must be positive");
        anyhow::ensure!(size >= 8, "STREAMER_SIZE must be at least 8");

        Ok(Self {
            environment: Environment::from_env(),
            port: var_or("STREAMER_PORT", 8000),
            fps,
            framing: var_or("STREAMER_FRAMING", Framing::default()),
            size,
        })
    }
}
