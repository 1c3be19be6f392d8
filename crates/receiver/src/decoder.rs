use crate::errors::StreamError;
use crate::frame::{BYTES_PER_PIXEL, DecodedFrame, PixelLayout, unix_time_ms};
use common::span;
use std::path::{Path, PathBuf};

/// Largest decoded frame accepted, in pixels. Headers above this are
/// rejected before any output buffer is allocated.
pub const MAX_DECODED_PIXELS: usize = 8192 * 8192;

/// Trait for decoding one compressed payload into a packed 4-byte frame.
pub trait FrameDecoder: Send {
    fn decode(&mut self, payload: &[u8]) -> Result<DecodedFrame, StreamError>;
}

/// JPEG decoder using turbojpeg (libjpeg-turbo).
///
/// Dimensions always come from the JPEG header before the output buffer is
/// allocated. If the decompressor refuses the packed 4-byte format, the
/// frame is decoded to RGB and packed by hand.
pub struct MjpegDecoder {
    decompressor: turbojpeg::Decompressor,
    layout: PixelLayout,
    rgb_buffer: Vec<u8>,
    diagnostics_dir: Option<PathBuf>,
}

impl MjpegDecoder {
    pub fn new(layout: PixelLayout) -> Result<Self, StreamError> {
        Ok(Self {
            decompressor: turbojpeg::Decompressor::new()?,
            layout,
            rgb_buffer: Vec::new(),
            diagnostics_dir: None,
        })
    }

    /// Persist payloads that fail to decode under `dir` for offline inspection.
    pub fn with_diagnostics(mut self, dir: Option<PathBuf>) -> Self {
        self.diagnostics_dir = dir;
        self
    }

    pub fn layout(&self) -> PixelLayout {
        self.layout
    }

    fn decode_pixels(&mut self, payload: &[u8]) -> Result<(Vec<u8>, u32, u32), StreamError> {
        let header = self.decompressor.read_header(payload)?;
        let (width, height) = (header.width, header.height);
        if width == 0 || height == 0 {
            return Err(StreamError::Decode(format!(
                "JPEG header reports {width}x{height}"
            )));
        }

        if width.saturating_mul(height) > MAX_DECODED_PIXELS {
            return Err(StreamError::Decode(format!(
                "JPEG header reports {width}x{height}, above the {MAX_DECODED_PIXELS} pixel limit"
            )));
        }

        let mut pixels = zeroed(width * height * BYTES_PER_PIXEL)?;
        let output = turbojpeg::Image {
            pixels: pixels.as_mut_slice(),
            width,
            pitch: width * BYTES_PER_PIXEL,
            height,
            format: self.layout.turbojpeg_format(),
        };

        if let Err(e) = self.decompressor.decompress(payload, output) {
            tracing::debug!(error = %e, "Packed decode rejected, retrying through RGB");
            self.decode_rgb_into(payload, width, height, &mut pixels)?;
        }

        Ok((pixels, width as u32, height as u32))
    }

    fn decode_rgb_into(
        &mut self,
        payload: &[u8],
        width: usize,
        height: usize,
        pixels: &mut [u8],
    ) -> Result<(), StreamError> {
        let rgb_size = width * height * 3;
        if self.rgb_buffer.len() < rgb_size {
            self.rgb_buffer
                .try_reserve_exact(rgb_size - self.rgb_buffer.len())
                .map_err(|e| StreamError::Decode(format!("RGB buffer allocation failed: {e}")))?;
            self.rgb_buffer.resize(rgb_size, 0);
        }

        let output = turbojpeg::Image {
            pixels: &mut self.rgb_buffer[..rgb_size],
            width,
            pitch: width * 3,
            height,
            format: turbojpeg::PixelFormat::RGB,
        };
        self.decompressor.decompress(payload, output)?;

        pack_rgb(&self.rgb_buffer[..rgb_size], self.layout, pixels);
        Ok(())
    }
}

impl FrameDecoder for MjpegDecoder {
    fn decode(&mut self, payload: &[u8]) -> Result<DecodedFrame, StreamError> {
        let _s = span!("decode");

        match self.decode_pixels(payload) {
            Ok((pixels, width, height)) => Ok(DecodedFrame {
                pixels,
                width,
                height,
                timestamp_ms: unix_time_ms(),
            }),
            Err(e) => {
                if let Some(dir) = &self.diagnostics_dir {
                    dump_failed_payload(dir, payload);
                }
                Err(e)
            }
        }
    }
}

fn zeroed(len: usize) -> Result<Vec<u8>, StreamError> {
    let mut buffer = Vec::new();
    buffer
        .try_reserve_exact(len)
        .map_err(|e| StreamError::Decode(format!("frame buffer allocation failed: {e}")))?;
    buffer.resize(len, 0);
    Ok(buffer)
}

/// Expand tightly packed RGB into `out` using `layout`, alpha opaque.
pub fn pack_rgb(rgb: &[u8], layout: PixelLayout, out: &mut [u8]) {
    for (src, dst) in rgb
        .chunks_exact(3)
        .zip(out.chunks_exact_mut(BYTES_PER_PIXEL))
    {
        dst.copy_from_slice(&layout.pack(src[0], src[1], src[2]));
    }
}

/// Write the payload on a detached thread; failures are only logged.
fn dump_failed_payload(dir: &Path, payload: &[u8]) {
    let dir = dir.to_path_buf();
    let path = dir.join(format!("failed_frame_{}.jpg", unix_time_ms()));
    let payload = payload.to_vec();

    let spawned = std::thread::Builder::new()
        .name("decode-dump".into())
        .spawn(move || {
            let result =
                std::fs::create_dir_all(&dir).and_then(|_| std::fs::write(&path, &payload));
            match result {
                Ok(()) => tracing::debug!(path = %path.display(), "Saved undecodable payload"),
                Err(e) => tracing::debug!(path = %path.display(), error = %e, "Could not save undecodable payload"),
            }
        });

    if let Err(e) = spawned {
        tracing::debug!(error = %e, "Could not spawn diagnostics writer");
    }
}
