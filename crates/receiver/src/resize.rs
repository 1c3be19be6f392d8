use crate::errors::StreamError;
use crate::frame::DecodedFrame;
use common::span_debug;
use fast_image_resize::{
    FilterType, PixelType, ResizeAlg, ResizeOptions, Resizer,
    images::{Image, ImageRef},
};
use std::str::FromStr;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub enum ResizeFilter {
    Box,
    Bilinear,
    #[default]
    Lanczos3,
}

impl ResizeFilter {
    fn algorithm(self) -> ResizeAlg {
        let filter = match self {
            ResizeFilter::Box => FilterType::Box,
            ResizeFilter::Bilinear => FilterType::Bilinear,
            ResizeFilter::Lanczos3 => FilterType::Lanczos3,
        };
        ResizeAlg::Convolution(filter)
    }
}

impl FromStr for ResizeFilter {
    type Err = String;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.to_lowercase().as_str() {
            "box" => Ok(ResizeFilter::Box),
            "bilinear" => Ok(ResizeFilter::Bilinear),
            "lanczos" | "lanczos3" => Ok(ResizeFilter::Lanczos3),
            other => Err(format!(
                "unknown resize filter '{other}', use box, bilinear or lanczos3"
            )),
        }
    }
}

/// Scales packed 4-byte frames to a fixed target size.
///
/// Output depends only on the source pixels, the target size and the filter,
/// so resizing the same frame twice yields identical bytes.
pub struct FrameResizer {
    resizer: Resizer,
    options: ResizeOptions,
}

impl FrameResizer {
    pub fn new(filter: ResizeFilter) -> Self {
        Self {
            resizer: Resizer::new(),
            options: ResizeOptions::new().resize_alg(filter.algorithm()),
        }
    }

    /// Resize `frame` to `width`x`height`. The timestamp is carried over.
    pub fn resize(
        &mut self,
        frame: &DecodedFrame,
        width: u32,
        height: u32,
    ) -> Result<DecodedFrame, StreamError> {
        let _s = span_debug!("resize");

        if width == 0 || height == 0 {
            return Err(StreamError::Resize(format!(
                "target {width}x{height} has no pixels"
            )));
        }

        let src = ImageRef::new(frame.width, frame.height, &frame.pixels, PixelType::U8x4)
            .map_err(|e| StreamError::Resize(e.to_string()))?;
        let mut dst = Image::new(width, height, PixelType::U8x4);

        self.resizer
            .resize(&src, &mut dst, &self.options)
            .map_err(|e| StreamError::Resize(e.to_string()))?;

        Ok(DecodedFrame {
            pixels: dst.into_vec(),
            width,
            height,
            timestamp_ms: frame.timestamp_ms,
        })
    }
}

impl Default for FrameResizer {
    fn default() -> Self {
        Self::new(ResizeFilter::default())
    }
}
