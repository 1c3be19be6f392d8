use std::str::FromStr;
use std::time::{SystemTime, UNIX_EPOCH};

pub const BYTES_PER_PIXEL: usize = 4;

/// Byte order of the packed 32-bit pixels handed to consumers.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub enum PixelLayout {
    #[default]
    Rgba,
    /// Alternate packing for consumers that reinterpret pixels as
    /// little-endian `0xAARRGGBB` words.
    Bgra,
}

impl PixelLayout {
    pub(crate) fn turbojpeg_format(self) -> turbojpeg::PixelFormat {
        match self {
            PixelLayout::Rgba => turbojpeg::PixelFormat::RGBA,
            PixelLayout::Bgra => turbojpeg::PixelFormat::BGRA,
        }
    }

    /// Pack one RGB triple with opaque alpha.
    pub fn pack(self, r: u8, g: u8, b: u8) -> [u8; BYTES_PER_PIXEL] {
        match self {
            PixelLayout::Rgba => [r, g, b, u8::MAX],
            PixelLayout::Bgra => [b, g, r, u8::MAX],
        }
    }
}

impl FromStr for PixelLayout {
    type Err = String;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.to_lowercase().as_str() {
            "rgba" => Ok(PixelLayout::Rgba),
            "bgra" => Ok(PixelLayout::Bgra),
            other => Err(format!("unknown pixel layout '{other}', use rgba or bgra")),
        }
    }
}

/// One decoded image, 4 bytes per pixel, rows tightly packed.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct DecodedFrame {
    pub pixels: Vec<u8>,
    pub width: u32,
    pub height: u32,
    /// Wall-clock milliseconds since the Unix epoch at decode time.
    pub timestamp_ms: u64,
}

impl DecodedFrame {
    pub fn byte_size(&self) -> usize {
        self.pixels.len()
    }

    /// Milliseconds between decode and `now_ms`; zero if the clock went backwards.
    pub fn age_ms(&self, now_ms: u64) -> u64 {
        now_ms.saturating_sub(self.timestamp_ms)
    }
}

pub fn unix_time_ms() -> u64 {
    SystemTime::now()
        .duration_since(UNIX_EPOCH)
        .map(|d| d.as_millis() as u64)
        .unwrap_or_default()
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_pack_layouts() {
        assert_eq!(PixelLayout::Rgba.pack(1, 2, 3), [1, 2, 3, 255]);
        assert_eq!(PixelLayout::Bgra.pack(1, 2, 3), [3, 2, 1, 255]);
    }

    #[test]
    fn test_layout_from_str() {
        assert_eq!("RGBA".parse::<PixelLayout>(), Ok(PixelLayout::Rgba));
        assert_eq!("bgra".parse::<PixelLayout>(), Ok(PixelLayout::Bgra));
        assert!("argb".parse::<PixelLayout>().is_err());
    }

    #[test]
    fn test_age_saturates() {
        let frame = DecodedFrame {
            pixels: vec![0; 4],
            width: 1,
            height: 1,
            timestamp_ms: 1_000,
        };
        assert_eq!(frame.age_ms(1_250), 250);
        assert_eq!(frame.age_ms(500), 0);
        assert_eq!(frame.byte_size(), 4);
    }
}
