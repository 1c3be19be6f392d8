use turbojpeg::{Compressor, Image, PixelFormat, Subsamp};

const JPEG_QUALITY: i32 = 85;
const COUNTER_WRAP: u64 = 1000;
const BACKGROUND: [u8; 3] = [0, 0, 255];
const MARKER: [u8; 3] = [255, 255, 255];

/// Blue test frames with a white bar whose length follows a wrapping counter.
pub struct TestPattern {
    compressor: Compressor,
    size: u32,
    counter: u64,
    rgb: Vec<u8>,
}

impl TestPattern {
    pub fn new(size: u32) -> anyhow::Result<Self> {
        let mut compressor = Compressor::new()?;
        compressor.set_quality(JPEG_QUALITY)?;
        compressor.set_subsamp(Subsamp::Sub2x2)?;

        Ok(Self {
            compressor,
            size,
            counter: 0,
            rgb: vec![0; (size * size * 3) as usize],
        })
    }

    pub fn counter(&self) -> u64 {
        self.counter
    }

    /// Render and encode the current frame, then advance the counter.
    pub fn next_jpeg(&mut self) -> anyhow::Result<Vec<u8>> {
        self.render();
        let size = self.size as usize;
        let jpeg = self.compressor.compress_to_vec(Image {
            pixels: self.rgb.as_slice(),
            width: size,
            pitch: size * 3,
            height: size,
            format: PixelFormat::RGB,
        })?;

        self.counter = (self.counter + 1) % COUNTER_WRAP;
        Ok(jpeg)
    }

    fn render(&mut self) {
        let size = self.size as usize;
        let bar_width = (self.counter as usize * size) / COUNTER_WRAP as usize;
        let bar_rows = (size / 2 - size / 8)..(size / 2 + size / 8);

        for (y, row) in self.rgb.chunks_exact_mut(size * 3).enumerate() {
            for (x, pixel) in row.chunks_exact_mut(3).enumerate() {
                let color = if bar_rows.contains(&y) && x < bar_width {
                    MARKER
                } else {
                    BACKGROUND
                };
                pixel.copy_from_slice(&color);
            }
        }
    }
}
