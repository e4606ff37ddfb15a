use crate::paint::Color;

/// Decoded image pixels: premultiplied RGBA8, tightly packed.
///
/// Pixmaps are shared by `Arc` between the asset cache and the frames whose
/// instructions reference them, so a frame stays rasterizable after its
/// producing context is gone.
#[derive(Debug, Clone, PartialEq)]
pub struct Pixmap {
    width: u32,
    height: u32,
    pixels: Vec<u8>,
}

impl Pixmap {
    /// Builds a pixmap from straight-alpha RGBA8 bytes, premultiplying on the way in.
    pub fn from_rgba8_straight(width: u32, height: u32, pixels: &[u8]) -> Result<Self, String> {
        let expected = width as usize * height as usize * 4;
        if pixels.len() != expected {
            return Err(format!(
                "pixel buffer length {} does not match {}x{} rgba8 ({} bytes)",
                pixels.len(),
                width,
                height,
                expected
            ));
        }

        let mut premul = Vec::with_capacity(expected);
        for px in bytemuck::cast_slice::<u8, [u8; 4]>(pixels) {
            let a = px[3] as u32;
            premul.push(((px[0] as u32 * a + 127) / 255) as u8);
            premul.push(((px[1] as u32 * a + 127) / 255) as u8);
            premul.push(((px[2] as u32 * a + 127) / 255) as u8);
            premul.push(px[3]);
        }

        Ok(Self { width, height, pixels: premul })
    }

    #[inline]
    pub fn width(&self) -> u32 {
        self.width
    }

    #[inline]
    pub fn height(&self) -> u32 {
        self.height
    }

    /// Premultiplied color of the pixel at (x, y). Out-of-range coordinates
    /// are clamped to the edge.
    #[inline]
    pub fn get(&self, x: u32, y: u32) -> Color {
        let x = x.min(self.width.saturating_sub(1));
        let y = y.min(self.height.saturating_sub(1));
        let i = (y as usize * self.width as usize + x as usize) * 4;
        let px: [u8; 4] = [
            self.pixels[i],
            self.pixels[i + 1],
            self.pixels[i + 2],
            self.pixels[i + 3],
        ];
        Color::from_premul(
            px[0] as f32 / 255.0,
            px[1] as f32 / 255.0,
            px[2] as f32 / 255.0,
            px[3] as f32 / 255.0,
        )
    }
}
