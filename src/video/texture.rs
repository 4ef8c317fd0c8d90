//! CPU textures with optional mip chains
//!
//! Pixels are straight-alpha RGBA in linear [0, 1] floats. Power-of-two textures get a
//! full box-filtered mip chain and repeat addressing; anything else keeps a single level
//! and clamps at the edges.

use image::RgbaImage;

/// How texture coordinates outside [0, 1] are resolved
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum AddressMode {
    Clamp,
    Repeat,
}

#[derive(Debug, Clone)]
struct MipLevel {
    width: u32,
    height: u32,
    pixels: Vec<[f32; 4]>,
}

impl MipLevel {
    fn texel(&self, x: i64, y: i64, mode: AddressMode) -> [f32; 4] {
        let (w, h) = (self.width as i64, self.height as i64);
        let (x, y) = match mode {
            AddressMode::Clamp => (x.clamp(0, w - 1), y.clamp(0, h - 1)),
            AddressMode::Repeat => (x.rem_euclid(w), y.rem_euclid(h)),
        };
        self.pixels[(y * w + x) as usize]
    }

    /// Half-size level by 2x2 box filter
    fn downsample(&self) -> MipLevel {
        let width = (self.width / 2).max(1);
        let height = (self.height / 2).max(1);
        let mut pixels = Vec::with_capacity((width * height) as usize);
        for y in 0..height {
            for x in 0..width {
                let mut sum = [0.0f32; 4];
                for (dx, dy) in [(0, 0), (1, 0), (0, 1), (1, 1)] {
                    let sx = (x * 2 + dx).min(self.width - 1);
                    let sy = (y * 2 + dy).min(self.height - 1);
                    let p = self.pixels[(sy * self.width + sx) as usize];
                    for c in 0..4 {
                        sum[c] += p[c];
                    }
                }
                pixels.push(sum.map(|s| s * 0.25));
            }
        }
        MipLevel {
            width,
            height,
            pixels,
        }
    }
}

/// A sampled layer texture
#[derive(Debug, Clone)]
pub struct Texture {
    levels: Vec<MipLevel>,
    address_mode: AddressMode,
}

impl Texture {
    /// Build from tightly packed 8-bit RGBA. Returns `None` for empty or short buffers.
    pub fn from_rgba8(width: u32, height: u32, data: &[u8]) -> Option<Self> {
        let count = (width as usize).checked_mul(height as usize)?;
        if count == 0 || data.len() < count * 4 {
            return None;
        }
        let pixels = data
            .chunks_exact(4)
            .take(count)
            .map(|p| {
                [
                    p[0] as f32 / 255.0,
                    p[1] as f32 / 255.0,
                    p[2] as f32 / 255.0,
                    p[3] as f32 / 255.0,
                ]
            })
            .collect();
        Some(Self::from_pixels(width, height, pixels))
    }

    pub fn from_image(image: &RgbaImage) -> Option<Self> {
        Self::from_rgba8(image.width(), image.height(), image.as_raw())
    }

    /// Single-color texture, handy for tests and placeholders
    pub fn solid(width: u32, height: u32, color: [f32; 4]) -> Self {
        let width = width.max(1);
        let height = height.max(1);
        Self::from_pixels(width, height, vec![color; (width * height) as usize])
    }

    fn from_pixels(width: u32, height: u32, pixels: Vec<[f32; 4]>) -> Self {
        let base = MipLevel {
            width,
            height,
            pixels,
        };
        let power_of_two = width.is_power_of_two() && height.is_power_of_two();

        let mut levels = vec![base];
        if power_of_two {
            while let Some(last) = levels.last() {
                if last.width == 1 && last.height == 1 {
                    break;
                }
                let next = last.downsample();
                levels.push(next);
            }
        }

        Self {
            levels,
            address_mode: if power_of_two {
                AddressMode::Repeat
            } else {
                AddressMode::Clamp
            },
        }
    }

    pub fn width(&self) -> u32 {
        self.levels[0].width
    }

    pub fn height(&self) -> u32 {
        self.levels[0].height
    }

    pub fn mip_level_count(&self) -> usize {
        self.levels.len()
    }

    pub fn address_mode(&self) -> AddressMode {
        self.address_mode
    }

    /// Level of detail for drawing this texture across `pixels_wide` x `pixels_high`
    pub fn lod_for(&self, pixels_wide: f64, pixels_high: f64) -> f32 {
        if self.levels.len() == 1 || pixels_wide <= 0.0 || pixels_high <= 0.0 {
            return 0.0;
        }
        let ratio = (self.width() as f64 / pixels_wide).max(self.height() as f64 / pixels_high);
        (ratio.log2().max(0.0) as f32).min((self.levels.len() - 1) as f32)
    }

    /// Bilinear sample at normalized coordinates from the nearest mip level
    pub fn sample(&self, u: f32, v: f32, lod: f32) -> [f32; 4] {
        let index = (lod.max(0.0).round() as usize).min(self.levels.len() - 1);
        let level = &self.levels[index];

        let x = u * level.width as f32 - 0.5;
        let y = v * level.height as f32 - 0.5;
        let x0 = x.floor();
        let y0 = y.floor();
        let fx = x - x0;
        let fy = y - y0;
        let (x0, y0) = (x0 as i64, y0 as i64);

        let mode = self.address_mode;
        let p00 = level.texel(x0, y0, mode);
        let p10 = level.texel(x0 + 1, y0, mode);
        let p01 = level.texel(x0, y0 + 1, mode);
        let p11 = level.texel(x0 + 1, y0 + 1, mode);

        let mut out = [0.0f32; 4];
        for c in 0..4 {
            let top = p00[c] + (p10[c] - p00[c]) * fx;
            let bottom = p01[c] + (p11[c] - p01[c]) * fx;
            out[c] = top + (bottom - top) * fy;
        }
        out
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_power_of_two_has_mip_chain() {
        let texture = Texture::solid(8, 4, [1.0, 0.0, 0.0, 1.0]);
        // 8x4, 4x2, 2x1, 1x1
        assert_eq!(texture.mip_level_count(), 4);
        assert_eq!(texture.address_mode(), AddressMode::Repeat);
    }

    #[test]
    fn test_non_power_of_two_clamps_without_mips() {
        let texture = Texture::solid(640, 480, [0.0, 1.0, 0.0, 1.0]);
        assert_eq!(texture.mip_level_count(), 1);
        assert_eq!(texture.address_mode(), AddressMode::Clamp);
        assert_eq!(texture.lod_for(10.0, 10.0), 0.0);
    }

    #[test]
    fn test_sample_texel_centers() {
        // 3x1: black, white, white
        let data: [u8; 12] = [0, 0, 0, 255, 255, 255, 255, 255, 255, 255, 255, 255];
        let texture = Texture::from_rgba8(3, 1, &data).unwrap();
        let left = texture.sample(1.0 / 6.0, 0.5, 0.0);
        assert!(left[0].abs() < 1e-6);
        let middle = texture.sample(0.5, 0.5, 0.0);
        assert!((middle[0] - 1.0).abs() < 1e-6);
        let between = texture.sample(1.0 / 3.0, 0.5, 0.0);
        assert!((between[0] - 0.5).abs() < 1e-6);
    }

    #[test]
    fn test_mip_levels_average() {
        let mut data = Vec::new();
        for i in 0..4 {
            let value = if i % 2 == 0 { 0 } else { 255 };
            data.extend_from_slice(&[value, value, value, 255]);
        }
        let texture = Texture::from_rgba8(2, 2, &data).unwrap();
        assert_eq!(texture.mip_level_count(), 2);
        let coarse = texture.sample(0.5, 0.5, 1.0);
        assert!((coarse[0] - 0.5).abs() < 1e-6);
        assert_eq!(texture.lod_for(1.0, 1.0), 1.0);
    }

    #[test]
    fn test_rejects_short_buffer() {
        assert!(Texture::from_rgba8(2, 2, &[0; 8]).is_none());
        assert!(Texture::from_rgba8(0, 2, &[]).is_none());
    }
}
