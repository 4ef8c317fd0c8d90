//! Render module for the software compositing pipeline
//!
//! Layers are warped and blended into a [`Surface`], an RGBA float framebuffer the
//! embedding application presents however it likes.

mod blend;
mod compositor;
pub mod pattern;
mod render_loop;
pub mod shader;

pub use blend::blend_pixel;
pub use compositor::{Compositor, FrameStats, Scene, CLEAR_COLOR};
pub use pattern::{parse_hex_color, PatternContext, PatternProgram};
pub use render_loop::{run_editing_loop, FrameClock, FrameRenderer, RenderLoopConfig};
pub use shader::{ShaderLibrary, ShaderProgram};

use std::sync::Arc;

use image::RgbaImage;
use parking_lot::Mutex;

use crate::error::{ProjectionError, Result};

/// Surface shared between a render loop and whoever presents it
pub type SharedSurface = Arc<Mutex<Surface>>;

/// RGBA float framebuffer, row 0 at the top
#[derive(Debug, Clone)]
pub struct Surface {
    width: u32,
    height: u32,
    pixels: Vec<[f32; 4]>,
    lost: Option<String>,
}

impl Surface {
    pub fn new(width: u32, height: u32) -> Self {
        Self {
            width,
            height,
            pixels: vec![[0.0, 0.0, 0.0, 0.0]; width as usize * height as usize],
            lost: None,
        }
    }

    pub fn width(&self) -> u32 {
        self.width
    }

    pub fn height(&self) -> u32 {
        self.height
    }

    pub fn clear(&mut self, color: [f32; 4]) {
        self.pixels.fill(color);
    }

    pub fn pixel(&self, x: u32, y: u32) -> Option<[f32; 4]> {
        if x >= self.width || y >= self.height {
            return None;
        }
        self.pixels.get(self.index(x, y)).copied()
    }

    pub fn pixel_mut(&mut self, x: u32, y: u32) -> Option<&mut [f32; 4]> {
        if x >= self.width || y >= self.height {
            return None;
        }
        let index = self.index(x, y);
        self.pixels.get_mut(index)
    }

    pub fn pixels(&self) -> &[[f32; 4]] {
        &self.pixels
    }

    #[inline]
    fn index(&self, x: u32, y: u32) -> usize {
        y as usize * self.width as usize + x as usize
    }

    /// Mark the surface as gone, e.g. when its window or display disappears
    pub fn invalidate(&mut self, reason: impl Into<String>) {
        self.lost = Some(reason.into());
    }

    pub fn is_lost(&self) -> bool {
        self.lost.is_some()
    }

    /// Fail with `SurfaceLost` if the surface can no longer be drawn to
    pub fn ensure_usable(&self) -> Result<()> {
        if let Some(reason) = &self.lost {
            return Err(ProjectionError::SurfaceLost(reason.clone()));
        }
        if self.width == 0 || self.height == 0 {
            return Err(ProjectionError::SurfaceLost("surface has zero size".to_string()));
        }
        Ok(())
    }

    /// 8-bit copy for presentation or export
    pub fn to_rgba8(&self) -> RgbaImage {
        let mut raw = Vec::with_capacity(self.pixels.len() * 4);
        for pixel in &self.pixels {
            for channel in pixel {
                raw.push((channel.clamp(0.0, 1.0) * 255.0 + 0.5) as u8);
            }
        }
        RgbaImage::from_raw(self.width, self.height, raw)
            .unwrap_or_else(|| RgbaImage::new(self.width, self.height))
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_surface_clear_and_access() {
        let mut surface = Surface::new(4, 3);
        surface.clear([1.0, 0.0, 0.0, 1.0]);
        assert_eq!(surface.pixel(3, 2), Some([1.0, 0.0, 0.0, 1.0]));
        assert!(surface.pixel(4, 0).is_none());

        if let Some(p) = surface.pixel_mut(0, 0) {
            *p = [0.0, 1.0, 0.0, 1.0];
        }
        let image = surface.to_rgba8();
        assert_eq!(image.get_pixel(0, 0).0, [0, 255, 0, 255]);
        assert_eq!(image.get_pixel(1, 0).0, [255, 0, 0, 255]);
    }

    #[test]
    fn test_lost_surface_reports_error() {
        let mut surface = Surface::new(2, 2);
        assert!(surface.ensure_usable().is_ok());
        surface.invalidate("display unplugged");
        assert!(matches!(
            surface.ensure_usable(),
            Err(ProjectionError::SurfaceLost(_))
        ));
        assert!(Surface::new(0, 10).ensure_usable().is_err());
    }
}
