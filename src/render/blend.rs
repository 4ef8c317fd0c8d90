//! Per-pixel blend functions
//!
//! Every mode computes a blended color `B(src, dst)` and mixes it in by source alpha:
//! `out = dst * (1 - a) + B(src, dst) * a`. A source alpha of zero therefore never
//! changes the destination, whatever the mode.

use crate::project::BlendMode;

/// Blend a straight-alpha source pixel onto a destination pixel in place
#[inline]
pub fn blend_pixel(mode: BlendMode, dst: &mut [f32; 4], src: [f32; 4]) {
    let a = src[3].clamp(0.0, 1.0);
    if a <= 0.0 {
        return;
    }

    for c in 0..3 {
        let s = src[c];
        let d = dst[c];
        let blended = match mode {
            BlendMode::Normal => s,
            BlendMode::Add => (s + d).min(1.0),
            BlendMode::Multiply => s * d,
            BlendMode::Screen => 1.0 - (1.0 - s) * (1.0 - d),
        };
        dst[c] = d * (1.0 - a) + blended * a;
    }
    dst[3] = a + dst[3] * (1.0 - a);
}
