//! Compositor for rendering layers onto calibrated quads
//!
//! Each visible layer becomes one quad: the canonical unit quad is warped by its
//! geometry's homography, then by the layer's affine transform, and rasterized by
//! inverse-mapping every covered pixel back into layer space.

use std::collections::{HashMap, HashSet};

use glam::DVec2;

use crate::calibration::homography::UNIT_QUAD;
use crate::calibration::{solve_unit_quad, Homography, HomographySolution};
use crate::error::Result;
use crate::project::{Geometry, GlobalSettings, Layer, LayerGroup, LayerKind, Project, Vec2};
use crate::render::blend::blend_pixel;
use crate::render::pattern::{PatternContext, PatternProgram};
use crate::render::shader::{PreparedShader, ShaderLibrary};
use crate::render::Surface;
use crate::video::{Texture, TextureCache};

/// Opaque black, what an unlit projector shows
pub const CLEAR_COLOR: [f32; 4] = [0.0, 0.0, 0.0, 1.0];

/// Inside test tolerance in layer space
const EDGE_EPSILON: f64 = 1e-9;

/// Everything one frame draws, borrowed for the duration of a render call
#[derive(Debug, Clone, Copy)]
pub struct Scene<'a> {
    pub layers: &'a [Layer],
    pub geometries: &'a [Geometry],
    pub groups: &'a [LayerGroup],
    pub global: &'a GlobalSettings,
}

impl<'a> Scene<'a> {
    pub fn from_project(project: &'a Project) -> Self {
        Self {
            layers: project.layers(),
            geometries: project.geometries(),
            groups: project.groups(),
            global: project.global(),
        }
    }
}

/// Per-frame counters
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct FrameStats {
    pub layers_drawn: usize,
    pub layers_skipped: usize,
    /// Layers drawn with a fallback homography
    pub unreliable_geometries: usize,
}

struct CachedHomography {
    corners: [Vec2; 4],
    solution: HomographySolution,
}

/// Where a layer's colors come from for one draw
enum LayerSource<'a> {
    Texture(&'a Texture),
    Flat([f32; 4]),
    Pattern(PatternProgram),
    Shader(PreparedShader),
}

/// Quad corners and derived sizes in surface pixels
struct ProjectedQuad {
    inverse: Homography,
    min: (u32, u32),
    max: (u32, u32),
    canvas: (f64, f64),
}

/// Software compositor
pub struct Compositor {
    homographies: HashMap<String, CachedHomography>,
    shaders: ShaderLibrary,
    /// Layers already warned about, so a bad layer logs once instead of every frame
    warned: HashSet<String>,
}

impl Default for Compositor {
    fn default() -> Self {
        Self::new()
    }
}

impl Compositor {
    pub fn new() -> Self {
        Self::with_shaders(ShaderLibrary::default())
    }

    pub fn with_shaders(shaders: ShaderLibrary) -> Self {
        Self {
            homographies: HashMap::new(),
            shaders,
            warned: HashSet::new(),
        }
    }

    pub fn shaders(&self) -> &ShaderLibrary {
        &self.shaders
    }

    /// Number of memoized geometry homographies
    pub fn cached_homographies(&self) -> usize {
        self.homographies.len()
    }

    /// Homography for a geometry, solved only when its corners changed
    pub fn homography_for(&mut self, geometry: &Geometry) -> HomographySolution {
        let corners = geometry.corners();
        if let Some(cached) = self.homographies.get(&geometry.id) {
            if cached.corners == corners {
                return cached.solution;
            }
        }
        let solution = solve_unit_quad(corners);
        if !solution.reliable {
            log::warn!(
                "Geometry '{}' is degenerate, drawing with a fallback transform",
                geometry.name
            );
        }
        self.homographies
            .insert(geometry.id.clone(), CachedHomography { corners, solution });
        solution
    }

    /// Clear the surface and draw every visible layer back to front
    pub fn render(
        &mut self,
        surface: &mut Surface,
        scene: &Scene<'_>,
        textures: &TextureCache,
        time: f32,
    ) -> Result<FrameStats> {
        surface.ensure_usable()?;
        surface.clear(CLEAR_COLOR);

        let geometries: HashMap<&str, &Geometry> = scene
            .geometries
            .iter()
            .map(|g| (g.id.as_str(), g))
            .collect();
        let groups: HashMap<&str, &LayerGroup> =
            scene.groups.iter().map(|g| (g.id.as_str(), g)).collect();

        self.homographies
            .retain(|id, _| geometries.contains_key(id.as_str()));

        let mut ordered: Vec<&Layer> = scene.layers.iter().collect();
        ordered.sort_by_key(|layer| layer.order);

        let color_scale = scene.global.color_scale();
        let mut stats = FrameStats::default();

        for layer in ordered {
            let Some(geometry) = geometries.get(layer.geometry_id.as_str()) else {
                stats.layers_skipped += 1;
                continue;
            };
            let group = layer
                .group_id
                .as_deref()
                .and_then(|id| groups.get(id).copied());

            let group_visible = group.map_or(true, |g| g.visible);
            let opacity = layer.opacity.clamp(0.0, 1.0)
                * group.map_or(1.0, |g| g.opacity.clamp(0.0, 1.0));
            if !layer.visible || !geometry.visible || !group_visible || opacity <= 0.0 {
                stats.layers_skipped += 1;
                continue;
            }

            let Some(source) = self.layer_source(layer, textures) else {
                stats.layers_skipped += 1;
                continue;
            };

            let solution = self.homography_for(geometry);
            let Some(quad) = project_quad(surface, layer, solution.homography) else {
                log::debug!("Layer '{}' projects to nothing", layer.name);
                stats.layers_skipped += 1;
                continue;
            };

            draw_quad(surface, layer, &quad, &source, opacity, color_scale, time);
            stats.layers_drawn += 1;
            if !solution.reliable {
                stats.unreliable_geometries += 1;
            }
        }

        Ok(stats)
    }

    fn layer_source<'t>(&mut self, layer: &Layer, textures: &'t TextureCache) -> Option<LayerSource<'t>> {
        match &layer.kind {
            LayerKind::Image(_) | LayerKind::Video(_) => textures.texture(&layer.id).map(LayerSource::Texture),
            LayerKind::Color(content) => Some(LayerSource::Flat(content.color.to_array())),
            LayerKind::Pattern(content) => match PatternProgram::new(content) {
                Ok(program) => Some(LayerSource::Pattern(program)),
                Err(message) => {
                    self.warn_once(layer, &message);
                    None
                }
            },
            LayerKind::Shader(content) => match self.shaders.prepare(content) {
                Ok(shader) => Some(LayerSource::Shader(shader)),
                Err(message) => {
                    self.warn_once(layer, &message);
                    None
                }
            },
        }
    }

    fn warn_once(&mut self, layer: &Layer, message: &str) {
        let key = format!("{}:{}", layer.id, message);
        if self.warned.insert(key) {
            log::warn!("Skipping layer '{}': {}", layer.name, message);
        }
    }
}

/// Surface pixel center to NDC, y up
fn pixel_to_ndc(x: u32, y: u32, width: u32, height: u32) -> DVec2 {
    DVec2::new(
        (x as f64 + 0.5) / width as f64 * 2.0 - 1.0,
        1.0 - (y as f64 + 0.5) / height as f64 * 2.0,
    )
}

fn ndc_to_pixel(p: DVec2, width: u32, height: u32) -> DVec2 {
    DVec2::new(
        (p.x + 1.0) * 0.5 * width as f64,
        (1.0 - p.y) * 0.5 * height as f64,
    )
}

fn project_quad(surface: &Surface, layer: &Layer, homography: Homography) -> Option<ProjectedQuad> {
    let (w, h) = (surface.width(), surface.height());
    let forward = Homography::from_mat3(layer.transform.affine_matrix()) * homography;
    let inverse = forward.inverse()?;

    let mut corners = [DVec2::ZERO; 4];
    let mut bounded = true;
    for (slot, corner) in corners.iter_mut().zip(UNIT_QUAD) {
        match forward.transform_point(corner) {
            Some(p) if p.is_finite() => *slot = ndc_to_pixel(p, w, h),
            _ => bounded = false,
        }
    }

    let (min, max) = if bounded {
        let lo = corners.iter().fold(DVec2::splat(f64::INFINITY), |a, c| a.min(*c));
        let hi = corners.iter().fold(DVec2::splat(f64::NEG_INFINITY), |a, c| a.max(*c));
        if hi.x <= 0.0 || hi.y <= 0.0 || lo.x >= w as f64 || lo.y >= h as f64 {
            return None;
        }
        (
            (lo.x.floor().max(0.0) as u32, lo.y.floor().max(0.0) as u32),
            ((hi.x.ceil() as u32).min(w), (hi.y.ceil() as u32).min(h)),
        )
    } else {
        // Quad crosses the line at infinity; scan the whole surface
        ((0, 0), (w, h))
    };

    let canvas = if bounded {
        let top = corners[3].distance(corners[2]);
        let bottom = corners[0].distance(corners[1]);
        let left = corners[0].distance(corners[3]);
        let right = corners[1].distance(corners[2]);
        (((top + bottom) * 0.5).max(1.0), ((left + right) * 0.5).max(1.0))
    } else {
        (w as f64, h as f64)
    };

    Some(ProjectedQuad {
        inverse,
        min,
        max,
        canvas,
    })
}

fn draw_quad(
    surface: &mut Surface,
    layer: &Layer,
    quad: &ProjectedQuad,
    source: &LayerSource<'_>,
    opacity: f32,
    color_scale: [f32; 3],
    time: f32,
) {
    let (w, h) = (surface.width(), surface.height());
    let lod = match source {
        LayerSource::Texture(texture) => texture.lod_for(quad.canvas.0, quad.canvas.1),
        _ => 0.0,
    };
    let pattern_ctx = PatternContext {
        width: quad.canvas.0 as f32,
        height: quad.canvas.1 as f32,
        time,
    };

    for y in quad.min.1..quad.max.1 {
        for x in quad.min.0..quad.max.0 {
            let Some(local) = quad.inverse.transform_point(pixel_to_ndc(x, y, w, h)) else {
                continue;
            };
            if local.x.abs() > 1.0 + EDGE_EPSILON || local.y.abs() > 1.0 + EDGE_EPSILON {
                continue;
            }
            let u = ((local.x + 1.0) * 0.5).clamp(0.0, 1.0) as f32;
            let v = ((1.0 - local.y) * 0.5).clamp(0.0, 1.0) as f32;

            let texel = match source {
                LayerSource::Texture(texture) => texture.sample(u, v, lod),
                LayerSource::Flat(color) => *color,
                LayerSource::Pattern(program) => program.sample(u, v, &pattern_ctx),
                LayerSource::Shader(shader) => shader.sample(u, v, time),
            };

            let src = [
                texel[0] * color_scale[0],
                texel[1] * color_scale[1],
                texel[2] * color_scale[2],
                texel[3] * opacity,
            ];
            if let Some(dst) = surface.pixel_mut(x, y) {
                blend_pixel(layer.blend_mode, dst, src);
            }
        }
    }
}
