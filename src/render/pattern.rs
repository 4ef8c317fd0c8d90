//! Procedural light and calibration patterns
//!
//! Patterns are evaluated per pixel in the layer's own canvas space: `(u, v)` in [0, 1]
//! scaled by the canvas size, so pixel-sized features (borders, grid spacing, scan band)
//! stay crisp at any projection size.

use std::f32::consts::PI;

use crate::project::PatternContent;

/// Canvas size and clock for one pattern evaluation
#[derive(Debug, Clone, Copy)]
pub struct PatternContext {
    pub width: f32,
    pub height: f32,
    /// Seconds since the render loop started, 0 when the pattern is not playing
    pub time: f32,
}

const GRID_SPACING: f32 = 50.0;
const CHECKER_SIZE: f32 = 50.0;
const CIRCLE_SPACING: f32 = 60.0;
const CIRCLE_RADIUS: f32 = 15.0;
const CORNER_MARK: f32 = 50.0;
const SCAN_HALF_WIDTH: f32 = 50.0;

const TRANSPARENT: [f32; 4] = [0.0, 0.0, 0.0, 0.0];
const BLACK: [f32; 4] = [0.0, 0.0, 0.0, 1.0];
const WHITE: [f32; 4] = [1.0, 1.0, 1.0, 1.0];

/// Parse `#rgb`, `#rrggbb` or `#rrggbbaa`
pub fn parse_hex_color(hex: &str) -> Option<[f32; 4]> {
    let hex = hex.trim().trim_start_matches('#');
    let channel = |s: &str| u8::from_str_radix(s, 16).ok().map(|v| v as f32 / 255.0);
    match hex.len() {
        3 => {
            let mut out = [1.0; 4];
            for (i, c) in hex.chars().enumerate() {
                let v = c.to_digit(16)? as f32;
                out[i] = (v * 16.0 + v) / 255.0;
            }
            Some(out)
        }
        6 | 8 => {
            let mut out = [1.0; 4];
            for i in 0..hex.len() / 2 {
                out[i] = channel(hex.get(i * 2..i * 2 + 2)?)?;
            }
            Some(out)
        }
        _ => None,
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
enum PatternKind {
    Solid,
    BorderOnly,
    BorderFill,
    GradientLinear,
    GradientRadial,
    Strobe,
    Pulse,
    Wave,
    Rainbow,
    Scan,
    Dots,
    Noise,
    Grid,
    Crosshair,
    TestGradient,
    Checkerboard,
    Circles,
    Border,
}

impl PatternKind {
    fn from_id(id: &str) -> Option<Self> {
        Some(match id {
            "solid" => Self::Solid,
            "border-only" => Self::BorderOnly,
            "border-fill" => Self::BorderFill,
            "gradient-linear" => Self::GradientLinear,
            "gradient-radial" => Self::GradientRadial,
            "strobe" => Self::Strobe,
            "pulse" => Self::Pulse,
            "wave" => Self::Wave,
            "rainbow" => Self::Rainbow,
            "scan" => Self::Scan,
            "dots" => Self::Dots,
            "noise" => Self::Noise,
            "grid" => Self::Grid,
            "crosshair" => Self::Crosshair,
            "gradient" => Self::TestGradient,
            "checkerboard" => Self::Checkerboard,
            "circles" => Self::Circles,
            "border" => Self::Border,
            _ => return None,
        })
    }

    fn is_animated(self) -> bool {
        matches!(
            self,
            Self::Strobe | Self::Pulse | Self::Wave | Self::Rainbow | Self::Scan | Self::Noise
        )
    }
}

/// Linear gradient through sorted color stops
fn gradient(stops: &[(f32, [f32; 4])], t: f32) -> [f32; 4] {
    let Some(first) = stops.first() else {
        return TRANSPARENT;
    };
    if t <= first.0 {
        return first.1;
    }
    for pair in stops.windows(2) {
        let (p0, c0) = pair[0];
        let (p1, c1) = pair[1];
        if t <= p1 {
            let span = p1 - p0;
            let f = if span > 0.0 { (t - p0) / span } else { 1.0 };
            return lerp(c0, c1, f);
        }
    }
    stops[stops.len() - 1].1
}

fn lerp(a: [f32; 4], b: [f32; 4], t: f32) -> [f32; 4] {
    std::array::from_fn(|i| a[i] + (b[i] - a[i]) * t)
}

fn with_alpha(c: [f32; 4], alpha: f32) -> [f32; 4] {
    [c[0], c[1], c[2], c[3] * alpha]
}

/// Source-over of straight-alpha colors
fn over(dst: [f32; 4], src: [f32; 4]) -> [f32; 4] {
    let a = src[3] + dst[3] * (1.0 - src[3]);
    if a <= 0.0 {
        return TRANSPARENT;
    }
    let mut out = [0.0; 4];
    for c in 0..3 {
        out[c] = (src[c] * src[3] + dst[c] * dst[3] * (1.0 - src[3])) / a;
    }
    out[3] = a;
    out
}

/// Stops evenly spread across [0, 1]
fn even_stops(colors: &[[f32; 4]]) -> Vec<(f32, [f32; 4])> {
    let n = colors.len();
    colors
        .iter()
        .enumerate()
        .map(|(i, c)| {
            let pos = if n > 1 { i as f32 / (n - 1) as f32 } else { 0.0 };
            (pos, *c)
        })
        .collect()
}

fn sorted(mut stops: Vec<(f32, [f32; 4])>) -> Vec<(f32, [f32; 4])> {
    stops.sort_by(|a, b| a.0.total_cmp(&b.0));
    stops
}

/// Cheap per-pixel hash in [0, 1)
fn hash(x: u32, y: u32, frame: u32) -> f32 {
    let mut h = x.wrapping_mul(0x8da6_b343) ^ y.wrapping_mul(0xd816_3841) ^ frame.wrapping_mul(0xcb1a_b31f);
    h ^= h >> 13;
    h = h.wrapping_mul(0x5bd1_e995);
    h ^= h >> 15;
    (h & 0x00ff_ffff) as f32 / 16_777_216.0
}

/// A pattern with its colors parsed, ready for per-pixel evaluation
#[derive(Debug, Clone)]
pub struct PatternProgram {
    kind: PatternKind,
    colors: Vec<[f32; 4]>,
    speed: f32,
    intensity: f32,
    direction: String,
    frequency: Option<f32>,
    border_width: f32,
    fill_opacity: f32,
    animate: bool,
}

impl PatternProgram {
    /// Prepare a pattern layer. Fails on an unknown pattern id.
    pub fn new(pattern: &PatternContent) -> Result<Self, String> {
        let kind = PatternKind::from_id(&pattern.pattern_id)
            .ok_or_else(|| format!("unknown pattern '{}'", pattern.pattern_id))?;
        let config = &pattern.pattern_config;

        let mut colors: Vec<[f32; 4]> = Vec::with_capacity(config.colors.len());
        for c in &config.colors {
            match parse_hex_color(c) {
                Some(color) => colors.push(color),
                None => log::warn!("Ignoring invalid pattern color '{}'", c),
            }
        }
        if colors.is_empty() {
            colors.push(WHITE);
        }

        Ok(Self {
            kind,
            colors,
            speed: config.speed.unwrap_or(0.5),
            intensity: config.intensity.unwrap_or(1.0),
            direction: config.direction.clone().unwrap_or_default(),
            frequency: config.frequency,
            border_width: config.border_width.unwrap_or(0.0),
            fill_opacity: config.fill_opacity.unwrap_or(1.0),
            animate: pattern.is_animated && pattern.is_playing,
        })
    }

    /// Whether output depends on time
    pub fn is_animated(&self) -> bool {
        self.animate && self.kind.is_animated()
    }

    fn primary(&self) -> [f32; 4] {
        self.colors[0]
    }

    fn secondary(&self) -> [f32; 4] {
        self.colors.get(1).copied().unwrap_or(self.colors[0])
    }

    /// Straight-alpha color at normalized canvas coordinates
    pub fn sample(&self, u: f32, v: f32, ctx: &PatternContext) -> [f32; 4] {
        let w = ctx.width.max(1.0);
        let h = ctx.height.max(1.0);
        let x = u * w;
        let y = v * h;
        let t = if self.animate { ctx.time } else { 0.0 };

        match self.kind {
            PatternKind::Strobe => {
                let on = (t * self.speed * 10.0 * PI).sin() > 0.0;
                let c = if on { self.primary() } else { self.secondary() };
                with_alpha(c, self.intensity)
            }
            PatternKind::Pulse => {
                let pulse = ((t * self.speed * 2.0 * PI).sin() + 1.0) / 2.0;
                with_alpha(self.primary(), pulse * self.intensity)
            }
            PatternKind::Wave => {
                let frequency = self.frequency.unwrap_or(3.0).max(1.0);
                let offset = (t * self.speed).rem_euclid(1.0);
                let mut stops = Vec::new();
                for i in 0..frequency as usize {
                    let i = i as f32;
                    stops.push(((i / frequency + offset).rem_euclid(1.0), self.primary()));
                    stops.push((((i + 0.5) / frequency + offset).rem_euclid(1.0), self.secondary()));
                }
                let along = if self.direction == "vertical" { v } else { u };
                gradient(&sorted(stops), along)
            }
            PatternKind::Rainbow => {
                let offset = (t * self.speed).rem_euclid(1.0);
                let n = self.colors.len() as f32;
                let stops = self
                    .colors
                    .iter()
                    .enumerate()
                    .map(|(i, c)| ((i as f32 / n + offset).rem_euclid(1.0), *c))
                    .collect();
                gradient(&sorted(stops), u)
            }
            PatternKind::Scan => {
                let position = (t * self.speed).rem_euclid(1.0);
                let distance = if self.direction == "horizontal" {
                    (x - position * w).abs()
                } else {
                    (y - position * h).abs()
                };
                let fade = (1.0 - distance / SCAN_HALF_WIDTH).max(0.0);
                with_alpha(self.primary(), fade)
            }
            PatternKind::Noise => {
                let frame = (t * 60.0 * self.speed.max(0.01)) as u32;
                let value = hash(x as u32, y as u32, frame);
                [value, value, value, self.intensity]
            }
            PatternKind::Grid => self.grid(x, y, w, h),
            PatternKind::Crosshair => self.crosshair(x, y, w, h),
            PatternKind::TestGradient => {
                let c = self.primary();
                if v < 0.5 {
                    gradient(&[(0.0, BLACK), (0.5, c), (1.0, WHITE)], u)
                } else {
                    gradient(&[(0.0, c), (1.0, BLACK)], (v - 0.5) * 2.0)
                }
            }
            PatternKind::Checkerboard => {
                let cell = (x / CHECKER_SIZE).floor() as i64 + (y / CHECKER_SIZE).floor() as i64;
                if cell.rem_euclid(2) == 0 {
                    self.primary()
                } else {
                    TRANSPARENT
                }
            }
            PatternKind::Circles => {
                let cx = (x / CIRCLE_SPACING).round() * CIRCLE_SPACING;
                let cy = (y / CIRCLE_SPACING).round() * CIRCLE_SPACING;
                let inside_canvas = cx > 0.0 && cy > 0.0 && cx < w && cy < h;
                if inside_canvas && (x - cx).hypot(y - cy) <= CIRCLE_RADIUS {
                    self.primary()
                } else {
                    TRANSPARENT
                }
            }
            PatternKind::Border => {
                let edge = x.min(w - x).min(y).min(h - y);
                if edge <= 2.5 {
                    return self.primary();
                }
                let d1 = (x / w - y / h).abs() * w.min(h);
                let d2 = (x / w + y / h - 1.0).abs() * w.min(h);
                if d1.min(d2) <= 1.0 {
                    with_alpha(self.primary(), 0.3)
                } else {
                    TRANSPARENT
                }
            }
            PatternKind::Solid
            | PatternKind::BorderOnly
            | PatternKind::BorderFill
            | PatternKind::GradientLinear
            | PatternKind::GradientRadial
            | PatternKind::Dots => self.fill_and_border(u, v, x, y, w, h),
        }
    }

    fn fill_and_border(&self, u: f32, v: f32, x: f32, y: f32, w: f32, h: f32) -> [f32; 4] {
        let mut out = TRANSPARENT;
        if self.fill_opacity > 0.0 {
            out = match self.kind {
                PatternKind::GradientLinear => {
                    let along = match self.direction.as_str() {
                        "vertical" => v,
                        "diagonal" => {
                            // Projection onto the (w, h) diagonal
                            (x * w + y * h) / (w * w + h * h)
                        }
                        _ => u,
                    };
                    with_alpha(gradient(&even_stops(&self.colors), along), self.fill_opacity)
                }
                PatternKind::GradientRadial => {
                    let radius = w.max(h) / 2.0;
                    let r = (x - w / 2.0).hypot(y - h / 2.0) / radius;
                    with_alpha(gradient(&even_stops(&self.colors), r), self.fill_opacity)
                }
                PatternKind::Dots => {
                    let frequency = self.frequency.unwrap_or(10.0).max(1.0);
                    let radius = w.min(h) / frequency / 2.0;
                    let cell_w = w / frequency;
                    let cell_h = h / frequency;
                    let cx = ((x / cell_w).floor() + 0.5) * cell_w;
                    let cy = ((y / cell_h).floor() + 0.5) * cell_h;
                    if (x - cx).hypot(y - cy) <= radius {
                        self.primary()
                    } else {
                        TRANSPARENT
                    }
                }
                _ => with_alpha(self.primary(), self.fill_opacity),
            };
        }

        if self.border_width > 0.0 {
            let edge = x.min(w - x).min(y).min(h - y);
            if edge < self.border_width {
                out = over(out, self.primary());
            }
        }
        out
    }

    fn grid(&self, x: f32, y: f32, w: f32, h: f32) -> [f32; 4] {
        let c = self.primary();
        if (x - w / 2.0).abs() <= 1.0 || (y - h / 2.0).abs() <= 1.0 {
            return c;
        }
        let near = |p: f32| {
            let r = p.rem_euclid(GRID_SPACING);
            r <= 0.5 || GRID_SPACING - r <= 0.5
        };
        if near(x) || near(y) {
            with_alpha(c, 0.5)
        } else {
            TRANSPARENT
        }
    }

    fn crosshair(&self, x: f32, y: f32, w: f32, h: f32) -> [f32; 4] {
        let c = self.primary();
        if (x - w / 2.0).abs() <= 1.0 || (y - h / 2.0).abs() <= 1.0 {
            return c;
        }
        // Corner marks: edges within CORNER_MARK of each corner
        let near_x_edge = x <= 1.5 || w - x <= 1.5;
        let near_y_edge = y <= 1.5 || h - y <= 1.5;
        let in_x_corner = x <= CORNER_MARK || w - x <= CORNER_MARK;
        let in_y_corner = y <= CORNER_MARK || h - y <= CORNER_MARK;
        if (near_x_edge && in_y_corner) || (near_y_edge && in_x_corner) {
            return c;
        }
        let ring = ((x - w / 2.0).hypot(y - h / 2.0) - 20.0).abs();
        if ring <= 1.0 {
            c
        } else {
            TRANSPARENT
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::project::PatternConfig;

    fn pattern(id: &str, colors: &[&str]) -> PatternContent {
        PatternContent {
            pattern_id: id.to_string(),
            pattern_config: PatternConfig {
                colors: colors.iter().map(|c| c.to_string()).collect(),
                ..Default::default()
            },
            is_animated: false,
            is_playing: false,
        }
    }

    fn ctx(time: f32) -> PatternContext {
        PatternContext {
            width: 200.0,
            height: 100.0,
            time,
        }
    }

    fn approx(a: [f32; 4], b: [f32; 4]) -> bool {
        a.iter().zip(b.iter()).all(|(x, y)| (x - y).abs() < 1e-3)
    }

    #[test]
    fn test_parse_hex_color() {
        assert_eq!(parse_hex_color("#ff0000"), Some([1.0, 0.0, 0.0, 1.0]));
        assert_eq!(parse_hex_color("#00000000"), Some([0.0, 0.0, 0.0, 0.0]));
        assert_eq!(parse_hex_color("#fff"), Some([1.0, 1.0, 1.0, 1.0]));
        assert!(parse_hex_color("#12345").is_none());
        assert!(parse_hex_color("#gg0000").is_none());
    }

    #[test]
    fn test_unknown_pattern_rejected() {
        assert!(PatternProgram::new(&pattern("hologram", &["#ffffff"])).is_err());
    }

    #[test]
    fn test_solid_fill() {
        let program = PatternProgram::new(&pattern("solid", &["#00ff88"])).unwrap();
        let c = program.sample(0.3, 0.7, &ctx(0.0));
        assert!(approx(c, [0.0, 1.0, 136.0 / 255.0, 1.0]));
        assert!(!program.is_animated());
    }

    #[test]
    fn test_border_only() {
        let mut content = pattern("border-only", &["#ffffff"]);
        content.pattern_config.fill_opacity = Some(0.0);
        content.pattern_config.border_width = Some(3.0);
        let program = PatternProgram::new(&content).unwrap();
        assert_eq!(program.sample(0.5, 0.5, &ctx(0.0))[3], 0.0);
        assert_eq!(program.sample(0.005, 0.5, &ctx(0.0)), WHITE);
    }

    #[test]
    fn test_linear_gradient_endpoints() {
        let program = PatternProgram::new(&pattern("gradient-linear", &["#000000", "#ffffff"])).unwrap();
        assert!(approx(program.sample(0.0, 0.5, &ctx(0.0)), BLACK));
        assert!(approx(program.sample(0.5, 0.5, &ctx(0.0)), [0.5, 0.5, 0.5, 1.0]));
        assert!(approx(program.sample(1.0, 0.5, &ctx(0.0)), WHITE));
    }

    #[test]
    fn test_strobe_uses_time_only_when_playing() {
        let mut content = pattern("strobe", &["#ffffff", "#000000"]);
        content.pattern_config.speed = Some(0.5);
        let paused = PatternProgram::new(&content).unwrap();
        // sin(0) is not > 0: second color
        assert!(approx(paused.sample(0.5, 0.5, &ctx(0.1)), BLACK));

        content.is_animated = true;
        content.is_playing = true;
        let playing = PatternProgram::new(&content).unwrap();
        assert!(playing.is_animated());
        // sin(0.1 * 0.5 * 10 * pi) = sin(pi / 2) > 0: first color
        assert!(approx(playing.sample(0.5, 0.5, &ctx(0.1)), WHITE));
    }

    #[test]
    fn test_pulse_alpha() {
        let mut content = pattern("pulse", &["#00ff88"]);
        content.pattern_config.speed = Some(0.25);
        content.pattern_config.intensity = Some(0.8);
        content.is_animated = true;
        content.is_playing = true;
        let program = PatternProgram::new(&content).unwrap();
        // t = 1: sin(pi / 2) = 1, pulse = 1
        assert!((program.sample(0.5, 0.5, &ctx(1.0))[3] - 0.8).abs() < 1e-5);
        // t = 0: pulse = 0.5
        assert!((program.sample(0.5, 0.5, &ctx(0.0))[3] - 0.4).abs() < 1e-5);
    }

    #[test]
    fn test_checkerboard_cells() {
        let program = PatternProgram::new(&pattern("checkerboard", &["#ff0000"])).unwrap();
        // (10, 10) px is in cell (0, 0); (60, 10) in cell (1, 0)
        assert_eq!(program.sample(0.05, 0.1, &ctx(0.0)), [1.0, 0.0, 0.0, 1.0]);
        assert_eq!(program.sample(0.3, 0.1, &ctx(0.0))[3], 0.0);
    }

    #[test]
    fn test_dots_centered_in_cells() {
        let mut content = pattern("dots", &["#ffffff"]);
        content.pattern_config.frequency = Some(2.0);
        let program = PatternProgram::new(&content).unwrap();
        // Cell centers at u = 0.25 / 0.75, v = 0.25 / 0.75
        assert_eq!(program.sample(0.25, 0.25, &ctx(0.0)), WHITE);
        assert_eq!(program.sample(0.5, 0.5, &ctx(0.0))[3], 0.0);
    }

    #[test]
    fn test_gradient_helper_clamps() {
        let stops = [(0.2, BLACK), (0.8, WHITE)];
        assert_eq!(gradient(&stops, 0.0), BLACK);
        assert_eq!(gradient(&stops, 1.0), WHITE);
        assert!(approx(gradient(&stops, 0.5), [0.5, 0.5, 0.5, 1.0]));
    }
}
