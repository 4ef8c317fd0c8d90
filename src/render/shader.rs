//! Procedural programs standing in for shader layers
//!
//! Shader layers carry GLSL source that the software renderer cannot run. Each layer
//! instead names one of a small set of procedural programs, either with a
//! `#pragma program <name>` line in its fragment source or with a `program` uniform.
//! Layers naming neither run the `uv` program.

use std::collections::HashMap;
use std::f32::consts::TAU;

use serde_json::Value;

use crate::project::ShaderContent;
use crate::render::pattern::parse_hex_color;

/// Program used when a layer names none
pub const DEFAULT_PROGRAM: &str = "uv";

/// Built-in procedural programs
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ShaderProgram {
    /// Texture coordinates as red/green, blue cycling with time
    Uv,
    /// Flat white, shaped only by the `color` uniform
    Solid,
    /// Summed sine plasma
    Plasma,
    /// Concentric rings moving outwards
    Rings,
}

impl ShaderProgram {
    fn evaluate(self, u: f32, v: f32, time: f32, params: &ShaderParams) -> [f32; 4] {
        match self {
            ShaderProgram::Uv => [u, v, 0.5 + 0.5 * (time * params.speed * TAU).sin(), 1.0],
            ShaderProgram::Solid => [1.0, 1.0, 1.0, 1.0],
            ShaderProgram::Plasma => {
                let t = time * params.speed;
                let f = params.frequency;
                let x = u * f;
                let y = v * f;
                let value = ((x + t).sin()
                    + (y + t * 0.5).sin()
                    + ((x + y + t) * 0.5).sin()
                    + ((x * x + y * y).sqrt() - t).sin())
                    / 4.0;
                [
                    0.5 + 0.5 * (value * TAU).sin(),
                    0.5 + 0.5 * (value * TAU + TAU / 3.0).sin(),
                    0.5 + 0.5 * (value * TAU + 2.0 * TAU / 3.0).sin(),
                    1.0,
                ]
            }
            ShaderProgram::Rings => {
                let d = (u - 0.5).hypot(v - 0.5);
                let value = 0.5 + 0.5 * (d * params.frequency * TAU - time * params.speed * TAU).cos();
                [value, value, value, 1.0]
            }
        }
    }
}

/// Numeric uniforms shared by the programs
#[derive(Debug, Clone, Copy, PartialEq)]
struct ShaderParams {
    speed: f32,
    frequency: f32,
    color: [f32; 4],
}

impl ShaderParams {
    fn from_uniforms(uniforms: &std::collections::BTreeMap<String, Value>) -> Self {
        let number = |key: &str, default: f32| {
            uniforms
                .get(key)
                .and_then(Value::as_f64)
                .map(|v| v as f32)
                .unwrap_or(default)
        };
        Self {
            speed: number("speed", 1.0),
            frequency: number("frequency", 8.0),
            color: uniforms.get("color").and_then(uniform_color).unwrap_or([1.0; 4]),
        }
    }
}

/// `color` uniform as `[r, g, b]`, `[r, g, b, a]`, `{r, g, b, a?}` or a hex string
fn uniform_color(value: &Value) -> Option<[f32; 4]> {
    match value {
        Value::String(hex) => parse_hex_color(hex),
        Value::Array(items) if items.len() == 3 || items.len() == 4 => {
            let mut out = [1.0; 4];
            for (slot, item) in out.iter_mut().zip(items) {
                *slot = item.as_f64()? as f32;
            }
            Some(out)
        }
        Value::Object(map) => {
            let channel = |k: &str| map.get(k).and_then(Value::as_f64).map(|v| v as f32);
            Some([channel("r")?, channel("g")?, channel("b")?, channel("a").unwrap_or(1.0)])
        }
        _ => None,
    }
}

/// Program name a shader layer asks for
pub fn program_name(content: &ShaderContent) -> String {
    for line in content.fragment_shader.lines() {
        let mut words = line.split_whitespace();
        if words.next() == Some("#pragma") && words.next() == Some("program") {
            if let Some(name) = words.next() {
                return name.to_string();
            }
        }
    }
    content
        .uniforms
        .get("program")
        .and_then(Value::as_str)
        .unwrap_or(DEFAULT_PROGRAM)
        .to_string()
}

/// A shader layer bound to its program and uniforms
#[derive(Debug, Clone, Copy)]
pub struct PreparedShader {
    program: ShaderProgram,
    params: ShaderParams,
}

impl PreparedShader {
    pub fn program(&self) -> ShaderProgram {
        self.program
    }

    /// Straight-alpha color at texture coordinates `(u, v)`
    pub fn sample(&self, u: f32, v: f32, time: f32) -> [f32; 4] {
        let base = self.program.evaluate(u, v, time, &self.params);
        let tint = self.params.color;
        [base[0] * tint[0], base[1] * tint[1], base[2] * tint[2], base[3] * tint[3]]
    }
}

/// Name to program lookup
#[derive(Debug, Clone)]
pub struct ShaderLibrary {
    programs: HashMap<String, ShaderProgram>,
}

impl Default for ShaderLibrary {
    fn default() -> Self {
        let mut programs = HashMap::new();
        programs.insert("uv".to_string(), ShaderProgram::Uv);
        programs.insert("solid".to_string(), ShaderProgram::Solid);
        programs.insert("plasma".to_string(), ShaderProgram::Plasma);
        programs.insert("rings".to_string(), ShaderProgram::Rings);
        Self { programs }
    }
}

impl ShaderLibrary {
    pub fn new() -> Self {
        Self::default()
    }

    /// Register a program under an additional name
    pub fn register(&mut self, name: impl Into<String>, program: ShaderProgram) {
        self.programs.insert(name.into(), program);
    }

    pub fn get(&self, name: &str) -> Option<ShaderProgram> {
        self.programs.get(name).copied()
    }

    pub fn names(&self) -> Vec<&str> {
        let mut names: Vec<&str> = self.programs.keys().map(String::as_str).collect();
        names.sort_unstable();
        names
    }

    /// Bind a shader layer. Fails with a message when the named program is unknown.
    pub fn prepare(&self, content: &ShaderContent) -> Result<PreparedShader, String> {
        let name = program_name(content);
        let program = self
            .get(&name)
            .ok_or_else(|| format!("unknown shader program '{}'", name))?;
        Ok(PreparedShader {
            program,
            params: ShaderParams::from_uniforms(&content.uniforms),
        })
    }
}
