//! Calibrated quad geometry
//!
//! A geometry is the four-corner surface a layer is projected through. Corner order is
//! top-left, top-right, bottom-right, bottom-left, matching the canonical unit quad.

use glam::{DMat3, DVec2};
use serde::{Deserialize, Serialize};
use uuid::Uuid;

use crate::error::{ProjectionError, Result};

/// 2D coordinate in normalized device space
#[derive(Debug, Clone, Copy, PartialEq, Default, Serialize, Deserialize)]
pub struct Vec2 {
    pub x: f32,
    pub y: f32,
}

impl Vec2 {
    pub const fn new(x: f32, y: f32) -> Self {
        Self { x, y }
    }

    pub fn as_dvec2(self) -> DVec2 {
        DVec2::new(self.x as f64, self.y as f64)
    }

    pub fn from_dvec2(v: DVec2) -> Self {
        Self::new(v.x as f32, v.y as f32)
    }
}

/// 3D coordinate used by transforms
#[derive(Debug, Clone, Copy, PartialEq, Default, Serialize, Deserialize)]
pub struct Vec3 {
    pub x: f32,
    pub y: f32,
    pub z: f32,
}

impl Vec3 {
    pub const fn new(x: f32, y: f32, z: f32) -> Self {
        Self { x, y, z }
    }
}

/// Position, rotation (radians) and scale of a layer or geometry
#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
pub struct Transform {
    pub position: Vec3,
    pub rotation: Vec3,
    pub scale: Vec3,
}

impl Default for Transform {
    fn default() -> Self {
        Self {
            position: Vec3::new(0.0, 0.0, 0.0),
            rotation: Vec3::new(0.0, 0.0, 0.0),
            scale: Vec3::new(1.0, 1.0, 1.0),
        }
    }
}

impl Transform {
    /// 2D affine matrix: translate, then rotate about z, then scale.
    ///
    /// Applied to a point as `T * R * S * p`, so scale acts first on the point.
    pub fn affine_matrix(&self) -> DMat3 {
        DMat3::from_translation(DVec2::new(
            self.position.x as f64,
            self.position.y as f64,
        )) * DMat3::from_angle(self.rotation.z as f64)
            * DMat3::from_scale(DVec2::new(self.scale.x as f64, self.scale.y as f64))
    }

    /// Check if transform is identity (no transformation)
    pub fn is_identity(&self) -> bool {
        *self == Self::default()
    }
}

/// One calibrated corner
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct QuadPoint {
    pub id: String,
    pub position: Vec2,
}

impl QuadPoint {
    pub fn new(position: Vec2) -> Self {
        Self {
            id: Uuid::new_v4().to_string(),
            position,
        }
    }
}

/// Corners of the canonical unit quad in TL, TR, BR, BL order
pub const UNIT_QUAD: [Vec2; 4] = [
    Vec2::new(-1.0, -1.0),
    Vec2::new(1.0, -1.0),
    Vec2::new(1.0, 1.0),
    Vec2::new(-1.0, 1.0),
];

/// Exactly four corner points.
///
/// Deserializes from a list and rejects any other length instead of truncating.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(try_from = "Vec<QuadPoint>", into = "Vec<QuadPoint>")]
pub struct QuadPoints(pub [QuadPoint; 4]);

impl TryFrom<Vec<QuadPoint>> for QuadPoints {
    type Error = ProjectionError;

    fn try_from(points: Vec<QuadPoint>) -> Result<Self> {
        let count = points.len();
        let points: [QuadPoint; 4] = points
            .try_into()
            .map_err(|_| ProjectionError::InvalidGeometry(count))?;
        Ok(Self(points))
    }
}

impl From<QuadPoints> for Vec<QuadPoint> {
    fn from(points: QuadPoints) -> Self {
        points.0.into()
    }
}

impl QuadPoints {
    /// Fresh corners at the canonical unit quad
    pub fn unit() -> Self {
        Self(UNIT_QUAD.map(QuadPoint::new))
    }

    pub fn positions(&self) -> [Vec2; 4] {
        [
            self.0[0].position,
            self.0[1].position,
            self.0[2].position,
            self.0[3].position,
        ]
    }
}

/// A calibrated projection surface
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Geometry {
    pub id: String,
    pub name: String,
    pub points: QuadPoints,
    #[serde(default)]
    pub transform: Transform,
    #[serde(default = "default_visible")]
    pub visible: bool,
}

fn default_visible() -> bool {
    true
}

impl Geometry {
    /// Build a geometry from an arbitrary point list, rejecting anything but four points
    pub fn new(name: impl Into<String>, points: Vec<QuadPoint>) -> Result<Self> {
        Ok(Self {
            id: Uuid::new_v4().to_string(),
            name: name.into(),
            points: QuadPoints::try_from(points)?,
            transform: Transform::default(),
            visible: true,
        })
    }

    /// Geometry whose corners sit on the canonical unit quad
    pub fn with_default_corners(name: impl Into<String>) -> Self {
        Self {
            id: Uuid::new_v4().to_string(),
            name: name.into(),
            points: QuadPoints::unit(),
            transform: Transform::default(),
            visible: true,
        }
    }

    /// Corner positions in TL, TR, BR, BL order
    pub fn corners(&self) -> [Vec2; 4] {
        self.points.positions()
    }

    /// Move one corner (the calibration drag gesture)
    pub fn set_corner(&mut self, index: usize, position: Vec2) -> Result<()> {
        let point = self
            .points
            .0
            .get_mut(index)
            .ok_or_else(|| ProjectionError::not_found("corner", index.to_string()))?;
        point.position = position;
        Ok(())
    }

    /// Put every corner back on the unit quad, keeping point ids
    pub fn reset_corners(&mut self) {
        for (point, corner) in self.points.0.iter_mut().zip(UNIT_QUAD) {
            point.position = corner;
        }
    }
}
