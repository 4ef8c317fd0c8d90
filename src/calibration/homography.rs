//! Four-point homography solver
//!
//! Direct linear transform over Hartley-normalized correspondences. The null vector
//! of the 8x9 system is taken as the eigenvector of AᵗA with the smallest eigenvalue,
//! found with a cyclic Jacobi eigen-decomposition.

use glam::{DMat3, DVec2, DVec3};

use crate::error::{ProjectionError, Result};
use crate::project::Vec2;

/// Canonical unit quad in TL, TR, BR, BL order
pub const UNIT_QUAD: [DVec2; 4] = [
    DVec2::new(-1.0, -1.0),
    DVec2::new(1.0, -1.0),
    DVec2::new(1.0, 1.0),
    DVec2::new(-1.0, 1.0),
];

/// Triangles spanned by normalized points below this (doubled) area count as collinear
const COLLINEAR_EPSILON: f64 = 1e-7;
/// Relative size of the second-smallest eigenvalue below which A has rank < 8
const RANK_EPSILON: f64 = 1e-10;
const MAX_SWEEPS: usize = 64;
const DIVIDE_EPSILON: f64 = 1e-12;

/// 3x3 projective transform acting on homogeneous 2D points
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct Homography {
    matrix: DMat3,
}

impl Default for Homography {
    fn default() -> Self {
        Self::identity()
    }
}

impl Homography {
    pub fn identity() -> Self {
        Self {
            matrix: DMat3::IDENTITY,
        }
    }

    pub fn from_mat3(matrix: DMat3) -> Self {
        Self { matrix }
    }

    /// Build from a row-major 3x3 array
    pub fn from_rows(rows: [[f64; 3]; 3]) -> Self {
        Self {
            matrix: DMat3::from_cols_array_2d(&rows).transpose(),
        }
    }

    pub fn matrix(&self) -> DMat3 {
        self.matrix
    }

    /// Row-major copy of the matrix
    pub fn to_rows(&self) -> [[f64; 3]; 3] {
        self.matrix.transpose().to_cols_array_2d()
    }

    /// Map a point, dividing by w. Returns `None` for points sent to infinity.
    pub fn transform_point(&self, point: DVec2) -> Option<DVec2> {
        let p = self.matrix * DVec3::new(point.x, point.y, 1.0);
        if p.z.abs() < DIVIDE_EPSILON {
            return None;
        }
        Some(DVec2::new(p.x / p.z, p.y / p.z))
    }

    pub fn inverse(&self) -> Option<Homography> {
        let det = self.matrix.determinant();
        if !det.is_finite() || det.abs() < DIVIDE_EPSILON {
            return None;
        }
        Some(Self {
            matrix: self.matrix.inverse(),
        })
    }

    pub fn is_finite(&self) -> bool {
        self.matrix.is_finite()
    }

    /// Check if this is approximately the identity
    pub fn is_identity(&self, epsilon: f64) -> bool {
        self.matrix.abs_diff_eq(DMat3::IDENTITY, epsilon)
    }
}

impl std::ops::Mul for Homography {
    type Output = Homography;

    /// `a * b` applies `b` first
    fn mul(self, rhs: Homography) -> Homography {
        Homography {
            matrix: self.matrix * rhs.matrix,
        }
    }
}

/// Solver output for the render path
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct HomographySolution {
    pub homography: Homography,
    /// False when the corners were degenerate and `homography` is a fallback
    pub reliable: bool,
}

/// Solve for H with `H * src[i] ~ dst[i]` for all four correspondences
pub fn solve(src: [DVec2; 4], dst: [DVec2; 4]) -> Result<Homography> {
    let (Some((src_n, t_src)), Some((dst_n, t_dst))) = (normalize(&src), normalize(&dst)) else {
        return Err(degenerate("points coincide", Homography::identity()));
    };

    let solved = solve_normalized(&src_n, &dst_n).and_then(|(hn, rank_deficient)| {
        let t_dst_inv = t_dst.inverse();
        let h = denormalize(t_dst_inv * hn * t_src)?;
        Some((h, rank_deficient))
    });

    let collinear = has_collinear_triple(&src_n) || has_collinear_triple(&dst_n);

    match solved {
        Some((h, false)) if !collinear => Ok(h),
        Some((h, _)) => {
            let reason = if collinear {
                "three calibration points are collinear"
            } else {
                "correspondences do not determine a unique transform"
            };
            Err(degenerate(reason, h))
        }
        None => Err(degenerate(
            "eigen solver did not produce a finite transform",
            Homography::identity(),
        )),
    }
}

/// Solve, falling back to the degenerate best-effort matrix instead of failing
pub fn solve_or_fallback(src: [DVec2; 4], dst: [DVec2; 4]) -> HomographySolution {
    match solve(src, dst) {
        Ok(homography) => HomographySolution {
            homography,
            reliable: true,
        },
        Err(ProjectionError::DegenerateGeometry { reason, fallback }) => {
            log::debug!("Homography fallback: {}", reason);
            HomographySolution {
                homography: fallback,
                reliable: false,
            }
        }
        Err(e) => {
            log::warn!("Unexpected homography error: {}", e);
            HomographySolution {
                homography: Homography::identity(),
                reliable: false,
            }
        }
    }
}

/// Homography mapping the canonical unit quad onto four geometry corners
pub fn solve_unit_quad(corners: [Vec2; 4]) -> HomographySolution {
    solve_or_fallback(UNIT_QUAD, corners.map(Vec2::as_dvec2))
}

fn degenerate(reason: &str, fallback: Homography) -> ProjectionError {
    let fallback = if fallback.is_finite() {
        fallback
    } else {
        Homography::identity()
    };
    ProjectionError::DegenerateGeometry {
        reason: reason.to_string(),
        fallback,
    }
}

/// Hartley normalization: centroid to origin, mean distance √2
fn normalize(points: &[DVec2; 4]) -> Option<([DVec2; 4], DMat3)> {
    let centroid = points.iter().copied().sum::<DVec2>() / 4.0;
    let mean_distance = points.iter().map(|p| p.distance(centroid)).sum::<f64>() / 4.0;
    if !mean_distance.is_finite() || mean_distance < DIVIDE_EPSILON {
        return None;
    }

    let scale = std::f64::consts::SQRT_2 / mean_distance;
    let transform = DMat3::from_scale(DVec2::splat(scale)) * DMat3::from_translation(-centroid);
    let normalized = points.map(|p| (p - centroid) * scale);
    Some((normalized, transform))
}

fn has_collinear_triple(points: &[DVec2; 4]) -> bool {
    const TRIPLES: [[usize; 3]; 4] = [[0, 1, 2], [0, 1, 3], [0, 2, 3], [1, 2, 3]];
    TRIPLES.iter().any(|&[a, b, c]| {
        let area = (points[b] - points[a]).perp_dot(points[c] - points[a]);
        area.abs() < COLLINEAR_EPSILON
    })
}

/// Returns the normalized-space matrix and whether A was rank deficient
fn solve_normalized(src: &[DVec2; 4], dst: &[DVec2; 4]) -> Option<(DMat3, bool)> {
    let mut a = [[0.0f64; 9]; 8];
    for (i, (s, d)) in src.iter().zip(dst.iter()).enumerate() {
        let (x, y, u, v) = (s.x, s.y, d.x, d.y);
        a[2 * i] = [-x, -y, -1.0, 0.0, 0.0, 0.0, u * x, u * y, u];
        a[2 * i + 1] = [0.0, 0.0, 0.0, -x, -y, -1.0, v * x, v * y, v];
    }

    let mut ata = [[0.0f64; 9]; 9];
    for (r, row) in ata.iter_mut().enumerate() {
        for (c, cell) in row.iter_mut().enumerate() {
            *cell = a.iter().map(|eq| eq[r] * eq[c]).sum();
        }
    }

    let eigen = jacobi_eigen(ata)?;
    let mut order: Vec<usize> = (0..9).collect();
    order.sort_by(|&i, &j| eigen.values[i].total_cmp(&eigen.values[j]));

    let largest = eigen.values[order[8]].abs().max(DIVIDE_EPSILON);
    let rank_deficient = eigen.values[order[1]].abs() <= RANK_EPSILON * largest;

    let smallest = order[0];
    let h: [f64; 9] = std::array::from_fn(|k| eigen.vectors[k][smallest]);
    Some((DMat3::from_cols_array(&h).transpose(), rank_deficient))
}

/// Scale so h33 = 1, or to unit Frobenius norm when h33 vanishes
fn denormalize(matrix: DMat3) -> Option<Homography> {
    let h33 = matrix.z_axis.z;
    let scaled = if h33.abs() > DIVIDE_EPSILON {
        matrix * (1.0 / h33)
    } else {
        let norm = matrix.to_cols_array().iter().map(|v| v * v).sum::<f64>().sqrt();
        if norm < DIVIDE_EPSILON {
            return None;
        }
        matrix * (1.0 / norm)
    };
    scaled.is_finite().then_some(Homography { matrix: scaled })
}

/// Eigenvalues and column eigenvectors of a symmetric matrix
pub(crate) struct Eigen<const N: usize> {
    pub values: [f64; N],
    pub vectors: [[f64; N]; N],
}

/// Cyclic Jacobi rotations until the off-diagonal mass vanishes.
///
/// Returns `None` if the sweeps run out before convergence.
pub(crate) fn jacobi_eigen<const N: usize>(mut a: [[f64; N]; N]) -> Option<Eigen<N>> {
    let mut v = [[0.0f64; N]; N];
    for (i, row) in v.iter_mut().enumerate() {
        row[i] = 1.0;
    }

    let total: f64 = a.iter().flatten().map(|x| x * x).sum();
    if !total.is_finite() {
        return None;
    }
    let tolerance = total * 1e-26;

    for _ in 0..MAX_SWEEPS {
        let off: f64 = (0..N)
            .flat_map(|p| (p + 1..N).map(move |q| (p, q)))
            .map(|(p, q)| a[p][q] * a[p][q])
            .sum();
        if off <= tolerance {
            return Some(Eigen {
                values: std::array::from_fn(|i| a[i][i]),
                vectors: v,
            });
        }

        for p in 0..N - 1 {
            for q in p + 1..N {
                let apq = a[p][q];
                if apq == 0.0 {
                    continue;
                }
                let theta = (a[q][q] - a[p][p]) / (2.0 * apq);
                let t = theta.signum() / (theta.abs() + (theta * theta + 1.0).sqrt());
                let c = 1.0 / (t * t + 1.0).sqrt();
                let s = t * c;

                for k in 0..N {
                    let (akp, akq) = (a[k][p], a[k][q]);
                    a[k][p] = c * akp - s * akq;
                    a[k][q] = s * akp + c * akq;
                }
                for k in 0..N {
                    let (apk, aqk) = (a[p][k], a[q][k]);
                    a[p][k] = c * apk - s * aqk;
                    a[q][k] = s * apk + c * aqk;
                }
                for row in v.iter_mut() {
                    let (vkp, vkq) = (row[p], row[q]);
                    row[p] = c * vkp - s * vkq;
                    row[q] = s * vkp + c * vkq;
                }
            }
        }
    }

    log::warn!("Jacobi eigen-decomposition did not converge in {} sweeps", MAX_SWEEPS);
    None
}
