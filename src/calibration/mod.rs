//! Corner calibration
//!
//! Turns four calibrated corner points into the projective transform the compositor
//! warps each layer through.

pub mod homography;

pub use homography::{solve, solve_or_fallback, solve_unit_quad, Homography, HomographySolution};
