//! Fisheye Camera Library
//!
//! A Rust library implementing the equidistant (Kannala-Brandt style) fisheye
//! camera model for differentiable rendering and calibration pipelines.
//! It provides:
//! - Forward projection (3D camera point to 2D pixel), with and without
//!   radial distortion
//! - Unprojection (2D pixel to 3D ray), inverting the distortion via
//!   Newton-Raphson iteration
//! - Analytic first derivatives (Jacobian) and second derivatives (Hessian)
//!   of the undistorted projection
//! - The monotonic bound of the distortion polynomial, i.e. the largest
//!   incidence angle for which the model stays invertible
//!
//! The mathematical core lives in [`fisheye`] as pure, allocation-free
//! functions over plain `nalgebra` types, so the same code can back a
//! single-point host path and a batched path. The [`camera`] module wraps the
//! core in the [`CameraModel`] trait with `Result`-based errors and YAML
//! calibration I/O.

pub mod camera;
pub mod fisheye;
pub mod geometry;
pub mod math;

// Re-export commonly used types
pub use camera::{CameraModel, CameraModelError, Intrinsics, KannalaBrandtModel, Resolution};
