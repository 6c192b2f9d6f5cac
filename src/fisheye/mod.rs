//! Equidistant fisheye projection core.
//!
//! Pure, allocation-free functions mapping 3D points in the camera frame to
//! 2D pixels and back, together with the radial distortion polynomial, its
//! iterative inverse, and hand-derived first and second derivatives of the
//! undistorted projection. Every function here is referentially transparent
//! and loop bounds are fixed, so the same code serves a scalar host path and
//! a batched path without synchronization.
//!
//! The projection pipeline for a camera point `p = (x, y, z)` is
//!
//! ```text
//! xy    = (x, y) / z
//! r     = ‖xy‖
//! theta = atan(r)
//! uv    = theta / r * xy            (optionally theta_d / r * xy)
//! pixel = focal_length ⊙ uv + principal_point
//! ```
//!
//! where `theta_d = distortion(theta)` applies the Kannala-Brandt radial
//! polynomial. Functions whose domain is restricted return a validity flag
//! instead of an error; callers must check it before using the payload.

use nalgebra::{Matrix2, Matrix2x3, Matrix3, Vector2, Vector3};

use crate::math;

/// Radius threshold below which a point counts as lying on the optical axis.
///
/// Below this 2D norm the angular scaling `atan(r)/r` is replaced by its
/// analytic limit, which removes the division by a near-zero radius.
pub const MIN_2D_NORM: f64 = 1e-6;

/// Residual tolerance of the Newton iteration in [`undistortion`].
pub const NEWTON_TOL: f64 = 1e-6;

/// Iteration budget of the Newton iteration in [`undistortion`] and of the
/// root polish in [`monotonic_max_theta`].
pub const NEWTON_MAX_ITERS: usize = 20;

/// Default initial guess (≈ π/2) for [`monotonic_max_theta`].
pub const MONOTONIC_GUESS: f64 = 1.57;

/// Sentinel meaning "every incidence angle is valid".
///
/// Returned by [`monotonic_max_theta`] when the distortion polynomial is
/// monotonically increasing on all of `[0, ∞)`, and accepted as the
/// `max_theta` argument everywhere to disable the domain check.
pub const UNBOUNDED_THETA: f64 = f64::MAX;

/// Computes the radial distortion `theta -> theta_d`.
///
/// `theta_d = theta * (1 + k1·theta² + k2·theta⁴ + k3·theta⁶ + k4·theta⁸)`,
/// evaluated by Horner's scheme on `theta²`. Total on all inputs.
///
/// # Examples
///
/// ```rust
/// use fisheye_camera::fisheye::distortion;
///
/// // With all coefficients zero the model is purely equidistant.
/// assert_eq!(distortion(0.5, &[0.0; 4]), 0.5);
/// ```
pub fn distortion(theta: f64, radial_coeffs: &[f64; 4]) -> f64 {
    let [k1, k2, k3, k4] = *radial_coeffs;
    let theta2 = theta * theta;
    theta * math::eval_poly_horner(&[1.0, k1, k2, k3, k4], theta2)
}

/// Computes the derivative of the distortion, `d(theta_d)/d(theta)`.
///
/// `1 + 3k1·theta² + 5k2·theta⁴ + 7k3·theta⁶ + 9k4·theta⁸`, evaluated the
/// same way as [`distortion`]. Total on all inputs.
pub fn distortion_jac(theta: f64, radial_coeffs: &[f64; 4]) -> f64 {
    let [k1, k2, k3, k4] = *radial_coeffs;
    let theta2 = theta * theta;
    math::eval_poly_horner(&[1.0, 3.0 * k1, 5.0 * k2, 7.0 * k3, 9.0 * k4], theta2)
}

/// Inverts the radial distortion, `theta_d -> theta`.
///
/// Newton-Raphson with `theta_d` as the initial guess, residual
/// `distortion(theta) - theta_d` and jacobian [`distortion_jac`], at most
/// [`NEWTON_MAX_ITERS`] steps and tolerance [`NEWTON_TOL`]. A trial angle
/// beyond `max_theta` is outside the region where the distortion is known to
/// be invertible; the step callback reports a zero residual/jacobian pair
/// there, which the solver treats as non-convergence rather than a root.
///
/// Returns `(theta, converged)`. When `converged` is `false` the angle value
/// is unspecified and must not be used. Pass [`UNBOUNDED_THETA`] as
/// `max_theta` to disable the domain check.
pub fn undistortion(theta_d: f64, radial_coeffs: &[f64; 4], max_theta: f64) -> (f64, bool) {
    let func = |theta: f64| -> (f64, f64) {
        if theta > max_theta {
            return (0.0, 0.0);
        }
        let residual = distortion(theta, radial_coeffs) - theta_d;
        let jacobian = distortion_jac(theta, radial_coeffs);
        (residual, jacobian)
    };
    math::newton(func, theta_d, NEWTON_TOL, NEWTON_MAX_ITERS)
}

/// Computes the largest `max_theta` such that the distortion is monotonically
/// increasing on `[0, max_theta]`.
///
/// The distortion is
/// `f(theta) = theta * (1 + k1·theta² + k2·theta⁴ + k3·theta⁶ + k4·theta⁸)`
/// with derivative
/// `f'(theta) = 1 + 3k1·theta² + 5k2·theta⁴ + 7k3·theta⁶ + 9k4·theta⁸`,
/// so the bound is the smallest positive root of `f'`. Substituting
/// `x = theta²` reduces that to the quartic
/// `1 + 3k1·x + 5k2·x² + 7k3·x³ + 9k4·x⁴`.
///
/// Returns [`UNBOUNDED_THETA`] when `f'` has no positive root, i.e. the
/// model is invertible for every angle.
///
/// # Examples
///
/// ```rust
/// use fisheye_camera::fisheye::{monotonic_max_theta, MONOTONIC_GUESS, UNBOUNDED_THETA};
///
/// // The pure equidistant model is monotonic everywhere.
/// let bound = monotonic_max_theta(&[0.0; 4], MONOTONIC_GUESS);
/// assert_eq!(bound, UNBOUNDED_THETA);
/// ```
pub fn monotonic_max_theta(radial_coeffs: &[f64; 4], guess: f64) -> f64 {
    let [k1, k2, k3, k4] = *radial_coeffs;
    let x = math::poly_smallest_positive_root(
        &[1.0, 3.0 * k1, 5.0 * k2, 7.0 * k3, 9.0 * k4],
        0.0,
        guess,
        NEWTON_MAX_ITERS,
    );
    if x == UNBOUNDED_THETA {
        x
    } else {
        x.sqrt()
    }
}

/// Projects a 3D camera-frame point to a 2D pixel (undistorted).
///
/// Equidistant projection: `uv = atan(r)/r * xy` with `xy = (x, y)/z`, then
/// `pixel = focal_length ⊙ uv + principal_point`. When `r < min_2d_norm` the
/// point lies on the optical axis and the angular scaling collapses to its
/// limit 1, so `uv = xy`.
///
/// Total: every input with non-zero `z` yields a pixel.
pub fn project(
    camera_point: &Vector3<f64>,
    focal_length: &Vector2<f64>,
    principal_point: &Vector2<f64>,
    min_2d_norm: f64,
) -> Vector2<f64> {
    let xy = camera_point.xy() / camera_point.z;
    let r = math::stable_norm2(xy.x, xy.y);
    let uv = if r < min_2d_norm {
        // For points at the image center, there is no angular scaling
        xy
    } else {
        let theta = r.atan();
        theta / r * xy
    };
    focal_length.component_mul(&uv) + principal_point
}

/// Projects a 3D camera-frame point to a 2D pixel with radial distortion.
///
/// Identical to [`project`] except the incidence angle is distorted first:
/// `uv = distortion(theta)/r * xy`. Angles beyond `max_theta` lie outside
/// the invertible region of the distortion polynomial and are rejected with
/// `(zero, false)`.
///
/// Returns `(pixel, valid)`; the pixel must only be used when `valid`.
pub fn project_distorted(
    camera_point: &Vector3<f64>,
    focal_length: &Vector2<f64>,
    principal_point: &Vector2<f64>,
    radial_coeffs: &[f64; 4],
    min_2d_norm: f64,
    max_theta: f64,
) -> (Vector2<f64>, bool) {
    let xy = camera_point.xy() / camera_point.z;
    let r = math::stable_norm2(xy.x, xy.y);
    let uv = if r < min_2d_norm {
        // For points at the image center, there is no distortion
        xy
    } else {
        let theta = r.atan();
        if theta > max_theta {
            // Theta is too large, might be in the non-invertible region
            return (Vector2::zeros(), false);
        }
        let theta_d = distortion(theta, radial_coeffs);
        theta_d / r * xy
    };
    (focal_length.component_mul(&uv) + principal_point, true)
}

/// Computes the Jacobian of the undistorted projection,
/// `J = d(pixel) / d(camera_point)`, as a 2×3 matrix.
///
/// The chain is `pixel(uv(xy(p)))`: the 2×2 block `d(uv)/d(xy)` combines the
/// angular scaling `s = atan(r)/r` with the outer product of its radial
/// derivative against `xy`, and composes with the 2×3 derivative of the
/// perspective division. On the optical axis (`r < min_2d_norm`) the 2×2
/// block is exactly the identity, removing the removable singularity
/// analytically.
pub fn project_jac(
    camera_point: &Vector3<f64>,
    focal_length: &Vector2<f64>,
    min_2d_norm: f64,
) -> Matrix2x3<f64> {
    let invz = 1.0 / camera_point.z;
    let xy = camera_point.xy() * invz;
    let r = math::stable_norm2(xy.x, xy.y);

    let j_uv_xy = if r < min_2d_norm {
        Matrix2::identity()
    } else {
        let invr = 1.0 / r;
        let theta = r.atan();
        let s = theta * invr;
        let j_theta_r = 1.0 / (1.0 + r * r);
        // d(s)/d(xy) = (d(theta)/d(r) - s) / r^2 * xy
        let j_s_xy = (j_theta_r - s) * invr * invr * xy;
        s * Matrix2::identity() + j_s_xy * xy.transpose()
    };

    let j_im_xy = Matrix2::new(
        focal_length.x * j_uv_xy[(0, 0)],
        focal_length.x * j_uv_xy[(0, 1)],
        focal_length.y * j_uv_xy[(1, 0)],
        focal_length.y * j_uv_xy[(1, 1)],
    );
    let j_xy_cam = Matrix2x3::new(
        invz,
        0.0,
        -xy.x * invz,
        0.0,
        invz,
        -xy.y * invz,
    );
    j_im_xy * j_xy_cam
}

/// Reference Hessian of the undistorted projection.
///
/// Differentiates every term of the [`project_jac`] computation symbolically,
/// one partial at a time, and reassembles the two 3×3 second-derivative
/// matrices from the per-coordinate derivatives of the full 2×3 Jacobian.
/// Slower than [`project_hess`]; retained purely as an independent derivation
/// that the tests compare against the production version. Not intended for
/// production use.
pub fn project_hess_ref(
    camera_point: &Vector3<f64>,
    focal_length: &Vector2<f64>,
    min_2d_norm: f64,
) -> [Matrix3<f64>; 2] {
    let invz = 1.0 / camera_point.z;
    let invz2 = invz * invz;
    let xy = camera_point.xy() * invz;
    let r = math::stable_norm2(xy.x, xy.y);

    let mut j_uv_xy = Matrix2::identity();
    let mut d_j_uv_xy_dx = Matrix2::zeros();
    let mut d_j_uv_xy_dy = Matrix2::zeros();
    if r >= min_2d_norm {
        let invr = 1.0 / r;
        let invr2 = invr * invr;
        let theta = r.atan();
        let s = theta * invr;
        let j_theta_r = 1.0 / (1.0 + r * r);
        let tmp = (j_theta_r - s) * invr2;
        let xy_outer = xy * xy.transpose();
        j_uv_xy = s * Matrix2::identity() + tmp * xy_outer;

        let d_r_d_xy = xy * invr;
        let d_s_d_r = j_theta_r * invr - theta * invr2;
        let d_tmp_d_r = invr2 * (-2.0 * j_theta_r * j_theta_r * r - 3.0 * d_s_d_r);
        let d_s_d_xy = d_s_d_r * d_r_d_xy;
        let d_tmp_d_xy = d_tmp_d_r * d_r_d_xy;

        d_j_uv_xy_dx = d_s_d_xy.x * Matrix2::identity()
            + d_tmp_d_xy.x * xy_outer
            + tmp * Matrix2::new(2.0 * xy.x, xy.y, xy.y, 0.0);
        d_j_uv_xy_dy = d_s_d_xy.y * Matrix2::identity()
            + d_tmp_d_xy.y * xy_outer
            + tmp * Matrix2::new(0.0, xy.x, xy.x, 2.0 * xy.y);
    }

    let focal_diag = Matrix2::new(focal_length.x, 0.0, 0.0, focal_length.y);
    let j_im_xy = focal_diag * j_uv_xy;
    let d_j_im_xy_dx = focal_diag * d_j_uv_xy_dx;
    let d_j_im_xy_dy = focal_diag * d_j_uv_xy_dy;

    // Derivatives of the full 2x3 Jacobian J = J_im_xy * J_xy_cam with
    // respect to each camera coordinate. The third column picks up the
    // direct dependence of J_xy_cam on the point.
    let col_x = -(d_j_im_xy_dx * xy) - j_im_xy.column(0).into_owned();
    let d_j_d_cam_x = invz2
        * Matrix2x3::new(
            d_j_im_xy_dx[(0, 0)],
            d_j_im_xy_dx[(0, 1)],
            col_x.x,
            d_j_im_xy_dx[(1, 0)],
            d_j_im_xy_dx[(1, 1)],
            col_x.y,
        );
    let col_y = -(d_j_im_xy_dy * xy) - j_im_xy.column(1).into_owned();
    let d_j_d_cam_y = invz2
        * Matrix2x3::new(
            d_j_im_xy_dy[(0, 0)],
            d_j_im_xy_dy[(0, 1)],
            col_y.x,
            d_j_im_xy_dy[(1, 0)],
            d_j_im_xy_dy[(1, 1)],
            col_y.y,
        );

    let d_j_xy_cam_d_z = Matrix2x3::new(
        -invz2,
        0.0,
        xy.x * invz2,
        0.0,
        -invz2,
        xy.y * invz2,
    );
    let d_j_d_cam_z = -d_j_d_cam_x * xy.x - d_j_d_cam_y * xy.y + j_im_xy * d_j_xy_cam_d_z;

    // H[out][(i, j)] = d(J[(out, i)]) / d(camera_point[j])
    let d_j = [d_j_d_cam_x, d_j_d_cam_y, d_j_d_cam_z];
    let mut hessians = [Matrix3::zeros(); 2];
    for (out, hess) in hessians.iter_mut().enumerate() {
        for i in 0..3 {
            for (j, d_j_d_cam) in d_j.iter().enumerate() {
                hess[(i, j)] = d_j_d_cam[(out, i)];
            }
        }
    }
    hessians
}

/// Computes the Hessian of the undistorted projection,
/// `H[0] = d²u/dp², H[1] = d²v/dp²`, each a symmetric 3×3 matrix.
///
/// Precomputes the radial scaling `s = atan(r)/r` together with `ds/dr` and
/// `d²s/dr²`, lifts them to the gradient and Hessian of `s` in `xy`, and
/// contracts the 2×2×2 second-derivative tensor of `uv = s·xy` with the
/// Jacobian and Hessian of the perspective division `xy = (x, y)/z`. Each
/// output is scaled by its focal length.
///
/// On the optical axis all second derivatives of the angular term vanish and
/// only the curvature of the `1/z` division remains.
///
/// Validated against the term-by-term derivation in [`project_hess_ref`].
pub fn project_hess(
    camera_point: &Vector3<f64>,
    focal_length: &Vector2<f64>,
    min_2d_norm: f64,
) -> [Matrix3<f64>; 2] {
    let invz = 1.0 / camera_point.z;
    let x = camera_point.x * invz;
    let y = camera_point.y * invz;
    let r2 = x * x + y * y;
    let r = math::stable_norm2(x, y);
    let invr = if r > 0.0 { 1.0 / r } else { 0.0 };

    // s(r) = atan(r)/r and its first two radial derivatives; on the axis
    // s -> 1 and both derivatives vanish.
    let mut s = 1.0;
    let mut s1 = 0.0;
    let mut s2 = 0.0;
    if r > min_2d_norm {
        let theta = r.atan();
        let j_theta_r = 1.0 / (1.0 + r2);
        s = theta * invr;
        s1 = (j_theta_r - s) * invr;
        let d_j_theta_r = -2.0 * r * j_theta_r * j_theta_r;
        s2 = (d_j_theta_r - s1 - (j_theta_r - s) * invr) * invr;
    }

    // Gradient and Hessian of s in the xy plane
    let js = if r > min_2d_norm {
        s1 * invr * Vector2::new(x, y)
    } else {
        Vector2::zeros()
    };
    let mut hs = [[0.0; 2]; 2];
    if r > min_2d_norm {
        let invr2 = invr * invr;
        let c1 = s2 * invr2;
        let c2 = s1 * invr;
        hs[0][0] = c1 * x * x + c2 * (1.0 - x * x * invr2);
        hs[0][1] = c1 * x * y - c2 * x * y * invr2;
        hs[1][0] = hs[0][1];
        hs[1][1] = c1 * y * y + c2 * (1.0 - y * y * invr2);
    }

    // Jacobian (2x3) and Hessian (2x3x3) of xy = (x, y)/z
    let invz2 = invz * invz;
    let invz3 = invz2 * invz;
    let j_xy = [[invz, 0.0, -x * invz], [0.0, invz, -y * invz]];
    let mut h_xy = [[[0.0; 3]; 3]; 2];
    h_xy[0][0][2] = -invz2;
    h_xy[0][2][0] = -invz2;
    h_xy[0][2][2] = 2.0 * camera_point.x * invz3;
    h_xy[1][1][2] = -invz2;
    h_xy[1][2][1] = -invz2;
    h_xy[1][2][2] = 2.0 * camera_point.y * invz3;

    // Second derivatives of uv = s * xy in the xy plane:
    // d²(uv_i)/d(xy_j)d(xy_k) = Js_k δij + Js_j δik + xy_i Hs[j][k]
    let xy = [x, y];
    let mut h_uv = [[[0.0; 2]; 2]; 2];
    for i in 0..2 {
        for j in 0..2 {
            for k in 0..2 {
                let delta_ij = if i == j { js[k] } else { 0.0 };
                let delta_ik = if i == k { js[j] } else { 0.0 };
                h_uv[i][j][k] = delta_ij + delta_ik + xy[i] * hs[j][k];
            }
        }
    }

    // First derivatives of uv in the xy plane
    let j_uv = [[s + x * js.x, x * js.y], [y * js.x, s + y * js.y]];

    let mut hessians = [Matrix3::zeros(); 2];
    for (i, hess) in hessians.iter_mut().enumerate() {
        let mut h_tmp = [[0.0; 3]; 3];

        // H_uv contracted with J_xy on both slots
        for j in 0..2 {
            for k in 0..2 {
                for a in 0..3 {
                    for b in 0..3 {
                        h_tmp[a][b] += h_uv[i][j][k] * j_xy[j][a] * j_xy[k][b];
                    }
                }
            }
        }
        // J_uv contracted with H_xy
        for j in 0..2 {
            for a in 0..3 {
                for b in 0..3 {
                    h_tmp[a][b] += j_uv[i][j] * h_xy[j][a][b];
                }
            }
        }

        for (a, row) in h_tmp.iter().enumerate() {
            for (b, value) in row.iter().enumerate() {
                hess[(a, b)] = focal_length[i] * *value;
            }
        }
    }
    hessians
}

/// Unprojects a 2D pixel to a 3D ray direction (undistorted).
///
/// Inverts the equidistant projection: `uv = (pixel - principal_point) /
/// focal_length`, `theta = ‖uv‖`, direction `(sin(theta)/theta * uv,
/// cos(theta))`. A pixel at the image center maps to the forward axis.
///
/// The returned direction has unit norm. Total: never fails.
pub fn unproject(
    image_point: &Vector2<f64>,
    focal_length: &Vector2<f64>,
    principal_point: &Vector2<f64>,
    min_2d_norm: f64,
) -> Vector3<f64> {
    let uv = (image_point - principal_point).component_div(focal_length);
    let theta = uv.norm();

    if theta < min_2d_norm {
        // For points at the image center, the ray points straight forward
        return Vector3::new(0.0, 0.0, 1.0);
    }

    let xy = theta.sin() / theta * uv;
    Vector3::new(xy.x, xy.y, theta.cos())
}

/// Unprojects a 2D pixel to a 3D ray direction, inverting the radial
/// distortion.
///
/// `theta_d = ‖uv‖` is mapped back to the true incidence angle via
/// [`undistortion`]; the horizontal components then use `sin(theta)/theta_d *
/// uv` (note the division by the distorted radius, which `uv` carries) and
/// the forward component `cos(theta)`.
///
/// Returns `(direction, valid)` where `valid = false` with a zero direction
/// when the Newton iteration fails to converge or the angle exceeds
/// `max_theta`.
pub fn unproject_distorted(
    image_point: &Vector2<f64>,
    focal_length: &Vector2<f64>,
    principal_point: &Vector2<f64>,
    radial_coeffs: &[f64; 4],
    min_2d_norm: f64,
    max_theta: f64,
) -> (Vector3<f64>, bool) {
    let uv = (image_point - principal_point).component_div(focal_length);
    let theta_d = uv.norm();

    if theta_d < min_2d_norm {
        // For points at the image center, the ray points straight forward
        return (Vector3::new(0.0, 0.0, 1.0), true);
    }

    let (theta, converged) = undistortion(theta_d, radial_coeffs, max_theta);
    if !converged {
        return (Vector3::zeros(), false);
    }

    let xy = theta.sin() / theta_d * uv;
    (Vector3::new(xy.x, xy.y, theta.cos()), true)
}
