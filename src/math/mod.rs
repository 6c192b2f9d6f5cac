//! Shared numeric utilities used by the projection core.
//!
//! Everything here is a pure function over plain scalars: polynomial
//! evaluation, a numerically stable 2-norm, a scalar Newton-Raphson solver and
//! a bracketing root finder for polynomials. The camera model in
//! [`crate::fisheye`] builds its distortion inverse and monotonic bound on top
//! of these.

/// Evaluates the polynomial `c[0] + c[1]*x + ... + c[N-1]*x^(N-1)` by
/// Horner's scheme.
pub fn eval_poly_horner<const N: usize>(coeffs: &[f64; N], x: f64) -> f64 {
    coeffs.iter().rev().fold(0.0, |acc, &c| acc * x + c)
}

/// Evaluates the derivative of the polynomial given by `coeffs` at `x`,
/// also by Horner's scheme.
fn eval_poly_deriv(coeffs: &[f64], x: f64) -> f64 {
    let mut acc = 0.0;
    for i in (1..coeffs.len()).rev() {
        acc = acc * x + i as f64 * coeffs[i];
    }
    acc
}

/// Computes `sqrt(a^2 + b^2)` without intermediate overflow or underflow
/// for extreme magnitudes.
pub fn stable_norm2(a: f64, b: f64) -> f64 {
    a.hypot(b)
}

/// Scalar Newton-Raphson iteration.
///
/// `func` maps a trial point to a `(residual, jacobian)` pair. The iteration
/// runs at most `max_iters` steps and reports convergence once the residual
/// magnitude drops below `tolerance`.
///
/// A zero jacobian is interpreted as "the trial point left the trusted
/// domain": callbacks report it together with a zero residual to veto a step,
/// and the solver terminates with `converged = false` rather than treating
/// the zero residual as a root.
pub fn newton<F>(func: F, initial_guess: f64, tolerance: f64, max_iters: usize) -> (f64, bool)
where
    F: Fn(f64) -> (f64, f64),
{
    let mut x = initial_guess;
    for _ in 0..max_iters {
        let (residual, jacobian) = func(x);
        if jacobian == 0.0 {
            return (x, false);
        }
        if residual.abs() < tolerance {
            return (x, true);
        }
        x -= residual / jacobian;
    }
    let (residual, jacobian) = func(x);
    (x, jacobian != 0.0 && residual.abs() < tolerance)
}

/// Finds the smallest root of the polynomial `coeffs` above `lower`.
///
/// The search walks outward from `lower` in steps scaled by `guess` until the
/// polynomial changes sign, then polishes the bracketed root with a
/// bisection-safeguarded Newton iteration of at most `max_iters` steps.
///
/// Returns [`f64::MAX`] as an "unbounded" sentinel when no sign change is
/// found; callers must treat that value as "no root exists".
pub fn poly_smallest_positive_root<const N: usize>(
    coeffs: &[f64; N],
    lower: f64,
    guess: f64,
    max_iters: usize,
) -> f64 {
    const MAX_BRACKET_STEPS: usize = 200;
    const STEP_GROWTH: f64 = 1.25;

    let mut a = lower;
    let mut fa = eval_poly_horner(coeffs, a);
    if fa == 0.0 {
        return a;
    }

    let mut step = if guess > lower {
        (guess - lower) / 16.0
    } else {
        0.1
    };
    let mut b = a;
    let mut bracketed = false;
    for _ in 0..MAX_BRACKET_STEPS {
        b = a + step;
        let fb = eval_poly_horner(coeffs, b);
        if fb == 0.0 {
            return b;
        }
        if fa.signum() != fb.signum() {
            bracketed = true;
            break;
        }
        a = b;
        fa = fb;
        step *= STEP_GROWTH;
    }
    if !bracketed {
        return f64::MAX;
    }

    // Newton from the bracket midpoint, falling back to bisection whenever
    // the Newton step would leave the bracket.
    let mut x = 0.5 * (a + b);
    for _ in 0..max_iters {
        let f = eval_poly_horner(coeffs, x);
        if f == 0.0 {
            return x;
        }
        if f.signum() == fa.signum() {
            a = x;
        } else {
            b = x;
        }
        let df = eval_poly_deriv(coeffs, x);
        let next = x - f / df;
        x = if df != 0.0 && next > a && next < b {
            next
        } else {
            0.5 * (a + b)
        };
    }
    x
}
