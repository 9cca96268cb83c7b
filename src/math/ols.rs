//! Linear least squares solver.
//!
//! Every Levenberg–Marquardt step solves a small damped linear problem
//!
//! ```text
//! minimize |J δ + r|^2 + λ |D δ|^2
//! ```
//!
//! which we write as one tall system `[J; sqrt(λ) D] δ = [-r; 0]` and hand to
//! SVD. The parameter dimension is tiny (2–6 columns), so SVD cost does not
//! matter, and it stays well behaved when columns are nearly collinear (e.g. a
//! Fermi width that barely changes the curve).
//! (Nalgebra's `QR::solve` is intended for square systems and will panic for
//! non-square matrices.)

use nalgebra::{DMatrix, DVector};

/// Minimum-norm solution of `x β ≈ y` via SVD.
///
/// `None` when no tolerance in the ladder yields a finite solution.
pub fn solve_least_squares(x: &DMatrix<f64>, y: &DVector<f64>) -> Option<DVector<f64>> {
    let svd = x.clone().svd(true, true);

    // Try progressively looser tolerances if strict solve fails.
    for &tol in &[1e-10, 1e-8, 1e-6] {
        if let Ok(beta) = svd.solve(y, tol) {
            if beta.iter().all(|v| v.is_finite()) {
                return Some(beta);
            }
        }
    }

    None
}

/// Solve the damped step `[J; sqrt(λ) D] δ = [-r; 0]`.
///
/// `scale` holds the diagonal of `D`.
pub fn solve_damped_step(
    jacobian: &DMatrix<f64>,
    residual: &DVector<f64>,
    scale: &[f64],
    lambda: f64,
) -> Option<DVector<f64>> {
    let (n, p) = jacobian.shape();
    let mut a = DMatrix::<f64>::zeros(n + p, p);
    let mut b = DVector::<f64>::zeros(n + p);

    a.view_mut((0, 0), (n, p)).copy_from(jacobian);
    for i in 0..n {
        b[i] = -residual[i];
    }
    let root_lambda = lambda.max(0.0).sqrt();
    for j in 0..p {
        a[(n + j, j)] = root_lambda * scale.get(j).copied().unwrap_or(1.0);
    }

    solve_least_squares(&a, &b)
}
