use mvo_core::nalgebra::{Matrix3, Vector3};

/// The left Jacobian of SO(3) at the scaled-axis rotation `omega`.
///
/// This relates a perturbation of the scaled-axis vector to the resulting
/// body rotation: `exp(omega + d) ≈ exp(J_l(omega)·d) · exp(omega)` for small
/// `d`, which is what the nonlinear solvers need to differentiate rotations
/// parameterized by scaled-axis increments away from the origin.
pub fn so3_left_jacobian(omega: &Vector3<f64>) -> Matrix3<f64> {
    let theta_squared = omega.norm_squared();
    let cross = omega.cross_matrix();
    if theta_squared < 1e-14 {
        // Second-order Taylor expansion around the identity.
        return Matrix3::identity() + 0.5 * cross;
    }
    let theta = theta_squared.sqrt();
    Matrix3::identity()
        + ((1.0 - theta.cos()) / theta_squared) * cross
        + ((theta - theta.sin()) / (theta_squared * theta)) * cross * cross
}
