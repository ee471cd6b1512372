//! Minimal perspective-three-point pose solver.
//!
//! Implements the "Lambda Twist" formulation (Persson and Nordberg, ECCV
//! 2018): the three depth values are recovered from the intersection of two
//! quadrics through a single cubic root and an eigen decomposition of a
//! singular 3×3 matrix, then polished by a few Gauss-Newton steps before the
//! rotation and translation are read off. Returns up to four `(R, T)`
//! candidates satisfying `λᵢ·yᵢ = R·xᵢ + T`.

use arrayvec::ArrayVec;
use mvo_core::nalgebra::{Matrix3, Rotation3, Vector3};

const DEPTH_REFINE_ITERATIONS: usize = 5;
const ROTATION_EPSILON: f64 = 1e-12;
const ROTATION_ITERATIONS: usize = 100;

/// Solves for camera poses from three world points `x` and the unit bearings
/// `y` observing them.
pub(crate) fn solve(
    x: [Vector3<f64>; 3],
    y: [Vector3<f64>; 3],
) -> ArrayVec<(Matrix3<f64>, Vector3<f64>), 4> {
    let mut poses = ArrayVec::new();

    let d12 = x[0] - x[1];
    let d13 = x[0] - x[2];
    let d12xd13 = d12.cross(&d13);
    let a12 = d12.norm_squared();
    let a13 = d13.norm_squared();
    let a23 = (x[1] - x[2]).norm_squared();

    let c12 = y[0].dot(&y[1]);
    let c23 = y[1].dot(&y[2]);
    let c31 = y[2].dot(&y[0]);
    let blob = c12 * c23 * c31 - 1.0;
    let s12_sqr = 1.0 - c12 * c12;
    let s23_sqr = 1.0 - c23 * c23;
    let s31_sqr = 1.0 - c31 * c31;
    let b12 = -2.0 * c12;
    let b13 = -2.0 * c31;
    let b23 = -2.0 * c23;

    // Coefficients of the cubic resolvent, equation (10) in the paper.
    let p3 = a13 * (a23 * s31_sqr - a13 * s23_sqr);
    let p2 = 2.0 * blob * a23 * a13
        + a13 * (2.0 * a12 + a13) * s23_sqr
        + a23 * (a23 - a12) * s31_sqr;
    let p1 = a23 * (a13 - a23) * s12_sqr
        - a12 * a12 * s23_sqr
        - 2.0 * a12 * (blob * a23 + a13 * s23_sqr);
    let p0 = a12 * (a12 * s23_sqr - a23 * s12_sqr);

    let g = sharpest_cubic_root(p2 / p3, p1 / p3, p0 / p3);
    if !g.is_finite() {
        return poses;
    }

    // The singular quadric blend D0 and its eigen decomposition.
    let d0_01 = -(a23 * c12);
    let d0_02 = a23 * c31 * g;
    let d0_12 = -c23 * (a13 * g - a12);
    #[rustfmt::skip]
    let d0 = Matrix3::new(
        a23 * (1.0 - g),      d0_01,                d0_02,
        d0_01,                a23 - a12 + a13 * g,  d0_12,
        d0_02,                d0_12,                g * (a13 - a23) - a12,
    );
    let (vectors, values) = singular_symmetric_eigen(d0);
    let eigen_ratio = (0.0f64.max(-values[1] / values[0])).sqrt();

    // Each sign of the eigen ratio yields a quadratic in tau whose positive
    // roots produce candidate depth triplets, equations (15) and (16).
    let mut depths: ArrayVec<Vector3<f64>, 4> = ArrayVec::new();
    for ratio in [eigen_ratio, -eigen_ratio] {
        let w2 = 1.0 / (ratio * vectors.m12 - vectors.m11);
        let w0 = w2 * (vectors.m21 - ratio * vectors.m22);
        let w1 = w2 * (vectors.m31 - ratio * vectors.m32);

        let a = 1.0 / ((a13 - a12) * w1 * w1 - a12 * b13 * w1 - a12);
        let b = a * (a13 * b12 * w1 - a12 * b13 * w0 - 2.0 * w0 * w1 * (a12 - a13));
        let c = a * ((a13 - a12) * w0 * w0 + a13 * b12 * w0 + a13);
        if b * b - 4.0 * c < 0.0 {
            continue;
        }
        let (tau_a, tau_b) = stable_quadratic_roots(b, c);
        for tau in [tau_a, tau_b] {
            if tau <= 0.0 {
                continue;
            }
            let d = a23 / (tau * (b23 + tau) + 1.0);
            if d <= 0.0 {
                continue;
            }
            let l2 = d.sqrt();
            let l3 = tau * l2;
            let l1 = w0 * l2 + w1 * l3;
            if l1 >= 0.0 && !depths.is_full() {
                depths.push(Vector3::new(l1, l2, l3));
            }
        }
    }

    // Recover R and T from each depth triplet.
    let x_mat = Matrix3::from_columns(&[d12, d13, d12xd13]);
    let x_inv = match x_mat.try_inverse() {
        Some(inverse) => inverse,
        None => return poses,
    };
    for depth in depths {
        let depth = refine_depths(depth, a12, a13, a23, b12, b13, b23);
        let ry1 = depth.x * y[0];
        let ry2 = depth.y * y[1];
        let ry3 = depth.z * y[2];
        let yd1 = ry1 - ry2;
        let yd2 = ry1 - ry3;
        let y_mat = Matrix3::from_columns(&[yd1, yd2, yd1.cross(&yd2)]);
        let rotation = y_mat * x_inv;
        let translation = ry1 - rotation * x[0];
        // Snap to the closest proper rotation; the linear solve does not
        // guarantee orthonormality.
        let rotation = *Rotation3::from_matrix_eps(
            &rotation,
            ROTATION_EPSILON,
            ROTATION_ITERATIONS,
            Rotation3::identity(),
        )
        .matrix();
        poses.push((rotation, translation));
    }
    poses
}

/// Polishes a depth triplet against the three inter-point distance
/// constraints with a damped Gauss-Newton iteration on the closed-form
/// inverse Jacobian.
fn refine_depths(
    lambda: Vector3<f64>,
    a12: f64,
    a13: f64,
    a23: f64,
    b12: f64,
    b13: f64,
    b23: f64,
) -> Vector3<f64> {
    let residual = |l: &Vector3<f64>| {
        Vector3::new(
            l.x * l.x + l.y * l.y + b12 * l.x * l.y - a12,
            l.x * l.x + l.z * l.z + b13 * l.x * l.z - a13,
            l.y * l.y + l.z * l.z + b23 * l.y * l.z - a23,
        )
    };
    let l1_norm = |v: &Vector3<f64>| v.x.abs() + v.y.abs() + v.z.abs();

    let mut current = lambda;
    let mut res = residual(&current);
    for _ in 0..DEPTH_REFINE_ITERATIONS {
        if l1_norm(&res) < 1e-10 {
            break;
        }
        let dr1dl1 = 2.0 * current.x + b12 * current.y;
        let dr1dl2 = 2.0 * current.y + b12 * current.x;
        let dr2dl1 = 2.0 * current.x + b13 * current.z;
        let dr2dl3 = 2.0 * current.z + b13 * current.x;
        let dr3dl2 = 2.0 * current.y + b23 * current.z;
        let dr3dl3 = 2.0 * current.z + b23 * current.y;
        let det = 1.0 / (-dr1dl1 * dr2dl3 * dr3dl2 - dr1dl2 * dr2dl1 * dr3dl3);

        #[rustfmt::skip]
        let adjugate = Matrix3::new(
            -dr2dl3 * dr3dl2, -dr1dl2 * dr3dl3,  dr1dl2 * dr2dl3,
            -dr2dl1 * dr3dl3,  dr1dl1 * dr3dl3, -dr1dl1 * dr2dl3,
             dr2dl1 * dr3dl2, -dr1dl1 * dr3dl2, -dr1dl2 * dr2dl1,
        );
        let next = current - det * (adjugate * res);
        let next_res = residual(&next);
        if l1_norm(&next_res) > l1_norm(&res) {
            break;
        }
        current = next;
        res = next_res;
    }
    current
}

/// The real roots of `r² + b·r + c = 0`, computed in the numerically stable
/// form. When the discriminant is negative, returns the (double) vertex.
fn stable_quadratic_roots(b: f64, c: f64) -> (f64, f64) {
    let discriminant = b * b - 4.0 * c;
    if discriminant < 0.0 {
        let vertex = -0.5 * b;
        (vertex, vertex)
    } else if b < 0.0 {
        let y = discriminant.sqrt();
        (0.5 * (-b + y), 2.0 * c / (-b + y))
    } else {
        let y = discriminant.sqrt();
        (2.0 * c / (-b - y), 0.5 * (-b - y))
    }
}

/// One real root of `r³ + b·r² + c·r + d = 0`, chosen where the derivative is
/// largest so the Newton-Raphson polish converges sharply. The starting point
/// considers the stationary points of the cubic and a second-order
/// approximation around whichever of them brackets a sign change.
fn sharpest_cubic_root(b: f64, c: f64, d: f64) -> f64 {
    let mut r0;
    if b * b >= 3.0 * c {
        // Two stationary points t1 < t2; expand around the one with h > 0.
        let v = (b * b - 3.0 * c).sqrt();
        let t1 = (-b - v) / 3.0;
        let h_t1 = ((t1 + b) * t1 + c) * t1 + d;
        if h_t1 > 0.0 {
            r0 = t1 - (-h_t1 / (3.0 * t1 + b)).sqrt();
        } else {
            let t2 = (-b + v) / 3.0;
            let h_t2 = ((t2 + b) * t2 + c) * t2 + d;
            r0 = t2 + (-h_t2 / (3.0 * t2 + b)).sqrt();
        }
    } else {
        // Monotonic cubic; start at the inflection unless the derivative
        // vanishes there.
        r0 = -b / 3.0;
        if ((3.0 * r0 + 2.0 * b) * r0 + c).abs() < 1e-4 {
            r0 += 1.0;
        }
    }

    for _ in 0..7 {
        let fx = ((r0 + b) * r0 + c) * r0 + d;
        let fpx = (3.0 * r0 + 2.0 * b) * r0 + c;
        r0 -= fx / fpx;
    }
    for _ in 0..43 {
        let fx = ((r0 + b) * r0 + c) * r0 + d;
        if fx.abs() <= 1e-13 {
            break;
        }
        let fpx = (3.0 * r0 + 2.0 * b) * r0 + c;
        r0 -= fx / fpx;
    }
    r0
}

/// Eigen decomposition of a symmetric matrix known to be singular: the zero
/// eigenvector comes from a cross product of rows, the remaining pair from
/// the quadratic characteristic polynomial of the reduced problem.
/// Eigenvalues are returned largest-magnitude first, the zero last.
fn singular_symmetric_eigen(m: Matrix3<f64>) -> (Matrix3<f64>, Vector3<f64>) {
    let mut null_vector = Vector3::new(
        m[1] * m[5] - m[2] * m[4],
        m[2] * m[3] - m[5] * m[0],
        m[4] * m[0] - m[1] * m[3],
    );
    null_vector.normalize_mut();

    let m12_sqr = m.m12 * m.m12;
    let b = -m.m11 - m.m22 - m.m33;
    let c = -m12_sqr - m.m13 * m.m13 - m.m23 * m.m23 + m.m11 * (m.m22 + m.m33) + m.m22 * m.m33;
    let (mut e1, mut e2) = stable_quadratic_roots(b, c);
    if e1.abs() < e2.abs() {
        core::mem::swap(&mut e1, &mut e2);
    }

    let neg_m11_m22 = -m.m11 * m.m22;
    let prec_0 = m.m12 * m.m23 - m.m13 * m.m22;
    let prec_1 = m.m12 * m.m13 - m.m11 * m.m23;
    let eigenvector = |e: f64| {
        let tmp = 1.0 / (e * (m.m11 + m.m22) + neg_m11_m22 - e * e + m12_sqr);
        let a1 = -(e * m.m13 + prec_0) * tmp;
        let a2 = -(e * m.m23 + prec_1) * tmp;
        let inv_norm = 1.0 / (a1 * a1 + a2 * a2 + 1.0).sqrt();
        Vector3::new(a1 * inv_norm, a2 * inv_norm, inv_norm)
    };

    (
        Matrix3::from_columns(&[eigenvector(e1), eigenvector(e2), null_vector]),
        Vector3::new(e1, e2, 0.0),
    )
}
