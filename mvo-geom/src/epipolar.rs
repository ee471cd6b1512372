use crate::conditioning::condition_points;
use mvo_core::{
    nalgebra::{Matrix3, OMatrix, OVector, Point2, Vector3, U9},
    NormalizedKeyPoint,
};

const EIGEN_EPSILON: f64 = 1e-12;
const EIGEN_ITERATIONS: usize = 1000;

/// Estimates the essential matrix `E` satisfying `pb̃ᵀ · E · pã = 0` for
/// corresponding normalized keypoints, where `pã`/`pb̃` are the homogeneous
/// coordinates of `pa`/`pb`, by the eight-point linear algorithm of Hartley
/// and Zisserman with isotropic point conditioning.
///
/// Requires at least 8 correspondences. The result does not yet satisfy the
/// rank-2 essential constraint; pass it through [`fix_essential`].
pub fn solve_essential(pa: &[NormalizedKeyPoint], pb: &[NormalizedKeyPoint]) -> Option<Matrix3<f64>> {
    if pa.len() != pb.len() || pa.len() < 8 {
        return None;
    }
    let (na, ta) = condition_points(pa)?;
    let (nb, tb) = condition_points(pb)?;
    let conditioned = essential_dlt(&na, &nb)?;
    // The constraint on conditioned points is (Tb·pb̃)ᵀ Eₙ (Ta·pã) = 0, so the
    // matrix on the original points is Tbᵀ·Eₙ·Ta.
    Some(tb.matrix().transpose() * conditioned * ta.matrix())
}

/// The epipolar direct linear transform on already-conditioned points.
///
/// The null vector of the N×9 design matrix is recovered as the eigenvector
/// of the smallest eigenvalue of AᵀA, since a thin SVD of the design matrix
/// cannot produce it.
fn essential_dlt(pa: &[Point2<f64>], pb: &[Point2<f64>]) -> Option<Matrix3<f64>> {
    let mut ata = OMatrix::<f64, U9, U9>::zeros();
    for (a, b) in pa.iter().zip(pb) {
        let row = OVector::<f64, U9>::from_column_slice(&[
            a.x * b.x,
            a.x * b.y,
            a.x,
            a.y * b.x,
            a.y * b.y,
            a.y,
            b.x,
            b.y,
            1.0,
        ]);
        ata += row * row.transpose();
    }
    smallest_eigenvector(ata)
}

/// Extracts the eigenvector of the smallest eigenvalue of a symmetric 9×9
/// matrix and reinterprets it column-major as a 3×3 matrix.
pub(crate) fn smallest_eigenvector(ata: OMatrix<f64, U9, U9>) -> Option<Matrix3<f64>> {
    let eigens = ata.try_symmetric_eigen(EIGEN_EPSILON, EIGEN_ITERATIONS)?;
    let mut smallest = 0;
    for ix in 1..9 {
        if eigens.eigenvalues[ix] < eigens.eigenvalues[smallest] {
            smallest = ix;
        }
    }
    let vector = eigens.eigenvectors.column(smallest);
    Some(Matrix3::from_iterator(vector.iter().copied()))
}

/// Enforces the essential-matrix constraint: a rank-2 matrix whose two
/// nonzero singular values are equal. The singular values are replaced by
/// `{1, 1, 0}`, which also normalizes the (arbitrary) scale of the estimate.
pub fn fix_essential(e: &Matrix3<f64>) -> Option<Matrix3<f64>> {
    let mut svd = e.try_svd(true, true, EIGEN_EPSILON, EIGEN_ITERATIONS)?;
    svd.singular_values[0] = 1.0;
    svd.singular_values[1] = 1.0;
    svd.singular_values[2] = 0.0;
    svd.recompose().ok()
}

/// The two candidate rotations and the translation direction recovered from
/// an essential matrix. `E` and `-E` satisfy the same epipolar constraint, so
/// the translation sign is also undetermined, giving four pose hypotheses in
/// total; only chirality voting over triangulated points can pick the real
/// one.
#[derive(Debug, Clone, Copy)]
pub struct EssentialDecomposition {
    pub rotations: [Matrix3<f64>; 2],
    pub translation: Vector3<f64>,
}

impl EssentialDecomposition {
    /// All four `(R, T)` hypotheses in a fixed order.
    pub fn hypotheses(&self) -> [(Matrix3<f64>, Vector3<f64>); 4] {
        let [r1, r2] = self.rotations;
        let t = self.translation;
        [(r1, t), (r2, t), (r1, -t), (r2, -t)]
    }
}

/// Decomposes an essential matrix into two candidate rotations and a
/// translation direction, following Horn, "Recovering Baseline and
/// Orientation from 'Essential' Matrix" (1990).
///
/// The translation is recovered from the largest-magnitude pairwise cross
/// product of the columns of `E`, which picks the numerically best
/// conditioned of the three equivalent expressions.
pub fn decompose_essential(e: &Matrix3<f64>) -> Option<EssentialDecomposition> {
    let half_trace = 0.5 * (e * e.transpose()).trace();

    let column = |ix: usize| e.column(ix).into_owned();
    let e0e1 = column(0).cross(&column(1));
    let e1e2 = column(1).cross(&column(2));
    let e2e0 = column(2).cross(&column(0));

    let largest = if e0e1.norm() > e1e2.norm() && e0e1.norm() > e2e0.norm() {
        e0e1
    } else if e1e2.norm() > e0e1.norm() && e1e2.norm() > e2e0.norm() {
        e1e2
    } else {
        e2e0
    };
    if largest.norm() <= f64::EPSILON || half_trace <= f64::EPSILON {
        return None;
    }
    let b = largest.normalize() * half_trace.sqrt();

    let cofactors_t = Matrix3::from_columns(&[e1e2, e2e0, e0e1]);
    let scale = 1.0 / b.dot(&b);
    Some(EssentialDecomposition {
        rotations: [
            (cofactors_t - b.cross_matrix() * e) * scale,
            (cofactors_t + b.cross_matrix() * e) * scale,
        ],
        translation: b,
    })
}

#[cfg(test)]
mod tests {
    use super::*;
    use mvo_core::nalgebra::{Point3, Rotation3};

    fn synthetic_pair() -> (Matrix3<f64>, Vector3<f64>, Vec<NormalizedKeyPoint>, Vec<NormalizedKeyPoint>) {
        let rotation = *Rotation3::from_euler_angles(0.02, -0.07, 0.05).matrix();
        let translation = Vector3::new(0.4, -0.1, 0.05);
        let points = [
            Point3::new(-0.5, 0.3, 3.0),
            Point3::new(0.7, -0.2, 4.5),
            Point3::new(0.1, 0.6, 2.5),
            Point3::new(-0.8, -0.4, 5.0),
            Point3::new(0.3, 0.1, 3.4),
            Point3::new(-0.2, -0.7, 2.8),
            Point3::new(0.9, 0.5, 6.0),
            Point3::new(-0.4, 0.8, 3.7),
            Point3::new(0.5, -0.6, 4.1),
            Point3::new(0.0, 0.2, 2.2),
        ];
        let mut pa = Vec::new();
        let mut pb = Vec::new();
        for p in points {
            let q = rotation * p.coords + translation;
            pa.push(NormalizedKeyPoint(Point2::new(p.x / p.z, p.y / p.z)));
            pb.push(NormalizedKeyPoint(Point2::new(q.x / q.z, q.y / q.z)));
        }
        (rotation, translation, pa, pb)
    }

    fn epipolar_residual(e: &Matrix3<f64>, a: NormalizedKeyPoint, b: NormalizedKeyPoint) -> f64 {
        (b.homogeneous().transpose() * e * a.homogeneous())[0].abs()
    }

    #[test]
    fn solve_essential_satisfies_epipolar_constraint() {
        let (_, _, pa, pb) = synthetic_pair();
        let e = fix_essential(&solve_essential(&pa, &pb).unwrap()).unwrap();
        for (&a, &b) in pa.iter().zip(&pb) {
            assert!(epipolar_residual(&e, a, b) < 1e-6);
        }
    }

    #[test]
    fn fix_essential_enforces_singular_values() {
        let (_, _, pa, pb) = synthetic_pair();
        let e = fix_essential(&solve_essential(&pa, &pb).unwrap()).unwrap();
        let svd = e.svd(true, true);
        assert!((svd.singular_values[0] - svd.singular_values[1]).abs() < 1e-9);
        assert!(svd.singular_values[2].abs() < 1e-9);
    }

    #[test]
    fn decompose_essential_contains_true_motion() {
        let (rotation, translation, _, _) = synthetic_pair();
        let e = fix_essential(&(translation.cross_matrix() * rotation)).unwrap();
        let decomposition = decompose_essential(&e).unwrap();
        let direction = translation.normalize();
        let rotation_matches = decomposition
            .rotations
            .iter()
            .any(|r| (r - rotation).norm() < 1e-6);
        let translation_matches = decomposition.translation.normalize().dot(&direction).abs() > 1.0 - 1e-9;
        assert!(rotation_matches);
        assert!(translation_matches);
    }

    #[test]
    fn too_few_points_is_rejected() {
        let (_, _, pa, pb) = synthetic_pair();
        assert!(solve_essential(&pa[..7], &pb[..7]).is_none());
    }
}
