use crate::conditioning::condition_points;
use crate::epipolar::smallest_eigenvector;
use mvo_core::{
    nalgebra::{Matrix3, OMatrix, OVector, Point2, U9},
    NormalizedKeyPoint,
};

/// Estimates the planar homography `H` mapping `pa` onto `pb`
/// (`pb̃ × H·pã = 0` in homogeneous coordinates) by the normalized direct
/// linear transform. Requires at least 4 correspondences.
pub fn solve_homography(
    pa: &[NormalizedKeyPoint],
    pb: &[NormalizedKeyPoint],
) -> Option<Matrix3<f64>> {
    if pa.len() != pb.len() || pa.len() < 4 {
        return None;
    }
    let (na, ta) = condition_points(pa)?;
    let (nb, tb) = condition_points(pb)?;
    let conditioned = homography_dlt(&na, &nb)?;
    // Hₙ maps Ta·pã onto Tb·pb̃, so the map on the original points is
    // Tb⁻¹·Hₙ·Ta.
    Some(tb.inverse_matrix() * conditioned * ta.matrix())
}

/// The homography direct linear transform on already-conditioned points: two
/// rows of the design matrix per correspondence, null vector from the
/// smallest eigenvalue of AᵀA.
fn homography_dlt(pa: &[Point2<f64>], pb: &[Point2<f64>]) -> Option<Matrix3<f64>> {
    let mut ata = OMatrix::<f64, U9, U9>::zeros();
    for (a, b) in pa.iter().zip(pb) {
        let row0 = OVector::<f64, U9>::from_column_slice(&[
            0.0,
            -a.x,
            a.x * b.y,
            0.0,
            -a.y,
            a.y * b.y,
            0.0,
            -1.0,
            b.y,
        ]);
        let row1 = OVector::<f64, U9>::from_column_slice(&[
            a.x,
            0.0,
            -a.x * b.x,
            a.y,
            0.0,
            -a.y * b.x,
            1.0,
            0.0,
            -b.x,
        ]);
        ata += row0 * row0.transpose() + row1 * row1.transpose();
    }
    smallest_eigenvector(ata)
}
