use mvo_core::{
    nalgebra::{Matrix3, Point2, Vector2},
    NormalizedKeyPoint,
};

/// Hartley conditioning of one point set: translate the centroid to the
/// origin and scale so the mean distance from it is √2.
///
/// Returns the conditioned points together with the similarity transform `T`
/// that produced them (`conditioned = T * point` in homogeneous coordinates),
/// or `None` when the set is empty or collapses to a single location.
pub(crate) fn condition_points(
    points: &[NormalizedKeyPoint],
) -> Option<(Vec<Point2<f64>>, Similarity)> {
    if points.is_empty() {
        return None;
    }
    let mut mean = Vector2::zeros();
    for p in points {
        mean += p.coords;
    }
    mean /= points.len() as f64;

    let mut distance_sum = 0.0;
    for p in points {
        distance_sum += (p.coords - mean).norm();
    }
    if distance_sum <= f64::EPSILON {
        return None;
    }
    let scale = core::f64::consts::SQRT_2 * points.len() as f64 / distance_sum;

    let conditioned = points
        .iter()
        .map(|p| Point2::from((p.coords - mean) * scale))
        .collect();
    Some((conditioned, Similarity { scale, mean }))
}

/// The translate-then-scale transform produced by [`condition_points`].
pub(crate) struct Similarity {
    scale: f64,
    mean: Vector2<f64>,
}

impl Similarity {
    /// The transform as a homogeneous 3×3 matrix.
    pub(crate) fn matrix(&self) -> Matrix3<f64> {
        Matrix3::new(
            self.scale,
            0.0,
            -self.scale * self.mean.x,
            0.0,
            self.scale,
            -self.scale * self.mean.y,
            0.0,
            0.0,
            1.0,
        )
    }

    /// The inverse transform as a homogeneous 3×3 matrix.
    pub(crate) fn inverse_matrix(&self) -> Matrix3<f64> {
        Matrix3::new(
            1.0 / self.scale,
            0.0,
            self.mean.x,
            0.0,
            1.0 / self.scale,
            self.mean.y,
            0.0,
            0.0,
            1.0,
        )
    }
}
