use crate::{KeyPoint, NormalizedKeyPoint};
use nalgebra::{Matrix3, Point2, Vector2};

/// Pinhole camera intrinsic parameters, fixed for a tracking session.
///
/// These describe the upper-triangular calibration matrix
///
/// ```text
/// K = | fx  s  cx |
///     |  0 fy  cy |
///     |  0  0   1 |
/// ```
///
/// and are used to convert between pixel and normalized image coordinates,
/// and in particular to express pixel-level noise thresholds in normalized
/// units and back.
#[derive(Debug, Clone, Copy, PartialEq, PartialOrd)]
pub struct CameraIntrinsics {
    pub focals: Vector2<f64>,
    pub principal_point: Point2<f64>,
    pub skew: f64,
}

impl CameraIntrinsics {
    /// Identity intrinsics: pixel coordinates are already normalized.
    pub fn identity() -> Self {
        Self {
            focals: Vector2::new(1.0, 1.0),
            principal_point: Point2::new(0.0, 0.0),
            skew: 0.0,
        }
    }

    pub fn focals(self, focals: Vector2<f64>) -> Self {
        Self { focals, ..self }
    }

    /// Sets both focal lengths to the same value.
    pub fn focal(self, focal: f64) -> Self {
        Self {
            focals: Vector2::new(focal, focal),
            ..self
        }
    }

    pub fn principal_point(self, principal_point: Point2<f64>) -> Self {
        Self {
            principal_point,
            ..self
        }
    }

    pub fn skew(self, skew: f64) -> Self {
        Self { skew, ..self }
    }

    /// The calibration matrix `K`.
    pub fn matrix(&self) -> Matrix3<f64> {
        Matrix3::new(
            self.focals.x,
            self.skew,
            self.principal_point.x,
            0.0,
            self.focals.y,
            self.principal_point.y,
            0.0,
            0.0,
            1.0,
        )
    }

    /// Converts a pixel keypoint into normalized image coordinates.
    pub fn normalize(&self, point: KeyPoint) -> NormalizedKeyPoint {
        let y = (point.y - self.principal_point.y) / self.focals.y;
        let x = (point.x - self.principal_point.x - self.skew * y) / self.focals.x;
        NormalizedKeyPoint(Point2::new(x, y))
    }

    /// Converts a normalized keypoint back into pixel coordinates.
    pub fn unnormalize(&self, point: NormalizedKeyPoint) -> KeyPoint {
        KeyPoint(Point2::new(
            self.focals.x * point.x + self.skew * point.y + self.principal_point.x,
            self.focals.y * point.y + self.principal_point.y,
        ))
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn normalize_round_trip() {
        let intrinsics = CameraIntrinsics::identity()
            .focals(Vector2::new(520.0, 510.0))
            .principal_point(Point2::new(320.5, 240.5))
            .skew(0.3);
        let original = KeyPoint(Point2::new(87.0, 401.25));
        let restored = intrinsics.unnormalize(intrinsics.normalize(original));
        assert!((original.0 - restored.0).norm() < 1e-12);
    }
}
