use derive_more::{AsMut, AsRef, Deref, DerefMut, From, Into};
use nalgebra::{Point2, Vector3};

/// A point in normalized image coordinates. The keypoint has been corrected
/// for distortion, made relative to the principal point, and divided by the
/// focal length, so it lives on the virtual image plane at `z = 1.0`.
///
/// For pixel coordinates, see [`crate::CameraIntrinsics`], which converts
/// between the two.
#[derive(Debug, Clone, Copy, PartialEq, PartialOrd, AsMut, AsRef, Deref, DerefMut, From, Into)]
pub struct NormalizedKeyPoint(pub Point2<f64>);

impl NormalizedKeyPoint {
    /// The homogeneous coordinate of the keypoint, which is also the bearing
    /// (of unnormalized length) pointing from the optical center through the
    /// keypoint on the virtual image plane.
    pub fn homogeneous(self) -> Vector3<f64> {
        self.0.coords.push(1.0)
    }

    /// Euclidean distance to another normalized keypoint.
    pub fn distance(self, other: NormalizedKeyPoint) -> f64 {
        (self.0 - other.0).norm()
    }
}

/// A point in pixel coordinates, straight off the image sensor.
#[derive(Debug, Clone, Copy, PartialEq, PartialOrd, AsMut, AsRef, Deref, DerefMut, From, Into)]
pub struct KeyPoint(pub Point2<f64>);
