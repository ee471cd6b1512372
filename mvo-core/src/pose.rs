use derive_more::{AsMut, AsRef, From, Into};
use nalgebra::{IsometryMatrix3, Matrix3, Point3, Rotation3, Vector3};

/// A pose of the world relative to a camera, in the world-to-camera
/// convention: `p_camera = R * p_world + T`. It maps absolute positions into
/// vectors relative to the camera, whose positive `z` axis points forwards,
/// positive `y` down and positive `x` right.
#[derive(Debug, Clone, Copy, PartialEq, AsMut, AsRef, From, Into)]
pub struct WorldToCamera(pub IsometryMatrix3<f64>);

/// A relative pose that maps camera-frame points of camera `A` into the
/// camera frame of camera `B`.
#[derive(Debug, Clone, Copy, PartialEq, AsMut, AsRef, From, Into)]
pub struct CameraToCamera(pub IsometryMatrix3<f64>);

macro_rules! impl_pose {
    ($name:ident) => {
        impl $name {
            /// A pose with no change in position or orientation.
            pub fn identity() -> Self {
                Self(IsometryMatrix3::identity())
            }

            /// Creates the pose from a rotation matrix and a translation.
            pub fn from_parts(rotation: Matrix3<f64>, translation: Vector3<f64>) -> Self {
                Self(IsometryMatrix3::from_parts(
                    translation.into(),
                    Rotation3::from_matrix_unchecked(rotation),
                ))
            }

            pub fn rotation(&self) -> Matrix3<f64> {
                *self.0.rotation.matrix()
            }

            pub fn translation(&self) -> Vector3<f64> {
                self.0.translation.vector
            }

            /// Applies the pose to a point.
            pub fn transform(&self, point: Point3<f64>) -> Point3<f64> {
                self.0.transform_point(&point)
            }

            #[must_use]
            pub fn inverse(&self) -> Self {
                Self(self.0.inverse())
            }
        }
    };
}

impl_pose!(WorldToCamera);
impl_pose!(CameraToCamera);

impl WorldToCamera {
    /// The position of the camera's optical center in world coordinates,
    /// `-Rᵀ T`.
    pub fn center(&self) -> Point3<f64> {
        Point3::from(-(self.0.rotation.inverse() * self.0.translation.vector))
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn center_is_fixed_point() {
        let pose = WorldToCamera(IsometryMatrix3::from_parts(
            Vector3::new(0.3, -0.2, 1.4).into(),
            Rotation3::from_euler_angles(0.1, -0.4, 0.2),
        ));
        // The optical center maps to the camera-frame origin.
        let mapped = pose.transform(pose.center());
        assert!(mapped.coords.norm() < 1e-12);
    }
}
