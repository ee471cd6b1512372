use crate::{Keyframe, TrackingError};
use levenberg_marquardt::{LeastSquaresProblem, LevenbergMarquardt};
use log::debug;
use mvo_core::nalgebra::{
    storage::Owned, DMatrix, DVector, Dynamic, Matrix2x3, Point3, UnitQuaternion, Vector2, Vector3,
    U1,
};
use mvo_geom::so3_left_jacobian;

/// Loss value substituted for an observation whose point falls on or behind
/// the image plane mid-iteration. The residual is pinned and its gradient
/// zeroed, which pushes the solver back towards the feasible region without
/// poisoning the normal equations.
const DEGENERATE_RESIDUAL: f64 = 1e3;
const MIN_DEPTH: f64 = 1e-9;

/// Joint nonlinear refinement of keyframe poses and landmark positions
/// minimizing Huber-weighted pixel reprojection error.
///
/// Rotations are optimized as scaled-axis deltas composed onto the stored
/// unit quaternions, so the quaternions stay unit-norm by construction. The
/// translations of the first `fixed_translations` keyframes are held constant
/// to fix the gauge (origin and scale) of the reconstruction.
pub(crate) fn bundle_adjust(
    keyframes: &mut [Keyframe],
    landmarks: &mut [Point3<f64>],
    fixed_translations: usize,
    focals: Vector2<f64>,
    huber_width: f64,
    patience: usize,
) -> Result<(), TrackingError> {
    let observations: Vec<Observation> = keyframes
        .iter()
        .enumerate()
        .flat_map(|(keyframe, pose)| {
            pose.observations.iter().map(move |(&landmark, &point)| Observation {
                keyframe,
                landmark,
                point: point.coords,
            })
        })
        .collect();
    if observations.is_empty() {
        return Err(TrackingError::BundleAdjustmentFailed);
    }

    let problem = BundleProblem {
        base_rotations: keyframes.iter().map(|k| k.rotation).collect(),
        deltas: vec![Vector3::zeros(); keyframes.len()],
        translations: keyframes.iter().map(|k| k.translation).collect(),
        landmarks: landmarks.iter().map(|p| p.coords).collect(),
        observations,
        fixed_translations: fixed_translations.min(keyframes.len()),
        focals,
        huber_width,
    };

    let (problem, report) = LevenbergMarquardt::new()
        .with_patience(patience)
        .minimize(problem);
    debug!(
        "bundle adjustment finished after {} evaluations with objective {:.6}",
        report.number_of_evaluations, report.objective_function
    );
    if !report.termination.was_successful() || !report.objective_function.is_finite() {
        return Err(TrackingError::BundleAdjustmentFailed);
    }

    for (keyframe, (delta, translation)) in keyframes
        .iter_mut()
        .zip(problem.deltas.iter().zip(&problem.translations))
    {
        keyframe.rotation = UnitQuaternion::from_scaled_axis(*delta) * keyframe.rotation;
        keyframe.translation = *translation;
    }
    for (landmark, position) in landmarks.iter_mut().zip(&problem.landmarks) {
        *landmark = Point3::from(*position);
    }
    Ok(())
}

struct Observation {
    keyframe: usize,
    landmark: usize,
    point: Vector2<f64>,
}

/// The least-squares problem behind [`bundle_adjust`].
///
/// Parameter layout: scaled-axis rotation deltas for every keyframe, then
/// translations of the non-gauge keyframes, then landmark positions. Two
/// residual rows per observation.
struct BundleProblem {
    base_rotations: Vec<UnitQuaternion<f64>>,
    deltas: Vec<Vector3<f64>>,
    translations: Vec<Vector3<f64>>,
    landmarks: Vec<Vector3<f64>>,
    observations: Vec<Observation>,
    fixed_translations: usize,
    focals: Vector2<f64>,
    huber_width: f64,
}

impl BundleProblem {
    fn rotation_column(&self, keyframe: usize) -> usize {
        3 * keyframe
    }

    fn translation_column(&self, keyframe: usize) -> Option<usize> {
        (keyframe >= self.fixed_translations)
            .then(|| 3 * self.base_rotations.len() + 3 * (keyframe - self.fixed_translations))
    }

    fn landmark_column(&self, landmark: usize) -> usize {
        3 * self.base_rotations.len()
            + 3 * (self.base_rotations.len() - self.fixed_translations)
            + 3 * landmark
    }

    fn parameter_count(&self) -> usize {
        self.landmark_column(self.landmarks.len())
    }

    /// The camera-frame point of one observation together with the rotation
    /// applied to produce it.
    fn transform(&self, observation: &Observation) -> (UnitQuaternion<f64>, Vector3<f64>) {
        let rotation = UnitQuaternion::from_scaled_axis(self.deltas[observation.keyframe])
            * self.base_rotations[observation.keyframe];
        let point =
            rotation * self.landmarks[observation.landmark] + self.translations[observation.keyframe];
        (rotation, point)
    }

    /// The Huber sqrt-weight for a residual of the given pixel magnitude.
    fn huber_weight(&self, magnitude: f64) -> f64 {
        if magnitude <= self.huber_width {
            1.0
        } else {
            (self.huber_width / magnitude).sqrt()
        }
    }
}

impl LeastSquaresProblem<f64, Dynamic, Dynamic> for BundleProblem {
    type ResidualStorage = Owned<f64, Dynamic, U1>;
    type JacobianStorage = Owned<f64, Dynamic, Dynamic>;
    type ParameterStorage = Owned<f64, Dynamic, U1>;

    fn set_params(&mut self, params: &DVector<f64>) {
        for (ix, delta) in self.deltas.iter_mut().enumerate() {
            *delta = params.fixed_rows::<3>(3 * ix).into_owned();
        }
        for keyframe in self.fixed_translations..self.translations.len() {
            let column = 3 * self.base_rotations.len() + 3 * (keyframe - self.fixed_translations);
            self.translations[keyframe] = params.fixed_rows::<3>(column).into_owned();
        }
        for (ix, landmark) in self.landmarks.iter_mut().enumerate() {
            let column = 3 * self.base_rotations.len()
                + 3 * (self.base_rotations.len() - self.fixed_translations)
                + 3 * ix;
            *landmark = params.fixed_rows::<3>(column).into_owned();
        }
    }

    fn params(&self) -> DVector<f64> {
        let mut params = DVector::zeros(self.parameter_count());
        for (ix, delta) in self.deltas.iter().enumerate() {
            params.fixed_rows_mut::<3>(self.rotation_column(ix)).copy_from(delta);
        }
        for (ix, translation) in self.translations.iter().enumerate() {
            if let Some(column) = self.translation_column(ix) {
                params.fixed_rows_mut::<3>(column).copy_from(translation);
            }
        }
        for (ix, landmark) in self.landmarks.iter().enumerate() {
            params
                .fixed_rows_mut::<3>(self.landmark_column(ix))
                .copy_from(landmark);
        }
        params
    }

    fn residuals(&self) -> Option<DVector<f64>> {
        let mut residuals = DVector::zeros(2 * self.observations.len());
        for (ix, observation) in self.observations.iter().enumerate() {
            let (_, point) = self.transform(observation);
            if point.z <= MIN_DEPTH {
                residuals[2 * ix] = DEGENERATE_RESIDUAL;
                residuals[2 * ix + 1] = DEGENERATE_RESIDUAL;
                continue;
            }
            let dx = (point.x / point.z - observation.point.x) * self.focals.x;
            let dy = (point.y / point.z - observation.point.y) * self.focals.y;
            let weight = self.huber_weight((dx * dx + dy * dy).sqrt());
            residuals[2 * ix] = weight * dx;
            residuals[2 * ix + 1] = weight * dy;
        }
        Some(residuals)
    }

    fn jacobian(&self) -> Option<DMatrix<f64>> {
        let mut jacobian = DMatrix::zeros(2 * self.observations.len(), self.parameter_count());
        for (ix, observation) in self.observations.iter().enumerate() {
            let (rotation, point) = self.transform(observation);
            if point.z <= MIN_DEPTH {
                // Degenerate observations contribute a pinned residual with
                // zero gradient.
                continue;
            }
            let dx = (point.x / point.z - observation.point.x) * self.focals.x;
            let dy = (point.y / point.z - observation.point.y) * self.focals.y;
            let weight = self.huber_weight((dx * dx + dy * dy).sqrt());

            let inv_z = 1.0 / point.z;
            let projection = Matrix2x3::new(
                weight * self.focals.x * inv_z,
                0.0,
                -weight * self.focals.x * point.x * inv_z * inv_z,
                0.0,
                weight * self.focals.y * inv_z,
                -weight * self.focals.y * point.y * inv_z * inv_z,
            );

            let row = 2 * ix;
            // Rotation block: the camera point moves by
            // -[q]× · J_l(delta) · d_delta for the rotated (pre-translation)
            // point q.
            let rotated = rotation * self.landmarks[observation.landmark];
            let rotation_block = projection
                * (-rotated.cross_matrix() * so3_left_jacobian(&self.deltas[observation.keyframe]));
            jacobian
                .slice_mut((row, self.rotation_column(observation.keyframe)), (2, 3))
                .copy_from(&rotation_block);

            if let Some(column) = self.translation_column(observation.keyframe) {
                jacobian.slice_mut((row, column), (2, 3)).copy_from(&projection);
            }

            let landmark_block = projection * rotation.to_rotation_matrix().matrix();
            jacobian
                .slice_mut((row, self.landmark_column(observation.landmark)), (2, 3))
                .copy_from(&landmark_block);
        }
        Some(jacobian)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use mvo_core::nalgebra::{Point2, Vector2};
    use std::collections::HashMap;

    fn observe(
        rotation: &UnitQuaternion<f64>,
        translation: &Vector3<f64>,
        landmarks: &[Point3<f64>],
    ) -> HashMap<usize, Point2<f64>> {
        landmarks
            .iter()
            .enumerate()
            .map(|(id, landmark)| {
                let p = rotation * landmark.coords + translation;
                (id, Point2::new(p.x / p.z, p.y / p.z))
            })
            .collect()
    }

    #[test]
    fn perturbed_problem_converges_to_ground_truth() {
        let landmarks_true: Vec<Point3<f64>> = (0..12)
            .map(|i| {
                Point3::new(
                    0.5 * (i % 4) as f64 - 0.75,
                    0.5 * (i / 4) as f64 - 0.5,
                    4.0 + 0.25 * i as f64,
                )
            })
            .collect();
        let rotation1 = UnitQuaternion::from_scaled_axis(Vector3::new(0.02, -0.05, 0.01));
        let translation1 = Vector3::new(-0.4, 0.05, 0.0);

        let mut keyframes = vec![
            Keyframe {
                rotation: UnitQuaternion::identity(),
                translation: Vector3::zeros(),
                observations: observe(
                    &UnitQuaternion::identity(),
                    &Vector3::zeros(),
                    &landmarks_true,
                ),
            },
            Keyframe {
                rotation: UnitQuaternion::from_scaled_axis(Vector3::new(0.03, -0.04, 0.015)),
                translation: translation1,
                observations: observe(&rotation1, &translation1, &landmarks_true),
            },
        ];
        // Perturb the landmarks; the poses and structure must both settle.
        let mut landmarks: Vec<Point3<f64>> = landmarks_true
            .iter()
            .enumerate()
            .map(|(i, p)| p + Vector3::new(0.01, -0.008, 0.02) * ((i % 3) as f64 - 1.0))
            .collect();

        bundle_adjust(
            &mut keyframes,
            &mut landmarks,
            2,
            Vector2::new(500.0, 500.0),
            2.447,
            100,
        )
        .unwrap();

        assert!(keyframes[1].rotation.angle_to(&rotation1) < 1e-6);
        for (estimate, truth) in landmarks.iter().zip(&landmarks_true) {
            assert!((estimate - truth).norm() < 1e-5);
        }
        // The parameterization keeps quaternions unit by construction.
        for keyframe in &keyframes {
            assert!((keyframe.rotation.norm() - 1.0).abs() < 1e-12);
        }
    }

    #[test]
    fn no_observations_is_unusable() {
        let mut keyframes = vec![Keyframe {
            rotation: UnitQuaternion::identity(),
            translation: Vector3::zeros(),
            observations: HashMap::new(),
        }];
        let mut landmarks = Vec::new();
        let result = bundle_adjust(
            &mut keyframes,
            &mut landmarks,
            1,
            Vector2::new(500.0, 500.0),
            2.447,
            100,
        );
        assert_eq!(result, Err(TrackingError::BundleAdjustmentFailed));
    }
}
