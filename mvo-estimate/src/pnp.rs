use crate::{p3p, RansacModel, CHI2_2DOF};
use mvo_core::{
    nalgebra::{Matrix2x3, Matrix2x6, Matrix3, Matrix6, Point3, Rotation3, Vector2, Vector3, Vector6},
    CameraIntrinsics, FeatureMatch, NormalizedKeyPoint,
};

const REFINE_ITERATIONS: usize = 10;
const REFINE_CONVERGENCE: f64 = 1e-12;

/// Four-point perspective pose estimation under RANSAC.
///
/// Correspondences pair a 3d point (`FeatureMatch.0` indexes `points`) with a
/// 2d observation (`FeatureMatch.1` indexes `observations`). The minimal fit
/// solves perspective-three-point on three of the four sampled
/// correspondences and uses the fourth to pick among the candidate poses;
/// refinement runs a Gauss-Newton least-squares pose fit over the whole
/// consensus set, which is much more stable than any minimal solution.
pub struct FourPointPnp<'a> {
    points: &'a [Point3<f64>],
    observations: &'a [NormalizedKeyPoint],
    candidates: &'a [FeatureMatch],
    focals: Vector2<f64>,
    inv_sigma_squared: f64,
    /// World-to-camera rotation of the current estimate.
    pub rotation: Matrix3<f64>,
    /// World-to-camera translation of the current estimate.
    pub translation: Vector3<f64>,
    /// The surviving matches after refinement.
    pub matches: Vec<FeatureMatch>,
}

impl<'a> FourPointPnp<'a> {
    pub fn new(
        points: &'a [Point3<f64>],
        observations: &'a [NormalizedKeyPoint],
        candidates: &'a [FeatureMatch],
        intrinsics: &CameraIntrinsics,
        sigma: f64,
    ) -> Self {
        Self {
            points,
            observations,
            candidates,
            focals: intrinsics.focals,
            inv_sigma_squared: 1.0 / (sigma * sigma),
            rotation: Matrix3::identity(),
            translation: Vector3::zeros(),
            matches: Vec::new(),
        }
    }

    /// Squared pixel reprojection error of one correspondence under a pose.
    fn reprojection_squared(
        &self,
        rotation: &Matrix3<f64>,
        translation: &Vector3<f64>,
        FeatureMatch(ia, ib): FeatureMatch,
    ) -> f64 {
        let p = rotation * self.points[ia].coords + translation;
        if p.z <= f64::EPSILON {
            return f64::INFINITY;
        }
        let observation = self.observations[ib];
        let dx = (p.x / p.z - observation.x) * self.focals.x;
        let dy = (p.y / p.z - observation.y) * self.focals.y;
        dx * dx + dy * dy
    }
}

impl RansacModel for FourPointPnp<'_> {
    fn data_size(&self) -> usize {
        self.candidates.len()
    }

    fn sample_size(&self) -> usize {
        4
    }

    fn reset_model(&mut self) {
        self.rotation = Matrix3::identity();
        self.translation = Vector3::zeros();
        self.matches.clear();
    }

    fn fit_model(&mut self, sample: &[usize]) {
        let correspondence = |ix: usize| self.candidates[sample[ix]];
        let world = [0, 1, 2].map(|ix| self.points[correspondence(ix).0].coords);
        let bearings = [0, 1, 2].map(|ix| {
            self.observations[correspondence(ix).1]
                .homogeneous()
                .normalize()
        });

        // The fourth sampled correspondence disambiguates the P3P candidates.
        let selector = correspondence(3);
        let mut best = f64::INFINITY;
        let mut found = None;
        for (rotation, translation) in p3p::solve(world, bearings) {
            let error = self.reprojection_squared(&rotation, &translation, selector);
            if error < best {
                best = error;
                found = Some((rotation, translation));
            }
        }
        match found {
            Some((rotation, translation)) => {
                self.rotation = rotation;
                self.translation = translation;
            }
            None => {
                self.rotation = Matrix3::identity();
                self.translation = Vector3::zeros();
            }
        }
    }

    fn eval_model(&mut self, inliers: &mut [bool]) -> (f64, usize) {
        let mut score = 0.0;
        let mut count = 0;
        for (flag, &m) in inliers.iter_mut().zip(self.candidates) {
            let chi = self.reprojection_squared(&self.rotation, &self.translation, m)
                * self.inv_sigma_squared;
            if chi < CHI2_2DOF {
                *flag = true;
                score += CHI2_2DOF - chi;
                count += 1;
            } else {
                *flag = false;
            }
        }
        (score, count)
    }

    fn refine_model(&mut self, inliers: &[bool]) {
        self.matches = self
            .candidates
            .iter()
            .zip(inliers)
            .filter_map(|(&m, &keep)| keep.then(|| m))
            .collect();
        if self.matches.len() < self.sample_size() {
            self.reset_model();
            return;
        }
        refine_pose(
            &mut self.rotation,
            &mut self.translation,
            self.points,
            self.observations,
            &self.matches,
        );
    }
}

/// Nonlinear least-squares pose fit over a set of 3d-2d correspondences,
/// starting from the given pose. Gauss-Newton on the se(3) tangent with the
/// rotation perturbed from the left, so the rotation stays orthonormal by
/// construction.
pub fn refine_pose(
    rotation: &mut Matrix3<f64>,
    translation: &mut Vector3<f64>,
    points: &[Point3<f64>],
    observations: &[NormalizedKeyPoint],
    matches: &[FeatureMatch],
) {
    for _ in 0..REFINE_ITERATIONS {
        let mut hessian = Matrix6::<f64>::zeros();
        let mut gradient = Vector6::<f64>::zeros();
        for &FeatureMatch(ia, ib) in matches {
            let p = *rotation * points[ia].coords + *translation;
            if p.z <= f64::EPSILON {
                continue;
            }
            let observation = observations[ib];
            let residual = Vector2::new(p.x / p.z - observation.x, p.y / p.z - observation.y);
            let inv_z = 1.0 / p.z;
            let projection = Matrix2x3::new(
                inv_z,
                0.0,
                -p.x * inv_z * inv_z,
                0.0,
                inv_z,
                -p.y * inv_z * inv_z,
            );
            let mut jacobian = Matrix2x6::<f64>::zeros();
            jacobian
                .fixed_slice_mut::<2, 3>(0, 0)
                .copy_from(&projection);
            jacobian
                .fixed_slice_mut::<2, 3>(0, 3)
                .copy_from(&(projection * (-(p - *translation).cross_matrix())));
            hessian += jacobian.transpose() * jacobian;
            gradient += jacobian.transpose() * residual;
        }

        let step = match hessian.cholesky() {
            Some(cholesky) => cholesky.solve(&-gradient),
            None => break,
        };
        *translation += step.fixed_rows::<3>(0).into_owned();
        *rotation =
            *Rotation3::from_scaled_axis(step.fixed_rows::<3>(3).into_owned()).matrix() * *rotation;
        if step.norm_squared() < REFINE_CONVERGENCE * REFINE_CONVERGENCE {
            break;
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use mvo_core::nalgebra::Point2;

    fn synthetic_problem() -> (
        Matrix3<f64>,
        Vector3<f64>,
        Vec<Point3<f64>>,
        Vec<NormalizedKeyPoint>,
        Vec<FeatureMatch>,
    ) {
        let rotation = *Rotation3::from_euler_angles(0.05, 0.1, -0.08).matrix();
        let translation = Vector3::new(0.2, -0.3, 0.5);
        let points: Vec<Point3<f64>> = (0..8)
            .map(|i| {
                Point3::new(
                    0.4 * (i % 3) as f64 - 0.4,
                    0.3 * (i / 3) as f64 - 0.3,
                    3.0 + 0.5 * i as f64,
                )
            })
            .collect();
        let observations: Vec<NormalizedKeyPoint> = points
            .iter()
            .map(|p| {
                let q = rotation * p.coords + translation;
                NormalizedKeyPoint(Point2::new(q.x / q.z, q.y / q.z))
            })
            .collect();
        let matches = (0..points.len()).map(|i| FeatureMatch(i, i)).collect();
        (rotation, translation, points, observations, matches)
    }

    #[test]
    fn minimal_fit_recovers_pose() {
        let (rotation, translation, points, observations, matches) = synthetic_problem();
        let intrinsics = CameraIntrinsics::identity().focal(500.0);
        let mut estimator = FourPointPnp::new(&points, &observations, &matches, &intrinsics, 1.0);
        estimator.fit_model(&[0, 3, 5, 7]);
        assert!((estimator.rotation - rotation).norm() < 1e-6);
        assert!((estimator.translation - translation).norm() < 1e-6);
    }

    #[test]
    fn refinement_survives_a_perturbed_start() {
        let (rotation, translation, points, observations, matches) = synthetic_problem();
        let intrinsics = CameraIntrinsics::identity().focal(500.0);
        let mut estimator = FourPointPnp::new(&points, &observations, &matches, &intrinsics, 1.0);
        estimator.rotation = *Rotation3::from_euler_angles(0.06, 0.09, -0.07).matrix();
        estimator.translation = translation + Vector3::new(0.02, -0.01, 0.03);
        estimator.refine_model(&vec![true; matches.len()]);
        assert_eq!(estimator.matches.len(), matches.len());
        assert!((estimator.rotation - rotation).norm() < 1e-8);
        assert!((estimator.translation - translation).norm() < 1e-8);
    }

    #[test]
    fn starved_consensus_set_clears_the_model() {
        let (_, _, points, observations, matches) = synthetic_problem();
        let intrinsics = CameraIntrinsics::identity().focal(500.0);
        let mut estimator = FourPointPnp::new(&points, &observations, &matches, &intrinsics, 1.0);
        let mut inliers = vec![false; matches.len()];
        inliers[0] = true;
        inliers[1] = true;
        estimator.refine_model(&inliers);
        assert!(estimator.matches.is_empty());
        assert_eq!(estimator.rotation, Matrix3::identity());
    }
}
