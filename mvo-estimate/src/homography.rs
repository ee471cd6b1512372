use crate::{RansacModel, CHI2_2DOF};
use mvo_core::{
    nalgebra::{Matrix3, Vector2},
    CameraIntrinsics, FeatureMatch, NormalizedKeyPoint,
};
use mvo_geom::solve_homography;

/// Four-point planar homography estimation under RANSAC.
///
/// Scores candidates by the symmetric transfer error through `H` and `H⁻¹`,
/// in pixels. In the bootstrap cascade this runs with a looser sigma than the
/// essential stage and acts as a degeneracy probe: a pair whose epipolar
/// consensus set is almost entirely explained by one homography is planar or
/// parallax-free, which makes the essential matrix unreliable.
pub struct FourPointHomography<'a> {
    points_a: &'a [NormalizedKeyPoint],
    points_b: &'a [NormalizedKeyPoint],
    candidates: &'a [FeatureMatch],
    focals: Vector2<f64>,
    inv_sigma_squared: f64,
    /// The current homography estimate; zero when no model exists.
    pub homography: Matrix3<f64>,
    /// The surviving matches after refinement.
    pub matches: Vec<FeatureMatch>,
}

impl<'a> FourPointHomography<'a> {
    pub fn new(
        points_a: &'a [NormalizedKeyPoint],
        points_b: &'a [NormalizedKeyPoint],
        candidates: &'a [FeatureMatch],
        intrinsics: &CameraIntrinsics,
        sigma: f64,
    ) -> Self {
        Self {
            points_a,
            points_b,
            candidates,
            focals: intrinsics.focals,
            inv_sigma_squared: 1.0 / (sigma * sigma),
            homography: Matrix3::zeros(),
            matches: Vec::new(),
        }
    }

    fn solve(&self, matches: impl Iterator<Item = FeatureMatch>) -> Option<Matrix3<f64>> {
        let mut a = Vec::new();
        let mut b = Vec::new();
        for FeatureMatch(ia, ib) in matches {
            a.push(self.points_a[ia]);
            b.push(self.points_b[ib]);
        }
        solve_homography(&a, &b)
    }
}

impl RansacModel for FourPointHomography<'_> {
    fn data_size(&self) -> usize {
        self.candidates.len()
    }

    fn sample_size(&self) -> usize {
        4
    }

    fn reset_model(&mut self) {
        self.homography = Matrix3::zeros();
        self.matches.clear();
    }

    fn fit_model(&mut self, sample: &[usize]) {
        self.homography = self
            .solve(sample.iter().map(|&ix| self.candidates[ix]))
            .unwrap_or_else(Matrix3::zeros);
    }

    fn eval_model(&mut self, inliers: &mut [bool]) -> (f64, usize) {
        let inverse = match self.homography.try_inverse() {
            Some(inverse) => inverse,
            None => {
                inliers.iter_mut().for_each(|flag| *flag = false);
                return (0.0, 0);
            }
        };

        let mut score = 0.0;
        let mut count = 0;
        for (flag, &FeatureMatch(ia, ib)) in inliers.iter_mut().zip(self.candidates) {
            let a = self.points_a[ia];
            let b = self.points_b[ib];
            let forward = self.homography * a.homogeneous();
            let backward = inverse * b.homogeneous();

            let transfer = |mapped: mvo_core::nalgebra::Vector3<f64>, to: NormalizedKeyPoint| {
                let dx = (mapped.x / mapped.z - to.x) * self.focals.x;
                let dy = (mapped.y / mapped.z - to.y) * self.focals.y;
                dx * dx + dy * dy
            };
            let chi_forward = transfer(forward, b) * self.inv_sigma_squared;
            let chi_backward = transfer(backward, a) * self.inv_sigma_squared;

            if chi_forward < CHI2_2DOF && chi_backward < CHI2_2DOF {
                *flag = true;
                score += 2.0 * CHI2_2DOF - chi_forward - chi_backward;
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
        match self.solve(self.matches.iter().copied()) {
            Some(homography) => self.homography = homography,
            None => self.reset_model(),
        }
    }
}
