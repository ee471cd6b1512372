use crate::{RansacModel, CHI2_1DOF, CHI2_2DOF};
use mvo_core::{
    nalgebra::{Matrix3, Vector2},
    CameraIntrinsics, FeatureMatch, NormalizedKeyPoint,
};
use mvo_geom::{fix_essential, solve_essential};

/// Eight-point essential matrix estimation under RANSAC.
///
/// Scores candidates by the point-to-epipolar-line distance in both
/// directions, converted to pixels through the focal lengths so that `sigma`
/// can be given in pixels. A match is an inlier only when both directions
/// pass the single-degree-of-freedom chi-square gate; the score accumulates
/// the slack below the two-degree gate, preferring tight inlier sets over
/// mere counts.
pub struct EightPointEssential<'a> {
    points_a: &'a [NormalizedKeyPoint],
    points_b: &'a [NormalizedKeyPoint],
    candidates: &'a [FeatureMatch],
    focals: Vector2<f64>,
    inv_sigma_squared: f64,
    /// The current essential matrix estimate; zero when no model exists.
    pub essential: Matrix3<f64>,
    /// The surviving matches after refinement.
    pub matches: Vec<FeatureMatch>,
}

impl<'a> EightPointEssential<'a> {
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
            essential: Matrix3::zeros(),
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
        fix_essential(&solve_essential(&a, &b)?)
    }
}

impl RansacModel for EightPointEssential<'_> {
    fn data_size(&self) -> usize {
        self.candidates.len()
    }

    fn sample_size(&self) -> usize {
        8
    }

    fn reset_model(&mut self) {
        self.essential = Matrix3::zeros();
        self.matches.clear();
    }

    fn fit_model(&mut self, sample: &[usize]) {
        self.essential = self
            .solve(sample.iter().map(|&ix| self.candidates[ix]))
            .unwrap_or_else(Matrix3::zeros);
    }

    fn eval_model(&mut self, inliers: &mut [bool]) -> (f64, usize) {
        let mut score = 0.0;
        let mut count = 0;
        for (flag, &FeatureMatch(ia, ib)) in inliers.iter_mut().zip(self.candidates) {
            let a = self.points_a[ia].homogeneous();
            let b = self.points_b[ib].homogeneous();
            // Epipolar lines in each image and the shared algebraic residual.
            let line_a = self.essential.transpose() * b;
            let line_b = self.essential * a;
            let residual = line_b.dot(&b);

            // Squared point-to-line distances in pixel units.
            let pixels = |line: mvo_core::nalgebra::Vector3<f64>| {
                let nx = line.x / self.focals.x;
                let ny = line.y / self.focals.y;
                residual * residual / (nx * nx + ny * ny)
            };
            let chi_a = pixels(line_a) * self.inv_sigma_squared;
            let chi_b = pixels(line_b) * self.inv_sigma_squared;

            if chi_a < CHI2_1DOF && chi_b < CHI2_1DOF {
                *flag = true;
                score += 2.0 * CHI2_2DOF - chi_a - chi_b;
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
            Some(essential) => self.essential = essential,
            None => self.reset_model(),
        }
    }
}
