use log::trace;
use rand::{seq::index, Rng};

/// The substitute for the iteration count when the adaptive formula produces
/// a non-finite value (an inlier ratio of zero makes it diverge).
const NON_FINITE_CAP: f64 = 1.0e9;

/// A robust estimation problem that [`Ransac`] can drive.
///
/// The model object owns its dataset, the fitted model and the surviving
/// match list; the engine only ever sees sample indices and inlier masks.
pub trait RansacModel {
    /// Number of data items available for sampling.
    fn data_size(&self) -> usize;

    /// Number of data items in a minimal sample.
    fn sample_size(&self) -> usize;

    /// Returns the model to its empty state. Called by the engine when there
    /// is not enough data to draw even one sample.
    fn reset_model(&mut self);

    /// Fits a candidate model to the minimal sample given by `sample`
    /// (indices into the dataset).
    fn fit_model(&mut self, sample: &[usize]);

    /// Classifies every datum against the current candidate model, writing
    /// the classification into `inliers`, and returns `(score, inlier
    /// count)`. Higher scores are better; a score of zero means the model
    /// explains nothing.
    fn eval_model(&mut self, inliers: &mut [bool]) -> (f64, usize);

    /// Refits the model from the winning consensus set. Called exactly once
    /// after the sampling loop, even when the mask is all-false, in which
    /// case the model must degrade to its empty state.
    fn refine_model(&mut self, inliers: &[bool]);
}

/// Adaptive-iteration random sample consensus.
///
/// Each iteration draws a minimal sample without replacement from the full
/// data pool, fits a candidate and scores it. Whenever the score strictly
/// improves on the running best, the iteration cap is recomputed from the
/// classic formula `N = ln(1-p) / ln(1-wˢ)` using the candidate's inlier
/// ratio `w`, clamped to the configured maximum. Ties do not trigger a
/// recompute. The loop is inherently sequential: every cap depends on the
/// best model so far.
pub struct Ransac<R> {
    pub success_rate: f64,
    pub max_iterations: usize,
    /// Iterations executed by the last `run`.
    pub iterations: usize,
    /// Best score observed by the last `run`.
    pub score: f64,
    rng: R,
}

impl<R: Rng> Ransac<R> {
    pub fn new(success_rate: f64, max_iterations: usize, rng: R) -> Self {
        Self {
            success_rate,
            max_iterations,
            iterations: 0,
            score: 0.0,
            rng,
        }
    }

    /// Runs the sampling loop and leaves the refined model (possibly empty)
    /// in `model`. Absence of a usable model is signaled by the model's empty
    /// match list, never by a panic.
    pub fn run<M: RansacModel>(&mut self, model: &mut M) {
        self.iterations = 0;
        self.score = 0.0;

        let data_size = model.data_size();
        let sample_size = model.sample_size();
        if data_size < sample_size {
            model.reset_model();
            return;
        }

        let mut limit = self.max_iterations;
        let mut sample = vec![0usize; sample_size];
        let mut candidate = vec![false; data_size];
        let mut best = vec![false; data_size];
        let mut best_score = 0.0;
        let mut iteration = 0;

        while iteration < limit {
            for (slot, ix) in sample
                .iter_mut()
                .zip(index::sample(&mut self.rng, data_size, sample_size))
            {
                *slot = ix;
            }
            model.fit_model(&sample);
            let (score, inlier_count) = model.eval_model(&mut candidate);
            if score > best_score {
                std::mem::swap(&mut best, &mut candidate);
                best_score = score;
                limit = self.iteration_cap(inlier_count as f64 / data_size as f64, sample_size);
                trace!(
                    "iteration {}: score {:.3} with {}/{} inliers, cap {}",
                    iteration,
                    score,
                    inlier_count,
                    data_size,
                    limit
                );
            }
            iteration += 1;
        }

        self.iterations = iteration;
        self.score = best_score;
        model.refine_model(&best);
    }

    fn iteration_cap(&self, inlier_rate: f64, sample_size: usize) -> usize {
        let n = (1.0 - self.success_rate).ln() / (1.0 - inlier_rate.powi(sample_size as i32)).ln();
        let n = if n.is_finite() { n } else { NON_FINITE_CAP };
        (n.ceil() as usize).min(self.max_iterations)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use rand::SeedableRng;
    use rand_xoshiro::Xoshiro256PlusPlus;

    /// A one-dimensional toy problem: fit a constant to data by picking one
    /// sample, count values within 1.0 of it.
    struct Constant<'a> {
        data: &'a [f64],
        model: Option<f64>,
        refined: Vec<f64>,
    }

    impl RansacModel for Constant<'_> {
        fn data_size(&self) -> usize {
            self.data.len()
        }

        fn sample_size(&self) -> usize {
            1
        }

        fn reset_model(&mut self) {
            self.model = None;
            self.refined.clear();
        }

        fn fit_model(&mut self, sample: &[usize]) {
            self.model = Some(self.data[sample[0]]);
        }

        fn eval_model(&mut self, inliers: &mut [bool]) -> (f64, usize) {
            let center = self.model.unwrap();
            let mut score = 0.0;
            let mut count = 0;
            for (flag, &value) in inliers.iter_mut().zip(self.data) {
                *flag = (value - center).abs() < 1.0;
                if *flag {
                    score += 1.0 - (value - center).abs();
                    count += 1;
                }
            }
            // A model supported by nothing but its own sample explains nothing.
            if count < 2 {
                score = 0.0;
            }
            (score, count)
        }

        fn refine_model(&mut self, inliers: &[bool]) {
            self.refined = self
                .data
                .iter()
                .zip(inliers)
                .filter_map(|(&value, &keep)| keep.then(|| value))
                .collect();
        }
    }

    #[test]
    fn finds_the_dominant_cluster() {
        let mut data = vec![10.0; 70];
        data.extend((0..30).map(|i| i as f64 * 113.7));
        let mut problem = Constant {
            data: &data,
            model: None,
            refined: Vec::new(),
        };
        let mut ransac = Ransac::new(0.99, 100_000, Xoshiro256PlusPlus::seed_from_u64(3));
        ransac.run(&mut problem);
        assert!(problem.refined.iter().all(|&v| v == 10.0));
        assert!(problem.refined.len() >= 70);
    }

    #[test]
    fn respects_the_theoretical_iteration_bound() {
        // 50% inliers, sample size 1: N = ln(0.01) / ln(0.5) = 7 draws.
        let mut data = vec![5.0; 50];
        data.extend((0..50).map(|i| 1000.0 + 10.0 * i as f64));
        let mut problem = Constant {
            data: &data,
            model: None,
            refined: Vec::new(),
        };
        let mut ransac = Ransac::new(0.99, 100_000, Xoshiro256PlusPlus::seed_from_u64(9));
        ransac.run(&mut problem);
        let bound = (0.01f64.ln() / 0.5f64.ln()).ceil() as usize;
        assert!(ransac.iterations <= bound, "{} > {}", ransac.iterations, bound);
    }

    #[test]
    fn perfect_data_terminates_immediately() {
        let data = vec![2.5; 64];
        let mut problem = Constant {
            data: &data,
            model: None,
            refined: Vec::new(),
        };
        let mut ransac = Ransac::new(0.99, 100_000, Xoshiro256PlusPlus::seed_from_u64(4));
        ransac.run(&mut problem);
        // An inlier ratio of one collapses the adaptive cap to zero, so the
        // first draw is also the last.
        assert_eq!(ransac.iterations, 1);
        assert_eq!(problem.refined.len(), 64);
    }

    #[test]
    fn too_little_data_resets_the_model() {
        let data: Vec<f64> = Vec::new();
        let mut problem = Constant {
            data: &data,
            model: Some(1.0),
            refined: vec![1.0],
        };
        let mut ransac = Ransac::new(0.99, 100, Xoshiro256PlusPlus::seed_from_u64(1));
        ransac.run(&mut problem);
        assert!(problem.model.is_none());
        assert!(problem.refined.is_empty());
    }
}
