use crate::{TrackerSettings, Triangulation, Triangulator, TrackingError};
use log::{debug, info};
use mvo_core::{
    nalgebra::Point3, CameraIntrinsics, Feature, FeatureMatch, Frame, NormalizedKeyPoint,
    WorldToCamera,
};
use mvo_estimate::{EightPointEssential, FourPointHomography, Ransac};
use rand::Rng;
use std::collections::HashSet;

/// A reference must see its match count grow by this factor for it to be
/// considered worth keeping past the patience window.
const REFERENCE_GROWTH: f64 = 1.1;

/// An accepted two-view bootstrap: the reference frame pinned at the origin,
/// the current frame with its recovered relative pose, and the triangulated
/// structure shared by both.
pub struct Bootstrap<F> {
    pub reference: Frame<F>,
    pub current: Frame<F>,
    pub matches: Vec<FeatureMatch>,
    pub points: Vec<Point3<f64>>,
    pub parallax_cosine: f64,
}

/// The two-view bootstrap over a rolling reference frame.
///
/// The first frame seen becomes the reference. Every later frame is matched
/// against it under a radius gate and pushed through the essential RANSAC,
/// then a (looser) homography RANSAC as a planar/low-parallax degeneracy
/// filter, then triangulation with chirality voting. The pair is accepted
/// only when the representative parallax and the spatial coverage of the
/// surviving points both clear their gates. A reference that keeps failing
/// without its match count growing is dropped for the current frame, so a
/// visually static or purely rotating stream cannot deadlock the bootstrap.
pub struct Initializer<F, R> {
    settings: TrackerSettings,
    intrinsics: CameraIntrinsics,
    ransac: Ransac<R>,
    triangulator: Triangulator,
    reference: Option<Frame<F>>,
    frames_since_reference: usize,
    first_match_count: Option<usize>,
}

impl<F: Feature, R: Rng> Initializer<F, R> {
    pub fn new(settings: TrackerSettings, intrinsics: CameraIntrinsics, rng: R) -> Self {
        Self {
            settings,
            intrinsics,
            ransac: Ransac::new(
                settings.ransac_success_rate,
                settings.ransac_max_iterations,
                rng,
            ),
            triangulator: Triangulator::new(&settings, &intrinsics),
            reference: None,
            frames_since_reference: 0,
            first_match_count: None,
        }
    }

    /// Drops any reference frame and starts the pair search over.
    pub fn reset(&mut self) {
        self.reference = None;
        self.frames_since_reference = 0;
        self.first_match_count = None;
    }

    /// Feeds one frame to the bootstrap. Returns the bootstrap result once a
    /// frame pair qualifies; until then the frame is either adopted as the
    /// (new) reference or discarded.
    pub fn initialize(&mut self, frame: Frame<F>) -> Option<Bootstrap<F>> {
        let reference = match &self.reference {
            Some(reference) => reference,
            None => {
                debug!("frame {} adopted as bootstrap reference", frame.id);
                self.adopt(frame);
                return None;
            }
        };

        let matches = reference.feature.matches(
            &frame.feature,
            self.settings.match_k,
            self.settings.match_radius,
        );
        if self.first_match_count.is_none() {
            self.first_match_count = Some(matches.len());
        }

        match attempt(
            &mut self.ransac,
            &self.triangulator,
            &self.settings,
            &self.intrinsics,
            reference,
            &frame,
            &matches,
        ) {
            Ok(triangulation) => {
                let mut reference = self.reference.take().expect("reference checked above");
                self.reset();
                reference.pose = WorldToCamera::identity();
                let mut current = frame;
                current.pose =
                    WorldToCamera::from_parts(triangulation.rotation, triangulation.translation);
                info!(
                    "two-view bootstrap accepted: frames {} and {}, {} points, parallax {:.2}°",
                    reference.id,
                    current.id,
                    triangulation.points.len(),
                    triangulation.parallax_cosine.clamp(-1.0, 1.0).acos().to_degrees()
                );
                Some(Bootstrap {
                    reference,
                    current,
                    matches: triangulation.matches,
                    points: triangulation.points,
                    parallax_cosine: triangulation.parallax_cosine,
                })
            }
            Err(error) => {
                debug!("frame {}: bootstrap attempt failed: {}", frame.id, error);
                self.frames_since_reference += 1;
                let first_count = self.first_match_count.unwrap_or(0);
                let stale = self.frames_since_reference > self.settings.reference_patience
                    && (matches.len() as f64) < first_count as f64 * REFERENCE_GROWTH;
                if stale {
                    info!(
                        "bootstrap reference is stale after {} frames; adopting frame {}",
                        self.frames_since_reference, frame.id
                    );
                    self.adopt(frame);
                }
                None
            }
        }
    }

    fn adopt(&mut self, frame: Frame<F>) {
        self.reference = Some(frame);
        self.frames_since_reference = 0;
        self.first_match_count = None;
    }
}

/// One bootstrap attempt over a matched frame pair: essential RANSAC, the
/// homography degeneracy filter, triangulation, then the parallax and
/// coverage gates.
fn attempt<F: Feature, R: Rng>(
    ransac: &mut Ransac<R>,
    triangulator: &Triangulator,
    settings: &TrackerSettings,
    intrinsics: &CameraIntrinsics,
    reference: &Frame<F>,
    frame: &Frame<F>,
    matches: &[FeatureMatch],
) -> Result<Triangulation, TrackingError> {
    if matches.len() < 8 {
        return Err(TrackingError::InsufficientMatches {
            found: matches.len(),
            required: 8,
        });
    }
    let points_a = reference.feature.keypoints();
    let points_b = frame.feature.keypoints();

    let mut essential = EightPointEssential::new(
        points_a,
        points_b,
        matches,
        intrinsics,
        settings.essential_sigma,
    );
    ransac.run(&mut essential);
    debug!(
        "essential stage kept {}/{} matches in {} iterations",
        essential.matches.len(),
        matches.len(),
        ransac.iterations
    );
    if essential.matches.len() < 8 {
        return Err(TrackingError::InsufficientMatches {
            found: essential.matches.len(),
            required: 8,
        });
    }

    let mut homography = FourPointHomography::new(
        points_a,
        points_b,
        &essential.matches,
        intrinsics,
        settings.homography_sigma,
    );
    ransac.run(&mut homography);
    debug!(
        "homography filter explains {}/{} epipolar matches",
        homography.matches.len(),
        essential.matches.len()
    );
    // A pair that even a loose homography explains almost completely is
    // planar or parallax-free, and the eight-point essential matrix is
    // degenerate on such scenes.
    if homography.matches.len() as f64
        >= settings.homography_rejection_ratio * essential.matches.len() as f64
    {
        return Err(TrackingError::InsufficientParallax);
    }

    let triangulation = triangulator.from_essential(
        points_a,
        points_b,
        &essential.matches,
        &essential.essential,
    )?;

    let minimum_cosine = settings.min_parallax_degrees.to_radians().cos();
    if triangulation.parallax_cosine > minimum_cosine {
        return Err(TrackingError::InsufficientParallax);
    }

    let covered = covered_cells(settings, intrinsics, points_b, &triangulation.matches);
    if covered < settings.min_coverage_cells {
        return Err(TrackingError::InsufficientCoverage {
            covered,
            required: settings.min_coverage_cells,
        });
    }

    Ok(triangulation)
}

/// Counts the occupied cells of a coarse grid over the image for the current
/// frame's side of the surviving matches. A handful of points piled into one
/// corner can pass every numeric gate and still make a useless map; this
/// gate rejects such degenerate spatial configurations.
fn covered_cells(
    settings: &TrackerSettings,
    intrinsics: &CameraIntrinsics,
    points_b: &[NormalizedKeyPoint],
    matches: &[FeatureMatch],
) -> usize {
    let cell_width = settings.image_width / settings.coverage_grid_cols as f64;
    let cell_height = settings.image_height / settings.coverage_grid_rows as f64;
    let mut cells = HashSet::new();
    for &FeatureMatch(_, ib) in matches {
        let pixel = intrinsics.unnormalize(points_b[ib]);
        if pixel.x < 0.0
            || pixel.y < 0.0
            || pixel.x >= settings.image_width
            || pixel.y >= settings.image_height
        {
            continue;
        }
        cells.insert(((pixel.x / cell_width) as usize, (pixel.y / cell_height) as usize));
    }
    cells.len()
}
