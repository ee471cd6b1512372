use crate::{TrackerSettings, TrackingError};
use float_ord::FloatOrd;
use itertools::izip;
use mvo_core::{
    nalgebra::{Matrix3, Point3, Vector2, Vector3},
    CameraIntrinsics, FeatureMatch, NormalizedKeyPoint,
};
use mvo_geom::{decompose_essential, project, triangulate_two_view};

/// Two-view structure recovery with pose disambiguation.
///
/// In essential mode the four `(R, T)` hypotheses of the decomposition are
/// triangulated independently (on worker threads; they share nothing but
/// read-only input) and vote by the number of points passing chirality and
/// the reprojection gate. The vote is accepted only when exactly one
/// hypothesis is comparable to the best one; anything else is reported as a
/// distinct failure instead of guessing. In fixed-pose mode the same
/// per-hypothesis filter runs once for incremental map growth.
pub struct Triangulator {
    focals: Vector2<f64>,
    sigma_squared: f64,
    min_triangulated: usize,
    min_fraction: f64,
    comparable_ratio: f64,
}

/// The structure recovered from a disambiguated hypothesis. Points are in
/// the first camera's frame; `matches` parallels `points` with the surviving
/// correspondences.
#[derive(Debug, Clone)]
pub struct Triangulation {
    pub rotation: Matrix3<f64>,
    pub translation: Vector3<f64>,
    pub points: Vec<Point3<f64>>,
    pub matches: Vec<FeatureMatch>,
    /// Cosine of the representative parallax angle (the 2/3 percentile over
    /// the surviving points; 1.0 means no parallax at all).
    pub parallax_cosine: f64,
}

struct Hypothesis {
    points: Vec<Option<Point3<f64>>>,
    count: usize,
    parallax_cosine: f64,
}

impl Triangulator {
    pub fn new(settings: &TrackerSettings, intrinsics: &CameraIntrinsics) -> Self {
        Self {
            focals: intrinsics.focals,
            sigma_squared: settings.triangulation_sigma * settings.triangulation_sigma,
            min_triangulated: settings.min_triangulated,
            min_fraction: settings.min_triangulated_fraction,
            comparable_ratio: settings.comparable_hypothesis_ratio,
        }
    }

    /// Recovers pose and structure from an essential matrix, resolving the
    /// four-fold decomposition ambiguity by chirality voting.
    pub fn from_essential(
        &self,
        points_a: &[NormalizedKeyPoint],
        points_b: &[NormalizedKeyPoint],
        matches: &[FeatureMatch],
        essential: &Matrix3<f64>,
    ) -> Result<Triangulation, TrackingError> {
        let decomposition =
            decompose_essential(essential).ok_or(TrackingError::InsufficientParallax)?;
        let hypotheses = decomposition.hypotheses();

        // The four evaluations are pure functions of shared read-only data.
        let evaluated: Vec<Hypothesis> = std::thread::scope(|scope| {
            let workers: Vec<_> = hypotheses
                .into_iter()
                .map(|(rotation, translation)| {
                    scope.spawn(move || {
                        self.evaluate(&rotation, &translation, points_a, points_b, matches)
                    })
                })
                .collect();
            workers
                .into_iter()
                .map(|worker| worker.join().expect("triangulation worker panicked"))
                .collect()
        });

        let max_count = evaluated.iter().map(|h| h.count).max().unwrap_or(0);
        let required = self
            .min_triangulated
            .max((matches.len() as f64 * self.min_fraction) as usize);
        if max_count < required {
            return Err(TrackingError::InsufficientParallax);
        }
        let comparable = evaluated
            .iter()
            .filter(|h| h.count as f64 > self.comparable_ratio * max_count as f64)
            .count();
        if comparable != 1 {
            return Err(TrackingError::AmbiguousGeometry);
        }

        let winner_ix = evaluated
            .iter()
            .position(|h| h.count == max_count)
            .expect("max count must belong to a hypothesis");
        let (rotation, translation) = hypotheses[winner_ix];
        let winner = &evaluated[winner_ix];

        let mut points = Vec::with_capacity(winner.count);
        let mut surviving = Vec::with_capacity(winner.count);
        for (slot, &m) in izip!(&winner.points, matches) {
            if let Some(point) = slot {
                points.push(*point);
                surviving.push(m);
            }
        }
        Ok(Triangulation {
            rotation,
            translation,
            points,
            matches: surviving,
            parallax_cosine: winner.parallax_cosine,
        })
    }

    /// Triangulates against an already-fixed relative pose, returning the
    /// filtered structure for incremental map extension.
    pub fn with_pose(
        &self,
        points_a: &[NormalizedKeyPoint],
        points_b: &[NormalizedKeyPoint],
        matches: &[FeatureMatch],
        rotation: &Matrix3<f64>,
        translation: &Vector3<f64>,
    ) -> (Vec<Point3<f64>>, Vec<FeatureMatch>) {
        let hypothesis = self.evaluate(rotation, translation, points_a, points_b, matches);
        let mut points = Vec::with_capacity(hypothesis.count);
        let mut surviving = Vec::with_capacity(hypothesis.count);
        for (slot, &m) in izip!(&hypothesis.points, matches) {
            if let Some(point) = slot {
                points.push(*point);
                surviving.push(m);
            }
        }
        (points, surviving)
    }

    /// Triangulates every correspondence under one pose hypothesis and counts
    /// the points that land in front of both cameras and reproject within the
    /// noise gate.
    fn evaluate(
        &self,
        rotation: &Matrix3<f64>,
        translation: &Vector3<f64>,
        points_a: &[NormalizedKeyPoint],
        points_b: &[NormalizedKeyPoint],
        matches: &[FeatureMatch],
    ) -> Hypothesis {
        let identity = Matrix3::identity();
        let origin = Vector3::zeros();
        let second_center = -(rotation.transpose() * translation);

        let mut points = vec![None; matches.len()];
        let mut cosines = Vec::new();
        let mut count = 0;
        for (slot, &FeatureMatch(ia, ib)) in points.iter_mut().zip(matches) {
            let p1 = points_a[ia];
            let p2 = points_b[ib];
            let point = match triangulate_two_view(&identity, &origin, p1, rotation, translation, p2)
            {
                Some(point) => point,
                None => continue,
            };
            let in_second = rotation * point.coords + translation;
            if point.z <= 0.0 || in_second.z <= 0.0 {
                continue;
            }
            if self.pixel_error_squared(&point, p1) > self.sigma_squared
                || self.pixel_error_squared(&Point3::from(in_second), p2) > self.sigma_squared
            {
                continue;
            }
            let ray_a = point.coords.normalize();
            let ray_b = (point.coords - second_center).normalize();
            cosines.push(ray_a.dot(&ray_b));
            *slot = Some(point);
            count += 1;
        }

        Hypothesis {
            points,
            count,
            parallax_cosine: representative_cosine(cosines),
        }
    }

    fn pixel_error_squared(&self, point: &Point3<f64>, observed: NormalizedKeyPoint) -> f64 {
        let residual = project(point) - observed.0;
        let dx = residual.x * self.focals.x;
        let dy = residual.y * self.focals.y;
        dx * dx + dy * dy
    }
}

/// The cosine of the representative parallax angle: the value at the 2/3
/// position of the ascending-sorted per-point cosines. Points without
/// resolved geometry contribute nothing; an empty set reports 1.0 (no
/// parallax).
fn representative_cosine(mut cosines: Vec<f64>) -> f64 {
    if cosines.is_empty() {
        return 1.0;
    }
    cosines.sort_unstable_by_key(|&c| FloatOrd(c));
    cosines[cosines.len() * 2 / 3]
}
