//! End-to-end tracking over a synthetic scene with a ground-truth feature
//! matcher standing in for the external extraction collaborator.

use mvo_core::{
    nalgebra::{Point2, Point3, Vector2, Vector3},
    CameraIntrinsics, Feature, FeatureExtractor, FeatureMatch, NormalizedKeyPoint, WorldToCamera,
};
use mvo_slam::{Tracker, TrackerSettings, TrackingState};
use rand::{Rng, SeedableRng};
use rand_xoshiro::Xoshiro256PlusPlus;
use std::cell::RefCell;
use std::collections::HashMap;

struct SyntheticFeature {
    keypoints: Vec<NormalizedKeyPoint>,
    ids: Vec<usize>,
}

impl Feature for SyntheticFeature {
    fn keypoints(&self) -> &[NormalizedKeyPoint] {
        &self.keypoints
    }

    // Ground-truth identity matching: at most one candidate per keypoint, so
    // `k` never constrains anything here; the radius gate still applies.
    fn matches(&self, other: &Self, _k: usize, radius: f64) -> Vec<FeatureMatch> {
        let by_id: HashMap<usize, usize> = other
            .ids
            .iter()
            .enumerate()
            .map(|(ix, &id)| (id, ix))
            .collect();
        let mut matches = Vec::new();
        for (ia, &id) in self.ids.iter().enumerate() {
            if let Some(&ib) = by_id.get(&id) {
                if self.keypoints[ia].distance(other.keypoints[ib]) <= radius {
                    matches.push(FeatureMatch(ia, ib));
                }
            }
        }
        matches
    }
}

/// Projects a fixed world point set through a ground-truth camera pose with
/// Gaussian pixel noise. The "image" handed to the tracker is the true pose.
struct SyntheticExtractor {
    points: Vec<Point3<f64>>,
    intrinsics: CameraIntrinsics,
    image_size: Vector2<f64>,
    noise_pixels: f64,
    rng: RefCell<Xoshiro256PlusPlus>,
}

impl SyntheticExtractor {
    fn gaussian(&self) -> f64 {
        let mut rng = self.rng.borrow_mut();
        let u1 = rng.gen::<f64>().max(1e-12);
        let u2 = rng.gen::<f64>();
        (-2.0 * u1.ln()).sqrt() * (std::f64::consts::TAU * u2).cos()
    }
}

impl FeatureExtractor for SyntheticExtractor {
    type Image = WorldToCamera;
    type Feature = SyntheticFeature;

    fn extract(&self, image: &WorldToCamera) -> SyntheticFeature {
        let mut keypoints = Vec::new();
        let mut ids = Vec::new();
        for (id, point) in self.points.iter().enumerate() {
            let in_camera = image.transform(*point);
            if in_camera.z < 0.2 {
                continue;
            }
            let noise = self.noise_pixels / self.intrinsics.focals.x;
            let keypoint = NormalizedKeyPoint(Point2::new(
                in_camera.x / in_camera.z + noise * self.gaussian(),
                in_camera.y / in_camera.z + noise * self.gaussian(),
            ));
            let pixel = self.intrinsics.unnormalize(keypoint);
            if pixel.x < 0.0
                || pixel.y < 0.0
                || pixel.x >= self.image_size.x
                || pixel.y >= self.image_size.y
            {
                continue;
            }
            keypoints.push(keypoint);
            ids.push(id);
        }
        SyntheticFeature { keypoints, ids }
    }
}

fn intrinsics() -> CameraIntrinsics {
    CameraIntrinsics::identity()
        .focal(500.0)
        .principal_point(Point2::new(320.0, 240.0))
}

fn settings() -> TrackerSettings {
    TrackerSettings {
        image_width: 640.0,
        image_height: 480.0,
        // The synthetic cloud is small, so relax the density-driven gates.
        min_coverage_cells: 20,
        ..TrackerSettings::default()
    }
}

fn scene_points(rng: &mut impl Rng) -> Vec<Point3<f64>> {
    (0..60)
        .map(|_| {
            Point3::new(
                3.0 * (rng.gen::<f64>() - 0.5),
                2.2 * (rng.gen::<f64>() - 0.5),
                2.5 + 2.5 * rng.gen::<f64>(),
            )
        })
        .collect()
}

fn extractor(points: Vec<Point3<f64>>, noise_pixels: f64) -> SyntheticExtractor {
    SyntheticExtractor {
        points,
        intrinsics: intrinsics(),
        image_size: Vector2::new(640.0, 480.0),
        noise_pixels,
        rng: RefCell::new(Xoshiro256PlusPlus::seed_from_u64(99)),
    }
}

/// A camera at world position `center` looking down the world z axis.
fn camera_at(center: Vector3<f64>) -> WorldToCamera {
    WorldToCamera::from_parts(mvo_core::nalgebra::Matrix3::identity(), -center)
}

#[test]
fn straight_line_trajectory_is_tracked() {
    let mut rng = Xoshiro256PlusPlus::seed_from_u64(17);
    let points = scene_points(&mut rng);
    let mut tracker = Tracker::new(
        extractor(points, 0.5),
        intrinsics(),
        settings(),
        Xoshiro256PlusPlus::seed_from_u64(1),
    );

    let mut states = Vec::new();
    for k in 0..5 {
        let pose = camera_at(Vector3::new(0.2 * k as f64, 0.0, 0.0));
        states.push(tracker.track(&pose));
    }

    // The first frame seeds the reference; the bootstrap completes as soon
    // as the baseline against it clears the degeneracy gates, which the
    // lazy-pair policy guarantees within a frame or two of motion.
    assert_eq!(states[0], TrackingState::Initializing);
    assert_eq!(states[2], TrackingState::Tracking);
    assert!(states[2..].iter().all(|&s| s == TrackingState::Tracking));
    assert!(tracker.map().landmarks().len() >= 15);

    // Monocular scale is arbitrary, but the direction of travel is not.
    let center = tracker.last_keyframe_pose().unwrap().center();
    let direction = center.coords.normalize();
    let angle = direction.dot(&Vector3::x()).clamp(-1.0, 1.0).acos();
    assert!(
        angle.to_degrees() < 5.0,
        "trajectory direction off by {:.2}°",
        angle.to_degrees()
    );
}

#[test]
fn pure_rotation_never_bootstraps() {
    let mut rng = Xoshiro256PlusPlus::seed_from_u64(23);
    let points = scene_points(&mut rng);
    let mut tracker = Tracker::new(
        extractor(points, 0.5),
        intrinsics(),
        settings(),
        Xoshiro256PlusPlus::seed_from_u64(2),
    );

    for k in 0..30 {
        let rotation = mvo_core::nalgebra::Rotation3::from_euler_angles(
            0.0,
            (0.4 * k as f64).to_radians(),
            0.0,
        );
        let pose = WorldToCamera::from_parts(*rotation.matrix(), Vector3::zeros());
        let state = tracker.track(&pose);
        assert_eq!(
            state,
            TrackingState::Initializing,
            "a rotation-only stream must never produce a map (frame {})",
            k
        );
    }
    assert!(tracker.map().landmarks().is_empty());
}

#[test]
fn lost_tracking_resets_to_initializing() {
    let mut rng = Xoshiro256PlusPlus::seed_from_u64(31);
    let points = scene_points(&mut rng);
    let mut tracker = Tracker::new(
        extractor(points, 0.5),
        intrinsics(),
        settings(),
        Xoshiro256PlusPlus::seed_from_u64(3),
    );

    for k in 0..3 {
        tracker.track(&camera_at(Vector3::new(0.2 * k as f64, 0.0, 0.0)));
    }
    assert_eq!(tracker.state(), TrackingState::Tracking);

    // Teleport far away from the scene: localization finds nothing.
    let state = tracker.track(&camera_at(Vector3::new(100.0, 50.0, -40.0)));
    assert_eq!(state, TrackingState::Lost);

    // The next frame clears the map and restarts the bootstrap.
    let state = tracker.track(&camera_at(Vector3::new(0.6, 0.0, 0.0)));
    assert_eq!(state, TrackingState::Initializing);
    assert!(tracker.map().landmarks().is_empty());
}
