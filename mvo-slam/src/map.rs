use crate::{
    bundle, Bootstrap, PointCloudPublisher, TrackerSettings, Triangulator, TrackingError,
};
use itertools::izip;
use log::{debug, info};
use mvo_core::{
    nalgebra::{Point2, Point3, Rotation3, UnitQuaternion, Vector3},
    CameraIntrinsics, Feature, FeatureMatch, Frame, NormalizedKeyPoint, WorldToCamera,
};
use mvo_estimate::{FourPointPnp, Ransac};
use rand::Rng;
use std::collections::HashMap;

/// A frame promoted into the map: an optimizable pose plus the observations
/// it contributes to the landmark graph. The rotation is kept as a unit
/// quaternion because it is an optimization variable; bundle adjustment
/// composes scaled-axis deltas onto it, which preserves the unit norm.
#[derive(Debug, Clone)]
pub struct Keyframe {
    pub rotation: UnitQuaternion<f64>,
    pub translation: Vector3<f64>,
    /// Landmark id → observed normalized image point.
    pub observations: HashMap<usize, Point2<f64>>,
}

impl Keyframe {
    fn from_pose(pose: WorldToCamera) -> Self {
        Self {
            rotation: UnitQuaternion::from_rotation_matrix(&Rotation3::from_matrix_unchecked(
                pose.rotation(),
            )),
            translation: pose.translation(),
            observations: HashMap::new(),
        }
    }

    pub fn pose(&self) -> WorldToCamera {
        WorldToCamera::from_parts(*self.rotation.to_rotation_matrix().matrix(), self.translation)
    }
}

/// How an incoming frame was absorbed by [`Map::localize`].
#[derive(Debug, Clone, Copy, PartialEq)]
pub enum Relocalization {
    /// The pose was recovered but the camera has not moved far enough from
    /// the last keyframe to justify growing the map.
    PoseOnly(WorldToCamera),
    /// The frame was promoted to a keyframe and the map was extended.
    NewKeyframe(WorldToCamera),
}

impl Relocalization {
    pub fn pose(&self) -> WorldToCamera {
        match *self {
            Relocalization::PoseOnly(pose) | Relocalization::NewKeyframe(pose) => pose,
        }
    }
}

/// The keyframe/landmark map with bundle-adjustment refinement and PnP
/// relocalization.
///
/// The map exclusively owns keyframe and landmark storage. Landmark ids are
/// dense indices, monotonically increasing, and never freed within a session;
/// every id referenced by a keyframe's observations exists in the landmark
/// list. The whole map is discarded on [`Map::clear`].
pub struct Map<F, R> {
    keyframes: Vec<Keyframe>,
    landmarks: Vec<Point3<f64>>,
    last_frame: Option<Frame<F>>,
    settings: TrackerSettings,
    intrinsics: CameraIntrinsics,
    ransac: Ransac<R>,
    triangulator: Triangulator,
    telemetry: Option<PointCloudPublisher>,
}

impl<F: Feature, R: Rng> Map<F, R> {
    pub fn new(settings: TrackerSettings, intrinsics: CameraIntrinsics, rng: R) -> Self {
        Self {
            keyframes: Vec::new(),
            landmarks: Vec::new(),
            last_frame: None,
            settings,
            intrinsics,
            ransac: Ransac::new(
                settings.ransac_success_rate,
                settings.ransac_max_iterations,
                rng,
            ),
            triangulator: Triangulator::new(&settings, &intrinsics),
            telemetry: None,
        }
    }

    /// Attaches a fire-and-forget telemetry sink that receives the landmark
    /// set after every successful map update.
    pub fn attach_telemetry(&mut self, publisher: PointCloudPublisher) {
        self.telemetry = Some(publisher);
    }

    pub fn clear(&mut self) {
        self.keyframes.clear();
        self.landmarks.clear();
        self.last_frame = None;
    }

    pub fn keyframes(&self) -> &[Keyframe] {
        &self.keyframes
    }

    pub fn landmarks(&self) -> &[Point3<f64>] {
        &self.landmarks
    }

    fn add_keyframe(&mut self, pose: WorldToCamera) -> usize {
        self.keyframes.push(Keyframe::from_pose(pose));
        self.keyframes.len() - 1
    }

    fn add_landmark(&mut self, point: Point3<f64>) -> usize {
        self.landmarks.push(point);
        self.landmarks.len() - 1
    }

    fn add_observation(&mut self, keyframe: usize, landmark: usize, point: NormalizedKeyPoint) {
        self.keyframes[keyframe].observations.insert(landmark, point.0);
    }

    /// Seeds the map from an accepted two-view bootstrap: the reference and
    /// current frames become the first two keyframes, every triangulated
    /// point becomes a landmark observed in both, and the whole (tiny)
    /// problem is refined by bundle adjustment.
    pub fn init(&mut self, bootstrap: Bootstrap<F>) -> Result<(), TrackingError> {
        self.clear();
        let Bootstrap {
            mut reference,
            mut current,
            matches,
            points,
            ..
        } = bootstrap;

        let first = self.add_keyframe(reference.pose);
        let second = self.add_keyframe(current.pose);
        for (&point, &FeatureMatch(ia, ib)) in points.iter().zip(&matches) {
            let id = self.add_landmark(point);
            self.add_observation(first, id, reference.keypoint(ia));
            self.add_observation(second, id, current.keypoint(ib));
            reference.landmark_map[ia] = Some(id);
            current.landmark_map[ib] = Some(id);
        }

        self.bundle_adjust()?;
        current.pose = self.keyframes[second].pose();
        info!(
            "map initialized with {} landmarks over keyframes {} and {}",
            self.landmarks.len(),
            reference.id,
            current.id
        );
        self.last_frame = Some(current);
        self.publish();
        Ok(())
    }

    /// Localizes a frame against the latest keyframe and, if the camera has
    /// moved far enough, promotes it to a new keyframe and grows the map.
    ///
    /// Failure leaves the tracker with no trustworthy pose; the caller must
    /// treat it as lost and reset the map. Observations added before a failed
    /// bundle adjustment are not rolled back, as the map is discarded anyway.
    pub fn localize(&mut self, mut frame: Frame<F>) -> Result<Relocalization, TrackingError> {
        let last = self.last_frame.as_ref().ok_or(TrackingError::MapNotInitialized)?;
        let matches = last.feature.matches(
            &frame.feature,
            self.settings.match_k,
            self.settings.match_radius,
        );

        // Matches whose reference keypoint already carries a landmark anchor
        // the pose; the rest are candidates for new structure.
        let mut known = Vec::new();
        let mut novel = Vec::new();
        for &FeatureMatch(ia, ib) in &matches {
            match last.landmark(ia) {
                Some(id) => known.push(FeatureMatch(id, ib)),
                None => novel.push(FeatureMatch(ia, ib)),
            }
        }
        debug!(
            "frame {}: {} matches against the last keyframe ({} landmark-tied)",
            frame.id,
            matches.len(),
            known.len()
        );

        let required = self
            .settings
            .min_pnp_inliers
            .max((known.len() as f64 * self.settings.pnp_inlier_fraction) as usize);
        let (mut pose, inliers) = {
            let mut pnp = FourPointPnp::new(
                &self.landmarks,
                frame.feature.keypoints(),
                &known,
                &self.intrinsics,
                self.settings.pnp_sigma,
            );
            self.ransac.run(&mut pnp);
            if pnp.matches.len() < required {
                return Err(TrackingError::InsufficientInliers {
                    found: pnp.matches.len(),
                    required,
                });
            }
            (
                WorldToCamera::from_parts(pnp.rotation, pnp.translation),
                pnp.matches,
            )
        };
        frame.pose = pose;

        let previous = self.keyframes.len() - 1;
        let baseline = (pose.center() - self.keyframes[previous].pose().center()).norm();
        if baseline < self.settings.min_keyframe_baseline {
            debug!(
                "frame {}: relocalized without promotion (baseline {:.4})",
                frame.id, baseline
            );
            return Ok(Relocalization::PoseOnly(pose));
        }

        let promoted = self.add_keyframe(pose);
        for &FeatureMatch(id, ib) in &inliers {
            self.add_observation(promoted, id, frame.keypoint(ib));
            frame.landmark_map[ib] = Some(id);
        }

        self.bundle_adjust()?;
        frame.pose = self.keyframes[promoted].pose();
        pose = frame.pose;

        // Grow the map: triangulate the novel matches against the refined
        // previous keyframe.
        let previous_pose = self.keyframes[previous].pose();
        let relative_rotation = pose.rotation() * previous_pose.rotation().transpose();
        let relative_translation =
            pose.translation() - relative_rotation * previous_pose.translation();
        let last = self.last_frame.as_ref().ok_or(TrackingError::MapNotInitialized)?;
        let (points, surviving) = self.triangulator.with_pose(
            last.feature.keypoints(),
            frame.feature.keypoints(),
            &novel,
            &relative_rotation,
            &relative_translation,
        );

        // Points come back in the previous camera's frame; lift them to
        // world coordinates before registering them.
        let inverse_previous = previous_pose.inverse();
        let additions: Vec<(Point3<f64>, NormalizedKeyPoint, usize)> =
            izip!(&points, &surviving)
                .map(|(point, &FeatureMatch(ia, ib))| {
                    (inverse_previous.transform(*point), last.keypoint(ia), ib)
                })
                .collect();
        for (point, previous_observation, ib) in additions {
            let id = self.add_landmark(point);
            self.add_observation(previous, id, previous_observation);
            self.add_observation(promoted, id, frame.keypoint(ib));
            frame.landmark_map[ib] = Some(id);
        }

        info!(
            "frame {} promoted to keyframe {} (baseline {:.4}, {} new landmarks, {} total)",
            frame.id,
            promoted,
            baseline,
            surviving.len(),
            self.landmarks.len()
        );
        self.last_frame = Some(frame);
        self.publish();
        Ok(Relocalization::NewKeyframe(pose))
    }

    fn bundle_adjust(&mut self) -> Result<(), TrackingError> {
        bundle::bundle_adjust(
            &mut self.keyframes,
            &mut self.landmarks,
            2,
            self.intrinsics.focals,
            self.settings.ba_huber_width,
            self.settings.ba_patience,
        )
    }

    fn publish(&self) {
        if let Some(telemetry) = &self.telemetry {
            telemetry.publish(&self.landmarks);
        }
    }
}
