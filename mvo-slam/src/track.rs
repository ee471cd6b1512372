use crate::{Initializer, Map, PointCloudPublisher, Relocalization, TrackerSettings};
use log::{info, warn};
use mvo_core::{CameraIntrinsics, FeatureExtractor, Frame};
use rand::Rng;

/// Where the tracker currently is in its lifecycle.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum TrackingState {
    /// Searching for a two-view bootstrap pair.
    Initializing,
    /// Localizing frames against the map.
    Tracking,
    /// Localization failed; the map will be cleared on the next frame and
    /// the bootstrap restarted.
    Lost,
}

/// The top-level state machine driving the pipeline over an image stream.
///
/// Frames are processed strictly in arrival order on the calling thread, so
/// landmark ids, keyframe ids and pose updates are totally ordered. Every
/// frame passes through feature extraction first and is then dispatched to
/// the initializer or the map according to the current state.
pub struct Tracker<E: FeatureExtractor, R> {
    extractor: E,
    initializer: Initializer<E::Feature, R>,
    map: Map<E::Feature, R>,
    state: TrackingState,
    next_frame_id: usize,
}

impl<E, R> Tracker<E, R>
where
    E: FeatureExtractor,
    R: Rng + Clone,
{
    pub fn new(
        extractor: E,
        intrinsics: CameraIntrinsics,
        settings: TrackerSettings,
        rng: R,
    ) -> Self {
        Self {
            extractor,
            initializer: Initializer::new(settings, intrinsics, rng.clone()),
            map: Map::new(settings, intrinsics, rng),
            state: TrackingState::Initializing,
            next_frame_id: 0,
        }
    }

    /// Attaches the optional landmark telemetry sink.
    pub fn attach_telemetry(&mut self, publisher: PointCloudPublisher) {
        self.map.attach_telemetry(publisher);
    }

    pub fn state(&self) -> TrackingState {
        self.state
    }

    pub fn map(&self) -> &Map<E::Feature, R> {
        &self.map
    }

    /// Processes one image and returns the state after it.
    pub fn track(&mut self, image: &E::Image) -> TrackingState {
        if self.state == TrackingState::Lost {
            info!("tracking lost; clearing the map and restarting the bootstrap");
            self.map.clear();
            self.initializer.reset();
            self.state = TrackingState::Initializing;
        }

        let feature = self.extractor.extract(image);
        let frame = Frame::new(self.next_frame_id, feature);
        self.next_frame_id += 1;

        match self.state {
            TrackingState::Initializing => {
                if let Some(bootstrap) = self.initializer.initialize(frame) {
                    match self.map.init(bootstrap) {
                        Ok(()) => {
                            info!("tracking started");
                            self.state = TrackingState::Tracking;
                        }
                        Err(error) => warn!("map initialization failed: {}", error),
                    }
                }
            }
            TrackingState::Tracking => match self.map.localize(frame) {
                Ok(Relocalization::PoseOnly(_)) | Ok(Relocalization::NewKeyframe(_)) => {}
                Err(error) => {
                    warn!("localization failed: {}", error);
                    self.state = TrackingState::Lost;
                }
            },
            TrackingState::Lost => unreachable!("lost state is reset before dispatch"),
        }
        self.state
    }

    /// The pose of the most recent keyframe, if the map holds one.
    pub fn last_keyframe_pose(&self) -> Option<mvo_core::WorldToCamera> {
        self.map.keyframes().last().map(|keyframe| keyframe.pose())
    }
}
