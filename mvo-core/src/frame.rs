use crate::{Feature, NormalizedKeyPoint, WorldToCamera};

/// One incoming image after feature extraction.
///
/// A frame is created per image with an identity pose, has its pose written
/// exactly once when localization or bootstrap succeeds, and is only retained
/// afterwards as the latest keyframe of the map or as the bootstrap reference
/// frame. `landmark_map` parallels the keypoint list and records which
/// keypoints are tied to a map landmark.
#[derive(Debug, Clone)]
pub struct Frame<F> {
    pub id: usize,
    pub pose: WorldToCamera,
    pub feature: F,
    pub landmark_map: Vec<Option<usize>>,
}

impl<F: Feature> Frame<F> {
    pub fn new(id: usize, feature: F) -> Self {
        let landmark_map = vec![None; feature.len()];
        Self {
            id,
            pose: WorldToCamera::identity(),
            feature,
            landmark_map,
        }
    }

    pub fn keypoint(&self, ix: usize) -> NormalizedKeyPoint {
        self.feature.keypoint(ix)
    }

    /// The landmark tied to the given keypoint, if any.
    pub fn landmark(&self, ix: usize) -> Option<usize> {
        self.landmark_map[ix]
    }
}
