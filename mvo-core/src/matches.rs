/// An index-pair correspondence between two keypoint sets.
///
/// The first index refers to the "a" set and the second to the "b" set. Which
/// concrete sets those are is decided by the producer: the feature matcher
/// yields `(index in self, index in other)`, the PnP stage yields
/// `(landmark id, keypoint index)`. Stages that filter correspondences copy
/// and re-filter match lists; they never mutate the underlying keypoint sets.
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash)]
pub struct FeatureMatch(pub usize, pub usize);
