use thiserror::Error;

/// Recoverable failures of the tracking pipeline.
///
/// All of these are consumed by the tracker as state transitions (keep
/// waiting for a better bootstrap pair, or demote to lost and reset the map);
/// none of them is fatal to the process.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Error)]
pub enum TrackingError {
    #[error("only {found} correspondences where {required} are required")]
    InsufficientMatches { found: usize, required: usize },
    #[error("pose hypotheses are ambiguous; structure cannot be disambiguated")]
    AmbiguousGeometry,
    #[error("parallax is too small for reliable triangulation")]
    InsufficientParallax,
    #[error("structure covers {covered} image cells where {required} are required")]
    InsufficientCoverage { covered: usize, required: usize },
    #[error("only {found} localization inliers where {required} are required")]
    InsufficientInliers { found: usize, required: usize },
    #[error("bundle adjustment did not produce a usable solution")]
    BundleAdjustmentFailed,
    #[error("the map holds no keyframe to localize against")]
    MapNotInitialized,
}
