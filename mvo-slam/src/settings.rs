use serde::{Deserialize, Serialize};

/// Tunable parameters of the tracking pipeline.
///
/// Every field has a serde default, so a partial JSON document resolves
/// against the values below. Sigmas are expected pixel noise per stage; they
/// are converted into normalized-coordinate units through the camera focal
/// lengths where needed.
#[derive(Serialize, Deserialize, Debug, Copy, Clone)]
pub struct TrackerSettings {
    /// Target probability that RANSAC draws at least one outlier-free sample.
    #[serde(default = "default_ransac_success_rate")]
    pub ransac_success_rate: f64,
    /// Hard cap on RANSAC iterations regardless of the adaptive estimate.
    #[serde(default = "default_ransac_max_iterations")]
    pub ransac_max_iterations: usize,
    /// Expected pixel noise for the essential-matrix stage.
    #[serde(default = "default_essential_sigma")]
    pub essential_sigma: f64,
    /// Expected pixel noise for the homography stage. Deliberately looser
    /// than the essential stage; the homography acts as a degeneracy filter,
    /// not a precise model.
    #[serde(default = "default_homography_sigma")]
    pub homography_sigma: f64,
    /// Fraction of the epipolar consensus set the homography stage may
    /// explain before the pair is rejected as planar or parallax-free.
    #[serde(default = "default_homography_rejection_ratio")]
    pub homography_rejection_ratio: f64,
    /// Expected pixel noise for PnP relocalization.
    #[serde(default = "default_pnp_sigma")]
    pub pnp_sigma: f64,
    /// Expected pixel noise for the triangulation reprojection gate.
    #[serde(default = "default_triangulation_sigma")]
    pub triangulation_sigma: f64,
    /// Number of candidate neighbors the matcher may examine per keypoint.
    #[serde(default = "default_match_k")]
    pub match_k: usize,
    /// Radius gate for matching, in normalized image coordinates.
    #[serde(default = "default_match_radius")]
    pub match_radius: f64,
    /// Minimum representative parallax angle, in degrees, for the two-view
    /// bootstrap to be accepted.
    #[serde(default = "default_min_parallax_degrees")]
    pub min_parallax_degrees: f64,
    /// Minimum number of triangulated points for a usable hypothesis.
    #[serde(default = "default_min_triangulated")]
    pub min_triangulated: usize,
    /// Minimum fraction of the correspondences the winning hypothesis must
    /// triangulate.
    #[serde(default = "default_min_triangulated_fraction")]
    pub min_triangulated_fraction: f64,
    /// A hypothesis counts as comparable to the winner when its point count
    /// exceeds this ratio of the winner's; more than one comparable
    /// hypothesis means the decomposition is ambiguous.
    #[serde(default = "default_comparable_hypothesis_ratio")]
    pub comparable_hypothesis_ratio: f64,
    /// Columns of the bootstrap coverage grid over the image.
    #[serde(default = "default_coverage_grid_cols")]
    pub coverage_grid_cols: usize,
    /// Rows of the bootstrap coverage grid over the image.
    #[serde(default = "default_coverage_grid_rows")]
    pub coverage_grid_rows: usize,
    /// Minimum number of occupied coverage cells for a bootstrap to pass.
    #[serde(default = "default_min_coverage_cells")]
    pub min_coverage_cells: usize,
    /// Image width in pixels, used only for the coverage grid.
    #[serde(default = "default_image_width")]
    pub image_width: f64,
    /// Image height in pixels, used only for the coverage grid.
    #[serde(default = "default_image_height")]
    pub image_height: f64,
    /// Frames a bootstrap reference may fail without the match count growing
    /// before it is replaced by the current frame.
    #[serde(default = "default_reference_patience")]
    pub reference_patience: usize,
    /// Minimum camera-center distance from the last keyframe before a frame
    /// is promoted to a new keyframe.
    #[serde(default = "default_min_keyframe_baseline")]
    pub min_keyframe_baseline: f64,
    /// Absolute floor on PnP inliers during relocalization.
    #[serde(default = "default_min_pnp_inliers")]
    pub min_pnp_inliers: usize,
    /// Fractional floor on PnP inliers relative to the candidate count.
    #[serde(default = "default_pnp_inlier_fraction")]
    pub pnp_inlier_fraction: f64,
    /// Huber loss width for bundle adjustment, in pixels.
    #[serde(default = "default_ba_huber_width")]
    pub ba_huber_width: f64,
    /// Iteration budget for each bundle adjustment call.
    #[serde(default = "default_ba_patience")]
    pub ba_patience: usize,
}

impl Default for TrackerSettings {
    fn default() -> Self {
        Self {
            ransac_success_rate: default_ransac_success_rate(),
            ransac_max_iterations: default_ransac_max_iterations(),
            essential_sigma: default_essential_sigma(),
            homography_sigma: default_homography_sigma(),
            homography_rejection_ratio: default_homography_rejection_ratio(),
            pnp_sigma: default_pnp_sigma(),
            triangulation_sigma: default_triangulation_sigma(),
            match_k: default_match_k(),
            match_radius: default_match_radius(),
            min_parallax_degrees: default_min_parallax_degrees(),
            min_triangulated: default_min_triangulated(),
            min_triangulated_fraction: default_min_triangulated_fraction(),
            comparable_hypothesis_ratio: default_comparable_hypothesis_ratio(),
            coverage_grid_cols: default_coverage_grid_cols(),
            coverage_grid_rows: default_coverage_grid_rows(),
            min_coverage_cells: default_min_coverage_cells(),
            image_width: default_image_width(),
            image_height: default_image_height(),
            reference_patience: default_reference_patience(),
            min_keyframe_baseline: default_min_keyframe_baseline(),
            min_pnp_inliers: default_min_pnp_inliers(),
            pnp_inlier_fraction: default_pnp_inlier_fraction(),
            ba_huber_width: default_ba_huber_width(),
            ba_patience: default_ba_patience(),
        }
    }
}

fn default_ransac_success_rate() -> f64 {
    0.99
}

fn default_ransac_max_iterations() -> usize {
    10_000_000
}

fn default_essential_sigma() -> f64 {
    1.0
}

fn default_homography_sigma() -> f64 {
    3.0
}

fn default_homography_rejection_ratio() -> f64 {
    0.9
}

fn default_pnp_sigma() -> f64 {
    1.0
}

fn default_triangulation_sigma() -> f64 {
    1.0
}

fn default_match_k() -> usize {
    3
}

fn default_match_radius() -> f64 {
    0.3
}

fn default_min_parallax_degrees() -> f64 {
    1.0
}

fn default_min_triangulated() -> usize {
    30
}

fn default_min_triangulated_fraction() -> f64 {
    0.25
}

fn default_comparable_hypothesis_ratio() -> f64 {
    0.75
}

fn default_coverage_grid_cols() -> usize {
    16
}

fn default_coverage_grid_rows() -> usize {
    12
}

fn default_min_coverage_cells() -> usize {
    48
}

fn default_image_width() -> f64 {
    1280.0
}

fn default_image_height() -> f64 {
    720.0
}

fn default_reference_patience() -> usize {
    10
}

fn default_min_keyframe_baseline() -> f64 {
    0.05
}

fn default_min_pnp_inliers() -> usize {
    25
}

fn default_pnp_inlier_fraction() -> f64 {
    0.2
}

fn default_ba_huber_width() -> f64 {
    2.447
}

fn default_ba_patience() -> usize {
    100
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn partial_document_resolves_against_defaults() {
        let settings: TrackerSettings =
            serde_json::from_str(r#"{ "min_parallax_degrees": 2.5 }"#).unwrap();
        assert_eq!(settings.min_parallax_degrees, 2.5);
        assert_eq!(settings.min_triangulated, default_min_triangulated());
        assert_eq!(settings.match_k, default_match_k());
    }
}
