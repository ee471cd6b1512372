//! # mvo-estimate
//!
//! Robust model estimation: a generic adaptive-iteration RANSAC engine
//! ([`Ransac`]) and the three geometric models it drives in the tracking
//! pipeline — the eight-point essential matrix, the four-point planar
//! homography, and four-point perspective pose ([`FourPointPnp`], backed by a
//! lambda-twist minimal solver and a Gauss-Newton least-squares refinement).
//!
//! A model plugs into the engine through [`RansacModel`], which separates
//! minimal-sample fitting, inlier classification/scoring, and final
//! refinement over the best consensus set. The engine owns nothing but the
//! sampling loop; estimators keep the fitted model and the surviving match
//! list as public fields, and degrade to an empty match list instead of
//! failing when the data does not support a model.

mod essential;
mod homography;
mod p3p;
mod pnp;
mod ransac;

pub use essential::*;
pub use homography::*;
pub use pnp::*;
pub use ransac::*;

/// 95% quantile of the chi-square distribution with one degree of freedom,
/// used for point-to-line (epipolar) distances.
pub const CHI2_1DOF: f64 = 3.841;
/// 95% quantile of the chi-square distribution with two degrees of freedom,
/// used for point-to-point reprojection distances.
pub const CHI2_2DOF: f64 = 5.991;
