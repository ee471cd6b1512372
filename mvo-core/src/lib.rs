//! # mvo-core
//!
//! This crate provides the vocabulary shared by the `mvo` crates: normalized
//! keypoints, index-pair feature matches, pose wrappers, the pinhole intrinsic
//! matrix, the per-image [`Frame`] record, and the traits through which the
//! feature extraction/matching collaborator is consumed. All numeric types are
//! `f64` and all image coordinates are normalized (undistorted,
//! principal-point-relative, focal-length-divided) unless a type says
//! otherwise.

mod camera;
mod feature;
mod frame;
mod keypoint;
mod matches;
mod pose;

pub use camera::*;
pub use feature::*;
pub use frame::*;
pub use keypoint::*;
pub use matches::*;
pub use nalgebra;
pub use pose::*;
