//! # mvo-slam
//!
//! The stateful half of the mvo monocular visual odometry system. It combines
//! the stateless geometry kernel (`mvo-geom`) and the robust estimators
//! (`mvo-estimate`) into a tracking pipeline:
//!
//! * [`Triangulator`] resolves the four-fold essential-decomposition
//!   ambiguity by chirality voting and filters structure by reprojection
//!   error.
//! * [`Initializer`] runs the two-view bootstrap over a rolling reference
//!   frame until a pair of frames produces well-conditioned structure.
//! * [`Map`] owns keyframes, landmarks and their observation graph, refines
//!   them with bundle adjustment, and relocalizes incoming frames with PnP.
//! * [`Tracker`] sequences the above as a state machine over the incoming
//!   image stream, demoting to a lost state and re-bootstrapping when
//!   localization fails.
//!
//! The feature extraction/matching collaborator is abstracted behind the
//! traits in `mvo-core`; nothing in this crate touches pixels. Configuration
//! is resolved into a [`TrackerSettings`] value by the caller; the crate does
//! no file I/O, with the single exception of the optional fire-and-forget
//! [`PointCloudPublisher`] telemetry sink.

mod bundle;
mod error;
mod initialize;
mod map;
mod settings;
mod telemetry;
mod track;
mod triangulate;

pub use error::*;
pub use initialize::*;
pub use map::*;
pub use settings::*;
pub use telemetry::*;
pub use track::*;
pub use triangulate::*;
