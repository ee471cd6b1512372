//! # mvo-geom
//!
//! Stateless numerical routines for two-view geometry: essential and
//! homography estimation by the normalized direct linear transform, the
//! essential-matrix rank-2 correction, Horn's decomposition of an essential
//! matrix into candidate relative poses, linear two-view triangulation, and a
//! couple of so(3) helpers shared by the nonlinear solvers.
//!
//! Everything in this crate is a pure function over nalgebra types. Degenerate
//! inputs (too few points, coincident point clouds, rank-deficient systems)
//! yield `None` rather than garbage.

mod conditioning;
mod epipolar;
mod homography;
mod so3;
mod triangulation;

pub use epipolar::*;
pub use homography::*;
pub use so3::*;
pub use triangulation::*;
