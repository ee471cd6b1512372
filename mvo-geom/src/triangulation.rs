use mvo_core::{
    nalgebra::{Matrix3, Matrix4, Point2, Point3, RowVector4, Vector3},
    NormalizedKeyPoint,
};

const SVD_EPSILON: f64 = 1e-12;
const SVD_ITERATIONS: usize = 1000;

/// Linear two-view triangulation: intersects the rays observing one point
/// from two cameras with poses `(R1, T1)` and `(R2, T2)` (world-to-camera) by
/// the direct linear transform, solving the 4×4 homogeneous system through
/// its null vector.
///
/// Returns the point in the coordinate frame the poses are expressed in, or
/// `None` when the geometry is degenerate (parallel rays, point at infinity).
pub fn triangulate_two_view(
    r1: &Matrix3<f64>,
    t1: &Vector3<f64>,
    p1: NormalizedKeyPoint,
    r2: &Matrix3<f64>,
    t2: &Vector3<f64>,
    p2: NormalizedKeyPoint,
) -> Option<Point3<f64>> {
    let row = |r: &Matrix3<f64>, t: &Vector3<f64>, coordinate: f64, axis: usize| {
        let direction = r.row(2).into_owned() * coordinate - r.row(axis).into_owned();
        RowVector4::new(
            direction[0],
            direction[1],
            direction[2],
            coordinate * t.z - t[axis],
        )
    };
    let design = Matrix4::from_rows(&[
        row(r1, t1, p1.x, 0),
        row(r1, t1, p1.y, 1),
        row(r2, t2, p2.x, 0),
        row(r2, t2, p2.y, 1),
    ]);

    let svd = design.try_svd(true, true, SVD_EPSILON, SVD_ITERATIONS)?;
    // Singular values are ordered, so the null vector is the last row of V*.
    let x = svd.v_t?.row(3).transpose();
    // The null vector has unit norm, so a vanishing homogeneous component
    // means the rays meet at infinity.
    if x.w.abs() <= 1e-9 {
        return None;
    }
    let point = Point3::new(x.x / x.w, x.y / x.w, x.z / x.w);
    point.coords.iter().all(|n| n.is_finite()).then(|| point)
}

/// Projects a camera-frame point onto the virtual image plane at `z = 1`.
pub fn project(point: &Point3<f64>) -> Point2<f64> {
    Point2::from(point.coords.xy() / point.z)
}
