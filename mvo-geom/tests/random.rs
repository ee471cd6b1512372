use mvo_core::{
    nalgebra::{Matrix3, Point2, Point3, Rotation3, Vector3},
    NormalizedKeyPoint,
};
use mvo_geom::{decompose_essential, fix_essential, solve_essential, triangulate_two_view};
use rand::{Rng, SeedableRng};
use rand_xoshiro::Xoshiro256PlusPlus;

const SAMPLE_POINTS: usize = 24;
const ROUNDS: usize = 200;

struct Scene {
    rotation: Matrix3<f64>,
    translation: Vector3<f64>,
    pa: Vec<NormalizedKeyPoint>,
    pb: Vec<NormalizedKeyPoint>,
}

/// A random relative pose observing a box of points placed in front of both
/// cameras, projected without noise.
fn random_scene(rng: &mut impl Rng) -> Scene {
    loop {
        let axis = Vector3::new(rng.gen::<f64>() - 0.5, rng.gen::<f64>() - 0.5, rng.gen::<f64>() - 0.5);
        let rotation = *Rotation3::from_scaled_axis(axis * 0.4).matrix();
        let translation = Vector3::new(
            rng.gen::<f64>() - 0.5,
            rng.gen::<f64>() - 0.5,
            0.2 * (rng.gen::<f64>() - 0.5),
        );
        if translation.norm() < 0.2 {
            continue;
        }
        let mut pa = Vec::new();
        let mut pb = Vec::new();
        for _ in 0..SAMPLE_POINTS {
            let point = Point3::new(
                2.0 * (rng.gen::<f64>() - 0.5),
                2.0 * (rng.gen::<f64>() - 0.5),
                3.0 + 3.0 * rng.gen::<f64>(),
            );
            let q = rotation * point.coords + translation;
            if point.z <= 0.1 || q.z <= 0.1 {
                continue;
            }
            pa.push(NormalizedKeyPoint(Point2::new(point.x / point.z, point.y / point.z)));
            pb.push(NormalizedKeyPoint(Point2::new(q.x / q.z, q.y / q.z)));
        }
        if pa.len() >= 16 {
            return Scene {
                rotation,
                translation,
                pa,
                pb,
            };
        }
    }
}

fn epipolar_residual(e: &Matrix3<f64>, a: NormalizedKeyPoint, b: NormalizedKeyPoint) -> f64 {
    (b.homogeneous().transpose() * e * a.homogeneous())[0].abs()
}

#[test]
fn randomized_essential_recovery() {
    let mut rng = Xoshiro256PlusPlus::seed_from_u64(5);
    let successes = (0..ROUNDS)
        .filter(|_| {
            let scene = random_scene(&mut rng);
            let e = match solve_essential(&scene.pa, &scene.pb).and_then(|e| fix_essential(&e)) {
                Some(e) => e,
                None => return false,
            };
            let worst = scene
                .pa
                .iter()
                .zip(&scene.pb)
                .map(|(&a, &b)| epipolar_residual(&e, a, b))
                .fold(0.0, f64::max);
            let svd = e.svd(false, false);
            worst < 1e-6
                && (svd.singular_values[0] - svd.singular_values[1]).abs() < 1e-9
                && svd.singular_values[2].abs() < 1e-9
        })
        .count();
    eprintln!("successes: {}", successes);
    assert!(successes > ROUNDS * 19 / 20);
}

#[test]
fn randomized_essential_recovery_under_noise() {
    // Half-pixel Gaussian-ish noise at a 500px focal length.
    let mut rng = Xoshiro256PlusPlus::seed_from_u64(7);
    let noise = 0.5 / 500.0;
    let successes = (0..ROUNDS)
        .filter(|_| {
            let mut scene = random_scene(&mut rng);
            for p in scene.pb.iter_mut() {
                p.0.x += noise * (rng.gen::<f64>() - 0.5);
                p.0.y += noise * (rng.gen::<f64>() - 0.5);
            }
            let e = match solve_essential(&scene.pa, &scene.pb).and_then(|e| fix_essential(&e)) {
                Some(e) => e,
                None => return false,
            };
            // fix_essential normalizes scale, so residuals stay comparable to
            // the injected noise.
            let worst = scene
                .pa
                .iter()
                .zip(&scene.pb)
                .map(|(&a, &b)| epipolar_residual(&e, a, b))
                .fold(0.0, f64::max);
            worst < 50.0 * noise
        })
        .count();
    eprintln!("successes: {}", successes);
    assert!(successes > ROUNDS * 9 / 10);
}

#[test]
fn decomposition_has_unique_chirality_winner() {
    let mut rng = Xoshiro256PlusPlus::seed_from_u64(11);
    for _ in 0..ROUNDS {
        let scene = random_scene(&mut rng);
        let e = fix_essential(&(scene.translation.cross_matrix() * scene.rotation)).unwrap();
        let decomposition = decompose_essential(&e).unwrap();

        let identity = Matrix3::identity();
        let origin = Vector3::zeros();
        let counts: Vec<usize> = decomposition
            .hypotheses()
            .iter()
            .map(|(r, t)| {
                scene
                    .pa
                    .iter()
                    .zip(&scene.pb)
                    .filter(|&(&a, &b)| {
                        triangulate_two_view(&identity, &origin, a, r, t, b)
                            .map(|p| p.z > 0.0 && (r * p.coords + t).z > 0.0)
                            .unwrap_or(false)
                    })
                    .count()
            })
            .collect();

        let max = *counts.iter().max().unwrap();
        assert_eq!(max, scene.pa.len(), "winner must pass every point");
        let comparable = counts.iter().filter(|&&c| c * 4 > max * 3).count();
        assert_eq!(comparable, 1, "exactly one hypothesis may win: {:?}", counts);
    }
}
