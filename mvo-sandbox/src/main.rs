//! Drives the tracker over a synthetic scene: a camera translating past a
//! random point cloud, observed through a pinhole camera with Gaussian pixel
//! noise and matched by ground-truth point identity. Useful for soak testing
//! the pipeline and for watching the landmark stream on a point-cloud viewer
//! via the UDP telemetry sink.

use log::{info, warn};
use mvo_core::{
    nalgebra::{Matrix3, Point2, Point3, Vector2, Vector3},
    CameraIntrinsics, Feature, FeatureExtractor, FeatureMatch, NormalizedKeyPoint, WorldToCamera,
};
use mvo_slam::{PointCloudPublisher, Tracker, TrackerSettings, TrackingState};
use rand::{Rng, SeedableRng};
use rand_xoshiro::Xoshiro256PlusPlus;
use std::cell::RefCell;
use std::collections::HashMap;
use std::path::PathBuf;
use structopt::StructOpt;

#[derive(StructOpt)]
#[structopt(name = "mvo-sandbox", about = "Synthetic-scene driver for the mvo tracker")]
struct Opt {
    /// Number of frames to feed the tracker.
    #[structopt(long, default_value = "60")]
    frames: usize,
    /// Number of world points in the synthetic cloud.
    #[structopt(long, default_value = "300")]
    points: usize,
    /// Gaussian pixel noise added to every observation.
    #[structopt(long, default_value = "0.5")]
    noise: f64,
    /// Camera translation per frame along the x axis.
    #[structopt(long, default_value = "0.1")]
    step: f64,
    /// Seed for the scene and for the estimators.
    #[structopt(long, default_value = "5")]
    seed: u64,
    /// Focal length in pixels (square pixels assumed).
    #[structopt(long, default_value = "500.0")]
    focal: f64,
    /// Image width in pixels.
    #[structopt(long, default_value = "1280.0")]
    width: f64,
    /// Image height in pixels.
    #[structopt(long, default_value = "720.0")]
    height: f64,
    /// Settings file in the format of `mvo_slam::TrackerSettings`.
    #[structopt(short, long)]
    settings: Option<PathBuf>,
    /// Address of a UDP point-cloud sink, e.g. 127.0.0.1:9870.
    #[structopt(short, long)]
    telemetry: Option<String>,
}

struct SandboxFeature {
    keypoints: Vec<NormalizedKeyPoint>,
    ids: Vec<usize>,
}

impl Feature for SandboxFeature {
    fn keypoints(&self) -> &[NormalizedKeyPoint] {
        &self.keypoints
    }

    // Identity matching on ground-truth point ids; `k` is moot with a single
    // candidate per keypoint, the radius gate still applies.
    fn matches(&self, other: &Self, _k: usize, radius: f64) -> Vec<FeatureMatch> {
        let by_id: HashMap<usize, usize> = other
            .ids
            .iter()
            .enumerate()
            .map(|(ix, &id)| (id, ix))
            .collect();
        self.ids
            .iter()
            .enumerate()
            .filter_map(|(ia, id)| {
                let &ib = by_id.get(id)?;
                (self.keypoints[ia].distance(other.keypoints[ib]) <= radius)
                    .then(|| FeatureMatch(ia, ib))
            })
            .collect()
    }
}

struct SandboxExtractor {
    points: Vec<Point3<f64>>,
    intrinsics: CameraIntrinsics,
    image_size: Vector2<f64>,
    noise_pixels: f64,
    rng: RefCell<Xoshiro256PlusPlus>,
}

impl SandboxExtractor {
    fn gaussian(&self) -> f64 {
        let mut rng = self.rng.borrow_mut();
        let u1 = rng.gen::<f64>().max(1e-12);
        let u2 = rng.gen::<f64>();
        (-2.0 * u1.ln()).sqrt() * (std::f64::consts::TAU * u2).cos()
    }
}

impl FeatureExtractor for SandboxExtractor {
    type Image = WorldToCamera;
    type Feature = SandboxFeature;

    fn extract(&self, image: &WorldToCamera) -> SandboxFeature {
        let mut keypoints = Vec::new();
        let mut ids = Vec::new();
        for (id, point) in self.points.iter().enumerate() {
            let in_camera = image.transform(*point);
            if in_camera.z < 0.2 {
                continue;
            }
            let noise = self.noise_pixels / self.intrinsics.focals.x;
            let keypoint = NormalizedKeyPoint(Point2::new(
                in_camera.x / in_camera.z + noise * self.gaussian(),
                in_camera.y / in_camera.z + noise * self.gaussian(),
            ));
            let pixel = self.intrinsics.unnormalize(keypoint);
            if pixel.x < 0.0
                || pixel.y < 0.0
                || pixel.x >= self.image_size.x
                || pixel.y >= self.image_size.y
            {
                continue;
            }
            keypoints.push(keypoint);
            ids.push(id);
        }
        SandboxFeature { keypoints, ids }
    }
}

fn main() {
    pretty_env_logger::init_timed();
    let opt = Opt::from_args();

    let intrinsics = CameraIntrinsics::identity()
        .focal(opt.focal)
        .principal_point(Point2::new(opt.width / 2.0, opt.height / 2.0));

    let settings = opt
        .settings
        .as_ref()
        .and_then(|path| std::fs::File::open(path).ok())
        .and_then(|file| serde_json::from_reader(file).ok());
    if settings.is_some() {
        info!("loaded settings file");
    } else {
        info!("using default settings");
    }
    let mut settings: TrackerSettings = settings.unwrap_or_default();
    settings.image_width = opt.width;
    settings.image_height = opt.height;

    let mut rng = Xoshiro256PlusPlus::seed_from_u64(opt.seed);
    let half_width = opt.width / 2.0 / opt.focal;
    let half_height = opt.height / 2.0 / opt.focal;
    let reach = opt.step * opt.frames as f64;
    let points: Vec<Point3<f64>> = (0..opt.points)
        .map(|_| {
            let z = 2.0 + 6.0 * rng.gen::<f64>();
            Point3::new(
                (rng.gen::<f64>() * (2.0 * half_width * z + reach)) - half_width * z,
                (rng.gen::<f64>() - 0.5) * 2.0 * half_height * z,
                z,
            )
        })
        .collect();

    let extractor = SandboxExtractor {
        points,
        intrinsics,
        image_size: Vector2::new(opt.width, opt.height),
        noise_pixels: opt.noise,
        rng: RefCell::new(Xoshiro256PlusPlus::seed_from_u64(opt.seed.wrapping_add(1))),
    };

    let mut tracker = Tracker::new(
        extractor,
        intrinsics,
        settings,
        Xoshiro256PlusPlus::seed_from_u64(opt.seed.wrapping_add(2)),
    );
    if let Some(address) = &opt.telemetry {
        match PointCloudPublisher::connect(address) {
            Ok(publisher) => tracker.attach_telemetry(publisher),
            Err(error) => warn!("telemetry sink unavailable: {}", error),
        }
    }

    let mut tracked_frames = 0usize;
    let mut losses = 0usize;
    for k in 0..opt.frames {
        let pose = WorldToCamera::from_parts(
            Matrix3::identity(),
            -Vector3::new(opt.step * k as f64, 0.0, 0.0),
        );
        let state = tracker.track(&pose);
        match state {
            TrackingState::Tracking => tracked_frames += 1,
            TrackingState::Lost => losses += 1,
            TrackingState::Initializing => {}
        }
        info!(
            "frame {:3}: {:?}, {} keyframes, {} landmarks",
            k,
            state,
            tracker.map().keyframes().len(),
            tracker.map().landmarks().len()
        );
    }

    if let Some(pose) = tracker.last_keyframe_pose() {
        let center = pose.center();
        info!(
            "final keyframe center ({:.3}, {:.3}, {:.3})",
            center.x, center.y, center.z
        );
    }
    info!(
        "tracked {}/{} frames with {} losses, {} landmarks in the final map",
        tracked_frames,
        opt.frames,
        losses,
        tracker.map().landmarks().len()
    );
}
