//! The camera: eye position/orientation plus a [`Projection`] that turns a
//! normalized image-plane coordinate into a primary [`Ray`] (SPEC_FULL.md
//! §4.3's "Supplemented: projections").

use rand::Rng;
use serde::{Deserialize, Serialize};

use crate::ray::{Ray, Vec3};

/// How a normalized `(u, v) ∈ [-1, 1]^2` image-plane coordinate maps to a
/// primary ray direction. A tagged variant in place of the dynamic-dispatch
/// `Projection` interface the distilled spec describes abstractly (REDESIGN
/// FLAGS §9).
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(tag = "kind")]
pub enum Projection {
    Pinhole {
        fov: f32,
    },
    ThinLens {
        fov: f32,
        aperture: f32,
        focal_distance: f32,
    },
    Fisheye {
        fov: f32,
    },
    Panoramic {
        fov: f32,
    },
    Stereoscopic {
        eye_separation: f32,
        inner: Box<Projection>,
    },
}

impl Projection {
    /// Builds a primary ray in camera space (eye at the origin, looking down
    /// `-z`, `+y` up) for image-plane coordinate `(u, v)`.
    fn view_ray_local(&self, u: f32, v: f32, rng: &mut impl Rng) -> Ray {
        match self {
            Projection::Pinhole { fov } => pinhole_ray(u, v, *fov),
            Projection::ThinLens {
                fov,
                aperture,
                focal_distance,
            } => thin_lens_ray(u, v, *fov, *aperture, *focal_distance, rng),
            Projection::Fisheye { fov } => fisheye_ray(u, v, *fov),
            Projection::Panoramic { fov } => panoramic_ray(u, v, *fov),
            Projection::Stereoscopic {
                eye_separation,
                inner,
            } => {
                // `u` has already been split into a left/right half by the
                // caller; what's left is to offset the eye along local X.
                let mut ray = inner.view_ray_local(u, v, rng);
                let offset = if u < 0.0 {
                    -eye_separation * 0.5
                } else {
                    eye_separation * 0.5
                };
                ray.origin = ray.origin + Vec3::new(offset, 0.0, 0.0);
                ray
            }
        }
    }
}

fn pinhole_ray(u: f32, v: f32, fov: f32) -> Ray {
    let plane_dist = 1.0 / (fov * 0.5).tan();
    let dir = Vec3::new(u, v, -plane_dist).normalize();
    Ray::new(Vec3::ZERO, dir)
}

fn thin_lens_ray(u: f32, v: f32, fov: f32, aperture: f32, focal_distance: f32, rng: &mut impl Rng) -> Ray {
    let pinhole = pinhole_ray(u, v, fov);
    let focus_point = pinhole.origin + pinhole.direction * focal_distance;

    let r = aperture * rng.random::<f32>().sqrt();
    let theta = std::f32::consts::TAU * rng.random::<f32>();
    let lens_offset = Vec3::new(r * theta.cos(), r * theta.sin(), 0.0);

    let origin = pinhole.origin + lens_offset;
    let dir = (focus_point - origin).normalize();
    Ray::new(origin, dir)
}

fn fisheye_ray(u: f32, v: f32, fov: f32) -> Ray {
    let r = (u * u + v * v).sqrt().min(1.0);
    if r < 1e-6 {
        return Ray::new(Vec3::ZERO, Vec3::new(0.0, 0.0, -1.0));
    }
    let theta = r * fov * 0.5;
    let phi = v.atan2(u);
    let dir = Vec3::new(theta.sin() * phi.cos(), theta.sin() * phi.sin(), -theta.cos());
    Ray::new(Vec3::ZERO, dir.normalize())
}

fn panoramic_ray(u: f32, v: f32, fov: f32) -> Ray {
    let azimuth = u * std::f32::consts::PI;
    let altitude = v * fov * 0.5;
    let dir = Vec3::new(
        altitude.cos() * azimuth.sin(),
        altitude.sin(),
        -altitude.cos() * azimuth.cos(),
    );
    Ray::new(Vec3::ZERO, dir.normalize())
}

/// Eye position and orientation, plus the [`Projection`] that shapes the
/// image plane. Orientation is stored as yaw/pitch (no roll), matching the
/// teacher's camera parameter style of plain fields over a matrix type.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Camera {
    pub position: Vec3,
    pub yaw: f32,
    pub pitch: f32,
    pub projection: Projection,
}

impl Camera {
    pub fn new(position: Vec3, yaw: f32, pitch: f32, projection: Projection) -> Self {
        Camera {
            position,
            yaw,
            pitch,
            projection,
        }
    }

    fn basis(&self) -> (Vec3, Vec3, Vec3) {
        let (sy, cy) = self.yaw.sin_cos();
        let (sp, cp) = self.pitch.sin_cos();
        let forward = Vec3::new(sy * cp, sp, -cy * cp).normalize();
        let world_up = Vec3::new(0.0, 1.0, 0.0);
        let right = forward.cross(world_up).normalize();
        let up = right.cross(forward);
        (right, up, forward)
    }

    /// Generates a world-space primary ray for normalized image-plane
    /// coordinate `(u, v) ∈ [-1, 1]^2`.
    pub fn view_ray(&self, u: f32, v: f32, rng: &mut impl Rng) -> Ray {
        let local = self.projection.view_ray_local(u, v, rng);
        let (right, up, forward) = self.basis();

        let world_dir = right * local.direction.x + up * local.direction.y + forward * (-local.direction.z);
        let world_origin = self.position + right * local.origin.x + up * local.origin.y + forward * (-local.origin.z);

        Ray::new(world_origin, world_dir.normalize())
    }
}
