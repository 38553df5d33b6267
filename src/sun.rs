//! The directional sun light (SPEC_FULL.md §3, "Supplemented data: sun and
//! sky model"): position given as azimuth/altitude, sampled as a disk of
//! angular radius `angular_radius` for direct-light estimation.

use serde::{Deserialize, Serialize};

use crate::ray::Vec3;

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Sun {
    pub azimuth: f32,
    pub altitude: f32,
    pub intensity: f32,
    pub angular_radius: f32,
    pub color: [f32; 3],
    pub draw_texture: bool,
}

impl Default for Sun {
    fn default() -> Self {
        Sun {
            azimuth: 0.0,
            altitude: std::f32::consts::FRAC_PI_4,
            intensity: 1.0,
            angular_radius: 0.0045, // ~ the real sun's angular radius, in radians
            color: [1.0, 1.0, 1.0],
            draw_texture: true,
        }
    }
}

impl Sun {
    /// The unit direction rays travel *from* the sun, derived from
    /// azimuth/altitude.
    pub fn direction(&self) -> Vec3 {
        let (sa, ca) = self.azimuth.sin_cos();
        let (sal, cal) = self.altitude.sin_cos();
        Vec3::new(ca * cal, sal, sa * cal).normalize()
    }

    pub fn radiance(&self) -> [f32; 3] {
        [
            self.color[0] * self.intensity,
            self.color[1] * self.intensity,
            self.color[2] * self.intensity,
        ]
    }

    /// Builds an orthonormal basis around the sun direction so a disk sample
    /// `(dx, dy) ∈ unit disk` can be mapped to a world-space direction.
    pub fn sample_direction(&self, dx: f32, dy: f32) -> Vec3 {
        let dir = self.direction();
        let helper = if dir.x.abs() < 0.99 {
            Vec3::new(1.0, 0.0, 0.0)
        } else {
            Vec3::new(0.0, 1.0, 0.0)
        };
        let tangent = helper.cross(dir).normalize();
        let bitangent = dir.cross(tangent);

        let r = self.angular_radius;
        (dir + tangent * (dx * r) + bitangent * (dy * r)).normalize()
    }

    /// Solid angle subtended by the sun disk, used to weight direct-light
    /// samples (`Ω = 2π(1 − cos(angular_radius))`).
    pub fn solid_angle(&self) -> f32 {
        std::f32::consts::TAU * (1.0 - self.angular_radius.cos())
    }
}
