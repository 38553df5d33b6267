//! The sky model (SPEC_FULL.md §3): a tagged `SkyMode` in place of the
//! dynamic-dispatch texture-loader interface the distilled spec implies
//! (REDESIGN FLAGS §9).

use serde::{Deserialize, Serialize};

use crate::ray::Vec3;
use crate::sun::Sun;

/// A lazily-decoded equirectangular texture; decoding is out of scope (§1's
/// "texture-pack decoding" non-goal), so only the handle and its pixel
/// dimensions are modeled here.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Texture {
    pub path: String,
    pub width: u32,
    pub height: u32,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(tag = "mode")]
pub enum SkyMode {
    /// A simple physically-inspired gradient using the sun's altitude.
    Simulated,
    /// Linear interpolation between `horizon_color` and `zenith_color`.
    Gradient,
    SolidColor,
    Skymap,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Sky {
    pub mode: SkyMode,
    pub horizon_color: [f32; 3],
    pub zenith_color: [f32; 3],
    pub skymap: Option<Texture>,
    pub cloud_size: f32,
    pub cloud_enabled: bool,
    pub rotation: f32,
}

impl Default for Sky {
    fn default() -> Self {
        Sky {
            mode: SkyMode::Gradient,
            horizon_color: [0.7, 0.8, 1.0],
            zenith_color: [0.2, 0.4, 0.9],
            skymap: None,
            cloud_size: 0.0,
            cloud_enabled: false,
            rotation: 0.0,
        }
    }
}

impl Sky {
    /// Radiance seen by a ray with unit direction `dir` that missed all
    /// scene geometry. `SolidColor` and `Skymap` (before an actual decoded
    /// texture is wired in) both fall back to `zenith_color`.
    pub fn radiance(&self, dir: Vec3, sun: &Sun) -> [f32; 3] {
        match self.mode {
            SkyMode::SolidColor => self.zenith_color,
            SkyMode::Skymap => self.zenith_color,
            SkyMode::Gradient => {
                let t = (dir.y * 0.5 + 0.5).clamp(0.0, 1.0);
                lerp3(self.horizon_color, self.zenith_color, t)
            }
            SkyMode::Simulated => self.simulated_radiance(dir, sun),
        }
    }

    fn simulated_radiance(&self, dir: Vec3, sun: &Sun) -> [f32; 3] {
        let t = (dir.y * 0.5 + 0.5).clamp(0.0, 1.0);
        let base = lerp3(self.horizon_color, self.zenith_color, t);
        let sun_dir = sun.direction();
        let alignment = dir.dot(sun_dir).max(0.0).powf(8.0);
        let glow = sun.radiance().map(|c| c * alignment * 0.3);
        [base[0] + glow[0], base[1] + glow[1], base[2] + glow[2]]
    }
}

fn lerp3(a: [f32; 3], b: [f32; 3], t: f32) -> [f32; 3] {
    [
        a[0] + (b[0] - a[0]) * t,
        a[1] + (b[1] - a[1]) * t,
        a[2] + (b[2] - a[2]) * t,
    ]
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn gradient_sky_interpolates_toward_zenith_looking_up() {
        let sky = Sky::default();
        let horizon = sky.radiance(Vec3::new(1.0, 0.0, 0.0), &Sun::default());
        let zenith = sky.radiance(Vec3::new(0.0, 1.0, 0.0), &Sun::default());
        assert_eq!(horizon, sky.horizon_color);
        assert_eq!(zenith, sky.zenith_color);
    }

    #[test]
    fn solid_color_sky_ignores_direction() {
        let sky = Sky {
            mode: SkyMode::SolidColor,
            ..Sky::default()
        };
        let a = sky.radiance(Vec3::new(1.0, 0.0, 0.0), &Sun::default());
        let b = sky.radiance(Vec3::new(-1.0, 0.3, 0.2), &Sun::default());
        assert_eq!(a, b);
        assert_eq!(a, sky.zenith_color);
    }

    #[test]
    fn simulated_sky_brightens_toward_the_sun() {
        let sun = Sun::default();
        let sky = Sky {
            mode: SkyMode::Simulated,
            ..Sky::default()
        };
        let toward_sun = sky.radiance(sun.direction(), &sun);
        let away = sky.radiance(-sun.direction(), &sun);
        assert!(toward_sun[0] + toward_sun[1] + toward_sun[2] > away[0] + away[1] + away[2]);
    }
}
