//! The ray tracer (SPEC_FULL.md §4.3): scene intersection shared by both
//! shaders, a one-bounce preview shader for live feedback, and the full
//! path-tracing integrator that feeds [`crate::sample_buffer::SampleBuffer`].

use rand::Rng;

use crate::material::{ANY_TYPE, Material, WATER_ID};
use crate::octree::trace::{trace, trace_solid};
use crate::ray::{EPSILON, Hit, Ray, Vec3};
use crate::scene::SceneView;

/// A coarse 3D occupancy map over emitting voxels, weighted by emittance
/// (SPEC_FULL.md §4.3 step 5 / GLOSSARY "Emitter grid"). Built once at scene
/// load from the discovered emitter positions; used to importance-sample one
/// emitter per direct-light estimate instead of scanning the whole scene.
#[derive(Debug, Clone, Default)]
pub struct EmitterGrid {
    cells: Vec<EmitterCell>,
    total_weight: f32,
}

#[derive(Debug, Clone, Copy)]
struct EmitterCell {
    position: Vec3,
    weight: f32,
}

impl EmitterGrid {
    pub fn empty() -> Self {
        EmitterGrid::default()
    }

    /// Builds a grid from `(position, emittance_weight)` samples gathered
    /// while walking the solid octree at load time. Non-positive weights are
    /// dropped.
    pub fn build(cells: impl IntoIterator<Item = (Vec3, f32)>) -> Self {
        let cells: Vec<EmitterCell> = cells
            .into_iter()
            .filter(|&(_, w)| w > 0.0)
            .map(|(position, weight)| EmitterCell { position, weight })
            .collect();
        let total_weight = cells.iter().map(|c| c.weight).sum();
        EmitterGrid { cells, total_weight }
    }

    pub fn is_empty(&self) -> bool {
        self.cells.is_empty()
    }

    /// Builds a coarse occupancy grid over `octree`'s emitting voxels
    /// (GLOSSARY "Emitter grid"): the octree is tiled into `cell_size`^3
    /// cells, and each cell with at least one emitter voxel becomes one
    /// [`EmitterCell`] at its center, weighted by the summed emittance of
    /// every emitter voxel inside it. Coarser than a per-voxel grid by
    /// design — SPEC_FULL.md §4.3 samples one emitter *cell*, not one
    /// emitter voxel.
    pub fn scan(octree: &crate::octree::Octree, palette: &crate::material::Palette, cell_size: i32) -> Self {
        use std::collections::HashMap;

        let cell_size = cell_size.max(1);
        let side = octree.side();
        let mut weights: HashMap<(i32, i32, i32), f32> = HashMap::new();

        let mut x = 0;
        while x < side {
            let cell_x = x.div_euclid(cell_size);
            let mut y = 0;
            while y < side {
                let cell_y = y.div_euclid(cell_size);
                let mut z = 0;
                while z < side {
                    let (value, region) = octree.get_with_size(x, y, z);
                    let step = region.max(1);
                    if let Some(material) = palette.get(value) {
                        if material.is_emitter() {
                            let covered = step.min(cell_size - z.rem_euclid(cell_size)).max(1);
                            let cell = (cell_x, cell_y, z.div_euclid(cell_size));
                            *weights.entry(cell).or_insert(0.0) += material.emittance * covered as f32;
                        }
                    }
                    z += step;
                }
                y += 1;
            }
            x += 1;
        }

        let cells = weights.into_iter().map(|((cx, cy, cz), weight)| {
            let center = Vec3::new(
                (cx as f32 + 0.5) * cell_size as f32,
                (cy as f32 + 0.5) * cell_size as f32,
                (cz as f32 + 0.5) * cell_size as f32,
            );
            (center, weight)
        });
        EmitterGrid::build(cells)
    }

    /// Picks one cell with probability proportional to its weight. Returns
    /// the cell's position and the probability density `weight / total`
    /// used for the MIS balance heuristic.
    pub fn sample(&self, xi: f32) -> Option<(Vec3, f32)> {
        if self.cells.is_empty() || self.total_weight <= 0.0 {
            return None;
        }
        let target = xi.clamp(0.0, 1.0) * self.total_weight;
        let mut accum = 0.0;
        for cell in &self.cells {
            accum += cell.weight;
            if accum >= target {
                return Some((cell.position, cell.weight / self.total_weight));
            }
        }
        self.cells.last().map(|c| (c.position, c.weight / self.total_weight))
    }
}

fn albedo_color(material: &Material) -> Vec3 {
    match material.albedo {
        crate::material::Albedo::Flat(c) => Vec3::new(c[0], c[1], c[2]),
        // Texture decoding is out of scope; fall back to neutral gray.
        crate::material::Albedo::Texture { .. } => Vec3::new(0.7, 0.7, 0.7),
    }
}

/// Intersects `ray` against the scene's solid octree, water octree, and
/// every entity BVH, resolving ties per SPEC_FULL.md §4.3: the lower stable
/// ordering of `(octree_t + EPSILON, bvh_t)` wins, so an exact tie favors
/// the BVH.
///
/// `in_water` selects which boundary the water octree traversal is looking
/// for (SPEC_FULL.md §4.3's *enter*/*exit* modes): `false` stops at the
/// first water voxel (entering the medium), `true` stops at the first voxel
/// that isn't water (leaving it). A ray currently travelling through water
/// must use exit mode, or the very first sample point — still inside the
/// water it just entered — reports a spurious near-zero-distance hit.
pub fn intersect_scene(scene: &SceneView, ray: &Ray, max_t: f32, in_water: bool) -> Option<Hit> {
    let solid_hit = trace_solid(scene.solid, ray, max_t);
    let water_hit = if in_water {
        trace(scene.water, ray, max_t, |v| v == crate::material::AIR_ID)
    } else {
        trace(scene.water, ray, max_t, |v| v != crate::material::AIR_ID && !crate::octree::is_any_type(v))
    };
    let octree_hit = match (solid_hit, water_hit) {
        (Some(a), Some(b)) => Some(if a.t <= b.t { a } else { b }),
        (Some(a), None) => Some(a),
        (None, Some(b)) => Some(b),
        (None, None) => None,
    };

    let bvh_hit = scene
        .bvhs
        .iter()
        .filter_map(|bvh| crate::bvh::closest_hit(bvh, ray, 0.0, max_t))
        .min_by(|a, b| a.t.partial_cmp(&b.t).unwrap());

    match (octree_hit, bvh_hit) {
        (Some(o), Some(b)) => Some(if o.t + EPSILON <= b.t { o } else { b }),
        (Some(o), None) => Some(o),
        (None, Some(b)) => Some(b),
        (None, None) => None,
    }
}

/// One-bounce live-feedback shader (SPEC_FULL.md §4.3 "Preview"): flat
/// shading by `0.25 + 0.75 · max(0, N·sunDir)`, sky on miss.
pub fn shade_preview(scene: &SceneView, ray: &Ray) -> [f32; 3] {
    match intersect_scene(scene, ray, f32::INFINITY, false) {
        Some(hit) => {
            let material = scene.palette.get(hit.material_id).cloned().unwrap_or_default();
            let albedo = albedo_color(&material);
            let n_dot_l = hit.normal.dot(scene.sun.direction()).max(0.0);
            let shade = 0.25 + 0.75 * n_dot_l;
            [albedo.x * shade, albedo.y * shade, albedo.z * shade]
        }
        None => scene.sky.radiance(ray.direction, scene.sun),
    }
}

fn reflect(incoming: Vec3, normal: Vec3) -> Vec3 {
    incoming - normal * (2.0 * incoming.dot(normal))
}

/// Snell refraction of a unit `incoming` direction through `normal` with
/// relative index of refraction `eta = ior_from / ior_to`. `None` on total
/// internal reflection.
fn refract(incoming: Vec3, normal: Vec3, eta: f32) -> Option<Vec3> {
    let cos_i = -incoming.dot(normal);
    let sin2_t = eta * eta * (1.0 - cos_i * cos_i).max(0.0);
    if sin2_t > 1.0 {
        return None;
    }
    let cos_t = (1.0 - sin2_t).sqrt();
    Some(incoming * eta + normal * (eta * cos_i - cos_t))
}

fn fresnel_schlick(cos_theta: f32, ior: f32) -> f32 {
    let r0 = ((1.0 - ior) / (1.0 + ior)).powi(2);
    r0 + (1.0 - r0) * (1.0 - cos_theta).clamp(0.0, 1.0).powi(5)
}

fn orthonormal_basis(n: Vec3) -> (Vec3, Vec3) {
    let helper = if n.x.abs() < 0.99 { Vec3::new(1.0, 0.0, 0.0) } else { Vec3::new(0.0, 1.0, 0.0) };
    let tangent = helper.cross(n).normalize();
    let bitangent = n.cross(tangent);
    (tangent, bitangent)
}

fn cosine_sample_hemisphere(normal: Vec3, rng: &mut impl Rng) -> Vec3 {
    let (tangent, bitangent) = orthonormal_basis(normal);
    let r: f32 = rng.random::<f32>().sqrt();
    let theta = std::f32::consts::TAU * rng.random::<f32>();
    let x = r * theta.cos();
    let y = r * theta.sin();
    let z = (1.0 - r * r).max(0.0).sqrt();
    (tangent * x + bitangent * y + normal * z).normalize()
}

fn uniform_sphere(rng: &mut impl Rng) -> Vec3 {
    let z = 1.0 - 2.0 * rng.random::<f32>();
    let r = (1.0 - z * z).max(0.0).sqrt();
    let phi = std::f32::consts::TAU * rng.random::<f32>();
    Vec3::new(r * phi.cos(), r * phi.sin(), z)
}

/// Concentric disk sample used to jitter the sun's direct-light direction
/// within its angular radius (maps two uniform `[0,1)` numbers to a unit
/// disk, matching the camera's thin-lens sampling convention).
fn sample_unit_disk(rng: &mut impl Rng) -> (f32, f32) {
    let r = rng.random::<f32>().sqrt();
    let theta = std::f32::consts::TAU * rng.random::<f32>();
    (r * theta.cos(), r * theta.sin())
}

/// A shadow-ray visibility test: `true` if nothing blocks the segment from
/// `origin` toward `target_dir` within `max_t`.
fn is_visible(scene: &SceneView, origin: Vec3, target_dir: Vec3, max_t: f32) -> bool {
    let shadow_ray = Ray::new(origin, target_dir);
    intersect_scene(scene, &shadow_ray, max_t, false).is_none()
}

/// Traces one path-traced sample through `primary`, accumulating radiance
/// per SPEC_FULL.md §4.3's seven-step loop. Total: always returns a finite,
/// non-negative-per-channel result, even for degenerate input rays.
pub fn trace_sample(scene: &SceneView, primary: Ray, rng: &mut impl Rng) -> [f64; 3] {
    if primary.is_degenerate() {
        return [0.0; 3];
    }

    let mut ray = primary;
    let mut throughput = Vec3::new(1.0, 1.0, 1.0);
    let mut radiance = Vec3::ZERO;
    let mut in_water = false;
    const MAX_BOUNCES: u32 = 64;
    let cap = MAX_BOUNCES.max(scene.ray_depth * 2);

    for depth in 0..cap {
        let hit = intersect_scene(scene, &ray, f32::INFINITY, in_water);
        let segment_t = hit.map(|h| h.t).unwrap_or(1.0e6);

        if scene.fog.is_enabled() {
            let xi: f32 = rng.random();
            if let Some(s) = scene.fog.sample_free_flight(segment_t, xi) {
                let fog = scene.fog;
                radiance = radiance + throughput * Vec3::new(fog.color[0], fog.color[1], fog.color[2]) * fog.phase();
                let scatter_point = ray.at(s);
                ray = Ray::new(scatter_point, uniform_sphere(rng));
                continue;
            }
        }

        let Some(hit) = hit else {
            let sky = scene.sky.radiance(ray.direction, scene.sun);
            let sky = scene.fog.blend_sky(sky, ray.direction.y);
            radiance = radiance + throughput * Vec3::new(sky[0], sky[1], sky[2]);
            break;
        };

        if hit.material_id == ANY_TYPE {
            // Hidden-interior sentinel; should never be reachable by a live
            // ray, but the tracer must stay total.
            break;
        }

        if in_water {
            let water = scene.palette.get(WATER_ID).cloned().unwrap_or_default();
            let a = water.absorption;
            let attenuation = Vec3::new((-a[0] * hit.t).exp(), (-a[1] * hit.t).exp(), (-a[2] * hit.t).exp());
            throughput = throughput * attenuation;
        }

        let material = scene.palette.get(hit.material_id).cloned().unwrap_or_default();

        if material.is_emitter() && scene.emitters_enabled {
            radiance = radiance + throughput * albedo_color(&material) * material.emittance;
        }

        if material.water {
            in_water = !in_water;
        }

        let point = ray.at(hit.t);
        let offset_point = point + hit.normal * EPSILON;
        let albedo = albedo_color(&material);

        // Direct sun sample.
        {
            let (dx, dy) = sample_unit_disk(rng);
            let sun_dir = scene.sun.sample_direction(dx, dy);
            let n_dot_l = hit.normal.dot(sun_dir).max(0.0);
            if n_dot_l > 0.0 && is_visible(scene, offset_point, sun_dir, f32::INFINITY) {
                let sun = scene.sun;
                let brdf = albedo * (1.0 / std::f32::consts::PI);
                let light = Vec3::new(sun.radiance()[0], sun.radiance()[1], sun.radiance()[2]);
                radiance = radiance + throughput * brdf * light * (n_dot_l * sun.solid_angle());
            }
        }

        // Direct emitter-grid sample, MIS-combined via the balance heuristic.
        if scene.emitters_enabled {
            if let Some((target, pdf)) = scene.emitter_grid.sample(rng.random::<f32>()) {
                let to_light = target - point;
                let dist = to_light.length();
                if dist > EPSILON && pdf > 0.0 {
                    let dir = to_light * (1.0 / dist);
                    let n_dot_l = hit.normal.dot(dir).max(0.0);
                    if n_dot_l > 0.0 && is_visible(scene, offset_point, dir, dist - EPSILON) {
                        let brdf = albedo * (1.0 / std::f32::consts::PI);
                        let mis_weight = pdf / (pdf + 1.0 / std::f32::consts::TAU);
                        radiance = radiance + throughput * brdf * (n_dot_l / (dist * dist)) * mis_weight;
                    }
                }
            }
        }

        // BRDF sampling: Fresnel-blend between specular reflection,
        // refraction (transparent materials), and diffuse Lambert.
        let cos_theta = (-ray.direction).dot(hit.normal).clamp(0.0, 1.0);
        let fresnel = fresnel_schlick(cos_theta, material.ior);
        let specular_prob = (material.specular + fresnel * (1.0 - material.specular)).clamp(0.0, 1.0);

        let xi = rng.random::<f32>();
        let new_dir = if xi < specular_prob {
            reflect(ray.direction, hit.normal)
        } else if !material.opaque {
            let entering = ray.direction.dot(hit.normal) < 0.0;
            let eta = if entering { 1.0 / material.ior } else { material.ior };
            let refract_normal = if entering { hit.normal } else { -hit.normal };
            refract(ray.direction, refract_normal, eta).unwrap_or_else(|| reflect(ray.direction, hit.normal))
        } else {
            throughput = throughput * albedo;
            cosine_sample_hemisphere(hit.normal, rng)
        };

        ray = Ray::new(offset_point, new_dir);

        if depth >= scene.ray_depth {
            if rng.random::<f32>() < 0.5 {
                break;
            }
            throughput = throughput * 2.0;
        }

        if !throughput.is_finite() {
            break;
        }
    }

    if radiance.is_finite() {
        [radiance.x as f64, radiance.y as f64, radiance.z as f64]
    } else {
        [0.0; 3]
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::camera::Projection;
    use crate::fog::Fog;
    use crate::material::Palette;
    use crate::octree::{Octree, build_from_voxels};
    use crate::scene::{Origin, Scene};
    use crate::sky::Sky;
    use crate::sun::Sun;
    use rand::SeedableRng;
    use rand_chacha::ChaCha8Rng;

    fn empty_scene() -> Scene {
        Scene::new(
            4,
            4,
            Origin::default(),
            Palette::new(),
            Octree::empty_packed(4),
            Octree::empty_packed(4),
            Vec::new(),
            crate::camera::Camera::new(Vec3::ZERO, 0.0, 0.0, Projection::Pinhole { fov: 1.0 }),
            Sun::default(),
            Sky::default(),
            Fog::default(),
        )
    }

    #[test]
    fn degenerate_primary_ray_returns_black() {
        let scene = empty_scene();
        let mut rng = ChaCha8Rng::seed_from_u64(1);
        let ray = Ray::new(Vec3::ZERO, Vec3::ZERO);
        assert_eq!(trace_sample(&scene.view(), ray, &mut rng), [0.0; 3]);
    }

    #[test]
    fn miss_against_empty_scene_returns_sky_radiance() {
        let scene = empty_scene();
        let mut rng = ChaCha8Rng::seed_from_u64(2);
        let ray = Ray::new(Vec3::new(0.0, 10.0, 0.0), Vec3::new(0.0, 1.0, 0.0));
        let result = trace_sample(&scene.view(), ray, &mut rng);
        let expected = scene.sky().radiance(ray.direction, scene.sun());
        assert!((result[0] - expected[0] as f64).abs() < 1e-4);
    }

    #[test]
    fn trace_sample_result_is_always_finite_and_nonnegative() {
        let voxels: Vec<(u32, i32, i32, i32)> = vec![(2, 1, 1, 1)];
        let mut palette = Palette::new();
        palette.push(crate::material::Material {
            name: "stone".into(),
            ..crate::material::Material::default()
        });
        let solid = build_from_voxels(2, &voxels);
        let scene = Scene::new(
            2,
            2,
            Origin::default(),
            palette,
            solid,
            Octree::empty_packed(2),
            Vec::new(),
            crate::camera::Camera::new(Vec3::new(-2.0, 1.5, 1.5), 0.0, 0.0, Projection::Pinhole { fov: 1.0 }),
            Sun::default(),
            Sky::default(),
            Fog::default(),
        );
        let mut rng = ChaCha8Rng::seed_from_u64(7);
        let view = scene.view();
        for _ in 0..16 {
            let ray = scene.camera().view_ray(0.0, 0.0, &mut rng);
            let sample = trace_sample(&view, ray, &mut rng);
            for c in sample {
                assert!(c.is_finite());
                assert!(c >= 0.0);
            }
        }
    }

    #[test]
    fn preview_shade_on_miss_matches_sky() {
        let scene = empty_scene();
        let ray = Ray::new(Vec3::ZERO, Vec3::new(0.0, 1.0, 0.0));
        assert_eq!(shade_preview(&scene.view(), &ray), scene.sky().radiance(ray.direction, scene.sun()));
    }

    #[test]
    fn preview_shade_is_brightest_facing_the_sun() {
        let voxels: Vec<(u32, i32, i32, i32)> = vec![(2, 1, 0, 1)];
        let mut palette = Palette::new();
        palette.push(crate::material::Material {
            name: "floor".into(),
            albedo: crate::material::Albedo::Flat([1.0, 1.0, 1.0]),
            ..crate::material::Material::default()
        });
        let solid = build_from_voxels(2, &voxels);
        let mut sun = Sun::default();
        sun.altitude = std::f32::consts::FRAC_PI_2; // straight overhead
        let scene = Scene::new(
            2,
            2,
            Origin::default(),
            palette,
            solid,
            Octree::empty_packed(2),
            Vec::new(),
            crate::camera::Camera::new(Vec3::new(1.5, 5.0, 1.5), 0.0, 0.0, Projection::Pinhole { fov: 1.0 }),
            sun,
            Sky::default(),
            Fog::default(),
        );
        assert!(scene.sun().direction().y > 0.999, "expected a near-zenith sun direction");
        // Straight down onto the upward-facing top of the voxel: N = (0,1,0)
        // and sunDir = (0,1,0), so N·sunDir == 1 and shade should hit 1.0.
        let ray = Ray::new(Vec3::new(1.5, 5.0, 1.5), Vec3::new(0.0, -1.0, 0.0));
        let shaded = shade_preview(&scene.view(), &ray);
        assert!(shaded[0] > 0.9, "a sun-facing surface under a zenith sun should be near-fully lit, got {shaded:?}");
    }

    #[test]
    fn intersect_scene_exit_mode_finds_the_far_boundary_of_a_water_slab() {
        let mut water = Octree::empty_packed(2); // side 4
        for x in 0..4 {
            for y in 0..4 {
                for z in 1..3 {
                    water.set(WATER_ID, x, y, z).unwrap();
                }
            }
        }
        let scene = Scene::new(
            2,
            2,
            Origin::default(),
            Palette::new(),
            Octree::empty_packed(2),
            water,
            Vec::new(),
            crate::camera::Camera::new(Vec3::ZERO, 0.0, 0.0, Projection::Pinhole { fov: 1.0 }),
            Sun::default(),
            Sky::default(),
            Fog::default(),
        );
        let view = scene.view();
        let ray = Ray::new(Vec3::new(1.5, 1.5, 1.5), Vec3::new(0.0, 0.0, 1.0));

        // Enter mode (leaving a medium we aren't in yet doesn't apply): from
        // outside the slab, looking for the first water voxel, stops immediately
        // since the origin is already inside one.
        let enter_hit = intersect_scene(&view, &ray, f32::INFINITY, false).expect("enter-mode hit");
        assert!(enter_hit.t < EPSILON * 2.0, "enter mode should stop at the near-zero entry sample, got t={}", enter_hit.t);

        // Exit mode: travelling through the medium, looking for the first
        // non-water voxel, must walk to the slab's far boundary at z=3.0.
        let exit_hit = intersect_scene(&view, &ray, f32::INFINITY, true).expect("exit-mode hit");
        assert!((exit_hit.t - 1.5).abs() < 1e-3, "exit mode should report the true path length through the medium, got t={}", exit_hit.t);
    }

    #[test]
    fn emitter_grid_sample_is_weighted_toward_heavier_cells() {
        let grid = EmitterGrid::build([(Vec3::new(0.0, 0.0, 0.0), 1.0), (Vec3::new(10.0, 0.0, 0.0), 99.0)]);
        let (pos, _) = grid.sample(0.99).unwrap();
        assert_eq!(pos, Vec3::new(10.0, 0.0, 0.0));
    }

    #[test]
    fn empty_emitter_grid_never_samples() {
        assert!(EmitterGrid::empty().sample(0.5).is_none());
    }

    #[test]
    fn scan_finds_emitter_voxels_and_ignores_non_emitters() {
        let mut palette = Palette::new();
        let glowstone = palette.push(crate::material::Material {
            name: "glowstone".into(),
            emittance: 5.0,
            ..crate::material::Material::default()
        });
        let stone = palette.push(crate::material::Material {
            name: "stone".into(),
            ..crate::material::Material::default()
        });
        let octree = crate::octree::build_from_voxels(3, &[(glowstone, 1, 1, 1), (stone, 5, 5, 5)]);

        let grid = EmitterGrid::scan(&octree, &palette, 4);
        assert!(!grid.is_empty());
        let (pos, _) = grid.sample(0.0).unwrap();
        // The only emitter cell covers voxel (1,1,1); cell_size=4 centers it near (2,2,2).
        assert!(pos.x < 4.0 && pos.y < 4.0 && pos.z < 4.0);
    }
}
