//! Triangle primitive: the BVH's leaf payload.

use crate::ray::{Hit, Ray, Vec3};

use super::aabb::Aabb;

#[derive(Debug, Clone, Copy)]
pub struct Triangle {
    pub v0: Vec3,
    pub v1: Vec3,
    pub v2: Vec3,
    pub uv0: (f32, f32),
    pub uv1: (f32, f32),
    pub uv2: (f32, f32),
    pub material_id: u32,
}

impl Triangle {
    pub fn aabb(&self) -> Aabb {
        Aabb::from_points(&[self.v0, self.v1, self.v2])
    }

    pub fn centroid(&self) -> Vec3 {
        (self.v0 + self.v1 + self.v2) * (1.0 / 3.0)
    }

    /// Möller–Trumbore intersection. Returns the hit distance, barycentric
    /// `(u, v)`, and the interpolated texture UV.
    pub fn intersect(&self, ray: &Ray, t_min: f32, t_max: f32) -> Option<Hit> {
        let edge1 = self.v1 - self.v0;
        let edge2 = self.v2 - self.v0;
        let pvec = ray.direction.cross(edge2);
        let det = edge1.dot(pvec);
        if det.abs() < 1e-9 {
            return None;
        }
        let inv_det = 1.0 / det;
        let tvec = ray.origin - self.v0;
        let u = tvec.dot(pvec) * inv_det;
        if !(0.0..=1.0).contains(&u) {
            return None;
        }
        let qvec = tvec.cross(edge1);
        let v = ray.direction.dot(qvec) * inv_det;
        if v < 0.0 || u + v > 1.0 {
            return None;
        }
        let t = edge2.dot(qvec) * inv_det;
        if t < t_min || t > t_max {
            return None;
        }

        let w = 1.0 - u - v;
        let tex_u = w * self.uv0.0 + u * self.uv1.0 + v * self.uv2.0;
        let tex_v = w * self.uv0.1 + u * self.uv1.1 + v * self.uv2.1;
        let normal = edge1.cross(edge2).normalize();

        Some(
            Hit {
                t,
                normal,
                uv: (tex_u, tex_v),
                material_id: self.material_id,
            }
            .facing(ray),
        )
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn unit_triangle() -> Triangle {
        Triangle {
            v0: Vec3::new(0.0, 0.0, 0.0),
            v1: Vec3::new(1.0, 0.0, 0.0),
            v2: Vec3::new(0.0, 1.0, 0.0),
            uv0: (0.0, 0.0),
            uv1: (1.0, 0.0),
            uv2: (0.0, 1.0),
            material_id: 7,
        }
    }

    #[test]
    fn ray_through_centroid_hits() {
        let tri = unit_triangle();
        let ray = Ray::new(Vec3::new(0.25, 0.25, -1.0), Vec3::new(0.0, 0.0, 1.0));
        let hit = tri.intersect(&ray, 0.0, f32::INFINITY).unwrap();
        assert!((hit.t - 1.0).abs() < 1e-5);
        assert_eq!(hit.material_id, 7);
    }

    #[test]
    fn ray_outside_triangle_misses() {
        let tri = unit_triangle();
        let ray = Ray::new(Vec3::new(5.0, 5.0, -1.0), Vec3::new(0.0, 0.0, 1.0));
        assert!(tri.intersect(&ray, 0.0, f32::INFINITY).is_none());
    }

    #[test]
    fn parallel_ray_misses() {
        let tri = unit_triangle();
        let ray = Ray::new(Vec3::new(0.25, 0.25, 0.0), Vec3::new(1.0, 0.0, 0.0));
        assert!(tri.intersect(&ray, 0.0, f32::INFINITY).is_none());
    }

    #[test]
    fn hit_outside_t_range_is_rejected() {
        let tri = unit_triangle();
        let ray = Ray::new(Vec3::new(0.25, 0.25, -1.0), Vec3::new(0.0, 0.0, 1.0));
        assert!(tri.intersect(&ray, 0.0, 0.5).is_none());
    }
}
