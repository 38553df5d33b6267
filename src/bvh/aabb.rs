//! Axis-aligned bounding boxes: the volumes [`super::build`] arranges into a
//! tree and [`super::query`] walks.

use crate::ray::{Ray, Vec3};

#[derive(Debug, Clone, Copy, PartialEq)]
pub struct Aabb {
    pub min: Vec3,
    pub max: Vec3,
}

impl Aabb {
    pub const EMPTY: Aabb = Aabb {
        min: Vec3::new(f32::INFINITY, f32::INFINITY, f32::INFINITY),
        max: Vec3::new(f32::NEG_INFINITY, f32::NEG_INFINITY, f32::NEG_INFINITY),
    };

    pub fn from_points(points: &[Vec3]) -> Self {
        let mut b = Aabb::EMPTY;
        for &p in points {
            b = b.grow(p);
        }
        b
    }

    pub fn grow(self, p: Vec3) -> Aabb {
        Aabb {
            min: Vec3::new(self.min.x.min(p.x), self.min.y.min(p.y), self.min.z.min(p.z)),
            max: Vec3::new(self.max.x.max(p.x), self.max.y.max(p.y), self.max.z.max(p.z)),
        }
    }

    pub fn union(self, other: Aabb) -> Aabb {
        self.grow(other.min).grow(other.max)
    }

    pub fn centroid(self) -> Vec3 {
        (self.min + self.max) * 0.5
    }

    pub fn extent(self) -> Vec3 {
        self.max - self.min
    }

    /// The axis (0=x, 1=y, 2=z) along which the box is longest.
    pub fn longest_axis(self) -> usize {
        let e = self.extent();
        if e.x >= e.y && e.x >= e.z {
            0
        } else if e.y >= e.z {
            1
        } else {
            2
        }
    }

    pub fn surface_area(self) -> f32 {
        let e = self.extent();
        if e.x < 0.0 || e.y < 0.0 || e.z < 0.0 {
            return 0.0;
        }
        2.0 * (e.x * e.y + e.y * e.z + e.z * e.x)
    }

    /// Slab test; returns the `[t_near, t_far]` interval of overlap with
    /// `ray`, or `None` if the ray misses the box or exits before `t_min`.
    pub fn intersect(&self, ray: &Ray, t_min: f32, t_max: f32) -> Option<(f32, f32)> {
        let mut lo = t_min;
        let mut hi = t_max;
        for axis in 0..3 {
            let origin = ray.origin.component(axis);
            let dir = ray.direction.component(axis);
            let min = self.min.component(axis);
            let max = self.max.component(axis);
            if dir.abs() < f32::EPSILON {
                if origin < min || origin > max {
                    return None;
                }
                continue;
            }
            let inv = 1.0 / dir;
            let mut t0 = (min - origin) * inv;
            let mut t1 = (max - origin) * inv;
            if t0 > t1 {
                std::mem::swap(&mut t0, &mut t1);
            }
            lo = lo.max(t0);
            hi = hi.min(t1);
            if lo > hi {
                return None;
            }
        }
        Some((lo, hi))
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn union_contains_both_boxes() {
        let a = Aabb::from_points(&[Vec3::new(0.0, 0.0, 0.0), Vec3::new(1.0, 1.0, 1.0)]);
        let b = Aabb::from_points(&[Vec3::new(2.0, -1.0, 0.5), Vec3::new(3.0, 0.0, 0.5)]);
        let u = a.union(b);
        assert_eq!(u.min, Vec3::new(0.0, -1.0, 0.0));
        assert_eq!(u.max, Vec3::new(3.0, 1.0, 1.0));
    }

    #[test]
    fn longest_axis_picks_biggest_extent() {
        let b = Aabb::from_points(&[Vec3::new(0.0, 0.0, 0.0), Vec3::new(1.0, 10.0, 2.0)]);
        assert_eq!(b.longest_axis(), 1);
    }

    #[test]
    fn ray_through_box_center_intersects() {
        let b = Aabb::from_points(&[Vec3::new(-1.0, -1.0, -1.0), Vec3::new(1.0, 1.0, 1.0)]);
        let ray = Ray::new(Vec3::new(0.0, 0.0, -5.0), Vec3::new(0.0, 0.0, 1.0));
        let (t_near, t_far) = b.intersect(&ray, 0.0, f32::INFINITY).unwrap();
        assert!((t_near - 4.0).abs() < 1e-5);
        assert!((t_far - 6.0).abs() < 1e-5);
    }

    #[test]
    fn ray_missing_box_returns_none() {
        let b = Aabb::from_points(&[Vec3::new(-1.0, -1.0, -1.0), Vec3::new(1.0, 1.0, 1.0)]);
        let ray = Ray::new(Vec3::new(10.0, 10.0, -5.0), Vec3::new(0.0, 0.0, 1.0));
        assert!(b.intersect(&ray, 0.0, f32::INFINITY).is_none());
    }
}
