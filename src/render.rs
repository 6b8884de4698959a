// Copyright (C) 2024 GLStudios
// SPDX-License-Identifier: LGPL-2.1-only

use core::f32;

use glam::Vec3A;
use rand::Rng;

use crate::bvh::{
    BoundingBox,
    MeshBvh,
    Primitive,
};

// Minimum hit distance, keeps secondary rays off the surface they leave from.
pub const ACNE_MIN: f32 = 1e-4;

#[derive(Clone, Copy, Debug)]
pub struct Ray {
    pub origin:    Vec3A,
    pub direction: Vec3A,
    pub inv_dir:   Vec3A,
}

impl Ray {
    pub fn new(
        origin: Vec3A,
        direction: Vec3A,
    ) -> Self {
        Self {
            origin,
            direction,
            inv_dir: direction.recip(),
        }
    }

    #[inline]
    pub fn set_direction(
        &mut self,
        new: Vec3A,
    ) {
        self.direction = new;
        self.inv_dir = self.direction.recip();
    }

    #[inline]
    pub fn at(
        &self,
        along: f32,
    ) -> Vec3A {
        self.origin + self.direction * along
    }
}

#[derive(Clone, Copy, Debug, PartialEq)]
pub struct Triangle {
    pub a: Vec3A,
    pub b: Vec3A,
    pub c: Vec3A,
}

impl Triangle {
    pub const fn new(
        a: Vec3A,
        b: Vec3A,
        c: Vec3A,
    ) -> Self {
        Self { a, b, c }
    }

    pub fn normal(&self) -> Vec3A {
        (self.b - self.a).cross(self.c - self.a).normalize_or_zero()
    }
}

impl Primitive for Triangle {
    fn bounds(&self) -> BoundingBox {
        BoundingBox::from_points([self.a, self.b, self.c])
    }

    // Möller–Trumbore
    fn intersect(
        &self,
        ray: &Ray,
    ) -> Option<f32> {
        let edge_ab = self.b - self.a;
        let edge_ac = self.c - self.a;

        let p = ray.direction.cross(edge_ac);
        let det = edge_ab.dot(p);
        if det.abs() < f32::EPSILON {
            return None;
        }
        let inv_det = det.recip();

        let offset = ray.origin - self.a;
        let u = offset.dot(p) * inv_det;
        if !(0.0..=1.0).contains(&u) {
            return None;
        }

        let q = offset.cross(edge_ab);
        let v = ray.direction.dot(q) * inv_det;
        if v < 0.0 || u + v > 1.0 {
            return None;
        }

        let along = edge_ac.dot(q) * inv_det;
        (along > ACNE_MIN).then_some(along)
    }
}

/// Pinhole camera framing a bounding box from a fixed direction.
#[derive(Clone, Copy, Debug)]
pub struct Camera {
    origin:          Vec3A,
    viewport_origin: Vec3A,
    delta_u:         Vec3A,
    delta_v:         Vec3A,
}

impl Camera {
    #[allow(clippy::cast_precision_loss)]
    pub fn framing(
        bounds: &BoundingBox,
        view_dir: Vec3A,
        fov_degrees: f32,
        width: u32,
        height: u32,
    ) -> Self {
        let look_at = bounds.center();
        let radius = (bounds.diagonal_length() * 0.5).max(f32::EPSILON);
        let distance = radius / (fov_degrees.to_radians() * 0.5).sin();

        let focal_w = -view_dir.normalize_or_zero();
        let origin = look_at + focal_w * distance;
        let up = if focal_w.y.abs() > 0.99 { Vec3A::Z } else { Vec3A::Y };
        let focal_u = up.cross(focal_w).normalize_or_zero();
        let focal_v = focal_w.cross(focal_u);

        let viewport_height = 2.0 * (fov_degrees.to_radians() / 2.0).tan() * distance;
        let viewport_width = viewport_height * (width as f32 / height as f32);

        let viewport_u = focal_u * viewport_width;
        let viewport_v = -focal_v * viewport_height;
        let delta_u = viewport_u / width as f32;
        let delta_v = viewport_v / height as f32;

        let viewport_origin = (look_at - viewport_u / 2.0 - viewport_v / 2.0)
            + 0.5 * (delta_u + delta_v);

        Self {
            origin,
            viewport_origin,
            delta_u,
            delta_v,
        }
    }

    #[allow(clippy::cast_precision_loss)]
    pub fn ray(
        &self,
        x: u32,
        y: u32,
    ) -> Ray {
        let pixel_center = self.viewport_origin + x as f32 * self.delta_u + y as f32 * self.delta_v;
        Ray::new(self.origin, pixel_center - self.origin)
    }
}

/// Cosine-weighted direction on the hemisphere around `normal`.
pub fn random_hemisphere(
    rng: &mut impl Rng,
    normal: Vec3A,
) -> Vec3A {
    loop {
        // Rejection sampling
        let x = rng.gen_range(-1.0..1.0);
        let y = rng.gen_range(-1.0..1.0);
        let z = rng.gen_range(-1.0..1.0);

        let vector = Vec3A::new(x, y, z);
        let length_squared = vector.length_squared();
        if length_squared > 1e-6 && length_squared <= 1.0 {
            let direction = (normal + vector.normalize()).normalize_or_zero();
            if direction != Vec3A::ZERO {
                return direction;
            }
        }
    }
}

/// Fraction of hemisphere samples around the first hit that escape within `radius`.
/// `None` when the primary ray misses the mesh.
#[allow(clippy::cast_precision_loss)]
pub fn ambient_occlusion(
    bvh: &MeshBvh<Triangle>,
    ray: &Ray,
    samples: u32,
    radius: f32,
    rng: &mut impl Rng,
) -> Option<f32> {
    let hit = bvh.intersect(ray)?;
    let point = ray.at(hit.distance);

    let mut normal = bvh.primitives()[hit.primitive].normal();
    if normal.dot(ray.direction) > 0.0 {
        normal = -normal;
    }
    let origin = point + normal * ACNE_MIN;

    let unoccluded = (0..samples)
        .filter(|_| {
            let probe = Ray::new(origin, random_hemisphere(rng, normal));
            bvh.intersect_within(&probe, radius).is_none()
        })
        .count();

    Some(unoccluded as f32 / samples.max(1) as f32)
}

#[cfg(test)]
mod tests {
    use glam::Vec3A;
    use rand::{
        rngs::StdRng,
        SeedableRng,
    };

    use super::{
        ambient_occlusion,
        random_hemisphere,
        Ray,
        Triangle,
    };
    use crate::bvh::{
        MeshBvh,
        Primitive,
    };

    fn floor() -> Vec<Triangle> {
        vec![
            Triangle::new(
                Vec3A::new(-10.0, 0.0, -10.0),
                Vec3A::new(10.0, 0.0, -10.0),
                Vec3A::new(-10.0, 0.0, 10.0),
            ),
            Triangle::new(
                Vec3A::new(10.0, 0.0, -10.0),
                Vec3A::new(10.0, 0.0, 10.0),
                Vec3A::new(-10.0, 0.0, 10.0),
            ),
        ]
    }

    #[test]
    fn triangle_hit_distance() {
        let tri = Triangle::new(
            Vec3A::new(3.0, 0.0, 0.0),
            Vec3A::new(4.0, 1.0, 0.0),
            Vec3A::new(4.0, 0.0, 1.0),
        );
        let ray = Ray::new(Vec3A::new(3.8, 0.2, -5.0), Vec3A::Z);
        let along = tri.intersect(&ray).expect("ray should hit");
        assert!((along - 5.6).abs() < 1e-5);

        let miss = Ray::new(Vec3A::new(3.1, 0.9, -5.0), Vec3A::Z);
        assert_eq!(tri.intersect(&miss), None);
    }

    #[test]
    fn hemisphere_samples_face_normal() {
        let mut rng = StdRng::seed_from_u64(7);
        for _ in 0..256 {
            let dir = random_hemisphere(&mut rng, Vec3A::Y);
            assert!(dir.y >= 0.0);
            assert!((dir.length() - 1.0).abs() < 1e-4);
        }
    }

    #[test]
    fn open_floor_is_unoccluded() {
        let bvh = MeshBvh::new(floor()).expect("non-empty mesh");
        let mut rng = StdRng::seed_from_u64(11);
        let ray = Ray::new(Vec3A::new(0.3, 5.0, 0.2), Vec3A::NEG_Y);

        let visibility = ambient_occlusion(&bvh, &ray, 32, 1.0, &mut rng).expect("floor is hit");
        assert!((visibility - 1.0).abs() < f32::EPSILON);

        let away = Ray::new(Vec3A::new(0.3, 5.0, 0.2), Vec3A::Y);
        assert!(ambient_occlusion(&bvh, &away, 32, 1.0, &mut rng).is_none());
    }

    #[test]
    fn ceiling_occludes_floor() {
        let mut mesh = floor();
        for tri in floor() {
            let lift = Vec3A::new(0.0, 0.5, 0.0);
            mesh.push(Triangle::new(tri.a + lift, tri.b + lift, tri.c + lift));
        }
        let bvh = MeshBvh::new(mesh).expect("non-empty mesh");
        let mut rng = StdRng::seed_from_u64(13);

        // Looking down from between the planes, nearly every probe hits the ceiling.
        let ray = Ray::new(Vec3A::new(0.3, 0.25, 0.2), Vec3A::NEG_Y);
        let visibility = ambient_occlusion(&bvh, &ray, 32, 100.0, &mut rng).expect("floor is hit");
        assert!(visibility < 0.1);
    }
}
