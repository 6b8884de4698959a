// Copyright (C) 2024 GLStudios
// SPDX-License-Identifier: LGPL-2.1-only

mod flat;
mod mesh;
mod optimize;
mod partition;
mod range;
mod reinsert;
mod tree;

use core::f32;

pub use flat::{
    FlatNode,
    GpuInstance,
};
use glam::Vec3A;
pub use mesh::MeshBvh;
pub use optimize::{
    ClosestPair,
    OptimizeConfig,
    OptimizeReport,
};
pub use range::IndexRange;
pub use tree::{
    Node,
    NodeKey,
    NodeKind,
    RayHit,
    TraversalStats,
    Tree,
};

use crate::render::Ray;

/// Anything the hierarchy can be built over.
pub trait Primitive {
    fn bounds(&self) -> BoundingBox;

    fn centroid(&self) -> Vec3A {
        self.bounds().center()
    }

    /// Distance along `ray` to the nearest hit, if any.
    fn intersect(
        &self,
        ray: &Ray,
    ) -> Option<f32>;
}

#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub struct BuildConfig {
    /// Largest number of primitives a leaf may reference.
    pub leaf_limit: usize,
    /// Centroid bins per axis for the SAH sweep.
    pub bins:       usize,
}

impl BuildConfig {
    pub const DEFAULT_BINS: usize = 32;
    pub const DEFAULT_LEAF_LIMIT: usize = 4;
}

impl Default for BuildConfig {
    fn default() -> Self {
        Self {
            leaf_limit: Self::DEFAULT_LEAF_LIMIT,
            bins:       Self::DEFAULT_BINS,
        }
    }
}

#[derive(thiserror::Error, Clone, Copy, Debug, PartialEq, Eq)]
pub enum BuildError {
    #[error("a BVH needs at least one primitive")]
    EmptyMesh,
    #[error("{0} primitives do not fit a 32-bit index buffer")]
    TooManyPrimitives(usize),
    #[error("leaf limit must be at least 1")]
    InvalidLeafLimit,
    #[error("SAH binning needs at least 2 bins, got {0}")]
    InvalidBinCount(usize),
}

#[derive(Clone, Copy, Debug, PartialEq)]
pub struct BoundingBox {
    pub max: Vec3A,
    pub min: Vec3A,
}

impl Default for BoundingBox {
    fn default() -> Self {
        Self::new()
    }
}

impl BoundingBox {
    /// The empty box. Growing it by anything yields that thing's bounds.
    pub const fn new() -> Self {
        Self {
            max: Vec3A::splat(f32::MIN),
            min: Vec3A::splat(f32::MAX),
        }
    }

    pub fn from_points(points: impl IntoIterator<Item = Vec3A>) -> Self {
        let mut bounds = Self::new();
        for point in points {
            bounds.grow_to_include_point(point);
        }
        bounds
    }

    pub fn is_empty(&self) -> bool {
        self.min.cmpgt(self.max).any()
    }

    /// Slab test. Returns the entry distance, clamped to 0 when the origin is inside.
    #[inline]
    pub fn intersects(
        &self,
        ray: &Ray,
    ) -> Option<f32> {
        let t0 = (self.min - ray.origin) * ray.inv_dir;
        let t1 = (self.max - ray.origin) * ray.inv_dir;

        let tmin = t0.min(t1).max_element().max(0.0);
        let tmax = t0.max(t1).min_element();

        if tmin > tmax || tmax.is_nan() {
            None
        } else {
            Some(tmin)
        }
    }

    #[inline]
    pub fn grow_to_include_point(
        &mut self,
        point: Vec3A,
    ) {
        self.max = self.max.max(point);
        self.min = self.min.min(point);
    }

    #[inline]
    pub fn grow_to_include(
        &mut self,
        other: &Self,
    ) {
        self.max = self.max.max(other.max);
        self.min = self.min.min(other.min);
    }

    #[must_use]
    pub fn union(
        mut self,
        other: &Self,
    ) -> Self {
        self.grow_to_include(other);
        self
    }

    pub fn size(&self) -> Vec3A {
        if self.is_empty() {
            Vec3A::ZERO
        } else {
            self.max - self.min
        }
    }

    pub fn center(&self) -> Vec3A {
        (self.min + self.max) * 0.5
    }

    pub fn diagonal_length(&self) -> f32 {
        self.size().length()
    }

    pub fn half_surface_area(&self) -> f32 {
        let size = self.size();
        (size.x * size.y).abs() + (size.y * size.z).abs() + (size.z * size.x).abs()
    }

    pub fn surface_area(&self) -> f32 {
        2.0 * self.half_surface_area()
    }

    pub fn contains(
        &self,
        other: &Self,
    ) -> bool {
        self.min.cmple(other.min).all() && self.max.cmpge(other.max).all()
    }

    /// Gap between two boxes. Positive is the Euclidean distance between separated
    /// boxes; zero or negative is the (negated) shallowest overlap depth.
    pub fn signed_distance(
        &self,
        other: &Self,
    ) -> f32 {
        let gap = (other.min - self.max).max(self.min - other.max);
        if gap.cmpgt(Vec3A::ZERO).any() {
            gap.max(Vec3A::ZERO).length()
        } else {
            gap.max_element()
        }
    }
}
