// Copyright (C) 2024 GLStudios
// SPDX-License-Identifier: LGPL-2.1-only

use tracing::{
    info,
    instrument,
};

use super::{
    flat::flatten,
    partition::PrimitiveInfo,
    BoundingBox,
    BuildConfig,
    BuildError,
    FlatNode,
    GpuInstance,
    OptimizeConfig,
    OptimizeReport,
    Primitive,
    RayHit,
    TraversalStats,
    Tree,
};
use crate::render::Ray;

/// A static mesh and the hierarchy built over it.
///
/// Owns the primitives and the index buffer the tree's leaf ranges point into.
/// Any snapshot taken with [`MeshBvh::flatten`] or [`MeshBvh::gpu_instance`] is
/// stale after [`MeshBvh::optimize`].
#[derive(Clone, Debug)]
pub struct MeshBvh<P> {
    primitives: Vec<P>,
    indices:    Vec<u32>,
    tree:       Tree,
}

impl<P: Primitive> MeshBvh<P> {
    pub fn new(primitives: Vec<P>) -> Result<Self, BuildError> {
        Self::with_config(primitives, BuildConfig::default())
    }

    #[instrument(skip_all, fields(primitives = primitives.len(), leaf_limit = config.leaf_limit))]
    pub fn with_config(
        primitives: Vec<P>,
        config: BuildConfig,
    ) -> Result<Self, BuildError> {
        if config.leaf_limit == 0 {
            return Err(BuildError::InvalidLeafLimit);
        }
        if config.bins < 2 {
            return Err(BuildError::InvalidBinCount(config.bins));
        }
        if primitives.is_empty() {
            return Err(BuildError::EmptyMesh);
        }
        let count = u32::try_from(primitives.len())
            .map_err(|_| BuildError::TooManyPrimitives(primitives.len()))?;

        let begin_time = std::time::Instant::now();
        let mut indices: Vec<u32> = (0..count).collect();
        let tree = Tree::build(&PrimitiveInfo::gather(&primitives), &mut indices, config);

        info!(
            nodes = tree.len(),
            leaves = tree.leaves().count(),
            height = tree.height(),
            sah_cost = tree.sah_cost(Tree::DEFAULT_TRAVERSAL_COST, Tree::DEFAULT_INTERSECTION_COST),
            elapsed_ms = begin_time.elapsed().as_secs_f64() * 1000.0,
            "built BVH"
        );

        Ok(Self {
            primitives,
            indices,
            tree,
        })
    }

    pub fn primitives(&self) -> &[P] {
        &self.primitives
    }

    pub fn indices(&self) -> &[u32] {
        &self.indices
    }

    pub const fn tree(&self) -> &Tree {
        &self.tree
    }

    #[cfg(test)]
    pub(super) fn tree_mut(&mut self) -> &mut Tree {
        &mut self.tree
    }

    pub fn bounds(&self) -> BoundingBox {
        self.tree.bounds()
    }

    pub fn sah_cost(&self) -> f32 {
        self.tree
            .sah_cost(Tree::DEFAULT_TRAVERSAL_COST, Tree::DEFAULT_INTERSECTION_COST)
    }

    pub fn intersect(
        &self,
        ray: &Ray,
    ) -> Option<RayHit> {
        self.intersect_within(ray, f32::INFINITY)
    }

    /// Nearest hit closer than `max_distance`.
    pub fn intersect_within(
        &self,
        ray: &Ray,
        max_distance: f32,
    ) -> Option<RayHit> {
        self.intersect_counted(ray, max_distance, &mut TraversalStats::default())
    }

    /// Like [`MeshBvh::intersect_within`], also tallying box and primitive tests.
    pub fn intersect_counted(
        &self,
        ray: &Ray,
        max_distance: f32,
        stats: &mut TraversalStats,
    ) -> Option<RayHit> {
        stats.box_tests += 1;
        let entry = self.tree.bounds().intersects(ray)?;
        if entry >= max_distance {
            return None;
        }

        self.tree
            .intersect(&self.primitives, &self.indices, ray, max_distance, stats)
    }

    pub fn flatten(&self) -> Vec<FlatNode> {
        flatten(&self.tree)
    }

    pub fn gpu_instance(&self) -> GpuInstance<'_, P> {
        GpuInstance {
            triangle_indices: &self.indices,
            triangles:        &self.primitives,
            nodes:            self.flatten(),
        }
    }

    pub fn optimize(&mut self) -> OptimizeReport {
        self.optimize_with(&OptimizeConfig::default())
    }

    pub fn optimize_with(
        &mut self,
        config: &OptimizeConfig,
    ) -> OptimizeReport {
        self.tree.optimize(config)
    }
}

#[cfg(test)]
mod tests {
    use glam::Vec3A;

    use super::MeshBvh;
    use crate::{
        bvh::{
            tree::tests::grid,
            BuildConfig,
            BuildError,
            TraversalStats,
        },
        render::{
            Ray,
            Triangle,
        },
    };

    #[test]
    fn rejects_empty_mesh() {
        let err = MeshBvh::<Triangle>::new(Vec::new()).expect_err("empty mesh must fail");
        assert_eq!(err, BuildError::EmptyMesh);
    }

    #[test]
    fn rejects_bad_config() {
        let err = MeshBvh::with_config(grid(4), BuildConfig {
            leaf_limit: 0,
            ..BuildConfig::default()
        })
        .expect_err("zero leaf limit must fail");
        assert_eq!(err, BuildError::InvalidLeafLimit);

        let err = MeshBvh::with_config(grid(4), BuildConfig {
            bins: 1,
            ..BuildConfig::default()
        })
        .expect_err("one bin must fail");
        assert_eq!(err, BuildError::InvalidBinCount(1));
    }

    #[test]
    fn indices_are_a_permutation() {
        let bvh = MeshBvh::new(grid(37)).expect("non-empty mesh");
        let mut indices = bvh.indices().to_vec();
        indices.sort_unstable();
        assert_eq!(indices, (0..37).collect::<Vec<_>>());
    }

    #[test]
    fn pruning_beats_a_single_leaf() {
        let split = MeshBvh::new(grid(8)).expect("non-empty mesh");
        let flat = MeshBvh::with_config(grid(8), BuildConfig {
            leaf_limit: 8,
            ..BuildConfig::default()
        })
        .expect("non-empty mesh");
        assert_eq!(flat.tree().height(), 1);

        // Only triangle 3 lies on this line.
        let ray = Ray::new(Vec3A::new(3.8, 0.2, -5.0), Vec3A::Z);

        let mut split_stats = TraversalStats::default();
        let hit = split
            .intersect_counted(&ray, f32::INFINITY, &mut split_stats)
            .expect("triangle 3 is hit");
        assert!((hit.distance - 5.6).abs() < 1e-5);
        assert_eq!(hit.primitive, 3);

        let mut flat_stats = TraversalStats::default();
        let flat_hit = flat
            .intersect_counted(&ray, f32::INFINITY, &mut flat_stats)
            .expect("triangle 3 is hit");
        assert_eq!(flat_hit.primitive, 3);

        assert!(split_stats.tests() < flat_stats.tests());
    }

    #[test]
    fn max_distance_cuts_off_hits() {
        let bvh = MeshBvh::new(grid(8)).expect("non-empty mesh");
        let ray = Ray::new(Vec3A::new(3.8, 0.2, -5.0), Vec3A::Z);
        assert!(bvh.intersect_within(&ray, 5.0).is_none());
        assert!(bvh.intersect_within(&ray, 6.0).is_some());

        let miss = Ray::new(Vec3A::new(3.8, 5.0, -5.0), Vec3A::Z);
        assert!(bvh.intersect(&miss).is_none());
    }
}
