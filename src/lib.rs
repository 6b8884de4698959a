// Copyright (C) 2024 GLStudios
// SPDX-License-Identifier: LGPL-2.1-only

//! Bounding volume hierarchy over static triangle meshes, built with a binned
//! surface area heuristic and refined by remove-and-reinsert optimization.
//! Used for ambient-occlusion ray queries; the tree can be exported as a flat
//! node array for GPU traversal.

pub mod bvh;
pub mod render;
pub mod types;

pub use bvh::{
    BoundingBox,
    BuildConfig,
    BuildError,
    FlatNode,
    GpuInstance,
    MeshBvh,
    OptimizeConfig,
    OptimizeReport,
    Primitive,
};
pub use render::{
    Ray,
    Triangle,
};
