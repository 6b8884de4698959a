// Copyright (C) 2024 GLStudios
// SPDX-License-Identifier: LGPL-2.1-only

use std::collections::VecDeque;

use bytemuck::{
    Pod,
    Zeroable,
};
use glam::Vec3A;

use super::{
    BoundingBox,
    IndexRange,
    NodeKind,
    Primitive,
    RayHit,
    TraversalStats,
    Tree,
};
use crate::render::Ray;

/// One node of the exported hierarchy, laid out for upload as a storage buffer.
///
/// Leaf-ness is carried by [`FlatNode::LEAF`] in `flags`; a child index of 0 is
/// never a sentinel.
#[repr(C)]
#[derive(Clone, Copy, Debug, Default, PartialEq, Pod, Zeroable)]
pub struct FlatNode {
    pub min:        [f32; 3],
    pub left:       u32,
    pub max:        [f32; 3],
    pub right:      u32,
    pub leaf_start: u32,
    pub leaf_end:   u32,
    pub flags:      u32,
    pub pad:        u32,
}

impl FlatNode {
    pub const LEAF: u32 = 1;

    #[allow(clippy::cast_possible_truncation)]
    fn leaf(
        bounds: &BoundingBox,
        range: IndexRange,
    ) -> Self {
        Self {
            min: bounds.min.to_array(),
            max: bounds.max.to_array(),
            leaf_start: range.start as u32,
            leaf_end: range.end as u32,
            flags: Self::LEAF,
            ..Self::default()
        }
    }

    fn internal(
        bounds: &BoundingBox,
        left: u32,
    ) -> Self {
        Self {
            min: bounds.min.to_array(),
            max: bounds.max.to_array(),
            left,
            right: left + 1,
            ..Self::default()
        }
    }

    pub const fn is_leaf(&self) -> bool {
        self.flags & Self::LEAF != 0
    }

    pub fn bounds(&self) -> BoundingBox {
        BoundingBox {
            max: Vec3A::from_array(self.max),
            min: Vec3A::from_array(self.min),
        }
    }

    pub const fn leaf_range(&self) -> Option<IndexRange> {
        if self.is_leaf() {
            Some(IndexRange::new(
                self.leaf_start as usize,
                self.leaf_end as usize,
            ))
        } else {
            None
        }
    }

    pub const fn children(&self) -> Option<(usize, usize)> {
        if self.is_leaf() {
            None
        } else {
            Some((self.left as usize, self.right as usize))
        }
    }
}

/// Level-order export: the root is record 0 and each internal node's children
/// take the next two free records, left then right.
#[allow(clippy::cast_possible_truncation)]
pub fn flatten(tree: &Tree) -> Vec<FlatNode> {
    let mut flat = Vec::with_capacity(tree.len());
    let mut queue = VecDeque::from([tree.root()]);
    let mut next_index = 1u32;

    while let Some(key) = queue.pop_front() {
        let node = tree.node(key);
        flat.push(match node.kind {
            NodeKind::Leaf(range) => FlatNode::leaf(&node.bounds, range),
            NodeKind::Internal { left, right } => {
                queue.push_back(left);
                queue.push_back(right);
                next_index += 2;
                FlatNode::internal(&node.bounds, next_index - 2)
            },
        });
    }

    flat
}

/// Everything an external traverser needs: the flattened nodes plus the index
/// and primitive buffers their leaf ranges point into.
#[derive(Clone, Debug)]
pub struct GpuInstance<'a, P> {
    pub triangle_indices: &'a [u32],
    pub triangles:        &'a [P],
    pub nodes:            Vec<FlatNode>,
}

impl<P: Primitive> GpuInstance<'_, P> {
    pub fn node_bytes(&self) -> &[u8] {
        bytemuck::cast_slice(&self.nodes)
    }

    pub fn index_bytes(&self) -> &[u8] {
        bytemuck::cast_slice(self.triangle_indices)
    }

    /// Stack-based traversal of the flat records, mirroring what a shader does.
    pub fn intersect(
        &self,
        ray: &Ray,
        stats: &mut TraversalStats,
    ) -> Option<RayHit> {
        let mut closest: Option<RayHit> = None;
        let mut best = f32::INFINITY;

        // Loop below never tests the root's own box.
        stats.box_tests += 1;
        let root_entry = self.nodes.first()?.bounds().intersects(ray)?;

        let mut search_space = vec![(0usize, root_entry)];
        while let Some((next_search, entry)) = search_space.pop() {
            // `best` may have shrunk since this node was pushed.
            if entry >= best {
                continue;
            }
            let node = &self.nodes[next_search];

            if let Some(range) = node.leaf_range() {
                for slot in range {
                    stats.primitive_tests += 1;
                    let primitive = self.triangle_indices[slot] as usize;
                    let Some(along) = self.triangles[primitive].intersect(ray) else {
                        continue;
                    };
                    if along < best {
                        best = along;
                        closest = Some(RayHit {
                            distance: along,
                            slot,
                            primitive,
                        });
                    }
                }
                continue;
            }

            let Some((left, right)) = node.children() else {
                continue;
            };

            stats.box_tests += 2;
            let mut near = (left, self.nodes[left].bounds().intersects(ray));
            let mut far = (right, self.nodes[right].bounds().intersects(ray));
            if far.1.unwrap_or(f32::INFINITY) < near.1.unwrap_or(f32::INFINITY) {
                core::mem::swap(&mut near, &mut far);
            }

            // Far child goes on the stack first so the near one pops next.
            for (index, entry) in [far, near] {
                if let Some(entry) = entry.filter(|&entry| entry < best) {
                    search_space.push((index, entry));
                }
            }
        }

        closest
    }
}

#[cfg(test)]
mod tests {
    use std::collections::HashMap;

    use glam::Vec3A;
    use rand::{
        rngs::StdRng,
        Rng,
        SeedableRng,
    };

    use super::{
        flatten,
        FlatNode,
    };
    use crate::{
        bvh::{
            tree::tests::{
                grid,
                random_soup,
            },
            MeshBvh,
            NodeKind,
            TraversalStats,
        },
        render::Ray,
    };

    #[test]
    fn level_order_numbering() {
        let bvh = MeshBvh::new(random_soup(3, 400)).expect("non-empty mesh");
        let tree = bvh.tree();
        let flat = flatten(tree);
        assert_eq!(flat.len(), tree.len());

        let order = tree.breadth_first(tree.root());
        let position: HashMap<_, _> = order.iter().enumerate().map(|(i, &key)| (key, i)).collect();

        for (index, (record, key)) in flat.iter().zip(&order).enumerate() {
            let node = tree.node(*key);
            assert_eq!(record.bounds(), node.bounds);
            match node.kind {
                NodeKind::Leaf(range) => {
                    assert!(record.is_leaf());
                    assert_eq!(record.leaf_range(), Some(range));
                },
                NodeKind::Internal { left, right } => {
                    let (l, r) = record.children().expect("internal record");
                    assert_eq!((l, r), (position[&left], position[&right]));
                    assert_eq!(r, l + 1);
                    assert!(l != index && r != index);
                    assert!(r < flat.len());
                },
            }
        }
    }

    #[test]
    fn root_children_start_at_one() {
        let bvh = MeshBvh::new(grid(8)).expect("non-empty mesh");
        let flat = bvh.flatten();
        assert_eq!(flat.len(), 3);
        assert_eq!(flat[0].children(), Some((1, 2)));
        assert!(flat[1].is_leaf() && flat[2].is_leaf());
        assert_eq!(flat[1].leaf_range().map(|r| r.count()), Some(4));
    }

    #[test]
    fn record_layout() {
        assert_eq!(size_of::<FlatNode>(), 48);
        assert_eq!(core::mem::offset_of!(FlatNode, left), 12);
        assert_eq!(core::mem::offset_of!(FlatNode, right), 28);
        assert_eq!(core::mem::offset_of!(FlatNode, pad), 44);

        let flat = MeshBvh::new(grid(8)).expect("non-empty mesh").flatten();
        assert!(flat.iter().all(|record| record.pad == 0));
        assert_eq!(flat[0].flags & FlatNode::LEAF, 0);
    }

    #[test]
    fn single_leaf_export() {
        let bvh = MeshBvh::new(grid(2)).expect("non-empty mesh");
        let instance = bvh.gpu_instance();
        assert_eq!(instance.nodes.len(), 1);
        assert!(instance.nodes[0].is_leaf());
        assert_eq!(instance.nodes[0].children(), None);
        assert_eq!(instance.node_bytes().len(), size_of::<FlatNode>());
        assert_eq!(instance.index_bytes().len(), 2 * size_of::<u32>());
    }

    #[test]
    fn flat_traversal_agrees_with_tree() {
        let mut bvh = MeshBvh::new(random_soup(5, 600)).expect("non-empty mesh");
        bvh.optimize();
        let instance = bvh.gpu_instance();
        let mut rng = StdRng::seed_from_u64(6);

        for _ in 0..300 {
            let origin = Vec3A::new(
                rng.gen_range(-30.0..30.0),
                rng.gen_range(-30.0..30.0),
                -40.0,
            );
            let ray = Ray::new(origin, (Vec3A::ZERO - origin).normalize());

            let expected = bvh.intersect(&ray).map(|hit| hit.distance);
            let found = instance
                .intersect(&ray, &mut TraversalStats::default())
                .map(|hit| hit.distance);
            assert_eq!(found, expected);
        }
    }

    #[test]
    fn flat_traversal_prunes_like_tree() {
        let bvh = MeshBvh::new(random_soup(12, 800)).expect("non-empty mesh");
        let instance = bvh.gpu_instance();
        let mut rng = StdRng::seed_from_u64(13);

        for _ in 0..300 {
            let origin = Vec3A::new(
                rng.gen_range(-30.0..30.0),
                rng.gen_range(-30.0..30.0),
                -40.0,
            );
            let ray = Ray::new(origin, (Vec3A::ZERO - origin).normalize());

            let mut tree_stats = TraversalStats::default();
            let mut flat_stats = TraversalStats::default();
            let expected = bvh.intersect_counted(&ray, f32::INFINITY, &mut tree_stats);
            let found = instance.intersect(&ray, &mut flat_stats);

            assert_eq!(found, expected);
            // Same visiting order and the same pruning, so the same work.
            assert_eq!(flat_stats, tree_stats);
        }
    }
}
