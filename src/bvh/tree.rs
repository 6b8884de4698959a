// Copyright (C) 2024 GLStudios
// SPDX-License-Identifier: LGPL-2.1-only

use std::collections::{
    HashSet,
    VecDeque,
};

use slotmap::SlotMap;

use super::{
    partition::{
        range_bounds,
        split_sah,
        PrimitiveInfo,
    },
    BoundingBox,
    BuildConfig,
    IndexRange,
    Primitive,
};
use crate::render::Ray;

slotmap::new_key_type! {
    pub struct NodeKey;
}

#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum NodeKind {
    Leaf(IndexRange),
    Internal { left: NodeKey, right: NodeKey },
}

#[derive(Clone, Copy, Debug, PartialEq)]
pub struct Node {
    pub bounds: BoundingBox,
    /// Primitives in this subtree.
    pub count:  usize,
    pub kind:   NodeKind,
}

impl Node {
    pub const fn is_leaf(&self) -> bool {
        matches!(self.kind, NodeKind::Leaf(_))
    }

    pub const fn children(&self) -> Option<(NodeKey, NodeKey)> {
        match self.kind {
            NodeKind::Internal { left, right } => Some((left, right)),
            NodeKind::Leaf(_) => None,
        }
    }
}

/// Nearest hit found by a traversal.
#[derive(Clone, Copy, Debug, PartialEq)]
pub struct RayHit {
    pub distance:  f32,
    /// Slot in the primitive-index buffer.
    pub slot:      usize,
    pub primitive: usize,
}

/// Work done by a traversal, for cost diagnostics.
#[derive(Clone, Copy, Debug, Default, PartialEq, Eq)]
pub struct TraversalStats {
    pub box_tests:       usize,
    pub primitive_tests: usize,
}

impl TraversalStats {
    pub const fn tests(&self) -> usize {
        self.box_tests + self.primitive_tests
    }
}

/// Binary hierarchy over ranges of a shared primitive-index buffer.
///
/// Nodes live in an arena and refer to their children by key, so subtrees can
/// be detached and spliced back in without aliasing.
#[derive(Clone, Debug)]
pub struct Tree {
    pub(super) nodes: SlotMap<NodeKey, Node>,
    root:             NodeKey,
    leaf_limit:       usize,
}

impl Tree {
    pub const DEFAULT_TRAVERSAL_COST: f32 = 1.0;
    pub const DEFAULT_INTERSECTION_COST: f32 = 1.0;

    /// Top-down SAH build over every slot of `indices`, which is reordered in place.
    ///
    /// `indices` must not be empty.
    pub(super) fn build(
        info: &[PrimitiveInfo],
        indices: &mut [u32],
        config: BuildConfig,
    ) -> Self {
        assert!(!indices.is_empty(), "cannot build a tree over zero primitives");

        let mut nodes = SlotMap::with_capacity_and_key(2 * indices.len() / config.leaf_limit + 1);
        let root = Self::build_node(
            &mut nodes,
            info,
            indices,
            IndexRange::new(0, indices.len()),
            config,
        );

        Self {
            nodes,
            root,
            leaf_limit: config.leaf_limit,
        }
    }

    fn build_node(
        nodes: &mut SlotMap<NodeKey, Node>,
        info: &[PrimitiveInfo],
        indices: &mut [u32],
        range: IndexRange,
        config: BuildConfig,
    ) -> NodeKey {
        if range.count() <= config.leaf_limit {
            return nodes.insert(Node {
                bounds: range_bounds(info, indices, range),
                count:  range.count(),
                kind:   NodeKind::Leaf(range),
            });
        }

        let (left_range, right_range) = split_sah(info, indices, range, config.bins);
        let left = Self::build_node(nodes, info, indices, left_range, config);
        let right = Self::build_node(nodes, info, indices, right_range, config);

        let bounds = nodes[left].bounds.union(&nodes[right].bounds);
        nodes.insert(Node {
            bounds,
            count: range.count(),
            kind:  NodeKind::Internal { left, right },
        })
    }

    pub const fn root(&self) -> NodeKey {
        self.root
    }

    pub const fn leaf_limit(&self) -> usize {
        self.leaf_limit
    }

    /// # Panics
    /// If `key` does not belong to this tree.
    pub fn node(
        &self,
        key: NodeKey,
    ) -> &Node {
        &self.nodes[key]
    }

    pub fn get(
        &self,
        key: NodeKey,
    ) -> Option<&Node> {
        self.nodes.get(key)
    }

    pub fn bounds(&self) -> BoundingBox {
        self.nodes[self.root].bounds
    }

    pub fn len(&self) -> usize {
        self.nodes.len()
    }

    pub fn is_empty(&self) -> bool {
        self.nodes.is_empty()
    }

    /// Keys in level order starting at `from`.
    pub fn breadth_first(
        &self,
        from: NodeKey,
    ) -> Vec<NodeKey> {
        let mut order = Vec::new();
        let mut queue = VecDeque::from([from]);
        while let Some(key) = queue.pop_front() {
            order.push(key);
            if let Some((left, right)) = self.nodes[key].children() {
                queue.push_back(left);
                queue.push_back(right);
            }
        }
        order
    }

    /// Levels from the root to the deepest leaf; a lone leaf has height 1.
    pub fn height(&self) -> usize {
        let mut height = 0;
        let mut queue = VecDeque::from([(self.root, 1)]);
        while let Some((key, depth)) = queue.pop_front() {
            height = height.max(depth);
            if let Some((left, right)) = self.nodes[key].children() {
                queue.push_back((left, depth + 1));
                queue.push_back((right, depth + 1));
            }
        }
        height
    }

    pub fn leaves(&self) -> impl Iterator<Item = (NodeKey, IndexRange)> + '_ {
        self.breadth_first(self.root)
            .into_iter()
            .filter_map(move |key| match self.nodes[key].kind {
                NodeKind::Leaf(range) => Some((key, range)),
                NodeKind::Internal { .. } => None,
            })
    }

    /// Nearest hit below the root closer than `max_distance`.
    ///
    /// The root's own box is not tested; callers do that first.
    pub fn intersect<P: Primitive>(
        &self,
        primitives: &[P],
        indices: &[u32],
        ray: &Ray,
        max_distance: f32,
        stats: &mut TraversalStats,
    ) -> Option<RayHit> {
        let mut closest = None;
        let mut best = max_distance;
        self.intersect_node(
            self.root,
            primitives,
            indices,
            ray,
            &mut best,
            &mut closest,
            stats,
        );
        closest
    }

    #[allow(clippy::too_many_arguments)]
    fn intersect_node<P: Primitive>(
        &self,
        key: NodeKey,
        primitives: &[P],
        indices: &[u32],
        ray: &Ray,
        best: &mut f32,
        closest: &mut Option<RayHit>,
        stats: &mut TraversalStats,
    ) -> bool {
        let (left, right) = match self.nodes[key].kind {
            NodeKind::Leaf(range) => {
                let mut hit = false;
                for slot in range {
                    stats.primitive_tests += 1;
                    let primitive = indices[slot] as usize;
                    let Some(along) = primitives[primitive].intersect(ray) else {
                        continue;
                    };
                    if along < *best {
                        *best = along;
                        *closest = Some(RayHit {
                            distance: along,
                            slot,
                            primitive,
                        });
                        hit = true;
                    }
                }
                return hit;
            },
            NodeKind::Internal { left, right } => (left, right),
        };

        stats.box_tests += 2;
        let mut first = (left, self.nodes[left].bounds.intersects(ray).unwrap_or(f32::INFINITY));
        let mut second = (right, self.nodes[right].bounds.intersects(ray).unwrap_or(f32::INFINITY));
        if second.1 < first.1 {
            core::mem::swap(&mut first, &mut second);
        }

        let first_hit = first.1 < *best
            && self.intersect_node(first.0, primitives, indices, ray, best, closest, stats);
        // `best` may have shrunk while visiting the nearer child.
        let second_hit = second.1 < *best
            && self.intersect_node(second.0, primitives, indices, ray, best, closest, stats);

        first_hit || second_hit
    }

    /// `target` takes over everything `source` holds; `source`'s slot is freed.
    pub(super) fn transform_into(
        &mut self,
        target: NodeKey,
        source: NodeKey,
    ) {
        debug_assert_ne!(target, source);
        let Some(adopted) = self.nodes.remove(source) else {
            panic!("transform_into: source node {source:?} is not in the tree");
        };
        self.nodes[target] = adopted;
    }

    /// Re-parents `target`'s current contents and `subtree` under `target`.
    ///
    /// A copy of `target` moves into a fresh slot and becomes the left child,
    /// `subtree` the right. `target` keeps its key, so references to it stay valid.
    pub(super) fn merge_with(
        &mut self,
        target: NodeKey,
        subtree: NodeKey,
    ) {
        debug_assert_ne!(target, subtree);
        let old_self = self.nodes[target];
        let added = self.nodes[subtree];
        let clone = self.nodes.insert(old_self);

        self.nodes[target] = Node {
            bounds: old_self.bounds.union(&added.bounds),
            count:  old_self.count + added.count,
            kind:   NodeKind::Internal {
                left:  clone,
                right: subtree,
            },
        };
    }

    /// Frees an internal node and hands back its (now parentless) children.
    pub(super) fn take_children(
        &mut self,
        key: NodeKey,
    ) -> Option<(NodeKey, NodeKey)> {
        let children = self.nodes.get(key)?.children()?;
        self.nodes.remove(key);
        Some(children)
    }

    /// Recomputes every internal node's bounds and primitive count from its children.
    pub fn refresh_bounds(&mut self) {
        for key in self.breadth_first(self.root).into_iter().rev() {
            let Some((left, right)) = self.nodes[key].children() else {
                continue;
            };
            let (left, right) = (self.nodes[left], self.nodes[right]);
            let node = &mut self.nodes[key];
            node.bounds = left.bounds.union(&right.bounds);
            node.count = left.count + right.count;
        }
    }

    pub fn sah_cost(
        &self,
        traversal_cost: f32,
        intersection_cost: f32,
    ) -> f32 {
        self.sah_cost_of(self.root, traversal_cost, intersection_cost)
    }

    #[allow(clippy::cast_precision_loss)]
    fn sah_cost_of(
        &self,
        key: NodeKey,
        traversal_cost: f32,
        intersection_cost: f32,
    ) -> f32 {
        let node = &self.nodes[key];
        let Some((left, right)) = node.children() else {
            return node.count as f32 * intersection_cost;
        };

        let cost_left = self.sah_cost_of(left, traversal_cost, intersection_cost);
        let cost_right = self.sah_cost_of(right, traversal_cost, intersection_cost);

        let parent_area = node.bounds.surface_area();
        if parent_area > 1e-9 {
            let p_left = self.nodes[left].bounds.surface_area() / parent_area;
            let p_right = self.nodes[right].bounds.surface_area() / parent_area;
            p_left.mul_add(cost_left, p_right.mul_add(cost_right, traversal_cost))
        } else {
            traversal_cost + cost_left + cost_right
        }
    }

    /// Panics if the tree isn't well-formed.
    ///
    /// Checks topology (every arena node is reachable exactly once, no unary
    /// nodes), geometry (each node's bounds equal the union of its subtree) and
    /// that the leaves partition `indices`, itself a permutation of the primitives.
    pub fn assert_well_formed<P: Primitive>(
        &self,
        primitives: &[P],
        indices: &[u32],
    ) {
        let mut seen_primitives = vec![false; primitives.len()];
        for &index in indices {
            let seen = seen_primitives
                .get_mut(index as usize)
                .unwrap_or_else(|| panic!("index {index} out of bounds"));
            assert!(!*seen, "primitive {index} appears twice in the index buffer");
            *seen = true;
        }
        assert_eq!(indices.len(), primitives.len());

        let mut visited = HashSet::new();
        let mut covered = vec![false; indices.len()];
        self.assert_well_formed_recurse(self.root, primitives, indices, &mut visited, &mut covered);

        assert_eq!(visited.len(), self.nodes.len(), "arena holds unreachable nodes");
        assert!(covered.iter().all(|&c| c), "some slots belong to no leaf");
    }

    fn assert_well_formed_recurse<P: Primitive>(
        &self,
        key: NodeKey,
        primitives: &[P],
        indices: &[u32],
        visited: &mut HashSet<NodeKey>,
        covered: &mut [bool],
    ) -> BoundingBox {
        assert!(visited.insert(key), "node {key:?} reachable twice");
        let node = self.nodes.get(key).expect("dangling node key");

        let bounds = match node.kind {
            NodeKind::Leaf(range) => {
                assert!(!range.is_empty(), "empty leaf {range}");
                assert!(range.count() <= self.leaf_limit, "leaf {range} over limit");
                assert_eq!(node.count, range.count());
                for slot in range {
                    assert!(!covered[slot], "slot {slot} shared by two leaves");
                    covered[slot] = true;
                }
                BoundingBox::from_points(range.into_iter().flat_map(|slot| {
                    let bounds = primitives[indices[slot] as usize].bounds();
                    [bounds.min, bounds.max]
                }))
            },
            NodeKind::Internal { left, right } => {
                assert_ne!(left, right, "unary node {key:?}");
                let left_bounds =
                    self.assert_well_formed_recurse(left, primitives, indices, visited, covered);
                let right_bounds =
                    self.assert_well_formed_recurse(right, primitives, indices, visited, covered);
                assert_eq!(node.count, self.nodes[left].count + self.nodes[right].count);
                left_bounds.union(&right_bounds)
            },
        };

        assert_eq!(node.bounds, bounds, "stale bounds on {key:?}");
        bounds
    }
}
