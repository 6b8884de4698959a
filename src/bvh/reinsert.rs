// Copyright (C) 2024 GLStudios
// SPDX-License-Identifier: LGPL-2.1-only

use super::{
    NodeKey,
    Tree,
};
use crate::types::PriorityQueue;

// Keeps the priority finite for a zero induced cost.
const DELTA: f32 = 1e-6;

impl Tree {
    /// Branch-and-bound search for the node under which `subtree` adds the least
    /// surface area, counting the growth it causes along the path from the root.
    ///
    /// `subtree` must be detached from the tree. The root is always a valid
    /// answer, so a target is always returned.
    pub fn find_reinsertion_target(
        &self,
        subtree: NodeKey,
    ) -> NodeKey {
        let subtree_bounds = self.node(subtree).bounds;
        let subtree_area = subtree_bounds.surface_area();

        let mut best_cost = f32::INFINITY;
        let mut best_node = self.root();

        let mut search_queue = PriorityQueue::new();
        search_queue.insert(1.0 / DELTA, (self.root(), 0f32));

        while !search_queue.is_empty() {
            let (test_node, induced_cost) = search_queue.delete_max();

            // Entries pop in order of increasing induced cost, so nothing left can win.
            if induced_cost + subtree_area >= best_cost {
                break;
            }

            let node = self.node(test_node);
            let direct_cost = node.bounds.union(&subtree_bounds).surface_area();
            let total_cost = induced_cost + direct_cost;

            if total_cost < best_cost {
                best_cost = total_cost;
                best_node = test_node;
            }

            let Some((left, right)) = node.children() else {
                continue;
            };

            let induced_for_children = total_cost - node.bounds.surface_area();
            if induced_for_children + subtree_area < best_cost {
                let priority = 1.0 / (DELTA + induced_for_children);
                search_queue.insert(priority, (left, induced_for_children));
                search_queue.insert(priority, (right, induced_for_children));
            }
        }

        tracing::trace!(?subtree, target = ?best_node, cost = best_cost, "reinsertion target");
        best_node
    }
}

#[cfg(test)]
mod tests {
    use glam::Vec3A;

    use crate::bvh::{
        tree::tests::{
            grid,
            random_soup,
            unit_triangle,
        },
        MeshBvh,
        NodeKey,
        Tree,
    };

    /// Exhaustive version of the same cost, for comparison.
    fn brute_force(
        tree: &Tree,
        subtree: NodeKey,
    ) -> f32 {
        let subtree_bounds = tree.node(subtree).bounds;
        let mut best = f32::INFINITY;
        let mut stack = vec![(tree.root(), 0f32)];
        while let Some((key, induced)) = stack.pop() {
            let node = tree.node(key);
            let total = induced + node.bounds.union(&subtree_bounds).surface_area();
            best = best.min(total);
            if let Some((left, right)) = node.children() {
                let induced = total - node.bounds.surface_area();
                stack.push((left, induced));
                stack.push((right, induced));
            }
        }
        best
    }

    fn cost_at(
        tree: &Tree,
        target: NodeKey,
        subtree: NodeKey,
    ) -> f32 {
        // Walk down from the root, accumulating induced cost on the way.
        let subtree_bounds = tree.node(subtree).bounds;
        let mut induced = 0.0;
        let mut key = tree.root();
        loop {
            let node = tree.node(key);
            let total = induced + node.bounds.union(&subtree_bounds).surface_area();
            if key == target {
                return total;
            }
            let (left, right) = node.children().expect("target is below this node");
            induced = total - node.bounds.surface_area();
            key = if tree.breadth_first(left).contains(&target) {
                left
            } else {
                right
            };
        }
    }

    #[test]
    fn matches_exhaustive_search() {
        let mut bvh = MeshBvh::new(random_soup(21, 300)).expect("non-empty mesh");
        let tree = bvh.tree_mut();

        // Detach a few leaves' worth of primitives as standalone subtrees.
        let probes: Vec<NodeKey> = tree.leaves().map(|(key, _)| key).step_by(7).collect();
        for probe in probes {
            let copy = *tree.node(probe);
            let detached = tree.nodes.insert(copy);
            let target = tree.find_reinsertion_target(detached);
            let found = cost_at(tree, target, detached);
            let expected = brute_force(tree, detached);
            assert!(
                (found - expected).abs() <= 1e-3 * expected.max(1.0),
                "found {found}, exhaustive {expected}"
            );
            tree.nodes.remove(detached);
        }
    }

    #[test]
    fn far_away_subtree_goes_to_root() {
        let mut bvh = MeshBvh::new(grid(16)).expect("non-empty mesh");
        let tree = bvh.tree_mut();
        let far = MeshBvh::new(vec![unit_triangle(Vec3A::new(0.0, 500.0, 0.0))])
            .expect("non-empty mesh");

        let detached = tree.nodes.insert(*far.tree().node(far.tree().root()));
        assert_eq!(tree.find_reinsertion_target(detached), tree.root());
    }

    #[test]
    fn neighbour_lands_next_to_its_twin() {
        let mut bvh = MeshBvh::new(grid(16)).expect("non-empty mesh");
        let tree = bvh.tree_mut();
        let twin = MeshBvh::new(vec![unit_triangle(Vec3A::new(15.0, 0.0, 0.0))])
            .expect("non-empty mesh");

        let detached = tree.nodes.insert(*twin.tree().node(twin.tree().root()));
        let target = tree.find_reinsertion_target(detached);
        let bounds = tree.node(target).bounds;
        assert!(tree.node(target).is_leaf());
        assert!(bounds.max.x >= 16.0 - f32::EPSILON);
    }
}
