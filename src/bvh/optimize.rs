// Copyright (C) 2024 GLStudios
// SPDX-License-Identifier: LGPL-2.1-only

use std::collections::VecDeque;

use tracing::{
    debug,
    info,
    instrument,
};

use super::{
    BoundingBox,
    Node,
    NodeKey,
    Tree,
};

#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub struct OptimizeConfig {
    pub iterations:          usize,
    /// Run the (quadratic) closest cross-subtree pair scan after the last iteration.
    pub report_closest_pair: bool,
}

impl OptimizeConfig {
    pub const DEFAULT_ITERATIONS: usize = 128;
}

impl Default for OptimizeConfig {
    fn default() -> Self {
        Self {
            iterations:          Self::DEFAULT_ITERATIONS,
            report_closest_pair: true,
        }
    }
}

/// Nodes from opposite halves of the tree whose combined box is smallest.
#[derive(Clone, Copy, Debug, PartialEq)]
pub struct ClosestPair {
    pub left:         NodeKey,
    pub right:        NodeKey,
    pub left_bounds:  BoundingBox,
    pub right_bounds: BoundingBox,
    pub surface_area: f32,
}

#[derive(Clone, Copy, Debug, PartialEq)]
pub struct OptimizeReport {
    /// Iterations actually run; fewer than requested when no node can be removed.
    pub iterations:   usize,
    pub initial_cost: f32,
    pub final_cost:   f32,
    pub closest_pair: Option<ClosestPair>,
}

/// A node picked for removal, with the parent that collapses onto its sibling.
#[derive(Clone, Copy, Debug)]
struct Depth2Window {
    parent:  NodeKey,
    node:    NodeKey,
    sibling: NodeKey,
}

/// `MCOMB`: high for large nodes whose children are far apart and barely
/// smaller than the node itself.
fn removal_score(
    node: &Node,
    left: &Node,
    right: &Node,
) -> f32 {
    let area = node.bounds.surface_area();
    let left_area = left.bounds.surface_area();
    let right_area = right.bounds.surface_area();

    let m_sum = area / ((left_area + right_area) * 0.5);
    let m_min = area / left_area.min(right_area);
    let m_area = area;
    let m_dist = left.bounds.signed_distance(&right.bounds) / node.bounds.diagonal_length();

    m_sum * m_min * m_area * m_dist
}

impl Tree {
    fn sah(&self) -> f32 {
        self.sah_cost(Self::DEFAULT_TRAVERSAL_COST, Self::DEFAULT_INTERSECTION_COST)
    }

    fn find_removal_candidate(&self) -> Option<Depth2Window> {
        let root = self.root();
        let (left, right) = self.node(root).children()?;

        let mut picked = None;
        let mut max_score = f32::MIN;

        let mut queue = VecDeque::from([
            Depth2Window {
                parent:  root,
                node:    left,
                sibling: right,
            },
            Depth2Window {
                parent:  root,
                node:    right,
                sibling: left,
            },
        ]);

        while let Some(window) = queue.pop_front() {
            let node = self.node(window.node);
            let Some((left, right)) = node.children() else {
                continue;
            };

            let score = removal_score(node, self.node(left), self.node(right));
            if score.is_finite() && score > max_score {
                max_score = score;
                picked = Some(window);
            }

            // Descend only through fully internal levels.
            if self.node(left).is_leaf() || self.node(right).is_leaf() {
                continue;
            }

            queue.push_back(Depth2Window {
                parent:  window.node,
                node:    left,
                sibling: right,
            });
            queue.push_back(Depth2Window {
                parent:  window.node,
                node:    right,
                sibling: left,
            });
        }

        picked
    }

    /// One remove-and-reinsert step. Returns `false` when nothing can be removed.
    fn optimize_step(&mut self) -> bool {
        let Some(window) = self.find_removal_candidate() else {
            return false;
        };
        let Some((first, second)) = self.take_children(window.node) else {
            return false;
        };

        // Parent loses a level: it becomes the sibling.
        self.transform_into(window.parent, window.sibling);

        for orphan in [first, second] {
            let target = self.find_reinsertion_target(orphan);
            self.merge_with(target, orphan);
        }

        self.refresh_bounds();
        true
    }

    /// Greedy SAH improvement by repeatedly pulling out a weak node and reinserting
    /// its children where they fit best. Cost is not guaranteed to fall every step.
    #[instrument(skip_all, fields(iterations = config.iterations, nodes = self.len()))]
    pub fn optimize(
        &mut self,
        config: &OptimizeConfig,
    ) -> OptimizeReport {
        let initial_cost = self.sah();
        let mut iterations = 0;

        while iterations < config.iterations && self.optimize_step() {
            iterations += 1;
            if tracing::enabled!(tracing::Level::DEBUG) {
                debug!(iteration = iterations, sah_cost = self.sah());
            }
        }

        let final_cost = self.sah();
        let closest_pair = config
            .report_closest_pair
            .then(|| self.closest_cross_pair())
            .flatten();

        info!(
            iterations,
            initial_cost,
            final_cost,
            closest_pair = ?closest_pair.map(|pair| pair.surface_area),
            "optimized BVH"
        );

        OptimizeReport {
            iterations,
            initial_cost,
            final_cost,
            closest_pair,
        }
    }

    /// Scans every (left subtree, right subtree) node pair for the smallest
    /// combined box. Diagnostic only; quadratic in the node count.
    pub fn closest_cross_pair(&self) -> Option<ClosestPair> {
        let (root_left, root_right) = self.node(self.root()).children()?;
        let right_side = self.breadth_first(root_right);

        let mut best: Option<ClosestPair> = None;
        for to_search in self.breadth_first(root_left) {
            let left_bounds = self.node(to_search).bounds;
            for &to_test in &right_side {
                let right_bounds = self.node(to_test).bounds;
                let surface_area = left_bounds.union(&right_bounds).surface_area();
                if best.is_none_or(|best| surface_area < best.surface_area) {
                    best = Some(ClosestPair {
                        left: to_search,
                        right: to_test,
                        left_bounds,
                        right_bounds,
                        surface_area,
                    });
                }
            }
        }

        best
    }
}
