// Copyright (C) 2024 GLStudios
// SPDX-License-Identifier: LGPL-2.1-only

use glam::Vec3A;

use super::{
    BoundingBox,
    IndexRange,
    Primitive,
};

// Below this centroid extent an axis cannot be binned.
const MIN_EXTENT: f32 = 1e-6;

/// Per-primitive data the builder needs, gathered once up front.
#[derive(Clone, Copy, Debug)]
pub struct PrimitiveInfo {
    pub bounds:   BoundingBox,
    pub centroid: Vec3A,
}

impl PrimitiveInfo {
    pub fn gather<P: Primitive>(primitives: &[P]) -> Vec<Self> {
        primitives
            .iter()
            .map(|primitive| Self {
                bounds:   primitive.bounds(),
                centroid: primitive.centroid(),
            })
            .collect()
    }
}

#[derive(Clone, Copy, Debug, Default)]
struct Bin {
    bounds: BoundingBox,
    count:  usize,
}

#[derive(Clone, Copy, Debug)]
struct Candidate {
    axis:     usize,
    boundary: usize,
    cost:     f32,
}

pub fn range_bounds(
    info: &[PrimitiveInfo],
    indices: &[u32],
    range: IndexRange,
) -> BoundingBox {
    indices[range.as_range()]
        .iter()
        .fold(BoundingBox::new(), |bounds, &index| {
            bounds.union(&info[index as usize].bounds)
        })
}

#[allow(clippy::cast_precision_loss)]
fn split_cost(
    left: &BoundingBox,
    left_count: usize,
    right: &BoundingBox,
    right_count: usize,
) -> f32 {
    left.surface_area() * left_count as f32 + right.surface_area() * right_count as f32
}

#[inline]
#[allow(clippy::cast_possible_truncation)]
#[allow(clippy::cast_sign_loss)]
fn bin_of(
    centroid: f32,
    min: f32,
    scale: f32,
    bins: usize,
) -> usize {
    (((centroid - min) * scale) as usize).min(bins - 1)
}

/// Splits `range` in two, reordering `indices` in place, so that
/// `SA(left)·|left| + SA(right)·|right|` is as small as the binned sweep can find.
///
/// Falls back to the midpoint of the range (in its current order) whenever no
/// binned split beats it, which also covers flat and coincident centroids.
/// Both halves are always non-empty.
#[allow(clippy::cast_precision_loss)]
pub fn split_sah(
    info: &[PrimitiveInfo],
    indices: &mut [u32],
    range: IndexRange,
    bins: usize,
) -> (IndexRange, IndexRange) {
    debug_assert!(range.count() >= 2, "cannot split {range}");
    debug_assert!(bins >= 2);

    let (median_left, median_right) = range.split();
    let median_cost = split_cost(
        &range_bounds(info, indices, median_left),
        median_left.count(),
        &range_bounds(info, indices, median_right),
        median_right.count(),
    );

    let slots = &indices[range.as_range()];
    let centroid_bounds =
        BoundingBox::from_points(slots.iter().map(|&index| info[index as usize].centroid));

    let mut best: Option<Candidate> = None;
    let mut buckets = vec![Bin::default(); bins];
    let mut right_area = vec![0f32; bins];
    let mut right_count = vec![0usize; bins];

    for axis in 0..3 {
        let min = centroid_bounds.min[axis];
        let extent = centroid_bounds.max[axis] - min;
        if extent <= MIN_EXTENT {
            continue;
        }
        let scale = bins as f32 / extent;

        buckets.fill(Bin::default());
        for &index in slots {
            let primitive = &info[index as usize];
            let bucket = &mut buckets[bin_of(primitive.centroid[axis], min, scale, bins)];
            bucket.count += 1;
            bucket.bounds.grow_to_include(&primitive.bounds);
        }

        let mut running = BoundingBox::new();
        let mut count = 0;
        for i in (0..bins).rev() {
            running.grow_to_include(&buckets[i].bounds);
            count += buckets[i].count;
            right_area[i] = running.surface_area();
            right_count[i] = count;
        }

        let mut running = BoundingBox::new();
        let mut count = 0;
        for boundary in 0..bins - 1 {
            running.grow_to_include(&buckets[boundary].bounds);
            count += buckets[boundary].count;

            let rest = right_count[boundary + 1];
            if count == 0 || rest == 0 {
                continue;
            }

            let cost =
                running.surface_area() * count as f32 + right_area[boundary + 1] * rest as f32;
            if best.is_none_or(|best| cost < best.cost) {
                best = Some(Candidate {
                    axis,
                    boundary,
                    cost,
                });
            }
        }
    }

    let Some(best) = best.filter(|best| best.cost < median_cost) else {
        return (median_left, median_right);
    };

    let min = centroid_bounds.min[best.axis];
    let scale = bins as f32 / (centroid_bounds.max[best.axis] - min);

    let mut part_point = range.start;
    for i in range.as_range() {
        let centroid = info[indices[i] as usize].centroid[best.axis];
        if bin_of(centroid, min, scale, bins) <= best.boundary {
            indices.swap(part_point, i);
            part_point += 1;
        }
    }

    if part_point == range.start || part_point == range.end {
        return (median_left, median_right);
    }

    range.split_at(part_point)
}
