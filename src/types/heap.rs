// Copyright (C) 2024 GLStudios
// SPDX-License-Identifier: LGPL-2.1-only

/// Resizable binary max-heap. Entries carry a payload alongside their priority.
///
/// Priorities only need [`PartialOrd`]; an incomparable priority (NaN) never
/// wins a comparison and so sinks toward the leaves.
#[derive(Clone, Debug)]
pub struct PriorityQueue<K, V> {
    entries: Vec<(K, V)>,
}

impl<K: PartialOrd, V> Default for PriorityQueue<K, V> {
    fn default() -> Self {
        Self::new()
    }
}

impl<K: PartialOrd, V> PriorityQueue<K, V> {
    const MIN_CAPACITY: usize = 8;

    pub const fn new() -> Self {
        Self {
            entries: Vec::new(),
        }
    }

    pub fn with_capacity(capacity: usize) -> Self {
        Self {
            entries: Vec::with_capacity(capacity),
        }
    }

    pub fn len(&self) -> usize {
        self.entries.len()
    }

    pub fn is_empty(&self) -> bool {
        self.entries.is_empty()
    }

    pub fn clear(&mut self) {
        self.entries.clear();
    }

    pub fn insert(
        &mut self,
        priority: K,
        value: V,
    ) {
        self.entries.push((priority, value));
        self.swim(self.entries.len() - 1);
    }

    /// Payload of the highest-priority entry.
    ///
    /// # Panics
    /// If the queue is empty.
    pub fn max(&self) -> &V {
        assert!(!self.is_empty(), "max() called on an empty priority queue");
        &self.entries[0].1
    }

    /// # Panics
    /// If the queue is empty.
    pub fn max_priority(&self) -> &K {
        assert!(
            !self.is_empty(),
            "max_priority() called on an empty priority queue"
        );
        &self.entries[0].0
    }

    /// Removes and returns the payload of the highest-priority entry.
    ///
    /// # Panics
    /// If the queue is empty.
    pub fn delete_max(&mut self) -> V {
        assert!(
            !self.is_empty(),
            "delete_max() called on an empty priority queue"
        );

        let last = self.entries.len() - 1;
        self.entries.swap(0, last);
        let Some((_, max)) = self.entries.pop() else {
            unreachable!("queue checked non-empty above");
        };
        self.sink(0);

        let capacity = self.entries.capacity();
        if capacity > Self::MIN_CAPACITY && !self.is_empty() && capacity / 4 > self.len() {
            self.entries.shrink_to(capacity / 2);
        }

        max
    }

    #[inline]
    fn less(
        &self,
        i: usize,
        j: usize,
    ) -> bool {
        self.entries[i].0 < self.entries[j].0
    }

    fn swim(
        &mut self,
        mut k: usize,
    ) {
        while k > 0 {
            let parent = (k - 1) / 2;
            if !self.less(parent, k) {
                break;
            }
            self.entries.swap(parent, k);
            k = parent;
        }
    }

    fn sink(
        &mut self,
        mut k: usize,
    ) {
        let len = self.entries.len();
        loop {
            let mut child = 2 * k + 1;
            if child >= len {
                break;
            }
            if child + 1 < len && self.less(child, child + 1) {
                child += 1;
            }
            if !self.less(k, child) {
                break;
            }
            self.entries.swap(k, child);
            k = child;
        }
    }
}

impl<K: PartialOrd, V> FromIterator<(K, V)> for PriorityQueue<K, V> {
    fn from_iter<I: IntoIterator<Item = (K, V)>>(iter: I) -> Self {
        let iter = iter.into_iter();
        let mut queue = Self::with_capacity(iter.size_hint().0);
        for (priority, value) in iter {
            queue.insert(priority, value);
        }
        queue
    }
}

#[cfg(test)]
mod tests {
    use rand::{
        rngs::StdRng,
        Rng,
        SeedableRng,
    };

    use super::PriorityQueue;

    #[test]
    fn pops_in_priority_order() {
        let mut queue: PriorityQueue<_, _> = [(3, 'c'), (9, 'i'), (1, 'a'), (5, 'e')]
            .into_iter()
            .collect();

        assert_eq!(queue.len(), 4);
        assert_eq!(*queue.max(), 'i');
        assert_eq!(*queue.max_priority(), 9);

        let order: Vec<_> = std::iter::from_fn(|| (!queue.is_empty()).then(|| queue.delete_max()))
            .collect();
        assert_eq!(order, ['i', 'e', 'c', 'a']);
        assert!(queue.is_empty());
    }

    #[test]
    fn interleaved_inserts_and_deletes() {
        let mut rng = StdRng::seed_from_u64(0x5eed);
        let mut queue = PriorityQueue::new();
        let mut shadow: Vec<f32> = Vec::new();
        let (mut inserted, mut deleted) = (0usize, 0usize);

        for _ in 0..2_000 {
            if shadow.is_empty() || rng.gen_bool(0.6) {
                let priority: f32 = rng.gen_range(-100.0..100.0);
                queue.insert(priority, priority);
                shadow.push(priority);
                inserted += 1;
            } else {
                let max = queue.delete_max();
                deleted += 1;

                let position = shadow
                    .iter()
                    .position(|&p| p == max)
                    .expect("popped value was never inserted");
                shadow.swap_remove(position);
                assert!(shadow.iter().all(|&p| p <= max));
            }
            assert_eq!(queue.len(), inserted - deleted);
        }
    }

    #[test]
    fn shrinks_after_draining() {
        let mut queue: PriorityQueue<u32, ()> = (0..1024).map(|p| (p, ())).collect();
        while queue.len() > 3 {
            queue.delete_max();
        }
        assert!(queue.entries.capacity() < 1024);
        assert_eq!(*queue.max_priority(), 2);
    }

    #[test]
    #[should_panic(expected = "empty priority queue")]
    fn delete_from_empty_panics() {
        let mut queue: PriorityQueue<f32, ()> = PriorityQueue::new();
        queue.delete_max();
    }

    #[test]
    #[should_panic(expected = "empty priority queue")]
    fn max_of_empty_panics() {
        let queue: PriorityQueue<f32, u8> = PriorityQueue::new();
        let _ = queue.max();
    }
}
