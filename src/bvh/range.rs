// Copyright (C) 2024 GLStudios
// SPDX-License-Identifier: LGPL-2.1-only

use std::{
    fmt,
    ops::Range,
};

/// Half-open interval of slots in the shared primitive-index buffer.
#[derive(Clone, Copy, Debug, PartialEq, Eq, Hash)]
pub struct IndexRange {
    pub start: usize,
    pub end:   usize,
}

impl IndexRange {
    pub const fn new(
        start: usize,
        end: usize,
    ) -> Self {
        debug_assert!(start <= end);
        Self { start, end }
    }

    pub const fn count(&self) -> usize {
        self.end - self.start
    }

    pub const fn is_empty(&self) -> bool {
        self.start == self.end
    }

    pub const fn as_range(&self) -> Range<usize> {
        self.start..self.end
    }

    pub fn iter(&self) -> Range<usize> {
        self.as_range()
    }

    /// Splits at the midpoint. The right half gets the extra slot on odd counts.
    pub const fn split(&self) -> (Self, Self) {
        let mid = self.start + self.count() / 2;
        (Self::new(self.start, mid), Self::new(mid, self.end))
    }

    pub const fn split_at(
        &self,
        mid: usize,
    ) -> (Self, Self) {
        debug_assert!(self.start <= mid && mid <= self.end);
        (Self::new(self.start, mid), Self::new(mid, self.end))
    }
}

impl IntoIterator for IndexRange {
    type IntoIter = Range<usize>;
    type Item = usize;

    fn into_iter(self) -> Self::IntoIter {
        self.as_range()
    }
}

impl fmt::Display for IndexRange {
    fn fmt(
        &self,
        f: &mut fmt::Formatter<'_>,
    ) -> fmt::Result {
        write!(f, "S_{}_E_{}", self.start, self.end)
    }
}
