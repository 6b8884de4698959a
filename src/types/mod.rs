// Copyright (C) 2024 GLStudios
// SPDX-License-Identifier: LGPL-2.1-only

pub mod heap;

pub use heap::PriorityQueue;
