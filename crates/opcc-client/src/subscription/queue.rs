// SPDX-License-Identifier: PolyForm-Noncommercial-1.0.0
// Copyright (c) 2025 Sylvex. All rights reserved.

use std::collections::VecDeque;

/// Bounded per-item notification queue.
///
/// Holds the reported values of one monitored item between the arrival of a
/// notification batch and its hand-off to the outbound buffer.
#[derive(Debug, Clone)]
pub struct ItemQueue<T> {
    capacity: usize,
    discard_oldest: bool,
    items: VecDeque<T>,
    dropped: u64,
}

impl<T> ItemQueue<T> {
    /// Creates a queue holding at most `capacity` values (at least one).
    pub fn new(capacity: usize, discard_oldest: bool) -> Self {
        let capacity = capacity.max(1);
        Self {
            capacity,
            discard_oldest,
            items: VecDeque::with_capacity(capacity.min(64)),
            dropped: 0,
        }
    }

    /// Queues `item`, returning the value dropped on overflow.
    ///
    /// With `discard_oldest` the oldest queued value is dropped, otherwise
    /// the incoming one.
    pub fn push(&mut self, item: T) -> Option<T> {
        if self.items.len() < self.capacity {
            self.items.push_back(item);
            return None;
        }

        self.dropped += 1;
        if self.discard_oldest {
            let oldest = self.items.pop_front();
            self.items.push_back(item);
            oldest
        } else {
            Some(item)
        }
    }

    /// Removes and returns all queued values, oldest first.
    pub fn drain(&mut self) -> Vec<T> {
        self.items.drain(..).collect()
    }

    /// Queued values.
    pub fn len(&self) -> usize {
        self.items.len()
    }

    /// Returns `true` if nothing is queued.
    pub fn is_empty(&self) -> bool {
        self.items.is_empty()
    }

    /// Maximum queued values.
    pub fn capacity(&self) -> usize {
        self.capacity
    }

    /// Whether overflow drops the oldest value.
    pub fn discard_oldest(&self) -> bool {
        self.discard_oldest
    }

    /// Values dropped by overflow so far.
    pub fn dropped(&self) -> u64 {
        self.dropped
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_discard_oldest_keeps_newest() {
        let mut queue = ItemQueue::new(3, true);
        for i in 1..=5 {
            queue.push(i);
        }
        assert_eq!(queue.dropped(), 2);
        assert_eq!(queue.drain(), vec![3, 4, 5]);
        assert!(queue.is_empty());
    }

    #[test]
    fn test_discard_newest_keeps_oldest() {
        let mut queue = ItemQueue::new(3, false);
        for i in 1..=5 {
            let dropped = queue.push(i);
            if i > 3 {
                assert_eq!(dropped, Some(i));
            }
        }
        assert_eq!(queue.drain(), vec![1, 2, 3]);
    }

    #[test]
    fn test_zero_capacity_holds_one() {
        let mut queue = ItemQueue::new(0, true);
        assert_eq!(queue.capacity(), 1);
        queue.push("a");
        assert_eq!(queue.push("b"), Some("a"));
        assert_eq!(queue.len(), 1);
    }
}
