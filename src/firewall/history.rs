//! Fixed-capacity record history.

use std::collections::VecDeque;

/// Append-only ring of records; the oldest record is evicted first.
#[derive(Debug, Clone)]
pub struct BoundedHistory<T> {
    items: VecDeque<T>,
    capacity: usize,
}

impl<T> BoundedHistory<T> {
    /// Create a history holding at most `capacity` records.
    pub fn new(capacity: usize) -> Self {
        Self {
            items: VecDeque::with_capacity(capacity),
            capacity,
        }
    }

    /// Append a record, evicting from the head past capacity.
    pub fn push(&mut self, item: T) {
        self.items.push_back(item);
        while self.items.len() > self.capacity {
            self.items.pop_front();
        }
    }

    /// Iterate over the last `min(n, len)` records in insertion order.
    pub fn recent(&self, n: usize) -> impl Iterator<Item = &T> {
        let skip = self.items.len().saturating_sub(n);
        self.items.iter().skip(skip)
    }

    /// Most recently appended record.
    pub fn last(&self) -> Option<&T> {
        self.items.back()
    }

    pub fn len(&self) -> usize {
        self.items.len()
    }

    pub fn is_empty(&self) -> bool {
        self.items.is_empty()
    }

    pub fn iter(&self) -> impl Iterator<Item = &T> {
        self.items.iter()
    }
}

impl<T: Clone> BoundedHistory<T> {
    /// Owned copy of the last `min(n, len)` records in insertion order.
    pub fn recent_cloned(&self, n: usize) -> Vec<T> {
        self.recent(n).cloned().collect()
    }
}

/// Owned copy of the last `min(n, len)` entries of an unbounded log.
///
/// The attack log is never truncated in storage; limits apply on read.
pub fn tail<T: Clone>(log: &[T], n: usize) -> Vec<T> {
    log[log.len().saturating_sub(n)..].to_vec()
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_evicts_oldest_past_capacity() {
        let mut history = BoundedHistory::new(20);
        for i in 0..25 {
            history.push(i);
        }

        assert_eq!(history.len(), 20);
        let items: Vec<_> = history.iter().copied().collect();
        assert_eq!(items, (5..25).collect::<Vec<_>>());
    }

    #[test]
    fn test_recent_returns_tail_in_order() {
        let mut history = BoundedHistory::new(5);
        for i in 0..4 {
            history.push(i);
        }

        assert_eq!(history.recent_cloned(2), vec![2, 3]);
        assert_eq!(history.recent_cloned(10), vec![0, 1, 2, 3]);
        assert!(history.recent_cloned(0).is_empty());
        assert_eq!(history.last(), Some(&3));
    }

    #[test]
    fn test_zero_capacity_keeps_nothing() {
        let mut history = BoundedHistory::new(0);
        history.push("a");
        assert!(history.is_empty());
    }

    #[test]
    fn test_tail() {
        let log = vec![1, 2, 3, 4];
        assert_eq!(tail(&log, 2), vec![3, 4]);
        assert_eq!(tail(&log, 9), vec![1, 2, 3, 4]);
    }
}
