//! Fixed-capacity record log shared by the sample plugins

use std::collections::VecDeque;

/// Keeps at most `capacity` entries, dropping the oldest first
#[derive(Debug, Clone)]
pub struct BoundedLog<T> {
    entries: VecDeque<T>,
    capacity: usize,
}

impl<T> BoundedLog<T> {
    pub fn new(capacity: usize) -> Self {
        let capacity = capacity.max(1);
        Self {
            entries: VecDeque::with_capacity(capacity.min(1024)),
            capacity,
        }
    }

    /// Append, returning the evicted entry if the log was full
    pub fn push(&mut self, entry: T) -> Option<T> {
        let evicted = if self.entries.len() >= self.capacity {
            self.entries.pop_front()
        } else {
            None
        };
        self.entries.push_back(entry);
        evicted
    }

    /// Newest `n` entries, oldest first
    pub fn recent(&self, n: usize) -> impl Iterator<Item = &T> {
        self.entries.iter().skip(self.entries.len().saturating_sub(n))
    }

    pub fn iter(&self) -> impl Iterator<Item = &T> {
        self.entries.iter()
    }

    pub fn len(&self) -> usize {
        self.entries.len()
    }

    pub fn is_empty(&self) -> bool {
        self.entries.is_empty()
    }

    pub fn capacity(&self) -> usize {
        self.capacity
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_drops_oldest_when_full() {
        let mut log = BoundedLog::new(3);
        for i in 0..3 {
            assert_eq!(log.push(i), None);
        }
        assert_eq!(log.push(3), Some(0));
        assert_eq!(log.iter().copied().collect::<Vec<_>>(), vec![1, 2, 3]);
    }

    #[test]
    fn test_recent_is_oldest_first() {
        let mut log = BoundedLog::new(10);
        for i in 0..5 {
            log.push(i);
        }
        assert_eq!(log.recent(2).copied().collect::<Vec<_>>(), vec![3, 4]);
        assert_eq!(log.recent(50).count(), 5);
    }

    #[test]
    fn test_zero_capacity_keeps_one() {
        let mut log = BoundedLog::new(0);
        log.push("a");
        log.push("b");
        assert_eq!(log.len(), 1);
        assert_eq!(log.capacity(), 1);
    }
}
