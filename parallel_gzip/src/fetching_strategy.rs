//! Access-pattern classification and prefetch planning.
//!
//! The strategy remembers the last few requested chunk indices, labels the
//! stream sequential when they increase strictly by one, and derives the
//! indices worth prefetching. On random access the lookahead shrinks to
//! avoid wasting workers on guesses that will not be read.

use std::collections::VecDeque;

/// How many recent accesses the classifier remembers.
const HISTORY_SIZE: usize = 8;

/// How many of the most recent accesses must be consecutive for the stream
/// to count as sequential.
const SEQUENTIAL_RUN: usize = 3;

/// Lookahead used while the access pattern still looks random.
const RANDOM_LOOKAHEAD: usize = 2;

#[derive(Debug, Default)]
pub struct FetchingStrategy {
    history: VecDeque<usize>,
}

impl FetchingStrategy {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn fetch(&mut self, index: usize) {
        // Repeated accesses to the same chunk say nothing new about the
        // pattern and would break the consecutive-run detection.
        if self.history.back() == Some(&index) {
            return;
        }
        if self.history.len() == HISTORY_SIZE {
            self.history.pop_front();
        }
        self.history.push_back(index);
    }

    pub fn last_fetched(&self) -> Option<usize> {
        self.history.back().copied()
    }

    /// Sequential means the recent accesses advance strictly by one. With
    /// too little history the stream is optimistically sequential, since
    /// nearly every consumer starts reading from the front.
    pub fn is_sequential(&self) -> bool {
        if self.history.len() < 2 {
            return true;
        }
        let run = self.history.len().min(SEQUENTIAL_RUN);
        self.history
            .iter()
            .rev()
            .take(run)
            .collect::<Vec<_>>()
            .windows(2)
            .all(|pair| *pair[1] + 1 == *pair[0])
    }

    /// Future chunk indices to prefetch, most useful first. The caller
    /// filters out indices already cached or in flight.
    pub fn prefetch_list(&self, max_count: usize) -> Vec<usize> {
        let Some(last) = self.last_fetched() else {
            return Vec::new();
        };
        let count = if self.is_sequential() {
            max_count
        } else {
            max_count.min(RANDOM_LOOKAHEAD)
        };
        (1..=count).map(|step| last + step).collect()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use pretty_assertions::assert_eq;

    #[test]
    fn starts_out_sequential() {
        let mut strategy = FetchingStrategy::new();
        assert!(strategy.is_sequential());
        strategy.fetch(0);
        assert!(strategy.is_sequential());
    }

    #[test]
    fn classifies_sequential_runs() {
        let mut strategy = FetchingStrategy::new();
        for index in 3..9 {
            strategy.fetch(index);
        }
        assert!(strategy.is_sequential());
    }

    #[test]
    fn classifies_random_access() {
        let mut strategy = FetchingStrategy::new();
        for index in [5, 17, 2, 40] {
            strategy.fetch(index);
        }
        assert!(!strategy.is_sequential());
    }

    #[test]
    fn recovers_after_a_seek() {
        let mut strategy = FetchingStrategy::new();
        for index in [0, 1, 2, 90, 91, 92] {
            strategy.fetch(index);
        }
        // The last three accesses are consecutive again.
        assert!(strategy.is_sequential());
    }

    #[test]
    fn prefetch_list_is_monotone_after_last() {
        let mut strategy = FetchingStrategy::new();
        for index in [4, 5, 6] {
            strategy.fetch(index);
        }
        assert_eq!(strategy.prefetch_list(4), vec![7, 8, 9, 10]);
    }

    #[test]
    fn random_access_shrinks_lookahead() {
        let mut strategy = FetchingStrategy::new();
        for index in [30, 2, 77] {
            strategy.fetch(index);
        }
        assert_eq!(strategy.prefetch_list(8), vec![78, 79]);
    }

    #[test]
    fn empty_history_prefetches_nothing() {
        let strategy = FetchingStrategy::new();
        assert!(strategy.prefetch_list(8).is_empty());
    }
}
