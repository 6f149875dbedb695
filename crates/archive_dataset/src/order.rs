//! Randomized presentation order over a worker's owned range.

use rand::rngs::StdRng;
use rand::seq::SliceRandom;
use rand::SeedableRng;
use std::ops::Range;

/// Where the order stands after the latest `advance`.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum OrderPhase {
    /// Mid-permutation (or not started).
    Ready,
    /// The last entry of the current permutation was just emitted; the next
    /// advance draws a fresh permutation.
    Exhausted,
    /// A fresh permutation was drawn; its first entry is pending or was just
    /// emitted.
    Reshuffled,
}

#[derive(Debug, Clone)]
pub struct PresentationOrder {
    range: Range<usize>,
    permutation: Vec<usize>,
    cursor: Option<usize>,
    phase: OrderPhase,
    reshuffles: usize,
    rng: StdRng,
}

impl PresentationOrder {
    pub fn new(range: Range<usize>, seed: u64) -> Self {
        let mut rng = StdRng::seed_from_u64(seed);
        let mut permutation: Vec<usize> = range.clone().collect();
        permutation.shuffle(&mut rng);
        Self {
            range,
            permutation,
            cursor: None,
            phase: OrderPhase::Ready,
            reshuffles: 0,
            rng,
        }
    }

    /// Index the next `advance` will emit, drawing the fresh permutation first
    /// when the current one is exhausted. Repeated calls return the same index.
    pub fn pending(&mut self) -> Option<usize> {
        if self.permutation.is_empty() {
            return None;
        }
        if self.phase == OrderPhase::Exhausted {
            self.permutation.shuffle(&mut self.rng);
            self.reshuffles += 1;
            self.phase = OrderPhase::Reshuffled;
            self.cursor = None;
        }
        let next = self.cursor.map_or(0, |c| c + 1);
        Some(self.permutation[next])
    }

    /// Emit the next owned index, reshuffling when the permutation ran out.
    /// `None` only for an empty range.
    pub fn advance(&mut self) -> Option<usize> {
        let index = self.pending()?;
        let next = match self.cursor {
            None => 0,
            Some(c) => {
                self.phase = OrderPhase::Ready;
                c + 1
            }
        };
        self.cursor = Some(next);
        if next + 1 == self.permutation.len() {
            self.phase = OrderPhase::Exhausted;
        }
        Some(index)
    }

    pub fn range(&self) -> Range<usize> {
        self.range.clone()
    }

    pub fn len(&self) -> usize {
        self.permutation.len()
    }

    pub fn is_empty(&self) -> bool {
        self.permutation.is_empty()
    }

    pub fn cursor(&self) -> Option<usize> {
        self.cursor
    }

    pub fn phase(&self) -> OrderPhase {
        self.phase
    }

    pub fn permutation(&self) -> &[usize] {
        &self.permutation
    }

    /// Fresh permutations drawn since construction.
    pub fn reshuffles(&self) -> usize {
        self.reshuffles
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn each_index_once_per_pass() {
        let mut order = PresentationOrder::new(4..9, 11);
        for pass in 1..=3 {
            let mut seen: Vec<usize> = (0..5).map(|_| order.advance().unwrap()).collect();
            seen.sort();
            assert_eq!(seen, vec![4, 5, 6, 7, 8]);
            assert_eq!(order.phase(), OrderPhase::Exhausted);
            assert_eq!(order.reshuffles(), pass - 1);
        }
    }

    #[test]
    fn phases_cycle_through_reshuffle() {
        let mut order = PresentationOrder::new(0..3, 5);
        assert_eq!(order.cursor(), None);
        order.advance();
        assert_eq!(order.phase(), OrderPhase::Ready);
        order.advance();
        assert_eq!(order.phase(), OrderPhase::Ready);
        order.advance();
        assert_eq!(order.phase(), OrderPhase::Exhausted);
        order.advance();
        assert_eq!(order.phase(), OrderPhase::Reshuffled);
        assert_eq!(order.cursor(), Some(0));
        order.advance();
        assert_eq!(order.phase(), OrderPhase::Ready);
    }

    #[test]
    fn same_seed_same_sequence() {
        let mut a = PresentationOrder::new(0..50, 99);
        let mut b = PresentationOrder::new(0..50, 99);
        for _ in 0..120 {
            assert_eq!(a.advance(), b.advance());
        }
    }

    #[test]
    fn pending_is_stable_until_advance() {
        let mut order = PresentationOrder::new(0..2, 8);
        for _ in 0..5 {
            let peeked = order.pending();
            assert_eq!(order.pending(), peeked);
            assert_eq!(order.advance(), peeked);
        }
        assert_eq!(order.reshuffles(), 2);
    }

    #[test]
    fn empty_range_never_emits() {
        let mut order = PresentationOrder::new(3..3, 1);
        assert_eq!(order.advance(), None);
        assert!(order.is_empty());
    }
}
