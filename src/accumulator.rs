//! Context-keyed histogram accumulation
//!
//! One [`ByteHistogram`] per distinct [`ExecutionContext`]. Histograms are
//! created lazily on the first observation of a context and are never removed.
//! Contexts are kept in a `BTreeMap` so iteration (and therefore report
//! output) is ordered by context, independent of arrival order.

use std::collections::btree_map;
use std::collections::BTreeMap;

use crate::context::ExecutionContext;
use crate::histogram::ByteHistogram;

/// Per-context byte-value histograms for one event class
#[derive(Debug, Default, Clone)]
pub struct Accumulator {
    histograms: BTreeMap<ExecutionContext, ByteHistogram>,
}

impl Accumulator {
    /// Create an empty accumulator
    pub fn new() -> Self {
        Self::default()
    }

    /// Count one observation of `value` at `context`
    #[inline]
    pub fn update(&mut self, context: ExecutionContext, value: u8) {
        self.histogram_mut(context).record(value);
    }

    /// Count `n` observations of `value` at `context`, as for a fill
    ///
    /// `n == 0` is a no-op and does not create a histogram.
    #[inline]
    pub fn update_n(&mut self, context: ExecutionContext, value: u8, n: u64) {
        if n == 0 {
            return;
        }
        self.histogram_mut(context).record_n(value, n);
    }

    /// Count every byte of `buffer` at `context`
    ///
    /// An empty buffer is a no-op and does not create a histogram.
    #[inline]
    pub fn update_range(&mut self, context: ExecutionContext, buffer: &[u8]) {
        if buffer.is_empty() {
            return;
        }
        self.histogram_mut(context).record_all(buffer);
    }

    // Existing contexts take the lookup path only; insertion happens once per context.
    #[inline]
    fn histogram_mut(&mut self, context: ExecutionContext) -> &mut ByteHistogram {
        self.histograms.entry(context).or_default()
    }

    /// Histogram for `context`, if it has been observed
    pub fn get(&self, context: &ExecutionContext) -> Option<&ByteHistogram> {
        self.histograms.get(context)
    }

    /// Number of distinct contexts observed
    pub fn len(&self) -> usize {
        self.histograms.len()
    }

    /// Whether no context has been observed
    pub fn is_empty(&self) -> bool {
        self.histograms.is_empty()
    }

    /// Contexts and their histograms in ascending context order
    pub fn iter(&self) -> btree_map::Iter<'_, ExecutionContext, ByteHistogram> {
        self.histograms.iter()
    }

    /// Total observations across all contexts
    pub fn total_observations(&self) -> u64 {
        self.histograms
            .values()
            .fold(0u64, |acc, hist| acc.saturating_add(hist.total()))
    }
}

impl<'a> IntoIterator for &'a Accumulator {
    type Item = (&'a ExecutionContext, &'a ByteHistogram);
    type IntoIter = btree_map::Iter<'a, ExecutionContext, ByteHistogram>;

    fn into_iter(self) -> Self::IntoIter {
        self.iter()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::context::StackKind;

    fn ctx(pc: u64) -> ExecutionContext {
        ExecutionContext::new(StackKind::Asid, 0x1000, pc, (0xaa, 0))
    }

    #[test]
    fn test_accumulator_new() {
        let acc = Accumulator::new();
        assert!(acc.is_empty());
        assert_eq!(acc.total_observations(), 0);
    }

    #[test]
    fn test_update_creates_histogram_lazily() {
        let mut acc = Accumulator::new();
        assert!(acc.get(&ctx(1)).is_none());

        acc.update(ctx(1), 0x41);
        assert_eq!(acc.len(), 1);
        assert_eq!(acc.get(&ctx(1)).unwrap().count(0x41), 1);
    }

    #[test]
    fn test_update_repeated_values() {
        let mut acc = Accumulator::new();
        for _ in 0..3 {
            acc.update(ctx(1), 0x41);
        }
        acc.update(ctx(1), 0x00);

        let hist = acc.get(&ctx(1)).unwrap();
        assert_eq!(hist.count(0x41), 3);
        assert_eq!(hist.count(0x00), 1);
        assert_eq!(hist.total(), 4);
        assert_eq!(acc.len(), 1);
    }

    #[test]
    fn test_update_range_counts_every_byte() {
        let mut acc = Accumulator::new();
        acc.update_range(ctx(2), &[0xff, 0xff, 0x10, 0x00]);

        let hist = acc.get(&ctx(2)).unwrap();
        assert_eq!(hist.count(0xff), 2);
        assert_eq!(hist.count(0x10), 1);
        assert_eq!(hist.count(0x00), 1);
        assert_eq!(hist.distinct_values(), 3);
    }

    #[test]
    fn test_update_range_empty_is_noop() {
        let mut acc = Accumulator::new();
        acc.update_range(ctx(3), &[]);
        assert!(acc.is_empty());
    }

    #[test]
    fn test_update_n_adds_in_bulk() {
        let mut acc = Accumulator::new();
        acc.update_n(ctx(4), 0, 0);
        assert!(acc.is_empty());

        acc.update_n(ctx(4), 0xcc, 4096);
        acc.update(ctx(4), 0xcc);
        assert_eq!(acc.get(&ctx(4)).unwrap().count(0xcc), 4097);

        acc.update_n(ctx(4), 0xcc, u64::MAX);
        assert_eq!(acc.get(&ctx(4)).unwrap().count(0xcc), u64::MAX);
    }

    #[test]
    fn test_contexts_are_isolated() {
        let mut acc = Accumulator::new();
        acc.update(ctx(1), 7);
        let before = acc.get(&ctx(1)).unwrap().clone();

        acc.update_range(ctx(2), &[7, 7, 7]);
        assert_eq!(acc.get(&ctx(1)).unwrap(), &before);
        assert_eq!(acc.total_observations(), 4);
    }

    #[test]
    fn test_iteration_order_is_context_order() {
        let mut acc = Accumulator::new();
        acc.update(ctx(30), 1);
        acc.update(ctx(10), 1);
        acc.update(ctx(20), 1);

        let pcs: Vec<u64> = acc.iter().map(|(c, _)| c.pc).collect();
        assert_eq!(pcs, vec![10, 20, 30]);
    }
}
