//! Byte-value frequency tables
//!
//! [`ByteHistogram`] is the in-memory, sparse form: only byte values that were
//! actually observed occupy a slot. [`DenseCounts`] is the materialized form
//! with all 256 slots present, which is what reports carry on the wire. The
//! conversion between the two is explicit ([`ByteHistogram::to_dense`]) so it
//! can be checked without touching any I/O.
//!
//! Counters are `u64` in memory and saturate instead of wrapping. Reports store
//! 4-byte counters, so narrowing happens in [`DenseCounts::to_wire`].

use fnv::FnvHashMap;
use serde::de::Error as _;
use serde::{Deserialize, Deserializer, Serialize, Serializer};

/// Number of distinct byte values
pub const BYTE_VALUES: usize = 256;

/// Sparse per-byte-value counters for a single execution context
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct ByteHistogram {
    counts: FnvHashMap<u8, u64>,
}

impl ByteHistogram {
    /// Create an all-zero histogram
    pub fn new() -> Self {
        Self::default()
    }

    /// Count one observation of `value`
    #[inline]
    pub fn record(&mut self, value: u8) {
        let slot = self.counts.entry(value).or_insert(0);
        *slot = slot.saturating_add(1);
    }

    /// Count `n` observations of `value` at once
    #[inline]
    pub fn record_n(&mut self, value: u8, n: u64) {
        if n == 0 {
            return;
        }
        let slot = self.counts.entry(value).or_insert(0);
        *slot = slot.saturating_add(n);
    }

    /// Count every byte of `bytes`
    #[inline]
    pub fn record_all(&mut self, bytes: &[u8]) {
        for &value in bytes {
            self.record(value);
        }
    }

    /// Times `value` was observed (zero if never seen)
    pub fn count(&self, value: u8) -> u64 {
        self.counts.get(&value).copied().unwrap_or(0)
    }

    /// Total number of observations
    pub fn total(&self) -> u64 {
        self.counts
            .values()
            .fold(0u64, |acc, &count| acc.saturating_add(count))
    }

    /// Number of distinct byte values observed at least once
    pub fn distinct_values(&self) -> usize {
        self.counts.len()
    }

    /// Whether nothing has been recorded
    pub fn is_empty(&self) -> bool {
        self.counts.is_empty()
    }

    /// Expand to all 256 slots, filling unobserved values with zero
    pub fn to_dense(&self) -> DenseCounts {
        let mut dense = DenseCounts::zeroed();
        for (&value, &count) in &self.counts {
            dense.0[value as usize] = count;
        }
        dense
    }
}

/// All 256 counters of a histogram, indexed by byte value
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct DenseCounts(pub [u64; BYTE_VALUES]);

impl DenseCounts {
    /// All counters zero
    pub fn zeroed() -> Self {
        DenseCounts([0; BYTE_VALUES])
    }

    /// Counter for `value`
    pub fn get(&self, value: u8) -> u64 {
        self.0[value as usize]
    }

    /// Counters in ascending byte-value order
    pub fn as_slice(&self) -> &[u64] {
        &self.0
    }

    /// Sum of all counters
    pub fn total(&self) -> u64 {
        self.0.iter().fold(0u64, |acc, &c| acc.saturating_add(c))
    }

    /// Narrow to the 4-byte wire counters
    ///
    /// Returns the narrowed counters and how many slots had to saturate at
    /// `u32::MAX`.
    pub fn to_wire(&self) -> ([u32; BYTE_VALUES], usize) {
        let mut wire = [0u32; BYTE_VALUES];
        let mut saturated = 0;
        for (slot, &count) in wire.iter_mut().zip(self.0.iter()) {
            *slot = u32::try_from(count).unwrap_or_else(|_| {
                saturated += 1;
                u32::MAX
            });
        }
        (wire, saturated)
    }

    /// Widen counters read back from a report
    pub fn from_wire(wire: &[u32; BYTE_VALUES]) -> Self {
        let mut dense = Self::zeroed();
        for (slot, &count) in dense.0.iter_mut().zip(wire.iter()) {
            *slot = u64::from(count);
        }
        dense
    }
}

impl Default for DenseCounts {
    fn default() -> Self {
        Self::zeroed()
    }
}

// serde only derives for arrays up to 32 elements
impl Serialize for DenseCounts {
    fn serialize<S: Serializer>(&self, s: S) -> Result<S::Ok, S::Error> {
        s.collect_seq(self.0.iter())
    }
}

impl<'de> Deserialize<'de> for DenseCounts {
    fn deserialize<D: Deserializer<'de>>(d: D) -> Result<Self, D::Error> {
        let values = Vec::<u64>::deserialize(d)?;
        let len = values.len();
        let counts: [u64; BYTE_VALUES] = values
            .try_into()
            .map_err(|_| D::Error::invalid_length(len, &"256 counters"))?;
        Ok(DenseCounts(counts))
    }
}
