//! Partitioned Bloom filter: one bit array slice per hash function, giving
//! each element a uniform per-slice false-positive contribution instead of
//! a single shared bit array.

use crate::codec::SketchBytes;
use crate::codec::SketchSlice;
use crate::common::AsElementBytes;
use crate::common::BitArray;
use crate::error::Error;
use crate::hash::DEFAULT_SEED;
use crate::hash::hash_pair;
use crate::hash::index_at;

const TYPE_TAG: u8 = 2;
const SERIAL_VERSION: u8 = 1;

const DEFAULT_LOAD_FACTOR: f64 = 0.5;

/// A Bloom filter whose bit array is partitioned into `k` equal-size
/// slices, one per hash function, so each element touches exactly one bit
/// per slice.
///
/// Use [`PartitionedBloomFilter::builder`] to construct instances.
#[derive(Debug, Clone, PartialEq)]
pub struct PartitionedBloomFilter {
    seed: u64,
    slice_bits: u64,
    num_inserted: u64,
    slices: Vec<BitArray>,
}

impl PartitionedBloomFilter {
    /// Returns a builder for creating a partitioned Bloom filter.
    pub fn builder() -> PartitionedBloomFilterBuilder {
        PartitionedBloomFilterBuilder::default()
    }

    /// Tests whether an item is possibly in the set.
    pub fn contains<T: AsElementBytes + ?Sized>(&self, item: &T) -> bool {
        if self.is_empty() {
            return false;
        }
        let (h1, h2) = hash_pair(&item.as_element_bytes(), self.seed);
        self.slices
            .iter()
            .enumerate()
            .all(|(i, slice)| slice.get(index_at(h1, h2, i as u64, self.slice_bits)))
    }

    /// Inserts an item: sets one bit per slice, at the slice's `i`-th hash
    /// index.
    pub fn insert<T: AsElementBytes + ?Sized>(&mut self, item: &T) {
        let (h1, h2) = hash_pair(&item.as_element_bytes(), self.seed);
        for (i, slice) in self.slices.iter_mut().enumerate() {
            let index = index_at(h1, h2, i as u64, self.slice_bits);
            slice.set(index);
        }
        self.num_inserted += 1;
    }

    /// Resets every slice to empty, preserving shape.
    pub fn reset(&mut self) {
        for slice in &mut self.slices {
            slice.clear();
        }
        self.num_inserted = 0;
    }

    /// Merges `other` into this filter by slice-wise bitwise OR.
    ///
    /// # Panics
    ///
    /// Panics if the filters are not [`compatible`](Self::is_compatible).
    pub fn union(&mut self, other: &PartitionedBloomFilter) {
        assert!(self.is_compatible(other), "incompatible partitioned Bloom filters");
        for (mine, theirs) in self.slices.iter_mut().zip(&other.slices) {
            mine.union(theirs);
        }
        self.num_inserted = self.num_inserted.max(other.num_inserted);
    }

    /// Intersects this filter with `other` by slice-wise bitwise AND.
    ///
    /// # Panics
    ///
    /// Panics if the filters are not [`compatible`](Self::is_compatible).
    pub fn intersect(&mut self, other: &PartitionedBloomFilter) {
        assert!(self.is_compatible(other), "incompatible partitioned Bloom filters");
        for (mine, theirs) in self.slices.iter_mut().zip(&other.slices) {
            mine.intersect(theirs);
        }
    }

    /// Whether no items have been inserted.
    pub fn is_empty(&self) -> bool {
        self.num_inserted == 0
    }

    /// Number of hash functions / slices (`k`).
    pub fn num_hashes(&self) -> u16 {
        self.slices.len() as u16
    }

    /// Bits per slice (`m`).
    pub fn slice_bits(&self) -> u64 {
        self.slice_bits
    }

    /// Total bits across all slices (`M = k*m`).
    pub fn capacity(&self) -> u64 {
        self.slice_bits * self.slices.len() as u64
    }

    /// Number of elements inserted so far.
    pub fn len(&self) -> u64 {
        self.num_inserted
    }

    /// The hash seed.
    pub fn seed(&self) -> u64 {
        self.seed
    }

    /// Fraction of bits set, averaged across slices.
    pub fn load_factor(&self) -> f64 {
        let set: u64 = self.slices.iter().map(BitArray::num_set).sum();
        set as f64 / self.capacity() as f64
    }

    /// Whether two filters can be merged: same slice count, slice size,
    /// and seed.
    pub fn is_compatible(&self, other: &PartitionedBloomFilter) -> bool {
        self.slice_bits == other.slice_bits
            && self.slices.len() == other.slices.len()
            && self.seed == other.seed
    }

    /// Full-state equality.
    pub fn equals(&self, other: &PartitionedBloomFilter) -> bool {
        self == other
    }

    /// Serializes the filter to bytes.
    pub fn serialize(&self) -> Vec<u8> {
        let mut bytes = SketchBytes::with_capacity(32 + self.slices.len() * 8);
        bytes.write_u8(TYPE_TAG);
        bytes.write_u8(SERIAL_VERSION);
        bytes.write_u16_le(self.slices.len() as u16);
        bytes.write_u64_le(self.seed);
        bytes.write_u64_le(self.slice_bits);
        bytes.write_u64_le(self.num_inserted);
        for slice in &self.slices {
            for &word in slice.words() {
                bytes.write_u64_le(word);
            }
        }
        bytes.into_bytes()
    }

    /// Deserializes a filter previously produced by [`serialize`](Self::serialize).
    pub fn deserialize(bytes: &[u8]) -> Result<Self, Error> {
        let mut cursor = SketchSlice::new(bytes);
        let tag = cursor.read_u8().map_err(|_| Error::insufficient_data("tag"))?;
        if tag != TYPE_TAG {
            return Err(Error::invalid_tag(TYPE_TAG, tag, "PartitionedBloomFilter"));
        }
        let version = cursor
            .read_u8()
            .map_err(|_| Error::insufficient_data("serial_version"))?;
        if version != SERIAL_VERSION {
            return Err(Error::unsupported_serial_version(SERIAL_VERSION, version));
        }

        let num_slices = cursor
            .read_u16_le()
            .map_err(|_| Error::insufficient_data("num_slices"))?;
        let seed = cursor
            .read_u64_le()
            .map_err(|_| Error::insufficient_data("seed"))?;
        let slice_bits = cursor
            .read_u64_le()
            .map_err(|_| Error::insufficient_data("slice_bits"))?;
        let num_inserted = cursor
            .read_u64_le()
            .map_err(|_| Error::insufficient_data("num_inserted"))?;

        let num_words = slice_bits.div_ceil(64) as usize;
        let mut slices = Vec::with_capacity(num_slices as usize);
        for _ in 0..num_slices {
            let mut words = vec![0u64; num_words];
            for word in &mut words {
                *word = cursor
                    .read_u64_le()
                    .map_err(|_| Error::insufficient_data("slice_words"))?;
            }
            slices.push(BitArray::from_words(words, slice_bits));
        }

        Ok(PartitionedBloomFilter {
            seed,
            slice_bits,
            num_inserted,
            slices,
        })
    }
}

/// Builder for [`PartitionedBloomFilter`].
#[derive(Default)]
pub struct PartitionedBloomFilterBuilder {
    capacity: Option<u64>,
    error_rate: Option<f64>,
    load_factor: Option<f64>,
    seed: Option<u64>,
}

impl PartitionedBloomFilterBuilder {
    /// Target capacity (expected number of distinct elements).
    pub fn with_capacity(mut self, capacity: u64) -> Self {
        self.capacity = Some(capacity);
        self
    }

    /// Target false-positive rate `ε`.
    pub fn with_error_rate(mut self, error_rate: f64) -> Self {
        self.error_rate = Some(error_rate);
        self
    }

    /// Target per-slice load factor at capacity (default `0.5`).
    pub fn with_load_factor(mut self, load_factor: f64) -> Self {
        self.load_factor = Some(load_factor);
        self
    }

    /// Overrides the hash seed (default `0x1234567890`).
    pub fn seed(mut self, seed: u64) -> Self {
        self.seed = Some(seed);
        self
    }

    /// Builds the filter, solving `k = ceil(log2(1/eps))` and
    /// `m = ceil(-k*capacity / ln(1 - loadFactor^(1/k)))`.
    ///
    /// # Panics
    ///
    /// Panics if `with_capacity`/`with_error_rate` were not called.
    pub fn build(self) -> Result<PartitionedBloomFilter, Error> {
        let capacity = self
            .capacity
            .expect("must call with_capacity() before build()");
        let error_rate = self
            .error_rate
            .expect("must call with_error_rate() before build()");
        let load_factor = self.load_factor.unwrap_or(DEFAULT_LOAD_FACTOR);

        if capacity < 1 {
            return Err(Error::invalid_argument("capacity must be at least 1"));
        }
        if !(error_rate > 0.0 && error_rate < 1.0) {
            return Err(Error::invalid_argument(
                "error_rate must be in (0, 1) exclusive",
            ));
        }
        if !(load_factor > 0.0 && load_factor < 1.0) {
            return Err(Error::invalid_argument(
                "load_factor must be in (0, 1) exclusive",
            ));
        }

        let k = (1.0 / error_rate).log2().ceil() as u32;
        let k = k.max(1);
        let denom = (1.0 - load_factor.powf(1.0 / f64::from(k))).ln();
        let m = (-f64::from(k) * capacity as f64 / denom).ceil() as u64;
        let slice_bits = m.div_ceil(64) * 64;

        Ok(PartitionedBloomFilter {
            seed: self.seed.unwrap_or(DEFAULT_SEED),
            slice_bits: slice_bits.max(64),
            num_inserted: 0,
            slices: (0..k).map(|_| BitArray::new(slice_bits.max(64))).collect(),
        })
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn sizing_produces_expected_k() {
        let filter = PartitionedBloomFilter::builder()
            .with_capacity(1000)
            .with_error_rate(0.01)
            .build()
            .unwrap();
        assert_eq!(filter.num_hashes(), 7);
    }

    #[test]
    fn no_false_negatives() {
        let mut filter = PartitionedBloomFilter::builder()
            .with_capacity(500)
            .with_error_rate(0.01)
            .build()
            .unwrap();
        for i in 0..500u64 {
            filter.insert(&i.to_string());
        }
        for i in 0..500u64 {
            assert!(filter.contains(&i.to_string()));
        }
    }

    #[test]
    fn union_and_intersect() {
        let mut a = PartitionedBloomFilter::builder()
            .with_capacity(100)
            .with_error_rate(0.05)
            .seed(9)
            .build()
            .unwrap();
        let mut b = PartitionedBloomFilter::builder()
            .with_capacity(100)
            .with_error_rate(0.05)
            .seed(9)
            .build()
            .unwrap();
        a.insert("x");
        b.insert("y");
        a.union(&b);
        assert!(a.contains("x"));
        assert!(a.contains("y"));
    }

    #[test]
    fn serialize_round_trip() {
        let mut filter = PartitionedBloomFilter::builder()
            .with_capacity(100)
            .with_error_rate(0.05)
            .build()
            .unwrap();
        filter.insert("hello");
        let bytes = filter.serialize();
        let restored = PartitionedBloomFilter::deserialize(&bytes).unwrap();
        assert_eq!(filter, restored);
        assert!(restored.contains("hello"));
    }

    #[test]
    fn load_factor_near_target_when_full() {
        let mut filter = PartitionedBloomFilter::builder()
            .with_capacity(1000)
            .with_error_rate(0.01)
            .with_load_factor(0.5)
            .build()
            .unwrap();
        for i in 0..1000u64 {
            filter.insert(&i.to_string());
        }
        assert!((filter.load_factor() - 0.5).abs() < 0.1);
    }

    #[test]
    fn invalid_parameters_reject_cleanly() {
        assert!(
            PartitionedBloomFilter::builder()
                .with_capacity(0)
                .with_error_rate(0.01)
                .build()
                .is_err()
        );
        assert!(
            PartitionedBloomFilter::builder()
                .with_capacity(10)
                .with_error_rate(0.01)
                .with_load_factor(1.5)
                .build()
                .is_err()
        );
    }
}
