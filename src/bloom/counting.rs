//! Counting Bloom filter: like the classic filter, but each position is a
//! saturating counter instead of a single bit, so elements can be removed.

use crate::codec::SketchBytes;
use crate::codec::SketchSlice;
use crate::common::AsElementBytes;
use crate::common::CounterArray;
use crate::error::Error;
use crate::hash::DEFAULT_SEED;
use crate::hash::hash_pair;
use crate::hash::index_at;

use super::classic::suggest_num_bits;
use super::classic::suggest_num_hashes;

const TYPE_TAG: u8 = 3;
const SERIAL_VERSION: u8 = 1;

const MIN_NUM_COUNTERS: u64 = 64;

/// A Bloom filter backed by saturating counters, supporting `remove` in
/// addition to `insert`/`contains`.
///
/// Use [`CountingBloomFilter::builder`] to construct instances.
#[derive(Debug, Clone, PartialEq)]
pub struct CountingBloomFilter {
    seed: u64,
    num_hashes: u16,
    num_inserted: u64,
    counters: CounterArray,
}

impl CountingBloomFilter {
    /// Returns a builder for creating a counting Bloom filter.
    pub fn builder() -> CountingBloomFilterBuilder {
        CountingBloomFilterBuilder::default()
    }

    /// Tests whether an item is possibly in the set: every one of its `k`
    /// counters must be nonzero.
    pub fn contains<T: AsElementBytes + ?Sized>(&self, item: &T) -> bool {
        if self.is_empty() {
            return false;
        }
        let (h1, h2) = hash_pair(&item.as_element_bytes(), self.seed);
        self.indices(h1, h2).all(|i| self.counters.get(i) > 0)
    }

    /// Inserts an item, incrementing each of its `k` counters (saturating
    /// at `counterMax`).
    pub fn insert<T: AsElementBytes + ?Sized>(&mut self, item: &T) {
        let (h1, h2) = hash_pair(&item.as_element_bytes(), self.seed);
        let indices: Vec<u64> = self.indices(h1, h2).collect();
        for i in indices {
            self.counters.increment(i);
        }
        self.num_inserted += 1;
    }

    /// Removes an item: decrements each of its `k` counters, but only if
    /// every one of them is currently nonzero. If any counter is already
    /// zero, the call fails with
    /// [`ErrorKind::UnknownElement`](crate::error::ErrorKind::UnknownElement)
    /// and mutates nothing.
    pub fn remove<T: AsElementBytes + ?Sized>(&mut self, item: &T) -> Result<(), Error> {
        let (h1, h2) = hash_pair(&item.as_element_bytes(), self.seed);
        let indices: Vec<u64> = self.indices(h1, h2).collect();
        if indices.iter().any(|&i| self.counters.get(i) == 0) {
            return Err(Error::unknown_element(
                "item has a zero counter; it was never inserted (or was already removed)",
            ));
        }
        for i in indices {
            self.counters.decrement(i);
        }
        self.num_inserted = self.num_inserted.saturating_sub(1);
        Ok(())
    }

    /// Resets every counter to zero, preserving shape.
    pub fn reset(&mut self) {
        self.counters.clear();
        self.num_inserted = 0;
    }

    /// Whether no items have been inserted.
    pub fn is_empty(&self) -> bool {
        self.num_inserted == 0
    }

    /// Number of counters (`M`).
    pub fn capacity(&self) -> u64 {
        self.counters.len() as u64
    }

    /// Number of hash functions (`k`).
    pub fn num_hashes(&self) -> u16 {
        self.num_hashes
    }

    /// Number of elements currently tracked (increments minus completed
    /// removals).
    pub fn len(&self) -> u64 {
        self.num_inserted
    }

    /// The hash seed.
    pub fn seed(&self) -> u64 {
        self.seed
    }

    /// Whether two filters can be merged: same size, hash count, and seed.
    pub fn is_compatible(&self, other: &CountingBloomFilter) -> bool {
        self.counters.len() == other.counters.len()
            && self.num_hashes == other.num_hashes
            && self.seed == other.seed
    }

    /// Full-state equality.
    pub fn equals(&self, other: &CountingBloomFilter) -> bool {
        self == other
    }

    /// Serializes the filter to bytes.
    pub fn serialize(&self) -> Vec<u8> {
        let mut bytes = SketchBytes::with_capacity(32 + self.counters.len() as usize);
        bytes.write_u8(TYPE_TAG);
        bytes.write_u8(SERIAL_VERSION);
        bytes.write_u16_le(self.num_hashes);
        bytes.write_u64_le(self.seed);
        bytes.write_u64_le(self.counters.len() as u64);
        bytes.write_u64_le(self.num_inserted);
        bytes.write(self.counters.as_slice());
        bytes.into_bytes()
    }

    /// Deserializes a filter previously produced by [`serialize`](Self::serialize).
    pub fn deserialize(bytes: &[u8]) -> Result<Self, Error> {
        let mut cursor = SketchSlice::new(bytes);
        let tag = cursor.read_u8().map_err(|_| Error::insufficient_data("tag"))?;
        if tag != TYPE_TAG {
            return Err(Error::invalid_tag(TYPE_TAG, tag, "CountingBloomFilter"));
        }
        let version = cursor
            .read_u8()
            .map_err(|_| Error::insufficient_data("serial_version"))?;
        if version != SERIAL_VERSION {
            return Err(Error::unsupported_serial_version(SERIAL_VERSION, version));
        }

        let num_hashes = cursor
            .read_u16_le()
            .map_err(|_| Error::insufficient_data("num_hashes"))?;
        let seed = cursor
            .read_u64_le()
            .map_err(|_| Error::insufficient_data("seed"))?;
        let num_counters = cursor
            .read_u64_le()
            .map_err(|_| Error::insufficient_data("num_counters"))?;
        let num_inserted = cursor
            .read_u64_le()
            .map_err(|_| Error::insufficient_data("num_inserted"))?;
        let counters = cursor
            .read_vec(num_counters as usize)
            .map_err(|_| Error::insufficient_data("counters"))?;

        Ok(CountingBloomFilter {
            seed,
            num_hashes,
            num_inserted,
            counters: CounterArray::from_vec(counters),
        })
    }

    fn indices(&self, h1: u64, h2: u64) -> impl Iterator<Item = u64> + '_ {
        let range = self.counters.len();
        (0..u64::from(self.num_hashes)).map(move |i| index_at(h1, h2, i, range))
    }
}

enum Sizing {
    Accuracy { capacity: u64, error_rate: f64 },
    Size { num_counters: u64, num_hashes: u16 },
}

/// Builder for [`CountingBloomFilter`].
#[derive(Default)]
pub struct CountingBloomFilterBuilder {
    sizing: Option<Sizing>,
    seed: Option<u64>,
}

impl CountingBloomFilterBuilder {
    /// Sizes the filter for `capacity` items at a target false-positive
    /// rate `error_rate`, using the same `M`/`k` formulas as the classic
    /// filter.
    pub fn with_accuracy(mut self, capacity: u64, error_rate: f64) -> Self {
        self.sizing = Some(Sizing::Accuracy {
            capacity,
            error_rate,
        });
        self
    }

    /// Sizes the filter manually: `num_counters` total counters,
    /// `num_hashes` hash functions.
    pub fn with_size(mut self, num_counters: u64, num_hashes: u16) -> Self {
        self.sizing = Some(Sizing::Size {
            num_counters,
            num_hashes,
        });
        self
    }

    /// Overrides the hash seed (default `0x1234567890`).
    pub fn seed(mut self, seed: u64) -> Self {
        self.seed = Some(seed);
        self
    }

    /// Builds the filter.
    ///
    /// # Panics
    ///
    /// Panics if neither `with_accuracy` nor `with_size` was called.
    pub fn build(self) -> Result<CountingBloomFilter, Error> {
        let sizing = self
            .sizing
            .expect("must call with_accuracy() or with_size() before build()");

        let (num_counters, num_hashes) = match sizing {
            Sizing::Accuracy {
                capacity,
                error_rate,
            } => {
                if capacity < 1 {
                    return Err(Error::invalid_argument("capacity must be at least 1"));
                }
                if !(error_rate > 0.0 && error_rate < 1.0) {
                    return Err(Error::invalid_argument(
                        "error_rate must be in (0, 1) exclusive",
                    ));
                }
                let num_bits = suggest_num_bits(capacity, error_rate);
                let num_hashes = suggest_num_hashes(capacity, num_bits);
                (num_bits.max(MIN_NUM_COUNTERS), num_hashes)
            }
            Sizing::Size {
                num_counters,
                num_hashes,
            } => {
                if num_counters < 1 {
                    return Err(Error::invalid_argument("num_counters must be at least 1"));
                }
                if num_hashes < 1 {
                    return Err(Error::invalid_argument("num_hashes must be at least 1"));
                }
                (num_counters, num_hashes)
            }
        };

        Ok(CountingBloomFilter {
            seed: self.seed.unwrap_or(DEFAULT_SEED),
            num_hashes,
            num_inserted: 0,
            counters: CounterArray::new(num_counters),
        })
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn concrete_scenario_alice_bob_carole() {
        let mut filter = CountingBloomFilterBuilder::default()
            .with_size(15, 4)
            .build()
            .unwrap();
        filter.insert("alice");
        filter.insert("bob");
        filter.insert("carole");

        assert!(filter.contains("alice"));
        assert!(filter.contains("bob"));
        assert!(filter.contains("carole"));

        filter.remove("bob").unwrap();
        assert!(!filter.contains("bob"));
        assert!(filter.contains("alice"));
        assert!(filter.contains("carole"));
    }

    #[test]
    fn remove_unknown_element_fails_without_mutating() {
        let mut filter = CountingBloomFilterBuilder::default()
            .with_size(32, 3)
            .build()
            .unwrap();
        filter.insert("alice");
        let before = filter.clone();

        let err = filter.remove("bob").unwrap_err();
        assert_eq!(err.kind(), crate::error::ErrorKind::UnknownElement);
        assert_eq!(filter, before);
    }

    #[test]
    fn counters_saturate_instead_of_wrapping() {
        let mut filter = CountingBloomFilterBuilder::default()
            .with_size(8, 1)
            .build()
            .unwrap();
        for _ in 0..1000 {
            filter.insert("x");
        }
        assert!(filter.contains("x"));
    }

    #[test]
    fn serialize_round_trip() {
        let mut filter = CountingBloomFilterBuilder::default()
            .with_accuracy(100, 0.01)
            .build()
            .unwrap();
        filter.insert("hello");
        let bytes = filter.serialize();
        let restored = CountingBloomFilter::deserialize(&bytes).unwrap();
        assert_eq!(filter, restored);
        assert!(restored.contains("hello"));
    }

    #[test]
    fn invalid_parameters_reject_cleanly() {
        assert!(
            CountingBloomFilterBuilder::default()
                .with_accuracy(0, 0.01)
                .build()
                .is_err()
        );
    }
}
