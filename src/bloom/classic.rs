//! Classic Bloom filter: approximate membership, no false negatives.

use crate::codec::SketchBytes;
use crate::codec::SketchSlice;
use crate::common::AsElementBytes;
use crate::common::BitArray;
use crate::error::Error;
use crate::hash::DEFAULT_SEED;
use crate::hash::hash_pair;
use crate::hash::index_at;

const TYPE_TAG: u8 = 1;
const SERIAL_VERSION: u8 = 1;

const MIN_NUM_BITS: u64 = 64;

/// A Bloom filter for probabilistic set membership testing.
///
/// No false negatives: once `insert(x)` returns, `contains(x)` is `true`
/// forever. False positives are possible, at the rate set by the builder.
///
/// Use [`BloomFilter::builder`] to construct instances.
#[derive(Debug, Clone, PartialEq)]
pub struct BloomFilter {
    seed: u64,
    num_hashes: u16,
    num_inserted: u64,
    bits: BitArray,
}

impl BloomFilter {
    /// Returns a builder for creating a Bloom filter.
    ///
    /// # Examples
    ///
    /// ```
    /// use sketchbox::bloom::classic::BloomFilter;
    ///
    /// let filter = BloomFilter::builder()
    ///     .with_accuracy(1000, 0.01)
    ///     .build()
    ///     .unwrap();
    /// ```
    pub fn builder() -> BloomFilterBuilder {
        BloomFilterBuilder::default()
    }

    /// Builds a filter sized for `capacity`/`error_rate` and populated
    /// with every item from `items` in one call.
    pub fn from_iter<T, I>(items: I, error_rate: f64) -> Result<Self, Error>
    where
        T: AsElementBytes,
        I: IntoIterator<Item = T>,
    {
        let items: Vec<T> = items.into_iter().collect();
        let mut filter = Self::builder()
            .with_accuracy(items.len().max(1) as u64, error_rate)
            .build()?;
        for item in &items {
            filter.insert(item);
        }
        Ok(filter)
    }

    /// Tests whether an item is possibly in the set.
    pub fn contains<T: AsElementBytes + ?Sized>(&self, item: &T) -> bool {
        if self.is_empty() {
            return false;
        }
        let (h1, h2) = hash_pair(&item.as_element_bytes(), self.seed);
        self.check_bits(h1, h2)
    }

    /// Inserts an item into the filter. After this, `contains(item)` is
    /// always `true`.
    pub fn insert<T: AsElementBytes + ?Sized>(&mut self, item: &T) {
        let (h1, h2) = hash_pair(&item.as_element_bytes(), self.seed);
        self.set_bits(h1, h2);
        self.num_inserted += 1;
    }

    /// Resets the filter to its initial empty state, preserving capacity.
    pub fn reset(&mut self) {
        self.bits.clear();
        self.num_inserted = 0;
    }

    /// Merges `other` into this filter via bitwise OR (set union).
    ///
    /// # Panics
    ///
    /// Panics if the filters are not [`compatible`](Self::is_compatible).
    pub fn union(&mut self, other: &BloomFilter) {
        assert!(self.is_compatible(other), "incompatible Bloom filters");
        self.bits.union(&other.bits);
        self.num_inserted = self.num_inserted.max(other.num_inserted);
    }

    /// Intersects this filter with `other` via bitwise AND.
    ///
    /// # Panics
    ///
    /// Panics if the filters are not [`compatible`](Self::is_compatible).
    pub fn intersect(&mut self, other: &BloomFilter) {
        assert!(self.is_compatible(other), "incompatible Bloom filters");
        self.bits.intersect(&other.bits);
    }

    /// Inverts every bit. The false-positive guarantees no longer hold in
    /// any well-defined way afterward; offered as a set-algebra primitive,
    /// not a membership-preserving operation.
    pub fn invert(&mut self) {
        self.bits.invert();
    }

    /// Whether no items have been inserted.
    pub fn is_empty(&self) -> bool {
        self.num_inserted == 0
    }

    /// Number of bits set to 1.
    pub fn bits_used(&self) -> u64 {
        self.bits.num_set()
    }

    /// Total number of bits in the filter (`M`).
    pub fn capacity(&self) -> u64 {
        self.bits.len_bits()
    }

    /// Number of hash functions (`k`).
    pub fn num_hashes(&self) -> u16 {
        self.num_hashes
    }

    /// Number of elements inserted so far (`n`); monotone non-decreasing.
    pub fn len(&self) -> u64 {
        self.num_inserted
    }

    /// The hash seed.
    pub fn seed(&self) -> u64 {
        self.seed
    }

    /// Current false-positive probability given the elements inserted so
    /// far: `(1 - e^{-k*n/M})^k`.
    pub fn rate(&self) -> f64 {
        let k = f64::from(self.num_hashes);
        let n = self.num_inserted as f64;
        let m = self.bits.len_bits() as f64;
        (1.0 - (-k * n / m).exp()).powf(k)
    }

    /// Whether two filters can be merged: same size, hash count, and seed.
    pub fn is_compatible(&self, other: &BloomFilter) -> bool {
        self.bits.len_bits() == other.bits.len_bits()
            && self.num_hashes == other.num_hashes
            && self.seed == other.seed
    }

    /// Full-state equality.
    pub fn equals(&self, other: &BloomFilter) -> bool {
        self == other
    }

    /// Serializes the filter to bytes.
    pub fn serialize(&self) -> Vec<u8> {
        let mut bytes = SketchBytes::with_capacity(32 + self.bits.words().len() * 8);
        bytes.write_u8(TYPE_TAG);
        bytes.write_u8(SERIAL_VERSION);
        bytes.write_u16_le(self.num_hashes);
        bytes.write_u64_le(self.seed);
        bytes.write_u64_le(self.bits.len_bits());
        bytes.write_u64_le(self.num_inserted);
        for &word in self.bits.words() {
            bytes.write_u64_le(word);
        }
        bytes.into_bytes()
    }

    /// Deserializes a filter previously produced by [`serialize`](Self::serialize).
    pub fn deserialize(bytes: &[u8]) -> Result<Self, Error> {
        let mut cursor = SketchSlice::new(bytes);
        let tag = cursor.read_u8().map_err(|_| Error::insufficient_data("tag"))?;
        if tag != TYPE_TAG {
            return Err(Error::invalid_tag(TYPE_TAG, tag, "BloomFilter"));
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
        let len_bits = cursor
            .read_u64_le()
            .map_err(|_| Error::insufficient_data("len_bits"))?;
        let num_inserted = cursor
            .read_u64_le()
            .map_err(|_| Error::insufficient_data("num_inserted"))?;

        let num_words = len_bits.div_ceil(64) as usize;
        let mut words = vec![0u64; num_words];
        for word in &mut words {
            *word = cursor
                .read_u64_le()
                .map_err(|_| Error::insufficient_data("bit_array"))?;
        }

        Ok(BloomFilter {
            seed,
            num_hashes,
            num_inserted,
            bits: BitArray::from_words(words, len_bits),
        })
    }

    fn check_bits(&self, h1: u64, h2: u64) -> bool {
        (0..u64::from(self.num_hashes))
            .all(|i| self.bits.get(index_at(h1, h2, i, self.bits.len_bits())))
    }

    fn set_bits(&mut self, h1: u64, h2: u64) {
        for i in 0..u64::from(self.num_hashes) {
            let index = index_at(h1, h2, i, self.bits.len_bits());
            self.bits.set(index);
        }
    }
}

enum Sizing {
    Accuracy { capacity: u64, error_rate: f64 },
    Size { num_bits: u64, num_hashes: u16 },
}

/// Builder for [`BloomFilter`].
#[derive(Default)]
pub struct BloomFilterBuilder {
    sizing: Option<Sizing>,
    seed: Option<u64>,
}

impl BloomFilterBuilder {
    /// Sizes the filter for `capacity` items at a target false-positive
    /// rate `error_rate`, using `M = ceil(-n*ln(eps)/(ln2)^2)`,
    /// `k = ceil((M/n)*ln2)`.
    pub fn with_accuracy(mut self, capacity: u64, error_rate: f64) -> Self {
        self.sizing = Some(Sizing::Accuracy {
            capacity,
            error_rate,
        });
        self
    }

    /// Sizes the filter manually: `num_bits` total bits, `num_hashes` hash
    /// functions.
    pub fn with_size(mut self, num_bits: u64, num_hashes: u16) -> Self {
        self.sizing = Some(Sizing::Size {
            num_bits,
            num_hashes,
        });
        self
    }

    /// Overrides the hash seed (default `0x1234567890`).
    pub fn seed(mut self, seed: u64) -> Self {
        self.seed = Some(seed);
        self
    }

    /// Builds the filter, or fails with
    /// [`ErrorKind::InvalidArgument`](crate::error::ErrorKind::InvalidArgument)
    /// if the parameters are out of range.
    ///
    /// # Panics
    ///
    /// Panics if neither `with_accuracy` nor `with_size` was called.
    pub fn build(self) -> Result<BloomFilter, Error> {
        let sizing = self
            .sizing
            .expect("must call with_accuracy() or with_size() before build()");

        let (num_bits, num_hashes) = match sizing {
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
                (num_bits, num_hashes)
            }
            Sizing::Size {
                num_bits,
                num_hashes,
            } => {
                if num_bits < 1 {
                    return Err(Error::invalid_argument("num_bits must be at least 1"));
                }
                if num_hashes < 1 {
                    return Err(Error::invalid_argument("num_hashes must be at least 1"));
                }
                (num_bits, num_hashes)
            }
        };

        Ok(BloomFilter {
            seed: self.seed.unwrap_or(DEFAULT_SEED),
            num_hashes,
            num_inserted: 0,
            bits: BitArray::new(num_bits.max(MIN_NUM_BITS)),
        })
    }
}

/// `M = ceil(-n * ln(eps) / (ln 2)^2)`, rounded up to a whole `u64` word.
pub fn suggest_num_bits(capacity: u64, error_rate: f64) -> u64 {
    let n = capacity as f64;
    let ln2_sq = std::f64::consts::LN_2 * std::f64::consts::LN_2;
    let bits = (-n * error_rate.ln() / ln2_sq).ceil() as u64;
    bits.div_ceil(64) * 64
}

/// `k = ceil((M/n) * ln 2)`, clamped to at least 1.
pub fn suggest_num_hashes(capacity: u64, num_bits: u64) -> u16 {
    let m = num_bits as f64;
    let n = capacity as f64;
    let k = (m / n * std::f64::consts::LN_2).ceil();
    (k as u16).max(1)
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn sizing_for_1000_items_at_1_percent() {
        let filter = BloomFilter::builder()
            .with_accuracy(1000, 0.01)
            .build()
            .unwrap();
        assert!(filter.capacity() >= 9000);
        assert!(filter.is_empty());
    }

    #[test]
    fn with_size_manual() {
        let filter = BloomFilter::builder().with_size(1024, 5).build().unwrap();
        assert_eq!(filter.capacity(), 1024);
        assert_eq!(filter.num_hashes(), 5);
    }

    #[test]
    fn no_false_negatives() {
        let mut filter = BloomFilter::builder()
            .with_accuracy(1000, 0.01)
            .build()
            .unwrap();
        for i in 0..1000u64 {
            filter.insert(&i.to_string());
        }
        for i in 0..1000u64 {
            assert!(filter.contains(&i.to_string()));
        }
        assert!(filter.rate() <= 0.02);
    }

    #[test]
    fn concrete_scenario_thousand_integers_rate_check() {
        let mut filter = BloomFilter::builder()
            .with_accuracy(1000, 0.01)
            .build()
            .unwrap();
        for i in 1..=1000u64 {
            filter.insert(&i.to_string());
        }
        assert!(filter.contains("500"));
        assert!(filter.rate() <= 0.02);
    }

    #[test]
    fn reset_clears_state() {
        let mut filter = BloomFilter::builder()
            .with_accuracy(100, 0.01)
            .build()
            .unwrap();
        filter.insert("test");
        assert!(!filter.is_empty());
        filter.reset();
        assert!(filter.is_empty());
        assert!(!filter.contains("test"));
    }

    #[test]
    fn union_and_intersect() {
        let mut a = BloomFilter::builder()
            .with_accuracy(100, 0.01)
            .seed(123)
            .build()
            .unwrap();
        let mut b = BloomFilter::builder()
            .with_accuracy(100, 0.01)
            .seed(123)
            .build()
            .unwrap();
        a.insert("x");
        b.insert("y");
        a.union(&b);
        assert!(a.contains("x"));
        assert!(a.contains("y"));

        let mut c = BloomFilter::builder()
            .with_accuracy(100, 0.01)
            .seed(123)
            .build()
            .unwrap();
        c.insert("y");
        a.intersect(&c);
        assert!(a.contains("y"));
    }

    #[test]
    fn serialize_round_trip() {
        let mut filter = BloomFilter::builder()
            .with_accuracy(100, 0.01)
            .build()
            .unwrap();
        filter.insert("test");
        filter.insert(42u64);

        let bytes = filter.serialize();
        let restored = BloomFilter::deserialize(&bytes).unwrap();

        assert_eq!(filter, restored);
        assert!(restored.contains("test"));
        assert!(restored.contains(42u64));
    }

    #[test]
    fn deserialize_rejects_wrong_tag() {
        let mut bytes = BloomFilter::builder()
            .with_accuracy(10, 0.1)
            .build()
            .unwrap()
            .serialize();
        bytes[0] = 0xff;
        let err = BloomFilter::deserialize(&bytes).unwrap_err();
        assert_eq!(err.kind(), crate::error::ErrorKind::MalformedDeserializeData);
    }

    #[test]
    fn invalid_parameters_reject_cleanly() {
        assert!(BloomFilter::builder().with_accuracy(0, 0.01).build().is_err());
        assert!(BloomFilter::builder().with_accuracy(10, 1.5).build().is_err());
    }

    #[test]
    fn seed_sensitivity() {
        let mut a = BloomFilter::builder()
            .with_accuracy(1000, 0.01)
            .seed(1)
            .build()
            .unwrap();
        let mut b = BloomFilter::builder()
            .with_accuracy(1000, 0.01)
            .seed(2)
            .build()
            .unwrap();
        for i in 0..1000u64 {
            a.insert(&i.to_string());
            b.insert(&i.to_string());
        }
        let disagreement = (1000..11_000u64)
            .filter(|i| a.contains(&i.to_string()) != b.contains(&i.to_string()))
            .count();
        assert!(disagreement > 0);
    }
}
