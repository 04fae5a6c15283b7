//! Cuckoo filter implementation: fixed-size buckets of fingerprints, two
//! candidate buckets per element, and a bounded eviction ("kick") loop on
//! insertion.

use crate::codec::SketchBytes;
use crate::codec::SketchSlice;
use crate::common::AsElementBytes;
use crate::common::XorShift64;
use crate::error::Error;
use crate::hash::DEFAULT_SEED;
use crate::hash::hash_pair;

const TYPE_TAG: u8 = 4;
const SERIAL_VERSION: u8 = 1;

const DEFAULT_MAX_KICKS: u32 = 500;
const EMPTY_SLOT: u32 = 0;

/// A Cuckoo filter for approximate set membership with support for
/// deletion.
///
/// Unlike the Bloom family, a Cuckoo filter's insertion path can fail —
/// once the structure is sufficiently full, `insert` may exhaust its
/// eviction budget and return
/// [`ErrorKind::CapacityExceeded`](crate::error::ErrorKind::CapacityExceeded).
/// `has` may return a false positive for *any* element sharing a
/// fingerprint with a stored one, so `remove` must only ever be called
/// for elements known to have been inserted; removing an element never
/// inserted is documented as a precondition violation, not something the
/// filter can reliably detect in general (it does detect the case where
/// the fingerprint is absent from both candidate buckets, reporting
/// [`ErrorKind::UnknownElement`](crate::error::ErrorKind::UnknownElement)).
///
/// Use [`CuckooFilter::builder`] to construct instances.
#[derive(Debug, Clone)]
pub struct CuckooFilter {
    seed: u64,
    bucket_size: u16,
    fingerprint_bits: u8,
    max_kicks: u32,
    buckets: Vec<Vec<u32>>,
    len: u64,
    rng: XorShift64,
}

impl CuckooFilter {
    /// Returns a builder for creating a Cuckoo filter.
    pub fn builder() -> CuckooFilterBuilder {
        CuckooFilterBuilder::default()
    }

    /// Tests whether an item is possibly in the set.
    pub fn contains<T: AsElementBytes + ?Sized>(&self, item: &T) -> bool {
        let bytes = item.as_element_bytes();
        let fp = self.fingerprint(&bytes);
        let i1 = self.primary_index(&bytes);
        let i2 = self.alt_index(i1, fp);
        self.buckets[i1].contains(&fp) || self.buckets[i2].contains(&fp)
    }

    /// Inserts an item.
    ///
    /// # Errors
    ///
    /// Returns [`ErrorKind::CapacityExceeded`](crate::error::ErrorKind::CapacityExceeded)
    /// if both candidate buckets are full and `MaxKicks` evictions all
    /// failed to free a slot; in that case, some other fingerprint may
    /// have been evicted and dropped from the filter as a side effect,
    /// matching the reference eviction algorithm.
    pub fn insert<T: AsElementBytes + ?Sized>(&mut self, item: &T) -> Result<(), Error> {
        let bytes = item.as_element_bytes();
        let fp = self.fingerprint(&bytes);
        let i1 = self.primary_index(&bytes);
        let i2 = self.alt_index(i1, fp);

        if self.try_place(i1, fp) || self.try_place(i2, fp) {
            self.len += 1;
            return Ok(());
        }

        let mut index = if self.rng.next_u64() % 2 == 0 { i1 } else { i2 };
        let mut victim = fp;

        for _ in 0..self.max_kicks {
            let slot = self.rng.next_below(self.bucket_size as usize);
            std::mem::swap(&mut self.buckets[index][slot], &mut victim);
            index = self.alt_index(index, victim);
            if self.try_place(index, victim) {
                self.len += 1;
                return Ok(());
            }
        }

        // The new fingerprint displaced a victim that never found a slot
        // and is dropped, so the stored count is unchanged from before
        // this call — this insertion itself never succeeded.
        Err(Error::capacity_exceeded(
            "exhausted eviction budget; filter is full",
        )
        .with_context("max_kicks", self.max_kicks))
    }

    /// Removes one occurrence of an item's fingerprint, preferring its
    /// primary bucket. Fails with
    /// [`ErrorKind::UnknownElement`](crate::error::ErrorKind::UnknownElement)
    /// if the fingerprint is absent from both candidate buckets.
    pub fn remove<T: AsElementBytes + ?Sized>(&mut self, item: &T) -> Result<(), Error> {
        let bytes = item.as_element_bytes();
        let fp = self.fingerprint(&bytes);
        let i1 = self.primary_index(&bytes);
        let i2 = self.alt_index(i1, fp);

        if Self::remove_one(&mut self.buckets[i1], fp) || Self::remove_one(&mut self.buckets[i2], fp) {
            self.len -= 1;
            Ok(())
        } else {
            Err(Error::unknown_element(
                "fingerprint not present in either candidate bucket",
            ))
        }
    }

    /// Removes every stored fingerprint, preserving shape.
    pub fn reset(&mut self) {
        for bucket in &mut self.buckets {
            bucket.fill(EMPTY_SLOT);
        }
        self.len = 0;
    }

    /// Whether no items are currently stored.
    pub fn is_empty(&self) -> bool {
        self.len == 0
    }

    /// Number of fingerprints currently stored.
    pub fn len(&self) -> u64 {
        self.len
    }

    /// Number of buckets (`b`).
    pub fn num_buckets(&self) -> u64 {
        self.buckets.len() as u64
    }

    /// Slots per bucket (`s`).
    pub fn bucket_size(&self) -> u16 {
        self.bucket_size
    }

    /// Fingerprint width in bits (`f`).
    pub fn fingerprint_bits(&self) -> u8 {
        self.fingerprint_bits
    }

    /// Maximum eviction attempts per insertion.
    pub fn max_kicks(&self) -> u32 {
        self.max_kicks
    }

    /// The hash seed.
    pub fn seed(&self) -> u64 {
        self.seed
    }

    /// Fraction of slots currently occupied.
    pub fn load_factor(&self) -> f64 {
        let total_slots = self.buckets.len() as u64 * u64::from(self.bucket_size);
        self.len as f64 / total_slots as f64
    }

    /// Serializes the filter to bytes. The PRNG's internal state is not
    /// carried across the round trip; eviction order after deserializing
    /// will differ from a filter that never serialized.
    pub fn serialize(&self) -> Vec<u8> {
        let total_slots = self.buckets.len() * self.bucket_size as usize;
        let mut bytes = SketchBytes::with_capacity(32 + total_slots * 4);
        bytes.write_u8(TYPE_TAG);
        bytes.write_u8(SERIAL_VERSION);
        bytes.write_u64_le(self.seed);
        bytes.write_u64_le(self.buckets.len() as u64);
        bytes.write_u16_le(self.bucket_size);
        bytes.write_u8(self.fingerprint_bits);
        bytes.write_u32_le(self.max_kicks);
        bytes.write_u64_le(self.len);
        for bucket in &self.buckets {
            for &slot in bucket {
                bytes.write_u32_le(slot);
            }
        }
        bytes.into_bytes()
    }

    /// Deserializes a filter previously produced by [`serialize`](Self::serialize).
    pub fn deserialize(bytes: &[u8]) -> Result<Self, Error> {
        let mut cursor = SketchSlice::new(bytes);
        let tag = cursor.read_u8().map_err(|_| Error::insufficient_data("tag"))?;
        if tag != TYPE_TAG {
            return Err(Error::invalid_tag(TYPE_TAG, tag, "CuckooFilter"));
        }
        let version = cursor
            .read_u8()
            .map_err(|_| Error::insufficient_data("serial_version"))?;
        if version != SERIAL_VERSION {
            return Err(Error::unsupported_serial_version(SERIAL_VERSION, version));
        }

        let seed = cursor
            .read_u64_le()
            .map_err(|_| Error::insufficient_data("seed"))?;
        let num_buckets = cursor
            .read_u64_le()
            .map_err(|_| Error::insufficient_data("num_buckets"))?;
        let bucket_size = cursor
            .read_u16_le()
            .map_err(|_| Error::insufficient_data("bucket_size"))?;
        let fingerprint_bits = cursor
            .read_u8()
            .map_err(|_| Error::insufficient_data("fingerprint_bits"))?;
        let max_kicks = cursor
            .read_u32_le()
            .map_err(|_| Error::insufficient_data("max_kicks"))?;
        let len = cursor
            .read_u64_le()
            .map_err(|_| Error::insufficient_data("len"))?;

        let mut buckets = Vec::with_capacity(num_buckets as usize);
        for _ in 0..num_buckets {
            let mut bucket = Vec::with_capacity(bucket_size as usize);
            for _ in 0..bucket_size {
                bucket.push(
                    cursor
                        .read_u32_le()
                        .map_err(|_| Error::insufficient_data("bucket_slot"))?,
                );
            }
            buckets.push(bucket);
        }

        Ok(CuckooFilter {
            seed,
            bucket_size,
            fingerprint_bits,
            max_kicks,
            buckets,
            len,
            rng: XorShift64::seeded(seed),
        })
    }

    fn fingerprint(&self, bytes: &[u8]) -> u32 {
        let (h1, _) = hash_pair(bytes, self.seed);
        let shift = 64 - self.fingerprint_bits;
        let fp = (h1 >> shift) as u32;
        if fp == EMPTY_SLOT { 1 } else { fp }
    }

    fn primary_index(&self, bytes: &[u8]) -> usize {
        let (h1, _) = hash_pair(bytes, self.seed);
        (h1 % self.buckets.len() as u64) as usize
    }

    fn alt_index(&self, index: usize, fp: u32) -> usize {
        let (h, _) = hash_pair(&fp.to_le_bytes(), self.seed);
        let b = self.buckets.len();
        (index ^ (h % b as u64) as usize) % b
    }

    fn try_place(&mut self, index: usize, fp: u32) -> bool {
        if let Some(slot) = self.buckets[index].iter_mut().find(|s| **s == EMPTY_SLOT) {
            *slot = fp;
            true
        } else {
            false
        }
    }

    fn remove_one(bucket: &mut [u32], fp: u32) -> bool {
        if let Some(slot) = bucket.iter_mut().find(|s| **s == fp) {
            *slot = EMPTY_SLOT;
            true
        } else {
            false
        }
    }
}

/// Builder for [`CuckooFilter`].
pub struct CuckooFilterBuilder {
    num_buckets: Option<u64>,
    bucket_size: u16,
    fingerprint_bits: u8,
    max_kicks: u32,
    seed: Option<u64>,
}

impl Default for CuckooFilterBuilder {
    fn default() -> Self {
        Self {
            num_buckets: None,
            bucket_size: 4,
            fingerprint_bits: 16,
            max_kicks: DEFAULT_MAX_KICKS,
            seed: None,
        }
    }
}

impl CuckooFilterBuilder {
    /// Number of buckets (`b`). A power of two is recommended but not
    /// required.
    pub fn with_num_buckets(mut self, num_buckets: u64) -> Self {
        self.num_buckets = Some(num_buckets);
        self
    }

    /// Slots per bucket (`s`, default 4).
    pub fn with_bucket_size(mut self, bucket_size: u16) -> Self {
        self.bucket_size = bucket_size;
        self
    }

    /// Fingerprint width in bits (`f`, default 16).
    pub fn with_fingerprint_bits(mut self, fingerprint_bits: u8) -> Self {
        self.fingerprint_bits = fingerprint_bits;
        self
    }

    /// Maximum eviction attempts per insertion (default 500).
    pub fn with_max_kicks(mut self, max_kicks: u32) -> Self {
        self.max_kicks = max_kicks;
        self
    }

    /// Overrides the hash seed (default `0x1234567890`).
    pub fn seed(mut self, seed: u64) -> Self {
        self.seed = Some(seed);
        self
    }

    /// Computes `b` and `f` from a target capacity `capacity`, slot count
    /// `bucket_size`, and false-positive rate `error_rate`, using
    /// `f >= ceil(log2(2*s/eps))`.
    pub fn with_accuracy(mut self, capacity: u64, bucket_size: u16, error_rate: f64) -> Self {
        let f = (2.0 * f64::from(bucket_size) / error_rate).log2().ceil() as u8;
        self.fingerprint_bits = f.max(1);
        self.bucket_size = bucket_size;
        let total_slots = (capacity as f64 / 0.95 / f64::from(bucket_size)).ceil() as u64;
        self.num_buckets = Some(total_slots.max(1));
        self
    }

    /// Builds the filter.
    ///
    /// # Panics
    ///
    /// Panics if `with_num_buckets`/`with_accuracy` was not called.
    pub fn build(self) -> Result<CuckooFilter, Error> {
        let num_buckets = self
            .num_buckets
            .expect("must call with_num_buckets() or with_accuracy() before build()");

        if num_buckets < 1 {
            return Err(Error::invalid_argument("num_buckets must be at least 1"));
        }
        if self.bucket_size < 1 {
            return Err(Error::invalid_argument("bucket_size must be at least 1"));
        }
        if self.fingerprint_bits < 1 || self.fingerprint_bits > 32 {
            return Err(Error::invalid_argument(
                "fingerprint_bits must be between 1 and 32",
            ));
        }

        let seed = self.seed.unwrap_or(DEFAULT_SEED);
        Ok(CuckooFilter {
            seed,
            bucket_size: self.bucket_size,
            fingerprint_bits: self.fingerprint_bits,
            max_kicks: self.max_kicks,
            buckets: vec![vec![EMPTY_SLOT; self.bucket_size as usize]; num_buckets as usize],
            len: 0,
            rng: XorShift64::seeded(seed ^ 0xC00C_00),
        })
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn concrete_scenario_alice_bob() {
        let mut filter = CuckooFilter::builder()
            .with_num_buckets(15)
            .with_bucket_size(2)
            .with_fingerprint_bits(3)
            .build()
            .unwrap();

        filter.insert("alice").unwrap();
        filter.insert("bob").unwrap();

        assert!(filter.contains("alice"));
        assert!(filter.contains("bob"));

        filter.remove("alice").unwrap();
        assert!(!filter.contains("alice"));
        assert!(filter.contains("bob"));
    }

    #[test]
    fn exhaustion_reports_capacity_exceeded() {
        let mut filter = CuckooFilter::builder()
            .with_num_buckets(15)
            .with_bucket_size(2)
            .with_fingerprint_bits(3)
            .build()
            .unwrap();

        let mut failed = false;
        let mut successes = 0u64;
        for i in 0..40u64 {
            match filter.insert(&i.to_string()) {
                Ok(()) => successes += 1,
                Err(_) => {
                    failed = true;
                    break;
                }
            }
        }
        assert!(failed, "inserting 40 items into a 30-slot filter should overflow");
        assert_eq!(filter.len(), successes);
    }

    #[test]
    fn remove_unknown_element_fails() {
        let mut filter = CuckooFilter::builder()
            .with_num_buckets(16)
            .build()
            .unwrap();
        filter.insert("alice").unwrap();
        let err = filter.remove("bob").unwrap_err();
        assert_eq!(err.kind(), crate::error::ErrorKind::UnknownElement);
    }

    #[test]
    fn serialize_round_trip() {
        let mut filter = CuckooFilter::builder()
            .with_num_buckets(32)
            .build()
            .unwrap();
        filter.insert("hello").unwrap();
        let bytes = filter.serialize();
        let restored = CuckooFilter::deserialize(&bytes).unwrap();
        assert!(restored.contains("hello"));
        assert_eq!(restored.len(), filter.len());
    }

    #[test]
    fn invalid_parameters_reject_cleanly() {
        assert!(CuckooFilter::builder().with_num_buckets(0).build().is_err());
        assert!(
            CuckooFilter::builder()
                .with_num_buckets(10)
                .with_fingerprint_bits(0)
                .build()
                .is_err()
        );
    }
}
