//! Count-Min sketch implementation: a `d x w` matrix of counters, one row
//! per hash function.

use crate::codec::SketchBytes;
use crate::codec::SketchSlice;
use crate::common::AsElementBytes;
use crate::error::Error;
use crate::hash::DEFAULT_SEED;
use crate::hash::hash_pair;
use crate::hash::index_at;

const TYPE_TAG: u8 = 5;
const SERIAL_VERSION: u8 = 1;

/// A Count-Min sketch for approximate frequency estimation.
///
/// `count(x)` never underestimates the true frequency as long as every
/// update used a nonnegative weight; negative weights (via
/// [`decrement`](Self::decrement)) trade that guarantee away.
///
/// Use [`CountMinSketch::builder`] to construct instances.
#[derive(Debug, Clone, PartialEq)]
pub struct CountMinSketch {
    seed: u64,
    width: u64,
    depth: u32,
    total: i64,
    rows: Vec<Vec<i64>>,
}

impl CountMinSketch {
    /// Returns a builder for creating a Count-Min sketch.
    pub fn builder() -> CountMinSketchBuilder {
        CountMinSketchBuilder::default()
    }

    /// Adds 1 to an item's estimated frequency.
    pub fn update<T: AsElementBytes + ?Sized>(&mut self, item: &T) {
        self.update_by(item, 1);
    }

    /// Adds `weight` to an item's estimated frequency. `weight` may be
    /// negative, but doing so invalidates the `true <= estimate`
    /// guarantee for every item sharing a cell with this one; prefer
    /// [`decrement`](Self::decrement) when that trade-off is intended, so
    /// it reads as a deliberate choice at the call site.
    pub fn update_by<T: AsElementBytes + ?Sized>(&mut self, item: &T, weight: i64) {
        let bytes = item.as_element_bytes();
        let (h1, h2) = hash_pair(&bytes, self.seed);
        for (row, counters) in self.rows.iter_mut().enumerate() {
            let index = index_at(h1, h2, row as u64, self.width) as usize;
            counters[index] += weight;
        }
        self.total += weight;
    }

    /// Subtracts 1 from an item's estimated frequency. This invalidates
    /// the one-sided error guarantee for the sketch going forward.
    pub fn decrement<T: AsElementBytes + ?Sized>(&mut self, item: &T) {
        self.update_by(item, -1);
    }

    /// Estimated frequency of an item: the minimum across all rows'
    /// counters for it.
    pub fn count<T: AsElementBytes + ?Sized>(&self, item: &T) -> i64 {
        let bytes = item.as_element_bytes();
        let (h1, h2) = hash_pair(&bytes, self.seed);
        self.rows
            .iter()
            .enumerate()
            .map(|(row, counters)| {
                let index = index_at(h1, h2, row as u64, self.width) as usize;
                counters[index]
            })
            .min()
            .unwrap_or(0)
    }

    /// Merges `other` into this sketch by element-wise sum, if their
    /// shapes match.
    ///
    /// # Errors
    ///
    /// Returns [`ErrorKind::IncompatibleShape`](crate::error::ErrorKind::IncompatibleShape)
    /// if `width`, `depth`, or `seed` differ.
    pub fn merge(&mut self, other: &CountMinSketch) -> Result<(), Error> {
        if !self.is_compatible(other) {
            return Err(Error::incompatible_shape(
                "sketches must share width, depth, and seed to merge",
            ));
        }
        for (mine, theirs) in self.rows.iter_mut().zip(&other.rows) {
            for (cell, other_cell) in mine.iter_mut().zip(theirs) {
                *cell += other_cell;
            }
        }
        self.total += other.total;
        Ok(())
    }

    /// Total weight added across every update (`N`), which may be
    /// negative if [`decrement`](Self::decrement) was used more than the
    /// matching increments.
    pub fn total(&self) -> i64 {
        self.total
    }

    /// Sketch width (`w`, counters per row).
    pub fn width(&self) -> u64 {
        self.width
    }

    /// Sketch depth (`d`, number of rows).
    pub fn depth(&self) -> u32 {
        self.depth
    }

    /// The hash seed.
    pub fn seed(&self) -> u64 {
        self.seed
    }

    /// Whether two sketches can be merged: same width, depth, and seed.
    pub fn is_compatible(&self, other: &CountMinSketch) -> bool {
        self.width == other.width && self.depth == other.depth && self.seed == other.seed
    }

    /// Serializes the sketch to bytes.
    pub fn serialize(&self) -> Vec<u8> {
        let cells = self.depth as usize * self.width as usize;
        let mut bytes = SketchBytes::with_capacity(40 + cells * 8);
        bytes.write_u8(TYPE_TAG);
        bytes.write_u8(SERIAL_VERSION);
        bytes.write_u64_le(self.seed);
        bytes.write_u64_le(self.width);
        bytes.write_u32_le(self.depth);
        bytes.write_i32_le(0); // reserved, keeps the header word-aligned
        bytes.write_u64_le(self.total as u64);
        for row in &self.rows {
            for &cell in row {
                bytes.write_u64_le(cell as u64);
            }
        }
        bytes.into_bytes()
    }

    /// Deserializes a sketch previously produced by [`serialize`](Self::serialize).
    pub fn deserialize(bytes: &[u8]) -> Result<Self, Error> {
        let mut cursor = SketchSlice::new(bytes);
        let tag = cursor.read_u8().map_err(|_| Error::insufficient_data("tag"))?;
        if tag != TYPE_TAG {
            return Err(Error::invalid_tag(TYPE_TAG, tag, "CountMinSketch"));
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
        let width = cursor
            .read_u64_le()
            .map_err(|_| Error::insufficient_data("width"))?;
        let depth = cursor
            .read_u32_le()
            .map_err(|_| Error::insufficient_data("depth"))?;
        cursor
            .read_i32_le()
            .map_err(|_| Error::insufficient_data("reserved"))?;
        let total = cursor
            .read_u64_le()
            .map_err(|_| Error::insufficient_data("total"))? as i64;

        let mut rows = Vec::with_capacity(depth as usize);
        for _ in 0..depth {
            let mut row = Vec::with_capacity(width as usize);
            for _ in 0..width {
                let cell = cursor
                    .read_u64_le()
                    .map_err(|_| Error::insufficient_data("cell"))? as i64;
                row.push(cell);
            }
            rows.push(row);
        }

        Ok(CountMinSketch {
            seed,
            width,
            depth,
            total,
            rows,
        })
    }
}

/// Builder for [`CountMinSketch`].
#[derive(Default)]
pub struct CountMinSketchBuilder {
    error_rate: Option<f64>,
    confidence: Option<f64>,
    seed: Option<u64>,
}

impl CountMinSketchBuilder {
    /// Target additive error `ε` as a fraction of the total weight
    /// inserted; determines the width `w = ceil(e/eps)`.
    pub fn with_error_rate(mut self, error_rate: f64) -> Self {
        self.error_rate = Some(error_rate);
        self
    }

    /// Target failure probability `δ`; determines the depth
    /// `d = ceil(ln(1/delta))`.
    pub fn with_confidence(mut self, confidence: f64) -> Self {
        self.confidence = Some(confidence);
        self
    }

    /// Overrides the hash seed (default `0x1234567890`).
    pub fn seed(mut self, seed: u64) -> Self {
        self.seed = Some(seed);
        self
    }

    /// Builds the sketch.
    ///
    /// # Panics
    ///
    /// Panics if `with_error_rate`/`with_confidence` were not called.
    pub fn build(self) -> Result<CountMinSketch, Error> {
        let error_rate = self
            .error_rate
            .expect("must call with_error_rate() before build()");
        let confidence = self
            .confidence
            .expect("must call with_confidence() before build()");

        if !(error_rate > 0.0 && error_rate < 1.0) {
            return Err(Error::invalid_argument(
                "error_rate must be in (0, 1) exclusive",
            ));
        }
        if !(confidence > 0.0 && confidence < 1.0) {
            return Err(Error::invalid_argument(
                "confidence must be in (0, 1) exclusive",
            ));
        }

        let width = (std::f64::consts::E / error_rate).ceil() as u64;
        let depth = (1.0 / confidence).ln().ceil() as u32;
        let width = width.max(1);
        let depth = depth.max(1);

        Ok(CountMinSketch {
            seed: self.seed.unwrap_or(DEFAULT_SEED),
            width,
            depth,
            total: 0,
            rows: vec![vec![0i64; width as usize]; depth as usize],
        })
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn concrete_scenario_alice_bob_daniel() {
        let mut sketch = CountMinSketch::builder()
            .with_error_rate(0.001)
            .with_confidence(0.01)
            .build()
            .unwrap();

        for _ in 0..5 {
            sketch.update("alice");
        }
        for _ in 0..3 {
            sketch.update("bob");
        }
        sketch.update("daniel");

        assert!(sketch.count("alice") >= 5);
        assert!(sketch.count("bob") >= 3);
        assert!(sketch.count("daniel") >= 1);
        assert_eq!(sketch.total(), 9);
    }

    #[test]
    fn never_undercounts() {
        let mut sketch = CountMinSketch::builder()
            .with_error_rate(0.01)
            .with_confidence(0.01)
            .build()
            .unwrap();
        for i in 0..200u64 {
            sketch.update(&i.to_string());
        }
        for i in 0..200u64 {
            assert!(sketch.count(&i.to_string()) >= 1);
        }
    }

    #[test]
    fn merge_requires_compatible_shape() {
        let mut a = CountMinSketch::builder()
            .with_error_rate(0.01)
            .with_confidence(0.01)
            .build()
            .unwrap();
        let b = CountMinSketch::builder()
            .with_error_rate(0.05)
            .with_confidence(0.01)
            .build()
            .unwrap();
        let err = a.merge(&b).unwrap_err();
        assert_eq!(err.kind(), crate::error::ErrorKind::IncompatibleShape);
    }

    #[test]
    fn merge_sums_counts() {
        let mut a = CountMinSketch::builder()
            .with_error_rate(0.01)
            .with_confidence(0.01)
            .seed(5)
            .build()
            .unwrap();
        let mut b = CountMinSketch::builder()
            .with_error_rate(0.01)
            .with_confidence(0.01)
            .seed(5)
            .build()
            .unwrap();
        a.update("x");
        b.update("x");
        a.merge(&b).unwrap();
        assert!(a.count("x") >= 2);
        assert_eq!(a.total(), 2);
    }

    #[test]
    fn serialize_round_trip() {
        let mut sketch = CountMinSketch::builder()
            .with_error_rate(0.01)
            .with_confidence(0.01)
            .build()
            .unwrap();
        sketch.update("hello");
        let bytes = sketch.serialize();
        let restored = CountMinSketch::deserialize(&bytes).unwrap();
        assert_eq!(sketch, restored);
    }
}
