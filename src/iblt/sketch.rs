//! Invertible Bloom Lookup Table implementation: `m` cells, each an XOR
//! accumulator of the elements hashed to it, decodable by peeling pure
//! cells until none remain.

use crate::codec::SketchBytes;
use crate::codec::SketchSlice;
use crate::error::Error;
use crate::hash::DEFAULT_SEED;
use crate::hash::check_hash32;
use crate::hash::distinct_indices;

const TYPE_TAG: u8 = 6;
const SERIAL_VERSION: u8 = 1;

#[derive(Debug, Clone, PartialEq)]
struct Cell {
    count: i32,
    id_sum: Vec<u8>,
    hash_sum: u32,
}

impl Cell {
    fn empty(element_length: usize) -> Self {
        Self {
            count: 0,
            id_sum: vec![0u8; element_length],
            hash_sum: 0,
        }
    }

    fn is_all_zero(&self) -> bool {
        self.count == 0 && self.hash_sum == 0 && self.id_sum.iter().all(|&b| b == 0)
    }

    fn is_pure(&self, seed: u64) -> bool {
        (self.count == 1 || self.count == -1) && check_hash32(&self.id_sum, seed) == self.hash_sum
    }

    fn xor_element(&mut self, bytes: &[u8], check_hash: u32, delta: i32) {
        self.count += delta;
        for (slot, b) in self.id_sum.iter_mut().zip(bytes) {
            *slot ^= b;
        }
        self.hash_sum ^= check_hash;
    }
}

/// Outcome of [`Iblt::has`].
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Membership {
    /// The element is definitely present.
    Present,
    /// The element is definitely absent.
    Absent,
    /// The element may or may not be present; the sketch cannot tell.
    Maybe,
}

/// Result of [`Iblt::decode`]: the elements found on each side of the
/// symmetric difference, and whether every cell fully resolved to zero.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct DecodeResult {
    /// Elements present in this side but not the other (`count == +1`
    /// cells peeled).
    pub additional: Vec<Vec<u8>>,
    /// Elements present in the other side but not this one (`count ==
    /// -1` cells peeled).
    pub missing: Vec<Vec<u8>>,
    /// Whether every cell peeled down to all-zero. If `false`, the
    /// symmetric difference was larger than this sketch could recover
    /// and `additional`/`missing` are a partial result.
    pub complete: bool,
}

/// Result of [`Iblt::list_entries`]: every element peeled off the
/// structure, regardless of the sign it was peeled with.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ListResult {
    /// Whether peeling fully emptied the structure.
    pub success: bool,
    /// Elements recovered, in peel order.
    pub entries: Vec<Vec<u8>>,
}

/// An Invertible Bloom Lookup Table.
///
/// Every element `add`ed or `delete`d must be exactly
/// [`element_length`](Self::element_length) bytes long; the sketch
/// enforces this at every mutating call.
///
/// Use [`Iblt::builder`] to construct instances.
#[derive(Debug, Clone, PartialEq)]
pub struct Iblt {
    seed: u64,
    num_hashes: u32,
    element_length: usize,
    cells: Vec<Cell>,
}

impl Iblt {
    /// Returns a builder for creating an IBLT.
    pub fn builder() -> IbltBuilder {
        IbltBuilder::default()
    }

    /// Inserts an element: increments `count` and XORs the element's
    /// bytes and check hash into each of its `k` cells.
    ///
    /// # Errors
    ///
    /// Returns [`ErrorKind::InvalidArgument`](crate::error::ErrorKind::InvalidArgument)
    /// if `element` is not [`element_length`](Self::element_length) bytes
    /// long.
    pub fn add(&mut self, element: &[u8]) -> Result<(), Error> {
        self.mutate(element, 1)
    }

    /// Removes an element: decrements `count` and XORs the element's
    /// bytes and check hash into each of its `k` cells (the same XOR
    /// operation as `add` — only `count`'s sign differs).
    ///
    /// # Errors
    ///
    /// Returns [`ErrorKind::InvalidArgument`](crate::error::ErrorKind::InvalidArgument)
    /// if `element` is not [`element_length`](Self::element_length) bytes
    /// long.
    pub fn delete(&mut self, element: &[u8]) -> Result<(), Error> {
        self.mutate(element, -1)
    }

    /// Tests whether `element` is present.
    ///
    /// Returns [`Membership::Maybe`] rather than failing outright if
    /// `element` is the wrong length, since that can only mean "never
    /// inserted here".
    pub fn has(&self, element: &[u8]) -> Membership {
        if element.len() != self.element_length {
            return Membership::Absent;
        }
        let Ok(indices) = self.indices_for(element) else {
            return Membership::Absent;
        };
        let check_hash = check_hash32(element, self.seed);

        if indices
            .iter()
            .all(|&i| self.cells[i as usize].is_all_zero())
        {
            return Membership::Absent;
        }

        let pure_match = indices.iter().any(|&i| {
            let cell = &self.cells[i as usize];
            cell.is_pure(self.seed) && cell.id_sum == element && cell.hash_sum == check_hash
        });
        if pure_match {
            return Membership::Present;
        }

        if indices.iter().any(|&i| self.cells[i as usize].count == 0) {
            return Membership::Absent;
        }

        Membership::Maybe
    }

    /// Computes the cell-wise difference `self - remote`: `count`
    /// subtracts, `idSum`/`hashSum` XOR. The result is not a valid IBLT
    /// on its own (it represents a difference, not a set) — call
    /// [`decode`](Self::decode) on it to recover the symmetric
    /// difference.
    ///
    /// # Errors
    ///
    /// Returns [`ErrorKind::IncompatibleShape`](crate::error::ErrorKind::IncompatibleShape)
    /// if `m`, `k`, `seed`, or `element_length` differ.
    pub fn subtract(&self, remote: &Iblt) -> Result<Iblt, Error> {
        if !self.is_compatible(remote) {
            return Err(Error::incompatible_shape(
                "IBLTs must share cell count, hash count, seed, and element length to subtract",
            ));
        }

        let cells = self
            .cells
            .iter()
            .zip(&remote.cells)
            .map(|(mine, theirs)| Cell {
                count: mine.count - theirs.count,
                id_sum: mine
                    .id_sum
                    .iter()
                    .zip(&theirs.id_sum)
                    .map(|(a, b)| a ^ b)
                    .collect(),
                hash_sum: mine.hash_sum ^ theirs.hash_sum,
            })
            .collect();

        Ok(Iblt {
            seed: self.seed,
            num_hashes: self.num_hashes,
            element_length: self.element_length,
            cells,
        })
    }

    /// Decodes this structure (typically the result of a
    /// [`subtract`](Self::subtract)) into the two sides of a symmetric
    /// difference, by repeatedly peeling pure cells.
    ///
    /// Decoding never fails outright: if the true difference is larger
    /// than this sketch can recover, [`DecodeResult::complete`] is
    /// `false` and `additional`/`missing` hold whatever was peeled before
    /// peeling got stuck.
    pub fn decode(&self) -> DecodeResult {
        let mut cells = self.cells.clone();
        let mut additional = Vec::new();
        let mut missing = Vec::new();

        while let Some(index) = find_pure(&cells, self.seed) {
            let element = cells[index].id_sum.clone();
            let sign = cells[index].count;
            if sign > 0 {
                additional.push(element.clone());
            } else {
                missing.push(element.clone());
            }
            let indices = self.indices_for(&element).unwrap_or_default();
            peel_out(&mut cells, &indices, &element, sign, self.seed);
        }

        let complete = cells.iter().all(Cell::is_all_zero);
        DecodeResult {
            additional,
            missing,
            complete,
        }
    }

    /// Lists every element currently stored, by running the same peeling
    /// loop as [`decode`](Self::decode) directly against this structure
    /// (meaningful when it was built from `add` calls only, with no
    /// `subtract`).
    pub fn list_entries(&self) -> ListResult {
        let result = self.decode();
        let mut entries = result.additional;
        entries.extend(result.missing);
        ListResult {
            success: result.complete,
            entries,
        }
    }

    /// Number of cells (`m`).
    pub fn num_cells(&self) -> u64 {
        self.cells.len() as u64
    }

    /// Number of hash functions (`k`).
    pub fn num_hashes(&self) -> u32 {
        self.num_hashes
    }

    /// Required element length in bytes (`L`).
    pub fn element_length(&self) -> usize {
        self.element_length
    }

    /// The hash seed.
    pub fn seed(&self) -> u64 {
        self.seed
    }

    /// Whether two IBLTs share a shape (`m`, `k`, `seed`, `L`) and can be
    /// subtracted.
    pub fn is_compatible(&self, other: &Iblt) -> bool {
        self.cells.len() == other.cells.len()
            && self.num_hashes == other.num_hashes
            && self.seed == other.seed
            && self.element_length == other.element_length
    }

    /// Full-state equality.
    pub fn equals(&self, other: &Iblt) -> bool {
        self == other
    }

    /// Serializes the structure to bytes.
    pub fn serialize(&self) -> Vec<u8> {
        let cell_size = 4 + self.element_length + 4;
        let mut bytes = SketchBytes::with_capacity(40 + self.cells.len() * cell_size);
        bytes.write_u8(TYPE_TAG);
        bytes.write_u8(SERIAL_VERSION);
        bytes.write_u64_le(self.seed);
        bytes.write_u64_le(self.cells.len() as u64);
        bytes.write_u32_le(self.num_hashes);
        bytes.write_u32_le(self.element_length as u32);
        for cell in &self.cells {
            bytes.write_i32_le(cell.count);
            bytes.write(&cell.id_sum);
            bytes.write_u32_le(cell.hash_sum);
        }
        bytes.into_bytes()
    }

    /// Deserializes a structure previously produced by [`serialize`](Self::serialize).
    pub fn deserialize(bytes: &[u8]) -> Result<Self, Error> {
        let mut cursor = SketchSlice::new(bytes);
        let tag = cursor.read_u8().map_err(|_| Error::insufficient_data("tag"))?;
        if tag != TYPE_TAG {
            return Err(Error::invalid_tag(TYPE_TAG, tag, "Iblt"));
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
        let num_cells = cursor
            .read_u64_le()
            .map_err(|_| Error::insufficient_data("num_cells"))?;
        let num_hashes = cursor
            .read_u32_le()
            .map_err(|_| Error::insufficient_data("num_hashes"))?;
        let element_length = cursor
            .read_u32_le()
            .map_err(|_| Error::insufficient_data("element_length"))? as usize;

        let mut cells = Vec::with_capacity(num_cells as usize);
        for _ in 0..num_cells {
            let count = cursor
                .read_i32_le()
                .map_err(|_| Error::insufficient_data("cell_count"))?;
            let id_sum = cursor
                .read_vec(element_length)
                .map_err(|_| Error::insufficient_data("cell_id_sum"))?;
            let hash_sum = cursor
                .read_u32_le()
                .map_err(|_| Error::insufficient_data("cell_hash_sum"))?;
            cells.push(Cell {
                count,
                id_sum,
                hash_sum,
            });
        }

        Ok(Iblt {
            seed,
            num_hashes,
            element_length,
            cells,
        })
    }

    fn mutate(&mut self, element: &[u8], delta: i32) -> Result<(), Error> {
        if element.len() != self.element_length {
            return Err(Error::invalid_argument(format!(
                "element must be exactly {} bytes, got {}",
                self.element_length,
                element.len()
            ))
            .with_context("expected_length", self.element_length)
            .with_context("actual_length", element.len()));
        }

        let check_hash = check_hash32(element, self.seed);
        let indices = self.indices_for(element)?;
        for index in indices {
            self.cells[index as usize].xor_element(element, check_hash, delta);
        }
        Ok(())
    }

    fn indices_for(&self, element: &[u8]) -> Result<Vec<u64>, Error> {
        distinct_indices(element, self.cells.len() as u64, self.num_hashes, self.seed)
    }
}

fn find_pure(cells: &[Cell], seed: u64) -> Option<usize> {
    cells.iter().position(|cell| cell.is_pure(seed))
}

fn peel_out(cells: &mut [Cell], indices: &[u64], element: &[u8], sign: i32, seed: u64) {
    let check_hash = check_hash32(element, seed);
    for &index in indices {
        cells[index as usize].xor_element(element, check_hash, -sign);
    }
}

/// Builder for [`Iblt`].
#[derive(Default)]
pub struct IbltBuilder {
    num_cells: Option<u64>,
    num_hashes: Option<u32>,
    element_length: Option<usize>,
    seed: Option<u64>,
}

impl IbltBuilder {
    /// Cell count (`m`). The design notes recommend `m >= 1.5 * d` for an
    /// expected symmetric-difference size `d`.
    pub fn with_num_cells(mut self, num_cells: u64) -> Self {
        self.num_cells = Some(num_cells);
        self
    }

    /// Hash function count (`k`, recommended at least 3).
    pub fn with_num_hashes(mut self, num_hashes: u32) -> Self {
        self.num_hashes = Some(num_hashes);
        self
    }

    /// Fixed element length in bytes (`L`); every `add`/`delete` call
    /// must supply exactly this many bytes.
    pub fn with_element_length(mut self, element_length: usize) -> Self {
        self.element_length = Some(element_length);
        self
    }

    /// Overrides the hash seed (default `0x1234567890`).
    pub fn seed(mut self, seed: u64) -> Self {
        self.seed = Some(seed);
        self
    }

    /// Builds the structure.
    ///
    /// # Panics
    ///
    /// Panics if `with_num_cells`/`with_num_hashes`/`with_element_length`
    /// were not all called.
    pub fn build(self) -> Result<Iblt, Error> {
        let num_cells = self
            .num_cells
            .expect("must call with_num_cells() before build()");
        let num_hashes = self
            .num_hashes
            .expect("must call with_num_hashes() before build()");
        let element_length = self
            .element_length
            .expect("must call with_element_length() before build()");

        if num_cells < 1 {
            return Err(Error::invalid_argument("num_cells must be at least 1"));
        }
        if num_hashes < 1 || u64::from(num_hashes) > num_cells {
            return Err(Error::invalid_argument(
                "num_hashes must be at least 1 and at most num_cells",
            ));
        }
        if element_length < 1 {
            return Err(Error::invalid_argument("element_length must be at least 1"));
        }

        Ok(Iblt {
            seed: self.seed.unwrap_or(DEFAULT_SEED),
            num_hashes,
            element_length,
            cells: (0..num_cells).map(|_| Cell::empty(element_length)).collect(),
        })
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn padded(label: &str, len: usize) -> Vec<u8> {
        let mut bytes = label.as_bytes().to_vec();
        bytes.resize(len, 0);
        bytes
    }

    #[test]
    fn concrete_subtract_decode_scenario() {
        let mut a = Iblt::builder()
            .with_num_cells(50)
            .with_num_hashes(3)
            .with_element_length(8)
            .build()
            .unwrap();
        let mut b = a.clone();

        let shared: Vec<_> = (0..20).map(|i| padded(&format!("shared{i}"), 8)).collect();
        for item in &shared {
            a.add(item).unwrap();
            b.add(item).unwrap();
        }

        let only_a = padded("only_a_x", 8);
        let only_b = padded("only_b_x", 8);
        a.add(&only_a).unwrap();
        b.add(&only_b).unwrap();

        let diff = a.subtract(&b).unwrap();
        let decoded = diff.decode();

        assert!(decoded.complete);
        assert!(decoded.additional.contains(&only_a));
        assert!(decoded.missing.contains(&only_b));
    }

    #[test]
    fn has_reports_present_and_absent() {
        let mut iblt = Iblt::builder()
            .with_num_cells(64)
            .with_num_hashes(4)
            .with_element_length(8)
            .build()
            .unwrap();
        let element = padded("hello", 8);
        iblt.add(&element).unwrap();
        assert_eq!(iblt.has(&element), Membership::Present);
        assert_eq!(iblt.has(&padded("nope", 8)), Membership::Absent);
    }

    #[test]
    fn rejects_wrong_length_elements() {
        let mut iblt = Iblt::builder()
            .with_num_cells(16)
            .with_num_hashes(3)
            .with_element_length(8)
            .build()
            .unwrap();
        let err = iblt.add(b"short").unwrap_err();
        assert_eq!(err.kind(), crate::error::ErrorKind::InvalidArgument);
    }

    #[test]
    fn subtract_rejects_incompatible_shapes() {
        let a = Iblt::builder()
            .with_num_cells(16)
            .with_num_hashes(3)
            .with_element_length(8)
            .build()
            .unwrap();
        let b = Iblt::builder()
            .with_num_cells(32)
            .with_num_hashes(3)
            .with_element_length(8)
            .build()
            .unwrap();
        let err = a.subtract(&b).unwrap_err();
        assert_eq!(err.kind(), crate::error::ErrorKind::IncompatibleShape);
    }

    #[test]
    fn list_entries_recovers_inserted_elements() {
        let mut iblt = Iblt::builder()
            .with_num_cells(64)
            .with_num_hashes(4)
            .with_element_length(8)
            .build()
            .unwrap();
        let elements: Vec<_> = (0..10).map(|i| padded(&format!("e{i}"), 8)).collect();
        for e in &elements {
            iblt.add(e).unwrap();
        }

        let result = iblt.list_entries();
        assert!(result.success);
        for e in &elements {
            assert!(result.entries.contains(e));
        }
    }

    #[test]
    fn decode_reports_incomplete_when_difference_too_large() {
        let mut a = Iblt::builder()
            .with_num_cells(8)
            .with_num_hashes(3)
            .with_element_length(8)
            .build()
            .unwrap();
        let b = a.clone();

        for i in 0..200u32 {
            a.add(&padded(&format!("x{i}"), 8)).unwrap();
        }

        let diff = a.subtract(&b).unwrap();
        let decoded = diff.decode();
        assert!(!decoded.complete);
    }

    #[test]
    fn serialize_round_trip() {
        let mut iblt = Iblt::builder()
            .with_num_cells(32)
            .with_num_hashes(3)
            .with_element_length(8)
            .build()
            .unwrap();
        iblt.add(&padded("hello", 8)).unwrap();
        let bytes = iblt.serialize();
        let restored = Iblt::deserialize(&bytes).unwrap();
        assert_eq!(iblt, restored);
    }
}
