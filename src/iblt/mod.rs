//! The Invertible Bloom Lookup Table (IBLT): a set sketch that supports
//! recovering the exact symmetric difference between two sets, up to a
//! size bounded by the sketch's cell count.

pub mod sketch;
