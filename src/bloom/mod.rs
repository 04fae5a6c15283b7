//! The Bloom filter family: classic, partitioned, and counting variants.
//!
//! All three share the same double-hashing substrate (see [`crate::hash`])
//! but differ in how they represent and mutate their underlying storage —
//! a single packed bit array, one bit array per hash function, or a
//! saturating counter array.

pub mod classic;
pub mod counting;
pub mod partitioned;
