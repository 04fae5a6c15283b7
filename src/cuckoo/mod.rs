//! The Cuckoo filter: approximate membership with support for deletion,
//! at the cost of an eviction-based insertion path that can fail once the
//! structure is full.

pub mod filter;
