//! Shared primitives used by more than one sketch family: element byte
//! conversion, the packed bit array, the saturating counter array, and the
//! small PRNG the Cuckoo filter uses for eviction.

mod bitset;
mod counters;
mod element;
mod random;

pub use element::AsElementBytes;

pub(crate) use bitset::BitArray;
pub(crate) use counters::CounterArray;
pub(crate) use random::XorShift64;
