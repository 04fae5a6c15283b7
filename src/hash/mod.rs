//! The seeded hashing substrate shared by every sketch in this crate.
//!
//! Not part of the public API — every sketch's public surface is
//! expressed in terms of `add`/`has`/`update`, never raw hashes. Each
//! sketch module reaches into here for `hash_pair`/`distinct_indices`
//! instead of hashing on its own.

mod substrate;
mod xxhash;

pub(crate) use substrate::DEFAULT_SEED;
pub(crate) use substrate::check_hash32;
pub(crate) use substrate::distinct_indices;
pub(crate) use substrate::hash_pair;
pub(crate) use substrate::index_at;
