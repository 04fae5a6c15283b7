//! Count-Min sketch: approximate frequency counting over a stream of
//! updates, with one-sided error (estimates are never below the true
//! count, for nonnegative updates).

pub mod sketch;
