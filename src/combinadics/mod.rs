//! Ranking of strictly ascending integer tuples.
//!
//! The combinatorial number system assigns every strictly ascending
//! k-tuple of positive integers a unique rank, ordered by the largest
//! value first, then the next largest, and so on. Records exploit this
//! ordering because it groups all sets sharing an M-value (largest
//! element) into one contiguous block of ranks.

mod index;

pub use index::*;

pub(crate) use index::is_ascending;
