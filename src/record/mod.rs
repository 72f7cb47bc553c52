//! Dense byte-per-set records over a bounded region of the set universe.
//!
//! A [`SetRecord`] owns one atomic byte for every strictly ascending set
//! addressable under its configuration (variable-segment length, M-value
//! range, fixed tail). Bytes accumulate marks through bitwise OR and are
//! never cleared, so any number of worker threads can mark concurrently
//! while others scan.
//!
//! The bit assignments below are a convention between the drive passes,
//! not something the record itself interprets.

mod io;
mod set_record;

pub use set_record::*;

/// The set has been shown nullifiable.
pub const NULLIF: u8 = 1 << 0;

/// The nullifiability was derived only from being a superset of a
/// smaller nullifiable set, not from a fresh pattern.
pub const ONLY_SUP: u8 = 1 << 1;

/// Both driver-convention bits.
pub const MARKED: u8 = NULLIF | ONLY_SUP;
