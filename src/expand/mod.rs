//! Single-step set derivations.
//!
//! Expansion walks the search space backwards: given a set known to be
//! nullifiable, every set emitted here can reach it in one arithmetic
//! step, and so inherits its nullifiability. Two families exist:
//! supersets (insert one value) and mutations (replace one element by an
//! equivalent pair under +, -, x or /). Both are filtered so that the
//! emitted set's M-value stays inside a configured range.

mod expander;

pub use expander::*;
