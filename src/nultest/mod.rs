//! Exhaustive nullifiability testing.
//!
//! The expansion pipeline only ever proves sets nullifiable; whatever it
//! leaves unmarked still has to be checked the hard way. This module
//! holds that last-resort decision procedure.

mod tester;

pub use tester::*;
