//! Parallel drive passes over records.
//!
//! A drive pass spawns a fixed crew of worker threads, hands each a
//! stride-interleaved slice of the record's rank space and lets them run
//! to completion. Interleaving beats contiguous segmentation here: rank
//! neighbors share most of their cursor state, so every worker pays the
//! same amortized reconstruction cost instead of the last worker paying
//! for the densest block.
//!
//! [`generation`] carries marks from a size-N record to a size-N+1
//! record through the expander; [`weed`] runs the exhaustive tester on
//! whatever is still unmarked. Progress reporting and signal handling
//! live in their own submodules.

mod generation;
mod progress;
mod signals;
mod weed;

pub use generation::*;
pub use progress::*;
pub use signals::*;
pub use weed::*;
