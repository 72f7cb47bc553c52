//! # innull: searching for innullifiable sets
//!
//! A set of positive integers is *nullifiable* when some sequence of
//! binary operations (+, -, x, /, every intermediate a positive integer)
//! over its elements reaches zero; the interesting sets are the ones
//! that never do. Testing a single set is cheap enough, but the universe
//! of C(M, N) candidate sets is not, so this library works forwards:
//! known nullifiable sets of size N are expanded into the size N+1 sets
//! that can reach them, and only the residue that expansion never
//! touches meets the exhaustive tester.
//!
//! ## Core Concepts
//!
//! - **Set Record**: one atomic byte per addressable set over a bounded
//!   region, OR-marked concurrently and scanned in combinadic rank order
//! - **Expansion**: supersets (insert a value) and mutations (replace an
//!   element by an equivalent pair), the one-step inverses of the
//!   arithmetic
//! - **Generation**: a parallel pass carrying marks from a size-N record
//!   into a size-N+1 record
//! - **Weeding**: exhaustively testing whatever remains unmarked
//!
//! ## Modules
//!
//! - [`combinadics`]: ranking between ascending tuples and array indices
//! - [`record`]: the dense atomic byte map and its file format
//! - [`expand`]: one-step set derivations under an M-value range
//! - [`nultest`]: the recursive nullifiability decision procedure
//! - [`drivers`]: the parallel generation and weed passes, progress
//!   snapshots and signal plumbing
//!

pub mod combinadics;
pub mod drivers;
pub mod error;
pub mod expand;
pub mod nultest;
pub mod record;

pub use error::Error;
