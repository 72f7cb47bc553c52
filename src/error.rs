use std::io;

use thiserror::Error;

/// Errors surfaced by record, expander and driver operations.
///
/// The variants mirror how the binary reports failures: invalid input is
/// a usage problem (exit code 2), everything else is a runtime fault
/// (exit code 1).
#[derive(Debug, Error)]
pub enum Error {
    /// A malformed set, size, range or stride was passed in.
    #[error("invalid input: {0}")]
    InvalidInput(&'static str),

    /// The backing array for a record region could not be allocated.
    #[error("allocation of {0} record bytes failed")]
    Alloc(u64),

    /// An underlying read, write or seek failed.
    #[error("storage fault: {0}")]
    Storage(#[from] io::Error),

    /// A record file's header or body does not follow the format.
    #[error("invalid record file: {0}")]
    Format(String),

    /// An imported record holds sets of a different size than expected.
    #[error("record holds sets of size {found}, expected {expected}")]
    WrongSize { expected: usize, found: usize },
}

impl Error {
    /// Process exit code the binary uses for this error.
    pub fn exit_code(&self) -> i32 {
        match self {
            Error::InvalidInput(_) => 2,
            _ => 1,
        }
    }
}
