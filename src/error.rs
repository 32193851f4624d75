//! Error types for the interception layer
//!
//! None of these cross the C ABI. The resolver turns a missing symbol into an
//! abort, the codec turns bad entries into skipped entries.

use std::os::unix::io::RawFd;
use thiserror::Error;

#[derive(Debug, Error, Clone, PartialEq, Eq)]
pub enum Error {
    /// The next definition of a routine could not be found in link order
    #[error("symbol `{name}` not found after this library: {reason}")]
    SymbolNotFound { name: String, reason: String },

    /// A list entry that is not a non-negative decimal descriptor
    #[error("invalid descriptor entry {entry:?}")]
    InvalidEntry { entry: String },

    /// A descriptor whose decimal form does not fit the serialization width
    #[error("descriptor {fd} does not fit {width} digits")]
    EntryTooWide { fd: RawFd, width: usize },
}

pub type Result<T> = std::result::Result<T, Error>;
