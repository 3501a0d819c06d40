//! The error taxonomy surfaced by every fallible operation in this crate.
//!
//! No error is ever caught and recovered inside the crate; a failed operation
//! is guaranteed not to have mutated any container state (all precondition
//! checks happen before the first write).

use thiserror::Error;

/// The result type used throughout this crate.
pub type Result<T> = core::result::Result<T, Error>;

/// A typed, non-recoverable failure. See the module documentation for the
/// contract each variant carries.
#[derive(Debug, Error, Clone, PartialEq, Eq)]
pub enum Error {
    /// Null/absent input, a negative size, an out-of-range index, or a
    /// non-power-of-two alignment override.
    #[error("invalid argument: {0}")]
    InvalidArgument(String),

    /// A byte-order override was placed on a non-primitive field, or the
    /// layout engine otherwise encountered an unsupported shape while
    /// computing offsets.
    #[error("invalid layout: {0}")]
    InvalidLayout(String),

    /// A bulk `get`/`set` was requested on a layout that contains a union or
    /// an open-ended (unsized) array leaf.
    #[error("unsupported layout: {0}")]
    UnsupportedLayout(String),

    /// Growing a sequence or a map would push its element count past
    /// `i32::MAX`.
    #[error("capacity exceeded: {0}")]
    CapacityExceeded(String),

    /// An iterator observed that the container's `mod_count` no longer
    /// matches the value it snapshotted at creation time.
    #[error("concurrent modification detected during iteration")]
    ConcurrentModification,

    /// A path string did not match the `step+` grammar.
    #[error("failed to parse path `{path}`: {reason}")]
    ParseError { path: String, reason: String },

    /// A path step named a field that is not a member of the struct layout
    /// it was resolved against.
    #[error("field not found: {0}")]
    NotFound(String),
}

impl Error {
    pub(crate) fn invalid_argument(msg: impl Into<String>) -> Self {
        Error::InvalidArgument(msg.into())
    }

    pub(crate) fn invalid_layout(msg: impl Into<String>) -> Self {
        Error::InvalidLayout(msg.into())
    }

    pub(crate) fn unsupported_layout(msg: impl Into<String>) -> Self {
        Error::UnsupportedLayout(msg.into())
    }

    pub(crate) fn capacity_exceeded(msg: impl Into<String>) -> Self {
        Error::CapacityExceeded(msg.into())
    }

    pub(crate) fn not_found(name: impl Into<String>) -> Self {
        Error::NotFound(name.into())
    }
}
