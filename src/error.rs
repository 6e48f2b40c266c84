//! Error types for the metadata decoders.
//!
//! Only the strict, single-node entry points surface these errors
//! directly. The stream and tree walkers translate them into early
//! termination and report it through [`Decoded::complete`] instead,
//! matching how the dynamic linker tolerates slightly malformed input.

use thiserror::Error;

/// The main error type for decode operations.
#[derive(Error, Debug, Clone, Copy, PartialEq, Eq)]
pub enum Error {
    /// A read would require bytes beyond the end of the buffer.
    #[error("truncated input at offset {offset:#x}")]
    Truncated {
        /// Offset at which the read was attempted
        offset: usize,
    },

    /// A ULEB128/SLEB128 value has no terminating byte within the buffer,
    /// or its unbroken continuation run exceeds the shift bound.
    #[error("invalid LEB128 at offset {offset:#x}")]
    InvalidLeb128 {
        /// Offset of the first byte of the varint
        offset: usize,
    },

    /// A caller-supplied offset does not lie within the buffer.
    #[error("offset {offset:#x} out of bounds (buffer size: {size:#x})")]
    OffsetOutOfBounds {
        /// The rejected offset
        offset: usize,
        /// Total buffer size
        size: usize,
    },
}

/// A specialized Result type for decode operations.
pub type Result<T> = std::result::Result<T, Error>;

impl Error {
    /// Creates a truncation error.
    #[inline]
    pub fn truncated(offset: usize) -> Self {
        Error::Truncated { offset }
    }

    /// Creates an out-of-bounds error.
    #[inline]
    pub fn out_of_bounds(offset: usize, size: usize) -> Self {
        Error::OffsetOutOfBounds { offset, size }
    }
}

/// The result of a tolerant decode: everything successfully decoded,
/// plus whether the input was consumed to a clean end.
///
/// `complete` is `false` when decoding stopped early — truncation, an
/// unrecognized opcode, or a structurally corrupt trie node. The decoded
/// prefix in `values` is still valid.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Decoded<T> {
    /// Successfully decoded entries, in decode order.
    pub values: Vec<T>,
    /// True if nothing was cut short.
    pub complete: bool,
}

impl<T> Decoded<T> {
    /// An empty, complete result.
    #[inline]
    pub fn empty() -> Self {
        Self {
            values: Vec::new(),
            complete: true,
        }
    }

    /// Returns the number of decoded entries.
    #[inline]
    pub fn len(&self) -> usize {
        self.values.len()
    }

    /// Returns true if nothing was decoded.
    #[inline]
    pub fn is_empty(&self) -> bool {
        self.values.is_empty()
    }

    /// Iterates over the decoded entries.
    #[inline]
    pub fn iter(&self) -> std::slice::Iter<'_, T> {
        self.values.iter()
    }
}

impl<T> IntoIterator for Decoded<T> {
    type Item = T;
    type IntoIter = std::vec::IntoIter<T>;

    fn into_iter(self) -> Self::IntoIter {
        self.values.into_iter()
    }
}

impl<'a, T> IntoIterator for &'a Decoded<T> {
    type Item = &'a T;
    type IntoIter = std::slice::Iter<'a, T>;

    fn into_iter(self) -> Self::IntoIter {
        self.values.iter()
    }
}
