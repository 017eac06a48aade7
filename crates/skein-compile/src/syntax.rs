//! Source locations and compiler-internal file symbols.

use core::fmt;

use serde::{Deserialize, Serialize};

/// A byte range in one file's source text.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub struct Span {
    /// Byte offset of the first character.
    pub start: u32,
    /// Byte offset one past the last character.
    pub end: u32,
}

impl Span {
    /// Creates a span covering `start..end`.
    pub fn new(start: u32, end: u32) -> Self {
        debug_assert!(start <= end, "span {start}..{end} is inverted");
        Self { start, end }
    }

    /// A zero-width span at the start of the file, for diagnostics with no
    /// better anchor.
    pub fn detached() -> Self {
        Self { start: 0, end: 0 }
    }

    /// Length of the spanned text in bytes.
    pub fn len(&self) -> u32 {
        self.end - self.start
    }

    /// Whether the span covers no text.
    pub fn is_empty(&self) -> bool {
        self.start == self.end
    }
}

impl fmt::Display for Span {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}..{}", self.start, self.end)
    }
}

/// Compiler-internal identity of a file.
///
/// Compile stages never see URIs; each file is stood in for by a fresh
/// integer-tagged symbol minted by the worker's name allocator. Names are
/// unique for the lifetime of the process and never reused.
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
pub struct FileName(u64);

impl FileName {
    /// Wraps a raw symbol number. Only the name allocator should mint new
    /// numbers; everything else passes names around unchanged.
    pub fn from_raw(raw: u64) -> Self {
        Self(raw)
    }

    /// The raw symbol number.
    pub fn into_raw(self) -> u64 {
        self.0
    }
}

impl fmt::Display for FileName {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "file#{}", self.0)
    }
}

#[cfg(test)]
mod tests {
    use super::Span;

    #[test]
    fn test_span_len() {
        let span = Span::new(3, 8);
        assert_eq!(span.len(), 5);
        assert!(!span.is_empty());
        assert!(Span::detached().is_empty());
    }
}
