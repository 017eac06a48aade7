//! Diagnostic data shared between the front-end and the worker.
//!
//! Errors are data, not control flow: every stage reports what went wrong as
//! values, and the worker aggregates them into one [`ErrorBundle`] per file.

use core::fmt;

use ecow::{EcoString, EcoVec};
use serde::{Deserialize, Serialize};

use crate::Span;

/// The severity of a diagnostic message, following the LSP numbering.
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
pub enum Severity {
    /// An error message.
    Error,
    /// A warning message.
    Warning,
    /// An information message.
    Information,
    /// A hint message.
    Hint,
}

impl fmt::Display for Severity {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Severity::Error => write!(f, "error"),
            Severity::Warning => write!(f, "warning"),
            Severity::Information => write!(f, "information"),
            Severity::Hint => write!(f, "hint"),
        }
    }
}

/// One diagnostic produced by a compile stage.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Diagnostic {
    /// How bad it is.
    pub severity: Severity,
    /// Where it is, when the stage could anchor it.
    pub span: Option<Span>,
    /// The rendered message.
    pub message: EcoString,
}

impl Diagnostic {
    /// An error-severity diagnostic at `span`.
    pub fn error(span: Option<Span>, message: impl Into<EcoString>) -> Self {
        Self {
            severity: Severity::Error,
            span,
            message: message.into(),
        }
    }

    /// A warning-severity diagnostic at `span`.
    pub fn warning(span: Option<Span>, message: impl Into<EcoString>) -> Self {
        Self {
            severity: Severity::Warning,
            span,
            message: message.into(),
        }
    }
}

/// An import whose file could not be located.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ImportError {
    /// The import path as written in the source.
    pub path: EcoString,
    /// The span of the import expression.
    pub span: Span,
}

/// A failure reported by name resolution.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub enum ResolveError {
    /// An import whose file could not be located.
    Import(ImportError),
    /// An import participating in a dependency cycle. The chain holds
    /// `(relative path, span)` pairs as perceived by each importer and is
    /// never empty.
    ImportCycle(EcoVec<(EcoString, Span)>),
    /// Any other resolution failure.
    Other(Diagnostic),
}

impl ResolveError {
    /// Whether this is a cycle report.
    pub fn is_cycle(&self) -> bool {
        matches!(self, ResolveError::ImportCycle(_))
    }
}

/// Aggregated diagnostics for one file, published atomically.
///
/// The four sections mirror the pipeline. A section left over from an older
/// run is retained when the stage that owns it did not re-run, matching the
/// retention rule for stage artifacts.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct ErrorBundle {
    /// Errors from parsing; always recoverable.
    pub parse: EcoVec<Diagnostic>,
    /// Errors from name resolution, including import failures and cycles.
    pub resolve: EcoVec<ResolveError>,
    /// Diagnostics from type inference.
    pub types: EcoVec<Diagnostic>,
    /// Errors from the verifier; present only after clean typing.
    pub verify: EcoVec<Diagnostic>,
}

impl ErrorBundle {
    /// Whether the bundle carries no diagnostics at all.
    pub fn is_empty(&self) -> bool {
        self.parse.is_empty()
            && self.resolve.is_empty()
            && self.types.is_empty()
            && self.verify.is_empty()
    }

    /// Iterates the cycle reports in the resolve section.
    pub fn cycles(&self) -> impl Iterator<Item = &ResolveError> {
        self.resolve.iter().filter(|err| err.is_cycle())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_severity_order() {
        assert!(Severity::Error < Severity::Warning);
        assert!(Severity::Warning < Severity::Hint);
    }

    #[test]
    fn test_bundle_empty() {
        let mut bundle = ErrorBundle::default();
        assert!(bundle.is_empty());

        bundle.types.push(Diagnostic::error(None, "mismatch"));
        assert!(!bundle.is_empty());
        assert_eq!(bundle.cycles().count(), 0);
    }
}
