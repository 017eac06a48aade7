//! The incremental compilation worker of the Skein language server.
//!
//! The worker keeps the live compilation state of every file the editor
//! touches, re-runs the front-end pipeline whenever inputs change, and
//! serves client requests against the freshest consistent snapshot of
//! compiler output. The front-end itself — parser, resolver, desugarer,
//! type inferencer, verifier — is a collaborator behind the
//! [`Frontend`](skein_compile::Frontend) trait; what lives here is the
//! scheduler and the cache:
//!
//! - a [content store](fs::ContentStore) pairing editor text (or an
//!   on-disk sentinel) with a monotonic world [clock](Clock);
//! - per-file [states](state) holding multi-stage versioned artifacts,
//!   import dependencies and a working mark for cycle detection;
//! - a single-writer compile pass that visits each relevant file at most
//!   once per refresh, commits per file, and can be killed between files;
//! - a [request queue](Request) whose entries become satisfiable only when
//!   the underlying file reaches a matching version.
//!
//! Two background threads drive everything: `skein-refresh` coalesces
//! refresh signals into compile passes, and `skein-dispatch` executes
//! satisfiable requests in id order. Dropping the [`Worker`] shuts both
//! down.

mod actor;
mod clock;
mod compile;
mod fs;
mod imports;
mod library;
mod requests;
mod state;
mod worker;

pub use clock::{Clock, Version};
pub use fs::{normalize_uri, FileContents};
pub use library::{LibraryPaths, LIBRARY_PATH_VAR};
pub use requests::{
    ErrorSink, Request, RequestError, RequestId, RequestKind, Stage, SuccessSink, TypedPayload,
};
pub use state::{Artifact, ContentHash, ResolvedArtifact, TypedArtifact, WorkingMark};
pub use worker::{DiagnosticsSender, Worker};

#[cfg(test)]
mod tests;
