//! Per-file compilation state: versioned stage artifacts, working marks,
//! the name index and the fresh-name allocator.
//!
//! Only the compile task writes artifact fields; the facade never touches
//! them. The working mark and check clock are the exception: they are
//! committed at the start of each per-file visit so that cycle detection in
//! the import adapter can observe a file that is currently being worked on.

use std::sync::atomic::{AtomicU64, Ordering};

use indexmap::IndexMap;
use lsp_types::Url;
use rustc_hash::{FxBuildHasher, FxHashMap};
use sha2::{Digest, Sha256};

use skein_compile::{ErrorBundle, FileName, Frontend, Span};

use crate::clock::{Clock, Version};

/// SHA-256 fingerprint of a file's bytes on disk.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct ContentHash([u8; 32]);

impl ContentHash {
    /// Hashes a byte stream.
    pub fn digest(bytes: &[u8]) -> Self {
        Self(Sha256::digest(bytes).into())
    }
}

/// Process-wide fresh-name generator.
///
/// Names are never reused; compile stages use them in place of URIs, and the
/// `findFile` operation maps them back through the name index.
#[derive(Debug, Default)]
pub struct NameAllocator(AtomicU64);

impl NameAllocator {
    /// Mints a name nobody has seen before.
    pub fn fresh(&self) -> FileName {
        FileName::from_raw(self.0.fetch_add(1, Ordering::Relaxed) + 1)
    }
}

/// Why a file is, or last was, being visited by a compile pass.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum WorkingMark {
    /// The last visit completed at the given clock.
    Done(Clock),
    /// Currently being visited as a refresh root.
    WorkingRoot,
    /// Currently being visited because `importer` imported it at `span`.
    WorkingDep {
        /// The file whose import pulled this one in.
        importer: Url,
        /// The span of that import expression.
        span: Span,
    },
}

impl WorkingMark {
    /// Whether the mark records a completed visit.
    pub fn is_done(&self) -> bool {
        matches!(self, WorkingMark::Done(_))
    }
}

/// A stage result stamped with the version that produced it.
///
/// The slot keeps the most recent success even after a later version fails
/// to reach the stage, so broken edits keep serving stale-but-useful data.
#[derive(Debug, Clone)]
pub struct Artifact<T>(Option<(Version, T)>);

impl<T> Artifact<T> {
    /// A slot whose stage never succeeded.
    pub fn absent() -> Self {
        Self(None)
    }

    /// The version of the last success, if any.
    pub fn version(&self) -> Option<Version> {
        self.0.as_ref().map(|(version, _)| *version)
    }

    /// The payload of the last success, whatever version produced it.
    pub fn payload(&self) -> Option<&T> {
        self.0.as_ref().map(|(_, payload)| payload)
    }

    /// The payload, but only when it was produced from the text at
    /// `version`. This is the one predicate request satisfaction uses.
    pub fn current_at(&self, version: Version) -> Option<&T> {
        match &self.0 {
            Some((at, payload)) if *at == version => Some(payload),
            _ => None,
        }
    }

    /// Whether the slot is current at `version`.
    pub fn is_current_at(&self, version: Version) -> bool {
        self.current_at(version).is_some()
    }

    /// Records the outcome of re-running the stage at `version`: a success
    /// replaces the slot, a failure leaves the previous success in place.
    pub(crate) fn record(&mut self, version: Version, payload: Option<T>) {
        if let Some(payload) = payload {
            self.0 = Some((version, payload));
        }
    }
}

impl<T> Default for Artifact<T> {
    fn default() -> Self {
        Self::absent()
    }
}

/// Resolve-stage payload: the resolved program and its signature.
pub struct ResolvedArtifact<F: Frontend + ?Sized> {
    /// The resolved syntax tree.
    pub program: F::Resolved,
    /// The module's exported signature.
    pub signature: F::Signature,
}

impl<F: Frontend + ?Sized> Clone for ResolvedArtifact<F> {
    fn clone(&self) -> Self {
        Self {
            program: self.program.clone(),
            signature: self.signature.clone(),
        }
    }
}

/// Type-stage payload: the typed program, its signature and environment.
pub struct TypedArtifact<F: Frontend + ?Sized> {
    /// The typed program.
    pub program: F::Typed,
    /// The module's exported signature.
    pub signature: F::Signature,
    /// The environment importers type against.
    pub env: F::Env,
}

impl<F: Frontend + ?Sized> Clone for TypedArtifact<F> {
    fn clone(&self) -> Self {
        Self {
            program: self.program.clone(),
            signature: self.signature.clone(),
            env: self.env.clone(),
        }
    }
}

/// Imports recorded at a file's last compile, one span per URI (the first
/// seen wins; nothing downstream depends on which).
pub type Dependencies = IndexMap<Url, Span, FxBuildHasher>;

/// State specific to a file that is open in an editor.
pub struct OpenedState<F: Frontend> {
    /// Version whose text the last parse attempt consumed, successful or
    /// not. Distinguishes "parsed and got nothing" from "not parsed yet".
    pub last_parsed: Option<Version>,
    /// Last successful parse.
    pub tree: Artifact<F::Tree>,
    /// Last successful resolution.
    pub resolved: Artifact<ResolvedArtifact<F>>,
    /// Last successful typing.
    pub typed: Artifact<TypedArtifact<F>>,
    /// Most recent diagnostics for the file.
    pub errors: ErrorBundle,
}

impl<F: Frontend> Default for OpenedState<F> {
    fn default() -> Self {
        Self {
            last_parsed: None,
            tree: Artifact::absent(),
            resolved: Artifact::absent(),
            typed: Artifact::absent(),
            errors: ErrorBundle::default(),
        }
    }
}

impl<F: Frontend> Clone for OpenedState<F> {
    fn clone(&self) -> Self {
        Self {
            last_parsed: self.last_parsed,
            tree: self.tree.clone(),
            resolved: self.resolved.clone(),
            typed: self.typed.clone(),
            errors: self.errors.clone(),
        }
    }
}

/// State specific to a file that lives on disk.
///
/// Disk files keep just enough for their importers: the tree, the signature
/// and the environment. Diagnostics are not retained; nobody is looking at
/// the file.
pub struct DiskState<F: Frontend> {
    /// Fingerprint of the bytes the last parse attempt consumed.
    pub hash: ContentHash,
    /// Last successful parse.
    pub tree: Option<F::Tree>,
    /// Last successfully resolved signature.
    pub signature: Option<F::Signature>,
    /// Last successfully typed environment.
    pub env: Option<F::Env>,
}

impl<F: Frontend> Clone for DiskState<F> {
    fn clone(&self) -> Self {
        Self {
            hash: self.hash,
            tree: self.tree.clone(),
            signature: self.signature.clone(),
            env: self.env.clone(),
        }
    }
}

/// The shape-specific half of a [`FileState`].
pub enum StateShape<F: Frontend> {
    /// The file is open in an editor.
    Opened(OpenedState<F>),
    /// The file lives on disk and is only interesting to its importers.
    Disk(DiskState<F>),
}

impl<F: Frontend> Clone for StateShape<F> {
    fn clone(&self) -> Self {
        match self {
            StateShape::Opened(opened) => StateShape::Opened(opened.clone()),
            StateShape::Disk(disk) => StateShape::Disk(disk.clone()),
        }
    }
}

/// Compilation state of one file.
pub struct FileState<F: Frontend> {
    /// Compiler-internal name standing in for the URI.
    pub name: FileName,
    /// Why the file is being visited, or when it last finished.
    pub working: WorkingMark,
    /// Clock of the pass that last recompiled the file.
    pub compile_clock: Clock,
    /// Clock of the pass that last visited the file at all.
    pub check_clock: Clock,
    /// Imports recorded at the last compile.
    pub dependencies: Dependencies,
    /// The shape-specific rest.
    pub shape: StateShape<F>,
}

impl<F: Frontend> FileState<F> {
    /// The opened half of the shape, if the file is open.
    pub fn opened(&self) -> Option<&OpenedState<F>> {
        match &self.shape {
            StateShape::Opened(opened) => Some(opened),
            StateShape::Disk(_) => None,
        }
    }

    /// The signature importers of this file should see: the latest
    /// successful one, whatever version produced it.
    pub fn export_signature(&self) -> Option<F::Signature> {
        match &self.shape {
            StateShape::Opened(opened) => opened
                .resolved
                .payload()
                .map(|resolved| resolved.signature.clone()),
            StateShape::Disk(disk) => disk.signature.clone(),
        }
    }

    /// The environment importers of this file type against.
    pub fn export_env(&self) -> Option<F::Env> {
        match &self.shape {
            StateShape::Opened(opened) => opened.typed.payload().map(|typed| typed.env.clone()),
            StateShape::Disk(disk) => disk.env.clone(),
        }
    }
}

impl<F: Frontend> Clone for FileState<F> {
    fn clone(&self) -> Self {
        Self {
            name: self.name,
            working: self.working.clone(),
            compile_clock: self.compile_clock,
            check_clock: self.check_clock,
            dependencies: self.dependencies.clone(),
            shape: self.shape.clone(),
        }
    }
}

/// All file states plus the name index.
///
/// The index is maintained as the exact inverse of the `name` field over all
/// present states; `insert` and `remove` are the only ways in, so the two
/// maps cannot drift apart.
pub struct StateStore<F: Frontend> {
    states: FxHashMap<Url, FileState<F>>,
    by_name: FxHashMap<FileName, Url>,
}

impl<F: Frontend> Default for StateStore<F> {
    fn default() -> Self {
        Self {
            states: FxHashMap::default(),
            by_name: FxHashMap::default(),
        }
    }
}

impl<F: Frontend> StateStore<F> {
    /// The state of `uri`, if the file has ever been loaded.
    pub fn get(&self, uri: &Url) -> Option<&FileState<F>> {
        self.states.get(uri)
    }

    /// The URI carrying `name`, if any state does.
    pub fn uri_of(&self, name: FileName) -> Option<&Url> {
        self.by_name.get(&name)
    }

    /// Number of tracked files.
    pub fn len(&self) -> usize {
        self.states.len()
    }

    /// Whether no file is tracked.
    pub fn is_empty(&self) -> bool {
        self.states.is_empty()
    }

    /// Iterates all states.
    pub fn iter(&self) -> impl Iterator<Item = (&Url, &FileState<F>)> {
        self.states.iter()
    }

    /// Inserts or replaces the state of `uri`, keeping the name index in
    /// sync when the replacement changed the file's name.
    pub(crate) fn insert(&mut self, uri: Url, state: FileState<F>) {
        let name = state.name;
        if let Some(old) = self.states.insert(uri.clone(), state) {
            if old.name != name {
                self.by_name.remove(&old.name);
            }
        }
        self.by_name.insert(name, uri);
    }

    /// Removes the state of `uri` along with its name-index entry.
    pub(crate) fn remove(&mut self, uri: &Url) -> Option<FileState<F>> {
        let old = self.states.remove(uri)?;
        self.by_name.remove(&old.name);
        Some(old)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::clock::Version;

    #[test]
    fn test_artifact_keeps_last_success() {
        let mut slot: Artifact<&str> = Artifact::absent();
        assert!(slot.payload().is_none());

        slot.record(Version::new(1), Some("one"));
        assert_eq!(slot.current_at(Version::new(1)), Some(&"one"));

        // A failed run at a later version retains the old success.
        slot.record(Version::new(2), None);
        assert_eq!(slot.version(), Some(Version::new(1)));
        assert_eq!(slot.payload(), Some(&"one"));
        assert!(!slot.is_current_at(Version::new(2)));

        slot.record(Version::new(3), Some("three"));
        assert_eq!(slot.current_at(Version::new(3)), Some(&"three"));
    }

    #[test]
    fn test_content_hash_is_stable() {
        let a = ContentHash::digest(b"let x = 1");
        let b = ContentHash::digest(b"let x = 1");
        let c = ContentHash::digest(b"let x = 2");
        assert_eq!(a, b);
        assert_ne!(a, c);
    }
}
