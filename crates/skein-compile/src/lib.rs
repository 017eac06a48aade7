//! The contract between the Skein compiler front-end and the language
//! service worker.
//!
//! The worker in `skein-worker` owns scheduling and caching; the front-end
//! owns the language. This crate pins down the seam: the [`Frontend`] trait
//! the worker drives one stage at a time, the [`Importer`] callback through
//! which resolution asks for other modules, and the diagnostic data both
//! sides exchange.
//!
//! Nothing here performs I/O or spawns threads; the types are deliberately
//! cheap to clone so the worker can hand stage results to several consumers.

pub mod diag;
mod syntax;

pub use diag::{Diagnostic, ErrorBundle, ImportError, ResolveError, Severity};
pub use syntax::{FileName, Span};

use ecow::{EcoString, EcoVec};

/// A resolved module together with its exported signature.
pub struct ResolvedModule<F: Frontend + ?Sized> {
    /// The resolved syntax tree.
    pub program: F::Resolved,
    /// What the module exports, as importers will see it.
    pub signature: F::Signature,
}

impl<F: Frontend + ?Sized> Clone for ResolvedModule<F> {
    fn clone(&self) -> Self {
        Self {
            program: self.program.clone(),
            signature: self.signature.clone(),
        }
    }
}

/// What type inference produced for one module.
pub struct InferOutcome<F: Frontend + ?Sized> {
    /// The typed program and the environment its exports live in; absent
    /// when a fatal type error stopped inference.
    pub typed: Option<(F::Typed, F::Env)>,
    /// Type diagnostics, fatal and otherwise.
    pub errors: EcoVec<Diagnostic>,
}

/// The answer to one import query.
pub enum ImportOutcome<F: Frontend + ?Sized> {
    /// The import resolved; the module's internal name and signature.
    Imported(FileName, F::Signature),
    /// The file was located but its own compilation failed; the importer
    /// receives a resolve error rather than a cascade of type errors.
    Errored,
    /// No file answers to the path, which is carried as written.
    NotFound(EcoString),
    /// The import closes a dependency cycle. Resolution should continue
    /// with a provisional empty environment.
    Cycle(EcoVec<(EcoString, Span)>),
}

/// Answers import queries during name resolution.
///
/// The worker threads an implementation through [`Frontend::resolve`]; it
/// records every queried path as a dependency edge and loads the target
/// module on demand, so the resolver only has to ask.
pub trait Importer<F: Frontend + ?Sized> {
    /// Resolves `path` as written at `span` in the module being resolved.
    fn import(&mut self, path: &str, span: Span) -> ImportOutcome<F>;
}

/// The compiler front-end, one stage at a time.
///
/// The worker calls the stages in pipeline order and decides which results
/// survive between runs; implementations hold whatever interning tables or
/// builtin scopes they need internally. Stage payloads should be cheap to
/// clone (share the heavy parts behind `Arc`), since the worker clones them
/// into request payloads.
pub trait Frontend: Send + Sync + 'static {
    /// Output of parsing.
    type Tree: Clone + Send + Sync;
    /// Output of name resolution.
    type Resolved: Clone + Send + Sync;
    /// Output of desugaring, consumed by inference.
    type Desugared: Send;
    /// Output of type inference.
    type Typed: Clone + Send + Sync;
    /// A module's exported interface, as importers see it.
    type Signature: Clone + Send + Sync;
    /// A typing environment.
    type Env: Clone + Send + Sync;

    /// Parses top-level declarations. Returns the tree when one could be
    /// built at all, plus any parse diagnostics; parse errors are always
    /// recoverable in the sense that the worker keeps going either way.
    fn parse_tops(&self, text: &str) -> (Option<Self::Tree>, EcoVec<Diagnostic>);

    /// Resolves names in `tree`, asking `importer` for every import. A
    /// fatal failure returns the resolve errors; import errors the importer
    /// already recorded must not be duplicated.
    fn resolve(
        &self,
        file: FileName,
        tree: &Self::Tree,
        importer: &mut dyn Importer<Self>,
    ) -> Result<ResolvedModule<Self>, EcoVec<ResolveError>>;

    /// Desugars a resolved program for inference.
    fn desugar(&self, program: &Self::Resolved) -> Self::Desugared;

    /// The environment every module starts from (builtins).
    fn base_env(&self) -> Self::Env;

    /// Merges a dependency's environment into `env`.
    fn merge_env(&self, env: &mut Self::Env, dep: &Self::Env);

    /// Infers types under `env`.
    fn infer(&self, env: Self::Env, program: Self::Desugared) -> InferOutcome<Self>;

    /// Verifies a cleanly-typed program, returning verification errors.
    fn verify(&self, program: &Self::Typed) -> EcoVec<Diagnostic>;
}
