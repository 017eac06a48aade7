//! The asynchronous request queue.
//!
//! A request names a file, a pipeline stage and a pair of sinks; it waits
//! until the file's state reaches a matching version, then runs on the
//! dispatcher thread. Pending requests are indexed both by id and by target
//! URI; ready requests are ordered by id so dispatch is deterministic.

use core::fmt;
use std::collections::{BTreeMap, BTreeSet};

use lsp_types::Url;
use rustc_hash::FxHashMap;

use skein_compile::{ErrorBundle, FileName, Frontend};

use crate::clock::{Clock, Version};
use crate::state::{Artifact, FileState, ResolvedArtifact, StateShape, TypedArtifact, WorkingMark};

/// Client-assigned identity of one request.
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash)]
pub struct RequestId(u64);

impl RequestId {
    /// Wraps a client-assigned id.
    pub fn new(id: u64) -> Self {
        Self(id)
    }
}

impl From<u64> for RequestId {
    fn from(id: u64) -> Self {
        Self(id)
    }
}

impl fmt::Display for RequestId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "req#{}", self.0)
    }
}

/// Error delivered to a request's error sink.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum RequestError {
    /// The target file has no opened content.
    FileNotOpen,
}

impl fmt::Display for RequestError {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            RequestError::FileNotOpen => write!(f, "File is not open"),
        }
    }
}

impl std::error::Error for RequestError {}

/// Success sink: receives the compiler-internal name, the version the
/// request was satisfied at, and the stage payload. An absent payload means
/// the stage ran for that version without producing a result.
pub type SuccessSink<T> = Box<dyn FnOnce(FileName, Version, T) + Send>;

/// Error sink, for requests that can never be satisfied.
pub type ErrorSink = Box<dyn FnOnce(RequestError) + Send>;

/// Payload of a satisfied `Typed` request.
pub struct TypedPayload<F: Frontend + ?Sized> {
    /// The signature typing produced.
    pub signature: F::Signature,
    /// The resolved program the typed program was built from.
    pub resolved: F::Resolved,
    /// The environment of the module's exports.
    pub env: F::Env,
    /// The typed program itself.
    pub typed: F::Typed,
}

impl<F: Frontend + ?Sized> Clone for TypedPayload<F> {
    fn clone(&self) -> Self {
        Self {
            signature: self.signature.clone(),
            resolved: self.resolved.clone(),
            env: self.env.clone(),
            typed: self.typed.clone(),
        }
    }
}

impl<F: Frontend + ?Sized> fmt::Debug for TypedPayload<F>
where
    F::Signature: fmt::Debug,
    F::Resolved: fmt::Debug,
    F::Env: fmt::Debug,
    F::Typed: fmt::Debug,
{
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("TypedPayload")
            .field("signature", &self.signature)
            .field("resolved", &self.resolved)
            .field("env", &self.env)
            .field("typed", &self.typed)
            .finish()
    }
}

impl<F: Frontend + ?Sized> PartialEq for TypedPayload<F>
where
    F::Signature: PartialEq,
    F::Resolved: PartialEq,
    F::Env: PartialEq,
    F::Typed: PartialEq,
{
    fn eq(&self, other: &Self) -> bool {
        self.signature == other.signature
            && self.resolved == other.resolved
            && self.env == other.env
            && self.typed == other.typed
    }
}

/// The stage a request waits for, with the sink that receives its payload.
pub enum RequestKind<F: Frontend> {
    /// Wait for the parse of the current open version.
    Parsed(SuccessSink<Option<F::Tree>>),
    /// Wait for resolution under a completed pass.
    Resolved(SuccessSink<Option<ResolvedArtifact<F>>>),
    /// Wait for typing under a completed pass.
    Typed(SuccessSink<Option<TypedPayload<F>>>),
    /// Wait for the diagnostics of a completed pass.
    Errors(SuccessSink<ErrorBundle>),
}

/// Stage tag of a [`RequestKind`], for decisions that need no sink.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Stage {
    /// See [`RequestKind::Parsed`].
    Parsed,
    /// See [`RequestKind::Resolved`].
    Resolved,
    /// See [`RequestKind::Typed`].
    Typed,
    /// See [`RequestKind::Errors`].
    Errors,
}

impl<F: Frontend> RequestKind<F> {
    /// The stage tag.
    pub fn stage(&self) -> Stage {
        match self {
            RequestKind::Parsed(_) => Stage::Parsed,
            RequestKind::Resolved(_) => Stage::Resolved,
            RequestKind::Typed(_) => Stage::Typed,
            RequestKind::Errors(_) => Stage::Errors,
        }
    }
}

/// One waiting client request.
pub struct Request<F: Frontend> {
    /// The file the request is about.
    pub target: Url,
    /// The stage waited for and the success sink.
    pub kind: RequestKind<F>,
    /// Invoked instead of the success sink when the file is not open.
    pub on_error: ErrorSink,
}

impl<F: Frontend> Request<F> {
    /// Builds a request against `target`.
    pub fn new(target: Url, kind: RequestKind<F>, on_error: ErrorSink) -> Self {
        Self {
            target,
            kind,
            on_error,
        }
    }

    pub(crate) fn deliver(self, fulfilment: Fulfilment<F>) {
        match (self.kind, fulfilment) {
            (RequestKind::Parsed(sink), Fulfilment::Parsed(name, version, tree)) => {
                sink(name, version, tree)
            }
            (RequestKind::Resolved(sink), Fulfilment::Resolved(name, version, resolved)) => {
                sink(name, version, resolved)
            }
            (RequestKind::Typed(sink), Fulfilment::Typed(name, version, typed)) => {
                sink(name, version, typed)
            }
            (RequestKind::Errors(sink), Fulfilment::Errors(name, version, errors)) => {
                sink(name, version, errors)
            }
            _ => unreachable!("fulfilment built for a different stage"),
        }
    }

    pub(crate) fn fail(self, error: RequestError) {
        (self.on_error)(error);
    }
}

/// Everything `try_satisfy` needs to know about one file, captured under
/// the store locks so the decision is made against one consistent snapshot.
pub(crate) struct FileView<F: Frontend> {
    pub clock: Clock,
    pub open_version: Option<Version>,
    pub state: Option<StateView<F>>,
}

pub(crate) struct StateView<F: Frontend> {
    pub name: FileName,
    pub working: WorkingMark,
    pub last_parsed: Option<Version>,
    pub tree: Artifact<F::Tree>,
    pub resolved: Artifact<ResolvedArtifact<F>>,
    pub typed: Artifact<TypedArtifact<F>>,
    pub errors: ErrorBundle,
}

impl<F: Frontend> StateView<F> {
    pub(crate) fn of(state: &FileState<F>) -> Self {
        match &state.shape {
            StateShape::Opened(opened) => Self {
                name: state.name,
                working: state.working.clone(),
                last_parsed: opened.last_parsed,
                tree: opened.tree.clone(),
                resolved: opened.resolved.clone(),
                typed: opened.typed.clone(),
                errors: opened.errors.clone(),
            },
            // A disk-shaped state under freshly-opened content: the pass has
            // not revisited the file yet, so no artifact can be current.
            StateShape::Disk(_) => Self {
                name: state.name,
                working: state.working.clone(),
                last_parsed: None,
                tree: Artifact::absent(),
                resolved: Artifact::absent(),
                typed: Artifact::absent(),
                errors: ErrorBundle::default(),
            },
        }
    }
}

/// How one request relates to the current file snapshot.
pub(crate) enum Satisfaction<F: Frontend> {
    /// Deliverable now.
    Ready(Fulfilment<F>),
    /// Wait for a later pass.
    NotYet,
    /// The file is not open.
    Closed,
}

/// A payload ready to hand to a success sink.
pub(crate) enum Fulfilment<F: Frontend> {
    Parsed(FileName, Version, Option<F::Tree>),
    Resolved(FileName, Version, Option<ResolvedArtifact<F>>),
    Typed(FileName, Version, Option<TypedPayload<F>>),
    Errors(FileName, Version, ErrorBundle),
}

/// Decides whether a request at `stage` is satisfiable against `view`, and
/// with what payload.
///
/// `Resolved`, `Typed` and `Errors` additionally require that the last pass
/// completed at the current clock; otherwise the state may predate edits
/// the client has already seen acknowledged.
pub(crate) fn try_satisfy<F: Frontend>(stage: Stage, view: &FileView<F>) -> Satisfaction<F> {
    let Some(version) = view.open_version else {
        return Satisfaction::Closed;
    };
    let Some(state) = &view.state else {
        return Satisfaction::Closed;
    };
    let done_now = state.working == WorkingMark::Done(view.clock);

    match stage {
        Stage::Parsed => {
            if let Some(tree) = state.tree.current_at(version) {
                Satisfaction::Ready(Fulfilment::Parsed(state.name, version, Some(tree.clone())))
            } else if state.last_parsed == Some(version) {
                // Parsing was attempted at this version and produced no tree.
                Satisfaction::Ready(Fulfilment::Parsed(state.name, version, None))
            } else {
                Satisfaction::NotYet
            }
        }
        Stage::Resolved => {
            if !done_now {
                return Satisfaction::NotYet;
            }
            let resolved = state.resolved.current_at(version).cloned();
            Satisfaction::Ready(Fulfilment::Resolved(state.name, version, resolved))
        }
        Stage::Typed => {
            if !done_now {
                return Satisfaction::NotYet;
            }
            let payload = match (
                state.resolved.current_at(version),
                state.typed.current_at(version),
            ) {
                (Some(resolved), Some(typed)) => Some(TypedPayload {
                    signature: typed.signature.clone(),
                    resolved: resolved.program.clone(),
                    env: typed.env.clone(),
                    typed: typed.program.clone(),
                }),
                _ => None,
            };
            Satisfaction::Ready(Fulfilment::Typed(state.name, version, payload))
        }
        Stage::Errors => {
            if !done_now {
                return Satisfaction::NotYet;
            }
            Satisfaction::Ready(Fulfilment::Errors(
                state.name,
                version,
                state.errors.clone(),
            ))
        }
    }
}

/// Pending and ready stores.
///
/// Pending requests are reachable by id and by target URI; ready requests
/// sit in an ordered map so the dispatcher always pops the smallest id.
pub(crate) struct RequestQueues<F: Frontend> {
    pending: FxHashMap<RequestId, Request<F>>,
    by_uri: FxHashMap<Url, BTreeSet<RequestId>>,
    ready: BTreeMap<RequestId, Request<F>>,
    /// The dispatcher is between popping and finishing a request.
    pub executing: bool,
    /// The worker is shutting down.
    pub shutdown: bool,
}

impl<F: Frontend> Default for RequestQueues<F> {
    fn default() -> Self {
        Self {
            pending: FxHashMap::default(),
            by_uri: FxHashMap::default(),
            ready: BTreeMap::new(),
            executing: false,
            shutdown: false,
        }
    }
}

impl<F: Frontend> RequestQueues<F> {
    /// Parks a request in pending. A request reusing a live id replaces it.
    pub fn insert_pending(&mut self, id: RequestId, req: Request<F>) {
        self.cancel(id);
        self.by_uri.entry(req.target.clone()).or_default().insert(id);
        self.pending.insert(id, req);
    }

    /// Enqueues a request for dispatch. A request reusing a live id
    /// replaces it.
    pub fn insert_ready(&mut self, id: RequestId, req: Request<F>) {
        self.cancel(id);
        self.ready.insert(id, req);
    }

    /// Removes a request from wherever it currently sits.
    pub fn cancel(&mut self, id: RequestId) -> Option<Request<F>> {
        if let Some(req) = self.detach_pending(id) {
            return Some(req);
        }
        self.ready.remove(&id)
    }

    /// Removes a pending request, keeping the URI index consistent.
    pub fn detach_pending(&mut self, id: RequestId) -> Option<Request<F>> {
        let req = self.pending.remove(&id)?;
        if let Some(ids) = self.by_uri.get_mut(&req.target) {
            ids.remove(&id);
            if ids.is_empty() {
                self.by_uri.remove(&req.target);
            }
        }
        Some(req)
    }

    /// Pops the ready request with the smallest id.
    pub fn pop_ready(&mut self) -> Option<(RequestId, Request<F>)> {
        self.ready.pop_first()
    }

    /// Whether anything is ready for dispatch.
    pub fn has_ready(&self) -> bool {
        !self.ready.is_empty()
    }

    /// Stage tag of a pending request, if it is still pending.
    pub fn pending_stage(&self, id: RequestId) -> Option<Stage> {
        self.pending.get(&id).map(|req| req.kind.stage())
    }

    /// Ids of pending requests targeting `uri`.
    pub fn pending_ids_for(&self, uri: &Url) -> Vec<RequestId> {
        self.by_uri
            .get(uri)
            .map(|ids| ids.iter().copied().collect())
            .unwrap_or_default()
    }

    /// URIs with at least one pending request.
    pub fn pending_uris(&self) -> Vec<Url> {
        self.by_uri.keys().cloned().collect()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use ecow::EcoVec;
    use skein_compile::{Diagnostic, Importer, InferOutcome, ResolvedModule};

    /// A front-end where every stage payload is `()`, just enough to
    /// exercise the queue mechanics.
    struct NullFrontend;

    impl Frontend for NullFrontend {
        type Tree = ();
        type Resolved = ();
        type Desugared = ();
        type Typed = ();
        type Signature = ();
        type Env = ();

        fn parse_tops(&self, _text: &str) -> (Option<()>, EcoVec<Diagnostic>) {
            (Some(()), EcoVec::new())
        }

        fn resolve(
            &self,
            _file: FileName,
            _tree: &(),
            _importer: &mut dyn Importer<Self>,
        ) -> Result<ResolvedModule<Self>, EcoVec<skein_compile::ResolveError>> {
            Ok(ResolvedModule {
                program: (),
                signature: (),
            })
        }

        fn desugar(&self, _program: &()) {}

        fn base_env(&self) {}

        fn merge_env(&self, _env: &mut (), _dep: &()) {}

        fn infer(&self, _env: (), _program: ()) -> InferOutcome<Self> {
            InferOutcome {
                typed: Some(((), ())),
                errors: EcoVec::new(),
            }
        }

        fn verify(&self, _program: &()) -> EcoVec<Diagnostic> {
            EcoVec::new()
        }
    }

    fn request(uri: &str) -> Request<NullFrontend> {
        Request::new(
            Url::parse(uri).unwrap(),
            RequestKind::Errors(Box::new(|_, _, _| {})),
            Box::new(|_| {}),
        )
    }

    #[test]
    fn test_ready_pops_smallest_id_first() {
        let mut queues = RequestQueues::default();
        for id in [7, 2, 5] {
            queues.insert_ready(RequestId::new(id), request("file:///tmp/a.sk"));
        }
        let order: Vec<_> = std::iter::from_fn(|| queues.pop_ready().map(|(id, _)| id)).collect();
        assert_eq!(
            order,
            vec![RequestId::new(2), RequestId::new(5), RequestId::new(7)]
        );
    }

    #[test]
    fn test_cancel_reaches_both_stores() {
        let mut queues = RequestQueues::default();
        queues.insert_pending(RequestId::new(1), request("file:///tmp/a.sk"));
        queues.insert_ready(RequestId::new(2), request("file:///tmp/a.sk"));

        assert!(queues.cancel(RequestId::new(1)).is_some());
        assert!(queues.cancel(RequestId::new(2)).is_some());
        assert!(queues.cancel(RequestId::new(3)).is_none());
        assert!(queues.pending_uris().is_empty());
        assert!(!queues.has_ready());
    }

    #[test]
    fn test_pending_is_indexed_by_uri() {
        let mut queues = RequestQueues::default();
        queues.insert_pending(RequestId::new(1), request("file:///tmp/a.sk"));
        queues.insert_pending(RequestId::new(2), request("file:///tmp/b.sk"));
        queues.insert_pending(RequestId::new(3), request("file:///tmp/a.sk"));

        let a = Url::parse("file:///tmp/a.sk").unwrap();
        assert_eq!(
            queues.pending_ids_for(&a),
            vec![RequestId::new(1), RequestId::new(3)]
        );
        assert_eq!(queues.pending_uris().len(), 2);

        queues.detach_pending(RequestId::new(1));
        queues.detach_pending(RequestId::new(3));
        assert!(queues.pending_ids_for(&a).is_empty());
    }
}
