//! The worker facade: the operations clients call, and the shared state the
//! background loops work against.
//!
//! Facade operations only ever touch the content store, the clock, the
//! refresh trigger and the request maps; artifact fields belong to the
//! compile task alone. Locks are acquired in a fixed order — contents,
//! then states, then requests — and never held across a sink invocation.

use std::path::PathBuf;
use std::sync::Arc;
use std::thread::JoinHandle;

use lsp_types::Url;
use parking_lot::Mutex;
use ropey::Rope;

use skein_compile::{ErrorBundle, FileName, Frontend};

use crate::actor::{dispatch, refresh, RequestStore, Trigger};
use crate::clock::Version;
use crate::fs::{normalize_uri, ContentStore};
use crate::library::LibraryPaths;
use crate::requests::{
    try_satisfy, FileView, Request, RequestError, RequestId, Satisfaction, StateView,
};
use crate::state::{NameAllocator, StateStore};

/// Channel the worker pushes changed per-file diagnostics into.
pub type DiagnosticsSender = crossbeam_channel::Sender<(Url, ErrorBundle)>;

/// State shared by the facade, the refresh scheduler, the compile task and
/// the dispatcher.
pub(crate) struct Shared<F: Frontend> {
    pub frontend: F,
    pub files: Mutex<ContentStore>,
    pub states: Mutex<StateStore<F>>,
    pub names: NameAllocator,
    pub library: Mutex<LibraryPaths>,
    pub trigger: Trigger,
    pub requests: RequestStore<F>,
    pub diags: DiagnosticsSender,
}

impl<F: Frontend> Shared<F> {
    /// Captures everything request satisfaction needs to know about `uri`.
    pub fn file_view(&self, uri: &Url) -> FileView<F> {
        let (clock, open_version) = {
            let files = self.files.lock();
            (files.clock(), files.opened(uri).map(|(version, _)| version))
        };
        let state = self.states.lock().get(uri).map(StateView::of);
        FileView {
            clock,
            open_version,
            state,
        }
    }

    /// Re-evaluates every pending request for `uri`, moving the newly
    /// satisfiable ones to ready and flushing the ones whose file is no
    /// longer open. Error sinks run after the queues unlock.
    pub fn queue_requests(&self, uri: &Url) {
        let view = self.file_view(uri);
        let mut closed = Vec::new();
        {
            let mut queues = self.requests.queues.lock();
            let mut moved = false;
            for id in queues.pending_ids_for(uri) {
                let Some(stage) = queues.pending_stage(id) else {
                    continue;
                };
                match try_satisfy::<F>(stage, &view) {
                    Satisfaction::Ready(_) => {
                        if let Some(req) = queues.detach_pending(id) {
                            queues.insert_ready(id, req);
                            moved = true;
                        }
                    }
                    Satisfaction::Closed => {
                        if let Some(req) = queues.detach_pending(id) {
                            closed.push(req);
                        }
                    }
                    Satisfaction::NotYet => {}
                }
            }
            if moved {
                self.requests.notify();
            }
        }
        for req in closed {
            req.fail(RequestError::FileNotOpen);
        }
    }

    /// Pushes a changed bundle to the diagnostics channel.
    pub fn publish_diagnostics(&self, uri: &Url, bundle: ErrorBundle) {
        if self.diags.send((uri.clone(), bundle)).is_err() {
            log::warn!("Worker: diagnostics receiver dropped");
        }
    }
}

/// The incremental compilation worker.
///
/// Owns two background threads: `skein-refresh`, which turns refresh
/// signals into compile passes, and `skein-dispatch`, which executes
/// satisfiable requests. Dropping the worker shuts both down, cancelling
/// any in-flight pass.
pub struct Worker<F: Frontend> {
    pub(crate) shared: Arc<Shared<F>>,
    refresh: Option<JoinHandle<()>>,
    dispatch: Option<JoinHandle<()>>,
}

impl<F: Frontend> Worker<F> {
    /// Spawns the background loops around `frontend`. Changed diagnostics
    /// are pushed into `diags`.
    pub fn spawn(frontend: F, diags: DiagnosticsSender) -> Self {
        let shared = Arc::new(Shared {
            frontend,
            files: Mutex::new(ContentStore::default()),
            states: Mutex::new(StateStore::default()),
            names: NameAllocator::default(),
            library: Mutex::new(LibraryPaths::recompute(Vec::new())),
            trigger: Trigger::default(),
            requests: RequestStore::default(),
            diags,
        });

        let refresh = std::thread::Builder::new()
            .name("skein-refresh".to_owned())
            .spawn({
                let shared = shared.clone();
                move || refresh::refresh_loop(shared)
            })
            .expect("failed to spawn skein-refresh");
        let dispatch = std::thread::Builder::new()
            .name("skein-dispatch".to_owned())
            .spawn({
                let shared = shared.clone();
                move || dispatch::dispatch_loop(shared)
            })
            .expect("failed to spawn skein-dispatch");

        Self {
            shared,
            refresh: Some(refresh),
            dispatch: Some(dispatch),
        }
    }

    /// Replaces the contents of `uri` with opened editor text at `version`.
    pub fn update_file(&self, uri: Url, version: Version, text: Rope) {
        let uri = normalize_uri(uri);
        log::debug!("Worker: updateFile {uri} {version}");
        self.shared.files.lock().update(uri, version, text);
    }

    /// Records an on-disk change to `uri`.
    pub fn touch_file(&self, uri: Url) {
        let uri = normalize_uri(uri);
        log::debug!("Worker: touchFile {uri}");
        self.shared.files.lock().touch(&uri);
    }

    /// Forgets the opened contents of `uri`; the file falls back to disk.
    pub fn close_file(&self, uri: Url) {
        let uri = normalize_uri(uri);
        log::debug!("Worker: closeFile {uri}");
        self.shared.files.lock().close(&uri);
    }

    /// Maps a compiler-internal name back to its URI.
    pub fn find_file(&self, name: FileName) -> Option<Url> {
        self.shared.states.lock().uri_of(name).cloned()
    }

    /// Signals the refresh scheduler, optionally naming a file to visit
    /// first. Signals coalesce; the latest non-null priority survives.
    pub fn refresh(&self, priority: Option<Url>) {
        self.shared.trigger.signal(priority.map(normalize_uri));
    }

    /// Recomputes the library path list from `extra` plus standard
    /// discovery. Takes effect on the next pass.
    pub fn update_config(&self, extra: Vec<PathBuf>) {
        *self.shared.library.lock() = LibraryPaths::recompute(extra);
    }

    /// Registers a request. If it is satisfiable right now it goes straight
    /// to the dispatcher; otherwise it parks until its file gets there. A
    /// request reusing a live id silently replaces it.
    pub fn start_request(&self, id: RequestId, req: Request<F>) {
        let mut req = req;
        req.target = normalize_uri(req.target);
        let view = self.shared.file_view(&req.target);
        let mut queues = self.shared.requests.queues.lock();
        match try_satisfy(req.kind.stage(), &view) {
            Satisfaction::Ready(_) => {
                queues.insert_ready(id, req);
                drop(queues);
                self.shared.requests.notify();
            }
            // Not an error even when the file is not open yet: the open may
            // simply not have arrived. Unsatisfiable requests are flushed
            // when a pass settles the world.
            Satisfaction::NotYet | Satisfaction::Closed => queues.insert_pending(id, req),
        }
    }

    /// Withdraws a request from both queues. Sinks of a cancelled request
    /// are never invoked; an execution already in flight is not interrupted.
    pub fn cancel_request(&self, id: RequestId) {
        if self.shared.requests.queues.lock().cancel(id).is_some() {
            log::debug!("Worker: cancelled {id}");
        }
    }

    /// Blocks until the worker is quiescent: no refresh signal pending, no
    /// compile pass running, the ready queue drained and the dispatcher
    /// idle.
    pub fn settle(&self) {
        self.shared.trigger.quiesce();
        self.shared.requests.quiesce();
    }
}

impl<F: Frontend> Drop for Worker<F> {
    fn drop(&mut self) {
        log::debug!("Worker: shutting down");
        self.shared.trigger.shutdown();
        self.shared.requests.shutdown();
        for (name, handle) in [
            ("skein-refresh", self.refresh.take()),
            ("skein-dispatch", self.dispatch.take()),
        ] {
            if let Some(handle) = handle {
                if handle.join().is_err() {
                    log::error!("Worker: {name} thread panicked");
                }
            }
        }
    }
}
