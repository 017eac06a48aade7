//! One compile pass: the dependency-aware recompile algorithm.
//!
//! A pass is stamped with the clock it started from and visits every
//! relevant file at most once, loading imports recursively. Each file's
//! result is committed on its own, so a pass can be abandoned between files
//! without losing work; the working mark left behind makes the next pass
//! redo whatever was in flight.

use std::path::PathBuf;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;

use ecow::EcoVec;
use lsp_types::Url;
use rustc_hash::FxHashSet;

use skein_compile::{Diagnostic, ErrorBundle, FileName, Frontend, Severity, Span};

use crate::clock::{Clock, Version};
use crate::fs::{ContentStore, FileContents};
use crate::imports::ImportAdapter;
use crate::state::{
    ContentHash, DiskState, FileState, OpenedState, ResolvedArtifact, StateShape, TypedArtifact,
    WorkingMark,
};
use crate::worker::Shared;

/// The pass was cancelled by a newer refresh signal (or shutdown).
pub(crate) struct Interrupted;

/// What a dependency visit exposes to its importer.
pub(crate) struct DepView<F: Frontend> {
    pub name: FileName,
    pub working: WorkingMark,
    pub compile_clock: Clock,
    pub signature: Option<F::Signature>,
    pub env: Option<F::Env>,
}

impl<F: Frontend> DepView<F> {
    fn of(state: &FileState<F>) -> Self {
        Self {
            name: state.name,
            working: state.working.clone(),
            compile_clock: state.compile_clock,
            signature: state.export_signature(),
            env: state.export_env(),
        }
    }
}

/// Outcome of (re-)parsing one file, plus the state shell to continue with.
struct ParseStep<F: Frontend> {
    /// The text differs from what the stored artifacts were built from.
    changed: bool,
    /// The open version the text belongs to; `None` for disk files.
    version: Option<Version>,
    /// The tree to feed the pipeline, when this parse produced one.
    tree: Option<F::Tree>,
    parse_errors: EcoVec<Diagnostic>,
    /// The state to continue with; `None` when the file is gone entirely.
    shell: Option<FileState<F>>,
    /// The on-disk bytes were re-read; drop the dirty flag.
    clear_dirty: bool,
}

impl<F: Frontend> ParseStep<F> {
    fn missing() -> Self {
        Self {
            changed: true,
            version: None,
            tree: None,
            parse_errors: EcoVec::new(),
            shell: None,
            clear_dirty: false,
        }
    }
}

/// One execution of the compile task.
pub(crate) struct CompilePass<F: Frontend> {
    shared: Arc<Shared<F>>,
    /// Frozen view of the content store the whole pass works against.
    contents: ContentStore,
    base_clock: Clock,
    priority: Option<Url>,
    library: Vec<PathBuf>,
    cancel: Arc<AtomicBool>,
    /// Files whose resolve picked up a cycle error this pass.
    cycles: FxHashSet<Url>,
    visited: usize,
    recompiled: usize,
}

impl<F: Frontend> CompilePass<F> {
    pub fn new(shared: Arc<Shared<F>>, priority: Option<Url>, cancel: Arc<AtomicBool>) -> Self {
        let contents = shared.files.lock().snapshot();
        let base_clock = contents.clock();
        let library = shared.library.lock().iter().cloned().collect();
        Self {
            shared,
            contents,
            base_clock,
            priority,
            library,
            cancel,
            cycles: FxHashSet::default(),
            visited: 0,
            recompiled: 0,
        }
    }

    /// Runs the pass to completion or cancellation.
    pub fn run(mut self) {
        log::info!("CompileTask: pass {} starting", self.base_clock);

        let outcome = self.visit_roots();
        match outcome {
            Ok(()) => {
                // Requests for files this pass never visited (closed files
                // nothing imports, say) still deserve an answer.
                self.sweep_pending();
                log::info!(
                    "CompileTask: pass {} done, visited {} file(s), recompiled {}",
                    self.base_clock,
                    self.visited,
                    self.recompiled
                );
            }
            Err(Interrupted) => {
                log::info!("CompileTask: pass {} interrupted", self.base_clock);
            }
        }
    }

    fn visit_roots(&mut self) -> Result<(), Interrupted> {
        if let Some(priority) = self.priority.take() {
            self.load_file(&priority, None)?;
        }
        let opened: Vec<Url> = self.contents.opened_uris().cloned().collect();
        for uri in opened {
            self.load_file(&uri, None)?;
        }
        Ok(())
    }

    /// Library prefixes, frozen at pass start.
    pub(crate) fn library_paths(&self) -> impl Iterator<Item = &PathBuf> {
        self.library.iter()
    }

    /// Whether an import candidate exists: open in the editor or on disk.
    pub(crate) fn candidate_exists(&self, uri: &Url, path: &std::path::Path) -> bool {
        self.contents.opened(uri).is_some() || path.is_file()
    }

    /// Records that `uri` finished this pass with a cycle error.
    pub(crate) fn mark_cycle(&mut self, uri: Url) {
        self.cycles.insert(uri);
    }

    /// Whether `uri` finished this pass with a cycle error.
    pub(crate) fn cycled(&self, uri: &Url) -> bool {
        self.cycles.contains(uri)
    }

    /// Loads one file, recursively loading its imports, and commits the
    /// result. Returns `None` when the file does not exist anywhere.
    pub(crate) fn load_file(
        &mut self,
        uri: &Url,
        cause: Option<(Url, Span)>,
    ) -> Result<Option<DepView<F>>, Interrupted> {
        if self.cancel.load(Ordering::Relaxed) {
            return Err(Interrupted);
        }

        let old = {
            let states = self.shared.states.lock();
            match states.get(uri) {
                // Already visited this pass; mid-work entries are exactly
                // what cycle detection wants to see.
                Some(state) if state.check_clock == self.base_clock => {
                    return Ok(Some(DepView::of(state)));
                }
                state => state.cloned(),
            }
        };
        self.visited += 1;

        let step = self.parse_file(uri, old.as_ref());
        let Some(mut state) = step.shell else {
            // The file vanished: no opened content, nothing readable on
            // disk. Drop every trace and flush its requests.
            log::debug!("CompileTask: dropping {uri}, no contents anywhere");
            self.shared.states.lock().remove(uri);
            self.shared.files.lock().remove_sentinel(uri);
            self.shared.queue_requests(uri);
            return Ok(None);
        };

        state.check_clock = self.base_clock;
        state.working = match cause {
            None => WorkingMark::WorkingRoot,
            Some((importer, span)) => WorkingMark::WorkingDep { importer, span },
        };
        // Commit the mark before descending into imports; cycle detection
        // reads it through the store.
        self.shared.states.lock().insert(uri.clone(), state.clone());
        if step.clear_dirty {
            self.shared.files.lock().clear_dirty(uri);
        }

        let mut changed = step.changed;
        if !changed {
            if let Some(old) = &old {
                // A pass that died mid-file left its working mark behind;
                // redo the file.
                if !old.working.is_done() && old.check_clock != self.base_clock {
                    changed = true;
                }
            }
        }
        if !changed {
            let dependencies = state.dependencies.clone();
            for (dep, span) in &dependencies {
                match self.load_file(dep, Some((uri.clone(), *span)))? {
                    None => changed = true,
                    Some(view) => {
                        if view.compile_clock > state.compile_clock {
                            changed = true;
                        }
                    }
                }
            }
        }

        if changed {
            match step.tree.clone() {
                Some(tree) => {
                    self.run_pipeline(uri, &mut state, step.version, tree, step.parse_errors)?;
                }
                None => {
                    // No tree: downstream stages are skipped, their
                    // artifacts and older diagnostics stay as they were.
                    if let StateShape::Opened(opened) = &mut state.shape {
                        opened.errors.parse = step.parse_errors;
                    }
                }
            }
        }

        state.working = WorkingMark::Done(self.base_clock);
        if changed {
            state.compile_clock = self.base_clock;
            self.recompiled += 1;
        }

        let publish = match (&state.shape, changed) {
            (StateShape::Opened(opened), true) => {
                let before = old
                    .as_ref()
                    .and_then(|old| old.opened().map(|opened| opened.errors.clone()))
                    .unwrap_or_default();
                (opened.errors != before).then(|| opened.errors.clone())
            }
            _ => None,
        };

        self.shared.states.lock().insert(uri.clone(), state.clone());
        if let Some(bundle) = publish {
            self.shared.publish_diagnostics(uri, bundle);
        }
        self.shared.queue_requests(uri);

        Ok(Some(DepView::of(&state)))
    }

    /// Re-parses a file if its inputs moved, otherwise reuses the stored
    /// tree. Decides between editor text and disk bytes.
    fn parse_file(&self, uri: &Url, old: Option<&FileState<F>>) -> ParseStep<F> {
        match self.contents.get(uri) {
            Some(FileContents::Opened { version, text }) => {
                self.parse_opened(uri, *version, text, old)
            }
            Some(FileContents::OnDisk { dirty }) => self.parse_disk(uri, *dirty, old),
            None => self.parse_disk(uri, false, old),
        }
    }

    fn parse_opened(
        &self,
        uri: &Url,
        version: Version,
        text: &ropey::Rope,
        old: Option<&FileState<F>>,
    ) -> ParseStep<F> {
        let name = old
            .map(|old| old.name)
            .unwrap_or_else(|| self.shared.names.fresh());
        let mut opened = match old.map(|old| &old.shape) {
            Some(StateShape::Opened(opened)) => opened.clone(),
            // Fresh, or promoted from a disk state: artifacts start over.
            _ => OpenedState::default(),
        };

        if opened.last_parsed == Some(version) {
            let tree = opened.tree.current_at(version).cloned();
            return ParseStep {
                changed: false,
                version: Some(version),
                tree,
                parse_errors: EcoVec::new(),
                shell: Some(self.shell(name, old, StateShape::Opened(opened))),
                clear_dirty: false,
            };
        }

        log::debug!("CompileTask: parsing {uri} at {version}");
        let text = text.to_string();
        let (tree, parse_errors) = self.shared.frontend.parse_tops(&text);
        opened.last_parsed = Some(version);
        opened.tree.record(version, tree.clone());

        ParseStep {
            changed: true,
            version: Some(version),
            tree,
            parse_errors,
            shell: Some(self.shell(name, old, StateShape::Opened(opened))),
            clear_dirty: false,
        }
    }

    fn parse_disk(&self, uri: &Url, dirty: bool, old: Option<&FileState<F>>) -> ParseStep<F> {
        let Ok(path) = uri.to_file_path() else {
            return ParseStep::missing();
        };
        let bytes = match std::fs::read(&path) {
            Ok(bytes) => bytes,
            Err(err) => {
                log::debug!("CompileTask: cannot read {uri}: {err}");
                return ParseStep::missing();
            }
        };
        let hash = ContentHash::digest(&bytes);

        let name = old
            .map(|old| old.name)
            .unwrap_or_else(|| self.shared.names.fresh());
        let old_disk = match old.map(|old| &old.shape) {
            Some(StateShape::Disk(disk)) => Some(disk.clone()),
            // A closed file demotes to a disk state, keeping its name.
            _ => None,
        };

        if !dirty {
            if let Some(disk) = &old_disk {
                if disk.hash == hash {
                    // Bytes unchanged since the last parse; skip the rest.
                    return ParseStep {
                        changed: false,
                        version: None,
                        tree: disk.tree.clone(),
                        parse_errors: EcoVec::new(),
                        shell: Some(self.shell(name, old, StateShape::Disk(disk.clone()))),
                        clear_dirty: false,
                    };
                }
            }
        }

        let text = match String::from_utf8(bytes) {
            Ok(text) => text,
            Err(_) => {
                log::warn!("CompileTask: {uri} is not valid UTF-8");
                let disk = DiskState {
                    hash,
                    tree: old_disk.as_ref().and_then(|disk| disk.tree.clone()),
                    signature: old_disk.as_ref().and_then(|disk| disk.signature.clone()),
                    env: old_disk.and_then(|disk| disk.env),
                };
                return ParseStep {
                    changed: true,
                    version: None,
                    tree: None,
                    parse_errors: EcoVec::new(),
                    shell: Some(self.shell(name, old, StateShape::Disk(disk))),
                    clear_dirty: true,
                };
            }
        };

        log::debug!("CompileTask: parsing {uri} from disk");
        let (tree, parse_errors) = self.shared.frontend.parse_tops(&text);
        let disk = DiskState {
            hash,
            // A failed parse keeps serving the previous tree to importers.
            tree: tree.clone().or_else(|| old_disk.as_ref().and_then(|disk| disk.tree.clone())),
            signature: old_disk.as_ref().and_then(|disk| disk.signature.clone()),
            env: old_disk.and_then(|disk| disk.env),
        };

        ParseStep {
            changed: true,
            version: None,
            tree,
            parse_errors,
            shell: Some(self.shell(name, old, StateShape::Disk(disk))),
            clear_dirty: true,
        }
    }

    /// A continuation state carrying the shared fields over from `old`.
    fn shell(&self, name: FileName, old: Option<&FileState<F>>, shape: StateShape<F>) -> FileState<F> {
        FileState {
            name,
            working: old
                .map(|old| old.working.clone())
                .unwrap_or(WorkingMark::Done(Clock::ZERO)),
            compile_clock: old.map(|old| old.compile_clock).unwrap_or(Clock::ZERO),
            check_clock: old.map(|old| old.check_clock).unwrap_or(Clock::ZERO),
            dependencies: old.map(|old| old.dependencies.clone()).unwrap_or_default(),
            shape,
        }
    }

    /// Resolve → desugar → infer → verify, updating `state`'s artifacts
    /// under the retention rule.
    fn run_pipeline(
        &mut self,
        uri: &Url,
        state: &mut FileState<F>,
        version: Option<Version>,
        tree: F::Tree,
        parse_errors: EcoVec<Diagnostic>,
    ) -> Result<(), Interrupted> {
        let shared = self.shared.clone();

        let mut adapter = ImportAdapter::new(self, uri.clone());
        let resolved = shared.frontend.resolve(state.name, &tree, &mut adapter);
        let capture = adapter.finish();

        // Imports may have observed the cancel flag and answered evasively;
        // make sure none of that gets committed.
        if self.cancel.load(Ordering::Relaxed) {
            return Err(Interrupted);
        }

        state.dependencies = capture.dependencies;
        let mut resolve_errors = capture.errors;
        let resolved_module = match resolved {
            Ok(module) => Some(module),
            Err(errors) => {
                resolve_errors.extend(errors);
                None
            }
        };

        let mut type_errors = EcoVec::new();
        let mut inferred = None;
        if let Some(module) = &resolved_module {
            let mut env = shared.frontend.base_env();
            for dep in &capture.envs {
                shared.frontend.merge_env(&mut env, dep);
            }
            let desugared = shared.frontend.desugar(&module.program);
            let outcome = shared.frontend.infer(env, desugared);
            type_errors = outcome.errors;
            inferred = outcome.typed;
        }
        let clean = !type_errors
            .iter()
            .any(|diag| diag.severity == Severity::Error);

        match &mut state.shape {
            StateShape::Opened(opened) => {
                let version = version.expect("opened files always parse with a version");
                opened.resolved.record(
                    version,
                    resolved_module.as_ref().map(|module| ResolvedArtifact {
                        program: module.program.clone(),
                        signature: module.signature.clone(),
                    }),
                );

                let mut verify_errors = EcoVec::new();
                if clean {
                    if let Some((typed, env)) = &inferred {
                        let signature = resolved_module
                            .as_ref()
                            .map(|module| module.signature.clone())
                            .expect("typing implies resolution");
                        opened.typed.record(
                            version,
                            Some(TypedArtifact {
                                program: typed.clone(),
                                signature,
                                env: env.clone(),
                            }),
                        );
                        verify_errors = shared.frontend.verify(typed);
                    }
                }

                opened.errors = ErrorBundle {
                    parse: parse_errors,
                    resolve: resolve_errors,
                    types: type_errors,
                    verify: verify_errors,
                };
            }
            StateShape::Disk(disk) => {
                if let Some(module) = &resolved_module {
                    disk.signature = Some(module.signature.clone());
                }
                if clean {
                    if let Some((_, env)) = inferred {
                        disk.env = Some(env);
                    }
                }
            }
        }

        Ok(())
    }

    /// Re-evaluates every pending request once the pass has settled the
    /// world, so closed files nobody visited still answer.
    fn sweep_pending(&self) {
        let uris = self.shared.requests.queues.lock().pending_uris();
        for uri in uris {
            self.shared.queue_requests(&uri);
        }
    }
}
