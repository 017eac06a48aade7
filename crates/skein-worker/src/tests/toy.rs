//! A tiny line-based language and the fixture that drives the worker
//! through it.
//!
//! The grammar, one statement per line:
//!
//! ```text
//! import "./other.sk"     -- pulls another module's exports into scope
//! let name = 1            -- defines and exports `name`
//! use name                -- must be local or imported, or resolution fails
//! #parse-fail             -- parsing returns no tree
//! #type-error             -- inference reports an error-severity diagnostic
//! #type-warn              -- inference reports a warning
//! #type-fatal             -- inference returns no typed program at all
//! #verify-bad             -- verification reports an error
//! ```
//!
//! Imported exports are re-exported, so signatures grow transitively the
//! way they do in the real front-end.

use std::collections::BTreeSet;
use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::Arc;
use std::time::Duration;

use crossbeam_channel::Receiver;
use ecow::{eco_format, eco_vec, EcoVec};
use lsp_types::Url;
use ropey::Rope;
use tempfile::TempDir;

use skein_compile::{
    Diagnostic, ErrorBundle, FileName, Frontend, ImportOutcome, Importer, InferOutcome,
    ResolveError, ResolvedModule, Span,
};

use crate::clock::Version;
use crate::fs::normalize_uri;
use crate::requests::{Request, RequestError, RequestId, RequestKind, TypedPayload};
use crate::worker::Worker;

pub(crate) const TICK: Duration = Duration::from_secs(5);

#[derive(Default)]
pub(crate) struct Counters {
    pub parses: AtomicUsize,
    pub resolves: AtomicUsize,
    pub infers: AtomicUsize,
    pub verifies: AtomicUsize,
}

#[derive(Debug, Clone, PartialEq, Eq, Default)]
pub(crate) struct ToyTree {
    pub imports: Vec<(String, Span)>,
    pub lets: Vec<String>,
    pub uses: Vec<String>,
    pub type_error: bool,
    pub type_warn: bool,
    pub type_fatal: bool,
    pub verify_bad: bool,
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub(crate) struct ToyResolved {
    pub exports: BTreeSet<String>,
    pub type_error: bool,
    pub type_warn: bool,
    pub type_fatal: bool,
    pub verify_bad: bool,
}

#[derive(Debug, Clone, PartialEq, Eq, Default)]
pub(crate) struct ToySig {
    pub exports: BTreeSet<String>,
}

#[derive(Debug, Clone, PartialEq, Eq, Default)]
pub(crate) struct ToyEnv {
    pub vals: BTreeSet<String>,
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub(crate) struct ToyTyped {
    pub exports: BTreeSet<String>,
    pub verify_bad: bool,
}

pub(crate) struct ToyFrontend {
    pub counters: Arc<Counters>,
}

impl Frontend for ToyFrontend {
    type Tree = ToyTree;
    type Resolved = ToyResolved;
    type Desugared = ToyResolved;
    type Typed = ToyTyped;
    type Signature = ToySig;
    type Env = ToyEnv;

    fn parse_tops(&self, text: &str) -> (Option<ToyTree>, EcoVec<Diagnostic>) {
        self.counters.parses.fetch_add(1, Ordering::Relaxed);

        let mut tree = ToyTree::default();
        let mut errors = EcoVec::new();
        let mut offset = 0u32;
        for line in text.split('\n') {
            let span = Span::new(offset, offset + line.len() as u32);
            offset = span.end + 1;
            let line = line.trim();
            if line.is_empty() || line.starts_with("--") {
                continue;
            }
            if let Some(rest) = line.strip_prefix("import ") {
                let path = rest.trim().trim_matches('"');
                tree.imports.push((path.to_owned(), span));
            } else if let Some(rest) = line.strip_prefix("let ") {
                let name = rest.split('=').next().unwrap_or("").trim();
                tree.lets.push(name.to_owned());
            } else if let Some(rest) = line.strip_prefix("use ") {
                tree.uses.push(rest.trim().to_owned());
            } else {
                match line {
                    "#parse-fail" => {
                        errors.push(Diagnostic::error(Some(span), "unexpected token"));
                        return (None, errors);
                    }
                    "#type-error" => tree.type_error = true,
                    "#type-warn" => tree.type_warn = true,
                    "#type-fatal" => tree.type_fatal = true,
                    "#verify-bad" => tree.verify_bad = true,
                    other => {
                        errors.push(Diagnostic::error(
                            Some(span),
                            eco_format!("cannot parse `{other}`"),
                        ));
                    }
                }
            }
        }
        (Some(tree), errors)
    }

    fn resolve(
        &self,
        _file: FileName,
        tree: &ToyTree,
        importer: &mut dyn Importer<Self>,
    ) -> Result<ResolvedModule<Self>, EcoVec<ResolveError>> {
        self.counters.resolves.fetch_add(1, Ordering::Relaxed);

        let mut exports: BTreeSet<String> = tree.lets.iter().cloned().collect();
        let mut import_failed = false;
        for (path, span) in &tree.imports {
            match importer.import(path, *span) {
                ImportOutcome::Imported(_, sig) => exports.extend(sig.exports),
                // The adapter recorded the failure; resolution continues
                // with whatever scope it has.
                ImportOutcome::NotFound(_) | ImportOutcome::Errored | ImportOutcome::Cycle(_) => {
                    import_failed = true;
                }
            }
        }

        let mut errors = EcoVec::new();
        for name in &tree.uses {
            if !exports.contains(name) {
                errors.push(ResolveError::Other(Diagnostic::error(
                    None,
                    eco_format!("unknown name `{name}`"),
                )));
            }
        }
        if import_failed || !errors.is_empty() {
            return Err(errors);
        }

        Ok(ResolvedModule {
            program: ToyResolved {
                exports: exports.clone(),
                type_error: tree.type_error,
                type_warn: tree.type_warn,
                type_fatal: tree.type_fatal,
                verify_bad: tree.verify_bad,
            },
            signature: ToySig { exports },
        })
    }

    fn desugar(&self, program: &ToyResolved) -> ToyResolved {
        program.clone()
    }

    fn base_env(&self) -> ToyEnv {
        ToyEnv::default()
    }

    fn merge_env(&self, env: &mut ToyEnv, dep: &ToyEnv) {
        env.vals.extend(dep.vals.iter().cloned());
    }

    fn infer(&self, _env: ToyEnv, program: ToyResolved) -> InferOutcome<Self> {
        self.counters.infers.fetch_add(1, Ordering::Relaxed);

        let mut errors = EcoVec::new();
        if program.type_error {
            errors.push(Diagnostic::error(None, "type mismatch"));
        }
        if program.type_warn {
            errors.push(Diagnostic::warning(None, "shadowed binding"));
        }
        let typed = (!program.type_fatal).then(|| {
            (
                ToyTyped {
                    exports: program.exports.clone(),
                    verify_bad: program.verify_bad,
                },
                ToyEnv {
                    vals: program.exports,
                },
            )
        });
        InferOutcome { typed, errors }
    }

    fn verify(&self, program: &ToyTyped) -> EcoVec<Diagnostic> {
        self.counters.verifies.fetch_add(1, Ordering::Relaxed);
        if program.verify_bad {
            eco_vec![Diagnostic::error(None, "assertion may fail")]
        } else {
            EcoVec::new()
        }
    }
}

/// Result a request sink funnels back to the test.
pub(crate) type Answer<T> = Result<(FileName, Version, T), RequestError>;

/// A worker over the toy front-end plus everything a test pokes at.
pub(crate) struct Fixture {
    pub dir: TempDir,
    pub worker: Worker<ToyFrontend>,
    pub diags: Receiver<(Url, ErrorBundle)>,
    pub counters: Arc<Counters>,
}

impl Fixture {
    pub fn new() -> Self {
        let dir = tempfile::tempdir().expect("tempdir");
        let counters = Arc::new(Counters::default());
        let (diag_tx, diags) = crossbeam_channel::unbounded();
        let worker = Worker::spawn(
            ToyFrontend {
                counters: counters.clone(),
            },
            diag_tx,
        );
        Self {
            dir,
            worker,
            diags,
            counters,
        }
    }

    pub fn uri(&self, name: &str) -> Url {
        normalize_uri(Url::from_file_path(self.dir.path().join(name)).expect("file uri"))
    }

    pub fn open(&self, name: &str, version: i32, text: &str) {
        self.worker
            .update_file(self.uri(name), Version::new(version), Rope::from_str(text));
    }

    pub fn write_disk(&self, name: &str, text: &str) {
        std::fs::write(self.dir.path().join(name), text).expect("write disk file");
    }

    pub fn remove_disk(&self, name: &str) {
        std::fs::remove_file(self.dir.path().join(name)).expect("remove disk file");
    }

    pub fn refresh_settle(&self) {
        self.worker.refresh(None);
        self.worker.settle();
    }

    pub fn parses(&self) -> usize {
        self.counters.parses.load(Ordering::Relaxed)
    }

    pub fn resolves(&self) -> usize {
        self.counters.resolves.load(Ordering::Relaxed)
    }

    pub fn request_parsed(&self, id: u64, name: &str) -> Receiver<Answer<Option<ToyTree>>> {
        let (tx, rx) = crossbeam_channel::unbounded();
        let err_tx = tx.clone();
        self.worker.start_request(
            RequestId::new(id),
            Request::new(
                self.uri(name),
                RequestKind::Parsed(Box::new(move |file, version, tree| {
                    let _ = tx.send(Ok((file, version, tree)));
                })),
                Box::new(move |err| {
                    let _ = err_tx.send(Err(err));
                }),
            ),
        );
        rx
    }

    pub fn request_typed(
        &self,
        id: u64,
        name: &str,
    ) -> Receiver<Answer<Option<TypedPayload<ToyFrontend>>>> {
        let (tx, rx) = crossbeam_channel::unbounded();
        let err_tx = tx.clone();
        self.worker.start_request(
            RequestId::new(id),
            Request::new(
                self.uri(name),
                RequestKind::Typed(Box::new(move |file, version, typed| {
                    let _ = tx.send(Ok((file, version, typed)));
                })),
                Box::new(move |err| {
                    let _ = err_tx.send(Err(err));
                }),
            ),
        );
        rx
    }

    pub fn request_errors(&self, id: u64, name: &str) -> Receiver<Answer<ErrorBundle>> {
        let (tx, rx) = crossbeam_channel::unbounded();
        let err_tx = tx.clone();
        self.worker.start_request(
            RequestId::new(id),
            Request::new(
                self.uri(name),
                RequestKind::Errors(Box::new(move |file, version, errors| {
                    let _ = tx.send(Ok((file, version, errors)));
                })),
                Box::new(move |err| {
                    let _ = err_tx.send(Err(err));
                }),
            ),
        );
        rx
    }

    /// Waits for the answer to an already-satisfiable request.
    pub fn answer<T>(rx: &Receiver<Answer<T>>) -> Answer<T> {
        rx.recv_timeout(TICK).expect("request went unanswered")
    }
}
