//! Import resolution: maps import paths to URIs, records dependency edges
//! and environments, and detects cycles while the resolver runs.
//!
//! The adapter is handed to [`Frontend::resolve`] as its `Importer`; queries
//! compose left-to-right and outputs accumulate by set union on URIs, one
//! span per URI (the first seen this pass). Import failures are recorded
//! here, once, so the resolver never has to duplicate them.

use std::path::{Path, PathBuf};

use ecow::{eco_format, eco_vec, EcoString, EcoVec};
use lsp_types::Url;
use path_clean::PathClean;

use skein_compile::{
    Diagnostic, Frontend, ImportError, ImportOutcome, Importer, ResolveError, Span,
};

use crate::compile::CompilePass;
use crate::fs::normalize_uri;
use crate::state::Dependencies;

/// Joins a relative import against the importer's directory and cleans the
/// result lexically, so a target that exists only in the editor still gets
/// a canonical path.
pub(crate) fn join_relative(importer_dir: &Path, path: &str) -> PathBuf {
    importer_dir.join(path).clean()
}

/// Dependency edges and environments captured during one file's resolution.
pub(crate) struct ImportCapture<F: Frontend> {
    /// Imported URI → span of the first import seen this pass.
    pub dependencies: Dependencies,
    /// Environments of cleanly imported modules, in first-seen order.
    pub envs: Vec<F::Env>,
    /// Import errors the adapter contributes to the resolve section.
    pub errors: EcoVec<ResolveError>,
}

impl<F: Frontend> Default for ImportCapture<F> {
    fn default() -> Self {
        Self {
            dependencies: Dependencies::default(),
            envs: Vec::new(),
            errors: EcoVec::new(),
        }
    }
}

/// The [`Importer`] implementation threaded through name resolution.
pub(crate) struct ImportAdapter<'a, F: Frontend> {
    pass: &'a mut CompilePass<F>,
    importer: Url,
    importer_dir: Option<PathBuf>,
    capture: ImportCapture<F>,
}

impl<'a, F: Frontend> ImportAdapter<'a, F> {
    pub fn new(pass: &'a mut CompilePass<F>, importer: Url) -> Self {
        let importer_dir = importer
            .to_file_path()
            .ok()
            .and_then(|path| path.parent().map(Path::to_path_buf));
        Self {
            pass,
            importer,
            importer_dir,
            capture: ImportCapture::default(),
        }
    }

    /// Hands back everything recorded during resolution.
    pub fn finish(self) -> ImportCapture<F> {
        self.capture
    }

    /// Maps an import path to a candidate URI. Paths starting with `.`
    /// resolve against the importer's directory; everything else tries each
    /// library path in order and the first hit wins, where a hit is a file
    /// that is open in the editor or present on disk.
    fn locate(&self, path: &str) -> Option<Url> {
        if path.starts_with('.') {
            let dir = self.importer_dir.as_deref()?;
            return Url::from_file_path(join_relative(dir, path))
                .ok()
                .map(normalize_uri);
        }
        for prefix in self.pass.library_paths() {
            let candidate = prefix.join(path).clean();
            let Ok(uri) = Url::from_file_path(&candidate) else {
                continue;
            };
            let uri = normalize_uri(uri);
            if self.pass.candidate_exists(&uri, &candidate) {
                return Some(uri);
            }
        }
        None
    }

    fn not_found(&mut self, path: &str, span: Span) -> ImportOutcome<F> {
        self.capture.errors.push(ResolveError::Import(ImportError {
            path: path.into(),
            span,
        }));
        ImportOutcome::NotFound(path.into())
    }

    fn cycle(&mut self, path: &str, span: Span) -> ImportOutcome<F> {
        let chain: EcoVec<(EcoString, Span)> = eco_vec![(EcoString::from(path), span)];
        self.capture
            .errors
            .push(ResolveError::ImportCycle(chain.clone()));
        self.pass.mark_cycle(self.importer.clone());
        ImportOutcome::Cycle(chain)
    }
}

impl<F: Frontend> Importer<F> for ImportAdapter<'_, F> {
    fn import(&mut self, path: &str, span: Span) -> ImportOutcome<F> {
        let Some(uri) = self.locate(path) else {
            return self.not_found(path, span);
        };

        let loaded = match self.pass.load_file(&uri, Some((self.importer.clone(), span))) {
            Ok(loaded) => loaded,
            // The pass is being torn down. Answer something harmless; the
            // driver rechecks cancellation before committing anything.
            Err(_interrupted) => return ImportOutcome::Errored,
        };

        let Some(dep) = loaded else {
            return self.not_found(path, span);
        };

        // Record the edge whenever a state exists, so the next pass can see
        // through it even if this import went badly.
        self.capture.dependencies.entry(uri.clone()).or_insert(span);

        // A dependency still marked as working closes a cycle; one that
        // finished with a cycle error of its own propagates it, which is
        // how every member of a cycle ends up reporting it no matter which
        // file a pass happens to visit first.
        if !dep.working.is_done() || self.pass.cycled(&uri) {
            return self.cycle(path, span);
        }

        match dep.signature {
            Some(signature) => {
                if let Some(env) = dep.env {
                    self.capture.envs.push(env);
                }
                ImportOutcome::Imported(dep.name, signature)
            }
            None => {
                self.capture.errors.push(ResolveError::Other(Diagnostic::error(
                    Some(span),
                    eco_format!("imported module `{path}` did not compile"),
                )));
                ImportOutcome::Errored
            }
        }
    }
}
