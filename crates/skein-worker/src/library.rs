//! Library-path configuration: externally-configured prefixes followed by
//! standard discovery.

use std::path::PathBuf;

/// Environment variable consulted by standard discovery. Entries are
/// separated like `PATH`.
pub const LIBRARY_PATH_VAR: &str = "SKEIN_PATH";

/// Ordered list of prefixes import search tries, configured entries first.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct LibraryPaths {
    paths: Vec<PathBuf>,
}

impl LibraryPaths {
    /// Recomputes the list from externally-configured prefixes plus
    /// standard discovery.
    pub fn recompute(extra: Vec<PathBuf>) -> Self {
        let mut paths = extra;
        if let Some(var) = std::env::var_os(LIBRARY_PATH_VAR) {
            paths.extend(std::env::split_paths(&var));
        }
        log::debug!("Worker: library paths are {paths:?}");
        Self { paths }
    }

    /// Iterates the prefixes in search order.
    pub fn iter(&self) -> impl Iterator<Item = &PathBuf> {
        self.paths.iter()
    }
}

impl FromIterator<PathBuf> for LibraryPaths {
    fn from_iter<I: IntoIterator<Item = PathBuf>>(iter: I) -> Self {
        Self {
            paths: iter.into_iter().collect(),
        }
    }
}

impl AsRef<[PathBuf]> for LibraryPaths {
    fn as_ref(&self) -> &[PathBuf] {
        &self.paths
    }
}
