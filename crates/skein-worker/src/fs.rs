//! The content store: what the editor or the disk currently says each file
//! contains, together with the world clock.
//!
//! Every mutation ticks the clock as part of the same critical section, so
//! readers always observe a consistent `(contents, clock)` pair. The map is
//! persistent, which lets a compile pass snapshot the whole store in O(1)
//! and work against a frozen view while the editor keeps typing.

use lsp_types::Url;
use path_clean::PathClean;
use ropey::Rope;
use rpds::RedBlackTreeMapSync;

use crate::clock::{Clock, Version};

/// Normalizes a URI so every store keys on one canonical spelling.
///
/// The URL parser already lower-cases the scheme; file URIs additionally get
/// their paths lexically cleaned so `a/./b` and `a//b` collapse to the same
/// key. Lexical cleaning (rather than `fs::canonicalize`) keeps URIs for
/// files that exist only in the editor resolvable.
pub fn normalize_uri(uri: Url) -> Url {
    if uri.scheme() == "file" {
        if let Ok(path) = uri.to_file_path() {
            if let Ok(clean) = Url::from_file_path(path.clean()) {
                return clean;
            }
        }
    }
    uri
}

/// Contents of one file, as far as the worker knows.
#[derive(Debug, Clone)]
pub enum FileContents {
    /// The file is open in an editor. Its text is authoritative and the
    /// disk is ignored.
    Opened {
        /// The editor's revision number for this text.
        version: Version,
        /// The text itself.
        text: Rope,
    },
    /// The file lives on disk. `dirty` forces the next read to bypass the
    /// content-hash short circuit.
    OnDisk {
        /// Set by `touchFile`; cleared once a pass has re-read the bytes.
        dirty: bool,
    },
}

/// Mapping from normalized URI to current contents, plus the world clock.
///
/// A missing entry is the implicit `OnDisk { dirty: false }` sentinel: any
/// file nobody opened or touched is assumed to live quietly on disk.
#[derive(Debug, Clone, Default)]
pub struct ContentStore {
    clock: Clock,
    entries: RedBlackTreeMapSync<Url, FileContents>,
}

impl ContentStore {
    /// The clock as of the last mutation.
    pub fn clock(&self) -> Clock {
        self.clock
    }

    /// The entry for `uri`, if one exists.
    pub fn get(&self, uri: &Url) -> Option<&FileContents> {
        self.entries.get(uri)
    }

    /// The version and text of `uri` when it is open in an editor.
    pub fn opened(&self, uri: &Url) -> Option<(Version, &Rope)> {
        match self.entries.get(uri) {
            Some(FileContents::Opened { version, text }) => Some((*version, text)),
            _ => None,
        }
    }

    /// Whether `uri` has an entry carrying the dirty flag.
    pub fn dirty(&self, uri: &Url) -> bool {
        matches!(self.entries.get(uri), Some(FileContents::OnDisk { dirty: true }))
    }

    /// Iterates the URIs currently open in an editor.
    pub fn opened_uris(&self) -> impl Iterator<Item = &Url> {
        self.entries.iter().filter_map(|(uri, contents)| {
            matches!(contents, FileContents::Opened { .. }).then_some(uri)
        })
    }

    /// An O(1) frozen copy of the store.
    pub fn snapshot(&self) -> ContentStore {
        self.clone()
    }

    /// Replaces the contents of `uri` with opened editor text.
    pub(crate) fn update(&mut self, uri: Url, version: Version, text: Rope) {
        self.entries
            .insert_mut(uri, FileContents::Opened { version, text });
        self.clock.tick();
    }

    /// Records an on-disk change to `uri`. Opened entries are unaffected
    /// (editor text stays authoritative), but the clock still ticks so a
    /// refresh revisits the world.
    pub(crate) fn touch(&mut self, uri: &Url) {
        match self.entries.get(uri) {
            Some(FileContents::Opened { .. }) => {}
            _ => {
                self.entries
                    .insert_mut(uri.clone(), FileContents::OnDisk { dirty: true });
            }
        }
        self.clock.tick();
    }

    /// Drops the entry for `uri`, returning the file to the implicit
    /// on-disk sentinel.
    pub(crate) fn close(&mut self, uri: &Url) {
        self.entries.remove_mut(uri);
        self.clock.tick();
    }

    /// Clears the dirty flag after a pass re-read the bytes. Not a content
    /// mutation, so the clock does not tick.
    pub(crate) fn clear_dirty(&mut self, uri: &Url) {
        if self.dirty(uri) {
            self.entries
                .insert_mut(uri.clone(), FileContents::OnDisk { dirty: false });
        }
    }

    /// Drops an on-disk sentinel for a file that turned out not to exist.
    /// Opened entries are left alone; the clock does not tick.
    pub(crate) fn remove_sentinel(&mut self, uri: &Url) {
        if let Some(FileContents::OnDisk { .. }) = self.entries.get(uri) {
            self.entries.remove_mut(uri);
        }
    }
}
