use std::collections::HashMap;
use std::io;
use std::path::{Path, PathBuf};
use std::sync::{Arc, Mutex};
use tokio::sync::OnceCell;

/// State shared by the components of one resolution session.
///
/// Both caches are populated on first miss and never invalidated. Passing a
/// `Context` explicitly, instead of reaching for process globals, lets each
/// test start from a clean (or pre-populated) state.
#[derive(Debug, Default)]
pub struct Context {
    files: FileCache,
    token: OnceCell<Option<String>>,
}

impl Context {
    pub fn new() -> Self {
        Self::default()
    }

    /// A context whose bearer token is already known.
    pub fn with_token(token: Option<String>) -> Self {
        Self {
            files: FileCache::default(),
            token: OnceCell::new_with(Some(token)),
        }
    }

    /// Pre-populate the file cache with `contents` for `path`.
    pub fn with_file(self, path: impl Into<PathBuf>, contents: impl Into<Arc<str>>) -> Self {
        self.files.insert(path.into(), contents.into());
        self
    }

    pub fn files(&self) -> &FileCache {
        &self.files
    }

    pub(crate) fn token_cell(&self) -> &OnceCell<Option<String>> {
        &self.token
    }
}

/// Read-through cache of UTF-8 file contents.
#[derive(Debug, Default)]
pub struct FileCache {
    entries: Mutex<HashMap<PathBuf, Arc<str>>>,
}

impl FileCache {
    pub fn read(&self, path: &Path) -> io::Result<Arc<str>> {
        if let Some(hit) = self.lock().get(path) {
            return Ok(hit.clone());
        }

        let contents: Arc<str> = std::fs::read_to_string(path)?.into();
        self.insert(path.to_path_buf(), contents.clone());
        Ok(contents)
    }

    pub fn contains(&self, path: &Path) -> bool {
        self.lock().contains_key(path)
    }

    fn insert(&self, path: PathBuf, contents: Arc<str>) {
        self.lock().entry(path).or_insert(contents);
    }

    fn lock(&self) -> std::sync::MutexGuard<'_, HashMap<PathBuf, Arc<str>>> {
        // A poisoned map still holds valid entries.
        self.entries.lock().unwrap_or_else(|e| e.into_inner())
    }
}
