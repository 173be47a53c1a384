use std::collections::HashMap;
use std::path::{Path, PathBuf};

use parking_lot::RwLock;
use tracing::debug;

/// Remembers where each downloaded-for-editing temp file came from, so a
/// save uploads back to the origin instead of a mapped path.
///
/// Entries live until the editor for that file is closed. Removing an entry
/// never touches the temp file or the remote file.
#[derive(Debug, Default)]
pub struct OpenFileRegistry {
    entries: RwLock<HashMap<PathBuf, String>>,
}

impl OpenFileRegistry {
    pub fn new() -> Self {
        Self::default()
    }

    /// Insert or overwrite.
    pub fn register(&self, local: impl Into<PathBuf>, remote: impl Into<String>) {
        let local = local.into();
        let remote = remote.into();
        debug!("tracking {} -> {}", local.display(), remote);
        self.entries.write().insert(local, remote);
    }

    pub fn lookup(&self, local: &Path) -> Option<String> {
        self.entries.read().get(local).cloned()
    }

    /// Returns the remote path that was associated, if any.
    pub fn unregister(&self, local: &Path) -> Option<String> {
        let removed = self.entries.write().remove(local);
        if removed.is_some() {
            debug!("stopped tracking {}", local.display());
        }
        removed
    }

    pub fn clear(&self) {
        self.entries.write().clear();
    }

    pub fn len(&self) -> usize {
        self.entries.read().len()
    }

    pub fn is_empty(&self) -> bool {
        self.entries.read().is_empty()
    }
}
