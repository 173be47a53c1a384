use crate::connection::RemoteEntry;
use crate::paths::{join_remote_path, parent_remote_path};

/// The remote directory being browsed and its last listing.
///
/// `items` and `current_dir` only change together through
/// [`RemoteBrowserState::apply_listing`]; the selection is either `None` or a
/// valid index into `items`.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct RemoteBrowserState {
    current_dir: String,
    items: Vec<RemoteEntry>,
    selected: Option<usize>,
}

impl Default for RemoteBrowserState {
    fn default() -> Self {
        Self::new("/")
    }
}

impl RemoteBrowserState {
    pub fn new(current_dir: impl Into<String>) -> Self {
        Self {
            current_dir: current_dir.into(),
            items: Vec::new(),
            selected: None,
        }
    }

    pub fn current_dir(&self) -> &str {
        &self.current_dir
    }

    /// Entries in server order.
    pub fn items(&self) -> &[RemoteEntry] {
        &self.items
    }

    pub fn selected_index(&self) -> Option<usize> {
        self.selected
    }

    /// Start over at `dir` with an empty listing (fresh connection).
    pub fn reset(&mut self, dir: impl Into<String>) {
        self.current_dir = dir.into();
        self.items.clear();
        self.selected = None;
    }

    /// Replace the listing in one step and clear the selection.
    pub fn apply_listing(&mut self, dir: impl Into<String>, items: Vec<RemoteEntry>) {
        self.current_dir = dir.into();
        self.items = items;
        self.selected = None;
    }

    /// Drop the listing but keep `current_dir` (disconnect).
    pub fn clear_listing(&mut self) {
        self.items.clear();
        self.selected = None;
    }

    /// Select `index`, or clear the selection with `None`. Out-of-range
    /// indices are refused and leave the selection untouched.
    pub fn select(&mut self, index: Option<usize>) -> bool {
        match index {
            Some(i) if i >= self.items.len() => false,
            other => {
                self.selected = other;
                true
            }
        }
    }

    pub fn selected(&self) -> Option<&RemoteEntry> {
        self.selected.and_then(|i| self.items.get(i))
    }

    /// Directory reached by entering `name` from here.
    pub fn child_dir(&self, name: &str) -> String {
        join_remote_path(&self.current_dir, name)
    }

    /// Directory reached by going up one level from here.
    pub fn parent_dir(&self) -> String {
        parent_remote_path(&self.current_dir)
    }

    /// Full remote path of the selected entry.
    pub fn selected_path(&self) -> Option<String> {
        self.selected().map(|e| self.child_dir(&e.name))
    }

    pub fn move_up(&mut self) {
        self.selected = match self.selected {
            Some(i) if i > 0 => Some(i - 1),
            Some(i) => Some(i),
            None if !self.items.is_empty() => Some(0),
            None => None,
        };
    }

    pub fn move_down(&mut self) {
        self.selected = match self.selected {
            Some(i) if i + 1 < self.items.len() => Some(i + 1),
            Some(i) => Some(i),
            None if !self.items.is_empty() => Some(0),
            None => None,
        };
    }
}
