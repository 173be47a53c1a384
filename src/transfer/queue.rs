use std::sync::Arc;

use parking_lot::Mutex;

/// Current state of the last transfer (upload or download).
#[derive(Debug, Clone, PartialEq, Eq, Default)]
pub enum TransferState {
    /// Nothing has run yet.
    #[default]
    Idle,
    /// Transfer is in progress.
    Running,
    /// Transfer finished successfully.
    Done,
    /// Transfer failed with an error message.
    Failed(String),
}

/// Shared progress state. Written by the transferring thread, readable by
/// the host while the transfer runs.
#[derive(Debug, Clone, Default)]
pub struct TransferProgress {
    pub state: TransferState,
    /// What is running, e.g. "upload /var/www".
    pub operation: String,
    /// Remote path of the file currently being transferred.
    pub current_file: String,
    /// Number of files fully transferred so far.
    pub files_done: usize,
    /// Directories created on the destination side.
    pub dirs_created: usize,
    /// Bytes moved across all finished files.
    pub bytes_done: u64,
}

impl TransferProgress {
    pub fn begin(&mut self, operation: impl Into<String>) {
        *self = Self {
            state: TransferState::Running,
            operation: operation.into(),
            ..Self::default()
        };
    }

    pub fn file_started(&mut self, path: &str) {
        self.current_file = path.to_string();
    }

    pub fn file_finished(&mut self, bytes: u64) {
        self.files_done += 1;
        self.bytes_done += bytes;
    }

    pub fn dir_created(&mut self) {
        self.dirs_created += 1;
    }

    pub fn finish<E: std::fmt::Display>(&mut self, result: Result<(), &E>) {
        self.current_file.clear();
        self.state = match result {
            Ok(()) => TransferState::Done,
            Err(e) => TransferState::Failed(e.to_string()),
        };
    }

    pub fn is_running(&self) -> bool {
        self.state == TransferState::Running
    }
}

/// A thread-safe handle to transfer progress.
pub type ProgressHandle = Arc<Mutex<TransferProgress>>;

pub fn new_progress_handle() -> ProgressHandle {
    Arc::new(Mutex::new(TransferProgress::default()))
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_begin_resets_counters() {
        let mut progress = TransferProgress::default();
        progress.begin("upload /a");
        progress.file_started("/a/b.txt");
        progress.file_finished(10);
        progress.dir_created();
        progress.finish::<String>(Ok(()));
        assert_eq!(progress.state, TransferState::Done);
        assert_eq!(progress.files_done, 1);
        assert_eq!(progress.bytes_done, 10);

        progress.begin("download /b");
        assert!(progress.is_running());
        assert_eq!(progress.files_done, 0);
        assert_eq!(progress.operation, "download /b");
    }

    #[test]
    fn test_finish_with_error() {
        let mut progress = TransferProgress::default();
        progress.begin("upload /a");
        let err = "boom".to_string();
        progress.finish(Err(&err));
        assert_eq!(progress.state, TransferState::Failed("boom".into()));
    }
}
