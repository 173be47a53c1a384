pub mod archive;
pub mod orchestrator;
pub mod queue;
pub mod staging;

use thiserror::Error;

use crate::connection::ClientError;

pub use archive::zip_directory;
pub use orchestrator::{chmod_command, Transfers, MAX_REMOTE_DEPTH};
pub use queue::{new_progress_handle, ProgressHandle, TransferProgress, TransferState};
pub use staging::TempLayout;

#[derive(Debug, Error)]
pub enum TransferError {
    #[error(transparent)]
    Client(#[from] ClientError),
    #[error("Local IO error: {0}")]
    Local(#[from] std::io::Error),
    #[error("Archive error: {0}")]
    Archive(#[from] zip::result::ZipError),
    #[error("Directory walk failed: {0}")]
    Walk(#[from] walkdir::Error),
    #[error("Remote tree too deep at {0} (symlink loop?)")]
    DepthExceeded(String),
}

impl TransferError {
    pub fn is_transport(&self) -> bool {
        matches!(self, Self::Client(e) if e.is_transport())
    }
}
