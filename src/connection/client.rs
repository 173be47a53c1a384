use std::path::Path;

use thiserror::Error;

use crate::config::ServerProfile;

#[derive(Debug, Error)]
pub enum ClientError {
    #[error("TCP connection failed: {0}")]
    Tcp(#[from] std::io::Error),
    #[error("Local file error: {0}")]
    Local(#[source] std::io::Error),
    #[error("SSH error: {0}")]
    Ssh(#[from] ssh2::Error),
    #[error("Authentication failed")]
    AuthFailed,
    #[error("Key file not found: {0}")]
    KeyNotFound(String),
    #[error("Host key rejected for {0}")]
    HostKey(String),
    #[error("Remote path error: {0}")]
    Path(String),
    #[error("Command exited with status {status}: {message}")]
    Command { status: i32, message: String },
    #[error("Connection closed")]
    Closed,
}

// libssh2 socket-level error codes.
const LIBSSH2_ERROR_SOCKET_SEND: i32 = -7;
const LIBSSH2_ERROR_SOCKET_DISCONNECT: i32 = -13;
const LIBSSH2_ERROR_SOCKET_TIMEOUT: i32 = -30;
const LIBSSH2_ERROR_SOCKET_RECV: i32 = -43;

impl ClientError {
    /// True when the failure means the connection itself is gone, as opposed
    /// to a single request being refused.
    pub fn is_transport(&self) -> bool {
        match self {
            Self::Tcp(_) | Self::Closed => true,
            Self::Ssh(e) => matches!(
                e.code(),
                ssh2::ErrorCode::Session(
                    LIBSSH2_ERROR_SOCKET_SEND
                        | LIBSSH2_ERROR_SOCKET_DISCONNECT
                        | LIBSSH2_ERROR_SOCKET_TIMEOUT
                        | LIBSSH2_ERROR_SOCKET_RECV
                )
            ),
            _ => false,
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum EntryKind {
    File,
    Directory,
}

/// A single row of a remote directory listing.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct RemoteEntry {
    pub name: String,
    pub kind: EntryKind,
    /// Only set for files.
    pub size: Option<u64>,
    /// Unix permission string like "rwxr-xr-x", when the server reports one.
    pub permissions: Option<String>,
}

impl RemoteEntry {
    pub fn file(name: impl Into<String>, size: Option<u64>) -> Self {
        Self {
            name: name.into(),
            kind: EntryKind::File,
            size,
            permissions: None,
        }
    }

    pub fn directory(name: impl Into<String>) -> Self {
        Self {
            name: name.into(),
            kind: EntryKind::Directory,
            size: None,
            permissions: None,
        }
    }

    pub fn is_dir(&self) -> bool {
        self.kind == EntryKind::Directory
    }
}

/// The request set the engine needs from a file-transfer connection.
///
/// Implementations are not expected to handle concurrent requests; the
/// session manager serializes every call through one gate per session.
/// `close` is the exception and may be called while a request is running.
pub trait RemoteClient: Send + Sync {
    /// Entries of `dir` in server order, without `.` and `..`.
    fn list(&self, dir: &str) -> Result<Vec<RemoteEntry>, ClientError>;
    /// Returns the number of bytes written.
    fn upload_from(&self, local: &Path, remote: &str) -> Result<u64, ClientError>;
    /// Returns the number of bytes read.
    fn download_to(&self, local: &Path, remote: &str) -> Result<u64, ClientError>;
    fn rename(&self, from: &str, to: &str) -> Result<(), ClientError>;
    fn remove(&self, path: &str) -> Result<(), ClientError>;
    /// Recursive.
    fn remove_dir(&self, path: &str) -> Result<(), ClientError>;
    /// Creates `path` and any missing parents; existing directories are fine.
    fn ensure_dir(&self, path: &str) -> Result<(), ClientError>;
    /// Out-of-band command; returns the server's response text.
    fn send_raw(&self, command: &str) -> Result<String, ClientError>;
    fn close(&self);
}

/// Builds an authenticated client for a server profile.
pub trait Connector: Send + Sync {
    fn connect(&self, server: &ServerProfile) -> Result<Box<dyn RemoteClient>, ClientError>;
}
