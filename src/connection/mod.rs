pub mod client;
pub mod session;
pub mod sftp;

pub use client::{ClientError, Connector, EntryKind, RemoteClient, RemoteEntry};
pub use session::{ActiveSession, SessionManager};
pub use sftp::{SftpClient, SftpConnector};
