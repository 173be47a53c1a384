//! Browse a remote server over SFTP, edit remote files locally and push
//! saves back to where they came from.

pub mod browser;
pub mod config;
pub mod connection;
pub mod engine;
pub mod logging;
pub mod notifications;
pub mod paths;
pub mod registry;
pub mod transfer;

#[cfg(test)]
mod testing;

pub use browser::RemoteBrowserState;
pub use engine::{BatchReport, Engine, EngineError};
pub use notifications::{Level, LogNotifier, Notifier};
pub use registry::OpenFileRegistry;
