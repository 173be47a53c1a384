//! The sync engine: one instance per activation, holding the session, the
//! browser state and the open-file registry.
//!
//! Every public operation reports its terminal outcome through the
//! [`Notifier`] exactly once. Batch upload reports once per item.

use std::fs;
use std::path::{Path, PathBuf};
use std::sync::Arc;

use parking_lot::RwLock;
use thiserror::Error;
use tracing::{debug, info, warn};

use crate::browser::RemoteBrowserState;
use crate::config::{ConfigError, ConfigSource, PathMapping, ServerProfile, Settings};
use crate::connection::{ActiveSession, ClientError, Connector, EntryKind, RemoteClient, RemoteEntry, SessionManager};
use crate::notifications::{Level, Notifier};
use crate::paths::{check_entry_name, join_remote_path, resolve_remote_path, ProjectRelativizer, ProjectRoots};
use crate::registry::OpenFileRegistry;
use crate::transfer::{
    chmod_command, new_progress_handle, zip_directory, ProgressHandle, TempLayout, TransferError,
    TransferProgress, Transfers,
};

#[derive(Debug, Error)]
pub enum EngineError {
    #[error("Config error: {0}")]
    Config(#[from] ConfigError),
    #[error("Server not found: {0}")]
    ServerNotFound(String),
    #[error("Could not connect to {server}: {source}")]
    ConnectionFailed {
        server: String,
        #[source]
        source: ClientError,
    },
    #[error("Not connected to any server")]
    NotConnected,
    #[error("Could not determine remote path for {}", .0.display())]
    NoRemoteDestination(PathBuf),
    #[error("Could not list {path}: {source}")]
    List {
        path: String,
        #[source]
        source: ClientError,
    },
    #[error("Transfer of {path} failed: {source}")]
    Transfer {
        path: String,
        #[source]
        source: TransferError,
    },
    #[error("Rename {from} -> {to} failed: {source}")]
    Rename {
        from: String,
        to: String,
        #[source]
        source: ClientError,
    },
    #[error("Delete of {path} failed: {source}")]
    Delete {
        path: String,
        #[source]
        source: TransferError,
    },
    #[error("chmod {mode} {path} rejected: {source}")]
    ChmodUnsupported {
        path: String,
        mode: String,
        #[source]
        source: ClientError,
    },
    #[error("Archive of {path} failed: {source}")]
    Archive {
        path: String,
        #[source]
        source: TransferError,
    },
    #[error("No remote item selected")]
    NoSelection,
    #[error("{0} is a directory")]
    NotAFile(String),
    #[error("{0} is not a directory")]
    NotADirectory(String),
    #[error("Invalid name '{name}': {reason}")]
    InvalidName { name: String, reason: &'static str },
    #[error("{0}")]
    InvalidArgument(String),
}

impl EngineError {
    /// The connection is gone and the session has been dropped.
    pub fn is_transport(&self) -> bool {
        match self {
            Self::List { source, .. }
            | Self::Rename { source, .. }
            | Self::ChmodUnsupported { source, .. } => source.is_transport(),
            Self::Transfer { source, .. } | Self::Delete { source, .. } | Self::Archive { source, .. } => {
                source.is_transport()
            }
            _ => false,
        }
    }

    pub fn level(&self) -> Level {
        match self {
            Self::NotConnected
            | Self::NoSelection
            | Self::NotAFile(_)
            | Self::NotADirectory(_)
            | Self::InvalidName { .. }
            | Self::InvalidArgument(_) => Level::Warning,
            _ => Level::Error,
        }
    }
}

/// Outcome of [`Engine::batch_upload`]; every item is attempted.
#[derive(Debug, Default, Clone, PartialEq, Eq)]
pub struct BatchReport {
    /// Remote paths that were written.
    pub uploaded: Vec<String>,
    /// Local paths that failed, with the reason.
    pub failed: Vec<(PathBuf, String)>,
}

pub struct Engine {
    config: ConfigSource,
    session: SessionManager,
    browser: RwLock<RemoteBrowserState>,
    registry: OpenFileRegistry,
    layout: TempLayout,
    projects: Box<dyn ProjectRelativizer>,
    notifier: Box<dyn Notifier>,
    progress: ProgressHandle,
}

impl Engine {
    /// Build an engine. `temp_root` and `project_roots` are taken from the
    /// settings as they are right now; everything else is re-read per call.
    pub fn new(config: ConfigSource, connector: Box<dyn Connector>, notifier: Box<dyn Notifier>) -> Self {
        let settings = config.settings().unwrap_or_else(|e| {
            warn!("{e}; using default settings");
            Settings::default()
        });
        let layout = settings.temp_root.map(TempLayout::new).unwrap_or_default();

        Self {
            config,
            session: SessionManager::new(connector),
            browser: RwLock::new(RemoteBrowserState::default()),
            registry: OpenFileRegistry::new(),
            layout,
            projects: Box::new(ProjectRoots::new(settings.project_roots)),
            notifier,
            progress: new_progress_handle(),
        }
    }

    pub fn with_projects(mut self, projects: impl ProjectRelativizer + 'static) -> Self {
        self.projects = Box::new(projects);
        self
    }

    pub fn with_temp_root(mut self, root: impl Into<PathBuf>) -> Self {
        self.layout = TempLayout::new(root);
        self
    }

    // ---------------------------------------------------------------------
    // Configuration
    // ---------------------------------------------------------------------

    /// Configured servers; a malformed config is reported and reads as empty.
    pub fn servers(&self) -> Vec<ServerProfile> {
        self.config.servers().unwrap_or_else(|e| {
            self.report(&EngineError::Config(e));
            Vec::new()
        })
    }

    pub fn mappings(&self) -> Vec<PathMapping> {
        self.config.mappings().unwrap_or_else(|e| {
            self.report(&EngineError::Config(e));
            Vec::new()
        })
    }

    pub fn settings(&self) -> Settings {
        self.config.settings().unwrap_or_else(|e| {
            self.report(&EngineError::Config(e));
            Settings::default()
        })
    }

    pub fn layout(&self) -> &TempLayout {
        &self.layout
    }

    pub fn registry(&self) -> &OpenFileRegistry {
        &self.registry
    }

    /// Snapshot of the last (or running) transfer.
    pub fn progress(&self) -> TransferProgress {
        self.progress.lock().clone()
    }

    // ---------------------------------------------------------------------
    // Session
    // ---------------------------------------------------------------------

    /// Connect to `name`, or to the configured default server. Any current
    /// session is closed first, even when reconnecting to the same server.
    pub fn connect(&self, name: Option<&str>) -> Result<(), EngineError> {
        match self.connect_inner(name) {
            Ok((server, None)) => {
                self.emit(Level::Success, &format!("Connected to {server}"));
                Ok(())
            }
            Ok((server, Some(listing))) => {
                self.emit(Level::Warning, &format!("Connected to {server}, but {listing}"));
                Ok(())
            }
            Err(e) => self.fail(e),
        }
    }

    fn connect_inner(&self, name: Option<&str>) -> Result<(String, Option<EngineError>), EngineError> {
        if self.session.disconnect() {
            self.browser.write().clear_listing();
        }

        let target = match name {
            Some(name) => name.to_string(),
            None => self
                .settings_or_default()
                .default_server
                .ok_or_else(|| EngineError::ServerNotFound("no default server configured".into()))?,
        };
        let server = self
            .config
            .servers()?
            .into_iter()
            .find(|s| s.name == target)
            .ok_or(EngineError::ServerNotFound(target))?;

        let label = server.identifier().to_string();
        let base = server.base_path();
        let session = self
            .session
            .connect(server)
            .map_err(|source| EngineError::ConnectionFailed {
                server: label.clone(),
                source,
            })?;
        self.browser.write().reset(base.clone());

        match self.list(&session, &base) {
            Ok(items) => {
                self.apply_listing(&session, base, items);
                Ok((label, None))
            }
            Err(e) if e.is_transport() => Err(e),
            Err(e) => Ok((label, Some(e))),
        }
    }

    /// Close the session. Returns false (and stays quiet) when none was open.
    pub fn disconnect(&self) -> bool {
        let server = self.session.connected_server();
        if !self.session.disconnect() {
            return false;
        }
        self.browser.write().clear_listing();
        let name = server.as_ref().map(|s| s.identifier()).unwrap_or("server");
        self.emit(Level::Info, &format!("Disconnected from {name}"));
        true
    }

    /// Host shutdown: disconnect and forget every open file.
    pub fn deactivate(&self) {
        self.session.disconnect();
        self.browser.write().clear_listing();
        self.registry.clear();
        info!("engine deactivated");
    }

    pub fn is_connected(&self) -> bool {
        self.session.is_connected()
    }

    pub fn connected_server(&self) -> Option<ServerProfile> {
        self.session.connected_server()
    }

    // ---------------------------------------------------------------------
    // Browser
    // ---------------------------------------------------------------------

    pub fn browser(&self) -> RemoteBrowserState {
        self.browser.read().clone()
    }

    /// Select an entry of the current listing, or clear with `None`.
    pub fn select(&self, index: Option<usize>) -> bool {
        self.browser.write().select(index)
    }

    pub fn selected(&self) -> Option<RemoteEntry> {
        self.browser.read().selected().cloned()
    }

    /// Re-list the current directory.
    pub fn refresh(&self) -> Result<(), EngineError> {
        let dir = self.current_dir();
        let result = self.navigate(dir.clone());
        self.finish(result, Level::Info, |n| format!("{dir}: {n} entries"))
            .map(|_| ())
    }

    pub fn enter_directory(&self, name: &str) -> Result<(), EngineError> {
        let result = self.check_name(name).and_then(|_| {
            let target = self.browser.read().child_dir(name);
            self.navigate(target)
        });
        self.finish(result, Level::Info, |n| format!("{}: {n} entries", self.current_dir()))
            .map(|_| ())
    }

    pub fn go_to_parent(&self) -> Result<(), EngineError> {
        let target = self.browser.read().parent_dir();
        let result = self.navigate(target);
        self.finish(result, Level::Info, |n| format!("{}: {n} entries", self.current_dir()))
            .map(|_| ())
    }

    // ---------------------------------------------------------------------
    // Uploads
    // ---------------------------------------------------------------------

    /// Destination for `local`: the registered origin if it was opened from
    /// the server, else the path mappings and project fallback.
    pub fn remote_path_for(&self, local: &Path) -> Option<String> {
        if let Some(remote) = self.registry.lookup(local) {
            return Some(remote);
        }
        let server = self.session.connected_server();
        resolve_remote_path(local, &self.mappings_or_empty(), server.as_ref(), self.projects.as_ref())
    }

    /// Upload one file. `explicit` wins over the registry and the mappings.
    pub fn upload_file(&self, local: &Path, explicit: Option<&str>) -> Result<String, EngineError> {
        let result = self.upload_file_inner(local, explicit);
        self.finish(result, Level::Success, |remote| format!("Uploaded to {remote}"))
    }

    fn upload_file_inner(&self, local: &Path, explicit: Option<&str>) -> Result<String, EngineError> {
        let session = self.session()?;
        let remote = match explicit {
            Some(remote) => remote.to_string(),
            None => self
                .remote_path_for(local)
                .ok_or_else(|| EngineError::NoRemoteDestination(local.to_path_buf()))?,
        };
        self.transfer(&session, format!("upload {remote}"), |t| {
            t.upload_file(local, &remote).map_err(|source| EngineError::Transfer {
                path: remote.clone(),
                source,
            })
        })?;
        Ok(remote)
    }

    /// Save hook. Uploads when `auto_upload_on_save` is on; returns the
    /// remote path written, or `None` when auto-upload is off.
    pub fn on_save(&self, local: &Path) -> Result<Option<String>, EngineError> {
        if !self.settings_or_default().auto_upload_on_save {
            debug!("auto-upload off, not uploading {}", local.display());
            return Ok(None);
        }
        self.upload_file(local, None).map(Some)
    }

    /// Close hook for an editing surface. Leaves both copies of the file alone.
    pub fn on_editing_surface_closed(&self, local: &Path) -> bool {
        self.registry.unregister(local).is_some()
    }

    /// Mirror a local directory to `remote_dir`, by default a directory of
    /// the same name inside the current remote directory.
    pub fn upload_directory(&self, local_dir: &Path, remote_dir: Option<&str>) -> Result<String, EngineError> {
        let result = self.upload_directory_inner(local_dir, remote_dir);
        if result.is_ok() {
            self.refresh_quietly();
        }
        self.finish(result, Level::Success, |remote| {
            format!("Uploaded folder {} to {remote}", local_dir.display())
        })
    }

    fn upload_directory_inner(&self, local_dir: &Path, remote_dir: Option<&str>) -> Result<String, EngineError> {
        let session = self.session()?;
        if !local_dir.is_dir() {
            return Err(EngineError::NotADirectory(local_dir.display().to_string()));
        }
        let remote = match remote_dir {
            Some(remote) => remote.to_string(),
            None => join_remote_path(&self.current_dir(), &local_name(local_dir)?),
        };
        self.transfer(&session, format!("upload {remote}"), |t| {
            t.upload_directory(local_dir, &remote)
                .map_err(|source| EngineError::Transfer {
                    path: remote.clone(),
                    source,
                })
        })?;
        Ok(remote)
    }

    /// Upload independent local files and directories into `target` (the
    /// current directory by default). A failing item is reported and the
    /// rest still run.
    pub fn batch_upload(&self, locals: &[PathBuf], target: Option<&str>) -> Result<BatchReport, EngineError> {
        let session = match self.session() {
            Ok(session) => session,
            Err(e) => return self.fail(e),
        };
        let target = target.map(str::to_string).unwrap_or_else(|| self.current_dir());

        let mut report = BatchReport::default();
        for local in locals {
            match self.batch_item(&session, local, &target) {
                Ok(remote) => {
                    self.emit(Level::Success, &format!("Uploaded {} to {remote}", local.display()));
                    report.uploaded.push(remote);
                }
                Err(e) => {
                    self.report(&e);
                    report.failed.push((local.clone(), e.to_string()));
                }
            }
        }

        self.refresh_quietly();
        Ok(report)
    }

    fn batch_item(&self, session: &Arc<ActiveSession>, local: &Path, target: &str) -> Result<String, EngineError> {
        let remote = join_remote_path(target, &local_name(local)?);
        let meta = fs::metadata(local).map_err(|e| EngineError::Transfer {
            path: local.display().to_string(),
            source: e.into(),
        })?;
        self.transfer(session, format!("upload {remote}"), |t| {
            let result = if meta.is_dir() {
                t.upload_directory(local, &remote)
            } else {
                t.upload_file(local, &remote).map(|_| ())
            };
            result.map_err(|source| EngineError::Transfer {
                path: remote.clone(),
                source,
            })
        })?;
        Ok(remote)
    }

    // ---------------------------------------------------------------------
    // Downloads
    // ---------------------------------------------------------------------

    /// Download a file of the current listing into the edit area and track
    /// it, so saving the copy uploads back to where it came from.
    pub fn download_file(&self, entry: &RemoteEntry) -> Result<PathBuf, EngineError> {
        let result = self.download_file_inner(entry);
        self.finish_download(result)
    }

    pub fn download_selected(&self) -> Result<PathBuf, EngineError> {
        let result = self.selected_entry().and_then(|entry| self.download_file_inner(&entry));
        self.finish_download(result)
    }

    fn finish_download(&self, result: Result<(PathBuf, String), EngineError>) -> Result<PathBuf, EngineError> {
        self.finish(result, Level::Success, |(local, remote)| {
            format!("Downloaded {remote} to {}. Save to upload changes.", local.display())
        })
        .map(|(local, _)| local)
    }

    fn download_file_inner(&self, entry: &RemoteEntry) -> Result<(PathBuf, String), EngineError> {
        if entry.is_dir() {
            return Err(EngineError::NotAFile(entry.name.clone()));
        }
        let session = self.session()?;
        let remote = self.browser.read().child_dir(&entry.name);
        let local = self.layout.edit_path(session.server().identifier(), &remote);

        self.transfer(&session, format!("download {remote}"), |t| {
            t.download_file(&remote, &local).map_err(|source| EngineError::Transfer {
                path: remote.clone(),
                source,
            })
        })?;
        self.registry.register(local.clone(), remote.clone());
        Ok((local, remote))
    }

    /// Mirror a remote tree into `local_dir`.
    pub fn download_directory_recursive(&self, remote_dir: &str, local_dir: &Path) -> Result<(), EngineError> {
        let result = self.session().and_then(|session| {
            self.transfer(&session, format!("download {remote_dir}"), |t| {
                t.download_directory(remote_dir, local_dir)
                    .map_err(|source| EngineError::Transfer {
                        path: remote_dir.to_string(),
                        source,
                    })
            })
        });
        self.finish(result, Level::Success, |_| {
            format!("Downloaded {remote_dir} to {}", local_dir.display())
        })
    }

    /// Download a directory of the current listing and pack it into a
    /// timestamped zip. Returns the archive path.
    pub fn download_directory_as_zip(&self, entry: &RemoteEntry) -> Result<PathBuf, EngineError> {
        let result = self.zip_entry(entry);
        self.finish(result, Level::Success, |zip| {
            format!("Directory downloaded and zipped to {}", zip.display())
        })
    }

    pub fn download_selected_as_zip(&self) -> Result<PathBuf, EngineError> {
        let result = self.selected_entry().and_then(|entry| self.zip_entry(&entry));
        self.finish(result, Level::Success, |zip| {
            format!("Directory downloaded and zipped to {}", zip.display())
        })
    }

    fn zip_entry(&self, entry: &RemoteEntry) -> Result<PathBuf, EngineError> {
        if !entry.is_dir() {
            return Err(EngineError::NotADirectory(entry.name.clone()));
        }
        let session = self.session()?;
        let remote = self.browser.read().child_dir(&entry.name);
        let server_id = session.server().identifier().to_string();
        let archive_error = |source: TransferError| EngineError::Archive {
            path: remote.clone(),
            source,
        };

        // Stale files from an earlier download must not end up in the zip.
        let mirror = self.layout.archive_mirror(&server_id, &remote);
        if mirror.exists() {
            fs::remove_dir_all(&mirror).map_err(|e| archive_error(e.into()))?;
        }

        self.transfer(&session, format!("download {remote}"), |t| {
            t.download_directory(&remote, &mirror)
                .map_err(|source| EngineError::Transfer {
                    path: remote.clone(),
                    source,
                })
        })?;

        let dest = self.layout.archive_file(&server_id, &entry.name);
        let files = zip_directory(&mirror, &entry.name, &dest).map_err(archive_error)?;
        info!("zipped {} files from {} into {}", files, remote, dest.display());
        Ok(dest)
    }

    // ---------------------------------------------------------------------
    // Remote mutations
    // ---------------------------------------------------------------------

    /// Rename a remote path. Renaming onto itself sends nothing to the server.
    pub fn rename(&self, from: &str, to: &str) -> Result<(), EngineError> {
        if from == to {
            self.emit(Level::Info, &format!("{from} already has that name"));
            return Ok(());
        }
        let result = self.rename_inner(from, to);
        self.after_mutation(result, format!("Renamed {from} to {to}"))
    }

    /// Rename the selected entry within the current directory.
    pub fn rename_selected(&self, new_name: &str) -> Result<(), EngineError> {
        let paths = self.check_name(new_name).and_then(|_| {
            let entry = self.selected_entry()?;
            let browser = self.browser.read();
            Ok((browser.child_dir(&entry.name), browser.child_dir(new_name)))
        });
        match paths {
            Ok((from, to)) => self.rename(&from, &to),
            Err(e) => self.fail(e),
        }
    }

    fn rename_inner(&self, from: &str, to: &str) -> Result<(), EngineError> {
        let session = self.session()?;
        self.run(&session, |client| {
            client.rename(from, to).map_err(|source| EngineError::Rename {
                from: from.to_string(),
                to: to.to_string(),
                source,
            })
        })
    }

    /// Delete a remote file, or a directory with everything below it.
    pub fn delete(&self, path: &str, kind: EntryKind) -> Result<(), EngineError> {
        let result = self.delete_inner(path, kind);
        self.after_mutation(result, format!("Deleted {path}"))
    }

    pub fn delete_selected(&self) -> Result<(), EngineError> {
        let target = self
            .selected_entry()
            .map(|entry| (self.browser.read().child_dir(&entry.name), entry.kind));
        match target {
            Ok((path, kind)) => self.delete(&path, kind),
            Err(e) => self.fail(e),
        }
    }

    fn delete_inner(&self, path: &str, kind: EntryKind) -> Result<(), EngineError> {
        let session = self.session()?;
        self.run(&session, |client| {
            Transfers::new(client, &self.progress)
                .delete(path, kind)
                .map_err(|source| EngineError::Delete {
                    path: path.to_string(),
                    source,
                })
        })
    }

    /// Create an empty remote file, creating its parent as needed.
    pub fn create_empty_file(&self, remote: &str) -> Result<(), EngineError> {
        let result = self.create_empty_file_inner(remote);
        self.after_mutation(result, format!("Created new file {remote}"))
    }

    /// New empty file in the current directory.
    pub fn new_file(&self, name: &str) -> Result<(), EngineError> {
        match self.check_name(name) {
            Ok(()) => {
                let remote = self.browser.read().child_dir(name);
                self.create_empty_file(&remote)
            }
            Err(e) => self.fail(e),
        }
    }

    fn create_empty_file_inner(&self, remote: &str) -> Result<(), EngineError> {
        let session = self.session()?;
        let placeholder = self.layout.new_file_placeholder(session.server().identifier());
        self.transfer(&session, format!("create {remote}"), |t| {
            t.create_empty_file(remote, &placeholder)
                .map_err(|source| EngineError::Transfer {
                    path: remote.to_string(),
                    source,
                })
        })
    }

    /// Create a remote directory. An existing directory is not an error.
    pub fn create_directory(&self, remote: &str) -> Result<(), EngineError> {
        let result = self.session().and_then(|session| {
            self.run(&session, |client| {
                Transfers::new(client, &self.progress)
                    .create_directory(remote)
                    .map_err(|source| EngineError::Transfer {
                        path: remote.to_string(),
                        source,
                    })
            })
        });
        self.after_mutation(result, format!("Created new folder {remote}"))
    }

    /// New directory in the current directory.
    pub fn new_folder(&self, name: &str) -> Result<(), EngineError> {
        match self.check_name(name) {
            Ok(()) => {
                let remote = self.browser.read().child_dir(name);
                self.create_directory(&remote)
            }
            Err(e) => self.fail(e),
        }
    }

    /// Change permissions with a raw `chmod` command. The server decides
    /// whether `mode` is valid.
    pub fn chmod(&self, path: &str, mode: &str) -> Result<(), EngineError> {
        let result = self.chmod_inner(path, mode);
        self.after_mutation(result, format!("chmod {} {path}", mode.trim()))
    }

    pub fn chmod_selected(&self, mode: &str) -> Result<(), EngineError> {
        let target = self
            .selected_entry()
            .map(|entry| self.browser.read().child_dir(&entry.name));
        match target {
            Ok(path) => self.chmod(&path, mode),
            Err(e) => self.fail(e),
        }
    }

    fn chmod_inner(&self, path: &str, mode: &str) -> Result<(), EngineError> {
        if mode.trim().is_empty() {
            return Err(EngineError::InvalidArgument("chmod mode must not be empty".into()));
        }
        let session = self.session()?;
        let command = chmod_command(mode, path);
        self.run(&session, |client| {
            let output = client
                .send_raw(&command)
                .map_err(|source| EngineError::ChmodUnsupported {
                    path: path.to_string(),
                    mode: mode.trim().to_string(),
                    source,
                })?;
            debug!("{command}: {}", output.trim());
            Ok(())
        })
    }

    // ---------------------------------------------------------------------
    // Helpers
    // ---------------------------------------------------------------------

    fn session(&self) -> Result<Arc<ActiveSession>, EngineError> {
        self.session.active().ok_or(EngineError::NotConnected)
    }

    fn is_current(&self, session: &Arc<ActiveSession>) -> bool {
        self.session
            .active()
            .is_some_and(|current| Arc::ptr_eq(&current, session))
    }

    /// Run one request on `session`. A transport failure drops the session.
    fn run<T>(
        &self,
        session: &Arc<ActiveSession>,
        f: impl FnOnce(&dyn RemoteClient) -> Result<T, EngineError>,
    ) -> Result<T, EngineError> {
        let result = session.request(f);
        if let Err(e) = &result {
            if e.is_transport() && self.session.invalidate(session) {
                self.browser.write().clear_listing();
                warn!("connection to '{}' lost: {}", session.server().name, e);
            }
        }
        result
    }

    /// Like [`Engine::run`], with progress tracking around the transfer.
    fn transfer<T>(
        &self,
        session: &Arc<ActiveSession>,
        operation: String,
        f: impl FnOnce(&Transfers<'_>) -> Result<T, EngineError>,
    ) -> Result<T, EngineError> {
        self.progress.lock().begin(operation);
        let result = self.run(session, |client| f(&Transfers::new(client, &self.progress)));
        self.progress.lock().finish(result.as_ref().map(|_| ()));
        result
    }

    fn list(&self, session: &Arc<ActiveSession>, dir: &str) -> Result<Vec<RemoteEntry>, EngineError> {
        self.run(session, |client| {
            client.list(dir).map_err(|source| EngineError::List {
                path: dir.to_string(),
                source,
            })
        })
    }

    /// List `target` and, only if that worked, make it the current directory.
    fn navigate(&self, target: String) -> Result<usize, EngineError> {
        let session = self.session()?;
        let items = self.list(&session, &target)?;
        let count = items.len();
        self.apply_listing(&session, target, items);
        Ok(count)
    }

    // A listing from a session that was replaced meanwhile is dropped.
    fn apply_listing(&self, session: &Arc<ActiveSession>, dir: String, items: Vec<RemoteEntry>) {
        if self.is_current(session) {
            self.browser.write().apply_listing(dir, items);
        }
    }

    fn refresh_quietly(&self) {
        let dir = self.current_dir();
        if let Err(e) = self.navigate(dir.clone()) {
            warn!("refresh of {dir} failed: {e}");
        }
    }

    fn after_mutation(&self, result: Result<(), EngineError>, message: String) -> Result<(), EngineError> {
        if result.is_ok() {
            self.refresh_quietly();
        }
        self.finish(result, Level::Success, |_| message)
    }

    fn current_dir(&self) -> String {
        self.browser.read().current_dir().to_string()
    }

    fn selected_entry(&self) -> Result<RemoteEntry, EngineError> {
        self.selected().ok_or(EngineError::NoSelection)
    }

    fn check_name(&self, name: &str) -> Result<(), EngineError> {
        if !self.settings_or_default().strict_names {
            return Ok(());
        }
        check_entry_name(name).map_err(|reason| EngineError::InvalidName {
            name: name.to_string(),
            reason,
        })
    }

    fn settings_or_default(&self) -> Settings {
        self.config.settings().unwrap_or_else(|e| {
            warn!("{e}; using default settings");
            Settings::default()
        })
    }

    fn mappings_or_empty(&self) -> Vec<PathMapping> {
        self.config.mappings().unwrap_or_else(|e| {
            warn!("{e}; ignoring path mappings");
            Vec::new()
        })
    }

    /// Report the outcome of an operation exactly once.
    fn finish<T>(
        &self,
        result: Result<T, EngineError>,
        level: Level,
        message: impl FnOnce(&T) -> String,
    ) -> Result<T, EngineError> {
        match &result {
            Ok(value) => self.emit(level, &message(value)),
            Err(e) => self.report(e),
        }
        result
    }

    fn fail<T>(&self, error: EngineError) -> Result<T, EngineError> {
        self.report(&error);
        Err(error)
    }

    fn report(&self, error: &EngineError) {
        let message = if error.is_transport() {
            format!("{error}. Connection lost, reconnect to continue.")
        } else {
            error.to_string()
        };
        self.emit(error.level(), &message);
    }

    fn emit(&self, level: Level, message: &str) {
        let enabled = self
            .config
            .settings()
            .map(|s| s.show_notifications)
            .unwrap_or(true);
        if enabled {
            self.notifier.notify(level, message);
        } else {
            debug!(target: "velasync::notify", "{level}: {message}");
        }
    }
}

fn local_name(path: &Path) -> Result<String, EngineError> {
    path.file_name()
        .map(|n| n.to_string_lossy().to_string())
        .ok_or_else(|| EngineError::InvalidArgument(format!("{} has no file name", path.display())))
}
