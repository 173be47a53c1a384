use std::collections::HashSet;
use std::fs;
use std::path::{Path, PathBuf};

use tracing::{debug, warn};

use crate::connection::{EntryKind, RemoteClient};
use crate::paths::{join_remote_path, remote_dir_of};
use crate::transfer::queue::ProgressHandle;
use crate::transfer::TransferError;

/// Remote trees deeper than this are treated as a symlink loop.
pub const MAX_REMOTE_DEPTH: usize = 64;

/// Runs transfers over one client. Every recursive operation stops at the
/// first failure; nothing is retried.
pub struct Transfers<'a> {
    client: &'a dyn RemoteClient,
    progress: &'a ProgressHandle,
}

impl<'a> Transfers<'a> {
    pub fn new(client: &'a dyn RemoteClient, progress: &'a ProgressHandle) -> Self {
        Self { client, progress }
    }

    /// Upload one file, creating its remote parent first.
    pub fn upload_file(&self, local: &Path, remote: &str) -> Result<u64, TransferError> {
        self.client.ensure_dir(&remote_dir_of(remote))?;
        self.put(local, remote)
    }

    /// Mirror `local_dir` into `remote_dir`. Each remote directory exists
    /// before any of its files are sent; inside a directory files go first
    /// (by name), then subdirectories (by name), depth first. A symlink
    /// back to one of its own ancestors is skipped; any other link is
    /// followed, so a linked directory can be uploaded twice.
    pub fn upload_directory(&self, local_dir: &Path, remote_dir: &str) -> Result<(), TransferError> {
        let mut ancestors = HashSet::new();
        self.upload_dir_recursive(local_dir, remote_dir, &mut ancestors)
    }

    fn upload_dir_recursive(
        &self,
        local_dir: &Path,
        remote_dir: &str,
        ancestors: &mut HashSet<PathBuf>,
    ) -> Result<(), TransferError> {
        let canonical = fs::canonicalize(local_dir)?;
        if !ancestors.insert(canonical.clone()) {
            warn!("skipping {}: symlink loop", local_dir.display());
            return Ok(());
        }
        let result = self.upload_dir_entries(local_dir, remote_dir, ancestors);
        ancestors.remove(&canonical);
        result
    }

    fn upload_dir_entries(
        &self,
        local_dir: &Path,
        remote_dir: &str,
        ancestors: &mut HashSet<PathBuf>,
    ) -> Result<(), TransferError> {
        self.client.ensure_dir(remote_dir)?;
        self.progress.lock().dir_created();

        let (files, dirs) = read_local_dir(local_dir)?;
        for (name, path) in files {
            self.put(&path, &join_remote_path(remote_dir, &name))?;
        }
        for (name, path) in dirs {
            self.upload_dir_recursive(&path, &join_remote_path(remote_dir, &name), ancestors)?;
        }
        Ok(())
    }

    /// Download one file, creating local parents as needed.
    pub fn download_file(&self, remote: &str, local: &Path) -> Result<u64, TransferError> {
        if let Some(parent) = local.parent() {
            fs::create_dir_all(parent)?;
        }
        self.get(remote, local)
    }

    /// Mirror `remote_dir` into `local_dir`, depth first in server order.
    pub fn download_directory(&self, remote_dir: &str, local_dir: &Path) -> Result<(), TransferError> {
        self.download_dir_recursive(remote_dir, local_dir, 0)
    }

    fn download_dir_recursive(
        &self,
        remote_dir: &str,
        local_dir: &Path,
        depth: usize,
    ) -> Result<(), TransferError> {
        if depth > MAX_REMOTE_DEPTH {
            return Err(TransferError::DepthExceeded(remote_dir.to_string()));
        }

        fs::create_dir_all(local_dir)?;
        self.progress.lock().dir_created();

        for entry in self.client.list(remote_dir)? {
            let remote = join_remote_path(remote_dir, &entry.name);
            let local = local_dir.join(&entry.name);
            match entry.kind {
                EntryKind::Directory => self.download_dir_recursive(&remote, &local, depth + 1)?,
                EntryKind::File => {
                    self.get(&remote, &local)?;
                }
            }
        }
        Ok(())
    }

    pub fn delete(&self, remote: &str, kind: EntryKind) -> Result<(), TransferError> {
        match kind {
            EntryKind::Directory => self.client.remove_dir(remote)?,
            EntryKind::File => self.client.remove(remote)?,
        }
        Ok(())
    }

    /// Upload a zero-byte placeholder to `remote`. The placeholder is
    /// written at `placeholder` and removed again afterwards.
    pub fn create_empty_file(&self, remote: &str, placeholder: &Path) -> Result<(), TransferError> {
        self.client.ensure_dir(&remote_dir_of(remote))?;
        if let Some(parent) = placeholder.parent() {
            fs::create_dir_all(parent)?;
        }
        fs::write(placeholder, b"")?;
        let result = self.put(placeholder, remote);
        let _ = fs::remove_file(placeholder);
        result.map(|_| ())
    }

    pub fn create_directory(&self, remote: &str) -> Result<(), TransferError> {
        self.client.ensure_dir(remote)?;
        Ok(())
    }

    fn put(&self, local: &Path, remote: &str) -> Result<u64, TransferError> {
        self.progress.lock().file_started(remote);
        let bytes = self.client.upload_from(local, remote)?;
        self.progress.lock().file_finished(bytes);
        debug!("put {} -> {}", local.display(), remote);
        Ok(bytes)
    }

    fn get(&self, remote: &str, local: &Path) -> Result<u64, TransferError> {
        self.progress.lock().file_started(remote);
        let bytes = self.client.download_to(local, remote)?;
        self.progress.lock().file_finished(bytes);
        debug!("get {} -> {}", remote, local.display());
        Ok(bytes)
    }
}

/// The shell command used for chmod over an exec channel.
pub fn chmod_command(mode: &str, path: &str) -> String {
    format!("chmod {} {}", mode.trim(), shell_quote(path))
}

fn shell_quote(s: &str) -> String {
    format!("'{}'", s.replace('\'', "'\\''"))
}

type NamedPaths = Vec<(String, PathBuf)>;

/// Regular files and directories of `dir`, each sorted by name. Symlinks
/// are followed; anything else (sockets, broken links) is skipped.
fn read_local_dir(dir: &Path) -> Result<(NamedPaths, NamedPaths), TransferError> {
    let mut files = Vec::new();
    let mut dirs = Vec::new();
    for entry in fs::read_dir(dir)? {
        let entry = entry?;
        let path = entry.path();
        let name = entry.file_name().to_string_lossy().to_string();
        match fs::metadata(&path) {
            Ok(meta) if meta.is_dir() => dirs.push((name, path)),
            Ok(meta) if meta.is_file() => files.push((name, path)),
            _ => debug!("skipping {}", path.display()),
        }
    }
    files.sort();
    dirs.sort();
    Ok((files, dirs))
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::connection::Connector;
    use crate::testing::{profile, write_file, MockConnector, MockRemote, Op};
    use crate::transfer::queue::new_progress_handle;

    fn client() -> (Box<dyn RemoteClient>, MockRemote) {
        let connector = MockConnector::new();
        let remote = connector.remote();
        let client = connector.connect(&profile("S", "/")).unwrap();
        (client, remote)
    }

    fn sample_tree(root: &Path) -> PathBuf {
        let a = root.join("a");
        write_file(&a.join("b.txt"), "b");
        write_file(&a.join("c").join("d.txt"), "d");
        a
    }

    #[test]
    fn test_upload_directory_ensures_dirs_before_files() {
        let tmp = tempfile::tempdir().unwrap();
        let local = sample_tree(tmp.path());
        let (client, remote) = client();
        let progress = new_progress_handle();

        Transfers::new(client.as_ref(), &progress)
            .upload_directory(&local, "/remote/a")
            .unwrap();

        let pos = |op: Op| remote.position(&op).unwrap();
        assert!(pos(Op::EnsureDir("/remote/a".into())) < pos(Op::Upload("/remote/a/b.txt".into())));
        assert!(
            pos(Op::EnsureDir("/remote/a/c".into())) < pos(Op::Upload("/remote/a/c/d.txt".into()))
        );
        assert_eq!(remote.file("/remote/a/c/d.txt").unwrap(), b"d");
        assert_eq!(progress.lock().files_done, 2);
        assert_eq!(progress.lock().dirs_created, 2);
    }

    #[test]
    fn test_upload_directory_stops_at_first_failure() {
        let tmp = tempfile::tempdir().unwrap();
        let local = sample_tree(tmp.path());
        let (client, remote) = client();
        remote.fail_once("upload", "/remote/a/b.txt");

        let result = Transfers::new(client.as_ref(), &new_progress_handle())
            .upload_directory(&local, "/remote/a");

        assert!(result.is_err());
        assert_eq!(remote.position(&Op::Upload("/remote/a/c/d.txt".into())), None);
        assert_eq!(remote.position(&Op::EnsureDir("/remote/a/c".into())), None);
    }

    #[cfg(unix)]
    #[test]
    fn test_upload_directory_survives_symlink_loop() {
        let tmp = tempfile::tempdir().unwrap();
        let local = sample_tree(tmp.path());
        std::os::unix::fs::symlink(&local, local.join("c").join("loop")).unwrap();
        let (client, remote) = client();

        Transfers::new(client.as_ref(), &new_progress_handle())
            .upload_directory(&local, "/remote/a")
            .unwrap();

        assert_eq!(remote.position(&Op::EnsureDir("/remote/a/c/loop".into())), None);
    }

    #[cfg(unix)]
    #[test]
    fn test_upload_directory_follows_link_to_sibling() {
        let tmp = tempfile::tempdir().unwrap();
        let a = tmp.path().join("a");
        write_file(&a.join("real").join("data.txt"), "data");
        std::os::unix::fs::symlink(a.join("real"), a.join("link")).unwrap();
        let (client, remote) = client();

        Transfers::new(client.as_ref(), &new_progress_handle())
            .upload_directory(&a, "/r/a")
            .unwrap();

        assert_eq!(remote.file("/r/a/link/data.txt").unwrap(), b"data");
        assert_eq!(remote.file("/r/a/real/data.txt").unwrap(), b"data");
    }

    #[test]
    fn test_upload_file_creates_parent() {
        let tmp = tempfile::tempdir().unwrap();
        let local = write_file(&tmp.path().join("x.css"), "body{}");
        let (client, remote) = client();

        let bytes = Transfers::new(client.as_ref(), &new_progress_handle())
            .upload_file(&local, "/var/www/css/x.css")
            .unwrap();

        assert_eq!(bytes, 6);
        assert!(remote.has_dir("/var/www/css"));
        assert_eq!(remote.log()[0], Op::EnsureDir("/var/www/css".into()));
    }

    #[test]
    fn test_download_directory_mirrors_tree() {
        let tmp = tempfile::tempdir().unwrap();
        let (client, remote) = client();
        remote.add_file("/srv/site/index.html", b"<html>");
        remote.add_file("/srv/site/css/a.css", b"a{}");
        remote.add_dir("/srv/site/empty");

        let dest = tmp.path().join("mirror");
        Transfers::new(client.as_ref(), &new_progress_handle())
            .download_directory("/srv/site", &dest)
            .unwrap();

        assert_eq!(fs::read(dest.join("index.html")).unwrap(), b"<html>");
        assert_eq!(fs::read(dest.join("css").join("a.css")).unwrap(), b"a{}");
        assert!(dest.join("empty").is_dir());
    }

    #[test]
    fn test_download_directory_aborts_on_first_error() {
        let tmp = tempfile::tempdir().unwrap();
        let (client, remote) = client();
        remote.add_file("/srv/a.txt", b"a");
        remote.add_file("/srv/b.txt", b"b");
        remote.fail_once("download", "/srv/a.txt");

        let result = Transfers::new(client.as_ref(), &new_progress_handle())
            .download_directory("/srv", &tmp.path().join("m"));

        assert!(result.is_err());
        assert_eq!(remote.position(&Op::Download("/srv/b.txt".into())), None);
    }

    #[test]
    fn test_create_empty_file_cleans_placeholder() {
        let tmp = tempfile::tempdir().unwrap();
        let (client, remote) = client();
        let placeholder = tmp.path().join("new").join("empty-1.tmp");

        Transfers::new(client.as_ref(), &new_progress_handle())
            .create_empty_file("/srv/new/readme.md", &placeholder)
            .unwrap();

        assert_eq!(remote.file("/srv/new/readme.md").unwrap(), Vec::<u8>::new());
        assert!(!placeholder.exists());
    }

    #[test]
    fn test_delete_dispatches_on_kind() {
        let (client, remote) = client();
        remote.add_file("/srv/a.txt", b"a");
        remote.add_file("/srv/d/b.txt", b"b");
        let transfers_progress = new_progress_handle();
        let transfers = Transfers::new(client.as_ref(), &transfers_progress);

        transfers.delete("/srv/a.txt", EntryKind::File).unwrap();
        transfers.delete("/srv/d", EntryKind::Directory).unwrap();

        assert_eq!(remote.log(), vec![Op::Remove("/srv/a.txt".into()), Op::RemoveDir("/srv/d".into())]);
        assert!(remote.file("/srv/d/b.txt").is_none());
    }

    #[test]
    fn test_chmod_command_quotes_path() {
        assert_eq!(chmod_command("755", "/var/www/run.sh"), "chmod 755 '/var/www/run.sh'");
        assert_eq!(chmod_command(" 644 ", "/it's"), "chmod 644 '/it'\\''s'");
    }
}
