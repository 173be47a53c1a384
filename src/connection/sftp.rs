use std::io::{self, Read, Write};
use std::net::TcpStream;
use std::path::{Path, PathBuf};
use std::sync::atomic::{AtomicBool, Ordering};
use std::time::Duration;

use parking_lot::{Mutex, MutexGuard};
use ssh2::{CheckResult, FileStat, KnownHostFileKind, OpenFlags, OpenType, Session, Sftp};
use tracing::{debug, info, warn};

use crate::config::{AuthMethod, ServerProfile};
use crate::connection::client::{ClientError, Connector, EntryKind, RemoteClient, RemoteEntry};

const KEYRING_SERVICE: &str = "velasync";
const CHUNK: usize = 64 * 1024;

/// An active SSH session with its SFTP subsystem.
pub struct SftpClient {
    // Session must be kept alive alongside Sftp; also used for exec channels
    // and for closing the transport from another thread.
    session: Session,
    sftp: Mutex<Sftp>,
    closed: AtomicBool,
    label: String,
}

impl SftpClient {
    /// Establish an SFTP connection for `profile`.
    pub fn connect(profile: &ServerProfile) -> Result<Self, ClientError> {
        let addr = format!("{}:{}", profile.host, profile.port);
        let tcp = TcpStream::connect(&addr)?;
        // 10-second read timeout
        tcp.set_read_timeout(Some(Duration::from_secs(10)))?;

        let mut session = Session::new()?;
        session.set_tcp_stream(tcp);
        session.handshake()?;

        if profile.secure {
            verify_host_key(&session, profile)?;
        }
        authenticate(&mut session, profile)?;

        let sftp = session.sftp()?;
        info!("SFTP session established with {}@{}", profile.user, addr);

        Ok(Self {
            session,
            sftp: Mutex::new(sftp),
            closed: AtomicBool::new(false),
            label: format!("{}@{}", profile.user, addr),
        })
    }

    fn sftp(&self) -> Result<MutexGuard<'_, Sftp>, ClientError> {
        if self.closed.load(Ordering::SeqCst) {
            return Err(ClientError::Closed);
        }
        Ok(self.sftp.lock())
    }

    /// Internal recursive removal: depth-first, files before dirs.
    fn rmdir_recursive(&self, sftp: &Sftp, path: &Path) -> Result<(), ClientError> {
        let entries = sftp.readdir(path).map_err(|e| path_error(path, e))?;

        for (child, stat) in entries {
            if stat.file_type().is_dir() {
                self.rmdir_recursive(sftp, &child)?;
            } else {
                sftp.unlink(&child).map_err(|e| path_error(&child, e))?;
            }
        }
        sftp.rmdir(path).map_err(|e| path_error(path, e))
    }

    // ssh2 converts its errors to io::Error keeping only the message, so
    // the session's last error is the only place the libssh2 code survives.
    fn stream_error(&self, remote: &str, e: io::Error) -> ClientError {
        if let Some(last) = ssh2::Error::last_session_error(&self.session) {
            let err = path_error(Path::new(remote), last);
            if err.is_transport() {
                return err;
            }
        }
        stream_io_error(remote, e)
    }
}

impl RemoteClient for SftpClient {
    fn list(&self, dir: &str) -> Result<Vec<RemoteEntry>, ClientError> {
        let sftp = self.sftp()?;
        let raw = sftp
            .readdir(Path::new(dir))
            .map_err(|e| path_error(Path::new(dir), e))?;

        let entries = raw
            .into_iter()
            .map(|(path, stat)| {
                // readdir reports the link itself; follow it to learn the kind.
                if stat.file_type().is_symlink() {
                    match sftp.stat(&path) {
                        Ok(target) => entry_from_stat(&path, &target),
                        Err(_) => entry_from_stat(&path, &stat),
                    }
                } else {
                    entry_from_stat(&path, &stat)
                }
            })
            .collect();
        Ok(entries)
    }

    fn upload_from(&self, local: &Path, remote: &str) -> Result<u64, ClientError> {
        let sftp = self.sftp()?;
        let mut local_file = std::fs::File::open(local).map_err(ClientError::Local)?;
        let mut remote_file = sftp
            .open_mode(
                Path::new(remote),
                OpenFlags::WRITE | OpenFlags::CREATE | OpenFlags::TRUNCATE,
                0o644,
                OpenType::File,
            )
            .map_err(|e| path_error(Path::new(remote), e))?;

        let mut buf = vec![0u8; CHUNK];
        let mut total = 0u64;
        loop {
            let n = local_file.read(&mut buf).map_err(ClientError::Local)?;
            if n == 0 {
                break;
            }
            remote_file
                .write_all(&buf[..n])
                .map_err(|e| self.stream_error(remote, e))?;
            total += n as u64;
        }
        debug!("uploaded {} bytes to {}", total, remote);
        Ok(total)
    }

    fn download_to(&self, local: &Path, remote: &str) -> Result<u64, ClientError> {
        let sftp = self.sftp()?;
        let mut remote_file = sftp
            .open(Path::new(remote))
            .map_err(|e| path_error(Path::new(remote), e))?;
        let mut local_file = std::fs::File::create(local).map_err(ClientError::Local)?;

        let mut buf = vec![0u8; CHUNK];
        let mut total = 0u64;
        loop {
            let n = remote_file
                .read(&mut buf)
                .map_err(|e| self.stream_error(remote, e))?;
            if n == 0 {
                break;
            }
            local_file.write_all(&buf[..n]).map_err(ClientError::Local)?;
            total += n as u64;
        }
        debug!("downloaded {} bytes from {}", total, remote);
        Ok(total)
    }

    fn rename(&self, from: &str, to: &str) -> Result<(), ClientError> {
        self.sftp()?
            .rename(Path::new(from), Path::new(to), None)
            .map_err(|e| ClientError::Path(format!("{from} -> {to}: {e}")))
    }

    fn remove(&self, path: &str) -> Result<(), ClientError> {
        self.sftp()?
            .unlink(Path::new(path))
            .map_err(|e| path_error(Path::new(path), e))
    }

    fn remove_dir(&self, path: &str) -> Result<(), ClientError> {
        let sftp = self.sftp()?;
        self.rmdir_recursive(&sftp, Path::new(path))
    }

    fn ensure_dir(&self, path: &str) -> Result<(), ClientError> {
        let sftp = self.sftp()?;
        let mut current = if path.starts_with('/') {
            String::new()
        } else {
            ".".to_string()
        };
        for segment in path.split('/').filter(|s| !s.is_empty()) {
            current.push('/');
            current.push_str(segment);
            let p = Path::new(&current);
            match sftp.stat(p) {
                Ok(stat) if stat.file_type().is_dir() => continue,
                Ok(_) => {
                    return Err(ClientError::Path(format!(
                        "{current} exists and is not a directory"
                    )))
                }
                Err(_) => match sftp.mkdir(p, 0o755) {
                    Ok(()) => {}
                    // SSH_FX_FAILURE: created concurrently
                    Err(e) if matches!(e.code(), ssh2::ErrorCode::SFTP(4)) => {}
                    Err(e) => return Err(path_error(p, e)),
                },
            }
        }
        Ok(())
    }

    fn send_raw(&self, command: &str) -> Result<String, ClientError> {
        if self.closed.load(Ordering::SeqCst) {
            return Err(ClientError::Closed);
        }
        let mut channel = self.session.channel_session()?;
        channel.exec(command)?;

        let mut stdout = String::new();
        channel.read_to_string(&mut stdout)?;
        let mut stderr = String::new();
        channel.stderr().read_to_string(&mut stderr)?;
        channel.wait_close()?;

        let status = channel.exit_status()?;
        if status != 0 {
            return Err(ClientError::Command {
                status,
                message: stderr.trim().to_string(),
            });
        }
        Ok(stdout)
    }

    fn close(&self) {
        if self.closed.swap(true, Ordering::SeqCst) {
            return;
        }
        if let Err(e) = self.session.disconnect(None, "velasync closing", None) {
            warn!("disconnect from {} failed: {}", self.label, e);
        }
        info!("closed SFTP session with {}", self.label);
    }
}

/// Connects over ssh2 using the profile's auth method.
#[derive(Debug, Default, Clone, Copy)]
pub struct SftpConnector;

impl Connector for SftpConnector {
    fn connect(&self, server: &ServerProfile) -> Result<Box<dyn RemoteClient>, ClientError> {
        Ok(Box::new(SftpClient::connect(server)?))
    }
}

// ---------------------------------------------------------------------------
// Helpers
// ---------------------------------------------------------------------------

fn authenticate(session: &mut Session, profile: &ServerProfile) -> Result<(), ClientError> {
    match &profile.auth {
        AuthMethod::Key => {
            let key_path_raw = profile.key_path.as_deref().unwrap_or("~/.ssh/id_rsa");
            let key_path = expand_tilde(key_path_raw);
            if !key_path.exists() {
                return Err(ClientError::KeyNotFound(key_path.display().to_string()));
            }
            let passphrase = profile.password.as_deref();
            session
                .userauth_pubkey_file(&profile.user, None, &key_path, passphrase)
                .map_err(|_| ClientError::AuthFailed)?;
        }
        AuthMethod::Password => {
            let pw = match profile.password.clone() {
                Some(pw) => pw,
                None => keyring_password(profile).unwrap_or_default(),
            };
            session
                .userauth_password(&profile.user, &pw)
                .map_err(|_| ClientError::AuthFailed)?;
        }
    }

    if !session.authenticated() {
        return Err(ClientError::AuthFailed);
    }
    Ok(())
}

fn keyring_password(profile: &ServerProfile) -> Option<String> {
    let account = format!("{}@{}", profile.user, profile.host);
    match keyring::Entry::new(KEYRING_SERVICE, &account).and_then(|e| e.get_password()) {
        Ok(pw) => Some(pw),
        Err(e) => {
            debug!("no keyring password for {}: {}", account, e);
            None
        }
    }
}

fn verify_host_key(session: &Session, profile: &ServerProfile) -> Result<(), ClientError> {
    let (key, _) = session
        .host_key()
        .ok_or_else(|| ClientError::HostKey(profile.host.clone()))?;
    let mut known_hosts = session.known_hosts()?;
    let file = expand_tilde("~/.ssh/known_hosts");
    known_hosts.read_file(&file, KnownHostFileKind::OpenSSH)?;

    match known_hosts.check_port(&profile.host, profile.port, key) {
        CheckResult::Match => Ok(()),
        CheckResult::Mismatch => {
            warn!("host key for {} does not match known_hosts", profile.host);
            Err(ClientError::HostKey(profile.host.clone()))
        }
        _ => Err(ClientError::HostKey(profile.host.clone())),
    }
}

fn path_error(path: &Path, e: ssh2::Error) -> ClientError {
    if matches!(e.code(), ssh2::ErrorCode::Session(_)) {
        return ClientError::Ssh(e);
    }
    ClientError::Path(format!("{}: {}", path.display(), e))
}

/// Classify an IO error from an open SFTP file handle by its kind alone.
fn stream_io_error(remote: &str, e: io::Error) -> ClientError {
    match e.kind() {
        io::ErrorKind::BrokenPipe
        | io::ErrorKind::ConnectionReset
        | io::ErrorKind::ConnectionAborted
        | io::ErrorKind::TimedOut
        | io::ErrorKind::UnexpectedEof => ClientError::Tcp(e),
        _ => ClientError::Path(format!("{remote}: {e}")),
    }
}

fn entry_from_stat(path: &Path, stat: &FileStat) -> RemoteEntry {
    let name = path
        .file_name()
        .map(|n| n.to_string_lossy().to_string())
        .unwrap_or_default();

    let kind = if stat.file_type().is_dir() {
        EntryKind::Directory
    } else {
        EntryKind::File
    };

    let size = match kind {
        EntryKind::Directory => None,
        EntryKind::File => stat.size,
    };

    RemoteEntry {
        name,
        kind,
        size,
        permissions: stat.perm.map(format_permissions),
    }
}

/// Convert a Unix mode bitmask into a `rwxr-xr-x` style string.
pub(crate) fn format_permissions(mode: u32) -> String {
    let flags = [
        (0o400, 'r'), (0o200, 'w'), (0o100, 'x'),
        (0o040, 'r'), (0o020, 'w'), (0o010, 'x'),
        (0o004, 'r'), (0o002, 'w'), (0o001, 'x'),
    ];
    let mut s = String::with_capacity(9);
    for (bit, ch) in &flags {
        s.push(if mode & bit != 0 { *ch } else { '-' });
    }
    s
}

fn expand_tilde(path: &str) -> PathBuf {
    let home = || dirs::home_dir().unwrap_or_else(|| PathBuf::from("."));
    if let Some(rest) = path.strip_prefix("~/") {
        home().join(rest)
    } else if path == "~" {
        home()
    } else {
        PathBuf::from(path)
    }
}
