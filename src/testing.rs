//! In-memory remote used by the unit tests.

use std::collections::{BTreeMap, BTreeSet};
use std::path::{Path, PathBuf};
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;
use std::time::{Duration, Instant};

use parking_lot::Mutex;

use crate::config::{AuthMethod, ServerProfile};
use crate::connection::{ClientError, Connector, RemoteClient, RemoteEntry};
use crate::notifications::{Level, Notifier};

#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Op {
    List(String),
    Upload(String),
    Download(String),
    Rename(String, String),
    Remove(String),
    RemoveDir(String),
    EnsureDir(String),
    Raw(String),
}

impl Op {
    fn kind(&self) -> &'static str {
        match self {
            Op::List(_) => "list",
            Op::Upload(_) => "upload",
            Op::Download(_) => "download",
            Op::Rename(..) => "rename",
            Op::Remove(_) => "remove",
            Op::RemoveDir(_) => "remove_dir",
            Op::EnsureDir(_) => "ensure_dir",
            Op::Raw(_) => "raw",
        }
    }

    fn path(&self) -> &str {
        match self {
            Op::List(p)
            | Op::Upload(p)
            | Op::Download(p)
            | Op::Rename(p, _)
            | Op::Remove(p)
            | Op::RemoveDir(p)
            | Op::EnsureDir(p)
            | Op::Raw(p) => p,
        }
    }
}

#[derive(Default)]
struct State {
    dirs: BTreeSet<String>,
    files: BTreeMap<String, Vec<u8>>,
    log: Vec<Op>,
    failures: Vec<(&'static str, String, bool)>,
    connects: usize,
    closes: usize,
    refuse: bool,
    hold: Option<String>,
    held: bool,
}

/// Shared view of the fake server; clones see the same tree.
#[derive(Clone)]
pub struct MockRemote(Arc<Mutex<State>>);

impl MockRemote {
    pub fn new() -> Self {
        let mut state = State::default();
        state.dirs.insert("/".to_string());
        Self(Arc::new(Mutex::new(state)))
    }

    pub fn add_dir(&self, path: &str) {
        let mut state = self.0.lock();
        for prefix in prefixes(path) {
            state.dirs.insert(prefix);
        }
    }

    pub fn add_file(&self, path: &str, body: &[u8]) {
        self.add_dir(&parent_of(path));
        self.0.lock().files.insert(path.to_string(), body.to_vec());
    }

    pub fn file(&self, path: &str) -> Option<Vec<u8>> {
        self.0.lock().files.get(path).cloned()
    }

    pub fn has_dir(&self, path: &str) -> bool {
        self.0.lock().dirs.contains(path)
    }

    /// Fail the next request of `kind` ("upload", "list", ...) on `path`.
    pub fn fail_once(&self, kind: &'static str, path: &str) {
        self.0.lock().failures.push((kind, path.to_string(), false));
    }

    /// Fail every request of `kind` on `path` with a transport error.
    pub fn drop_connection_on(&self, kind: &'static str, path: &str) {
        self.0.lock().failures.push((kind, path.to_string(), true));
    }

    /// Park the next upload to `path` until its client is closed.
    pub fn hold_upload(&self, path: &str) {
        let mut state = self.0.lock();
        state.hold = Some(path.to_string());
        state.held = false;
    }

    /// True once an upload is parked by [`MockRemote::hold_upload`].
    pub fn upload_held(&self) -> bool {
        self.0.lock().held
    }

    fn take_hold(&self, path: &str) -> bool {
        let mut state = self.0.lock();
        if state.hold.as_deref() == Some(path) {
            state.hold = None;
            state.held = true;
            return true;
        }
        false
    }

    pub fn refuse_connections(&self, refuse: bool) {
        self.0.lock().refuse = refuse;
    }

    pub fn log(&self) -> Vec<Op> {
        self.0.lock().log.clone()
    }

    pub fn clear_log(&self) {
        self.0.lock().log.clear();
    }

    pub fn connects(&self) -> usize {
        self.0.lock().connects
    }

    pub fn closes(&self) -> usize {
        self.0.lock().closes
    }

    /// Position of `op` in the request log.
    pub fn position(&self, op: &Op) -> Option<usize> {
        self.0.lock().log.iter().position(|o| o == op)
    }

    fn record(&self, op: Op) -> Result<(), ClientError> {
        let mut state = self.0.lock();
        let hit = state
            .failures
            .iter()
            .position(|(kind, path, _)| *kind == op.kind() && path.as_str() == op.path());
        let path = op.path().to_string();
        state.log.push(op);
        match hit {
            Some(i) if state.failures[i].2 => Err(ClientError::Closed),
            Some(i) => {
                state.failures.remove(i);
                Err(ClientError::Path(format!("{path}: injected failure")))
            }
            None => Ok(()),
        }
    }
}

pub struct MockClient {
    remote: MockRemote,
    closed: AtomicBool,
}

impl MockClient {
    fn check_open(&self) -> Result<(), ClientError> {
        if self.closed.load(Ordering::SeqCst) {
            return Err(ClientError::Closed);
        }
        Ok(())
    }

    fn wait_until_closed(&self) {
        let deadline = Instant::now() + Duration::from_secs(5);
        while !self.closed.load(Ordering::SeqCst) && Instant::now() < deadline {
            std::thread::sleep(Duration::from_millis(5));
        }
    }
}

impl RemoteClient for MockClient {
    fn list(&self, dir: &str) -> Result<Vec<RemoteEntry>, ClientError> {
        self.check_open()?;
        let dir = trim_dir(dir);
        self.remote.record(Op::List(dir.clone()))?;
        let state = self.remote.0.lock();
        if !state.dirs.contains(&dir) {
            return Err(ClientError::Path(format!("{dir}: no such directory")));
        }
        let mut entries: BTreeMap<String, RemoteEntry> = BTreeMap::new();
        for d in state.dirs.iter().filter(|d| *d != "/" && parent_of(d) == dir) {
            let name = base_name(d);
            entries.insert(name.clone(), RemoteEntry::directory(name));
        }
        for (f, body) in state.files.iter().filter(|(f, _)| parent_of(f) == dir) {
            let name = base_name(f);
            entries.insert(name.clone(), RemoteEntry::file(name, Some(body.len() as u64)));
        }
        Ok(entries.into_values().collect())
    }

    fn upload_from(&self, local: &Path, remote: &str) -> Result<u64, ClientError> {
        self.check_open()?;
        self.remote.record(Op::Upload(remote.to_string()))?;
        if self.remote.take_hold(remote) {
            self.wait_until_closed();
            self.check_open()?;
        }
        let body = std::fs::read(local).map_err(ClientError::Local)?;
        let mut state = self.remote.0.lock();
        if !state.dirs.contains(&parent_of(remote)) {
            return Err(ClientError::Path(format!("{remote}: parent missing")));
        }
        let len = body.len() as u64;
        state.files.insert(remote.to_string(), body);
        Ok(len)
    }

    fn download_to(&self, local: &Path, remote: &str) -> Result<u64, ClientError> {
        self.check_open()?;
        self.remote.record(Op::Download(remote.to_string()))?;
        let body = self
            .remote
            .file(remote)
            .ok_or_else(|| ClientError::Path(format!("{remote}: no such file")))?;
        std::fs::write(local, &body).map_err(ClientError::Local)?;
        Ok(body.len() as u64)
    }

    fn rename(&self, from: &str, to: &str) -> Result<(), ClientError> {
        self.check_open()?;
        self.remote.record(Op::Rename(from.to_string(), to.to_string()))?;
        let mut state = self.remote.0.lock();
        if let Some(body) = state.files.remove(from) {
            state.files.insert(to.to_string(), body);
            return Ok(());
        }
        if !state.dirs.contains(from) {
            return Err(ClientError::Path(format!("{from}: not found")));
        }
        let prefix = format!("{from}/");
        let moved_dirs: Vec<String> = state
            .dirs
            .iter()
            .filter(|d| *d == from || d.starts_with(&prefix))
            .cloned()
            .collect();
        for d in moved_dirs {
            state.dirs.remove(&d);
            state.dirs.insert(format!("{to}{}", &d[from.len()..]));
        }
        let moved_files: Vec<String> = state
            .files
            .keys()
            .filter(|f| f.starts_with(&prefix))
            .cloned()
            .collect();
        for f in moved_files {
            if let Some(body) = state.files.remove(&f) {
                state.files.insert(format!("{to}{}", &f[from.len()..]), body);
            }
        }
        Ok(())
    }

    fn remove(&self, path: &str) -> Result<(), ClientError> {
        self.check_open()?;
        self.remote.record(Op::Remove(path.to_string()))?;
        match self.remote.0.lock().files.remove(path) {
            Some(_) => Ok(()),
            None => Err(ClientError::Path(format!("{path}: no such file"))),
        }
    }

    fn remove_dir(&self, path: &str) -> Result<(), ClientError> {
        self.check_open()?;
        self.remote.record(Op::RemoveDir(path.to_string()))?;
        let mut state = self.remote.0.lock();
        if !state.dirs.remove(path) {
            return Err(ClientError::Path(format!("{path}: no such directory")));
        }
        let prefix = format!("{path}/");
        state.dirs.retain(|d| !d.starts_with(&prefix));
        state.files.retain(|f, _| !f.starts_with(&prefix));
        Ok(())
    }

    fn ensure_dir(&self, path: &str) -> Result<(), ClientError> {
        self.check_open()?;
        let path = trim_dir(path);
        self.remote.record(Op::EnsureDir(path.clone()))?;
        let mut state = self.remote.0.lock();
        for prefix in prefixes(&path) {
            if state.files.contains_key(&prefix) {
                return Err(ClientError::Path(format!("{prefix} is a file")));
            }
            state.dirs.insert(prefix);
        }
        Ok(())
    }

    fn send_raw(&self, command: &str) -> Result<String, ClientError> {
        self.check_open()?;
        self.remote.record(Op::Raw(command.to_string()))?;
        Ok(String::new())
    }

    fn close(&self) {
        if !self.closed.swap(true, Ordering::SeqCst) {
            self.remote.0.lock().closes += 1;
        }
    }
}

pub struct MockConnector {
    remote: MockRemote,
}

impl MockConnector {
    pub fn new() -> Self {
        Self {
            remote: MockRemote::new(),
        }
    }

    pub fn remote(&self) -> MockRemote {
        self.remote.clone()
    }
}

impl Connector for MockConnector {
    fn connect(&self, _server: &ServerProfile) -> Result<Box<dyn RemoteClient>, ClientError> {
        let mut state = self.remote.0.lock();
        if state.refuse {
            return Err(ClientError::AuthFailed);
        }
        state.connects += 1;
        Ok(Box::new(MockClient {
            remote: self.remote.clone(),
            closed: AtomicBool::new(false),
        }))
    }
}

/// Collects notifications for assertions.
#[derive(Clone, Default)]
pub struct RecordingNotifier(Arc<Mutex<Vec<(Level, String)>>>);

impl RecordingNotifier {
    pub fn messages(&self) -> Vec<(Level, String)> {
        self.0.lock().clone()
    }

    pub fn count(&self, level: Level) -> usize {
        self.0.lock().iter().filter(|(l, _)| *l == level).count()
    }

    pub fn clear(&self) {
        self.0.lock().clear();
    }
}

impl Notifier for RecordingNotifier {
    fn notify(&self, level: Level, message: &str) {
        self.0.lock().push((level, message.to_string()));
    }
}

pub fn profile(name: &str, base: &str) -> ServerProfile {
    ServerProfile {
        name: name.to_string(),
        host: format!("{}.example", name.to_lowercase()),
        port: 22,
        user: "deploy".to_string(),
        password: Some("secret".to_string()),
        secure: false,
        remote_base_path: Some(base.to_string()),
        auth: AuthMethod::Password,
        key_path: None,
    }
}

pub fn write_file(path: &Path, body: &str) -> PathBuf {
    if let Some(parent) = path.parent() {
        std::fs::create_dir_all(parent).unwrap();
    }
    std::fs::write(path, body).unwrap();
    path.to_path_buf()
}

fn trim_dir(dir: &str) -> String {
    let trimmed = dir.trim_end_matches('/');
    if trimmed.is_empty() {
        "/".to_string()
    } else {
        trimmed.to_string()
    }
}

fn parent_of(path: &str) -> String {
    match path.rfind('/') {
        Some(0) | None => "/".to_string(),
        Some(i) => path[..i].to_string(),
    }
}

fn base_name(path: &str) -> String {
    path.rsplit('/').next().unwrap_or(path).to_string()
}

fn prefixes(path: &str) -> Vec<String> {
    let mut out = vec!["/".to_string()];
    let mut current = String::new();
    for segment in path.split('/').filter(|s| !s.is_empty()) {
        current.push('/');
        current.push_str(segment);
        out.push(current.clone());
    }
    out
}
