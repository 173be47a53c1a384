//! Local scratch directories, one tree per server.
//!
//! ```text
//! <root>/edit/<server>/<remote path>          files opened for editing
//! <root>/new/<server>/empty-<millis>.tmp      placeholders for new files
//! <root>/archive/<server>/<remote path>       zip staging mirror
//! <root>/archive/<server>/<name>-<millis>.zip finished archives
//! ```
//!
//! Nothing here is durable; the whole root may be wiped between runs.

use std::path::{Path, PathBuf};

#[derive(Debug, Clone)]
pub struct TempLayout {
    root: PathBuf,
}

impl Default for TempLayout {
    fn default() -> Self {
        Self::new(std::env::temp_dir().join("velasync"))
    }
}

impl TempLayout {
    pub fn new(root: impl Into<PathBuf>) -> Self {
        Self { root: root.into() }
    }

    pub fn root(&self) -> &Path {
        &self.root
    }

    /// Root under which edited files are mirrored.
    pub fn edit_root(&self) -> PathBuf {
        self.root.join("edit")
    }

    /// Deterministic temp location for editing `remote` from `server`.
    pub fn edit_path(&self, server: &str, remote: &str) -> PathBuf {
        mirror_path(&self.edit_root().join(sanitize_server_id(server)), remote)
    }

    pub fn new_file_placeholder(&self, server: &str) -> PathBuf {
        self.root
            .join("new")
            .join(sanitize_server_id(server))
            .join(format!("empty-{}.tmp", timestamp_millis()))
    }

    pub fn archive_dir(&self, server: &str) -> PathBuf {
        self.root.join("archive").join(sanitize_server_id(server))
    }

    pub fn archive_mirror(&self, server: &str, remote_dir: &str) -> PathBuf {
        mirror_path(&self.archive_dir(server), remote_dir)
    }

    /// Timestamped so repeated downloads of one directory never collide.
    pub fn archive_file(&self, server: &str, name: &str) -> PathBuf {
        self.archive_dir(server)
            .join(format!("{}-{}.zip", sanitize_file_name(name), timestamp_millis()))
    }
}

/// Map a server identifier onto `[A-Za-z0-9_-]`.
pub fn sanitize_server_id(id: &str) -> String {
    let id = if id.is_empty() { "server" } else { id };
    id.chars()
        .map(|c| {
            if c.is_ascii_alphanumeric() || c == '_' || c == '-' {
                c
            } else {
                '_'
            }
        })
        .collect()
}

fn sanitize_file_name(name: &str) -> String {
    let cleaned: String = name
        .chars()
        .map(|c| if c == '/' || c == '\\' { '_' } else { c })
        .collect();
    match cleaned.as_str() {
        "" | "." | ".." => "dir".to_string(),
        _ => cleaned,
    }
}

/// Place a remote path under `base`, one local component per remote
/// segment. `.` and `..` segments are dropped so the result stays in `base`.
pub fn mirror_path(base: &Path, remote: &str) -> PathBuf {
    remote
        .split('/')
        .filter(|s| !s.is_empty() && *s != "." && *s != "..")
        .fold(base.to_path_buf(), |acc, segment| acc.join(segment))
}

fn timestamp_millis() -> i64 {
    chrono::Utc::now().timestamp_millis()
}
