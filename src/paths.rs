//! Local → remote path resolution and remote path arithmetic.
//!
//! Remote paths always use `/`, whatever the local platform.

use std::path::{Component, Path, PathBuf};

use crate::config::{PathMapping, ServerProfile};

/// Finds the project a local file belongs to.
pub trait ProjectRelativizer: Send + Sync {
    /// `(project_root, path_relative_to_root)`, or `None` outside every project.
    fn relativize(&self, path: &Path) -> Option<(PathBuf, PathBuf)>;
}

/// A fixed set of project root directories; the deepest containing root wins.
#[derive(Debug, Clone, Default)]
pub struct ProjectRoots {
    roots: Vec<PathBuf>,
}

impl ProjectRoots {
    pub fn new(roots: Vec<PathBuf>) -> Self {
        Self { roots }
    }

    pub fn roots(&self) -> &[PathBuf] {
        &self.roots
    }
}

impl ProjectRelativizer for ProjectRoots {
    fn relativize(&self, path: &Path) -> Option<(PathBuf, PathBuf)> {
        self.roots
            .iter()
            .filter(|root| path.starts_with(root))
            .max_by_key(|root| root.components().count())
            .and_then(|root| {
                let rel = path.strip_prefix(root).ok()?;
                if rel.as_os_str().is_empty() {
                    return None;
                }
                Some((root.clone(), rel.to_path_buf()))
            })
    }
}

/// Compute the remote destination for `local` on the connected server.
///
/// The longest matching mapping for the server wins; without one the
/// project-relative path (or just the file name) is placed under the
/// server's base path. `None` only when no server is connected.
pub fn resolve_remote_path(
    local: &Path,
    mappings: &[PathMapping],
    server: Option<&ServerProfile>,
    projects: &dyn ProjectRelativizer,
) -> Option<String> {
    let server = server?;
    let normalized = normalize_separators(&local.to_string_lossy());

    let mut best: Option<(&PathMapping, String)> = None;
    for mapping in mappings {
        if mapping.server_name.is_empty() || mapping.local_base_path.is_empty() {
            continue;
        }
        if mapping.server_name != server.name {
            continue;
        }
        let base = normalize_separators(&mapping.local_base_path);
        if !normalized.starts_with(&base) {
            continue;
        }
        // Strictly longer only, so equal-length ties keep the first listed.
        let longer = best
            .as_ref()
            .map(|(_, current)| base.len() > current.len())
            .unwrap_or(true);
        if longer {
            best = Some((mapping, base));
        }
    }

    if let Some((mapping, base)) = best {
        let rel = &normalized[base.len()..];
        let rel = rel.strip_prefix('/').unwrap_or(rel);
        let remote_base = if mapping.remote_base_path.is_empty() {
            "/".to_string()
        } else {
            normalize_separators(&mapping.remote_base_path)
        };
        return Some(join_under(&remote_base, rel));
    }

    let rel = projects
        .relativize(local)
        .map(|(_, rel)| path_to_slashes(&rel))
        .filter(|rel| !rel.is_empty())
        .unwrap_or_else(|| {
            local
                .file_name()
                .map(|n| n.to_string_lossy().to_string())
                .unwrap_or_default()
        });
    Some(join_under(&server.base_path(), &rel))
}

/// Join a relative path under a base with exactly one `/` between them.
pub fn join_under(base: &str, rel: &str) -> String {
    let rel = rel.trim_start_matches('/');
    if base.ends_with('/') {
        format!("{base}{rel}")
    } else {
        format!("{base}/{rel}")
    }
}

/// Browser join: `/name` under the root (or an empty base), otherwise
/// `base/name`. No `.`/`..` normalization.
pub fn join_remote_path(base: &str, name: &str) -> String {
    if base.is_empty() || base == "/" {
        return format!("/{name}");
    }
    if base.ends_with('/') {
        format!("{base}{name}")
    } else {
        format!("{base}/{name}")
    }
}

/// Drop the last non-empty segment; the root is its own parent.
pub fn parent_remote_path(path: &str) -> String {
    let mut segments: Vec<&str> = path.split('/').filter(|s| !s.is_empty()).collect();
    segments.pop();
    format!("/{}", segments.join("/"))
}

/// Directory part of a remote file path, `/` for top-level files.
pub fn remote_dir_of(path: &str) -> String {
    match path.rfind('/') {
        Some(0) | None => "/".to_string(),
        Some(i) => path[..i].to_string(),
    }
}

/// Last segment of a remote path.
pub fn remote_file_name(path: &str) -> &str {
    path.trim_end_matches('/').rsplit('/').next().unwrap_or(path)
}

/// Reasons a name is refused under strict name checking.
pub fn check_entry_name(name: &str) -> Result<(), &'static str> {
    if name.is_empty() {
        return Err("name is empty");
    }
    if name == "." || name == ".." {
        return Err("name refers to a relative directory");
    }
    if name.contains('/') || name.contains('\\') {
        return Err("name contains a path separator");
    }
    Ok(())
}

fn normalize_separators(path: &str) -> String {
    path.replace('\\', "/")
}

fn path_to_slashes(path: &Path) -> String {
    path.components()
        .filter_map(|c| match c {
            Component::Normal(part) => Some(part.to_string_lossy().to_string()),
            _ => None,
        })
        .collect::<Vec<_>>()
        .join("/")
}
