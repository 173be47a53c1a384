use std::fs::{self, File};
use std::path::{Component, Path};

use tracing::debug;
use walkdir::WalkDir;
use zip::write::SimpleFileOptions;
use zip::ZipWriter;

use crate::transfer::TransferError;

/// Pack `src_dir` into a zip at `dest` whose single top-level entry is
/// `prefix/`. Returns the number of files written.
pub fn zip_directory(src_dir: &Path, prefix: &str, dest: &Path) -> Result<usize, TransferError> {
    if let Some(parent) = dest.parent() {
        fs::create_dir_all(parent)?;
    }

    let file = File::create(dest)?;
    let mut zip = ZipWriter::new(file);
    let file_options = SimpleFileOptions::default()
        .compression_method(zip::CompressionMethod::Deflated)
        .unix_permissions(0o644);
    let dir_options = file_options.unix_permissions(0o755);

    let prefix = prefix.trim_matches('/');
    let mut files = 0usize;
    for entry in WalkDir::new(src_dir).sort_by_file_name() {
        let entry = entry?;
        let relative = entry
            .path()
            .strip_prefix(src_dir)
            .map_err(|e| TransferError::Local(std::io::Error::other(e)))?;
        let name = entry_name(prefix, relative);

        if entry.file_type().is_dir() {
            zip.add_directory(format!("{name}/"), dir_options)?;
        } else {
            zip.start_file(name, file_options)?;
            let mut f = File::open(entry.path())?;
            std::io::copy(&mut f, &mut zip)?;
            files += 1;
        }
    }

    zip.finish()?;
    debug!("wrote {} files into {}", files, dest.display());
    Ok(files)
}

/// Archive names always use `/`.
fn entry_name(prefix: &str, relative: &Path) -> String {
    relative
        .components()
        .filter_map(|c| match c {
            Component::Normal(part) => Some(part.to_string_lossy().to_string()),
            _ => None,
        })
        .fold(prefix.to_string(), |acc, part| format!("{acc}/{part}"))
}
