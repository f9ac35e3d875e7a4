use std::fs;
use std::path::{Path, PathBuf};

use crate::error::{Context, Result};

/// Metadata for a regular file inside a batch directory.
#[derive(Clone, Debug, PartialEq, Eq)]
pub struct FileEntry {
    pub name: String,
    pub path: PathBuf,
    pub size: u64,
}

/// List regular files in `dir` with the given extension, sorted by name. Nested directories
/// are not descended into.
pub fn list_files_with_extension(dir: impl AsRef<Path>, extension: &str) -> Result<Vec<FileEntry>> {
    let dir_path = dir.as_ref();
    let read_dir = fs::read_dir(dir_path)
        .with_context(|| format!("Failed to list directory {}", dir_path.display()))?;

    let mut entries = Vec::new();
    for entry in read_dir.flatten() {
        let path = entry.path();
        if path.extension().and_then(|ext| ext.to_str()) != Some(extension) {
            continue;
        }

        let metadata = match entry.metadata() {
            Ok(meta) if meta.is_file() => meta,
            _ => continue,
        };

        let Some(name) = path
            .file_name()
            .and_then(|segment| segment.to_str())
            .map(|s| s.to_string())
        else {
            continue;
        };

        entries.push(FileEntry {
            name,
            path,
            size: metadata.len(),
        });
    }

    entries.sort_by(|a, b| a.name.cmp(&b.name));
    Ok(entries)
}
