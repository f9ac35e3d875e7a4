use std::fs;
use std::io;
use std::path::Path;

use log::debug;
use zip::write::SimpleFileOptions;
use zip::{CompressionMethod, ZipWriter};

use crate::error::{AppError, Context, Result};
use crate::utils::list_files_with_extension;

/// Pack every CSV artifact in `source_dir` into a deflated zip at `archive_path`. Entries are
/// stored flat under their file names. Returns the number of entries written.
pub fn zip_artifacts(source_dir: &Path, archive_path: &Path) -> Result<usize> {
    let entries = list_files_with_extension(source_dir, "csv")?;
    if entries.is_empty() {
        return Err(AppError::message(format!(
            "no artifacts to archive in {}",
            source_dir.display()
        )));
    }

    if let Some(parent) = archive_path.parent().filter(|p| !p.as_os_str().is_empty()) {
        fs::create_dir_all(parent).with_context(|| {
            format!("Failed to create archive directory {}", parent.display())
        })?;
    }

    let file = fs::File::create(archive_path)
        .with_context(|| format!("Failed to create archive {}", archive_path.display()))?;
    let mut writer = ZipWriter::new(file);
    let options = SimpleFileOptions::default().compression_method(CompressionMethod::Deflated);

    for entry in &entries {
        debug!("Archiving {} ({} bytes)", entry.path.display(), entry.size);
        writer.start_file(entry.name.as_str(), options)?;
        let mut source = fs::File::open(&entry.path)
            .with_context(|| format!("Failed to open {}", entry.path.display()))?;
        io::copy(&mut source, &mut writer)?;
    }

    writer.finish()?;
    Ok(entries.len())
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::io::Read;
    use zip::ZipArchive;

    #[test]
    fn packs_csv_files_flat() {
        let dir = tempfile::tempdir().unwrap();
        let source = dir.path().join("1h-01 February 2024");
        fs::create_dir_all(&source).unwrap();
        fs::write(source.join("BTCUSDT.csv"), "time,open\n").unwrap();
        fs::write(source.join("ETHUSDT.csv"), "time,close\n").unwrap();
        fs::write(source.join("run.log"), "ignored").unwrap();
        let target = dir.path().join("1h-01 February 2024.zip");

        let count = zip_artifacts(&source, &target).unwrap();

        assert_eq!(count, 2);
        let mut archive = ZipArchive::new(fs::File::open(&target).unwrap()).unwrap();
        let mut names: Vec<String> = archive.file_names().map(str::to_string).collect();
        names.sort();
        assert_eq!(names, vec!["BTCUSDT.csv", "ETHUSDT.csv"]);

        let mut entry = archive.by_name("ETHUSDT.csv").unwrap();
        assert_eq!(entry.compression(), CompressionMethod::Deflated);
        let mut content = String::new();
        entry.read_to_string(&mut content).unwrap();
        assert_eq!(content, "time,close\n");
    }

    #[test]
    fn refuses_empty_directory() {
        let dir = tempfile::tempdir().unwrap();
        let target = dir.path().join("out.zip");

        assert!(zip_artifacts(dir.path(), &target).is_err());
        assert!(!target.exists());
    }
}
