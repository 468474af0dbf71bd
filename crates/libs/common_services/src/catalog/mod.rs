//! Inventory of an import unit (archive parts or a folder tree) and the
//! size-verified copy/extract primitives used during reconciliation.
mod error;

pub use error::CatalogError;

use app_state::{IngestSettings, MakeRelativePath};
use common_types::FileEntry;
use std::collections::BTreeMap;
use std::fs::{self, File};
use std::io;
use std::path::Path;
use tracing::{debug, warn};
use walkdir::WalkDir;
use zip::ZipArchive;

fn classify(mut entry: FileEntry, ingest: &IngestSettings) -> FileEntry {
    entry.is_media = ingest.is_media_file(&entry.filename);
    entry.is_metadata_sidecar = !entry.is_media && ingest.is_sidecar_file(&entry.filename);
    entry.is_source_specific_category = ingest.is_in_category(&entry.path);
    entry
}

/// Lists every file (directories excluded) inside one archive part.
pub fn inventory_archive(
    part: &Path,
    ingest: &IngestSettings,
) -> Result<Vec<FileEntry>, CatalogError> {
    let file = File::open(part).map_err(CatalogError::io(part))?;
    let mut archive = ZipArchive::new(file).map_err(CatalogError::zip(part))?;
    let part_name = part
        .file_name()
        .map(|n| n.to_string_lossy().into_owned());

    let mut entries = Vec::with_capacity(archive.len());
    for index in 0..archive.len() {
        let zipped = archive.by_index(index).map_err(CatalogError::zip(part))?;
        if zipped.is_dir() {
            continue;
        }
        let mut entry = FileEntry::new(zipped.name(), zipped.size());
        entry.source_archive.clone_from(&part_name);
        entries.push(classify(entry, ingest));
    }
    Ok(entries)
}

/// Merges the inventories of all parts of a multi-part export, keyed by path.
pub fn inventory_archives<P: AsRef<Path>>(
    parts: &[P],
    ingest: &IngestSettings,
) -> Result<Vec<FileEntry>, CatalogError> {
    let mut merged = BTreeMap::new();
    for part in parts {
        for entry in inventory_archive(part.as_ref(), ingest)? {
            if merged.contains_key(&entry.path) {
                debug!("{} appears in more than one part, keeping the first", entry.path);
                continue;
            }
            merged.insert(entry.path.clone(), entry);
        }
    }
    Ok(merged.into_values().collect())
}

/// Lists every regular file under `root`, keyed by its POSIX path relative to `root`.
pub fn inventory_folder(
    root: &Path,
    ingest: &IngestSettings,
) -> Result<Vec<FileEntry>, CatalogError> {
    if !root.is_dir() {
        return Err(CatalogError::Io {
            path: root.to_path_buf(),
            source: io::Error::new(io::ErrorKind::NotFound, "not a directory"),
        });
    }
    let mut entries = Vec::new();
    for dir_entry in WalkDir::new(root).sort_by_file_name() {
        let dir_entry = match dir_entry {
            Ok(e) => e,
            Err(e) => {
                warn!("Skipping inaccessible entry: {e}");
                continue;
            }
        };
        if !dir_entry.file_type().is_file() {
            continue;
        }
        let Ok(relative) = dir_entry.path().make_relative(root) else {
            warn!("Skipping {}: outside of {}", dir_entry.path().display(), root.display());
            continue;
        };
        let size = dir_entry
            .metadata()
            .map_err(|e| CatalogError::Io {
                path: dir_entry.path().to_path_buf(),
                source: e.into(),
            })?
            .len();
        entries.push(classify(FileEntry::new(relative, size), ingest));
    }
    Ok(entries)
}

fn verify_size(path: &Path, expected: u64) -> Result<u64, CatalogError> {
    let actual = fs::metadata(path).map_err(CatalogError::io(path))?.len();
    if actual != expected {
        return Err(CatalogError::SizeMismatch {
            path: path.to_path_buf(),
            expected,
            actual,
        });
    }
    Ok(actual)
}

fn create_parent(dest: &Path) -> Result<(), CatalogError> {
    if let Some(parent) = dest.parent() {
        fs::create_dir_all(parent).map_err(CatalogError::io(parent))?;
    }
    Ok(())
}

/// Extracts one archive member to `dest` and checks the written size against the
/// size recorded in the archive.
pub fn extract_verified(
    archive: &mut ZipArchive<File>,
    archive_path: &Path,
    inner_path: &str,
    dest: &Path,
) -> Result<u64, CatalogError> {
    let mut zipped = archive
        .by_name(inner_path)
        .map_err(CatalogError::zip(archive_path))?;
    let expected = zipped.size();
    create_parent(dest)?;
    let mut out = File::create(dest).map_err(CatalogError::io(dest))?;
    io::copy(&mut zipped, &mut out).map_err(CatalogError::io(dest))?;
    out.sync_all().map_err(CatalogError::io(dest))?;
    verify_size(dest, expected)
}

/// Copies `source` to `dest` and checks the copy's size against the source.
pub fn copy_verified(source: &Path, dest: &Path) -> Result<u64, CatalogError> {
    let expected = fs::metadata(source).map_err(CatalogError::io(source))?.len();
    create_parent(dest)?;
    fs::copy(source, dest).map_err(CatalogError::io(dest))?;
    verify_size(dest, expected)
}

pub fn open_archive(path: &Path) -> Result<ZipArchive<File>, CatalogError> {
    let file = File::open(path).map_err(CatalogError::io(path))?;
    ZipArchive::new(file).map_err(CatalogError::zip(path))
}

#[cfg(test)]
pub(crate) mod test_support {
    use std::io::Write;
    use std::path::Path;
    use zip::ZipWriter;
    use zip::write::SimpleFileOptions;

    /// Writes a stored (uncompressed) zip with the given members.
    pub fn write_zip(path: &Path, members: &[(&str, usize)]) -> color_eyre::Result<()> {
        let mut writer = ZipWriter::new(std::fs::File::create(path)?);
        let options =
            SimpleFileOptions::default().compression_method(zip::CompressionMethod::Stored);
        for (name, size) in members {
            writer.start_file(*name, options)?;
            writer.write_all(&vec![b'x'; *size])?;
        }
        writer.finish()?;
        Ok(())
    }
}
