//! Finds complete takeout exports waiting in the import folder.
use crate::catalog;
use app_state::IngestSettings;
use color_eyre::Result;
use color_eyre::eyre::WrapErr;
use regex::Regex;
use std::collections::{BTreeMap, BTreeSet};
use std::path::{Path, PathBuf};
use tracing::{debug, info, warn};
use walkdir::WalkDir;

const PARTIAL_SUFFIX: &str = ".partial";

/// All parts of one export, e.g. `takeout-20240427T195310Z-001.zip` ... `-003.zip`.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct TakeoutExport {
    pub prefix: String,
    pub parts: Vec<PathBuf>,
}

#[derive(Debug, Default)]
struct ExportCandidate {
    parts: Vec<PathBuf>,
    has_incomplete_partial: bool,
}

/// Translates a simple `*`/`?` file-name glob into an anchored regex.
fn glob_regex(pattern: &str) -> Result<Regex> {
    let mut regex = String::from("^");
    for c in pattern.chars() {
        match c {
            '*' => regex.push_str(".*"),
            '?' => regex.push('.'),
            other => regex.push_str(&regex::escape(&other.to_string())),
        }
    }
    regex.push('$');
    Regex::new(&regex).wrap_err_with(|| format!("Invalid archive pattern {pattern:?}"))
}

/// `takeout-20240427T195310Z-001.zip` -> `takeout-20240427T195310Z`.
fn export_prefix(zip_name: &str) -> Option<&str> {
    let stem = zip_name.strip_suffix(".zip").unwrap_or(zip_name);
    stem.rsplit_once('-').map(|(prefix, _)| prefix)
}

fn is_valid_zip(path: &Path) -> bool {
    catalog::open_archive(path).is_ok()
}

fn contains_category(path: &Path, ingest: &IngestSettings) -> bool {
    match catalog::open_archive(path) {
        Ok(archive) => archive.file_names().any(|name| ingest.is_in_category(name)),
        Err(e) => {
            warn!("Could not inspect {}: {e}", path.display());
            false
        }
    }
}

/// Scans `import_dir` recursively for archive parts matching the configured pattern and
/// returns every export that is completely downloaded, readable, and contains the
/// recognized photo category. Newest export first.
pub fn find_takeout_exports(
    import_dir: &Path,
    ingest: &IngestSettings,
) -> Result<Vec<TakeoutExport>> {
    if !import_dir.exists() {
        info!("No import directory at {}", import_dir.display());
        return Ok(Vec::new());
    }
    let zip_pattern = glob_regex(&ingest.archive_pattern)?;
    let partial_pattern = glob_regex(&format!("{}{PARTIAL_SUFFIX}", ingest.archive_pattern))?;

    let mut zips = Vec::new();
    let mut partials = Vec::new();
    for entry in WalkDir::new(import_dir).sort_by_file_name() {
        let entry = match entry {
            Ok(e) => e,
            Err(e) => {
                debug!("Skipping inaccessible entry: {e}");
                continue;
            }
        };
        if !entry.file_type().is_file() {
            continue;
        }
        let name = entry.file_name().to_string_lossy().into_owned();
        if zip_pattern.is_match(&name) {
            zips.push(entry.into_path());
        } else if partial_pattern.is_match(&name) {
            partials.push(name);
        }
    }
    info!(
        "Found {} zip file(s), {} partial file(s) in {}",
        zips.len(),
        partials.len(),
        import_dir.display()
    );

    let valid_names: BTreeSet<String> = zips
        .iter()
        .filter(|p| is_valid_zip(p))
        .filter_map(|p| p.file_name().map(|n| n.to_string_lossy().into_owned()))
        .collect();

    let mut exports: BTreeMap<String, ExportCandidate> = BTreeMap::new();
    for zip in zips {
        let name = zip.file_name().map(|n| n.to_string_lossy().into_owned()).unwrap_or_default();
        if let Some(prefix) = export_prefix(&name) {
            exports.entry(prefix.to_owned()).or_default().parts.push(zip);
        }
    }
    for partial in &partials {
        let base = partial.strip_suffix(PARTIAL_SUFFIX).unwrap_or(partial);
        if let Some(prefix) = export_prefix(base)
            && !valid_names.contains(base)
        {
            exports.entry(prefix.to_owned()).or_default().has_incomplete_partial = true;
        }
    }

    let mut ready = Vec::new();
    for (prefix, mut candidate) in exports.into_iter().rev() {
        if candidate.has_incomplete_partial {
            warn!("Export {prefix}: .partial file(s) without a valid zip, download in progress");
            continue;
        }
        candidate.parts.sort();
        let invalid = candidate.parts.iter().filter(|p| !is_valid_zip(p)).count();
        if invalid > 0 {
            warn!("Export {prefix}: {invalid} corrupted or incomplete zip(s), skipping export");
            continue;
        }
        if candidate.parts.is_empty() {
            continue;
        }
        if candidate.parts.iter().any(|p| contains_category(p, ingest)) {
            info!("Export {prefix} has photos ({} parts)", candidate.parts.len());
            ready.push(TakeoutExport {
                prefix,
                parts: candidate.parts,
            });
        } else {
            debug!("Export {prefix} has no photo library content, skipping");
        }
    }
    Ok(ready)
}
