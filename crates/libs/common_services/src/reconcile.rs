//! Decides the final disposition of every manifest entry once the upload tool is done,
//! and moves what the tool did not take into a side folder for review.
use crate::catalog::{self, CatalogError};
use common_types::{Disposition, FileEntry, FileStatus, ResultSummary};
use std::collections::BTreeMap;
use std::fs::File;
use std::path::{Component, Path, PathBuf};
use tracing::{info, warn};
use zip::ZipArchive;

/// The physical input of a job.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum ImportUnit {
    Archive { parts: Vec<PathBuf> },
    Folder { root: PathBuf },
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Plan {
    /// Final disposition, no file work needed.
    Settle(Disposition),
    /// Copy or extract to the side folder; the disposition depends on the result.
    Transfer,
}

#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct ReconcileReport {
    pub moved: usize,
    pub failed: usize,
}

/// Outcome of an entry across all attempts: the manifest first, since it keeps the
/// best result ever seen, then the last attempt's result for this exact path. A result
/// reported for a namesake in another folder never counts.
#[must_use]
pub fn outcome_of(entry: &FileEntry, summary: &ResultSummary) -> Option<FileStatus> {
    entry
        .import_status
        .or_else(|| summary.result_for_path(&entry.path).and_then(|r| r.status))
}

/// Pure decision for one entry.
///
/// With `skip_recognized_category` only sidecars inside the recognized category are
/// left alone; without it every sidecar is, because the whole tree went to the tool.
#[must_use]
pub fn plan_for(
    entry: &FileEntry,
    outcome: Option<FileStatus>,
    skip_recognized_category: bool,
    transfer_enabled: bool,
) -> Plan {
    if outcome.is_some_and(FileStatus::is_absorbed) {
        return Plan::Settle(Disposition::Imported);
    }
    if entry.is_metadata_sidecar
        && (!skip_recognized_category || entry.is_source_specific_category)
    {
        return Plan::Settle(Disposition::SkippedMetadata);
    }
    if transfer_enabled {
        return Plan::Transfer;
    }
    Plan::Settle(fallback_disposition(outcome))
}

const fn fallback_disposition(outcome: Option<FileStatus>) -> Disposition {
    match outcome {
        Some(FileStatus::Error) => Disposition::Error,
        _ => Disposition::Unknown,
    }
}

/// Joins a relative POSIX path onto `base`, refusing anything that would escape it.
fn confined_join(base: &Path, relative: &str) -> Option<PathBuf> {
    let relative = Path::new(relative);
    relative
        .components()
        .all(|c| matches!(c, Component::Normal(_) | Component::CurDir))
        .then(|| base.join(relative))
}

struct Transferrer<'a> {
    unit: &'a ImportUnit,
    target: &'a Path,
    open_archives: BTreeMap<String, ZipArchive<File>>,
}

impl Transferrer<'_> {
    fn archive_path(&self, name: &str) -> Option<&PathBuf> {
        let ImportUnit::Archive { parts } = self.unit else {
            return None;
        };
        parts
            .iter()
            .find(|p| p.file_name().is_some_and(|n| n.to_string_lossy() == name))
    }

    fn transfer(&mut self, entry: &FileEntry) -> Result<u64, CatalogError> {
        let dest = confined_join(self.target, &entry.path).ok_or_else(|| CatalogError::Io {
            path: PathBuf::from(&entry.path),
            source: std::io::Error::new(
                std::io::ErrorKind::InvalidInput,
                "path escapes the extraction folder",
            ),
        })?;
        match self.unit {
            ImportUnit::Folder { root } => {
                let source = confined_join(root, &entry.path).unwrap_or_else(|| root.join(&entry.path));
                catalog::copy_verified(&source, &dest)
            }
            ImportUnit::Archive { .. } => {
                let part_name = entry.source_archive.clone().unwrap_or_default();
                let part_path = self
                    .archive_path(&part_name)
                    .cloned()
                    .ok_or_else(|| CatalogError::Io {
                        path: PathBuf::from(&part_name),
                        source: std::io::Error::new(
                            std::io::ErrorKind::NotFound,
                            "archive part is not part of this import",
                        ),
                    })?;
                if !self.open_archives.contains_key(&part_name) {
                    let archive = catalog::open_archive(&part_path)?;
                    self.open_archives.insert(part_name.clone(), archive);
                }
                let archive = self
                    .open_archives
                    .get_mut(&part_name)
                    .ok_or_else(|| CatalogError::Io {
                        path: part_path.clone(),
                        source: std::io::Error::other("archive handle missing"),
                    })?;
                catalog::extract_verified(archive, &part_path, &entry.path, &dest)
            }
        }
    }
}

/// Settles every entry of `manifest` and transfers not-absorbed files to
/// `extract_target` when one is given. Per-file failures are counted, never raised.
pub fn reconcile(
    unit: &ImportUnit,
    extract_target: Option<&Path>,
    summary: &ResultSummary,
    manifest: &mut BTreeMap<String, FileEntry>,
    skip_recognized_category: bool,
) -> ReconcileReport {
    let (success, failure) = match unit {
        ImportUnit::Archive { .. } => (Disposition::Extracted, Disposition::ExtractFailed),
        ImportUnit::Folder { .. } => (Disposition::CopiedForReview, Disposition::CopyFailed),
    };
    let mut transferrer = extract_target.map(|target| Transferrer {
        unit,
        target,
        open_archives: BTreeMap::new(),
    });
    let mut report = ReconcileReport::default();

    for entry in manifest.values_mut() {
        let outcome = outcome_of(entry, summary);
        if entry.import_status.is_none()
            && let Some(status) = outcome
        {
            let reason = summary.result_for_path(&entry.path).and_then(|r| r.reason.clone());
            entry.record_outcome(status, reason);
        }

        match plan_for(entry, outcome, skip_recognized_category, transferrer.is_some()) {
            Plan::Settle(disposition) => {
                entry.set_disposition(disposition);
            }
            Plan::Transfer => {
                let Some(transferrer) = transferrer.as_mut() else {
                    continue;
                };
                if let ImportUnit::Folder { root } = unit
                    && !root.join(&entry.path).exists()
                {
                    warn!("{} disappeared before it could be copied", entry.path);
                    entry.set_disposition(fallback_disposition(outcome));
                    continue;
                }
                match transferrer.transfer(entry) {
                    Ok(_) => {
                        entry.set_disposition(success);
                        report.moved += 1;
                    }
                    Err(e) => {
                        warn!("Failed to move {} for review: {e}", entry.path);
                        entry.set_disposition(failure);
                        report.failed += 1;
                    }
                }
            }
        }
    }

    if let Some(target) = extract_target
        && report.moved + report.failed > 0
    {
        info!(
            "Moved {} not-imported files to {} ({} failed)",
            report.moved,
            target.display(),
            report.failed
        );
    }
    report
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::catalog::test_support::write_zip;
    use crate::catalog::{inventory_archive, inventory_folder};
    use app_state::IngestSettings;
    use color_eyre::Result;
    use common_types::{LogEvent, file_name_of};
    use proptest::prelude::*;
    use std::fs;

    fn manifest_of(entries: Vec<FileEntry>) -> BTreeMap<String, FileEntry> {
        entries.into_iter().map(|e| (e.path.clone(), e)).collect()
    }

    fn summary_with(outcomes: &[(&str, FileStatus)]) -> ResultSummary {
        let mut summary = ResultSummary::default();
        for (path, status) in outcomes {
            summary.apply(&LogEvent::FileOutcome {
                path: (*path).to_owned(),
                filename: file_name_of(path).to_owned(),
                status: *status,
                reason: None,
            });
        }
        summary
    }

    #[test]
    fn archive_leftovers_are_extracted() -> Result<()> {
        let dir = tempfile::tempdir()?;
        let part = dir.path().join("takeout-x-001.zip");
        write_zip(
            &part,
            &[
                ("Takeout/Google Photos/a.jpg", 2048),
                ("Takeout/Google Photos/a.jpg.json", 100),
                ("Takeout/Google Photos/b.jpg", 512),
                ("Takeout/Drive/doc.pdf", 300),
                ("Takeout/Drive/settings.json", 20),
            ],
        )?;
        let mut manifest = manifest_of(inventory_archive(&part, &IngestSettings::default())?);
        let summary = summary_with(&[
            ("Takeout/Google Photos/a.jpg", FileStatus::Uploaded),
            ("Takeout/Google Photos/b.jpg", FileStatus::Error),
        ]);
        let target = dir.path().join("extracted");
        let unit = ImportUnit::Archive { parts: vec![part] };

        let report = reconcile(&unit, Some(&target), &summary, &mut manifest, true);

        let disposition = |p: &str| manifest[p].disposition;
        assert_eq!(disposition("Takeout/Google Photos/a.jpg"), Disposition::Imported);
        assert_eq!(disposition("Takeout/Google Photos/a.jpg.json"), Disposition::SkippedMetadata);
        assert_eq!(disposition("Takeout/Google Photos/b.jpg"), Disposition::Extracted);
        assert_eq!(disposition("Takeout/Drive/doc.pdf"), Disposition::Extracted);
        assert_eq!(disposition("Takeout/Drive/settings.json"), Disposition::Extracted);
        assert_eq!(report, ReconcileReport { moved: 3, failed: 0 });
        assert_eq!(fs::metadata(target.join("Takeout/Google Photos/b.jpg"))?.len(), 512);
        assert_eq!(manifest["Takeout/Google Photos/b.jpg"].import_status, Some(FileStatus::Error));
        Ok(())
    }

    #[test]
    fn namesake_outside_the_category_is_extracted() -> Result<()> {
        let dir = tempfile::tempdir()?;
        let part = dir.path().join("takeout-x-001.zip");
        write_zip(
            &part,
            &[
                ("Takeout/Google Photos/2019/IMG_1.jpg", 300),
                ("Takeout/Drive/IMG_1.jpg", 400),
            ],
        )?;
        let mut manifest = manifest_of(inventory_archive(&part, &IngestSettings::default())?);
        let summary = summary_with(&[("Takeout/Google Photos/2019/IMG_1.jpg", FileStatus::Uploaded)]);
        let target = dir.path().join("extracted");
        let unit = ImportUnit::Archive { parts: vec![part] };

        let report = reconcile(&unit, Some(&target), &summary, &mut manifest, true);

        assert_eq!(manifest["Takeout/Google Photos/2019/IMG_1.jpg"].disposition, Disposition::Imported);
        let drive = &manifest["Takeout/Drive/IMG_1.jpg"];
        assert_eq!(drive.disposition, Disposition::Extracted);
        assert_eq!(drive.import_status, None);
        assert_eq!(report.moved, 1);
        assert_eq!(fs::metadata(target.join("Takeout/Drive/IMG_1.jpg"))?.len(), 400);
        Ok(())
    }

    #[test]
    fn missing_archive_part_counts_as_failed() -> Result<()> {
        let dir = tempfile::tempdir()?;
        let part = dir.path().join("p-001.zip");
        write_zip(&part, &[("x/doc.pdf", 10)])?;
        let mut manifest = manifest_of(inventory_archive(&part, &IngestSettings::default())?);
        fs::remove_file(&part)?;

        let unit = ImportUnit::Archive { parts: vec![part] };
        let target = dir.path().join("out");
        let report = reconcile(&unit, Some(&target), &ResultSummary::default(), &mut manifest, true);

        assert_eq!(report, ReconcileReport { moved: 0, failed: 1 });
        assert_eq!(manifest["x/doc.pdf"].disposition, Disposition::ExtractFailed);
        Ok(())
    }

    #[test]
    fn folder_without_copy_keeps_outcome() -> Result<()> {
        let dir = tempfile::tempdir()?;
        let root = dir.path().join("card");
        fs::create_dir_all(&root)?;
        for (name, size) in [("a.jpg", 10), ("b.jpg", 20), ("c.mov", 30), ("a.jpg.json", 5)] {
            fs::write(root.join(name), vec![0u8; size])?;
        }
        let mut manifest = manifest_of(inventory_folder(&root, &IngestSettings::default())?);
        let summary = summary_with(&[
            ("a.jpg", FileStatus::ServerDuplicate),
            ("b.jpg", FileStatus::Error),
        ]);
        let unit = ImportUnit::Folder { root };

        let report = reconcile(&unit, None, &summary, &mut manifest, false);

        assert_eq!(report, ReconcileReport::default());
        assert_eq!(manifest["a.jpg"].disposition, Disposition::Imported);
        assert_eq!(manifest["b.jpg"].disposition, Disposition::Error);
        assert_eq!(manifest["c.mov"].disposition, Disposition::Unknown);
        assert_eq!(manifest["a.jpg.json"].disposition, Disposition::SkippedMetadata);
        Ok(())
    }

    #[test]
    fn folder_copy_for_review() -> Result<()> {
        let dir = tempfile::tempdir()?;
        let root = dir.path().join("card");
        fs::create_dir_all(root.join("DCIM"))?;
        fs::write(root.join("DCIM/b.jpg"), vec![1u8; 700])?;
        let mut manifest = manifest_of(inventory_folder(&root, &IngestSettings::default())?);
        let target = dir.path().join("review");
        let unit = ImportUnit::Folder { root };

        let report = reconcile(&unit, Some(&target), &ResultSummary::default(), &mut manifest, false);

        assert_eq!(report.moved, 1);
        assert_eq!(manifest["DCIM/b.jpg"].disposition, Disposition::CopiedForReview);
        assert_eq!(fs::metadata(target.join("DCIM/b.jpg"))?.len(), 700);
        Ok(())
    }

    #[test]
    fn escaping_paths_are_refused() {
        assert!(confined_join(Path::new("/x"), "../etc/passwd").is_none());
        assert!(confined_join(Path::new("/x"), "/etc/passwd").is_none());
        assert_eq!(confined_join(Path::new("/x"), "a/b"), Some(PathBuf::from("/x/a/b")));
    }

    fn any_outcome() -> impl Strategy<Value = Option<FileStatus>> {
        prop_oneof![
            Just(None),
            Just(Some(FileStatus::Uploaded)),
            Just(Some(FileStatus::ServerDuplicate)),
            Just(Some(FileStatus::LocalDuplicate)),
            Just(Some(FileStatus::ServerBetter)),
            Just(Some(FileStatus::Upgraded)),
            Just(Some(FileStatus::Error)),
        ]
    }

    proptest! {
        #[test]
        fn plans_are_terminal_and_respect_absorption(
            outcome in any_outcome(),
            is_sidecar in any::<bool>(),
            in_category in any::<bool>(),
            skip_category in any::<bool>(),
            transfer in any::<bool>(),
        ) {
            let mut entry = FileEntry::new("x/y.bin", 1);
            entry.is_metadata_sidecar = is_sidecar;
            entry.is_source_specific_category = in_category;
            let plan = plan_for(&entry, outcome, skip_category, transfer);

            if outcome.is_some_and(FileStatus::is_absorbed) {
                prop_assert_eq!(plan, Plan::Settle(Disposition::Imported));
            }
            if plan == Plan::Transfer {
                prop_assert!(transfer);
            }
            if let Plan::Settle(d) = plan {
                prop_assert!(d.is_terminal());
            }
        }
    }
}
