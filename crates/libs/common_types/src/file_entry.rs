use crate::FileStatus;
use serde::{Deserialize, Serialize};
use std::collections::BTreeSet;
use std::fmt;

/// What happened to a file of the import unit.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(rename_all = "kebab-case")]
pub enum Disposition {
    Pending,
    Imported,
    /// Live state while the tool is running; reconciliation settles it to `Imported`.
    SkippedDuplicate,
    SkippedMetadata,
    Extracted,
    ExtractFailed,
    CopiedForReview,
    CopyFailed,
    Error,
    Unknown,
}

impl Disposition {
    pub const ALL: [Self; 10] = [
        Self::Pending,
        Self::Imported,
        Self::SkippedDuplicate,
        Self::SkippedMetadata,
        Self::Extracted,
        Self::ExtractFailed,
        Self::CopiedForReview,
        Self::CopyFailed,
        Self::Error,
        Self::Unknown,
    ];

    #[must_use]
    pub const fn is_terminal(self) -> bool {
        !matches!(self, Self::Pending)
    }

    #[must_use]
    pub const fn as_str(self) -> &'static str {
        match self {
            Self::Pending => "pending",
            Self::Imported => "imported",
            Self::SkippedDuplicate => "skipped-duplicate",
            Self::SkippedMetadata => "skipped-metadata",
            Self::Extracted => "extracted",
            Self::ExtractFailed => "extract-failed",
            Self::CopiedForReview => "copied-for-review",
            Self::CopyFailed => "copy-failed",
            Self::Error => "error",
            Self::Unknown => "unknown",
        }
    }
}

impl fmt::Display for Disposition {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// One file inside the import unit, keyed by `path` in the job manifest.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct FileEntry {
    /// Relative POSIX path inside the archive or folder.
    pub path: String,
    pub filename: String,
    pub size_bytes: u64,
    pub is_media: bool,
    pub is_metadata_sidecar: bool,
    /// Belongs to the recognized photo-library export subtree.
    pub is_source_specific_category: bool,
    /// Archive part the file was read from, for multi-part imports.
    pub source_archive: Option<String>,
    pub disposition: Disposition,
    pub import_status: Option<FileStatus>,
    pub import_reason: Option<String>,
    #[serde(default)]
    pub albums: BTreeSet<String>,
    #[serde(default)]
    pub tags: BTreeSet<String>,
}

impl FileEntry {
    #[must_use]
    pub fn new(path: impl Into<String>, size_bytes: u64) -> Self {
        let path = path.into();
        let filename = file_name_of(&path).to_owned();
        Self {
            path,
            filename,
            size_bytes,
            is_media: false,
            is_metadata_sidecar: false,
            is_source_specific_category: false,
            source_archive: None,
            disposition: Disposition::Pending,
            import_status: None,
            import_reason: None,
            albums: BTreeSet::new(),
            tags: BTreeSet::new(),
        }
    }

    /// Moves the entry to `next`. A terminal disposition never goes back to `Pending`.
    pub fn set_disposition(&mut self, next: Disposition) -> bool {
        if self.disposition.is_terminal() && !next.is_terminal() {
            return false;
        }
        let changed = self.disposition != next;
        self.disposition = next;
        changed
    }

    /// Records an outcome reported by the tool. Once absorbed, a later error does not
    /// downgrade the entry, so the manifest keeps the best outcome seen across attempts.
    pub fn record_outcome(&mut self, status: FileStatus, reason: Option<String>) -> bool {
        if status == FileStatus::Error && self.import_status.is_some_and(FileStatus::is_absorbed)
        {
            return false;
        }
        let reason = reason.or_else(|| status.default_reason().map(str::to_owned));
        let changed = self.import_status != Some(status) || self.import_reason != reason;
        self.import_status = Some(status);
        self.import_reason = reason;

        let live = match status {
            FileStatus::Uploaded | FileStatus::Upgraded => Disposition::Imported,
            FileStatus::ServerDuplicate | FileStatus::LocalDuplicate | FileStatus::ServerBetter => {
                Disposition::SkippedDuplicate
            }
            FileStatus::Error => Disposition::Error,
        };
        self.set_disposition(live) || changed
    }

    pub fn add_album(&mut self, album: &str) -> bool {
        !album.is_empty() && self.albums.insert(album.to_owned())
    }

    pub fn add_tag(&mut self, tag: &str) -> bool {
        !tag.is_empty() && self.tags.insert(tag.to_owned())
    }

    #[must_use]
    pub fn was_absorbed(&self) -> bool {
        self.import_status.is_some_and(FileStatus::is_absorbed)
    }
}

/// Last path segment of a POSIX-style path.
#[must_use]
pub fn file_name_of(path: &str) -> &str {
    path.rsplit('/').next().unwrap_or(path)
}

/// True when a path reported by the upload tool names the manifest entry at
/// `manifest_path`: the same path, or the same path under some prefix (an absolute
/// folder root, an archive top folder).
#[must_use]
pub fn refers_to(reported: &str, manifest_path: &str) -> bool {
    reported
        .strip_suffix(manifest_path)
        .is_some_and(|head| head.is_empty() || head.ends_with('/'))
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn reported_paths_match_on_segment_boundaries() {
        assert!(refers_to("Takeout/Google Photos/a.jpg", "Takeout/Google Photos/a.jpg"));
        assert!(refers_to("/media/card/DCIM/a.jpg", "DCIM/a.jpg"));
        assert!(!refers_to("/media/card/DCIM/xa.jpg", "a.jpg"));
        assert!(!refers_to("Takeout/Google Photos/2019/IMG_1.jpg", "Takeout/Drive/IMG_1.jpg"));
        assert!(!refers_to("IMG_1.jpg", "Takeout/Drive/IMG_1.jpg"));
    }
    use proptest::prelude::*;

    fn any_status() -> impl Strategy<Value = FileStatus> {
        prop_oneof![
            Just(FileStatus::Uploaded),
            Just(FileStatus::ServerDuplicate),
            Just(FileStatus::LocalDuplicate),
            Just(FileStatus::ServerBetter),
            Just(FileStatus::Upgraded),
            Just(FileStatus::Error),
        ]
    }

    #[test]
    fn filename_derived_from_path() {
        let entry = FileEntry::new("Takeout/Google Photos/2021/IMG_1.jpg", 10);
        assert_eq!(entry.filename, "IMG_1.jpg");
        assert_eq!(entry.disposition, Disposition::Pending);
    }

    #[test]
    fn duplicate_gets_default_reason() {
        let mut entry = FileEntry::new("a.jpg", 1);
        assert!(entry.record_outcome(FileStatus::ServerDuplicate, None));
        assert_eq!(entry.import_reason.as_deref(), Some("Already exists on server"));
        assert_eq!(entry.disposition, Disposition::SkippedDuplicate);
    }

    #[test]
    fn error_after_upload_is_ignored() {
        let mut entry = FileEntry::new("a.jpg", 1);
        entry.record_outcome(FileStatus::Uploaded, None);
        assert!(!entry.record_outcome(FileStatus::Error, Some("boom".into())));
        assert_eq!(entry.import_status, Some(FileStatus::Uploaded));
        assert_eq!(entry.disposition, Disposition::Imported);
    }

    #[test]
    fn upload_after_error_recovers() {
        let mut entry = FileEntry::new("a.jpg", 1);
        entry.record_outcome(FileStatus::Error, Some("timeout".into()));
        assert!(entry.record_outcome(FileStatus::Uploaded, None));
        assert_eq!(entry.disposition, Disposition::Imported);
        assert_eq!(entry.import_reason, None);
    }

    #[test]
    fn albums_are_deduplicated() {
        let mut entry = FileEntry::new("a.jpg", 1);
        assert!(entry.add_album("Holiday"));
        assert!(!entry.add_album("Holiday"));
        assert!(!entry.add_album(""));
        assert_eq!(entry.albums.len(), 1);
    }

    proptest! {
        #[test]
        fn never_regresses_to_pending(outcomes in proptest::collection::vec(any_status(), 1..20)) {
            let mut entry = FileEntry::new("x/y.jpg", 3);
            let mut absorbed_once = false;
            for status in outcomes {
                entry.record_outcome(status, None);
                entry.set_disposition(Disposition::Pending);
                prop_assert!(entry.disposition.is_terminal());
                absorbed_once |= status.is_absorbed();
                if absorbed_once {
                    prop_assert!(entry.was_absorbed());
                }
            }
        }
    }
}
