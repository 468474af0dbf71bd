use crate::{FileStatus, LogEvent, MediaKind, file_name_of, refers_to};
use chrono::DateTime;
use serde::{Deserialize, Serialize};
use std::collections::{BTreeMap, BTreeSet};

/// Outcome of one filename as reported during a single tool invocation.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct FileResult {
    /// Path as the tool reported it, without any archive prefix.
    #[serde(default)]
    pub path: Option<String>,
    pub status: Option<FileStatus>,
    pub reason: Option<String>,
    #[serde(default)]
    pub albums: BTreeSet<String>,
    #[serde(default)]
    pub tags: BTreeSet<String>,
}

/// Counters accumulated over one tool invocation.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct ResultSummary {
    pub uploaded: u64,
    pub server_duplicate: u64,
    pub local_duplicate: u64,
    pub server_better: u64,
    pub upgraded: u64,
    pub errors: u64,
    pub albums_created: u64,
    pub albums_updated: u64,
    pub tagged: u64,
    pub stacked: u64,
    pub discovered_images: u64,
    pub discovered_videos: u64,
    pub albums: BTreeSet<String>,
    pub tags: BTreeSet<String>,
    pub start_time: Option<String>,
    pub end_time: Option<String>,
    pub duration_seconds: Option<f64>,
    pub tool_version: Option<String>,
    pub generic_errors: Vec<String>,
    pub files: BTreeMap<String, FileResult>,
}

impl ResultSummary {
    pub fn apply(&mut self, event: &LogEvent) {
        match event {
            LogEvent::FileOutcome {
                path,
                filename,
                status,
                reason,
            } => {
                let result = self.files.entry(filename.clone()).or_default();
                result.path = Some(path.clone());
                result.status = Some(*status);
                result.reason.clone_from(reason);
                *self.counter_mut(*status) += 1;
            }
            LogEvent::AlbumAssociation {
                filename, album, ..
            } => {
                if let Some(result) = self.files.get_mut(filename) {
                    result.albums.insert(album.clone());
                }
                self.albums_updated += 1;
                self.albums.insert(album.clone());
            }
            LogEvent::TagAssociation { filename, tag, .. } => {
                if let Some(result) = self.files.get_mut(filename) {
                    result.tags.insert(tag.clone());
                }
                self.tagged += 1;
                self.tags.insert(tag.clone());
            }
            LogEvent::AlbumCreated { album } => {
                self.albums_created += 1;
                self.albums.insert(album.clone());
            }
            LogEvent::AlbumDiscovered { album } => {
                self.albums.insert(album.clone());
            }
            LogEvent::Discovery { media_kind } => match media_kind {
                MediaKind::Image => self.discovered_images += 1,
                MediaKind::Video => self.discovered_videos += 1,
            },
            LogEvent::Stacked => self.stacked += 1,
            LogEvent::ToolInfo { version } => self.tool_version = Some(version.clone()),
            LogEvent::GenericError { message } => self.generic_errors.push(message.clone()),
        }
    }

    /// Tracks the first and last timestamp seen in the tool's log stream.
    pub fn observe_timestamp(&mut self, time: &str) {
        if self.start_time.is_none() {
            self.start_time = Some(time.to_owned());
        }
        self.end_time = Some(time.to_owned());
    }

    /// Derives `duration_seconds` from the observed log timestamps.
    pub fn finish(&mut self) {
        let (Some(start), Some(end)) = (&self.start_time, &self.end_time) else {
            return;
        };
        if let (Ok(start), Ok(end)) = (
            DateTime::parse_from_rfc3339(start),
            DateTime::parse_from_rfc3339(end),
        ) {
            #[allow(clippy::cast_precision_loss)]
            let millis = (end - start).num_milliseconds() as f64;
            self.duration_seconds = Some(millis / 1000.0);
        }
    }

    #[must_use]
    pub fn outcome_for(&self, filename: &str) -> Option<FileStatus> {
        self.files.get(filename).and_then(|r| r.status)
    }

    /// The result recorded under the basename of `manifest_path`, but only when the
    /// tool reported it for that very file and not for a namesake elsewhere.
    #[must_use]
    pub fn result_for_path(&self, manifest_path: &str) -> Option<&FileResult> {
        self.files
            .get(file_name_of(manifest_path))
            .filter(|r| r.path.as_deref().is_some_and(|p| refers_to(p, manifest_path)))
    }

    #[must_use]
    pub const fn duplicates(&self) -> u64 {
        self.server_duplicate + self.local_duplicate + self.server_better
    }

    #[must_use]
    pub const fn has_errors(&self) -> bool {
        self.errors > 0
    }

    #[must_use]
    pub const fn absorbed(&self) -> u64 {
        self.uploaded + self.upgraded + self.duplicates()
    }

    /// One-line human summary, e.g. `uploaded=2, duplicates=1, errors=0`.
    /// Duplicates here are exact duplicates only, server or local.
    #[must_use]
    pub fn summary_line(&self) -> String {
        format!(
            "uploaded={}, duplicates={}, errors={}",
            self.uploaded,
            self.server_duplicate + self.local_duplicate,
            self.errors
        )
    }

    fn counter_mut(&mut self, status: FileStatus) -> &mut u64 {
        match status {
            FileStatus::Uploaded => &mut self.uploaded,
            FileStatus::ServerDuplicate => &mut self.server_duplicate,
            FileStatus::LocalDuplicate => &mut self.local_duplicate,
            FileStatus::ServerBetter => &mut self.server_better,
            FileStatus::Upgraded => &mut self.upgraded,
            FileStatus::Error => &mut self.errors,
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn outcome(filename: &str, status: FileStatus) -> LogEvent {
        LogEvent::FileOutcome {
            path: format!("dir/{filename}"),
            filename: filename.to_owned(),
            status,
            reason: None,
        }
    }

    #[test]
    fn counts_outcomes_and_associations() {
        let mut summary = ResultSummary::default();
        summary.apply(&outcome("a.jpg", FileStatus::Uploaded));
        summary.apply(&outcome("b.jpg", FileStatus::ServerDuplicate));
        summary.apply(&LogEvent::AlbumAssociation {
            path: "dir/a.jpg".into(),
            filename: "a.jpg".into(),
            album: "Trip".into(),
        });
        summary.apply(&LogEvent::TagAssociation {
            path: "dir/unknown.jpg".into(),
            filename: "unknown.jpg".into(),
            tag: "PHONE-IMPORT".into(),
        });
        summary.apply(&LogEvent::Discovery {
            media_kind: MediaKind::Video,
        });

        assert_eq!(summary.uploaded, 1);
        assert_eq!(summary.duplicates(), 1);
        assert_eq!(summary.albums_updated, 1);
        assert_eq!(summary.tagged, 1);
        assert_eq!(summary.discovered_videos, 1);
        assert!(summary.files["a.jpg"].albums.contains("Trip"));
        assert!(!summary.files.contains_key("unknown.jpg"));
        assert_eq!(summary.outcome_for("b.jpg"), Some(FileStatus::ServerDuplicate));
        assert_eq!(summary.summary_line(), "uploaded=1, duplicates=1, errors=0");
    }

    #[test]
    fn path_lookup_ignores_namesakes() {
        let mut summary = ResultSummary::default();
        summary.apply(&LogEvent::FileOutcome {
            path: "Takeout/Google Photos/2019/IMG_1.jpg".into(),
            filename: "IMG_1.jpg".into(),
            status: FileStatus::Uploaded,
            reason: None,
        });
        let found = summary.result_for_path("Takeout/Google Photos/2019/IMG_1.jpg");
        assert_eq!(found.and_then(|r| r.status), Some(FileStatus::Uploaded));
        assert!(summary.result_for_path("Takeout/Drive/IMG_1.jpg").is_none());
        assert_eq!(summary.outcome_for("IMG_1.jpg"), Some(FileStatus::Uploaded));
    }

    #[test]
    fn later_outcome_overrides_earlier_one() {
        let mut summary = ResultSummary::default();
        summary.apply(&outcome("a.jpg", FileStatus::Error));
        summary.apply(&outcome("a.jpg", FileStatus::Uploaded));
        assert_eq!(summary.outcome_for("a.jpg"), Some(FileStatus::Uploaded));
        assert_eq!(summary.errors, 1);
        assert!(summary.has_errors());
    }

    #[test]
    fn duration_from_log_timestamps() {
        let mut summary = ResultSummary::default();
        summary.observe_timestamp("2024-05-01T10:00:00Z");
        summary.observe_timestamp("2024-05-01T10:00:05.500Z");
        summary.finish();
        assert_eq!(summary.start_time.as_deref(), Some("2024-05-01T10:00:00Z"));
        assert_eq!(summary.duration_seconds, Some(5.5));
    }

    #[test]
    fn unparseable_timestamps_leave_duration_empty() {
        let mut summary = ResultSummary::default();
        summary.observe_timestamp("yesterday");
        summary.finish();
        assert_eq!(summary.duration_seconds, None);
    }
}
