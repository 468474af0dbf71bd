use crate::{Disposition, FileEntry, LogEvent, ResultSummary, file_name_of, refers_to};
use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use serde_json::Value;
use std::collections::BTreeMap;
use std::fmt;
use std::time::Duration;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum JobStatus {
    Running,
    Completed,
    CompletedWithErrors,
    Failed,
    Errored,
    /// Never written by the importer, only derived by readers for stale `Running` records.
    Timeout,
}

impl JobStatus {
    #[must_use]
    pub const fn is_terminal(self) -> bool {
        !matches!(self, Self::Running | Self::Timeout)
    }

    #[must_use]
    pub const fn as_str(self) -> &'static str {
        match self {
            Self::Running => "running",
            Self::Completed => "completed",
            Self::CompletedWithErrors => "completed_with_errors",
            Self::Failed => "failed",
            Self::Errored => "errored",
            Self::Timeout => "timeout",
        }
    }
}

impl fmt::Display for JobStatus {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum ImportKind {
    Archive,
    Folder,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ArchivePart {
    pub name: String,
    pub size_bytes: u64,
}

/// Persistent record of one import job. Created as `Running` before the upload tool
/// starts and finalized exactly once.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct JobRecord {
    pub id: String,
    pub status: JobStatus,
    pub import_kind: ImportKind,
    pub source_kind: String,
    pub source_name: String,
    pub source_path: Option<String>,
    #[serde(default)]
    pub archive_parts: Vec<ArchivePart>,
    pub manifest: BTreeMap<String, FileEntry>,
    pub total_size_bytes: u64,
    pub file_count: usize,
    pub start_time: DateTime<Utc>,
    pub update_time: DateTime<Utc>,
    pub end_time: Option<DateTime<Utc>>,
    pub duration_seconds: Option<f64>,
    pub command_display: Option<String>,
    pub log_path: Option<String>,
    #[serde(default)]
    pub attempts: u32,
    pub exit_code: Option<i32>,
    pub result_summary: Option<ResultSummary>,
    #[serde(default)]
    pub disposition_counts: BTreeMap<Disposition, usize>,
    #[serde(default)]
    pub imported_count: usize,
    #[serde(default)]
    pub moved_count: usize,
    #[serde(default)]
    pub move_failed_count: usize,
    pub extract_path: Option<String>,
    pub error_details: Option<String>,
    /// Caller-supplied extension fields such as the folder tag or device label.
    #[serde(flatten)]
    pub extra_fields: BTreeMap<String, Value>,
}

impl JobRecord {
    pub fn new(
        import_kind: ImportKind,
        source_kind: impl Into<String>,
        source_name: impl Into<String>,
        entries: impl IntoIterator<Item = FileEntry>,
        now: DateTime<Utc>,
    ) -> Self {
        let source_name = source_name.into();
        let manifest: BTreeMap<String, FileEntry> = entries
            .into_iter()
            .map(|entry| (entry.path.clone(), entry))
            .collect();
        let total_size_bytes = manifest.values().map(|e| e.size_bytes).sum();
        Self {
            id: format!("{source_name}.{}", now.format("%Y%m%d_%H%M%S")),
            status: JobStatus::Running,
            import_kind,
            source_kind: source_kind.into(),
            source_name,
            source_path: None,
            archive_parts: Vec::new(),
            file_count: manifest.len(),
            manifest,
            total_size_bytes,
            start_time: now,
            update_time: now,
            end_time: None,
            duration_seconds: None,
            command_display: None,
            log_path: None,
            attempts: 0,
            exit_code: None,
            result_summary: None,
            disposition_counts: BTreeMap::new(),
            imported_count: 0,
            moved_count: 0,
            move_failed_count: 0,
            extract_path: None,
            error_details: None,
            extra_fields: BTreeMap::new(),
        }
    }

    pub fn touch(&mut self, now: DateTime<Utc>) {
        self.update_time = now;
    }

    /// Finds the manifest entry an event refers to: exact path first, then a manifest key
    /// that the reported path ends with, then a unique basename.
    pub fn entry_mut_for_event(&mut self, path: &str, filename: &str) -> Option<&mut FileEntry> {
        let key = self.resolve_key(path, filename)?;
        self.manifest.get_mut(&key)
    }

    fn resolve_key(&self, path: &str, filename: &str) -> Option<String> {
        if self.manifest.contains_key(path) {
            return Some(path.to_owned());
        }
        let suffix_match = self
            .manifest
            .keys()
            .filter(|key| refers_to(path, key))
            .max_by_key(|key| key.len());
        if let Some(key) = suffix_match {
            return Some(key.clone());
        }
        let filename = if filename.is_empty() {
            file_name_of(path)
        } else {
            filename
        };
        let mut candidates = self.manifest.values().filter(|e| e.filename == filename);
        match (candidates.next(), candidates.next()) {
            (Some(entry), None) => Some(entry.path.clone()),
            _ => None,
        }
    }

    /// Applies a parsed log event to the manifest. Returns true when an entry changed.
    pub fn apply_event(&mut self, event: &LogEvent) -> bool {
        match event {
            LogEvent::FileOutcome {
                path,
                filename,
                status,
                reason,
            } => self
                .entry_mut_for_event(path, filename)
                .is_some_and(|entry| entry.record_outcome(*status, reason.clone())),
            LogEvent::AlbumAssociation {
                path,
                filename,
                album,
            } => self
                .entry_mut_for_event(path, filename)
                .is_some_and(|entry| entry.add_album(album)),
            LogEvent::TagAssociation {
                path,
                filename,
                tag,
            } => self
                .entry_mut_for_event(path, filename)
                .is_some_and(|entry| entry.add_tag(tag)),
            _ => false,
        }
    }

    /// Number of entries the upload tool took responsibility for, across all attempts.
    #[must_use]
    pub fn absorbed_count(&self) -> usize {
        self.manifest.values().filter(|e| e.was_absorbed()).count()
    }

    pub fn tally_dispositions(&mut self) {
        let mut counts = BTreeMap::new();
        for entry in self.manifest.values() {
            *counts.entry(entry.disposition).or_insert(0) += 1;
        }
        self.imported_count = counts.get(&Disposition::Imported).copied().unwrap_or(0);
        self.disposition_counts = counts;
    }

    /// Moves the record to its terminal status. Only the first call has any effect.
    pub fn finalize(&mut self, status: JobStatus, now: DateTime<Utc>) -> bool {
        if self.status.is_terminal() || !status.is_terminal() {
            return false;
        }
        self.status = status;
        self.end_time = Some(now);
        self.update_time = now;
        #[allow(clippy::cast_precision_loss)]
        let seconds = (now - self.start_time).num_milliseconds() as f64 / 1000.0;
        self.duration_seconds = Some(seconds);
        self.tally_dispositions();
        true
    }

    /// Status as a reader should present it: a `Running` record whose last sign of life
    /// (record update or log write) is older than `threshold` shows as `Timeout`.
    #[must_use]
    pub fn effective_status(
        &self,
        now: DateTime<Utc>,
        threshold: Duration,
        log_modified: Option<DateTime<Utc>>,
    ) -> JobStatus {
        if self.status != JobStatus::Running {
            return self.status;
        }
        let last_seen = log_modified.map_or(self.update_time, |m| m.max(self.update_time));
        let stale = (now - last_seen)
            .to_std()
            .is_ok_and(|elapsed| elapsed > threshold);
        if stale {
            JobStatus::Timeout
        } else {
            JobStatus::Running
        }
    }
}
