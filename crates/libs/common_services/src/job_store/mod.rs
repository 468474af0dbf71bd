mod error;

pub use error::JobStoreError;

use crate::utils::nice_id;
use app_state::StorageSettings;
use chrono::{DateTime, Utc};
use common_types::{JobRecord, JobStatus};
use std::fs;
use std::io::Write;
use std::path::{Path, PathBuf};
use std::time::Duration;
use tempfile::NamedTempFile;
use tracing::warn;

const RECORD_SUFFIX: &str = ".metadata.json";

/// One `<id>.metadata.json` file per job in `metadata_dir`, plus the raw tool log of
/// each job in `log_dir`.
#[derive(Debug, Clone)]
pub struct JobStore {
    metadata_dir: PathBuf,
    log_dir: PathBuf,
}

impl JobStore {
    pub fn new(metadata_dir: impl Into<PathBuf>, log_dir: impl Into<PathBuf>) -> Self {
        Self {
            metadata_dir: metadata_dir.into(),
            log_dir: log_dir.into(),
        }
    }

    #[must_use]
    pub fn from_settings(storage: &StorageSettings) -> Self {
        Self::new(&storage.metadata_dir, &storage.log_dir)
    }

    pub fn ensure_dirs(&self) -> Result<(), JobStoreError> {
        for dir in [&self.metadata_dir, &self.log_dir] {
            fs::create_dir_all(dir).map_err(|source| JobStoreError::Io {
                path: dir.clone(),
                source,
            })?;
        }
        Ok(())
    }

    #[must_use]
    pub fn record_path(&self, id: &str) -> PathBuf {
        self.metadata_dir.join(format!("{id}{RECORD_SUFFIX}"))
    }

    #[must_use]
    pub fn log_path(&self, id: &str) -> PathBuf {
        self.log_dir.join(format!("{id}.log"))
    }

    /// Makes the record's id unique within the store by appending a short random
    /// suffix when a record with the same id already exists.
    pub fn claim_id(&self, record: &mut JobRecord) {
        while self.record_path(&record.id).exists() {
            let base = record.id.split('~').next().unwrap_or_default().to_owned();
            record.id = format!("{base}~{}", nice_id(4));
        }
    }

    /// Writes the record atomically (temp file in the same folder, then rename) after
    /// refreshing its `update_time`.
    pub fn save(&self, record: &mut JobRecord, now: DateTime<Utc>) -> Result<PathBuf, JobStoreError> {
        record.touch(now);
        let path = self.record_path(&record.id);
        let json = serde_json::to_vec_pretty(record).map_err(|source| JobStoreError::Json {
            path: path.clone(),
            source,
        })?;
        let io_err = |source| JobStoreError::Io {
            path: path.clone(),
            source,
        };
        let mut temp = NamedTempFile::new_in(&self.metadata_dir).map_err(io_err)?;
        temp.write_all(&json).map_err(io_err)?;
        temp.as_file().sync_all().map_err(io_err)?;
        temp.persist(&path)?;
        Ok(path)
    }

    pub fn load(&self, path: &Path) -> Result<JobRecord, JobStoreError> {
        let bytes = fs::read(path).map_err(|source| JobStoreError::Io {
            path: path.to_path_buf(),
            source,
        })?;
        serde_json::from_slice(&bytes).map_err(|source| JobStoreError::Json {
            path: path.to_path_buf(),
            source,
        })
    }

    /// Every readable record in the store, newest first. Unreadable files are skipped.
    pub fn list(&self) -> Result<Vec<JobRecord>, JobStoreError> {
        let dir = match fs::read_dir(&self.metadata_dir) {
            Ok(dir) => dir,
            Err(e) if e.kind() == std::io::ErrorKind::NotFound => return Ok(Vec::new()),
            Err(source) => {
                return Err(JobStoreError::Io {
                    path: self.metadata_dir.clone(),
                    source,
                });
            }
        };
        let mut records: Vec<JobRecord> = dir
            .filter_map(Result::ok)
            .map(|entry| entry.path())
            .filter(|path| {
                path.file_name()
                    .is_some_and(|n| n.to_string_lossy().ends_with(RECORD_SUFFIX))
            })
            .filter_map(|path| match self.load(&path) {
                Ok(record) => Some(record),
                Err(e) => {
                    warn!("Skipping job record: {e}");
                    None
                }
            })
            .collect();
        records.sort_by(|a, b| b.start_time.cmp(&a.start_time).then_with(|| b.id.cmp(&a.id)));
        Ok(records)
    }

    fn log_modified(&self, record: &JobRecord) -> Option<DateTime<Utc>> {
        let log_path = record
            .log_path
            .as_ref()
            .map_or_else(|| self.log_path(&record.id), PathBuf::from);
        let modified = fs::metadata(log_path).ok()?.modified().ok()?;
        Some(DateTime::<Utc>::from(modified))
    }

    /// Reader-side status: a `running` record with neither a record update nor a log
    /// write within `threshold` reads as `timeout`. Nothing is written back.
    #[must_use]
    pub fn effective_status(
        &self,
        record: &JobRecord,
        now: DateTime<Utc>,
        threshold: Duration,
    ) -> JobStatus {
        record.effective_status(now, threshold, self.log_modified(record))
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use chrono::TimeDelta;
    use color_eyre::Result;
    use common_types::{FileEntry, ImportKind};

    fn store(root: &Path) -> Result<JobStore> {
        let store = JobStore::new(root.join("metadata"), root.join("metadata/logs"));
        store.ensure_dirs()?;
        Ok(store)
    }

    fn job(name: &str, now: DateTime<Utc>) -> JobRecord {
        JobRecord::new(
            ImportKind::Folder,
            "sd-card",
            name,
            [FileEntry::new("DCIM/IMG_1.JPG", 3)],
            now,
        )
    }

    #[test]
    fn save_then_load() -> Result<()> {
        let root = tempfile::tempdir()?;
        let store = store(root.path())?;
        let now = Utc::now();
        let mut record = job("card", now);
        let path = store.save(&mut record, now + TimeDelta::seconds(5))?;

        assert!(path.ends_with(format!("{}.metadata.json", record.id)));
        let loaded = store.load(&path)?;
        assert_eq!(loaded, record);
        assert_eq!(loaded.update_time, now + TimeDelta::seconds(5));
        Ok(())
    }

    #[test]
    fn colliding_ids_get_a_suffix() -> Result<()> {
        let root = tempfile::tempdir()?;
        let store = store(root.path())?;
        let now = Utc::now();
        let mut first = job("card", now);
        store.save(&mut first, now)?;

        let mut second = job("card", now);
        store.claim_id(&mut second);
        assert_ne!(first.id, second.id);
        assert!(second.id.starts_with(&first.id));
        Ok(())
    }

    #[test]
    fn list_is_newest_first_and_skips_garbage() -> Result<()> {
        let root = tempfile::tempdir()?;
        let store = store(root.path())?;
        let now = Utc::now();
        let mut old = job("old", now - TimeDelta::hours(2));
        let mut new = job("new", now);
        store.save(&mut old, now)?;
        store.save(&mut new, now)?;
        fs::write(store.record_path("broken"), b"{not json")?;

        let ids: Vec<String> = store.list()?.into_iter().map(|r| r.source_name).collect();
        assert_eq!(ids, ["new", "old"]);
        Ok(())
    }

    #[test]
    fn list_of_missing_dir_is_empty() -> Result<()> {
        let root = tempfile::tempdir()?;
        let store = JobStore::new(root.path().join("nope"), root.path().join("nope/logs"));
        assert!(store.list()?.is_empty());
        Ok(())
    }

    #[test]
    fn recent_log_write_keeps_job_alive() -> Result<()> {
        let root = tempfile::tempdir()?;
        let store = store(root.path())?;
        let start = Utc::now() - TimeDelta::hours(1);
        let mut record = job("card", start);
        store.save(&mut record, start)?;
        let threshold = Duration::from_secs(600);

        assert_eq!(store.effective_status(&record, Utc::now(), threshold), JobStatus::Timeout);

        fs::write(store.log_path(&record.id), b"{}\n")?;
        assert_eq!(store.effective_status(&record, Utc::now(), threshold), JobStatus::Running);
        Ok(())
    }
}
