use crate::alert;
use crate::catalog;
use crate::job_store::JobStore;
use crate::reconcile::{ImportUnit, ReconcileReport, reconcile};
use crate::runner::{ProcessRunner, RunObserver, RunOutcome, UploadCommand, UploadMode};
use app_state::{AppSettings, format_size, to_posix_string};
use bon::bon;
use chrono::{Local, Utc};
use color_eyre::Result;
use color_eyre::eyre::{WrapErr, eyre};
use common_types::{ArchivePart, FileEntry, ImportKind, JobRecord, JobStatus, LogEvent};
use regex::Regex;
use serde_json::Value;
use std::path::{Path, PathBuf};
use std::sync::LazyLock;
use std::time::{Duration, Instant};
use tokio::sync::{Mutex, watch};
use tokio::task::{self, JoinHandle};
use tracing::{debug, error, info, warn};

/// Minimum spacing between manifest saves while the tool is running.
const SAVE_INTERVAL: Duration = Duration::from_millis(500);

static ARCHIVE_PART_NAME: LazyLock<Option<Regex>> =
    LazyLock::new(|| Regex::new(r"^(.+)-\d{3}\.zip$").ok());

/// Export prefix of a multi-part archive, e.g. `takeout-20240427T195310Z` for
/// `takeout-20240427T195310Z-001.zip`. Falls back to the file stem.
#[must_use]
pub fn archive_source_name(first_part: &Path) -> String {
    let name = first_part
        .file_name()
        .map(|n| n.to_string_lossy().into_owned())
        .unwrap_or_default();
    if let Some(re) = ARCHIVE_PART_NAME.as_ref()
        && let Some(caps) = re.captures(&name)
    {
        return caps[1].to_owned();
    }
    first_part
        .file_stem()
        .map(|s| s.to_string_lossy().into_owned())
        .unwrap_or(name)
}

/// `<prefix>/<label>/<date>` or `<prefix>/<date>`.
#[must_use]
pub fn folder_tag(prefix: &str, device_label: Option<&str>, date: &str) -> String {
    match device_label.filter(|l| !l.is_empty()) {
        Some(label) => format!("{prefix}/{label}/{date}"),
        None => format!("{prefix}/{date}"),
    }
}

/// Final job status from the last attempt's exit code, errors and log completeness, and
/// whether the tool absorbed anything across all attempts. An attempt whose log was not
/// read to the end may hide errors, so it never counts as a clean success.
#[must_use]
pub const fn final_status(
    exit_code: i32,
    last_attempt_errors: u64,
    log_complete: bool,
    absorbed_any: bool,
) -> JobStatus {
    if exit_code == 0 && last_attempt_errors == 0 && log_complete {
        JobStatus::Completed
    } else if exit_code == 0 || absorbed_any {
        JobStatus::CompletedWithErrors
    } else {
        JobStatus::Failed
    }
}

/// Sources may only go once every file is accounted for: a clean status, no tool
/// errors in the last attempt, and nothing that failed to move into the review folder.
#[must_use]
pub fn sources_safe_to_delete(record: &JobRecord, last_attempt_errors: u64) -> bool {
    record.status == JobStatus::Completed
        && last_attempt_errors == 0
        && record.move_failed_count == 0
}

async fn save_blocking(store: &JobStore, mut record: JobRecord) {
    let store = store.clone();
    let id = record.id.clone();
    match task::spawn_blocking(move || store.save(&mut record, Utc::now())).await {
        Ok(Ok(_)) => {}
        Ok(Err(e)) => {
            alert!("Could not persist job record {id}: {e}");
        }
        Err(e) => {
            alert!("Could not persist job record {id}: {e}");
        }
    }
}

/// Saves record snapshots on the blocking pool. Snapshots submitted while a save is in
/// flight collapse into the newest one.
struct RecordWriter {
    tx: watch::Sender<Option<JobRecord>>,
    task: JoinHandle<()>,
}

impl RecordWriter {
    fn spawn(store: JobStore) -> Self {
        let (tx, mut rx) = watch::channel(None::<JobRecord>);
        let task = tokio::spawn(async move {
            while rx.changed().await.is_ok() {
                let Some(snapshot) = rx.borrow_and_update().clone() else {
                    continue;
                };
                save_blocking(&store, snapshot).await;
            }
        });
        Self { tx, task }
    }

    fn submit(&self, record: &JobRecord) {
        self.tx.send_replace(Some(record.clone()));
    }

    /// Returns once the last submitted snapshot is on disk.
    async fn close(self) {
        drop(self.tx);
        if let Err(e) = self.task.await {
            warn!("Record writer failed: {e}");
        }
    }
}

/// Writes tool events into the job's manifest as they arrive. Changes are saved at
/// most every [`SAVE_INTERVAL`] and at every attempt, so a crash still leaves a
/// recent record without a full rewrite per log line.
struct JobObserver<'a> {
    record: &'a mut JobRecord,
    writer: &'a RecordWriter,
    dirty: bool,
    last_save: Instant,
}

impl<'a> JobObserver<'a> {
    fn new(record: &'a mut JobRecord, writer: &'a RecordWriter) -> Self {
        Self {
            record,
            writer,
            dirty: false,
            last_save: Instant::now(),
        }
    }

    fn flush(&mut self) {
        self.writer.submit(self.record);
        self.dirty = false;
        self.last_save = Instant::now();
    }

    fn finish(&mut self) {
        if self.dirty {
            self.flush();
        }
    }
}

impl RunObserver for JobObserver<'_> {
    fn on_attempt(&mut self, attempt: u32) -> Result<()> {
        self.record.attempts = attempt;
        self.flush();
        Ok(())
    }

    fn on_event(&mut self, event: &LogEvent) -> Result<()> {
        if let LogEvent::FileOutcome {
            path,
            status,
            reason,
            ..
        } = event
        {
            debug!("{}: {path} {}", status.as_str(), reason.as_deref().unwrap_or_default());
        }
        if event.touches_manifest() && self.record.apply_event(event) {
            self.dirty = true;
        }
        if self.dirty && self.last_save.elapsed() >= SAVE_INTERVAL {
            self.flush();
        }
        Ok(())
    }
}

/// What a job hands to the upload tool and where leftovers go.
struct JobPlan {
    unit: ImportUnit,
    mode: UploadMode,
    extract_target: Option<PathBuf>,
    skip_recognized_category: bool,
    delete_on_success: bool,
}

/// Drives import jobs end to end. Jobs run one at a time.
pub struct ImportOrchestrator {
    settings: AppSettings,
    store: JobStore,
    runner: ProcessRunner,
    job_lock: Mutex<()>,
}

#[bon]
impl ImportOrchestrator {
    #[must_use]
    pub fn new(settings: AppSettings) -> Self {
        let store = JobStore::from_settings(&settings.storage);
        let runner = ProcessRunner::new(&settings.uploader);
        Self {
            settings,
            store,
            runner,
            job_lock: Mutex::new(()),
        }
    }

    #[must_use]
    pub const fn store(&self) -> &JobStore {
        &self.store
    }

    #[must_use]
    pub const fn settings(&self) -> &AppSettings {
        &self.settings
    }

    pub fn log_config(&self) {
        let s = &self.settings;
        info!("Upload server: {}", s.uploader.server_url);
        info!("Metadata dir: {}", s.storage.metadata_dir.display());
        info!("Extract dir: {}", s.storage.extract_dir.display());
        info!(
            "Max attempts: {}, retry delay: {:?}",
            s.uploader.max_attempts, s.uploader.retry_delay
        );
        info!("Copy failed files: {}", s.ingest.copy_failed_files);
    }

    /// Imports all parts of one archive export. Sources are deleted only when the job
    /// completes without a single error and `delete_on_success` is set.
    pub async fn import_archive(
        &self,
        parts: &[PathBuf],
        source_name: &str,
        delete_on_success: bool,
    ) -> Result<JobRecord> {
        let _guard = self.job_lock.lock().await;
        self.store.ensure_dirs()?;
        let now = Utc::now();
        let first = parts.first().ok_or_else(|| eyre!("No archive parts given"))?;
        let import_dir = first.parent().map(Path::to_path_buf).unwrap_or_default();

        let ingest = self.settings.ingest.clone();
        let owned_parts = parts.to_vec();
        let inventory =
            task::spawn_blocking(move || catalog::inventory_archives(&owned_parts, &ingest))
                .await?;
        let (entries, inventory_error) = split_inventory(inventory);

        let mut record = JobRecord::new(ImportKind::Archive, "google-photos", source_name, entries, now);
        record.source_path = Some(to_posix_string(&import_dir));
        record.archive_parts = parts
            .iter()
            .map(|p| ArchivePart {
                name: p.file_name().map(|n| n.to_string_lossy().into_owned()).unwrap_or_default(),
                size_bytes: std::fs::metadata(p).map(|m| m.len()).unwrap_or(0),
            })
            .collect();
        record.total_size_bytes = record.archive_parts.iter().map(|p| p.size_bytes).sum();
        info!(
            "Importing {source_name}: {} part(s), {}",
            parts.len(),
            format_size(record.total_size_bytes)
        );

        let extract_target = self
            .settings
            .storage
            .extract_dir
            .join(format!("{source_name}-extracted"));
        let plan = JobPlan {
            unit: ImportUnit::Archive {
                parts: parts.to_vec(),
            },
            mode: UploadMode::Archive {
                import_dir,
                export_prefix: source_name.to_owned(),
            },
            extract_target: Some(extract_target),
            skip_recognized_category: true,
            delete_on_success,
        };
        Ok(self.drive(record, plan, inventory_error).await)
    }

    /// Imports a folder tree (memory card, phone dump, ...), tagging the session.
    #[builder]
    pub async fn import_folder(
        &self,
        #[builder(start_fn)] path: &Path,
        #[builder(into, default = "folder".to_owned())] source_kind: String,
        #[builder(into)] tag_prefix: Option<String>,
        #[builder(into)] device_label: Option<String>,
        copy_failed_files: Option<bool>,
    ) -> Result<JobRecord> {
        let _guard = self.job_lock.lock().await;
        self.store.ensure_dirs()?;
        if !path.is_dir() {
            return Err(eyre!("Folder does not exist: {}", path.display()));
        }
        let now = Utc::now();
        let folder_name = path
            .file_name()
            .map(|n| n.to_string_lossy().into_owned())
            .unwrap_or_else(|| "folder".to_owned());
        let timestamp = now.format("%Y%m%d_%H%M%S");
        let source_name = format!("{folder_name}_{timestamp}");
        let tag_prefix =
            tag_prefix.unwrap_or_else(|| format!("{}-IMPORT", source_kind.to_uppercase()));
        let tag = folder_tag(
            &tag_prefix,
            device_label.as_deref(),
            &Local::now().format("%Y-%m-%d").to_string(),
        );

        let ingest = self.settings.ingest.clone();
        let root = path.to_path_buf();
        let inventory =
            task::spawn_blocking(move || catalog::inventory_folder(&root, &ingest)).await?;
        let (entries, inventory_error) = split_inventory(inventory);

        let mut record = JobRecord::new(ImportKind::Folder, &source_kind, &source_name, entries, now);
        record.source_path = Some(to_posix_string(path));
        record.extra_fields.insert("tag".into(), Value::String(tag.clone()));
        record.extra_fields.insert(
            "device_label".into(),
            device_label.map_or(Value::Null, Value::String),
        );
        info!(
            "Importing folder {} ({source_kind}): {} files, {}, tag {tag}",
            path.display(),
            record.file_count,
            format_size(record.total_size_bytes)
        );

        let copy_failed = copy_failed_files.unwrap_or(self.settings.ingest.copy_failed_files);
        let extract_target = copy_failed.then(|| {
            self.settings
                .storage
                .extract_dir
                .join(format!("{folder_name}-{timestamp}-failed"))
        });
        let plan = JobPlan {
            unit: ImportUnit::Folder {
                root: path.to_path_buf(),
            },
            mode: UploadMode::Folder {
                path: path.to_path_buf(),
                tag,
            },
            extract_target,
            skip_recognized_category: false,
            delete_on_success: false,
        };
        Ok(self.drive(record, plan, inventory_error).await)
    }
}

fn split_inventory(
    inventory: Result<Vec<FileEntry>, catalog::CatalogError>,
) -> (Vec<FileEntry>, Option<color_eyre::Report>) {
    match inventory {
        Ok(entries) => (entries, None),
        Err(e) => (
            Vec::new(),
            Some(color_eyre::Report::new(e).wrap_err("Cannot inventory import unit")),
        ),
    }
}

impl ImportOrchestrator {
    async fn persist(&self, record: &mut JobRecord) {
        record.touch(Utc::now());
        save_blocking(&self.store, record.clone()).await;
    }

    /// Records a job-level failure and finalizes the job as `errored`.
    async fn fail(&self, mut record: JobRecord, err: &color_eyre::Report) -> JobRecord {
        error!("Job {} errored: {err:#}", record.id);
        record.error_details = Some(format!("{err:#}"));
        record.finalize(JobStatus::Errored, Utc::now());
        self.persist(&mut record).await;
        record
    }

    async fn drive(
        &self,
        mut record: JobRecord,
        plan: JobPlan,
        inventory_error: Option<color_eyre::Report>,
    ) -> JobRecord {
        self.store.claim_id(&mut record);
        let log_path = self.store.log_path(&record.id);
        record.log_path = Some(to_posix_string(&log_path));
        self.persist(&mut record).await;

        if let Some(err) = inventory_error {
            return self.fail(record, &err).await;
        }
        if record.file_count == 0 && matches!(plan.unit, ImportUnit::Folder { .. }) {
            info!("No files found, nothing to import");
            record.finalize(JobStatus::Completed, Utc::now());
            self.persist(&mut record).await;
            return record;
        }

        let api_key = match self.settings.uploader.api_key() {
            Ok(key) => key,
            Err(e) => return self.fail(record, &e).await,
        };
        let command = UploadCommand::new(&self.settings.uploader, api_key, &plan.mode, &log_path);
        record.command_display = Some(command.display());
        info!("Command: {}", command.display());
        self.persist(&mut record).await;

        let writer = RecordWriter::spawn(self.store.clone());
        let outcome = {
            let mut observer = JobObserver::new(&mut record, &writer);
            let outcome = self.runner.run(&command, &log_path, &mut observer).await;
            observer.finish();
            outcome
        };
        writer.close().await;
        let outcome = match outcome {
            Ok(outcome) => outcome,
            Err(e) => return self.fail(record, &color_eyre::Report::new(e)).await,
        };

        match self.settle(&mut record, &plan, &outcome).await {
            Ok(report) => {
                record.moved_count = report.moved;
                record.move_failed_count = report.failed;
            }
            Err(e) => return self.fail(record, &e).await,
        }

        let status = final_status(
            outcome.exit_code,
            outcome.summary.errors,
            outcome.log_complete,
            record.absorbed_count() > 0,
        );
        record.exit_code = Some(outcome.exit_code);
        record.attempts = outcome.attempts;
        record.result_summary = Some(outcome.summary.clone());
        record.finalize(status, Utc::now());
        self.persist(&mut record).await;
        info!(
            "Job {} finished as {status}: {}",
            record.id,
            outcome.summary.summary_line()
        );

        if plan.delete_on_success {
            self.apply_retention(&record, &plan.unit, outcome.summary.errors)
                .await;
        }
        record
    }

    /// Reconciles the manifest off the async runtime.
    async fn settle(
        &self,
        record: &mut JobRecord,
        plan: &JobPlan,
        outcome: &RunOutcome,
    ) -> Result<ReconcileReport> {
        let mut manifest = std::mem::take(&mut record.manifest);
        let unit = plan.unit.clone();
        let target = plan.extract_target.clone();
        let summary = outcome.summary.clone();
        let skip = plan.skip_recognized_category;
        let (manifest, report) = task::spawn_blocking(move || {
            let report = reconcile(&unit, target.as_deref(), &summary, &mut manifest, skip);
            (manifest, report)
        })
        .await
        .wrap_err("Reconciliation panicked")?;
        record.manifest = manifest;
        if report.moved > 0 {
            record.extract_path = plan.extract_target.as_deref().map(to_posix_string);
        }
        if report.failed > 0 {
            warn!("{} files could not be moved for review", report.failed);
        }
        Ok(report)
    }

    async fn apply_retention(&self, record: &JobRecord, unit: &ImportUnit, errors: u64) {
        let ImportUnit::Archive { parts } = unit else {
            return;
        };
        if !sources_safe_to_delete(record, errors) {
            alert!(
                "Keeping sources of {} ({}, {errors} errors, {} failed moves)",
                record.id,
                record.status,
                record.move_failed_count
            );
            return;
        }
        let mut deleted = 0;
        for part in parts {
            match tokio::fs::remove_file(part).await {
                Ok(()) => {
                    deleted += 1;
                    debug!("Deleted: {}", part.display());
                }
                Err(e) => warn!("Failed to delete {}: {e}", part.display()),
            }
        }
        info!("Deleted {deleted} archive part(s)");
    }
}
