use app_state::{AppSettings, format_size};
use chrono::Utc;
use color_eyre::Result;
use color_eyre::eyre::bail;
use common_services::discovery::find_takeout_exports;
use common_services::job_store::JobStore;
use common_services::orchestrator::{ImportOrchestrator, archive_source_name};
use common_services::server_jobs::ServerJobsClient;
use common_types::{JobRecord, JobStatus};
use std::path::{Path, PathBuf};
use std::time::Duration;
use tracing::{error, info, warn};

fn report(record: &JobRecord) {
    let line = record
        .result_summary
        .as_ref()
        .map(common_types::ResultSummary::summary_line)
        .unwrap_or_default();
    match record.status {
        JobStatus::Completed => info!("{} {}: {line}", record.id, record.status),
        _ => warn!("{} {}: {line}", record.id, record.status),
    }
}

pub async fn takeout(settings: AppSettings, keep_sources: bool) -> Result<()> {
    let import_dir = settings.storage.import_dir.clone();
    let ingest = settings.ingest.clone();
    let exports =
        tokio::task::spawn_blocking(move || find_takeout_exports(&import_dir, &ingest)).await??;
    if exports.is_empty() {
        info!("No complete exports to import");
        return Ok(());
    }
    let delete = settings.ingest.delete_after_import && !keep_sources;
    let resume_jobs = settings.ingest.resume_server_jobs;
    let orchestrator = ImportOrchestrator::new(settings);
    orchestrator.log_config();

    let mut failed = 0;
    for export in &exports {
        let record = orchestrator
            .import_archive(&export.parts, &export.prefix, delete)
            .await?;
        report(&record);
        if record.status != JobStatus::Completed {
            failed += 1;
        }
    }
    info!("Imported {} export(s), {failed} with problems", exports.len());

    if resume_jobs {
        resume_server_jobs(orchestrator.settings()).await;
    }
    if failed > 0 {
        bail!("{failed} export(s) did not complete cleanly");
    }
    Ok(())
}

pub async fn archive(settings: AppSettings, parts: &[PathBuf], delete: bool) -> Result<()> {
    let Some(first) = parts.first() else {
        bail!("No archive parts given");
    };
    let source_name = archive_source_name(first);
    let orchestrator = ImportOrchestrator::new(settings);
    let record = orchestrator.import_archive(parts, &source_name, delete).await?;
    report(&record);
    Ok(())
}

pub async fn folder(
    settings: AppSettings,
    path: &Path,
    source_kind: String,
    label: Option<String>,
    tag_prefix: Option<String>,
    copy_failed: Option<bool>,
) -> Result<()> {
    let orchestrator = ImportOrchestrator::new(settings);
    let record = orchestrator
        .import_folder(path)
        .source_kind(source_kind)
        .maybe_device_label(label)
        .maybe_tag_prefix(tag_prefix)
        .maybe_copy_failed_files(copy_failed)
        .call()
        .await?;
    report(&record);
    Ok(())
}

async fn resume_server_jobs(settings: &AppSettings) {
    let api_key = match settings.uploader.api_key() {
        Ok(key) => key,
        Err(e) => {
            warn!("Not resuming server jobs: {e}");
            return;
        }
    };
    let client = ServerJobsClient::new(
        reqwest::Client::new(),
        settings.uploader.server_url.clone(),
        api_key,
    );
    match client.resume_paused().await {
        Ok(report) => info!(
            "Server jobs: {} resumed, {} already running, {} failed",
            report.resumed.len(),
            report.already_running.len(),
            report.errors.len()
        ),
        Err(e) => error!("Could not resume server jobs: {e}"),
    }
}

pub fn status(settings: &AppSettings) -> Result<()> {
    let store = JobStore::from_settings(&settings.storage);
    let threshold = Duration::from_secs(settings.ingest.liveness_threshold_seconds);
    let now = Utc::now();
    let records = store.list()?;
    if records.is_empty() {
        println!("No jobs recorded in {}", settings.storage.metadata_dir.display());
        return Ok(());
    }
    for record in records {
        let status = store.effective_status(&record, now, threshold);
        println!(
            "{:<48} {:<22} {:>6} files {:>10}  imported={} moved={} failed_moves={}",
            record.id,
            status.as_str(),
            record.file_count,
            format_size(record.total_size_bytes),
            record.imported_count,
            record.moved_count,
            record.move_failed_count,
        );
        if let Some(details) = &record.error_details {
            println!("    {details}");
        }
    }
    Ok(())
}
