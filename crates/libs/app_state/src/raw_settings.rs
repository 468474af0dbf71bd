use serde::{Deserialize, Serialize};
use std::path::PathBuf;

#[derive(Debug, Deserialize, Clone, Default)]
pub struct RawSettings {
    #[serde(default)]
    pub uploader: RawUploaderSettings,
    #[serde(default)]
    pub storage: RawStorageSettings,
    #[serde(default)]
    pub ingest: IngestSettings,
    #[serde(default)]
    pub logging: LoggingSettings,
}

/// How to reach and drive the external upload tool.
#[derive(Debug, Deserialize, Clone)]
#[serde(default)]
pub struct RawUploaderSettings {
    /// Executable name or path of the upload tool.
    pub binary: PathBuf,
    pub server_url: String,
    pub api_key: Option<String>,
    pub api_key_file: Option<PathBuf>,
    /// Total invocations per job, including the first one.
    pub max_attempts: u32,
    pub retry_delay_seconds: u64,
    /// How long to wait for the tool to create its log file.
    pub log_wait_timeout_ms: u64,
    pub poll_interval_ms: u64,
    /// Appended to every invocation, after the mode-specific flags.
    pub extra_flags: Vec<String>,
}

impl Default for RawUploaderSettings {
    fn default() -> Self {
        Self {
            binary: PathBuf::from("immich-go"),
            server_url: "http://localhost:2283".to_owned(),
            api_key: None,
            api_key_file: Some(PathBuf::from("/run/secrets/immich_api_key")),
            max_attempts: 3,
            retry_delay_seconds: 30,
            log_wait_timeout_ms: 3000,
            poll_interval_ms: 50,
            extra_flags: Vec::new(),
        }
    }
}

/// Where job records, tool logs and side piles live.
#[derive(Debug, Deserialize, Clone)]
#[serde(default)]
pub struct RawStorageSettings {
    pub metadata_dir: PathBuf,
    /// Defaults to `<metadata_dir>/logs`.
    pub log_dir: Option<PathBuf>,
    pub extract_dir: PathBuf,
    /// Folder that receives downloaded archive parts.
    pub import_dir: PathBuf,
}

impl Default for RawStorageSettings {
    fn default() -> Self {
        Self {
            metadata_dir: PathBuf::from("/data/metadata"),
            log_dir: None,
            extract_dir: PathBuf::from("/data/extracted"),
            import_dir: PathBuf::from("/data/import"),
        }
    }
}

/// File classification and import policy.
#[derive(Debug, Deserialize, Serialize, Clone)]
#[serde(default)]
pub struct IngestSettings {
    /// Lowercase extensions, without dot, the upload tool accepts as media.
    pub media_extensions: Vec<String>,
    /// Lowercase extensions of structured description files.
    pub sidecar_extensions: Vec<String>,
    /// Path fragments marking the recognized photo-library export subtree.
    pub category_markers: Vec<String>,
    /// Glob for archive parts in the import folder.
    pub archive_pattern: String,
    pub delete_after_import: bool,
    pub copy_failed_files: bool,
    /// A running job without updates for longer than this is considered stalled.
    pub liveness_threshold_seconds: u64,
    pub resume_server_jobs: bool,
}

impl Default for IngestSettings {
    fn default() -> Self {
        let media_extensions = [
            "jpg", "jpeg", "png", "gif", "bmp", "tiff", "tif", "webp", "heic", "heif", "raw",
            "cr2", "nef", "arw", "dng", "mp4", "mov", "avi", "mkv", "wmv", "flv", "webm", "m4v",
            "3gp", "3g2", "mpeg", "mpg", "mts", "m2ts",
        ];
        Self {
            media_extensions: media_extensions.iter().map(|&e| e.to_owned()).collect(),
            sidecar_extensions: vec!["json".to_owned()],
            category_markers: vec!["Google Photos".to_owned(), "Google Foto's".to_owned()],
            archive_pattern: "takeout-*.zip".to_owned(),
            delete_after_import: true,
            copy_failed_files: false,
            liveness_threshold_seconds: 30 * 60,
            resume_server_jobs: true,
        }
    }
}

/// Logging configuration.
#[derive(Debug, Deserialize, Clone)]
#[serde(default)]
pub struct LoggingSettings {
    /// A `tracing` filter directive, e.g. `info` or `common_services=debug`.
    pub level: String,
}

impl Default for LoggingSettings {
    fn default() -> Self {
        Self {
            level: "info".to_owned(),
        }
    }
}
