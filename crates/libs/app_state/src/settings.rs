use crate::{IngestSettings, LoggingSettings, RawSettings};
use color_eyre::Result;
use color_eyre::eyre::{WrapErr, bail};
use std::fs;
use std::path::{Path, PathBuf, absolute};
use std::time::Duration;

#[derive(Debug, Clone)]
pub struct AppSettings {
    pub uploader: UploaderSettings,
    pub storage: StorageSettings,
    pub ingest: IngestSettings,
    pub logging: LoggingSettings,
}

#[derive(Debug, Clone)]
pub struct UploaderSettings {
    pub binary: PathBuf,
    /// Normalized: no trailing slash, no `/api` suffix.
    pub server_url: String,
    pub api_key: Option<String>,
    pub api_key_file: Option<PathBuf>,
    pub max_attempts: u32,
    pub retry_delay: Duration,
    pub log_wait_timeout: Duration,
    pub poll_interval: Duration,
    pub extra_flags: Vec<String>,
}

#[derive(Debug, Clone)]
pub struct StorageSettings {
    pub metadata_dir: PathBuf,
    pub log_dir: PathBuf,
    pub extract_dir: PathBuf,
    pub import_dir: PathBuf,
}

impl TryFrom<RawSettings> for AppSettings {
    type Error = color_eyre::Report;

    fn try_from(raw: RawSettings) -> Result<Self> {
        let metadata_dir =
            absolute(&raw.storage.metadata_dir).wrap_err("Invalid storage.metadata_dir")?;
        let log_dir = match raw.storage.log_dir {
            Some(dir) => absolute(dir).wrap_err("Invalid storage.log_dir")?,
            None => metadata_dir.join("logs"),
        };
        let storage = StorageSettings {
            metadata_dir,
            log_dir,
            extract_dir: absolute(&raw.storage.extract_dir)
                .wrap_err("Invalid storage.extract_dir")?,
            import_dir: absolute(&raw.storage.import_dir).wrap_err("Invalid storage.import_dir")?,
        };

        if raw.uploader.max_attempts == 0 {
            bail!("uploader.max_attempts must be at least 1");
        }
        let uploader = UploaderSettings {
            binary: raw.uploader.binary,
            server_url: normalize_server_url(&raw.uploader.server_url),
            api_key: raw.uploader.api_key.filter(|k| !k.is_empty()),
            api_key_file: raw.uploader.api_key_file,
            max_attempts: raw.uploader.max_attempts,
            retry_delay: Duration::from_secs(raw.uploader.retry_delay_seconds),
            log_wait_timeout: Duration::from_millis(raw.uploader.log_wait_timeout_ms),
            poll_interval: Duration::from_millis(raw.uploader.poll_interval_ms.max(1)),
            extra_flags: raw.uploader.extra_flags,
        };

        Ok(Self {
            uploader,
            storage,
            ingest: raw.ingest,
            logging: raw.logging,
        })
    }
}

impl AppSettings {
    /// Default settings with every storage folder placed under `root`.
    pub fn with_root(root: &Path) -> Result<Self> {
        let mut raw = RawSettings::default();
        raw.storage.metadata_dir = root.join("metadata");
        raw.storage.extract_dir = root.join("extracted");
        raw.storage.import_dir = root.join("import");
        Self::try_from(raw)
    }
}

impl UploaderSettings {
    /// The credential passed to the upload tool. An explicit key wins over the key file.
    pub fn api_key(&self) -> Result<String> {
        if let Some(key) = &self.api_key {
            return Ok(key.clone());
        }
        if let Some(key_file) = &self.api_key_file
            && key_file.exists()
        {
            let key = fs::read_to_string(key_file)
                .wrap_err_with(|| format!("Cannot read API key file {}", key_file.display()))?;
            return Ok(key.trim().to_owned());
        }
        bail!(
            "API key not configured: set uploader.api_key or provide {}",
            self.api_key_file
                .as_deref()
                .map_or_else(|| "uploader.api_key_file".to_owned(), |p| p.display().to_string())
        )
    }
}

impl IngestSettings {
    fn extension_of(file_name: &str) -> Option<String> {
        Path::new(file_name)
            .extension()
            .map(|e| e.to_string_lossy().to_lowercase())
    }

    #[must_use]
    pub fn is_media_file(&self, file_name: &str) -> bool {
        Self::extension_of(file_name).is_some_and(|ext| self.media_extensions.contains(&ext))
    }

    #[must_use]
    pub fn is_sidecar_file(&self, file_name: &str) -> bool {
        Self::extension_of(file_name).is_some_and(|ext| self.sidecar_extensions.contains(&ext))
    }

    /// Whether a path inside an import unit belongs to the recognized photo-library subtree.
    #[must_use]
    pub fn is_in_category(&self, relative_path: &str) -> bool {
        self.category_markers
            .iter()
            .any(|marker| relative_path.contains(marker.as_str()))
    }
}

fn normalize_server_url(url: &str) -> String {
    let trimmed = url.trim_end_matches('/');
    trimmed.strip_suffix("/api").unwrap_or(trimmed).to_owned()
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::io::Write;

    #[test]
    fn server_url_is_normalized() {
        assert_eq!(normalize_server_url("http://nas:2283/api/"), "http://nas:2283");
        assert_eq!(normalize_server_url("http://nas:2283/"), "http://nas:2283");
        assert_eq!(normalize_server_url("http://nas:2283"), "http://nas:2283");
    }

    #[test]
    fn log_dir_defaults_under_metadata_dir() -> Result<()> {
        let root = tempfile::tempdir()?;
        let settings = AppSettings::with_root(root.path())?;
        assert_eq!(
            settings.storage.log_dir,
            root.path().join("metadata").join("logs")
        );
        Ok(())
    }

    #[test]
    fn explicit_api_key_wins_over_file() -> Result<()> {
        let mut key_file = tempfile::NamedTempFile::new()?;
        writeln!(key_file, "from-file")?;
        let root = tempfile::tempdir()?;
        let mut settings = AppSettings::with_root(root.path())?;
        settings.uploader.api_key_file = Some(key_file.path().to_path_buf());

        assert_eq!(settings.uploader.api_key()?, "from-file");
        settings.uploader.api_key = Some("explicit".to_owned());
        assert_eq!(settings.uploader.api_key()?, "explicit");
        Ok(())
    }

    #[test]
    fn missing_api_key_is_an_error() -> Result<()> {
        let root = tempfile::tempdir()?;
        let mut settings = AppSettings::with_root(root.path())?;
        settings.uploader.api_key_file = Some(root.path().join("nope"));
        assert!(settings.uploader.api_key().is_err());
        Ok(())
    }

    #[test]
    fn classifies_files() {
        let ingest = IngestSettings::default();
        assert!(ingest.is_media_file("IMG_0001.JPG"));
        assert!(!ingest.is_media_file("IMG_0001.jpg.json"));
        assert!(ingest.is_sidecar_file("IMG_0001.jpg.json"));
        assert!(ingest.is_in_category("Takeout/Google Photos/2020/a.jpg"));
        assert!(!ingest.is_in_category("Takeout/Drive/a.jpg"));
    }

    #[test]
    fn zero_attempts_rejected() {
        let mut raw = RawSettings::default();
        raw.uploader.max_attempts = 0;
        assert!(AppSettings::try_from(raw).is_err());
    }
}
