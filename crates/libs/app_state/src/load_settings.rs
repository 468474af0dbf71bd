use crate::{AppSettings, RawSettings};
use color_eyre::eyre::Result;
use std::path::Path;
use tracing::debug;

const DEFAULT_CONFIG_PATH: &str = "config/settings.yaml";

/// Load the app settings from `config/settings.yaml` + environment variables.
pub fn load_app_settings() -> Result<AppSettings> {
    load_app_settings_from(Path::new(DEFAULT_CONFIG_PATH))
}

/// Load settings from a YAML file (optional) layered under `APP__*` environment variables.
pub fn load_app_settings_from(config_path: &Path) -> Result<AppSettings> {
    // Need to load from dotenv to get it to overwrite values from the yaml.
    dotenv::from_path(".env").ok();

    let mut builder = config::Config::builder();
    if config_path.exists() {
        debug!("Loading settings from {}", config_path.display());
        builder = builder.add_source(config::File::from(config_path.canonicalize()?));
    }
    builder = builder.add_source(
        config::Environment::with_prefix("APP")
            .separator("__")
            .list_separator(",")
            .with_list_parse_key("uploader.extra_flags")
            .try_parsing(true),
    );

    let raw_settings = builder.build()?.try_deserialize::<RawSettings>()?;
    AppSettings::try_from(raw_settings)
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::fs;
    use std::time::Duration;

    #[test]
    fn yaml_overrides_defaults() -> Result<()> {
        let dir = tempfile::tempdir()?;
        let config_path = dir.path().join("settings.yaml");
        fs::write(
            &config_path,
            r"
uploader:
  server_url: http://photos.lan:2283/api
  max_attempts: 5
  retry_delay_seconds: 1
storage:
  metadata_dir: /srv/metadata
ingest:
  copy_failed_files: true
",
        )?;

        let settings = load_app_settings_from(&config_path)?;
        assert_eq!(settings.uploader.server_url, "http://photos.lan:2283");
        assert_eq!(settings.uploader.max_attempts, 5);
        assert_eq!(settings.uploader.retry_delay, Duration::from_secs(1));
        assert!(settings.ingest.copy_failed_files);
        assert!(settings.storage.log_dir.ends_with("metadata/logs"));
        // Untouched sections keep their defaults.
        assert_eq!(settings.ingest.archive_pattern, "takeout-*.zip");
        Ok(())
    }
}
