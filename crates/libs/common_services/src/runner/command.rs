use app_state::UploaderSettings;
use std::path::{Path, PathBuf};

const REDACTED_KEY: &str = "***API_KEY***";

/// What the upload tool is pointed at.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum UploadMode {
    /// Every part of one export, selected with a `<dir>/<prefix>-*.zip` glob.
    Archive {
        import_dir: PathBuf,
        export_prefix: String,
    },
    Folder {
        path: PathBuf,
        tag: String,
    },
}

/// Argument list for one upload tool invocation.
#[derive(Debug, Clone)]
pub struct UploadCommand {
    program: PathBuf,
    args: Vec<String>,
    api_key: String,
}

impl UploadCommand {
    pub fn new(
        uploader: &UploaderSettings,
        api_key: impl Into<String>,
        mode: &UploadMode,
        log_file: &Path,
    ) -> Self {
        let api_key = api_key.into();
        let subcommand = match mode {
            UploadMode::Archive { .. } => "from-google-photos",
            UploadMode::Folder { .. } => "from-folder",
        };
        let mut args: Vec<String> = vec![
            "upload".into(),
            subcommand.into(),
            "-s".into(),
            uploader.server_url.clone(),
            "-k".into(),
            api_key.clone(),
            "--log-level=INFO".into(),
            "--log-type=JSON".into(),
            format!("--log-file={}", log_file.display()),
            "--manage-raw-jpeg=StackCoverRaw".into(),
            "--manage-burst=Stack".into(),
            "--on-errors=continue".into(),
            "--no-ui".into(),
        ];

        match mode {
            UploadMode::Archive {
                import_dir,
                export_prefix,
            } => {
                args.extend(
                    [
                        "--sync-albums",
                        "--include-untitled-albums",
                        "--people-tag",
                        "--takeout-tag",
                        "--include-archived",
                        "--include-unmatched",
                        "--session-tag",
                    ]
                    .map(String::from),
                );
                args.extend(uploader.extra_flags.iter().cloned());
                args.push(format!("{}/{export_prefix}-*.zip", import_dir.display()));
            }
            UploadMode::Folder { path, tag } => {
                args.push("--session-tag".into());
                args.push(format!("--tag={tag}"));
                args.extend(uploader.extra_flags.iter().cloned());
                args.push(path.display().to_string());
            }
        }

        Self {
            program: uploader.binary.clone(),
            args,
            api_key,
        }
    }

    #[must_use]
    pub fn program(&self) -> &Path {
        &self.program
    }

    #[must_use]
    pub fn args(&self) -> &[String] {
        &self.args
    }

    /// The full command line with the API key masked, safe to persist and log.
    #[must_use]
    pub fn display(&self) -> String {
        let line = std::iter::once(self.program.display().to_string())
            .chain(self.args.iter().cloned())
            .collect::<Vec<_>>()
            .join(" ");
        if self.api_key.is_empty() {
            line
        } else {
            line.replace(&self.api_key, REDACTED_KEY)
        }
    }
}
