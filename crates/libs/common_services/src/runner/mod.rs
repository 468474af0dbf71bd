//! Runs the upload tool, follows its JSON log while it runs, and retries failed runs.
mod command;
mod error;
mod tail;

pub use command::{UploadCommand, UploadMode};
pub use error::RunnerError;
pub use tail::TailSettings;

use crate::log_parser::ParsedLine;
use app_state::UploaderSettings;
use color_eyre::Result;
use common_types::{LogEvent, ResultSummary};
use std::path::Path;
use std::process::{ExitStatus, Stdio};
use std::time::Duration;
use tokio::process::Command;
use tokio::sync::mpsc;
use tokio::time::sleep;
use tokio_util::sync::CancellationToken;
use tracing::{debug, error, info, warn};

/// Receives what the runner learns while the tool runs. Errors are logged and
/// otherwise ignored: a failing observer never stops an upload.
pub trait RunObserver {
    fn on_attempt(&mut self, _attempt: u32) -> Result<()> {
        Ok(())
    }

    fn on_event(&mut self, event: &LogEvent) -> Result<()>;
}

impl<F> RunObserver for F
where
    F: FnMut(&LogEvent) -> Result<()>,
{
    fn on_event(&mut self, event: &LogEvent) -> Result<()> {
        self(event)
    }
}

/// Result of the last attempt, after retries.
#[derive(Debug, Clone)]
pub struct RunOutcome {
    pub exit_code: i32,
    pub attempts: u32,
    /// Counters of the last attempt only.
    pub summary: ResultSummary,
    /// False when the last attempt's log could not be read to its end, so the
    /// counters may be missing outcomes.
    pub log_complete: bool,
}

impl RunOutcome {
    #[must_use]
    pub const fn is_success(&self) -> bool {
        self.exit_code == 0 && self.log_complete && !self.summary.has_errors()
    }
}

/// What one invocation of the tool left behind.
struct Attempt {
    status: ExitStatus,
    summary: ResultSummary,
    log_complete: bool,
}

#[derive(Debug, Clone)]
pub struct ProcessRunner {
    max_attempts: u32,
    retry_delay: Duration,
    tail: TailSettings,
}

impl ProcessRunner {
    #[must_use]
    pub fn new(uploader: &UploaderSettings) -> Self {
        Self {
            max_attempts: uploader.max_attempts.max(1),
            retry_delay: uploader.retry_delay,
            tail: TailSettings {
                poll_interval: uploader.poll_interval,
                log_wait_timeout: uploader.log_wait_timeout,
            },
        }
    }

    /// Runs `command` until it exits 0 or the attempt budget is spent. The log file is
    /// reset before every attempt, so the returned counters describe the last attempt;
    /// the observer has seen every event of every attempt.
    pub async fn run(
        &self,
        command: &UploadCommand,
        log_path: &Path,
        observer: &mut impl RunObserver,
    ) -> Result<RunOutcome, RunnerError> {
        let mut last = RunOutcome {
            exit_code: -1,
            attempts: 0,
            summary: ResultSummary::default(),
            log_complete: false,
        };

        for attempt in 1..=self.max_attempts {
            if attempt > 1 {
                info!(
                    "Retry attempt {attempt}/{} in {:?}",
                    self.max_attempts, self.retry_delay
                );
                sleep(self.retry_delay).await;
            }
            reset_log(log_path).await?;
            if let Err(e) = observer.on_attempt(attempt) {
                warn!("Attempt observer failed: {e:?}");
            }

            let Attempt {
                status,
                summary,
                log_complete,
            } = self.run_once(command, log_path, observer).await?;
            let exit_code = status.code().unwrap_or(-1);
            info!("Attempt {attempt} exited with {exit_code}: {}", summary.summary_line());
            if !log_complete {
                warn!("Log of attempt {attempt} was not read completely, counts may be missing outcomes");
            }
            last = RunOutcome {
                exit_code,
                attempts: attempt,
                summary,
                log_complete,
            };

            if exit_code == 0 {
                return Ok(last);
            }
            let (uploaded, errors) = (last.summary.uploaded, last.summary.errors);
            if uploaded > 0 && errors > 0 {
                warn!("Partially completed: {uploaded} uploaded, {errors} errors");
            } else if errors == 0 {
                warn!("Exit code {exit_code} but no errors logged");
            } else {
                error!("Attempt failed: exit code {exit_code}, {errors} errors");
            }
        }

        error!("Upload failed after {} attempts", self.max_attempts);
        Ok(last)
    }

    async fn run_once(
        &self,
        command: &UploadCommand,
        log_path: &Path,
        observer: &mut impl RunObserver,
    ) -> Result<Attempt, RunnerError> {
        let mut child = Command::new(command.program())
            .args(command.args())
            .stdin(Stdio::null())
            .spawn()
            .map_err(|source| RunnerError::Launch {
                program: command.program().to_path_buf(),
                source,
            })?;

        let stop = CancellationToken::new();
        let (tx, mut rx) = mpsc::channel(1024);
        let tailer = tokio::spawn(tail::tail_log(
            log_path.to_path_buf(),
            stop.clone(),
            tx,
            self.tail,
        ));

        let mut summary = ResultSummary::default();
        let waited = loop {
            tokio::select! {
                status = child.wait() => break status,
                Some(line) = rx.recv() => handle_line(line, &mut summary, observer),
            }
        };
        stop.cancel();

        // The tool is gone, so the log only shrinks towards EOF from here on. The
        // channel closes once the tailer has read it all.
        while let Some(line) = rx.recv().await {
            handle_line(line, &mut summary, observer);
        }
        let log_complete = match tailer.await {
            Ok(complete) => complete,
            Err(e) => {
                warn!("Log tail task failed: {e}");
                false
            }
        };

        let status = waited.map_err(RunnerError::Wait)?;
        summary.finish();
        Ok(Attempt {
            status,
            summary,
            log_complete,
        })
    }
}

fn handle_line(line: ParsedLine, summary: &mut ResultSummary, observer: &mut impl RunObserver) {
    if let Some(time) = &line.time {
        summary.observe_timestamp(time);
    }
    let Some(event) = line.event else {
        return;
    };
    summary.apply(&event);
    if let Err(e) = observer.on_event(&event) {
        warn!("Event observer failed: {e:?}");
    }
}

async fn reset_log(log_path: &Path) -> Result<(), RunnerError> {
    match tokio::fs::remove_file(log_path).await {
        Ok(()) => {
            debug!("Removed previous log {}", log_path.display());
            Ok(())
        }
        Err(e) if e.kind() == std::io::ErrorKind::NotFound => Ok(()),
        Err(source) => Err(RunnerError::Io {
            path: log_path.to_path_buf(),
            source,
        }),
    }
}

#[cfg(all(test, unix))]
mod tests {
    use super::*;
    use app_state::AppSettings;
    use common_types::FileStatus;
    use std::os::unix::fs::PermissionsExt;
    use std::path::PathBuf;

    /// Writes an executable shell script that stands in for the upload tool. The
    /// script sees the log path as `$LOG`.
    fn fake_tool(dir: &Path, body: &str) -> color_eyre::Result<PathBuf> {
        let path = dir.join("fake-tool.sh");
        let script = format!(
            "#!/bin/sh\nfor arg in \"$@\"; do case \"$arg\" in --log-file=*) LOG=\"${{arg#--log-file=}}\";; esac; done\n{body}\n"
        );
        std::fs::write(&path, script)?;
        std::fs::set_permissions(&path, std::fs::Permissions::from_mode(0o755))?;
        Ok(path)
    }

    fn runner_for(dir: &Path, tool: PathBuf) -> color_eyre::Result<(ProcessRunner, UploadCommand)> {
        let mut uploader = AppSettings::with_root(dir)?.uploader;
        uploader.binary = tool;
        uploader.retry_delay = Duration::from_millis(10);
        uploader.poll_interval = Duration::from_millis(5);
        let mode = UploadMode::Folder {
            path: dir.to_path_buf(),
            tag: "IMPORT/2024-05-01".into(),
        };
        let command = UploadCommand::new(&uploader, "key", &mode, &dir.join("run.log"));
        Ok((ProcessRunner::new(&uploader), command))
    }

    #[tokio::test]
    async fn collects_events_until_exit() -> color_eyre::Result<()> {
        let dir = tempfile::tempdir()?;
        let tool = fake_tool(
            dir.path(),
            r#"echo '{"time":"2024-05-01T10:00:00Z","msg":"uploaded successfully","file":"a.jpg"}' >> "$LOG"
echo '{"time":"2024-05-01T10:00:02Z","msg":"server has duplicate","file":"b.jpg"}' >> "$LOG"
exit 0"#,
        )?;
        let (runner, command) = runner_for(dir.path(), tool)?;
        let mut seen = Vec::new();
        let mut observer = |event: &LogEvent| -> Result<()> {
            seen.push(event.clone());
            Ok(())
        };
        let outcome = runner.run(&command, &dir.path().join("run.log"), &mut observer).await?;

        assert_eq!(outcome.exit_code, 0);
        assert_eq!(outcome.attempts, 1);
        assert!(outcome.is_success());
        assert_eq!(outcome.summary.uploaded, 1);
        assert_eq!(outcome.summary.server_duplicate, 1);
        assert_eq!(outcome.summary.duration_seconds, Some(2.0));
        assert_eq!(seen.len(), 2);
        Ok(())
    }

    #[tokio::test]
    async fn retries_until_attempts_run_out() -> color_eyre::Result<()> {
        let dir = tempfile::tempdir()?;
        let tool = fake_tool(
            dir.path(),
            r#"echo '{"msg":"upload error","file":"a.jpg","error":"boom"}' >> "$LOG"
exit 3"#,
        )?;
        let (runner, command) = runner_for(dir.path(), tool)?;
        let mut attempts = Vec::new();
        struct Recorder<'a>(&'a mut Vec<u32>);
        impl RunObserver for Recorder<'_> {
            fn on_attempt(&mut self, attempt: u32) -> Result<()> {
                self.0.push(attempt);
                Ok(())
            }
            fn on_event(&mut self, _event: &LogEvent) -> Result<()> {
                color_eyre::eyre::bail!("observer errors are ignored")
            }
        }
        let outcome = runner
            .run(&command, &dir.path().join("run.log"), &mut Recorder(&mut attempts))
            .await?;

        assert_eq!(outcome.exit_code, 3);
        assert_eq!(outcome.attempts, 3);
        assert_eq!(attempts, [1, 2, 3]);
        assert_eq!(outcome.summary.errors, 1, "counters describe only the last attempt");
        assert_eq!(outcome.summary.outcome_for("a.jpg"), Some(FileStatus::Error));
        Ok(())
    }

    #[tokio::test]
    async fn drains_the_whole_log_behind_a_slow_observer() -> color_eyre::Result<()> {
        let dir = tempfile::tempdir()?;
        let tool = fake_tool(
            dir.path(),
            r#"i=0
while [ $i -lt 3000 ]; do
  echo "{\"msg\":\"uploaded successfully\",\"file\":\"dir/$i.jpg\"}" >> "$LOG"
  i=$((i+1))
done
echo '{"level":"ERROR","msg":"upload error","file":"dir/last.jpg","error":"disk full"}' >> "$LOG"
exit 0"#,
        )?;
        let (runner, command) = runner_for(dir.path(), tool)?;
        let mut observer = |_: &LogEvent| -> Result<()> {
            std::thread::sleep(Duration::from_millis(1));
            Ok(())
        };
        let outcome = runner.run(&command, &dir.path().join("run.log"), &mut observer).await?;

        assert_eq!(outcome.exit_code, 0);
        assert_eq!(outcome.summary.uploaded, 3000);
        assert_eq!(outcome.summary.errors, 1, "the last line is never dropped");
        assert!(outcome.log_complete);
        assert!(!outcome.is_success());
        Ok(())
    }

    #[tokio::test]
    async fn run_without_a_log_is_incomplete() -> color_eyre::Result<()> {
        let dir = tempfile::tempdir()?;
        let tool = fake_tool(dir.path(), "exit 0")?;
        let (runner, command) = runner_for(dir.path(), tool)?;
        let mut observer = |_: &LogEvent| -> Result<()> { Ok(()) };
        let outcome = runner.run(&command, &dir.path().join("run.log"), &mut observer).await?;

        assert_eq!(outcome.exit_code, 0);
        assert!(!outcome.log_complete);
        assert!(!outcome.is_success());
        Ok(())
    }

    #[tokio::test]
    async fn missing_binary_is_a_launch_error() -> color_eyre::Result<()> {
        let dir = tempfile::tempdir()?;
        let (runner, command) = runner_for(dir.path(), dir.path().join("does-not-exist"))?;
        let mut observer = |_: &LogEvent| -> Result<()> { Ok(()) };
        let result = runner.run(&command, &dir.path().join("run.log"), &mut observer).await;
        assert!(matches!(result, Err(RunnerError::Launch { .. })));
        Ok(())
    }
}
