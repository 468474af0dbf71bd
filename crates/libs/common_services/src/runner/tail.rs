use crate::log_parser::{ParsedLine, parse_line};
use std::path::{Path, PathBuf};
use std::time::Duration;
use tokio::fs::File;
use tokio::io::{AsyncBufReadExt, BufReader};
use tokio::sync::mpsc;
use tokio::time::{Instant, sleep};
use tokio_util::sync::CancellationToken;
use tracing::{debug, warn};

#[derive(Debug, Clone, Copy)]
pub struct TailSettings {
    pub poll_interval: Duration,
    pub log_wait_timeout: Duration,
}

/// Polls until `path` exists. Gives up only once `stop` is cancelled and the file still
/// isn't there.
async fn wait_for_file(path: &Path, stop: &CancellationToken, settings: TailSettings) -> bool {
    let started = Instant::now();
    let mut warned = false;
    loop {
        let stopping = stop.is_cancelled();
        if tokio::fs::try_exists(path).await.unwrap_or(false) {
            return true;
        }
        if stopping {
            return false;
        }
        if !warned && started.elapsed() > settings.log_wait_timeout {
            warn!(
                "Upload tool has not created {} after {:?}, still waiting",
                path.display(),
                settings.log_wait_timeout
            );
            warned = true;
        }
        tokio::select! {
            () = sleep(settings.poll_interval) => {},
            () = stop.cancelled() => {},
        }
    }
}

/// Follows the tool's log file line by line and forwards every decoded line.
///
/// After `stop` is cancelled the file is read to EOF once more before returning, so
/// lines written just before the tool exited are not lost. A trailing line without a
/// newline is held back until it is completed, or until that final drain.
///
/// Returns true only when the whole file was read and every line was handed over.
pub async fn tail_log(
    path: PathBuf,
    stop: CancellationToken,
    tx: mpsc::Sender<ParsedLine>,
    settings: TailSettings,
) -> bool {
    if !wait_for_file(&path, &stop, settings).await {
        warn!("No log file was written at {}", path.display());
        return false;
    }
    let file = match File::open(&path).await {
        Ok(file) => file,
        Err(e) => {
            warn!("Cannot open log file {}: {e}", path.display());
            return false;
        }
    };
    let mut reader = BufReader::new(file);
    let mut line = String::new();
    let mut complete = true;

    loop {
        let stopping = stop.is_cancelled();
        match reader.read_line(&mut line).await {
            Ok(0) => {
                if stopping {
                    if !line.is_empty() && !forward(&tx, &line).await {
                        return false;
                    }
                    debug!("Finished tailing {}", path.display());
                    return complete;
                }
                tokio::select! {
                    () = sleep(settings.poll_interval) => {},
                    () = stop.cancelled() => {},
                }
            }
            Ok(_) if line.ends_with('\n') => {
                if !forward(&tx, &line).await {
                    return false;
                }
                line.clear();
            }
            // Partial line, the rest has not been written yet.
            Ok(_) => {}
            Err(e) => {
                warn!("Error reading {}: {e}", path.display());
                line.clear();
                complete = false;
                if stopping {
                    return false;
                }
            }
        }
    }
}

/// Returns false when the receiving side is gone.
async fn forward(tx: &mpsc::Sender<ParsedLine>, line: &str) -> bool {
    match parse_line(line) {
        Some(parsed) => tx.send(parsed).await.is_ok(),
        None => true,
    }
}
