use reqwest::Client;
use serde::{Deserialize, Serialize};
use std::collections::BTreeMap;
use thiserror::Error;
use tracing::{error, info};
use url::Url;

#[derive(Error, Debug)]
pub enum ServerJobsError {
    #[error("Failed to build request URL: {0}")]
    UrlParseError(#[from] url::ParseError),

    #[error("HTTP request failed: {0}")]
    RequestError(#[from] reqwest::Error),

    #[error("Server returned an error: {0}")]
    RemoteServerError(String),
}

#[derive(Debug, Default, Deserialize)]
#[serde(rename_all = "camelCase")]
struct QueueStatus {
    #[serde(default)]
    is_paused: bool,
    #[serde(default)]
    is_active: bool,
}

#[derive(Debug, Deserialize)]
#[serde(rename_all = "camelCase")]
struct JobQueue {
    #[serde(default)]
    queue_status: QueueStatus,
}

#[derive(Serialize)]
struct JobCommand {
    command: &'static str,
    force: bool,
}

#[derive(Debug, Default, Clone, PartialEq, Eq)]
pub struct ResumeReport {
    pub resumed: Vec<String>,
    pub already_running: Vec<String>,
    pub errors: Vec<String>,
}

/// Talks to the media server's job-queue API. Bulk uploads tend to leave background
/// queues paused; this resumes them once an import is done.
#[derive(Clone)]
pub struct ServerJobsClient {
    http_client: Client,
    server_url: String,
    api_key: String,
}

impl ServerJobsClient {
    pub fn new(http_client: Client, server_url: impl Into<String>, api_key: impl Into<String>) -> Self {
        Self {
            http_client,
            server_url: server_url.into(),
            api_key: api_key.into(),
        }
    }

    fn url(&self, path: &str) -> Result<Url, ServerJobsError> {
        let mut url: Url = self.server_url.parse()?;
        url.set_path(path);
        Ok(url)
    }

    async fn fetch_queues(&self) -> Result<BTreeMap<String, serde_json::Value>, ServerJobsError> {
        let url = self.url("/api/jobs")?;
        let response = self
            .http_client
            .get(url.clone())
            .header("x-api-key", &self.api_key)
            .header("Accept", "application/json")
            .send()
            .await?;
        if !response.status().is_success() {
            let error_text = response.text().await.unwrap_or_default();
            return Err(ServerJobsError::RemoteServerError(format!(
                "{url} returned an error: {error_text}"
            )));
        }
        Ok(response.json().await?)
    }

    async fn resume(&self, name: &str) -> Result<(), ServerJobsError> {
        let url = self.url(&format!("/api/jobs/{name}"))?;
        let response = self
            .http_client
            .put(url.clone())
            .header("x-api-key", &self.api_key)
            .header("Accept", "application/json")
            .json(&JobCommand {
                command: "resume",
                force: false,
            })
            .send()
            .await?;
        if !response.status().is_success() {
            let error_text = response.text().await.unwrap_or_default();
            return Err(ServerJobsError::RemoteServerError(format!(
                "{url} returned an error: {error_text}"
            )));
        }
        Ok(())
    }

    /// Resumes every paused queue. Per-queue failures are collected, not raised.
    pub async fn resume_paused(&self) -> Result<ResumeReport, ServerJobsError> {
        let queues = self.fetch_queues().await?;
        let mut report = ResumeReport::default();
        for (name, value) in queues {
            let Ok(queue) = serde_json::from_value::<JobQueue>(value) else {
                continue;
            };
            if queue.queue_status.is_paused {
                match self.resume(&name).await {
                    Ok(()) => {
                        info!("Resumed server job queue {name}");
                        report.resumed.push(name);
                    }
                    Err(e) => {
                        error!("Failed to resume {name}: {e}");
                        report.errors.push(format!("{name}: {e}"));
                    }
                }
            } else if queue.queue_status.is_active {
                report.already_running.push(name);
            }
        }
        Ok(report)
    }
}
