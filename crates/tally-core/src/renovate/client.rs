//! Mend Renovate status API client.

use std::time::Duration;

use chrono::{DateTime, Utc};
use serde::Deserialize;
use thiserror::Error;

const STATUS_ENDPOINT: &str = "/api/status";
const REQUEST_TIMEOUT: Duration = Duration::from_secs(30);

#[derive(Debug, Error)]
pub enum RenovateError {
    #[error("calling {url}: {source}")]
    Http {
        url: String,
        #[source]
        source: reqwest::Error,
    },

    #[error("{url} answered {status}")]
    Status { url: String, status: reqwest::StatusCode },
}

/// Subset of the `/api/status` document the exporter reads. Every field is
/// optional on the wire.
#[derive(Debug, Clone, Default, PartialEq, Deserialize)]
#[serde(default, rename_all = "camelCase")]
pub struct Status {
    pub boot_date: Option<DateTime<Utc>>,
    pub jobs: Jobs,
    pub jobs_in_progress: Vec<JobInProgress>,
    pub worker: Worker,
}

#[derive(Debug, Clone, Default, PartialEq, Deserialize)]
#[serde(default, rename_all = "camelCase")]
pub struct Jobs {
    pub queue_length: u64,
    pub total_jobs_processed: u64,
    pub last_enqueue_date: Option<DateTime<Utc>>,
}

#[derive(Debug, Clone, Default, PartialEq, Deserialize)]
#[serde(default, rename_all = "camelCase")]
pub struct JobInProgress {
    pub repository: String,
    pub started: Option<DateTime<Utc>>,
}

#[derive(Debug, Clone, Default, PartialEq, Deserialize)]
#[serde(default, rename_all = "camelCase")]
pub struct Worker {
    pub current_job: Option<Job>,
    pub current_job_start: Option<DateTime<Utc>>,
}

#[derive(Debug, Clone, Default, PartialEq, Deserialize)]
#[serde(default, rename_all = "camelCase")]
pub struct Job {
    pub repository: String,
    pub reason: String,
    pub priority: i64,
}

impl Worker {
    /// The worker counts as busy while it reports a current job.
    pub fn is_busy(&self) -> bool {
        self.current_job
            .as_ref()
            .is_some_and(|job| !job.repository.is_empty())
    }
}

#[derive(Debug, Clone)]
pub struct RenovateClient {
    http: reqwest::Client,
    url: String,
    token: Option<String>,
}

impl RenovateClient {
    pub fn new(url: impl Into<String>, token: Option<String>) -> Self {
        let http = reqwest::Client::builder()
            .timeout(REQUEST_TIMEOUT)
            .build()
            .unwrap_or_else(|_| reqwest::Client::new());
        Self {
            http,
            url: url.into(),
            token,
        }
    }

    pub fn status_url(&self) -> String {
        format!("{}{STATUS_ENDPOINT}", self.url.trim_end_matches('/'))
    }

    pub async fn get_status(&self) -> Result<Status, RenovateError> {
        let url = self.status_url();
        let mut request = self.http.get(&url);
        if let Some(token) = &self.token {
            request = request.header(reqwest::header::AUTHORIZATION, token);
        }

        let response = request.send().await.map_err(|source| RenovateError::Http {
            url: url.clone(),
            source,
        })?;
        if !response.status().is_success() {
            return Err(RenovateError::Status {
                url,
                status: response.status(),
            });
        }
        response
            .json()
            .await
            .map_err(|source| RenovateError::Http { url, source })
    }
}
