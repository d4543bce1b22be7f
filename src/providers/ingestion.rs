//! Knowledge-base ingestion: file/URL submission and job polling.

use reqwest::multipart::{Form, Part};
use reqwest::{Client, Url};
use serde::{Deserialize, Serialize};
use std::path::Path;
use std::time::Duration;
use tokio::time::Instant;

use super::chatbot::read_body;
use super::provider::{AttemptError, ClientError, Result};
use super::retry::RetryPolicy;
use crate::config::ServiceSettings;

#[derive(Serialize, Deserialize, Clone, Copy, Debug, PartialEq, Eq)]
#[serde(rename_all = "lowercase")]
pub enum JobState {
    Queued,
    Pending,
    Processing,
    Completed,
    Failed,
    #[serde(other)]
    Unknown,
}

impl JobState {
    pub fn is_terminal(self) -> bool {
        matches!(self, JobState::Completed | JobState::Failed)
    }
}

impl std::fmt::Display for JobState {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        let s = match self {
            JobState::Queued => "queued",
            JobState::Pending => "pending",
            JobState::Processing => "processing",
            JobState::Completed => "completed",
            JobState::Failed => "failed",
            JobState::Unknown => "unknown",
        };
        write!(f, "{}", s)
    }
}

/// Returned when a document is submitted.
#[derive(Serialize, Deserialize, Clone, Debug)]
#[serde(rename_all = "camelCase")]
pub struct IngestionJob {
    pub job_id: String,
    pub status: JobState,
}

#[derive(Serialize, Deserialize, Clone, Debug)]
#[serde(rename_all = "camelCase")]
pub struct JobStatus {
    pub status: JobState,
    #[serde(default)]
    pub progress: Option<f64>,
    #[serde(default)]
    pub error: Option<String>,
}

#[derive(Serialize)]
#[serde(rename_all = "camelCase")]
struct UrlBody<'a> {
    chatbot_id: &'a str,
    url: &'a str,
}

pub struct IngestionClient {
    client: Client,
    base_url: String,
    api_key: Option<String>,
    chatbot_id: String,
    request_timeout: Duration,
    upload_timeout: Duration,
    poll_interval: Duration,
    poll_timeout: Option<Duration>,
    retry: RetryPolicy,
}

impl IngestionClient {
    pub fn new(service: &ServiceSettings, retry: RetryPolicy) -> Result<Self> {
        let base_url = service
            .base_url
            .clone()
            .ok_or_else(|| ClientError::Config("service.base_url is not set".to_string()))?;
        let chatbot_id = service
            .chatbot_id
            .clone()
            .ok_or_else(|| ClientError::Config("service.chatbot_id is not set".to_string()))?;

        Ok(Self {
            client: Client::new(),
            base_url: base_url.trim_end_matches('/').to_string(),
            api_key: service.api_key.clone(),
            chatbot_id,
            request_timeout: Duration::from_secs(service.request_timeout_secs),
            upload_timeout: Duration::from_secs(service.upload_timeout_secs),
            poll_interval: Duration::from_millis(service.poll_interval_ms),
            poll_timeout: service.poll_timeout_secs.map(Duration::from_secs),
            retry,
        })
    }

    pub fn with_poll_interval(mut self, interval: Duration) -> Self {
        self.poll_interval = interval;
        self
    }

    pub fn with_poll_timeout(mut self, timeout: Option<Duration>) -> Self {
        self.poll_timeout = timeout;
        self
    }

    fn authorize(&self, builder: reqwest::RequestBuilder) -> reqwest::RequestBuilder {
        match &self.api_key {
            Some(key) => builder.bearer_auth(key),
            None => builder,
        }
    }

    /// Upload a document file to the knowledge base.
    pub async fn submit_file(&self, path: &Path) -> Result<IngestionJob> {
        let bytes = tokio::fs::read(path).await?;
        let file_name = path
            .file_name()
            .map(|n| n.to_string_lossy().into_owned())
            .unwrap_or_else(|| "document".to_string());
        let url = format!("{}/ingest/file", self.base_url);

        tracing::info!(file = %path.display(), size = bytes.len(), "Submitting file for ingestion");

        let body = self
            .retry
            .run("ingest_file", |_| {
                // Multipart forms are single-use; rebuild one per attempt.
                let form = Form::new()
                    .text("chatbotId", self.chatbot_id.clone())
                    .part("file", Part::bytes(bytes.clone()).file_name(file_name.clone()));
                let builder = self
                    .authorize(self.client.post(&url))
                    .timeout(self.upload_timeout)
                    .multipart(form);
                async move {
                    let response = builder.send().await.map_err(AttemptError::from)?;
                    read_body(response).await
                }
            })
            .await?;

        parse_json(&body)
    }

    /// Ask the service to fetch and ingest a remote document.
    pub async fn submit_url(&self, document_url: &str) -> Result<IngestionJob> {
        let url = format!("{}/ingest/url", self.base_url);
        let payload = UrlBody {
            chatbot_id: &self.chatbot_id,
            url: document_url,
        };

        tracing::info!(url = %document_url, "Submitting URL for ingestion");

        let body = self
            .retry
            .run("ingest_url", |_| {
                let builder = self
                    .authorize(self.client.post(&url))
                    .timeout(self.request_timeout)
                    .json(&payload);
                async move {
                    let response = builder.send().await.map_err(AttemptError::from)?;
                    read_body(response).await
                }
            })
            .await?;

        parse_json(&body)
    }

    pub async fn job_status(&self, job_id: &str) -> Result<JobStatus> {
        let url = self.job_url(job_id)?;

        let body = self
            .retry
            .run("job_status", |_| {
                let builder = self
                    .authorize(self.client.get(url.clone()))
                    .timeout(self.request_timeout);
                async move {
                    let response = builder.send().await.map_err(AttemptError::from)?;
                    read_body(response).await
                }
            })
            .await?;

        parse_json(&body)
    }

    /// `{base}/ingest/jobs/{id}` with the id percent-encoded as one segment.
    fn job_url(&self, job_id: &str) -> Result<Url> {
        let mut url = Url::parse(&self.base_url)
            .map_err(|e| ClientError::Config(format!("Invalid service.base_url: {}", e)))?;
        url.path_segments_mut()
            .map_err(|_| ClientError::Config("service.base_url cannot take a path".to_string()))?
            .pop_if_empty()
            .extend(["ingest", "jobs", job_id]);
        Ok(url)
    }

    /// Poll until the job is `completed` or `failed`.
    ///
    /// Without a configured poll timeout this waits indefinitely.
    pub async fn wait_for_job<F>(&self, job_id: &str, mut on_progress: F) -> Result<JobStatus>
    where
        F: FnMut(&JobStatus),
    {
        let started = Instant::now();

        loop {
            let status = self.job_status(job_id).await?;
            on_progress(&status);

            if status.status.is_terminal() {
                tracing::info!(job_id, status = %status.status, "Ingestion job finished");
                return Ok(status);
            }

            if let Some(limit) = self.poll_timeout {
                let waited = started.elapsed();
                if waited + self.poll_interval > limit {
                    return Err(ClientError::PollTimeout {
                        job_id: job_id.to_string(),
                        waited,
                    });
                }
            }

            tracing::debug!(job_id, status = %status.status, progress = ?status.progress, "Ingestion job pending");
            tokio::time::sleep(self.poll_interval).await;
        }
    }
}

fn parse_json<T: serde::de::DeserializeOwned>(body: &str) -> Result<T> {
    serde_json::from_str(body)
        .map_err(|e| ClientError::InvalidResponse(format!("{}: {}", e, body)))
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::io::Write;
    use wiremock::matchers::{body_partial_json, method, path};
    use wiremock::{Mock, MockServer, ResponseTemplate};

    fn test_client(base_url: &str) -> IngestionClient {
        let service = ServiceSettings {
            base_url: Some(base_url.to_string()),
            chatbot_id: Some("bot-1".to_string()),
            ..ServiceSettings::default()
        };
        let retry = RetryPolicy {
            max_attempts: 3,
            base_delay: Duration::from_millis(10),
        };
        IngestionClient::new(&service, retry)
            .unwrap()
            .with_poll_interval(Duration::from_millis(10))
    }

    #[test]
    fn test_job_state_parsing() {
        let status: JobStatus =
            serde_json::from_str(r#"{"status": "processing", "progress": 0.4}"#).unwrap();
        assert_eq!(status.status, JobState::Processing);
        assert!(!status.status.is_terminal());

        let status: JobStatus = serde_json::from_str(r#"{"status": "exploded"}"#).unwrap();
        assert_eq!(status.status, JobState::Unknown);
        assert!(JobState::Completed.is_terminal());
        assert!(JobState::Failed.is_terminal());
    }

    #[tokio::test]
    async fn test_submit_url() {
        let server = MockServer::start().await;

        Mock::given(method("POST"))
            .and(path("/ingest/url"))
            .and(body_partial_json(serde_json::json!({
                "chatbotId": "bot-1",
                "url": "https://who.int/malaria"
            })))
            .respond_with(ResponseTemplate::new(200).set_body_json(serde_json::json!({
                "jobId": "job-42",
                "status": "queued"
            })))
            .expect(1)
            .mount(&server)
            .await;

        let client = test_client(&server.uri());
        let job = client.submit_url("https://who.int/malaria").await.unwrap();

        assert_eq!(job.job_id, "job-42");
        assert_eq!(job.status, JobState::Queued);
    }

    #[tokio::test]
    async fn test_submit_file() {
        let server = MockServer::start().await;

        Mock::given(method("POST"))
            .and(path("/ingest/file"))
            .respond_with(ResponseTemplate::new(200).set_body_json(serde_json::json!({
                "jobId": "job-7",
                "status": "pending"
            })))
            .expect(1)
            .mount(&server)
            .await;

        let mut file = tempfile::NamedTempFile::new().unwrap();
        writeln!(file, "question,answer").unwrap();
        writeln!(file, "What is malaria?,A mosquito-borne disease").unwrap();

        let client = test_client(&server.uri());
        let job = client.submit_file(file.path()).await.unwrap();

        assert_eq!(job.job_id, "job-7");
        assert_eq!(job.status, JobState::Pending);
    }

    #[tokio::test]
    async fn test_wait_for_job_polls_until_terminal() {
        let server = MockServer::start().await;

        Mock::given(method("GET"))
            .and(path("/ingest/jobs/job-42"))
            .respond_with(ResponseTemplate::new(200).set_body_json(serde_json::json!({
                "status": "processing",
                "progress": 0.5
            })))
            .up_to_n_times(2)
            .mount(&server)
            .await;

        Mock::given(method("GET"))
            .and(path("/ingest/jobs/job-42"))
            .respond_with(ResponseTemplate::new(200).set_body_json(serde_json::json!({
                "status": "completed",
                "progress": 1.0
            })))
            .mount(&server)
            .await;

        let client = test_client(&server.uri());
        let mut seen = Vec::new();
        let status = client
            .wait_for_job("job-42", |s| seen.push(s.status))
            .await
            .unwrap();

        assert_eq!(status.status, JobState::Completed);
        assert_eq!(
            seen,
            vec![JobState::Processing, JobState::Processing, JobState::Completed]
        );
    }

    #[tokio::test]
    async fn test_job_id_is_encoded_as_one_segment() {
        let server = MockServer::start().await;

        Mock::given(method("GET"))
            .and(path("/ingest/jobs/a%2Fb%3Fc%23d"))
            .respond_with(ResponseTemplate::new(200).set_body_json(serde_json::json!({
                "status": "queued"
            })))
            .expect(1)
            .mount(&server)
            .await;

        let client = test_client(&server.uri());
        let status = client.job_status("a/b?c#d").await.unwrap();
        assert_eq!(status.status, JobState::Queued);
    }

    #[test]
    fn test_job_url_keeps_base_path() {
        let service = ServiceSettings {
            base_url: Some("https://kb.example.com/v1/".to_string()),
            chatbot_id: Some("bot-1".to_string()),
            ..ServiceSettings::default()
        };
        let client = IngestionClient::new(&service, RetryPolicy::default()).unwrap();

        assert_eq!(
            client.job_url("job 7").unwrap().as_str(),
            "https://kb.example.com/v1/ingest/jobs/job%207"
        );
    }

    #[tokio::test]
    async fn test_wait_for_job_reports_failure_state() {
        let server = MockServer::start().await;

        Mock::given(method("GET"))
            .and(path("/ingest/jobs/job-9"))
            .respond_with(ResponseTemplate::new(200).set_body_json(serde_json::json!({
                "status": "failed",
                "error": "unsupported format"
            })))
            .mount(&server)
            .await;

        let client = test_client(&server.uri());
        let status = client.wait_for_job("job-9", |_| {}).await.unwrap();

        assert_eq!(status.status, JobState::Failed);
        assert_eq!(status.error.as_deref(), Some("unsupported format"));
    }

    #[tokio::test]
    async fn test_wait_for_job_honours_poll_timeout() {
        let server = MockServer::start().await;

        Mock::given(method("GET"))
            .and(path("/ingest/jobs/stuck"))
            .respond_with(ResponseTemplate::new(200).set_body_json(serde_json::json!({
                "status": "processing"
            })))
            .mount(&server)
            .await;

        let client = test_client(&server.uri())
            .with_poll_timeout(Some(Duration::from_millis(50)));
        let err = client.wait_for_job("stuck", |_| {}).await.unwrap_err();

        assert!(matches!(err, ClientError::PollTimeout { .. }));
    }
}
