//! Outbound service clients.
//!
//! Every call to the completion and ingestion services goes through
//! [`RetryPolicy`]: at most three attempts, exponential backoff, and no retry
//! for client errors other than 429.

use std::sync::Arc;

pub mod chatbot;
pub mod ingestion;
pub mod provider;
pub mod retry;

pub use chatbot::ChatbotClient;
pub use ingestion::{IngestionClient, IngestionJob, JobState, JobStatus};
pub use provider::{AttemptError, ClientError, CompletionRequest, CompletionService, Result};
pub use retry::{RetryAttempt, RetryPolicy};

use crate::config::Settings;

/// Build the completion service configured in settings.
pub fn create_completion_service(settings: &Settings) -> Result<Arc<dyn CompletionService>> {
    let retry = RetryPolicy::from_settings(&settings.retry);
    Ok(Arc::new(ChatbotClient::new(&settings.service, retry)?))
}

/// Build the ingestion client configured in settings.
pub fn create_ingestion_client(settings: &Settings) -> Result<IngestionClient> {
    let retry = RetryPolicy::from_settings(&settings.retry);
    IngestionClient::new(&settings.service, retry)
}
