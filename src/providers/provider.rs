//! Completion service trait and client errors for chatrelay.

use async_trait::async_trait;
use serde::Serialize;
use std::time::Duration;
use thiserror::Error;

/// Failure of a single outbound attempt.
#[derive(Error, Debug)]
pub enum AttemptError {
    /// Connect failure, timeout or any other case where no response arrived.
    #[error("No response received: {0}")]
    Network(String),

    #[error("HTTP {status}: {body}")]
    Status { status: u16, body: String },

    /// The response started but the body stream broke off.
    #[error("Response body interrupted: {0}")]
    Body(String),
}

impl AttemptError {
    /// Only a missing response, 429 or 5xx is worth another attempt. A body
    /// that breaks off after a status arrived is final.
    pub fn is_retryable(&self) -> bool {
        match self {
            AttemptError::Network(_) => true,
            AttemptError::Body(_) => false,
            AttemptError::Status { status, .. } => {
                *status == 429 || (500..600).contains(status)
            }
        }
    }

    pub fn status(&self) -> Option<u16> {
        match self {
            AttemptError::Status { status, .. } => Some(*status),
            _ => None,
        }
    }
}

impl From<reqwest::Error> for AttemptError {
    fn from(e: reqwest::Error) -> Self {
        match e.status() {
            Some(status) => AttemptError::Status {
                status: status.as_u16(),
                body: e.to_string(),
            },
            None => AttemptError::Network(e.to_string()),
        }
    }
}

#[derive(Error, Debug)]
pub enum ClientError {
    #[error("{operation} failed after {attempts} attempts: {last}")]
    RetriesExhausted {
        operation: String,
        attempts: u32,
        #[source]
        last: AttemptError,
    },

    #[error("{operation} rejected with HTTP {status}: {body}")]
    Rejected {
        operation: String,
        status: u16,
        body: String,
    },

    #[error("Invalid response: {0}")]
    InvalidResponse(String),

    #[error("Ingestion job {job_id} did not finish within {waited:?}")]
    PollTimeout { job_id: String, waited: Duration },

    #[error("Client configuration error: {0}")]
    Config(String),

    #[error("IO error: {0}")]
    Io(#[from] std::io::Error),
}

impl ClientError {
    /// HTTP status of the final failure, when one was received.
    pub fn status(&self) -> Option<u16> {
        match self {
            ClientError::RetriesExhausted { last, .. } => last.status(),
            ClientError::Rejected { status, .. } => Some(*status),
            _ => None,
        }
    }
}

pub type Result<T> = std::result::Result<T, ClientError>;

/// One call to the completion service.
#[derive(Serialize, Clone, Debug, Default, PartialEq)]
#[serde(rename_all = "camelCase")]
pub struct CompletionRequest {
    /// Conversation id; the service keys its own session state on it.
    pub identity_key: String,
    pub message: String,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub system_prompt: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub metadata: Option<serde_json::Value>,
}

impl CompletionRequest {
    pub fn new(identity_key: impl Into<String>, message: impl Into<String>) -> Self {
        Self {
            identity_key: identity_key.into(),
            message: message.into(),
            system_prompt: None,
            metadata: None,
        }
    }

    pub fn with_system_prompt(mut self, prompt: impl Into<String>) -> Self {
        self.system_prompt = Some(prompt.into());
        self
    }

    pub fn with_metadata(mut self, metadata: serde_json::Value) -> Self {
        self.metadata = Some(metadata);
        self
    }
}

/// Text-generation backend.
#[async_trait]
pub trait CompletionService: Send + Sync {
    /// Provider name.
    fn name(&self) -> &str;

    /// Send one request and return the full buffered reply.
    async fn complete(&self, request: &CompletionRequest) -> Result<String>;
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_retryable_classification() {
        assert!(AttemptError::Network("refused".into()).is_retryable());
        assert!(!AttemptError::Body("reset".into()).is_retryable());
        for status in [429u16, 500, 502, 503, 599] {
            let err = AttemptError::Status { status, body: String::new() };
            assert!(err.is_retryable(), "{} should be retryable", status);
        }
        for status in [400u16, 401, 403, 404, 422] {
            let err = AttemptError::Status { status, body: String::new() };
            assert!(!err.is_retryable(), "{} should not be retryable", status);
        }
    }

    #[test]
    fn test_request_wire_shape() {
        let request = CompletionRequest::new("c1", "hello")
            .with_system_prompt("be brief")
            .with_metadata(serde_json::json!({"isGroup": false}));

        let value = serde_json::to_value(&request).unwrap();
        assert_eq!(value["identityKey"], "c1");
        assert_eq!(value["message"], "hello");
        assert_eq!(value["systemPrompt"], "be brief");
        assert_eq!(value["metadata"]["isGroup"], false);

        let bare = serde_json::to_value(CompletionRequest::new("c1", "x")).unwrap();
        assert!(bare.get("systemPrompt").is_none());
        assert!(bare.get("metadata").is_none());
    }

    #[test]
    fn test_client_error_status() {
        let err = ClientError::RetriesExhausted {
            operation: "chat".into(),
            attempts: 3,
            last: AttemptError::Status { status: 503, body: "busy".into() },
        };
        assert_eq!(err.status(), Some(503));
        assert!(err.to_string().contains("after 3 attempts"));
        assert!(err.to_string().contains("503"));
    }
}
