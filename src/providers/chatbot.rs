//! HTTP client for the hosted chatbot completion service.

use async_trait::async_trait;
use reqwest::Client;
use serde::Serialize;
use std::time::Duration;

use super::provider::{AttemptError, ClientError, CompletionRequest, CompletionService, Result};
use super::retry::RetryPolicy;
use crate::config::ServiceSettings;

/// Wire body for `POST {base_url}/chat`.
#[derive(Serialize)]
#[serde(rename_all = "camelCase")]
struct ChatBody<'a> {
    chatbot_id: &'a str,
    #[serde(flatten)]
    request: &'a CompletionRequest,
}

pub struct ChatbotClient {
    client: Client,
    base_url: String,
    api_key: Option<String>,
    chatbot_id: String,
    request_timeout: Duration,
    retry: RetryPolicy,
}

impl ChatbotClient {
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
            retry,
        })
    }

    pub fn chatbot_id(&self) -> &str {
        &self.chatbot_id
    }

    /// Send one completion request with retry, buffering the streamed reply.
    pub async fn send(&self, request: &CompletionRequest) -> Result<String> {
        let url = format!("{}/chat", self.base_url);
        let body = ChatBody {
            chatbot_id: &self.chatbot_id,
            request,
        };

        self.retry
            .run("chat", |attempt| {
                tracing::debug!(
                    identity_key = %request.identity_key,
                    attempt,
                    "Sending completion request"
                );
                let mut builder = self
                    .client
                    .post(&url)
                    .timeout(self.request_timeout)
                    .json(&body);
                if let Some(key) = &self.api_key {
                    builder = builder.bearer_auth(key);
                }
                async move {
                    let response = builder.send().await.map_err(AttemptError::from)?;
                    read_body(response).await
                }
            })
            .await
    }
}

#[async_trait]
impl CompletionService for ChatbotClient {
    fn name(&self) -> &str {
        "chatbot"
    }

    async fn complete(&self, request: &CompletionRequest) -> Result<String> {
        self.send(request).await
    }
}

/// Turn a response into its full body text, or a status failure.
pub(crate) async fn read_body(
    mut response: reqwest::Response,
) -> std::result::Result<String, AttemptError> {
    let status = response.status();
    if !status.is_success() {
        let body = response.text().await.unwrap_or_default();
        return Err(AttemptError::Status {
            status: status.as_u16(),
            body,
        });
    }

    let mut buf = Vec::new();
    while let Some(chunk) = response
        .chunk()
        .await
        .map_err(|e| AttemptError::Body(e.to_string()))?
    {
        buf.extend_from_slice(&chunk);
    }

    Ok(String::from_utf8_lossy(&buf).into_owned())
}

#[cfg(test)]
mod tests {
    use super::*;
    use wiremock::matchers::{body_partial_json, header, method, path};
    use wiremock::{Mock, MockServer, ResponseTemplate};

    fn test_client(base_url: &str) -> ChatbotClient {
        let service = ServiceSettings {
            base_url: Some(format!("{}/", base_url)),
            api_key: Some("secret".to_string()),
            chatbot_id: Some("bot-1".to_string()),
            ..ServiceSettings::default()
        };
        let retry = RetryPolicy {
            max_attempts: 3,
            base_delay: Duration::from_millis(10),
        };
        ChatbotClient::new(&service, retry).unwrap()
    }

    #[test]
    fn test_new_requires_endpoint() {
        let err = ChatbotClient::new(&ServiceSettings::default(), RetryPolicy::default())
            .err()
            .unwrap();
        assert!(matches!(err, ClientError::Config(_)));
    }

    #[tokio::test]
    async fn test_send_posts_wire_contract() {
        let server = MockServer::start().await;

        Mock::given(method("POST"))
            .and(path("/chat"))
            .and(header("authorization", "Bearer secret"))
            .and(body_partial_json(serde_json::json!({
                "chatbotId": "bot-1",
                "identityKey": "c1",
                "message": "What is malaria?",
                "systemPrompt": "be brief"
            })))
            .respond_with(ResponseTemplate::new(200).set_body_string("Malaria is a disease."))
            .expect(1)
            .mount(&server)
            .await;

        let client = test_client(&server.uri());
        let request =
            CompletionRequest::new("c1", "What is malaria?").with_system_prompt("be brief");
        let text = client.send(&request).await.unwrap();

        assert_eq!(text, "Malaria is a disease.");
    }

    #[tokio::test]
    async fn test_send_retries_server_errors() {
        let server = MockServer::start().await;

        Mock::given(method("POST"))
            .and(path("/chat"))
            .respond_with(ResponseTemplate::new(503).set_body_string("overloaded"))
            .up_to_n_times(2)
            .mount(&server)
            .await;

        Mock::given(method("POST"))
            .and(path("/chat"))
            .respond_with(ResponseTemplate::new(200).set_body_string("third time"))
            .mount(&server)
            .await;

        let client = test_client(&server.uri());
        let text = client.send(&CompletionRequest::new("c1", "hi")).await.unwrap();
        assert_eq!(text, "third time");
    }

    #[tokio::test]
    async fn test_send_does_not_retry_not_found() {
        let server = MockServer::start().await;

        Mock::given(method("POST"))
            .and(path("/chat"))
            .respond_with(ResponseTemplate::new(404).set_body_string("no such bot"))
            .expect(1)
            .mount(&server)
            .await;

        let client = test_client(&server.uri());
        let err = client
            .send(&CompletionRequest::new("c1", "hi"))
            .await
            .unwrap_err();

        assert_eq!(err.status(), Some(404));
        assert!(err.to_string().contains("no such bot"));
    }

    #[tokio::test]
    async fn test_send_gives_up_after_three_attempts() {
        let server = MockServer::start().await;

        Mock::given(method("POST"))
            .and(path("/chat"))
            .respond_with(ResponseTemplate::new(500).set_body_string("boom"))
            .expect(3)
            .mount(&server)
            .await;

        let client = test_client(&server.uri());
        let err = client
            .send(&CompletionRequest::new("c1", "hi"))
            .await
            .unwrap_err();

        assert!(matches!(err, ClientError::RetriesExhausted { attempts: 3, .. }));
        assert_eq!(err.status(), Some(500));
    }
}
