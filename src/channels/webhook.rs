//! Delivers replies by POSTing them to a channel bridge.

use async_trait::async_trait;
use reqwest::Client;
use serde::Serialize;
use std::time::Duration;

use crate::config::{OutboundSettings, ServiceSettings};
use crate::error::{Error, Result};
use crate::providers::chatbot::read_body;
use crate::providers::{AttemptError, RetryPolicy};
use crate::worker::MessageSender;

#[derive(Serialize, Debug, Clone, Copy, PartialEq, Eq)]
#[serde(rename_all = "lowercase")]
pub enum ReplyKind {
    Response,
    Fallback,
}

#[derive(Serialize, Debug)]
#[serde(rename_all = "camelCase")]
struct ReplyBody<'a> {
    conversation_id: &'a str,
    #[serde(skip_serializing_if = "Option::is_none")]
    message_id: Option<&'a str>,
    text: &'a str,
    kind: ReplyKind,
}

pub struct WebhookSender {
    client: Client,
    url: String,
    fallback_text: String,
    timeout: Duration,
    retry: RetryPolicy,
}

impl WebhookSender {
    pub fn new(
        outbound: &OutboundSettings,
        service: &ServiceSettings,
        retry: RetryPolicy,
    ) -> Result<Self> {
        let url = outbound
            .response_url
            .clone()
            .ok_or_else(|| Error::Config("outbound.response_url is not set".to_string()))?;

        Ok(Self {
            client: Client::new(),
            url,
            fallback_text: outbound.fallback_text.clone(),
            timeout: Duration::from_secs(service.request_timeout_secs),
            retry,
        })
    }

    async fn post(&self, body: &ReplyBody<'_>) -> Result<()> {
        self.retry
            .run("deliver_reply", |_| {
                let builder = self.client.post(&self.url).timeout(self.timeout).json(body);
                async move {
                    let response = builder.send().await.map_err(AttemptError::from)?;
                    read_body(response).await.map(|_| ())
                }
            })
            .await?;
        Ok(())
    }
}

#[async_trait]
impl MessageSender for WebhookSender {
    async fn send_response(
        &self,
        conversation_id: &str,
        message_id: &str,
        text: &str,
    ) -> Result<()> {
        self.post(&ReplyBody {
            conversation_id,
            message_id: Some(message_id),
            text,
            kind: ReplyKind::Response,
        })
        .await
    }

    async fn send_fallback(&self, conversation_id: &str) -> Result<()> {
        self.post(&ReplyBody {
            conversation_id,
            message_id: None,
            text: &self.fallback_text,
            kind: ReplyKind::Fallback,
        })
        .await
    }
}
