//! Outbound reply channels.

use std::sync::Arc;

pub mod log;
pub mod webhook;

pub use log::LogSender;
pub use webhook::WebhookSender;

use crate::config::Settings;
use crate::error::Result;
use crate::providers::RetryPolicy;
use crate::worker::MessageSender;

/// Webhook delivery when `outbound.response_url` is set, log-only otherwise.
pub fn create_sender(settings: &Settings) -> Result<Arc<dyn MessageSender>> {
    if settings.outbound.response_url.is_some() {
        let retry = RetryPolicy::from_settings(&settings.retry);
        let sender = WebhookSender::new(&settings.outbound, &settings.service, retry)?;
        return Ok(Arc::new(sender));
    }

    tracing::warn!("outbound.response_url not set; replies will only be logged");
    Ok(Arc::new(LogSender::new(settings.outbound.fallback_text.clone())))
}
