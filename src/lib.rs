//! chatrelay library root.

pub mod agent;
pub mod channels;
pub mod cli;
pub mod config;
pub mod core;
pub mod error;
pub mod logging;
pub mod providers;
pub mod web;
pub mod worker;

pub use cli::Commands;
pub use config::{load_settings, Settings};
pub use core::{DispatchQueue, DispatchStats, InboundMessage, QueuedMessage};
pub use error::{Error, Result};
pub use providers::{ChatbotClient, CompletionService, IngestionClient, RetryPolicy};
pub use worker::{MessageSender, Worker};
