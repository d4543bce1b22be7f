//! Error types for chatrelay.

use thiserror::Error;

use crate::agent::ToolError;
use crate::core::DispatchError;
use crate::providers::ClientError;

pub type Result<T> = std::result::Result<T, Error>;

#[derive(Error, Debug)]
pub enum Error {
    #[error("Configuration error: {0}")]
    Config(String),

    #[error("IO error: {0}")]
    Io(#[from] std::io::Error),

    #[error("JSON error: {0}")]
    Json(#[from] serde_json::Error),

    #[error("Dispatch error: {0}")]
    Dispatch(#[from] DispatchError),

    #[error("Client error: {0}")]
    Client(#[from] ClientError),

    #[error("Tool error: {0}")]
    Tool(#[from] ToolError),

    #[error("Web error: {0}")]
    Web(String),

    #[error("{0}")]
    Other(String),
}
