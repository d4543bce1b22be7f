//! Core dispatch pipeline.
//!
//! - Inbound message types
//! - Per-conversation rate limiting
//! - Per-conversation FIFO queues with a global concurrency ceiling

pub mod message;
pub mod queue;
pub mod rate_limit;

pub use message::{InboundMessage, MediaAttachment, QueuedMessage};
pub use queue::{DispatchError, DispatchQueue, DispatchStats, MessageProcessor, ProcessOutcome};
pub use rate_limit::{RateLimitEntry, RateLimiter, RateLimiterStats};
