//! API endpoints module.

pub mod messages;
pub mod queue;

pub use messages::enqueue_message;
pub use queue::{clear_all, clear_chat, queue_stats};
