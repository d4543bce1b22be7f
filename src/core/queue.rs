//! In-memory dispatch queue for chatrelay.
//!
//! One FIFO per conversation, a global concurrency ceiling and the
//! per-conversation [`RateLimiter`]. A single dispatcher task admits at most
//! one message per scan and is woken by two signals: a concurrency permit
//! becoming free and the `work_available` notification that every enqueue
//! and every completion raises.
//!
//! Queue state is never persisted; a crash loses queued and in-flight work.

use async_trait::async_trait;
use serde::Serialize;
use std::collections::{HashMap, VecDeque};
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;
use std::time::Duration;
use thiserror::Error;
use tokio::sync::{Mutex, Notify, OwnedSemaphorePermit, Semaphore};
use tokio::task::JoinHandle;
use tokio::time::Instant;

use super::message::QueuedMessage;
use super::rate_limit::{RateLimiter, RateLimiterStats};
use crate::config::DispatchSettings;

#[derive(Error, Debug)]
pub enum DispatchError {
    #[error("Queue for conversation {conversation_id} is full ({limit} pending)")]
    QueueFull {
        conversation_id: String,
        limit: usize,
    },

    #[error("Dispatcher is already running")]
    AlreadyRunning,

    #[error("Dispatcher has been shut down")]
    ShutDown,
}

/// Result of handing one message to a processor.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ProcessOutcome {
    Processed,
    Failed,
}

/// Consumer of admitted messages.
///
/// Implementations report failure through [`ProcessOutcome`]; the queue
/// never retries a message once it has been dequeued.
#[async_trait]
pub trait MessageProcessor: Send + Sync {
    async fn process(&self, message: QueuedMessage) -> ProcessOutcome;
}

/// Process-wide dispatch counters.
#[derive(Debug, Clone, Default, Serialize, PartialEq)]
#[serde(rename_all = "camelCase")]
pub struct DispatchStats {
    pub total_queued: u64,
    pub total_processed: u64,
    pub total_failed: u64,
    pub current_queue_length: usize,
    pub active_workers: usize,
}

impl DispatchStats {
    /// Messages that left the queue and finished, either way.
    pub fn total_completed(&self) -> u64 {
        self.total_processed + self.total_failed
    }
}

impl std::fmt::Display for DispatchStats {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        writeln!(f, "Dispatch Stats:")?;
        writeln!(f, "  Queued:     {}", self.total_queued)?;
        writeln!(f, "  Processed:  {}", self.total_processed)?;
        writeln!(f, "  Failed:     {}", self.total_failed)?;
        writeln!(f, "  Pending:    {}", self.current_queue_length)?;
        write!(f, "  Active:     {}", self.active_workers)
    }
}

enum Admission {
    Ready(QueuedMessage),
    /// Work is pending but every candidate conversation is pacing.
    Wait(Duration),
    Idle,
}

struct DispatchState {
    /// Conversation ids in first-enqueue order; scans follow this order.
    order: Vec<String>,
    queues: HashMap<String, VecDeque<QueuedMessage>>,
    limiter: RateLimiter,
    stats: DispatchStats,
}

impl DispatchState {
    fn new(rate_limit: Duration) -> Self {
        Self {
            order: Vec::new(),
            queues: HashMap::new(),
            limiter: RateLimiter::new(rate_limit),
            stats: DispatchStats::default(),
        }
    }

    fn queue_mut(&mut self, conversation_id: &str) -> &mut VecDeque<QueuedMessage> {
        if !self.queues.contains_key(conversation_id) {
            self.order.push(conversation_id.to_string());
        }
        self.queues
            .entry(conversation_id.to_string())
            .or_default()
    }

    fn recompute_queue_length(&mut self) {
        self.stats.current_queue_length = self.queues.values().map(VecDeque::len).sum();
    }

    fn admit_next(&mut self, now: Instant) -> Admission {
        let mut shortest_wait: Option<Duration> = None;

        for conversation_id in &self.order {
            let Some(queue) = self.queues.get_mut(conversation_id) else {
                continue;
            };
            if queue.is_empty() {
                continue;
            }

            let wait = self.limiter.check_at(conversation_id, now);
            if !wait.is_zero() {
                shortest_wait = Some(shortest_wait.map_or(wait, |s| s.min(wait)));
                continue;
            }

            if let Some(message) = queue.pop_front() {
                self.stats.active_workers += 1;
                self.stats.current_queue_length =
                    self.stats.current_queue_length.saturating_sub(1);
                return Admission::Ready(message);
            }
        }

        shortest_wait.map_or(Admission::Idle, Admission::Wait)
    }

    fn complete(&mut self, conversation_id: &str, outcome: ProcessOutcome, now: Instant) {
        self.stats.active_workers = self.stats.active_workers.saturating_sub(1);
        match outcome {
            ProcessOutcome::Processed => self.stats.total_processed += 1,
            ProcessOutcome::Failed => self.stats.total_failed += 1,
        }
        self.limiter.record_at(conversation_id, now);
    }
}

/// Per-conversation queues with global admission control.
pub struct DispatchQueue {
    state: Mutex<DispatchState>,
    permits: Arc<Semaphore>,
    work_available: Notify,
    shutdown: Notify,
    running: AtomicBool,
    stopped: AtomicBool,
    max_concurrency: usize,
    max_queue_per_chat: Option<usize>,
    processor: Arc<dyn MessageProcessor>,
}

impl DispatchQueue {
    pub fn new(settings: &DispatchSettings, processor: Arc<dyn MessageProcessor>) -> Arc<Self> {
        let max_concurrency = settings.max_concurrency.max(1);
        Arc::new(Self {
            state: Mutex::new(DispatchState::new(settings.rate_limit())),
            permits: Arc::new(Semaphore::new(max_concurrency)),
            work_available: Notify::new(),
            shutdown: Notify::new(),
            running: AtomicBool::new(false),
            stopped: AtomicBool::new(false),
            max_concurrency,
            max_queue_per_chat: settings.max_queue_per_chat,
            processor,
        })
    }

    /// Append a message to its conversation's queue.
    ///
    /// Returns the number of messages now pending for that conversation.
    pub async fn enqueue(&self, message: QueuedMessage) -> Result<usize, DispatchError> {
        if self.stopped.load(Ordering::SeqCst) {
            return Err(DispatchError::ShutDown);
        }

        let conversation_id = message.conversation_id.clone();
        let message_id = message.message_id.clone();

        let pending = {
            let mut state = self.state.lock().await;
            let limit = self.max_queue_per_chat;
            let queue = state.queue_mut(&conversation_id);
            if let Some(limit) = limit {
                if queue.len() >= limit {
                    return Err(DispatchError::QueueFull {
                        conversation_id,
                        limit,
                    });
                }
            }
            queue.push_back(message);
            let pending = queue.len();

            state.stats.total_queued += 1;
            state.stats.current_queue_length += 1;
            pending
        };

        tracing::debug!(
            conversation_id = %conversation_id,
            message_id = %message_id,
            pending,
            "Enqueued message"
        );
        self.work_available.notify_one();
        Ok(pending)
    }

    /// Spawn the dispatcher loop.
    pub fn start(self: &Arc<Self>) -> Result<JoinHandle<()>, DispatchError> {
        if self.stopped.load(Ordering::SeqCst) {
            return Err(DispatchError::ShutDown);
        }
        if self.running.swap(true, Ordering::SeqCst) {
            return Err(DispatchError::AlreadyRunning);
        }

        tracing::info!(
            max_concurrency = self.max_concurrency,
            "Dispatcher started"
        );
        Ok(tokio::spawn(Arc::clone(self).run()))
    }

    /// Stop admitting messages. In-flight work is left to finish on its own.
    pub fn shutdown(&self) {
        if !self.stopped.swap(true, Ordering::SeqCst) {
            tracing::info!("Dispatcher stopping");
            self.shutdown.notify_one();
        }
    }

    async fn run(self: Arc<Self>) {
        loop {
            if self.stopped.load(Ordering::SeqCst) {
                break;
            }

            let permit = tokio::select! {
                permit = Arc::clone(&self.permits).acquire_owned() => match permit {
                    Ok(permit) => permit,
                    Err(_) => break,
                },
                _ = self.shutdown.notified() => break,
            };

            let admission = {
                let mut state = self.state.lock().await;
                state.admit_next(Instant::now())
            };

            match admission {
                Admission::Ready(message) => self.dispatch(message, permit),
                Admission::Wait(wait) => {
                    drop(permit);
                    tokio::select! {
                        _ = self.work_available.notified() => {}
                        _ = tokio::time::sleep(wait) => {}
                        _ = self.shutdown.notified() => break,
                    }
                }
                Admission::Idle => {
                    drop(permit);
                    tokio::select! {
                        _ = self.work_available.notified() => {}
                        _ = self.shutdown.notified() => break,
                    }
                }
            }
        }

        self.running.store(false, Ordering::SeqCst);
        tracing::info!("Dispatcher stopped");
    }

    fn dispatch(self: &Arc<Self>, message: QueuedMessage, permit: OwnedSemaphorePermit) {
        let queue = Arc::clone(self);

        tokio::spawn(async move {
            let conversation_id = message.conversation_id.clone();
            let message_id = message.message_id.clone();
            tracing::debug!(
                conversation_id = %conversation_id,
                message_id = %message_id,
                "Admitted message"
            );

            // Run the processor in its own task so a panic is contained and
            // the counters below are still settled.
            let processor = Arc::clone(&queue.processor);
            let outcome = match tokio::spawn(async move { processor.process(message).await }).await
            {
                Ok(outcome) => outcome,
                Err(e) => {
                    tracing::error!(
                        conversation_id = %conversation_id,
                        message_id = %message_id,
                        "Processor task aborted: {}",
                        e
                    );
                    ProcessOutcome::Failed
                }
            };

            {
                let mut state = queue.state.lock().await;
                state.complete(&conversation_id, outcome, Instant::now());
            }
            drop(permit);

            tracing::debug!(
                conversation_id = %conversation_id,
                message_id = %message_id,
                ?outcome,
                "Completed message"
            );
            queue.work_available.notify_one();
        });
    }

    /// Discard every queued (not in-flight) message and reset pacing.
    /// Returns how many messages were dropped.
    pub async fn clear_all(&self) -> usize {
        let mut state = self.state.lock().await;
        let dropped = state.stats.current_queue_length;
        for queue in state.queues.values_mut() {
            queue.clear();
        }
        state.limiter.clear_all();
        state.recompute_queue_length();
        tracing::info!(dropped, "Cleared all conversation queues");
        dropped
    }

    /// Discard queued messages for one conversation and reset its pacing.
    /// Returns how many messages were dropped.
    pub async fn clear_chat(&self, conversation_id: &str) -> usize {
        let mut state = self.state.lock().await;
        let dropped = state
            .queues
            .get_mut(conversation_id)
            .map(|queue| {
                let n = queue.len();
                queue.clear();
                n
            })
            .unwrap_or(0);
        state.limiter.clear(conversation_id);
        state.recompute_queue_length();
        tracing::info!(conversation_id = %conversation_id, dropped, "Cleared conversation queue");
        dropped
    }

    pub async fn stats(&self) -> DispatchStats {
        self.state.lock().await.stats.clone()
    }

    pub async fn rate_limiter_stats(&self) -> RateLimiterStats {
        self.state.lock().await.limiter.stats()
    }

    /// Snapshot of the messages still waiting for one conversation.
    pub async fn pending(&self, conversation_id: &str) -> Vec<QueuedMessage> {
        self.state
            .lock()
            .await
            .queues
            .get(conversation_id)
            .map(|queue| queue.iter().cloned().collect())
            .unwrap_or_default()
    }

    pub fn max_concurrency(&self) -> usize {
        self.max_concurrency
    }

    pub fn is_running(&self) -> bool {
        self.running.load(Ordering::SeqCst)
    }
}
