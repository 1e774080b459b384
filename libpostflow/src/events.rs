//! Scheduler observation
//!
//! [`SchedulerObserver`] receives notifications from the scheduler for
//! observability only; nothing an observer does changes a post's outcome.
//! [`EventBus`] is an observer that fans events out over a
//! `tokio::sync::broadcast` channel to any number of subscribers.
//!
//! # Example
//!
//! ```no_run
//! use libpostflow::events::{Event, EventBus};
//!
//! # async fn example() {
//! let bus = EventBus::new(100);
//! let mut receiver = bus.subscribe();
//!
//! bus.emit(Event::SchedulerError { error: "disk full".to_string() });
//!
//! if let Ok(event) = receiver.recv().await {
//!     println!("{:?}", event);
//! }
//! # }
//! ```

use serde::{Deserialize, Serialize};
use tokio::sync::broadcast;

use crate::scheduler::CheckSummary;
use crate::types::Post;

/// Hooks invoked by the scheduler. All methods default to no-ops.
pub trait SchedulerObserver: Send + Sync {
    fn on_published(&self, _post: &Post, _remote_post_id: &str) {}

    fn on_failed(&self, _post: &Post, _error: &str) {}

    /// Storage failure that ended an iteration early
    fn on_error(&self, _error: &str) {}

    fn on_iteration(&self, _summary: &CheckSummary) {}
}

pub type EventReceiver = broadcast::Receiver<Event>;

#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
#[serde(tag = "type", rename_all = "snake_case")]
pub enum Event {
    PostPublished {
        post_id: i64,
        title: String,
        remote_post_id: String,
    },

    PostFailed {
        post_id: i64,
        title: String,
        error: String,
    },

    SchedulerError {
        error: String,
    },

    IterationCompleted {
        published: usize,
        failed: usize,
    },
}

#[derive(Clone)]
pub struct EventBus {
    sender: broadcast::Sender<Event>,
}

impl EventBus {
    /// `capacity` is the per-subscriber buffer; lagging subscribers lose the
    /// oldest events.
    pub fn new(capacity: usize) -> Self {
        let (sender, _) = broadcast::channel(capacity);
        Self { sender }
    }

    pub fn subscribe(&self) -> EventReceiver {
        self.sender.subscribe()
    }

    /// Never blocks; dropped when nobody is subscribed.
    pub fn emit(&self, event: Event) {
        let _ = self.sender.send(event);
    }

    pub fn subscriber_count(&self) -> usize {
        self.sender.receiver_count()
    }
}

impl Default for EventBus {
    fn default() -> Self {
        Self::new(100)
    }
}

impl SchedulerObserver for EventBus {
    fn on_published(&self, post: &Post, remote_post_id: &str) {
        self.emit(Event::PostPublished {
            post_id: post.id,
            title: post.title.clone(),
            remote_post_id: remote_post_id.to_string(),
        });
    }

    fn on_failed(&self, post: &Post, error: &str) {
        self.emit(Event::PostFailed {
            post_id: post.id,
            title: post.title.clone(),
            error: error.to_string(),
        });
    }

    fn on_error(&self, error: &str) {
        self.emit(Event::SchedulerError {
            error: error.to_string(),
        });
    }

    fn on_iteration(&self, summary: &CheckSummary) {
        self.emit(Event::IterationCompleted {
            published: summary.published,
            failed: summary.failed,
        });
    }
}
