//! Postflow - scheduled publication of social media posts
//!
//! This library holds the post lifecycle state machine, its SQLite storage
//! and audit log, and the scheduler that publishes due posts through a
//! pluggable [`Publisher`](publisher::Publisher).

pub mod config;
pub mod db;
pub mod error;
pub mod events;
pub mod logging;
pub mod publisher;
pub mod scheduler;
pub mod scheduling;
pub mod stats;
pub mod types;

// Re-export commonly used types
pub use config::Config;
pub use db::{Database, PostStats};
pub use error::{PostflowError, Result};
pub use scheduler::{CheckSummary, Scheduler, SchedulerConfig};
pub use stats::SchedulerStatistics;
pub use types::{ActivityAction, ActivityLogEntry, ContentTone, MediaType, Post, PostStatus};
