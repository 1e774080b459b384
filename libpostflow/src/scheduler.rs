//! Scheduler engine
//!
//! One background task polls storage for due posts and drives each through
//! `scheduled -> processing -> published | failed`. The claim into
//! `processing` is a compare-and-set in storage, so a post that another
//! iteration already took is skipped rather than published twice.
//!
//! Publisher failures are routine: they are recorded on the post and never
//! abort the batch. Storage failures end the iteration early and are
//! reported to the observer; the loop carries on at the next tick.

use futures::FutureExt;
use serde::Serialize;
use std::any::Any;
use std::panic::AssertUnwindSafe;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::{Arc, Mutex, PoisonError};
use std::time::Duration;
use tokio::sync::Notify;
use tokio::task::JoinHandle;

use crate::config::SchedulerSettings;
use crate::db::Database;
use crate::error::{PostflowError, PublishError, Result};
use crate::events::SchedulerObserver;
use crate::publisher::Publisher;
use crate::stats::{self, SchedulerStatistics};
use crate::types::{Post, PostStatus};

/// Message recorded on posts found in `processing` at startup.
pub const STRANDED_REASON: &str =
    "Publication was interrupted before its outcome was recorded";

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct SchedulerConfig {
    pub poll_interval: Duration,
    /// Pause between two posts of the same iteration
    pub publish_pause: Duration,
    /// Upper bound on how long `stop` waits for the loop
    pub stop_timeout: Duration,
    pub publish_timeout: Duration,
}

impl Default for SchedulerConfig {
    fn default() -> Self {
        Self::from(&SchedulerSettings::default())
    }
}

impl From<&SchedulerSettings> for SchedulerConfig {
    fn from(settings: &SchedulerSettings) -> Self {
        Self {
            poll_interval: Duration::from_secs(settings.poll_interval),
            publish_pause: Duration::from_secs(settings.publish_pause),
            stop_timeout: Duration::from_secs(settings.stop_timeout),
            publish_timeout: Duration::from_secs(settings.publish_timeout),
        }
    }
}

/// Outcome of one iteration
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize)]
pub struct CheckSummary {
    pub published: usize,
    pub failed: usize,
    /// Storage error that ended the iteration early
    pub error: Option<String>,
}

enum Outcome {
    Published,
    Failed,
    Skipped,
}

pub struct Scheduler {
    engine: Arc<Engine>,
    worker: Mutex<Option<JoinHandle<()>>>,
}

struct Engine {
    db: Database,
    publisher: Arc<dyn Publisher>,
    config: SchedulerConfig,
    observer: Option<Arc<dyn SchedulerObserver>>,
    running: AtomicBool,
    stop_requested: AtomicBool,
    wake: Notify,
}

impl Scheduler {
    pub fn new(db: Database, publisher: Arc<dyn Publisher>, config: SchedulerConfig) -> Self {
        Self::build(db, publisher, config, None)
    }

    pub fn with_observer(
        db: Database,
        publisher: Arc<dyn Publisher>,
        config: SchedulerConfig,
        observer: Arc<dyn SchedulerObserver>,
    ) -> Self {
        Self::build(db, publisher, config, Some(observer))
    }

    fn build(
        db: Database,
        publisher: Arc<dyn Publisher>,
        config: SchedulerConfig,
        observer: Option<Arc<dyn SchedulerObserver>>,
    ) -> Self {
        Self {
            engine: Arc::new(Engine {
                db,
                publisher,
                config,
                observer,
                running: AtomicBool::new(false),
                stop_requested: AtomicBool::new(false),
                wake: Notify::new(),
            }),
            worker: Mutex::new(None),
        }
    }

    pub fn config(&self) -> &SchedulerConfig {
        &self.engine.config
    }

    pub fn database(&self) -> &Database {
        &self.engine.db
    }

    pub fn is_running(&self) -> bool {
        self.engine.running.load(Ordering::SeqCst)
    }

    /// Spawn the polling loop. Calling it while running only logs a warning.
    ///
    /// Must be called from within a tokio runtime.
    pub fn start(&self) {
        if self.engine.running.swap(true, Ordering::SeqCst) {
            tracing::warn!("Scheduler is already running");
            return;
        }
        self.engine.stop_requested.store(false, Ordering::SeqCst);

        let engine = Arc::clone(&self.engine);
        let handle = tokio::spawn(async move {
            if let Err(panic) = AssertUnwindSafe(engine.run_loop()).catch_unwind().await {
                tracing::error!(panic = %panic_message(&panic), "Scheduler loop panicked");
            }
            engine.running.store(false, Ordering::SeqCst);
        });

        *self.worker.lock().unwrap_or_else(PoisonError::into_inner) = Some(handle);
    }

    /// Ask the loop to finish and wait for it, at most `stop_timeout`.
    ///
    /// The in-flight post, if any, is allowed to reach its final status. If
    /// the wait times out the task is left to finish on its own.
    pub async fn stop(&self) {
        let handle = self
            .worker
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
            .take();
        let Some(handle) = handle else {
            tracing::debug!("Scheduler is not running");
            return;
        };

        self.engine.stop_requested.store(true, Ordering::SeqCst);
        self.engine.wake.notify_one();

        match tokio::time::timeout(self.engine.config.stop_timeout, handle).await {
            Ok(Ok(())) => tracing::info!("Scheduler stopped"),
            Ok(Err(e)) => tracing::error!(error = %e, "Scheduler task ended abnormally"),
            Err(_) => tracing::warn!(
                timeout_secs = self.engine.config.stop_timeout.as_secs_f64(),
                "Scheduler did not stop in time, continuing shutdown"
            ),
        }
    }

    /// Run one iteration now, independently of the timer.
    pub async fn manual_check(&self) -> CheckSummary {
        tracing::info!("Running manual check");
        self.engine.run_iteration(false).await
    }

    /// Move up to `max` publishable failed posts back to `scheduled`, due now.
    pub async fn retry_failed(&self, max: usize) -> Result<usize> {
        self.engine.db.retry_failed(max).await
    }

    /// Fail every post left in `processing` by an earlier run.
    pub async fn recover_stranded(&self) -> Result<u64> {
        self.engine.db.recover_stranded(STRANDED_REASON).await
    }

    pub async fn statistics(&self) -> Result<SchedulerStatistics> {
        stats::collect(
            &self.engine.db,
            self.is_running(),
            self.engine.config.poll_interval,
        )
        .await
    }
}

impl Engine {
    async fn run_loop(&self) {
        tracing::info!(
            poll_interval_secs = self.config.poll_interval.as_secs_f64(),
            "Scheduler started"
        );

        loop {
            if self.stop_requested.load(Ordering::SeqCst) {
                break;
            }

            let summary = self.run_iteration(true).await;
            if summary.published > 0 || summary.failed > 0 {
                tracing::info!(
                    published = summary.published,
                    failed = summary.failed,
                    "Scheduler iteration finished"
                );
            }

            if self.stop_requested.load(Ordering::SeqCst) {
                break;
            }

            tokio::select! {
                _ = tokio::time::sleep(self.config.poll_interval) => {}
                _ = self.wake.notified() => {}
            }
        }

        tracing::info!("Scheduler loop exited");
    }

    /// One pass over the due posts, earliest first.
    ///
    /// With `honor_stop` the pass ends between posts once a stop has been
    /// requested.
    async fn run_iteration(&self, honor_stop: bool) -> CheckSummary {
        let mut summary = CheckSummary::default();
        let now = chrono::Utc::now().timestamp();

        let due = match self.db.list_due_posts(now).await {
            Ok(posts) => posts,
            Err(e) => {
                self.report_error(&e);
                summary.error = Some(e.to_string());
                self.notify(|o| o.on_iteration(&summary));
                return summary;
            }
        };
        tracing::debug!(due = due.len(), "Checked for due posts");

        let mut attempted = false;
        for post in &due {
            if honor_stop && self.stop_requested.load(Ordering::SeqCst) {
                tracing::info!("Stop requested, leaving remaining due posts for later");
                break;
            }
            if attempted && !self.config.publish_pause.is_zero() {
                tokio::time::sleep(self.config.publish_pause).await;
            }

            match self.process_post(post).await {
                Ok(Outcome::Published) => {
                    summary.published += 1;
                    attempted = true;
                }
                Ok(Outcome::Failed) => {
                    summary.failed += 1;
                    attempted = true;
                }
                Ok(Outcome::Skipped) => {}
                Err(e) => {
                    self.report_error(&e);
                    summary.error = Some(e.to_string());
                    break;
                }
            }
        }

        self.notify(|o| o.on_iteration(&summary));
        summary
    }

    async fn process_post(&self, listed: &Post) -> Result<Outcome> {
        match self
            .db
            .update_status(listed.id, PostStatus::Processing, None, None)
            .await
        {
            Ok(true) => {}
            Ok(false) | Err(PostflowError::InvalidTransition { .. }) => {
                tracing::debug!(post_id = listed.id, "Post already claimed, skipping");
                return Ok(Outcome::Skipped);
            }
            Err(e) => return Err(e),
        }

        let Some(post) = self.db.get_post(listed.id).await? else {
            return Ok(Outcome::Skipped);
        };

        if let Err(reason) = post.publish_readiness() {
            let message = format!("Post not ready for publication: {}", reason);
            return self.record_failure(&post, &message).await;
        }

        let media_path = post.media_path().unwrap_or_default();
        let caption = post.caption();
        tracing::info!(
            post_id = post.id,
            publisher = self.publisher.name(),
            "Publishing post"
        );

        match self.publish(media_path, &caption).await {
            Ok(remote_id) => {
                match self
                    .db
                    .update_status(post.id, PostStatus::Published, None, Some(&remote_id))
                    .await
                {
                    Ok(true) => {}
                    Ok(false) | Err(PostflowError::InvalidTransition { .. }) => {
                        tracing::warn!(
                            post_id = post.id,
                            remote_post_id = %remote_id,
                            "Post changed while publishing, remote id not recorded"
                        );
                        return Ok(Outcome::Skipped);
                    }
                    Err(e) => return Err(e),
                }
                tracing::info!(post_id = post.id, remote_post_id = %remote_id, "Post published");
                self.notify(|o| o.on_published(&post, &remote_id));
                Ok(Outcome::Published)
            }
            Err(e) => self.record_failure(&post, &e.to_string()).await,
        }
    }

    /// Call the publisher, turning timeouts, panics and empty ids into
    /// errors.
    async fn publish(
        &self,
        media_path: &str,
        caption: &str,
    ) -> std::result::Result<String, PublishError> {
        let attempt = AssertUnwindSafe(self.publisher.publish(media_path, caption)).catch_unwind();

        let result = match tokio::time::timeout(self.config.publish_timeout, attempt).await {
            Ok(Ok(result)) => result,
            Ok(Err(panic)) => Err(PublishError::Failed(format!(
                "Publisher panicked: {}",
                panic_message(&panic)
            ))),
            Err(_) => Err(PublishError::Timeout(self.config.publish_timeout.as_secs())),
        };

        let remote_id = result?;
        let remote_id = remote_id.trim();
        if remote_id.is_empty() {
            return Err(PublishError::Failed(
                "Publisher returned an empty post id".to_string(),
            ));
        }
        Ok(remote_id.to_string())
    }

    async fn record_failure(&self, post: &Post, message: &str) -> Result<Outcome> {
        match self
            .db
            .update_status(post.id, PostStatus::Failed, Some(message), None)
            .await
        {
            Ok(true) => {}
            Ok(false) | Err(PostflowError::InvalidTransition { .. }) => {
                tracing::warn!(post_id = post.id, error = %message, "Post changed while publishing");
                return Ok(Outcome::Skipped);
            }
            Err(e) => return Err(e),
        }
        tracing::warn!(post_id = post.id, error = %message, "Post failed");
        self.notify(|o| o.on_failed(post, message));
        Ok(Outcome::Failed)
    }

    fn report_error(&self, error: &PostflowError) {
        tracing::error!(error = %error, "Scheduler iteration aborted");
        let message = error.to_string();
        self.notify(|o| o.on_error(&message));
    }

    fn notify<F>(&self, f: F)
    where
        F: FnOnce(&dyn SchedulerObserver),
    {
        let Some(observer) = &self.observer else {
            return;
        };
        if let Err(panic) = std::panic::catch_unwind(AssertUnwindSafe(|| f(observer.as_ref()))) {
            tracing::warn!(panic = %panic_message(&panic), "Scheduler observer panicked");
        }
    }
}

fn panic_message(panic: &Box<dyn Any + Send>) -> String {
    if let Some(message) = panic.downcast_ref::<&str>() {
        message.to_string()
    } else if let Some(message) = panic.downcast_ref::<String>() {
        message.clone()
    } else {
        "unknown panic".to_string()
    }
}
