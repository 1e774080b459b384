//! Mock publisher for testing
//!
//! Configurable outcome and latency, with shared call recording so a test can
//! keep a handle after passing a clone to the scheduler.

use async_trait::async_trait;
use std::collections::HashMap;
use std::sync::{Arc, Mutex, PoisonError};
use std::time::Duration;
use tokio::time::sleep;

use crate::error::PublishError;
use crate::publisher::Publisher;

/// What the mock does when called
#[derive(Debug, Clone, PartialEq)]
pub enum MockOutcome {
    /// Return this remote id
    Succeed(String),
    /// Return `mock_<n>` where `n` counts calls from 1
    Sequential,
    /// Fail with this message
    Fail(String),
    /// Return an empty id
    EmptyId,
    /// Panic inside `publish`
    Panic,
}

/// A recorded `publish` call
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct PublishCall {
    pub media_path: String,
    pub caption: String,
}

#[derive(Debug, Clone)]
pub struct MockPublisher {
    outcome: MockOutcome,
    /// Per-media-path failures that override `outcome`
    failures: HashMap<String, String>,
    delay: Duration,
    calls: Arc<Mutex<Vec<PublishCall>>>,
}

impl MockPublisher {
    pub fn new(outcome: MockOutcome) -> Self {
        Self {
            outcome,
            failures: HashMap::new(),
            delay: Duration::ZERO,
            calls: Arc::new(Mutex::new(Vec::new())),
        }
    }

    /// Always succeeds with `remote_id`
    pub fn success(remote_id: &str) -> Self {
        Self::new(MockOutcome::Succeed(remote_id.to_string()))
    }

    pub fn sequential() -> Self {
        Self::new(MockOutcome::Sequential)
    }

    /// Always fails with `error`
    pub fn failure(error: &str) -> Self {
        Self::new(MockOutcome::Fail(error.to_string()))
    }

    pub fn with_delay(mut self, delay: Duration) -> Self {
        self.delay = delay;
        self
    }

    /// Fail only for `media_path`
    pub fn with_failure_for(mut self, media_path: &str, error: &str) -> Self {
        self.failures
            .insert(media_path.to_string(), error.to_string());
        self
    }

    pub fn call_count(&self) -> usize {
        self.calls.lock().unwrap_or_else(PoisonError::into_inner).len()
    }

    pub fn calls(&self) -> Vec<PublishCall> {
        self.calls
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
            .clone()
    }
}

#[async_trait]
impl Publisher for MockPublisher {
    async fn publish(&self, media_path: &str, caption: &str) -> Result<String, PublishError> {
        let call_number = {
            let mut calls = self.calls.lock().unwrap_or_else(PoisonError::into_inner);
            calls.push(PublishCall {
                media_path: media_path.to_string(),
                caption: caption.to_string(),
            });
            calls.len()
        };

        if !self.delay.is_zero() {
            sleep(self.delay).await;
        }

        if let Some(error) = self.failures.get(media_path) {
            return Err(PublishError::Failed(error.clone()));
        }

        match &self.outcome {
            MockOutcome::Succeed(remote_id) => Ok(remote_id.clone()),
            MockOutcome::Sequential => Ok(format!("mock_{}", call_number)),
            MockOutcome::Fail(error) => Err(PublishError::Failed(error.clone())),
            MockOutcome::EmptyId => Ok(String::new()),
            MockOutcome::Panic => panic!("mock publisher panicked"),
        }
    }

    fn name(&self) -> &str {
        "mock"
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[tokio::test]
    async fn test_success_records_calls() {
        let publisher = MockPublisher::success("ig_123");
        let handle = publisher.clone();

        let remote_id = publisher.publish("/tmp/a.png", "hello").await.unwrap();
        assert_eq!(remote_id, "ig_123");
        assert_eq!(handle.call_count(), 1);
        assert_eq!(
            handle.calls(),
            vec![PublishCall {
                media_path: "/tmp/a.png".to_string(),
                caption: "hello".to_string(),
            }]
        );
    }

    #[tokio::test]
    async fn test_sequential_ids() {
        let publisher = MockPublisher::sequential();
        assert_eq!(publisher.publish("a", "").await.unwrap(), "mock_1");
        assert_eq!(publisher.publish("b", "").await.unwrap(), "mock_2");
    }

    #[tokio::test]
    async fn test_failure_for_single_path() {
        let publisher = MockPublisher::success("ok").with_failure_for("/tmp/bad.png", "boom");

        assert_eq!(publisher.publish("/tmp/good.png", "").await.unwrap(), "ok");
        assert_eq!(
            publisher.publish("/tmp/bad.png", "").await,
            Err(PublishError::Failed("boom".to_string()))
        );
        assert_eq!(publisher.call_count(), 2);
    }
}
