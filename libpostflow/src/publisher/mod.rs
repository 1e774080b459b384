//! Publisher abstraction
//!
//! A [`Publisher`] performs the network side of publication: it receives a
//! media path and a caption and returns the remote post id. It carries no
//! retry policy; failures are recorded on the post by the scheduler.
//!
//! # Examples
//!
//! ```no_run
//! use libpostflow::publisher::{CommandPublisher, Publisher};
//! use std::time::Duration;
//!
//! # async fn example() -> Result<(), libpostflow::error::PublishError> {
//! let publisher = CommandPublisher::new(
//!     "/usr/local/bin/publish-instagram".to_string(),
//!     vec![],
//!     Duration::from_secs(120),
//! );
//! let remote_id = publisher.publish("/media/sunrise.png", "Morning!\n\n#sunrise").await?;
//! println!("Published as {}", remote_id);
//! # Ok(())
//! # }
//! ```

use async_trait::async_trait;

use crate::error::PublishError;

pub mod command;

// Compiled into every build so integration tests and downstream crates can
// drive the scheduler without a network.
pub mod mock;

pub use command::CommandPublisher;
pub use mock::MockPublisher;

#[async_trait]
pub trait Publisher: Send + Sync {
    /// Publish `media_path` with `caption`, returning the remote post id.
    async fn publish(&self, media_path: &str, caption: &str) -> Result<String, PublishError>;

    /// Short label used in logs
    fn name(&self) -> &str {
        "publisher"
    }
}
