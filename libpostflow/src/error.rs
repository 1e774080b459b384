//! Error types for Postflow

use thiserror::Error;

use crate::types::PostStatus;

pub type Result<T> = std::result::Result<T, PostflowError>;

#[derive(Error, Debug)]
pub enum PostflowError {
    #[error("Configuration error: {0}")]
    Config(#[from] ConfigError),

    #[error("Database error: {0}")]
    Database(#[from] DbError),

    #[error("Publish error: {0}")]
    Publish(#[from] PublishError),

    #[error("Invalid input: {0}")]
    InvalidInput(String),

    #[error("Illegal status transition: {from} -> {to}")]
    InvalidTransition { from: PostStatus, to: PostStatus },

    #[error("Post not found: {0}")]
    NotFound(i64),

    /// A scheduler iteration stopped on a storage failure
    #[error("Scheduler check aborted: {0}")]
    CheckAborted(String),
}

impl PostflowError {
    /// Returns the appropriate exit code for this error
    pub fn exit_code(&self) -> i32 {
        match self {
            PostflowError::InvalidInput(_) => 3,
            PostflowError::InvalidTransition { .. } => 3,
            PostflowError::NotFound(_) => 3,
            PostflowError::Config(_) => 2,
            PostflowError::Database(_) => 2,
            PostflowError::CheckAborted(_) => 2,
            PostflowError::Publish(_) => 1,
        }
    }
}

impl From<sqlx::Error> for PostflowError {
    fn from(err: sqlx::Error) -> Self {
        PostflowError::Database(DbError::SqlxError(err))
    }
}

#[derive(Error, Debug)]
pub enum ConfigError {
    #[error("Failed to read config file: {0}")]
    ReadError(#[from] std::io::Error),

    #[error("Failed to parse config: {0}")]
    ParseError(#[from] toml::de::Error),

    #[error("Missing required field: {0}")]
    MissingField(String),

    #[error("Invalid value for {field}: {reason}")]
    InvalidValue { field: String, reason: String },
}

#[derive(Error, Debug)]
pub enum DbError {
    #[error("Database operation failed: {0}")]
    SqlxError(#[from] sqlx::Error),

    #[error("Migration failed: {0}")]
    MigrationError(#[from] sqlx::migrate::MigrateError),

    #[error("Migration failed and the pre-migration backup was restored from {backup}: {source}")]
    MigrationRolledBack {
        backup: String,
        #[source]
        source: sqlx::migrate::MigrateError,
    },

    #[error("IO error: {0}")]
    IoError(#[from] std::io::Error),

    #[error("Corrupt row in {table}: {reason}")]
    CorruptRow { table: &'static str, reason: String },
}

/// Failure reported by a [`Publisher`](crate::publisher::Publisher).
///
/// The display text is what ends up in a failed post's `error_message`, so
/// publisher-supplied messages are rendered verbatim.
#[derive(Error, Debug, Clone, PartialEq, Eq)]
pub enum PublishError {
    #[error("{0}")]
    Failed(String),

    #[error("Publisher timed out after {0}s")]
    Timeout(u64),

    #[error("Publisher could not be started: {0}")]
    Spawn(String),
}
