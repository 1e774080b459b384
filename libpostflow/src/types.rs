//! Core types for Postflow

use serde::{Deserialize, Serialize};
use std::fmt;
use std::str::FromStr;

use crate::error::{PostflowError, Result};

/// Lifecycle status of a post.
///
/// ```text
/// draft ──► scheduled ──► processing ──► published
///   ▲           │  ▲           │
///   └───────────┘  │           ▼
///                  └──────── failed
/// ```
///
/// All legality checks go through [`PostStatus::can_transition_to`].
#[derive(Debug, Clone, Copy, Serialize, Deserialize, PartialEq, Eq, Hash, PartialOrd, Ord)]
#[serde(rename_all = "lowercase")]
pub enum PostStatus {
    Draft,
    Scheduled,
    Processing,
    Published,
    Failed,
}

impl PostStatus {
    pub const ALL: [PostStatus; 5] = [
        PostStatus::Draft,
        PostStatus::Scheduled,
        PostStatus::Processing,
        PostStatus::Published,
        PostStatus::Failed,
    ];

    pub fn as_str(&self) -> &'static str {
        match self {
            PostStatus::Draft => "draft",
            PostStatus::Scheduled => "scheduled",
            PostStatus::Processing => "processing",
            PostStatus::Published => "published",
            PostStatus::Failed => "failed",
        }
    }

    /// The transition table.
    pub fn can_transition_to(self, next: PostStatus) -> bool {
        use PostStatus::*;
        matches!(
            (self, next),
            (Draft, Scheduled)
                | (Scheduled, Processing)
                | (Scheduled, Draft)
                | (Processing, Published)
                | (Processing, Failed)
                | (Failed, Scheduled)
        )
    }

    pub fn is_terminal(self) -> bool {
        matches!(self, PostStatus::Published | PostStatus::Failed)
    }
}

impl fmt::Display for PostStatus {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

impl FromStr for PostStatus {
    type Err = PostflowError;

    fn from_str(s: &str) -> Result<Self> {
        match s.to_lowercase().as_str() {
            "draft" => Ok(PostStatus::Draft),
            "scheduled" => Ok(PostStatus::Scheduled),
            "processing" => Ok(PostStatus::Processing),
            "published" => Ok(PostStatus::Published),
            "failed" => Ok(PostStatus::Failed),
            other => Err(PostflowError::InvalidInput(format!(
                "Unknown status '{}'. Valid options: draft, scheduled, processing, published, failed",
                other
            ))),
        }
    }
}

/// Tone requested from the content generator
#[derive(Debug, Clone, Copy, Serialize, Deserialize, PartialEq, Eq, Default)]
#[serde(rename_all = "lowercase")]
pub enum ContentTone {
    #[default]
    Engaging,
    Professional,
    Casual,
    Inspiring,
    Humorous,
    Educational,
}

impl ContentTone {
    pub fn as_str(&self) -> &'static str {
        match self {
            ContentTone::Engaging => "engaging",
            ContentTone::Professional => "professional",
            ContentTone::Casual => "casual",
            ContentTone::Inspiring => "inspiring",
            ContentTone::Humorous => "humorous",
            ContentTone::Educational => "educational",
        }
    }
}

impl fmt::Display for ContentTone {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

impl FromStr for ContentTone {
    type Err = PostflowError;

    fn from_str(s: &str) -> Result<Self> {
        match s.to_lowercase().as_str() {
            "engaging" => Ok(ContentTone::Engaging),
            "professional" => Ok(ContentTone::Professional),
            "casual" => Ok(ContentTone::Casual),
            "inspiring" => Ok(ContentTone::Inspiring),
            "humorous" => Ok(ContentTone::Humorous),
            "educational" => Ok(ContentTone::Educational),
            other => Err(PostflowError::InvalidInput(format!("Unknown tone '{}'", other))),
        }
    }
}

#[derive(Debug, Clone, Copy, Serialize, Deserialize, PartialEq, Eq, Default)]
#[serde(rename_all = "lowercase")]
pub enum MediaType {
    #[default]
    Image,
    Video,
}

impl MediaType {
    pub fn as_str(&self) -> &'static str {
        match self {
            MediaType::Image => "image",
            MediaType::Video => "video",
        }
    }
}

impl fmt::Display for MediaType {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

impl FromStr for MediaType {
    type Err = PostflowError;

    fn from_str(s: &str) -> Result<Self> {
        match s.to_lowercase().as_str() {
            "image" => Ok(MediaType::Image),
            "video" => Ok(MediaType::Video),
            other => Err(PostflowError::InvalidInput(format!(
                "Unknown media type '{}'. Valid options: image, video",
                other
            ))),
        }
    }
}

/// A social media post and its publication state.
///
/// `id` is assigned by storage on creation and is `0` until then.
/// Timestamps are Unix seconds.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct Post {
    pub id: i64,
    pub title: String,
    pub description: String,
    pub hashtags: String,
    pub image_prompt: String,
    pub topic: String,
    pub tone: ContentTone,
    pub media_type: MediaType,
    pub image_path: Option<String>,
    pub video_path: Option<String>,
    pub scheduled_time: Option<i64>,
    pub status: PostStatus,
    pub remote_post_id: Option<String>,
    pub error_message: Option<String>,
    pub generation_service: Option<String>,
    pub generation_params: Option<String>,
    pub created_at: i64,
    pub updated_at: i64,
}

impl Post {
    /// A new, unsaved draft
    pub fn new(title: String, description: String, hashtags: String) -> Self {
        let now = chrono::Utc::now().timestamp();
        Self {
            id: 0,
            title,
            description,
            hashtags,
            image_prompt: String::new(),
            topic: String::new(),
            tone: ContentTone::default(),
            media_type: MediaType::default(),
            image_path: None,
            video_path: None,
            scheduled_time: None,
            status: PostStatus::Draft,
            remote_post_id: None,
            error_message: None,
            generation_service: None,
            generation_params: None,
            created_at: now,
            updated_at: now,
        }
    }

    /// Path of the media file matching `media_type`.
    pub fn media_path(&self) -> Option<&str> {
        match self.media_type {
            MediaType::Image => self.image_path.as_deref(),
            MediaType::Video => self.video_path.as_deref(),
        }
    }

    /// Caption sent to the publisher: description, blank line, hashtags.
    pub fn caption(&self) -> String {
        let description = self.description.trim();
        let hashtags = self.hashtags.trim();
        if hashtags.is_empty() {
            description.to_string()
        } else {
            format!("{}\n\n{}", description, hashtags)
        }
    }

    /// Checks the publish preconditions, returning the reason when unmet.
    pub fn publish_readiness(&self) -> std::result::Result<(), String> {
        if self.description.trim().is_empty() {
            return Err("description is empty".to_string());
        }
        match self.media_path() {
            Some(path) if !path.trim().is_empty() => Ok(()),
            _ => Err(format!("no {} path attached", self.media_type)),
        }
    }

    pub fn can_be_published(&self) -> bool {
        self.publish_readiness().is_ok()
    }

    /// Field invariants that must hold for every persisted row.
    pub fn check_invariants(&self) -> Result<()> {
        match self.status {
            PostStatus::Scheduled if self.scheduled_time.is_none() => Err(
                PostflowError::InvalidInput("A scheduled post needs a scheduled_time".to_string()),
            ),
            PostStatus::Published => {
                if self.remote_post_id.as_deref().map_or(true, |id| id.trim().is_empty()) {
                    return Err(PostflowError::InvalidInput(
                        "A published post needs a remote_post_id".to_string(),
                    ));
                }
                self.publish_readiness().map_err(|reason| {
                    PostflowError::InvalidInput(format!("Post cannot be published: {}", reason))
                })
            }
            _ => Ok(()),
        }
    }

    /// Validates moving from `self` (the stored row) to `next`.
    ///
    /// An unchanged status only has its invariants checked. A changed status
    /// must be an edge of the transition table; `draft -> scheduled` further
    /// requires a `scheduled_time` later than `now`.
    pub fn validate_change(&self, next: &Post, now: i64) -> Result<()> {
        if self.status != next.status {
            if !self.status.can_transition_to(next.status) {
                return Err(PostflowError::InvalidTransition {
                    from: self.status,
                    to: next.status,
                });
            }
            if self.status == PostStatus::Draft
                && next.status == PostStatus::Scheduled
                && next.scheduled_time.map_or(true, |at| at <= now)
            {
                return Err(PostflowError::InvalidInput(
                    "Scheduling a draft requires a scheduled_time in the future".to_string(),
                ));
            }
        }
        next.check_invariants()
    }
}

/// Kind of change recorded in the activity log
#[derive(Debug, Clone, Copy, Serialize, Deserialize, PartialEq, Eq)]
#[serde(rename_all = "snake_case")]
pub enum ActivityAction {
    Created,
    Updated,
    StatusChanged,
}

impl ActivityAction {
    pub fn as_str(&self) -> &'static str {
        match self {
            ActivityAction::Created => "created",
            ActivityAction::Updated => "updated",
            ActivityAction::StatusChanged => "status_changed",
        }
    }
}

impl fmt::Display for ActivityAction {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

impl FromStr for ActivityAction {
    type Err = PostflowError;

    fn from_str(s: &str) -> Result<Self> {
        match s {
            "created" => Ok(ActivityAction::Created),
            "updated" => Ok(ActivityAction::Updated),
            "status_changed" => Ok(ActivityAction::StatusChanged),
            other => Err(PostflowError::InvalidInput(format!(
                "Unknown activity action '{}'",
                other
            ))),
        }
    }
}

/// Append-only audit record, written only by the storage layer.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct ActivityLogEntry {
    pub id: i64,
    pub post_id: i64,
    pub action: ActivityAction,
    pub details: Option<String>,
    pub timestamp: i64,
}

#[cfg(test)]
mod tests {
    use super::*;

    fn publishable_post() -> Post {
        let mut post = Post::new(
            "Sunrise".to_string(),
            "Morning light over the bay".to_string(),
            "#sunrise #bay".to_string(),
        );
        post.image_path = Some("/tmp/sunrise.png".to_string());
        post
    }

    #[test]
    fn test_post_new_defaults() {
        let post = Post::new("t".to_string(), "d".to_string(), String::new());
        assert_eq!(post.id, 0);
        assert_eq!(post.status, PostStatus::Draft);
        assert_eq!(post.tone, ContentTone::Engaging);
        assert_eq!(post.media_type, MediaType::Image);
        assert_eq!(post.scheduled_time, None);
        assert_eq!(post.created_at, post.updated_at);
    }

    #[test]
    fn test_transition_table_is_exhaustive() {
        use PostStatus::*;
        let legal = [
            (Draft, Scheduled),
            (Scheduled, Processing),
            (Scheduled, Draft),
            (Processing, Published),
            (Processing, Failed),
            (Failed, Scheduled),
        ];

        for from in PostStatus::ALL {
            for to in PostStatus::ALL {
                assert_eq!(
                    from.can_transition_to(to),
                    legal.contains(&(from, to)),
                    "{} -> {}",
                    from,
                    to
                );
            }
        }
    }

    #[test]
    fn test_published_is_a_dead_end() {
        for to in PostStatus::ALL {
            assert!(!PostStatus::Published.can_transition_to(to));
        }
    }

    #[test]
    fn test_status_round_trips_through_str() {
        for status in PostStatus::ALL {
            assert_eq!(status.as_str().parse::<PostStatus>().unwrap(), status);
        }
        assert!("posted".parse::<PostStatus>().is_err());
    }

    #[test]
    fn test_status_serializes_lowercase() {
        let json = serde_json::to_string(&PostStatus::Processing).unwrap();
        assert_eq!(json, r#""processing""#);
    }

    #[test]
    fn test_caption_joins_description_and_hashtags() {
        let post = publishable_post();
        assert_eq!(post.caption(), "Morning light over the bay\n\n#sunrise #bay");

        let mut bare = post.clone();
        bare.hashtags = "  ".to_string();
        assert_eq!(bare.caption(), "Morning light over the bay");
    }

    #[test]
    fn test_media_path_follows_media_type() {
        let mut post = publishable_post();
        post.video_path = Some("/tmp/clip.mp4".to_string());
        assert_eq!(post.media_path(), Some("/tmp/sunrise.png"));

        post.media_type = MediaType::Video;
        assert_eq!(post.media_path(), Some("/tmp/clip.mp4"));
    }

    #[test]
    fn test_publish_readiness() {
        assert!(publishable_post().can_be_published());

        let mut no_media = publishable_post();
        no_media.image_path = Some(String::new());
        assert_eq!(
            no_media.publish_readiness(),
            Err("no image path attached".to_string())
        );

        let mut no_description = publishable_post();
        no_description.description = "   ".to_string();
        assert_eq!(
            no_description.publish_readiness(),
            Err("description is empty".to_string())
        );
    }

    #[test]
    fn test_invariants_scheduled_requires_time() {
        let mut post = publishable_post();
        post.status = PostStatus::Scheduled;
        assert!(post.check_invariants().is_err());

        post.scheduled_time = Some(1_700_000_000);
        assert!(post.check_invariants().is_ok());
    }

    #[test]
    fn test_invariants_published_requires_remote_id() {
        let mut post = publishable_post();
        post.status = PostStatus::Published;
        assert!(post.check_invariants().is_err());

        post.remote_post_id = Some("ig_1".to_string());
        assert!(post.check_invariants().is_ok());

        post.image_path = None;
        assert!(post.check_invariants().is_err());
    }

    #[test]
    fn test_validate_change_rejects_illegal_edge() {
        let stored = publishable_post();
        let mut next = stored.clone();
        next.status = PostStatus::Processing;

        match stored.validate_change(&next, 0) {
            Err(PostflowError::InvalidTransition { from, to }) => {
                assert_eq!(from, PostStatus::Draft);
                assert_eq!(to, PostStatus::Processing);
            }
            other => panic!("Expected InvalidTransition, got {:?}", other),
        }
    }

    #[test]
    fn test_validate_change_draft_to_scheduled_needs_future_time() {
        let now = 1_700_000_000;
        let stored = publishable_post();

        let mut past = stored.clone();
        past.status = PostStatus::Scheduled;
        past.scheduled_time = Some(now - 10);
        assert!(stored.validate_change(&past, now).is_err());

        let mut future = stored.clone();
        future.status = PostStatus::Scheduled;
        future.scheduled_time = Some(now + 3600);
        assert!(stored.validate_change(&future, now).is_ok());
    }

    #[test]
    fn test_activity_action_strings() {
        assert_eq!(ActivityAction::StatusChanged.as_str(), "status_changed");
        assert_eq!(
            "status_changed".parse::<ActivityAction>().unwrap(),
            ActivityAction::StatusChanged
        );
    }
}
