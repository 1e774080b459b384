//! postflow-queue - Manage the post queue
//!
//! Operator tool over the Postflow database: create, inspect, schedule and
//! retry posts, run a publication check and read the audit log.

use clap::{Parser, Subcommand};
use libpostflow::logging::{LogFormat, LoggingConfig};
use libpostflow::publisher::CommandPublisher;
use libpostflow::scheduler::STRANDED_REASON;
use libpostflow::scheduling::{format_relative, format_timestamp, parse_schedule};
use libpostflow::{
    ActivityLogEntry, Config, ContentTone, Database, MediaType, Post, PostStatus, PostflowError,
    Result, Scheduler, SchedulerConfig,
};
use std::sync::Arc;

#[derive(Parser, Debug)]
#[command(name = "postflow-queue")]
#[command(version)]
#[command(about = "Manage the Postflow post queue")]
#[command(long_about = "\
postflow-queue - Manage the Postflow post queue

DESCRIPTION:
    postflow-queue creates and inspects posts, moves them through their
    lifecycle (draft, scheduled, processing, published, failed) and reads
    the audit log. Publication itself is done by postflow-send; `check`
    runs a single publication pass from the command line.

USAGE EXAMPLES:
    # Create a draft with an image
    postflow-queue add \"Launch\" -d \"We are live\" --hashtags \"#launch\" --image ./launch.png

    # Create and schedule in one step
    postflow-queue add \"Launch\" -d \"We are live\" --image ./launch.png --at \"tomorrow 9am\"

    # Schedule an existing draft
    postflow-queue schedule 12 \"in 2 hours\"

    # Show failed posts as JSON
    postflow-queue list --status failed --format json

    # Queue up to five failed posts again
    postflow-queue retry --max 5

    # Queue statistics
    postflow-queue stats

CONFIGURATION:
    Configuration file: ~/.config/postflow/config.toml
    Database location: ~/.local/share/postflow/posts.db

    Override with environment variables:
        POSTFLOW_CONFIG    - Path to config file
        POSTFLOW_DB_PATH   - Path to database file

EXIT CODES:
    0 - Success
    1 - Operation failed
    2 - Database or configuration error
    3 - Invalid input (bad post ID, illegal transition, time format, etc.)
")]
struct Cli {
    #[command(subcommand)]
    command: Commands,

    /// Output format: text or json
    #[arg(short, long, global = true, default_value = "text")]
    format: String,

    /// Enable verbose logging to stderr
    #[arg(short, long, global = true)]
    verbose: bool,
}

#[derive(Subcommand, Debug)]
enum Commands {
    /// Create a post (draft unless --at is given)
    Add {
        /// Post title
        title: String,

        /// Caption body
        #[arg(short, long)]
        description: String,

        /// Hashtags appended to the caption
        #[arg(long, default_value = "")]
        hashtags: String,

        /// Path to the image to publish
        #[arg(long, conflicts_with = "video")]
        image: Option<String>,

        /// Path to the video to publish
        #[arg(long)]
        video: Option<String>,

        /// Topic the post was written about
        #[arg(long, default_value = "")]
        topic: String,

        /// Tone: engaging, professional, casual, inspiring, humorous or educational
        #[arg(long)]
        tone: Option<String>,

        /// Prompt the media was generated from
        #[arg(long, default_value = "")]
        prompt: String,

        /// Schedule time (e.g., "tomorrow 3pm", "in 2h", RFC3339)
        #[arg(long, value_name = "TIME")]
        at: Option<String>,
    },

    /// List posts, newest first
    List {
        /// Only posts with this status
        #[arg(short, long)]
        status: Option<String>,

        /// Only scheduled posts that are due now with media attached
        #[arg(long, conflicts_with = "status")]
        due: bool,

        /// Maximum number of posts
        #[arg(long, default_value_t = 50)]
        limit: i64,

        /// Number of posts to skip
        #[arg(long, default_value_t = 0)]
        offset: i64,
    },

    /// Show a post and its history
    Show {
        /// Post ID
        post_id: String,
    },

    /// Search titles, descriptions, hashtags and topics
    Search {
        /// Text to look for
        query: String,

        /// Maximum number of posts
        #[arg(long, default_value_t = 20)]
        limit: i64,
    },

    /// Schedule a draft or failed post, or move a scheduled one
    Schedule {
        /// Post ID
        post_id: String,

        /// Schedule time (e.g., "tomorrow 3pm", "in 2h", RFC3339)
        time: String,
    },

    /// Return a scheduled post to draft
    Cancel {
        /// Post ID
        post_id: String,
    },

    /// Queue failed posts for publication again
    Retry {
        /// Retry only this post
        post_id: Option<String>,

        /// Maximum number of posts to retry
        #[arg(long, default_value_t = 10, conflicts_with = "post_id")]
        max: usize,
    },

    /// Delete a post, its history and its media files
    Delete {
        /// Post ID
        post_id: String,
    },

    /// Publish every due post once through the configured publisher
    Check,

    /// Show queue statistics
    Stats,

    /// Show recent audit log entries
    Activity {
        /// Only entries for this post
        #[arg(long, value_name = "POST_ID")]
        post: Option<String>,

        /// Maximum number of entries
        #[arg(long, default_value_t = 20)]
        limit: i64,
    },

    /// Remove audit entries older than the retention horizon
    Cleanup {
        /// Retention in days (overrides config)
        #[arg(long)]
        days: Option<u32>,
    },

    /// Mark posts stuck in processing as failed
    Recover,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
enum OutputFormat {
    Text,
    Json,
}

fn parse_format(format: &str) -> Result<OutputFormat> {
    match format {
        "text" => Ok(OutputFormat::Text),
        "json" => Ok(OutputFormat::Json),
        other => Err(PostflowError::InvalidInput(format!(
            "Invalid format '{}'. Must be 'text' or 'json'",
            other
        ))),
    }
}

fn parse_post_id(post_id: &str) -> Result<i64> {
    post_id
        .trim()
        .parse::<i64>()
        .ok()
        .filter(|id| *id > 0)
        .ok_or_else(|| PostflowError::InvalidInput(format!("Invalid post ID: {}", post_id)))
}

#[tokio::main]
async fn main() {
    let cli = Cli::parse();

    LoggingConfig::new(LogFormat::Text, "error".to_string(), cli.verbose).init();

    if let Err(e) = run(cli).await {
        eprintln!("Error: {}", e);
        std::process::exit(e.exit_code());
    }
}

async fn run(cli: Cli) -> Result<()> {
    let format = parse_format(&cli.format)?;
    let config = Config::load()?;
    let db_path = config.db_path();
    tracing::debug!(db_path = %db_path, "Opening database");
    let db = Database::new(&db_path).await?;

    let result = match cli.command {
        Commands::Add {
            title,
            description,
            hashtags,
            image,
            video,
            topic,
            tone,
            prompt,
            at,
        } => {
            let mut post = Post::new(title, description, hashtags);
            post.topic = topic;
            post.image_prompt = prompt;
            if let Some(tone) = tone {
                post.tone = tone.parse::<ContentTone>()?;
            }
            if video.is_some() {
                post.media_type = MediaType::Video;
            }
            post.image_path = image;
            post.video_path = video;
            cmd_add(&db, post, at.as_deref(), format).await
        }
        Commands::List {
            status,
            due,
            limit,
            offset,
        } => cmd_list(&db, status.as_deref(), due, limit, offset, format).await,
        Commands::Show { post_id } => cmd_show(&db, &post_id, format).await,
        Commands::Search { query, limit } => cmd_search(&db, &query, limit, format).await,
        Commands::Schedule { post_id, time } => cmd_schedule(&db, &post_id, &time).await,
        Commands::Cancel { post_id } => cmd_cancel(&db, &post_id).await,
        Commands::Retry { post_id, max } => {
            cmd_retry(&db, post_id.as_deref(), max, format).await
        }
        Commands::Delete { post_id } => cmd_delete(&db, &post_id).await,
        Commands::Check => cmd_check(&db, &config).await,
        Commands::Stats => cmd_stats(&db, &config, format).await,
        Commands::Activity { post, limit } => {
            cmd_activity(&db, post.as_deref(), limit, format).await
        }
        Commands::Cleanup { days } => {
            let days = days.unwrap_or(config.activity.retention_days);
            let removed = db.cleanup_activity(days).await?;
            println!("Removed {} activity entries older than {} days", removed, days);
            Ok(())
        }
        Commands::Recover => {
            let recovered = db.recover_stranded(STRANDED_REASON).await?;
            println!("Recovered {} stranded posts", recovered);
            Ok(())
        }
    };

    db.close().await;
    result
}

async fn cmd_add(
    db: &Database,
    mut post: Post,
    at: Option<&str>,
    format: OutputFormat,
) -> Result<()> {
    if let Some(at) = at {
        post.status = PostStatus::Scheduled;
        post.scheduled_time = Some(parse_schedule(at)?.timestamp());
    }

    let id = db.create_post(&post).await?;

    match format {
        OutputFormat::Json => {
            let stored = db.get_post(id).await?.ok_or(PostflowError::NotFound(id))?;
            print_json(&stored)?;
        }
        OutputFormat::Text => println!("{}", id),
    }

    Ok(())
}

async fn cmd_list(
    db: &Database,
    status: Option<&str>,
    due: bool,
    limit: i64,
    offset: i64,
    format: OutputFormat,
) -> Result<()> {
    if limit < 1 || offset < 0 {
        return Err(PostflowError::InvalidInput(
            "--limit must be positive and --offset non-negative".to_string(),
        ));
    }

    let posts = if due {
        db.list_due_posts(chrono::Utc::now().timestamp()).await?
    } else if let Some(status) = status {
        let status = status.parse::<PostStatus>()?;
        db.list_posts_by_status(status).await?
    } else {
        db.list_posts(limit, offset).await?
    };

    output_posts(&posts, format)
}

async fn cmd_show(db: &Database, post_id: &str, format: OutputFormat) -> Result<()> {
    let id = parse_post_id(post_id)?;
    let post = db.get_post(id).await?.ok_or(PostflowError::NotFound(id))?;
    let history = db.activity_for_post(id).await?;

    if format == OutputFormat::Json {
        return print_json(&serde_json::json!({
            "post": post,
            "activity": history,
        }));
    }

    println!("Post {}: {}", post.id, post.title);
    println!("  Status:     {}", post.status);
    if let Some(at) = post.scheduled_time {
        println!(
            "  Scheduled:  {} ({})",
            format_timestamp(at),
            format_relative(at - chrono::Utc::now().timestamp())
        );
    }
    println!("  Media:      {} {}", post.media_type, post.media_path().unwrap_or("-"));
    println!("  Tone:       {}", post.tone);
    if !post.topic.is_empty() {
        println!("  Topic:      {}", post.topic);
    }
    if let Some(remote) = &post.remote_post_id {
        println!("  Remote ID:  {}", remote);
    }
    if let Some(error) = &post.error_message {
        println!("  Error:      {}", error);
    }
    println!("  Created:    {}", format_timestamp(post.created_at));
    println!("  Updated:    {}", format_timestamp(post.updated_at));
    println!();
    println!("{}", post.caption());

    if !history.is_empty() {
        println!();
        println!("History:");
        output_activity_text(&history);
    }

    Ok(())
}

async fn cmd_search(db: &Database, query: &str, limit: i64, format: OutputFormat) -> Result<()> {
    if query.trim().is_empty() {
        return Err(PostflowError::InvalidInput(
            "Search query cannot be empty".to_string(),
        ));
    }
    let posts = db.search_posts(query, limit).await?;
    output_posts(&posts, format)
}

async fn cmd_schedule(db: &Database, post_id: &str, time: &str) -> Result<()> {
    let id = parse_post_id(post_id)?;
    let when = parse_schedule(time)?.timestamp();

    if !db.schedule_at(id, when).await? {
        return Err(PostflowError::NotFound(id));
    }

    let post = db.get_post(id).await?.ok_or(PostflowError::NotFound(id))?;
    let at = post.scheduled_time.unwrap_or(when);
    println!("Scheduled post {} for {}", id, format_timestamp(at));
    Ok(())
}

async fn cmd_cancel(db: &Database, post_id: &str) -> Result<()> {
    let id = parse_post_id(post_id)?;
    if !db.cancel_schedule(id).await? {
        return Err(PostflowError::NotFound(id));
    }
    println!("Cancelled post {}", id);
    Ok(())
}

async fn cmd_retry(
    db: &Database,
    post_id: Option<&str>,
    max: usize,
    format: OutputFormat,
) -> Result<()> {
    let retried = match post_id {
        Some(post_id) => {
            let id = parse_post_id(post_id)?;
            let post = db.get_post(id).await?.ok_or(PostflowError::NotFound(id))?;
            if post.status != PostStatus::Failed {
                return Err(PostflowError::InvalidInput(format!(
                    "Post {} is {}; only failed posts can be retried",
                    id, post.status
                )));
            }
            if let Err(reason) = post.publish_readiness() {
                return Err(PostflowError::InvalidInput(format!(
                    "Post {} cannot be published: {}",
                    id, reason
                )));
            }
            if !db.update_status(id, PostStatus::Scheduled, None, None).await? {
                return Err(PostflowError::NotFound(id));
            }
            1
        }
        None => db.retry_failed(max).await?,
    };

    match format {
        OutputFormat::Json => print_json(&serde_json::json!({ "retried": retried })),
        OutputFormat::Text => {
            println!("Queued {} failed posts for retry", retried);
            Ok(())
        }
    }
}

async fn cmd_delete(db: &Database, post_id: &str) -> Result<()> {
    let id = parse_post_id(post_id)?;
    if !db.delete_post(id).await? {
        return Err(PostflowError::NotFound(id));
    }
    println!("Deleted post {}", id);
    Ok(())
}

/// Run one scheduler iteration and print its summary as JSON
async fn cmd_check(db: &Database, config: &Config) -> Result<()> {
    let publisher = CommandPublisher::from_config(config).ok_or_else(|| {
        PostflowError::Config(libpostflow::error::ConfigError::MissingField(
            "publisher.command".to_string(),
        ))
    })?;

    let mut scheduler_config = SchedulerConfig::from(&config.scheduler);
    scheduler_config.publish_timeout = config.publish_timeout();
    let scheduler = Scheduler::new(db.clone(), Arc::new(publisher), scheduler_config);

    let summary = scheduler.manual_check().await;
    print_json(&summary)?;

    match summary.error {
        Some(error) => Err(PostflowError::CheckAborted(error)),
        None => Ok(()),
    }
}

async fn cmd_stats(db: &Database, config: &Config, format: OutputFormat) -> Result<()> {
    let stats = libpostflow::stats::collect(
        db,
        false,
        std::time::Duration::from_secs(config.scheduler.poll_interval),
    )
    .await?;

    if format == OutputFormat::Json {
        return print_json(&stats);
    }

    println!("Posts: {}", stats.counts.total);
    for status in PostStatus::ALL {
        println!("  {:<11} {}", status.as_str(), stats.counts.count(status));
    }
    println!("Ready to publish: {}", stats.counts.ready_to_publish);
    println!("Due now:          {}", stats.ready_now);
    println!("Overdue:          {}", stats.overdue);
    match (stats.next_publication, stats.seconds_until_next) {
        (Some(at), Some(secs)) => println!(
            "Next publication: {} ({})",
            format_timestamp(at),
            format_relative(secs)
        ),
        _ => println!("Next publication: none"),
    }
    println!("Upcoming:");
    println!("  next hour   {}", stats.summary.next_hour);
    println!("  next day    {}", stats.summary.next_day);
    println!("  next week   {}", stats.summary.next_week);
    println!("  later       {}", stats.summary.later);

    Ok(())
}

async fn cmd_activity(
    db: &Database,
    post_id: Option<&str>,
    limit: i64,
    format: OutputFormat,
) -> Result<()> {
    let entries = match post_id {
        Some(post_id) => db.activity_for_post(parse_post_id(post_id)?).await?,
        None => db.recent_activity(limit).await?,
    };

    match format {
        OutputFormat::Json => print_json(&entries),
        OutputFormat::Text => {
            output_activity_text(&entries);
            Ok(())
        }
    }
}

fn print_json<T: serde::Serialize + ?Sized>(value: &T) -> Result<()> {
    let json = serde_json::to_string_pretty(value)
        .map_err(|e| PostflowError::InvalidInput(format!("Failed to serialize output: {}", e)))?;
    println!("{}", json);
    Ok(())
}

fn output_posts(posts: &[Post], format: OutputFormat) -> Result<()> {
    if format == OutputFormat::Json {
        return print_json(posts);
    }

    let now = chrono::Utc::now().timestamp();
    for post in posts {
        let when = post
            .scheduled_time
            .map(|at| format_relative(at - now))
            .unwrap_or_else(|| "-".to_string());
        println!(
            "{} | {:<10} | {} | {}",
            post.id,
            post.status.as_str(),
            truncate_content(&post.title, 40),
            when
        );
    }
    Ok(())
}

fn output_activity_text(entries: &[ActivityLogEntry]) {
    for entry in entries {
        println!(
            "{} | post {} | {} | {}",
            format_timestamp(entry.timestamp),
            entry.post_id,
            entry.action.as_str(),
            entry.details.as_deref().unwrap_or("")
        );
    }
}

/// Truncate to `max_chars` characters with an ellipsis
fn truncate_content(content: &str, max_chars: usize) -> String {
    if content.chars().count() <= max_chars {
        content.to_string()
    } else {
        let prefix: String = content.chars().take(max_chars).collect();
        format!("{}...", prefix)
    }
}
