//! Integration tests for postflow-queue

use assert_cmd::Command;
use libpostflow::{Database, Post, PostStatus};
use predicates::prelude::*;
use std::fs;
use tempfile::TempDir;

/// Helper to escape path for TOML on Windows
fn escape_path_for_toml(path: &str) -> String {
    path.replace('\\', "\\\\")
}

/// Config and database paths inside a fresh temp dir
fn setup_test_env(publisher: Option<&str>) -> (TempDir, String, String) {
    let temp_dir = TempDir::new().unwrap();
    let config_path = temp_dir.path().join("config.toml");
    let db_path = temp_dir.path().join("posts.db");

    let mut config_content = format!(
        r#"
[database]
path = "{}"

[scheduler]
poll_interval = 60
publish_pause = 0
"#,
        escape_path_for_toml(&db_path.to_string_lossy())
    );
    if let Some(script) = publisher {
        config_content.push_str(&format!(
            r#"
[publisher]
command = "sh"
args = ["-c", "{}", "publisher"]
timeout = 10
"#,
            script
        ));
    }
    fs::write(&config_path, config_content).unwrap();

    (
        temp_dir,
        config_path.to_string_lossy().to_string(),
        db_path.to_string_lossy().to_string(),
    )
}

fn queue(config_path: &str) -> Command {
    let mut cmd = Command::cargo_bin("postflow-queue").unwrap();
    cmd.env("POSTFLOW_CONFIG", config_path);
    cmd
}

fn now() -> i64 {
    chrono::Utc::now().timestamp()
}

async fn insert(db_path: &str, title: &str, status: PostStatus, at: Option<i64>) -> i64 {
    let db = Database::new(db_path).await.unwrap();
    let mut post = Post::new(
        title.to_string(),
        format!("{} caption", title),
        "#queue".to_string(),
    );
    post.image_path = Some(format!("/media/{}.png", title));
    post.status = status;
    post.scheduled_time = at;
    let id = db.create_post(&post).await.unwrap();
    db.close().await;
    id
}

async fn load(db_path: &str, id: i64) -> Post {
    let db = Database::new(db_path).await.unwrap();
    let post = db.get_post(id).await.unwrap().unwrap();
    db.close().await;
    post
}

#[tokio::test]
async fn test_add_creates_draft_and_prints_id() {
    let (_temp, config_path, db_path) = setup_test_env(None);

    let output = queue(&config_path)
        .args(["add", "Launch", "-d", "We are live", "--image", "/media/launch.png"])
        .output()
        .unwrap();
    assert!(output.status.success());

    let id: i64 = String::from_utf8_lossy(&output.stdout).trim().parse().unwrap();
    let post = load(&db_path, id).await;
    assert_eq!(post.status, PostStatus::Draft);
    assert_eq!(post.image_path.as_deref(), Some("/media/launch.png"));
}

#[tokio::test]
async fn test_add_with_time_schedules() {
    let (_temp, config_path, db_path) = setup_test_env(None);

    let output = queue(&config_path)
        .args(["add", "Later", "-d", "Soon", "--video", "/media/clip.mp4", "--at", "in 2 hours"])
        .args(["--format", "json"])
        .output()
        .unwrap();
    assert!(output.status.success());

    let json: serde_json::Value = serde_json::from_slice(&output.stdout).unwrap();
    assert_eq!(json["status"], "scheduled");
    assert_eq!(json["media_type"], "video");

    let post = load(&db_path, json["id"].as_i64().unwrap()).await;
    let at = post.scheduled_time.unwrap();
    assert!((at - (now() + 7200)).abs() < 60);
}

#[test]
fn test_add_rejects_unknown_tone() {
    let (_temp, config_path, _db_path) = setup_test_env(None);

    queue(&config_path)
        .args(["add", "t", "-d", "d", "--tone", "grumpy"])
        .assert()
        .code(3);
}

#[test]
fn test_invalid_format_is_invalid_input() {
    let (_temp, config_path, _db_path) = setup_test_env(None);

    queue(&config_path)
        .args(["list", "--format", "xml"])
        .assert()
        .code(3)
        .stderr(predicate::str::contains("Invalid format"));
}

#[tokio::test]
async fn test_list_filters_by_status() {
    let (_temp, config_path, db_path) = setup_test_env(None);
    insert(&db_path, "draft-one", PostStatus::Draft, None).await;
    let scheduled = insert(&db_path, "queued-one", PostStatus::Scheduled, Some(now() + 600)).await;

    let output = queue(&config_path)
        .args(["list", "--status", "scheduled", "--format", "json"])
        .output()
        .unwrap();
    assert!(output.status.success());

    let json: serde_json::Value = serde_json::from_slice(&output.stdout).unwrap();
    let posts = json.as_array().unwrap();
    assert_eq!(posts.len(), 1);
    assert_eq!(posts[0]["id"], scheduled);
}

#[tokio::test]
async fn test_list_text_output() {
    let (_temp, config_path, db_path) = setup_test_env(None);
    insert(&db_path, "visible", PostStatus::Draft, None).await;

    queue(&config_path)
        .arg("list")
        .assert()
        .success()
        .stdout(predicate::str::contains("visible"))
        .stdout(predicate::str::contains("draft"));
}

#[tokio::test]
async fn test_show_includes_history() {
    let (_temp, config_path, db_path) = setup_test_env(None);
    let id = insert(&db_path, "shown", PostStatus::Draft, None).await;

    let output = queue(&config_path)
        .args(["show", &id.to_string(), "--format", "json"])
        .output()
        .unwrap();
    assert!(output.status.success());

    let json: serde_json::Value = serde_json::from_slice(&output.stdout).unwrap();
    assert_eq!(json["post"]["title"], "shown");
    assert_eq!(json["activity"][0]["action"], "created");
}

#[test]
fn test_show_missing_post_is_not_found() {
    let (_temp, config_path, _db_path) = setup_test_env(None);

    queue(&config_path)
        .args(["show", "999"])
        .assert()
        .code(3)
        .stderr(predicate::str::contains("not found"));
}

#[test]
fn test_bad_post_id_is_invalid_input() {
    let (_temp, config_path, _db_path) = setup_test_env(None);

    queue(&config_path)
        .args(["cancel", "abc"])
        .assert()
        .code(3)
        .stderr(predicate::str::contains("Invalid post ID"));
}

#[tokio::test]
async fn test_search_treats_wildcards_literally() {
    let (_temp, config_path, db_path) = setup_test_env(None);
    insert(&db_path, "100% organic", PostStatus::Draft, None).await;
    insert(&db_path, "100 percent", PostStatus::Draft, None).await;

    let output = queue(&config_path)
        .args(["search", "100%", "--format", "json"])
        .output()
        .unwrap();
    assert!(output.status.success());

    let json: serde_json::Value = serde_json::from_slice(&output.stdout).unwrap();
    let posts = json.as_array().unwrap();
    assert_eq!(posts.len(), 1);
    assert_eq!(posts[0]["title"], "100% organic");
}

#[tokio::test]
async fn test_schedule_then_cancel() {
    let (_temp, config_path, db_path) = setup_test_env(None);
    let id = insert(&db_path, "cycle", PostStatus::Draft, None).await;

    queue(&config_path)
        .args(["schedule", &id.to_string(), "in 30 minutes"])
        .assert()
        .success()
        .stdout(predicate::str::contains("Scheduled post"));
    assert_eq!(load(&db_path, id).await.status, PostStatus::Scheduled);

    queue(&config_path)
        .args(["cancel", &id.to_string()])
        .assert()
        .success();
    let post = load(&db_path, id).await;
    assert_eq!(post.status, PostStatus::Draft);
    assert!(post.scheduled_time.is_none());
}

#[tokio::test]
async fn test_scheduling_draft_in_the_past_is_rejected() {
    let (_temp, config_path, db_path) = setup_test_env(None);
    let id = insert(&db_path, "past", PostStatus::Draft, None).await;

    queue(&config_path)
        .args(["schedule", &id.to_string(), "2020-01-01T00:00:00Z"])
        .assert()
        .code(3);
    assert_eq!(load(&db_path, id).await.status, PostStatus::Draft);
}

#[tokio::test]
async fn test_cancel_draft_is_illegal_transition() {
    let (_temp, config_path, db_path) = setup_test_env(None);
    let id = insert(&db_path, "not-scheduled", PostStatus::Draft, None).await;

    queue(&config_path)
        .args(["cancel", &id.to_string()])
        .assert()
        .code(3)
        .stderr(predicate::str::contains("draft -> draft"));
}

#[tokio::test]
async fn test_unparsable_time_is_invalid_input() {
    let (_temp, config_path, db_path) = setup_test_env(None);
    let id = insert(&db_path, "vague", PostStatus::Draft, None).await;

    queue(&config_path)
        .args(["schedule", &id.to_string(), "whenever you like"])
        .assert()
        .code(3);
}

#[tokio::test]
async fn test_check_and_retry() {
    let (_temp, config_path, db_path) =
        setup_test_env(Some("cat > /dev/null; echo 'quota exceeded' >&2; exit 1"));
    let id = insert(&db_path, "flaky", PostStatus::Scheduled, Some(now() - 5)).await;

    let output = queue(&config_path).arg("check").output().unwrap();
    assert!(output.status.success());
    let summary: serde_json::Value = serde_json::from_slice(&output.stdout).unwrap();
    assert_eq!(summary["failed"], 1);

    let post = load(&db_path, id).await;
    assert_eq!(post.status, PostStatus::Failed);
    assert_eq!(post.error_message.as_deref(), Some("quota exceeded"));

    queue(&config_path)
        .args(["retry", "--max", "5", "--format", "json"])
        .assert()
        .success()
        .stdout(predicate::str::contains("\"retried\": 1"));

    let post = load(&db_path, id).await;
    assert_eq!(post.status, PostStatus::Scheduled);
    assert!(post.error_message.is_none());
    assert!(post.scheduled_time.unwrap() >= now() - 5);
}

#[tokio::test]
async fn test_retry_single_post_requires_failed_status() {
    let (_temp, config_path, db_path) = setup_test_env(None);
    let id = insert(&db_path, "fine", PostStatus::Draft, None).await;

    queue(&config_path)
        .args(["retry", &id.to_string()])
        .assert()
        .code(3)
        .stderr(predicate::str::contains("only failed posts"));
    assert_eq!(load(&db_path, id).await.status, PostStatus::Draft);
}

#[test]
fn test_check_without_publisher_is_config_error() {
    let (_temp, config_path, _db_path) = setup_test_env(None);

    queue(&config_path)
        .arg("check")
        .assert()
        .code(2)
        .stderr(predicate::str::contains("publisher.command"));
}

#[tokio::test]
async fn test_delete_removes_post_and_media() {
    let (temp, config_path, db_path) = setup_test_env(None);
    let media = temp.path().join("doomed.png");
    fs::write(&media, b"png").unwrap();

    let db = Database::new(&db_path).await.unwrap();
    let mut post = Post::new("doomed".to_string(), "d".to_string(), String::new());
    post.image_path = Some(media.to_string_lossy().to_string());
    let id = db.create_post(&post).await.unwrap();
    db.close().await;

    queue(&config_path)
        .args(["delete", &id.to_string()])
        .assert()
        .success();

    assert!(!media.exists());
    let db = Database::new(&db_path).await.unwrap();
    assert!(db.get_post(id).await.unwrap().is_none());
    assert!(db.activity_for_post(id).await.unwrap().is_empty());
}

#[tokio::test]
async fn test_stats_json() {
    let (_temp, config_path, db_path) = setup_test_env(None);
    insert(&db_path, "soon", PostStatus::Scheduled, Some(now() + 1800)).await;
    insert(&db_path, "later", PostStatus::Scheduled, Some(now() + 30 * 86_400)).await;
    insert(&db_path, "idea", PostStatus::Draft, None).await;

    let output = queue(&config_path)
        .args(["stats", "--format", "json"])
        .output()
        .unwrap();
    assert!(output.status.success());

    let stats: serde_json::Value = serde_json::from_slice(&output.stdout).unwrap();
    assert_eq!(stats["running"], false);
    assert_eq!(stats["counts"]["total"], 3);
    assert_eq!(stats["counts"]["scheduled"], 2);
    assert_eq!(stats["counts"]["draft"], 1);
    assert_eq!(stats["summary"]["next_hour"], 1);
    assert_eq!(stats["summary"]["later"], 1);
}

#[tokio::test]
async fn test_stats_text() {
    let (_temp, config_path, db_path) = setup_test_env(None);
    insert(&db_path, "soon", PostStatus::Scheduled, Some(now() + 1800)).await;

    queue(&config_path)
        .arg("stats")
        .assert()
        .success()
        .stdout(predicate::str::contains("Posts: 1"))
        .stdout(predicate::str::contains("next hour   1"));
}

#[tokio::test]
async fn test_activity_for_post() {
    let (_temp, config_path, db_path) = setup_test_env(None);
    let id = insert(&db_path, "tracked", PostStatus::Draft, None).await;

    queue(&config_path)
        .args(["schedule", &id.to_string(), "in 1 hour"])
        .assert()
        .success();

    let output = queue(&config_path)
        .args(["activity", "--post", &id.to_string(), "--format", "json"])
        .output()
        .unwrap();
    let entries: serde_json::Value = serde_json::from_slice(&output.stdout).unwrap();
    let actions: Vec<&str> = entries
        .as_array()
        .unwrap()
        .iter()
        .map(|e| e["action"].as_str().unwrap())
        .collect();
    // Newest first
    assert_eq!(actions, vec!["status_changed", "created"]);
}

#[tokio::test]
async fn test_recover_marks_processing_failed() {
    let (_temp, config_path, db_path) = setup_test_env(None);
    let id = insert(&db_path, "stuck", PostStatus::Scheduled, Some(now() - 5)).await;
    {
        let db = Database::new(&db_path).await.unwrap();
        db.update_status(id, PostStatus::Processing, None, None)
            .await
            .unwrap();
        db.close().await;
    }

    queue(&config_path)
        .arg("recover")
        .assert()
        .success()
        .stdout(predicate::str::contains("Recovered 1"));
    assert_eq!(load(&db_path, id).await.status, PostStatus::Failed);
}

#[test]
fn test_cleanup_reports_count() {
    let (_temp, config_path, _db_path) = setup_test_env(None);

    queue(&config_path)
        .args(["cleanup", "--days", "30"])
        .assert()
        .success()
        .stdout(predicate::str::contains("Removed 0 activity entries"));
}
