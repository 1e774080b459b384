//! Publisher backed by an external program

use async_trait::async_trait;
use std::process::Stdio;
use std::time::Duration;
use tokio::io::AsyncWriteExt;
use tokio::process::Command;

use crate::config::Config;
use crate::error::PublishError;
use crate::publisher::Publisher;

/// Runs `program args... <media_path>` with the caption on stdin.
///
/// The first non-empty line of stdout is the remote post id. A non-zero exit
/// status fails with the trimmed stderr. The child is killed when the
/// timeout elapses.
#[derive(Debug, Clone)]
pub struct CommandPublisher {
    program: String,
    args: Vec<String>,
    timeout: Duration,
}

impl CommandPublisher {
    pub fn new(program: String, args: Vec<String>, timeout: Duration) -> Self {
        Self {
            program,
            args,
            timeout,
        }
    }

    /// Build from the `[publisher]` section, if configured.
    pub fn from_config(config: &Config) -> Option<Self> {
        config.publisher.as_ref().map(|publisher| {
            Self::new(
                shellexpand::tilde(&publisher.command).to_string(),
                publisher.args.clone(),
                config.publish_timeout(),
            )
        })
    }

    async fn run(&self, media_path: &str, caption: &str) -> Result<String, PublishError> {
        let mut child = Command::new(&self.program)
            .args(&self.args)
            .arg(media_path)
            .stdin(Stdio::piped())
            .stdout(Stdio::piped())
            .stderr(Stdio::piped())
            .kill_on_drop(true)
            .spawn()
            .map_err(|e| PublishError::Spawn(format!("{}: {}", self.program, e)))?;

        if let Some(mut stdin) = child.stdin.take() {
            match stdin.write_all(caption.as_bytes()).await {
                Ok(()) => {}
                // The program is free to ignore the caption
                Err(e) if e.kind() == std::io::ErrorKind::BrokenPipe => {}
                Err(e) => {
                    return Err(PublishError::Failed(format!(
                        "Could not send caption to publisher: {}",
                        e
                    )))
                }
            }
        }

        let output = child.wait_with_output().await.map_err(|e| {
            PublishError::Failed(format!("Could not read publisher output: {}", e))
        })?;

        if !output.status.success() {
            let stderr = String::from_utf8_lossy(&output.stderr).trim().to_string();
            return Err(PublishError::Failed(if stderr.is_empty() {
                format!("Publisher exited with {}", output.status)
            } else {
                stderr
            }));
        }

        String::from_utf8_lossy(&output.stdout)
            .lines()
            .map(str::trim)
            .find(|line| !line.is_empty())
            .map(str::to_string)
            .ok_or_else(|| PublishError::Failed("Publisher returned no post id".to_string()))
    }
}

#[async_trait]
impl Publisher for CommandPublisher {
    async fn publish(&self, media_path: &str, caption: &str) -> Result<String, PublishError> {
        tracing::debug!(program = %self.program, media_path, "Running publisher command");

        match tokio::time::timeout(self.timeout, self.run(media_path, caption)).await {
            Ok(result) => result,
            Err(_) => Err(PublishError::Timeout(self.timeout.as_secs())),
        }
    }

    fn name(&self) -> &str {
        &self.program
    }
}

#[cfg(all(test, unix))]
mod tests {
    use super::*;
    use tempfile::TempDir;

    fn shell(script: &str, timeout: Duration) -> CommandPublisher {
        CommandPublisher::new(
            "sh".to_string(),
            vec!["-c".to_string(), script.to_string(), "publisher".to_string()],
            timeout,
        )
    }

    #[tokio::test]
    async fn test_first_stdout_line_is_remote_id() {
        let publisher = shell("cat > /dev/null; echo; echo ig_123; echo extra", Duration::from_secs(5));
        let remote_id = publisher.publish("/tmp/a.png", "caption").await.unwrap();
        assert_eq!(remote_id, "ig_123");
    }

    #[tokio::test]
    async fn test_media_path_is_last_argument_and_caption_on_stdin() {
        let temp_dir = TempDir::new().unwrap();
        let media = temp_dir.path().join("media.png");
        let media = media.to_str().unwrap();

        let publisher = shell(r#"cat > "$1.caption"; echo "id-for-$1""#, Duration::from_secs(5));
        let remote_id = publisher.publish(media, "Hello\n\n#tag").await.unwrap();

        assert_eq!(remote_id, format!("id-for-{}", media));
        let caption = std::fs::read_to_string(format!("{}.caption", media)).unwrap();
        assert_eq!(caption, "Hello\n\n#tag");
    }

    #[tokio::test]
    async fn test_nonzero_exit_reports_stderr() {
        let publisher = shell("echo 'rate limited' >&2; exit 1", Duration::from_secs(5));
        let result = publisher.publish("/tmp/a.png", "caption").await;
        assert_eq!(result, Err(PublishError::Failed("rate limited".to_string())));
    }

    #[tokio::test]
    async fn test_empty_stdout_is_failure() {
        let publisher = shell("cat > /dev/null", Duration::from_secs(5));
        let result = publisher.publish("/tmp/a.png", "caption").await;
        assert_eq!(
            result,
            Err(PublishError::Failed("Publisher returned no post id".to_string()))
        );
    }

    #[tokio::test]
    async fn test_timeout_kills_child() {
        let publisher = shell("sleep 10; echo late", Duration::from_secs(1));
        let started = std::time::Instant::now();
        let result = publisher.publish("/tmp/a.png", "caption").await;

        assert_eq!(result, Err(PublishError::Timeout(1)));
        assert!(started.elapsed() < Duration::from_secs(5));
    }

    #[tokio::test]
    async fn test_missing_program_is_spawn_error() {
        let publisher = CommandPublisher::new(
            "/nonexistent/postflow-publisher".to_string(),
            vec![],
            Duration::from_secs(5),
        );
        let result = publisher.publish("/tmp/a.png", "caption").await;
        assert!(matches!(result, Err(PublishError::Spawn(_))));
    }

    #[test]
    fn test_from_config() {
        let mut config = Config::default_config();
        assert!(CommandPublisher::from_config(&config).is_none());

        config.publisher = Some(crate::config::PublisherConfig {
            command: "/usr/bin/publish".to_string(),
            args: vec!["--dry-run".to_string()],
            timeout: Some(12),
        });
        let publisher = CommandPublisher::from_config(&config).unwrap();
        assert_eq!(publisher.name(), "/usr/bin/publish");
        assert_eq!(publisher.timeout, Duration::from_secs(12));
    }
}
