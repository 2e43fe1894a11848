//! Claude Code CLI upstream
//!
//! Spawns `claude -p <prompt> --output-format stream-json` per attempt and
//! turns its stdout into a stream of normalized events.

use crate::agent::types::{parse_line, CliMessage, UpstreamEvent};
use crate::agent::upstream::{Upstream, UpstreamRequest, UpstreamStream};
use crate::error::{Error, Result};
use async_stream::try_stream;
use async_trait::async_trait;
use futures::{Stream, StreamExt};
use std::path::{Path, PathBuf};
use std::process::Stdio;
use tokio::io::{AsyncBufReadExt, BufReader};
use tokio::process::{Child, ChildStdout, Command};
use tokio_stream::wrappers::LinesStream;

/// Upstream backed by a local Claude Code CLI binary
#[derive(Debug, Clone)]
pub struct ClaudeCliUpstream {
    binary: PathBuf,
}

impl ClaudeCliUpstream {
    pub fn new(binary: impl Into<PathBuf>) -> Self {
        Self {
            binary: binary.into(),
        }
    }

    /// Locate the CLI, preferring an explicitly configured path
    pub fn locate(configured: Option<&Path>) -> Result<Self> {
        resolve_claude_binary(configured).map(Self::new)
    }

    pub fn binary(&self) -> &Path {
        &self.binary
    }
}

#[async_trait]
impl Upstream for ClaudeCliUpstream {
    async fn open(&self, request: UpstreamRequest) -> Result<UpstreamStream> {
        let args = build_args(&request);

        tracing::info!(
            binary = %self.binary.display(),
            cwd = ?request.cwd,
            resume = ?request.resume,
            "Spawning Claude Code CLI"
        );

        let mut command = Command::new(&self.binary);
        command
            .args(&args)
            .envs(&request.options.env)
            .stdin(Stdio::null())
            .stdout(Stdio::piped())
            .stderr(Stdio::inherit())
            .kill_on_drop(true);
        if let Some(cwd) = &request.cwd {
            command.current_dir(cwd);
        }

        let mut child = command.spawn().map_err(|e| {
            Error::Upstream(format!(
                "Failed to spawn Claude Code CLI at {}: {}",
                self.binary.display(),
                e
            ))
        })?;

        let stdout = child
            .stdout
            .take()
            .ok_or_else(|| Error::Upstream("Claude Code CLI stdout not captured".to_string()))?;

        Ok(event_stream(child, stdout).boxed())
    }
}

/// Command-line arguments for one request
pub fn build_args(request: &UpstreamRequest) -> Vec<String> {
    let options = &request.options;
    let mut args = vec![
        "-p".to_string(),
        request.prompt.clone(),
        "--output-format".to_string(),
        "stream-json".to_string(),
        "--verbose".to_string(),
    ];

    if options.include_partial_messages {
        args.push("--include-partial-messages".to_string());
    }
    if let Some(ref m) = options.model {
        args.push("--model".to_string());
        args.push(m.clone());
    }
    if let Some(ref pm) = options.permission_mode {
        args.push("--permission-mode".to_string());
        args.push(pm.clone());
    }
    if !options.allowed_tools.is_empty() {
        args.push("--allowedTools".to_string());
        args.push(options.allowed_tools.join(","));
    }
    if !options.disallowed_tools.is_empty() {
        args.push("--disallowedTools".to_string());
        args.push(options.disallowed_tools.join(","));
    }
    if let Some(ref sid) = request.resume {
        args.push("--resume".to_string());
        args.push(sid.clone());
    }
    args.extend(options.extra_args.iter().cloned());

    args
}

/// Read stdout line by line, then check how the process ended.
///
/// A non-zero exit only fails the stream when no `result` line arrived;
/// otherwise the turn already reported its outcome in-band.
fn event_stream(
    mut child: Child,
    stdout: ChildStdout,
) -> impl Stream<Item = Result<UpstreamEvent>> + Send + 'static {
    try_stream! {
        let mut lines = LinesStream::new(BufReader::new(stdout).lines());
        let mut saw_result = false;

        while let Some(line) = lines.next().await {
            let line = line.map_err(|e| {
                Error::Upstream(format!("Failed to read Claude Code CLI output: {}", e))
            })?;
            if let Some(message) = parse_line(&line) {
                if matches!(message, CliMessage::Result(_)) {
                    saw_result = true;
                }
                for event in message.into_events() {
                    yield event;
                }
            }
        }

        let status = child.wait().await.map_err(|e| {
            Error::Upstream(format!("Failed to wait for Claude Code CLI: {}", e))
        })?;

        if !status.success() {
            if saw_result {
                tracing::warn!(status = %status, "Claude Code CLI exited non-zero after result");
            } else {
                Err::<(), _>(Error::Upstream(format!("Claude Code CLI exited with {}", status)))?;
            }
        } else {
            tracing::debug!("Claude Code CLI exited cleanly");
        }
    }
}

/// Resolve the claude CLI binary path
pub fn resolve_claude_binary(configured: Option<&Path>) -> Result<PathBuf> {
    if let Some(path) = configured {
        if path.exists() {
            return Ok(path.to_path_buf());
        }
        return Err(Error::Config(format!(
            "Configured Claude Code CLI not found at {}",
            path.display()
        )));
    }

    // Check PATH via `which`
    if let Ok(output) = std::process::Command::new("which").arg("claude").output() {
        if output.status.success() {
            let path = String::from_utf8_lossy(&output.stdout).trim().to_string();
            if !path.is_empty() {
                return Ok(PathBuf::from(path));
            }
        }
    }

    // Check common locations
    let home = dirs_next::home_dir().unwrap_or_else(|| PathBuf::from("."));
    let candidates = [
        home.join(".claude").join("local").join("claude"),
        PathBuf::from("/usr/local/bin/claude"),
        PathBuf::from("/opt/homebrew/bin/claude"),
    ];

    for candidate in &candidates {
        if candidate.exists() {
            return Ok(candidate.clone());
        }
    }

    Err(Error::Config(
        "Claude Code CLI not found. Install it from https://claude.ai/code".to_string(),
    ))
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::agent::types::UpstreamEventKind;
    use crate::agent::upstream::UpstreamOptions;

    fn request(prompt: &str) -> UpstreamRequest {
        UpstreamRequest {
            prompt: prompt.to_string(),
            cwd: None,
            resume: None,
            options: UpstreamOptions::default(),
        }
    }

    #[test]
    fn test_build_args_minimal() {
        let args = build_args(&request("hello"));
        assert_eq!(
            args,
            vec!["-p", "hello", "--output-format", "stream-json", "--verbose"]
        );
    }

    #[test]
    fn test_build_args_full() {
        let mut req = request("fix it");
        req.resume = Some("s1".to_string());
        req.options = UpstreamOptions {
            model: Some("sonnet".to_string()),
            permission_mode: Some("acceptEdits".to_string()),
            allowed_tools: vec!["Read".to_string(), "Grep".to_string()],
            disallowed_tools: vec!["Bash".to_string()],
            include_partial_messages: true,
            extra_args: vec!["--max-turns".to_string(), "5".to_string()],
            ..Default::default()
        };

        let args = build_args(&req);
        assert_eq!(
            args,
            vec![
                "-p",
                "fix it",
                "--output-format",
                "stream-json",
                "--verbose",
                "--include-partial-messages",
                "--model",
                "sonnet",
                "--permission-mode",
                "acceptEdits",
                "--allowedTools",
                "Read,Grep",
                "--disallowedTools",
                "Bash",
                "--resume",
                "s1",
                "--max-turns",
                "5",
            ]
        );
    }

    #[test]
    fn test_resolve_configured_binary() {
        let dir = tempfile::TempDir::new().unwrap();
        let path = dir.path().join("claude");
        std::fs::write(&path, "").unwrap();
        assert_eq!(resolve_claude_binary(Some(&path)).unwrap(), path);

        let missing = dir.path().join("nope");
        let err = resolve_claude_binary(Some(&missing)).unwrap_err();
        assert!(matches!(err, Error::Config(_)));
    }

    #[tokio::test]
    async fn test_spawn_failure_is_upstream_error() {
        let upstream = ClaudeCliUpstream::new("/nonexistent/bin/claude");
        let err = upstream.open(request("hi")).await.err().unwrap();
        assert!(err.is_upstream());
    }

    #[cfg(unix)]
    #[tokio::test]
    async fn test_fake_cli_exit_status_handling() {
        use std::os::unix::fs::PermissionsExt;

        let dir = tempfile::TempDir::new().unwrap();
        let write_script = |name: &str, body: &str| {
            let path = dir.path().join(name);
            std::fs::write(&path, format!("#!/bin/sh\n{}", body)).unwrap();
            std::fs::set_permissions(&path, std::fs::Permissions::from_mode(0o755)).unwrap();
            path
        };

        let with_result = write_script(
            "with_result.sh",
            concat!(
                "echo '{\"type\":\"system\",\"subtype\":\"init\",\"session_id\":\"s1\"}'\n",
                "echo 'not json'\n",
                "echo '{\"type\":\"result\",\"subtype\":\"success\",\"is_error\":false,\"session_id\":\"s1\"}'\n",
                "exit 3\n",
            ),
        );
        let crashed = write_script(
            "crashed.sh",
            concat!(
                "echo '{\"type\":\"system\",\"subtype\":\"init\",\"session_id\":\"s2\"}'\n",
                "exit 2\n",
            ),
        );

        // Freshly written executables can briefly report ETXTBSY
        async fn collect(binary: &Path) -> Vec<Result<UpstreamEvent>> {
            for _ in 0..5 {
                match ClaudeCliUpstream::new(binary).open(request("hi")).await {
                    Ok(stream) => return stream.collect().await,
                    Err(e) if e.to_string().contains("busy") => {
                        tokio::time::sleep(std::time::Duration::from_millis(50)).await
                    }
                    Err(e) => panic!("open failed: {}", e),
                }
            }
            panic!("executable stayed busy");
        }

        let items = collect(&with_result).await;
        assert_eq!(items.len(), 2);
        assert!(items.iter().all(|i| i.is_ok()));
        assert!(matches!(
            items[0].as_ref().unwrap().kind,
            UpstreamEventKind::SystemInit { .. }
        ));
        assert!(matches!(
            items[1].as_ref().unwrap().kind,
            UpstreamEventKind::TurnResult(_)
        ));

        let items = collect(&crashed).await;
        assert_eq!(items.len(), 2);
        assert!(items[0].is_ok());
        let err = items[1].as_ref().unwrap_err();
        assert!(err.is_upstream());
        assert!(err.to_string().contains("exited"));
    }
}
