//! Bounded execution of external administration tools
//!
//! Tools are always spawned from an argv vector, never through a shell.
//! The child is killed if the deadline passes. At most `MAX_OUTPUT_BYTES`
//! per stream is kept in memory; the rest is read and discarded so the
//! child never blocks on a full pipe.

use std::path::Path;
use std::process::Stdio;
use std::time::Duration;

use tokio::io::{AsyncRead, AsyncReadExt};
use tokio::process::Command;
use tracing::debug;

use crate::module::{ModuleError, ModuleResult};

/// Upper bound on captured stdout/stderr per stream
const MAX_OUTPUT_BYTES: usize = 256 * 1024;

/// Captured result of one tool run
#[derive(Debug, Clone)]
pub struct ToolOutput {
    pub status: Option<i32>,
    pub stdout: String,
    pub stderr: String,
}

impl ToolOutput {
    pub fn success(&self) -> bool {
        self.status == Some(0)
    }

    /// Best diagnostic text for a failed run
    pub fn diagnostic(&self) -> String {
        let stderr = self.stderr.trim();
        if !stderr.is_empty() {
            return stderr.to_string();
        }
        let stdout = self.stdout.trim();
        if !stdout.is_empty() {
            return stdout.to_string();
        }
        match self.status {
            Some(code) => format!("exit status {code}"),
            None => "terminated by signal".to_string(),
        }
    }
}

/// Run `program args...` and wait at most `timeout` for it
pub async fn run_tool(program: &Path, args: &[String], timeout: Duration) -> ModuleResult<ToolOutput> {
    let display = program.display().to_string();
    debug!("Running {} {:?}", program.display(), args);

    let mut child = Command::new(program)
        .args(args)
        .stdin(Stdio::null())
        .stdout(Stdio::piped())
        .stderr(Stdio::piped())
        .kill_on_drop(true)
        .spawn()
        .map_err(|e| ModuleError::ToolUnavailable {
            program: display.clone(),
            reason: e.to_string(),
        })?;

    let stdout = child.stdout.take();
    let stderr = child.stderr.take();
    let run = async {
        tokio::try_join!(capture(stdout), capture(stderr), child.wait())
    };

    // The child is killed on drop when we return early
    let (stdout, stderr, status) = match tokio::time::timeout(timeout, run).await {
        Ok(result) => result?,
        Err(_) => {
            return Err(ModuleError::TimedOut {
                program: display,
                secs: timeout.as_secs(),
            })
        }
    };

    Ok(ToolOutput {
        status: status.code(),
        stdout: String::from_utf8_lossy(&stdout).into_owned(),
        stderr: String::from_utf8_lossy(&stderr).into_owned(),
    })
}

/// Keep the first `MAX_OUTPUT_BYTES` of a pipe and drain the remainder
async fn capture<R>(pipe: Option<R>) -> std::io::Result<Vec<u8>>
where
    R: AsyncRead + Unpin,
{
    let mut kept = Vec::new();
    let Some(mut pipe) = pipe else {
        return Ok(kept);
    };

    (&mut pipe)
        .take(MAX_OUTPUT_BYTES as u64)
        .read_to_end(&mut kept)
        .await?;
    let dropped = tokio::io::copy(&mut pipe, &mut tokio::io::sink()).await?;
    if dropped > 0 {
        debug!("Discarded {} bytes of tool output", dropped);
    }
    Ok(kept)
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::path::PathBuf;

    fn sh(script: &str) -> (PathBuf, Vec<String>) {
        (
            PathBuf::from("sh"),
            vec!["-c".to_string(), script.to_string()],
        )
    }

    #[tokio::test]
    async fn test_captures_output() {
        let (program, args) = sh("echo out; echo err >&2; exit 3");
        let output = run_tool(&program, &args, Duration::from_secs(5)).await.unwrap();

        assert_eq!(output.status, Some(3));
        assert!(!output.success());
        assert_eq!(output.stdout.trim(), "out");
        assert_eq!(output.diagnostic(), "err");
    }

    #[tokio::test]
    async fn test_arguments_are_not_shell_expanded() {
        let program = PathBuf::from("echo");
        let args = vec!["$(id -u); rm -rf /tmp/nothing".to_string()];
        let output = run_tool(&program, &args, Duration::from_secs(5)).await.unwrap();
        assert_eq!(output.stdout.trim(), "$(id -u); rm -rf /tmp/nothing");
    }

    #[tokio::test]
    async fn test_missing_program() {
        let program = PathBuf::from("/nonexistent/bulwark-tool");
        let err = run_tool(&program, &[], Duration::from_secs(5)).await.unwrap_err();
        assert!(matches!(err, ModuleError::ToolUnavailable { .. }));
    }

    #[tokio::test]
    async fn test_timeout_kills_child() {
        let (program, args) = sh("sleep 10");
        let started = std::time::Instant::now();
        let err = run_tool(&program, &args, Duration::from_secs(1)).await.unwrap_err();

        assert!(matches!(err, ModuleError::TimedOut { secs: 1, .. }));
        assert!(started.elapsed() < Duration::from_secs(5));
    }

    #[tokio::test]
    async fn test_output_is_capped() {
        let (program, args) = sh("yes | head -c 600000; echo done >&2");
        let output = run_tool(&program, &args, Duration::from_secs(5)).await.unwrap();

        assert!(output.success());
        assert_eq!(output.stdout.len(), MAX_OUTPUT_BYTES);
        assert!(output.stdout.starts_with("y\ny\n"));
        assert_eq!(output.stderr.trim(), "done");
    }

    #[test]
    fn test_diagnostic_fallbacks() {
        let output = ToolOutput {
            status: Some(1),
            stdout: "  not running\n".into(),
            stderr: String::new(),
        };
        assert_eq!(output.diagnostic(), "not running");

        let output = ToolOutput {
            status: Some(2),
            stdout: String::new(),
            stderr: String::new(),
        };
        assert_eq!(output.diagnostic(), "exit status 2");
    }
}
