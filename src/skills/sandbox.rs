// Copyright 2026 Layne Penney
// SPDX-License-Identifier: AGPL-3.0-or-later

//! Subprocess sandbox for script skills.
//!
//! Each run gets a fresh temporary working directory, an environment with
//! only a minimal `PATH`, its arguments as JSON on stdin, CPU-time and
//! memory limits (`ulimit`, Unix only) and a wall-clock timeout. On Unix the
//! script leads its own process group, and the whole group is killed when
//! the run ends, so background jobs cannot outlive it. Pipes are read through
//! a byte bound, and anything past it is drained and dropped.

use std::process::Stdio;
use std::time::{Duration, Instant};

use serde::Serialize;
use tokio::io::{AsyncRead, AsyncReadExt, AsyncWriteExt};
use tokio::process::Command;
use tokio::task::JoinHandle;
use tokio::time::timeout;

#[cfg(feature = "telemetry")]
use tracing::{debug, warn};

use crate::catalog::ScriptLanguage;
use crate::error::SkillError;

const SANDBOX_PATH: &str = "/usr/local/bin:/usr/bin:/bin";

/// Resource limits for one script run.
#[derive(Debug, Clone)]
pub struct SandboxLimits {
    pub wall_timeout: Duration,
    pub cpu_seconds: u64,
    /// Address-space limit in KiB; not applied to Node, whose runtime
    /// reserves large virtual ranges up front
    pub memory_kb: Option<u64>,
    pub max_output_bytes: usize,
}

impl Default for SandboxLimits {
    fn default() -> Self {
        Self {
            wall_timeout: Duration::from_secs(30),
            cpu_seconds: 10,
            memory_kb: Some(512 * 1024),
            max_output_bytes: 64 * 1024,
        }
    }
}

/// What a script run produced.
#[derive(Debug, Clone, Serialize)]
pub struct SandboxOutput {
    pub stdout: String,
    pub stderr: String,
    pub exit_code: i32,
    pub duration_ms: u64,
    pub timed_out: bool,
    pub truncated: bool,
}

impl SandboxOutput {
    pub fn success(&self) -> bool {
        self.exit_code == 0 && !self.timed_out
    }
}

/// Cut `text` to at most `max` bytes on a char boundary.
fn truncate_bytes(text: String, max: usize) -> (String, bool) {
    if text.len() <= max {
        return (text, false);
    }
    let mut end = max;
    while !text.is_char_boundary(end) {
        end -= 1;
    }
    let mut cut = text[..end].to_string();
    cut.push_str("\n... [output truncated]");
    (cut, true)
}

/// Read at most `max + 1` bytes, then drain the rest so the writer never
/// blocks on a full pipe.
async fn read_bounded<R>(mut reader: R, max: usize) -> std::io::Result<(Vec<u8>, bool)>
where
    R: AsyncRead + Unpin,
{
    let mut buf = Vec::new();
    (&mut reader).take(max as u64 + 1).read_to_end(&mut buf).await?;
    let overflow = buf.len() > max;
    if overflow {
        tokio::io::copy(&mut reader, &mut tokio::io::sink()).await?;
    }
    Ok((buf, overflow))
}

fn spawn_reader<R>(reader: Option<R>, max: usize) -> JoinHandle<(String, bool)>
where
    R: AsyncRead + Unpin + Send + 'static,
{
    tokio::spawn(async move {
        let Some(reader) = reader else {
            return (String::new(), false);
        };
        let (bytes, overflow) = read_bounded(reader, max).await.unwrap_or_default();
        let (text, cut) = truncate_bytes(String::from_utf8_lossy(&bytes).into_owned(), max);
        (text, overflow || cut)
    })
}

/// SIGKILL every process in the group led by `pgid`.
#[cfg(unix)]
async fn kill_group(pgid: Option<u32>) {
    let Some(pgid) = pgid else { return };
    let status = Command::new("/bin/sh")
        .arg("-c")
        .arg(format!("kill -s KILL -- -{pgid} 2>/dev/null"))
        .stdin(Stdio::null())
        .stdout(Stdio::null())
        .stderr(Stdio::null())
        .status()
        .await;
    #[cfg(feature = "telemetry")]
    if let Err(e) = status {
        warn!(pgid, error = %e, "Failed to kill skill process group");
    }
    #[cfg(not(feature = "telemetry"))]
    let _ = status;
}

#[cfg(not(unix))]
async fn kill_group(_pgid: Option<u32>) {}

fn build_command(
    language: ScriptLanguage,
    script: &std::path::Path,
    limits: &SandboxLimits,
) -> Command {
    let (interpreter, _) = language.interpreter();

    #[cfg(unix)]
    let mut cmd = {
        let mut prelude = format!("ulimit -t {} 2>/dev/null; ", limits.cpu_seconds);
        if let (Some(kb), false) = (limits.memory_kb, language == ScriptLanguage::Node) {
            prelude.push_str(&format!("ulimit -v {kb} 2>/dev/null; "));
        }
        prelude.push_str("exec \"$0\" \"$1\"");

        let mut cmd = Command::new("/bin/sh");
        cmd.arg("-c")
            .arg(prelude)
            .arg(interpreter)
            .arg(script)
            .process_group(0);
        cmd
    };

    #[cfg(not(unix))]
    let mut cmd = {
        let _ = limits;
        let mut cmd = Command::new(interpreter);
        cmd.arg(script);
        cmd
    };

    cmd.env_clear()
        .env("PATH", SANDBOX_PATH)
        .env("LANG", "C.UTF-8")
        .stdin(Stdio::piped())
        .stdout(Stdio::piped())
        .stderr(Stdio::piped())
        .kill_on_drop(true);
    cmd
}

/// Run a script with its arguments on stdin.
pub async fn run_script(
    language: ScriptLanguage,
    source: &str,
    args: &serde_json::Value,
    limits: &SandboxLimits,
) -> Result<SandboxOutput, SkillError> {
    let start = Instant::now();
    let workdir = tempfile::Builder::new().prefix("copilot-skill-").tempdir()?;
    let (interpreter, ext) = language.interpreter();
    let script = workdir.path().join(format!("skill.{ext}"));
    tokio::fs::write(&script, source).await?;

    let mut cmd = build_command(language, &script, limits);
    cmd.current_dir(workdir.path()).env("HOME", workdir.path());

    let mut child = cmd.spawn().map_err(|e| {
        SkillError::ExecutionFailed(format!("failed to start {interpreter}: {e}"))
    })?;
    // The child leads its own group, so its pid is the group id.
    let pgid = child.id();

    if let Some(mut stdin) = child.stdin.take() {
        let input = serde_json::to_vec(args)
            .map_err(|e| SkillError::InvalidInput(e.to_string()))?;
        // Scripts that never read stdin must not block the run
        tokio::spawn(async move {
            let _ = stdin.write_all(&input).await;
        });
    }

    let stdout = spawn_reader(child.stdout.take(), limits.max_output_bytes);
    let stderr = spawn_reader(child.stderr.take(), limits.max_output_bytes / 4);

    let waited = timeout(limits.wall_timeout, child.wait()).await;
    // Leftover background jobs hold the pipes open; take them down with
    // the script either way.
    kill_group(pgid).await;
    let duration_ms = start.elapsed().as_millis() as u64;

    let output = match waited {
        Ok(Ok(status)) => {
            let (stdout, out_cut) = stdout.await.unwrap_or_default();
            let (stderr, err_cut) = stderr.await.unwrap_or_default();
            SandboxOutput {
                stdout,
                stderr,
                exit_code: status.code().unwrap_or(-1),
                duration_ms,
                timed_out: false,
                truncated: out_cut || err_cut,
            }
        }
        Ok(Err(e)) => {
            stdout.abort();
            stderr.abort();
            return Err(SkillError::ExecutionFailed(e.to_string()));
        }
        Err(_) => {
            let _ = child.kill().await;
            stdout.abort();
            stderr.abort();
            #[cfg(feature = "telemetry")]
            warn!(
                language = interpreter,
                timeout_ms = limits.wall_timeout.as_millis() as u64,
                "Skill script timed out"
            );
            SandboxOutput {
                stdout: String::new(),
                stderr: format!(
                    "Script timed out after {:.1}s",
                    limits.wall_timeout.as_secs_f64()
                ),
                exit_code: -1,
                duration_ms,
                timed_out: true,
                truncated: false,
            }
        }
    };

    #[cfg(feature = "telemetry")]
    debug!(
        language = interpreter,
        exit_code = output.exit_code,
        duration_ms,
        "Skill script finished"
    );

    Ok(output)
}

#[cfg(all(test, unix))]
mod tests {
    use super::*;
    use serde_json::json;

    fn limits() -> SandboxLimits {
        SandboxLimits {
            wall_timeout: Duration::from_secs(10),
            ..Default::default()
        }
    }

    #[tokio::test]
    async fn test_args_arrive_on_stdin() {
        let out = run_script(ScriptLanguage::Shell, "cat", &json!({"x": 1}), &limits())
            .await
            .unwrap();
        assert!(out.success());
        assert_eq!(out.stdout, r#"{"x":1}"#);
    }

    #[tokio::test]
    async fn test_environment_is_cleared() {
        std::env::set_var("COPILOT_SANDBOX_SECRET", "leak");
        let out = run_script(
            ScriptLanguage::Shell,
            "echo \"[${COPILOT_SANDBOX_SECRET}]\"; pwd",
            &json!({}),
            &limits(),
        )
        .await
        .unwrap();
        assert!(out.stdout.starts_with("[]"));
        assert!(out.stdout.contains("copilot-skill-"));
    }

    #[tokio::test]
    async fn test_timeout_kills() {
        let quick = SandboxLimits {
            wall_timeout: Duration::from_millis(200),
            ..Default::default()
        };
        let out = run_script(ScriptLanguage::Shell, "sleep 5", &json!({}), &quick)
            .await
            .unwrap();
        assert!(out.timed_out);
        assert!(!out.success());
    }

    #[tokio::test]
    async fn test_timeout_kills_background_jobs() {
        let dir = tempfile::tempdir().unwrap();
        let marker = dir.path().join("marker");
        let quick = SandboxLimits {
            wall_timeout: Duration::from_millis(300),
            ..Default::default()
        };
        let source = format!("(sleep 1; echo escaped > '{}') & sleep 5", marker.display());

        let out = run_script(ScriptLanguage::Shell, &source, &json!({}), &quick)
            .await
            .unwrap();
        assert!(out.timed_out);

        tokio::time::sleep(Duration::from_millis(1500)).await;
        assert!(!marker.exists());
    }

    #[tokio::test]
    async fn test_background_jobs_end_with_script() {
        let dir = tempfile::tempdir().unwrap();
        let marker = dir.path().join("marker");
        let source = format!("(sleep 1; echo escaped > '{}') & echo done", marker.display());

        let started = Instant::now();
        let out = run_script(ScriptLanguage::Shell, &source, &json!({}), &limits())
            .await
            .unwrap();
        assert!(out.success());
        assert_eq!(out.stdout.trim(), "done");
        assert!(started.elapsed() < Duration::from_secs(1));

        tokio::time::sleep(Duration::from_millis(1500)).await;
        assert!(!marker.exists());
    }

    #[tokio::test]
    async fn test_large_output_is_bounded() {
        let small = SandboxLimits {
            max_output_bytes: 16,
            ..limits()
        };
        let out = run_script(
            ScriptLanguage::Shell,
            "head -c 4000000 /dev/zero | tr '\\0' a",
            &json!({}),
            &small,
        )
        .await
        .unwrap();
        assert!(out.success());
        assert!(out.truncated);
        assert!(out.stdout.starts_with("aaaaaaaaaaaaaaaa"));
        assert!(out.stdout.len() < 64);
    }

    #[tokio::test]
    async fn test_output_truncated_and_exit_code() {
        let small = SandboxLimits {
            max_output_bytes: 16,
            ..limits()
        };
        let out = run_script(
            ScriptLanguage::Shell,
            "printf 'abcdefghijklmnopqrstuvwxyz'; exit 3",
            &json!({}),
            &small,
        )
        .await
        .unwrap();
        assert!(out.truncated);
        assert!(out.stdout.starts_with("abcdefghijklmnop"));
        assert_eq!(out.exit_code, 3);
    }

    #[test]
    fn test_truncate_bytes_char_boundary() {
        let (cut, truncated) = truncate_bytes("ééé".to_string(), 3);
        assert!(truncated);
        assert!(cut.starts_with('é'));
        assert!(!cut.starts_with("éé"));
    }
}
