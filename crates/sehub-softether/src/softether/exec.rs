//! Process bridge for the SoftEther `vpncmd` management tool.
//!
//! Spawns one `vpncmd` process per invocation against the configured
//! hub, holding an advisory file lock for the lifetime of the process so
//! other programs driving the same tool never run concurrently with us.
//! Failure classification of the raw output lives here too.

use crate::softether::types::*;
use async_trait::async_trait;
use fs2::FileExt;
use log::{debug, warn};
use lazy_static::lazy_static;
use regex::Regex;
use std::fs::{File, OpenOptions};
use std::path::{Path, PathBuf};
use std::process::Stdio;
use std::time::{Duration, Instant};
use tokio::io::AsyncWriteExt;
use tokio::process::Command;

/// Executes a single invocation and returns the raw process output.
///
/// Implementations do not retry and do not serialize; the broker owns both.
#[async_trait]
pub trait CommandRunner: Send + Sync {
    async fn run(&self, invocation: &Invocation) -> Result<CommandOutput, SoftEtherError>;
}

// ━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━
//  Advisory lock
// ━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━

const LOCK_POLL_INTERVAL: Duration = Duration::from_millis(50);

/// Exclusive lock on a shared file, waited for up to a fixed bound.
#[derive(Debug, Clone)]
pub struct ProcessLock {
    path: PathBuf,
    wait: Duration,
}

/// Held lock; released on drop.
#[derive(Debug)]
pub struct ProcessLockGuard {
    file: File,
}

impl Drop for ProcessLockGuard {
    fn drop(&mut self) {
        if let Err(e) = FileExt::unlock(&self.file) {
            warn!("Failed to release vpncmd lock: {}", e);
        }
    }
}

impl ProcessLock {
    pub fn new(path: impl Into<PathBuf>, wait: Duration) -> Self {
        Self {
            path: path.into(),
            wait,
        }
    }

    pub fn path(&self) -> &Path {
        &self.path
    }

    /// Acquire the lock, polling until the wait bound elapses.
    pub async fn acquire(&self) -> Result<ProcessLockGuard, SoftEtherError> {
        let path = self.path.clone();
        let wait = self.wait;
        tokio::task::spawn_blocking(move || lock_blocking(&path, wait))
            .await
            .map_err(|e| SoftEtherError::io(format!("Lock task failed: {}", e)))?
    }
}

fn lock_blocking(path: &Path, wait: Duration) -> Result<ProcessLockGuard, SoftEtherError> {
    let file = OpenOptions::new()
        .create(true)
        .read(true)
        .write(true)
        .truncate(false)
        .open(path)
        .map_err(|e| SoftEtherError::io(format!("Cannot open vpncmd lock file: {}", e.kind())))?;

    let deadline = Instant::now() + wait;
    loop {
        match file.try_lock_exclusive() {
            Ok(()) => return Ok(ProcessLockGuard { file }),
            Err(_) if Instant::now() < deadline => std::thread::sleep(LOCK_POLL_INTERVAL),
            Err(_) => {
                return Err(SoftEtherError::busy(
                    "vpncmd lock is held by another process",
                ))
            }
        }
    }
}

// ━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━
//  vpncmd runner
// ━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━

/// Runs `vpncmd` in server-admin mode against one hub.
#[derive(Debug, Clone)]
pub struct VpnCmdRunner {
    vpncmd_path: String,
    server: String,
    hub: String,
    hub_password: Option<String>,
    timeout: Duration,
    lock: Option<ProcessLock>,
}

impl VpnCmdRunner {
    pub fn from_config(config: &SoftEtherConfig) -> Self {
        Self {
            vpncmd_path: config.vpncmd_path.clone(),
            server: config.server.clone(),
            hub: config.hub.clone(),
            hub_password: config.hub_password.clone(),
            timeout: config.timeout(),
            lock: config
                .lock_file
                .as_ref()
                .map(|p| ProcessLock::new(p.clone(), config.lock_wait())),
        }
    }

    /// Leading arguments shared by every invocation.
    fn connection_args(&self) -> Vec<String> {
        let mut args = vec![
            self.server.clone(),
            "/SERVER".to_string(),
            format!("/HUB:{}", self.hub),
        ];
        if let Some(ref pass) = self.hub_password {
            args.push(format!("/PASSWORD:{}", pass));
        }
        args
    }

    fn build_command(&self, invocation: &Invocation) -> Command {
        let mut cmd = Command::new(&self.vpncmd_path);
        cmd.args(self.connection_args())
            .stdout(Stdio::piped())
            .stderr(Stdio::piped())
            .kill_on_drop(true);

        match invocation {
            Invocation::Command { command, args } => {
                cmd.arg("/CMD").arg(command).args(args).stdin(Stdio::null());
            }
            Invocation::Script(_) => {
                cmd.stdin(Stdio::piped());
            }
        }
        cmd
    }

    async fn spawn_and_wait(&self, invocation: &Invocation) -> Result<CommandOutput, SoftEtherError> {
        let mut child = self.build_command(invocation).spawn().map_err(|e| {
            if e.kind() == std::io::ErrorKind::NotFound {
                SoftEtherError::config("vpncmd executable not found; check VPNCMD_PATH")
            } else {
                SoftEtherError::io(format!("Failed to execute vpncmd: {}", e))
            }
        })?;

        if let Invocation::Script(lines) = invocation {
            if let Some(mut stdin) = child.stdin.take() {
                let mut body = lines.join("\n");
                body.push('\n');
                stdin
                    .write_all(body.as_bytes())
                    .await
                    .map_err(|e| SoftEtherError::io(format!("Failed to write vpncmd script: {}", e)))?;
                // Dropping stdin closes it so vpncmd exits after the last line.
            }
        }

        let output = child
            .wait_with_output()
            .await
            .map_err(|e| SoftEtherError::io(format!("Failed to collect vpncmd output: {}", e)))?;

        Ok(CommandOutput {
            stdout: String::from_utf8_lossy(&output.stdout).to_string(),
            stderr: String::from_utf8_lossy(&output.stderr).to_string(),
            exit_code: output.status.code(),
        })
    }
}

#[async_trait]
impl CommandRunner for VpnCmdRunner {
    async fn run(&self, invocation: &Invocation) -> Result<CommandOutput, SoftEtherError> {
        debug!("Running vpncmd: {}", invocation.redacted());

        let _guard = match self.lock {
            Some(ref lock) => Some(lock.acquire().await?),
            None => None,
        };

        match tokio::time::timeout(self.timeout, self.spawn_and_wait(invocation)).await {
            Err(_) => Err(SoftEtherError::timeout(format!(
                "{} timed out after {:?}",
                invocation.name(),
                self.timeout
            ))),
            Ok(result) => result,
        }
    }
}

// ━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━
//  Failure classification
// ━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━

lazy_static! {
    static ref ERROR_CODE_RE: Option<Regex> = Regex::new(r"(?i)error\s+code:\s*(\d+)").ok();
    static ref TRANSIENT_RE: Option<Regex> =
        Regex::new(r"(?i)busy|locked|try again|timeout|timed out").ok();
}

/// Extract the embedded `Error code: N` marker.
pub fn embedded_error_code(text: &str) -> Option<u32> {
    let caps = ERROR_CODE_RE.as_ref()?.captures(text)?;
    caps.get(1)?.as_str().parse().ok()
}

/// Whether the text carries one of the known contention markers.
pub fn has_transient_marker(text: &str) -> bool {
    TRANSIENT_RE
        .as_ref()
        .map(|re| re.is_match(text))
        .unwrap_or(false)
}

/// Turn raw process output into stdout or a classified error.
pub fn classify_output(invocation: &Invocation, output: &CommandOutput) -> Result<String, SoftEtherError> {
    let combined = format!("{}\n{}", output.stdout, output.stderr);
    let code = embedded_error_code(&combined);

    if output.exited_ok() && code.is_none() {
        return Ok(output.stdout.clone());
    }

    let summary = failure_summary(&combined, output.exit_code);
    let message = format!("{} failed: {}", invocation.name(), summary);

    if has_transient_marker(&combined) {
        let lowered = combined.to_lowercase();
        return Err(if lowered.contains("timeout") || lowered.contains("timed out") {
            SoftEtherError::timeout(message)
        } else {
            SoftEtherError::busy(message)
        });
    }

    Err(match code {
        Some(ERR_OBJECT_NOT_FOUND) => SoftEtherError::not_found(message).with_code(ERR_OBJECT_NOT_FOUND),
        Some(c) => SoftEtherError::process(message).with_code(c),
        None => SoftEtherError::process(message),
    })
}

/// Short description of a failure without echoing the full output.
fn failure_summary(combined: &str, exit_code: Option<i32>) -> String {
    let line = combined
        .lines()
        .map(str::trim)
        .find(|l| {
            let lower = l.to_lowercase();
            lower.starts_with("error") || lower.contains("error occurred")
        });
    match (line, exit_code) {
        (Some(l), _) => l.to_string(),
        (None, Some(c)) => format!("vpncmd exited with status {}", c),
        (None, None) => "vpncmd was terminated".to_string(),
    }
}
