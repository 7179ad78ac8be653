//! Sandboxed execution of untrusted submissions.
//!
//! Submissions run inside a container with a hard memory limit, no
//! network and read-only mounts for the judge and exercise resources.
//! The wall-clock limit is enforced from outside by a watchdog racing
//! the child process: untrusted code cannot be trusted to terminate
//! itself, so on timeout the whole process group is killed with SIGKILL.

use async_trait::async_trait;
use std::os::unix::process::ExitStatusExt;
use std::path::{Path, PathBuf};
use std::process::Stdio;
use std::time::{Duration, Instant};
use tempfile::TempDir;
use tokio::fs;
use tokio::io::{AsyncReadExt, AsyncWriteExt};
use tokio::process::Command;
use tracing::{debug, info, warn};

use crate::config::{ExecutionRequest, RunnerSettings, SandboxInput};
use crate::errors::{classify, ErrorIdentifier, ErrorKind, JudgeError};

/// What one execution attempt produced. Never mutated afterwards.
#[derive(Debug)]
pub struct ExecutionOutcome {
    /// Exit code when the process exited; the terminating signal number
    /// when it was killed. The latter is a reconstruction, not a real
    /// exit status.
    pub exit_code: i32,
    pub stdout: String,
    pub stderr: String,
    pub wall_time: Duration,
    /// Whether the external watchdog fired before the process exited.
    pub timed_out: bool,
}

impl ExecutionOutcome {
    pub fn is_success(&self) -> bool {
        self.exit_code == 0 && !self.timed_out
    }
}

/// Staged working directory for one execution.
pub struct Workspace {
    dir: TempDir,
    /// Randomized mount point of the submission inside the container,
    /// hidden so the untrusted code cannot guess it.
    pub hidden_path: String,
}

impl Workspace {
    pub fn new(dir: TempDir, hidden_path: String) -> Self {
        Self { dir, hidden_path }
    }

    pub fn path(&self) -> &Path {
        self.dir.path()
    }

    pub fn submission_dir(&self) -> PathBuf {
        self.dir.path().join("submission")
    }

    pub fn resources_dir(&self) -> PathBuf {
        self.dir.path().join("resources")
    }

    fn close(self) -> std::io::Result<()> {
        self.dir.close()
    }
}

/// Execution seam for the orchestrator.
#[async_trait]
pub trait Sandbox: Send + Sync {
    /// Stage the submission and its resources. Failure is fatal.
    async fn prepare(&self, request: &ExecutionRequest) -> Result<Workspace, JudgeError>;

    /// Run the staged submission under resource limits.
    async fn execute(
        &self,
        request: &ExecutionRequest,
        workspace: &Workspace,
    ) -> Result<ExecutionOutcome, JudgeError>;

    /// Classify a failed outcome against the identifier table.
    fn classify(&self, outcome: &ExecutionOutcome) -> ErrorKind;

    /// Delete the staged directory. Best effort.
    async fn finalize(&self, workspace: Workspace);
}

/// Sandbox backed by `docker run`.
pub struct DockerSandbox {
    settings: RunnerSettings,
    identifiers: Vec<ErrorIdentifier>,
}

impl DockerSandbox {
    /// The identifier table is fixed at construction; there is no
    /// mutable registry.
    pub fn new(settings: RunnerSettings, identifiers: Vec<ErrorIdentifier>) -> Self {
        Self { settings, identifiers }
    }

    fn run_command(&self, request: &ExecutionRequest, workspace: &Workspace) -> Command {
        let hidden = &workspace.hidden_path;
        let mut command = Command::new("docker");
        command.arg("run").arg("-i").arg("--rm");
        if !self.settings.allow_network {
            command.arg("--network").arg("none");
        }
        command
            .arg("--memory")
            .arg(format!("{}B", request.memory_limit))
            // Submission mounted under the hidden path.
            .arg("-v")
            .arg(format!(
                "{}:{}/submission",
                workspace.submission_dir().display(),
                hidden
            ))
            // Exercise evaluation resources, read-only.
            .arg("-v")
            .arg(format!(
                "{}:{}/resources/judge:ro",
                request.exercise_path.join("evaluation").display(),
                hidden
            ))
            // Judge definition, read-only.
            .arg("-v")
            .arg(format!("{}:{}/judge:ro", request.judge_path.display(), hidden))
            // Runner home, read-write, collects the metric logs.
            .arg("-v")
            .arg(format!("{}:/home/runner", workspace.resources_dir().display()))
            .arg(&request.judge_image)
            .arg("/main.sh")
            .arg(format!("{}/judge/run.sh", hidden))
            .arg(hidden);
        command
    }
}

#[async_trait]
impl Sandbox for DockerSandbox {
    async fn prepare(&self, request: &ExecutionRequest) -> Result<Workspace, JudgeError> {
        let dir = tempfile::tempdir().map_err(JudgeError::Staging)?;

        let submission_dir = dir.path().join("submission");
        fs::create_dir(&submission_dir).await.map_err(JudgeError::Staging)?;
        let source_name = self.settings.source_name(&request.programming_language);
        fs::write(submission_dir.join(&source_name), &request.source)
            .await
            .map_err(JudgeError::Staging)?;

        let resources_dir = dir.path().join("resources");
        fs::create_dir(&resources_dir).await.map_err(JudgeError::Staging)?;
        let media = request.exercise_path.join("evaluation").join("media");
        if fs::metadata(&media).await.is_ok() {
            copy_dir_recursive(&media, &resources_dir.join("media"))
                .await
                .map_err(JudgeError::Staging)?;
        }

        // The container would otherwise create these as root.
        fs::create_dir(submission_dir.join("judge"))
            .await
            .map_err(JudgeError::Staging)?;
        fs::create_dir(submission_dir.join("resources"))
            .await
            .map_err(JudgeError::Staging)?;

        let workspace = Workspace::new(dir, format!("/mnt/{}", hidden_token()));
        debug!(
            "Staged submission at {:?} (hidden path {})",
            workspace.path(),
            workspace.hidden_path
        );
        Ok(workspace)
    }

    async fn execute(
        &self,
        request: &ExecutionRequest,
        workspace: &Workspace,
    ) -> Result<ExecutionOutcome, JudgeError> {
        let source_name = self.settings.source_name(&request.programming_language);
        let input = SandboxInput::compose(request, &workspace.hidden_path, &source_name);
        let payload = serde_json::to_vec(&input)
            .map_err(|e| JudgeError::Internal(format!("Failed to encode sandbox input: {}", e)))?;

        let command = self.run_command(request, workspace);
        info!(
            "Executing submission in {} (time limit {}s, memory limit {}B)",
            request.judge_image, request.time_limit, request.memory_limit
        );
        run_with_watchdog(command, Some(payload), Duration::from_secs(request.time_limit)).await
    }

    fn classify(&self, outcome: &ExecutionOutcome) -> ErrorKind {
        classify(&self.identifiers, outcome)
    }

    async fn finalize(&self, workspace: Workspace) {
        let path = workspace.path().to_path_buf();
        if let Err(e) = workspace.close() {
            warn!("Failed to clean up working directory {:?}: {}", path, e);
        } else {
            debug!("Cleaned up working directory {:?}", path);
        }
    }
}

/// Run a command with separately captured stdout/stderr and a hard
/// wall-clock limit.
///
/// The watchdog races the child's natural exit; if it fires first, the
/// child's entire process group receives SIGKILL and the outcome is
/// marked as timed out. Which side won the race is what later
/// disambiguates a timeout kill from a memory-limit kill.
pub async fn run_with_watchdog(
    mut command: Command,
    stdin_payload: Option<Vec<u8>>,
    limit: Duration,
) -> Result<ExecutionOutcome, JudgeError> {
    command
        .stdin(if stdin_payload.is_some() { Stdio::piped() } else { Stdio::null() })
        .stdout(Stdio::piped())
        .stderr(Stdio::piped())
        .process_group(0)
        .kill_on_drop(true);

    let start = Instant::now();
    let mut child = command.spawn().map_err(JudgeError::Launch)?;
    let pid = child.id();

    if let Some(payload) = stdin_payload {
        if let Some(mut stdin) = child.stdin.take() {
            // The child may exit without reading its stdin.
            if let Err(e) = stdin.write_all(&payload).await {
                debug!("Sandbox did not consume its stdin: {}", e);
            }
        }
    }

    let mut stdout_pipe = child.stdout.take();
    let stdout_task = tokio::spawn(async move {
        let mut buf = Vec::new();
        if let Some(pipe) = stdout_pipe.as_mut() {
            let _ = pipe.read_to_end(&mut buf).await;
        }
        buf
    });
    let mut stderr_pipe = child.stderr.take();
    let stderr_task = tokio::spawn(async move {
        let mut buf = Vec::new();
        if let Some(pipe) = stderr_pipe.as_mut() {
            let _ = pipe.read_to_end(&mut buf).await;
        }
        buf
    });

    let (status, timed_out) = tokio::select! {
        status = child.wait() => (status.map_err(JudgeError::Launch)?, false),
        _ = tokio::time::sleep(limit) => {
            warn!("Watchdog fired after {:?}, killing sandbox process group", limit);
            kill_process_group(pid);
            (child.wait().await.map_err(JudgeError::Launch)?, true)
        }
    };
    let wall_time = start.elapsed();

    let stdout_bytes = stdout_task.await.unwrap_or_default();
    let stderr_bytes = stderr_task.await.unwrap_or_default();

    let exit_code = status.code().unwrap_or_else(|| {
        // Killed by a signal: report the signal number so the identifier
        // table can match it. Stop/term signals are not real exit
        // statuses.
        status.signal().unwrap_or(-1)
    });

    Ok(ExecutionOutcome {
        exit_code,
        stdout: String::from_utf8_lossy(&stdout_bytes).to_string(),
        stderr: String::from_utf8_lossy(&stderr_bytes).to_string(),
        wall_time,
        timed_out,
    })
}

fn kill_process_group(pid: Option<u32>) {
    let Some(pid) = pid else { return };
    // The child is its own group leader, so its pid is the pgid.
    let pgid = nix::unistd::Pid::from_raw(pid as i32);
    if let Err(e) = nix::sys::signal::killpg(pgid, nix::sys::signal::Signal::SIGKILL) {
        warn!("Failed to kill sandbox process group {}: {}", pgid, e);
    }
}

/// Random URL-safe token for the hidden mount point.
fn hidden_token() -> String {
    const ALPHABET: &[u8] =
        b"ABCDEFGHIJKLMNOPQRSTUVWXYZabcdefghijklmnopqrstuvwxyz0123456789-_";
    (0..22)
        .map(|_| ALPHABET[fastrand::usize(..ALPHABET.len())] as char)
        .collect()
}

async fn copy_dir_recursive(src: &Path, dest: &Path) -> std::io::Result<()> {
    fs::create_dir_all(dest).await?;
    let mut pending = vec![(src.to_path_buf(), dest.to_path_buf())];
    while let Some((src, dest)) = pending.pop() {
        let mut entries = fs::read_dir(&src).await?;
        while let Some(entry) = entries.next_entry().await? {
            let target = dest.join(entry.file_name());
            if entry.metadata().await?.is_dir() {
                fs::create_dir_all(&target).await?;
                pending.push((entry.path(), target));
            } else {
                fs::copy(entry.path(), &target).await?;
            }
        }
    }
    Ok(())
}
