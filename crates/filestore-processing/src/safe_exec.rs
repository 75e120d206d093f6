//! Bounded execution of external commands.
//!
//! Every command runs as the leader of its own process group. When the timeout
//! elapses the whole group is signalled, so helpers spawned by the tool (ImageMagick
//! delegates such as ghostscript) are reclaimed together with it. A group that
//! survives the configured signal for the grace period is killed outright.

use crate::error::{ProcessingError, ProcessingResult};
use std::process::{ExitStatus, Stdio};
use std::time::Duration;
use tokio::io::{AsyncRead, AsyncReadExt};
use tokio::process::{Child, Command};
use tokio::task::JoinHandle;
use tracing::{debug, warn};

/// How long a signalled process group may linger before SIGKILL.
pub const DEFAULT_GRACE_PERIOD: Duration = Duration::from_secs(5);

/// Per-stream cap on captured output; the rest is read and discarded.
pub const MAX_CAPTURED_BYTES: usize = 64 * 1024;

/// Signal delivered to the process group on timeout.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum KillSignal {
    Term,
    Kill,
}

#[cfg(unix)]
impl From<KillSignal> for nix::sys::signal::Signal {
    fn from(signal: KillSignal) -> Self {
        match signal {
            KillSignal::Term => nix::sys::signal::Signal::SIGTERM,
            KillSignal::Kill => nix::sys::signal::Signal::SIGKILL,
        }
    }
}

#[derive(Debug, Clone)]
pub struct ExecOptions {
    pub timeout: Duration,
    pub kill_signal: KillSignal,
    pub grace_period: Duration,
}

impl ExecOptions {
    pub fn new(timeout: Duration) -> Self {
        Self {
            timeout,
            kill_signal: KillSignal::Term,
            grace_period: DEFAULT_GRACE_PERIOD,
        }
    }

    pub fn with_kill_signal(mut self, kill_signal: KillSignal) -> Self {
        self.kill_signal = kill_signal;
        self
    }

    pub fn with_grace_period(mut self, grace_period: Duration) -> Self {
        self.grace_period = grace_period;
        self
    }
}

/// Captured output of a successful command.
#[derive(Debug, Clone, Default)]
pub struct ExecOutput {
    pub stdout: String,
    pub stderr: String,
}

/// Run `command` (program followed by its arguments) and wait for it to finish.
///
/// Resolves with the captured output when the command exits with status zero. A
/// non-zero exit, a death by signal, or an elapsed timeout are errors carrying the
/// captured stderr. On timeout the process group is terminated and reaped before
/// this returns.
pub async fn safe_exec(command: &[String], options: &ExecOptions) -> ProcessingResult<ExecOutput> {
    let (program, args) = command.split_first().ok_or(ProcessingError::EmptyCommand)?;
    let command_line = command.join(" ");

    let mut cmd = Command::new(program);
    cmd.args(args)
        .stdin(Stdio::null())
        .stdout(Stdio::piped())
        .stderr(Stdio::piped())
        .kill_on_drop(true);
    #[cfg(unix)]
    cmd.process_group(0);

    let mut child = cmd.spawn().map_err(|source| ProcessingError::Spawn {
        command: command_line.clone(),
        source,
    })?;
    // Captured before waiting: tokio forgets the id once the child is reaped.
    let pid = child.id();
    debug!(command = %command_line, pid = ?pid, "Spawned external command");

    let stdout_handle = tokio::spawn(drain(child.stdout.take()));
    let stderr_handle = tokio::spawn(drain(child.stderr.take()));

    let wait_result = tokio::select! {
        result = child.wait() => Some(result),
        _ = tokio::time::sleep(options.timeout) => None,
    };

    let status = match wait_result {
        Some(Ok(status)) => status,
        Some(Err(source)) => {
            return Err(ProcessingError::Wait {
                command: command_line,
                source,
            });
        }
        None => {
            warn!(
                command = %command_line,
                timeout_secs = options.timeout.as_secs_f64(),
                "External command timed out, terminating process group"
            );
            terminate_process_group(&mut child, pid, options).await;
            let stderr = collect(stderr_handle, options.grace_period).await;
            stdout_handle.abort();
            return Err(ProcessingError::Timeout {
                command: command_line,
                timeout: options.timeout,
                stderr,
            });
        }
    };

    let stdout = collect(stdout_handle, options.grace_period).await;
    let stderr = collect(stderr_handle, options.grace_period).await;
    exit_result(command_line, status, stdout, stderr)
}

fn exit_result(
    command: String,
    status: ExitStatus,
    stdout: String,
    stderr: String,
) -> ProcessingResult<ExecOutput> {
    if status.success() {
        return Ok(ExecOutput { stdout, stderr });
    }
    if let Some(code) = status.code() {
        return Err(ProcessingError::Failed {
            command,
            code,
            stderr,
        });
    }
    #[cfg(unix)]
    {
        use std::os::unix::process::ExitStatusExt;
        if let Some(signal) = status.signal() {
            return Err(ProcessingError::Signalled {
                command,
                signal,
                stderr,
            });
        }
    }
    Err(ProcessingError::Failed {
        command,
        code: -1,
        stderr,
    })
}

/// Keeps reading past the cap so a chatty tool never blocks on a full pipe.
async fn drain<R: AsyncRead + Unpin>(pipe: Option<R>) -> String {
    let mut captured = Vec::new();
    if let Some(mut pipe) = pipe {
        let mut chunk = [0u8; 8192];
        loop {
            match pipe.read(&mut chunk).await {
                Ok(0) => break,
                Ok(n) => {
                    let room = MAX_CAPTURED_BYTES.saturating_sub(captured.len());
                    captured.extend_from_slice(&chunk[..n.min(room)]);
                }
                Err(e) => {
                    debug!(error = %e, "Output pipe closed with error");
                    break;
                }
            }
        }
    }
    String::from_utf8_lossy(&captured).into_owned()
}

/// A pipe can stay open after the leader exits if a grandchild inherited it.
async fn collect(handle: JoinHandle<String>, limit: Duration) -> String {
    let abort = handle.abort_handle();
    match tokio::time::timeout(limit, handle).await {
        Ok(Ok(output)) => output,
        Ok(Err(_)) => String::new(),
        Err(_) => {
            abort.abort();
            warn!("Output pipe still open after command exited, discarding remainder");
            String::new()
        }
    }
}

#[cfg(unix)]
async fn terminate_process_group(child: &mut Child, pid: Option<u32>, options: &ExecOptions) {
    use nix::errno::Errno;
    use nix::sys::signal::{killpg, Signal};
    use nix::unistd::Pid;

    let Some(pid) = pid else {
        let _ = child.wait().await;
        return;
    };
    let pgid = Pid::from_raw(pid as i32);
    let signal = Signal::from(options.kill_signal);

    if let Err(e) = killpg(pgid, signal) {
        if e != Errno::ESRCH {
            warn!(pid, signal = ?signal, error = ?e, "Signal to process group failed");
        }
    }

    if signal != Signal::SIGKILL
        && tokio::time::timeout(options.grace_period, child.wait())
            .await
            .is_err()
    {
        warn!(pid, "Process group ignored {:?}, sending SIGKILL", signal);
    }

    // The leader may have exited while members of its group linger; the group id
    // stays reserved until the last member is gone.
    if let Err(e) = killpg(pgid, Signal::SIGKILL) {
        if e != Errno::ESRCH {
            warn!(pid, error = ?e, "SIGKILL to process group failed");
        }
    }

    // Reap
    let _ = child.wait().await;
}

#[cfg(not(unix))]
async fn terminate_process_group(child: &mut Child, _pid: Option<u32>, _options: &ExecOptions) {
    let _ = child.kill().await;
    let _ = child.wait().await;
}

#[cfg(all(test, unix))]
mod tests {
    use super::*;
    use std::time::Instant;

    fn sh(script: &str) -> Vec<String> {
        vec!["sh".to_string(), "-c".to_string(), script.to_string()]
    }

    fn options(timeout_ms: u64) -> ExecOptions {
        ExecOptions::new(Duration::from_millis(timeout_ms))
            .with_grace_period(Duration::from_millis(500))
    }

    #[cfg(target_os = "linux")]
    fn is_running(pid: u32) -> bool {
        match std::fs::read_to_string(format!("/proc/{}/stat", pid)) {
            // Field 3 is the state; zombies are already dead.
            Ok(stat) => stat
                .rsplit(')')
                .next()
                .and_then(|rest| rest.split_whitespace().next())
                .map(|state| state != "Z" && state != "X")
                .unwrap_or(false),
            Err(_) => false,
        }
    }

    #[tokio::test]
    async fn test_successful_command_captures_output() {
        let output = safe_exec(&sh("echo hello; echo oops >&2"), &options(5_000))
            .await
            .unwrap();
        assert_eq!(output.stdout.trim(), "hello");
        assert_eq!(output.stderr.trim(), "oops");
    }

    #[tokio::test]
    async fn test_captured_output_is_capped() {
        let output = safe_exec(&sh("yes a | head -c 200000"), &options(10_000))
            .await
            .unwrap();
        assert_eq!(output.stdout.len(), MAX_CAPTURED_BYTES);
    }

    #[tokio::test]
    async fn test_nonzero_exit_reports_stderr() {
        let err = safe_exec(&sh("echo broken >&2; exit 3"), &options(5_000))
            .await
            .unwrap_err();
        match err {
            ProcessingError::Failed { code, stderr, .. } => {
                assert_eq!(code, 3);
                assert_eq!(stderr.trim(), "broken");
            }
            other => panic!("unexpected error: {:?}", other),
        }
    }

    #[tokio::test]
    async fn test_empty_command_rejected() {
        let err = safe_exec(&[], &options(1_000)).await.unwrap_err();
        assert!(matches!(err, ProcessingError::EmptyCommand));
    }

    #[tokio::test]
    async fn test_missing_program_is_spawn_error() {
        let command = vec!["/nonexistent/filestore-tool".to_string()];
        let err = safe_exec(&command, &options(1_000)).await.unwrap_err();
        assert!(matches!(err, ProcessingError::Spawn { .. }));
    }

    #[tokio::test]
    async fn test_timeout_terminates_command() {
        let started = Instant::now();
        let err = safe_exec(&sh("sleep 30"), &options(200)).await.unwrap_err();
        assert!(matches!(err, ProcessingError::Timeout { .. }));
        assert!(started.elapsed() < Duration::from_secs(10));
    }

    #[tokio::test]
    async fn test_fast_command_is_not_killed() {
        let output = safe_exec(&sh("echo done"), &options(2_000)).await;
        assert!(output.is_ok());
        // Outliving the timeout must not disturb anything already finished.
        tokio::time::sleep(Duration::from_millis(2_200)).await;
    }

    #[cfg(target_os = "linux")]
    #[tokio::test]
    async fn test_timeout_kills_grandchildren() {
        let dir = tempfile::tempdir().unwrap();
        let pid_file = dir.path().join("child.pid");
        let script = format!("sleep 30 & echo $! > {}; wait", pid_file.display());

        let err = safe_exec(&sh(&script), &options(300)).await.unwrap_err();
        assert!(matches!(err, ProcessingError::Timeout { .. }));

        let grandchild: u32 = std::fs::read_to_string(&pid_file)
            .unwrap()
            .trim()
            .parse()
            .unwrap();
        // Orphans are reparented and reaped by init; give it a moment.
        let deadline = Instant::now() + Duration::from_secs(5);
        while is_running(grandchild) && Instant::now() < deadline {
            tokio::time::sleep(Duration::from_millis(50)).await;
        }
        assert!(!is_running(grandchild));
    }

    #[cfg(target_os = "linux")]
    #[tokio::test]
    async fn test_group_ignoring_signal_is_killed_after_grace() {
        let dir = tempfile::tempdir().unwrap();
        let pid_file = dir.path().join("leader.pid");
        let script = format!(
            "trap '' TERM; echo $$ > {}; while :; do sleep 1; done",
            pid_file.display()
        );

        let started = Instant::now();
        let err = safe_exec(&sh(&script), &options(300)).await.unwrap_err();
        assert!(matches!(err, ProcessingError::Timeout { .. }));
        assert!(started.elapsed() < Duration::from_secs(10));

        let leader: u32 = std::fs::read_to_string(&pid_file)
            .unwrap()
            .trim()
            .parse()
            .unwrap();
        assert!(!is_running(leader));
    }

    #[tokio::test]
    async fn test_sigkill_option_skips_grace_period() {
        let opts = ExecOptions::new(Duration::from_millis(200))
            .with_kill_signal(KillSignal::Kill)
            .with_grace_period(Duration::from_secs(30));
        let started = Instant::now();
        let err = safe_exec(&sh("trap '' TERM; sleep 30"), &opts)
            .await
            .unwrap_err();
        assert!(matches!(err, ProcessingError::Timeout { .. }));
        assert!(started.elapsed() < Duration::from_secs(10));
    }
}
