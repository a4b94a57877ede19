//! Shell command execution with a timeout.
//!
//! Commands run through the configured shell in their own process group so
//! that a timeout can kill the whole tree, not just the shell.

use std::process::{ExitStatus, Stdio};
use std::sync::{Arc, Mutex};
use std::time::Duration;

use protocol::messages::{CommandOutput, DEFAULT_COMMAND_TIMEOUT_SECS};
use protocol::GatewayError;
use tokio::io::{AsyncRead, AsyncReadExt};
use tokio::process::{Child, Command};
use tokio::task::JoinHandle;
use tracing::{debug, info, warn};

use crate::sandbox::PathGuard;

/// Exit code reported when a command is killed for exceeding its timeout.
pub const TIMEOUT_EXIT_CODE: i32 = -1;

/// Buffer size for reading command output.
const READ_BUFFER_SIZE: usize = 4096;

/// How long to wait for output readers once the process is gone.
const DRAIN_GRACE: Duration = Duration::from_secs(1);

/// Default shell for the current platform.
pub fn default_shell() -> String {
    if cfg!(windows) {
        "cmd.exe".to_string()
    } else {
        "/bin/sh".to_string()
    }
}

/// Runs shell commands inside the session root.
#[derive(Debug, Clone)]
pub struct CommandRunner {
    guard: PathGuard,
    shell: String,
    default_timeout: Duration,
}

impl CommandRunner {
    /// Create a runner using the platform shell and default timeout.
    pub fn new(guard: PathGuard) -> Self {
        Self {
            guard,
            shell: default_shell(),
            default_timeout: Duration::from_secs(DEFAULT_COMMAND_TIMEOUT_SECS),
        }
    }

    /// Use a different shell binary.
    pub fn with_shell(mut self, shell: impl Into<String>) -> Self {
        self.shell = shell.into();
        self
    }

    /// Timeout applied when a request asks for zero seconds.
    pub fn with_default_timeout(mut self, timeout: Duration) -> Self {
        self.default_timeout = timeout;
        self
    }

    /// Run `cmd` in `cwd`, capturing stdout and stderr.
    ///
    /// A non-zero exit status is reported in the result, not as an error. On
    /// timeout the process group is killed and whatever output was produced
    /// so far is returned with `timed_out` set.
    pub async fn run_command(
        &self,
        cmd: &str,
        cwd: &str,
        timeout_secs: u64,
    ) -> Result<CommandOutput, GatewayError> {
        let work_dir = self.guard.resolve(cwd)?;
        if !work_dir.is_dir() {
            return Err(GatewayError::NotDir(cwd.to_string()));
        }

        let timeout = if timeout_secs == 0 {
            self.default_timeout
        } else {
            Duration::from_secs(timeout_secs)
        };

        info!(cmd, cwd, timeout_secs = timeout.as_secs(), "running command");

        let mut command = self.shell_command(cmd);
        command
            .current_dir(work_dir.as_path())
            .stdin(Stdio::null())
            .stdout(Stdio::piped())
            .stderr(Stdio::piped())
            .kill_on_drop(true);
        #[cfg(unix)]
        {
            command.process_group(0);
        }

        let mut child = command
            .spawn()
            .map_err(|e| GatewayError::Internal(format!("failed to spawn {}: {}", self.shell, e)))?;

        let stdout = OutputCapture::start(child.stdout.take());
        let stderr = OutputCapture::start(child.stderr.take());

        let (exit_code, timed_out) = match tokio::time::timeout(timeout, child.wait()).await {
            Ok(status) => (exit_code(status?), false),
            Err(_) => {
                warn!(cmd, timeout_secs = timeout.as_secs(), "command timed out, killing");
                terminate(&mut child).await;
                (TIMEOUT_EXIT_CODE, true)
            }
        };

        let stdout = stdout.finish().await;
        let stderr = stderr.finish().await;

        if exit_code != 0 && !timed_out {
            warn!(cmd, exit_code, "command exited with non-zero status");
        } else {
            info!(cmd, exit_code, timed_out, "command finished");
        }
        Ok(CommandOutput {
            stdout,
            stderr,
            exit_code,
            timed_out,
        })
    }

    fn shell_command(&self, cmd: &str) -> Command {
        let mut command = Command::new(&self.shell);
        if cfg!(windows) {
            command.arg("/C");
        } else {
            command.arg("-c");
        }
        command.arg(cmd);
        command
    }
}

/// Collects a child output stream in the background.
struct OutputCapture {
    buffer: Arc<Mutex<Vec<u8>>>,
    task: JoinHandle<()>,
}

impl OutputCapture {
    fn start<R>(reader: Option<R>) -> Self
    where
        R: AsyncRead + Unpin + Send + 'static,
    {
        let buffer = Arc::new(Mutex::new(Vec::new()));
        let sink = Arc::clone(&buffer);

        let task = tokio::spawn(async move {
            let Some(mut reader) = reader else {
                return;
            };
            let mut chunk = [0u8; READ_BUFFER_SIZE];
            loop {
                match reader.read(&mut chunk).await {
                    Ok(0) => break,
                    Ok(n) => match sink.lock() {
                        Ok(mut buf) => buf.extend_from_slice(&chunk[..n]),
                        Err(poisoned) => poisoned.into_inner().extend_from_slice(&chunk[..n]),
                    },
                    Err(e) => {
                        debug!(error = %e, "output stream closed with error");
                        break;
                    }
                }
            }
        });

        Self { buffer, task }
    }

    /// Wait briefly for the reader to reach EOF, then decode what was read.
    ///
    /// Invalid UTF-8 is replaced rather than rejected.
    async fn finish(self) -> String {
        let mut task = self.task;
        if tokio::time::timeout(DRAIN_GRACE, &mut task).await.is_err() {
            debug!("output reader still open after grace period, aborting");
            task.abort();
        }

        let bytes = match self.buffer.lock() {
            Ok(buf) => buf.clone(),
            Err(poisoned) => poisoned.into_inner().clone(),
        };
        String::from_utf8_lossy(&bytes).into_owned()
    }
}

/// Kill the child's whole process group, then the child itself.
async fn terminate(child: &mut Child) {
    #[cfg(unix)]
    {
        use nix::sys::signal::{killpg, Signal};
        use nix::unistd::Pid;

        if let Some(pid) = child.id() {
            if let Err(e) = killpg(Pid::from_raw(pid as i32), Signal::SIGKILL) {
                debug!(pid, error = %e, "failed to signal process group");
            }
        }
    }

    if let Err(e) = child.kill().await {
        debug!(error = %e, "failed to kill command process");
    }
}

/// Exit code of a finished process; `-signal` when it was killed by one.
fn exit_code(status: ExitStatus) -> i32 {
    if let Some(code) = status.code() {
        return code;
    }

    #[cfg(unix)]
    {
        use std::os::unix::process::ExitStatusExt;
        if let Some(signal) = status.signal() {
            return -signal;
        }
    }

    TIMEOUT_EXIT_CODE
}
