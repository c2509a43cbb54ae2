//! Command execution.
//!
//! The supervisor only needs "run this string and tell me how it went", so
//! execution sits behind [`CommandRunner`]. [`ShellRunner`] is the production
//! implementation; tests plug in scripted runners.

use std::process::Stdio;

use async_trait::async_trait;
use tokio::{
    io::{AsyncRead, AsyncReadExt},
    process::Command as AsyncCommand,
};
use tracing::debug;

use crate::error::{Result, SchedulerError};

/// Captured result of a finished command.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ExecOutput {
    /// Process exit code; `-1` when the process was killed by a signal.
    pub exit_code: i32,
    pub stdout: String,
    pub stderr: String,
}

impl ExecOutput {
    pub fn success(&self) -> bool {
        self.exit_code == 0
    }
}

#[async_trait]
pub trait CommandRunner: Send + Sync {
    /// Short name used in logs.
    fn name(&self) -> &str;

    /// Run `command` to completion.
    ///
    /// Implementations must stop the underlying execution when the returned
    /// future is dropped; that is how the supervisor enforces its timeout.
    async fn run(&self, command: &str) -> Result<ExecOutput>;
}

/// Runs commands through `sh -c` as child processes.
#[derive(Debug, Clone)]
pub struct ShellRunner {
    shell: String,
}

impl ShellRunner {
    pub fn new() -> Self {
        Self {
            shell: "sh".to_string(),
        }
    }

    /// Use a different POSIX shell binary (e.g. `/bin/bash`).
    pub fn with_shell(shell: impl Into<String>) -> Self {
        Self {
            shell: shell.into(),
        }
    }
}

impl Default for ShellRunner {
    fn default() -> Self {
        Self::new()
    }
}

#[async_trait]
impl CommandRunner for ShellRunner {
    fn name(&self) -> &str {
        &self.shell
    }

    async fn run(&self, command: &str) -> Result<ExecOutput> {
        debug!(shell = %self.shell, "exec: {command}");

        let mut cmd = AsyncCommand::new(&self.shell);
        cmd.arg("-c")
            .arg(command)
            .stdin(Stdio::null())
            .stdout(Stdio::piped())
            .stderr(Stdio::piped())
            .kill_on_drop(true);
        // The shell leads a fresh group so background jobs it starts can be
        // killed with it.
        #[cfg(unix)]
        cmd.process_group(0);

        let mut child = cmd
            .spawn()
            .map_err(|e| SchedulerError::ExecutionFailure(format!("spawn failed: {e}")))?;
        let mut group = ProcessGroup::new(child.id());
        let stdout = child.stdout.take();
        let stderr = child.stderr.take();

        // Leftover background jobs would keep the pipes open, so the group
        // is killed as soon as the shell itself exits.
        let wait = async {
            let status = child.wait().await;
            group.kill();
            status
        };
        let (status, stdout, stderr) = tokio::join!(wait, read_pipe(stdout), read_pipe(stderr));

        let status =
            status.map_err(|e| SchedulerError::ExecutionFailure(format!("wait failed: {e}")))?;
        let stdout =
            stdout.map_err(|e| SchedulerError::ExecutionFailure(format!("read stdout: {e}")))?;
        let stderr =
            stderr.map_err(|e| SchedulerError::ExecutionFailure(format!("read stderr: {e}")))?;

        Ok(ExecOutput {
            exit_code: status.code().unwrap_or(-1),
            stdout: String::from_utf8_lossy(&stdout).into_owned(),
            stderr: String::from_utf8_lossy(&stderr).into_owned(),
        })
    }
}

async fn read_pipe<R: AsyncRead + Unpin>(pipe: Option<R>) -> std::io::Result<Vec<u8>> {
    let mut buf = Vec::new();
    if let Some(mut pipe) = pipe {
        pipe.read_to_end(&mut buf).await?;
    }
    Ok(buf)
}

/// SIGKILLs the whole process group of a spawned shell, at most once.
///
/// Dropped together with the `run` future, so a supervisor timeout also takes
/// down grandchildren, not just the shell that `kill_on_drop` covers.
struct ProcessGroup {
    pgid: Option<u32>,
}

impl ProcessGroup {
    fn new(pgid: Option<u32>) -> Self {
        Self { pgid }
    }

    fn kill(&mut self) {
        let Some(pgid) = self.pgid.take() else {
            return;
        };
        #[cfg(unix)]
        {
            // Safety: pgid is the id of a group created for our child; the
            // call only sends a signal.
            let rc = unsafe { libc::killpg(pgid as libc::pid_t, libc::SIGKILL) };
            if rc != 0 {
                // ESRCH: every member has already exited.
                debug!(pgid, "killpg: {}", std::io::Error::last_os_error());
            }
        }
        #[cfg(not(unix))]
        let _ = pgid;
    }
}

impl Drop for ProcessGroup {
    fn drop(&mut self) {
        self.kill();
    }
}
