//! Supervision of long-running encoder subprocesses.
//!
//! Encoders fork helper processes, so on Unix every child is started as the
//! leader of its own process group and all signals go to the whole group.

use async_trait::async_trait;
use reelforge_common::{Error, Result};
use std::fmt;
use std::sync::Arc;
use std::time::Duration;
use tokio::process::Command;
use tokio::sync::{watch, Notify};

/// How a supervised process ended.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct ProcessExit {
    /// Exit code, absent when killed by a signal.
    pub code: Option<i32>,
    /// Whether the process reported success.
    pub success: bool,
}

impl fmt::Display for ProcessExit {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self.code {
            Some(code) => write!(f, "exit code {code}"),
            None => write!(f, "terminated by signal"),
        }
    }
}

/// Control surface over a running external process.
#[async_trait]
pub trait ProcessHandle: Send + Sync + fmt::Debug {
    /// OS process id, if the process was started.
    fn pid(&self) -> Option<u32>;

    /// Stop scheduling the process without killing it.
    fn pause(&self) -> Result<()>;

    /// Continue a paused process.
    fn resume(&self) -> Result<()>;

    /// Ask the process to exit; force it after `grace`.
    async fn terminate(&self, grace: Duration) -> Result<()>;

    /// Wait until the process has exited and been reaped.
    async fn wait(&self) -> ProcessExit;

    /// Exit information if the process has already exited.
    fn try_exit(&self) -> Option<ProcessExit>;
}

/// A child process owned by a background reaper task.
///
/// The reaper publishes the exit on a `watch` channel, so any number of
/// callers can observe it and the process never lingers as a zombie.
#[derive(Debug)]
pub struct SupervisedProcess {
    program: String,
    pid: Option<u32>,
    exit_rx: watch::Receiver<Option<ProcessExit>>,
    kill: Arc<Notify>,
}

impl SupervisedProcess {
    /// Spawn `cmd` and start supervising it.
    ///
    /// # Errors
    ///
    /// Returns [`Error::SpawnError`] when the binary cannot be launched.
    pub fn spawn(mut cmd: Command, program: impl Into<String>) -> Result<Self> {
        let program = program.into();

        #[cfg(unix)]
        cmd.process_group(0);
        cmd.kill_on_drop(true);

        let mut child = cmd
            .spawn()
            .map_err(|e| Error::spawn(&program, e.to_string()))?;
        let pid = child.id();

        let (exit_tx, exit_rx) = watch::channel(None);
        let kill = Arc::new(Notify::new());
        let kill_signal = Arc::clone(&kill);
        let name = program.clone();

        tokio::spawn(async move {
            let status = tokio::select! {
                status = child.wait() => status,
                _ = kill_signal.notified() => {
                    if let Err(e) = child.start_kill() {
                        tracing::debug!(program = %name, error = %e, "Kill after exit");
                    }
                    child.wait().await
                }
            };

            let exit = match status {
                Ok(status) => ProcessExit {
                    code: status.code(),
                    success: status.success(),
                },
                Err(e) => {
                    tracing::warn!(program = %name, error = %e, "Failed to reap process");
                    ProcessExit {
                        code: None,
                        success: false,
                    }
                }
            };
            tracing::debug!(program = %name, pid = ?pid, %exit, "Process exited");
            let _ = exit_tx.send(Some(exit));
        });

        tracing::debug!(program = %program, pid = ?pid, "Spawned process");

        Ok(Self {
            program,
            pid,
            exit_rx,
            kill,
        })
    }

    /// Name used in logs and errors.
    pub fn program(&self) -> &str {
        &self.program
    }

    #[cfg(unix)]
    fn signal_group(&self, signal: nix::sys::signal::Signal) -> Result<()> {
        use nix::errno::Errno;
        use nix::sys::signal::killpg;
        use nix::unistd::Pid;

        let Some(pid) = self.pid else {
            return Ok(());
        };
        if self.try_exit().is_some() {
            return Ok(());
        }
        match killpg(Pid::from_raw(pid as i32), signal) {
            Ok(()) | Err(Errno::ESRCH) => Ok(()),
            Err(e) => Err(Error::tool(
                &self.program,
                format!("failed to send {signal} to process group {pid}: {e}"),
            )),
        }
    }
}

#[async_trait]
impl ProcessHandle for SupervisedProcess {
    fn pid(&self) -> Option<u32> {
        self.pid
    }

    #[cfg(unix)]
    fn pause(&self) -> Result<()> {
        self.signal_group(nix::sys::signal::Signal::SIGSTOP)
    }

    #[cfg(not(unix))]
    fn pause(&self) -> Result<()> {
        tracing::debug!(program = %self.program, "Pause not supported on this platform");
        Ok(())
    }

    #[cfg(unix)]
    fn resume(&self) -> Result<()> {
        self.signal_group(nix::sys::signal::Signal::SIGCONT)
    }

    #[cfg(not(unix))]
    fn resume(&self) -> Result<()> {
        Ok(())
    }

    async fn terminate(&self, grace: Duration) -> Result<()> {
        if self.try_exit().is_some() {
            return Ok(());
        }

        #[cfg(unix)]
        {
            use nix::sys::signal::Signal;

            self.signal_group(Signal::SIGTERM)?;
            // A stopped group only acts on SIGTERM once continued.
            self.signal_group(Signal::SIGCONT)?;

            if tokio::time::timeout(grace, self.wait()).await.is_ok() {
                return Ok(());
            }
            tracing::warn!(
                program = %self.program,
                pid = ?self.pid,
                "Process ignored SIGTERM, killing group"
            );
            self.signal_group(Signal::SIGKILL)?;
        }

        #[cfg(not(unix))]
        let _ = grace;

        self.kill.notify_one();
        self.wait().await;
        Ok(())
    }

    async fn wait(&self) -> ProcessExit {
        let mut rx = self.exit_rx.clone();
        loop {
            if let Some(exit) = *rx.borrow_and_update() {
                return exit;
            }
            if rx.changed().await.is_err() {
                // Reaper gone without publishing: treat as abnormal exit.
                return (*rx.borrow()).unwrap_or(ProcessExit {
                    code: None,
                    success: false,
                });
            }
        }
    }

    fn try_exit(&self) -> Option<ProcessExit> {
        *self.exit_rx.borrow()
    }
}
