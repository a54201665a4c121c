//! A single supervised child process

use super::{ProcessConfig, ProcessUtils, TerminateOutcome};
use crate::dependency::{LogSink, SupervisorError};
use anyhow::{Context, Result};
use std::io::{BufRead, BufReader, Read};
use std::process::{ExitStatus, Stdio};
use std::sync::Arc;
use std::time::Duration;
use tokio::process::{Child, Command};
use tokio::sync::oneshot;
use tokio::time::timeout;
use tracing::{debug, info, warn};

/// How long to wait for the kernel to reap a killed process
const KILL_REAP_TIMEOUT: Duration = Duration::from_secs(5);

/// How long to wait for the reader to drain the pipe after exit
const READER_JOIN_TIMEOUT: Duration = Duration::from_secs(2);

/// Owned child process plus its output reader
pub struct ProcessHandle {
    name: String,
    pid: u32,
    child: Child,
    exit_status: Option<ExitStatus>,
    reader_done: Option<oneshot::Receiver<u64>>,
}

impl ProcessHandle {
    /// Spawn the process with stdout and stderr merged into `sink`
    pub fn launch(config: &ProcessConfig, sink: Arc<LogSink>) -> Result<Self, SupervisorError> {
        Self::spawn(config, sink).map_err(|e| SupervisorError::ProcessLaunchFailed {
            service: config.name.clone(),
            source: e,
        })
    }

    fn spawn(config: &ProcessConfig, sink: Arc<LogSink>) -> Result<Self> {
        if config.name.is_empty() {
            anyhow::bail!("Process name cannot be empty");
        }
        if let Some(dir) = &config.working_dir {
            if !dir.is_dir() {
                anyhow::bail!("Working directory does not exist: {}", dir.display());
            }
        }

        let (output, writer) = std::io::pipe().context("Failed to create output pipe")?;

        // The command holds the parent's copies of the write end; it must be
        // dropped before reading or the reader never sees EOF.
        let child = {
            let mut command = Command::new(&config.command);
            command
                .args(&config.args)
                .envs(config.env_vars.iter().map(|(k, v)| (k.as_str(), v.as_str())))
                .stdin(Stdio::null())
                .stdout(writer.try_clone().context("Failed to clone output pipe")?)
                .stderr(writer)
                .kill_on_drop(true);

            if let Some(dir) = &config.working_dir {
                command.current_dir(dir);
            }

            #[cfg(unix)]
            command.process_group(0);

            #[cfg(windows)]
            {
                const CREATE_NO_WINDOW: u32 = 0x0800_0000;
                const CREATE_NEW_PROCESS_GROUP: u32 = 0x0000_0200;
                command.creation_flags(CREATE_NO_WINDOW | CREATE_NEW_PROCESS_GROUP);
            }

            command
                .spawn()
                .with_context(|| format!("Failed to spawn {}", config.command.display()))?
        };

        let pid = child
            .id()
            .context("Process exited before its pid could be read")?;

        let (done_tx, done_rx) = oneshot::channel();
        let service = config.name.clone();
        std::thread::Builder::new()
            .name(format!("{service}-output"))
            .spawn(move || {
                let forwarded = forward_lines(output, &service, &sink);
                let _ = done_tx.send(forwarded);
            })
            .context("Failed to start output reader thread")?;

        info!(service = %config.name, pid, command = %config.command.display(), "Process started");

        Ok(Self {
            name: config.name.clone(),
            pid,
            child,
            exit_status: None,
            reader_done: Some(done_rx),
        })
    }

    pub fn name(&self) -> &str {
        &self.name
    }

    pub fn pid(&self) -> u32 {
        self.pid
    }

    /// Exit status, once the process has been observed to exit
    pub fn exit_status(&self) -> Option<ExitStatus> {
        self.exit_status
    }

    pub fn is_alive(&mut self) -> bool {
        if self.exit_status.is_some() {
            return false;
        }

        let poll = self.child.try_wait();
        match &poll {
            Ok(Some(status)) => {
                debug!(service = %self.name, pid = self.pid, %status, "Process has exited");
                self.exit_status = Some(*status);
            }
            Ok(None) => {}
            Err(e) => {
                warn!(service = %self.name, pid = self.pid, error = %e, "Failed to poll process");
            }
        }
        poll_means_alive(&poll)
    }

    /// Stop politely, then force-kill the tree once `grace` runs out
    ///
    /// Calling this on an exited process is a no-op.
    pub async fn terminate(&mut self, grace: Duration) -> TerminateOutcome {
        if !self.is_alive() {
            self.join_reader().await;
            return TerminateOutcome::AlreadyExited;
        }

        info!(service = %self.name, pid = self.pid, grace_ms = grace.as_millis() as u64, "Stopping process");
        ProcessUtils::request_stop(self.pid).await;

        let outcome = match timeout(grace, self.child.wait()).await {
            Ok(Ok(status)) => {
                info!(service = %self.name, pid = self.pid, %status, "Process stopped");
                self.exit_status = Some(status);
                // Sweep anything the service left behind in its group
                #[cfg(unix)]
                ProcessUtils::kill_tree(self.pid).await;
                TerminateOutcome::Graceful
            }
            Ok(Err(e)) => {
                warn!(service = %self.name, pid = self.pid, error = %e, "Failed to wait for process");
                self.force_kill().await;
                TerminateOutcome::Forced
            }
            Err(_) => {
                warn!(
                    service = %self.name,
                    pid = self.pid,
                    grace_ms = grace.as_millis() as u64,
                    "Process ignored stop request, killing"
                );
                self.force_kill().await;
                TerminateOutcome::Forced
            }
        };

        self.join_reader().await;
        outcome
    }

    async fn force_kill(&mut self) {
        ProcessUtils::kill_tree(self.pid).await;
        if let Err(e) = self.child.start_kill() {
            debug!(service = %self.name, pid = self.pid, error = %e, "start_kill failed");
        }

        match timeout(KILL_REAP_TIMEOUT, self.child.wait()).await {
            Ok(Ok(status)) => {
                info!(service = %self.name, pid = self.pid, %status, "Process killed");
                self.exit_status = Some(status);
            }
            Ok(Err(e)) => warn!(service = %self.name, pid = self.pid, error = %e, "Failed to reap killed process"),
            Err(_) => warn!(service = %self.name, pid = self.pid, "Killed process was not reaped in time"),
        }
    }

    /// Wait briefly for the reader to hit end of stream
    async fn join_reader(&mut self) {
        let Some(done) = self.reader_done.take() else {
            return;
        };

        match timeout(READER_JOIN_TIMEOUT, done).await {
            Ok(Ok(lines)) => debug!(service = %self.name, lines, "Output reader finished"),
            Ok(Err(_)) => debug!(service = %self.name, "Output reader ended without a count"),
            Err(_) => warn!(
                service = %self.name,
                "Output stream still open after exit, detaching reader"
            ),
        }
    }
}

/// Only an observed exit counts as dead; an unknown state keeps the stop path live
fn poll_means_alive(poll: &std::io::Result<Option<ExitStatus>>) -> bool {
    !matches!(poll, Ok(Some(_)))
}

/// Forward every line of `output` to the sink until end of stream
fn forward_lines(output: impl Read, service: &str, sink: &LogSink) -> u64 {
    let mut reader = BufReader::new(output);
    let mut buf = Vec::with_capacity(256);
    let mut forwarded = 0;

    loop {
        buf.clear();
        match reader.read_until(b'\n', &mut buf) {
            Ok(0) => break,
            Ok(_) => {
                sink.record(service, &String::from_utf8_lossy(&buf));
                forwarded += 1;
            }
            Err(e) if e.kind() == std::io::ErrorKind::Interrupted => continue,
            Err(e) => {
                warn!(service, error = %e, "Failed to read process output");
                break;
            }
        }
    }

    forwarded
}
