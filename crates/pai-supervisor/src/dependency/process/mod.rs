//! Child process management for supervised services
//!
//! A [`ProcessHandle`] owns one child: its merged stdout/stderr stream is
//! drained line by line into the [`LogSink`](crate::dependency::LogSink), and
//! termination escalates from a polite stop to a forced kill of the whole
//! process tree. [`ProcessManager`] keeps at most one live handle per name.

pub mod process_handle;
pub mod process_manager;

pub use process_handle::ProcessHandle;
pub use process_manager::ProcessManager;

use anyhow::Result;
use std::path::PathBuf;

/// Launch description of one child process
#[derive(Debug, Clone)]
pub struct ProcessConfig {
    pub name: String,
    pub command: PathBuf,
    pub args: Vec<String>,
    pub working_dir: Option<PathBuf>,
    pub env_vars: Vec<(String, String)>,
}

impl ProcessConfig {
    pub fn new(name: impl Into<String>, command: impl Into<PathBuf>) -> Self {
        Self {
            name: name.into(),
            command: command.into(),
            args: Vec::new(),
            working_dir: None,
            env_vars: Vec::new(),
        }
    }

    pub fn with_args<I, S>(mut self, args: I) -> Self
    where
        I: IntoIterator<Item = S>,
        S: Into<String>,
    {
        self.args = args.into_iter().map(Into::into).collect();
        self
    }

    pub fn with_working_dir(mut self, dir: impl Into<PathBuf>) -> Self {
        self.working_dir = Some(dir.into());
        self
    }

    pub fn with_env_var(mut self, key: impl Into<String>, value: impl Into<String>) -> Self {
        self.env_vars.push((key.into(), value.into()));
        self
    }
}

/// How a terminate call ended
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum TerminateOutcome {
    /// The process had already exited; nothing was sent
    AlreadyExited,
    /// The process exited within the grace period after a polite stop
    Graceful,
    /// The grace period ran out and the process tree was killed
    Forced,
}

impl TerminateOutcome {
    pub fn was_forced(&self) -> bool {
        matches!(self, TerminateOutcome::Forced)
    }
}

/// Platform signalling helpers
pub struct ProcessUtils;

impl ProcessUtils {
    /// Check if a process with given PID is running
    pub fn is_process_running(pid: u32) -> Result<bool> {
        #[cfg(unix)]
        {
            // Signal 0 performs the permission and existence checks only
            let rc = unsafe { libc::kill(pid as libc::pid_t, 0) };
            if rc == 0 {
                return Ok(true);
            }
            Ok(std::io::Error::last_os_error().raw_os_error() == Some(libc::EPERM))
        }

        #[cfg(windows)]
        {
            use anyhow::Context;

            let output = std::process::Command::new("tasklist")
                .args(["/FI", &format!("PID eq {pid}"), "/NH", "/FO", "CSV"])
                .output()
                .context("Failed to execute tasklist")?;
            let listing = String::from_utf8_lossy(&output.stdout);
            Ok(listing.contains(&format!("\"{pid}\"")))
        }

        #[cfg(not(any(unix, windows)))]
        {
            let _ = pid;
            Ok(false)
        }
    }

    /// Ask the process tree rooted at `pid` to stop
    pub async fn request_stop(pid: u32) {
        #[cfg(unix)]
        Self::signal_group(pid, libc::SIGTERM);

        #[cfg(windows)]
        Self::taskkill(pid, false).await;

        #[cfg(not(any(unix, windows)))]
        let _ = pid;
    }

    /// Kill the process tree rooted at `pid`
    pub async fn kill_tree(pid: u32) {
        #[cfg(unix)]
        Self::signal_group(pid, libc::SIGKILL);

        #[cfg(windows)]
        Self::taskkill(pid, true).await;

        #[cfg(not(any(unix, windows)))]
        let _ = pid;
    }

    /// Signal every member of the process group led by `pid`
    #[cfg(unix)]
    fn signal_group(pid: u32, signal: libc::c_int) {
        // Children are spawned as group leaders, so pgid == pid
        let rc = unsafe { libc::kill(-(pid as libc::pid_t), signal) };
        if rc != 0 {
            let err = std::io::Error::last_os_error();
            if err.raw_os_error() != Some(libc::ESRCH) {
                tracing::debug!(pid, signal, error = %err, "Failed to signal process group");
            }
        }
    }

    #[cfg(windows)]
    async fn taskkill(pid: u32, force: bool) {
        const CREATE_NO_WINDOW: u32 = 0x0800_0000;

        let mut command = tokio::process::Command::new("taskkill");
        command.args(["/PID", &pid.to_string(), "/T"]);
        if force {
            command.arg("/F");
        }
        command
            .stdout(std::process::Stdio::null())
            .stderr(std::process::Stdio::null())
            .creation_flags(CREATE_NO_WINDOW);

        if let Err(e) = command.status().await {
            tracing::debug!(pid, force, error = %e, "Failed to run taskkill");
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_process_config_builder() {
        let config = ProcessConfig::new("qdrant", "/opt/pai/bin/qdrant")
            .with_args(["--disable-telemetry"])
            .with_working_dir("/opt/pai")
            .with_env_var("QDRANT__SERVICE__HTTP_PORT", "6333");

        assert_eq!(config.args, vec!["--disable-telemetry".to_string()]);
        assert_eq!(config.working_dir, Some(PathBuf::from("/opt/pai")));
        assert_eq!(
            config.env_vars,
            vec![("QDRANT__SERVICE__HTTP_PORT".to_string(), "6333".to_string())]
        );
    }

    #[cfg(unix)]
    #[test]
    fn test_own_process_is_running() {
        assert!(ProcessUtils::is_process_running(std::process::id()).unwrap());
    }
}
