//! Registry of supervised processes, keyed by service name

use super::{ProcessConfig, ProcessHandle, TerminateOutcome};
use crate::dependency::{LogSink, SupervisorError};
use futures::future::join_all;
use std::collections::HashMap;
use std::sync::Arc;
use std::time::Duration;
use tracing::{debug, info, warn};

/// Process manager holding at most one live process per name
pub struct ProcessManager {
    /// Managed processes by name
    processes: HashMap<String, ProcessHandle>,

    /// Destination of every child's output
    sink: Arc<LogSink>,
}

impl ProcessManager {
    pub fn new(sink: Arc<LogSink>) -> Self {
        Self {
            processes: HashMap::new(),
            sink,
        }
    }

    pub fn log_sink(&self) -> &Arc<LogSink> {
        &self.sink
    }

    /// Start a process, refusing if one with the same name is still alive
    pub fn start_process(&mut self, config: &ProcessConfig) -> Result<u32, SupervisorError> {
        if let Some(existing) = self.processes.get_mut(&config.name) {
            if existing.is_alive() {
                warn!(process_name = %config.name, pid = existing.pid(), "Process is already running");
                return Err(SupervisorError::AlreadyRunning {
                    service: config.name.clone(),
                    pid: existing.pid(),
                });
            }
            debug!(process_name = %config.name, "Replacing record of exited process");
        }

        let handle = ProcessHandle::launch(config, Arc::clone(&self.sink))?;
        let pid = handle.pid();
        self.processes.insert(config.name.clone(), handle);

        Ok(pid)
    }

    /// Terminate one process by name; `None` if it was never started
    pub async fn terminate_process(
        &mut self,
        name: &str,
        grace: Duration,
    ) -> Option<TerminateOutcome> {
        let handle = self.processes.get_mut(name)?;
        Some(handle.terminate(grace).await)
    }

    /// Terminate every managed process concurrently and forget them
    pub async fn terminate_all(&mut self, grace: Duration) -> Vec<(String, TerminateOutcome)> {
        if self.processes.is_empty() {
            return Vec::new();
        }

        info!(count = self.processes.len(), "Terminating all managed processes");

        let handles: Vec<(String, ProcessHandle)> = self.processes.drain().collect();
        let stops = handles.into_iter().map(|(name, mut handle)| async move {
            let outcome = handle.terminate(grace).await;
            (name, outcome)
        });

        join_all(stops).await
    }

    pub fn is_process_running(&mut self, name: &str) -> bool {
        self.processes
            .get_mut(name)
            .is_some_and(|handle| handle.is_alive())
    }

    /// Exit status of a process observed to have exited
    pub fn exit_status(&self, name: &str) -> Option<std::process::ExitStatus> {
        self.processes.get(name).and_then(ProcessHandle::exit_status)
    }

    pub fn pid(&self, name: &str) -> Option<u32> {
        self.processes.get(name).map(ProcessHandle::pid)
    }

    /// Pids of every managed process, sorted by name
    pub fn pids(&self) -> Vec<(String, u32)> {
        let mut pids: Vec<(String, u32)> = self
            .processes
            .iter()
            .map(|(name, handle)| (name.clone(), handle.pid()))
            .collect();
        pids.sort();
        pids
    }

    pub fn managed_process_count(&self) -> usize {
        self.processes.len()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[tokio::test]
    async fn test_empty_manager() {
        let mut manager = ProcessManager::new(Arc::new(LogSink::default()));
        assert_eq!(manager.managed_process_count(), 0);
        assert!(!manager.is_process_running("qdrant"));
        assert!(manager.pid("qdrant").is_none());
        assert!(manager
            .terminate_process("qdrant", Duration::from_millis(10))
            .await
            .is_none());
        assert!(manager.terminate_all(Duration::from_millis(10)).await.is_empty());
    }

    #[cfg(unix)]
    #[tokio::test]
    async fn test_failed_launch_is_not_registered() {
        let mut manager = ProcessManager::new(Arc::new(LogSink::default()));
        let config = ProcessConfig::new("ghost", "/definitely/not/here/ghost-service");

        let err = manager.start_process(&config).unwrap_err();
        assert!(matches!(err, SupervisorError::ProcessLaunchFailed { .. }));
        assert_eq!(manager.managed_process_count(), 0);
    }
}
