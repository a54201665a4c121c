//! Error taxonomy shared by every supervisor component

/// Errors surfaced by provisioning, launching, gating and stopping services
#[derive(Debug, thiserror::Error)]
pub enum SupervisorError {
    #[error("Provisioning failed for {service}: {source:#}")]
    ProvisioningFailed {
        service: String,
        source: anyhow::Error,
    },

    #[error("{service} did not become reachable at {url} within {timeout_ms}ms")]
    ReadinessTimeout {
        service: String,
        url: String,
        timeout_ms: u64,
    },

    #[error("Failed to launch {service}: {source:#}")]
    ProcessLaunchFailed {
        service: String,
        source: anyhow::Error,
    },

    #[error("{service} ignored the stop request for {grace_ms}ms and was force-killed")]
    ShutdownIncomplete { service: String, grace_ms: u64 },

    #[error("Process already running for {service} (pid: {pid})")]
    AlreadyRunning { service: String, pid: u32 },

    #[error("Configuration error: {message}")]
    ConfigError { message: String },
}

impl SupervisorError {
    /// Whether this error ends the service's startup sequence
    pub fn is_fatal(&self) -> bool {
        !matches!(self, SupervisorError::ShutdownIncomplete { .. })
    }

    /// Short label used in status text and persisted log lines
    pub fn kind(&self) -> &'static str {
        match self {
            SupervisorError::ProvisioningFailed { .. } => "provisioning-failed",
            SupervisorError::ReadinessTimeout { .. } => "readiness-timeout",
            SupervisorError::ProcessLaunchFailed { .. } => "launch-failed",
            SupervisorError::ShutdownIncomplete { .. } => "shutdown-incomplete",
            SupervisorError::AlreadyRunning { .. } => "already-running",
            SupervisorError::ConfigError { .. } => "config-error",
        }
    }
}
