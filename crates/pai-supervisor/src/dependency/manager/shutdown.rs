//! Shutdown sequencing: stop request, grace pause, then process termination

use super::{OverallStatus, ServiceKind};
use crate::dependency::process::TerminateOutcome;
use reqwest::Client;
use std::time::Duration;
use tracing::{info, warn};

/// Timing of the shutdown sequence
#[derive(Debug, Clone, Copy)]
pub struct ShutdownSettings {
    /// Bound on the backend's stop request
    pub request_timeout: Duration,
    /// Pause after the stop request before processes are terminated
    pub grace: Duration,
    /// Window each process gets after a polite stop before it is killed
    pub process_grace: Duration,
}

impl Default for ShutdownSettings {
    fn default() -> Self {
        Self {
            request_timeout: Duration::from_secs(2),
            grace: Duration::from_secs(1),
            process_grace: Duration::from_secs(5),
        }
    }
}

/// What happened during one shutdown
#[derive(Debug, Clone)]
pub struct ShutdownReport {
    /// Whether the backend answered its stop request
    pub stop_request_acknowledged: bool,
    /// Termination result per launched service
    pub outcomes: Vec<(ServiceKind, TerminateOutcome)>,
    pub final_status: OverallStatus,
}

impl ShutdownReport {
    /// Services that had to be force-killed
    pub fn forced(&self) -> Vec<ServiceKind> {
        self.outcomes
            .iter()
            .filter(|(_, outcome)| outcome.was_forced())
            .map(|(kind, _)| *kind)
            .collect()
    }

    pub fn outcome(&self, kind: ServiceKind) -> Option<TerminateOutcome> {
        self.outcomes
            .iter()
            .find(|(k, _)| *k == kind)
            .map(|(_, outcome)| *outcome)
    }

    /// True when nothing had to be force-killed
    pub fn is_clean(&self) -> bool {
        self.forced().is_empty()
    }
}

/// POST a stop request, swallowing every failure
///
/// Returns whether the service answered at all.
pub async fn send_stop_request(client: &Client, url: &str, timeout: Duration) -> bool {
    info!(url, "Requesting graceful stop");

    match client.post(url).timeout(timeout).send().await {
        Ok(response) => {
            info!(url, status = response.status().as_u16(), "Stop request answered");
            true
        }
        Err(e) => {
            warn!(url, error = %e, "Stop request failed, continuing shutdown");
            false
        }
    }
}
