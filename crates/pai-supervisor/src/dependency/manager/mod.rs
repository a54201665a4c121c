//! Supervision of the PAI local services
//!
//! The supervisor owns a fixed pair of services, the Qdrant vector database
//! and the `pai_backend` API, and drives each through
//! provisioning, launch, readiness gating and shutdown. Every state change is
//! published to a [`StatusListener`] so a UI can follow along.

pub mod config;
pub mod shutdown;
pub mod supervisor;

pub use config::{ExecutableLocator, ServiceSpec, SupervisorConfig};
pub use shutdown::{ShutdownReport, ShutdownSettings};
pub use supervisor::ServiceSupervisor;

use chrono::{DateTime, Utc};
use serde::Serialize;
use std::fmt;

/// The two services of the fixed topology
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize)]
#[serde(rename_all = "snake_case")]
pub enum ServiceKind {
    VectorDb,
    Backend,
}

impl ServiceKind {
    pub const ALL: [ServiceKind; 2] = [ServiceKind::VectorDb, ServiceKind::Backend];

    pub fn process_name(&self) -> &'static str {
        match self {
            ServiceKind::VectorDb => "qdrant",
            ServiceKind::Backend => "pai-backend",
        }
    }

    pub fn display_name(&self) -> &'static str {
        match self {
            ServiceKind::VectorDb => "vector database",
            ServiceKind::Backend => "PAI backend",
        }
    }
}

impl fmt::Display for ServiceKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.process_name())
    }
}

/// Lifecycle state of one supervised service
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "snake_case")]
pub enum ServiceState {
    NotStarted,
    Provisioning,
    Starting,
    Ready,
    Failed,
    Stopping,
    Stopped,
}

impl ServiceState {
    /// Whether `next` is a legal successor of this state
    pub fn can_transition_to(&self, next: ServiceState) -> bool {
        use ServiceState::*;

        matches!(
            (self, next),
            (NotStarted, Provisioning)
                | (NotStarted, Starting)
                | (NotStarted, Stopped)
                | (Provisioning, Starting)
                | (Provisioning, Failed)
                | (Starting, Ready)
                | (Starting, Failed)
                | (Starting, Stopping)
                | (Ready, Stopping)
                | (Stopping, Stopped)
        )
    }
}

impl fmt::Display for ServiceState {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let label = match self {
            ServiceState::NotStarted => "not started",
            ServiceState::Provisioning => "provisioning",
            ServiceState::Starting => "starting",
            ServiceState::Ready => "ready",
            ServiceState::Failed => "failed",
            ServiceState::Stopping => "stopping",
            ServiceState::Stopped => "stopped",
        };
        f.write_str(label)
    }
}

/// Session-level status derived from both service states
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "snake_case")]
pub enum OverallStatus {
    Pending,
    Ready,
    Failed,
    Stopping,
    Stopped,
}

impl OverallStatus {
    /// Fold per-service states into one status
    ///
    /// Failure wins over everything except a completed or running shutdown,
    /// or a ready application whose failed service is optional.
    pub fn derive(
        states: impl IntoIterator<Item = ServiceState>,
        application_ready: bool,
    ) -> OverallStatus {
        let states: Vec<ServiceState> = states.into_iter().collect();
        let any = |s: ServiceState| states.contains(&s);

        if any(ServiceState::Stopping) {
            OverallStatus::Stopping
        } else if !states.is_empty()
            && states
                .iter()
                .all(|s| matches!(s, ServiceState::Stopped | ServiceState::Failed))
            && any(ServiceState::Stopped)
        {
            OverallStatus::Stopped
        } else if application_ready {
            OverallStatus::Ready
        } else if any(ServiceState::Failed) {
            OverallStatus::Failed
        } else {
            OverallStatus::Pending
        }
    }
}

/// One state change, as published to listeners
#[derive(Debug, Clone, Serialize)]
pub struct StatusEvent {
    pub service: ServiceKind,
    pub from: ServiceState,
    pub to: ServiceState,
    pub overall: OverallStatus,
    /// Human-readable status line for the display surface
    pub text: String,
    pub timestamp: DateTime<Utc>,
}

/// Receiver of supervisor status updates
///
/// Callbacks run on the supervisor's control task and should return quickly.
pub trait StatusListener: Send + Sync {
    fn on_status(&self, event: &StatusEvent);

    /// Fired once when startup settles
    fn on_readiness(&self, ready: bool);
}

/// Listener that only traces events
#[derive(Debug, Default, Clone, Copy)]
pub struct TracingListener;

impl StatusListener for TracingListener {
    fn on_status(&self, event: &StatusEvent) {
        tracing::info!(
            service = %event.service,
            from = %event.from,
            to = %event.to,
            "{}",
            event.text
        );
    }

    fn on_readiness(&self, ready: bool) {
        tracing::info!(ready, "Application readiness settled");
    }
}

/// Events sent from the UI to the supervisor
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum UiEvent {
    WindowClosed,
}
