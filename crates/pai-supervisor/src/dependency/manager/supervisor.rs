//! The service supervisor state machine
//!
//! One [`ServiceSupervisor`] owns every piece of session state: the per-service
//! [`ServiceState`]s, the readiness flag, the recorded startup errors and the
//! running processes. Nothing else mutates them.

use super::shutdown::{send_stop_request, ShutdownReport, ShutdownSettings};
use super::{
    ExecutableLocator, OverallStatus, ServiceKind, ServiceSpec, ServiceState, StatusEvent,
    StatusListener, SupervisorConfig, UiEvent,
};
use crate::dependency::binary::{BinaryProvisioner, ProvisionProgress};
use crate::dependency::health::{ReadinessConfig, ReadinessGate};
use crate::dependency::logs::{LogSink, SUPERVISOR_SOURCE};
use crate::dependency::process::ProcessManager;
use crate::dependency::SupervisorError;
use std::collections::HashMap;
use std::path::PathBuf;
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::Arc;
use std::time::{Duration, Instant};
use tokio::sync::mpsc;
use tokio::task::JoinSet;
use tracing::{debug, error, info, warn};

/// Supervisor for the vector database and backend services
pub struct ServiceSupervisor {
    /// Service specs in topology order
    specs: Vec<ServiceSpec>,

    states: HashMap<ServiceKind, ServiceState>,

    application_ready: bool,

    /// Startup errors in the order they happened
    errors: Vec<(ServiceKind, SupervisorError)>,

    processes: ProcessManager,

    gate: ReadinessGate,

    /// Client for the stop request
    http: reqwest::Client,

    shutdown: ShutdownSettings,

    listener: Arc<dyn StatusListener>,
}

impl ServiceSupervisor {
    /// Build a supervisor for the standard two-service topology
    pub fn new(
        config: &SupervisorConfig,
        sink: Arc<LogSink>,
        listener: Arc<dyn StatusListener>,
    ) -> Result<Self, SupervisorError> {
        config.validate()?;
        config.prepare_dirs()?;

        let readiness = ReadinessConfig {
            poll_interval: config.poll_interval,
            probe_timeout: config.probe_timeout,
            verbose_logging: config.verbose_logging,
        };
        let shutdown = ShutdownSettings {
            request_timeout: config.shutdown_request_timeout,
            grace: config.shutdown_grace,
            process_grace: config.process_grace,
        };

        Self::from_specs(config.service_specs()?, readiness, shutdown, sink, listener)
    }

    /// Build a supervisor from explicit service specs
    pub fn from_specs(
        specs: Vec<ServiceSpec>,
        readiness: ReadinessConfig,
        shutdown: ShutdownSettings,
        sink: Arc<LogSink>,
        listener: Arc<dyn StatusListener>,
    ) -> Result<Self, SupervisorError> {
        for (i, spec) in specs.iter().enumerate() {
            if specs[..i].iter().any(|other| other.kind == spec.kind) {
                return Err(SupervisorError::ConfigError {
                    message: format!("Service {} is configured twice", spec.kind),
                });
            }
            if spec.health_url.is_empty() {
                return Err(SupervisorError::ConfigError {
                    message: format!("Service {} has no health URL", spec.kind),
                });
            }
        }

        let gate = ReadinessGate::new(readiness).map_err(|e| SupervisorError::ConfigError {
            message: format!("{e:#}"),
        })?;
        let http = reqwest::Client::builder()
            .no_proxy()
            .build()
            .map_err(|e| SupervisorError::ConfigError {
                message: format!("Failed to create HTTP client: {e}"),
            })?;

        let states = specs
            .iter()
            .map(|spec| (spec.kind, ServiceState::NotStarted))
            .collect();

        Ok(Self {
            specs,
            states,
            application_ready: false,
            errors: Vec::new(),
            processes: ProcessManager::new(sink),
            gate,
            http,
            shutdown,
            listener,
        })
    }

    pub fn state(&self, kind: ServiceKind) -> Option<ServiceState> {
        self.states.get(&kind).copied()
    }

    /// Every service's state in topology order
    pub fn states(&self) -> Vec<(ServiceKind, ServiceState)> {
        self.specs
            .iter()
            .filter_map(|spec| self.state(spec.kind).map(|state| (spec.kind, state)))
            .collect()
    }

    pub fn overall(&self) -> OverallStatus {
        OverallStatus::derive(self.states.values().copied(), self.application_ready)
    }

    pub fn application_ready(&self) -> bool {
        self.application_ready
    }

    pub fn errors(&self) -> &[(ServiceKind, SupervisorError)] {
        &self.errors
    }

    /// Startup errors rendered for a failure screen
    pub fn failure_text(&self) -> Option<String> {
        if self.errors.is_empty() {
            return None;
        }
        Some(
            self.errors
                .iter()
                .map(|(kind, e)| format!("{}: {e}", kind.display_name()))
                .collect::<Vec<_>>()
                .join("\n"),
        )
    }

    pub fn log_sink(&self) -> &Arc<LogSink> {
        self.processes.log_sink()
    }

    /// Pids of the launched processes, by process name
    pub fn pids(&self) -> Vec<(String, u32)> {
        self.processes.pids()
    }

    /// Provision, launch and gate every service; returns application readiness
    pub async fn start(&mut self) -> bool {
        let started_at = Instant::now();
        info!(services = self.specs.len(), "Starting supervised services");

        let ready = self.start_services().await;

        info!(
            ready,
            elapsed_ms = started_at.elapsed().as_millis() as u64,
            overall = ?self.overall(),
            "Startup settled"
        );
        self.listener.on_readiness(ready);
        ready
    }

    async fn start_services(&mut self) -> bool {
        let specs = self.specs.clone();

        // Provisioning failure is fatal for the whole session
        let mut executables = HashMap::new();
        for spec in &specs {
            match self.resolve_executable(spec).await {
                Ok(path) => {
                    executables.insert(spec.kind, path);
                }
                Err(e) => {
                    self.fail(spec.kind, e);
                    self.application_ready = false;
                    return false;
                }
            }
        }

        // Launch everything before gating anything
        let mut launched = Vec::new();
        for spec in &specs {
            let Some(path) = executables.get(&spec.kind) else {
                continue;
            };
            if !self.transition(spec.kind, ServiceState::Starting, None) {
                continue;
            }

            match self.processes.start_process(&spec.process_config(path)) {
                Ok(pid) => {
                    debug!(service = %spec.kind, pid, "Service launched");
                    launched.push(spec);
                }
                Err(e) => self.fail(spec.kind, e),
            }
        }

        let mut gates = JoinSet::new();
        let mut pending = HashMap::new();
        for spec in launched {
            let gate = self.gate.clone();
            let kind = spec.kind;
            let url = spec.health_url.clone();
            let timeout = spec.startup_timeout;
            let handle = gates.spawn(async move {
                let ready = gate.wait_until_ready(kind.process_name(), &url, timeout).await;
                (kind, ready)
            });
            pending.insert(kind, handle);
        }

        // A child that exits while gated fails its service, even if something
        // else answers on its port
        let watch_period = self.gate.config().poll_interval.max(Duration::from_millis(10));
        let mut exit_watch = tokio::time::interval(watch_period);
        while !gates.is_empty() {
            tokio::select! {
                joined = gates.join_next() => match joined {
                    Some(Ok((kind, ready))) => {
                        pending.remove(&kind);
                        self.settle_gate(kind, ready);
                    }
                    Some(Err(e)) if e.is_cancelled() => {}
                    Some(Err(e)) => error!(error = %e, "Readiness gate task failed"),
                    None => break,
                },
                _ = exit_watch.tick() => {
                    let exited: Vec<ServiceKind> = pending
                        .keys()
                        .copied()
                        .filter(|kind: &ServiceKind| !self.processes.is_process_running(kind.process_name()))
                        .collect();
                    for kind in exited {
                        if let Some(handle) = pending.remove(&kind) {
                            handle.abort();
                        }
                        self.fail_exited(kind);
                    }
                }
            }
        }

        // A gate that died without reporting leaves its service Starting
        let stuck: Vec<ServiceKind> = self
            .states()
            .into_iter()
            .filter(|(_, state)| *state == ServiceState::Starting)
            .map(|(kind, _)| kind)
            .collect();
        for kind in stuck {
            let timeout_error = self.readiness_timeout(kind);
            self.fail(kind, timeout_error);
        }

        self.application_ready = self.compute_application_ready();
        self.application_ready
    }

    /// Apply a finished gate, checking that our own child is the one answering
    fn settle_gate(&mut self, kind: ServiceKind, ready: bool) {
        let running = self.processes.is_process_running(kind.process_name());
        match (ready, running) {
            (true, true) => {
                self.transition(kind, ServiceState::Ready, None);
            }
            (_, false) => self.fail_exited(kind),
            (false, true) => {
                let timeout_error = self.readiness_timeout(kind);
                self.fail(kind, timeout_error);
            }
        }
    }

    fn fail_exited(&mut self, kind: ServiceKind) {
        let status = self
            .processes
            .exit_status(kind.process_name())
            .map(|status| status.to_string())
            .unwrap_or_else(|| "unknown status".to_string());
        warn!(service = %kind, %status, "Service exited before becoming reachable");
        self.fail(
            kind,
            SupervisorError::ProcessLaunchFailed {
                service: kind.process_name().to_string(),
                source: anyhow::anyhow!("Exited with {status} before becoming reachable"),
            },
        );
    }

    /// Ready when every required service is ready and none has failed
    fn compute_application_ready(&self) -> bool {
        let required: Vec<ServiceKind> = self
            .specs
            .iter()
            .filter(|spec| spec.required)
            .map(|spec| spec.kind)
            .collect();

        !required.is_empty()
            && required
                .iter()
                .all(|kind| self.state(*kind) == Some(ServiceState::Ready))
    }

    fn readiness_timeout(&self, kind: ServiceKind) -> SupervisorError {
        let spec = self.specs.iter().find(|spec| spec.kind == kind);
        SupervisorError::ReadinessTimeout {
            service: kind.process_name().to_string(),
            url: spec.map(|s| s.health_url.clone()).unwrap_or_default(),
            timeout_ms: spec
                .map(|s| s.startup_timeout.as_millis() as u64)
                .unwrap_or_default(),
        }
    }

    async fn resolve_executable(&mut self, spec: &ServiceSpec) -> Result<PathBuf, SupervisorError> {
        let target = match &spec.executable {
            ExecutableLocator::Path(path) => return Ok(path.clone()),
            ExecutableLocator::Provisioned(target) if target.is_satisfied() => {
                return Ok(target.binary_path())
            }
            ExecutableLocator::Provisioned(target) => target.clone(),
        };

        self.transition(spec.kind, ServiceState::Provisioning, None);

        let provisioner = BinaryProvisioner::new(spec.name()).map_err(|e| {
            SupervisorError::ProvisioningFailed {
                service: spec.name().to_string(),
                source: e,
            }
        })?;

        let listener = Arc::clone(&self.listener);
        let overall = self.overall();
        let kind = spec.kind;
        let last_reported = AtomicU64::new(u64::MAX);
        let report = move |progress: ProvisionProgress| {
            // Only publish whole-percent (or whole-megabyte) changes
            let step = match progress.fraction() {
                Some(fraction) => (fraction * 100.0) as u64,
                None => progress.downloaded / (1024 * 1024),
            };
            if last_reported.swap(step, Ordering::Relaxed) == step {
                return;
            }
            listener.on_status(&StatusEvent {
                service: kind,
                from: ServiceState::Provisioning,
                to: ServiceState::Provisioning,
                overall,
                text: format!(
                    "Downloading {}... {}",
                    kind.display_name(),
                    progress.describe()
                ),
                timestamp: chrono::Utc::now(),
            });
        };

        provisioner.ensure(&target, &report).await
    }

    /// Record `error` against `kind` and move it to `Failed`
    fn fail(&mut self, kind: ServiceKind, error: SupervisorError) {
        error!(service = %kind, error_kind = error.kind(), error = %error, "Service failed");
        let detail = error.to_string();
        self.errors.push((kind, error));
        self.transition(kind, ServiceState::Failed, Some(detail));
    }

    /// Apply a transition, publishing it; illegal transitions are logged and ignored
    fn transition(&mut self, kind: ServiceKind, to: ServiceState, detail: Option<String>) -> bool {
        let Some(from) = self.state(kind) else {
            warn!(service = %kind, "Transition for unknown service ignored");
            return false;
        };

        if !from.can_transition_to(to) {
            warn!(service = %kind, %from, %to, "Illegal state transition ignored");
            return false;
        }

        self.states.insert(kind, to);
        let text = status_text(kind, to, detail.as_deref());

        self.log_sink()
            .record(SUPERVISOR_SOURCE, &format!("{kind}: {from} -> {to}: {text}"));

        let event = StatusEvent {
            service: kind,
            from,
            to,
            overall: self.overall(),
            text,
            timestamp: chrono::Utc::now(),
        };
        self.listener.on_status(&event);
        true
    }

    /// Stop request, grace pause, then terminate every process
    ///
    /// Never fails; each step proceeds regardless of the previous one.
    pub async fn shutdown(&mut self) -> ShutdownReport {
        info!("Shutting down supervised services");

        for (kind, state) in self.states() {
            match state {
                ServiceState::Ready | ServiceState::Starting => {
                    self.transition(kind, ServiceState::Stopping, None);
                }
                ServiceState::NotStarted => {
                    self.transition(kind, ServiceState::Stopped, None);
                }
                ServiceState::Provisioning => self.fail(
                    kind,
                    SupervisorError::ProvisioningFailed {
                        service: kind.process_name().to_string(),
                        source: anyhow::anyhow!("Interrupted by shutdown"),
                    },
                ),
                ServiceState::Failed | ServiceState::Stopping | ServiceState::Stopped => {}
            }
        }
        self.application_ready = false;

        let mut stop_request_acknowledged = false;
        let stop_urls: Vec<String> = self
            .specs
            .iter()
            .filter(|spec| self.processes.pid(spec.name()).is_some())
            .filter_map(|spec| spec.shutdown_url.clone())
            .collect();
        for url in &stop_urls {
            stop_request_acknowledged |=
                send_stop_request(&self.http, url, self.shutdown.request_timeout).await;
        }

        let mut outcomes = Vec::new();
        if self.processes.managed_process_count() > 0 {
            if !stop_urls.is_empty() {
                tokio::time::sleep(self.shutdown.grace).await;
            }

            let grace = self.shutdown.process_grace;
            for (name, outcome) in self.processes.terminate_all(grace).await {
                let Some(kind) = ServiceKind::ALL
                    .into_iter()
                    .find(|kind| kind.process_name() == name)
                else {
                    continue;
                };

                if outcome.was_forced() {
                    let incomplete = SupervisorError::ShutdownIncomplete {
                        service: name.clone(),
                        grace_ms: grace.as_millis() as u64,
                    };
                    warn!(service = %kind, error = %incomplete, "Forced termination");
                    self.log_sink()
                        .record(SUPERVISOR_SOURCE, &format!("{}: {incomplete}", incomplete.kind()));
                }
                outcomes.push((kind, outcome));
            }
            outcomes.sort_by_key(|(kind, _)| *kind);
        }

        for (kind, state) in self.states() {
            if state == ServiceState::Stopping {
                self.transition(kind, ServiceState::Stopped, None);
            }
        }

        if let Err(e) = self.log_sink().flush() {
            warn!(error = %e, "Failed to flush log file");
        }

        let report = ShutdownReport {
            stop_request_acknowledged,
            outcomes,
            final_status: self.overall(),
        };
        info!(
            final_status = ?report.final_status,
            forced = report.forced().len(),
            "Shutdown complete"
        );
        report
    }

    /// Drive one session: start, publish readiness, wait for close, shut down
    ///
    /// A close (or a dropped event channel) during startup abandons the
    /// pending readiness gates and goes straight to shutdown.
    pub async fn run_until_closed(
        &mut self,
        ui_events: &mut mpsc::Receiver<UiEvent>,
    ) -> ShutdownReport {
        let closed_during_startup = tokio::select! {
            _ = self.start() => false,
            event = ui_events.recv() => {
                info!(?event, "Close requested during startup");
                true
            }
        };

        if closed_during_startup {
            self.listener.on_readiness(false);
        } else {
            let event = ui_events.recv().await;
            info!(?event, "Close requested");
        }

        self.shutdown().await
    }
}

fn status_text(kind: ServiceKind, state: ServiceState, detail: Option<&str>) -> String {
    let name = kind.display_name();
    match state {
        ServiceState::NotStarted => format!("Waiting to start {name}"),
        ServiceState::Provisioning => format!("Downloading {name}..."),
        ServiceState::Starting => format!("Starting {name}..."),
        ServiceState::Ready => format!("{name} is ready"),
        ServiceState::Failed => match detail {
            Some(detail) => format!("{name} failed: {detail}"),
            None => format!("{name} failed"),
        },
        ServiceState::Stopping => format!("Stopping {name}..."),
        ServiceState::Stopped => format!("{name} stopped"),
    }
}
