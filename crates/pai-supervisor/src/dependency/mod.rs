//! Local service supervision for the PAI desktop shell
//!
//! The shell cannot show its main surface until two local services are up:
//! the Qdrant vector database and the `pai_backend` API. This module brings
//! them up, keeps their output visible, and tears them down on exit.
//!
//! # Architecture
//!
//! - [`binary`]: first-run download and install of the Qdrant executable
//! - [`health`]: reachability polling of service endpoints
//! - [`process`]: child processes with merged output and tree termination
//! - [`logs`]: in-memory and rotating on-disk capture of child output
//! - [`manager`]: the supervisor state machine and shutdown sequence
//!
//! # Example Usage
//!
//! ```no_run
//! use pai_supervisor::dependency::{LogSink, ServiceSupervisor, SupervisorConfig, TracingListener, UiEvent};
//! use std::sync::Arc;
//!
//! #[tokio::main]
//! async fn main() -> anyhow::Result<()> {
//!     let config = SupervisorConfig::from_env();
//!     let sink = Arc::new(LogSink::with_file(config.buffer_lines, &config.log_file())?);
//!     let mut supervisor = ServiceSupervisor::new(&config, sink, Arc::new(TracingListener))?;
//!
//!     let (tx, mut rx) = tokio::sync::mpsc::channel(1);
//!     tokio::spawn(async move {
//!         let _ = tokio::signal::ctrl_c().await;
//!         let _ = tx.send(UiEvent::WindowClosed).await;
//!     });
//!
//!     let report = supervisor.run_until_closed(&mut rx).await;
//!     println!("final status: {:?}", report.final_status);
//!     Ok(())
//! }
//! ```

pub mod binary;
pub mod error;
pub mod health;
pub mod logs;
pub mod manager;
pub mod process;

// re-export main types for convenience
pub use binary::{BinaryAcquisitionResult, BinaryProvisioner, DownloadTarget, Platform, ProvisionProgress, QdrantRelease};
pub use error::SupervisorError;
pub use health::{ProbeResult, ReadinessConfig, ReadinessGate, ServiceHealth};
pub use logs::{LogFileConfig, LogLine, LogSink};
pub use manager::{
    ExecutableLocator, OverallStatus, ServiceKind, ServiceSpec, ServiceState, ServiceSupervisor,
    ShutdownReport, StatusEvent, StatusListener, SupervisorConfig, TracingListener, UiEvent,
};
pub use process::{ProcessConfig, ProcessHandle, ProcessManager, TerminateOutcome};
