//! Configuration for the service supervisor

use super::ServiceKind;
use crate::dependency::binary::{DownloadTarget, Platform, QdrantRelease, DEFAULT_QDRANT_VERSION};
use crate::dependency::logs::{LogFileConfig, DEFAULT_BUFFER_LINES, DEFAULT_LOG_BACKUPS, DEFAULT_LOG_FILE_NAME, DEFAULT_MAX_LOG_BYTES};
use crate::dependency::process::ProcessConfig;
use crate::dependency::SupervisorError;
use std::path::{Path, PathBuf};
use std::time::Duration;
use tracing::warn;

/// Application directory name under the per-user data location
const APP_DIR_NAME: &str = "paiassistant";

/// Configuration for one supervised session
#[derive(Debug, Clone)]
pub struct SupervisorConfig {
    /// HTTP port of the backend API
    pub backend_port: u16,

    /// Qdrant REST and gRPC ports
    pub qdrant_port: u16,
    pub qdrant_grpc_port: u16,

    /// Backend executable
    pub backend_bin: PathBuf,

    /// Qdrant release to provision, and an optional archive URL override
    pub qdrant_version: String,
    pub qdrant_url: Option<String>,

    /// Pre-installed Qdrant executable; skips provisioning when set
    pub qdrant_bin: Option<PathBuf>,

    /// Root for provisioned binaries and Qdrant storage
    pub data_dir: PathBuf,

    /// Directory holding the persisted log
    pub log_dir: PathBuf,

    /// Readiness deadlines
    pub backend_startup_timeout: Duration,
    pub qdrant_startup_timeout: Duration,

    /// Readiness probe cadence and per-probe bound
    pub poll_interval: Duration,
    pub probe_timeout: Duration,

    /// Bound on the backend's stop request
    pub shutdown_request_timeout: Duration,

    /// Pause between the stop request and terminating processes
    pub shutdown_grace: Duration,

    /// How long a process gets to exit after a polite stop before it is killed
    pub process_grace: Duration,

    /// Persisted log rotation
    pub log_max_bytes: u64,
    pub log_backups: usize,

    /// Lines kept in memory for the UI
    pub buffer_lines: usize,

    /// Whether to trace every failed readiness probe
    pub verbose_logging: bool,
}

impl Default for SupervisorConfig {
    fn default() -> Self {
        // Empty when no per-user location exists; `validate` rejects it
        let data_dir = default_data_dir().unwrap_or_default();
        Self {
            backend_port: 8000,
            qdrant_port: 6333,
            qdrant_grpc_port: 6334,
            backend_bin: default_backend_bin(),
            qdrant_version: DEFAULT_QDRANT_VERSION.to_string(),
            qdrant_url: None,
            qdrant_bin: None,
            log_dir: data_dir.join("logs"),
            data_dir,
            backend_startup_timeout: Duration::from_secs(30),
            qdrant_startup_timeout: Duration::from_secs(60),
            poll_interval: Duration::from_millis(500),
            probe_timeout: Duration::from_secs(2),
            shutdown_request_timeout: Duration::from_secs(2),
            shutdown_grace: Duration::from_secs(1),
            process_grace: Duration::from_secs(5),
            log_max_bytes: DEFAULT_MAX_LOG_BYTES,
            log_backups: DEFAULT_LOG_BACKUPS,
            buffer_lines: DEFAULT_BUFFER_LINES,
            verbose_logging: false,
        }
    }
}

impl SupervisorConfig {
    /// Load configuration from environment variables with defaults
    pub fn from_env() -> Self {
        let mut config = Self::default();

        if let Some(port) = parse_env("PAI_BACKEND_PORT") {
            config.backend_port = port;
        }

        if let Some(port) = parse_env("PAI_QDRANT_PORT") {
            config.qdrant_port = port;
        }

        if let Some(port) = parse_env("PAI_QDRANT_GRPC_PORT") {
            config.qdrant_grpc_port = port;
        }

        if let Ok(path) = std::env::var("PAI_BACKEND_BIN") {
            config.backend_bin = PathBuf::from(path);
        }

        if let Ok(path) = std::env::var("PAI_QDRANT_BIN") {
            config.qdrant_bin = Some(PathBuf::from(path));
        }

        if let Ok(version) = std::env::var("PAI_QDRANT_VERSION") {
            config.qdrant_version = version;
        }

        if let Ok(url) = std::env::var("PAI_QDRANT_URL") {
            config.qdrant_url = Some(url);
        }

        if let Ok(path) = std::env::var("PAI_DATA_DIR") {
            config.data_dir = PathBuf::from(path);
            config.log_dir = config.data_dir.join("logs");
        }

        if let Ok(path) = std::env::var("PAI_LOG_DIR") {
            config.log_dir = PathBuf::from(path);
        }

        if let Some(secs) = parse_env("PAI_BACKEND_STARTUP_TIMEOUT_SECS") {
            config.backend_startup_timeout = Duration::from_secs(secs);
        }

        if let Some(secs) = parse_env("PAI_QDRANT_STARTUP_TIMEOUT_SECS") {
            config.qdrant_startup_timeout = Duration::from_secs(secs);
        }

        if let Ok(val) = std::env::var("PAI_VERBOSE_LOGGING") {
            config.verbose_logging = val.to_lowercase() != "false" && val != "0";
        }

        config
    }

    /// Validate configuration
    pub fn validate(&self) -> Result<(), SupervisorError> {
        let ports = [
            ("backend_port", self.backend_port),
            ("qdrant_port", self.qdrant_port),
            ("qdrant_grpc_port", self.qdrant_grpc_port),
        ];
        for (i, (name, port)) in ports.iter().enumerate() {
            if *port == 0 {
                return Err(config_error(format!("{name} must be greater than 0")));
            }
            if let Some((other, _)) = ports[i + 1..].iter().find(|(_, p)| p == port) {
                return Err(config_error(format!(
                    "Port conflict: {name} and {other} are both {port}"
                )));
            }
        }

        if self.backend_bin.as_os_str().is_empty() {
            return Err(config_error("backend_bin cannot be empty"));
        }

        if self.data_dir.as_os_str().is_empty() {
            return Err(config_error(
                "data_dir cannot be empty (no per-user data directory found, set PAI_DATA_DIR)",
            ));
        }

        if self.log_dir.as_os_str().is_empty() {
            return Err(config_error("log_dir cannot be empty"));
        }

        if self.qdrant_version.is_empty() && self.qdrant_url.is_none() && self.qdrant_bin.is_none() {
            return Err(config_error("qdrant_version cannot be empty"));
        }

        let timeouts = [
            ("backend_startup_timeout", self.backend_startup_timeout),
            ("qdrant_startup_timeout", self.qdrant_startup_timeout),
            ("poll_interval", self.poll_interval),
            ("probe_timeout", self.probe_timeout),
            ("shutdown_request_timeout", self.shutdown_request_timeout),
            ("process_grace", self.process_grace),
        ];
        if let Some((name, _)) = timeouts.iter().find(|(_, t)| t.is_zero()) {
            return Err(config_error(format!("{name} must be greater than 0")));
        }

        if self.buffer_lines == 0 {
            return Err(config_error("buffer_lines must be greater than 0"));
        }

        Ok(())
    }

    /// Create the data, storage and log directories
    pub fn prepare_dirs(&self) -> Result<(), SupervisorError> {
        let storage = self.qdrant_storage_dir();
        for dir in [&self.data_dir, &storage, &self.log_dir] {
            std::fs::create_dir_all(dir).map_err(|e| {
                config_error(format!("Failed to create {}: {e}", dir.display()))
            })?;
        }
        Ok(())
    }

    /// Directory the Qdrant binary is provisioned into
    pub fn install_dir(&self) -> PathBuf {
        self.data_dir.join("bin")
    }

    pub fn qdrant_storage_dir(&self) -> PathBuf {
        self.data_dir.join("qdrant_storage")
    }

    pub fn log_file(&self) -> LogFileConfig {
        LogFileConfig::new(self.log_dir.join(DEFAULT_LOG_FILE_NAME))
            .with_max_bytes(self.log_max_bytes)
            .with_backups(self.log_backups)
    }

    pub fn backend_base_url(&self) -> String {
        format!("http://127.0.0.1:{}", self.backend_port)
    }

    pub fn qdrant_base_url(&self) -> String {
        format!("http://127.0.0.1:{}", self.qdrant_port)
    }

    /// Where the Qdrant executable comes from
    pub fn qdrant_locator(&self) -> Result<ExecutableLocator, SupervisorError> {
        if let Some(path) = &self.qdrant_bin {
            return Ok(ExecutableLocator::Path(path.clone()));
        }

        let install_dir = self.install_dir();
        let target = match &self.qdrant_url {
            Some(url) => DownloadTarget::new(
                url.clone(),
                &install_dir,
                qdrant_binary_name(),
            ),
            None => QdrantRelease::download_target(&self.qdrant_version, &install_dir).map_err(
                |e| SupervisorError::ProvisioningFailed {
                    service: ServiceKind::VectorDb.process_name().to_string(),
                    source: e,
                },
            )?,
        };

        Ok(ExecutableLocator::Provisioned(target))
    }

    /// Vector database spec, in topology order before the backend
    pub fn qdrant_spec(&self) -> Result<ServiceSpec, SupervisorError> {
        let storage = self.qdrant_storage_dir();
        Ok(
            ServiceSpec::new(ServiceKind::VectorDb, self.qdrant_locator()?)
                .with_health_url(format!("{}/", self.qdrant_base_url()))
                .with_startup_timeout(self.qdrant_startup_timeout)
                .with_working_dir(&self.data_dir)
                .with_env_var("QDRANT__SERVICE__HTTP_PORT", self.qdrant_port.to_string())
                .with_env_var("QDRANT__SERVICE__GRPC_PORT", self.qdrant_grpc_port.to_string())
                .with_env_var(
                    "QDRANT__STORAGE__STORAGE_PATH",
                    storage.to_string_lossy().to_string(),
                )
                .with_env_var("QDRANT__TELEMETRY_DISABLED", "true"),
        )
    }

    pub fn backend_spec(&self) -> ServiceSpec {
        let mut spec = ServiceSpec::new(
            ServiceKind::Backend,
            ExecutableLocator::Path(self.backend_bin.clone()),
        )
        .with_health_url(format!("{}/", self.backend_base_url()))
        .with_shutdown_url(format!("{}/shutdown", self.backend_base_url()))
        .with_startup_timeout(self.backend_startup_timeout)
        .with_env_var("PAI_BACKEND_PORT", self.backend_port.to_string())
        .with_env_var("QDRANT_URL", self.qdrant_base_url());

        if let Some(dir) = self.backend_bin.parent().filter(|d| !d.as_os_str().is_empty()) {
            spec = spec.with_working_dir(dir);
        }

        match std::env::var("OPENAI_API_KEY") {
            Ok(key) if !key.is_empty() => spec.with_env_var("OPENAI_API_KEY", key),
            _ => {
                warn!("OPENAI_API_KEY is not set; the backend will not be able to answer questions");
                spec
            }
        }
    }

    /// Both service specs in topology order
    pub fn service_specs(&self) -> Result<Vec<ServiceSpec>, SupervisorError> {
        Ok(vec![self.qdrant_spec()?, self.backend_spec()])
    }
}

/// Where a service's executable comes from
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum ExecutableLocator {
    /// Already on disk
    Path(PathBuf),
    /// Downloaded on first run
    Provisioned(DownloadTarget),
}

/// Immutable launch and readiness description of one service
#[derive(Debug, Clone)]
pub struct ServiceSpec {
    pub kind: ServiceKind,
    pub executable: ExecutableLocator,
    pub args: Vec<String>,
    pub env_vars: Vec<(String, String)>,
    pub working_dir: Option<PathBuf>,
    pub health_url: String,
    pub startup_timeout: Duration,
    /// Whether the application cannot run without this service
    pub required: bool,
    /// Endpoint accepting a graceful stop request
    pub shutdown_url: Option<String>,
}

impl ServiceSpec {
    pub fn new(kind: ServiceKind, executable: ExecutableLocator) -> Self {
        Self {
            kind,
            executable,
            args: Vec::new(),
            env_vars: Vec::new(),
            working_dir: None,
            health_url: String::new(),
            startup_timeout: Duration::from_secs(30),
            required: true,
            shutdown_url: None,
        }
    }

    pub fn name(&self) -> &'static str {
        self.kind.process_name()
    }

    pub fn with_args<I, S>(mut self, args: I) -> Self
    where
        I: IntoIterator<Item = S>,
        S: Into<String>,
    {
        self.args = args.into_iter().map(Into::into).collect();
        self
    }

    pub fn with_env_var(mut self, key: impl Into<String>, value: impl Into<String>) -> Self {
        self.env_vars.push((key.into(), value.into()));
        self
    }

    pub fn with_working_dir(mut self, dir: impl Into<PathBuf>) -> Self {
        self.working_dir = Some(dir.into());
        self
    }

    pub fn with_health_url(mut self, url: impl Into<String>) -> Self {
        self.health_url = url.into();
        self
    }

    pub fn with_startup_timeout(mut self, timeout: Duration) -> Self {
        self.startup_timeout = timeout;
        self
    }

    pub fn with_required(mut self, required: bool) -> Self {
        self.required = required;
        self
    }

    pub fn with_shutdown_url(mut self, url: impl Into<String>) -> Self {
        self.shutdown_url = Some(url.into());
        self
    }

    /// Process launch description for the resolved `executable`
    pub fn process_config(&self, executable: &Path) -> ProcessConfig {
        let mut config = ProcessConfig::new(self.name(), executable).with_args(self.args.clone());
        if let Some(dir) = &self.working_dir {
            config = config.with_working_dir(dir);
        }
        for (key, value) in &self.env_vars {
            config = config.with_env_var(key, value);
        }
        config
    }
}

fn config_error(message: impl Into<String>) -> SupervisorError {
    SupervisorError::ConfigError {
        message: message.into(),
    }
}

fn parse_env<T: std::str::FromStr>(key: &str) -> Option<T> {
    let raw = std::env::var(key).ok()?;
    match raw.trim().parse() {
        Ok(value) => Some(value),
        Err(_) => {
            warn!(key, value = %raw, "Ignoring unparsable environment override");
            None
        }
    }
}

fn qdrant_binary_name() -> String {
    Platform::current()
        .map(|p| p.executable_name("qdrant"))
        .unwrap_or_else(|| "qdrant".to_string())
}

/// Per-user application directory
///
/// `%LOCALAPPDATA%\paiassistant` on Windows, `~/.paiassistant` elsewhere.
/// `None` when the platform reports no such location.
pub fn default_data_dir() -> Option<PathBuf> {
    if cfg!(windows) {
        dirs::data_local_dir().map(|dir| dir.join(APP_DIR_NAME))
    } else {
        dirs::home_dir().map(|home| home.join(format!(".{APP_DIR_NAME}")))
    }
}

/// `pai_backend` next to the running executable
pub fn default_backend_bin() -> PathBuf {
    let name = Platform::current()
        .map(|p| p.executable_name("pai_backend"))
        .unwrap_or_else(|| "pai_backend".to_string());

    std::env::current_exe()
        .ok()
        .and_then(|exe| exe.parent().map(|dir| dir.join(&name)))
        .unwrap_or_else(|| PathBuf::from(name))
}
