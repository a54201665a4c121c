//! Readiness gating for supervised services
//!
//! Readiness here means "the HTTP socket answers", not a semantic health
//! check: any response, including error statuses, counts as reachable.

pub mod readiness_gate;

pub use readiness_gate::ReadinessGate;

use std::time::Duration;

/// Reachability of a service endpoint
#[derive(Debug, Clone, PartialEq)]
pub enum ServiceHealth {
    /// Endpoint answered with the given HTTP status
    Reachable(u16),
    /// Endpoint did not answer, with the reason
    Unreachable(String),
    /// Not probed yet
    Unknown,
}

/// Outcome of a single probe
#[derive(Debug, Clone)]
pub struct ProbeResult {
    pub url: String,
    pub status: ServiceHealth,
    pub response_time: Duration,
    pub timestamp: chrono::DateTime<chrono::Utc>,
}

impl ProbeResult {
    pub fn new(url: impl Into<String>) -> Self {
        Self {
            url: url.into(),
            status: ServiceHealth::Unknown,
            response_time: Duration::from_millis(0),
            timestamp: chrono::Utc::now(),
        }
    }

    pub fn with_status(mut self, status: ServiceHealth) -> Self {
        self.status = status;
        self
    }

    pub fn with_response_time(mut self, response_time: Duration) -> Self {
        self.response_time = response_time;
        self
    }

    pub fn is_reachable(&self) -> bool {
        matches!(self.status, ServiceHealth::Reachable(_))
    }
}

/// Readiness polling configuration
#[derive(Debug, Clone)]
pub struct ReadinessConfig {
    /// Pause between probes
    pub poll_interval: Duration,

    /// Upper bound for a single probe
    pub probe_timeout: Duration,

    /// Log every failed probe at debug level
    pub verbose_logging: bool,
}

impl Default for ReadinessConfig {
    fn default() -> Self {
        Self {
            poll_interval: Duration::from_millis(500),
            probe_timeout: Duration::from_secs(2),
            verbose_logging: false,
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_probe_result_reachability() {
        let result = ProbeResult::new("http://127.0.0.1:6333/");
        assert!(!result.is_reachable());

        // 404 still proves the socket is bound
        let result = result.with_status(ServiceHealth::Reachable(404));
        assert!(result.is_reachable());

        let result = ProbeResult::new("http://127.0.0.1:6333/")
            .with_status(ServiceHealth::Unreachable("connection refused".to_string()));
        assert!(!result.is_reachable());
    }

    #[test]
    fn test_default_config() {
        let config = ReadinessConfig::default();
        assert_eq!(config.poll_interval, Duration::from_millis(500));
        assert!(config.probe_timeout > config.poll_interval);
    }
}
