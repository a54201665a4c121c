//! Polls a service endpoint until it answers or a deadline passes

use super::{ProbeResult, ReadinessConfig, ServiceHealth};
use anyhow::{Context, Result};
use reqwest::Client;
use std::time::{Duration, Instant};
use tracing::{debug, info, warn};

/// Readiness gate backed by plain HTTP GET probes
#[derive(Clone)]
pub struct ReadinessGate {
    client: Client,
    config: ReadinessConfig,
}

impl ReadinessGate {
    pub fn new(config: ReadinessConfig) -> Result<Self> {
        let client = Client::builder()
            .timeout(config.probe_timeout)
            .no_proxy()
            .user_agent("pai-readiness-gate/1.0")
            .build()
            .context("Failed to create HTTP client for readiness probes")?;

        Ok(Self { client, config })
    }

    pub fn config(&self) -> &ReadinessConfig {
        &self.config
    }

    /// Issue one probe; never fails, unreachable endpoints are reported in the result
    pub async fn probe(&self, url: &str) -> ProbeResult {
        self.probe_within(url, self.config.probe_timeout).await
    }

    async fn probe_within(&self, url: &str, limit: Duration) -> ProbeResult {
        let start_time = Instant::now();
        let outcome = self.client.get(url).timeout(limit).send().await;
        let response_time = start_time.elapsed();

        let status = match outcome {
            Ok(response) => ServiceHealth::Reachable(response.status().as_u16()),
            Err(e) if e.is_timeout() => {
                ServiceHealth::Unreachable(format!("no answer within {}ms", limit.as_millis()))
            }
            Err(e) => ServiceHealth::Unreachable(error_chain(&e)),
        };

        ProbeResult::new(url)
            .with_status(status)
            .with_response_time(response_time)
    }

    /// Poll `url` until it answers (true) or `timeout` elapses (false)
    ///
    /// Never returns `false` before `timeout` has passed.
    pub async fn wait_until_ready(&self, service: &str, url: &str, timeout: Duration) -> bool {
        info!(
            service,
            url,
            timeout_ms = timeout.as_millis() as u64,
            "Waiting for service to become reachable"
        );

        let start_time = Instant::now();
        let mut attempts = 0u32;

        loop {
            let remaining = timeout.saturating_sub(start_time.elapsed());
            let limit = self.config.probe_timeout.min(remaining.max(Duration::from_millis(50)));
            let result = self.probe_within(url, limit).await;
            attempts += 1;

            if result.is_reachable() {
                info!(
                    service,
                    url,
                    attempts,
                    elapsed_ms = start_time.elapsed().as_millis() as u64,
                    "Service is reachable"
                );
                return true;
            }

            if self.config.verbose_logging {
                debug!(
                    service,
                    url,
                    attempts,
                    status = ?result.status,
                    "Service not reachable yet"
                );
            }

            let elapsed = start_time.elapsed();
            if elapsed >= timeout {
                warn!(
                    service,
                    url,
                    attempts,
                    elapsed_ms = elapsed.as_millis() as u64,
                    "Service did not become reachable in time"
                );
                return false;
            }

            tokio::time::sleep(self.config.poll_interval.min(timeout - elapsed)).await;
        }
    }
}

/// Error message with its causes, so connect failures name the real reason
fn error_chain(error: &reqwest::Error) -> String {
    let mut message = error.to_string();
    let mut source = std::error::Error::source(error);
    while let Some(cause) = source {
        message.push_str(": ");
        message.push_str(&cause.to_string());
        source = std::error::Error::source(cause);
    }
    message
}

#[cfg(test)]
mod tests {
    use super::*;

    fn fast_gate() -> ReadinessGate {
        ReadinessGate::new(ReadinessConfig {
            poll_interval: Duration::from_millis(50),
            probe_timeout: Duration::from_millis(200),
            verbose_logging: true,
        })
        .unwrap()
    }

    fn unused_port() -> u16 {
        std::net::TcpListener::bind("127.0.0.1:0")
            .unwrap()
            .local_addr()
            .unwrap()
            .port()
    }

    #[tokio::test]
    async fn test_probe_refused_is_unreachable() {
        let url = format!("http://127.0.0.1:{}/", unused_port());
        let result = fast_gate().probe(&url).await;
        match result.status {
            ServiceHealth::Unreachable(reason) => {
                assert!(reason.to_lowercase().contains("refused"), "{reason}");
            }
            other => panic!("expected unreachable, got {other:?}"),
        }
    }

    #[tokio::test]
    async fn test_unresolvable_host_is_not_reported_as_refused() {
        let result = fast_gate().probe("http://pai-readiness.invalid/").await;
        match result.status {
            ServiceHealth::Unreachable(reason) => {
                assert!(!reason.to_lowercase().contains("refused"), "{reason}");
            }
            other => panic!("expected unreachable, got {other:?}"),
        }
    }

    #[tokio::test]
    async fn test_zero_timeout_probes_once() {
        let url = format!("http://127.0.0.1:{}/", unused_port());
        let start = Instant::now();
        assert!(!fast_gate().wait_until_ready("test", &url, Duration::ZERO).await);
        assert!(start.elapsed() < Duration::from_secs(1));
    }
}
