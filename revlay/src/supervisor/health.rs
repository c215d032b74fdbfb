//! HTTP health probe

use std::time::Duration;

use reqwest::Client;
use tracing::{debug, info, warn};

use crate::errors::RevlayError;
use crate::storage::settings::ServiceConfig;

/// Repeated GET against `http://localhost:<port><path>`
#[derive(Debug, Clone)]
pub struct HealthProbe {
    client: Client,
    path: String,
    retries: u32,
    interval: Duration,
}

impl HealthProbe {
    pub fn new(
        path: &str,
        retries: u32,
        interval: Duration,
        timeout: Duration,
    ) -> Result<Self, RevlayError> {
        let client = Client::builder().timeout(timeout).no_proxy().build()?;

        let path = if path.is_empty() || path.starts_with('/') {
            path.to_string()
        } else {
            format!("/{}", path)
        };

        Ok(Self {
            client,
            path,
            retries: retries.max(1),
            interval,
        })
    }

    /// Probe settings from the service section
    pub fn from_config(service: &ServiceConfig) -> Result<Self, RevlayError> {
        Self::new(
            &service.health_check,
            service.effective_retries(),
            service.effective_interval(),
            service.effective_timeout(),
        )
    }

    /// No path configured means the service is assumed healthy
    pub fn is_disabled(&self) -> bool {
        self.path.is_empty()
    }

    pub fn url(&self, port: u16) -> String {
        format!("http://localhost:{}{}", port, self.path)
    }

    /// Single attempt, true on a status in [200, 400)
    pub async fn check_once(&self, port: u16) -> bool {
        match self.client.get(self.url(port)).send().await {
            Ok(response) => {
                let status = response.status().as_u16();
                debug!(port, status, "Health check response");
                (200..400).contains(&status)
            }
            Err(e) => {
                debug!(port, "Health check request failed: {}", e);
                false
            }
        }
    }

    /// Probe until healthy or the attempt budget is spent
    pub async fn wait_healthy(&self, port: u16) -> Result<(), RevlayError> {
        if self.is_disabled() {
            debug!(port, "No health check configured, assuming healthy");
            return Ok(());
        }

        let url = self.url(port);
        for attempt in 1..=self.retries {
            if self.check_once(port).await {
                info!(port, attempt, "Health check passed");
                return Ok(());
            }
            if attempt < self.retries {
                tokio::time::sleep(self.interval).await;
            }
        }

        warn!(port, "Health check failed after {} attempts", self.retries);
        Err(RevlayError::HealthCheckTimeout(format!(
            "{} not healthy after {} attempts",
            url, self.retries
        )))
    }
}
