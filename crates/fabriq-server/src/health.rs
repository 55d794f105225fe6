//! `GET /health` payload.

use std::time::{Duration, Instant};

use serde::{Deserialize, Serialize};

/// Path of the health endpoint.
pub const HEALTH_PATH: &str = "/health";

/// Health status response.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Eq)]
pub struct HealthStatus {
    /// `"healthy"` while the process serves requests.
    pub status: String,
    /// Service name.
    pub service: String,
    /// Service version.
    pub version: String,
    /// Seconds since the server started.
    pub uptime_seconds: u64,
}

impl HealthStatus {
    /// Returns whether the status is healthy.
    #[must_use]
    pub fn is_healthy(&self) -> bool {
        self.status == "healthy"
    }
}

/// Liveness reporter. Healthy for as long as the server runs.
#[derive(Debug, Clone)]
pub struct HealthCheck {
    service: String,
    version: String,
    started: Instant,
}

impl HealthCheck {
    /// Creates a health check for a service.
    #[must_use]
    pub fn new(service: impl Into<String>, version: impl Into<String>) -> Self {
        Self {
            service: service.into(),
            version: version.into(),
            started: Instant::now(),
        }
    }

    /// Returns the current status.
    #[must_use]
    pub fn status(&self) -> HealthStatus {
        HealthStatus {
            status: "healthy".to_string(),
            service: self.service.clone(),
            version: self.version.clone(),
            uptime_seconds: self.uptime().as_secs(),
        }
    }

    /// Returns the time since creation.
    #[must_use]
    pub fn uptime(&self) -> Duration {
        self.started.elapsed()
    }
}
