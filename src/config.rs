//! Configuration loading for robot clients

use serde::{Deserialize, Serialize};
use std::fs;
use std::path::Path;
use std::time::Duration;

use crate::error::{LinkError, Result};
use crate::protocol::{CLIENT_PROTOCOL_VERSION, DEFAULT_VERSION_TIMEOUT};
use crate::sequence::ROLLOVER_THRESHOLD;

#[derive(Debug, Clone, Deserialize, Serialize)]
pub struct ClientConfig {
    pub client: ClientSection,
    pub protocol: Option<ProtocolConfig>,
    pub feedback: Option<FeedbackConfig>,
    pub transport: Option<TransportConfig>,
}

#[derive(Debug, Clone, Deserialize, Serialize)]
pub struct ClientSection {
    /// Robot namespace, e.g. `/rob1`
    pub namespace: String,
}

#[derive(Debug, Clone, Default, Deserialize, Serialize)]
pub struct ProtocolConfig {
    pub expected_version: Option<i64>,
    pub version_timeout_seconds: Option<f64>,
}

#[derive(Debug, Clone, Default, Deserialize, Serialize)]
pub struct FeedbackConfig {
    /// Omitted means wait forever
    pub default_timeout_seconds: Option<f64>,
    pub evict_on_timeout: Option<bool>,
    pub rollover_threshold: Option<u32>,
}

#[derive(Debug, Clone, Default, Deserialize, Serialize)]
pub struct TransportConfig {
    pub zenoh_endpoint: Option<String>,
}

impl ClientConfig {
    /// Config with defaults everywhere except the namespace
    pub fn with_namespace(namespace: impl Into<String>) -> Self {
        Self {
            client: ClientSection {
                namespace: namespace.into(),
            },
            protocol: None,
            feedback: None,
            transport: None,
        }
    }

    pub fn load_from_path(path: impl AsRef<Path>) -> Result<Self> {
        let path = path.as_ref();
        let contents = fs::read_to_string(path)
            .map_err(|e| LinkError::Config(format!("Failed to read {}: {}", path.display(), e)))?;
        Self::load_from_str(&contents)
    }

    pub fn load_from_str(contents: &str) -> Result<Self> {
        let config: ClientConfig = serde_yaml::from_str(contents)?;
        config.validate()?;
        Ok(config)
    }

    fn validate(&self) -> Result<()> {
        if self.client.namespace.trim().is_empty() {
            return Err(LinkError::Config("client.namespace must not be empty".to_string()));
        }
        for (name, value) in [
            ("protocol.version_timeout_seconds", self.protocol().version_timeout_seconds),
            ("feedback.default_timeout_seconds", self.feedback().default_timeout_seconds),
        ] {
            if let Some(seconds) = value {
                seconds_to_duration(seconds).map_err(|e| LinkError::Config(format!("{}: {}", name, e)))?;
            }
        }
        if self.feedback().rollover_threshold == Some(0) {
            return Err(LinkError::Config("feedback.rollover_threshold must be positive".to_string()));
        }
        Ok(())
    }

    pub fn namespace(&self) -> &str {
        &self.client.namespace
    }

    /// Get protocol configuration with defaults
    pub fn protocol(&self) -> ProtocolConfig {
        self.protocol.clone().unwrap_or_default()
    }

    /// Get feedback configuration with defaults
    pub fn feedback(&self) -> FeedbackConfig {
        self.feedback.clone().unwrap_or_default()
    }

    pub fn zenoh_endpoint(&self) -> Option<&str> {
        self.transport.as_ref()?.zenoh_endpoint.as_deref()
    }
}

/// Convert a seconds value from config or the command line.
///
/// Rejects negative, non-finite and out-of-range values.
pub fn seconds_to_duration(seconds: f64) -> std::result::Result<Duration, String> {
    Duration::try_from_secs_f64(seconds)
        .map_err(|_| format!("{} is not a valid number of seconds", seconds))
}

impl ProtocolConfig {
    pub fn expected_version(&self) -> i64 {
        self.expected_version.unwrap_or(CLIENT_PROTOCOL_VERSION)
    }

    /// Grace period for the server's version to become available
    pub fn version_timeout(&self) -> Duration {
        self.version_timeout_seconds
            .and_then(|seconds| seconds_to_duration(seconds).ok())
            .unwrap_or(DEFAULT_VERSION_TIMEOUT)
    }
}

impl FeedbackConfig {
    pub fn default_timeout(&self) -> Option<Duration> {
        self.default_timeout_seconds
            .and_then(|seconds| seconds_to_duration(seconds).ok())
    }

    pub fn evict_on_timeout(&self) -> bool {
        self.evict_on_timeout.unwrap_or(true)
    }

    pub fn rollover_threshold(&self) -> u32 {
        self.rollover_threshold.unwrap_or(ROLLOVER_THRESHOLD)
    }
}
