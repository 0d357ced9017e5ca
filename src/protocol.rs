//! Protocol version handshake
//!
//! Before the first command of a connection the client reads the server's
//! `protocol_version` parameter and refuses to talk to an incompatible
//! server. The check runs once per client and is never repeated.

use std::collections::BTreeSet;
use std::time::Duration;

use tokio::sync::Mutex;
use tracing::{debug, info};

use crate::error::{LinkError, Result};
use crate::transport::{Topics, Transport, PROTOCOL_VERSION_PARAM, ROBOT_STATE_PORT_PARAM};

/// Protocol version spoken by this client
pub const CLIENT_PROTOCOL_VERSION: i64 = 2;

/// How long to wait for the server's version before giving up
pub const DEFAULT_VERSION_TIMEOUT: Duration = Duration::from_secs(10);

#[derive(Debug, Default)]
struct GateState {
    checked: bool,
    observed_version: Option<i64>,
}

#[derive(Debug)]
pub struct ProtocolGate {
    topics: Topics,
    expected_version: i64,
    grace_period: Duration,
    // Held across the version fetch so concurrent first commands check once
    state: Mutex<GateState>,
}

impl ProtocolGate {
    pub fn new(namespace: &str) -> Self {
        Self {
            topics: Topics::new(namespace),
            expected_version: CLIENT_PROTOCOL_VERSION,
            grace_period: DEFAULT_VERSION_TIMEOUT,
            state: Mutex::new(GateState::default()),
        }
    }

    pub fn with_expected_version(mut self, version: i64) -> Self {
        self.expected_version = version;
        self
    }

    pub fn with_grace_period(mut self, grace_period: Duration) -> Self {
        self.grace_period = grace_period;
        self
    }

    /// Verify the server speaks the expected protocol version.
    ///
    /// A no-op once a check has succeeded.
    pub async fn ensure_compatible(&self, transport: &dyn Transport) -> Result<()> {
        let mut state = self.state.lock().await;
        if state.checked {
            return Ok(());
        }

        let param = self.topics.version_param();
        debug!("Fetching server protocol version from {}", param);

        let value = tokio::time::timeout(self.grace_period, transport.get_param(&param))
            .await
            .map_err(|_| LinkError::VersionUnavailable {
                waited: self.grace_period,
            })??;

        let value = match value {
            Some(value) => value,
            None => {
                let params = transport.list_params().await?;
                return Err(LinkError::NamespaceNotFound {
                    detected: detect_namespaces(&params),
                });
            }
        };

        let server = parse_version(&value)?;
        if server != self.expected_version {
            return Err(LinkError::ProtocolMismatch {
                server,
                client: self.expected_version,
            });
        }

        state.checked = true;
        state.observed_version = Some(server);
        info!(
            "Server protocol version {} confirmed on {}",
            server,
            self.topics.namespace()
        );
        Ok(())
    }

    pub async fn is_checked(&self) -> bool {
        self.state.lock().await.checked
    }

    /// Version reported by the server, once checked
    pub async fn observed_version(&self) -> Option<i64> {
        self.state.lock().await.observed_version
    }

    pub fn expected_version(&self) -> i64 {
        self.expected_version
    }
}

fn parse_version(value: &serde_json::Value) -> Result<i64> {
    match value {
        serde_json::Value::Number(number) => number.as_i64(),
        serde_json::Value::String(text) => text.trim().parse().ok(),
        _ => None,
    }
    .ok_or_else(|| LinkError::Parse(format!("Invalid protocol version value: {}", value)))
}

/// Namespaces that publish both a state port and a protocol version, sorted
pub fn detect_namespaces(params: &[String]) -> Vec<String> {
    let names: BTreeSet<&str> = params.iter().map(String::as_str).collect();
    let suffix = format!("/{}", ROBOT_STATE_PORT_PARAM);

    names
        .iter()
        .filter_map(|name| name.strip_suffix(suffix.as_str()))
        .filter(|namespace| names.contains(format!("{}/{}", namespace, PROTOCOL_VERSION_PARAM).as_str()))
        .map(str::to_string)
        .collect()
}
