//! Transport abstraction
//!
//! Provides a trait-based interface for moving command and feedback messages
//! over any publish/subscribe backend (Zenoh, in-process, ...). The client
//! only needs four things from a backend: publish, subscribe, and a
//! parameter lookup used by the protocol handshake.

use std::sync::Arc;

use async_trait::async_trait;

use crate::envelope::{Interface, RobotMessage};
use crate::error::Result;

pub mod memory;
#[cfg(feature = "zenoh-integration")]
pub mod zenoh;

pub use memory::MemoryTransport;
#[cfg(feature = "zenoh-integration")]
pub use self::zenoh::ZenohTransport;

/// Callback invoked by the transport for every message received on a topic
pub type FeedbackHandler = Arc<dyn Fn(RobotMessage) + Send + Sync>;

pub const APP_REQUEST_TOPIC: &str = "robot_command";
pub const APP_RESPONSE_TOPIC: &str = "robot_response";
pub const SYS_REQUEST_TOPIC: &str = "robot_command_system";
pub const SYS_RESPONSE_TOPIC: &str = "robot_response_system";

/// Parameter holding the server's protocol version
pub const PROTOCOL_VERSION_PARAM: &str = "protocol_version";
/// Parameter every running server publishes next to the version
pub const ROBOT_STATE_PORT_PARAM: &str = "robot_state_port";

/// Trait for the publish/subscribe backend of a client
///
/// Handlers registered with `subscribe` are called synchronously on the
/// transport's delivery thread and must not block.
#[async_trait]
pub trait Transport: Send + Sync {
    /// Publish a message on a topic
    async fn publish(&self, topic: &str, message: &RobotMessage) -> Result<()>;

    /// Register a handler for every message arriving on a topic
    async fn subscribe(&self, topic: &str, handler: FeedbackHandler) -> Result<()>;

    /// Look up a named parameter; `None` when it does not exist
    async fn get_param(&self, name: &str) -> Result<Option<serde_json::Value>>;

    /// Names of all parameters currently visible
    async fn list_params(&self) -> Result<Vec<String>>;
}

/// Make sure a namespace ends with exactly one `/`
pub fn normalize_namespace(namespace: &str) -> String {
    let trimmed = namespace.trim_end_matches('/');
    format!("{}/", trimmed)
}

/// Topic and parameter names of one robot namespace
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Topics {
    namespace: String,
}

impl Topics {
    pub fn new(namespace: &str) -> Self {
        Self {
            namespace: normalize_namespace(namespace),
        }
    }

    /// Namespace with its trailing `/`
    pub fn namespace(&self) -> &str {
        &self.namespace
    }

    pub fn request(&self, interface: Interface) -> String {
        match interface {
            Interface::App => format!("{}{}", self.namespace, APP_REQUEST_TOPIC),
            Interface::Sys => format!("{}{}", self.namespace, SYS_REQUEST_TOPIC),
        }
    }

    pub fn response(&self, interface: Interface) -> String {
        match interface {
            Interface::App => format!("{}{}", self.namespace, APP_RESPONSE_TOPIC),
            Interface::Sys => format!("{}{}", self.namespace, SYS_RESPONSE_TOPIC),
        }
    }

    pub fn version_param(&self) -> String {
        format!("{}{}", self.namespace, PROTOCOL_VERSION_PARAM)
    }

    pub fn state_port_param(&self) -> String {
        format!("{}{}", self.namespace, ROBOT_STATE_PORT_PARAM)
    }
}

/// Response topic paired with a request topic, in any namespace
pub fn response_topic_for(request_topic: &str) -> Option<String> {
    if let Some(namespace) = request_topic.strip_suffix(SYS_REQUEST_TOPIC) {
        return Some(format!("{}{}", namespace, SYS_RESPONSE_TOPIC));
    }
    request_topic
        .strip_suffix(APP_REQUEST_TOPIC)
        .map(|namespace| format!("{}{}", namespace, APP_RESPONSE_TOPIC))
}
