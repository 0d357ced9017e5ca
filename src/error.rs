//! Error types for command dispatch and feedback correlation

use std::time::Duration;

use thiserror::Error;

use crate::envelope::{Interface, RobotMessage};

pub type Result<T> = std::result::Result<T, LinkError>;

#[derive(Error, Debug)]
pub enum LinkError {
    #[error("Timeout: future result not available after {elapsed:?}")]
    Timeout { elapsed: Duration },

    /// The controller reported a failure for the instruction.
    #[error("{feedback}, reply={reply:?}")]
    Instruction {
        feedback: String,
        reply: Box<RobotMessage>,
    },

    #[error("Protocol version mismatch. Server={server}, Client={client}")]
    ProtocolMismatch { server: i64, client: i64 },

    #[error("Could not yet retrieve server protocol version (waited {waited:?})")]
    VersionUnavailable { waited: Duration },

    #[error("Cannot find the specified namespace. Detected namespaces={detected:?}")]
    NamespaceNotFound { detected: Vec<String> },

    #[error("Instruction '{instruction}' does not support interface '{interface}'")]
    UnsupportedInterface {
        instruction: String,
        interface: Interface,
    },

    #[error("Streaming feedback is not supported on interface '{0}'")]
    StreamingUnsupported(Interface),

    #[error("Feedback parsing error: {0}")]
    Parse(String),

    #[error("Waiter was dropped before feedback arrived")]
    Abandoned,

    #[error("Transport error: {0}")]
    Transport(String),

    #[error("Configuration error: {0}")]
    Config(String),

    #[error("IO error: {0}")]
    Io(#[from] std::io::Error),

    #[error("YAML parsing error: {0}")]
    Yaml(#[from] serde_yaml::Error),

    #[error("JSON error: {0}")]
    Json(#[from] serde_json::Error),
}

impl LinkError {
    /// Whether the error ends the connection rather than a single command
    pub fn is_connection_fatal(&self) -> bool {
        matches!(
            self,
            LinkError::ProtocolMismatch { .. }
                | LinkError::VersionUnavailable { .. }
                | LinkError::NamespaceNotFound { .. }
        )
    }
}
