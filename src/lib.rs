//! armlink - command/feedback correlation for remote robot controllers
//!
//! Commands travel to the controller over a publish/subscribe transport that
//! has no request/response semantics of its own. This library assigns each
//! command a sequence id, tracks who is waiting for its feedback and routes
//! incoming feedback back to the right waiter or subscriber.
//!
//! # Quick Start
//!
//! ```rust,no_run
//! use std::sync::Arc;
//! use armlink::{ClientConfig, Command, CommandEnvelope, MemoryTransport, RobotClient};
//!
//! #[tokio::main]
//! async fn main() -> Result<(), Box<dyn std::error::Error>> {
//!     let transport = Arc::new(MemoryTransport::with_echo().with_server("/rob1", 2));
//!     let client = RobotClient::connect(transport, &ClientConfig::with_namespace("/rob1")).await?;
//!
//!     // Blocks until the controller reports the instruction as done
//!     let mut noop = Command::new(CommandEnvelope::new("r_RRC_Noop"));
//!     let feedback = client.send_and_wait(&mut noop, None, None).await?;
//!     println!("Feedback: {}", feedback);
//!
//!     Ok(())
//! }
//! ```
//!
//! # Architecture
//!
//! - **RobotClient**: send, send-and-wait and send-and-subscribe
//! - **CorrelationTable**: outstanding waiters and subscribers by key
//! - **SequenceCounter**: wrapping id generator, one per interface
//! - **FeedbackParser**: per-command decoding of feedback messages
//! - **ProtocolGate**: once-per-connection protocol version check
//! - **Transport**: publish/subscribe backend (in-memory or Zenoh)

pub mod client;
pub mod config;
pub mod correlation;
pub mod echo;
pub mod envelope;
pub mod error;
pub mod feedback;
pub mod protocol;
pub mod sequence;
pub mod transport;

// High-level exports for easy usage
pub use client::{Output, RobotClient};
pub use config::ClientConfig;
pub use envelope::{
    Command, CommandEnvelope, DebugInstruction, ExecutionLevel, FeedbackLevel, Instruction, Interface,
    RobotMessage,
};
pub use error::{LinkError, Result};
pub use feedback::{DefaultFeedback, FeedbackParser, ParseWith, RawFeedback};
pub use transport::{MemoryTransport, Transport};

// Core component exports for advanced usage
pub use config::{ClientSection, FeedbackConfig, ProtocolConfig, TransportConfig};
pub use correlation::{CorrelationKey, CorrelationTable, FutureResult, KeyPrefix};
pub use echo::EchoResponder;
pub use envelope::{MAX_FLOAT_VALUES, MAX_STRING_VALUES};
pub use feedback::{decode, float_at, is_rapid_none, FEEDBACK_ERROR_PREFIX};
pub use protocol::{ProtocolGate, CLIENT_PROTOCOL_VERSION};
pub use sequence::{SequenceCounter, ROLLOVER_THRESHOLD};
pub use transport::{FeedbackHandler, Topics};

#[cfg(feature = "zenoh-integration")]
pub use transport::ZenohTransport;
