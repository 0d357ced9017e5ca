//! Robot client
//!
//! The dispatcher and public face of the crate. A [`RobotClient`] owns one
//! sequence counter per interface, the correlation table and the protocol
//! gate of its connection, and installs the feedback handler on both
//! response topics when it connects.
//!
//! Three calling conventions are offered:
//! - [`RobotClient::send`]: fire and forget, or a [`FutureResult`] when the
//!   command asks for feedback
//! - [`RobotClient::send_and_wait`]: send and wait for the decoded result
//! - [`RobotClient::send_and_subscribe`]: stream every feedback message of a
//!   command to a callback

use std::sync::Arc;
use std::time::Duration;

use tracing::{debug, error, info};

use crate::config::ClientConfig;
use crate::correlation::{CorrelationKey, CorrelationTable, FutureResult, KeyPrefix};
use crate::envelope::{ExecutionLevel, FeedbackLevel, Instruction, Interface, RobotMessage};
use crate::error::{LinkError, Result};
use crate::feedback::FeedbackParser;
use crate::protocol::ProtocolGate;
use crate::sequence::SequenceCounter;
use crate::transport::{FeedbackHandler, Topics, Transport};

/// Result type produced by an instruction's parser
pub type Output<I> = <<I as Instruction>::Parser as FeedbackParser>::Output;

pub struct RobotClient {
    transport: Arc<dyn Transport>,
    topics: Topics,
    app_counter: SequenceCounter,
    sys_counter: SequenceCounter,
    table: Arc<CorrelationTable>,
    gate: ProtocolGate,
    default_timeout: Option<Duration>,
    evict_on_timeout: bool,
}

impl RobotClient {
    /// Connect to the robot namespace given in `config`.
    ///
    /// Subscribes the feedback handler to both response topics. The protocol
    /// version is checked lazily, right before the first command.
    pub async fn connect(transport: Arc<dyn Transport>, config: &ClientConfig) -> Result<Self> {
        let topics = Topics::new(config.namespace());
        let protocol = config.protocol();
        let feedback = config.feedback();
        let table = Arc::new(CorrelationTable::new());

        for interface in Interface::ALL {
            let prefix = KeyPrefix::from(interface);
            let table = Arc::clone(&table);
            let handler: FeedbackHandler =
                Arc::new(move |message: RobotMessage| dispatch_feedback(&table, message, prefix));
            transport.subscribe(&topics.response(interface), handler).await?;
        }

        info!("Robot client connected to namespace {}", topics.namespace());

        let threshold = feedback.rollover_threshold();
        Ok(Self {
            transport,
            gate: ProtocolGate::new(topics.namespace())
                .with_expected_version(protocol.expected_version())
                .with_grace_period(protocol.version_timeout()),
            topics,
            app_counter: SequenceCounter::with_threshold(0, threshold),
            sys_counter: SequenceCounter::with_threshold(0, threshold),
            table,
            default_timeout: feedback.default_timeout(),
            evict_on_timeout: feedback.evict_on_timeout(),
        })
    }

    /// Send a command without waiting.
    ///
    /// Returns a [`FutureResult`] when the command requests feedback, `None`
    /// otherwise. Waiting on the future can be deferred.
    pub async fn send<I: Instruction>(
        &self,
        command: &mut I,
        interface: Option<Interface>,
    ) -> Result<Option<FutureResult<Output<I>>>> {
        let (interface, key, message) = self.prepare(command, interface).await?;

        let future = if command.envelope().feedback_level.requests_feedback() {
            Some(self.table.register_waiter(key, command.parser(), self.evict_on_timeout))
        } else {
            None
        };

        self.publish(interface, key, &message, future.is_some()).await?;
        Ok(future)
    }

    /// Send a command and wait for its feedback.
    ///
    /// A command that requests no feedback is upgraded first: to `Data` when
    /// it runs at driver level, to `Done` otherwise. `timeout` falls back to
    /// the configured default; with neither, the wait is unbounded.
    pub async fn send_and_wait<I: Instruction>(
        &self,
        command: &mut I,
        timeout: Option<Duration>,
        interface: Option<Interface>,
    ) -> Result<Output<I>> {
        let envelope = command.envelope_mut();
        if !envelope.feedback_level.requests_feedback() {
            envelope.feedback_level = match envelope.exec_level {
                ExecutionLevel::Driver => FeedbackLevel::Data,
                _ => FeedbackLevel::Done,
            };
        }

        let (interface, key, message) = self.prepare(command, interface).await?;
        let future = self.table.register_waiter(key, command.parser(), self.evict_on_timeout);
        self.publish(interface, key, &message, true).await?;

        future.result(timeout.or(self.default_timeout)).await
    }

    /// Send a command that streams feedback; `callback` runs for every message.
    ///
    /// Only the application interface supports streaming. The callback is
    /// invoked on the transport's delivery thread. The subscription stays
    /// registered until [`RobotClient::unsubscribe`] is called.
    pub async fn send_and_subscribe<I, F>(
        &self,
        command: &mut I,
        callback: F,
        interface: Option<Interface>,
    ) -> Result<CorrelationKey>
    where
        I: Instruction,
        F: Fn(Result<Output<I>>) + Send + Sync + 'static,
    {
        let interface = interface.unwrap_or_else(|| command.envelope().default_interface());
        if interface != Interface::App {
            return Err(LinkError::StreamingUnsupported(interface));
        }

        let (interface, key, message) = self.prepare(command, Some(interface)).await?;
        self.table.register_subscriber(key, command.parser(), callback);
        self.publish(interface, key, &message, true).await?;
        Ok(key)
    }

    /// Drop a subscription created by [`RobotClient::send_and_subscribe`].
    ///
    /// Callbacks run outside the table lock, so a delivery that was already
    /// under way can still invoke the callback after this returns `true`.
    /// No delivery that starts afterwards will.
    pub fn unsubscribe(&self, key: &CorrelationKey) -> bool {
        self.table.remove(key)
    }

    /// Number of outstanding waiters and subscribers
    pub fn pending(&self) -> usize {
        self.table.len()
    }

    /// Route a feedback message received under `prefix` to its waiter
    pub fn handle_feedback(&self, message: RobotMessage, prefix: KeyPrefix) {
        dispatch_feedback(&self.table, message, prefix);
    }

    pub fn topics(&self) -> &Topics {
        &self.topics
    }

    pub fn gate(&self) -> &ProtocolGate {
        &self.gate
    }

    /// Run the protocol gate, select the interface and stamp a fresh id
    async fn prepare<I: Instruction>(
        &self,
        command: &mut I,
        interface: Option<Interface>,
    ) -> Result<(Interface, CorrelationKey, RobotMessage)> {
        let interface = interface.unwrap_or_else(|| command.envelope().default_interface());
        self.gate.ensure_compatible(self.transport.as_ref()).await?;

        let envelope = command.envelope_mut();
        envelope.select_interface(interface)?;
        let sequence_id = self.counter(interface).increment();
        envelope.stamp(sequence_id);

        Ok((
            interface,
            CorrelationKey::for_command(interface, sequence_id),
            envelope.to_message(),
        ))
    }

    async fn publish(
        &self,
        interface: Interface,
        key: CorrelationKey,
        message: &RobotMessage,
        registered: bool,
    ) -> Result<()> {
        let topic = self.topics.request(interface);
        debug!("Sending {} as {} on {}", message.instruction, key, topic);

        if let Err(e) = self.transport.publish(&topic, message).await {
            error!("Failed to publish {}: {}", key, e);
            if registered {
                self.table.remove(&key);
            }
            return Err(e);
        }
        Ok(())
    }

    fn counter(&self, interface: Interface) -> &SequenceCounter {
        match interface {
            Interface::App => &self.app_counter,
            Interface::Sys => &self.sys_counter,
        }
    }
}

fn dispatch_feedback(table: &CorrelationTable, message: RobotMessage, prefix: KeyPrefix) {
    let key = CorrelationKey::for_response(&message, prefix);
    if !table.resolve(&key, &message) {
        debug!("Dropping unsolicited feedback for {}: {:?}", key, message.feedback);
    }
}
