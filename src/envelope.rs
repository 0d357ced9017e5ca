//! Command envelope and wire message
//!
//! Every outgoing command is described by a [`CommandEnvelope`]: which
//! instruction to run on which interface, at which execution level, whether
//! feedback is wanted, and the string/numeric payload. The dispatcher stamps
//! the sequence id right before publishing and converts the envelope into a
//! [`RobotMessage`], the struct that travels in both directions.

use std::collections::BTreeMap;
use std::fmt;
use std::sync::Arc;

use serde::{Deserialize, Serialize};

use crate::error::{LinkError, Result};
use crate::feedback::{DefaultFeedback, FeedbackParser, RawFeedback};

/// Maximum number of string values a single command may carry
pub const MAX_STRING_VALUES: usize = 5;

/// Maximum number of numeric values a single command may carry
pub const MAX_FLOAT_VALUES: usize = 30;

/// Channel pair a command travels on
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum Interface {
    /// Primary application channel
    App,
    /// System channel (controller services outside the robot task)
    Sys,
}

impl Interface {
    pub const ALL: [Interface; 2] = [Interface::App, Interface::Sys];

    pub fn as_str(self) -> &'static str {
        match self {
            Interface::App => "app",
            Interface::Sys => "sys",
        }
    }
}

impl fmt::Display for Interface {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// Feedback requested from the controller
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub enum FeedbackLevel {
    #[default]
    None,
    /// Reply once the instruction has been executed
    Done,
    /// Reply with all feedback data
    Data,
}

impl FeedbackLevel {
    pub fn wire_value(self) -> i32 {
        match self {
            FeedbackLevel::None => 0,
            FeedbackLevel::Done => 1,
            FeedbackLevel::Data => -1,
        }
    }

    pub fn requests_feedback(self) -> bool {
        self != FeedbackLevel::None
    }
}

impl TryFrom<i32> for FeedbackLevel {
    type Error = LinkError;

    fn try_from(value: i32) -> Result<Self> {
        match value {
            0 => Ok(FeedbackLevel::None),
            1 => Ok(FeedbackLevel::Done),
            -1 => Ok(FeedbackLevel::Data),
            other => Err(LinkError::Parse(format!("Unknown feedback level: {}", other))),
        }
    }
}

/// Where the instruction is executed
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub enum ExecutionLevel {
    /// Robot task
    #[default]
    Robot,
    /// Controller task (custom instructions only)
    Controller,
    /// Outside the controller, inside the driver
    Driver,
}

impl ExecutionLevel {
    pub fn wire_value(self) -> i32 {
        match self {
            ExecutionLevel::Robot => 0,
            ExecutionLevel::Controller => 10,
            ExecutionLevel::Driver => -1,
        }
    }
}

impl TryFrom<i32> for ExecutionLevel {
    type Error = LinkError;

    fn try_from(value: i32) -> Result<Self> {
        match value {
            0 => Ok(ExecutionLevel::Robot),
            10 => Ok(ExecutionLevel::Controller),
            -1 => Ok(ExecutionLevel::Driver),
            other => Err(LinkError::Parse(format!("Unknown execution level: {}", other))),
        }
    }
}

/// Message exchanged with the controller, in both directions
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct RobotMessage {
    pub instruction: String,
    pub sequence_id: u32,
    #[serde(default)]
    pub feedback_level: i32,
    #[serde(default)]
    pub exec_level: i32,
    /// Free text result; failures start with the error marker
    #[serde(default)]
    pub feedback: String,
    /// Sequence id of the command this message answers
    #[serde(default)]
    pub feedback_id: u32,
    #[serde(default)]
    pub string_values: Vec<String>,
    #[serde(default)]
    pub float_values: Vec<f64>,
}

impl RobotMessage {
    /// Build a feedback message answering `command`
    pub fn reply_to(command: &RobotMessage, feedback: impl Into<String>) -> Self {
        Self {
            instruction: command.instruction.clone(),
            sequence_id: command.sequence_id,
            feedback_level: command.feedback_level,
            exec_level: command.exec_level,
            feedback: feedback.into(),
            feedback_id: command.sequence_id,
            string_values: command.string_values.clone(),
            float_values: command.float_values.clone(),
        }
    }
}

/// Data contract of an outgoing command
#[derive(Debug, Clone, PartialEq)]
pub struct CommandEnvelope {
    instruction_names: BTreeMap<Interface, String>,
    default_interface: Interface,
    interface: Option<Interface>,
    instruction: String,
    sequence_id: u32,
    pub feedback_level: FeedbackLevel,
    pub exec_level: ExecutionLevel,
    pub string_values: Vec<String>,
    pub float_values: Vec<f64>,
}

impl CommandEnvelope {
    /// Envelope for an instruction available on the application interface
    pub fn new(instruction: impl Into<String>) -> Self {
        let instruction = instruction.into();
        let mut instruction_names = BTreeMap::new();
        instruction_names.insert(Interface::App, instruction.clone());

        Self {
            instruction_names,
            default_interface: Interface::App,
            interface: None,
            instruction,
            sequence_id: 0,
            feedback_level: FeedbackLevel::None,
            exec_level: ExecutionLevel::Robot,
            string_values: Vec::new(),
            float_values: Vec::new(),
        }
    }

    /// Envelope for an instruction that only exists on the system interface
    pub fn system(instruction: impl Into<String>) -> Self {
        let instruction = instruction.into();
        let mut instruction_names = BTreeMap::new();
        instruction_names.insert(Interface::Sys, instruction.clone());

        Self {
            instruction_names,
            default_interface: Interface::Sys,
            interface: None,
            instruction,
            sequence_id: 0,
            feedback_level: FeedbackLevel::None,
            exec_level: ExecutionLevel::Driver,
            string_values: Vec::new(),
            float_values: Vec::new(),
        }
    }

    pub fn with_system_name(mut self, name: impl Into<String>) -> Self {
        self.instruction_names.insert(Interface::Sys, name.into());
        self
    }

    pub fn with_default_interface(mut self, interface: Interface) -> Self {
        self.default_interface = interface;
        self
    }

    pub fn with_feedback(mut self, level: FeedbackLevel) -> Self {
        self.feedback_level = level;
        self
    }

    pub fn with_exec_level(mut self, level: ExecutionLevel) -> Self {
        self.exec_level = level;
        self
    }

    pub fn with_strings<S: Into<String>>(mut self, values: impl IntoIterator<Item = S>) -> Self {
        self.string_values = values.into_iter().map(Into::into).collect();
        self
    }

    pub fn with_floats(mut self, values: impl IntoIterator<Item = f64>) -> Self {
        self.float_values = values.into_iter().collect();
        self
    }

    /// Select the interface the command will be sent over.
    ///
    /// Fails when the instruction has no name on that interface.
    pub fn select_interface(&mut self, interface: Interface) -> Result<()> {
        let name = self
            .instruction_names
            .get(&interface)
            .ok_or_else(|| LinkError::UnsupportedInterface {
                instruction: self.instruction.clone(),
                interface,
            })?;

        self.instruction = name.clone();
        self.interface = Some(interface);
        Ok(())
    }

    pub fn default_interface(&self) -> Interface {
        self.default_interface
    }

    /// Interface chosen at dispatch, if dispatched
    pub fn interface(&self) -> Option<Interface> {
        self.interface
    }

    /// Instruction name for the selected interface
    pub fn instruction(&self) -> &str {
        &self.instruction
    }

    /// Correlation id, 0 until dispatched
    pub fn sequence_id(&self) -> u32 {
        self.sequence_id
    }

    pub(crate) fn stamp(&mut self, sequence_id: u32) {
        self.sequence_id = sequence_id;
    }

    /// Check the wire protocol's payload limits.
    ///
    /// Catalog code calls this when building commands; dispatch does not.
    pub fn check_payload_bounds(&self) -> Result<()> {
        if self.string_values.len() > MAX_STRING_VALUES {
            return Err(LinkError::Parse(format!(
                "Protocol does not support more than {} string values (got {})",
                MAX_STRING_VALUES,
                self.string_values.len()
            )));
        }
        if self.float_values.len() > MAX_FLOAT_VALUES {
            return Err(LinkError::Parse(format!(
                "Protocol does not support more than {} float values (got {})",
                MAX_FLOAT_VALUES,
                self.float_values.len()
            )));
        }
        Ok(())
    }

    pub fn to_message(&self) -> RobotMessage {
        RobotMessage {
            instruction: self.instruction.clone(),
            sequence_id: self.sequence_id,
            feedback_level: self.feedback_level.wire_value(),
            exec_level: self.exec_level.wire_value(),
            feedback: String::new(),
            feedback_id: 0,
            string_values: self.string_values.clone(),
            float_values: self.float_values.clone(),
        }
    }
}

/// Anything the dispatcher can send.
///
/// Implementors expose their envelope and the parser that turns feedback into
/// the command's result type.
pub trait Instruction: Send {
    type Parser: FeedbackParser;

    fn envelope(&self) -> &CommandEnvelope;

    fn envelope_mut(&mut self) -> &mut CommandEnvelope;

    fn parser(&self) -> Arc<Self::Parser>;
}

/// General purpose command: an envelope plus a feedback parser
#[derive(Debug, Clone)]
pub struct Command<P = DefaultFeedback> {
    envelope: CommandEnvelope,
    parser: Arc<P>,
}

impl Command<DefaultFeedback> {
    /// Command whose feedback is decoded by the default decoder
    pub fn new(envelope: CommandEnvelope) -> Self {
        Self {
            envelope,
            parser: Arc::new(DefaultFeedback),
        }
    }
}

impl<P: FeedbackParser> Command<P> {
    pub fn with_parser(envelope: CommandEnvelope, parser: P) -> Self {
        Self {
            envelope,
            parser: Arc::new(parser),
        }
    }
}

impl<P: FeedbackParser> Instruction for Command<P> {
    type Parser = P;

    fn envelope(&self) -> &CommandEnvelope {
        &self.envelope
    }

    fn envelope_mut(&mut self) -> &mut CommandEnvelope {
        &mut self.envelope
    }

    fn parser(&self) -> Arc<P> {
        Arc::clone(&self.parser)
    }
}

/// Wraps any instruction to inspect it and receive its raw feedback.
///
/// Transport behaviour is unchanged: the wrapped envelope is sent as is. The
/// result is the raw [`RobotMessage`] unless a debug parser is supplied.
#[derive(Debug, Clone)]
pub struct DebugInstruction<I, P = RawFeedback> {
    inner: I,
    parser: Arc<P>,
}

impl<I: Instruction> DebugInstruction<I, RawFeedback> {
    pub fn new(inner: I) -> Self {
        Self {
            inner,
            parser: Arc::new(RawFeedback),
        }
    }
}

impl<I: Instruction, P: FeedbackParser> DebugInstruction<I, P> {
    pub fn with_parser(inner: I, parser: P) -> Self {
        Self {
            inner,
            parser: Arc::new(parser),
        }
    }

    pub fn sequence_id(&self) -> u32 {
        self.inner.envelope().sequence_id()
    }

    pub fn feedback_level(&self) -> FeedbackLevel {
        self.inner.envelope().feedback_level
    }

    pub fn exec_level(&self) -> ExecutionLevel {
        self.inner.envelope().exec_level
    }

    pub fn instruction(&self) -> &str {
        self.inner.envelope().instruction()
    }

    pub fn string_values(&self) -> &[String] {
        &self.inner.envelope().string_values
    }

    pub fn float_values(&self) -> &[f64] {
        &self.inner.envelope().float_values
    }

    /// Wire message as it would be published now
    pub fn message(&self) -> RobotMessage {
        self.inner.envelope().to_message()
    }

    pub fn into_inner(self) -> I {
        self.inner
    }
}

impl<I: Instruction, P: FeedbackParser> Instruction for DebugInstruction<I, P> {
    type Parser = P;

    fn envelope(&self) -> &CommandEnvelope {
        self.inner.envelope()
    }

    fn envelope_mut(&mut self) -> &mut CommandEnvelope {
        self.inner.envelope_mut()
    }

    fn parser(&self) -> Arc<P> {
        Arc::clone(&self.parser)
    }
}
