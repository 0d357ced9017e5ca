//! Feedback decoding
//!
//! Each command type decides the shape of its result by providing a
//! [`FeedbackParser`]. Commands without a parser of their own use
//! [`DefaultFeedback`], which only checks the feedback text for the
//! controller's failure marker.

use std::marker::PhantomData;

use tracing::debug;

use crate::envelope::RobotMessage;
use crate::error::{LinkError, Result};

/// Prefix the controller puts in front of failed instruction feedback
pub const FEEDBACK_ERROR_PREFIX: &str = "Done FError ";

/// Value the controller sends for "no value" (9E+9 as a RAPID float)
const RAPID_NONE: i64 = 8_999_999_488;

/// Turns a raw feedback message into a command-specific value
pub trait FeedbackParser: Send + Sync + 'static {
    type Output: Send + 'static;

    fn parse(&self, message: &RobotMessage) -> Result<Self::Output>;
}

/// Returns the feedback text, or an instruction error when it carries the
/// failure marker
#[derive(Debug, Clone, Copy, Default)]
pub struct DefaultFeedback;

impl FeedbackParser for DefaultFeedback {
    type Output = String;

    fn parse(&self, message: &RobotMessage) -> Result<String> {
        if message.feedback.starts_with(FEEDBACK_ERROR_PREFIX) {
            return Err(LinkError::Instruction {
                feedback: message.feedback.clone(),
                reply: Box::new(message.clone()),
            });
        }
        Ok(message.feedback.clone())
    }
}

/// Hands back the message untouched
#[derive(Debug, Clone, Copy, Default)]
pub struct RawFeedback;

impl FeedbackParser for RawFeedback {
    type Output = RobotMessage;

    fn parse(&self, message: &RobotMessage) -> Result<RobotMessage> {
        Ok(message.clone())
    }
}

/// Parser backed by a closure
pub struct ParseWith<F, T> {
    parse: F,
    _output: PhantomData<fn() -> T>,
}

impl<F, T> ParseWith<F, T>
where
    F: Fn(&RobotMessage) -> Result<T> + Send + Sync + 'static,
    T: Send + 'static,
{
    pub fn new(parse: F) -> Self {
        Self {
            parse,
            _output: PhantomData,
        }
    }
}

impl<F, T> FeedbackParser for ParseWith<F, T>
where
    F: Fn(&RobotMessage) -> Result<T> + Send + Sync + 'static,
    T: Send + 'static,
{
    type Output = T;

    fn parse(&self, message: &RobotMessage) -> Result<T> {
        (self.parse)(message)
    }
}

/// Decode a feedback message with the command's parser.
///
/// Commands without a parser of their own carry [`DefaultFeedback`], so the
/// failure marker check applies whenever no other parser was supplied.
/// Failures are returned as values and never reach the delivering thread.
pub fn decode<P: FeedbackParser>(message: &RobotMessage, parser: &P) -> Result<P::Output> {
    let decoded = parser.parse(message);
    if let Err(e) = &decoded {
        debug!("Feedback {} for '{}' decoded to an error: {}", message.feedback_id, message.instruction, e);
    }
    decoded
}

/// Numeric value at `index`, or a parse error when the reply is too short
pub fn float_at(message: &RobotMessage, index: usize) -> Result<f64> {
    message.float_values.get(index).copied().ok_or_else(|| {
        LinkError::Parse(format!(
            "Feedback for '{}' has {} float values, expected index {}",
            message.instruction,
            message.float_values.len(),
            index
        ))
    })
}

/// Whether a controller float stands for "no value"
pub fn is_rapid_none(value: f64) -> bool {
    value as i64 == RAPID_NONE
}
