//! Echo responder
//!
//! Simulates the remote controller for tests and local runs: every command
//! that asks for feedback is answered with `"Done"` and its own values.

use std::collections::HashMap;

use tracing::{debug, warn};

use crate::envelope::RobotMessage;
use crate::sequence::ROLLOVER_THRESHOLD;

/// Feedback text sent for every echoed command
pub const ECHO_FEEDBACK: &str = "Done";

#[derive(Debug, Default)]
pub struct EchoResponder {
    last_sequence: HashMap<String, u32>,
    mismatches: u64,
    echoed: u64,
}

impl EchoResponder {
    pub fn new() -> Self {
        Self::default()
    }

    /// Handle a command received on `topic`, returning the reply to publish
    pub fn respond(&mut self, topic: &str, command: &RobotMessage) -> Option<RobotMessage> {
        let last = self.last_sequence.entry(topic.to_string()).or_insert(0);
        let expected = if *last >= ROLLOVER_THRESHOLD { 1 } else { *last + 1 };
        if command.sequence_id != expected {
            warn!(
                "Sequence mismatch: current={}, expected={}",
                command.sequence_id, expected
            );
            self.mismatches += 1;
        }
        *last = command.sequence_id;

        debug!(
            "Received {} on {}, sequence_id={}",
            command.instruction, topic, command.sequence_id
        );

        if command.feedback_level == 0 {
            return None;
        }

        self.echoed += 1;
        Some(RobotMessage::reply_to(command, ECHO_FEEDBACK))
    }

    /// Number of commands that arrived out of sequence
    pub fn mismatches(&self) -> u64 {
        self.mismatches
    }

    /// Number of replies produced
    pub fn echoed(&self) -> u64 {
        self.echoed
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn command(sequence_id: u32, feedback_level: i32) -> RobotMessage {
        RobotMessage {
            instruction: "r_RRC_Noop".to_string(),
            sequence_id,
            feedback_level,
            exec_level: 0,
            feedback: String::new(),
            feedback_id: 0,
            string_values: vec!["a".to_string()],
            float_values: vec![1.0, 2.0],
        }
    }

    #[test]
    fn test_echo_replies_only_when_feedback_requested() {
        let mut echo = EchoResponder::new();
        assert!(echo.respond("/rob1/robot_command", &command(1, 0)).is_none());

        let reply = echo.respond("/rob1/robot_command", &command(2, 1)).unwrap();
        assert_eq!(reply.feedback_id, 2);
        assert_eq!(reply.feedback, ECHO_FEEDBACK);
        assert_eq!(reply.string_values, vec!["a".to_string()]);
        assert_eq!(reply.float_values, vec![1.0, 2.0]);

        assert!(echo.respond("/rob1/robot_command", &command(3, -1)).is_some());
        assert_eq!(echo.echoed(), 2);
        assert_eq!(echo.mismatches(), 0);
    }

    #[test]
    fn test_sequence_gap_is_counted_per_topic() {
        let mut echo = EchoResponder::new();
        echo.respond("/rob1/robot_command", &command(1, 0));
        echo.respond("/rob1/robot_command_system", &command(1, 0));
        assert_eq!(echo.mismatches(), 0);

        echo.respond("/rob1/robot_command", &command(5, 0));
        assert_eq!(echo.mismatches(), 1);
    }

    #[test]
    fn test_rollover_is_not_a_gap() {
        let mut echo = EchoResponder::new();
        echo.respond("t", &command(1, 0));
        for id in [ROLLOVER_THRESHOLD, 1] {
            echo.respond("t", &command(id, 0));
        }
        // Only the jump to the threshold itself is out of sequence
        assert_eq!(echo.mismatches(), 1);
    }
}
