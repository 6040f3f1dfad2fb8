//! Scripted in-memory controller used by unit tests.

use std::collections::{HashMap, VecDeque};

use super::{Command, LinkError, LinkResult, MotorLink};

/// Answers like the firmware does and records every command it receives.
#[derive(Debug, Default)]
pub struct FakeLink {
    pub sent: Vec<String>,
    /// Replies queued for specific wire commands, consumed in order.
    scripted: HashMap<String, VecDeque<Option<String>>>,
    /// Lines handed out by the next `drain`.
    trailing: Vec<String>,
    /// Fail every exchange after this many commands have been sent.
    fail_after: Option<usize>,
}

impl FakeLink {
    pub fn new() -> Self {
        Self::default()
    }

    /// Queue a reply for the next time `wire` is sent.
    pub fn script(&mut self, wire: &str, reply: Option<&str>) -> &mut Self {
        self.scripted
            .entry(wire.to_string())
            .or_default()
            .push_back(reply.map(str::to_string));
        self
    }

    pub fn trailing(&mut self, lines: &[&str]) -> &mut Self {
        self.trailing = lines.iter().map(|l| l.to_string()).collect();
        self
    }

    pub fn fail_after(&mut self, commands: usize) -> &mut Self {
        self.fail_after = Some(commands);
        self
    }

    fn default_reply(command: &Command) -> Option<String> {
        match command {
            Command::Position => Some("POS:ALT:0:AZ:0".to_string()),
            Command::Status | Command::CalShow => None,
            other => other
                .expected_tag()
                .map(|tag| format!("OK:{tag}"))
                .or_else(|| Some("OK:CAL".to_string())),
        }
    }
}

impl MotorLink for FakeLink {
    fn exchange(&mut self, command: &Command) -> LinkResult<Option<String>> {
        let wire = command.to_string();
        if self.fail_after.is_some_and(|limit| self.sent.len() >= limit) {
            self.sent.push(wire);
            return Err(LinkError::Disconnected);
        }
        self.sent.push(wire.clone());
        let reply = match self.scripted.get_mut(&wire).and_then(VecDeque::pop_front) {
            Some(reply) => reply,
            None => Self::default_reply(command),
        };
        Ok(reply)
    }

    fn drain(&mut self) -> LinkResult<Vec<String>> {
        Ok(std::mem::take(&mut self.trailing))
    }
}

/// Lets a test keep inspecting the fake after handing it to a [`super::Mount`].
impl MotorLink for &mut FakeLink {
    fn exchange(&mut self, command: &Command) -> LinkResult<Option<String>> {
        (**self).exchange(command)
    }

    fn drain(&mut self) -> LinkResult<Vec<String>> {
        (**self).drain()
    }
}
