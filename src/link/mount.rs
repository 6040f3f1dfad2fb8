//! Typed mount driver on top of a [`MotorLink`].
//!
//! Each operation sends one command and checks the reply against the tag the
//! firmware uses for that command. A reply without the expected `OK:` tag is
//! a failed command, reported as `Ok(false)`; only transport faults are
//! errors.
//!
//! The driver tracks whether the motors may be energised and disables them
//! when dropped, so every exit path (including unwinding) leaves the mount
//! de-energised.

use log::{debug, warn};

use super::{Axis, Command, LinkResult, MotorLink, Position, Reply};
use super::command::SPEED_RANGE;

pub struct Mount<L: MotorLink> {
    link: L,
    /// Conservative: true until a disable has been acknowledged.
    energised: bool,
    disable_on_drop: bool,
    position: Option<Position>,
}

impl<L: MotorLink> Mount<L> {
    pub fn new(link: L) -> Self {
        Self {
            link,
            energised: false,
            disable_on_drop: true,
            position: None,
        }
    }

    /// Keep the motors energised when this driver goes away. Only for
    /// explicit manual enables; the alignment run never clears this.
    pub fn set_disable_on_drop(&mut self, disable: bool) {
        self.disable_on_drop = disable;
    }

    /// Send a command and classify its reply.
    pub fn send(&mut self, command: &Command) -> LinkResult<Reply> {
        if command.energises() {
            self.energised = true;
        }
        let line = self.link.exchange(command)?;
        Ok(Reply::parse(line.as_deref()))
    }

    /// Send a command that expects an `OK:` acknowledgement. Returns the
    /// reply only when it confirms the command.
    fn acknowledge(&mut self, command: Command) -> LinkResult<Option<Reply>> {
        let reply = self.send(&command)?;
        if reply.confirms(&command) {
            Ok(Some(reply))
        } else {
            warn!("controller did not confirm {command}: {reply:?}");
            Ok(None)
        }
    }

    fn command(&mut self, command: Command) -> LinkResult<bool> {
        Ok(self.acknowledge(command)?.is_some())
    }

    pub fn enable(&mut self) -> LinkResult<bool> {
        self.command(Command::Enable)
    }

    pub fn disable(&mut self) -> LinkResult<bool> {
        let confirmed = self.command(Command::Disable)?;
        if confirmed {
            self.energised = false;
        }
        Ok(confirmed)
    }

    pub fn move_axis(&mut self, axis: Axis, steps: i64) -> LinkResult<bool> {
        self.command(Command::Move { axis, steps })
    }

    pub fn stop(&mut self) -> LinkResult<bool> {
        self.command(Command::Stop)
    }

    pub fn reset_position(&mut self) -> LinkResult<bool> {
        let confirmed = self.command(Command::ResetPosition)?;
        if confirmed {
            self.position = Some(Position::default());
        }
        Ok(confirmed)
    }

    /// Set motor speed in steps per second; values outside 1..=2000 are
    /// rejected without touching the device. An echoed speed that differs
    /// from the request counts as a failure.
    pub fn set_speed(&mut self, speed: u16) -> LinkResult<bool> {
        if !SPEED_RANGE.contains(&speed) {
            warn!(
                "speed {speed} outside {}..={}",
                SPEED_RANGE.start(),
                SPEED_RANGE.end()
            );
            return Ok(false);
        }
        let Some(reply) = self.acknowledge(Command::SetSpeed(speed))? else {
            return Ok(false);
        };
        match reply.detail() {
            Some(echo) if echo.trim().parse::<u16>().ok() != Some(speed) => {
                warn!("requested speed {speed}, controller reports {echo}");
                Ok(false)
            }
            _ => Ok(true),
        }
    }

    /// Query step counters; `None` when the reply is missing or malformed.
    pub fn position(&mut self) -> LinkResult<Option<Position>> {
        let reply = self.send(&Command::Position)?;
        let position = match reply {
            Reply::Text(line) => Position::parse(&line),
            _ => None,
        };
        if position.is_some() {
            self.position = position;
        }
        Ok(position)
    }

    /// Last position reported by the controller during this session.
    pub fn last_position(&self) -> Option<Position> {
        self.position
    }

    /// Status dump: first reply line plus anything that follows it.
    pub fn status(&mut self) -> LinkResult<Vec<String>> {
        self.dump(Command::Status)
    }

    /// Raw `CAL:SHOW` dump lines.
    pub fn calibration_dump(&mut self) -> LinkResult<Vec<String>> {
        self.dump(Command::CalShow)
    }

    pub fn write_calibration_sample(
        &mut self,
        axis: Axis,
        arcsec: f64,
        steps: i64,
    ) -> LinkResult<bool> {
        self.command(Command::CalSample {
            axis,
            arcsec,
            steps,
        })
    }

    pub fn write_backlash(&mut self, axis: Axis, steps: u32) -> LinkResult<bool> {
        self.command(Command::CalBacklash { axis, steps })
    }

    pub fn save_calibration(&mut self) -> LinkResult<bool> {
        self.command(Command::CalSave)
    }

    fn dump(&mut self, command: Command) -> LinkResult<Vec<String>> {
        let mut lines: Vec<String> = self.link.exchange(&command)?.into_iter().collect();
        lines.extend(self.link.drain()?);
        Ok(lines)
    }

    pub fn is_energised(&self) -> bool {
        self.energised
    }

    /// Disable the motors, logging instead of failing.
    pub fn disable_best_effort(&mut self) {
        match self.disable() {
            Ok(true) => debug!("motors disabled"),
            Ok(false) => warn!("disable command was not acknowledged"),
            Err(e) => warn!("could not disable motors: {e}"),
        }
    }
}

impl<L: MotorLink> Drop for Mount<L> {
    fn drop(&mut self) {
        if self.energised && self.disable_on_drop {
            self.disable_best_effort();
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::link::fake::FakeLink;
    use pretty_assertions::assert_eq;

    #[test]
    fn drop_disables_energised_motors() {
        let mut fake = FakeLink::new();
        {
            let mut mount = Mount::new(&mut fake);
            assert!(mount.enable().unwrap());
            assert!(mount.move_axis(Axis::Alt, 40).unwrap());
        }
        assert_eq!(fake.sent, vec!["E", "A40", "D"]);
    }

    #[test]
    fn acknowledged_disable_is_not_repeated_on_drop() {
        let mut fake = FakeLink::new();
        {
            let mut mount = Mount::new(&mut fake);
            mount.enable().unwrap();
            assert!(mount.disable().unwrap());
        }
        assert_eq!(fake.sent, vec!["E", "D"]);
    }

    #[test]
    fn unacknowledged_disable_is_retried_on_drop() {
        let mut fake = FakeLink::new();
        fake.script("D", None);
        {
            let mut mount = Mount::new(&mut fake);
            mount.enable().unwrap();
            assert!(!mount.disable().unwrap());
            assert!(mount.is_energised());
        }
        assert_eq!(fake.sent, vec!["E", "D", "D"]);
    }

    #[test]
    fn manual_enable_can_outlive_driver() {
        let mut fake = FakeLink::new();
        {
            let mut mount = Mount::new(&mut fake);
            mount.set_disable_on_drop(false);
            mount.enable().unwrap();
        }
        assert_eq!(fake.sent, vec!["E"]);
    }

    #[test]
    fn wrong_tag_is_a_failed_command() {
        let mut fake = FakeLink::new();
        fake.script("S", Some("ERR:BUSY"));
        let mut mount = Mount::new(&mut fake);
        assert!(!mount.stop().unwrap());
    }

    #[test]
    fn speed_out_of_range_is_not_sent() {
        let mut fake = FakeLink::new();
        {
            let mut mount = Mount::new(&mut fake);
            assert!(!mount.set_speed(0).unwrap());
            assert!(!mount.set_speed(2001).unwrap());
            assert!(mount.set_speed(800).unwrap());
        }
        assert_eq!(fake.sent, vec!["V800"]);
    }

    #[test]
    fn speed_echo_must_match_request() {
        let mut fake = FakeLink::new();
        fake.script("V500", Some("OK:SPEED:500"))
            .script("V600", Some("OK:SPEED:450"));
        let mut mount = Mount::new(&mut fake);
        assert!(mount.set_speed(500).unwrap());
        assert!(!mount.set_speed(600).unwrap());
        // Firmware that does not echo the value is taken at its word.
        assert!(mount.set_speed(700).unwrap());
    }

    #[test]
    fn position_is_remembered() {
        let mut fake = FakeLink::new();
        fake.script("P", Some("POS:ALT:120:AZ:-7"));
        let mut mount = Mount::new(&mut fake);
        let expected = Position { alt: 120, az: -7 };
        assert_eq!(mount.position().unwrap(), Some(expected));
        assert_eq!(mount.last_position(), Some(expected));
        assert!(mount.reset_position().unwrap());
        assert_eq!(mount.last_position(), Some(Position::default()));
    }

    #[test]
    fn status_collects_trailing_lines() {
        let mut fake = FakeLink::new();
        fake.script("?", Some("STATUS"))
            .trailing(&["ALT:0", "AZ:0", "SPEED:800"]);
        let mut mount = Mount::new(&mut fake);
        assert_eq!(
            mount.status().unwrap(),
            vec!["STATUS", "ALT:0", "AZ:0", "SPEED:800"]
        );
    }
}
