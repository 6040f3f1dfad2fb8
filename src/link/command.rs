//! Wire-level command set of the mount controller.
//!
//! Every request is one ASCII line terminated by `\n`. Success replies are
//! prefixed `OK:<TAG>`.

use std::fmt;

/// Mechanical axis of the mount adjuster.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, clap::ValueEnum)]
pub enum Axis {
    Alt,
    Az,
}

impl Axis {
    /// Name used by the `CAL:` command family.
    pub fn cal_name(self) -> &'static str {
        match self {
            Axis::Alt => "ALT",
            Axis::Az => "AZ",
        }
    }
}

impl fmt::Display for Axis {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.cal_name())
    }
}

/// Lowest and highest speed accepted by `V<int>`, in steps per second.
pub const SPEED_RANGE: std::ops::RangeInclusive<u16> = 1..=2000;

#[derive(Debug, Clone, PartialEq)]
pub enum Command {
    /// `A<±int>` / `Z<±int>`
    Move { axis: Axis, steps: i64 },
    Enable,
    Disable,
    Stop,
    SetSpeed(u16),
    Position,
    ResetPosition,
    Status,
    CalShow,
    CalSample { axis: Axis, arcsec: f64, steps: i64 },
    CalBacklash { axis: Axis, steps: u32 },
    CalSave,
}

impl Command {
    /// Tag expected after `OK:` when the controller accepts the command.
    ///
    /// `None` means the reply has no fixed tag: any `OK:` is accepted for the
    /// calibration writes, and queries are judged by their payload.
    pub fn expected_tag(&self) -> Option<&'static str> {
        match self {
            Command::Move { axis: Axis::Alt, .. } => Some("ALT_MOVE"),
            Command::Move { axis: Axis::Az, .. } => Some("AZ_MOVE"),
            Command::Enable => Some("ENABLED"),
            Command::Disable => Some("DISABLED"),
            Command::Stop => Some("STOPPED"),
            Command::SetSpeed(_) => Some("SPEED"),
            Command::ResetPosition => Some("RESET"),
            Command::Position
            | Command::Status
            | Command::CalShow
            | Command::CalSample { .. }
            | Command::CalBacklash { .. }
            | Command::CalSave => None,
        }
    }

    /// Whether this command can leave the motors energised.
    pub fn energises(&self) -> bool {
        matches!(self, Command::Enable | Command::Move { .. })
    }
}

impl fmt::Display for Command {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Command::Move { axis: Axis::Alt, steps } => write!(f, "A{steps}"),
            Command::Move { axis: Axis::Az, steps } => write!(f, "Z{steps}"),
            Command::Enable => f.write_str("E"),
            Command::Disable => f.write_str("D"),
            Command::Stop => f.write_str("S"),
            Command::SetSpeed(speed) => write!(f, "V{speed}"),
            Command::Position => f.write_str("P"),
            Command::ResetPosition => f.write_str("R"),
            Command::Status => f.write_str("?"),
            Command::CalShow => f.write_str("CAL:SHOW"),
            Command::CalSample {
                axis,
                arcsec,
                steps,
            } => write!(f, "CAL:{axis}:{arcsec}:{steps}"),
            Command::CalBacklash { axis, steps } => write!(f, "CAL:{axis}BL:{steps}"),
            Command::CalSave => f.write_str("CAL:SAVE"),
        }
    }
}

/// One reply line, classified.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Reply {
    /// `OK:<TAG>` with an optional `:<detail>` suffix.
    Ack { tag: String, detail: Option<String> },
    /// Any other text, e.g. a position report or an error message.
    Text(String),
    /// Nothing arrived within the exchange timeout.
    Silent,
}

impl Reply {
    pub fn parse(line: Option<&str>) -> Self {
        let Some(line) = line.map(str::trim) else {
            return Reply::Silent;
        };
        if line.is_empty() {
            return Reply::Silent;
        }
        match line.strip_prefix("OK:") {
            Some(rest) => {
                let (tag, detail) = match rest.split_once(':') {
                    Some((tag, detail)) => (tag, Some(detail.to_string())),
                    None => (rest, None),
                };
                Reply::Ack {
                    tag: tag.to_string(),
                    detail,
                }
            }
            None => Reply::Text(line.to_string()),
        }
    }

    /// Text after the tag of an `OK:` reply, e.g. the speed echoed by `V`.
    pub fn detail(&self) -> Option<&str> {
        match self {
            Reply::Ack { detail, .. } => detail.as_deref(),
            _ => None,
        }
    }

    /// True when this reply confirms `command`.
    pub fn confirms(&self, command: &Command) -> bool {
        match (self, command.expected_tag()) {
            (Reply::Ack { tag, .. }, Some(expected)) => tag == expected,
            (Reply::Ack { .. }, None) => true,
            _ => false,
        }
    }
}

/// Step counters reported by `P`.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub struct Position {
    pub alt: i64,
    pub az: i64,
}

impl Position {
    /// Parse `POS:ALT:<int>:AZ:<int>`.
    pub fn parse(line: &str) -> Option<Self> {
        let mut parts = line.trim().split(':');
        if parts.next()? != "POS" || parts.next()? != "ALT" {
            return None;
        }
        let alt = parts.next()?.trim().parse().ok()?;
        if parts.next()? != "AZ" {
            return None;
        }
        let az = parts.next()?.trim().parse().ok()?;
        Some(Position { alt, az })
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use pretty_assertions::assert_eq;

    #[test]
    fn formats_wire_commands() {
        let cases = [
            (Command::Move { axis: Axis::Alt, steps: 895 }, "A895"),
            (Command::Move { axis: Axis::Az, steps: -125 }, "Z-125"),
            (Command::Enable, "E"),
            (Command::Disable, "D"),
            (Command::SetSpeed(800), "V800"),
            (Command::Status, "?"),
            (
                Command::CalSample {
                    axis: Axis::Alt,
                    arcsec: 66.5,
                    steps: 1000,
                },
                "CAL:ALT:66.5:1000",
            ),
            (
                Command::CalBacklash {
                    axis: Axis::Az,
                    steps: 12,
                },
                "CAL:AZBL:12",
            ),
            (Command::CalSave, "CAL:SAVE"),
        ];
        for (command, wire) in cases {
            assert_eq!(command.to_string(), wire);
        }
    }

    #[test]
    fn classifies_replies() {
        assert_eq!(
            Reply::parse(Some("OK:ALT_MOVE:895\r")),
            Reply::Ack {
                tag: "ALT_MOVE".into(),
                detail: Some("895".into())
            }
        );
        assert_eq!(Reply::parse(Some("OK:SPEED:500")).detail(), Some("500"));
        assert_eq!(Reply::parse(Some("OK:STOPPED")).detail(), None);
        assert_eq!(Reply::parse(Some("  ")), Reply::Silent);
        assert_eq!(Reply::parse(None), Reply::Silent);
        assert_eq!(
            Reply::parse(Some("ERR:LIMIT")),
            Reply::Text("ERR:LIMIT".into())
        );
    }

    #[test]
    fn confirmation_requires_matching_tag() {
        let enable = Reply::parse(Some("OK:ENABLED"));
        assert!(enable.confirms(&Command::Enable));
        assert!(!enable.confirms(&Command::Disable));
        assert!(Reply::parse(Some("OK:CAL_SAVED")).confirms(&Command::CalSave));
        assert!(!Reply::Silent.confirms(&Command::Stop));
    }

    #[test]
    fn parses_position_report() {
        assert_eq!(
            Position::parse("POS:ALT:1234:AZ:-56"),
            Some(Position { alt: 1234, az: -56 })
        );
        assert_eq!(Position::parse("POS:ALT:x:AZ:1"), None);
        assert_eq!(Position::parse("OK:ENABLED"), None);
    }
}
