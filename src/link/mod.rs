//! Motor Link: line-oriented exchanges with the mount controller.
//!
//! This layer is transport only. It sends one command line and waits a
//! bounded time for at most one reply line. A missing reply is not an error;
//! the typed wrapper in [`mount`] decides what a silent device means for each
//! command.

pub mod command;
#[cfg(test)]
pub mod fake;
pub mod mount;
pub mod serial;

pub use command::{Axis, Command, Position, Reply};
pub use mount::Mount;
pub use serial::SerialLink;

use thiserror::Error;

/// Faults that end a session with the controller.
#[derive(Error, Debug)]
pub enum LinkError {
    #[error("serial I/O failed: {0}")]
    Io(#[from] std::io::Error),

    #[error("could not open serial port {port}: {source}")]
    Open {
        port: String,
        #[source]
        source: serialport::Error,
    },

    #[error("controller on {0} did not report READY")]
    NotReady(String),

    #[error("controller link closed")]
    Disconnected,
}

pub type LinkResult<T> = std::result::Result<T, LinkError>;

/// Blocking request/reply transport to the controller.
pub trait MotorLink {
    /// Write `command` and wait for a single reply line.
    ///
    /// Returns `Ok(None)` when nothing arrives within the exchange timeout.
    fn exchange(&mut self, command: &Command) -> LinkResult<Option<String>>;

    /// Collect further reply lines that are already on their way, such as the
    /// tail of a multi-line status dump.
    fn drain(&mut self) -> LinkResult<Vec<String>>;
}

impl<L: MotorLink + ?Sized> MotorLink for Box<L> {
    fn exchange(&mut self, command: &Command) -> LinkResult<Option<String>> {
        (**self).exchange(command)
    }

    fn drain(&mut self) -> LinkResult<Vec<String>> {
        (**self).drain()
    }
}
