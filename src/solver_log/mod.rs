//! Plate-solver log handling: locating, tailing and parsing log lines.

pub mod locate;
pub mod parse;
pub mod reading;
pub mod tail;

pub use parse::{LineParser, LogFormat};
pub use reading::AlignmentError;
pub use tail::{LogTailer, TailCursor, TailPoll};
