//! Serial transport to the mount controller.

use std::io::{ErrorKind, Read, Write};
use std::thread;
use std::time::{Duration, Instant};

use log::{debug, info};
use serialport::SerialPort;

use super::{Command, LinkError, LinkResult, MotorLink};

/// Granularity of a single blocking read on the port.
const READ_SLICE: Duration = Duration::from_millis(50);

/// The controller resets when the port opens; give it time to boot.
const RESET_DELAY: Duration = Duration::from_secs(2);

/// How long to wait for the `READY` banner after the reset delay.
const READY_WINDOW: Duration = Duration::from_secs(3);

/// Quiet period that ends a drain of trailing reply lines.
const DRAIN_QUIET: Duration = Duration::from_millis(200);

/// Splits an incoming byte stream into trimmed text lines.
///
/// Bytes after the last `\n` stay buffered for the next call.
#[derive(Debug, Default)]
pub(crate) struct LineReader {
    pending: Vec<u8>,
}

impl LineReader {
    fn take_line(&mut self) -> Option<String> {
        loop {
            let end = self.pending.iter().position(|&b| b == b'\n')?;
            let raw: Vec<u8> = self.pending.drain(..=end).collect();
            let line = String::from_utf8_lossy(&raw).trim().to_string();
            if !line.is_empty() {
                return Some(line);
            }
        }
    }

    /// Discard everything buffered so far, returning complete lines that were
    /// never consumed.
    pub(crate) fn discard(&mut self) -> Vec<String> {
        let mut stale = Vec::new();
        while let Some(line) = self.take_line() {
            stale.push(line);
        }
        self.pending.clear();
        stale
    }

    /// Read until a complete non-empty line is available or `timeout` passes.
    pub(crate) fn read_line<R: Read + ?Sized>(
        &mut self,
        inp: &mut R,
        timeout: Duration,
    ) -> LinkResult<Option<String>> {
        let deadline = Instant::now() + timeout;
        let mut buf = [0u8; 64];
        loop {
            if let Some(line) = self.take_line() {
                return Ok(Some(line));
            }
            if Instant::now() >= deadline {
                if !self.pending.is_empty() {
                    debug!(
                        "dropping {} bytes of unterminated reply",
                        self.pending.len()
                    );
                    self.pending.clear();
                }
                return Ok(None);
            }
            match inp.read(&mut buf) {
                Ok(0) => return Err(LinkError::Disconnected),
                Ok(n) => self.pending.extend_from_slice(&buf[..n]),
                Err(e) if e.kind() == ErrorKind::TimedOut => {}
                Err(e) if e.kind() == ErrorKind::Interrupted => {}
                Err(e) => return Err(e.into()),
            }
        }
    }
}

/// [`MotorLink`] over a USB serial port.
pub struct SerialLink {
    port: Box<dyn SerialPort>,
    name: String,
    reply_timeout: Duration,
    lines: LineReader,
}

impl SerialLink {
    /// Open `port`, wait for the controller reset and its `READY` banner.
    pub fn open(port: &str, baud_rate: u32, reply_timeout: Duration) -> LinkResult<Self> {
        info!("Opening serial port {port} at {baud_rate} bps");
        let serial = serialport::new(port, baud_rate)
            .timeout(READ_SLICE)
            .open()
            .map_err(|source| LinkError::Open {
                port: port.to_string(),
                source,
            })?;

        let mut link = Self {
            port: serial,
            name: port.to_string(),
            reply_timeout,
            lines: LineReader::default(),
        };

        thread::sleep(RESET_DELAY);
        await_ready(&mut link.lines, &mut *link.port, READY_WINDOW, &link.name)?;
        info!("Connected to controller on {port}");
        Ok(link)
    }
}

/// Wait up to `window` for a line containing `READY`, then collect whatever
/// else the controller prints at startup.
pub(crate) fn await_ready<R: Read + ?Sized>(
    lines: &mut LineReader,
    inp: &mut R,
    window: Duration,
    port: &str,
) -> LinkResult<()> {
    let deadline = Instant::now() + window;
    loop {
        let remaining = deadline.saturating_duration_since(Instant::now());
        if remaining.is_zero() {
            return Err(LinkError::NotReady(port.to_string()));
        }
        match lines.read_line(inp, remaining)? {
            Some(line) if line.contains("READY") => break,
            Some(line) => debug!("startup: {line}"),
            None => return Err(LinkError::NotReady(port.to_string())),
        }
    }
    for line in drain_lines(lines, inp)? {
        debug!("startup: {line}");
    }
    Ok(())
}

/// Read lines until the port stays quiet for [`DRAIN_QUIET`].
fn drain_lines<R: Read + ?Sized>(lines: &mut LineReader, inp: &mut R) -> LinkResult<Vec<String>> {
    let mut drained = Vec::new();
    while let Some(line) = lines.read_line(inp, DRAIN_QUIET)? {
        drained.push(line);
    }
    Ok(drained)
}

impl MotorLink for SerialLink {
    fn exchange(&mut self, command: &Command) -> LinkResult<Option<String>> {
        for stale in self.lines.discard() {
            debug!("unsolicited: {stale}");
        }
        debug!("-> {command}");
        self.port.write_all(format!("{command}\n").as_bytes())?;
        self.port.flush()?;

        let reply = self.lines.read_line(&mut *self.port, self.reply_timeout)?;
        match &reply {
            Some(line) => debug!("<- {line}"),
            None => debug!("<- (no reply to {command})"),
        }
        Ok(reply)
    }

    fn drain(&mut self) -> LinkResult<Vec<String>> {
        drain_lines(&mut self.lines, &mut *self.port)
    }
}
