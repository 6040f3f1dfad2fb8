//! Polling driver: log tailer → line parser → correction loop.

use std::sync::Arc;
use std::sync::atomic::{AtomicBool, Ordering};
use std::thread;
use std::time::{Duration, Instant};

use anyhow::Context;
use log::{debug, info, warn};

use crate::Result;
use crate::correction::{CorrectionLoop, Step};
use crate::link::MotorLink;
use crate::solver_log::{LineParser, LogTailer, TailPoll};

/// Longest uninterrupted sleep while waiting for the next poll.
const CANCEL_CHECK_INTERVAL: Duration = Duration::from_millis(100);

/// How a monitoring run ended. Faults are returned as errors instead.
#[derive(Debug, Clone, PartialEq)]
pub enum Outcome {
    Achieved {
        iterations: u32,
        final_error_arcsec: f64,
    },
    Cancelled {
        iterations: u32,
    },
}

pub struct Monitor<L: MotorLink> {
    tailer: LogTailer,
    parser: LineParser,
    correction: CorrectionLoop<L>,
    poll_interval: Duration,
    cancel: Arc<AtomicBool>,
}

impl<L: MotorLink> Monitor<L> {
    pub fn new(
        tailer: LogTailer,
        parser: LineParser,
        correction: CorrectionLoop<L>,
        poll_interval: Duration,
        cancel: Arc<AtomicBool>,
    ) -> Self {
        Self {
            tailer,
            parser,
            correction,
            poll_interval,
            cancel,
        }
    }

    /// Watch the log until the target is reached, the run is cancelled or
    /// the controller link fails. The motors are disabled on every path.
    pub fn run(mut self) -> Result<Outcome> {
        info!(
            "Monitoring {} ({} format), target {:.1} arcsec",
            self.tailer.path().display(),
            self.parser.format().tool_name(),
            self.correction.settings().target_error_arcsec
        );
        info!(
            "Waiting for {} polar alignment to start...",
            self.parser.format().tool_name()
        );

        let result = self.watch();
        match &result {
            Ok(Outcome::Achieved { .. }) => {}
            Ok(Outcome::Cancelled { .. }) | Err(_) => self.correction.shutdown(),
        }
        result
    }

    fn watch(&mut self) -> Result<Outcome> {
        let mut available = true;
        loop {
            if self.cancelled() {
                return Ok(self.cancelled_outcome());
            }

            match self.tailer.poll() {
                TailPoll::Unavailable => {
                    if available {
                        warn!(
                            "log file {} unavailable, retrying every {:?}",
                            self.tailer.path().display(),
                            self.poll_interval
                        );
                    }
                    available = false;
                }
                TailPoll::Lines(lines) => {
                    if !available {
                        info!("log file {} is back", self.tailer.path().display());
                    }
                    available = true;
                    if let Some(outcome) = self.handle_lines(&lines)? {
                        return Ok(outcome);
                    }
                }
            }

            self.sleep_interval();
        }
    }

    fn handle_lines(&mut self, lines: &[String]) -> Result<Option<Outcome>> {
        for line in lines {
            if self.cancelled() {
                return Ok(Some(self.cancelled_outcome()));
            }
            let Some(reading) = self.parser.parse(line) else {
                continue;
            };
            debug!("reading: {reading:?}");

            let step = self
                .correction
                .process(&reading)
                .context("controller link failed during correction")?;
            match step {
                Step::Achieved {
                    iteration,
                    final_error_arcsec,
                } => {
                    return Ok(Some(Outcome::Achieved {
                        iterations: iteration,
                        final_error_arcsec,
                    }));
                }
                Step::Corrected { .. } => info!(
                    "Waiting for {} to re-solve...",
                    self.parser.format().tool_name()
                ),
                Step::Skipped { .. } => {}
            }
        }
        Ok(None)
    }

    fn cancelled(&self) -> bool {
        self.cancel.load(Ordering::SeqCst)
    }

    fn cancelled_outcome(&self) -> Outcome {
        info!("Monitoring cancelled");
        Outcome::Cancelled {
            iterations: self.correction.iteration(),
        }
    }

    fn sleep_interval(&self) {
        let deadline = Instant::now() + self.poll_interval;
        loop {
            let remaining = deadline.saturating_duration_since(Instant::now());
            if remaining.is_zero() || self.cancelled() {
                return;
            }
            thread::sleep(remaining.min(CANCEL_CHECK_INTERVAL));
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::calibration::Calibration;
    use crate::correction::LoopSettings;
    use crate::link::Mount;
    use crate::link::fake::FakeLink;
    use crate::solver_log::LogFormat;
    use pretty_assertions::assert_eq;
    use std::fs::OpenOptions;
    use std::io::Write;
    use tempfile::NamedTempFile;

    fn monitor<'a>(
        fake: &'a mut FakeLink,
        log: &NamedTempFile,
        cancel: Arc<AtomicBool>,
    ) -> Monitor<&'a mut FakeLink> {
        Monitor::new(
            LogTailer::from_end(log.path()),
            LineParser::new(LogFormat::Nina).unwrap(),
            CorrectionLoop::new(
                Mount::new(fake),
                Calibration::default(),
                LoopSettings::default(),
            ),
            Duration::from_millis(10),
            cancel,
        )
    }

    fn append(log: &NamedTempFile, text: &str) {
        let mut f = OpenOptions::new().append(true).open(log.path()).unwrap();
        f.write_all(text.as_bytes()).unwrap();
    }

    #[test]
    fn runs_until_target_reached() {
        let log = NamedTempFile::new().unwrap();
        append(&log, "21:00:00.000 - {\"Alt\": 1.0, \"Az\": 1.0, \"Total\": 1.4}\n");
        let mut fake = FakeLink::new();
        let m = monitor(&mut fake, &log, Arc::new(AtomicBool::new(false)));

        append(
            &log,
            concat!(
                "21:01:00.000 - starting three point alignment\n",
                "21:01:10.000 - {\"Alt\": 10.0, \"Az\": -40.0}\n",
                "21:01:20.000 - {\"Alt\": 600.0, \"Az\": 0.0}\n",
                "21:01:30.000 - {\"Alt\": \n",
                "21:01:40.000 - {\"Alt\": 2.0, \"Az\": 3.0, \"Total\": 3.6}\n",
            ),
        );

        let outcome = m.run().unwrap();
        assert_eq!(
            outcome,
            Outcome::Achieved {
                iterations: 2,
                final_error_arcsec: 3.6
            }
        );
        assert_eq!(fake.sent, vec!["E", "A895", "Z-1000", "D"]);
    }

    #[test]
    fn cancellation_disables_motors() {
        let log = NamedTempFile::new().unwrap();
        let mut fake = FakeLink::new();
        let cancel = Arc::new(AtomicBool::new(true));
        let outcome = monitor(&mut fake, &log, cancel).run().unwrap();
        assert_eq!(outcome, Outcome::Cancelled { iterations: 0 });
        assert_eq!(fake.sent, vec!["D"]);
    }

    #[test]
    fn cancel_from_another_thread_stops_polling() {
        let log = NamedTempFile::new().unwrap();
        let mut fake = FakeLink::new();
        let cancel = Arc::new(AtomicBool::new(false));
        let flag = Arc::clone(&cancel);
        let canceller = thread::spawn(move || {
            thread::sleep(Duration::from_millis(50));
            flag.store(true, Ordering::SeqCst);
        });
        let outcome = monitor(&mut fake, &log, cancel).run().unwrap();
        canceller.join().unwrap();
        assert_eq!(outcome, Outcome::Cancelled { iterations: 0 });
    }

    #[test]
    fn link_fault_fails_run_and_tries_to_disable() {
        let log = NamedTempFile::new().unwrap();
        let mut fake = FakeLink::new();
        fake.fail_after(1);
        let m = monitor(&mut fake, &log, Arc::new(AtomicBool::new(false)));
        append(&log, "21:01:10.000 - {\"Alt\": 10.0, \"Az\": -40.0}\n");

        assert!(m.run().is_err());
        assert_eq!(fake.sent[..3], ["E", "A895", "D"]);
    }
}
