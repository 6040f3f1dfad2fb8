//! Correction loop: turns alignment readings into mount movements.
//!
//! For every accepted reading the loop either finishes (error below target,
//! motors disabled) or converts the per-axis error to motor steps and, when
//! the result is within the safety bound, enables the motors and moves ALT
//! then AZ. Readings implying an implausibly large move are discarded whole;
//! correcting only one axis could leave the mount further out.

pub mod monitor;

pub use monitor::{Monitor, Outcome};

use log::{info, warn};

use crate::calibration::Calibration;
use crate::link::{Axis, LinkResult, Mount, MotorLink};
use crate::solver_log::AlignmentError;

pub const DEFAULT_TARGET_ERROR_ARCSEC: f64 = 30.0;
pub const DEFAULT_MAX_SAFETY_STEPS: i64 = 50_000;

#[derive(Debug, Clone, Copy, PartialEq)]
pub struct LoopSettings {
    /// Alignment is done once the total error drops below this.
    pub target_error_arcsec: f64,
    /// Largest step count a single correction may command on one axis.
    pub max_safety_steps: i64,
}

impl Default for LoopSettings {
    fn default() -> Self {
        Self {
            target_error_arcsec: DEFAULT_TARGET_ERROR_ARCSEC,
            max_safety_steps: DEFAULT_MAX_SAFETY_STEPS,
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum LoopState {
    AwaitingReading,
    Evaluating,
    Correcting,
    /// Terminal.
    Achieved,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct CorrectionCommand {
    pub axis: Axis,
    pub delta_steps: i64,
}

/// Step deltas for both axes derived from one reading.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct CorrectionPlan {
    pub alt: CorrectionCommand,
    pub az: CorrectionCommand,
}

impl CorrectionPlan {
    /// `round(error * steps_per_arcsec)` per axis; the sign is the direction.
    pub fn from_reading(reading: &AlignmentError, calibration: &Calibration) -> Self {
        let steps = |error: f64, axis: Axis| CorrectionCommand {
            axis,
            delta_steps: (error * calibration.steps_per_arcsec(axis)).round() as i64,
        };
        Self {
            alt: steps(reading.alt_error_arcsec, Axis::Alt),
            az: steps(reading.az_error_arcsec, Axis::Az),
        }
    }

    pub fn exceeds(&self, max_safety_steps: i64) -> bool {
        self.alt.delta_steps.unsigned_abs() > max_safety_steps.unsigned_abs()
            || self.az.delta_steps.unsigned_abs() > max_safety_steps.unsigned_abs()
    }

    /// Commands worth sending, ALT first. Zero deltas are dropped.
    pub fn commands(&self) -> impl Iterator<Item = CorrectionCommand> {
        [self.alt, self.az]
            .into_iter()
            .filter(|c| c.delta_steps != 0)
    }
}

/// What the loop did with one reading.
#[derive(Debug, Clone, PartialEq)]
pub enum Step {
    /// Movement was issued; keep watching the log.
    Corrected { iteration: u32, plan: CorrectionPlan },
    /// The plan exceeded the safety bound and nothing was sent.
    Skipped { plan: CorrectionPlan },
    /// Total error is below target; the motors were told to disable.
    Achieved { iteration: u32, final_error_arcsec: f64 },
}

pub struct CorrectionLoop<L: MotorLink> {
    mount: Mount<L>,
    calibration: Calibration,
    settings: LoopSettings,
    state: LoopState,
    iteration: u32,
}

impl<L: MotorLink> CorrectionLoop<L> {
    pub fn new(mount: Mount<L>, calibration: Calibration, settings: LoopSettings) -> Self {
        Self {
            mount,
            calibration,
            settings,
            state: LoopState::AwaitingReading,
            iteration: 0,
        }
    }

    pub fn state(&self) -> LoopState {
        self.state
    }

    /// Accepted readings so far. Readings skipped by the safety bound do not
    /// count.
    pub fn iteration(&self) -> u32 {
        self.iteration
    }

    pub fn calibration(&self) -> &Calibration {
        &self.calibration
    }

    pub fn settings(&self) -> &LoopSettings {
        &self.settings
    }

    /// Evaluate one reading and act on it.
    ///
    /// A link fault is returned as-is; the caller is expected to end the run
    /// and call [`shutdown`](Self::shutdown).
    pub fn process(&mut self, reading: &AlignmentError) -> LinkResult<Step> {
        if self.state == LoopState::Achieved {
            return Ok(Step::Achieved {
                iteration: self.iteration,
                final_error_arcsec: reading.total_error_arcsec,
            });
        }
        self.state = LoopState::Evaluating;

        let iteration = self.iteration + 1;
        if reading.total_error_arcsec < self.settings.target_error_arcsec {
            info!(
                "Iteration #{iteration} [{}]: total error {:.2}\" below target {:.2}\"",
                reading.timestamp,
                reading.total_error_arcsec,
                self.settings.target_error_arcsec
            );
            if let Err(e) = self.mount.disable() {
                self.state = LoopState::AwaitingReading;
                return Err(e);
            }
            self.iteration = iteration;
            self.state = LoopState::Achieved;
            return Ok(Step::Achieved {
                iteration,
                final_error_arcsec: reading.total_error_arcsec,
            });
        }

        let plan = CorrectionPlan::from_reading(reading, &self.calibration);
        if plan.exceeds(self.settings.max_safety_steps) {
            warn!(
                "[{}] correction ALT {:+} / AZ {:+} steps exceeds safety limit of {} steps; skipping reading",
                reading.timestamp,
                plan.alt.delta_steps,
                plan.az.delta_steps,
                self.settings.max_safety_steps
            );
            warn!("check calibration, coarse alignment and plate-solve quality");
            self.state = LoopState::AwaitingReading;
            return Ok(Step::Skipped { plan });
        }

        info!(
            "Iteration #{iteration} [{}]: ALT {:+.2}\" AZ {:+.2}\" total {:.2}\"",
            reading.timestamp,
            reading.alt_error_arcsec,
            reading.az_error_arcsec,
            reading.total_error_arcsec
        );

        // A correction that faulted part way does not count as an iteration.
        self.state = LoopState::Correcting;
        let applied = self.apply(&plan);
        self.state = LoopState::AwaitingReading;
        applied?;
        self.iteration = iteration;

        Ok(Step::Corrected { iteration, plan })
    }

    fn apply(&mut self, plan: &CorrectionPlan) -> LinkResult<()> {
        self.mount.enable()?;
        for command in plan.commands() {
            info!(
                "  moving {} {:+} steps ({:.1} steps/arcsec)",
                command.axis,
                command.delta_steps,
                self.calibration.steps_per_arcsec(command.axis)
            );
            self.mount.move_axis(command.axis, command.delta_steps)?;
        }
        Ok(())
    }

    /// Disable the motors, best-effort. Used on every exit path.
    pub fn shutdown(&mut self) {
        self.mount.disable_best_effort();
    }
}
