//! Per-axis calibration read from the controller's `CAL:SHOW` dump.

use log::{info, warn};
use regex::Regex;

use crate::Result;
use crate::link::{Axis, Mount, MotorLink};

pub const DEFAULT_ALT_STEPS_PER_ARCSEC: f64 = 89.5;
pub const DEFAULT_AZ_STEPS_PER_ARCSEC: f64 = 25.0;

/// Conversion factors for one run. Built once, never mutated afterwards.
#[derive(Debug, Clone, PartialEq)]
pub struct Calibration {
    pub alt_steps_per_arcsec: f64,
    pub az_steps_per_arcsec: f64,
    /// Recorded for reporting; corrections do not compensate backlash.
    pub alt_backlash_steps: u32,
    pub az_backlash_steps: u32,
    pub is_calibrated: bool,
}

impl Default for Calibration {
    fn default() -> Self {
        Self {
            alt_steps_per_arcsec: DEFAULT_ALT_STEPS_PER_ARCSEC,
            az_steps_per_arcsec: DEFAULT_AZ_STEPS_PER_ARCSEC,
            alt_backlash_steps: 0,
            az_backlash_steps: 0,
            is_calibrated: false,
        }
    }
}

impl Calibration {
    pub fn steps_per_arcsec(&self, axis: Axis) -> f64 {
        match axis {
            Axis::Alt => self.alt_steps_per_arcsec,
            Axis::Az => self.az_steps_per_arcsec,
        }
    }

    /// Query the controller and fall back to defaults for anything the dump
    /// does not contain.
    pub fn load<L: MotorLink>(mount: &mut Mount<L>) -> Result<Self> {
        info!("Loading calibration from controller...");
        let lines = mount.calibration_dump()?;
        let cal = Self::from_dump(&lines)?;

        if cal.is_calibrated {
            info!(
                "Calibration loaded: ALT {:.2} steps/arcsec, AZ {:.2} steps/arcsec, backlash ALT {} / AZ {} steps",
                cal.alt_steps_per_arcsec,
                cal.az_steps_per_arcsec,
                cal.alt_backlash_steps,
                cal.az_backlash_steps
            );
        } else {
            warn!(
                "Controller reported no calibration; using defaults ALT {DEFAULT_ALT_STEPS_PER_ARCSEC} / AZ {DEFAULT_AZ_STEPS_PER_ARCSEC} steps/arcsec"
            );
            warn!("Run a calibration for accurate corrections");
        }
        Ok(cal)
    }

    /// Parse `CAL:SHOW` output.
    ///
    /// Factor lines look like `ALT: 89.50 steps/arcsec`; backlash lines like
    /// `ALT backlash: 12` or `ALTBL: 12`. Non-positive factors are ignored.
    pub fn from_dump<S: AsRef<str>>(lines: &[S]) -> Result<Self> {
        let factor_re = Regex::new(r"(?i)\b(ALT|AZ)\s*:\s*([0-9]*\.?[0-9]+)\s+steps/arcsec")?;
        let backlash_re = Regex::new(r"(?i)\b(ALT|AZ)(?:\s*BL|\s+backlash)\s*:\s*(\d+)")?;

        let mut cal = Self::default();
        for line in lines {
            let line = line.as_ref();

            if let Some(caps) = factor_re.captures(line) {
                let Ok(value) = caps[2].parse::<f64>() else {
                    continue;
                };
                if !(value.is_finite() && value > 0.0) {
                    warn!("ignoring non-positive calibration factor in {line:?}");
                    continue;
                }
                match parse_axis(&caps[1]) {
                    Axis::Alt => cal.alt_steps_per_arcsec = value,
                    Axis::Az => cal.az_steps_per_arcsec = value,
                }
                cal.is_calibrated = true;
            } else if let Some(caps) = backlash_re.captures(line) {
                let Ok(steps) = caps[2].parse::<u32>() else {
                    continue;
                };
                match parse_axis(&caps[1]) {
                    Axis::Alt => cal.alt_backlash_steps = steps,
                    Axis::Az => cal.az_backlash_steps = steps,
                }
            }
        }
        Ok(cal)
    }
}

fn parse_axis(name: &str) -> Axis {
    if name.eq_ignore_ascii_case("ALT") {
        Axis::Alt
    } else {
        Axis::Az
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::link::fake::FakeLink;
    use pretty_assertions::assert_eq;

    #[test]
    fn parses_full_dump() {
        let dump = [
            "=== CALIBRATION ===",
            "ALT: 92.25 steps/arcsec",
            "AZ: 24.10 steps/arcsec",
            "ALT backlash: 35 steps",
            "AZBL: 12",
        ];
        assert_eq!(
            Calibration::from_dump(&dump).unwrap(),
            Calibration {
                alt_steps_per_arcsec: 92.25,
                az_steps_per_arcsec: 24.10,
                alt_backlash_steps: 35,
                az_backlash_steps: 12,
                is_calibrated: true,
            }
        );
    }

    #[test]
    fn empty_dump_falls_back_to_defaults() {
        let empty: [&str; 0] = [];
        assert_eq!(Calibration::from_dump(&empty).unwrap(), Calibration::default());
        assert_eq!(
            Calibration::from_dump(&["ERR:UNKNOWN"]).unwrap(),
            Calibration::default()
        );
    }

    #[test]
    fn keeps_default_for_missing_axis() {
        let cal = Calibration::from_dump(&["AZ: 30.5 steps/arcsec"]).unwrap();
        assert!(cal.is_calibrated);
        assert_eq!(cal.alt_steps_per_arcsec, DEFAULT_ALT_STEPS_PER_ARCSEC);
        assert_eq!(cal.az_steps_per_arcsec, 30.5);
    }

    #[test]
    fn rejects_zero_factor() {
        let cal = Calibration::from_dump(&["ALT: 0.0 steps/arcsec"]).unwrap();
        assert!(!cal.is_calibrated);
        assert_eq!(cal.alt_steps_per_arcsec, DEFAULT_ALT_STEPS_PER_ARCSEC);
    }

    #[test]
    fn loads_through_mount() {
        let mut fake = FakeLink::new();
        fake.script("CAL:SHOW", Some("Calibration:"))
            .trailing(&["ALT: 88.0 steps/arcsec", "AZ: 26.0 steps/arcsec"]);
        let mut mount = crate::link::Mount::new(&mut fake);
        let cal = Calibration::load(&mut mount).unwrap();
        assert_eq!(cal.steps_per_arcsec(Axis::Alt), 88.0);
        assert_eq!(cal.steps_per_arcsec(Axis::Az), 26.0);
    }
}
