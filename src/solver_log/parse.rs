use crate::Result;
use crate::solver_log::reading::AlignmentError;

use regex::Regex;
use serde::Deserialize;

/// Which plate-solving tool wrote the log.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Deserialize, clap::ValueEnum)]
#[serde(rename_all = "lowercase")]
pub enum LogFormat {
    /// SharpCap polar-align log: `AltAzCor=Alt=<arcmin>,Az=<arcmin>`.
    #[default]
    Sharpcap,
    /// NINA three-point polar alignment log: `<time> - {json}` in arcseconds.
    Nina,
}

impl LogFormat {
    pub fn tool_name(self) -> &'static str {
        match self {
            LogFormat::Sharpcap => "SharpCap",
            LogFormat::Nina => "NINA",
        }
    }
}

/// Extracts [`AlignmentError`] readings from log lines of one format.
///
/// Most lines in these logs are unrelated noise, so a line that does not
/// match (or whose numbers or payload do not parse) yields `None`.
#[derive(Debug, Clone)]
pub struct LineParser {
    format: LogFormat,
    re: Regex,
}

impl LineParser {
    pub fn new(format: LogFormat) -> Result<Self> {
        // Capture:
        // SharpCap: 1) time HH:MM:SS.ffffff  2) Alt arcmin  3) Az arcmin
        // NINA:     1) time HH:MM:SS.fff     2) JSON object
        const SHARPCAP_RE: &str = r"Info\W*(\d{2}:\d{2}:\d{2}\.\d{6}).*AltAzCor=Alt=([-\d.]+),Az=([-\d.]+)";
        const NINA_RE: &str = r"(\d{2}:\d{2}:\d{2}\.\d{3})\s-\s(\{.*\})";

        let re = match format {
            LogFormat::Sharpcap => Regex::new(SHARPCAP_RE)?,
            LogFormat::Nina => Regex::new(NINA_RE)?,
        };
        Ok(Self { format, re })
    }

    pub fn format(&self) -> LogFormat {
        self.format
    }

    pub fn parse(&self, line: &str) -> Option<AlignmentError> {
        let reading = match self.format {
            LogFormat::Sharpcap => self.parse_sharpcap(line)?,
            LogFormat::Nina => self.parse_nina(line)?,
        };
        let sane = reading.alt_error_arcsec.is_finite()
            && reading.az_error_arcsec.is_finite()
            && reading.total_error_arcsec.is_finite()
            && reading.total_error_arcsec >= 0.0;
        sane.then_some(reading)
    }

    fn parse_sharpcap(&self, line: &str) -> Option<AlignmentError> {
        let caps = self.re.captures(line)?;
        let alt_arcmin: f64 = caps.get(2)?.as_str().parse().ok()?;
        let az_arcmin: f64 = caps.get(3)?.as_str().parse().ok()?;

        Some(AlignmentError::from_components(
            caps.get(1)?.as_str(),
            alt_arcmin * 60.0,
            az_arcmin * 60.0,
        ))
    }

    fn parse_nina(&self, line: &str) -> Option<AlignmentError> {
        let caps = self.re.captures(line)?;
        let payload: NinaPayload = serde_json::from_str(caps.get(2)?.as_str()).ok()?;

        // Without both components there is nothing to correct.
        let alt = payload.alt?;
        let az = payload.az?;
        let mut reading = AlignmentError::from_components(caps.get(1)?.as_str(), alt, az);
        if let Some(total) = payload.total {
            reading.total_error_arcsec = total;
        }
        Some(reading)
    }
}

/// JSON payload of a NINA polar-alignment line. Other fields are ignored.
#[derive(Debug, Deserialize)]
struct NinaPayload {
    #[serde(rename = "Alt")]
    alt: Option<f64>,
    #[serde(rename = "Az")]
    az: Option<f64>,
    #[serde(rename = "Total")]
    total: Option<f64>,
}
