use std::path::PathBuf;
use std::process::ExitCode;
use std::sync::Arc;
use std::sync::atomic::{AtomicBool, Ordering};

use anyhow::{Context, bail};
use clap::{Parser, Subcommand};
use log::warn;

use polar_autopa::Result;
use polar_autopa::calibration::Calibration;
use polar_autopa::config::AlignConfig;
use polar_autopa::correction::{CorrectionLoop, Monitor, Outcome};
use polar_autopa::link::{Axis, Mount, SerialLink};
use polar_autopa::solver_log::{LineParser, LogFormat, LogTailer, locate};

#[derive(Parser)]
#[command(name = "polar-autopa")]
#[command(about = "Automatic polar alignment driven by plate-solver logs", long_about = None)]
struct Cli {
    /// Serial port of the motor controller (e.g. /dev/ttyUSB0, COM3).
    #[arg(short, long, global = true)]
    port: Option<String>,

    #[arg(long, global = true)]
    baud: Option<u32>,

    /// Reply timeout per command in milliseconds (100-2000).
    #[arg(long, global = true)]
    reply_timeout_ms: Option<u64>,

    /// JSON config file; command-line flags take precedence.
    #[arg(short, long, global = true)]
    config: Option<PathBuf>,

    #[command(subcommand)]
    cmd: Commands,
}

#[derive(Debug, PartialEq, Subcommand)]
enum Commands {
    /// Watch the plate-solver log and correct the mount until aligned.
    Align {
        #[arg(short = 's', long, value_enum)]
        format: Option<LogFormat>,

        /// Log file to watch; defaults to the tool's usual location.
        #[arg(long)]
        log: Option<PathBuf>,

        /// Target total error in arcseconds.
        #[arg(short, long)]
        target: Option<f64>,
    },
    #[command(flatten)]
    Device(DeviceCommand),
}

/// One-shot commands that talk to the controller and exit.
#[derive(Debug, PartialEq, Subcommand)]
enum DeviceCommand {
    /// Print the controller status dump.
    Status,
    /// Print motor step counters.
    Position,
    /// Move by a number of steps on one or both axes.
    Jog {
        #[arg(long, default_value_t = 0, allow_hyphen_values = true)]
        alt: i64,

        #[arg(long, default_value_t = 0, allow_hyphen_values = true)]
        az: i64,
    },
    Stop,
    /// Set motor speed in steps per second (1-2000).
    Speed { steps_per_sec: u16 },
    /// Zero the step counters.
    Reset,
    /// Energise the motors and leave them holding.
    Enable,
    Disable,
    /// Calibration stored on the controller.
    Calibration {
        #[command(subcommand)]
        action: CalibrationAction,
    },
}

#[derive(Debug, PartialEq, Subcommand)]
enum CalibrationAction {
    /// Show the stored calibration.
    Show,
    /// Record that `steps` motor steps moved the axis by `arcsec`.
    Sample {
        #[arg(value_enum)]
        axis: Axis,
        arcsec: f64,
        steps: i64,
    },
    /// Record backlash in steps.
    Backlash {
        #[arg(value_enum)]
        axis: Axis,
        steps: u32,
    },
    /// Persist calibration on the controller.
    Save,
}

fn main() -> Result<ExitCode> {
    env_logger::Builder::from_env(env_logger::Env::default().default_filter_or("info")).init();

    let cli = Cli::parse();

    let mut config = AlignConfig::load(cli.config.as_deref())?;
    if let Some(port) = cli.port {
        config.port = Some(port);
    }
    if let Some(baud) = cli.baud {
        config.baud_rate = baud;
    }
    if let Some(timeout) = cli.reply_timeout_ms {
        config.reply_timeout_ms = timeout;
    }

    match cli.cmd {
        Commands::Align {
            format,
            log,
            target,
        } => {
            if let Some(format) = format {
                config.format = format;
            }
            if let Some(log) = log {
                config.log_path = Some(log);
            }
            if let Some(target) = target {
                config.target_error_arcsec = target;
            }
            config.validate()?;
            run_align(&config)
        }
        Commands::Device(cmd) => {
            config.validate()?;
            let mut mount = open_mount(&config)?;
            let confirmed = run_device_command(&mut mount, cmd)?;
            Ok(if confirmed {
                ExitCode::SUCCESS
            } else {
                ExitCode::FAILURE
            })
        }
    }
}

fn open_mount(config: &AlignConfig) -> Result<Mount<SerialLink>> {
    let port = config.require_port()?;
    let link = SerialLink::open(port, config.baud_rate, config.reply_timeout())
        .with_context(|| format!("connect to controller on {port}"))?;
    Ok(Mount::new(link))
}

fn run_align(config: &AlignConfig) -> Result<ExitCode> {
    // Resolve everything that can fail before touching the mount.
    let log_path = match &config.log_path {
        Some(path) => path.clone(),
        None => locate::default_log_path(config.format).with_context(|| {
            format!("locate {} log file", config.format.tool_name())
        })?,
    };
    let parser = LineParser::new(config.format)?;

    let cancel = Arc::new(AtomicBool::new(false));
    let flag = Arc::clone(&cancel);
    ctrlc::set_handler(move || flag.store(true, Ordering::SeqCst))
        .context("install Ctrl-C handler")?;

    let mut mount = open_mount(config)?;
    let calibration = match Calibration::load(&mut mount) {
        Ok(calibration) => calibration,
        Err(e) => {
            mount.disable_best_effort();
            return Err(e);
        }
    };

    // Tail from the current end so earlier sessions are not replayed.
    let tailer = LogTailer::from_end(&log_path);
    let correction = CorrectionLoop::new(mount, calibration, config.loop_settings());
    let monitor = Monitor::new(tailer, parser, correction, config.poll_interval(), cancel);

    finish(monitor.run())
}

/// Print the closing banner and map the outcome to an exit status. Errors
/// are passed through for `main` to report.
fn finish(outcome: Result<Outcome>) -> Result<ExitCode> {
    match outcome {
        Ok(Outcome::Achieved {
            iterations,
            final_error_arcsec,
        }) => {
            println!("POLAR ALIGNMENT ACHIEVED");
            println!("Final error: {final_error_arcsec:.2} arcseconds after {iterations} iterations");
            Ok(ExitCode::SUCCESS)
        }
        Ok(Outcome::Cancelled { iterations }) => {
            println!("Stopped without achieving target ({iterations} corrections applied); motors disabled");
            Ok(ExitCode::FAILURE)
        }
        Err(e) => {
            println!("Stopped without achieving target; motors disabled");
            Err(e)
        }
    }
}

/// Run a one-shot device command. Returns whether the controller confirmed it.
fn run_device_command(mount: &mut Mount<SerialLink>, cmd: DeviceCommand) -> Result<bool> {
    let confirmed = match cmd {
        DeviceCommand::Status => {
            let lines = mount.status()?;
            if lines.is_empty() {
                warn!("controller sent no status");
            }
            for line in &lines {
                println!("{line}");
            }
            !lines.is_empty()
        }
        DeviceCommand::Position => match mount.position()? {
            Some(pos) => {
                println!("Position - ALT: {} steps, AZ: {} steps", pos.alt, pos.az);
                true
            }
            None => bail!("controller returned no position"),
        },
        DeviceCommand::Jog { alt, az } => {
            if alt == 0 && az == 0 {
                bail!("nothing to move; pass --alt and/or --az");
            }
            let mut confirmed = mount.enable()?;
            if alt != 0 {
                confirmed &= mount.move_axis(Axis::Alt, alt)?;
            }
            if az != 0 {
                confirmed &= mount.move_axis(Axis::Az, az)?;
            }
            if let Some(pos) = mount.position()? {
                println!("Position - ALT: {} steps, AZ: {} steps", pos.alt, pos.az);
            }
            confirmed
        }
        DeviceCommand::Stop => mount.stop()?,
        DeviceCommand::Speed { steps_per_sec } => mount.set_speed(steps_per_sec)?,
        DeviceCommand::Reset => mount.reset_position()?,
        DeviceCommand::Enable => {
            mount.set_disable_on_drop(false);
            let confirmed = mount.enable()?;
            if confirmed {
                warn!("motors left enabled; run `disable` when done");
            }
            confirmed
        }
        DeviceCommand::Disable => mount.disable()?,
        DeviceCommand::Calibration { action } => run_calibration(mount, action)?,
    };

    if confirmed {
        println!("OK");
    }
    Ok(confirmed)
}

fn run_calibration(mount: &mut Mount<SerialLink>, action: CalibrationAction) -> Result<bool> {
    match action {
        CalibrationAction::Show => {
            let lines = mount.calibration_dump()?;
            for line in &lines {
                println!("{line}");
            }
            let cal = Calibration::from_dump(&lines)?;
            println!(
                "Effective: ALT {:.2} steps/arcsec, AZ {:.2} steps/arcsec, backlash ALT {} / AZ {} steps{}",
                cal.alt_steps_per_arcsec,
                cal.az_steps_per_arcsec,
                cal.alt_backlash_steps,
                cal.az_backlash_steps,
                if cal.is_calibrated { "" } else { " (defaults)" }
            );
            Ok(true)
        }
        CalibrationAction::Sample {
            axis,
            arcsec,
            steps,
        } => {
            if !(arcsec.is_finite() && arcsec > 0.0) || steps == 0 {
                bail!("calibration sample needs positive arcsec and non-zero steps");
            }
            println!(
                "{axis}: {:.2} steps/arcsec",
                steps.unsigned_abs() as f64 / arcsec
            );
            Ok(mount.write_calibration_sample(axis, arcsec, steps)?)
        }
        CalibrationAction::Backlash { axis, steps } => Ok(mount.write_backlash(axis, steps)?),
        CalibrationAction::Save => Ok(mount.save_calibration()?),
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use clap::CommandFactory;
    use pretty_assertions::assert_eq;

    fn parse(args: &[&str]) -> Cli {
        Cli::try_parse_from(std::iter::once("polar-autopa").chain(args.iter().copied())).unwrap()
    }

    #[test]
    fn cli_definition_is_consistent() {
        Cli::command().debug_assert();
    }

    #[test]
    fn device_commands_are_top_level() {
        let cli = parse(&["--port", "COM3", "jog", "--alt", "-50"]);
        assert_eq!(cli.port.as_deref(), Some("COM3"));
        assert_eq!(
            cli.cmd,
            Commands::Device(DeviceCommand::Jog { alt: -50, az: 0 })
        );
        assert_eq!(
            parse(&["calibration", "backlash", "az", "12"]).cmd,
            Commands::Device(DeviceCommand::Calibration {
                action: CalibrationAction::Backlash {
                    axis: Axis::Az,
                    steps: 12
                }
            })
        );
    }

    #[test]
    fn align_takes_format_and_target() {
        let cli = parse(&["align", "-s", "nina", "-t", "20", "--port", "/dev/ttyUSB0"]);
        assert_eq!(
            cli.cmd,
            Commands::Align {
                format: Some(LogFormat::Nina),
                log: None,
                target: Some(20.0),
            }
        );
        assert_eq!(cli.port.as_deref(), Some("/dev/ttyUSB0"));
    }

    #[test]
    fn exit_status_follows_outcome() {
        let achieved = finish(Ok(Outcome::Achieved {
            iterations: 3,
            final_error_arcsec: 12.5,
        }));
        assert_eq!(achieved.unwrap(), ExitCode::SUCCESS);

        let cancelled = finish(Ok(Outcome::Cancelled { iterations: 1 }));
        assert_eq!(cancelled.unwrap(), ExitCode::FAILURE);
    }

    #[test]
    fn run_error_is_returned_unchanged() {
        let err = finish(Err(anyhow::anyhow!("controller link closed"))).unwrap_err();
        assert_eq!(format!("{err:#}"), "controller link closed");
    }
}
