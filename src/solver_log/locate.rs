//! Default log locations of the supported plate-solving tools.

use std::path::{Path, PathBuf};

use anyhow::{Context, bail};
use chrono::NaiveDate;

use crate::Result;
use crate::solver_log::LogFormat;

/// Resolve the log file the selected tool writes to on this machine.
pub fn default_log_path(format: LogFormat) -> Result<PathBuf> {
    match format {
        LogFormat::Sharpcap => {
            let base = std::env::var_os("LOCALAPPDATA")
                .context("LOCALAPPDATA is not set; pass --log explicitly")?;
            newest_log_in(&Path::new(&base).join("SharpCap").join("logs"))
        }
        LogFormat::Nina => {
            let home = std::env::var_os("USERPROFILE")
                .or_else(|| std::env::var_os("HOME"))
                .context("cannot determine home directory; pass --log explicitly")?;
            let dir = Path::new(&home)
                .join("Documents")
                .join("N.I.N.A")
                .join("PolarAlignment");
            Ok(nina_log_for(&dir, chrono::Local::now().date_naive()))
        }
    }
}

/// Most recently modified `*.log` in `dir`.
pub fn newest_log_in(dir: &Path) -> Result<PathBuf> {
    let entries = std::fs::read_dir(dir)
        .with_context(|| format!("read SharpCap log directory {}", dir.display()))?;

    let mut newest: Option<(std::time::SystemTime, PathBuf)> = None;
    for entry in entries {
        let entry = entry?;
        let path = entry.path();
        if path.extension().and_then(|e| e.to_str()) != Some("log") {
            continue;
        }
        let modified = entry
            .metadata()
            .and_then(|m| m.modified())
            .with_context(|| format!("stat {}", path.display()))?;
        if newest.as_ref().is_none_or(|(t, _)| modified > *t) {
            newest = Some((modified, path));
        }
    }

    match newest {
        Some((_, path)) => Ok(path),
        None => bail!("no .log files in {}", dir.display()),
    }
}

/// NINA writes one polar-alignment log per day, named `YYYY-MM-DD.log`.
pub fn nina_log_for(dir: &Path, date: NaiveDate) -> PathBuf {
    dir.join(format!("{}.log", date.format("%Y-%m-%d")))
}
