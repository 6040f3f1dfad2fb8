//! Poll-and-seek tailing of a log file that another program keeps appending to.

use std::fs::File;
use std::io::{Read, Seek, SeekFrom};
use std::path::{Path, PathBuf};

use log::{debug, warn};

/// Where the next poll resumes reading.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct TailCursor {
    pub file_path: PathBuf,
    pub byte_offset: u64,
}

/// Result of one poll.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum TailPoll {
    /// Complete lines appended since the previous poll, in file order.
    Lines(Vec<String>),
    /// The file is missing or unreadable right now; try again later.
    Unavailable,
}

#[derive(Debug)]
pub struct LogTailer {
    cursor: TailCursor,
}

impl LogTailer {
    /// Start tailing at the current end of `path`, so only new activity is
    /// seen. A file that does not exist yet is read from its start once it
    /// appears.
    pub fn from_end(path: impl Into<PathBuf>) -> Self {
        let file_path = path.into();
        let byte_offset = match std::fs::metadata(&file_path) {
            Ok(meta) => meta.len(),
            Err(e) => {
                debug!("{} not readable yet ({e}), tailing from start", file_path.display());
                0
            }
        };
        Self {
            cursor: TailCursor {
                file_path,
                byte_offset,
            },
        }
    }

    pub fn cursor(&self) -> &TailCursor {
        &self.cursor
    }

    pub fn path(&self) -> &Path {
        &self.cursor.file_path
    }

    /// Read everything appended since the last poll.
    ///
    /// Only `\n`-terminated lines are returned; a trailing partial line stays
    /// unread until its terminator arrives. Invalid UTF-8 is replaced.
    pub fn poll(&mut self) -> TailPoll {
        match self.read_new_bytes() {
            Ok(bytes) => TailPoll::Lines(self.take_complete_lines(&bytes)),
            Err(e) => {
                debug!("{} unavailable: {e}", self.cursor.file_path.display());
                TailPoll::Unavailable
            }
        }
    }

    fn read_new_bytes(&mut self) -> std::io::Result<Vec<u8>> {
        let mut file = File::open(&self.cursor.file_path)?;
        let len = file.metadata()?.len();
        if len < self.cursor.byte_offset {
            warn!(
                "{} shrank from {} to {len} bytes, restarting from the beginning",
                self.cursor.file_path.display(),
                self.cursor.byte_offset
            );
            self.cursor.byte_offset = 0;
        }

        file.seek(SeekFrom::Start(self.cursor.byte_offset))?;
        let mut bytes = Vec::new();
        file.read_to_end(&mut bytes)?;
        Ok(bytes)
    }

    /// Split off complete lines and advance the cursor past them only.
    fn take_complete_lines(&mut self, bytes: &[u8]) -> Vec<String> {
        let Some(last_newline) = bytes.iter().rposition(|&b| b == b'\n') else {
            return Vec::new();
        };
        let complete = &bytes[..=last_newline];
        self.cursor.byte_offset += complete.len() as u64;

        complete[..last_newline]
            .split(|&b| b == b'\n')
            .map(|raw| {
                let raw = raw.strip_suffix(b"\r").unwrap_or(raw);
                String::from_utf8_lossy(raw).into_owned()
            })
            .collect()
    }
}
