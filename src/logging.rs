// ============================================================================
// File: src/logging.rs
// ----------------------------------------------------------------------------
// env_logger setup: every record goes to the console and is appended to the
// persistent log file as `<timestamp> <level> <message>`.
// ============================================================================

use std::fs::{File, OpenOptions};
use std::io::{self, Write};
use std::path::{Path, PathBuf};

use chrono::{DateTime, Local};
use log::Level;

use crate::error::{DeployError, DeployResult};

const TIMESTAMP_FORMAT: &str = "%Y-%m-%d %H:%M:%S";

/// Logging options taken from configuration and the command line
#[derive(Debug, Clone)]
pub struct LogSettings {
    /// File every record is appended to
    pub file: PathBuf,

    /// Filter used when `RUST_LOG` is not set
    pub default_filter: String,

    /// Mirror records on stderr
    pub console: bool,
}

impl LogSettings {
    pub fn new<P: Into<PathBuf>>(file: P) -> Self {
        Self {
            file: file.into(),
            default_filter: "info".to_string(),
            console: true,
        }
    }

    pub fn with_default_filter<F: Into<String>>(mut self, filter: F) -> Self {
        self.default_filter = filter.into();
        self
    }

    pub fn with_console(mut self, console: bool) -> Self {
        self.console = console;
        self
    }
}

/// Writer that duplicates output to the log file and, optionally, stderr
pub struct TeeWriter {
    file: File,
    console: Option<io::Stderr>,
}

impl TeeWriter {
    pub fn open(path: &Path, console: bool) -> io::Result<Self> {
        if let Some(parent) = path.parent()
            && !parent.as_os_str().is_empty()
        {
            std::fs::create_dir_all(parent)?;
        }
        let file = OpenOptions::new().create(true).append(true).open(path)?;
        Ok(Self {
            file,
            console: console.then(io::stderr),
        })
    }
}

impl Write for TeeWriter {
    fn write(&mut self, buf: &[u8]) -> io::Result<usize> {
        self.file.write_all(buf)?;
        if let Some(console) = &mut self.console {
            // A closed console must not stop the file log.
            let _ = console.write_all(buf);
        }
        Ok(buf.len())
    }

    fn flush(&mut self) -> io::Result<()> {
        self.file.flush()?;
        if let Some(console) = &mut self.console {
            let _ = console.flush();
        }
        Ok(())
    }
}

/// Format one log line
pub fn format_line(timestamp: DateTime<Local>, level: Level, message: &str) -> String {
    format!(
        "{} {:<8} {}",
        timestamp.format(TIMESTAMP_FORMAT),
        level,
        message
    )
}

/// Install the global logger
///
/// Fails if the log file cannot be opened or a logger is already set.
pub fn init_logging(settings: &LogSettings) -> DeployResult<()> {
    let writer = TeeWriter::open(&settings.file, settings.console)?;

    env_logger::Builder::new()
        .parse_env(env_logger::Env::default().default_filter_or(settings.default_filter.as_str()))
        .format(|buf, record| {
            writeln!(
                buf,
                "{}",
                format_line(Local::now(), record.level(), &record.args().to_string())
            )
        })
        .target(env_logger::Target::Pipe(Box::new(writer)))
        .try_init()
        .map_err(|e| DeployError::config(format!("logger already initialised: {e}")))
}

/// Read the whole log file for display
///
/// Invalid UTF-8 is replaced rather than rejected so a partially corrupt
/// log can still be shown.
pub fn read_log<P: AsRef<Path>>(path: P) -> DeployResult<String> {
    let bytes = std::fs::read(path.as_ref())?;
    Ok(match String::from_utf8(bytes) {
        Ok(text) => text,
        Err(e) => String::from_utf8_lossy(e.as_bytes()).into_owned(),
    })
}
