//! Logger setup: timestamped lines on stdout and, optionally, in a log file.

use std::fs::OpenOptions;
use std::io::{self, Write};
use std::path::PathBuf;

use chrono::Local;
use env_logger::{Builder, Target};
use log::log;

pub type LevelFilter = log::LevelFilter;
pub type Level = log::Level;

#[derive(Debug, Clone)]
/// Where and how much to log.
///
/// # Fields
///
/// * `log_file` - File to append to in addition to stdout.
/// * `log_level` - Most verbose level emitted.
pub struct LogConfig {
    pub log_file: Option<PathBuf>,
    pub log_level: LevelFilter,
}

impl LogConfig {
    pub fn new(log_file: Option<PathBuf>, log_level: LevelFilter) -> Self {
        Self { log_file, log_level }
    }
}

impl Default for LogConfig {
    fn default() -> Self {
        Self::new(None, LevelFilter::Info)
    }
}

pub struct Logger {
    config: LogConfig,
}

impl Logger {
    /// Install the global logger.
    ///
    /// # Arguments
    ///
    /// * `config` - Target file and level.
    ///
    /// # Returns
    ///
    /// * `Ok(Logger)` - The logger is installed.
    /// * `Err(io::Error)` - The log file cannot be opened, or a logger is already installed.
    pub fn init(config: LogConfig) -> io::Result<Self> {
        let mut writers: Vec<Box<dyn Write + Send + Sync>> = vec![Box::new(io::stdout())];

        if let Some(log_file) = &config.log_file {
            if let Some(parent) = log_file.parent() {
                if !parent.as_os_str().is_empty() {
                    std::fs::create_dir_all(parent)?;
                }
            }
            let file = OpenOptions::new().create(true).append(true).open(log_file)?;
            writers.push(Box::new(file));
        }

        Builder::new()
            .format(|buf, record| {
                writeln!(
                    buf,
                    "{} [{}] {} - {}",
                    Local::now().format("%Y-%m-%d %H:%M:%S"),
                    record.level(),
                    record.module_path().unwrap_or("unknown"),
                    record.args()
                )
            })
            .filter(None, config.log_level)
            .target(Target::Pipe(Box::new(MultiWriter { writers })))
            .try_init()
            .map_err(io::Error::other)?;

        Ok(Self { config })
    }

    pub fn config(&self) -> &LogConfig {
        &self.config
    }

    /// Log an event with optional details and cause.
    pub fn log_event(
        &self,
        level: Level,
        event: &str,
        details: Option<&str>,
        error: Option<&dyn std::error::Error>,
    ) {
        match (details, error) {
            (Some(d), Some(e)) => log!(level, "{}: {} - {}", event, d, e),
            (Some(d), None) => log!(level, "{}: {}", event, d),
            (None, Some(e)) => log!(level, "{} - {}", event, e),
            (None, None) => log!(level, "{}", event),
        }
    }
}

/// Writes every buffer to all of its writers.
struct MultiWriter {
    writers: Vec<Box<dyn Write + Send + Sync>>,
}

impl Write for MultiWriter {
    fn write(&mut self, buf: &[u8]) -> io::Result<usize> {
        for writer in &mut self.writers {
            writer.write_all(buf)?;
        }
        Ok(buf.len())
    }

    fn flush(&mut self) -> io::Result<()> {
        for writer in &mut self.writers {
            writer.flush()?;
        }
        Ok(())
    }
}
