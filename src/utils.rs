use anyhow::{anyhow, Result};
use chrono::{DateTime, Local};
use log::{LevelFilter, Metadata, Record};
use std::fs::{File, OpenOptions};
use std::io::Write;
use std::path::Path;
use std::str::FromStr;

use crate::config::ClientConfig;

// Logging for embedders that don't bring their own `log` backend. Records from
// this crate are filtered at the configured level; everything else (tokio,
// the embedder's own crates) only gets through at warn and above.

const CRATE_TARGET: &str = env!("CARGO_PKG_NAME");
const FOREIGN_LEVEL: LevelFilter = LevelFilter::Warn;

pub struct SimpleLogger {
    log_file: Option<File>,
    level: LevelFilter,
}

impl SimpleLogger {
    pub fn new(log_file: Option<&Path>, level: LevelFilter) -> Result<Self> {
        let log_file = match log_file {
            Some(path) => Some(OpenOptions::new().create(true).append(true).open(path)?),
            None => None,
        };
        Ok(SimpleLogger { log_file, level })
    }

    fn level_for(&self, target: &str) -> LevelFilter {
        if target == CRATE_TARGET || target.starts_with(&format!("{}::", CRATE_TARGET)) {
            self.level
        } else {
            FOREIGN_LEVEL
        }
    }

    fn format_record(record: &Record) -> String {
        let now: DateTime<Local> = Local::now();
        format!(
            "{} {:<5} {}: {}\n",
            now.format("%H:%M:%S%.3f"),
            record.level(),
            record.target(),
            record.args()
        )
    }
}

impl log::Log for SimpleLogger {
    fn enabled(&self, metadata: &Metadata) -> bool {
        metadata.level() <= self.level_for(metadata.target())
    }

    fn log(&self, record: &Record) {
        if !self.enabled(record.metadata()) {
            return;
        }
        let line = Self::format_record(record);
        match &self.log_file {
            Some(file) => {
                // &File implements Write
                let mut file: &File = file;
                let _ = file.write_all(line.as_bytes());
            }
            None => eprint!("{}", line),
        }
    }

    fn flush(&self) {
        if let Some(mut file) = self.log_file.as_ref() {
            let _ = file.flush();
        }
    }
}

/// Install `SimpleLogger` as configured by `config.log_level` and
/// `config.log_file`. Fails if a global logger is already set.
pub fn init_logging(config: &ClientConfig) -> Result<()> {
    let level = LevelFilter::from_str(&config.log_level)
        .map_err(|_| anyhow!("Unknown log level '{}'", config.log_level))?;
    let logger = SimpleLogger::new(config.log_file.as_deref(), level)?;

    log::set_boxed_logger(Box::new(logger))?;
    log::set_max_level(level.max(FOREIGN_LEVEL));

    log::info!("{} {} logging at {}", CRATE_TARGET, env!("CARGO_PKG_VERSION"), level);
    Ok(())
}
