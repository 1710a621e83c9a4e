use std::io::Write;

use chrono::Local;
use log::{LevelFilter, Log, SetLoggerError};

pub const CITRINE_LOGGER: CitrineLogger = CitrineLogger;

/// Minimal logger for the transfer tools. Every record goes to stderr so the
/// statistics block on stdout stays machine-readable.
pub struct CitrineLogger;

impl CitrineLogger {
    /// Installs the logger as the global `log` backend.
    pub fn init(level: LevelFilter) -> Result<(), SetLoggerError> {
        log::set_logger(&CITRINE_LOGGER)?;
        log::set_max_level(level);
        Ok(())
    }
}

impl Log for CitrineLogger {
    fn enabled(&self, metadata: &log::Metadata) -> bool {
        metadata.level() <= log::max_level()
    }

    fn log(&self, record: &log::Record) {
        if self.enabled(record.metadata()) {
            let now = Local::now();
            eprintln!(
                "{} {} {}",
                now.format("%Y-%m-%d %H:%M:%S%.3f"),
                record.level(),
                record.args()
            );
        }
    }

    fn flush(&self) {
        let _ = std::io::stderr().flush();
    }
}
