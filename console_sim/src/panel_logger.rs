use std::collections::VecDeque;
use std::sync::Mutex;

use log::{LevelFilter, Log, Metadata, Record, SetLoggerError};

const MAX_LINES: usize = 200;

/// Keeps the latest log lines for the TUI, the terminal itself is taken.
pub struct PanelLogger {
    lines: Mutex<VecDeque<String>>,
}

static LOGGER: PanelLogger = PanelLogger {
    lines: Mutex::new(VecDeque::new()),
};

pub fn init(level: LevelFilter) -> Result<&'static PanelLogger, SetLoggerError> {
    log::set_logger(&LOGGER)?;
    log::set_max_level(level);
    Ok(&LOGGER)
}

impl PanelLogger {
    /// Newest last, at most `count` lines
    pub fn tail(&self, count: usize) -> Vec<String> {
        match self.lines.lock() {
            Ok(lines) => lines.iter().skip(lines.len().saturating_sub(count)).cloned().collect(),
            Err(_) => vec![],
        }
    }
}

impl Log for PanelLogger {
    fn enabled(&self, metadata: &Metadata) -> bool {
        metadata.level() <= log::max_level()
    }

    fn log(&self, record: &Record) {
        if !self.enabled(record.metadata()) {
            return;
        }
        if let Ok(mut lines) = self.lines.lock() {
            if lines.len() == MAX_LINES {
                lines.pop_front();
            }
            lines.push_back(format!("{:<5} {}", record.level(), record.args()));
        }
    }

    fn flush(&self) {}
}
