//! Console backend for the [`log`] crate.
//!
//! Records are filtered by [`log::max_level`], which the boot manager sets from `log_level` in the configuration
//! once it has been read. Each line is stamped with the time since the firmware started.

use core::fmt::Write;

use log::{Metadata, Record};
use uefi::system::with_stdout;

use crate::system::time::timer_usec;

/// Writes log records to the firmware console.
#[derive(Default)]
pub struct UefiLogger;

impl UefiLogger {
    /// Constructs a new [`UefiLogger`].
    #[must_use = "Has no effect if the result is unused"]
    pub const fn new() -> Self {
        Self
    }
}

impl log::Log for UefiLogger {
    fn enabled(&self, metadata: &Metadata) -> bool {
        metadata.level() <= log::max_level()
    }

    fn log(&self, record: &Record) {
        if !self.enabled(record.metadata()) {
            return;
        }
        let usec = timer_usec();
        let (secs, micros) = (usec / 1_000_000, usec % 1_000_000);
        let level = record.level();
        let file = record.file().unwrap_or_default();
        let line = record.line().unwrap_or_default();
        let args = record.args();
        with_stdout(|stdout| {
            let _ = writeln!(stdout, "[{secs:>5}.{micros:06} {level} {file}:{line}] - {args}");
        });
    }

    fn flush(&self) {}
}
