//! Diagnostic reporting.
//!
//! Both the stores and the channel are handed a `Reporter` when they are built. It is a thin
//! layer over a `slog::Logger` which adds the numeric verbosity of the server: level 0 messages
//! are always shown, and level `n` messages only with `-v n` or higher.

use slog::{Drain, Logger};

use crate::error::Error;

/// The highest meaningful verbosity level.
pub const MAX_VERBOSITY: u8 = 6;

/// A reporting handle.
///
/// Cloning is cheap; clones share the same drain.
#[derive(Clone)]
pub struct Reporter {
    /// The logger messages are emitted to.
    log: Logger,
    /// The verbosity level.
    ///
    /// Messages reported with a level above this are dropped.
    verbosity: u8,
}

impl Reporter {
    /// Create a reporter from some logger.
    pub fn new(log: Logger, verbosity: u8) -> Reporter {
        Reporter {
            log: log,
            verbosity: verbosity.min(MAX_VERBOSITY),
        }
    }

    /// Create a reporter printing to the terminal.
    pub fn terminal(verbosity: u8) -> Reporter {
        let decorator = slog_term::TermDecorator::new().stderr().build();
        let drain = slog_term::CompactFormat::new(decorator).build().fuse();
        let drain = slog_async::Async::new(drain).build().fuse();

        Reporter::new(Logger::root(drain, o!()), verbosity)
    }

    /// Create a reporter which swallows everything.
    pub fn discard() -> Reporter {
        Reporter::new(Logger::root(slog::Discard, o!()), 0)
    }

    /// Derive a reporter with some extra context attached to every message.
    pub fn child<T>(&self, values: slog::OwnedKV<T>) -> Reporter
    where T: slog::SendSyncRefUnwindSafeKV + 'static {
        Reporter {
            log: self.log.new(values),
            verbosity: self.verbosity,
        }
    }

    /// The verbosity level.
    pub fn verbosity(&self) -> u8 {
        self.verbosity
    }

    /// Is a message of level `level` going to be shown?
    pub fn enabled(&self, level: u8) -> bool {
        level <= self.verbosity
    }

    /// Report a message of some level.
    pub fn report(&self, level: u8, msg: &str) {
        if !self.enabled(level) {
            return;
        }

        match level {
            0 => info!(self.log, "{}", msg),
            1 | 2 => debug!(self.log, "{}", msg; "level" => level),
            _ => trace!(self.log, "{}", msg; "level" => level),
        }
    }

    /// Report a non-fatal problem.
    ///
    /// These are always shown.
    pub fn warn(&self, msg: &str) {
        warn!(self.log, "{}", msg);
    }

    /// Report a fatal condition.
    ///
    /// The error is logged and handed back, so that the caller can propagate it.
    pub fn fatal(&self, err: Error) -> Error {
        error!(self.log, "{}", err; "kind" => format!("{:?}", err.kind));

        err
    }
}
