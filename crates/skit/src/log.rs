//! Process-wide reporting channel.
//!
//! Embedders install a log handler and a fatal handler once, at startup,
//! before any core object is created; the handlers live for the rest of
//! the process. The core routes its diagnostics (garbage-collector
//! disposal notices, heap growth notices) through the log handler and
//! hard internal faults through the fatal handler, so hosts can redirect
//! both into their own logging machinery.

use std::sync::OnceLock;

type Handler = Box<dyn Fn(&str) + Send + Sync>;

static LOG_HANDLER: OnceLock<Handler> = OnceLock::new();
static FATAL_HANDLER: OnceLock<Handler> = OnceLock::new();

/// Install the log handler. Returns `false` if one was already installed.
pub fn set_log_handler<F>(handler: F) -> bool
where
    F: Fn(&str) + Send + Sync + 'static,
{
    LOG_HANDLER.set(Box::new(handler)).is_ok()
}

/// Install the fatal handler, called just before the core aborts on an
/// internal fault. Returns `false` if one was already installed.
pub fn set_fatal_handler<F>(handler: F) -> bool
where
    F: Fn(&str) + Send + Sync + 'static,
{
    FATAL_HANDLER.set(Box::new(handler)).is_ok()
}

/// Report a diagnostic message. Defaults to stderr.
pub(crate) fn log(message: &str) {
    match LOG_HANDLER.get() {
        Some(handler) => handler(message),
        None => eprintln!("[skit] {message}"),
    }
}

/// Report an unrecoverable internal fault and abort the current script.
///
/// This is for conditions that indicate a bug in the emitter or the
/// embedder (a malformed register operand, a jump into the void), not for
/// script-level failures, which travel through [`crate::error::Error`].
pub(crate) fn fatal(message: &str) -> ! {
    match FATAL_HANDLER.get() {
        Some(handler) => handler(message),
        None => eprintln!("[skit] fatal: {message}"),
    }
    panic!("{message}");
}
