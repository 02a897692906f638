//! Progress, activity log and cancellation hooks.

use log::Level;

/// Receives progress and activity messages and answers cancellation polls.
///
/// The session polls [`is_cancelled`](Reporter::is_cancelled) between connect
/// retries and after every downloaded chunk.
pub trait Reporter {
    /// Cumulative progress changed.
    fn on_progress(&mut self, message: &str, percent: u8);

    /// Activity message. Forwards to the `log` facade by default.
    fn on_log(&mut self, level: Level, message: &str) {
        log::log!(level, "{message}");
    }

    /// Whether the caller asked to stop.
    fn is_cancelled(&mut self) -> bool {
        false
    }
}

impl<R: Reporter + ?Sized> Reporter for &mut R {
    fn on_progress(&mut self, message: &str, percent: u8) {
        (**self).on_progress(message, percent);
    }

    fn on_log(&mut self, level: Level, message: &str) {
        (**self).on_log(level, message);
    }

    fn is_cancelled(&mut self) -> bool {
        (**self).is_cancelled()
    }
}

/// Reporter that ignores progress and never cancels.
#[derive(Debug, Default, Clone, Copy)]
pub struct NoopReporter;

impl Reporter for NoopReporter {
    fn on_progress(&mut self, _message: &str, _percent: u8) {}
}
