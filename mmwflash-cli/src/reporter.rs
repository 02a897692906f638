//! Terminal reporter: an indicatif progress bar plus the Ctrl-C flag.

use indicatif::{ProgressBar, ProgressDrawTarget, ProgressStyle};
use log::Level;
use mmwflash::Reporter;
use std::sync::Arc;
use std::sync::atomic::{AtomicBool, Ordering};

/// Drives a progress bar and reports cancellation from a shared flag.
pub struct TerminalReporter {
    bar: ProgressBar,
    interrupted: Arc<AtomicBool>,
}

impl TerminalReporter {
    /// Create a reporter. A hidden bar is used when `visible` is false.
    pub fn new(visible: bool, interrupted: Arc<AtomicBool>) -> Self {
        let bar = if visible {
            let pb = ProgressBar::new(100);
            pb.set_draw_target(ProgressDrawTarget::stderr());
            #[allow(clippy::unwrap_used)] // Static template string
            pb.set_style(
                ProgressStyle::default_bar()
                    .template("{spinner:.green} [{elapsed_precise}] [{bar:40.cyan/blue}] {pos}% {msg}")
                    .unwrap()
                    .progress_chars("#>-"),
            );
            pb
        } else {
            ProgressBar::hidden()
        };
        Self { bar, interrupted }
    }

    /// Stop drawing and leave the bar in place.
    pub fn finish(&self) {
        self.bar.finish();
    }

    /// Stop drawing and clear the bar.
    pub fn abandon(&self) {
        self.bar.abandon();
    }
}

impl Reporter for TerminalReporter {
    fn on_progress(&mut self, message: &str, percent: u8) {
        self.bar.set_position(u64::from(percent));
        self.bar.set_message(message.to_string());
    }

    fn on_log(&mut self, level: Level, message: &str) {
        self.bar.suspend(|| log::log!(level, "{message}"));
    }

    fn is_cancelled(&mut self) -> bool {
        self.interrupted.load(Ordering::SeqCst)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_hidden_reporter_tracks_progress() {
        let flag = Arc::new(AtomicBool::new(false));
        let mut reporter = TerminalReporter::new(false, Arc::clone(&flag));
        reporter.on_progress("Erasing storage", 4);
        assert_eq!(reporter.bar.position(), 4);
        assert_eq!(reporter.bar.message(), "Erasing storage");
    }

    #[test]
    fn test_cancellation_follows_flag() {
        let flag = Arc::new(AtomicBool::new(false));
        let mut reporter = TerminalReporter::new(false, Arc::clone(&flag));
        assert!(!reporter.is_cancelled());
        flag.store(true, Ordering::SeqCst);
        assert!(reporter.is_cancelled());
    }
}
