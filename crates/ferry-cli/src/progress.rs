//! Upload progress with TTY detection.
//!
//! On a terminal, a progress bar tracks uploads and log lines are printed
//! above it. Otherwise every message goes to stderr as a plain line.

use std::io::IsTerminal;
use std::time::Instant;

use ferry::engine::Reporter;
use indicatif::{ProgressBar, ProgressStyle};

/// Detects whether stderr is connected to a TTY.
pub fn is_tty() -> bool {
    std::io::stderr().is_terminal()
}

/// Reporter for the `ferry` binary.
pub struct CliReporter {
    progress_bar: Option<ProgressBar>,
    total: usize,
    done: usize,
    start_time: Instant,
}

impl CliReporter {
    /// A reporter for `total` uploads, with a bar if stderr is a TTY.
    pub fn new(total: usize) -> Self {
        let progress_bar = if is_tty() && total > 0 {
            let pb = ProgressBar::new(total as u64);
            pb.set_style(
                ProgressStyle::with_template("{bar:30.cyan/blue} {pos}/{len} uploads ({elapsed})")
                    .unwrap_or_else(|_| ProgressStyle::default_bar())
                    .progress_chars("#>-"),
            );
            Some(pb)
        } else {
            None
        };
        Self {
            progress_bar,
            total,
            done: 0,
            start_time: Instant::now(),
        }
    }

    fn emit(&self, line: String) {
        match &self.progress_bar {
            Some(pb) => pb.println(line),
            None => eprintln!("{line}"),
        }
    }

    pub fn finish(self) {
        if let Some(pb) = self.progress_bar {
            pb.finish_and_clear();
        }
        if self.total > 0 {
            eprintln!(
                "[info] {}/{} upload(s) attempted in {:.1?}",
                self.done,
                self.total,
                self.start_time.elapsed()
            );
        }
    }
}

impl Reporter for CliReporter {
    fn info(&mut self, msg: &str) {
        self.emit(format!("[info] {msg}"));
    }

    fn warn(&mut self, msg: &str) {
        self.emit(format!("[warn] {msg}"));
    }

    fn error(&mut self, msg: &str) {
        self.emit(format!("[error] {msg}"));
    }

    fn upload_finished(&mut self, done: usize, total: usize) {
        self.done = done;
        self.total = total;
        if let Some(pb) = &self.progress_bar {
            pb.set_position(done as u64);
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn upload_finished_tracks_counts() {
        let mut reporter = CliReporter::new(0);
        reporter.upload_finished(2, 5);
        assert_eq!(reporter.done, 2);
        assert_eq!(reporter.total, 5);
        reporter.finish();
    }

    #[test]
    fn zero_uploads_never_draws() {
        let reporter = CliReporter::new(0);
        assert!(reporter.progress_bar.is_none());
    }
}
