// Progress estimation for external wipe tools
//
// Neither dd nor shred emits machine-readable progress, so the estimate is a
// counter of progress-bearing output lines, capped below 100 until the tool
// has exited successfully.

use crate::WipeState;
use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use tokio::sync::mpsc::UnboundedSender;

/// Substrings that mark a line as reporting progress
pub const PROGRESS_KEYWORDS: [&str; 8] = ["bytes", "copied", "pass ", "%", "MB", "GB", "MiB", "GiB"];

/// Highest percentage reported while the tool is still running
pub const MAX_RUNNING_PERCENT: u8 = 99;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum ProgressKind {
    Running,
    Completed,
    Failed,
    Cancelled,
}

impl ProgressKind {
    pub fn is_terminal(&self) -> bool {
        !matches!(self, ProgressKind::Running)
    }
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ProgressEvent {
    pub percent: u8,
    pub message: String,
    pub timestamp: DateTime<Utc>,
    pub kind: ProgressKind,
}

pub fn is_progress_line(line: &str) -> bool {
    PROGRESS_KEYWORDS.iter().any(|k| line.contains(k))
}

/// Splits raw output into lines and turns progress-bearing ones into an estimate
#[derive(Debug, Default)]
pub struct ProgressEstimator {
    progress_lines: u32,
    partial: Vec<u8>,
}

impl ProgressEstimator {
    pub fn new() -> Self {
        Self::default()
    }

    /// Feed a chunk of output, returning the lines it completed.
    ///
    /// Both `\n` and `\r` end a line; dd and shred redraw status with `\r`.
    pub fn push(&mut self, chunk: &[u8]) -> Vec<String> {
        let mut lines = Vec::new();
        for &byte in chunk {
            if byte == b'\n' || byte == b'\r' {
                if !self.partial.is_empty() {
                    lines.push(String::from_utf8_lossy(&self.partial).into_owned());
                    self.partial.clear();
                }
            } else {
                self.partial.push(byte);
            }
        }
        lines
    }

    /// Trailing output that never got a line terminator
    pub fn flush(&mut self) -> Option<String> {
        if self.partial.is_empty() {
            return None;
        }
        let line = String::from_utf8_lossy(&self.partial).into_owned();
        self.partial.clear();
        Some(line)
    }

    /// Count `line` if it carries progress; returns the new estimate when it does
    pub fn observe(&mut self, line: &str) -> Option<u8> {
        if !is_progress_line(line) {
            return None;
        }
        self.progress_lines = self.progress_lines.saturating_add(1);
        Some(self.percent())
    }

    pub fn percent(&self) -> u8 {
        self.progress_lines.min(u32::from(MAX_RUNNING_PERCENT)) as u8
    }
}

/// Pushes progress events to an optional observer.
///
/// Percentages never decrease and exactly one terminal event is sent.
#[derive(Debug)]
pub struct ProgressReporter {
    tx: Option<UnboundedSender<ProgressEvent>>,
    last_percent: u8,
    started: bool,
    finished: bool,
}

impl ProgressReporter {
    pub fn new(tx: Option<UnboundedSender<ProgressEvent>>) -> Self {
        Self {
            tx,
            last_percent: 0,
            started: false,
            finished: false,
        }
    }

    /// Reporter nobody listens to
    pub fn silent() -> Self {
        Self::new(None)
    }

    pub fn last_percent(&self) -> u8 {
        self.last_percent
    }

    pub fn is_finished(&self) -> bool {
        self.finished
    }

    /// Initial 0% event
    pub fn start(&mut self, message: &str) {
        if self.started || self.finished {
            return;
        }
        self.started = true;
        self.emit(ProgressKind::Running, message);
    }

    /// Report a running estimate; ignored unless it moves forward
    pub fn advance(&mut self, percent: u8, message: &str) {
        if self.finished {
            return;
        }
        let percent = percent.min(MAX_RUNNING_PERCENT);
        if percent <= self.last_percent && self.started {
            return;
        }
        self.started = true;
        self.last_percent = self.last_percent.max(percent);
        self.emit(ProgressKind::Running, message);
    }

    /// Terminal event for `state`. Only `Completed` reaches 100.
    pub fn finish(&mut self, state: WipeState, message: &str) {
        if self.finished {
            return;
        }
        let kind = match state {
            WipeState::Completed => {
                self.last_percent = 100;
                ProgressKind::Completed
            }
            WipeState::Cancelled => ProgressKind::Cancelled,
            _ => ProgressKind::Failed,
        };
        self.started = true;
        self.finished = true;
        self.emit(kind, message);
    }

    fn emit(&self, kind: ProgressKind, message: &str) {
        let Some(tx) = &self.tx else {
            return;
        };
        let event = ProgressEvent {
            percent: self.last_percent,
            message: message.to_string(),
            timestamp: Utc::now(),
            kind,
        };
        // A dropped receiver only means nobody is watching
        let _ = tx.send(event);
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use proptest::prelude::*;
    use tokio::sync::mpsc;

    fn drain(rx: &mut mpsc::UnboundedReceiver<ProgressEvent>) -> Vec<ProgressEvent> {
        let mut events = Vec::new();
        while let Ok(event) = rx.try_recv() {
            events.push(event);
        }
        events
    }

    #[test]
    fn test_progress_keywords() {
        assert!(is_progress_line("1048576 bytes (1.0 MB, 1.0 MiB) copied, 0.01 s, 105 MB/s"));
        assert!(is_progress_line("shred: /dev/sdz: pass 2/4 (random)..."));
        assert!(is_progress_line("shred: /dev/sdz: pass 1/3 (random)...512MiB/1.0GiB 50%"));
        assert!(!is_progress_line("dd: error writing '/dev/sdz': No space left on device"));
        assert!(!is_progress_line("shred: /dev/sdz: passing"));
    }

    #[test]
    fn test_split_on_newline_and_carriage_return() {
        let mut estimator = ProgressEstimator::new();
        let lines = estimator.push(b"10 bytes\r20 bytes\r\n30 by");
        assert_eq!(lines, vec!["10 bytes", "20 bytes"]);

        let lines = estimator.push(b"tes\n");
        assert_eq!(lines, vec!["30 bytes"]);
        assert_eq!(estimator.flush(), None);
    }

    #[test]
    fn test_flush_returns_unterminated_tail() {
        let mut estimator = ProgressEstimator::new();
        assert!(estimator.push(b"final 5%").is_empty());
        assert_eq!(estimator.flush().as_deref(), Some("final 5%"));
    }

    #[test]
    fn test_estimate_capped_below_100() {
        let mut estimator = ProgressEstimator::new();
        for _ in 0..250 {
            estimator.observe("copied");
        }
        assert_eq!(estimator.percent(), MAX_RUNNING_PERCENT);
        assert_eq!(estimator.observe("noise"), None);
    }

    #[test]
    fn test_reporter_completed_sequence() {
        let (tx, mut rx) = mpsc::unbounded_channel();
        let mut reporter = ProgressReporter::new(Some(tx));

        reporter.start("starting");
        reporter.advance(5, "5 bytes");
        reporter.advance(3, "stale");
        reporter.advance(10, "10 bytes");
        reporter.finish(WipeState::Completed, "done");
        reporter.advance(50, "after finish");
        reporter.finish(WipeState::Failed, "second terminal");

        let events = drain(&mut rx);
        let percents: Vec<u8> = events.iter().map(|e| e.percent).collect();
        assert_eq!(percents, vec![0, 5, 10, 100]);
        assert_eq!(events.last().unwrap().kind, ProgressKind::Completed);
        assert_eq!(events.iter().filter(|e| e.kind.is_terminal()).count(), 1);
    }

    #[test]
    fn test_reporter_failure_keeps_last_percent() {
        let (tx, mut rx) = mpsc::unbounded_channel();
        let mut reporter = ProgressReporter::new(Some(tx));

        reporter.start("starting");
        reporter.advance(7, "7 bytes");
        reporter.finish(WipeState::Failed, "exit 1");

        let events = drain(&mut rx);
        let last = events.last().unwrap();
        assert_eq!(last.kind, ProgressKind::Failed);
        assert_eq!(last.percent, 7);
        assert_eq!(reporter.last_percent(), 7);
    }

    #[test]
    fn test_reporter_advance_never_reports_100() {
        let mut reporter = ProgressReporter::silent();
        reporter.advance(100, "claims done");
        assert_eq!(reporter.last_percent(), MAX_RUNNING_PERCENT);
    }

    #[test]
    fn test_reporter_with_dropped_receiver() {
        let (tx, rx) = mpsc::unbounded_channel();
        drop(rx);
        let mut reporter = ProgressReporter::new(Some(tx));
        reporter.start("starting");
        reporter.finish(WipeState::Cancelled, "cancelled");
        assert!(reporter.is_finished());
    }

    proptest! {
        #[test]
        fn prop_events_non_decreasing_and_100_only_on_completed(
            steps in prop::collection::vec(0u8..=120, 0..40),
            terminal in prop_oneof![
                Just(WipeState::Completed),
                Just(WipeState::Failed),
                Just(WipeState::Cancelled),
            ],
        ) {
            let (tx, mut rx) = mpsc::unbounded_channel();
            let mut reporter = ProgressReporter::new(Some(tx));
            reporter.start("starting");
            for p in steps {
                reporter.advance(p, "step");
            }
            reporter.finish(terminal, "end");

            let events = drain(&mut rx);
            prop_assert_eq!(events[0].percent, 0);
            for pair in events.windows(2) {
                prop_assert!(pair[0].percent <= pair[1].percent);
            }
            let reached_100 = events.iter().any(|e| e.percent == 100);
            prop_assert_eq!(reached_100, terminal == WipeState::Completed);
            prop_assert_eq!(events.iter().filter(|e| e.kind.is_terminal()).count(), 1);
        }
    }
}
