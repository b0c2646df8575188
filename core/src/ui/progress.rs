use crate::executor::{ProgressEvent, ProgressKind};
use indicatif::{ProgressBar, ProgressDrawTarget, ProgressStyle};
use std::time::Duration;

pub(crate) const RUNNING_TEMPLATE: &str =
    "{spinner:.yellow} {prefix:.bold} [{bar:40.green/240}] {pos:>3}% {elapsed_precise} {wide_msg}";
pub(crate) const DONE_TEMPLATE: &str = "{prefix:.bold} [{bar:40.green/240}] {pos:>3}% {msg}";
pub(crate) const FAILED_TEMPLATE: &str = "{prefix:.bold} [{bar:40.red/240}] {pos:>3}% {msg}";

const TICK_CHARS: &str = "⠋⠙⠹⠸⠼⠴⠦⠧⠇⠏ ";
const PROGRESS_CHARS: &str = "█▉▊▋▌▍▎▏ ";

/// Terminal progress bar driven by executor progress events
pub struct WipeProgressBar {
    bar: ProgressBar,
    finished: bool,
}

impl WipeProgressBar {
    pub fn new(device: &str) -> Self {
        Self::with_target(device, ProgressDrawTarget::stderr())
    }

    /// Bar that draws nothing, for JSON output and tests
    pub fn hidden(device: &str) -> Self {
        Self::with_target(device, ProgressDrawTarget::hidden())
    }

    fn with_target(device: &str, target: ProgressDrawTarget) -> Self {
        let bar = ProgressBar::with_draw_target(Some(100), target);
        bar.set_style(style(RUNNING_TEMPLATE));
        bar.set_prefix(device.to_string());
        bar.enable_steady_tick(Duration::from_millis(120));
        Self {
            bar,
            finished: false,
        }
    }

    pub fn position(&self) -> u64 {
        self.bar.position()
    }

    pub fn is_finished(&self) -> bool {
        self.finished
    }

    /// Reflect one event; anything after the terminal event is ignored
    pub fn apply(&mut self, event: &ProgressEvent) {
        if self.finished {
            return;
        }

        self.bar.set_position(u64::from(event.percent.min(100)));
        self.bar.set_message(event.message.clone());

        if event.kind.is_terminal() {
            let template = match event.kind {
                ProgressKind::Completed => DONE_TEMPLATE,
                _ => FAILED_TEMPLATE,
            };
            self.bar.set_style(style(template));
            self.bar.finish_with_message(event.message.clone());
            self.finished = true;
        }
    }

    /// Drop the bar from the terminal without a final frame
    pub fn abandon(&mut self) {
        if !self.finished {
            self.bar.abandon();
            self.finished = true;
        }
    }
}

fn style(template: &str) -> ProgressStyle {
    ProgressStyle::with_template(template)
        .unwrap_or_else(|_| ProgressStyle::default_bar())
        .progress_chars(PROGRESS_CHARS)
        .tick_chars(TICK_CHARS)
}

/// Byte count in binary units, e.g. `1.50KB`
pub fn human_bytes(bytes: f64) -> String {
    let units = ["B", "KB", "MB", "GB", "TB"];
    if bytes <= 0.0 || bytes.is_nan() {
        return "0B".to_string();
    }
    let mut val = bytes;
    let mut i = 0usize;
    while val >= 1024.0 && i + 1 < units.len() {
        val /= 1024.0;
        i += 1;
    }
    format!("{:.2}{}", val, units[i])
}

/// Seconds as H:MM:SS, or M:SS under an hour
pub fn format_duration(secs: u64) -> String {
    let h = secs / 3600;
    let m = (secs % 3600) / 60;
    let s = secs % 60;
    if h > 0 {
        format!("{}:{:02}:{:02}", h, m, s)
    } else {
        format!("{}:{:02}", m, s)
    }
}
