// Terminal presentation
//
// - progress.rs: indicatif bar fed by executor progress events
// - display.rs: device tables, check reports and record summaries

pub mod display;
pub mod progress;


pub use progress::{format_duration, human_bytes, WipeProgressBar};
