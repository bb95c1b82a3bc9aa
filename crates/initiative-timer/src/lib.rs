// ABOUTME: Named countdown timers for initiative: turn timers, round timers, and similar.
// ABOUTME: Timers pause and resume against a monotonic clock and report transitions as events.

mod service;
mod timer;

pub use service::{TimerEvent, TimerService};
pub use timer::{TimerCallback, TimerError, TimerOptions, TimerSnapshot, TimerStatus};
