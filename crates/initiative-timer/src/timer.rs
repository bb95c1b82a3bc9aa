// ABOUTME: Countdown timer state machine: ready, running, paused, completed, cancelled.
// ABOUTME: Remaining time is always recomputed from a monotonic deadline, never by counting ticks.

use std::fmt;
use std::sync::Arc;
use std::time::Duration;

use thiserror::Error;
use tokio::time::Instant;

/// Errors returned by timer operations.
#[derive(Debug, Error, PartialEq, Eq)]
pub enum TimerError {
    #[error("timer not found: {0}")]
    NotFound(String),

    #[error("timer already exists: {0}")]
    AlreadyExists(String),

    #[error("timer duration must be greater than zero")]
    InvalidDuration,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum TimerStatus {
    Ready,
    Running,
    Paused,
    Completed,
    Cancelled,
}

impl TimerStatus {
    pub fn as_str(&self) -> &'static str {
        match self {
            TimerStatus::Ready => "ready",
            TimerStatus::Running => "running",
            TimerStatus::Paused => "paused",
            TimerStatus::Completed => "completed",
            TimerStatus::Cancelled => "cancelled",
        }
    }
}

impl fmt::Display for TimerStatus {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// Callback invoked with the timer's state at the moment of the event.
pub type TimerCallback = Arc<dyn Fn(&TimerSnapshot) + Send + Sync>;

/// How a timer counts down and who hears about it.
#[derive(Clone)]
pub struct TimerOptions {
    pub duration: Duration,
    /// Fire `on_warning` once when remaining time drops to this threshold.
    pub warning: Option<Duration>,
    pub poll_interval: Duration,
    pub on_tick: Option<TimerCallback>,
    pub on_warning: Option<TimerCallback>,
    pub on_complete: Option<TimerCallback>,
}

impl TimerOptions {
    pub const DEFAULT_POLL_INTERVAL: Duration = Duration::from_secs(1);

    pub fn new(duration: Duration) -> Self {
        Self {
            duration,
            warning: None,
            poll_interval: Self::DEFAULT_POLL_INTERVAL,
            on_tick: None,
            on_warning: None,
            on_complete: None,
        }
    }

    pub fn warning(mut self, threshold: Duration) -> Self {
        self.warning = Some(threshold);
        self
    }

    pub fn poll_interval(mut self, interval: Duration) -> Self {
        self.poll_interval = interval;
        self
    }

    pub fn on_tick(mut self, f: impl Fn(&TimerSnapshot) + Send + Sync + 'static) -> Self {
        self.on_tick = Some(Arc::new(f));
        self
    }

    pub fn on_warning(mut self, f: impl Fn(&TimerSnapshot) + Send + Sync + 'static) -> Self {
        self.on_warning = Some(Arc::new(f));
        self
    }

    pub fn on_complete(mut self, f: impl Fn(&TimerSnapshot) + Send + Sync + 'static) -> Self {
        self.on_complete = Some(Arc::new(f));
        self
    }
}

impl fmt::Debug for TimerOptions {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("TimerOptions")
            .field("duration", &self.duration)
            .field("warning", &self.warning)
            .field("poll_interval", &self.poll_interval)
            .field("on_tick", &self.on_tick.is_some())
            .field("on_warning", &self.on_warning.is_some())
            .field("on_complete", &self.on_complete.is_some())
            .finish()
    }
}

/// Point-in-time view of a timer.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct TimerSnapshot {
    pub id: String,
    pub duration: Duration,
    pub warning: Option<Duration>,
    pub remaining: Duration,
    pub status: TimerStatus,
    pub started_at: Option<Instant>,
    pub ends_at: Option<Instant>,
    pub warning_triggered: bool,
}

/// What a poll tick observed.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub(crate) struct TickOutcome {
    pub warned: bool,
    pub completed: bool,
}

pub(crate) struct Timer {
    id: String,
    options: TimerOptions,
    remaining: Duration,
    status: TimerStatus,
    started_at: Option<Instant>,
    ends_at: Option<Instant>,
    warning_triggered: bool,
    /// Bumped on every transition that starts or stops polling, so a stale
    /// poll task can tell it has been superseded.
    run: u64,
}

impl Timer {
    pub(crate) fn new(id: String, options: TimerOptions) -> Result<Self, TimerError> {
        if options.duration.is_zero() || options.poll_interval.is_zero() {
            return Err(TimerError::InvalidDuration);
        }
        Ok(Self {
            id,
            remaining: options.duration,
            options,
            status: TimerStatus::Ready,
            started_at: None,
            ends_at: None,
            warning_triggered: false,
            run: 0,
        })
    }

    pub(crate) fn options(&self) -> &TimerOptions {
        &self.options
    }

    pub(crate) fn status(&self) -> TimerStatus {
        self.status
    }

    pub(crate) fn run(&self) -> u64 {
        self.run
    }

    pub(crate) fn ends_at(&self) -> Option<Instant> {
        self.ends_at
    }

    pub(crate) fn snapshot(&self) -> TimerSnapshot {
        TimerSnapshot {
            id: self.id.clone(),
            duration: self.options.duration,
            warning: self.options.warning,
            remaining: self.remaining,
            status: self.status,
            started_at: self.started_at,
            ends_at: self.ends_at,
            warning_triggered: self.warning_triggered,
        }
    }

    fn begin_run(&mut self, now: Instant) {
        self.status = TimerStatus::Running;
        self.ends_at = Some(now + self.remaining);
        self.run += 1;
    }

    fn end_run(&mut self, status: TimerStatus) {
        self.status = status;
        self.ends_at = None;
        self.run += 1;
    }

    /// Returns false when already running. A paused timer continues where it
    /// stopped; a finished timer restarts from its full duration. Any start
    /// other than continuing a pause re-arms the warning.
    pub(crate) fn start(&mut self, now: Instant) -> bool {
        match self.status {
            TimerStatus::Running => return false,
            TimerStatus::Paused => {}
            TimerStatus::Completed | TimerStatus::Cancelled => {
                self.remaining = self.options.duration;
                self.warning_triggered = false;
            }
            TimerStatus::Ready => {
                if self.remaining.is_zero() {
                    self.remaining = self.options.duration;
                }
                self.warning_triggered = false;
            }
        }
        self.started_at = Some(now);
        self.begin_run(now);
        true
    }

    /// Capture the time left. Only a running timer can pause.
    pub(crate) fn pause(&mut self, now: Instant) -> bool {
        if self.status != TimerStatus::Running {
            return false;
        }
        if let Some(ends_at) = self.ends_at {
            self.remaining = ends_at.saturating_duration_since(now);
        }
        self.end_run(TimerStatus::Paused);
        true
    }

    /// Only a paused timer can resume.
    pub(crate) fn resume(&mut self, now: Instant) -> bool {
        if self.status != TimerStatus::Paused {
            return false;
        }
        self.begin_run(now);
        true
    }

    /// Stop counting. `remaining` keeps the value from the last tick.
    pub(crate) fn cancel(&mut self) -> bool {
        match self.status {
            TimerStatus::Completed | TimerStatus::Cancelled => false,
            _ => {
                self.end_run(TimerStatus::Cancelled);
                true
            }
        }
    }

    pub(crate) fn reset(&mut self) {
        self.remaining = self.options.duration;
        self.warning_triggered = false;
        self.started_at = None;
        self.end_run(TimerStatus::Ready);
    }

    /// Recompute the time left from the deadline.
    pub(crate) fn tick(&mut self, now: Instant) -> TickOutcome {
        let mut outcome = TickOutcome::default();
        let Some(ends_at) = self.ends_at else {
            return outcome;
        };
        if self.status != TimerStatus::Running {
            return outcome;
        }

        self.remaining = ends_at.saturating_duration_since(now);

        if !self.warning_triggered
            && let Some(threshold) = self.options.warning
            && self.remaining <= threshold
        {
            self.warning_triggered = true;
            outcome.warned = true;
        }

        if self.remaining.is_zero() {
            self.end_run(TimerStatus::Completed);
            outcome.completed = true;
        }
        outcome
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn secs(n: u64) -> Duration {
        Duration::from_secs(n)
    }

    fn timer(duration: u64) -> Timer {
        Timer::new("turn".to_string(), TimerOptions::new(secs(duration))).unwrap()
    }

    #[test]
    fn zero_duration_is_rejected() {
        let err = Timer::new("t".to_string(), TimerOptions::new(Duration::ZERO))
            .err()
            .unwrap();
        assert_eq!(err, TimerError::InvalidDuration);
    }

    #[test]
    fn start_sets_deadline_and_is_idempotent() {
        let t0 = Instant::now();
        let mut t = timer(10);

        assert!(t.start(t0));
        assert_eq!(t.status(), TimerStatus::Running);
        assert_eq!(t.ends_at(), Some(t0 + secs(10)));
        let run = t.run();

        assert!(!t.start(t0 + secs(2)));
        assert_eq!(t.ends_at(), Some(t0 + secs(10)));
        assert_eq!(t.run(), run);
    }

    #[test]
    fn remaining_is_recomputed_from_deadline() {
        let t0 = Instant::now();
        let mut t = timer(10);
        t.start(t0);

        // A single late tick sees the full elapsed time.
        t.tick(t0 + secs(6));
        assert_eq!(t.snapshot().remaining, secs(4));
    }

    #[test]
    fn paused_time_does_not_count_down() {
        let t0 = Instant::now();
        let mut t = timer(10);
        t.start(t0);

        assert!(t.pause(t0 + secs(3)));
        assert_eq!(t.snapshot().remaining, secs(7));
        assert!(t.ends_at().is_none());
        assert_eq!(t.tick(t0 + secs(5)), TickOutcome::default());

        assert!(t.resume(t0 + secs(8)));
        assert_eq!(t.ends_at(), Some(t0 + secs(15)));
        assert!(!t.tick(t0 + secs(14)).completed);
        assert!(t.tick(t0 + secs(15)).completed);
        assert_eq!(t.status(), TimerStatus::Completed);
    }

    #[test]
    fn pause_and_resume_require_matching_state() {
        let t0 = Instant::now();
        let mut t = timer(5);
        assert!(!t.pause(t0));
        assert!(!t.resume(t0));
        t.start(t0);
        assert!(!t.resume(t0));
    }

    #[test]
    fn warning_fires_once_per_run() {
        let t0 = Instant::now();
        let mut t = Timer::new("t".to_string(), TimerOptions::new(secs(10)).warning(secs(3))).unwrap();
        t.start(t0);

        assert!(!t.tick(t0 + secs(6)).warned);
        assert!(t.tick(t0 + secs(7)).warned);
        assert!(!t.tick(t0 + secs(8)).warned);

        // Continuing after a pause keeps the flag.
        t.pause(t0 + secs(8));
        t.resume(t0 + secs(9));
        assert!(!t.tick(t0 + secs(10)).warned);

        t.reset();
        assert!(!t.snapshot().warning_triggered);
        t.start(t0 + secs(20));
        assert!(t.tick(t0 + secs(28)).warned);
    }

    #[test]
    fn completed_timer_restarts_from_full_duration() {
        let t0 = Instant::now();
        let mut t = timer(4);
        t.start(t0);
        assert!(t.tick(t0 + secs(5)).completed);
        assert_eq!(t.snapshot().remaining, Duration::ZERO);

        assert!(t.start(t0 + secs(10)));
        assert_eq!(t.snapshot().remaining, secs(4));
        assert_eq!(t.ends_at(), Some(t0 + secs(14)));
    }

    #[test]
    fn cancel_keeps_last_computed_remaining() {
        let t0 = Instant::now();
        let mut t = timer(10);
        t.start(t0);
        t.tick(t0 + secs(2));

        assert!(t.cancel());
        let snap = t.snapshot();
        assert_eq!(snap.status, TimerStatus::Cancelled);
        assert_eq!(snap.remaining, secs(8));
        assert!(!t.cancel());
        assert_eq!(t.tick(t0 + secs(3)), TickOutcome::default());
    }

    #[test]
    fn reset_returns_to_ready() {
        let t0 = Instant::now();
        let mut t = timer(10);
        t.start(t0);
        t.tick(t0 + secs(4));
        t.reset();

        let snap = t.snapshot();
        assert_eq!(snap.status, TimerStatus::Ready);
        assert_eq!(snap.remaining, secs(10));
        assert!(snap.started_at.is_none());
        assert!(snap.ends_at.is_none());
    }
}
