// ABOUTME: TimerService owns a map of named countdown timers and one poll task per running timer.
// ABOUTME: Transitions are broadcast as TimerEvents; callbacks and broadcasts run outside the map lock.

use std::collections::HashMap;
use std::panic::{AssertUnwindSafe, catch_unwind};
use std::sync::{Arc, Mutex, MutexGuard};

use tokio::sync::broadcast;
use tokio::task::JoinHandle;
use tokio::time::Instant;
use ulid::Generator;

use crate::timer::{Timer, TimerCallback, TimerError, TimerOptions, TimerSnapshot};

/// A timer transition, carrying the timer's state right after it.
#[derive(Debug, Clone)]
pub enum TimerEvent {
    Started(TimerSnapshot),
    Tick(TimerSnapshot),
    Warning(TimerSnapshot),
    Paused(TimerSnapshot),
    Resumed(TimerSnapshot),
    Completed(TimerSnapshot),
    Cancelled(TimerSnapshot),
    Reset(TimerSnapshot),
}

impl TimerEvent {
    pub fn snapshot(&self) -> &TimerSnapshot {
        match self {
            TimerEvent::Started(s)
            | TimerEvent::Tick(s)
            | TimerEvent::Warning(s)
            | TimerEvent::Paused(s)
            | TimerEvent::Resumed(s)
            | TimerEvent::Completed(s)
            | TimerEvent::Cancelled(s)
            | TimerEvent::Reset(s) => s,
        }
    }

    pub fn name(&self) -> &'static str {
        match self {
            TimerEvent::Started(_) => "timerStarted",
            TimerEvent::Tick(_) => "timerTick",
            TimerEvent::Warning(_) => "timerWarning",
            TimerEvent::Paused(_) => "timerPaused",
            TimerEvent::Resumed(_) => "timerResumed",
            TimerEvent::Completed(_) => "timerCompleted",
            TimerEvent::Cancelled(_) => "timerCancelled",
            TimerEvent::Reset(_) => "timerReset",
        }
    }
}

struct Entry {
    timer: Timer,
    task: Option<JoinHandle<()>>,
}

impl Entry {
    fn stop_polling(&mut self) {
        if let Some(task) = self.task.take() {
            task.abort();
        }
    }
}

struct Shared {
    timers: Mutex<HashMap<String, Entry>>,
    events: broadcast::Sender<TimerEvent>,
}

impl Shared {
    fn lock(&self) -> MutexGuard<'_, HashMap<String, Entry>> {
        self.timers.lock().unwrap_or_else(|e| e.into_inner())
    }

    fn publish(&self, event: TimerEvent) {
        tracing::debug!("{} {}", event.name(), event.snapshot().id);
        // No subscribers is fine.
        let _ = self.events.send(event);
    }
}

/// Manages independently named countdown timers.
///
/// Starting or resuming a timer spawns its poll task, so those calls must be
/// made from within a tokio runtime. Dropping the service stops every poll.
pub struct TimerService {
    shared: Arc<Shared>,
    ids: Mutex<Generator>,
}

impl Default for TimerService {
    fn default() -> Self {
        Self::new()
    }
}

impl TimerService {
    pub fn new() -> Self {
        let (events, _) = broadcast::channel(256);
        Self {
            shared: Arc::new(Shared {
                timers: Mutex::new(HashMap::new()),
                events,
            }),
            ids: Mutex::new(Generator::new()),
        }
    }

    /// Receive every timer transition from now on.
    pub fn subscribe(&self) -> broadcast::Receiver<TimerEvent> {
        self.shared.events.subscribe()
    }

    /// Create a timer in the ready state. A ULID id is generated when none is
    /// given.
    pub fn create_timer(
        &self,
        id: Option<&str>,
        options: TimerOptions,
    ) -> Result<String, TimerError> {
        let id = match id {
            Some(id) => id.to_string(),
            None => self.next_id(),
        };
        let timer = Timer::new(id.clone(), options)?;

        let mut timers = self.shared.lock();
        if timers.contains_key(&id) {
            return Err(TimerError::AlreadyExists(id));
        }
        timers.insert(id.clone(), Entry { timer, task: None });
        tracing::debug!("timer {} created", id);
        Ok(id)
    }

    fn next_id(&self) -> String {
        self.ids
            .lock()
            .ok()
            .and_then(|mut generator| generator.generate().ok())
            .unwrap_or_else(ulid::Ulid::new)
            .to_string()
    }

    /// Start counting down. Starting a running timer changes nothing.
    pub fn start_timer(&self, id: &str) -> Result<TimerSnapshot, TimerError> {
        let (snapshot, started) = {
            let mut timers = self.shared.lock();
            let entry = timers
                .get_mut(id)
                .ok_or_else(|| TimerError::NotFound(id.to_string()))?;
            let started = entry.timer.start(Instant::now());
            if started {
                self.spawn_poll(id, entry);
            }
            (entry.timer.snapshot(), started)
        };
        if started {
            self.shared.publish(TimerEvent::Started(snapshot.clone()));
        }
        Ok(snapshot)
    }

    /// Pause a running timer. Other states are left unchanged.
    pub fn pause_timer(&self, id: &str) -> Result<TimerSnapshot, TimerError> {
        self.transition(id, |entry| {
            let paused = entry.timer.pause(Instant::now());
            if paused {
                entry.stop_polling();
            }
            paused.then(|| TimerEvent::Paused(entry.timer.snapshot()))
        })
    }

    /// Resume a paused timer. Other states are left unchanged.
    pub fn resume_timer(&self, id: &str) -> Result<TimerSnapshot, TimerError> {
        self.transition(id, |entry| {
            if !entry.timer.resume(Instant::now()) {
                return None;
            }
            self.spawn_poll(id, entry);
            Some(TimerEvent::Resumed(entry.timer.snapshot()))
        })
    }

    /// Stop a timer for good; `remaining` keeps its last computed value.
    pub fn cancel_timer(&self, id: &str) -> Result<TimerSnapshot, TimerError> {
        self.transition(id, |entry| {
            if !entry.timer.cancel() {
                return None;
            }
            entry.stop_polling();
            Some(TimerEvent::Cancelled(entry.timer.snapshot()))
        })
    }

    /// Return a timer to ready with its full duration.
    pub fn reset_timer(&self, id: &str) -> Result<TimerSnapshot, TimerError> {
        self.transition(id, |entry| {
            entry.stop_polling();
            entry.timer.reset();
            Some(TimerEvent::Reset(entry.timer.snapshot()))
        })
    }

    /// Stop and forget a timer, returning its final state.
    pub fn remove_timer(&self, id: &str) -> Result<TimerSnapshot, TimerError> {
        let mut entry = self
            .shared
            .lock()
            .remove(id)
            .ok_or_else(|| TimerError::NotFound(id.to_string()))?;
        entry.stop_polling();
        tracing::debug!("timer {} removed", id);
        Ok(entry.timer.snapshot())
    }

    pub fn get_timer(&self, id: &str) -> Option<TimerSnapshot> {
        self.shared.lock().get(id).map(|e| e.timer.snapshot())
    }

    /// Every timer, ordered by id.
    pub fn timers(&self) -> Vec<TimerSnapshot> {
        let mut all: Vec<TimerSnapshot> = self
            .shared
            .lock()
            .values()
            .map(|e| e.timer.snapshot())
            .collect();
        all.sort_by(|a, b| a.id.cmp(&b.id));
        all
    }

    /// Apply `f` under the lock and publish whatever event it produces once
    /// the lock is released.
    fn transition<F>(&self, id: &str, f: F) -> Result<TimerSnapshot, TimerError>
    where
        F: FnOnce(&mut Entry) -> Option<TimerEvent>,
    {
        let (snapshot, event) = {
            let mut timers = self.shared.lock();
            let entry = timers
                .get_mut(id)
                .ok_or_else(|| TimerError::NotFound(id.to_string()))?;
            let event = f(entry);
            (entry.timer.snapshot(), event)
        };
        if let Some(event) = event {
            self.shared.publish(event);
        }
        Ok(snapshot)
    }

    /// Replace the entry's poll task with one for its current run.
    fn spawn_poll(&self, id: &str, entry: &mut Entry) {
        entry.stop_polling();
        let Some(ends_at) = entry.timer.ends_at() else {
            return;
        };
        let run = entry.timer.run();
        let period = entry.timer.options().poll_interval;
        let shared = Arc::clone(&self.shared);
        let id = id.to_string();

        entry.task = Some(tokio::spawn(async move {
            loop {
                let wake = (Instant::now() + period).min(ends_at);
                tokio::time::sleep_until(wake).await;

                let (snapshot, outcome, options) = {
                    let mut timers = shared.lock();
                    let Some(entry) = timers.get_mut(&id) else {
                        return;
                    };
                    if entry.timer.run() != run {
                        return;
                    }
                    let outcome = entry.timer.tick(Instant::now());
                    if outcome.completed {
                        entry.task = None;
                    }
                    (entry.timer.snapshot(), outcome, entry.timer.options().clone())
                };

                invoke(&options.on_tick, &snapshot, "tick");
                shared.publish(TimerEvent::Tick(snapshot.clone()));

                if outcome.warned {
                    invoke(&options.on_warning, &snapshot, "warning");
                    shared.publish(TimerEvent::Warning(snapshot.clone()));
                }

                if outcome.completed {
                    tracing::info!("timer {} completed", snapshot.id);
                    invoke(&options.on_complete, &snapshot, "completion");
                    shared.publish(TimerEvent::Completed(snapshot));
                    return;
                }
            }
        }));
    }
}

impl Drop for TimerService {
    fn drop(&mut self) {
        for entry in self.shared.lock().values_mut() {
            entry.stop_polling();
        }
    }
}

fn invoke(callback: &Option<TimerCallback>, snapshot: &TimerSnapshot, what: &str) {
    if let Some(callback) = callback
        && catch_unwind(AssertUnwindSafe(|| callback(snapshot))).is_err()
    {
        tracing::warn!("timer {} {} callback panicked", snapshot.id, what);
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::timer::TimerStatus;
    use std::sync::atomic::{AtomicUsize, Ordering};
    use std::time::Duration;
    use tokio::time::sleep;

    fn secs(n: u64) -> Duration {
        Duration::from_secs(n)
    }

    fn millis(n: u64) -> Duration {
        Duration::from_millis(n)
    }

    fn counter() -> (Arc<AtomicUsize>, impl Fn(&TimerSnapshot) + Send + Sync + 'static) {
        let count = Arc::new(AtomicUsize::new(0));
        let inner = Arc::clone(&count);
        (count, move |_: &TimerSnapshot| {
            inner.fetch_add(1, Ordering::SeqCst);
        })
    }

    #[tokio::test(start_paused = true)]
    async fn create_generates_ids_and_rejects_duplicates() {
        let service = TimerService::new();
        let a = service.create_timer(None, TimerOptions::new(secs(5))).unwrap();
        let b = service.create_timer(None, TimerOptions::new(secs(5))).unwrap();
        assert_ne!(a, b);

        service.create_timer(Some("turn"), TimerOptions::new(secs(5))).unwrap();
        let err = service
            .create_timer(Some("turn"), TimerOptions::new(secs(9)))
            .unwrap_err();
        assert_eq!(err, TimerError::AlreadyExists("turn".to_string()));
        assert_eq!(service.timers().len(), 3);

        let err = service
            .create_timer(Some("zero"), TimerOptions::new(Duration::ZERO))
            .unwrap_err();
        assert_eq!(err, TimerError::InvalidDuration);
    }

    #[tokio::test(start_paused = true)]
    async fn unknown_timer_is_not_found() {
        let service = TimerService::new();
        assert_eq!(
            service.start_timer("ghost").unwrap_err(),
            TimerError::NotFound("ghost".to_string())
        );
        assert!(service.get_timer("ghost").is_none());
        assert!(service.remove_timer("ghost").is_err());
    }

    #[tokio::test(start_paused = true)]
    async fn countdown_completes_and_fires_callbacks_once() {
        let service = TimerService::new();
        let (ticks, on_tick) = counter();
        let (warnings, on_warning) = counter();
        let (completions, on_complete) = counter();
        service
            .create_timer(
                Some("turn"),
                TimerOptions::new(secs(5))
                    .warning(secs(2))
                    .on_tick(on_tick)
                    .on_warning(on_warning)
                    .on_complete(on_complete),
            )
            .unwrap();

        service.start_timer("turn").unwrap();
        sleep(millis(3500)).await;
        let snap = service.get_timer("turn").unwrap();
        assert_eq!(snap.status, TimerStatus::Running);
        assert_eq!(snap.remaining, secs(2));
        assert_eq!(warnings.load(Ordering::SeqCst), 1);

        sleep(secs(2)).await;
        let snap = service.get_timer("turn").unwrap();
        assert_eq!(snap.status, TimerStatus::Completed);
        assert_eq!(snap.remaining, Duration::ZERO);
        assert_eq!(ticks.load(Ordering::SeqCst), 5);
        assert_eq!(warnings.load(Ordering::SeqCst), 1);
        assert_eq!(completions.load(Ordering::SeqCst), 1);

        // No auto-restart.
        sleep(secs(10)).await;
        assert_eq!(completions.load(Ordering::SeqCst), 1);
        assert_eq!(ticks.load(Ordering::SeqCst), 5);
    }

    #[tokio::test(start_paused = true)]
    async fn paused_time_does_not_count_down() {
        let service = TimerService::new();
        let (completions, on_complete) = counter();
        service
            .create_timer(Some("turn"), TimerOptions::new(secs(10)).on_complete(on_complete))
            .unwrap();

        service.start_timer("turn").unwrap();
        sleep(secs(3)).await;
        let paused = service.pause_timer("turn").unwrap();
        assert_eq!(paused.status, TimerStatus::Paused);
        assert_eq!(paused.remaining, secs(7));

        sleep(secs(5)).await;
        assert_eq!(service.get_timer("turn").unwrap().remaining, secs(7));

        service.resume_timer("turn").unwrap();
        sleep(millis(6500)).await;
        assert_eq!(completions.load(Ordering::SeqCst), 0);
        assert_eq!(service.get_timer("turn").unwrap().status, TimerStatus::Running);

        sleep(secs(1)).await;
        assert_eq!(completions.load(Ordering::SeqCst), 1);
        assert_eq!(service.get_timer("turn").unwrap().status, TimerStatus::Completed);
    }

    #[tokio::test(start_paused = true)]
    async fn start_is_idempotent_while_running() {
        let service = TimerService::new();
        service.create_timer(Some("turn"), TimerOptions::new(secs(10))).unwrap();

        let first = service.start_timer("turn").unwrap();
        sleep(secs(4)).await;
        let second = service.start_timer("turn").unwrap();
        assert_eq!(second.ends_at, first.ends_at);
        assert_eq!(second.status, TimerStatus::Running);
    }

    #[tokio::test(start_paused = true)]
    async fn cancel_stops_polling_immediately() {
        let service = TimerService::new();
        let (ticks, on_tick) = counter();
        let (completions, on_complete) = counter();
        service
            .create_timer(
                Some("turn"),
                TimerOptions::new(secs(10)).on_tick(on_tick).on_complete(on_complete),
            )
            .unwrap();

        service.start_timer("turn").unwrap();
        sleep(millis(2500)).await;
        let cancelled = service.cancel_timer("turn").unwrap();
        assert_eq!(cancelled.status, TimerStatus::Cancelled);
        assert_eq!(cancelled.remaining, secs(8));

        sleep(secs(20)).await;
        assert_eq!(ticks.load(Ordering::SeqCst), 2);
        assert_eq!(completions.load(Ordering::SeqCst), 0);
        assert_eq!(service.get_timer("turn").unwrap().remaining, secs(8));
    }

    #[tokio::test(start_paused = true)]
    async fn completed_timer_can_run_again() {
        let service = TimerService::new();
        let (completions, on_complete) = counter();
        service
            .create_timer(Some("round"), TimerOptions::new(secs(2)).on_complete(on_complete))
            .unwrap();

        service.start_timer("round").unwrap();
        sleep(millis(2500)).await;
        assert_eq!(completions.load(Ordering::SeqCst), 1);

        let restarted = service.start_timer("round").unwrap();
        assert_eq!(restarted.remaining, secs(2));
        sleep(millis(2500)).await;
        assert_eq!(completions.load(Ordering::SeqCst), 2);
    }

    #[tokio::test(start_paused = true)]
    async fn reset_and_remove() {
        let service = TimerService::new();
        service.create_timer(Some("turn"), TimerOptions::new(secs(10))).unwrap();
        service.start_timer("turn").unwrap();
        sleep(millis(4500)).await;

        let reset = service.reset_timer("turn").unwrap();
        assert_eq!(reset.status, TimerStatus::Ready);
        assert_eq!(reset.remaining, secs(10));
        sleep(secs(3)).await;
        assert_eq!(service.get_timer("turn").unwrap().remaining, secs(10));

        let removed = service.remove_timer("turn").unwrap();
        assert_eq!(removed.id, "turn");
        assert!(service.timers().is_empty());
    }

    #[tokio::test(start_paused = true)]
    async fn transitions_are_broadcast() {
        let service = TimerService::new();
        let mut rx = service.subscribe();
        service
            .create_timer(Some("turn"), TimerOptions::new(secs(2)).warning(secs(1)))
            .unwrap();

        service.start_timer("turn").unwrap();
        sleep(millis(2500)).await;

        let mut names = Vec::new();
        while let Ok(event) = rx.try_recv() {
            assert_eq!(event.snapshot().id, "turn");
            names.push(event.name());
        }
        assert_eq!(
            names,
            vec!["timerStarted", "timerTick", "timerWarning", "timerTick", "timerCompleted"]
        );
    }

    #[tokio::test(start_paused = true)]
    async fn panicking_callback_does_not_stop_the_timer() {
        let service = TimerService::new();
        let (completions, on_complete) = counter();
        service
            .create_timer(
                Some("turn"),
                TimerOptions::new(secs(2))
                    .on_tick(|_| panic!("bad tick handler"))
                    .on_complete(on_complete),
            )
            .unwrap();

        service.start_timer("turn").unwrap();
        sleep(millis(2500)).await;
        assert_eq!(completions.load(Ordering::SeqCst), 1);
    }

    #[tokio::test(start_paused = true)]
    async fn timers_run_independently() {
        let service = TimerService::new();
        service.create_timer(Some("a"), TimerOptions::new(secs(3))).unwrap();
        service.create_timer(Some("b"), TimerOptions::new(secs(6))).unwrap();
        service.start_timer("a").unwrap();
        service.start_timer("b").unwrap();

        sleep(millis(3500)).await;
        let all = service.timers();
        assert_eq!(all[0].id, "a");
        assert_eq!(all[0].status, TimerStatus::Completed);
        assert_eq!(all[1].status, TimerStatus::Running);
    }
}
