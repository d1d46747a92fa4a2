//! The engine behind the [`Countdown`](crate::widgets::Countdown) widget.

use std::fmt;
use std::ops::ControlFlow;
use std::sync::{Arc, Weak};
use std::time::{Duration, SystemTime};

use cushy::reactive::value::{CallbackHandle, Destination, Dynamic, IntoValue, Source, Value};
use parking_lot::Mutex;

use crate::tick::{Lifecycle, Ticker};
use crate::time::{remaining_until, Clock, SystemClock, TimeComponents};

/// The default interval between countdown updates.
pub const DEFAULT_TICK_PERIOD: Duration = Duration::from_secs(1);

/// The result of observing a [`CountdownState`] at a point in time.
#[derive(Clone, Copy, Debug, Eq, PartialEq)]
pub enum TickOutcome {
    /// Time remains until the target.
    Running(Duration),
    /// The target was reached for the first time. Completion should be
    /// signaled.
    Completed,
    /// The target was reached and completion was already signaled.
    AlreadyCompleted,
}

/// The time-keeping state of a single countdown session.
///
/// This type performs no scheduling; it answers what a countdown shows at a
/// given instant and guards completion so that it is reported once.
#[derive(Clone, Debug, Eq, PartialEq)]
pub struct CountdownState {
    target: SystemTime,
    show_days: bool,
    completed: bool,
}

impl CountdownState {
    /// Returns a new session counting down to `target`.
    #[must_use]
    pub const fn new(target: SystemTime, show_days: bool) -> Self {
        Self {
            target,
            show_days,
            completed: false,
        }
    }

    /// Returns the instant being counted down to.
    #[must_use]
    pub const fn target(&self) -> SystemTime {
        self.target
    }

    /// Returns true if days are displayed separately from hours.
    #[must_use]
    pub const fn show_days(&self) -> bool {
        self.show_days
    }

    /// Sets whether days are displayed separately from hours.
    pub fn set_show_days(&mut self, show_days: bool) {
        self.show_days = show_days;
    }

    /// Returns true once completion has been reported.
    #[must_use]
    pub const fn is_completed(&self) -> bool {
        self.completed
    }

    /// Returns the time remaining at `now`, clamped to zero.
    #[must_use]
    pub fn remaining(&self, now: SystemTime) -> Duration {
        remaining_until(self.target, now)
    }

    /// Returns the displayed components at `now`.
    #[must_use]
    pub fn components(&self, now: SystemTime) -> TimeComponents {
        TimeComponents::from_remaining(self.remaining(now), self.show_days)
    }

    /// Observes the countdown at `now`.
    ///
    /// The first observation of a non-positive duration returns
    /// [`TickOutcome::Completed`]; all later ones return
    /// [`TickOutcome::AlreadyCompleted`] until [`retarget`](Self::retarget)
    /// is called.
    pub fn tick(&mut self, now: SystemTime) -> TickOutcome {
        let remaining = self.remaining(now);
        if !remaining.is_zero() {
            TickOutcome::Running(remaining)
        } else if self.completed {
            TickOutcome::AlreadyCompleted
        } else {
            self.completed = true;
            TickOutcome::Completed
        }
    }

    /// Starts a new session counting down to `target`.
    pub fn retarget(&mut self, target: SystemTime) {
        self.target = target;
        self.completed = false;
    }
}

type CompletionFn = Box<dyn FnMut() + Send>;

/// A countdown to a target instant that republishes its remaining time every
/// tick and signals completion once.
///
/// The timer does nothing until [`start`](Self::start) is called. Dropping it
/// tears it down.
pub struct CountdownTimer {
    data: Arc<TimerData>,
}

impl CountdownTimer {
    /// Returns a new, stopped timer counting down to `target`.
    ///
    /// If `target` is a [`Dynamic`], changes to it restart the countdown
    /// while the timer is running.
    pub fn new(target: impl IntoValue<SystemTime>) -> Self {
        let target = target.into_value();
        let countdown = CountdownState::new(target.get(), true);
        let clock: Arc<dyn Clock> = Arc::new(SystemClock);
        let remaining = countdown.remaining(clock.now());
        let data = Arc::new(TimerData {
            remaining: Dynamic::new(remaining),
            components: Dynamic::new(TimeComponents::from_remaining(remaining, true)),
            target,
            state: Mutex::new(TimerState {
                countdown,
                clock,
                period: DEFAULT_TICK_PERIOD,
                lifecycle: Lifecycle::Disposed,
                schedule: 0,
                scheduled: false,
                ticker: None,
                on_complete: None,
                target_changed: None,
            }),
        });
        Self { data }
    }

    /// Sets whether days are displayed separately from hours and returns
    /// self.
    #[must_use]
    pub fn show_days(self, show_days: bool) -> Self {
        self.data.state.lock().countdown.set_show_days(show_days);
        self.data.refresh();
        self
    }

    /// Sets the interval between updates and returns self.
    ///
    /// The default is [`DEFAULT_TICK_PERIOD`].
    #[must_use]
    pub fn tick_every(self, period: Duration) -> Self {
        self.data.state.lock().period = period;
        self
    }

    /// Sets the clock used to read the current time and returns self.
    #[must_use]
    pub fn clock(self, clock: impl Clock) -> Self {
        self.data.state.lock().clock = Arc::new(clock);
        self.data.refresh();
        self
    }

    /// Sets the function invoked when the countdown reaches its target and
    /// returns self.
    ///
    /// `on_complete` is invoked at most once per session, on the timer's
    /// background thread.
    #[must_use]
    pub fn on_complete<F>(self, on_complete: F) -> Self
    where
        F: FnMut() + Send + 'static,
    {
        self.data.state.lock().on_complete = Some(Box::new(on_complete));
        self
    }

    /// Returns the remaining time, updated every tick.
    #[must_use]
    pub fn remaining(&self) -> Dynamic<Duration> {
        self.data.remaining.clone()
    }

    /// Returns the displayed components, updated every tick.
    #[must_use]
    pub fn components(&self) -> Dynamic<TimeComponents> {
        self.data.components.clone()
    }

    /// Returns the instant currently being counted down to.
    #[must_use]
    pub fn target(&self) -> SystemTime {
        self.data.state.lock().countdown.target()
    }

    /// Returns true if days are displayed separately from hours.
    #[must_use]
    pub fn shows_days(&self) -> bool {
        self.data.state.lock().countdown.show_days()
    }

    /// Returns true once completion has been signaled for the current
    /// session.
    #[must_use]
    pub fn is_complete(&self) -> bool {
        self.data.state.lock().countdown.is_completed()
    }

    /// Returns true while ticks are scheduled.
    #[must_use]
    pub fn is_running(&self) -> bool {
        let state = self.data.state.lock();
        state.lifecycle == Lifecycle::Active && state.scheduled
    }

    /// Starts a new session.
    ///
    /// The remaining time is published immediately and then once per tick.
    /// Completion is never signaled from this call: a target in the past
    /// completes on the first tick.
    pub fn start(&self) {
        let target = self.data.target.get();
        let mut state = self.data.state.lock();
        state.lifecycle = Lifecycle::Active;
        state.countdown.retarget(target);
        let now = state.clock.now();
        let remaining = state.countdown.remaining(now);
        let components = state.countdown.components(now);

        let previous_ticker = self.data.schedule(&mut state);
        let previous_observer = match &self.data.target {
            Value::Dynamic(target) => state
                .target_changed
                .replace(Self::observe_target(&self.data, target)),
            Value::Constant(_) => state.target_changed.take(),
        };
        let period = state.period;
        drop(state);

        // Cancelling waits for an in-flight tick, which requires the state
        // lock.
        drop(previous_ticker);
        drop(previous_observer);

        tracing::debug!(?target, ?remaining, ?period, "countdown started");
        self.data.publish(remaining, components);
    }

    fn observe_target(data: &Arc<TimerData>, target: &Dynamic<SystemTime>) -> CallbackHandle {
        let data = Arc::downgrade(data);
        target.for_each_subsequent(move |target| {
            if let Some(data) = data.upgrade() {
                data.retarget(*target);
            }
        })
    }

    /// Restarts the countdown towards `target`.
    ///
    /// Completion is re-armed, the new remaining time is published
    /// immediately, and the tick schedule restarts from zero elapsed time.
    pub fn retarget(&self, target: SystemTime) {
        self.data.retarget(target);
    }

    /// Stops the countdown and releases its observers.
    ///
    /// After this returns, no tick runs and no completion is signaled until
    /// the timer is started again. Calling this on a timer that was never
    /// started, or that has already completed, does nothing.
    pub fn teardown(&self) {
        let mut state = self.data.state.lock();
        let was_active = state.lifecycle == Lifecycle::Active;
        state.lifecycle = Lifecycle::Disposed;
        state.scheduled = false;
        let ticker = state.ticker.take();
        let observer = state.target_changed.take();
        drop(state);

        drop(ticker);
        drop(observer);
        if was_active {
            tracing::debug!("countdown torn down");
        }
    }
}

impl Drop for CountdownTimer {
    fn drop(&mut self) {
        self.teardown();
    }
}

impl fmt::Debug for CountdownTimer {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let state = self.data.state.lock();
        f.debug_struct("CountdownTimer")
            .field("countdown", &state.countdown)
            .field("lifecycle", &state.lifecycle)
            .field("period", &state.period)
            .field("ticker", &state.ticker)
            .finish_non_exhaustive()
    }
}

struct TimerData {
    remaining: Dynamic<Duration>,
    components: Dynamic<TimeComponents>,
    target: Value<SystemTime>,
    state: Mutex<TimerState>,
}

struct TimerState {
    countdown: CountdownState,
    clock: Arc<dyn Clock>,
    period: Duration,
    lifecycle: Lifecycle,
    /// Identifies the ticker whose ticks are accepted.
    schedule: u64,
    /// True until the current schedule has decided to stop.
    scheduled: bool,
    ticker: Option<Ticker>,
    on_complete: Option<CompletionFn>,
    target_changed: Option<CallbackHandle>,
}

impl TimerData {
    /// Replaces the running schedule with a new one, returning the previous
    /// ticker so that it can be dropped after the state lock is released.
    fn schedule(self: &Arc<Self>, state: &mut TimerState) -> Option<Ticker> {
        state.schedule = state.schedule.wrapping_add(1);
        state.scheduled = true;
        let schedule = state.schedule;
        let data: Weak<Self> = Arc::downgrade(self);
        let ticker = Ticker::spawn(state.period, move || {
            data.upgrade()
                .map_or(ControlFlow::Break(()), |data| data.on_tick(schedule))
        });
        state.ticker.replace(ticker)
    }

    fn publish(&self, remaining: Duration, components: TimeComponents) {
        self.remaining.set(remaining);
        self.components.set(components);
    }

    fn refresh(&self) {
        let state = self.state.lock();
        let now = state.clock.now();
        let remaining = state.countdown.remaining(now);
        let components = state.countdown.components(now);
        drop(state);
        self.publish(remaining, components);
    }

    fn on_tick(&self, schedule: u64) -> ControlFlow<()> {
        let state = self.state.lock();
        if !state.accepts(schedule) {
            return ControlFlow::Break(());
        }
        // Read unlocked. A teardown may run while the clock is read.
        let clock = state.clock.clone();
        drop(state);
        let now = clock.now();

        let mut state = self.state.lock();
        if !state.accepts(schedule) {
            return ControlFlow::Break(());
        }
        match state.countdown.tick(now) {
            TickOutcome::Running(remaining) => {
                let components = state.countdown.components(now);
                drop(state);
                tracing::trace!(?remaining, "countdown tick");
                self.publish(remaining, components);
                ControlFlow::Continue(())
            }
            TickOutcome::Completed => {
                let mut on_complete = state.on_complete.take();
                drop(state);

                self.publish(Duration::ZERO, TimeComponents::default());
                tracing::debug!("countdown completed");
                if let Some(on_complete) = &mut on_complete {
                    on_complete();
                }

                let mut state = self.state.lock();
                if state.on_complete.is_none() {
                    state.on_complete = on_complete;
                }
                if !state.accepts(schedule) {
                    ControlFlow::Break(())
                } else if state.countdown.is_completed() {
                    state.scheduled = false;
                    ControlFlow::Break(())
                } else {
                    // Retargeted while completing. The zero published above may
                    // have replaced the new session's remaining time.
                    let now = state.clock.now();
                    let remaining = state.countdown.remaining(now);
                    let components = state.countdown.components(now);
                    drop(state);
                    self.publish(remaining, components);
                    ControlFlow::Continue(())
                }
            }
            TickOutcome::AlreadyCompleted => {
                state.scheduled = false;
                ControlFlow::Break(())
            }
        }
    }

    fn retarget(self: &Arc<Self>, target: SystemTime) {
        let mut state = self.state.lock();
        state.countdown.retarget(target);
        let now = state.clock.now();
        let remaining = state.countdown.remaining(now);
        let components = state.countdown.components(now);

        let mut stopped_ticker = None;
        if state.lifecycle == Lifecycle::Active {
            if state.scheduled {
                if let Some(ticker) = &state.ticker {
                    ticker.restart();
                }
            } else {
                // The previous schedule ended when the last session completed.
                stopped_ticker = self.schedule(&mut state);
            }
        }
        drop(state);
        drop(stopped_ticker);

        tracing::debug!(?target, ?remaining, "countdown retargeted");
        self.publish(remaining, components);
    }
}

impl TimerState {
    fn accepts(&self, schedule: u64) -> bool {
        self.lifecycle == Lifecycle::Active && self.schedule == schedule
    }
}

#[cfg(test)]
mod tests {
    use std::sync::atomic::{AtomicUsize, Ordering};
    use std::sync::Arc;
    use std::time::{Duration, SystemTime};

    use cushy::reactive::value::{Destination, Dynamic, Source};
    use parking_lot::{Condvar, Mutex};

    use super::{CountdownState, CountdownTimer, TickOutcome};
    use crate::time::{Clock, ManualClock, TimeComponents, UnitLabels};

    #[test]
    fn completes_once() {
        let now = SystemTime::now();
        let mut state = CountdownState::new(now + Duration::from_secs(2), true);
        assert_eq!(state.tick(now), TickOutcome::Running(Duration::from_secs(2)));
        let later = now + Duration::from_secs(3);
        assert_eq!(state.tick(later), TickOutcome::Completed);
        assert!(state.is_completed());
        assert_eq!(state.tick(later), TickOutcome::AlreadyCompleted);
        assert_eq!(
            state.tick(later + Duration::from_secs(1)),
            TickOutcome::AlreadyCompleted
        );
    }

    #[test]
    fn exact_target_is_expired() {
        let now = SystemTime::now();
        let mut state = CountdownState::new(now, false);
        assert_eq!(state.remaining(now), Duration::ZERO);
        assert_eq!(state.tick(now), TickOutcome::Completed);
    }

    #[test]
    fn retarget_rearms_completion() {
        let now = SystemTime::now();
        let mut state = CountdownState::new(now, true);
        assert_eq!(state.tick(now), TickOutcome::Completed);

        state.retarget(now + Duration::from_secs(90));
        assert!(!state.is_completed());
        let components = state.components(now);
        assert_eq!(components.minutes, 1);
        assert_eq!(components.seconds, 30);

        assert_eq!(
            state.tick(now + Duration::from_secs(90)),
            TickOutcome::Completed
        );
    }

    const SAMPLE: Duration = Duration::from_secs(3 * 86_400 + 5 * 3_600 + 30 * 60 + 45);

    fn epoch() -> SystemTime {
        SystemTime::UNIX_EPOCH + Duration::from_secs(1_700_000_000)
    }

    fn wait_for(mut condition: impl FnMut() -> bool) -> bool {
        for _ in 0..500 {
            if condition() {
                return true;
            }
            std::thread::sleep(Duration::from_millis(10));
        }
        condition()
    }

    #[test]
    fn start_publishes_components() {
        let now = epoch();
        let timer = CountdownTimer::new(now + SAMPLE)
            .clock(ManualClock::new(now))
            .tick_every(Duration::from_secs(3_600));
        timer.start();

        let components = timer.components().get();
        assert_eq!(
            components,
            TimeComponents {
                days: 3,
                hours: 5,
                minutes: 30,
                seconds: 45,
            }
        );
        assert_eq!(
            components.inline(&UnitLabels::default(), true),
            "3d 5h 30m 45s"
        );
        assert_eq!(timer.remaining().get(), SAMPLE);
        assert!(timer.is_running());
        assert!(!timer.is_complete());
    }

    #[test]
    fn completion_fires_once() {
        let now = epoch();
        let clock = ManualClock::new(now);
        let completions = Arc::new(AtomicUsize::new(0));
        let timer = CountdownTimer::new(now + Duration::from_secs(2))
            .clock(clock.clone())
            .tick_every(Duration::from_millis(5))
            .on_complete({
                let completions = completions.clone();
                move || {
                    completions.fetch_add(1, Ordering::SeqCst);
                }
            });
        timer.start();
        assert_eq!(completions.load(Ordering::SeqCst), 0);

        clock.advance(Duration::from_secs(3));
        assert!(wait_for(|| completions.load(Ordering::SeqCst) > 0));
        std::thread::sleep(Duration::from_millis(50));

        assert_eq!(completions.load(Ordering::SeqCst), 1);
        assert_eq!(timer.remaining().get(), Duration::ZERO);
        assert!(timer.components().get().is_zero());
        assert!(timer.is_complete());
        assert!(wait_for(|| !timer.is_running()));
    }

    #[test]
    fn past_target_completes_on_first_tick() {
        let now = epoch();
        let completions = Arc::new(AtomicUsize::new(0));
        let timer = CountdownTimer::new(now - Duration::from_secs(10))
            .clock(ManualClock::new(now))
            .tick_every(Duration::from_millis(5))
            .on_complete({
                let completions = completions.clone();
                move || {
                    completions.fetch_add(1, Ordering::SeqCst);
                }
            });
        timer.start();
        assert_eq!(timer.remaining().get(), Duration::ZERO);
        assert!(wait_for(|| completions.load(Ordering::SeqCst) == 1));
    }

    #[test]
    fn teardown_prevents_completion() {
        let now = epoch();
        let completions = Arc::new(AtomicUsize::new(0));
        let timer = CountdownTimer::new(now - Duration::from_secs(1))
            .clock(ManualClock::new(now))
            .tick_every(Duration::from_millis(50))
            .on_complete({
                let completions = completions.clone();
                move || {
                    completions.fetch_add(1, Ordering::SeqCst);
                }
            });
        timer.start();
        timer.teardown();
        timer.teardown();
        std::thread::sleep(Duration::from_millis(150));

        assert_eq!(completions.load(Ordering::SeqCst), 0);
        assert!(!timer.is_running());
    }

    #[test]
    fn teardown_before_start_is_harmless() {
        let timer = CountdownTimer::new(epoch());
        timer.teardown();
        assert!(!timer.is_running());
    }

    #[test]
    fn retarget_updates_immediately() {
        let now = epoch();
        let timer = CountdownTimer::new(now + SAMPLE)
            .clock(ManualClock::new(now))
            .tick_every(Duration::from_secs(3_600));
        timer.start();

        timer.retarget(now + Duration::from_secs(61));
        assert_eq!(
            timer.components().get(),
            TimeComponents {
                days: 0,
                hours: 0,
                minutes: 1,
                seconds: 1,
            }
        );
        assert_eq!(timer.target(), now + Duration::from_secs(61));
    }

    #[test]
    fn dynamic_target_is_observed() {
        let now = epoch();
        let target = Dynamic::new(now + SAMPLE);
        let timer = CountdownTimer::new(target.clone())
            .clock(ManualClock::new(now))
            .tick_every(Duration::from_secs(3_600));
        timer.start();

        let remaining = timer.remaining().into_reader();
        target.set(now + Duration::from_secs(90));
        remaining.block_until_updated();
        assert_eq!(remaining.get(), Duration::from_secs(90));
    }

    #[test]
    fn hours_fold_without_days() {
        let now = epoch();
        let timer = CountdownTimer::new(now + SAMPLE)
            .clock(ManualClock::new(now))
            .show_days(false)
            .tick_every(Duration::from_secs(3_600));
        timer.start();

        let components = timer.components().get();
        assert_eq!(components.days, 0);
        assert_eq!(components.hours, 77);
        assert_eq!(
            components.inline(&UnitLabels::default(), false),
            "77h 30m 45s"
        );
    }

    /// A clock that can be made to block every caller until it is released.
    #[derive(Debug, Default)]
    struct GatedClock {
        inner: ManualClock,
        gate: Mutex<Gate>,
        sync: Condvar,
    }

    #[derive(Debug, Default)]
    struct Gate {
        closed: bool,
        waiting: usize,
    }

    impl GatedClock {
        fn new(now: SystemTime) -> Arc<Self> {
            Arc::new(Self {
                inner: ManualClock::new(now),
                ..Self::default()
            })
        }

        fn close(&self) {
            self.gate.lock().closed = true;
        }

        fn open(&self) {
            self.gate.lock().closed = false;
            self.sync.notify_all();
        }

        fn has_waiters(&self) -> bool {
            self.gate.lock().waiting > 0
        }
    }

    impl Clock for Arc<GatedClock> {
        fn now(&self) -> SystemTime {
            let mut gate = self.gate.lock();
            gate.waiting += 1;
            self.sync.notify_all();
            while gate.closed {
                self.sync.wait(&mut gate);
            }
            gate.waiting -= 1;
            drop(gate);
            self.inner.now()
        }
    }

    fn counter() -> (Arc<AtomicUsize>, impl FnMut() + Send + 'static) {
        let count = Arc::new(AtomicUsize::new(0));
        let increment = {
            let count = count.clone();
            move || {
                count.fetch_add(1, Ordering::SeqCst);
            }
        };
        (count, increment)
    }

    #[test]
    fn teardown_during_tick_prevents_completion() {
        let now = epoch();
        let clock = GatedClock::new(now);
        let (completions, on_complete) = counter();
        let timer = CountdownTimer::new(now - Duration::from_secs(1))
            .clock(clock.clone())
            .tick_every(Duration::from_millis(200))
            .on_complete(on_complete);
        timer.start();
        clock.close();

        // The first tick blocks reading the clock.
        assert!(wait_for(|| clock.has_waiters()));
        std::thread::scope(|scope| {
            let tearing_down = scope.spawn(|| timer.teardown());
            assert!(wait_for(|| !timer.is_running()));
            clock.open();
            assert!(tearing_down.join().is_ok());
        });

        std::thread::sleep(Duration::from_millis(50));
        assert_eq!(completions.load(Ordering::SeqCst), 0);
        assert!(!timer.is_complete());
    }

    #[test]
    fn retarget_after_completion_resumes_ticking() {
        let now = epoch();
        let clock = ManualClock::new(now);
        let (completions, on_complete) = counter();
        let timer = CountdownTimer::new(now + Duration::from_secs(1))
            .clock(clock.clone())
            .tick_every(Duration::from_millis(5))
            .on_complete(on_complete);
        timer.start();
        clock.advance(Duration::from_secs(2));
        assert!(wait_for(|| completions.load(Ordering::SeqCst) == 1));
        assert!(wait_for(|| !timer.is_running()));

        timer.retarget(now + Duration::from_secs(10));
        assert!(timer.is_running());
        assert!(!timer.is_complete());
        assert_eq!(timer.remaining().get(), Duration::from_secs(8));

        clock.advance(Duration::from_secs(10));
        assert!(wait_for(|| completions.load(Ordering::SeqCst) == 2));
        assert!(wait_for(|| !timer.is_running()));
    }

    #[test]
    fn retarget_from_completion_callback() {
        let now = epoch();
        let clock = ManualClock::new(now);
        let target = Dynamic::new(now + Duration::from_secs(1));
        let completions = Arc::new(AtomicUsize::new(0));
        let timer = CountdownTimer::new(target.clone())
            .clock(clock.clone())
            .tick_every(Duration::from_millis(5))
            .on_complete({
                let completions = completions.clone();
                move || {
                    if completions.fetch_add(1, Ordering::SeqCst) == 0 {
                        target.set(now + Duration::from_secs(10));
                    }
                }
            });
        timer.start();
        clock.advance(Duration::from_secs(2));

        assert!(wait_for(|| completions.load(Ordering::SeqCst) == 1));
        assert!(wait_for(|| timer.target() == now + Duration::from_secs(10)));
        assert!(wait_for(|| timer.remaining().get() == Duration::from_secs(8)));
        assert!(timer.is_running());

        clock.advance(Duration::from_secs(10));
        assert!(wait_for(|| completions.load(Ordering::SeqCst) == 2));
        std::thread::sleep(Duration::from_millis(50));
        assert_eq!(completions.load(Ordering::SeqCst), 2);
    }
}
