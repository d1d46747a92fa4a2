use std::fmt;
use std::ops::ControlFlow;
use std::sync::Arc;
use std::thread::{self, Thread};
use std::time::{Duration, Instant};

use parking_lot::{Condvar, Mutex, MutexGuard};

/// Whether a deferred callback's owner is still alive.
#[derive(Clone, Copy, Debug, Eq, PartialEq)]
pub enum Lifecycle {
    /// Callbacks may run.
    Active,
    /// The owner has been torn down; no further callbacks may run.
    Disposed,
}

/// A fixed-rate callback running on a background thread.
///
/// The schedule is cancelled when the ticker is dropped. Once
/// [`cancel`](Self::cancel) returns, the callback is not running and will not
/// run again.
#[must_use]
pub struct Ticker {
    data: Arc<TickData>,
    thread: Thread,
}

impl Ticker {
    /// Spawns a new schedule that invokes `tick` every `period`.
    ///
    /// The first invocation happens one `period` after spawning. Returning
    /// [`ControlFlow::Break`] from `tick` ends the schedule.
    pub fn spawn<F>(period: Duration, tick: F) -> Self
    where
        F: FnMut() -> ControlFlow<()> + Send + 'static,
    {
        let now = Instant::now();
        let data = Arc::new(TickData {
            state: Mutex::new(TickState {
                lifecycle: Lifecycle::Active,
                next_target: now + period,
                ticking: false,
                frame: 0,
            }),
            period,
            sync: Condvar::new(),
        });

        let handle = thread::spawn({
            let data = data.clone();
            move || tick_loop(&data, tick)
        });

        Self {
            data,
            thread: handle.thread().clone(),
        }
    }

    /// Restarts the schedule so that the next tick happens one full period
    /// from now.
    pub fn restart(&self) {
        let mut state = self.data.state();
        state.next_target = Instant::now() + self.data.period;
        drop(state);
        self.data.sync.notify_all();
    }

    /// Returns the current lifecycle of this schedule.
    #[must_use]
    pub fn lifecycle(&self) -> Lifecycle {
        self.data.state().lifecycle
    }

    /// Returns the number of ticks that have been invoked.
    #[must_use]
    pub fn ticks(&self) -> usize {
        self.data.state().frame
    }

    /// Stops the schedule.
    ///
    /// When called from any thread other than the ticker's own, this waits for
    /// an in-progress tick to finish. This function is idempotent.
    pub fn cancel(&self) {
        let mut state = self.data.state();
        state.lifecycle = Lifecycle::Disposed;
        self.data.sync.notify_all();

        if thread::current().id() != self.thread.id() {
            while state.ticking {
                self.data.sync.wait(&mut state);
            }
        }
    }
}

impl Drop for Ticker {
    fn drop(&mut self) {
        self.cancel();
    }
}

impl fmt::Debug for Ticker {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let state = self.data.state();
        f.debug_struct("Ticker")
            .field("period", &self.data.period)
            .field("lifecycle", &state.lifecycle)
            .field("frame", &state.frame)
            .finish_non_exhaustive()
    }
}

struct TickData {
    state: Mutex<TickState>,
    period: Duration,
    sync: Condvar,
}

impl TickData {
    fn state(&self) -> MutexGuard<'_, TickState> {
        self.state.lock()
    }
}

struct TickState {
    lifecycle: Lifecycle,
    next_target: Instant,
    ticking: bool,
    frame: usize,
}

fn tick_loop<F>(data: &TickData, mut tick: F)
where
    F: FnMut() -> ControlFlow<()>,
{
    let mut state = data.state();
    while state.lifecycle == Lifecycle::Active {
        let now = Instant::now();
        match state.next_target.checked_duration_since(now) {
            Some(remaining) if remaining > Duration::ZERO => {
                // Wake early on cancel or restart and re-evaluate.
                data.sync.wait_for(&mut state, remaining);
                continue;
            }
            _ => {}
        }

        state.frame += 1;
        state.next_target = (state.next_target + data.period).max(now);
        state.ticking = true;
        let flow = MutexGuard::unlocked(&mut state, &mut tick);
        state.ticking = false;
        if flow.is_break() {
            state.lifecycle = Lifecycle::Disposed;
        }
        data.sync.notify_all();
    }
    tracing::trace!(frames = state.frame, "ticker stopped");
}
