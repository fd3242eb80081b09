//! Time source and timer facility.
//!
//! Everything runs on one thread: timers are callbacks parked in a
//! [`TimerQueue`] and dispatched by whoever drives the clock, either the
//! wall-clock loop in [`SystemClock::run_until_idle`] or
//! [`ManualClock::advance`].

use std::cell::{Cell, RefCell};
use std::collections::{BTreeMap, HashMap};
use std::fmt;

use chrono::{Duration, Local, NaiveDate, NaiveDateTime};
use tracing::{debug, trace};

pub type TimerCallback = Box<dyn FnOnce()>;

#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash)]
pub struct TimerHandle(u64);

pub trait Clock {
    fn now(&self) -> NaiveDateTime;

    fn today(&self) -> NaiveDate {
        self.now().date()
    }

    /// Arms `callback` to run once `delay` has elapsed.
    fn set_timer(&self, delay: Duration, callback: TimerCallback) -> TimerHandle;

    /// Disarms a timer. Returns `false` if it already fired or was cancelled.
    fn cancel_timer(&self, handle: TimerHandle) -> bool;
}

#[derive(Default)]
pub struct TimerQueue {
    next_handle: Cell<u64>,
    deadlines: RefCell<HashMap<TimerHandle, NaiveDateTime>>,
    queue: RefCell<BTreeMap<(NaiveDateTime, TimerHandle), TimerCallback>>,
}

impl fmt::Debug for TimerQueue {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("TimerQueue")
            .field("armed", &self.len())
            .field("next_deadline", &self.next_deadline())
            .finish()
    }
}

impl TimerQueue {
    pub fn arm(&self, deadline: NaiveDateTime, callback: TimerCallback) -> TimerHandle {
        let handle = TimerHandle(self.next_handle.get() + 1);
        self.next_handle.set(handle.0);

        self.deadlines.borrow_mut().insert(handle, deadline);
        self.queue.borrow_mut().insert((deadline, handle), callback);
        trace!(?handle, %deadline, "timer armed");
        handle
    }

    pub fn cancel(&self, handle: TimerHandle) -> bool {
        let Some(deadline) = self.deadlines.borrow_mut().remove(&handle) else {
            return false;
        };
        self.queue.borrow_mut().remove(&(deadline, handle));
        trace!(?handle, "timer cancelled");
        true
    }

    pub fn len(&self) -> usize {
        self.deadlines.borrow().len()
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }

    pub fn next_deadline(&self) -> Option<NaiveDateTime> {
        self.queue.borrow().keys().next().map(|(deadline, _)| *deadline)
    }

    pub fn deadlines(&self) -> Vec<NaiveDateTime> {
        self.queue.borrow().keys().map(|(deadline, _)| *deadline).collect()
    }

    /// Removes the earliest timer due at or before `now`.
    ///
    /// The queue is no longer borrowed when the caller runs the callback, so
    /// callbacks may arm or cancel timers themselves.
    pub fn pop_due(&self, now: NaiveDateTime) -> Option<(TimerHandle, NaiveDateTime, TimerCallback)> {
        let mut queue = self.queue.borrow_mut();
        let (&(deadline, handle), _) = queue.first_key_value()?;
        if deadline > now {
            return None;
        }
        let callback = queue.remove(&(deadline, handle))?;
        drop(queue);

        self.deadlines.borrow_mut().remove(&handle);
        Some((handle, deadline, callback))
    }
}

/// Local wall clock with a blocking dispatch loop.
#[derive(Debug, Default)]
pub struct SystemClock {
    timers: TimerQueue,
}

impl SystemClock {
    pub fn new() -> Self {
        Self::default()
    }

    /// Runs every timer whose deadline has passed.
    pub fn run_due(&self) -> usize {
        let mut fired = 0;
        while let Some((handle, deadline, callback)) = self.timers.pop_due(self.now()) {
            debug!(?handle, %deadline, "timer fired");
            callback();
            fired += 1;
        }
        fired
    }

    /// Sleeps until each armed timer is due and runs it; returns once none are left.
    #[tracing::instrument(skip(self))]
    pub fn run_until_idle(&self) -> usize {
        let mut fired = 0;
        while let Some(deadline) = self.timers.next_deadline() {
            let wait = deadline - self.now();
            if let Ok(wait) = wait.to_std() {
                debug!(?wait, %deadline, "sleeping until next timer");
                std::thread::sleep(wait);
            }
            fired += self.run_due();
        }
        fired
    }
}

impl Clock for SystemClock {
    fn now(&self) -> NaiveDateTime {
        Local::now().naive_local()
    }

    fn set_timer(&self, delay: Duration, callback: TimerCallback) -> TimerHandle {
        self.timers.arm(self.now() + delay, callback)
    }

    fn cancel_timer(&self, handle: TimerHandle) -> bool {
        self.timers.cancel(handle)
    }
}

/// A clock that only moves when told to.
#[derive(Debug)]
pub struct ManualClock {
    now: Cell<NaiveDateTime>,
    timers: TimerQueue,
}

impl ManualClock {
    pub fn new(start: NaiveDateTime) -> Self {
        Self {
            now: Cell::new(start),
            timers: TimerQueue::default(),
        }
    }

    pub fn armed(&self) -> usize {
        self.timers.len()
    }

    pub fn armed_deadlines(&self) -> Vec<NaiveDateTime> {
        self.timers.deadlines()
    }

    /// Moves time forward, running due timers in deadline order with `now`
    /// set to each deadline as it fires.
    pub fn advance(&self, by: Duration) -> usize {
        self.advance_to(self.now.get() + by)
    }

    pub fn advance_to(&self, target: NaiveDateTime) -> usize {
        let mut fired = 0;
        while let Some((handle, deadline, callback)) = self.timers.pop_due(target) {
            self.now.set(deadline.max(self.now.get()));
            debug!(?handle, %deadline, "timer fired");
            callback();
            fired += 1;
        }
        if target > self.now.get() {
            self.now.set(target);
        }
        fired
    }
}

impl Clock for ManualClock {
    fn now(&self) -> NaiveDateTime {
        self.now.get()
    }

    fn set_timer(&self, delay: Duration, callback: TimerCallback) -> TimerHandle {
        self.timers.arm(self.now.get() + delay, callback)
    }

    fn cancel_timer(&self, handle: TimerHandle) -> bool {
        self.timers.cancel(handle)
    }
}
