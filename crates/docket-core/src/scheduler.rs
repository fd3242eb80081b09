use std::cell::{Cell, RefCell};
use std::collections::BTreeMap;
use std::fmt;
use std::rc::Rc;

use chrono::{Duration, NaiveDateTime};
use tracing::{debug, info, warn};

use crate::clock::{Clock, TimerHandle};
use crate::notify::{Notifier, Permission};
use crate::task::{Task, TaskId};

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ScheduleOutcome {
    Armed { fire_at: NaiveDateTime },
    NoStartTime,
    Unauthorized,
    /// The start time is now or already behind us; nothing fires late.
    PastDue { late_by: Duration },
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum TimerState {
    Unscheduled,
    Pending { fire_at: NaiveDateTime },
}

#[derive(Debug, Clone, Copy)]
struct PendingTimer {
    handle: TimerHandle,
    fire_at: NaiveDateTime,
    generation: u64,
}

type PendingMap = Rc<RefCell<BTreeMap<TaskId, PendingTimer>>>;

/// Keeps at most one armed notification timer per task.
pub struct NotificationScheduler {
    clock: Rc<dyn Clock>,
    notifier: Rc<dyn Notifier>,
    pending: PendingMap,
    generation: Cell<u64>,
}

impl fmt::Debug for NotificationScheduler {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("NotificationScheduler")
            .field("pending", &self.pending.borrow().len())
            .finish_non_exhaustive()
    }
}

impl NotificationScheduler {
    pub fn new(clock: Rc<dyn Clock>, notifier: Rc<dyn Notifier>) -> Self {
        Self {
            clock,
            notifier,
            pending: Rc::new(RefCell::new(BTreeMap::new())),
            generation: Cell::new(0),
        }
    }

    /// One-time startup request. A refusal is only logged; `schedule`
    /// re-reads the permission each time, so a later grant still takes effect.
    #[tracing::instrument(skip(self))]
    pub fn request_authorization(&self) -> Permission {
        let permission = self.notifier.request_authorization();
        match permission {
            Permission::Granted => info!("notification permission granted"),
            Permission::Denied => warn!("notification permission was denied"),
            Permission::Unsupported => warn!("notifications not supported"),
        }
        permission
    }

    #[tracing::instrument(skip(self, task), fields(id = %task.id, kind = %task.kind))]
    pub fn schedule(&self, task: &Task) -> ScheduleOutcome {
        let Some(start) = task.start_time else {
            debug!("skipping schedule: no start time set");
            return ScheduleOutcome::NoStartTime;
        };

        if !self.notifier.is_authorized() {
            debug!("skipping schedule: notifications not authorized");
            return ScheduleOutcome::Unauthorized;
        }

        let delay = start - self.clock.now();
        if delay <= Duration::zero() {
            info!(
                delay_ms = delay.num_milliseconds(),
                "start time is in the past or now; not scheduling"
            );
            return ScheduleOutcome::PastDue { late_by: -delay };
        }

        self.cancel(task.id);

        let generation = self.generation.get() + 1;
        self.generation.set(generation);

        let id = task.id;
        let title = task.kind.notification_title();
        let body = task.text.clone();
        let notifier = Rc::clone(&self.notifier);
        let pending = Rc::clone(&self.pending);
        let handle = self.clock.set_timer(
            delay,
            Box::new(move || {
                if notifier.is_authorized() {
                    match notifier.fire(title, &body) {
                        Ok(()) => info!(id = %id, title, "notification fired"),
                        Err(err) => warn!(id = %id, error = %err, "failed to emit notification"),
                    }
                } else {
                    debug!(id = %id, "permission withdrawn before firing; skipping");
                }

                let mut pending = pending.borrow_mut();
                if pending
                    .get(&id)
                    .is_some_and(|entry| entry.generation == generation)
                {
                    pending.remove(&id);
                }
            }),
        );

        self.pending.borrow_mut().insert(
            id,
            PendingTimer {
                handle,
                fire_at: start,
                generation,
            },
        );
        debug!(fire_at = %start, delay_ms = delay.num_milliseconds(), "notification scheduled");
        ScheduleOutcome::Armed { fire_at: start }
    }

    /// Disarms the pending timer for `id`; returns `false` if there was none.
    #[tracing::instrument(skip(self), fields(id = %id))]
    pub fn cancel(&self, id: TaskId) -> bool {
        let removed = self.pending.borrow_mut().remove(&id);
        let Some(entry) = removed else {
            return false;
        };
        self.clock.cancel_timer(entry.handle);
        debug!("cleared pending notification");
        true
    }

    pub fn state(&self, id: TaskId) -> TimerState {
        match self.pending.borrow().get(&id) {
            Some(entry) => TimerState::Pending {
                fire_at: entry.fire_at,
            },
            None => TimerState::Unscheduled,
        }
    }

    pub fn pending_count(&self) -> usize {
        self.pending.borrow().len()
    }

    pub fn next_fire(&self) -> Option<(TaskId, NaiveDateTime)> {
        self.pending
            .borrow()
            .iter()
            .map(|(id, entry)| (*id, entry.fire_at))
            .min_by_key(|(_, fire_at)| *fire_at)
    }
}
